//! An OAuth-authenticated protocol translation proxy: exposes an
//! OpenAI-compatible chat-completions HTTP interface and forwards to
//! Anthropic's native messages API using a Claude Pro/Max subscription.
//!
//! Exposes the core functionality for both the CLI binary and integration
//! testing.

pub mod config;
pub mod models;
pub mod oauth;
pub mod proxy;
pub mod streaming;
pub mod token_manager;
pub mod translator;
