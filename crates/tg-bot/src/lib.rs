//! Minimal typed client for the Telegram Bot HTTP API.
//!
//! Covers what is needed to use a channel as a document store: identifying the bot, inspecting a
//! chat, posting and deleting messages and documents, fetching files and polling updates.

mod client;
pub mod error;
pub mod models;

pub use client::{Bot, DEFAULT_API_BASE, GetUpdatesParams};
pub use error::BotError;
