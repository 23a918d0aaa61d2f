//! Core of the story tracking bot.
//!
//! This crate is framework-agnostic: Telegram and the story-checking service
//! live behind ports (traits) implemented in adapter crates.

pub mod commands;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod handle;
pub mod lifecycle;
pub mod logging;
pub mod messaging;
pub mod placeholders;
pub mod security;
pub mod store;
pub mod stories;

pub use errors::{Error, Result};
