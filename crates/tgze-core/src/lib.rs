//! Core domain + application logic for the tgze media relay.
//!
//! This crate is intentionally framework-agnostic. Telegram, yt-dlp and ffmpeg
//! live behind ports (traits) implemented in adapter crates.

pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod formats;
pub mod formatting;
pub mod links;
pub mod logging;
pub mod pacing;
pub mod playlist;
pub mod ports;
pub mod relay;
pub mod state;
pub mod store;
pub mod transcode;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
