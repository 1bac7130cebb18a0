//! Core logic for the WhatsApp greeting/broadcast agent.
//!
//! This crate is transport-agnostic. The chat protocol lives behind the
//! `TransportPort` / `MessagingPort` traits, implemented in adapter crates.

pub mod backoff;
pub mod broadcast;
pub mod commands;
pub mod config;
pub mod cooldown;
pub mod credentials;
pub mod domain;
pub mod errors;
pub mod links;
pub mod logging;
pub mod messaging;
pub mod session;
pub mod utils;

#[cfg(test)]
mod testing;

pub use errors::{Error, Result};
