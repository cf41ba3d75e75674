//! Shared wire types for skygrep.
//!
//! - [`objects`]: Jetstream frames and the status endpoint payloads.
//! - `client` (feature `client`): the Jetstream websocket subscription.

#![forbid(unsafe_code)]

pub mod objects;

#[cfg(feature = "client")]
pub mod client;
