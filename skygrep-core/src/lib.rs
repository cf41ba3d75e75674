#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![forbid(unsafe_code)]

pub mod config;
pub mod events;
pub mod health;
pub mod metrics;
pub mod processors;
pub mod rules;
pub mod shutdown;
pub mod utils;
