//! Logd Core - Configuration, statistics, and identifiers for logd.
//!
//! This crate carries the pieces every other logd crate needs: the broker
//! [`Config`] (with its `LOGD_*` environment bindings), the atomic [`Stats`]
//! counters exposed by the `STATS` command, and the [`ConnId`] connection
//! identifier used to key subscriptions.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: a connection id is not a bare u64
//! - **Explicit limits**: partition sizes and retention are bounded by config
//! - **No unsafe code**

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]

mod config;
mod stats;
mod types;

pub use config::{Config, ConfigError};
pub use stats::Stats;
pub use types::ConnId;
