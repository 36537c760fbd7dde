//! Logd client library.
//!
//! [`Client`] is a thin request/response wrapper over one connection.
//! [`Writer`] batches messages in the background and flushes them when the
//! batch fills or an interval passes, which is how producers amortize the
//! round trip.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]

mod client;
mod error;
mod writer;

pub use client::Client;
pub use error::{ClientError, ClientResult};
pub use writer::{Writer, WriterConfig};
