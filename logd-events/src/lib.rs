//! Logd event queues.
//!
//! Commands come from the listener, are handled, and a response is given:
//! a batch arrives, it is written to the topic's store, and an offset is
//! returned; a tail arrives, and the caller receives a live chunk stream.
//!
//! # Architecture
//!
//! ```text
//! Connection task
//!       │ push_request
//!       ▼
//! ┌────────────┐   topic map    ┌──────────────────┐
//! │  Handlers  │───────────────►│ EventQ (topic A) │──► Store + Subscriptions
//! │            │                └──────────────────┘
//! │            │   no topic     ┌──────────────────┐
//! │            │───────────────►│ EventQ (asyncQ)  │
//! └────────────┘                └──────────────────┘
//! ```
//!
//! Each topic has exactly one event queue task, which is the only mutator of
//! that topic's store and subscription set; per-topic operations are totally
//! ordered by its dequeue order. Topic-less commands (`PING`, `STATS`,
//! `SLEEP`, `SHUTDOWN`) and blocking commands for unknown topics go to the
//! shared asyncQ, so they never wait behind heavy writes.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]

mod error;
mod handlers;
mod queue;
mod request;
mod subscriptions;

pub use error::{EventError, EventResult};
pub use handlers::{Handlers, RequestHandler};
pub use queue::EventQHandle;
pub use request::{Reply, Request, StreamChunk};
