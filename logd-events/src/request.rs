//! Queued requests and their replies.

use std::time::Instant;

use logd_core::ConnId;
use logd_protocol::Response;
use logd_store::LogChunk;
use tokio::sync::{mpsc, oneshot, watch};

/// One element of a reader stream.
#[derive(Debug)]
pub enum StreamChunk {
    /// A span of stored bytes, written as `+<len>\r\n` plus the raw bytes.
    Data(LogChunk),
    /// Terminates a finite read with `+EOF\r\n`. Tails never carry this;
    /// their streams end when the subscription is dropped.
    Eof,
}

/// A request as routed through the handlers.
///
/// The reply is delivered exactly once. The done signal is owned by the
/// connection task and flips when the client disconnects or sends `CLOSE`,
/// letting the topic queue drop the connection's subscription.
#[derive(Debug)]
pub struct Request {
    /// The parsed command.
    pub cmd: logd_protocol::Request,
    /// Identity of the submitting connection, keying subscriptions.
    pub conn_id: ConnId,
    /// Deadline stamped by the listener from its server timeout. The queue
    /// answers `ERR` without dispatching once this has passed.
    pub deadline: Instant,
    /// Flips to true when the connection goes away.
    pub done: watch::Receiver<bool>,
}

impl Request {
    /// Builds a request envelope.
    #[must_use]
    pub const fn new(
        cmd: logd_protocol::Request,
        conn_id: ConnId,
        deadline: Instant,
        done: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cmd,
            conn_id,
            deadline,
            done,
        }
    }
}

/// A response handed back to the listener.
#[derive(Debug)]
pub struct Reply {
    /// The status line to write.
    pub response: Response,
    /// Chunk stream for `READ` and `TAIL`; drained until [`StreamChunk::Eof`]
    /// or channel close.
    pub stream: Option<mpsc::Receiver<StreamChunk>>,
    /// Ready handshake: the listener fires this once its drain loop is open,
    /// before the handler starts pushing chunks, so none are dropped.
    pub ready: Option<oneshot::Sender<()>>,
}

impl Reply {
    /// A reply with no stream.
    #[must_use]
    pub const fn simple(response: Response) -> Self {
        Self {
            response,
            stream: None,
            ready: None,
        }
    }

    /// An `ERR` reply.
    #[must_use]
    pub const fn err() -> Self {
        Self::simple(Response::err())
    }

    /// A `CLIENT_ERR <reason>` reply.
    #[must_use]
    pub fn client_err(reason: impl Into<String>) -> Self {
        Self::simple(Response::client_err(reason))
    }
}
