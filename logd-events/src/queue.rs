//! Per-topic event queue.
//!
//! One task drains a bounded inbound channel and is the only mutator of the
//! topic's store and subscription set. Every batch commit, read handoff,
//! and broadcast for a topic happens in dequeue order, which is what makes
//! offsets, on-disk order, and subscriber delivery order agree.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use logd_core::{ConnId, Stats};
use logd_protocol::{Batch, Response};
use logd_store::Store;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{EventError, EventResult};
use crate::request::{Reply, Request, StreamChunk};
use crate::subscriptions::Subscriptions;

/// Inbound channel capacity; sends suspend under load (backpressure).
const QUEUE_CAPACITY: usize = 1000;

/// Reader stream capacity, matching the subscription channel bound.
const STREAM_CAPACITY: usize = 1000;

pub(crate) enum QueueCmd {
    Request(Queued),
    Stop,
}

pub(crate) struct Queued {
    req: Request,
    reply: oneshot::Sender<Reply>,
}

/// Handle for pushing requests onto an event queue.
#[derive(Clone)]
pub struct EventQHandle {
    tx: mpsc::Sender<QueueCmd>,
}

impl EventQHandle {
    /// Pushes a request and waits for its reply.
    ///
    /// A handler that dies before replying (panic, queue shutdown) is
    /// reported as a plain `ERR`.
    ///
    /// # Errors
    /// Returns an error if the queue has stopped accepting requests.
    pub async fn push(&self, req: Request) -> EventResult<Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(QueueCmd::Request(Queued {
                req,
                reply: reply_tx,
            }))
            .await
            .map_err(|_| EventError::QueueClosed)?;

        Ok(reply_rx.await.unwrap_or_else(|_| Reply::err()))
    }

    /// Asks the queue to stop after the requests already enqueued.
    pub async fn stop(&self) {
        let _ = self.tx.send(QueueCmd::Stop).await;
    }
}

/// The event queue actor for one topic (or the shared asyncQ).
pub(crate) struct EventQ {
    /// Topic name; `None` for the asyncQ.
    topic: Option<String>,
    /// The topic's store; `None` for the asyncQ, which owns no log.
    store: Option<Box<dyn Store>>,
    subs: Subscriptions,
    stats: Arc<Stats>,
    rx: mpsc::Receiver<QueueCmd>,
}

impl EventQ {
    /// Spawns an event queue task, returning its handle and join handle.
    pub fn spawn(
        topic: Option<String>,
        store: Option<Box<dyn Store>>,
        stats: Arc<Stats>,
    ) -> (EventQHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let q = Self {
            topic,
            store,
            subs: Subscriptions::new(Arc::clone(&stats)),
            stats,
            rx,
        };
        let join = tokio::spawn(q.run());
        (EventQHandle { tx }, join)
    }

    async fn run(mut self) {
        debug!(topic = self.topic.as_deref().unwrap_or("<async>"), "event queue started");

        while let Some(cmd) = self.rx.recv().await {
            let queued = match cmd {
                QueueCmd::Stop => break,
                QueueCmd::Request(q) => q,
            };

            if Instant::now() >= queued.req.deadline {
                Stats::incr(&self.stats.command_errors);
                let _ = queued.reply.send(Reply::err());
                continue;
            }

            // A panicking handler must not unwind the loop; its dropped
            // reply channel surfaces as ERR at the push boundary.
            match AssertUnwindSafe(self.dispatch(queued)).catch_unwind().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(_) => {
                    Stats::incr(&self.stats.command_errors);
                    error!(
                        topic = self.topic.as_deref().unwrap_or("<async>"),
                        "handler panicked; converted to ERR"
                    );
                }
            }
        }

        self.close().await;
    }

    /// Handles one request. Returns false when the queue must stop serving
    /// (fatal store failure or shutdown).
    async fn dispatch(&mut self, queued: Queued) -> bool {
        let Queued { req, reply } = queued;
        let Request {
            cmd,
            conn_id,
            done,
            ..
        } = req;

        debug!(
            topic = self.topic.as_deref().unwrap_or("<async>"),
            %conn_id,
            command = cmd.name(),
            "event"
        );

        match cmd {
            logd_protocol::Request::Batch(batch) => self.handle_batch(&batch, reply).await,
            logd_protocol::Request::Read {
                offset, messages, ..
            } => {
                self.handle_read(offset, messages, conn_id, done, reply)
                    .await
            }
            logd_protocol::Request::Tail { .. } => {
                // A tail is a read from the current head that never ends.
                let head = self.store.as_ref().map(|s| s.head());
                match head {
                    Some(head) => self.handle_read(head, 0, conn_id, done, reply).await,
                    None => {
                        let _ = reply.send(Reply::client_err("no such topic"));
                        true
                    }
                }
            }
            logd_protocol::Request::Head { .. } => {
                let resp = match self.store.as_ref() {
                    Some(store) => Response::ok_offset(store.head(), 0),
                    None => Response::client_err("no such topic"),
                };
                let _ = reply.send(Reply::simple(resp));
                true
            }
            logd_protocol::Request::Stats => {
                let body = bytes::Bytes::from(self.stats.render());
                let _ = reply.send(Reply::simple(Response::ok_body(body)));
                true
            }
            logd_protocol::Request::Ping => {
                let _ = reply.send(Reply::simple(Response::ok()));
                true
            }
            logd_protocol::Request::Close => {
                self.subs.remove(conn_id);
                let _ = reply.send(Reply::simple(Response::ok()));
                true
            }
            logd_protocol::Request::Sleep { millis } => {
                Self::handle_sleep(millis, done, reply).await;
                true
            }
            logd_protocol::Request::Shutdown => self.handle_shutdown(reply).await,
        }
    }

    async fn handle_batch(&mut self, batch: &Batch, reply: oneshot::Sender<Reply>) -> bool {
        let Some(store) = self.store.as_mut() else {
            let _ = reply.send(Reply::client_err("no such topic"));
            return true;
        };

        let wire = batch.wire_bytes();
        match store.append(&wire).await {
            Ok(offset) => {
                Stats::incr(&self.stats.total_writes);
                let _ = reply.send(Reply::simple(Response::ok_offset(offset, 1)));
                self.subs.broadcast(&wire);
                true
            }
            Err(e) => {
                Stats::incr(&self.stats.command_errors);
                error!(
                    topic = self.topic.as_deref().unwrap_or("<async>"),
                    error = %e,
                    "append failed; topic queue stopping"
                );
                let _ = reply.send(Reply::err());
                // Failed bytes were already truncated by the store; an
                // append that cannot reach disk is fatal to this topic.
                false
            }
        }
    }

    /// Serves `READ` and, via `handle_read(head, 0, ..)`, `TAIL`.
    ///
    /// A limit of zero subscribes the connection after streaming the
    /// catch-up range; a nonzero limit ends the stream with `+EOF`.
    async fn handle_read(
        &mut self,
        offset: u64,
        limit: u64,
        conn_id: ConnId,
        done: watch::Receiver<bool>,
        reply: oneshot::Sender<Reply>,
    ) -> bool {
        let Some(store) = self.store.as_mut() else {
            let _ = reply.send(Reply::client_err("no such topic"));
            return true;
        };
        Stats::incr(&self.stats.total_reads);

        let info = match store.scan(offset, limit).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => {
                let _ = reply.send(Reply::client_err("offset not found"));
                return true;
            }
            Err(e) => {
                Stats::incr(&self.stats.command_errors);
                warn!(error = %e, "scan failed during read");
                let _ = reply.send(Reply::err());
                return true;
            }
        };

        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let _ = reply.send(Reply {
            response: Response::ok_offset(offset, info.batches),
            stream: Some(rx),
            ready: Some(ready_tx),
        });

        // Wait for the caller to open its drain loop so no chunk races the
        // reader.
        if ready_rx.await.is_err() {
            return true;
        }

        let chunks = match store.range(offset, info.end).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(error = %e, "range failed during read");
                let _ = tx.send(StreamChunk::Eof).await;
                return true;
            }
        };
        for chunk in chunks {
            if tx.send(StreamChunk::Data(chunk)).await.is_err() {
                return true;
            }
        }

        if limit == 0 {
            self.subs.add(conn_id, tx, done);
        } else {
            let _ = tx.send(StreamChunk::Eof).await;
        }
        true
    }

    async fn handle_sleep(
        millis: u64,
        mut done: watch::Receiver<bool>,
        reply: oneshot::Sender<Reply>,
    ) {
        tokio::select! {
            () = tokio::time::sleep(std::time::Duration::from_millis(millis)) => {}
            _ = done.changed() => {}
        }
        let _ = reply.send(Reply::simple(Response::ok()));
    }

    async fn handle_shutdown(&mut self, reply: oneshot::Sender<Reply>) -> bool {
        if let Some(store) = self.store.as_mut() {
            if let Err(e) = store.flush().await {
                error!(error = %e, "flush failed during shutdown");
                let _ = reply.send(Reply::err());
                return true;
            }
        }
        let _ = reply.send(Reply::simple(Response::ok()));
        // The store is closed by `close` once the loop exits.
        false
    }

    async fn close(&mut self) {
        if let Some(store) = self.store.as_mut() {
            if let Err(e) = store.shutdown().await {
                warn!(
                    topic = self.topic.as_deref().unwrap_or("<async>"),
                    error = %e,
                    "store shutdown failed"
                );
            }
        }
        self.subs.clear();
        info!(
            topic = self.topic.as_deref().unwrap_or("<async>"),
            "event queue stopped"
        );
    }
}
