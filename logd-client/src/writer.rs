//! Background batching writer.
//!
//! Messages accumulate into a pending batch owned by a flusher task. The
//! batch is sent when the next message would push it past `batch_size`,
//! when `wait_interval` elapses, or on an explicit flush.

use std::time::Duration;

use bytes::Bytes;
use logd_protocol::{message_frame_len, Batch};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::Client;
use crate::error::{ClientError, ClientResult};

/// Configuration for a [`Writer`].
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Server address.
    pub hostport: String,
    /// Topic every message goes to.
    pub topic: String,
    /// Flush once the pending batch body would exceed this many bytes.
    pub batch_size: u64,
    /// Flush the pending batch at least this often.
    pub wait_interval: Duration,
}

impl WriterConfig {
    /// Creates a writer configuration with default batching.
    #[must_use]
    pub fn new(hostport: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            hostport: hostport.into(),
            topic: topic.into(),
            batch_size: 64 * 1024,
            wait_interval: Duration::from_millis(500),
        }
    }
}

enum WriterCmd {
    Write {
        body: Bytes,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Flush {
        reply: oneshot::Sender<ClientResult<Option<u64>>>,
    },
    Stop {
        reply: oneshot::Sender<ClientResult<()>>,
    },
}

/// Handle to a background flusher sending batches to one topic.
pub struct Writer {
    tx: mpsc::Sender<WriterCmd>,
    join: JoinHandle<()>,
}

impl Writer {
    /// Connects and starts the flusher task.
    ///
    /// # Errors
    /// Returns an error if the connection or topic name is invalid.
    pub async fn dial(conf: WriterConfig) -> ClientResult<Self> {
        let client = Client::connect(&conf.hostport).await?;
        let batch = Batch::new(conf.topic.clone())?;
        let (tx, rx) = mpsc::channel(64);
        let flusher = Flusher {
            conf,
            client,
            batch,
            rx,
        };
        let join = tokio::spawn(flusher.run());
        Ok(Self { tx, join })
    }

    /// Queues one message body.
    ///
    /// # Errors
    /// Returns an error if a flush forced by this write fails.
    pub async fn write(&self, body: impl Into<Bytes>) -> ClientResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(WriterCmd::Write {
            body: body.into(),
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| closed())?
    }

    /// Flushes the pending batch, returning the offset of the batch that
    /// was sent, if any.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    pub async fn flush(&self) -> ClientResult<Option<u64>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(WriterCmd::Flush { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| closed())?
    }

    /// Flushes the pending batch and stops the flusher.
    ///
    /// # Errors
    /// Returns an error if the final flush fails.
    pub async fn close(self) -> ClientResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(WriterCmd::Stop { reply: reply_tx }).await?;
        let result = reply_rx.await.map_err(|_| closed())?;
        let _ = self.join.await;
        result
    }

    async fn send(&self, cmd: WriterCmd) -> ClientResult<()> {
        self.tx.send(cmd).await.map_err(|_| closed())
    }
}

fn closed() -> ClientError {
    ClientError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "writer flusher stopped",
    ))
}

struct Flusher {
    conf: WriterConfig,
    client: Client,
    batch: Batch,
    rx: mpsc::Receiver<WriterCmd>,
}

impl Flusher {
    async fn run(mut self) {
        let mut interval = tokio::time::interval(self.conf.wait_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(WriterCmd::Write { body, reply }) => {
                        let _ = reply.send(self.write(body).await);
                    }
                    Some(WriterCmd::Flush { reply }) => {
                        let _ = reply.send(self.flush_pending().await);
                    }
                    Some(WriterCmd::Stop { reply }) => {
                        let _ = reply.send(self.flush_pending().await.map(|_| ()));
                        break;
                    }
                    None => {
                        if let Err(e) = self.flush_pending().await {
                            warn!(error = %e, "final flush failed");
                        }
                        break;
                    }
                },
                _ = interval.tick() => {
                    if let Err(e) = self.flush_pending().await {
                        warn!(error = %e, "interval flush failed");
                    }
                }
            }
        }
    }

    async fn write(&mut self, body: Bytes) -> ClientResult<()> {
        if self.should_flush(body.len() as u64) {
            self.flush_pending().await?;
        }
        self.batch.append(body)?;
        Ok(())
    }

    fn should_flush(&self, next_len: u64) -> bool {
        !self.batch.is_empty()
            && self.batch.body_len() + message_frame_len(next_len) >= self.conf.batch_size
    }

    async fn flush_pending(&mut self) -> ClientResult<Option<u64>> {
        if self.batch.is_empty() {
            return Ok(None);
        }
        let pending = std::mem::replace(&mut self.batch, Batch::new(self.conf.topic.clone())?);
        let offset = self.client.batch(&pending).await?;
        debug!(
            topic = %self.conf.topic,
            offset,
            messages = pending.message_count(),
            "flushed batch"
        );
        Ok(Some(offset))
    }
}
