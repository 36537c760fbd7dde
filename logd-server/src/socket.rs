//! Socket listener and connection lifecycle.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, error, info, warn};

use logd_core::{Config, ConnId, Stats};
use logd_events::{Reply, Request, RequestHandler, StreamChunk};
use logd_protocol::{encode_envelope, ProtocolError, Response, EOF_ENVELOPE};

/// Connection writes are serialized through one buffered half, shared by
/// the request loop and any streaming drain task.
type SharedWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// The logd TCP listener.
pub struct Socket {
    conf: Arc<Config>,
    handler: Arc<dyn RequestHandler>,
    stats: Arc<Stats>,
    shutdown: Arc<Notify>,
}

impl Socket {
    /// Creates a listener over a request handler.
    #[must_use]
    pub fn new(conf: Config, handler: Arc<dyn RequestHandler>, stats: Arc<Stats>) -> Self {
        Self {
            conf: Arc::new(conf),
            handler,
            stats,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Returns a handle that stops the server when notified.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Binds the configured address and serves until shutdown.
    ///
    /// # Errors
    /// Returns an error if the address cannot be bound.
    pub async fn listen_and_serve(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.conf.hostport).await?;
        self.serve(listener).await
    }

    /// Serves connections from an already-bound listener until shutdown,
    /// then waits up to the graceful-shutdown timeout for connections to
    /// drain.
    ///
    /// # Errors
    /// Returns an error if accepting fails irrecoverably.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = %listener.local_addr()?, "serving");
        let (closing_tx, closing_rx) = watch::channel(false);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "accept");
                            Stats::incr(&self.stats.total_connections);
                            Stats::incr(&self.stats.connections);
                            let conn = ConnContext {
                                conf: Arc::clone(&self.conf),
                                handler: Arc::clone(&self.handler),
                                stats: Arc::clone(&self.stats),
                                shutdown: Arc::clone(&self.shutdown),
                                closing: closing_rx.clone(),
                            };
                            tokio::spawn(handle_connection(stream, conn));
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
                () = self.shutdown.notified() => {
                    info!("listener shutting down");
                    break;
                }
            }
        }

        // Give open connections a bounded window to finish.
        let _ = closing_tx.send(true);
        let deadline = Instant::now() + self.conf.graceful_shutdown_timeout;
        while self.stats.connections.load(Ordering::Relaxed) > 0 && Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        let remaining = self.stats.connections.load(Ordering::Relaxed);
        if remaining > 0 {
            warn!(remaining, "connections still open after graceful shutdown window");
        }
        Ok(())
    }
}

struct ConnContext {
    conf: Arc<Config>,
    handler: Arc<dyn RequestHandler>,
    stats: Arc<Stats>,
    shutdown: Arc<Notify>,
    closing: watch::Receiver<bool>,
}

async fn handle_connection(stream: TcpStream, ctx: ConnContext) {
    let conn_id = ConnId::next();
    let peer = stream.peer_addr().ok();
    let (read_half, write_half) = stream.into_split();
    let reader = BufReader::new(read_half);
    let writer: SharedWriter = Arc::new(Mutex::new(BufWriter::new(write_half)));

    // Fires when this connection ends, releasing its subscriptions.
    let (done_tx, done_rx) = watch::channel(false);

    let result = serve_connection(reader, &writer, conn_id, done_rx, &ctx).await;
    let _ = done_tx.send(true);

    match result {
        Ok(()) => debug!(%conn_id, ?peer, "connection closed"),
        Err(e) if is_disconnect(&e) => debug!(%conn_id, ?peer, "client went away"),
        Err(e) => {
            Stats::incr(&ctx.stats.connection_errors);
            warn!(%conn_id, ?peer, error = %e, "connection error");
        }
    }
    Stats::decr(&ctx.stats.connections);
}

async fn serve_connection(
    mut reader: BufReader<OwnedReadHalf>,
    writer: &SharedWriter,
    conn_id: ConnId,
    done_rx: watch::Receiver<bool>,
    ctx: &ConnContext,
) -> std::io::Result<()> {
    let mut closing = ctx.closing.clone();

    loop {
        if *closing.borrow() {
            break;
        }

        let cmd = tokio::select! {
            parsed = logd_protocol::Request::read_from(&mut reader) => match parsed {
                Ok(Some(cmd)) => cmd,
                Ok(None) => break,
                Err(e) if e.is_client_error() => {
                    // Malformed requests keep the connection open.
                    write_response(writer, &Response::client_err(e.to_string()), &ctx.stats)
                        .await?;
                    continue;
                }
                Err(ProtocolError::Io(e)) => return Err(e),
                Err(e) => return Err(std::io::Error::other(e)),
            },
            _ = closing.changed() => break,
        };

        debug!(%conn_id, command = cmd.name(), "request");
        let is_read = cmd.is_read();
        let is_close = matches!(cmd, logd_protocol::Request::Close);
        let is_shutdown = matches!(cmd, logd_protocol::Request::Shutdown);

        let deadline = Instant::now() + ctx.conf.server_timeout;
        let req = Request::new(cmd, conn_id, deadline, done_rx.clone());
        let reply = match ctx.handler.push_request(req).await {
            Ok(reply) => reply,
            Err(e) => {
                Stats::incr(&ctx.stats.command_errors);
                warn!(%conn_id, error = %e, "push failed");
                Reply::err()
            }
        };

        let succeeded = reply.response.is_ok();
        write_response(writer, &reply.response, &ctx.stats).await?;

        if is_read {
            if let Some(stream) = reply.stream {
                // Drain in the background so this loop keeps reading
                // commands; a CLOSE or disconnect on this connection ends
                // the stream.
                tokio::spawn(drain_stream(
                    Arc::clone(writer),
                    stream,
                    reply.ready,
                    Arc::clone(&ctx.stats),
                    done_rx.clone(),
                ));
            }
        }

        if is_close {
            break;
        }
        if is_shutdown && succeeded {
            info!(%conn_id, "shutdown requested");
            ctx.shutdown.notify_waiters();
            break;
        }
    }
    Ok(())
}

/// Copies stream chunks to the socket until EOF, channel close, or the
/// connection's done signal.
async fn drain_stream(
    writer: SharedWriter,
    mut stream: tokio::sync::mpsc::Receiver<StreamChunk>,
    ready: Option<tokio::sync::oneshot::Sender<()>>,
    stats: Arc<Stats>,
    mut done: watch::Receiver<bool>,
) {
    if let Some(ready) = ready {
        // The handler holds chunks until the drain loop is open.
        let _ = ready.send(());
    }

    loop {
        tokio::select! {
            chunk = stream.recv() => match chunk {
                Some(StreamChunk::Data(chunk)) => {
                    if let Err(e) = write_chunk(&writer, chunk, &stats).await {
                        debug!(error = %e, "reader stream cancelled");
                        break;
                    }
                }
                Some(StreamChunk::Eof) => {
                    let mut w = writer.lock().await;
                    if w.write_all(EOF_ENVELOPE).await.is_ok() {
                        let _ = w.flush().await;
                        Stats::add(&stats.total_bytes_written, EOF_ENVELOPE.len() as u64);
                    }
                    break;
                }
                None => break,
            },
            _ = done.changed() => break,
        }
    }
}

async fn write_chunk(
    writer: &SharedWriter,
    chunk: logd_store::LogChunk,
    stats: &Stats,
) -> std::io::Result<()> {
    let envelope = encode_envelope(chunk.len());
    let mut source = chunk.into_reader();

    // Envelope and payload go out under one lock so chunks never interleave.
    let mut w = writer.lock().await;
    w.write_all(&envelope).await?;
    let copied = tokio::io::copy(&mut source, &mut *w).await?;
    w.flush().await?;
    Stats::add(&stats.total_bytes_written, envelope.len() as u64 + copied);
    Ok(())
}

async fn write_response(
    writer: &SharedWriter,
    response: &Response,
    stats: &Stats,
) -> std::io::Result<()> {
    let bytes = response.encode();
    let mut w = writer.lock().await;
    w.write_all(&bytes).await?;
    w.flush().await?;
    Stats::add(&stats.total_bytes_written, bytes.len() as u64);
    Ok(())
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
    )
}
