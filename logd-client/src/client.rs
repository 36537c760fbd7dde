//! Connection-oriented client.

use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use logd_protocol::{Batch, BatchScanner, ClientResponse, Status};

use crate::error::{ClientError, ClientResult};

/// A client connection to a logd server.
///
/// After [`read`](Client::read) or [`tail`](Client::tail), call
/// [`next_batch`](Client::next_batch) until it returns `None` (finite
/// reads) or forever (tails).
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    scanner: BatchScanner,
}

impl Client {
    /// Connects to a server.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn connect(addr: &str) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        debug!(addr, "connected");
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            scanner: BatchScanner::new(),
        })
    }

    /// Sends a batch, returning its committed offset.
    ///
    /// # Errors
    /// Returns an error when the server rejects the batch or the
    /// connection fails.
    pub async fn batch(&mut self, batch: &Batch) -> ClientResult<u64> {
        self.send(&batch.wire_bytes()).await?;
        let resp = self.read_response().await?;
        Ok(resp.offset())
    }

    /// Sends `READ`, returning `(offset, batches)` from the response.
    /// Drain the result with [`next_batch`](Client::next_batch).
    ///
    /// # Errors
    /// Returns an error when the offset is rejected or the connection
    /// fails.
    pub async fn read(&mut self, topic: &str, offset: u64, limit: u64) -> ClientResult<(u64, u64)> {
        self.send(format!("READ {topic} {offset} {limit}\r\n").as_bytes())
            .await?;
        let resp = self.read_response().await?;
        self.scanner.reset();
        Ok((resp.offset(), resp.batches()))
    }

    /// Sends `TAIL`, returning `(head_offset, batches)`. Drain live batches
    /// with [`next_batch`](Client::next_batch).
    ///
    /// # Errors
    /// Returns an error when the topic is rejected or the connection fails.
    pub async fn tail(&mut self, topic: &str, limit: u64) -> ClientResult<(u64, u64)> {
        self.send(format!("TAIL {topic} {limit}\r\n").as_bytes())
            .await?;
        let resp = self.read_response().await?;
        self.scanner.reset();
        Ok((resp.offset(), resp.batches()))
    }

    /// Returns the next batch of the current read stream, or `None` at
    /// `+EOF`.
    ///
    /// # Errors
    /// Returns an error on framing failures; a missing `+` sigil is fatal
    /// to the stream.
    pub async fn next_batch(&mut self) -> ClientResult<Option<Batch>> {
        Ok(self.scanner.next(&mut self.reader).await?)
    }

    /// Asks for a topic's head offset.
    ///
    /// # Errors
    /// Returns an error when the topic is unknown or the connection fails.
    pub async fn head(&mut self, topic: &str) -> ClientResult<u64> {
        self.send(format!("HEAD {topic}\r\n").as_bytes()).await?;
        let resp = self.read_response().await?;
        Ok(resp.offset())
    }

    /// Pings the server.
    ///
    /// # Errors
    /// Returns an error when the server is unreachable.
    pub async fn ping(&mut self) -> ClientResult<()> {
        self.send(b"PING\r\n").await?;
        self.read_response().await.map(|_| ())
    }

    /// Fetches the server's statistics body.
    ///
    /// # Errors
    /// Returns an error when the server is unreachable.
    pub async fn stats(&mut self) -> ClientResult<String> {
        self.send(b"STATS\r\n").await?;
        let resp = self.read_response().await?;
        let body = resp
            .body()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        Ok(body)
    }

    /// Sends `CLOSE` and drops the connection.
    ///
    /// # Errors
    /// Returns an error when the close handshake fails.
    pub async fn close(mut self) -> ClientResult<()> {
        self.send(b"CLOSE\r\n").await?;
        self.read_response().await.map(|_| ())
    }

    async fn send(&mut self, bytes: &[u8]) -> ClientResult<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_response(&mut self) -> ClientResult<ClientResponse> {
        let resp = ClientResponse::read_from(&mut self.reader).await?;
        match resp.status() {
            Status::Ok | Status::Eof => Ok(resp),
            Status::ClientErr => Err(ClientError::Rejected(
                resp.reason().unwrap_or("invalid request").to_string(),
            )),
            Status::Err => Err(ClientError::Server),
        }
    }
}
