//! End-to-end tests over a real socket: server, handlers, store, and the
//! client library exercising the full wire protocol.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use logd_client::{Client, ClientError};
use logd_core::Config;
use logd_events::Handlers;
use logd_protocol::Batch;
use logd_server::Socket;

struct TestServer {
    addr: String,
    handlers: Arc<Handlers>,
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
    _dir: tempfile::TempDir,
}

async fn start_server(configure: impl FnOnce(Config) -> Config) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let conf = configure(
        Config::new()
            .with_log_file(dir.path())
            .with_server_timeout(Duration::from_secs(5)),
    );

    let handlers = Arc::new(Handlers::new(conf.clone()));
    handlers.setup().await.unwrap();

    let socket = Socket::new(conf, Arc::clone(&handlers) as _, handlers.stats());
    let shutdown = socket.shutdown_handle();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let join = tokio::spawn(async move {
        socket.serve(listener).await.unwrap();
    });

    TestServer {
        addr,
        handlers,
        shutdown,
        join,
        _dir: dir,
    }
}

impl TestServer {
    async fn stop(self) {
        self.shutdown.notify_waiters();
        self.join.await.unwrap();
        self.handlers.stop().await;
    }
}

fn batch(topic: &str, msgs: &[&str]) -> Batch {
    let mut b = Batch::new(topic).unwrap();
    for m in msgs {
        b.append(m.as_bytes().to_vec()).unwrap();
    }
    b
}

#[tokio::test]
async fn test_write_then_read_roundtrip() {
    let server = start_server(|c| c).await;
    let mut client = Client::connect(&server.addr).await.unwrap();

    let b = batch("events", &["hello"]);
    let offset = client.batch(&b).await.unwrap();
    assert_eq!(offset, 0);

    let (start, batches) = client.read("events", 0, 1).await.unwrap();
    assert_eq!(start, 0);
    assert_eq!(batches, 1);

    let got = client.next_batch().await.unwrap().unwrap();
    // Byte-for-byte round trip, framing included.
    assert_eq!(got.wire_bytes(), b.encode());
    assert!(client.next_batch().await.unwrap().is_none());

    client.close().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_offsets_are_byte_positions() {
    let server = start_server(|c| c).await;
    let mut client = Client::connect(&server.addr).await.unwrap();

    let b1 = batch("events", &["first"]);
    let b2 = batch("events", &["second"]);
    let o1 = client.batch(&b1).await.unwrap();
    let o2 = client.batch(&b2).await.unwrap();
    assert_eq!(o1, 0);
    assert_eq!(o2, b1.encode().len() as u64);

    let head = client.head("events").await.unwrap();
    assert_eq!(head, o2 + b2.encode().len() as u64);

    server.stop().await;
}

#[tokio::test]
async fn test_tail_sees_concurrent_writes() {
    let server = start_server(|c| c).await;

    let mut tailer = Client::connect(&server.addr).await.unwrap();
    let mut writer = Client::connect(&server.addr).await.unwrap();

    // Subscribe before any data exists.
    writer.batch(&batch("events", &["before"])).await.unwrap();
    let (head, _) = tailer.tail("events", 0).await.unwrap();
    assert!(head > 0);

    let live = batch("events", &["after-subscribe"]);
    writer.batch(&live).await.unwrap();

    let got = tokio::time::timeout(Duration::from_secs(2), tailer.next_batch())
        .await
        .expect("tail delivery timed out")
        .unwrap()
        .unwrap();
    assert_eq!(got.wire_bytes(), live.encode());

    server.stop().await;
}

#[tokio::test]
async fn test_read_at_evicted_or_missing_offset_is_rejected() {
    let server = start_server(|c| c).await;
    let mut client = Client::connect(&server.addr).await.unwrap();

    client.batch(&batch("events", &["hello"])).await.unwrap();

    // Not a batch boundary.
    let err = client.read("events", 3, 1).await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(_)));

    // Unknown topic.
    let err = client.read("ghost", 0, 1).await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(_)));

    server.stop().await;
}

#[tokio::test]
async fn test_crc_tamper_rejected_and_head_unchanged() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let server = start_server(|c| c).await;
    let mut client = Client::connect(&server.addr).await.unwrap();
    client.batch(&batch("events", &["seed"])).await.unwrap();
    let head_before = client.head("events").await.unwrap();

    // Flip one body byte behind the declared CRC.
    let wire = batch("events", &["payload"]).encode();
    let mut tampered = wire.to_vec();
    let body_at = tampered.windows(2).position(|w| w == b"\r\n").unwrap() + 2;
    tampered[body_at + 8] ^= 0x01;

    let mut raw = tokio::net::TcpStream::connect(&server.addr).await.unwrap();
    raw.write_all(&tampered).await.unwrap();
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        raw.read_exact(&mut byte).await.unwrap();
        line.push(byte[0]);
        if line.ends_with(b"\r\n") {
            break;
        }
    }
    let line = String::from_utf8_lossy(&line);
    assert!(line.starts_with("CLIENT_ERR"), "got {line:?}");
    assert!(line.contains("crc"), "got {line:?}");

    assert_eq!(client.head("events").await.unwrap(), head_before);
    server.stop().await;
}

#[tokio::test]
async fn test_empty_batch_rejected() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let server = start_server(|c| c).await;

    let mut raw = tokio::net::TcpStream::connect(&server.addr).await.unwrap();
    raw.write_all(b"BATCH events 1 0 0\r\n\r\n").await.unwrap();
    let mut buf = vec![0u8; 256];
    let n = raw.read(&mut buf).await.unwrap();
    let line = String::from_utf8_lossy(&buf[..n]);
    assert!(line.starts_with("CLIENT_ERR"), "got {line:?}");

    server.stop().await;
}

#[tokio::test]
async fn test_retention_evicts_old_offsets() {
    let server = start_server(|c| {
        c.with_partition_size(64).with_max_partitions(2)
    })
    .await;
    let mut client = Client::connect(&server.addr).await.unwrap();

    for i in 0..6 {
        client
            .batch(&batch("events", &[&format!("a sizeable payload {i}")]))
            .await
            .unwrap();
    }

    // Offset 0 has been retired by retention.
    let err = client.read("events", 0, 1).await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(_)));

    server.stop().await;
}

#[tokio::test]
async fn test_server_survives_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let conf = Config::new()
        .with_log_file(dir.path())
        .with_server_timeout(Duration::from_secs(5));

    let wire = {
        let handlers = Arc::new(Handlers::new(conf.clone()));
        handlers.setup().await.unwrap();
        let socket = Socket::new(conf.clone(), Arc::clone(&handlers) as _, handlers.stats());
        let shutdown = socket.shutdown_handle();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let join = tokio::spawn(async move { socket.serve(listener).await.unwrap() });

        let mut client = Client::connect(&addr).await.unwrap();
        let b = batch("events", &["durable"]);
        client.batch(&b).await.unwrap();

        shutdown.notify_waiters();
        join.await.unwrap();
        handlers.stop().await;
        b.encode()
    };

    // A fresh process over the same data directory serves the old batch.
    let handlers = Arc::new(Handlers::new(conf.clone()));
    handlers.setup().await.unwrap();
    let socket = Socket::new(conf, Arc::clone(&handlers) as _, handlers.stats());
    let shutdown = socket.shutdown_handle();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let join = tokio::spawn(async move { socket.serve(listener).await.unwrap() });

    let mut client = Client::connect(&addr).await.unwrap();
    let (_, batches) = client.read("events", 0, 1).await.unwrap();
    assert_eq!(batches, 1);
    let got = client.next_batch().await.unwrap().unwrap();
    assert_eq!(got.wire_bytes(), wire);

    shutdown.notify_waiters();
    join.await.unwrap();
    handlers.stop().await;
}

#[tokio::test]
async fn test_ping_and_stats() {
    let server = start_server(|c| c).await;
    let mut client = Client::connect(&server.addr).await.unwrap();

    client.ping().await.unwrap();
    client.batch(&batch("events", &["counted"])).await.unwrap();
    let body = client.stats().await.unwrap();
    assert!(body.contains("total_writes: 1"), "got {body:?}");

    server.stop().await;
}
