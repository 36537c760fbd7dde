//! Request routing across topics.
//!
//! `Handlers` owns the map of topic name to event queue plus the shared
//! asyncQ. Blocking commands (`BATCH`, `READ`, `TAIL`) are forwarded to
//! their topic's queue, with the queue created lazily on the first `BATCH`
//! to a new topic. Everything else goes to the asyncQ, except `HEAD`, which
//! is answered by the topic's queue when one exists so the offset it
//! returns is ordered against that topic's writes.
//!
//! Topic creation is the only write to the map; the lock is held just
//! across check-and-insert. Forwarding itself is lock-free because each
//! queue owns its inbound channel.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use logd_core::{Config, Stats};
use logd_store::{DiskStore, Store, StoreConfig};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{EventError, EventResult};
use crate::queue::{EventQ, EventQHandle};
use crate::request::{Reply, Request};

/// Boundary between the listener and the core: anything that can take a
/// request and produce a reply.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Routes a request and waits for its reply.
    async fn push_request(&self, req: Request) -> EventResult<Reply>;
}

struct TopicQueue {
    handle: EventQHandle,
    join: JoinHandle<()>,
}

/// The per-topic event queue map plus the shared asyncQ.
pub struct Handlers {
    conf: Config,
    stats: Arc<Stats>,
    topics: Mutex<HashMap<String, TopicQueue>>,
    async_q: EventQHandle,
    async_join: Mutex<Option<JoinHandle<()>>>,
}

impl Handlers {
    /// Creates the handlers and starts the asyncQ.
    #[must_use]
    pub fn new(conf: Config) -> Self {
        let stats = Arc::new(Stats::new());
        let (async_q, async_join) = EventQ::spawn(None, None, Arc::clone(&stats));
        Self {
            conf,
            stats,
            topics: Mutex::new(HashMap::new()),
            async_q,
            async_join: Mutex::new(Some(async_join)),
        }
    }

    /// Returns the shared statistics counters.
    #[must_use]
    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Scans the data directory and starts an event queue for every topic
    /// that already exists on disk.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be prepared or a
    /// topic's store fails recovery.
    pub async fn setup(&self) -> EventResult<()> {
        tokio::fs::create_dir_all(&self.conf.log_file)
            .await
            .map_err(|e| EventError::Store(logd_store::StoreError::io("create data dir", e)))?;

        let mut dir = tokio::fs::read_dir(&self.conf.log_file)
            .await
            .map_err(|e| EventError::Store(logd_store::StoreError::io("read data dir", e)))?;

        let mut topics = self.topics.lock().await;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| EventError::Store(logd_store::StoreError::io("read data dir", e)))?
        {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !logd_protocol::valid_topic(name) {
                warn!(name, "ignoring non-topic directory in data dir");
                continue;
            }
            self.start_topic(&mut topics, name).await?;
        }
        Ok(())
    }

    /// Starts a topic's event queue and registers it. The topics lock must
    /// be held by the caller (this is the check-and-insert critical
    /// section).
    async fn start_topic(
        &self,
        topics: &mut HashMap<String, TopicQueue>,
        name: &str,
    ) -> EventResult<EventQHandle> {
        let dir = self.conf.topic_dir(name);
        let mut store_conf = StoreConfig::new(dir, name)
            .with_partition_size(self.conf.partition_size)
            .with_max_partitions(self.conf.max_partitions)
            .with_index_cursor_size(self.conf.index_cursor_size);
        store_conf.sync_on_rotate = self.conf.sync_on_rotate;

        let mut store = DiskStore::new(store_conf);
        store.setup().await?;

        let (handle, join) = EventQ::spawn(
            Some(name.to_string()),
            Some(Box::new(store)),
            Arc::clone(&self.stats),
        );
        topics.insert(
            name.to_string(),
            TopicQueue {
                handle: handle.clone(),
                join,
            },
        );
        info!(topic = name, "started topic event queue");
        Ok(handle)
    }

    /// Stops every queue, flushing and closing the stores.
    pub async fn stop(&self) {
        info!("shutting down handlers");
        self.async_q.stop().await;

        let mut topics = self.topics.lock().await;
        for (name, q) in topics.drain() {
            q.handle.stop().await;
            if let Err(e) = q.join.await {
                warn!(topic = %name, error = %e, "topic queue task failed");
            }
        }
        drop(topics);

        if let Some(join) = self.async_join.lock().await.take() {
            if let Err(e) = join.await {
                warn!(error = %e, "asyncQ task failed");
            }
        }
    }
}

#[async_trait]
impl RequestHandler for Handlers {
    async fn push_request(&self, req: Request) -> EventResult<Reply> {
        Stats::incr(&self.stats.total_commands);

        if req.cmd.is_blocking() {
            if let Some(topic) = req.cmd.topic().map(str::to_string) {
                let mut topics = self.topics.lock().await;
                if let Some(q) = topics.get(&topic) {
                    let handle = q.handle.clone();
                    drop(topics);
                    return handle.push(req).await;
                }
                if matches!(req.cmd, logd_protocol::Request::Batch(_)) {
                    let handle = self.start_topic(&mut topics, &topic).await?;
                    drop(topics);
                    return handle.push(req).await;
                }
                // READ/TAIL on an unknown topic: the asyncQ answers
                // CLIENT_ERR.
                drop(topics);
            }
            return self.async_q.push(req).await;
        }

        if let logd_protocol::Request::Head { topic } = &req.cmd {
            let topics = self.topics.lock().await;
            if let Some(q) = topics.get(topic) {
                let handle = q.handle.clone();
                drop(topics);
                return handle.push(req).await;
            }
        }

        self.async_q.push(req).await
    }
}
