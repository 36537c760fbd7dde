//! Broker statistics counters.
//!
//! Counters are plain atomics shared across connection tasks and event
//! queues. The `STATS` command snapshots them into a line-oriented body.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters reported by the `STATS` command.
#[derive(Debug, Default)]
pub struct Stats {
    /// Connections accepted over the server's lifetime.
    pub total_connections: AtomicU64,
    /// Currently open connections.
    pub connections: AtomicU64,
    /// Requests pushed through the handlers.
    pub total_commands: AtomicU64,
    /// Requests that failed with a server error.
    pub command_errors: AtomicU64,
    /// Connection-level I/O failures.
    pub connection_errors: AtomicU64,
    /// Batches durably appended.
    pub total_writes: AtomicU64,
    /// Read and tail requests served.
    pub total_reads: AtomicU64,
    /// Currently registered subscriptions.
    pub subscriptions: AtomicU64,
    /// Subscriptions registered over the server's lifetime.
    pub total_subscriptions: AtomicU64,
    /// Bytes written to client sockets.
    pub total_bytes_written: AtomicU64,
}

impl Stats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments a counter.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements a counter, saturating at zero.
    pub fn decr(counter: &AtomicU64) {
        let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(1))
        });
    }

    /// Adds to a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Renders a snapshot as `<name>: <value>` lines for the `STATS` body.
    #[must_use]
    pub fn render(&self) -> String {
        let pairs: [(&str, &AtomicU64); 10] = [
            ("total_connections", &self.total_connections),
            ("connections", &self.connections),
            ("total_commands", &self.total_commands),
            ("command_errors", &self.command_errors),
            ("connection_errors", &self.connection_errors),
            ("total_writes", &self.total_writes),
            ("total_reads", &self.total_reads),
            ("subscriptions", &self.subscriptions),
            ("total_subscriptions", &self.total_subscriptions),
            ("total_bytes_written", &self.total_bytes_written),
        ];

        let mut out = String::with_capacity(pairs.len() * 24);
        for (name, counter) in pairs {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(&counter.load(Ordering::Relaxed).to_string());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incr_decr() {
        let stats = Stats::new();
        Stats::incr(&stats.connections);
        Stats::incr(&stats.connections);
        Stats::decr(&stats.connections);
        assert_eq!(stats.connections.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_decr_saturates() {
        let stats = Stats::new();
        Stats::decr(&stats.connections);
        assert_eq!(stats.connections.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_render_contains_counters() {
        let stats = Stats::new();
        Stats::add(&stats.total_writes, 42);
        let body = stats.render();
        assert!(body.contains("total_writes: 42\n"));
        assert!(body.contains("connections: 0\n"));
    }
}
