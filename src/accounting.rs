//! Request accounting: per-request log entries and process-wide counters.
//!
//! The router only talks to [`RequestRecorder`]; [`MemoryStore`] is the
//! in-process implementation backing the `/api/request-logs` and
//! `/api/server-stats` views.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
};
use uuid::Uuid;

/// Outcome of one proxied request, as handed to the recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub size: u64,
    pub duration_ms: u64,
}

/// Recording side of request accounting. Must be callable concurrently from
/// any number of in-flight requests.
pub trait RequestRecorder: Send + Sync {
    fn record_request(&self, record: RequestRecord);
    fn increment_request_count(&self);
    fn increment_error_count(&self);
    fn set_active_connections(&self, count: i64);
    fn adjust_active_connections(&self, delta: i64);
    fn add_data_transferred(&self, bytes: u64);
}

/// Stored log entry, serialized for the dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLogEntry {
    pub id: Uuid,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub size: u64,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    pub total_requests: u64,
    pub active_connections: i64,
    pub data_transferred: u64,
    pub errors: u64,
    pub updated_at: DateTime<Utc>,
}

pub struct MemoryStore {
    total_requests: AtomicU64,
    active_connections: AtomicI64,
    data_transferred: AtomicU64,
    errors: AtomicU64,
    updated_at: RwLock<DateTime<Utc>>,
    logs: RwLock<VecDeque<RequestLogEntry>>,
    capacity: usize,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            total_requests: AtomicU64::new(0),
            active_connections: AtomicI64::new(0),
            data_transferred: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            updated_at: RwLock::new(Utc::now()),
            logs: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Most recent entries first, at most `limit` of them.
    pub fn logs(&self, limit: usize) -> Vec<RequestLogEntry> {
        self.logs.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn clear_logs(&self) {
        self.logs.write().clear();
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            data_transferred: self.data_transferred.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            updated_at: *self.updated_at.read(),
        }
    }

    fn touch(&self) {
        *self.updated_at.write() = Utc::now();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl RequestRecorder for MemoryStore {
    fn record_request(&self, record: RequestRecord) {
        let entry = RequestLogEntry {
            id: Uuid::new_v4(),
            method: record.method,
            url: record.url,
            status: record.status,
            size: record.size,
            duration_ms: record.duration_ms,
            timestamp: Utc::now(),
        };
        let mut logs = self.logs.write();
        if logs.len() >= self.capacity {
            logs.pop_front();
        }
        logs.push_back(entry);
    }

    fn increment_request_count(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    fn increment_error_count(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    fn set_active_connections(&self, count: i64) {
        self.active_connections.store(count, Ordering::Relaxed);
        self.touch();
    }

    fn adjust_active_connections(&self, delta: i64) {
        self.active_connections.fetch_add(delta, Ordering::Relaxed);
        self.touch();
    }

    fn add_data_transferred(&self, bytes: u64) {
        self.data_transferred.fetch_add(bytes, Ordering::Relaxed);
        self.touch();
    }
}

/// Counts one in-flight proxied request for as long as it is alive.
pub struct ActiveConnection {
    recorder: Arc<dyn RequestRecorder>,
}

impl ActiveConnection {
    pub fn open(recorder: Arc<dyn RequestRecorder>) -> Self {
        recorder.adjust_active_connections(1);
        Self { recorder }
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.recorder.adjust_active_connections(-1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn record(url: &str) -> RequestRecord {
        RequestRecord {
            method: "GET".to_string(),
            url: url.to_string(),
            status: 200,
            size: 10,
            duration_ms: 5,
        }
    }

    #[test]
    fn test_logs_newest_first_and_limited() {
        let store = MemoryStore::new(10);
        for i in 0..5 {
            store.record_request(record(&format!("https://a.com/{}", i)));
        }
        let logs = store.logs(3);
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].url, "https://a.com/4");
        assert_eq!(logs[2].url, "https://a.com/2");
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let store = MemoryStore::new(2);
        for i in 0..3 {
            store.record_request(record(&format!("https://a.com/{}", i)));
        }
        let urls: Vec<_> = store.logs(10).into_iter().map(|e| e.url).collect();
        assert_eq!(urls, vec!["https://a.com/2", "https://a.com/1"]);
    }

    #[test]
    fn test_clear_logs() {
        let store = MemoryStore::default();
        store.record_request(record("https://a.com"));
        store.clear_logs();
        assert!(store.logs(50).is_empty());
    }

    #[test]
    fn test_entry_serialization() {
        let store = MemoryStore::default();
        store.record_request(record("https://a.com"));
        let json = serde_json::to_value(&store.logs(1)[0]).unwrap();
        assert_eq!(json["duration"], 5);
        assert_eq!(json["status"], 200);
        assert!(json.get("timestamp").is_some());
        assert!(json.get("durationMs").is_none());
    }

    #[test]
    fn test_concurrent_counters() {
        let store = Arc::new(MemoryStore::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        store.increment_request_count();
                        store.add_data_transferred(2);
                        let _conn = ActiveConnection::open(store.clone());
                    }
                    store.increment_error_count();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = store.stats();
        assert_eq!(stats.total_requests, 8000);
        assert_eq!(stats.data_transferred, 16000);
        assert_eq!(stats.errors, 8);
        assert_eq!(stats.active_connections, 0);
    }

    #[test]
    fn test_active_connection_guard() {
        let store = Arc::new(MemoryStore::default());
        let first = ActiveConnection::open(store.clone());
        let second = ActiveConnection::open(store.clone());
        assert_eq!(store.stats().active_connections, 2);
        drop(first);
        assert_eq!(store.stats().active_connections, 1);
        drop(second);
        assert_eq!(store.stats().active_connections, 0);

        store.set_active_connections(3);
        assert_eq!(store.stats().active_connections, 3);
    }
}
