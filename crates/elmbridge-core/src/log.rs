//! Bounded in-memory log shown to the user
//!
//! Bridges report progress ("Client connected", hex dumps of relayed data)
//! through a [`LogSink`]. The standard sink, [`BridgeLog`], filters by a live
//! threshold, stores accepted entries in a [`LogRepository`] and mirrors them
//! to `tracing`.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Default number of entries kept before the oldest is evicted
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Entries per page returned by [`LogRepository::page`]
pub const PAGE_SIZE: usize = 200;

/// Severity of a log entry
///
/// Ordered by rank: `Error < Info < Debug`. A threshold of `Debug` shows
/// everything, `Error` only errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 0,
    #[default]
    Info = 1,
    Debug = 2,
}

impl LogLevel {
    pub fn rank(self) -> u8 {
        self as u8
    }

    fn from_rank(rank: u8) -> Self {
        match rank {
            0 => Self::Error,
            1 => Self::Info,
            _ => Self::Debug,
        }
    }

    /// Whether an entry at `level` passes this threshold
    pub fn allows(self, level: LogLevel) -> bool {
        self.rank() >= level.rank()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Error => "error",
            Self::Info => "info",
            Self::Debug => "debug",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// A single stored log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Strictly increasing, never reused (not even after `clear`)
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub level: LogLevel,
}

/// One page of a log snapshot
#[derive(Debug, Clone, Default)]
pub struct LogPage {
    pub entries: Vec<LogEntry>,
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

struct LogBuffer {
    entries: std::collections::VecDeque<LogEntry>,
    capacity: usize,
    next_id: u64,
}

impl LogBuffer {
    fn evict_to(&mut self, len: usize) {
        while self.entries.len() > len {
            self.entries.pop_front();
        }
    }
}

/// FIFO-bounded, thread-safe log store
pub struct LogRepository {
    inner: Mutex<LogBuffer>,
}

impl Default for LogRepository {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LogRepository {
    /// Create a repository holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LogBuffer {
                entries: std::collections::VecDeque::with_capacity(capacity.min(4096)),
                capacity: capacity.max(1),
                next_id: 0,
            }),
        }
    }

    /// Append an entry, evicting the oldest one if the buffer is full.
    /// Returns the id assigned to the new entry.
    pub fn append(&self, text: impl Into<String>, level: LogLevel) -> u64 {
        let mut buf = self.inner.lock();
        let capacity = buf.capacity;
        buf.evict_to(capacity - 1);

        let id = buf.next_id;
        buf.next_id += 1;
        buf.entries.push_back(LogEntry {
            id,
            timestamp: Utc::now(),
            text: text.into(),
            level,
        });
        id
    }

    /// Copy of the current contents, waiting for the lock if needed
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    /// Copy of the current contents, or an empty list if a writer holds the
    /// lock right now. Never blocks.
    pub fn try_snapshot(&self) -> Vec<LogEntry> {
        match self.inner.try_lock() {
            Some(buf) => buf.entries.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Change the capacity; shrinking drops the oldest entries immediately
    pub fn set_capacity(&self, capacity: usize) {
        let mut buf = self.inner.lock();
        buf.capacity = capacity.max(1);
        let capacity = buf.capacity;
        buf.evict_to(capacity);
    }

    /// Page `index` of a non-blocking snapshot
    pub fn page(&self, index: usize) -> LogPage {
        let snapshot = self.try_snapshot();
        let from = index.saturating_mul(PAGE_SIZE);
        if from >= snapshot.len() {
            return LogPage::default();
        }
        let to = (from + PAGE_SIZE).min(snapshot.len());

        LogPage {
            entries: snapshot[from..to].to_vec(),
            prev: index.checked_sub(1),
            next: (to < snapshot.len()).then_some(index + 1),
        }
    }

    /// Write every entry's text, one per line, to `path`
    pub fn export(&self, path: &Path) -> std::io::Result<()> {
        let text = self
            .snapshot()
            .iter()
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(path, text)
    }
}

/// Destination for bridge log lines
pub trait LogSink: Send + Sync {
    fn append_log(&self, text: &str, level: LogLevel);

    fn error(&self, text: &str) {
        self.append_log(text, LogLevel::Error);
    }

    fn info(&self, text: &str) {
        self.append_log(text, LogLevel::Info);
    }

    fn debug(&self, text: &str) {
        self.append_log(text, LogLevel::Debug);
    }
}

/// Threshold-filtered sink that stores into a [`LogRepository`] and mirrors
/// accepted lines to `tracing`
pub struct BridgeLog {
    repo: Arc<LogRepository>,
    threshold: AtomicU8,
}

impl BridgeLog {
    pub fn new(repo: Arc<LogRepository>, threshold: LogLevel) -> Self {
        Self {
            repo,
            threshold: AtomicU8::new(threshold.rank()),
        }
    }

    pub fn repository(&self) -> &Arc<LogRepository> {
        &self.repo
    }

    pub fn threshold(&self) -> LogLevel {
        LogLevel::from_rank(self.threshold.load(Ordering::Relaxed))
    }

    /// Takes effect for the next appended line
    pub fn set_threshold(&self, level: LogLevel) {
        self.threshold.store(level.rank(), Ordering::Relaxed);
    }
}

impl LogSink for BridgeLog {
    fn append_log(&self, text: &str, level: LogLevel) {
        if !self.threshold().allows(level) {
            return;
        }

        match level {
            LogLevel::Error => tracing::error!("{}", text),
            LogLevel::Info => tracing::info!("{}", text),
            LogLevel::Debug => tracing::debug!("{}", text),
        }

        self.repo.append(text, level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_order() {
        assert!(LogLevel::Error < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert_eq!(LogLevel::from_rank(LogLevel::Debug.rank()), LogLevel::Debug);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_eviction_removes_lowest_id() {
        let repo = LogRepository::new(3);
        for i in 0..4 {
            repo.append(format!("line {}", i), LogLevel::Info);
        }

        let ids: Vec<u64> = repo.snapshot().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let repo = LogRepository::new(10);
        for i in 0..250 {
            repo.append(i.to_string(), LogLevel::Debug);
            assert!(repo.len() <= 10);
        }
        let snapshot = repo.snapshot();
        assert!(snapshot.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(snapshot.last().unwrap().id, 249);
    }

    #[test]
    fn test_ids_keep_increasing_after_clear() {
        let repo = LogRepository::new(5);
        repo.append("a", LogLevel::Info);
        repo.append("b", LogLevel::Info);
        repo.clear();
        assert!(repo.is_empty());

        let id = repo.append("c", LogLevel::Info);
        assert_eq!(id, 2);
    }

    #[test]
    fn test_try_snapshot_empty_while_locked() {
        let repo = LogRepository::new(5);
        repo.append("a", LogLevel::Info);

        let guard = repo.inner.lock();
        assert!(repo.try_snapshot().is_empty());
        drop(guard);

        assert_eq!(repo.try_snapshot().len(), 1);
    }

    #[test]
    fn test_shrinking_capacity_evicts_oldest() {
        let repo = LogRepository::new(10);
        for i in 0..8 {
            repo.append(i.to_string(), LogLevel::Info);
        }
        repo.set_capacity(3);

        let texts: Vec<String> = repo.snapshot().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["5", "6", "7"]);
        assert_eq!(repo.capacity(), 3);
    }

    #[test]
    fn test_paging() {
        let repo = LogRepository::new(1000);
        for i in 0..450 {
            repo.append(i.to_string(), LogLevel::Info);
        }

        let first = repo.page(0);
        assert_eq!(first.entries.len(), PAGE_SIZE);
        assert_eq!(first.prev, None);
        assert_eq!(first.next, Some(1));

        let last = repo.page(2);
        assert_eq!(last.entries.len(), 50);
        assert_eq!(last.prev, Some(1));
        assert_eq!(last.next, None);

        assert!(repo.page(3).entries.is_empty());
    }

    #[test]
    fn test_export_joins_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elm327emu_log.txt");

        let repo = LogRepository::new(10);
        repo.append("first", LogLevel::Info);
        repo.append("second", LogLevel::Error);
        repo.export(&path).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond");
    }

    #[test]
    fn test_threshold_filters_entries() {
        let repo = Arc::new(LogRepository::new(100));
        let log = BridgeLog::new(repo.clone(), LogLevel::Info);

        log.error("e");
        log.info("i");
        log.debug("d");
        let levels: Vec<LogLevel> = repo.snapshot().iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![LogLevel::Error, LogLevel::Info]);

        log.set_threshold(LogLevel::Error);
        log.info("hidden");
        assert_eq!(repo.len(), 2);

        // raising the threshold reveals strictly more
        log.set_threshold(LogLevel::Debug);
        log.debug("shown");
        assert_eq!(repo.len(), 3);
    }
}
