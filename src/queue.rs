//! Priority URL queue with deduplication and robots pre-filtering.
//!
//! Ordering is by priority only; ties break by insertion order. Deduplication
//! works on a 64-bit fingerprint of the normalized URL, so trailing-slash and
//! case variants of one logical URL collapse to a single entry.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Map;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::robots::RobotsCache;
use crate::urlkey;

/// Queue polling interval for `get` with a timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// URL priority; lower values dequeue first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[repr(u8)]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
}

/// An entry waiting to be crawled.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub priority: Priority,
    pub url: String,
    pub depth: u32,
    pub parent_url: Option<String>,
    pub metadata: Map<String, serde_json::Value>,
}

impl QueueItem {
    pub fn new(url: impl Into<String>, priority: Priority) -> Self {
        Self {
            priority,
            url: url.into(),
            depth: 0,
            parent_url: None,
            metadata: Map::new(),
        }
    }
}

/// Heap wrapper ordering by (priority, insertion sequence), min first.
struct HeapEntry {
    seq: u64,
    item: QueueItem,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.item.priority == other.item.priority && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the lowest (priority, seq)
        // surfaces first.
        (other.item.priority, other.seq).cmp(&(self.item.priority, self.seq))
    }
}

/// Why an `add` was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Duplicate,
    OverCapacity,
    RobotsFiltered,
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<HeapEntry>,
    seen: HashSet<u64>,
    next_seq: u64,
    added: u64,
    processed: u64,
    duplicates: u64,
    filtered: u64,
    over_capacity: u64,
}

/// Queue statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub current_size: usize,
    pub max_size: usize,
    pub total_added: u64,
    pub total_processed: u64,
    pub duplicates_skipped: u64,
    pub filtered_robots: u64,
    pub rejected_over_capacity: u64,
    pub seen_count: usize,
}

/// Concurrency-safe priority queue of URLs.
pub struct UrlQueue {
    inner: Mutex<QueueInner>,
    robots: Option<Arc<RobotsCache>>,
    max_size: usize,
}

impl UrlQueue {
    /// `robots` enables pre-filtering at enqueue time.
    pub fn new(max_size: usize, robots: Option<Arc<RobotsCache>>) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            robots,
            max_size,
        }
    }

    /// Enqueue a URL. Returns the rejection reason if it was not accepted.
    pub async fn add(&self, item: QueueItem) -> Result<(), Rejection> {
        let fingerprint = urlkey::fingerprint(&item.url);

        // Cheap duplicate rejection before the robots verdict, which may hit
        // the network and must not run under the queue lock.
        {
            let mut inner = self.inner.lock().await;
            if inner.seen.contains(&fingerprint) {
                inner.duplicates += 1;
                return Err(Rejection::Duplicate);
            }
        }

        let robots_allowed = match &self.robots {
            Some(robots) => robots.allowed(&item.url).await,
            None => true,
        };

        let mut inner = self.inner.lock().await;
        // A concurrent add may have won the race while robots was resolving.
        if inner.seen.contains(&fingerprint) {
            inner.duplicates += 1;
            return Err(Rejection::Duplicate);
        }
        if inner.heap.len() >= self.max_size {
            inner.over_capacity += 1;
            return Err(Rejection::OverCapacity);
        }
        if !robots_allowed {
            inner.filtered += 1;
            tracing::debug!("URL filtered by robots.txt {{ url: {} }}", item.url);
            return Err(Rejection::RobotsFiltered);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(HeapEntry { seq, item });
        inner.seen.insert(fingerprint);
        inner.added += 1;
        Ok(())
    }

    /// Enqueue many URLs with one priority; returns how many were accepted.
    pub async fn add_many<I, S>(&self, urls: I, priority: Priority) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut accepted = 0;
        for url in urls {
            if self.add(QueueItem::new(url, priority)).await.is_ok() {
                accepted += 1;
            }
        }
        accepted
    }

    /// Dequeue the most urgent item, waiting up to `timeout` for one to
    /// appear.
    pub async fn get(&self, timeout: Duration) -> Option<QueueItem> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(entry) = inner.heap.pop() {
                    inner.processed += 1;
                    return Some(entry.item);
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }

    /// The most urgent item without removing it.
    pub async fn peek(&self) -> Option<QueueItem> {
        self.inner.lock().await.heap.peek().map(|e| e.item.clone())
    }

    /// Drop every queued item; returns how many were dropped.
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let count = inner.heap.len();
        inner.heap.clear();
        count
    }

    /// Forget every seen fingerprint, allowing re-enqueueing.
    pub async fn reset_seen(&self) {
        self.inner.lock().await.seen.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.heap.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        QueueStats {
            current_size: inner.heap.len(),
            max_size: self.max_size,
            total_added: inner.added,
            total_processed: inner.processed,
            duplicates_skipped: inner.duplicates,
            filtered_robots: inner.filtered,
            rejected_over_capacity: inner.over_capacity,
            seen_count: inner.seen.len(),
        }
    }
}
