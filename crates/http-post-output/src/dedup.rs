//! Bounded TTL-aware LRU deduplication cache.
//!
//! Maps deduplication keys to the timestamp they were last seen. The store is
//! capacity-limited with least-recently-used eviction: an insertion beyond
//! capacity evicts exactly one entry, the least recently touched. Freshness
//! (the TTL check) governs duplicate suppression only; recency governs
//! eviction order, and the two are deliberately independent — a stale hit is
//! still promoted, refreshed, and shipped.
//!
//! Implemented as an arena of nodes addressed by index (a doubly-linked
//! recency list plus a hash index), so no unsafe pointer juggling and no
//! external LRU dependency.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// Sentinel index for list ends and unlinked nodes.
const NIL: usize = usize::MAX;

/// Outcome of a duplicate-suppression check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// An entry exists and is younger than the TTL; suppress the record.
    Duplicate,
    /// No entry, or the entry is older than the TTL; ship and refresh.
    Fresh,
}

#[derive(Debug)]
struct Node {
    key: String,
    seen: SystemTime,
    prev: usize,
    next: usize,
}

/// Fixed-capacity key → last-seen-timestamp store with LRU eviction.
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    ttl: Duration,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    /// Most recently used.
    head: usize,
    /// Least recently used; eviction candidate.
    tail: usize,
}

impl DedupCache {
    /// Creates a cache with the given capacity and freshness window.
    ///
    /// Both are fixed for the lifetime of the cache.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        DedupCache {
            capacity,
            ttl,
            nodes: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            head: NIL,
            tail: NIL,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the stored timestamp for `key`, promoting the entry to most
    /// recently used.
    ///
    /// Promotion happens on every hit, fresh or stale: lookups express
    /// interest in the key, and eviction order tracks interest.
    pub fn lookup(&mut self, key: &str) -> Option<SystemTime> {
        let idx = *self.index.get(key)?;
        self.unlink(idx);
        self.push_front(idx);
        Some(self.nodes[idx].seen)
    }

    /// Decides whether a record with this key is a duplicate at time `now`.
    ///
    /// `Duplicate` iff an entry exists and `now - entry.seen < TTL`. A stored
    /// timestamp in the future counts as a duplicate (age is clamped to zero).
    pub fn decide(&mut self, key: &str, now: SystemTime) -> Freshness {
        match self.lookup(key) {
            Some(seen) => match now.duration_since(seen) {
                Ok(age) if age < self.ttl => Freshness::Duplicate,
                Ok(_) => Freshness::Fresh,
                // `seen` is ahead of `now`; definitely within the window.
                Err(_) => Freshness::Duplicate,
            },
            None => Freshness::Fresh,
        }
    }

    /// Inserts or refreshes the entry for `key` with timestamp `seen`.
    ///
    /// Returns whether an eviction occurred. Refreshing an existing key never
    /// evicts; inserting a new key at capacity evicts exactly the least
    /// recently used entry.
    pub fn insert(&mut self, key: &str, seen: SystemTime) -> bool {
        if let Some(&idx) = self.index.get(key) {
            self.nodes[idx].seen = seen;
            self.unlink(idx);
            self.push_front(idx);
            return false;
        }

        if self.capacity == 0 {
            return false;
        }

        if self.index.len() >= self.capacity {
            // Reuse the evicted tail node for the new key.
            let idx = self.tail;
            self.unlink(idx);
            let old_key = std::mem::replace(&mut self.nodes[idx].key, key.to_string());
            self.index.remove(&old_key);
            self.nodes[idx].seen = seen;
            self.index.insert(key.to_string(), idx);
            self.push_front(idx);
            return true;
        }

        let idx = self.nodes.len();
        self.nodes.push(Node {
            key: key.to_string(),
            seen,
            prev: NIL,
            next: NIL,
        });
        self.index.insert(key.to_string(), idx);
        self.push_front(idx);
        false
    }

    /// Removes `idx` from the recency list, leaving it unlinked.
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        if prev == NIL {
            if self.head == idx {
                self.head = next;
            }
        } else {
            self.nodes[prev].next = next;
        }
        if next == NIL {
            if self.tail == idx {
                self.tail = prev;
            }
        } else {
            self.nodes[next].prev = prev;
        }
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = NIL;
    }

    /// Links `idx` in as the most recently used node.
    fn push_front(&mut self, idx: usize) {
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    /// Keys in recency order, most recent first. Test support.
    #[cfg(test)]
    fn keys_by_recency(&self) -> Vec<&str> {
        let mut keys = Vec::with_capacity(self.index.len());
        let mut idx = self.head;
        while idx != NIL {
            keys.push(self.nodes[idx].key.as_str());
            idx = self.nodes[idx].next;
        }
        keys
    }
}
