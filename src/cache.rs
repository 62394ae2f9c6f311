//! In-memory key/value cache with per-entry expiration.
//!
//! The cache is an ordinary owned value; share it behind a lock if several
//! tasks need it.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// When a cached entry stops being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Expires once it has not been read for this long.
    Sliding(Duration),
    /// Expires this long after insertion, regardless of reads.
    Absolute(Duration),
}

impl Default for Expiration {
    fn default() -> Self {
        Self::Sliding(Duration::from_secs(60 * 60))
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expiration: Expiration,
    deadline: Instant,
}

impl<V> Entry<V> {
    fn new(value: V, expiration: Expiration, now: Instant) -> Self {
        let ttl = match expiration {
            Expiration::Sliding(ttl) | Expiration::Absolute(ttl) => ttl,
        };
        Self {
            value,
            expiration,
            deadline: now + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    fn touch(&mut self, now: Instant) {
        if let Expiration::Sliding(ttl) = self.expiration {
            self.deadline = now + ttl;
        }
    }
}

/// Key/value cache whose entries expire.
///
/// Expired entries are never returned and are dropped when next accessed.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    default_expiration: Expiration,
}

impl<K: Hash + Eq, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq, V> TtlCache<K, V> {
    /// Creates a cache whose default expiration is a one-hour sliding window.
    pub fn new() -> Self {
        Self::with_default_expiration(Expiration::default())
    }

    pub fn with_default_expiration(expiration: Expiration) -> Self {
        Self {
            entries: HashMap::new(),
            default_expiration: expiration,
        }
    }

    /// Returns the live value for `key`, refreshing a sliding expiration.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        self.drop_if_expired(key, now);
        let entry = self.entries.get_mut(key)?;
        entry.touch(now);
        Some(&entry.value)
    }

    /// Stores `value`, replacing any previous entry. Returns the replaced live value.
    pub fn insert(&mut self, key: K, value: V, expiration: Expiration) -> Option<V> {
        let now = Instant::now();
        self.entries
            .insert(key, Entry::new(value, expiration, now))
            .filter(|previous| !previous.is_expired(now))
            .map(|previous| previous.value)
    }

    /// Returns the live value for `key`, storing `value` with the default
    /// expiration first if there is none.
    pub fn get_or_insert(&mut self, key: K, value: V) -> &V {
        self.get_or_insert_with(key, || value)
    }

    /// Like [`get_or_insert`](Self::get_or_insert), building the value only when needed.
    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &V {
        let now = Instant::now();
        self.drop_if_expired(&key, now);
        let expiration = self.default_expiration;
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| Entry::new(make(), expiration, now));
        entry.touch(now);
        &entry.value
    }

    /// Removes `key`, returning its value if it was still live.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        self.entries
            .remove(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value)
    }

    /// Drops every expired entry.
    pub fn purge_expired(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn drop_if_expired<Q>(&mut self, key: &Q, now: Instant)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            self.entries.remove(key);
        }
    }
}
