//! In-process store backend.
//!
//! Mirrors the Redis semantics the containers rely on: empty containers
//! vanish, writes keep an existing expiry, expired keys read as missing.
//! Expiry runs on the tokio clock so tests can pause and advance time.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use globset::{GlobBuilder, GlobMatcher};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::backend::{RemoteStore, Ttl};
use crate::errors::{Result, StoreError};

enum Slot {
    Str(String),
    List(VecDeque<String>),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

impl Slot {
    fn is_empty(&self) -> bool {
        match self {
            Self::Str(_) => false,
            Self::List(l) => l.is_empty(),
            Self::Hash(h) => h.is_empty(),
            Self::Set(s) => s.is_empty(),
        }
    }
}

struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Entries = HashMap<String, Entry>;

/// A [`RemoteStore`] held entirely in process memory.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| !e.expired(now)).count()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Entries, Instant) -> R) -> R {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        f(&mut entries, now)
    }
}

fn purge(entries: &mut Entries, key: &str, now: Instant) {
    if entries.get(key).is_some_and(|e| e.expired(now)) {
        let _ = entries.remove(key);
    }
}

fn drop_if_empty(entries: &mut Entries, key: &str) {
    if entries.get(key).is_some_and(|e| e.slot.is_empty()) {
        let _ = entries.remove(key);
    }
}

fn slot<'a>(entries: &'a mut Entries, key: &str, now: Instant) -> Option<&'a mut Slot> {
    purge(entries, key, now);
    entries.get_mut(key).map(|e| &mut e.slot)
}

fn slot_or_insert<'a>(
    entries: &'a mut Entries,
    key: &str,
    now: Instant,
    empty: impl FnOnce() -> Slot,
) -> &'a mut Slot {
    purge(entries, key, now);
    &mut entries
        .entry(key.to_owned())
        .or_insert_with(|| Entry {
            slot: empty(),
            expires_at: None,
        })
        .slot
}

fn wrong(key: &str) -> StoreError {
    StoreError::WrongType(key.to_owned())
}

fn resolve_index(index: i64, len: usize) -> i64 {
    if index < 0 { len as i64 + index } else { index }
}

/// Matcher for a `KEYS` pattern. `*` crosses `:` and `/`.
fn key_matcher(pattern: &str) -> Result<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .backslash_escape(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|source| StoreError::InvalidPattern {
            pattern: pattern.to_owned(),
            source,
        })
}

fn set_expiry(entries: &mut Entries, key: &str, now: Instant, after: Duration) -> bool {
    purge(entries, key, now);
    if after.is_zero() {
        return entries.remove(key).is_some();
    }
    match entries.get_mut(key) {
        Some(entry) => {
            entry.expires_at = Some(now + after);
            true
        }
        None => false,
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn rpush(&self, key: &str, value: &str) -> Result<u64> {
        self.with(|entries, now| {
            match slot_or_insert(entries, key, now, || Slot::List(VecDeque::new())) {
                Slot::List(list) => {
                    list.push_back(value.to_owned());
                    Ok(list.len() as u64)
                }
                _ => Err(wrong(key)),
            }
        })
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        self.with(|entries, now| {
            let popped = match slot(entries, key, now) {
                None => None,
                Some(Slot::List(list)) => list.pop_front(),
                Some(_) => return Err(wrong(key)),
            };
            drop_if_empty(entries, key);
            Ok(popped)
        })
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        self.with(|entries, now| match slot(entries, key, now) {
            None => Ok(0),
            Some(Slot::List(list)) => Ok(list.len() as u64),
            Some(_) => Err(wrong(key)),
        })
    }

    async fn lindex(&self, key: &str, index: i64) -> Result<Option<String>> {
        self.with(|entries, now| match slot(entries, key, now) {
            None => Ok(None),
            Some(Slot::List(list)) => {
                let i = resolve_index(index, list.len());
                if i < 0 {
                    return Ok(None);
                }
                Ok(list.get(i as usize).cloned())
            }
            Some(_) => Err(wrong(key)),
        })
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.with(|entries, now| match slot(entries, key, now) {
            None => Ok(Vec::new()),
            Some(Slot::List(list)) => {
                let len = list.len();
                let start = resolve_index(start, len).max(0);
                let stop = resolve_index(stop, len).min(len as i64 - 1);
                if start > stop {
                    return Ok(Vec::new());
                }
                Ok(list
                    .iter()
                    .skip(start as usize)
                    .take((stop - start + 1) as usize)
                    .cloned()
                    .collect())
            }
            Some(_) => Err(wrong(key)),
        })
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64> {
        self.with(|entries, now| {
            let removed = match slot(entries, key, now) {
                None => 0,
                Some(Slot::List(list)) => {
                    let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
                    let mut removed = 0;
                    if count >= 0 {
                        let mut i = 0;
                        while i < list.len() && removed < limit {
                            if list[i] == value {
                                let _ = list.remove(i);
                                removed += 1;
                            } else {
                                i += 1;
                            }
                        }
                    } else {
                        let mut i = list.len();
                        while i > 0 && removed < limit {
                            i -= 1;
                            if list[i] == value {
                                let _ = list.remove(i);
                                removed += 1;
                            }
                        }
                    }
                    removed as u64
                }
                Some(_) => return Err(wrong(key)),
            };
            drop_if_empty(entries, key);
            Ok(removed)
        })
    }

    async fn lpos(&self, key: &str, value: &str) -> Result<Option<u64>> {
        self.with(|entries, now| match slot(entries, key, now) {
            None => Ok(None),
            Some(Slot::List(list)) => Ok(list.iter().position(|v| v == value).map(|i| i as u64)),
            Some(_) => Err(wrong(key)),
        })
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        self.with(|entries, now| {
            match slot_or_insert(entries, key, now, || Slot::Hash(HashMap::new())) {
                Slot::Hash(hash) => Ok(hash.insert(field.to_owned(), value.to_owned()).is_none()),
                _ => Err(wrong(key)),
            }
        })
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.with(|entries, now| match slot(entries, key, now) {
            None => Ok(None),
            Some(Slot::Hash(hash)) => Ok(hash.get(field).cloned()),
            Some(_) => Err(wrong(key)),
        })
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        self.with(|entries, now| {
            let existed = match slot(entries, key, now) {
                None => false,
                Some(Slot::Hash(hash)) => hash.remove(field).is_some(),
                Some(_) => return Err(wrong(key)),
            };
            drop_if_empty(entries, key);
            Ok(existed)
        })
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        self.with(|entries, now| match slot(entries, key, now) {
            None => Ok(false),
            Some(Slot::Hash(hash)) => Ok(hash.contains_key(field)),
            Some(_) => Err(wrong(key)),
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        self.with(|entries, now| {
            match slot_or_insert(entries, key, now, || Slot::Set(BTreeSet::new())) {
                Slot::Set(set) => Ok(set.insert(member.to_owned())),
                _ => Err(wrong(key)),
            }
        })
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        self.with(|entries, now| {
            let existed = match slot(entries, key, now) {
                None => false,
                Some(Slot::Set(set)) => set.remove(member),
                Some(_) => return Err(wrong(key)),
            };
            drop_if_empty(entries, key);
            Ok(existed)
        })
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.with(|entries, now| match slot(entries, key, now) {
            None => Ok(false),
            Some(Slot::Set(set)) => Ok(set.contains(member)),
            Some(_) => Err(wrong(key)),
        })
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        self.with(|entries, now| match slot(entries, key, now) {
            None => Ok(0),
            Some(Slot::Set(set)) => Ok(set.len() as u64),
            Some(_) => Err(wrong(key)),
        })
    }

    async fn sscan(&self, key: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)> {
        self.with(|entries, now| match slot(entries, key, now) {
            None => Ok((0, Vec::new())),
            Some(Slot::Set(set)) => {
                let offset = cursor as usize;
                let count = count.max(1);
                let chunk: Vec<String> = set.iter().skip(offset).take(count).cloned().collect();
                let next = offset + chunk.len();
                let next = if next >= set.len() { 0 } else { next as u64 };
                Ok((next, chunk))
            }
            Some(_) => Err(wrong(key)),
        })
    }

    async fn expire(&self, key: &str, secs: u64) -> Result<bool> {
        Ok(self.with(|entries, now| set_expiry(entries, key, now, Duration::from_secs(secs))))
    }

    async fn pexpire(&self, key: &str, millis: u64) -> Result<bool> {
        Ok(self.with(|entries, now| set_expiry(entries, key, now, Duration::from_millis(millis))))
    }

    async fn pttl(&self, key: &str) -> Result<Ttl> {
        Ok(self.with(|entries, now| {
            purge(entries, key, now);
            match entries.get(key) {
                None => Ttl::Missing,
                Some(Entry { expires_at: None, .. }) => Ttl::Persistent,
                Some(Entry {
                    expires_at: Some(at),
                    ..
                }) => Ttl::Millis(at.saturating_duration_since(now).as_millis() as u64),
            }
        }))
    }

    async fn persist(&self, key: &str) -> Result<bool> {
        Ok(self.with(|entries, now| {
            purge(entries, key, now);
            entries
                .get_mut(key)
                .and_then(|e| e.expires_at.take())
                .is_some()
        }))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = key_matcher(pattern)?;
        Ok(self.with(|entries, now| {
            let mut keys: Vec<String> = entries
                .iter()
                .filter(|(k, e)| !e.expired(now) && matcher.is_match(k.as_str()))
                .map(|(k, _)| k.clone())
                .collect();
            keys.sort();
            keys
        }))
    }

    async fn set_ex(&self, key: &str, value: &str, secs: u64) -> Result<()> {
        self.with(|entries, now| {
            let _ = entries.insert(
                key.to_owned(),
                Entry {
                    slot: Slot::Str(value.to_owned()),
                    expires_at: Some(now + Duration::from_secs(secs)),
                },
            );
        });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with(|entries, now| match slot(entries, key, now) {
            None => Ok(None),
            Some(Slot::Str(value)) => Ok(Some(value.clone())),
            Some(_) => Err(wrong(key)),
        })
    }

    async fn del(&self, key: &str) -> Result<bool> {
        Ok(self.with(|entries, now| {
            purge(entries, key, now);
            entries.remove(key).is_some()
        }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
