// Copyright (C) 2026 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! A single cache partition: rows keyed by primary key, kept in LRU order, with per-row
//! optimistic locks scoped to one transaction.
//!
//! All access goes through a `RowCacheGuard`, which holds the partition mutex for its lifetime.
//! Every touch (hit or put) moves the entry to the MRU end *and* stamps it with the current time,
//! so LRU order and `touched` order are the same order. `age_out` relies on that to stop at the
//! first entry that is young enough.

use crate::arena::{Handle, LinkedArena, ListKey};
use crate::cache::CacheListener;
use crate::clock::{Clock, Timestamp};
use crate::value::{Key, RelationValues, Values};
use crate::{Error, TxId};
use ahash::RandomState;
use minstant::Instant;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Lru;

impl ListKey for Lru {
    const COUNT: usize = 1;

    fn ordinal(self) -> usize {
        0
    }
}

struct CachedRow {
    key: Key,
    fields: Values,
    relations: Option<RelationValues>,
    locked_by: Option<TxId>,
    touched: Timestamp,
}

impl CachedRow {
    fn visible_to(&self, tx: TxId) -> bool {
        self.locked_by.is_none_or(|holder| holder == tx)
    }
}

struct Inner {
    index: HashMap<Key, Handle, RandomState>,
    // Front is most recently used.
    entries: LinkedArena<CachedRow, Lru>,
}

pub struct RowCache {
    partition: usize,
    min_capacity: usize,
    max_capacity: AtomicUsize,
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    listener: Option<Arc<dyn CacheListener>>,
}

impl RowCache {
    pub fn new(
        partition: usize,
        min_capacity: usize,
        max_capacity: usize,
        clock: Arc<dyn Clock>,
        listener: Option<Arc<dyn CacheListener>>,
    ) -> Self {
        Self {
            partition,
            min_capacity,
            max_capacity: AtomicUsize::new(max_capacity),
            inner: Mutex::new(Inner {
                index: HashMap::with_capacity_and_hasher(min_capacity, RandomState::new()),
                entries: LinkedArena::with_capacity(min_capacity),
            }),
            clock,
            listener,
        }
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn min_capacity(&self) -> usize {
        self.min_capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity.load(Ordering::Relaxed)
    }

    /// Takes effect on the next `put`; current contents are not shrunk.
    pub fn set_max_capacity(&self, max_capacity: usize) {
        self.max_capacity.store(max_capacity, Ordering::Relaxed);
    }

    /// Acquire exclusive access to this partition. If the partition is already held, the time
    /// spent waiting is reported to the listener. Not re-entrant.
    pub fn lock(&self) -> RowCacheGuard<'_> {
        let inner = match self.inner.try_lock() {
            Ok(inner) => inner,
            Err(_) => {
                let started = Instant::now();
                let inner = self.inner.lock().unwrap();
                if let Some(listener) = &self.listener {
                    listener.on_contention(self.partition, started.elapsed());
                }
                inner
            }
        };
        RowCacheGuard { cache: self, inner }
    }
}

/// Exclusive access to one partition. Dropping the guard unlocks it.
pub struct RowCacheGuard<'a> {
    cache: &'a RowCache,
    inner: MutexGuard<'a, Inner>,
}

impl RowCacheGuard<'_> {
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// A copy of the cached fields, unless the row is absent or locked by a transaction other
    /// than `tx`. A hit promotes the row to most-recently-used.
    pub fn get_fields(&mut self, tx: TxId, key: &Key) -> Option<Values> {
        let now = self.cache.clock.now();
        let inner = &mut *self.inner;
        let hit = inner.index.get(key).copied().and_then(|h| {
            let row = inner.entries.get_mut(h)?;
            if !row.visible_to(tx) {
                return None;
            }
            row.touched = now;
            Some((h, row.fields.clone()))
        });
        match hit {
            Some((h, fields)) => {
                inner.entries.push_front(h, Lru);
                if let Some(listener) = &self.cache.listener {
                    listener.on_hit(self.cache.partition);
                }
                Some(fields)
            }
            None => {
                if let Some(listener) = &self.cache.listener {
                    listener.on_miss(self.cache.partition);
                }
                None
            }
        }
    }

    /// A copy of the cached relation snapshot. Meaningful only after `get_fields` succeeded for
    /// the same key under the same guard.
    pub fn get_relations(&self, tx: TxId, key: &Key) -> Option<RelationValues> {
        let h = *self.inner.index.get(key)?;
        let row = self.inner.entries.get(h)?;
        if !row.visible_to(tx) {
            return None;
        }
        row.relations.clone()
    }

    /// Insert or overwrite. Overwriting clears the row lock. If another transaction holds the
    /// row's lock the write is dropped; that holder's own commit decides the row's state.
    pub fn put(
        &mut self,
        tx: TxId,
        key: Key,
        fields: Values,
        relations: Option<RelationValues>,
    ) {
        let now = self.cache.clock.now();
        let inner = &mut *self.inner;
        if let Some(&h) = inner.index.get(&key) {
            let Some(row) = inner.entries.get_mut(h) else {
                return;
            };
            if !row.visible_to(tx) {
                trace!(
                    partition = self.cache.partition,
                    %key,
                    "put from {tx} ignored; row is locked by another transaction"
                );
                return;
            }
            row.fields = fields;
            row.relations = relations;
            row.locked_by = None;
            row.touched = now;
            inner.entries.push_front(h, Lru);
        } else {
            let h = inner.entries.insert(CachedRow {
                key: key.clone(),
                fields,
                relations,
                locked_by: None,
                touched: now,
            });
            inner.entries.push_front(h, Lru);
            inner.index.insert(key, h);
        }
        self.evict_overflow();
    }

    pub fn remove(&mut self, tx: TxId, key: &Key) -> Result<(), Error> {
        let inner = &mut *self.inner;
        let Some(&h) = inner.index.get(key) else {
            return Err(Error::RemoveRejected);
        };
        match inner.entries.get(h) {
            Some(row) if row.visible_to(tx) => {}
            _ => return Err(Error::RemoveRejected),
        }
        inner.entries.remove(h);
        inner.index.remove(key);
        Ok(())
    }

    pub fn contains(&self, tx: TxId, key: &Key) -> bool {
        self.inner
            .index
            .get(key)
            .and_then(|h| self.inner.entries.get(*h))
            .is_some_and(|row| row.visible_to(tx))
    }

    /// Claim the row's lock for `tx`. Absent rows are not an error: the caller may be locking
    /// speculatively ahead of the row being cached.
    pub fn lock_for_update(&mut self, tx: TxId, key: &Key) -> Result<(), Error> {
        let inner = &mut *self.inner;
        let Some(row) = inner
            .index
            .get(key)
            .copied()
            .and_then(|h| inner.entries.get_mut(h))
        else {
            return Ok(());
        };
        match row.locked_by {
            Some(holder) if holder != tx => Err(Error::LockRejected),
            _ => {
                row.locked_by = Some(tx);
                Ok(())
            }
        }
    }

    pub fn release_lock(&mut self, tx: TxId, key: &Key) -> Result<(), Error> {
        let inner = &mut *self.inner;
        let Some(row) = inner
            .index
            .get(key)
            .copied()
            .and_then(|h| inner.entries.get_mut(h))
        else {
            return Ok(());
        };
        match row.locked_by {
            Some(holder) if holder != tx => Err(Error::LockReleaseRejected),
            _ => {
                row.locked_by = None;
                Ok(())
            }
        }
    }

    pub fn lock_holder(&self, key: &Key) -> Option<TxId> {
        let h = self.inner.index.get(key)?;
        self.inner.entries.get(*h)?.locked_by
    }

    pub fn touched_at(&self, key: &Key) -> Option<Timestamp> {
        let h = self.inner.index.get(key)?;
        Some(self.inner.entries.get(*h)?.touched)
    }

    /// Cached keys, most recently used first.
    pub fn keys(&self) -> Vec<Key> {
        self.inner
            .entries
            .iter(Lru)
            .map(|(_, row)| row.key.clone())
            .collect()
    }

    /// Evict every unlocked row last touched before `older_than`, scanning from the LRU end.
    /// Locked rows are stepped over, never evicted. The scan stops at the first row that is young
    /// enough, since everything in front of it is younger still.
    pub fn age_out(&mut self, older_than: Timestamp) -> usize {
        let mut evicted = 0;
        let mut cursor = self.inner.entries.last(Lru);
        while let Some(h) = cursor {
            cursor = self.inner.entries.prev(h);
            let Some(row) = self.inner.entries.get(h) else {
                break;
            };
            if row.touched >= older_than {
                break;
            }
            if row.locked_by.is_some() {
                continue;
            }
            self.evict(h);
            evicted += 1;
        }
        evicted
    }

    pub fn clear(&mut self) {
        self.inner.entries.clear();
        self.inner.index.clear();
    }

    // Best effort: a locked tail is skipped for this pass and the bound may be exceeded.
    fn evict_overflow(&mut self) {
        let max = self.cache.max_capacity();
        let mut cursor = self.inner.entries.last(Lru);
        while self.inner.entries.len() > max {
            let Some(h) = cursor else {
                break;
            };
            cursor = self.inner.entries.prev(h);
            if self
                .inner
                .entries
                .get(h)
                .is_some_and(|row| row.locked_by.is_some())
            {
                continue;
            }
            self.evict(h);
        }
    }

    fn evict(&mut self, h: Handle) {
        let Some(row) = self.inner.entries.remove(h) else {
            return;
        };
        self.inner.index.remove(&row.key);
        let size = self.inner.entries.len();
        trace!(
            partition = self.cache.partition,
            key = %row.key,
            size,
            "evicted cached row"
        );
        if let Some(listener) = &self.cache.listener {
            listener.on_eviction(self.cache.partition, &row.key, size);
        }
    }
}
