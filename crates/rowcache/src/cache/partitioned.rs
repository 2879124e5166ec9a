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

use crate::cache::{CacheListener, RowCache, RowCacheGuard};
use crate::clock::{Clock, MonotonicClock};
use crate::value::{Key, RelationValues, Values};
use crate::{Error, TxId};
use flume::{RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

struct Ager {
    stop: Sender<()>,
    join_handle: JoinHandle<()>,
}

/// One logical table's cache, sharded over independently locked `RowCache` partitions by key
/// hash.
pub struct PartitionedCache {
    partitions: Arc<[RowCache]>,
    min_capacity: usize,
    max_capacity: AtomicUsize,
    clock: Arc<dyn Clock>,
    ager: Mutex<Option<Ager>>,
}

fn share(total: usize, partitions: usize) -> usize {
    total / partitions + 1
}

impl PartitionedCache {
    pub fn new(min_capacity: usize, max_capacity: usize, partition_count: usize) -> Self {
        Self::build(
            min_capacity,
            max_capacity,
            partition_count,
            Arc::new(MonotonicClock::new()),
            None,
        )
    }

    /// A partition count of zero is treated as one.
    pub fn build(
        min_capacity: usize,
        max_capacity: usize,
        partition_count: usize,
        clock: Arc<dyn Clock>,
        listener: Option<Arc<dyn CacheListener>>,
    ) -> Self {
        let count = partition_count.max(1);
        let partitions: Arc<[RowCache]> = (0..count)
            .map(|i| {
                RowCache::new(
                    i,
                    share(min_capacity, count),
                    share(max_capacity, count),
                    clock.clone(),
                    listener.clone(),
                )
            })
            .collect();
        Self {
            partitions,
            min_capacity,
            max_capacity: AtomicUsize::new(max_capacity),
            clock,
            ager: Mutex::new(None),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn min_capacity(&self) -> usize {
        self.min_capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity.load(Ordering::Relaxed)
    }

    pub fn partition_index(&self, key: &Key) -> usize {
        (key.hash64() % self.partitions.len() as u64) as usize
    }

    /// The partition owning `key`.
    pub fn partition(&self, key: &Key) -> &RowCache {
        &self.partitions[self.partition_index(key)]
    }

    pub fn partitions(&self) -> &[RowCache] {
        &self.partitions
    }

    pub fn lock(&self, key: &Key) -> RowCacheGuard<'_> {
        self.partition(key).lock()
    }

    pub fn get_fields(&self, tx: TxId, key: &Key) -> Option<Values> {
        self.lock(key).get_fields(tx, key)
    }

    pub fn get_relations(&self, tx: TxId, key: &Key) -> Option<RelationValues> {
        self.lock(key).get_relations(tx, key)
    }

    pub fn put(&self, tx: TxId, key: Key, fields: Values, relations: Option<RelationValues>) {
        let mut guard = self.lock(&key);
        guard.put(tx, key, fields, relations);
    }

    pub fn remove(&self, tx: TxId, key: &Key) -> Result<(), Error> {
        self.lock(key).remove(tx, key)
    }

    pub fn contains(&self, tx: TxId, key: &Key) -> bool {
        self.lock(key).contains(tx, key)
    }

    pub fn lock_for_update(&self, tx: TxId, key: &Key) -> Result<(), Error> {
        self.lock(key).lock_for_update(tx, key)
    }

    pub fn release_lock(&self, tx: TxId, key: &Key) -> Result<(), Error> {
        self.lock(key).release_lock(tx, key)
    }

    /// Empty every partition. All partition locks are taken in index order before anything is
    /// cleared, so no reader observes a half-flushed cache.
    pub fn flush(&self) {
        let mut guards: Vec<_> = self.partitions.iter().map(|p| p.lock()).collect();
        for guard in &mut guards {
            guard.clear();
        }
    }

    pub fn age_out(&self, max_age: Duration) -> usize {
        age_out_all(&self.partitions, self.clock.as_ref(), max_age)
    }

    pub fn size(&self) -> usize {
        self.partitions.iter().map(|p| p.lock().len()).sum()
    }

    /// Change the global bound; each partition's share is recomputed. Existing contents are only
    /// trimmed by subsequent puts.
    pub fn set_max_capacity(&self, max_capacity: usize) {
        self.max_capacity.store(max_capacity, Ordering::Relaxed);
        let share = share(max_capacity, self.partitions.len());
        for partition in self.partitions.iter() {
            partition.set_max_capacity(share);
        }
    }

    /// Start the background ager, which every `interval` evicts unlocked rows untouched for
    /// longer than `max_age`. A running ager is replaced.
    pub fn start_ager(&self, interval: Duration, max_age: Duration) {
        self.stop_ager();

        let (stop, stopped) = flume::bounded::<()>(1);
        let partitions = self.partitions.clone();
        let clock = self.clock.clone();
        let join_handle = std::thread::Builder::new()
            .name("rowcache-ager".to_string())
            .spawn(move || {
                info!(?interval, ?max_age, "Row cache ager started");
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let evicted = age_out_all(&partitions, clock.as_ref(), max_age);
                            if evicted > 0 {
                                debug!(evicted, "Aged out cached rows");
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("Row cache ager stopped");
            })
            .expect("failed to spawn row cache ager thread");

        *self.ager.lock().unwrap() = Some(Ager { stop, join_handle });
    }

    /// Stop the ager and wait for it to exit. Safe to call when no ager is running.
    pub fn stop_ager(&self) {
        let Some(ager) = self.ager.lock().unwrap().take() else {
            return;
        };
        ager.stop.send(()).ok();
        ager.join_handle.join().ok();
    }

    pub fn ager_running(&self) -> bool {
        self.ager.lock().unwrap().is_some()
    }
}

impl Drop for PartitionedCache {
    fn drop(&mut self) {
        self.stop_ager();
    }
}

fn age_out_all(partitions: &[RowCache], clock: &dyn Clock, max_age: Duration) -> usize {
    let cutoff = clock.now().saturating_sub(max_age);
    partitions.iter().map(|p| p.lock().age_out(cutoff)).sum()
}
