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

mod partitioned;
mod row_cache;

pub use partitioned::PartitionedCache;
pub use row_cache::{RowCache, RowCacheGuard};

use crate::value::Key;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Diagnostic hooks. None of them affect cache behaviour.
pub trait CacheListener: Send + Sync {
    fn on_contention(&self, _partition: usize, _wait: Duration) {}
    fn on_eviction(&self, _partition: usize, _key: &Key, _resulting_size: usize) {}
    fn on_hit(&self, _partition: usize) {}
    fn on_miss(&self, _partition: usize) {}
}

/// Listener that just counts.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    contentions: AtomicU64,
    contention_wait_nanos: AtomicU64,
}

impl CacheCounters {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn contentions(&self) -> u64 {
        self.contentions.load(Ordering::Relaxed)
    }

    pub fn contention_wait(&self) -> Duration {
        Duration::from_nanos(self.contention_wait_nanos.load(Ordering::Relaxed))
    }

    /// Fraction of lookups that hit, or `None` before the first lookup.
    pub fn hit_ratio(&self) -> Option<f64> {
        let hits = self.hits();
        let total = hits + self.misses();
        (total > 0).then(|| hits as f64 / total as f64)
    }
}

impl CacheListener for CacheCounters {
    fn on_contention(&self, _partition: usize, wait: Duration) {
        self.contentions.fetch_add(1, Ordering::Relaxed);
        self.contention_wait_nanos
            .fetch_add(wait.as_nanos() as u64, Ordering::Relaxed);
    }

    fn on_eviction(&self, _partition: usize, _key: &Key, _resulting_size: usize) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    fn on_hit(&self, _partition: usize) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn on_miss(&self, _partition: usize) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}
