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

use crate::cache::{CacheListener, PartitionedCache};
use crate::clock::{Clock, MonotonicClock};
use crate::config::RowCacheConfig;
use crate::flush::FlushCoordinator;
use crate::schema::{Schema, TableId};
use crate::store::RowStore;
use crate::{Error, TxId};
use std::sync::Arc;
use tracing::info;

/// Owns the shared per-table caches and hands out a `FlushCoordinator` per transaction.
pub struct CacheManager {
    schema: Arc<Schema>,
    store: Arc<dyn RowStore>,
    config: RowCacheConfig,
    caches: Vec<Arc<PartitionedCache>>,
}

impl CacheManager {
    pub fn new(schema: Arc<Schema>, store: Arc<dyn RowStore>, config: RowCacheConfig) -> Self {
        Self::with_hooks(schema, store, config, Arc::new(MonotonicClock::new()), None)
    }

    pub fn with_hooks(
        schema: Arc<Schema>,
        store: Arc<dyn RowStore>,
        config: RowCacheConfig,
        clock: Arc<dyn Clock>,
        listener: Option<Arc<dyn CacheListener>>,
    ) -> Self {
        let caches = schema
            .tables()
            .iter()
            .map(|table| {
                let c = config.cache_for(&table.name);
                Arc::new(PartitionedCache::build(
                    c.min_capacity,
                    c.max_capacity,
                    c.partitions,
                    clock.clone(),
                    listener.clone(),
                ))
            })
            .collect();
        Self {
            schema,
            store,
            config,
            caches,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    pub fn config(&self) -> &RowCacheConfig {
        &self.config
    }

    pub fn cache(&self, table: TableId) -> Result<&Arc<PartitionedCache>, Error> {
        self.caches.get(table.0).ok_or(Error::UnknownTable)
    }

    pub fn begin(&self, tx: TxId) -> FlushCoordinator {
        FlushCoordinator::new(
            tx,
            self.schema.clone(),
            self.caches.clone(),
            self.store.clone(),
            self.config.flush.clone(),
        )
    }

    /// Start an ager for every table whose effective config names both an interval and a
    /// maximum age.
    pub fn start_agers(&self) {
        let mut started = 0;
        for (table, cache) in self.schema.tables().iter().zip(&self.caches) {
            let c = self.config.cache_for(&table.name);
            if let (Some(interval), Some(max_age)) = (c.ager_interval, c.max_age) {
                cache.start_ager(interval, max_age);
                started += 1;
            }
        }
        info!(started, "Started row cache agers");
    }

    pub fn stop_agers(&self) {
        for cache in &self.caches {
            cache.stop_ager();
        }
    }

    /// Drop every cached row of every table.
    pub fn flush_caches(&self) {
        for cache in &self.caches {
            cache.flush();
        }
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.stop_agers();
    }
}
