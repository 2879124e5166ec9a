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

use crate::Error;
use crate::store::ExecutionMode;
use figment::Figment;
use figment::providers::{Format, Json, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_AGER_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(600);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub min_capacity: usize,
    /// Upper bound on cached rows per table, split evenly across partitions.
    pub max_capacity: usize,
    pub partitions: usize,
    /// How often the background ager runs. No ager is started if unset.
    pub ager_interval: Option<Duration>,
    /// Rows untouched for longer than this are aged out.
    pub max_age: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_capacity: 1_000,
            max_capacity: 10_000,
            partitions: 16,
            ager_interval: Some(DEFAULT_AGER_INTERVAL),
            max_age: Some(DEFAULT_MAX_AGE),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    pub execution_mode: ExecutionMode,
    /// Statements handed to the store per batch.
    pub max_batch_size: usize,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Batched,
            max_batch_size: 256,
        }
    }
}

/// Per-table overrides of the cache defaults.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCacheConfig {
    pub min_capacity: Option<usize>,
    pub max_capacity: Option<usize>,
    pub partitions: Option<usize>,
    pub max_age: Option<Duration>,
}

#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowCacheConfig {
    pub cache: CacheConfig,
    pub flush: FlushConfig,
    /// Keyed by table name.
    pub tables: HashMap<String, TableCacheConfig>,
}

impl RowCacheConfig {
    /// Load from a YAML or JSON file (chosen by extension), layered over the defaults.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let figment = Figment::new().merge(Serialized::defaults(Self::default()));
        let figment = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => figment.merge(Json::file(path)),
            _ => figment.merge(Yaml::file(path)),
        };
        figment.extract().map_err(|e| {
            Error::Config(format!(
                "Failed to parse configuration from {path:?}: {e}"
            ))
        })
    }

    /// Effective cache settings for `table`.
    pub fn cache_for(&self, table: &str) -> CacheConfig {
        let mut config = self.cache.clone();
        if let Some(overrides) = self.tables.get(table) {
            if let Some(min_capacity) = overrides.min_capacity {
                config.min_capacity = min_capacity;
            }
            if let Some(max_capacity) = overrides.max_capacity {
                config.max_capacity = max_capacity;
            }
            if let Some(partitions) = overrides.partitions {
                config.partitions = partitions;
            }
            if let Some(max_age) = overrides.max_age {
                config.max_age = Some(max_age);
            }
        }
        config
    }
}
