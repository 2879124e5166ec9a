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

//! A partitioned, LRU-bounded row cache mirroring a relational store, plus the per-transaction
//! buffers and flush scheduler that write buffered changes back in foreign-key-safe order.
//!
//! Reads go through a [`TableView`], which consults the [`PartitionedCache`] on a miss and defers
//! all writes. At transaction completion the [`FlushCoordinator`] issues relation deletes, entity
//! deletes (dependents first), entity inserts (referenced tables first), entity updates and then
//! relation inserts, and finally pushes the resulting row state into the cache.

use std::fmt::{Display, Formatter};

mod arena;
pub mod cache;
mod clock;
mod config;
mod flush;
mod manager;
pub mod schema;
mod store;
pub mod testing;
mod value;
pub mod view;

pub use arena::{Handle, LinkedArena, ListKey};
pub use cache::{CacheCounters, CacheListener, PartitionedCache, RowCache, RowCacheGuard};
pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use config::{CacheConfig, FlushConfig, RowCacheConfig, TableCacheConfig};
pub use flush::{FlushCoordinator, Outcome, Synchronization, View};
pub use manager::CacheManager;
pub use schema::{
    ConstraintId, ForeignKey, RelationDef, RelationId, Schema, SchemaBuilder, TableDef, TableId,
};
pub use store::{Affected, ExecutionMode, RowStore, Statement, StatementBatch, VersionCheck};
pub use value::{Key, NOT_LOADED, RelationValues, Value, Values};
pub use view::{Disposition, RelationView, Row, RowHandle, TableView};

/// Identity of a transaction. Doubles as the optimistic row-lock token.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(pub u64);

impl Display for TxId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Cache removal rejected: key absent or locked by another transaction")]
    RemoveRejected,
    #[error("Row is locked for update by another transaction")]
    LockRejected,
    #[error("Row lock is held by another transaction")]
    LockReleaseRejected,
    #[error("Row has already been removed")]
    RowAlreadyRemoved,
    #[error("Delete of {table} incomplete: {remaining} rows not deleted")]
    DeleteIncomplete { table: String, remaining: usize },
    #[error("Insert into {table} incomplete: {remaining} rows not inserted")]
    InsertIncomplete { table: String, remaining: usize },
    #[error("Update of {table} incomplete: {remaining} rows not updated")]
    UpdateIncomplete { table: String, remaining: usize },
    #[error("Optimistic version check failed updating {table}")]
    VersionConflict { table: String },
    #[error("Duplicate key")]
    DuplicateKey,
    #[error("Row reached commit in unexpected state {0:?}")]
    UnexpectedRowState(Disposition),
    #[error("Unknown table")]
    UnknownTable,
    #[error("Unknown relation")]
    UnknownRelation,
    #[error("Unknown or mismatched foreign key constraint")]
    UnknownConstraint,
    #[error("Foreign key constraint is not nullable")]
    ConstraintNotNullable,
    #[error("No such column: {0}")]
    NoSuchColumn(usize),
    #[error("Expected {expected} column values, got {actual}")]
    ColumnMismatch { expected: usize, actual: usize },
    #[error("Row handle refers to a row no longer in this view")]
    StaleHandle,
    #[error("Store failure: {0}")]
    StoreFailure(String),
    #[error("{0}")]
    Config(String),
}
