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

//! Per-transaction write buffers: one `TableView` per entity table touched and one
//! `RelationView` per join table touched.

mod relation_view;
mod table_view;

pub use relation_view::RelationView;
pub use table_view::TableView;

use crate::Error;
use crate::arena::{Handle, ListKey};
use crate::config::FlushConfig;
use crate::schema::ConstraintId;
use crate::store::{Affected, RowStore, Statement, StatementBatch};
use crate::value::{Key, RelationValues, Value, Values};
use smallvec::SmallVec;

/// Handle to a row buffered in a `TableView`. Handles are generational: once the row is dropped
/// from the view the handle stops resolving.
pub type RowHandle = Handle;

/// Pending-write status of a buffered row. Each row sits on the list named by its disposition,
/// except `Unreferenced`, which has no list.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Disposition {
    Unreferenced,
    Clean,
    Dirty,
    Created,
    Deleted,
    DirtyRelations,
}

impl ListKey for Disposition {
    const COUNT: usize = 6;

    fn ordinal(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone)]
pub struct Row {
    key: Key,
    fields: Values,
    relations: Option<RelationValues>,
    disposition: Disposition,
    // Constraint to null, with the key it pointed at when it was nulled in memory.
    pending_fk_nulls: SmallVec<[(ConstraintId, Option<Key>); 2]>,
    version: Option<i64>,
    sync_scheduled: bool,
    // Deleted row whose key this created row took over.
    replaces: Option<RowHandle>,
}

impl Row {
    fn new(
        key: Key,
        fields: Values,
        relations: Option<RelationValues>,
        version_column: Option<usize>,
    ) -> Self {
        let version = version_column.and_then(|c| fields.get(c)).and_then(Value::as_int);
        Self {
            key,
            fields,
            relations,
            disposition: Disposition::Unreferenced,
            pending_fk_nulls: SmallVec::new(),
            version,
            sync_scheduled: false,
            replaces: None,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    pub fn field(&self, column: usize) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn relations(&self) -> Option<&RelationValues> {
        self.relations.as_ref()
    }

    pub fn relation(&self, index: usize) -> Option<&[Key]> {
        self.relations.as_ref()?.get(index)?.as_deref()
    }

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    /// The shadow version the next update will be checked against.
    pub fn version(&self) -> Option<i64> {
        self.version
    }

    /// Constraints to be nulled in the store before this row's referenced rows are deleted.
    pub fn pending_fk_nulls(&self) -> impl Iterator<Item = ConstraintId> + '_ {
        self.pending_fk_nulls.iter().map(|(constraint, _)| *constraint)
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.fields.iter().all(Value::is_loaded)
    }
}

/// Run `statements` through the store in chunks of at most `max_batch_size`, returning one
/// outcome per statement.
pub(crate) fn execute_chunked(
    store: &dyn RowStore,
    config: &FlushConfig,
    statements: Vec<Statement>,
) -> Result<Vec<Affected>, Error> {
    let chunk = config.max_batch_size.max(1);
    let mut results = Vec::with_capacity(statements.len());
    let mut batch = StatementBatch::new(config.execution_mode);
    for statement in statements {
        batch.push(statement);
        if batch.len() >= chunk {
            results.extend(batch.execute(store)?);
        }
    }
    results.extend(batch.execute(store)?);
    Ok(results)
}
