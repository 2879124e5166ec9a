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

//! The per-transaction buffer for one entity table.
//!
//! Rows live in a `LinkedArena` and are threaded onto one list per `Disposition`, so moving a row
//! between states is an unlink and a push. `by_key` indexes every row the transaction can still
//! see, plus deleted rows whose delete has already been flushed (kept so a later lookup does not
//! resurrect them from the shared cache). Rows created and deleted within the transaction are
//! dropped outright.
//!
//! Nothing here writes to the shared cache until `committed`: flush phases only record, in
//! `pending_cache_sync`, which rows need their final state pushed.

use crate::arena::LinkedArena;
use crate::cache::PartitionedCache;
use crate::config::FlushConfig;
use crate::schema::{ConstraintId, ForeignKey, Schema, TableDef, TableId};
use crate::store::{RowStore, Statement, VersionCheck};
use crate::value::{Key, RelationValues, Value, Values};
use crate::view::{Disposition, Row, RowHandle, execute_chunked};
use crate::{Error, TxId};
use ahash::RandomState;
use indexmap::IndexSet;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

pub struct TableView {
    tx: TxId,
    schema: Arc<Schema>,
    def: TableDef,
    cache: Arc<PartitionedCache>,
    config: FlushConfig,
    rows: LinkedArena<Row, Disposition>,
    by_key: HashMap<Key, RowHandle, RandomState>,
    pending_cache_sync: Vec<RowHandle>,
    pending_fk_null: IndexSet<RowHandle>,
}

impl TableView {
    pub fn new(
        tx: TxId,
        schema: Arc<Schema>,
        table: TableId,
        cache: Arc<PartitionedCache>,
        config: FlushConfig,
    ) -> Result<Self, Error> {
        let def = schema.table(table)?.clone();
        Ok(Self {
            tx,
            schema,
            def,
            cache,
            config,
            rows: LinkedArena::default(),
            by_key: HashMap::default(),
            pending_cache_sync: vec![],
            pending_fk_null: IndexSet::new(),
        })
    }

    pub fn tx(&self) -> TxId {
        self.tx
    }

    pub fn table(&self) -> TableId {
        self.def.id
    }

    pub fn def(&self) -> &TableDef {
        &self.def
    }

    pub fn row(&self, handle: RowHandle) -> Option<&Row> {
        self.rows.get(handle)
    }

    /// Handles of every row currently in `disposition`, in list order.
    pub fn handles(&self, disposition: Disposition) -> Vec<RowHandle> {
        self.rows.handles(disposition)
    }

    pub fn count(&self, disposition: Disposition) -> usize {
        self.rows.list_len(disposition)
    }

    /// Disposition of the row the view holds for `key`, without consulting the cache.
    pub fn disposition(&self, key: &Key) -> Option<Disposition> {
        let handle = self.by_key.get(key)?;
        self.rows.get(*handle).map(Row::disposition)
    }

    /// The disposition list `handle` is linked onto, if any.
    pub fn linked_list(&self, handle: RowHandle) -> Option<Disposition> {
        self.rows.list_of(handle)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_pending_writes(&self) -> bool {
        [
            Disposition::Dirty,
            Disposition::Created,
            Disposition::Deleted,
            Disposition::DirtyRelations,
        ]
        .into_iter()
        .any(|d| self.rows.list_len(d) > 0)
            || !self.pending_fk_null.is_empty()
    }

    /// Find the buffered row for `key`, or materialize a clean one from the shared cache. `None`
    /// means the caller has to go to the store.
    pub fn get_row_by_key(&mut self, key: &Key) -> Option<RowHandle> {
        if let Some(&handle) = self.by_key.get(key) {
            return Some(handle);
        }
        let (fields, relations) = {
            let mut guard = self.cache.lock(key);
            let fields = guard.get_fields(self.tx, key)?;
            (fields, guard.get_relations(self.tx, key))
        };
        trace!(table = %self.def, %key, "materialized row from cache");
        Some(self.materialize(key.clone(), fields, relations, Disposition::Clean))
    }

    /// Like `get_row_by_key`, falling back to the store on a cache miss. Rows read from the store
    /// are also put into the cache. Rows this transaction has deleted are not returned.
    pub fn load(&mut self, store: &dyn RowStore, key: &Key) -> Result<Option<RowHandle>, Error> {
        if let Some(handle) = self.get_row_by_key(key) {
            let deleted = self
                .rows
                .get(handle)
                .is_some_and(|r| r.disposition == Disposition::Deleted);
            return Ok((!deleted).then_some(handle));
        }
        let Some(fields) = store.select_by_key(&self.def, key)? else {
            return Ok(None);
        };
        self.check_width(&fields)?;
        self.cache.put(self.tx, key.clone(), fields.clone(), None);
        Ok(Some(self.materialize(
            key.clone(),
            fields,
            None,
            Disposition::Clean,
        )))
    }

    /// Buffer a new row for insertion. A key whose delete is pending or already flushed in this
    /// transaction may be reused.
    pub fn insert(&mut self, key: Key, fields: Values) -> Result<RowHandle, Error> {
        self.check_width(&fields)?;
        let replaces = match self.by_key.get(&key).copied() {
            Some(h) => match self.rows.get(h) {
                Some(existing) if existing.disposition != Disposition::Deleted => {
                    return Err(Error::DuplicateKey);
                }
                Some(_) => Some(h),
                None => None,
            },
            None => None,
        };
        let relations =
            (self.def.relation_fields > 0).then(|| vec![None; self.def.relation_fields]);
        let handle = self.materialize(key, fields, relations, Disposition::Created);
        if let Some(row) = self.rows.get_mut(handle) {
            row.replaces = replaces;
        }
        Ok(handle)
    }

    pub fn get(&self, handle: RowHandle, column: usize) -> Result<&Value, Error> {
        let row = self.rows.get(handle).ok_or(Error::StaleHandle)?;
        row.fields.get(column).ok_or(Error::NoSuchColumn(column))
    }

    pub fn set_field(
        &mut self,
        handle: RowHandle,
        column: usize,
        value: Value,
    ) -> Result<(), Error> {
        let row = self.rows.get_mut(handle).ok_or(Error::StaleHandle)?;
        let slot = row
            .fields
            .get_mut(column)
            .ok_or(Error::NoSuchColumn(column))?;
        let next = match row.disposition {
            Disposition::Deleted => return Err(Error::RowAlreadyRemoved),
            Disposition::Unreferenced => {
                return Err(Error::UnexpectedRowState(Disposition::Unreferenced));
            }
            Disposition::Clean | Disposition::DirtyRelations => Some(Disposition::Dirty),
            Disposition::Dirty | Disposition::Created => None,
        };
        *slot = value;
        if let Some(next) = next {
            self.relink(handle, next);
        }
        Ok(())
    }

    /// Replace one cached relationship collection. Only the relation snapshot changes, so a
    /// clean row becomes `DirtyRelations` rather than `Dirty`.
    pub fn set_relation(
        &mut self,
        handle: RowHandle,
        index: usize,
        keys: Vec<Key>,
    ) -> Result<(), Error> {
        let relation_fields = self.def.relation_fields;
        if index >= relation_fields {
            return Err(Error::NoSuchColumn(index));
        }
        let row = self.rows.get_mut(handle).ok_or(Error::StaleHandle)?;
        let next = match row.disposition {
            Disposition::Deleted => return Err(Error::RowAlreadyRemoved),
            Disposition::Unreferenced => {
                return Err(Error::UnexpectedRowState(Disposition::Unreferenced));
            }
            Disposition::Clean => Some(Disposition::DirtyRelations),
            _ => None,
        };
        let relations = row
            .relations
            .get_or_insert_with(|| vec![None; relation_fields]);
        if relations.len() < relation_fields {
            relations.resize(relation_fields, None);
        }
        relations[index] = Some(keys);
        if let Some(next) = next {
            self.relink(handle, next);
        }
        Ok(())
    }

    /// Null the columns of `constraint` on the row. For a row already in the store this also
    /// schedules a store-side nulling that runs before any referenced row is deleted; a created
    /// row simply gets inserted with the nulls.
    pub fn null_foreign_key(
        &mut self,
        handle: RowHandle,
        constraint: ConstraintId,
    ) -> Result<(), Error> {
        let fk = self.constraint(constraint)?.clone();
        if !fk.nullable {
            return Err(Error::ConstraintNotNullable);
        }
        let row = self.rows.get_mut(handle).ok_or(Error::StaleHandle)?;
        let target = fk.target(&row.fields);
        for &column in &fk.columns {
            if let Some(slot) = row.fields.get_mut(column) {
                *slot = Value::Null;
            }
        }
        if row.disposition == Disposition::Created {
            return Ok(());
        }
        if !row.pending_fk_nulls.iter().any(|(c, _)| *c == constraint) {
            row.pending_fk_nulls.push((constraint, target));
        }
        self.pending_fk_null.insert(handle);
        Ok(())
    }

    /// Live rows whose `constraint` columns currently point at `key`.
    pub fn rows_referencing(&self, constraint: &ForeignKey, key: &Key) -> Vec<RowHandle> {
        if constraint.referencing != self.def.id {
            return vec![];
        }
        self.by_key
            .values()
            .copied()
            .filter(|h| {
                self.rows.get(*h).is_some_and(|row| {
                    row.disposition != Disposition::Deleted
                        && constraint.columns.len() == key.values().len()
                        && constraint
                            .columns
                            .iter()
                            .zip(key.values())
                            .all(|(&c, v)| row.fields.get(c) == Some(v))
                })
            })
            .collect()
    }

    pub fn delete(&mut self, handle: RowHandle) -> Result<(), Error> {
        let row = self.rows.get(handle).ok_or(Error::StaleHandle)?;
        match row.disposition {
            Disposition::Deleted => Err(Error::RowAlreadyRemoved),
            Disposition::Unreferenced => Err(Error::UnexpectedRowState(Disposition::Unreferenced)),
            Disposition::Created => {
                // Never persisted; nothing to delete in the store. If it took over the key of a
                // deleted row, the key goes back to that row.
                let key = row.key.clone();
                let replaces = row.replaces;
                if self.by_key.get(&key) == Some(&handle) {
                    match replaces.filter(|h| self.rows.contains(*h)) {
                        Some(previous) => self.by_key.insert(key, previous),
                        None => self.by_key.remove(&key),
                    };
                }
                self.pending_fk_null.shift_remove(&handle);
                self.rows.remove(handle);
                Ok(())
            }
            Disposition::Clean | Disposition::Dirty | Disposition::DirtyRelations => {
                self.relink(handle, Disposition::Deleted);
                Ok(())
            }
        }
    }

    /// Fill in columns that were deferred for lazy loading. Returns false if nothing was missing.
    pub fn ensure_loaded(
        &mut self,
        store: &dyn RowStore,
        handle: RowHandle,
    ) -> Result<bool, Error> {
        let row = self.rows.get(handle).ok_or(Error::StaleHandle)?;
        if row.is_fully_loaded() {
            return Ok(false);
        }
        let key = row.key.clone();
        let Some(stored) = store.select_by_key(&self.def, &key)? else {
            return Err(Error::StoreFailure(format!(
                "{} row {key} no longer exists",
                self.def
            )));
        };
        self.check_width(&stored)?;
        let row = self.rows.get_mut(handle).ok_or(Error::StaleHandle)?;
        for (slot, value) in row.fields.iter_mut().zip(stored) {
            if !slot.is_loaded() {
                *slot = value;
            }
        }
        if row.version.is_none() {
            row.version = self
                .def
                .version_column
                .and_then(|c| row.fields.get(c))
                .and_then(Value::as_int);
        }
        Ok(true)
    }

    /// Issue the store-side FK nulling recorded by `null_foreign_key`. A self-referencing
    /// constraint on a row that is itself being deleted is skipped, unless the row it pointed at
    /// is deleted in the same flush.
    pub fn flush_foreign_key_nulls(&mut self, store: &dyn RowStore) -> Result<usize, Error> {
        if self.pending_fk_null.is_empty() {
            return Ok(0);
        }
        let pending = std::mem::take(&mut self.pending_fk_null);
        let deleted: HashSet<Key> = self
            .rows
            .iter(Disposition::Deleted)
            .map(|(_, row)| row.key.clone())
            .collect();
        let mut statements = vec![];
        let mut synced = vec![];
        for handle in pending {
            let Some(row) = self.rows.get_mut(handle) else {
                continue;
            };
            for (constraint, target) in row.pending_fk_nulls.drain(..) {
                let fk = self.schema.foreign_key(constraint)?;
                if fk.is_self_referencing()
                    && row.disposition == Disposition::Deleted
                    && target.is_none_or(|t| t == row.key || !deleted.contains(&t))
                {
                    continue;
                }
                statements.push(Statement::NullForeignKey {
                    table: self.def.id,
                    constraint,
                    key: row.key.clone(),
                });
            }
            if row.disposition == Disposition::Clean {
                synced.push(handle);
            }
        }
        let issued = statements.len();
        let results = execute_chunked(store, &self.config, statements)?;
        let missing = results.iter().filter(|r| !r.is_single()).count();
        if missing > 0 {
            debug!(table = %self.def, missing, "FK nulling touched no row for some keys");
        }
        for handle in synced {
            self.schedule_sync(handle);
        }
        debug!(table = %self.def, issued, "Flushed foreign key nulls");
        Ok(issued)
    }

    /// Delete every `Deleted` row from the store. Rows whose delete succeeded leave their list
    /// but stay indexed by key until the view is discarded.
    pub fn flush_deleted(&mut self, store: &dyn RowStore) -> Result<usize, Error> {
        let handles = self.delete_order()?;
        if handles.is_empty() {
            return Ok(0);
        }
        let statements = handles
            .iter()
            .filter_map(|h| self.rows.get(*h))
            .map(|row| Statement::Delete {
                table: self.def.id,
                key: row.key.clone(),
            })
            .collect();
        let results = execute_chunked(store, &self.config, statements)?;
        let mut deleted = 0;
        for (handle, result) in handles.into_iter().zip(results) {
            if result.is_single() {
                self.rows.unlink(handle);
                self.pending_fk_null.shift_remove(&handle);
                self.schedule_sync(handle);
                deleted += 1;
            }
        }
        let remaining = self.rows.list_len(Disposition::Deleted);
        if remaining > 0 {
            return Err(Error::DeleteIncomplete {
                table: self.def.name.clone(),
                remaining,
            });
        }
        debug!(table = %self.def, deleted, "Flushed deletes");
        Ok(deleted)
    }

    /// Insert every `Created` row, unless inserts for this table are deferred.
    pub fn flush_created(&mut self, store: &dyn RowStore) -> Result<usize, Error> {
        if self.def.defer_create {
            return Ok(0);
        }
        let handles = self.rows.handles(Disposition::Created);
        if handles.is_empty() {
            return Ok(0);
        }
        let statements = handles
            .iter()
            .filter_map(|h| self.rows.get(*h))
            .map(|row| Statement::Insert {
                table: self.def.id,
                key: row.key.clone(),
                fields: row.fields.clone(),
            })
            .collect();
        let results = execute_chunked(store, &self.config, statements)?;
        let mut inserted = 0;
        for (handle, result) in handles.into_iter().zip(results) {
            if result.is_single() {
                self.mark_clean(handle);
                inserted += 1;
            }
        }
        let remaining = self.rows.list_len(Disposition::Created);
        if remaining > 0 {
            return Err(Error::InsertIncomplete {
                table: self.def.name.clone(),
                remaining,
            });
        }
        debug!(table = %self.def, inserted, "Flushed inserts");
        Ok(inserted)
    }

    /// Settle `DirtyRelations` rows (no statement needed) and update every `Dirty` row, checking
    /// and advancing the version column when the table has one.
    pub fn flush_updated(&mut self, store: &dyn RowStore) -> Result<usize, Error> {
        for handle in self.rows.handles(Disposition::DirtyRelations) {
            self.mark_clean(handle);
        }

        let handles = self.rows.handles(Disposition::Dirty);
        if handles.is_empty() {
            return Ok(0);
        }
        let version_column = self.def.version_column;
        let mut statements = Vec::with_capacity(handles.len());
        for handle in &handles {
            let Some(row) = self.rows.get(*handle) else {
                continue;
            };
            let columns = row
                .fields
                .iter()
                .enumerate()
                .filter(|(i, v)| v.is_loaded() && Some(*i) != version_column)
                .map(|(i, v)| (i, v.clone()))
                .collect();
            let version = match (version_column, row.version) {
                (Some(column), Some(current)) => {
                    // An exhausted version cannot be advanced.
                    let next = current.checked_add(1).ok_or_else(|| Error::VersionConflict {
                        table: self.def.name.clone(),
                    })?;
                    Some(VersionCheck {
                        column,
                        expected: Value::Int(current),
                        next: Value::Int(next),
                    })
                }
                _ => None,
            };
            statements.push(Statement::Update {
                table: self.def.id,
                key: row.key.clone(),
                columns,
                version,
            });
        }
        let results = execute_chunked(store, &self.config, statements)?;
        let mut updated = 0;
        for (handle, result) in handles.into_iter().zip(results) {
            if !result.is_single() {
                continue;
            }
            if let Some(row) = self.rows.get_mut(handle)
                && let (Some(column), Some(current)) = (version_column, row.version)
                && let Some(next) = current.checked_add(1)
            {
                row.version = Some(next);
                row.fields[column] = Value::Int(next);
            }
            self.mark_clean(handle);
            updated += 1;
        }
        let remaining = self.rows.list_len(Disposition::Dirty);
        if remaining > 0 {
            let versioned = self
                .rows
                .iter(Disposition::Dirty)
                .any(|(_, row)| version_column.is_some() && row.version.is_some());
            if versioned {
                return Err(Error::VersionConflict {
                    table: self.def.name.clone(),
                });
            }
            return Err(Error::UpdateIncomplete {
                table: self.def.name.clone(),
                remaining,
            });
        }
        debug!(table = %self.def, updated, "Flushed updates");
        Ok(updated)
    }

    pub fn before_completion(&mut self) {}

    /// Push the final state of every flushed row into the shared cache, then discard the view.
    pub fn committed(&mut self) -> Result<(), Error> {
        let pending = std::mem::take(&mut self.pending_cache_sync);
        let mut result = Ok(());
        for handle in pending {
            let Some(row) = self.rows.get(handle) else {
                continue;
            };
            match row.disposition {
                Disposition::Clean => self.cache.put(
                    self.tx,
                    row.key.clone(),
                    row.fields.clone(),
                    row.relations.clone(),
                ),
                Disposition::Deleted => {
                    if let Err(e) = self.cache.remove(self.tx, &row.key) {
                        warn!(table = %self.def, key = %row.key, "Commit-time cache removal: {e}");
                    }
                }
                other => {
                    error!(
                        table = %self.def,
                        key = %row.key,
                        disposition = ?other,
                        "Row reached commit in unexpected state"
                    );
                    result = Err(Error::UnexpectedRowState(other));
                    break;
                }
            }
        }
        self.clear();
        result
    }

    pub fn rolled_back(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.rows.clear();
        self.by_key.clear();
        self.pending_cache_sync.clear();
        self.pending_fk_null.clear();
    }

    fn constraint(&self, constraint: ConstraintId) -> Result<&ForeignKey, Error> {
        let fk = self.schema.foreign_key(constraint)?;
        if fk.referencing != self.def.id {
            return Err(Error::UnknownConstraint);
        }
        Ok(fk)
    }

    /// `Deleted` rows in the order their deletes must run: a row pointing at another deleted row
    /// of this table through a self-referencing constraint goes first. Rows in a reference cycle
    /// keep list order.
    fn delete_order(&self) -> Result<Vec<RowHandle>, Error> {
        let handles = self.rows.handles(Disposition::Deleted);
        let mut self_references = vec![];
        for &constraint in self.schema.foreign_keys_from(self.def.id) {
            let fk = self.schema.foreign_key(constraint)?;
            if fk.is_self_referencing() {
                self_references.push(fk);
            }
        }
        if self_references.is_empty() || handles.len() < 2 {
            return Ok(handles);
        }
        let position: HashMap<&Key, usize> = handles
            .iter()
            .enumerate()
            .filter_map(|(i, h)| self.rows.get(*h).map(|row| (&row.key, i)))
            .collect();
        // referrers[i]: deleted rows still pointing at row i.
        let mut referrers = vec![vec![]; handles.len()];
        for (i, handle) in handles.iter().enumerate() {
            let Some(row) = self.rows.get(*handle) else {
                continue;
            };
            for fk in &self_references {
                if let Some(target) = fk.target(&row.fields)
                    && let Some(&j) = position.get(&target)
                    && j != i
                {
                    referrers[j].push(i);
                }
            }
        }
        let mut visited = vec![false; handles.len()];
        let mut ordered = Vec::with_capacity(handles.len());
        for start in 0..handles.len() {
            if visited[start] {
                continue;
            }
            visited[start] = true;
            let mut stack = vec![(start, 0)];
            while let Some((node, next)) = stack.pop() {
                if let Some(&referrer) = referrers[node].get(next) {
                    stack.push((node, next + 1));
                    if !visited[referrer] {
                        visited[referrer] = true;
                        stack.push((referrer, 0));
                    }
                } else {
                    ordered.push(handles[node]);
                }
            }
        }
        Ok(ordered)
    }

    fn check_width(&self, fields: &Values) -> Result<(), Error> {
        if fields.len() != self.def.column_count() {
            return Err(Error::ColumnMismatch {
                expected: self.def.column_count(),
                actual: fields.len(),
            });
        }
        Ok(())
    }

    fn materialize(
        &mut self,
        key: Key,
        fields: Values,
        relations: Option<RelationValues>,
        disposition: Disposition,
    ) -> RowHandle {
        let row = Row::new(key.clone(), fields, relations, self.def.version_column);
        let handle = self.rows.insert(row);
        self.relink(handle, disposition);
        self.by_key.insert(key, handle);
        handle
    }

    fn relink(&mut self, handle: RowHandle, disposition: Disposition) {
        if let Some(row) = self.rows.get_mut(handle) {
            row.disposition = disposition;
        }
        self.rows.push_back(handle, disposition);
    }

    fn mark_clean(&mut self, handle: RowHandle) {
        if let Some(row) = self.rows.get_mut(handle) {
            row.pending_fk_nulls.clear();
        }
        self.pending_fk_null.shift_remove(&handle);
        self.relink(handle, Disposition::Clean);
        self.schedule_sync(handle);
    }

    fn schedule_sync(&mut self, handle: RowHandle) {
        if let Some(row) = self.rows.get_mut(handle)
            && !row.sync_scheduled
        {
            row.sync_scheduled = true;
            self.pending_cache_sync.push(handle);
        }
    }
}
