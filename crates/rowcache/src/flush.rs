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

//! Per-transaction flush scheduling.
//!
//! A `FlushCoordinator` owns the views a transaction has touched and writes them back in an
//! order no foreign key can object to:
//!
//! 1. link deletes, for every relation view;
//! 2. entity deletes, where a table's dependents (tables holding foreign keys into it) go first,
//!    each preceded by that table's pending FK nulling;
//! 3. entity inserts, where the tables a table references go first;
//! 4. entity updates;
//! 5. link inserts.
//!
//! Recursion over the reference graph is tracked per phase with an explicit visited map, so a
//! cycle or a diamond is walked once per table.

use crate::cache::PartitionedCache;
use crate::config::FlushConfig;
use crate::schema::{RelationId, Schema, TableId};
use crate::store::RowStore;
use crate::value::Key;
use crate::view::{Disposition, RelationView, RowHandle, TableView};
use crate::{Error, TxId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    Committed,
    RolledBack,
}

/// Transaction-boundary callbacks, driven by whatever manages the transaction.
pub trait Synchronization {
    /// Flush all buffered writes. An error here must be followed by a rolled-back completion.
    fn before_completion(&mut self) -> Result<(), Error>;

    fn after_completion(&mut self, outcome: Outcome) -> Result<(), Error>;
}

pub enum View {
    Entity(TableView),
    Relation(RelationView),
}

impl View {
    pub fn flush_deleted(&mut self, store: &dyn RowStore) -> Result<usize, Error> {
        match self {
            View::Entity(view) => view.flush_deleted(store),
            View::Relation(view) => view.flush_deleted(store),
        }
    }

    pub fn flush_created(&mut self, store: &dyn RowStore) -> Result<usize, Error> {
        match self {
            View::Entity(view) => view.flush_created(store),
            View::Relation(view) => view.flush_created(store),
        }
    }

    pub fn flush_updated(&mut self, store: &dyn RowStore) -> Result<usize, Error> {
        match self {
            View::Entity(view) => view.flush_updated(store),
            View::Relation(_) => Ok(0),
        }
    }

    pub fn before_completion(&mut self) {
        match self {
            View::Entity(view) => view.before_completion(),
            View::Relation(view) => view.before_completion(),
        }
    }

    pub fn committed(&mut self) -> Result<(), Error> {
        match self {
            View::Entity(view) => view.committed(),
            View::Relation(view) => {
                view.committed();
                Ok(())
            }
        }
    }

    pub fn rolled_back(&mut self) {
        match self {
            View::Entity(view) => view.rolled_back(),
            View::Relation(view) => view.rolled_back(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum PhaseState {
    InProgress,
    Done,
}

pub struct FlushCoordinator {
    tx: TxId,
    schema: Arc<Schema>,
    caches: Vec<Arc<PartitionedCache>>,
    store: Arc<dyn RowStore>,
    config: FlushConfig,
    views: Vec<View>,
    tables: HashMap<TableId, usize>,
    relations: HashMap<RelationId, usize>,
}

impl FlushCoordinator {
    /// `caches` is indexed by `TableId`.
    pub fn new(
        tx: TxId,
        schema: Arc<Schema>,
        caches: Vec<Arc<PartitionedCache>>,
        store: Arc<dyn RowStore>,
        config: FlushConfig,
    ) -> Self {
        Self {
            tx,
            schema,
            caches,
            store,
            config,
            views: vec![],
            tables: HashMap::new(),
            relations: HashMap::new(),
        }
    }

    pub fn tx(&self) -> TxId {
        self.tx
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    fn cache(&self, table: TableId) -> Result<&Arc<PartitionedCache>, Error> {
        self.caches.get(table.0).ok_or(Error::UnknownTable)
    }

    /// The transaction's view of `table`, created on first use.
    pub fn table_view(&mut self, table: TableId) -> Result<&mut TableView, Error> {
        let index = match self.tables.get(&table) {
            Some(&index) => index,
            None => {
                let view = TableView::new(
                    self.tx,
                    self.schema.clone(),
                    table,
                    self.cache(table)?.clone(),
                    self.config.clone(),
                )?;
                self.views.push(View::Entity(view));
                self.tables.insert(table, self.views.len() - 1);
                self.views.len() - 1
            }
        };
        match &mut self.views[index] {
            View::Entity(view) => Ok(view),
            View::Relation(_) => Err(Error::UnknownTable),
        }
    }

    /// The transaction's view of `relation`, created on first use.
    pub fn relation_view(&mut self, relation: RelationId) -> Result<&mut RelationView, Error> {
        let index = match self.relations.get(&relation) {
            Some(&index) => index,
            None => {
                let def = self.schema.relation(relation)?.clone();
                self.views
                    .push(View::Relation(RelationView::new(self.tx, def, self.config.clone())));
                self.relations.insert(relation, self.views.len() - 1);
                self.views.len() - 1
            }
        };
        match &mut self.views[index] {
            View::Relation(view) => Ok(view),
            View::Entity(_) => Err(Error::UnknownRelation),
        }
    }

    fn entity(&mut self, table: TableId) -> Option<&mut TableView> {
        let index = *self.tables.get(&table)?;
        match &mut self.views[index] {
            View::Entity(view) => Some(view),
            View::Relation(_) => None,
        }
    }

    /// Load `key` through the table's view: buffered row, then cache, then store.
    pub fn load(&mut self, table: TableId, key: &Key) -> Result<Option<RowHandle>, Error> {
        let store = self.store.clone();
        self.table_view(table)?.load(store.as_ref(), key)
    }

    /// Delete a row and null every nullable foreign key that rows already buffered in this
    /// transaction hold on it. The nulling reaches the store ahead of the delete. Returns false if
    /// the row does not exist, and `RowAlreadyRemoved` if this transaction already deleted it.
    pub fn delete(&mut self, table: TableId, key: &Key) -> Result<bool, Error> {
        if self.table_view(table)?.disposition(key) == Some(Disposition::Deleted) {
            return Err(Error::RowAlreadyRemoved);
        }
        let Some(handle) = self.load(table, key)? else {
            return Ok(false);
        };
        self.table_view(table)?.delete(handle)?;

        let schema = self.schema.clone();
        for &constraint in schema.foreign_keys_into(table) {
            let fk = schema.foreign_key(constraint)?;
            if !fk.nullable {
                continue;
            }
            let Some(view) = self.entity(fk.referencing) else {
                continue;
            };
            for referencing in view.rows_referencing(fk, key) {
                view.null_foreign_key(referencing, constraint)?;
            }
        }
        Ok(true)
    }

    pub fn lock_for_update(&self, table: TableId, key: &Key) -> Result<(), Error> {
        self.cache(table)?.lock_for_update(self.tx, key)
    }

    pub fn release_lock(&self, table: TableId, key: &Key) -> Result<(), Error> {
        self.cache(table)?.release_lock(self.tx, key)
    }

    /// Write every buffered change to the store.
    pub fn flush(&mut self) -> Result<(), Error> {
        let store = self.store.clone();
        let store = store.as_ref();

        for view in self.views.iter_mut() {
            if let View::Relation(view) = view {
                view.flush_deleted(store)?;
            }
        }

        let entity_tables = self.entity_tables();
        let mut visited = HashMap::new();
        for &table in &entity_tables {
            self.flush_deletes(store, table, &mut visited)?;
        }

        let mut visited = HashMap::new();
        for &table in &entity_tables {
            self.flush_creates(store, table, &mut visited)?;
        }

        for view in self.views.iter_mut() {
            view.flush_updated(store)?;
        }

        for view in self.views.iter_mut() {
            if let View::Relation(view) = view {
                view.flush_created(store)?;
            }
        }
        debug!(tx = %self.tx, views = self.views.len(), "Flushed transaction");
        Ok(())
    }

    fn entity_tables(&self) -> Vec<TableId> {
        let mut tables: Vec<_> = self.tables.iter().map(|(t, i)| (*i, *t)).collect();
        tables.sort();
        tables.into_iter().map(|(_, t)| t).collect()
    }

    fn flush_deletes(
        &mut self,
        store: &dyn RowStore,
        table: TableId,
        visited: &mut HashMap<TableId, PhaseState>,
    ) -> Result<(), Error> {
        if visited.contains_key(&table) || !self.tables.contains_key(&table) {
            return Ok(());
        }
        visited.insert(table, PhaseState::InProgress);
        if let Some(view) = self.entity(table) {
            view.flush_foreign_key_nulls(store)?;
        }
        let schema = self.schema.clone();
        for &dependent in schema.referenced_by(table) {
            self.flush_deletes(store, dependent, visited)?;
        }
        if let Some(view) = self.entity(table) {
            view.flush_deleted(store)?;
        }
        visited.insert(table, PhaseState::Done);
        Ok(())
    }

    fn flush_creates(
        &mut self,
        store: &dyn RowStore,
        table: TableId,
        visited: &mut HashMap<TableId, PhaseState>,
    ) -> Result<(), Error> {
        if visited.contains_key(&table) || !self.tables.contains_key(&table) {
            return Ok(());
        }
        visited.insert(table, PhaseState::InProgress);
        let schema = self.schema.clone();
        for &referenced in schema.references(table) {
            self.flush_creates(store, referenced, visited)?;
        }
        if let Some(view) = self.entity(table) {
            view.flush_created(store)?;
        }
        visited.insert(table, PhaseState::Done);
        Ok(())
    }

    /// Flush, then rolled-back completion if the flush failed.
    pub fn commit(mut self) -> Result<(), Error> {
        if let Err(e) = self.before_completion() {
            error!(tx = %self.tx, "Flush failed, rolling back: {e}");
            self.after_completion(Outcome::RolledBack)?;
            return Err(e);
        }
        self.after_completion(Outcome::Committed)
    }

    pub fn rollback(mut self) -> Result<(), Error> {
        self.after_completion(Outcome::RolledBack)
    }
}

impl Synchronization for FlushCoordinator {
    fn before_completion(&mut self) -> Result<(), Error> {
        self.flush()?;
        for view in self.views.iter_mut() {
            view.before_completion();
        }
        Ok(())
    }

    /// Every view is completed even if one fails; the first failure is returned. The view set is
    /// discarded either way.
    fn after_completion(&mut self, outcome: Outcome) -> Result<(), Error> {
        let mut result = Ok(());
        for view in self.views.iter_mut() {
            match outcome {
                Outcome::Committed => {
                    if let Err(e) = view.committed()
                        && result.is_ok()
                    {
                        result = Err(e);
                    }
                }
                Outcome::RolledBack => view.rolled_back(),
            }
        }
        self.views.clear();
        self.tables.clear();
        self.relations.clear();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaBuilder, TableDef};
    use crate::store::Statement;
    use crate::testing::MemoryStore;
    use crate::value::Value;

    #[test]
    fn test_cyclic_references_flush_once() {
        let mut builder = SchemaBuilder::new();
        let a = builder.add_table(TableDef::new("a", ["b_id"])).unwrap();
        let b = builder.add_table(TableDef::new("b", ["a_id"])).unwrap();
        builder.add_foreign_key("a_b", a, &[0], b, true).unwrap();
        builder.add_foreign_key("b_a", b, &[0], a, true).unwrap();
        let schema = Arc::new(builder.build());
        let store = Arc::new(MemoryStore::new(schema.clone()));
        let caches = schema
            .tables()
            .iter()
            .map(|_| Arc::new(PartitionedCache::new(0, 10, 1)))
            .collect();
        let mut coordinator = FlushCoordinator::new(
            TxId(1),
            schema,
            caches,
            store.clone(),
            FlushConfig::default(),
        );
        coordinator
            .table_view(a)
            .unwrap()
            .insert(Key::from(1), vec![Value::Int(2)])
            .unwrap();
        coordinator
            .table_view(b)
            .unwrap()
            .insert(Key::from(2), vec![Value::Null])
            .unwrap();
        coordinator.flush().unwrap();
        // a's inserts wait on b; b's recursion back into a stops at the in-progress marker.
        assert_eq!(
            store.statements(),
            vec![
                Statement::Insert {
                    table: b,
                    key: Key::from(2),
                    fields: vec![Value::Null],
                },
                Statement::Insert {
                    table: a,
                    key: Key::from(1),
                    fields: vec![Value::Int(2)],
                },
            ]
        );
    }

    #[test]
    fn test_after_completion_discards_views() {
        let mut builder = SchemaBuilder::new();
        let t = builder.add_table(TableDef::new("t", ["v"])).unwrap();
        let schema = Arc::new(builder.build());
        let store = Arc::new(MemoryStore::new(schema.clone()));
        let cache = Arc::new(PartitionedCache::new(0, 10, 1));
        let mut coordinator = FlushCoordinator::new(
            TxId(1),
            schema,
            vec![cache.clone()],
            store,
            FlushConfig::default(),
        );
        coordinator
            .table_view(t)
            .unwrap()
            .insert(Key::from(1), vec![Value::Int(1)])
            .unwrap();
        assert_eq!(coordinator.views().len(), 1);
        coordinator.after_completion(Outcome::RolledBack).unwrap();
        assert!(coordinator.views().is_empty());
        assert!(!cache.contains(TxId(2), &Key::from(1)));
        assert_eq!(coordinator.table_view(TableId(5)).err(), Some(Error::UnknownTable));
    }
}
