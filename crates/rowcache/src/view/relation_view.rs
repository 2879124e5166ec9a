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

use crate::config::FlushConfig;
use crate::schema::{RelationDef, RelationId};
use crate::store::{RowStore, Statement};
use crate::value::Key;
use crate::view::execute_chunked;
use crate::{Error, TxId};
use indexmap::IndexSet;
use tracing::debug;

type Link = (Key, Key);

/// Pending join-row inserts and deletes for one many-to-many relation. A pair is never pending in
/// both directions at once: adding a pair that is pending removal cancels the removal, and vice
/// versa.
pub struct RelationView {
    tx: TxId,
    def: RelationDef,
    config: FlushConfig,
    pending_add: IndexSet<Link>,
    pending_remove: IndexSet<Link>,
}

impl RelationView {
    pub fn new(tx: TxId, def: RelationDef, config: FlushConfig) -> Self {
        Self {
            tx,
            def,
            config,
            pending_add: IndexSet::new(),
            pending_remove: IndexSet::new(),
        }
    }

    pub fn tx(&self) -> TxId {
        self.tx
    }

    pub fn relation(&self) -> RelationId {
        self.def.id
    }

    pub fn def(&self) -> &RelationDef {
        &self.def
    }

    pub fn add_keys(&mut self, left: Key, right: Key) {
        let link = (left, right);
        if !self.pending_remove.shift_remove(&link) {
            self.pending_add.insert(link);
        }
    }

    pub fn remove_keys(&mut self, left: Key, right: Key) {
        let link = (left, right);
        if !self.pending_add.shift_remove(&link) {
            self.pending_remove.insert(link);
        }
    }

    pub fn is_pending_add(&self, left: &Key, right: &Key) -> bool {
        self.pending_add.contains(&(left.clone(), right.clone()))
    }

    pub fn is_pending_remove(&self, left: &Key, right: &Key) -> bool {
        self.pending_remove.contains(&(left.clone(), right.clone()))
    }

    pub fn pending_adds(&self) -> impl Iterator<Item = &Link> {
        self.pending_add.iter()
    }

    pub fn pending_removes(&self) -> impl Iterator<Item = &Link> {
        self.pending_remove.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_add.is_empty() && self.pending_remove.is_empty()
    }

    pub fn flush_deleted(&mut self, store: &dyn RowStore) -> Result<usize, Error> {
        if self.pending_remove.is_empty() {
            return Ok(0);
        }
        let statements = self
            .pending_remove
            .iter()
            .map(|(left, right)| Statement::DeleteLink {
                relation: self.def.id,
                left: left.clone(),
                right: right.clone(),
            })
            .collect();
        let results = execute_chunked(store, &self.config, statements)?;
        let pending = std::mem::take(&mut self.pending_remove);
        let mut deleted = 0;
        for (link, result) in pending.into_iter().zip(results) {
            if result.is_single() {
                deleted += 1;
            } else {
                self.pending_remove.insert(link);
            }
        }
        if !self.pending_remove.is_empty() {
            return Err(Error::DeleteIncomplete {
                table: self.def.name.clone(),
                remaining: self.pending_remove.len(),
            });
        }
        debug!(relation = %self.def.name, deleted, "Flushed link deletes");
        Ok(deleted)
    }

    pub fn flush_created(&mut self, store: &dyn RowStore) -> Result<usize, Error> {
        if self.pending_add.is_empty() {
            return Ok(0);
        }
        let statements = self
            .pending_add
            .iter()
            .map(|(left, right)| Statement::InsertLink {
                relation: self.def.id,
                left: left.clone(),
                right: right.clone(),
            })
            .collect();
        let results = execute_chunked(store, &self.config, statements)?;
        let pending = std::mem::take(&mut self.pending_add);
        let mut inserted = 0;
        for (link, result) in pending.into_iter().zip(results) {
            if result.is_single() {
                inserted += 1;
            } else {
                self.pending_add.insert(link);
            }
        }
        if !self.pending_add.is_empty() {
            return Err(Error::InsertIncomplete {
                table: self.def.name.clone(),
                remaining: self.pending_add.len(),
            });
        }
        debug!(relation = %self.def.name, inserted, "Flushed link inserts");
        Ok(inserted)
    }

    pub fn before_completion(&mut self) {}

    /// Join rows are not cached, so there is nothing to synchronize.
    pub fn committed(&mut self) {
        self.clear();
    }

    pub fn rolled_back(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.pending_add.clear();
        self.pending_remove.clear();
    }
}
