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

//! Static table metadata and the foreign-key reference graph.
//!
//! Everything is registered up front through a `SchemaBuilder`; `build()` freezes it into an
//! immutable `Schema` that can be shared across transactions without locking.

use crate::Error;
use crate::value::{Key, Value};
use std::fmt::{Display, Formatter};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub usize);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId(pub usize);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(pub usize);

/// An entity table. Column positions index into a row's field values; the primary key is held
/// separately and is not one of the columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub id: TableId,
    pub name: String,
    pub columns: Vec<String>,
    /// Column holding an integer row version for optimistic concurrency.
    pub version_column: Option<usize>,
    /// Number of cached relationship collections per row.
    pub relation_fields: usize,
    /// Rows are inserted by something other than the table-level insert phase.
    pub defer_create: bool,
}

impl TableDef {
    pub fn new<S: Into<String>>(name: &str, columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            id: TableId(0),
            name: name.to_string(),
            columns: columns.into_iter().map(Into::into).collect(),
            version_column: None,
            relation_fields: 0,
            defer_create: false,
        }
    }

    pub fn with_version_column(mut self, column: usize) -> Self {
        self.version_column = Some(column);
        self
    }

    pub fn with_relation_fields(mut self, count: usize) -> Self {
        self.relation_fields = count;
        self
    }

    pub fn with_deferred_create(mut self) -> Self {
        self.defer_create = true;
        self
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

impl Display for TableDef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A many-to-many join table between two entity tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    pub id: RelationId,
    pub name: String,
    pub left: TableId,
    pub right: TableId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub id: ConstraintId,
    pub name: String,
    pub referencing: TableId,
    pub columns: Vec<usize>,
    pub referenced: TableId,
    pub nullable: bool,
}

impl ForeignKey {
    pub fn is_self_referencing(&self) -> bool {
        self.referencing == self.referenced
    }

    /// The key of the row that `fields` point at through this constraint. `None` if any of the
    /// columns is null or was never loaded.
    pub fn target(&self, fields: &[Value]) -> Option<Key> {
        let values = self
            .columns
            .iter()
            .map(|&c| fields.get(c).filter(|v| v.is_loaded() && !v.is_null()).cloned())
            .collect::<Option<Vec<_>>>()?;
        Some(Key::new(values))
    }
}

#[derive(Default)]
pub struct SchemaBuilder {
    tables: Vec<TableDef>,
    relations: Vec<RelationDef>,
    foreign_keys: Vec<ForeignKey>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, mut table: TableDef) -> Result<TableId, Error> {
        if let Some(column) = table.version_column
            && column >= table.columns.len()
        {
            return Err(Error::NoSuchColumn(column));
        }
        let id = TableId(self.tables.len());
        table.id = id;
        self.tables.push(table);
        Ok(id)
    }

    pub fn add_relation(
        &mut self,
        name: &str,
        left: TableId,
        right: TableId,
    ) -> Result<RelationId, Error> {
        self.check_table(left)?;
        self.check_table(right)?;
        let id = RelationId(self.relations.len());
        self.relations.push(RelationDef {
            id,
            name: name.to_string(),
            left,
            right,
        });
        Ok(id)
    }

    /// Register `referencing.columns -> referenced`. Each registration adds an edge to the
    /// reference graph.
    pub fn add_foreign_key(
        &mut self,
        name: &str,
        referencing: TableId,
        columns: &[usize],
        referenced: TableId,
        nullable: bool,
    ) -> Result<ConstraintId, Error> {
        let table = self.check_table(referencing)?;
        if let Some(&bad) = columns.iter().find(|&&c| c >= table.column_count()) {
            return Err(Error::NoSuchColumn(bad));
        }
        self.check_table(referenced)?;
        let id = ConstraintId(self.foreign_keys.len());
        self.foreign_keys.push(ForeignKey {
            id,
            name: name.to_string(),
            referencing,
            columns: columns.to_vec(),
            referenced,
            nullable,
        });
        Ok(id)
    }

    fn check_table(&self, id: TableId) -> Result<&TableDef, Error> {
        self.tables.get(id.0).ok_or(Error::UnknownTable)
    }

    pub fn build(self) -> Schema {
        let n = self.tables.len();
        let mut references = vec![vec![]; n];
        let mut referenced_by = vec![vec![]; n];
        let mut outbound = vec![vec![]; n];
        let mut inbound = vec![vec![]; n];
        for fk in &self.foreign_keys {
            outbound[fk.referencing.0].push(fk.id);
            inbound[fk.referenced.0].push(fk.id);
            // Self edges stay out of the graph; ordering within a table is list order.
            if !fk.is_self_referencing() {
                references[fk.referencing.0].push(fk.referenced);
                referenced_by[fk.referenced.0].push(fk.referencing);
            }
        }
        for adjacency in references.iter_mut().chain(referenced_by.iter_mut()) {
            adjacency.sort();
            adjacency.dedup();
        }
        Schema {
            tables: self.tables,
            relations: self.relations,
            foreign_keys: self.foreign_keys,
            references,
            referenced_by,
            outbound,
            inbound,
        }
    }
}

/// Frozen table metadata and reference graph.
#[derive(Debug)]
pub struct Schema {
    tables: Vec<TableDef>,
    relations: Vec<RelationDef>,
    foreign_keys: Vec<ForeignKey>,
    references: Vec<Vec<TableId>>,
    referenced_by: Vec<Vec<TableId>>,
    outbound: Vec<Vec<ConstraintId>>,
    inbound: Vec<Vec<ConstraintId>>,
}

impl Schema {
    pub fn table(&self, id: TableId) -> Result<&TableDef, Error> {
        self.tables.get(id.0).ok_or(Error::UnknownTable)
    }

    pub fn relation(&self, id: RelationId) -> Result<&RelationDef, Error> {
        self.relations.get(id.0).ok_or(Error::UnknownRelation)
    }

    pub fn foreign_key(&self, id: ConstraintId) -> Result<&ForeignKey, Error> {
        self.foreign_keys.get(id.0).ok_or(Error::UnknownConstraint)
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    pub fn table_by_name(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn relation_by_name(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Tables that `table` holds foreign keys into.
    pub fn references(&self, table: TableId) -> &[TableId] {
        self.references.get(table.0).map_or(&[], Vec::as_slice)
    }

    /// Tables holding foreign keys into `table`.
    pub fn referenced_by(&self, table: TableId) -> &[TableId] {
        self.referenced_by.get(table.0).map_or(&[], Vec::as_slice)
    }

    /// Constraints declared on `table`.
    pub fn foreign_keys_from(&self, table: TableId) -> &[ConstraintId] {
        self.outbound.get(table.0).map_or(&[], Vec::as_slice)
    }

    /// Constraints pointing at `table`.
    pub fn foreign_keys_into(&self, table: TableId) -> &[ConstraintId] {
        self.inbound.get(table.0).map_or(&[], Vec::as_slice)
    }
}
