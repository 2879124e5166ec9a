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
use crate::schema::{ConstraintId, RelationId, TableDef, TableId};
use crate::value::{Key, Value, Values};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Optimistic concurrency predicate attached to an update: the statement only applies if
/// `column` still holds `expected`, and sets it to `next`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCheck {
    pub column: usize,
    pub expected: Value,
    pub next: Value,
}

/// A physical write, expressed in terms of schema ids. Rendering it into the store's own
/// statement language is the store's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Insert {
        table: TableId,
        key: Key,
        fields: Values,
    },
    /// Set `columns` on the row at `key`. Columns whose value was never loaded are left out.
    Update {
        table: TableId,
        key: Key,
        columns: Vec<(usize, Value)>,
        version: Option<VersionCheck>,
    },
    Delete {
        table: TableId,
        key: Key,
    },
    /// Null every column of `constraint` on the row at `key`.
    NullForeignKey {
        table: TableId,
        constraint: ConstraintId,
        key: Key,
    },
    InsertLink {
        relation: RelationId,
        left: Key,
        right: Key,
    },
    DeleteLink {
        relation: RelationId,
        left: Key,
        right: Key,
    },
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Statement::Insert { table, key, .. } => write!(f, "INSERT t{} {key}", table.0),
            Statement::Update { table, key, .. } => write!(f, "UPDATE t{} {key}", table.0),
            Statement::Delete { table, key } => write!(f, "DELETE t{} {key}", table.0),
            Statement::NullForeignKey {
                table,
                constraint,
                key,
            } => write!(f, "NULL FK{} t{} {key}", constraint.0, table.0),
            Statement::InsertLink {
                relation,
                left,
                right,
            } => write!(f, "INSERT LINK r{} {left}:{right}", relation.0),
            Statement::DeleteLink {
                relation,
                left,
                right,
            } => write!(f, "DELETE LINK r{} {left}:{right}", relation.0),
        }
    }
}

/// Per-statement outcome reported by the store.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Affected {
    Rows(u64),
    /// The store executed the statement but cannot say how many rows it touched.
    Unknown,
}

impl Affected {
    /// True if the statement is known, or can be assumed, to have touched exactly one row.
    pub fn is_single(self) -> bool {
        matches!(self, Affected::Rows(1) | Affected::Unknown)
    }
}

/// The physical row store backing the cache.
pub trait RowStore: Send + Sync {
    fn select_by_key(&self, table: &TableDef, key: &Key) -> Result<Option<Values>, Error>;

    /// Execute `statements` in order, returning one outcome per statement. Store-level failures
    /// (constraint violations, connectivity) are returned as errors and abort the flush.
    fn execute_batch(&self, statements: &[Statement]) -> Result<Vec<Affected>, Error>;
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Accumulate statements and hand them to the store in one call.
    #[default]
    Batched,
    /// One store call per statement.
    Single,
}

pub struct StatementBatch {
    mode: ExecutionMode,
    statements: Vec<Statement>,
}

impl StatementBatch {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            statements: vec![],
        }
    }

    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Run and drain the accumulated statements. The result has exactly one entry per statement,
    /// in push order.
    pub fn execute(&mut self, store: &dyn RowStore) -> Result<Vec<Affected>, Error> {
        let statements = std::mem::take(&mut self.statements);
        if statements.is_empty() {
            return Ok(vec![]);
        }
        match self.mode {
            ExecutionMode::Batched => {
                let results = store.execute_batch(&statements)?;
                check_arity(statements.len(), results.len())?;
                Ok(results)
            }
            ExecutionMode::Single => {
                let mut results = Vec::with_capacity(statements.len());
                for statement in &statements {
                    let result = store.execute_batch(std::slice::from_ref(statement))?;
                    check_arity(1, result.len())?;
                    results.extend(result);
                }
                Ok(results)
            }
        }
    }
}

fn check_arity(expected: usize, actual: usize) -> Result<(), Error> {
    if expected != actual {
        return Err(Error::StoreFailure(format!(
            "store returned {actual} results for {expected} statements"
        )));
    }
    Ok(())
}
