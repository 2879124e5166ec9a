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

//! An in-memory `RowStore` that enforces foreign keys the way a relational store would and
//! records every statement it executes, for tests and benchmarks.

use crate::Error;
use crate::schema::{RelationId, Schema, TableDef, TableId};
use crate::store::{Affected, RowStore, Statement};
use crate::value::{Key, Value, Values};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct State {
    rows: HashMap<(TableId, Key), Values>,
    links: HashSet<(RelationId, Key, Key)>,
    log: Vec<Statement>,
    selects: usize,
    fail_keys: HashSet<Key>,
    unknown_counts: bool,
}

pub struct MemoryStore {
    schema: Arc<Schema>,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            state: Mutex::new(State::default()),
        }
    }

    /// Write a row directly, bypassing constraint checks and the statement log.
    pub fn seed(&self, table: TableId, key: Key, fields: Values) {
        self.state.lock().unwrap().rows.insert((table, key), fields);
    }

    pub fn seed_link(&self, relation: RelationId, left: Key, right: Key) {
        self.state
            .lock()
            .unwrap()
            .links
            .insert((relation, left, right));
    }

    pub fn row(&self, table: TableId, key: &Key) -> Option<Values> {
        self.state
            .lock()
            .unwrap()
            .rows
            .get(&(table, key.clone()))
            .cloned()
    }

    pub fn contains(&self, table: TableId, key: &Key) -> bool {
        self.row(table, key).is_some()
    }

    pub fn row_count(&self, table: TableId) -> usize {
        self.state
            .lock()
            .unwrap()
            .rows
            .keys()
            .filter(|(t, _)| *t == table)
            .count()
    }

    pub fn has_link(&self, relation: RelationId, left: &Key, right: &Key) -> bool {
        self.state
            .lock()
            .unwrap()
            .links
            .contains(&(relation, left.clone(), right.clone()))
    }

    /// Every statement executed so far, in order.
    pub fn statements(&self) -> Vec<Statement> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }

    pub fn selects(&self) -> usize {
        self.state.lock().unwrap().selects
    }

    /// Statements addressing `key` report zero affected rows and change nothing, as if the row
    /// had vanished underneath the transaction.
    pub fn fail_on(&self, key: Key) {
        self.state.lock().unwrap().fail_keys.insert(key);
    }

    /// Report `Affected::Unknown` instead of a row count for successful statements.
    pub fn report_unknown_counts(&self, unknown: bool) {
        self.state.lock().unwrap().unknown_counts = unknown;
    }

    fn execute(&self, state: &mut State, statement: &Statement) -> Result<Affected, Error> {
        match statement {
            Statement::Insert { table, key, fields } => {
                if state.rows.contains_key(&(*table, key.clone())) {
                    return Err(Error::StoreFailure(format!(
                        "duplicate key {key} in {}",
                        self.table_name(*table)
                    )));
                }
                self.check_outbound(state, *table, key, fields, None)?;
                state.rows.insert((*table, key.clone()), fields.clone());
                Ok(Affected::Rows(1))
            }
            Statement::Update {
                table,
                key,
                columns,
                version,
            } => {
                let Some(current) = state.rows.get(&(*table, key.clone())) else {
                    return Ok(Affected::Rows(0));
                };
                let mut updated = current.clone();
                if let Some(check) = version {
                    if updated.get(check.column) != Some(&check.expected) {
                        return Ok(Affected::Rows(0));
                    }
                    updated[check.column] = check.next.clone();
                }
                for (column, value) in columns {
                    updated[*column] = value.clone();
                }
                let changed: Vec<usize> = columns.iter().map(|(c, _)| *c).collect();
                self.check_outbound(state, *table, key, &updated, Some(&changed))?;
                state.rows.insert((*table, key.clone()), updated);
                Ok(Affected::Rows(1))
            }
            Statement::Delete { table, key } => {
                if !state.rows.contains_key(&(*table, key.clone())) {
                    return Ok(Affected::Rows(0));
                }
                self.check_inbound(state, *table, key)?;
                state.rows.remove(&(*table, key.clone()));
                Ok(Affected::Rows(1))
            }
            Statement::NullForeignKey {
                table,
                constraint,
                key,
            } => {
                let fk = self.schema.foreign_key(*constraint)?;
                let Some(row) = state.rows.get_mut(&(*table, key.clone())) else {
                    return Ok(Affected::Rows(0));
                };
                for &column in &fk.columns {
                    row[column] = Value::Null;
                }
                Ok(Affected::Rows(1))
            }
            Statement::InsertLink {
                relation,
                left,
                right,
            } => {
                let def = self.schema.relation(*relation)?;
                if !state.rows.contains_key(&(def.left, left.clone()))
                    || !state.rows.contains_key(&(def.right, right.clone()))
                {
                    return Err(Error::StoreFailure(format!(
                        "link {left}:{right} in {} references a missing row",
                        def.name
                    )));
                }
                if !state
                    .links
                    .insert((*relation, left.clone(), right.clone()))
                {
                    return Err(Error::StoreFailure(format!(
                        "duplicate link {left}:{right} in {}",
                        def.name
                    )));
                }
                Ok(Affected::Rows(1))
            }
            Statement::DeleteLink {
                relation,
                left,
                right,
            } => {
                let removed = state
                    .links
                    .remove(&(*relation, left.clone(), right.clone()));
                Ok(Affected::Rows(removed as u64))
            }
        }
    }

    // Non-null foreign key values on `fields` must name existing rows. With `changed`, only
    // constraints covering one of those columns are checked.
    fn check_outbound(
        &self,
        state: &State,
        table: TableId,
        key: &Key,
        fields: &Values,
        changed: Option<&[usize]>,
    ) -> Result<(), Error> {
        for &constraint in self.schema.foreign_keys_from(table) {
            let fk = self.schema.foreign_key(constraint)?;
            if let Some(changed) = changed
                && !fk.columns.iter().any(|c| changed.contains(c))
            {
                continue;
            }
            let Some(target) = fk.target(fields) else {
                continue;
            };
            if fk.is_self_referencing() && &target == key {
                continue;
            }
            if !state.rows.contains_key(&(fk.referenced, target.clone())) {
                return Err(Error::StoreFailure(format!(
                    "foreign key {} violated: {target} not in {}",
                    fk.name,
                    self.table_name(fk.referenced)
                )));
            }
        }
        Ok(())
    }

    // Nothing else may still point at the row being deleted.
    fn check_inbound(&self, state: &State, table: TableId, key: &Key) -> Result<(), Error> {
        for &constraint in self.schema.foreign_keys_into(table) {
            let fk = self.schema.foreign_key(constraint)?;
            let referencing = state.rows.iter().find(|((t, k), fields)| {
                *t == fk.referencing
                    && !(*t == table && k == key)
                    && fk.columns.len() == key.values().len()
                    && fk
                        .columns
                        .iter()
                        .zip(key.values())
                        .all(|(&c, v)| &fields[c] == v)
            });
            if let Some(((_, k), _)) = referencing {
                return Err(Error::StoreFailure(format!(
                    "foreign key {} violated: {} row {k} still references {key}",
                    fk.name,
                    self.table_name(fk.referencing)
                )));
            }
        }
        for def in self.schema.relations() {
            let linked = state.links.iter().any(|(r, l, rt)| {
                *r == def.id
                    && ((def.left == table && l == key) || (def.right == table && rt == key))
            });
            if linked {
                return Err(Error::StoreFailure(format!(
                    "{key} is still linked through {}",
                    def.name
                )));
            }
        }
        Ok(())
    }

    fn table_name(&self, table: TableId) -> &str {
        self.schema
            .table(table)
            .map(|t| t.name.as_str())
            .unwrap_or("?")
    }
}

fn statement_key(statement: &Statement) -> [Option<&Key>; 2] {
    match statement {
        Statement::Insert { key, .. }
        | Statement::Update { key, .. }
        | Statement::Delete { key, .. }
        | Statement::NullForeignKey { key, .. } => [Some(key), None],
        Statement::InsertLink { left, right, .. } | Statement::DeleteLink { left, right, .. } => {
            [Some(left), Some(right)]
        }
    }
}

impl RowStore for MemoryStore {
    fn select_by_key(&self, table: &TableDef, key: &Key) -> Result<Option<Values>, Error> {
        let mut state = self.state.lock().unwrap();
        state.selects += 1;
        Ok(state.rows.get(&(table.id, key.clone())).cloned())
    }

    fn execute_batch(&self, statements: &[Statement]) -> Result<Vec<Affected>, Error> {
        let mut state = self.state.lock().unwrap();
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            let vanished = statement_key(statement)
                .into_iter()
                .flatten()
                .any(|k| state.fail_keys.contains(k));
            let result = if vanished {
                Affected::Rows(0)
            } else {
                self.execute(&mut state, statement)?
            };
            state.log.push(statement.clone());
            results.push(match result {
                Affected::Rows(1) if state.unknown_counts => Affected::Unknown,
                other => other,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;

    #[test]
    fn test_foreign_keys_are_enforced() {
        let mut builder = SchemaBuilder::new();
        let dept = builder.add_table(TableDef::new("dept", ["name"])).unwrap();
        let emp = builder
            .add_table(TableDef::new("emp", ["name", "dept_id"]))
            .unwrap();
        builder
            .add_foreign_key("emp_dept", emp, &[1], dept, true)
            .unwrap();
        let store = MemoryStore::new(Arc::new(builder.build()));

        let insert_emp = Statement::Insert {
            table: emp,
            key: Key::from(1),
            fields: vec![Value::from("ann"), Value::Int(10)],
        };
        assert!(store.execute_batch(&[insert_emp.clone()]).is_err());
        store
            .execute_batch(&[Statement::Insert {
                table: dept,
                key: Key::from(10),
                fields: vec![Value::from("eng")],
            }])
            .unwrap();
        assert_eq!(
            store.execute_batch(&[insert_emp]).unwrap(),
            vec![Affected::Rows(1)]
        );
        let delete_dept = Statement::Delete {
            table: dept,
            key: Key::from(10),
        };
        assert!(store.execute_batch(&[delete_dept.clone()]).is_err());
        store.fail_on(Key::from(10));
        assert_eq!(
            store.execute_batch(&[delete_dept]).unwrap(),
            vec![Affected::Rows(0)]
        );
        assert!(store.contains(dept, &Key::from(10)));
        assert_eq!(store.statements().len(), 3);
    }
}
