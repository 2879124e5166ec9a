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

//! Whole-transaction scenarios: buffered writes through a `FlushCoordinator`, flushed against a
//! foreign-key-enforcing in-memory store, with the resulting statement stream and cache state
//! checked afterwards.

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rowcache::testing::MemoryStore;
    use rowcache::{
        CacheManager, ConstraintId, Error, ExecutionMode, FlushConfig, Key, RelationId,
        RowCacheConfig, RowStore, SchemaBuilder, Statement, TableDef, TableId, TxId, Value,
        VersionCheck,
    };
    use std::sync::Arc;

    struct World {
        manager: CacheManager,
        store: Arc<MemoryStore>,
        dept: TableId,
        emp: TableId,
        badge: TableId,
        project: TableId,
        audit: TableId,
        node: TableId,
        emp_project: RelationId,
        emp_dept: ConstraintId,
        node_parent: ConstraintId,
    }

    fn world() -> World {
        world_with(FlushConfig::default())
    }

    fn world_with(flush: FlushConfig) -> World {
        let mut builder = SchemaBuilder::new();
        let dept = builder.add_table(TableDef::new("dept", ["name"])).unwrap();
        let emp = builder
            .add_table(
                TableDef::new("emp", ["name", "dept_id", "version"])
                    .with_version_column(2)
                    .with_relation_fields(1),
            )
            .unwrap();
        let badge = builder
            .add_table(TableDef::new("badge", ["emp_id", "label"]))
            .unwrap();
        let project = builder
            .add_table(TableDef::new("project", ["title"]))
            .unwrap();
        let audit = builder
            .add_table(TableDef::new("audit", ["note"]).with_deferred_create())
            .unwrap();
        let node = builder
            .add_table(TableDef::new("node", ["label", "parent_id"]))
            .unwrap();
        let emp_dept = builder
            .add_foreign_key("emp_dept", emp, &[1], dept, true)
            .unwrap();
        builder
            .add_foreign_key("badge_emp", badge, &[0], emp, false)
            .unwrap();
        let node_parent = builder
            .add_foreign_key("node_parent", node, &[1], node, true)
            .unwrap();
        let emp_project = builder.add_relation("emp_project", emp, project).unwrap();
        let schema = Arc::new(builder.build());

        let store = Arc::new(MemoryStore::new(schema.clone()));
        store.seed(dept, Key::from(10), vec![Value::from("eng")]);
        store.seed(dept, Key::from(11), vec![Value::from("ops")]);
        store.seed(emp, Key::from(1), emp_row("ann", 10, 0));
        store.seed(project, Key::from(100), vec![Value::from("apollo")]);
        store.seed(project, Key::from(101), vec![Value::from("gemini")]);

        let config = RowCacheConfig {
            flush,
            ..Default::default()
        };
        let manager = CacheManager::new(schema, store.clone() as Arc<dyn RowStore>, config);
        World {
            manager,
            store,
            dept,
            emp,
            badge,
            project,
            audit,
            node,
            emp_project,
            emp_dept,
            node_parent,
        }
    }

    fn emp_row(name: &str, dept: i64, version: i64) -> Vec<Value> {
        vec![Value::from(name), Value::Int(dept), Value::Int(version)]
    }

    /// Seed a chain of nodes `1 <- 2 <- ... <- n`, each pointing at its predecessor.
    fn seed_node_chain(w: &World, n: i64) {
        for id in 1..=n {
            let parent = if id == 1 { Value::Null } else { Value::Int(id - 1) };
            w.store.seed(w.node, Key::from(id), vec![Value::from("n"), parent]);
        }
    }

    fn node_delete(w: &World, id: i64) -> Statement {
        Statement::Delete {
            table: w.node,
            key: Key::from(id),
        }
    }

    #[test]
    fn test_insert_commit_is_visible_to_other_transactions() {
        let w = world();
        let mut tx = w.manager.begin(TxId(1));
        tx.table_view(w.dept)
            .unwrap()
            .insert(Key::from(1), vec![Value::from("research")])
            .unwrap();
        tx.commit().unwrap();

        let cache = w.manager.cache(w.dept).unwrap();
        assert_eq!(
            cache.get_fields(TxId(1), &Key::from(1)),
            Some(vec![Value::from("research")])
        );
        assert!(cache.contains(TxId(2), &Key::from(1)));
        assert_eq!(
            w.store.row(w.dept, &Key::from(1)),
            Some(vec![Value::from("research")])
        );
    }

    #[test]
    fn test_referenced_rows_are_inserted_first() {
        let w = world();
        let mut tx = w.manager.begin(TxId(1));
        // Touch the referencing table first so view order alone would get it wrong.
        tx.table_view(w.emp)
            .unwrap()
            .insert(Key::from(2), emp_row("bob", 12, 0))
            .unwrap();
        tx.table_view(w.dept)
            .unwrap()
            .insert(Key::from(12), vec![Value::from("legal")])
            .unwrap();
        tx.commit().unwrap();

        assert_eq!(
            w.store.statements(),
            vec![
                Statement::Insert {
                    table: w.dept,
                    key: Key::from(12),
                    fields: vec![Value::from("legal")],
                },
                Statement::Insert {
                    table: w.emp,
                    key: Key::from(2),
                    fields: emp_row("bob", 12, 0),
                },
            ]
        );
    }

    #[test]
    fn test_dependent_rows_are_deleted_first() {
        let w = world();
        let mut tx = w.manager.begin(TxId(1));
        assert!(tx.delete(w.dept, &Key::from(10)).unwrap());
        assert!(tx.delete(w.emp, &Key::from(1)).unwrap());
        tx.commit().unwrap();

        assert_eq!(
            w.store.statements(),
            vec![
                Statement::Delete {
                    table: w.emp,
                    key: Key::from(1),
                },
                Statement::Delete {
                    table: w.dept,
                    key: Key::from(10),
                },
            ]
        );
        assert!(!w.manager.cache(w.emp).unwrap().contains(TxId(2), &Key::from(1)));
        assert!(!w.manager.cache(w.dept).unwrap().contains(TxId(2), &Key::from(10)));
    }

    #[test]
    fn test_delete_missing_row() {
        let w = world();
        let mut tx = w.manager.begin(TxId(1));
        assert!(!tx.delete(w.dept, &Key::from(99)).unwrap());
        tx.commit().unwrap();
        assert!(w.store.statements().is_empty());
    }

    #[test]
    fn test_deleting_twice_is_an_error() {
        let w = world();
        let mut tx = w.manager.begin(TxId(1));
        assert!(tx.delete(w.dept, &Key::from(11)).unwrap());
        assert_eq!(
            tx.delete(w.dept, &Key::from(11)),
            Err(Error::RowAlreadyRemoved)
        );
        tx.commit().unwrap();
        assert_eq!(
            w.store.statements(),
            vec![Statement::Delete {
                table: w.dept,
                key: Key::from(11),
            }]
        );
    }

    #[test]
    fn test_self_referencing_parent_deleted_before_child() {
        let w = world();
        seed_node_chain(&w, 2);
        let mut tx = w.manager.begin(TxId(1));
        // The child is buffered, so deleting the parent nulls its reference in memory.
        tx.load(w.node, &Key::from(2)).unwrap().unwrap();
        assert!(tx.delete(w.node, &Key::from(1)).unwrap());
        assert!(tx.delete(w.node, &Key::from(2)).unwrap());
        tx.commit().unwrap();

        assert_eq!(
            w.store.statements(),
            vec![
                Statement::NullForeignKey {
                    table: w.node,
                    constraint: w.node_parent,
                    key: Key::from(2),
                },
                node_delete(&w, 1),
                node_delete(&w, 2),
            ]
        );
        assert_eq!(w.store.row(w.node, &Key::from(1)), None);
        assert_eq!(w.store.row(w.node, &Key::from(2)), None);
    }

    #[test]
    fn test_self_referencing_chain_deletes_children_first() {
        let w = world();
        seed_node_chain(&w, 3);
        let mut tx = w.manager.begin(TxId(1));
        for id in 1..=3 {
            assert!(tx.delete(w.node, &Key::from(id)).unwrap());
        }
        tx.commit().unwrap();

        assert_eq!(
            w.store.statements(),
            vec![node_delete(&w, 3), node_delete(&w, 2), node_delete(&w, 1)]
        );
    }

    #[test]
    fn test_self_reference_of_deleted_row_is_not_nulled() {
        let w = world();
        seed_node_chain(&w, 2);
        let mut tx = w.manager.begin(TxId(1));
        let child = tx.load(w.node, &Key::from(2)).unwrap().unwrap();
        tx.table_view(w.node)
            .unwrap()
            .null_foreign_key(child, w.node_parent)
            .unwrap();
        assert!(tx.delete(w.node, &Key::from(2)).unwrap());
        tx.commit().unwrap();

        assert_eq!(w.store.statements(), vec![node_delete(&w, 2)]);
        assert!(w.store.row(w.node, &Key::from(1)).is_some());
    }

    #[test]
    fn test_nullable_reference_is_nulled_before_delete() {
        let w = world();
        let mut tx = w.manager.begin(TxId(1));
        tx.load(w.emp, &Key::from(1)).unwrap().unwrap();
        assert!(tx.delete(w.dept, &Key::from(10)).unwrap());
        tx.commit().unwrap();

        assert_eq!(
            w.store.statements(),
            vec![
                Statement::NullForeignKey {
                    table: w.emp,
                    constraint: w.emp_dept,
                    key: Key::from(1),
                },
                Statement::Delete {
                    table: w.dept,
                    key: Key::from(10),
                },
            ]
        );
        let nulled = vec![Value::from("ann"), Value::Null, Value::Int(0)];
        assert_eq!(w.store.row(w.emp, &Key::from(1)), Some(nulled.clone()));
        assert_eq!(
            w.manager
                .cache(w.emp)
                .unwrap()
                .get_fields(TxId(2), &Key::from(1)),
            Some(nulled)
        );
    }

    #[test]
    fn test_explicit_null_with_referenced_table_touched_first() {
        let w = world();
        let mut tx = w.manager.begin(TxId(1));
        let dept = tx.load(w.dept, &Key::from(10)).unwrap().unwrap();
        let emp = tx.load(w.emp, &Key::from(1)).unwrap().unwrap();
        tx.table_view(w.emp)
            .unwrap()
            .null_foreign_key(emp, w.emp_dept)
            .unwrap();
        tx.table_view(w.dept).unwrap().delete(dept).unwrap();
        tx.commit().unwrap();

        assert_eq!(
            w.store.statements(),
            vec![
                Statement::NullForeignKey {
                    table: w.emp,
                    constraint: w.emp_dept,
                    key: Key::from(1),
                },
                Statement::Delete {
                    table: w.dept,
                    key: Key::from(10),
                },
            ]
        );
    }

    #[test]
    fn test_unnulled_reference_fails_the_flush() {
        let w = world();
        let mut tx = w.manager.begin(TxId(1));
        // emp 1 is not buffered, so nothing nulls its reference.
        tx.delete(w.dept, &Key::from(10)).unwrap();
        let err = tx.commit().unwrap_err();
        assert!(matches!(err, Error::StoreFailure(_)));
        assert!(w.store.contains(w.dept, &Key::from(10)));
        assert!(
            w.manager
                .cache(w.dept)
                .unwrap()
                .contains(TxId(2), &Key::from(10))
        );
    }

    #[test]
    fn test_global_flush_order() {
        let w = world();
        w.store
            .seed_link(w.emp_project, Key::from(1), Key::from(100));
        w.store
            .seed(w.badge, Key::from(50), vec![Value::Int(1), Value::from("visitor")]);

        let mut tx = w.manager.begin(TxId(1));
        tx.relation_view(w.emp_project)
            .unwrap()
            .remove_keys(Key::from(1), Key::from(100));
        tx.delete(w.badge, &Key::from(50)).unwrap();
        tx.table_view(w.dept)
            .unwrap()
            .insert(Key::from(12), vec![Value::from("legal")])
            .unwrap();
        let emp = tx.load(w.emp, &Key::from(1)).unwrap().unwrap();
        let emps = tx.table_view(w.emp).unwrap();
        emps.set_field(emp, 0, Value::from("annie")).unwrap();
        emps.set_field(emp, 1, Value::Int(12)).unwrap();
        emps.set_relation(emp, 0, vec![Key::from(101)]).unwrap();
        tx.relation_view(w.emp_project)
            .unwrap()
            .add_keys(Key::from(1), Key::from(101));
        tx.commit().unwrap();

        assert_eq!(
            w.store.statements(),
            vec![
                Statement::DeleteLink {
                    relation: w.emp_project,
                    left: Key::from(1),
                    right: Key::from(100),
                },
                Statement::Delete {
                    table: w.badge,
                    key: Key::from(50),
                },
                Statement::Insert {
                    table: w.dept,
                    key: Key::from(12),
                    fields: vec![Value::from("legal")],
                },
                Statement::Update {
                    table: w.emp,
                    key: Key::from(1),
                    columns: vec![(0, Value::from("annie")), (1, Value::Int(12))],
                    version: Some(VersionCheck {
                        column: 2,
                        expected: Value::Int(0),
                        next: Value::Int(1),
                    }),
                },
                Statement::InsertLink {
                    relation: w.emp_project,
                    left: Key::from(1),
                    right: Key::from(101),
                },
            ]
        );

        let cache = w.manager.cache(w.emp).unwrap();
        assert_eq!(
            cache.get_fields(TxId(2), &Key::from(1)),
            Some(emp_row("annie", 12, 1))
        );
        assert_eq!(
            cache.get_relations(TxId(2), &Key::from(1)),
            Some(vec![Some(vec![Key::from(101)])])
        );
        assert!(w.store.has_link(w.emp_project, &Key::from(1), &Key::from(101)));
        assert!(!w.store.has_link(w.emp_project, &Key::from(1), &Key::from(100)));
    }

    #[test]
    fn test_relation_only_change_issues_no_update() {
        let w = world();
        let mut tx = w.manager.begin(TxId(1));
        let emp = tx.load(w.emp, &Key::from(1)).unwrap().unwrap();
        tx.table_view(w.emp)
            .unwrap()
            .set_relation(emp, 0, vec![Key::from(100)])
            .unwrap();
        tx.commit().unwrap();
        assert!(w.store.statements().is_empty());
        assert_eq!(
            w.manager
                .cache(w.emp)
                .unwrap()
                .get_relations(TxId(2), &Key::from(1)),
            Some(vec![Some(vec![Key::from(100)])])
        );
    }

    #[test]
    fn test_version_conflict_aborts_and_leaves_cache() {
        let w = world();
        let mut tx = w.manager.begin(TxId(1));
        let emp = tx.load(w.emp, &Key::from(1)).unwrap().unwrap();
        // A concurrent writer bumps the version after our read.
        w.store.seed(w.emp, Key::from(1), emp_row("ann", 10, 1));
        tx.table_view(w.emp)
            .unwrap()
            .set_field(emp, 0, Value::from("annie"))
            .unwrap();
        assert_eq!(
            tx.commit(),
            Err(Error::VersionConflict {
                table: "emp".to_string()
            })
        );
        assert_eq!(
            w.manager
                .cache(w.emp)
                .unwrap()
                .get_fields(TxId(2), &Key::from(1)),
            Some(emp_row("ann", 10, 0))
        );
    }

    #[test]
    fn test_created_then_deleted_never_reaches_the_store() {
        let w = world();
        let mut tx = w.manager.begin(TxId(1));
        let depts = tx.table_view(w.dept).unwrap();
        let h = depts.insert(Key::from(12), vec![Value::from("tmp")]).unwrap();
        depts.delete(h).unwrap();
        tx.commit().unwrap();
        assert!(w.store.statements().is_empty());
        assert!(!w.manager.cache(w.dept).unwrap().contains(TxId(2), &Key::from(12)));
    }

    #[test]
    fn test_rollback_discards_everything() {
        let w = world();
        let mut tx = w.manager.begin(TxId(1));
        tx.table_view(w.dept)
            .unwrap()
            .insert(Key::from(12), vec![Value::from("tmp")])
            .unwrap();
        tx.delete(w.emp, &Key::from(1)).unwrap();
        tx.rollback().unwrap();
        assert!(w.store.statements().is_empty());
        assert!(w.manager.cache(w.emp).unwrap().contains(TxId(2), &Key::from(1)));
        assert!(!w.manager.cache(w.dept).unwrap().contains(TxId(2), &Key::from(12)));
    }

    #[test]
    fn test_vanished_row_fails_delete() {
        let w = world();
        let mut tx = w.manager.begin(TxId(1));
        tx.delete(w.dept, &Key::from(11)).unwrap();
        w.store.fail_on(Key::from(11));
        assert_eq!(
            tx.commit(),
            Err(Error::DeleteIncomplete {
                table: "dept".to_string(),
                remaining: 1
            })
        );
        // Commit-time sync never ran, so the cached row is untouched.
        assert!(w.manager.cache(w.dept).unwrap().contains(TxId(2), &Key::from(11)));
    }

    #[test]
    fn test_vanished_row_fails_update() {
        let w = world();
        let mut tx = w.manager.begin(TxId(1));
        let dept = tx.load(w.dept, &Key::from(11)).unwrap().unwrap();
        tx.table_view(w.dept)
            .unwrap()
            .set_field(dept, 0, Value::from("operations"))
            .unwrap();
        w.store.fail_on(Key::from(11));
        assert_eq!(
            tx.commit(),
            Err(Error::UpdateIncomplete {
                table: "dept".to_string(),
                remaining: 1
            })
        );
    }

    #[test]
    fn test_unknown_row_counts_are_accepted() {
        let w = world();
        w.store.report_unknown_counts(true);
        let mut tx = w.manager.begin(TxId(1));
        for i in 20..25 {
            tx.table_view(w.dept)
                .unwrap()
                .insert(Key::from(i), vec![Value::from(format!("d{i}"))])
                .unwrap();
        }
        tx.delete(w.dept, &Key::from(11)).unwrap();
        tx.commit().unwrap();
        assert_eq!(w.store.row_count(w.dept), 6);
    }

    #[test]
    fn test_single_statement_mode_in_small_batches() {
        let w = world_with(FlushConfig {
            execution_mode: ExecutionMode::Single,
            max_batch_size: 2,
        });
        let mut tx = w.manager.begin(TxId(1));
        for i in 20..25 {
            tx.table_view(w.dept)
                .unwrap()
                .insert(Key::from(i), vec![Value::from(format!("d{i}"))])
                .unwrap();
        }
        tx.commit().unwrap();
        assert_eq!(w.store.row_count(w.dept), 7);
        assert_eq!(w.store.statements().len(), 5);
        let cache = w.manager.cache(w.dept).unwrap();
        for i in 20..25 {
            assert!(cache.contains(TxId(2), &Key::from(i)));
        }
    }

    #[test]
    fn test_deferred_create_is_skipped() {
        let w = world();
        let mut tx = w.manager.begin(TxId(1));
        tx.table_view(w.audit)
            .unwrap()
            .insert(Key::from(1), vec![Value::from("note")])
            .unwrap();
        tx.commit().unwrap();
        assert!(w.store.statements().is_empty());
        assert!(!w.store.contains(w.audit, &Key::from(1)));
    }

    #[test]
    fn test_reinsert_after_delete_in_one_transaction() {
        let w = world();
        let mut tx = w.manager.begin(TxId(1));
        tx.delete(w.dept, &Key::from(11)).unwrap();
        tx.table_view(w.dept)
            .unwrap()
            .insert(Key::from(11), vec![Value::from("ops v2")])
            .unwrap();
        tx.commit().unwrap();
        assert_eq!(
            w.store.row(w.dept, &Key::from(11)),
            Some(vec![Value::from("ops v2")])
        );
        assert_eq!(
            w.manager
                .cache(w.dept)
                .unwrap()
                .get_fields(TxId(2), &Key::from(11)),
            Some(vec![Value::from("ops v2")])
        );
    }

    #[test]
    fn test_link_cancellation_issues_nothing() {
        let w = world();
        let mut tx = w.manager.begin(TxId(1));
        let links = tx.relation_view(w.emp_project).unwrap();
        links.add_keys(Key::from(1), Key::from(101));
        links.remove_keys(Key::from(1), Key::from(101));
        assert!(links.is_empty());
        tx.commit().unwrap();
        assert!(w.store.statements().is_empty());
        assert!(!w.store.has_link(w.emp_project, &Key::from(1), &Key::from(101)));
        assert!(w.store.contains(w.project, &Key::from(101)));
    }

    #[test]
    fn test_optimistic_locks_across_transactions() {
        let w = world();
        let mut t1 = w.manager.begin(TxId(1));
        let mut t2 = w.manager.begin(TxId(2));
        t1.load(w.emp, &Key::from(1)).unwrap().unwrap();
        t1.lock_for_update(w.emp, &Key::from(1)).unwrap();
        assert_eq!(
            t2.lock_for_update(w.emp, &Key::from(1)),
            Err(Error::LockRejected)
        );
        assert_eq!(
            t2.release_lock(w.emp, &Key::from(1)),
            Err(Error::LockReleaseRejected)
        );

        // The locked cache entry is invisible to t2, so it reads through to the store.
        let selects = w.store.selects();
        t2.load(w.emp, &Key::from(1)).unwrap().unwrap();
        assert_eq!(w.store.selects(), selects + 1);

        t1.release_lock(w.emp, &Key::from(1)).unwrap();
        t2.lock_for_update(w.emp, &Key::from(1)).unwrap();
        t2.release_lock(w.emp, &Key::from(1)).unwrap();
        t1.rollback().unwrap();
        t2.rollback().unwrap();
    }
}
