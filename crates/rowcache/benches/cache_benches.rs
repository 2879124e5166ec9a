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

//! Shared-cache lookup throughput, and the cost of a full transaction flush against the
//! in-memory store.

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use rowcache::testing::MemoryStore;
use rowcache::{
    CacheManager, Key, PartitionedCache, RowCacheConfig, RowStore, SchemaBuilder, TableDef, TxId,
    Value,
};
use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, Instant};

const KEYS: i64 = 10_000;

fn warm_cache(partitions: usize) -> PartitionedCache {
    let cache = PartitionedCache::new(0, KEYS as usize, partitions);
    for i in 0..KEYS {
        cache.put(TxId(0), Key::from(i), vec![Value::Int(i)], None);
    }
    cache
}

pub fn lookup_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");
    group.throughput(Throughput::Elements(KEYS as u64));
    for partitions in [1, 16] {
        let cache = warm_cache(partitions);
        group.bench_function(format!("get_fields_{partitions}p"), |b| {
            b.iter(|| {
                for i in 0..KEYS {
                    black_box(cache.get_fields(TxId(1), &Key::from(i)));
                }
            });
        });
    }
    let cache = warm_cache(16);
    group.bench_function("put_overwrite_16p", |b| {
        b.iter(|| {
            for i in 0..KEYS {
                cache.put(TxId(1), Key::from(i), vec![Value::Int(i + 1)], None);
            }
        });
    });
    group.finish();
}

// Each iteration starts from an empty store: insert a batch of parents and children, commit.
fn flush_workload(iters: u64, rows: i64) -> Duration {
    let mut cumulative = Duration::ZERO;
    for _ in 0..iters {
        let mut builder = SchemaBuilder::new();
        let parent = builder
            .add_table(TableDef::new("parent", ["name"]))
            .unwrap();
        let child = builder
            .add_table(TableDef::new("child", ["parent_id"]))
            .unwrap();
        builder
            .add_foreign_key("child_parent", child, &[0], parent, false)
            .unwrap();
        let schema = Arc::new(builder.build());
        let store = Arc::new(MemoryStore::new(schema.clone()));
        let manager = CacheManager::new(
            schema,
            store as Arc<dyn RowStore>,
            RowCacheConfig::default(),
        );

        let start = Instant::now();
        let mut tx = manager.begin(TxId(1));
        for i in 0..rows {
            tx.table_view(child)
                .unwrap()
                .insert(Key::from(i), vec![Value::Int(i)])
                .unwrap();
            tx.table_view(parent)
                .unwrap()
                .insert(Key::from(i), vec![Value::from("p")])
                .unwrap();
        }
        tx.commit().unwrap();
        cumulative += start.elapsed();
    }
    cumulative
}

pub fn flush_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush");
    for rows in [100, 1_000] {
        group.throughput(Throughput::Elements(rows as u64 * 2));
        group.bench_function(format!("insert_commit_{rows}"), |b| {
            b.iter_custom(|iters| flush_workload(iters, rows));
        });
    }
    group.finish();
}

criterion_group!(benches, lookup_bench, flush_bench);
criterion_main!(benches);
