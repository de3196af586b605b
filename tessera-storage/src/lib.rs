//! Tessera Storage - In-Process Indexed Cache Engine
//!
//! An [`Engine`] owns named [`Cache`]s. Each cache stores binary values
//! under unique keys, keeps secondary indexes over the fields its schema
//! declares, answers scan, index, text and projection queries through
//! [`QueryCursor`]s, and takes part in thread-bound [`Transaction`]s.

mod cache;
mod cursor;
mod engine;
mod index;
pub mod query;
mod stats;
mod tx;
mod typed;

pub use cache::{Cache, CacheEntry};
pub use cursor::{CursorItems, CursorIter, CursorState, QueryCursor};
pub use engine::Engine;
pub use query::{Criterion, EntryQuery, FieldsQuery, IndexQuery, ScanQuery, TextQuery};
pub use stats::CacheStats;
pub use tx::{Transaction, TransactionCoordinator};
pub use typed::TypedCache;

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use tessera_core::{CacheConfig, EngineConfig, FieldDef, FieldKind, Schema, Value};

    #[derive(Debug, Clone)]
    enum Op {
        Put(i64, i64),
        Remove(i64),
        PutIfAbsent(i64, i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0i64..20, 0i64..5).prop_map(|(k, v)| Op::Put(k, v)),
            (0i64..20).prop_map(Op::Remove),
            (0i64..20, 0i64..5).prop_map(|(k, v)| Op::PutIfAbsent(k, v)),
        ]
    }

    fn scalar_cache() -> Cache {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let schema = Schema::scalar(FieldDef::new("value", FieldKind::Int).sorted());
        engine
            .create_cache(CacheConfig::new("numbers").with_schema(schema))
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Size always equals the number of distinct live keys.
        #[test]
        fn prop_size_tracks_distinct_keys(ops in prop::collection::vec(op_strategy(), 0..60)) {
            let cache = scalar_cache();
            let mut model = BTreeMap::new();
            for op in ops {
                match op {
                    Op::Put(k, v) => {
                        cache.put(k, v).unwrap();
                        model.insert(k, v);
                    }
                    Op::Remove(k) => {
                        prop_assert_eq!(cache.remove(k).unwrap(), model.remove(&k).is_some());
                    }
                    Op::PutIfAbsent(k, v) => {
                        let stored = cache.put_if_absent(k, v).unwrap();
                        prop_assert_eq!(stored, !model.contains_key(&k));
                        model.entry(k).or_insert(v);
                    }
                }
            }
            prop_assert_eq!(cache.size(), model.len());
        }

        /// An indexed equality query returns exactly what a scan filter does.
        #[test]
        fn prop_index_matches_scan(
            entries in prop::collection::vec((0i64..50, 0i64..5), 0..40),
            wanted in 0i64..5,
        ) {
            let cache = scalar_cache();
            for (k, v) in &entries {
                cache.put(*k, *v).unwrap();
            }

            let mut by_index: Vec<Value> = cache
                .query(IndexQuery::new().and(query::eq("value", wanted)))
                .unwrap()
                .into_items()
                .unwrap()
                .map(|e| e.key)
                .collect();
            let mut by_scan: Vec<Value> = cache
                .query(ScanQuery::new(move |_, v| v.as_i64() == Some(wanted)))
                .unwrap()
                .into_items()
                .unwrap()
                .map(|e| e.key)
                .collect();
            by_index.sort();
            by_scan.sort();
            prop_assert_eq!(by_index, by_scan);
        }

        /// Sorted range queries agree with a filter over the model.
        #[test]
        fn prop_range_matches_model(
            entries in prop::collection::btree_map(0i64..100, -50i64..50, 0..40),
            low in -50i64..50,
        ) {
            let cache = scalar_cache();
            cache.put_all(entries.iter().map(|(k, v)| (*k, *v))).unwrap();

            let mut found: Vec<i64> = cache
                .query(IndexQuery::new().and(query::ge("value", low)))
                .unwrap()
                .into_items()
                .unwrap()
                .filter_map(|e| e.key.as_i64())
                .collect();
            found.sort();
            let expected: Vec<i64> = entries
                .iter()
                .filter(|(_, v)| **v >= low)
                .map(|(k, _)| *k)
                .collect();
            prop_assert_eq!(found, expected);
        }
    }
}
