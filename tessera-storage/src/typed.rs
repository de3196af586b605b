//! Typed view over a cache.
//!
//! The cache itself stores binary objects; this view converts keys and
//! values through `serde` on the way in and out. Values stored as records
//! take the schema's type name.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tessera_core::{TesseraResult, Value};

use crate::cache::Cache;
use crate::cursor::QueryCursor;
use crate::query::EntryQuery;

pub struct TypedCache<K, V> {
    cache: Cache,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for TypedCache<K, V> {
    fn clone(&self) -> Self {
        Self::new(self.cache.clone())
    }
}

impl<K, V> fmt::Debug for TypedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedCache").field("cache", &self.cache).finish()
    }
}

impl<K, V> TypedCache<K, V> {
    pub(crate) fn new(cache: Cache) -> Self {
        Self {
            cache,
            _types: PhantomData,
        }
    }

    /// The binary view of the same cache.
    pub fn binary(&self) -> &Cache {
        &self.cache
    }
}

impl<K, V> TypedCache<K, V>
where
    K: Serialize + DeserializeOwned + 'static,
    V: Serialize + DeserializeOwned + 'static,
{
    fn encode_key(&self, key: &K) -> TesseraResult<Value> {
        Ok(Value::from_typed(key)?)
    }

    fn encode_value(&self, value: &V) -> TesseraResult<Value> {
        let encoded = Value::from_typed(value)?;
        Ok(match (self.cache.schema().type_name(), encoded) {
            (Some(type_name), Value::Record(object)) => Value::Record(object.with_type_name(type_name)),
            (_, other) => other,
        })
    }

    pub fn put(&self, key: &K, value: &V) -> TesseraResult<()> {
        self.cache.put(self.encode_key(key)?, self.encode_value(value)?)
    }

    pub fn get(&self, key: &K) -> TesseraResult<Option<V>> {
        match self.cache.get(self.encode_key(key)?)? {
            Some(value) => Ok(Some(value.to_typed()?)),
            None => Ok(None),
        }
    }

    pub fn insert(&self, key: &K, value: &V) -> TesseraResult<()> {
        self.cache.insert(self.encode_key(key)?, self.encode_value(value)?)
    }

    pub fn put_if_absent(&self, key: &K, value: &V) -> TesseraResult<bool> {
        self.cache
            .put_if_absent(self.encode_key(key)?, self.encode_value(value)?)
    }

    pub fn replace(&self, key: &K, old: &V, new: &V) -> TesseraResult<bool> {
        self.cache.replace(
            self.encode_key(key)?,
            self.encode_value(old)?,
            self.encode_value(new)?,
        )
    }

    pub fn remove(&self, key: &K) -> TesseraResult<bool> {
        self.cache.remove(self.encode_key(key)?)
    }

    /// Query and decode each entry; decoding failures surface per item.
    pub fn query(&self, query: impl Into<EntryQuery>) -> TesseraResult<QueryCursor<TesseraResult<(K, V)>>> {
        let cursor = self.cache.query(query)?;
        Ok(cursor.map(|entry| -> TesseraResult<(K, V)> {
            Ok((entry.key.to_typed()?, entry.value.to_typed()?))
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::query::{eq, IndexQuery};
    use crate::Engine;
    use serde::{Deserialize, Serialize};
    use tessera_core::{CacheConfig, EngineConfig, FieldDef, FieldKind, Schema, Value};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Organization {
        id: i64,
        name: String,
    }

    fn cache() -> crate::Cache {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let schema = Schema::record("Organization")
            .field(FieldDef::new("id", FieldKind::Int).sorted())
            .field(FieldDef::new("name", FieldKind::String).hashed());
        engine
            .create_cache(CacheConfig::new("orgs").with_schema(schema))
            .unwrap()
    }

    #[test]
    fn test_typed_and_binary_views_agree() {
        let cache = cache();
        let orgs = cache.typed::<i64, Organization>();
        let acme = Organization {
            id: 1,
            name: "ACME".to_string(),
        };
        orgs.put(&1, &acme).unwrap();

        assert_eq!(orgs.get(&1).unwrap(), Some(acme.clone()));

        let binary = cache.get(1).unwrap().unwrap();
        let object = binary.as_record().unwrap();
        assert_eq!(object.type_name(), Some("Organization"));
        assert_eq!(object.field("name"), Some(&Value::from("ACME")));
    }

    #[test]
    fn test_typed_query() {
        let cache = cache();
        let orgs = cache.typed::<i64, Organization>();
        for (id, name) in [(1, "ACME"), (2, "Other")] {
            orgs.put(&id, &Organization { id, name: name.to_string() }).unwrap();
        }

        let mut cursor = orgs.query(IndexQuery::new().and(eq("name", "Other"))).unwrap();
        let found = cursor.try_get_all().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, 2);
        assert_eq!(found[0].1.name, "Other");
    }

    #[test]
    fn test_typed_replace_and_remove() {
        let cache = cache();
        let orgs = cache.typed::<i64, Organization>();
        let before = Organization { id: 1, name: "A".to_string() };
        let after = Organization { id: 1, name: "B".to_string() };
        orgs.put(&1, &before).unwrap();

        assert!(!orgs.replace(&1, &after, &before).unwrap());
        assert!(orgs.replace(&1, &before, &after).unwrap());
        assert_eq!(orgs.get(&1).unwrap(), Some(after));
        assert!(orgs.remove(&1).unwrap());
        assert_eq!(orgs.get(&1).unwrap(), None);
    }
}
