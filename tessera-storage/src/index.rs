//! Secondary field indexes.
//!
//! One index per schema field declared with an [`IndexKind`]. Each index maps
//! field values to the keys carrying them, and keeps the reverse mapping from
//! key to field value so that updates never need the previous entry and
//! multi-criteria plans can intersect by membership.
//!
//! Index structures are written only from the store's mutation path while the
//! mutated key is locked, so postings for one key never race with each other.

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tessera_core::{CompareOp, IndexKind, Schema, Value};
use thiserror::Error;

use crate::query::Criterion;

/// An index lock was poisoned by a panicking writer; its contents can no
/// longer be trusted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("index on field {field} is poisoned")]
pub(crate) struct IndexPoisoned {
    pub field: String,
}

#[derive(Debug)]
struct FieldIndex {
    /// field value -> keys
    postings: HashMap<Value, BTreeSet<Value>>,
    /// Distinct field values in order. Present only for sorted indexes.
    ordered: Option<BTreeSet<Value>>,
    /// key -> field value
    values: HashMap<Value, Value>,
}

impl FieldIndex {
    fn new(kind: IndexKind) -> Self {
        Self {
            postings: HashMap::new(),
            ordered: match kind {
                IndexKind::Sorted => Some(BTreeSet::new()),
                IndexKind::Hash => None,
            },
            values: HashMap::new(),
        }
    }

    fn set(&mut self, key: &Value, field_value: Option<&Value>) {
        let previous = match field_value {
            Some(new) => self.values.insert(key.clone(), new.clone()),
            None => self.values.remove(key),
        };
        if previous.as_ref() == field_value {
            return;
        }
        if let Some(old) = previous {
            self.unlink(key, &old);
        }
        if let Some(new) = field_value {
            self.postings.entry(new.clone()).or_default().insert(key.clone());
            if let Some(ordered) = &mut self.ordered {
                ordered.insert(new.clone());
            }
        }
    }

    fn unlink(&mut self, key: &Value, old: &Value) {
        let Some(keys) = self.postings.get_mut(old) else {
            return;
        };
        keys.remove(key);
        if keys.is_empty() {
            self.postings.remove(old);
            if let Some(ordered) = &mut self.ordered {
                ordered.remove(old);
            }
        }
    }

    fn lookup(&self, op: CompareOp, value: &Value) -> BTreeSet<Value> {
        if op == CompareOp::Eq {
            return self.postings.get(value).cloned().unwrap_or_default();
        }

        let Some(ordered) = &self.ordered else {
            return self
                .values
                .iter()
                .filter(|(_, field_value)| op.accepts((*field_value).cmp(value)))
                .map(|(key, _)| key.clone())
                .collect();
        };

        let bounds: (Bound<&Value>, Bound<&Value>) = match op {
            CompareOp::Gt => (Bound::Excluded(value), Bound::Unbounded),
            CompareOp::Ge => (Bound::Included(value), Bound::Unbounded),
            CompareOp::Lt => (Bound::Unbounded, Bound::Excluded(value)),
            CompareOp::Le => (Bound::Unbounded, Bound::Included(value)),
            CompareOp::Eq => (Bound::Included(value), Bound::Included(value)),
        };
        ordered
            .range::<Value, _>(bounds)
            .filter_map(|field_value| self.postings.get(field_value))
            .flatten()
            .cloned()
            .collect()
    }

    fn estimate(&self, op: CompareOp, value: &Value) -> usize {
        match op {
            CompareOp::Eq => self.postings.get(value).map_or(0, BTreeSet::len),
            _ => self.values.len() / 3,
        }
    }

    fn accepts(&self, key: &Value, op: CompareOp, value: &Value) -> bool {
        self.values
            .get(key)
            .is_some_and(|field_value| op.accepts(field_value.cmp(value)))
    }
}

#[derive(Debug)]
struct IndexSlot {
    field: String,
    index: RwLock<FieldIndex>,
}

impl IndexSlot {
    fn read(&self) -> Result<RwLockReadGuard<'_, FieldIndex>, IndexPoisoned> {
        self.index.read().map_err(|_| IndexPoisoned {
            field: self.field.clone(),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, FieldIndex>, IndexPoisoned> {
        self.index.write().map_err(|_| IndexPoisoned {
            field: self.field.clone(),
        })
    }
}

/// All field indexes of one cache.
#[derive(Debug)]
pub(crate) struct IndexManager {
    slots: Vec<IndexSlot>,
}

impl IndexManager {
    pub fn new(schema: &Schema) -> Self {
        let slots = schema
            .indexed_fields()
            .filter_map(|def| {
                def.index().map(|kind| IndexSlot {
                    field: def.name().to_string(),
                    index: RwLock::new(FieldIndex::new(kind)),
                })
            })
            .collect();
        Self { slots }
    }

    fn slot(&self, field: &str) -> Option<&IndexSlot> {
        self.slots.iter().find(|slot| slot.field == field)
    }

    /// Reflect the new value of `key` (`None` when removed) in every index.
    pub fn update(&self, schema: &Schema, key: &Value, value: Option<&Value>) -> Result<(), IndexPoisoned> {
        for slot in &self.slots {
            let field_value = value.and_then(|v| schema.extract(&slot.field, v));
            slot.write()?.set(key, field_value);
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<(), IndexPoisoned> {
        for slot in &self.slots {
            let mut index = slot.write()?;
            index.postings.clear();
            index.values.clear();
            if let Some(ordered) = &mut index.ordered {
                ordered.clear();
            }
        }
        Ok(())
    }

    /// Poison every index lock by panicking while holding it.
    #[cfg(test)]
    pub fn poison(&self) {
        for slot in &self.slots {
            let _ = std::thread::scope(|scope| {
                scope
                    .spawn(|| {
                        let _guard = slot.index.write();
                        panic!("poisoning index on {}", slot.field);
                    })
                    .join()
            });
        }
    }

    /// Keys satisfying every criterion according to the indexes.
    ///
    /// The criterion with the smallest estimate runs first (ties keep
    /// declaration order); the remaining ones narrow that candidate set by
    /// membership. Criteria on fields without an index are ignored here.
    pub fn candidates(&self, cache: &str, criteria: &[Criterion]) -> Result<BTreeSet<Value>, IndexPoisoned> {
        let mut plan = Vec::with_capacity(criteria.len());
        for criterion in criteria {
            if let Some(slot) = self.slot(criterion.field()) {
                let estimate = slot.read()?.estimate(criterion.op(), criterion.value());
                plan.push((slot, criterion, estimate));
            }
        }
        plan.sort_by_key(|(_, _, estimate)| *estimate);

        let mut steps = plan.into_iter();
        let Some((first, criterion, estimate)) = steps.next() else {
            return Ok(BTreeSet::new());
        };
        let mut candidates = first.read()?.lookup(criterion.op(), criterion.value());
        tracing::trace!(
            cache,
            field = %criterion.field(),
            op = %criterion.op(),
            estimate,
            candidates = candidates.len(),
            "Index plan: leading criterion"
        );

        for (slot, criterion, _) in steps {
            if candidates.is_empty() {
                break;
            }
            let index = slot.read()?;
            candidates.retain(|key| index.accepts(key, criterion.op(), criterion.value()));
            tracing::trace!(
                cache,
                field = %criterion.field(),
                op = %criterion.op(),
                candidates = candidates.len(),
                "Index plan: narrowed"
            );
        }
        Ok(candidates)
    }
}
