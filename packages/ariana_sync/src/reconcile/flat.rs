use serde_json::Value;
use tracing::warn;

use super::{Entity, decode_many, decode_one, list_payload};
use crate::protocol::DeltaOp;

/// Keyed, unordered collection patched by deltas. Ids are unique: adds of an
/// id already present replace that entity in place.
#[derive(Debug, Clone)]
pub struct FlatCollection<T> {
    items: Vec<T>,
}

impl<T> Default for FlatCollection<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Entity> FlatCollection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn replace_all(&mut self, incoming: Vec<T>) {
        self.items.clear();
        self.extend(incoming);
    }

    /// Drop every entity matching `scope`, then add `incoming`. Used for
    /// snapshots that cover only part of the collection.
    pub fn replace_where(&mut self, scope: impl Fn(&T) -> bool, incoming: Vec<T>) {
        self.items.retain(|item| !scope(item));
        self.extend(incoming);
    }

    /// Full snapshot payload.
    pub fn apply_snapshot(&mut self, data: &Value) {
        self.replace_all(list_payload(data));
    }

    /// Returns whether the collection changed.
    pub fn apply_delta(&mut self, op: &DeltaOp) -> bool {
        match op {
            DeltaOp::Add { item } => match decode_one(item) {
                Some(item) => {
                    self.upsert(item);
                    true
                }
                None => false,
            },
            DeltaOp::AddBatch { items } => {
                let items = decode_many(items);
                let changed = !items.is_empty();
                self.extend(items);
                changed
            }
            DeltaOp::Modify {
                item_id, changes, ..
            } => match changes {
                Some(changes) => self.modify(item_id, changes),
                None => false,
            },
            DeltaOp::Delete { item_id } => {
                let before = self.items.len();
                self.items.retain(|item| item.id() != item_id);
                self.items.len() != before
            }
            DeltaOp::Replace { item } => {
                self.replace_all(list_payload(item));
                true
            }
        }
    }

    fn extend(&mut self, incoming: Vec<T>) {
        for item in incoming {
            self.upsert(item);
        }
    }

    fn upsert(&mut self, item: T) {
        match self.items.iter_mut().find(|existing| existing.id() == item.id()) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
    }

    /// Shallow merge: top-level fields of `changes` overwrite the entity's.
    fn modify(&mut self, id: &str, changes: &serde_json::Map<String, Value>) -> bool {
        let Some(existing) = self.items.iter_mut().find(|item| item.id() == id) else {
            return false;
        };
        let mut value = match serde_json::to_value(&*existing) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return false,
            Err(e) => {
                warn!(collection = T::COLLECTION, %id, error = %e, "failed to encode entity");
                return false;
            }
        };
        for (field, v) in changes {
            value.insert(field.clone(), v.clone());
        }
        match serde_json::from_value::<T>(Value::Object(value)) {
            Ok(updated) => {
                *existing = updated;
                true
            }
            Err(e) => {
                warn!(
                    collection = T::COLLECTION,
                    %id,
                    error = %e,
                    "modify produced an invalid entity, keeping old value"
                );
                false
            }
        }
    }
}
