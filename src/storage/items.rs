//! Derived item copies kept in the owning actor's flags.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{FlagBatch, FlagStore, Scope};
use crate::core::types::ActorRef;
use crate::error::{OverlayError, Result};
use crate::ports::{DerivedItemFactory, DerivedItemSpec, ItemRef};

/// Prefix of the per-item keys in an actor's scope.
pub const ITEM_KEY_PREFIX: &str = "derived_item:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredItem {
    pub id: ItemRef,
    #[serde(flatten)]
    pub spec: DerivedItemSpec,
}

fn item_key(id: &ItemRef) -> String {
    format!("{ITEM_KEY_PREFIX}{}", id.0)
}

/// Item factory that persists each item as its own actor-scoped flag.
///
/// Items never share a key, so creating or discarding items for one class
/// cannot overwrite items written for another class of the same actor.
/// Creation is its own write, separate from the class commit; the applicator
/// discards the items again if that commit fails.
#[derive(Clone)]
pub struct StoreItemFactory {
    store: Arc<dyn FlagStore>,
}

impl StoreItemFactory {
    pub fn new(store: Arc<dyn FlagStore>) -> Self {
        Self { store }
    }

    pub fn items(&self, owner: &ActorRef) -> Result<BTreeMap<ItemRef, StoredItem>> {
        let scope = Scope::actor(owner.id.as_str());
        let mut items = BTreeMap::new();
        for key in self.store.list_keys(&scope, ITEM_KEY_PREFIX)? {
            let Some(value) = self.store.get(&scope, &key)? else {
                continue;
            };
            let item: StoredItem = serde_json::from_value(value).map_err(|err| {
                OverlayError::Serialization(format!("decode {scope} {key}: {err}"))
            })?;
            items.insert(item.id.clone(), item);
        }
        Ok(items)
    }
}

impl DerivedItemFactory for StoreItemFactory {
    fn create_derived_items(
        &self,
        owner: &ActorRef,
        specs: &[DerivedItemSpec],
    ) -> Result<Vec<ItemRef>> {
        let scope = Scope::actor(owner.id.as_str());
        let mut batch = FlagBatch::new();
        let mut created = Vec::with_capacity(specs.len());
        for spec in specs {
            let id = ItemRef(Uuid::new_v4().to_string());
            let item = StoredItem {
                id: id.clone(),
                spec: spec.clone(),
            };
            batch = batch.set(scope.clone(), item_key(&id), serde_json::to_value(item)?);
            created.push(id);
        }
        if !batch.is_empty() {
            self.store.commit(batch)?;
        }
        Ok(created)
    }

    fn discard_items(&self, owner: &ActorRef, discard: &[ItemRef]) -> Result<()> {
        let scope = Scope::actor(owner.id.as_str());
        let batch = discard
            .iter()
            .fold(FlagBatch::new(), |batch, id| batch.unset(scope.clone(), item_key(id)));
        if batch.is_empty() {
            return Ok(());
        }
        self.store.commit(batch)
    }
}
