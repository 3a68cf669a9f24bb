//! Short-lived entity cache for a single indexing run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::Result;
use crate::entity::{EntityCache, EntityRestClient, Instance, OwnerKeyProvider, TypeRef};
use crate::model::{ElementId, ListId};

type Key = (TypeRef, Option<ListId>, ElementId);

fn key(type_ref: TypeRef, list_id: Option<&str>, element_id: &str) -> Key {
    (
        type_ref,
        list_id.map(ToString::to_string),
        element_id.to_string(),
    )
}

/// Keeps everything loaded through it in memory until evicted.
///
/// Used when no persistent offline cache exists, so repeated reads of the
/// same mail within one run do not hit the source twice.
pub struct EphemeralEntityCache {
    target: Arc<dyn EntityRestClient>,
    entries: RwLock<HashMap<Key, Instance>>,
}

impl std::fmt::Debug for EphemeralEntityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralEntityCache")
            .field("entries", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}

impl EphemeralEntityCache {
    /// Creates an empty cache in front of `target`.
    #[must_use]
    pub fn new(target: Arc<dyn EntityRestClient>) -> Self {
        Self {
            target,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of cached instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn remember(&self, instances: &[Instance]) {
        let mut entries = self.entries.write();
        for instance in instances {
            entries.insert(
                key(instance.type_ref(), instance.list_id(), instance.element_id()),
                instance.clone(),
            );
        }
    }
}

#[async_trait]
impl EntityRestClient for EphemeralEntityCache {
    async fn load(
        &self,
        type_ref: TypeRef,
        list_id: Option<&str>,
        element_id: &str,
    ) -> Result<Instance> {
        let cached = self
            .entries
            .read()
            .get(&key(type_ref, list_id, element_id))
            .cloned();
        if let Some(instance) = cached {
            return Ok(instance);
        }

        let instance = self.target.load(type_ref, list_id, element_id).await?;
        self.remember(std::slice::from_ref(&instance));
        Ok(instance)
    }

    async fn load_multiple(
        &self,
        type_ref: TypeRef,
        list_id: Option<&str>,
        element_ids: &[ElementId],
        key_provider: Option<&OwnerKeyProvider>,
    ) -> Result<Vec<Instance>> {
        let (cached, missing): (Vec<Option<Instance>>, Vec<ElementId>) = {
            let entries = self.entries.read();
            let cached = element_ids
                .iter()
                .map(|id| entries.get(&key(type_ref, list_id, id)).cloned())
                .collect::<Vec<_>>();
            let missing = element_ids
                .iter()
                .zip(&cached)
                .filter(|(_, hit)| hit.is_none())
                .map(|(id, _)| id.clone())
                .collect();
            (cached, missing)
        };

        let mut loaded: HashMap<ElementId, Instance> = HashMap::new();
        if !missing.is_empty() {
            let fetched = self
                .target
                .load_multiple(type_ref, list_id, &missing, key_provider)
                .await?;
            self.remember(&fetched);
            loaded = fetched
                .into_iter()
                .map(|instance| (instance.element_id().to_string(), instance))
                .collect();
        }

        Ok(element_ids
            .iter()
            .zip(cached)
            .filter_map(|(id, hit)| hit.or_else(|| loaded.remove(id)))
            .collect())
    }

    async fn load_range(
        &self,
        type_ref: TypeRef,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<Vec<Instance>> {
        let page = self
            .target
            .load_range(type_ref, list_id, start, count, reverse)
            .await?;
        self.remember(&page);
        Ok(page)
    }
}

#[async_trait]
impl EntityCache for EphemeralEntityCache {
    async fn delete_from_cache_if_exists(
        &self,
        type_ref: TypeRef,
        list_id: Option<&str>,
        element_id: &str,
    ) {
        self.entries
            .write()
            .remove(&key(type_ref, list_id, element_id));
    }
}
