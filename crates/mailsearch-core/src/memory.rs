//! In-memory entity source.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::entity::{EntityRestClient, Instance, OwnerKeyProvider, TypeRef};
use crate::model::{ElementId, ListId};
use crate::{Error, Result};

type Key = (TypeRef, Option<ListId>, ElementId);

/// Callback run whenever a range of a list is requested.
pub type RangeHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Failure to simulate for an element or list id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// The instance is gone.
    NotFound,
    /// Access was revoked.
    NotAuthorized,
    /// The source is unreachable.
    Connection,
    /// The source rejects the request.
    Rest,
}

impl InjectedFailure {
    fn to_error(self, id: &str) -> Error {
        match self {
            Self::NotFound => Error::NotFound(id.to_string()),
            Self::NotAuthorized => Error::NotAuthorized(id.to_string()),
            Self::Connection => Error::Connection(format!("lost connection loading {id}")),
            Self::Rest => Error::Rest(format!("request for {id} rejected")),
        }
    }
}

/// An [`EntityRestClient`] over a fixed set of instances.
///
/// Instances are already decrypted, so key providers are not needed; the ids
/// a session key was supplied for are recorded. Failures can be injected per element id (for `load` and
/// `load_multiple`) or per list id (for `load_range`).
#[derive(Default)]
pub struct InMemoryEntityClient {
    instances: RwLock<BTreeMap<Key, Instance>>,
    failures: RwLock<HashMap<String, InjectedFailure>>,
    connection_lost: AtomicBool,
    range_hook: RwLock<Option<RangeHook>>,
    keyed_ids: RwLock<Vec<ElementId>>,
    load_calls: AtomicUsize,
    range_calls: AtomicUsize,
}

impl std::fmt::Debug for InMemoryEntityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEntityClient")
            .field("instances", &self.instances.read().len())
            .field("connection_lost", &self.connection_lost.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl InMemoryEntityClient {
    /// Creates an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client holding the given instances.
    #[must_use]
    pub fn from_instances(instances: impl IntoIterator<Item = Instance>) -> Self {
        let client = Self::new();
        for instance in instances {
            client.insert(instance);
        }
        client
    }

    /// Adds or replaces an instance.
    pub fn insert(&self, instance: Instance) {
        let key = key_of(&instance);
        self.instances.write().insert(key, instance);
    }

    /// Removes an instance.
    pub fn remove(&self, type_ref: TypeRef, list_id: Option<&str>, element_id: &str) {
        self.instances.write().remove(&(
            type_ref,
            list_id.map(ToString::to_string),
            element_id.to_string(),
        ));
    }

    /// All instances.
    #[must_use]
    pub fn instances(&self) -> Vec<Instance> {
        self.instances.read().values().cloned().collect()
    }

    /// Makes every request for `id` fail.
    pub fn fail_on(&self, id: impl Into<String>, failure: InjectedFailure) {
        self.failures.write().insert(id.into(), failure);
    }

    /// Removes an injected failure.
    pub fn clear_failure(&self, id: &str) {
        self.failures.write().remove(id);
    }

    /// Makes every request fail with [`Error::Connection`] while set.
    pub fn set_connection_lost(&self, lost: bool) {
        self.connection_lost.store(lost, Ordering::SeqCst);
    }

    /// Registers a callback invoked with the list id of every range request.
    pub fn set_range_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.range_hook.write() = Some(Arc::new(hook));
    }

    /// Number of `load` and `load_multiple` requests served so far.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    /// Element ids that `load_multiple` was given a session key for.
    #[must_use]
    pub fn keyed_ids(&self) -> Vec<ElementId> {
        self.keyed_ids.read().clone()
    }

    /// Number of `load_range` requests served so far.
    #[must_use]
    pub fn range_count(&self) -> usize {
        self.range_calls.load(Ordering::SeqCst)
    }

    fn check_connection(&self) -> Result<()> {
        if self.connection_lost.load(Ordering::SeqCst) {
            return Err(Error::Connection("offline".to_string()));
        }
        Ok(())
    }

    fn failure(&self, id: &str) -> Option<InjectedFailure> {
        self.failures.read().get(id).copied()
    }
}

fn key_of(instance: &Instance) -> Key {
    (
        instance.type_ref(),
        instance.list_id().map(ToString::to_string),
        instance.element_id().to_string(),
    )
}

#[async_trait]
impl EntityRestClient for InMemoryEntityClient {
    async fn load(
        &self,
        type_ref: TypeRef,
        list_id: Option<&str>,
        element_id: &str,
    ) -> Result<Instance> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        self.check_connection()?;
        if let Some(failure) = self.failure(element_id) {
            return Err(failure.to_error(element_id));
        }

        self.instances
            .read()
            .get(&(
                type_ref,
                list_id.map(ToString::to_string),
                element_id.to_string(),
            ))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{type_ref:?} {element_id}")))
    }

    async fn load_multiple(
        &self,
        type_ref: TypeRef,
        list_id: Option<&str>,
        element_ids: &[ElementId],
        key_provider: Option<&OwnerKeyProvider>,
    ) -> Result<Vec<Instance>> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        self.check_connection()?;
        if let Some(keys) = key_provider {
            self.keyed_ids.write().extend(
                element_ids
                    .iter()
                    .filter(|id| keys.get(id.as_str()).is_some())
                    .cloned(),
            );
        }

        let instances = self.instances.read();
        let mut loaded = Vec::with_capacity(element_ids.len());
        for element_id in element_ids {
            match self.failure(element_id) {
                Some(InjectedFailure::NotFound | InjectedFailure::NotAuthorized) => {
                    debug!(element_id, "Leaving out unavailable instance");
                    continue;
                }
                Some(failure) => return Err(failure.to_error(element_id)),
                None => {}
            }
            let key = (
                type_ref,
                list_id.map(ToString::to_string),
                element_id.clone(),
            );
            if let Some(instance) = instances.get(&key) {
                loaded.push(instance.clone());
            }
        }
        Ok(loaded)
    }

    async fn load_range(
        &self,
        type_ref: TypeRef,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<Vec<Instance>> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        let hook = self.range_hook.read().clone();
        if let Some(hook) = hook {
            hook(list_id);
        }
        self.check_connection()?;
        if let Some(failure) = self.failure(list_id) {
            return Err(failure.to_error(list_id));
        }

        let instances = self.instances.read();
        let in_list = instances
            .iter()
            .filter(|((t, l, _), _)| *t == type_ref && l.as_deref() == Some(list_id));
        let page = if reverse {
            in_list
                .rev()
                .filter(|((_, _, id), _)| id.as_str() < start)
                .take(count)
                .map(|(_, instance)| instance.clone())
                .collect()
        } else {
            in_list
                .filter(|((_, _, id), _)| id.as_str() > start)
                .take(count)
                .map(|(_, instance)| instance.clone())
                .collect()
        };
        Ok(page)
    }
}
