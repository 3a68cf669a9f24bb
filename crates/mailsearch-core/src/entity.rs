//! Entity loading.
//!
//! The indexer reads entities through [`EntityRestClient`], which is either a
//! direct client, an offline cache, or the short-lived
//! [`crate::EphemeralEntityCache`]. [`EntityClient`] adds typed access on top.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{
    ElementId, File, GENERATED_MIN_ID, Mail, MailBox, MailDetailsBlob, MailDetailsDraft,
    MailFolder, MailboxGroupRoot, OwnerEncSessionKey, User,
};
use crate::{Error, Result};

/// Page size of [`EntityClient::load_all`].
const LOAD_ALL_CHUNK: usize = 1000;

/// Entity types known to the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TypeRef {
    /// [`Mail`]
    Mail,
    /// [`MailDetailsBlob`]
    MailDetailsBlob,
    /// [`MailDetailsDraft`]
    MailDetailsDraft,
    /// [`File`]
    File,
    /// [`MailFolder`]
    MailFolder,
    /// [`MailBox`]
    MailBox,
    /// [`MailboxGroupRoot`]
    MailboxGroupRoot,
    /// [`User`]
    User,
}

/// Any loadable entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[allow(missing_docs)]
pub enum Instance {
    Mail(Mail),
    MailDetailsBlob(MailDetailsBlob),
    MailDetailsDraft(MailDetailsDraft),
    File(File),
    MailFolder(MailFolder),
    MailBox(MailBox),
    MailboxGroupRoot(MailboxGroupRoot),
    User(User),
}

/// A Rust type that maps onto one [`TypeRef`].
pub trait Entity: Sized + Clone + Send + Sync + 'static {
    /// Type of the entity.
    const TYPE_REF: TypeRef;

    /// List the instance lives in, for list entities.
    fn list_id(&self) -> Option<&str>;

    /// Element id of the instance.
    fn element_id(&self) -> &str;

    /// Wraps the instance.
    fn into_instance(self) -> Instance;

    /// Unwraps an instance of this type.
    fn from_instance(instance: Instance) -> Option<Self>;
}

macro_rules! list_entity {
    ($ty:ident) => {
        impl Entity for $ty {
            const TYPE_REF: TypeRef = TypeRef::$ty;

            fn list_id(&self) -> Option<&str> {
                Some(&self.id.list_id)
            }

            fn element_id(&self) -> &str {
                &self.id.element_id
            }

            fn into_instance(self) -> Instance {
                Instance::$ty(self)
            }

            fn from_instance(instance: Instance) -> Option<Self> {
                match instance {
                    Instance::$ty(entity) => Some(entity),
                    _ => None,
                }
            }
        }
    };
}

macro_rules! element_entity {
    ($ty:ident, $id:ident) => {
        impl Entity for $ty {
            const TYPE_REF: TypeRef = TypeRef::$ty;

            fn list_id(&self) -> Option<&str> {
                None
            }

            fn element_id(&self) -> &str {
                &self.$id
            }

            fn into_instance(self) -> Instance {
                Instance::$ty(self)
            }

            fn from_instance(instance: Instance) -> Option<Self> {
                match instance {
                    Instance::$ty(entity) => Some(entity),
                    _ => None,
                }
            }
        }
    };
}

list_entity!(Mail);
list_entity!(MailDetailsBlob);
list_entity!(MailDetailsDraft);
list_entity!(File);
list_entity!(MailFolder);
element_entity!(MailBox, id);
element_entity!(MailboxGroupRoot, group);
element_entity!(User, id);

impl Instance {
    /// Type of the wrapped entity.
    #[must_use]
    pub const fn type_ref(&self) -> TypeRef {
        match self {
            Self::Mail(_) => TypeRef::Mail,
            Self::MailDetailsBlob(_) => TypeRef::MailDetailsBlob,
            Self::MailDetailsDraft(_) => TypeRef::MailDetailsDraft,
            Self::File(_) => TypeRef::File,
            Self::MailFolder(_) => TypeRef::MailFolder,
            Self::MailBox(_) => TypeRef::MailBox,
            Self::MailboxGroupRoot(_) => TypeRef::MailboxGroupRoot,
            Self::User(_) => TypeRef::User,
        }
    }

    /// List of the wrapped entity, for list entities.
    #[must_use]
    pub fn list_id(&self) -> Option<&str> {
        match self {
            Self::Mail(e) => e.list_id(),
            Self::MailDetailsBlob(e) => e.list_id(),
            Self::MailDetailsDraft(e) => e.list_id(),
            Self::File(e) => e.list_id(),
            Self::MailFolder(e) => e.list_id(),
            Self::MailBox(e) => e.list_id(),
            Self::MailboxGroupRoot(e) => e.list_id(),
            Self::User(e) => e.list_id(),
        }
    }

    /// Element id of the wrapped entity.
    #[must_use]
    pub fn element_id(&self) -> &str {
        match self {
            Self::Mail(e) => e.element_id(),
            Self::MailDetailsBlob(e) => e.element_id(),
            Self::MailDetailsDraft(e) => e.element_id(),
            Self::File(e) => e.element_id(),
            Self::MailFolder(e) => e.element_id(),
            Self::MailBox(e) => e.element_id(),
            Self::MailboxGroupRoot(e) => e.element_id(),
            Self::User(e) => e.element_id(),
        }
    }
}

/// Session keys of the instances of a `load_multiple` request.
#[derive(Debug, Clone, Default)]
pub struct OwnerKeyProvider {
    keys: HashMap<ElementId, OwnerEncSessionKey>,
}

impl OwnerKeyProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the key of an instance.
    pub fn insert(&mut self, element_id: impl Into<ElementId>, key: OwnerEncSessionKey) {
        self.keys.insert(element_id.into(), key);
    }

    /// Key of an instance.
    #[must_use]
    pub fn get(&self, element_id: &str) -> Option<&OwnerEncSessionKey> {
        self.keys.get(element_id)
    }

    /// Number of registered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if no key is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Untyped access to entities.
#[async_trait]
pub trait EntityRestClient: Send + Sync {
    /// Loads one instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the instance does not exist.
    async fn load(
        &self,
        type_ref: TypeRef,
        list_id: Option<&str>,
        element_id: &str,
    ) -> Result<Instance>;

    /// Loads several instances of one list.
    ///
    /// Instances that do not exist or cannot be decrypted are left out of the
    /// result.
    ///
    /// # Errors
    ///
    /// Returns an error if the request as a whole fails.
    async fn load_multiple(
        &self,
        type_ref: TypeRef,
        list_id: Option<&str>,
        element_ids: &[ElementId],
        key_provider: Option<&OwnerKeyProvider>,
    ) -> Result<Vec<Instance>>;

    /// Loads up to `count` instances after (or, with `reverse`, before)
    /// `start`, ordered away from `start`. Fewer are returned only when the
    /// list is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn load_range(
        &self,
        type_ref: TypeRef,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<Vec<Instance>>;
}

/// A client that keeps loaded instances around.
#[async_trait]
pub trait EntityCache: EntityRestClient {
    /// Forgets an instance if it is cached.
    async fn delete_from_cache_if_exists(
        &self,
        type_ref: TypeRef,
        list_id: Option<&str>,
        element_id: &str,
    );
}

/// Result of [`EntityClient::load_reverse_range_between`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseRange<T> {
    /// Loaded elements, newest first.
    pub elements: Vec<T>,
    /// True if the list holds nothing older than the loaded elements.
    pub loaded_completely: bool,
}

/// Typed wrapper around an [`EntityRestClient`].
#[derive(Clone)]
pub struct EntityClient {
    target: Arc<dyn EntityRestClient>,
}

impl std::fmt::Debug for EntityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityClient").finish_non_exhaustive()
    }
}

impl EntityClient {
    /// Wraps a client.
    #[must_use]
    pub fn new(target: Arc<dyn EntityRestClient>) -> Self {
        Self { target }
    }

    /// Loads one instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if it does not exist, or
    /// [`Error::InvalidEntity`] if it is not a `T`.
    pub async fn load<T: Entity>(&self, list_id: Option<&str>, element_id: &str) -> Result<T> {
        let instance = self.target.load(T::TYPE_REF, list_id, element_id).await?;
        downcast(instance)
    }

    /// Loads several instances of one list.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn load_multiple<T: Entity>(
        &self,
        list_id: Option<&str>,
        element_ids: &[ElementId],
        key_provider: Option<&OwnerKeyProvider>,
    ) -> Result<Vec<T>> {
        if element_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.target
            .load_multiple(T::TYPE_REF, list_id, element_ids, key_provider)
            .await?
            .into_iter()
            .map(downcast)
            .collect()
    }

    /// Loads a range of instances.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn load_range<T: Entity>(
        &self,
        list_id: &str,
        start: &str,
        count: usize,
        reverse: bool,
    ) -> Result<Vec<T>> {
        self.target
            .load_range(T::TYPE_REF, list_id, start, count, reverse)
            .await?
            .into_iter()
            .map(downcast)
            .collect()
    }

    /// Loads every instance of a list, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if a request fails.
    pub async fn load_all<T: Entity>(&self, list_id: &str) -> Result<Vec<T>> {
        let mut all: Vec<T> = Vec::new();
        let mut start = GENERATED_MIN_ID.to_string();
        loop {
            let page: Vec<T> = self
                .load_range(list_id, &start, LOAD_ALL_CHUNK, false)
                .await?;
            let exhausted = page.len() < LOAD_ALL_CHUNK;
            if let Some(last) = page.last() {
                start = last.element_id().to_string();
            }
            all.extend(page);
            if exhausted {
                return Ok(all);
            }
        }
    }

    /// Loads the elements with ids below `start` and not below `end`, newest
    /// first, `count` at a time.
    ///
    /// Adjacent ranges sharing a bound therefore never skip an element lying
    /// exactly on it.
    ///
    /// Paging stops once a page is short or reaches past `end`.
    /// `loaded_completely` is true only if the last page was short and none of
    /// it lay beyond `end`, meaning the list holds nothing older.
    ///
    /// # Errors
    ///
    /// Returns an error if a request fails.
    pub async fn load_reverse_range_between<T: Entity>(
        &self,
        list_id: &str,
        start: &str,
        end: &str,
        count: usize,
    ) -> Result<ReverseRange<T>> {
        let mut elements = Vec::new();
        if count == 0 {
            return Ok(ReverseRange {
                elements,
                loaded_completely: false,
            });
        }
        let mut start = start.to_string();
        loop {
            let loaded: Vec<T> = self.load_range(list_id, &start, count, true).await?;
            let loaded_len = loaded.len();
            let last_loaded = loaded.last().map(|e| e.element_id().to_string());
            let filtered: Vec<T> = loaded
                .into_iter()
                .filter(|e| e.element_id() >= end)
                .collect();
            let last_filtered = filtered.last().map(|e| e.element_id().to_string());

            if filtered.len() == count {
                start = last_filtered.unwrap_or_default();
                elements.extend(filtered);
                continue;
            }

            let loaded_completely = loaded_len < count && last_loaded == last_filtered;
            elements.extend(filtered);
            debug!(
                list_id,
                count = elements.len(),
                loaded_completely,
                "Loaded reverse range"
            );
            return Ok(ReverseRange {
                elements,
                loaded_completely,
            });
        }
    }
}

fn downcast<T: Entity>(instance: Instance) -> Result<T> {
    let type_ref = instance.type_ref();
    T::from_instance(instance).ok_or_else(|| {
        Error::InvalidEntity(format!("expected {:?}, got {type_ref:?}", T::TYPE_REF))
    })
}
