//! Loading of mail content for one indexing run.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::debug;

use crate::Result;
use crate::cache::EphemeralEntityCache;
use crate::config::IndexerConfig;
use crate::entity::{
    Entity, EntityCache, EntityClient, EntityRestClient, OwnerKeyProvider, ReverseRange, TypeRef,
};
use crate::model::{
    ElementId, File, IdTuple, ListId, Mail, MailDetails, MailDetailsBlob, MailDetailsDraft,
    timestamp_to_generated_id,
};

/// A mail together with its loaded details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailWithDetails {
    /// The mail.
    pub mail: Mail,
    /// Its recipients and body.
    pub details: MailDetails,
}

/// Loads mails, details and attachments for one indexing run.
pub struct IndexLoader {
    mail_client: EntityClient,
    mail_data_client: EntityClient,
    ephemeral_cache: Option<Arc<EphemeralEntityCache>>,
    mail_chunk: usize,
    entity_chunk: usize,
    chunk_concurrency: usize,
}

impl std::fmt::Debug for IndexLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexLoader")
            .field("ephemeral_cache", &self.ephemeral_cache)
            .field("mail_chunk", &self.mail_chunk)
            .field("entity_chunk", &self.entity_chunk)
            .finish_non_exhaustive()
    }
}

impl IndexLoader {
    /// Creates a loader.
    ///
    /// With an offline cache, mails, details and attachments are all read
    /// through `cached_client`. Otherwise mails go through a fresh ephemeral
    /// cache in front of `rest_client`, which the loader evicts from as mails
    /// are processed, and details and attachments come from `rest_client`.
    #[must_use]
    pub fn new(
        rest_client: Arc<dyn EntityRestClient>,
        cached_client: Arc<dyn EntityRestClient>,
        is_using_offline_cache: bool,
        config: &IndexerConfig,
    ) -> Self {
        let (mail_client, mail_data_client, ephemeral_cache) = if is_using_offline_cache {
            (
                EntityClient::new(Arc::clone(&cached_client)),
                EntityClient::new(cached_client),
                None,
            )
        } else {
            let cache = Arc::new(EphemeralEntityCache::new(Arc::clone(&rest_client)));
            (
                EntityClient::new(cache.clone()),
                EntityClient::new(rest_client),
                Some(cache),
            )
        };

        Self {
            mail_client,
            mail_data_client,
            ephemeral_cache,
            mail_chunk: config.mail_indexer_chunk.max(1),
            entity_chunk: config.entity_indexer_chunk.max(1),
            chunk_concurrency: config.entity_chunk_concurrency.max(1),
        }
    }

    /// Loads the mails of a list received between `range_end` and
    /// `range_start`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if a range request fails.
    pub async fn load_mails_with_cache(
        &self,
        list_id: &str,
        (range_start, range_end): (i64, i64),
    ) -> Result<ReverseRange<Mail>> {
        self.mail_client
            .load_reverse_range_between(
                list_id,
                &timestamp_to_generated_id(range_start),
                &timestamp_to_generated_id(range_end),
                self.mail_chunk,
            )
            .await
    }

    /// Evicts processed mails from the ephemeral cache.
    ///
    /// Does nothing when an offline cache is used; that cache is not ours to
    /// evict from.
    pub async fn remove_from_cache(&self, ids: &[IdTuple]) {
        let Some(cache) = &self.ephemeral_cache else {
            return;
        };
        for id in ids {
            cache
                .delete_from_cache_if_exists(TypeRef::Mail, Some(&id.list_id), &id.element_id)
                .await;
        }
    }

    /// Loads the details of the given mails.
    ///
    /// Drafts read their mutable draft details, other mails their details
    /// blob. Mails whose details cannot be resolved are left out.
    ///
    /// # Errors
    ///
    /// Returns an error if a request fails as a whole.
    pub async fn load_mail_details(&self, mails: &[Mail]) -> Result<Vec<MailWithDetails>> {
        let mut draft_refs = Vec::new();
        let mut blob_refs = Vec::new();
        for mail in mails {
            if let Some(draft) = &mail.mail_details_draft {
                draft_refs.push((draft, mail));
            } else if let Some(blob) = &mail.mail_details {
                blob_refs.push((blob, mail));
            } else {
                debug!(mail = %mail.id, "Mail has no details reference");
            }
        }

        let drafts: Vec<MailDetailsDraft> = self.load_referenced(&draft_refs).await?;
        let blobs: Vec<MailDetailsBlob> = self.load_referenced(&blob_refs).await?;

        let mut details_by_id: HashMap<IdTuple, MailDetails> = drafts
            .into_iter()
            .map(|draft| (draft.id, draft.details))
            .chain(blobs.into_iter().map(|blob| (blob.id, blob.details)))
            .collect();

        let mut with_details = Vec::with_capacity(mails.len());
        for (reference, mail) in draft_refs.iter().chain(&blob_refs) {
            match details_by_id.remove(*reference) {
                Some(details) => with_details.push(MailWithDetails {
                    mail: (*mail).clone(),
                    details,
                }),
                None => debug!(mail = %mail.id, "Could not resolve mail details, skipping"),
            }
        }
        Ok(with_details)
    }

    /// Loads the attachments of the given mails.
    ///
    /// # Errors
    ///
    /// Returns an error if a request fails as a whole.
    pub async fn load_attachments(&self, mails: &[Mail]) -> Result<Vec<File>> {
        let refs: Vec<(&IdTuple, &Mail)> = mails
            .iter()
            .flat_map(|mail| mail.attachments.iter().map(move |file| (file, mail)))
            .collect();
        self.load_referenced(&refs).await
    }

    /// Loads entities referenced by mails, per list in bounded chunks, with
    /// each mail's session key as the key of what it references.
    async fn load_referenced<T: Entity>(
        &self,
        refs: &[(&IdTuple, &Mail)],
    ) -> Result<Vec<T>> {
        let mut keys = OwnerKeyProvider::new();
        let mut ids_by_list: HashMap<&ListId, Vec<ElementId>> = HashMap::new();
        for (reference, mail) in refs {
            if let Some(key) = mail.owner_key() {
                keys.insert(reference.element_id.clone(), key);
            }
            ids_by_list
                .entry(&reference.list_id)
                .or_default()
                .push(reference.element_id.clone());
        }

        let chunks: Vec<(&ListId, &[ElementId])> = ids_by_list
            .iter()
            .flat_map(|(list_id, ids)| ids.chunks(self.entity_chunk).map(move |c| (*list_id, c)))
            .collect();

        let keys = &keys;
        let loaded: Vec<Vec<T>> = try_join_bounded(chunks, self.chunk_concurrency, |(list_id, ids)| {
            self.mail_data_client
                .load_multiple::<T>(Some(list_id.as_str()), ids, Some(keys))
        })
        .await?;

        Ok(loaded.into_iter().flatten().collect())
    }
}

/// Runs `f` over `items`, at most `limit` at a time, stopping at the first
/// error. Results keep the order of `items`.
pub(crate) async fn try_join_bounded<I, T, F, Fut>(
    items: Vec<I>,
    limit: usize,
    mut f: F,
) -> Result<Vec<T>>
where
    F: FnMut(I) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut results = Vec::with_capacity(items.len());
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        let running: Vec<Fut> = items.by_ref().take(limit.max(1)).map(&mut f).collect();
        results.extend(try_join_all(running).await?);
    }
    Ok(results)
}
