//! Token-set search over committed index entries.

use std::collections::{HashMap, HashSet};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};

use crate::Result;
use crate::index_core::IndexerCore;
use crate::model::{ElementData, EncryptedPosting, EntryPayload};
use crate::store::{ObjectStore, Transaction};
use crate::tokenizer::tokenize;

/// An instance matching every token of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    /// List the instance lives in.
    pub list_id: String,
    /// Element id of the instance.
    pub element_id: String,
}

impl IndexerCore {
    /// Finds the instances whose entries contain every token of `query`.
    ///
    /// With `attribute_filter`, only entries of those attributes count.
    /// Hits are ordered newest first by element id. An empty query matches
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or a stored value cannot
    /// be decrypted.
    pub async fn search(
        &self,
        query: &str,
        attribute_filter: Option<&[u64]>,
    ) -> Result<Vec<SearchHit>> {
        let tokens: HashSet<String> = tokenize(query).into_iter().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self
            .store()
            .create_transaction(true, &[ObjectStore::SearchIndex, ObjectStore::ElementData])
            .await?;

        let mut matching: Option<HashSet<String>> = None;
        for token in &tokens {
            let instances = self
                .instances_for_token(tx.as_mut(), token, attribute_filter)
                .await?;
            let narrowed = match matching {
                Some(previous) => previous.intersection(&instances).cloned().collect(),
                None => instances,
            };
            if narrowed.is_empty() {
                debug!(token_count = tokens.len(), "No instance matches all tokens");
                return Ok(Vec::new());
            }
            matching = Some(narrowed);
        }

        let mut hits = Vec::new();
        for enc_instance_id in matching.unwrap_or_default() {
            let Some(element_data) = tx
                .get_json::<ElementData>(ObjectStore::ElementData, &enc_instance_id)
                .await?
            else {
                warn!("Posting references an instance without element data");
                continue;
            };
            hits.push(SearchHit {
                list_id: element_data.list_id,
                element_id: self.cipher.decrypt_index_key(&enc_instance_id)?,
            });
        }

        hits.sort_by(|a, b| b.element_id.cmp(&a.element_id));
        Ok(hits)
    }

    async fn instances_for_token(
        &self,
        tx: &mut dyn Transaction,
        token: &str,
        attribute_filter: Option<&[u64]>,
    ) -> Result<HashSet<String>> {
        let enc_word = self.cipher.encrypt_index_key(token)?;
        let postings: Vec<EncryptedPosting> = tx
            .get_json(ObjectStore::SearchIndex, &enc_word)
            .await?
            .unwrap_or_default();

        let mut attributes_by_instance: HashMap<String, Vec<u64>> = HashMap::new();
        for posting in postings {
            let payload = self.cipher.decrypt(&STANDARD.decode(&posting.entry)?)?;
            let payload: EntryPayload = serde_json::from_slice(&payload)?;
            attributes_by_instance
                .entry(posting.instance)
                .or_default()
                .push(payload.attribute);
        }

        Ok(attributes_by_instance
            .into_iter()
            .filter(|(_, attributes)| {
                attribute_filter.is_none_or(|filter| attributes.iter().any(|a| filter.contains(a)))
            })
            .map(|(instance, _)| instance)
            .collect())
    }
}
