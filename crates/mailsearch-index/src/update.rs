//! In-memory changesets of index mutations.

use std::collections::{HashMap, HashSet};

use crate::model::{ElementData, EncryptedPosting};

/// Staged creations.
#[derive(Debug, Default)]
pub struct CreateOps {
    /// Encrypted word → postings to append under it.
    pub index_map: HashMap<String, Vec<EncryptedPosting>>,
    /// Encrypted instance id → bookkeeping of the new instance.
    pub enc_instance_id_to_element_data: HashMap<String, ElementData>,
}

/// A staged list change of an already indexed instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveInstance {
    /// Encrypted instance id.
    pub enc_instance_id: String,
    /// List the instance now lives in.
    pub new_list_id: String,
}

/// Staged deletions.
#[derive(Debug, Default)]
pub struct DeleteOps {
    /// Encrypted ids of instances to remove from the index.
    pub enc_instance_ids: HashSet<String>,
}

/// A batch of index mutations that is committed in one transaction.
#[derive(Debug, Default)]
pub struct IndexUpdate {
    /// Instances to add.
    pub create: CreateOps,
    /// Instances whose list changed.
    pub moves: Vec<MoveInstance>,
    /// Instances to remove.
    pub delete: DeleteOps,
}

impl IndexUpdate {
    /// Creates an empty changeset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instances staged for creation.
    #[must_use]
    pub fn staged_instance_count(&self) -> usize {
        self.create.enc_instance_id_to_element_data.len()
    }

    /// Returns true if nothing has been staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.create.enc_instance_id_to_element_data.is_empty()
            && self.create.index_map.is_empty()
            && self.moves.is_empty()
            && self.delete.enc_instance_ids.is_empty()
    }
}
