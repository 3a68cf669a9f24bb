//! Mail entities consumed by the indexer.

use serde::{Deserialize, Serialize};

use mailsearch_index::GroupType;

use crate::entity::TypeRef;

/// Id of a list of entities.
pub type ListId = String;

/// Id of an entity, unique within its list.
pub type ElementId = String;

/// Id of a group.
pub type GroupId = String;

/// Smallest generated id.
pub const GENERATED_MIN_ID: &str = "0000000000000000";

/// Largest generated id.
pub const GENERATED_MAX_ID: &str = "ffffffffffffffff";

const COUNTER_BITS: u32 = 16;

/// Generated id for the given millisecond timestamp.
///
/// Generated ids sort in creation order: the timestamp occupies the high bits
/// and a per-millisecond counter the low 16 bits.
#[must_use]
pub fn timestamp_to_generated_id(timestamp: i64) -> ElementId {
    timestamp_to_generated_id_with_counter(timestamp, 0)
}

/// Generated id for the given timestamp and counter.
#[must_use]
pub fn timestamp_to_generated_id_with_counter(timestamp: i64, counter: u16) -> ElementId {
    let timestamp = u64::try_from(timestamp).unwrap_or(0);
    format!(
        "{:016x}",
        (timestamp << COUNTER_BITS) | u64::from(counter)
    )
}

/// Timestamp encoded in a generated id, if it is one.
#[must_use]
pub fn generated_id_to_timestamp(id: &str) -> Option<i64> {
    if id.len() != GENERATED_MIN_ID.len() {
        return None;
    }
    let value = u64::from_str_radix(id, 16).ok()?;
    i64::try_from(value >> COUNTER_BITS).ok()
}

/// Full id of a list element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdTuple {
    /// List the element lives in.
    pub list_id: ListId,
    /// Element id within the list.
    pub element_id: ElementId,
}

impl IdTuple {
    /// Creates an id tuple.
    pub fn new(list_id: impl Into<ListId>, element_id: impl Into<ElementId>) -> Self {
        Self {
            list_id: list_id.into(),
            element_id: element_id.into(),
        }
    }
}

impl std::fmt::Display for IdTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.list_id, self.element_id)
    }
}

/// Delivery state of a mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailState {
    /// Not sent yet; details can still change.
    Draft,
    /// Sent by the user.
    Sent,
    /// Received from someone else.
    Received,
}

/// A named mail address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailAddress {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Address.
    pub address: String,
}

impl MailAddress {
    /// Creates an address.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }

    /// `name <address>`, the form addresses are indexed in.
    #[must_use]
    pub fn to_index_text(&self) -> String {
        format!("{} <{}>", self.name, self.address)
    }
}

/// Per-instance key material of an encrypted entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerEncSessionKey {
    /// Encrypted session key.
    pub key: Vec<u8>,
    /// Version of the group key the session key is encrypted with.
    pub encrypting_key_version: u64,
}

/// A mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mail {
    /// List and element id.
    pub id: IdTuple,
    /// Delivery state.
    pub state: MailState,
    /// Subject line.
    #[serde(default)]
    pub subject: String,
    /// Sender.
    #[serde(default)]
    pub sender: Option<MailAddress>,
    /// Attached files.
    #[serde(default)]
    pub attachments: Vec<IdTuple>,
    /// Group owning the mail.
    #[serde(default)]
    pub owner_group: Option<GroupId>,
    /// Session key the mail and its details are encrypted with.
    #[serde(default)]
    pub owner_enc_session_key: Option<Vec<u8>>,
    /// Version of the owner group key.
    #[serde(default)]
    pub owner_key_version: u64,
    /// Details of a draft.
    #[serde(default)]
    pub mail_details_draft: Option<IdTuple>,
    /// Details of a sent or received mail.
    #[serde(default)]
    pub mail_details: Option<IdTuple>,
    /// Set when the mail could not be decrypted.
    #[serde(default)]
    pub errors: Option<String>,
}

impl Mail {
    /// Returns true if the mail is a draft.
    #[must_use]
    pub fn is_draft(&self) -> bool {
        self.state == MailState::Draft
    }

    /// Key material for entities encrypted with the mail's session key.
    #[must_use]
    pub fn owner_key(&self) -> Option<OwnerEncSessionKey> {
        self.owner_enc_session_key
            .as_ref()
            .map(|key| OwnerEncSessionKey {
                key: key.clone(),
                encrypting_key_version: self.owner_key_version,
            })
    }
}

/// Recipients of a mail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipients {
    /// To recipients.
    #[serde(default)]
    pub to: Vec<MailAddress>,
    /// Cc recipients.
    #[serde(default)]
    pub cc: Vec<MailAddress>,
    /// Bcc recipients.
    #[serde(default)]
    pub bcc: Vec<MailAddress>,
}

/// Mail body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    /// HTML body text.
    #[serde(default)]
    pub text: Option<String>,
}

/// Recipients and body of a mail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailDetails {
    /// Recipients.
    #[serde(default)]
    pub recipients: Recipients,
    /// Body.
    #[serde(default)]
    pub body: Body,
}

/// Immutable details of a sent or received mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailDetailsBlob {
    /// List and element id.
    pub id: IdTuple,
    /// The details.
    pub details: MailDetails,
}

/// Mutable details of a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailDetailsDraft {
    /// List and element id.
    pub id: IdTuple,
    /// The details.
    pub details: MailDetails,
}

/// An attached file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    /// List and element id.
    pub id: IdTuple,
    /// File name.
    pub name: String,
}

/// Folder type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailFolderType {
    /// User-created folder.
    Custom,
    /// Inbox.
    Inbox,
    /// Sent mail.
    Sent,
    /// Trash.
    Trash,
    /// Archive.
    Archive,
    /// Spam. Never indexed.
    Spam,
    /// Drafts.
    Draft,
}

/// A folder of a mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailFolder {
    /// List and element id.
    pub id: IdTuple,
    /// Folder type.
    pub folder_type: MailFolderType,
    /// List holding the folder's mails.
    pub mails: ListId,
}

/// A mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailBox {
    /// Element id.
    pub id: ElementId,
    /// Group owning the mailbox.
    pub owner_group: GroupId,
    /// List holding the mailbox's folders.
    pub folders: ListId,
}

/// Root of a mail group, pointing at its mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxGroupRoot {
    /// Group id, also the element id of the root.
    pub group: GroupId,
    /// Element id of the mailbox.
    pub mailbox: ElementId,
}

/// Membership of a user in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    /// Group id.
    pub group: GroupId,
    /// Kind of group.
    pub group_type: GroupType,
}

/// A user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Element id.
    pub id: ElementId,
    /// Group memberships.
    #[serde(default)]
    pub memberships: Vec<GroupMembership>,
}

/// Memberships of the user in mail groups.
#[must_use]
pub fn filter_mail_memberships(user: &User) -> Vec<&GroupMembership> {
    user.memberships
        .iter()
        .filter(|membership| membership.group_type == GroupType::Mail)
        .collect()
}

/// Kind of change an entity update describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Instance created. A create paired with a delete of the same id is a move.
    Create,
    /// Instance changed in place.
    Update,
    /// Instance removed.
    Delete,
}

/// A server-originated change of one entity instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityUpdate {
    /// Type of the changed instance.
    pub type_ref: TypeRef,
    /// Kind of change.
    pub operation: OperationType,
    /// List of the instance.
    pub instance_list_id: ListId,
    /// Element id of the instance.
    pub instance_id: ElementId,
}

impl EntityUpdate {
    /// Full id of the changed instance.
    #[must_use]
    pub fn id(&self) -> IdTuple {
        IdTuple::new(self.instance_list_id.clone(), self.instance_id.clone())
    }
}

/// Entity updates of one group delivered together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityEventBatch {
    /// Group the batch belongs to.
    pub group_id: GroupId,
    /// Batch id.
    pub batch_id: ElementId,
    /// Updates in delivery order.
    pub events: Vec<EntityUpdate>,
}
