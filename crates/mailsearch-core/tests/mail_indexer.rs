//! Integration tests for the mail indexer.
//!
//! These run the indexer against an in-memory entity source and an in-memory
//! `SQLite` index, with the clock frozen.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use mailsearch_core::model::{
    Body, EntityEventBatch, EntityUpdate, File, GroupMembership, IdTuple, Mail, MailAddress,
    MailBox, MailDetails, MailDetailsBlob, MailDetailsDraft, MailFolder, MailFolderType,
    MailState, MailboxGroupRoot, OperationType, Recipients, User, timestamp_to_generated_id,
};
use mailsearch_core::{
    DAY_IN_MILLIS, FixedDateProvider, InMemoryEntityClient, IndexProgress, IndexerConfig,
    IndexerContext, IndexerState, IndexingErrorReason, InjectedFailure, Instance, MailIndexer,
    SearchIndexStateInfo, StatusSink, TypeRef, index_database_name,
};
use mailsearch_index::{
    AesIndexCipher, FULL_INDEXED_TIMESTAMP, GroupType, IndexUpdate, IndexerCore,
    NOTHING_INDEXED_TIMESTAMP, ObjectStore, SearchHit, SqliteIndexStore,
};

/// 2023-11-14T22:13:20Z
const NOW: i64 = 1_700_000_000_000;
/// Midnight of `NOW`.
const TODAY: i64 = 1_699_920_000_000;
const HOUR: i64 = 60 * 60 * 1000;
const USER: &str = "user1";
const GROUP: &str = "mailgroup";

#[derive(Default)]
struct RecordingSink {
    states: Mutex<Vec<SearchIndexStateInfo>>,
}

impl RecordingSink {
    fn last(&self) -> SearchIndexStateInfo {
        self.states.lock().last().cloned().unwrap()
    }

    fn first(&self) -> SearchIndexStateInfo {
        self.states.lock().first().cloned().unwrap()
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn update_index_state(&self, state: SearchIndexStateInfo) {
        self.states.lock().push(state);
    }
}

fn user() -> User {
    User {
        id: USER.to_string(),
        memberships: vec![
            GroupMembership {
                group: GROUP.to_string(),
                group_type: GroupType::Mail,
            },
            GroupMembership {
                group: "usergroup".to_string(),
                group_type: GroupType::User,
            },
        ],
    }
}

fn folder(id: &str, folder_type: MailFolderType, mails: &str) -> Instance {
    Instance::MailFolder(MailFolder {
        id: IdTuple::new("folders", id),
        folder_type,
        mails: mails.to_string(),
    })
}

fn details(subject_body: &str) -> MailDetails {
    MailDetails {
        recipients: Recipients {
            to: vec![MailAddress::new("Bob Builder", "bob@example.com")],
            cc: Vec::new(),
            bcc: Vec::new(),
        },
        body: Body {
            text: Some(format!("<p>{subject_body}</p>")),
        },
    }
}

fn received_mail(list: &str, timestamp: i64, subject: &str, body: &str) -> Vec<Instance> {
    let id = timestamp_to_generated_id(timestamp);
    vec![
        Instance::Mail(Mail {
            id: IdTuple::new(list, id.clone()),
            state: MailState::Received,
            subject: subject.to_string(),
            sender: Some(MailAddress::new("Alice", "alice@example.com")),
            attachments: Vec::new(),
            owner_group: Some(GROUP.to_string()),
            owner_enc_session_key: None,
            owner_key_version: 0,
            mail_details_draft: None,
            mail_details: Some(IdTuple::new("details", id.clone())),
            errors: None,
        }),
        Instance::MailDetailsBlob(MailDetailsBlob {
            id: IdTuple::new("details", id),
            details: details(body),
        }),
    ]
}

fn draft_details(timestamp: i64, body: &str) -> Instance {
    Instance::MailDetailsDraft(MailDetailsDraft {
        id: IdTuple::new("draftdetails", timestamp_to_generated_id(timestamp)),
        details: details(body),
    })
}

fn draft_mail(timestamp: i64, subject: &str, body: &str) -> Vec<Instance> {
    let id = timestamp_to_generated_id(timestamp);
    vec![
        Instance::Mail(Mail {
            id: IdTuple::new("drafts", id.clone()),
            state: MailState::Draft,
            subject: subject.to_string(),
            sender: Some(MailAddress::new("Alice", "alice@example.com")),
            attachments: Vec::new(),
            owner_group: Some(GROUP.to_string()),
            owner_enc_session_key: None,
            owner_key_version: 0,
            mail_details_draft: Some(IdTuple::new("draftdetails", id)),
            mail_details: None,
            errors: None,
        }),
        draft_details(timestamp, body),
    ]
}

const BUDGET: i64 = NOW - HOUR;
const DRAFT: i64 = NOW - HOUR / 2;
const OFFSITE: i64 = TODAY - 3 * DAY_IN_MILLIS + 9 * HOUR;
const INVOICE: i64 = TODAY - 40 * DAY_IN_MILLIS + 5 * HOUR;
const SPAM: i64 = NOW - 2 * HOUR;

fn fixture() -> Vec<Instance> {
    let mut instances = vec![
        Instance::MailboxGroupRoot(MailboxGroupRoot {
            group: GROUP.to_string(),
            mailbox: "mailbox1".to_string(),
        }),
        Instance::MailBox(MailBox {
            id: "mailbox1".to_string(),
            owner_group: GROUP.to_string(),
            folders: "folders".to_string(),
        }),
        folder("f1", MailFolderType::Inbox, "inbox"),
        folder("f2", MailFolderType::Spam, "spam"),
        folder("f3", MailFolderType::Sent, "sent"),
        folder("f4", MailFolderType::Draft, "drafts"),
        Instance::File(File {
            id: IdTuple::new("files", "file1"),
            name: "forecast.xlsx".to_string(),
        }),
    ];

    let mut budget = received_mail("inbox", BUDGET, "Quarterly budget review", "Numbers attached");
    if let Instance::Mail(mail) = &mut budget[0] {
        mail.attachments.push(IdTuple::new("files", "file1"));
    }
    instances.extend(budget);
    instances.extend(received_mail(
        "inbox",
        OFFSITE,
        "Team offsite",
        "Plans for the mountain <b>retreat</b>",
    ));
    instances.extend(received_mail("inbox", INVOICE, "Archived invoice", "Paid in full"));
    instances.extend(received_mail("spam", SPAM, "Cheap budget pills", "Buy now"));
    instances.extend(draft_mail(DRAFT, "Reply draft", "first version"));
    instances
}

struct Harness {
    client: Arc<InMemoryEntityClient>,
    store: Arc<SqliteIndexStore>,
    sink: Arc<RecordingSink>,
    indexer: Arc<MailIndexer>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_config(IndexerConfig::default()).await
    }

    async fn with_config(config: IndexerConfig) -> Self {
        let client = Arc::new(InMemoryEntityClient::from_instances(fixture()));
        let store = Arc::new(
            SqliteIndexStore::in_memory(index_database_name(USER))
                .await
                .unwrap(),
        );
        let core = Arc::new(IndexerCore::new(
            store.clone(),
            Arc::new(AesIndexCipher::new(b"user1 key material")),
        ));
        let sink = Arc::new(RecordingSink::default());
        let indexer = Arc::new(Self::indexer(&client, core, &sink, config));
        indexer.init_group_data(&user()).await.unwrap();

        Self {
            client,
            store,
            sink,
            indexer,
        }
    }

    fn indexer(
        client: &Arc<InMemoryEntityClient>,
        core: Arc<IndexerCore>,
        sink: &Arc<RecordingSink>,
        config: IndexerConfig,
    ) -> MailIndexer {
        MailIndexer::new(
            IndexerContext {
                core,
                rest_client: client.clone(),
                cached_client: client.clone(),
                date_provider: Arc::new(FixedDateProvider::new(NOW)),
                status_sink: sink.clone(),
            },
            config,
        )
    }

    async fn enabled() -> Self {
        let harness = Self::new().await;
        harness.indexer.enable_mail_indexing(&user()).await.unwrap();
        harness.indexer.wait_for_background_indexing().await;
        harness
    }

    async fn search(&self, query: &str) -> Vec<SearchHit> {
        self.indexer.core().search(query, None).await.unwrap()
    }

    async fn indexed_count(&self) -> usize {
        self.store.count(ObjectStore::ElementData).await.unwrap()
    }
}

fn event(operation: OperationType, list: &str, timestamp: i64) -> EntityUpdate {
    EntityUpdate {
        type_ref: TypeRef::Mail,
        operation,
        instance_list_id: list.to_string(),
        instance_id: timestamp_to_generated_id(timestamp),
    }
}

fn batch(events: Vec<EntityUpdate>) -> EntityEventBatch {
    EntityEventBatch {
        group_id: GROUP.to_string(),
        batch_id: "batch1".to_string(),
        events,
    }
}

// === Backfill ===

#[tokio::test]
async fn test_initial_indexing_covers_recent_mail_but_not_spam() {
    let h = Harness::enabled().await;

    let hits = h.search("budget").await;
    assert_eq!(
        hits,
        vec![SearchHit {
            list_id: "inbox".to_string(),
            element_id: timestamp_to_generated_id(BUDGET),
        }]
    );
    assert_eq!(h.search("forecast").await.len(), 1);
    assert_eq!(h.search("bob builder").await.len(), 3);
    assert_eq!(h.search("retreat").await.len(), 1);
    assert_eq!(h.search("first version").await.len(), 1);
    assert!(h.search("invoice").await.is_empty());
    assert!(h.search("pills").await.is_empty());
    assert_eq!(h.indexed_count().await, 3);

    assert_eq!(
        h.indexer.current_index_timestamp(),
        TODAY - 28 * DAY_IN_MILLIS
    );
    assert!(h.indexer.excluded_list_ids().contains("spam"));
    assert_eq!(h.indexer.state(), IndexerState::Idle);
}

#[tokio::test]
async fn test_initial_indexing_reports_progress() {
    let h = Harness::enabled().await;

    let first = h.sink.first();
    assert_eq!(first.progress, IndexProgress::NotStarted);
    assert_eq!(
        first.aimed_mail_index_timestamp,
        TODAY - 28 * DAY_IN_MILLIS
    );

    let last = h.sink.last();
    assert_eq!(last.progress, IndexProgress::Done);
    assert!(last.mail_index_enabled);
    assert_eq!(last.error, None);
    assert_eq!(last.failed_indexing_up_to, None);
    assert_eq!(
        last.current_mail_index_timestamp,
        TODAY - 28 * DAY_IN_MILLIS
    );
    assert!(
        h.sink
            .states
            .lock()
            .iter()
            .any(|state| state.progress == IndexProgress::InProgress(100))
    );
}

#[tokio::test]
async fn test_rerun_over_indexed_range_loads_nothing() {
    let h = Harness::enabled().await;
    let ranges = h.client.range_count();

    h.indexer
        .index_mailboxes(&user(), TODAY - 28 * DAY_IN_MILLIS)
        .await;
    h.indexer
        .index_mailboxes(&user(), TODAY - 10 * DAY_IN_MILLIS)
        .await;

    assert_eq!(h.client.range_count(), ranges);
    assert_eq!(h.indexer.core().stats().written_instances, 0);
    assert_eq!(h.indexed_count().await, 3);
    assert_eq!(
        h.indexer.current_index_timestamp(),
        TODAY - 28 * DAY_IN_MILLIS
    );
}

#[tokio::test]
async fn test_extend_reaches_oldest_mail_and_marks_fully_indexed() {
    let h = Harness::enabled().await;

    h.indexer
        .extend_index_if_needed(&user(), TODAY - 60 * DAY_IN_MILLIS)
        .await;

    assert_eq!(h.search("invoice").await.len(), 1);
    assert_eq!(h.indexed_count().await, 4);
    assert_eq!(h.indexer.current_index_timestamp(), FULL_INDEXED_TIMESTAMP);

    let ranges = h.client.range_count();
    h.indexer
        .extend_index_if_needed(&user(), TODAY - 90 * DAY_IN_MILLIS)
        .await;
    assert_eq!(h.client.range_count(), ranges);
}

#[tokio::test]
async fn test_extend_within_indexed_range_is_noop() {
    let h = Harness::enabled().await;
    let ranges = h.client.range_count();

    h.indexer
        .extend_index_if_needed(&user(), TODAY - 5 * DAY_IN_MILLIS)
        .await;

    assert_eq!(h.client.range_count(), ranges);
}

#[tokio::test]
async fn test_mails_that_failed_to_decrypt_are_skipped() {
    let h = Harness::new().await;
    let mut broken = received_mail("inbox", NOW - 3 * HOUR, "Broken mail", "unreadable");
    if let Instance::Mail(mail) = &mut broken[0] {
        mail.errors = Some("session key missing".to_string());
    }
    for instance in broken {
        h.client.insert(instance);
    }

    h.indexer.enable_mail_indexing(&user()).await.unwrap();
    h.indexer.wait_for_background_indexing().await;

    assert!(h.search("broken").await.is_empty());
    assert_eq!(h.search("budget").await.len(), 1);
}

#[tokio::test]
async fn test_mails_on_window_bounds_are_indexed() {
    let h = Harness::new().await;
    for instance in received_mail("inbox", TODAY - DAY_IN_MILLIS, "Midnight memo", "Exactly") {
        h.client.insert(instance);
    }
    for instance in received_mail("inbox", TODAY - 28 * DAY_IN_MILLIS, "Cutoff notice", "Last") {
        h.client.insert(instance);
    }

    h.indexer.enable_mail_indexing(&user()).await.unwrap();
    h.indexer.wait_for_background_indexing().await;

    assert_eq!(h.search("midnight").await.len(), 1);
    assert_eq!(h.search("cutoff").await.len(), 1);
    assert_eq!(h.indexed_count().await, 5);

    // Extending past the cutoff leaves it indexed once.
    h.indexer
        .extend_index_if_needed(&user(), TODAY - 60 * DAY_IN_MILLIS)
        .await;
    assert_eq!(h.search("cutoff").await.len(), 1);
    assert_eq!(h.indexed_count().await, 6);
}

#[tokio::test]
async fn test_zero_batch_interval_falls_back_to_one_day() {
    let h = Harness::with_config(IndexerConfig {
        mail_index_batch_interval_ms: 0,
        ..IndexerConfig::default()
    })
    .await;

    h.indexer.enable_mail_indexing(&user()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), h.indexer.wait_for_background_indexing())
        .await
        .unwrap();

    assert_eq!(h.indexed_count().await, 3);
    assert_eq!(
        h.indexer.current_index_timestamp(),
        TODAY - 28 * DAY_IN_MILLIS
    );
}

/// Harness that flushes after every window with staged mails and runs `hook`
/// on the n-th range request of the inbox, counting from 1.
async fn flushing_harness(
    nth_inbox_range: usize,
    hook: impl Fn(&Harness) + Send + Sync + 'static,
) -> Arc<Harness> {
    let h = Arc::new(
        Harness::with_config(IndexerConfig {
            max_staged_instances: 0,
            ..IndexerConfig::default()
        })
        .await,
    );
    let weak = Arc::downgrade(&h);
    let inbox_ranges = AtomicUsize::new(0);
    h.client.set_range_hook(move |list_id| {
        if list_id == "inbox"
            && inbox_ranges.fetch_add(1, Ordering::SeqCst) + 1 == nth_inbox_range
            && let Some(h) = weak.upgrade()
        {
            hook(&h);
        }
    });
    h
}

#[tokio::test]
async fn test_full_changeset_is_flushed_mid_range() {
    // Windows are one day wide, starting at midnight after today. The inbox
    // is read once per window; the sixth read covers four to five days ago,
    // after the window holding the offsite mail was flushed.
    let h = flushing_harness(6, |h| h.client.set_connection_lost(true)).await;

    h.indexer.enable_mail_indexing(&user()).await.unwrap();
    h.indexer.wait_for_background_indexing().await;

    let last = h.sink.last();
    assert_eq!(last.error, Some(IndexingErrorReason::ConnectionLost));
    h.client.set_connection_lost(false);

    assert_eq!(h.search("budget").await.len(), 1);
    assert_eq!(h.search("offsite").await.len(), 1);
    let group = h.indexer.core().get_group_data(GROUP).await.unwrap().unwrap();
    assert_eq!(group.index_timestamp, TODAY - 3 * DAY_IN_MILLIS);
    assert_eq!(h.indexer.current_index_timestamp(), TODAY - 3 * DAY_IN_MILLIS);
}

// === Cancellation and failures ===

#[tokio::test]
async fn test_cancelled_run_writes_nothing_and_reports_no_error() {
    let h = Harness::new().await;
    let indexer = Arc::downgrade(&h.indexer);
    h.client.set_range_hook(move |list_id| {
        if list_id == "inbox"
            && let Some(indexer) = indexer.upgrade()
        {
            indexer.cancel_mail_indexing();
        }
    });

    h.indexer.enable_mail_indexing(&user()).await.unwrap();
    h.indexer.wait_for_background_indexing().await;

    let last = h.sink.last();
    assert_eq!(last.progress, IndexProgress::Done);
    assert_eq!(last.error, None);
    assert_eq!(last.failed_indexing_up_to, None);
    assert_eq!(h.indexed_count().await, 0);
    assert_eq!(h.indexer.current_index_timestamp(), NOTHING_INDEXED_TIMESTAMP);
    assert_eq!(h.indexer.state(), IndexerState::Idle);
    assert!(!h.indexer.core().queue().is_paused());
}

#[tokio::test]
async fn test_cancelled_run_keeps_flushed_windows() {
    let h = flushing_harness(6, |h| h.indexer.cancel_mail_indexing()).await;

    h.indexer.enable_mail_indexing(&user()).await.unwrap();
    h.indexer.wait_for_background_indexing().await;

    let last = h.sink.last();
    assert_eq!(last.progress, IndexProgress::Done);
    assert_eq!(last.error, None);
    assert_eq!(last.failed_indexing_up_to, None);
    assert_eq!(h.search("budget").await.len(), 1);
    assert_eq!(h.search("offsite").await.len(), 1);
    assert_eq!(h.indexed_count().await, 3);
    assert_eq!(h.indexer.current_index_timestamp(), TODAY - 3 * DAY_IN_MILLIS);
    assert_eq!(h.indexer.state(), IndexerState::Idle);
}

#[tokio::test]
async fn test_connection_loss_reports_failed_range() {
    let h = Harness::new().await;
    h.client.fail_on("inbox", InjectedFailure::Connection);

    h.indexer.enable_mail_indexing(&user()).await.unwrap();
    h.indexer.wait_for_background_indexing().await;

    let last = h.sink.last();
    assert_eq!(last.error, Some(IndexingErrorReason::ConnectionLost));
    assert_eq!(
        last.failed_indexing_up_to,
        Some(TODAY - 28 * DAY_IN_MILLIS)
    );
    assert_eq!(h.indexed_count().await, 0);

    h.client.clear_failure("inbox");
    h.indexer
        .index_mailboxes(&user(), TODAY - 28 * DAY_IN_MILLIS)
        .await;
    assert_eq!(h.search("budget").await.len(), 1);
    assert_eq!(h.sink.last().error, None);
}

#[tokio::test]
async fn test_rejected_request_reports_unknown_error() {
    let h = Harness::new().await;
    h.client.fail_on("inbox", InjectedFailure::Rest);

    h.indexer.enable_mail_indexing(&user()).await.unwrap();
    h.indexer.wait_for_background_indexing().await;

    let last = h.sink.last();
    assert_eq!(last.error, Some(IndexingErrorReason::Unknown));
    assert_eq!(
        last.failed_indexing_up_to,
        Some(TODAY - 28 * DAY_IN_MILLIS)
    );
}

#[tokio::test]
async fn test_stopped_core_ends_run_quietly() {
    let h = Harness::enabled().await;
    h.indexer.core().stop_processing().await;

    h.indexer
        .index_mailboxes(&user(), TODAY - 60 * DAY_IN_MILLIS)
        .await;

    let last = h.sink.last();
    assert_eq!(last.progress, IndexProgress::Done);
    assert_eq!(last.error, None);
    assert_eq!(last.failed_indexing_up_to, None);
    assert_eq!(
        h.indexer.current_index_timestamp(),
        TODAY - 28 * DAY_IN_MILLIS
    );
    assert!(h.indexer.core().queue().is_closed());
}

// === Live events ===

#[tokio::test]
async fn test_created_mail_is_indexed() {
    let h = Harness::enabled().await;
    for instance in received_mail("inbox", NOW - 5 * 60 * 1000, "Lunch plans", "Pizza?") {
        h.client.insert(instance);
    }

    h.indexer
        .process_entity_batch(&batch(vec![event(
            OperationType::Create,
            "inbox",
            NOW - 5 * 60 * 1000,
        )]))
        .await
        .unwrap();

    assert_eq!(h.search("pizza").await.len(), 1);
    assert_eq!(h.indexed_count().await, 4);
}

#[tokio::test]
async fn test_create_and_delete_of_same_mail_is_a_move() {
    let h = Harness::enabled().await;

    h.indexer
        .process_entity_batch(&batch(vec![
            event(OperationType::Create, "sent", BUDGET),
            event(OperationType::Delete, "inbox", BUDGET),
        ]))
        .await
        .unwrap();

    let hits = h.search("budget").await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].list_id, "sent");
    assert_eq!(h.indexed_count().await, 3);
}

#[tokio::test]
async fn test_move_into_spam_removes_mail() {
    let h = Harness::enabled().await;

    h.indexer
        .process_entity_batch(&batch(vec![
            event(OperationType::Delete, "inbox", OFFSITE),
            event(OperationType::Create, "spam", OFFSITE),
        ]))
        .await
        .unwrap();

    assert!(h.search("offsite").await.is_empty());
    assert_eq!(h.indexed_count().await, 2);
}

#[tokio::test]
async fn test_move_of_unindexed_mail_indexes_it() {
    let h = Harness::enabled().await;
    for instance in received_mail("sent", INVOICE, "Archived invoice", "Paid in full") {
        h.client.insert(instance);
    }

    h.indexer
        .process_entity_batch(&batch(vec![
            event(OperationType::Create, "sent", INVOICE),
            event(OperationType::Delete, "inbox", INVOICE),
        ]))
        .await
        .unwrap();

    let hits = h.search("invoice").await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].list_id, "sent");
}

#[tokio::test]
async fn test_created_mail_in_spam_is_ignored() {
    let h = Harness::enabled().await;
    for instance in received_mail("spam", NOW - HOUR / 4, "Lottery winner", "Claim now") {
        h.client.insert(instance);
    }

    let mut update = IndexUpdate::new();
    h.indexer
        .process_entity_events(
            &[event(OperationType::Create, "spam", NOW - HOUR / 4)],
            GROUP,
            "batch1",
            &mut update,
        )
        .await
        .unwrap();

    assert!(update.is_empty());
}

#[tokio::test]
async fn test_deleted_mail_is_removed() {
    let h = Harness::enabled().await;

    h.indexer
        .process_entity_batch(&batch(vec![event(OperationType::Delete, "inbox", BUDGET)]))
        .await
        .unwrap();

    assert!(h.search("budget").await.is_empty());
    assert!(h.search("forecast").await.is_empty());
    assert_eq!(h.indexed_count().await, 2);
}

#[tokio::test]
async fn test_updated_draft_is_reindexed() {
    let h = Harness::enabled().await;
    h.client.insert(draft_details(DRAFT, "second version"));

    h.indexer
        .process_entity_batch(&batch(vec![event(OperationType::Update, "drafts", DRAFT)]))
        .await
        .unwrap();

    assert_eq!(h.search("second").await.len(), 1);
    assert!(h.search("first").await.is_empty());
    assert_eq!(h.search("version").await.len(), 1);
    assert_eq!(h.indexed_count().await, 3);
}

#[tokio::test]
async fn test_updated_draft_details_are_loaded_with_session_key() {
    let h = Harness::enabled().await;
    let mut draft = draft_mail(DRAFT, "Reply draft", "third version");
    if let Instance::Mail(mail) = &mut draft[0] {
        mail.owner_enc_session_key = Some(vec![7, 7, 7]);
        mail.owner_key_version = 2;
    }
    for instance in draft {
        h.client.insert(instance);
    }

    h.indexer
        .process_entity_batch(&batch(vec![event(OperationType::Update, "drafts", DRAFT)]))
        .await
        .unwrap();

    assert_eq!(h.search("third").await.len(), 1);
    assert!(
        h.client
            .keyed_ids()
            .contains(&timestamp_to_generated_id(DRAFT))
    );
}

#[tokio::test]
async fn test_update_of_received_mail_changes_nothing() {
    let h = Harness::enabled().await;

    let mut update = IndexUpdate::new();
    h.indexer
        .process_entity_events(
            &[event(OperationType::Update, "inbox", BUDGET)],
            GROUP,
            "batch1",
            &mut update,
        )
        .await
        .unwrap();

    assert!(update.is_empty());
}

#[tokio::test]
async fn test_unavailable_mail_is_skipped() {
    let h = Harness::enabled().await;
    h.client
        .fail_on(timestamp_to_generated_id(OFFSITE), InjectedFailure::NotAuthorized);

    let mut update = IndexUpdate::new();
    h.indexer
        .process_entity_events(
            &[
                event(OperationType::Create, "inbox", NOW - 10 * HOUR),
                event(OperationType::Update, "inbox", OFFSITE),
            ],
            GROUP,
            "batch1",
            &mut update,
        )
        .await
        .unwrap();

    assert!(update.is_empty());
}

#[tokio::test]
async fn test_connection_loss_during_events_propagates() {
    let h = Harness::enabled().await;
    for instance in received_mail("inbox", NOW - HOUR / 6, "Standup notes", "Blockers") {
        h.client.insert(instance);
    }
    h.client.set_connection_lost(true);

    let err = h
        .indexer
        .process_entity_batch(&batch(vec![event(
            OperationType::Create,
            "inbox",
            NOW - HOUR / 6,
        )]))
        .await
        .unwrap_err();

    assert!(matches!(err, mailsearch_core::Error::Connection(_)));
    h.client.set_connection_lost(false);
    assert!(h.search("standup").await.is_empty());
}

#[tokio::test]
async fn test_batch_after_stop_is_dropped() {
    let h = Harness::enabled().await;
    h.indexer.core().stop_processing().await;

    let processed = tokio::time::timeout(
        Duration::from_secs(2),
        h.indexer
            .process_entity_batch(&batch(vec![event(OperationType::Delete, "inbox", BUDGET)])),
    )
    .await
    .unwrap();

    assert!(processed.is_ok());
}

#[tokio::test]
async fn test_waiting_batch_is_released_by_stop() {
    let h = Harness::enabled().await;
    h.indexer.core().queue().pause();

    let waiting = {
        let indexer = Arc::clone(&h.indexer);
        tokio::spawn(async move {
            indexer
                .process_entity_batch(&batch(vec![event(OperationType::Delete, "inbox", BUDGET)]))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiting.is_finished());

    h.indexer.core().stop_processing().await;
    let processed = tokio::time::timeout(Duration::from_secs(2), waiting)
        .await
        .unwrap()
        .unwrap();

    assert!(processed.is_ok());
}

#[tokio::test]
async fn test_events_are_ignored_while_disabled() {
    let h = Harness::new().await;

    let mut update = IndexUpdate::new();
    h.indexer
        .process_entity_events(
            &[event(OperationType::Create, "inbox", BUDGET)],
            GROUP,
            "batch1",
            &mut update,
        )
        .await
        .unwrap();

    assert!(update.is_empty());
    assert_eq!(h.client.load_count(), 0);
}

// === Lifecycle ===

#[tokio::test]
async fn test_disable_erases_index() {
    let h = Harness::enabled().await;

    h.indexer.disable_mail_indexing(USER).await.unwrap();

    assert_eq!(h.indexer.state(), IndexerState::Disabled);
    assert!(!h.indexer.mail_indexing_enabled());
    assert!(h.indexer.excluded_list_ids().is_empty());
    assert_eq!(h.indexer.current_index_timestamp(), NOTHING_INDEXED_TIMESTAMP);
    assert_eq!(h.indexed_count().await, 0);
    assert!(h.search("budget").await.is_empty());
}

#[tokio::test]
async fn test_enabling_again_restores_excluded_lists_without_backfill() {
    let h = Harness::enabled().await;
    let ranges = h.client.range_count();

    let restarted = Arc::new(Harness::indexer(
        &h.client,
        h.indexer.core().clone(),
        &h.sink,
        IndexerConfig::default(),
    ));
    assert_eq!(restarted.state(), IndexerState::Disabled);

    restarted.enable_mail_indexing(&user()).await.unwrap();
    restarted.wait_for_background_indexing().await;

    assert_eq!(restarted.state(), IndexerState::Idle);
    assert!(restarted.excluded_list_ids().contains("spam"));
    assert_eq!(h.client.range_count(), ranges);

    restarted.update_current_index_timestamp(&user()).await;
    assert_eq!(
        restarted.current_index_timestamp(),
        TODAY - 28 * DAY_IN_MILLIS
    );
}
