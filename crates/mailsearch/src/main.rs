//! `mailsearch` - encrypted, incremental mail search index
//!
//! Indexes mailbox fixtures into an encrypted `SQLite` index, applies entity
//! change events to it and searches it.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod fixture;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailsearch_core::indexer::attributes;
use mailsearch_core::model::User;
use mailsearch_core::{
    DateProvider, InMemoryEntityClient, IndexerConfig, IndexerContext, LoggingStatusSink,
    MailIndexer, SystemDateProvider, index_database_name,
};
use mailsearch_index::{
    AesIndexCipher, FULL_INDEXED_TIMESTAMP, IndexerCore, NOTHING_INDEXED_TIMESTAMP,
    SqliteIndexStore,
};

#[derive(Parser)]
#[command(name = "mailsearch", version, about = "Encrypted, incremental mail search index")]
struct Cli {
    /// Index database file [default: <data dir>/mailsearch/index.db]
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Key material the index is encrypted with
    #[arg(long, global = true, env = "MAILSEARCH_INDEX_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Indexer configuration file (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enable mail indexing for a fixture's user and index its mailboxes
    Index {
        /// Fixture with the user and their mailbox entities
        #[arg(long, value_name = "JSON")]
        fixture: PathBuf,
        /// Extend the index this many days back from today
        #[arg(long)]
        days: Option<i64>,
    },
    /// Search the index
    Search {
        query: String,
        /// Only match these fields
        #[arg(long, value_enum)]
        field: Vec<Field>,
    },
    /// Apply entity event batches to the index
    ApplyEvents {
        /// Fixture with the user and their mailbox entities
        #[arg(long, value_name = "JSON")]
        fixture: PathBuf,
        /// Event batches to apply, in order
        #[arg(long, value_name = "JSON")]
        events: PathBuf,
    },
    /// Disable mail indexing and erase the user's index
    Disable {
        /// User id
        #[arg(long)]
        user: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Field {
    Subject,
    Sender,
    To,
    Cc,
    Bcc,
    Attachments,
    Body,
}

impl Field {
    const fn attribute_id(self) -> u64 {
        match self {
            Self::Subject => attributes::SUBJECT.id,
            Self::Sender => attributes::SENDER.id,
            Self::To => attributes::TO_RECIPIENTS.id,
            Self::Cc => attributes::CC_RECIPIENTS.id,
            Self::Bcc => attributes::BCC_RECIPIENTS.id,
            Self::Attachments => attributes::ATTACHMENTS.id,
            Self::Body => attributes::BODY.id,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mailsearch=info,mailsearch_core=info,mailsearch_index=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = fixture::load_config(cli.config.as_deref()).await?;

    match &cli.command {
        Commands::Index { fixture, days } => {
            run_index(&cli, config, fixture, *days).await?;
        }
        Commands::Search { query, field } => run_search(&cli, query, field).await?,
        Commands::ApplyEvents { fixture, events } => {
            run_apply_events(&cli, config, fixture, events).await?;
        }
        Commands::Disable { user } => run_disable(&cli, config, user).await?,
    }
    Ok(())
}

fn database_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(path) = &cli.db {
        return Ok(path.clone());
    }
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailsearch");
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    Ok(data_dir.join("index.db"))
}

async fn open_core(cli: &Cli, user_id: &str) -> Result<Arc<IndexerCore>> {
    let Some(key) = &cli.key else {
        bail!("No index key given; pass --key or set MAILSEARCH_INDEX_KEY");
    };
    let path = database_path(cli)?;
    let store = SqliteIndexStore::new(
        path.to_str().unwrap_or("index.db"),
        index_database_name(user_id),
    )
    .await
    .with_context(|| format!("Failed to open index at {}", path.display()))?;
    info!(path = %path.display(), "Opened index");

    Ok(Arc::new(IndexerCore::new(
        Arc::new(store),
        Arc::new(AesIndexCipher::new(key.as_bytes())),
    )))
}

fn mail_indexer(
    core: Arc<IndexerCore>,
    client: Arc<InMemoryEntityClient>,
    config: IndexerConfig,
) -> Arc<MailIndexer> {
    Arc::new(MailIndexer::new(
        IndexerContext {
            core,
            rest_client: client.clone(),
            cached_client: client,
            date_provider: Arc::new(SystemDateProvider),
            status_sink: Arc::new(LoggingStatusSink),
        },
        config,
    ))
}

/// Opens the index of the fixture's user and enables mail indexing, waiting
/// for the initial backfill.
async fn enabled_indexer(
    cli: &Cli,
    config: IndexerConfig,
    fixture_path: &Path,
) -> Result<(Arc<MailIndexer>, User)> {
    let fixture = fixture::load_fixture(fixture_path).await?;
    let core = open_core(cli, &fixture.user.id).await?;
    let client = Arc::new(InMemoryEntityClient::from_instances(fixture.instances));
    let indexer = mail_indexer(core, client, config);

    indexer.init_group_data(&fixture.user).await?;
    indexer.enable_mail_indexing(&fixture.user).await?;
    indexer.wait_for_background_indexing().await;
    Ok((indexer, fixture.user))
}

async fn run_index(
    cli: &Cli,
    config: IndexerConfig,
    fixture_path: &Path,
    days: Option<i64>,
) -> Result<()> {
    let (indexer, user) = enabled_indexer(cli, config, fixture_path).await?;
    if let Some(days) = days {
        let oldest = SystemDateProvider.start_of_day_shifted_by(-days);
        indexer.extend_index_if_needed(&user, oldest).await;
    }
    indexer.update_current_index_timestamp(&user).await;

    let stats = indexer.core().stats();
    println!(
        "Indexed {} mails, {} written; index reaches {}",
        stats.mail_count,
        stats.written_instances,
        describe_timestamp(indexer.current_index_timestamp())
    );
    Ok(())
}

async fn run_search(cli: &Cli, query: &str, fields: &[Field]) -> Result<()> {
    let core = open_core(cli, "").await?;
    let filter: Vec<u64> = fields.iter().map(|field| field.attribute_id()).collect();
    let filter = (!filter.is_empty()).then_some(filter.as_slice());

    let hits = core.search(query, filter).await?;
    for hit in &hits {
        println!("{}/{}", hit.list_id, hit.element_id);
    }
    info!(query, hits = hits.len(), "Search finished");
    Ok(())
}

async fn run_apply_events(
    cli: &Cli,
    config: IndexerConfig,
    fixture_path: &Path,
    events_path: &Path,
) -> Result<()> {
    let batches = fixture::load_events(events_path).await?;
    let (indexer, _user) = enabled_indexer(cli, config, fixture_path).await?;

    for batch in &batches {
        indexer
            .process_entity_batch(batch)
            .await
            .with_context(|| format!("Failed to apply batch {}", batch.batch_id))?;
    }
    println!("Applied {} event batches", batches.len());
    Ok(())
}

async fn run_disable(cli: &Cli, config: IndexerConfig, user_id: &str) -> Result<()> {
    let core = open_core(cli, user_id).await?;
    let indexer = mail_indexer(core, Arc::new(InMemoryEntityClient::new()), config);
    indexer.disable_mail_indexing(user_id).await?;
    println!("Mail indexing disabled for {user_id}");
    Ok(())
}

fn describe_timestamp(timestamp: i64) -> String {
    match timestamp {
        FULL_INDEXED_TIMESTAMP => "the oldest mail".to_string(),
        NOTHING_INDEXED_TIMESTAMP => "nothing yet".to_string(),
        _ => chrono::DateTime::from_timestamp_millis(timestamp)
            .map_or_else(|| timestamp.to_string(), |date| date.to_rfc3339()),
    }
}
