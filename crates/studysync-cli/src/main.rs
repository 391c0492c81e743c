//! StudySync CLI
//!
//! Thin wrapper around studysync-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Work as a guest, fully offline
//! studysync --offline guest enable
//! studysync --offline add task "Essay" --due 2026-11-02 --priority high
//! studysync --offline list tasks
//!
//! # Mark it done (fields are key=value, values parsed as JSON when possible)
//! studysync --offline update task temp_01J... completed=true
//!
//! # Sign up, then hand the guest data over
//! studysync guest migrate <user_id>
//!
//! # Replay everything queued while offline
//! studysync --user <user_id> sync
//!
//! # Connectivity, identity and queue depth
//! studysync status
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use serde_json::Value;
use studysync_core::logging::LoggingBuilder;
use studysync_core::{
    probe_url, EngineConfig, EntityKind, Fields, ManualReachability, NewAiNote, NewJournalEntry,
    NewMoodEntry, NewTask, OfflineEngine, PostgrestGateway, Priority, Record, RecordId,
    RemoteGateway, SyncOutcome, UnconfiguredGateway, GUEST_USER_ID,
};
use tracing::debug;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// StudySync - offline-first student productivity
#[derive(Parser)]
#[command(name = "studysync")]
#[command(version = "0.1.0")]
#[command(about = "StudySync - offline-first tasks, mood, journal and notes")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Data directory (default: ~/.studysync/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Act as this user instead of asking the backend for the session
    #[arg(short, long, global = true, env = "STUDYSYNC_USER")]
    user: Option<String>,

    /// Never touch the network
    #[arg(long, global = true)]
    offline: bool,

    /// Also write JSONL logs into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List records of one kind (tasks, moods, journal, notes)
    List {
        kind: EntityKind,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a record
    Add {
        #[command(subcommand)]
        draft: DraftCommand,
    },

    /// Merge key=value fields into a record
    Update {
        kind: EntityKind,
        id: String,
        #[arg(required = true, value_parser = parse_field)]
        fields: Vec<(String, Value)>,
    },

    /// Delete a record
    Delete { kind: EntityKind, id: String },

    /// Guest mode
    Guest {
        #[command(subcommand)]
        action: GuestAction,
    },

    /// Replay queued writes now
    Sync,

    /// Show pending queued writes
    Queue {
        #[arg(long)]
        json: bool,
    },

    /// Connectivity, identity and queue depth
    Status,

    /// Remove cached data for the current user and the guest
    Clear,

    /// Wipe all local data
    Logout,
}

#[derive(Subcommand)]
enum DraftCommand {
    Task {
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// YYYY-MM-DD
        #[arg(long)]
        due: Option<NaiveDate>,
        /// HH:MM:SS
        #[arg(long)]
        due_time: Option<NaiveTime>,
        /// low, medium or high
        #[arg(long, value_parser = parse_priority)]
        priority: Option<Priority>,
        #[arg(long)]
        category: Option<String>,
        /// 1 to 5
        #[arg(long)]
        stress: Option<u8>,
    },
    Mood {
        /// 1 to 5
        rating: u8,
        #[arg(long)]
        comments: Option<String>,
    },
    Journal {
        content: String,
        #[arg(long)]
        title: Option<String>,
    },
    Note {
        title: String,
        #[arg(default_value = "")]
        content: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
}

#[derive(Subcommand)]
enum GuestAction {
    /// Start using the app as a guest
    Enable,
    /// Move guest data to a newly created account
    Migrate { user_id: String },
}

fn setup_logging(verbosity: u8, log_dir: Option<&PathBuf>) -> Result<()> {
    let mut builder = LoggingBuilder::new(LoggingBuilder::filter_for_verbosity(verbosity));
    if let Some(dir) = log_dir {
        builder = builder.with_jsonl(dir, "cli");
    }
    builder.init()?;
    Ok(())
}

fn parse_priority(s: &str) -> Result<Priority, String> {
    serde_json::from_value(Value::String(s.to_lowercase()))
        .map_err(|_| format!("unknown priority {:?} (low, medium, high)", s))
}

/// `key=value`; the value is JSON when it parses as JSON, a string otherwise
fn parse_field(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty field name in {:?}", s));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    }
    .with_env_overrides();
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

async fn build_engine(cli: &Cli, config: &EngineConfig) -> Result<OfflineEngine> {
    let (gateway, online): (Arc<dyn RemoteGateway>, bool) = match &config.gateway.url {
        Some(url) if !cli.offline => {
            let gateway = PostgrestGateway::new(&config.gateway)?;
            let online = probe_url(url, PROBE_TIMEOUT).await;
            (Arc::new(gateway), online)
        }
        Some(_) => (Arc::new(PostgrestGateway::new(&config.gateway)?), false),
        None => (Arc::new(UnconfiguredGateway), false),
    };
    debug!(online, "Connectivity probed");

    let reachability = Arc::new(ManualReachability::new(online));
    Ok(OfflineEngine::open(config, gateway, reachability)?)
}

/// Whose data a command acts on: the guest, `--user`, or the backend session.
async fn resolve_owner(engine: &OfflineEngine, user: Option<&str>) -> Result<String> {
    if engine.is_guest_mode()? {
        return Ok(GUEST_USER_ID.to_string());
    }
    if let Some(user) = user {
        return Ok(user.to_string());
    }
    match engine.active_identity().await? {
        Some(identity) => Ok(identity.id().to_string()),
        None => bail!("no active user: pass --user, sign in, or run `studysync guest enable`"),
    }
}

fn print_records(kind: EntityKind, records: &[Record], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No {} records.", kind);
        return Ok(());
    }
    for record in records {
        let marker = if record.id.is_temporary() { "*" } else { " " };
        println!("{} {}  {}", marker, record.id, record.label());
    }
    if records.iter().any(|r| r.id.is_temporary()) {
        println!();
        println!("* not yet confirmed by the server");
    }
    Ok(())
}

fn print_created(record: &Record) {
    println!("Created {}", record.label());
    println!("  ID: {}", record.id);
    if record.id.is_temporary() {
        println!("  Status: queued for sync");
    }
}

async fn add(engine: &OfflineEngine, owner: &str, draft: DraftCommand) -> Result<Record> {
    let record = match draft {
        DraftCommand::Task {
            title,
            description,
            due,
            due_time,
            priority,
            category,
            stress,
        } => {
            let mut task = NewTask::new(title);
            task.description = description;
            task.due_date = due;
            task.due_time = due_time;
            task.stress_level = stress;
            if let Some(priority) = priority {
                task.priority = priority;
            }
            if let Some(category) = category {
                task.category = category;
            }
            engine.add_task(owner, task).await?
        }
        DraftCommand::Mood { rating, comments } => {
            let mut entry = NewMoodEntry::new(rating);
            entry.comments = comments;
            engine.add_mood_entry(owner, entry).await?
        }
        DraftCommand::Journal { content, title } => {
            let mut entry = NewJournalEntry::new(content);
            entry.title = title;
            engine.add_journal_entry(owner, entry).await?
        }
        DraftCommand::Note {
            title,
            content,
            tags,
        } => {
            let mut note = NewAiNote::text(title, content);
            note.tags = tags;
            engine.save_note(owner, note).await?
        }
    };
    Ok(record)
}

fn print_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Completed(report) => {
            println!("Sync completed");
            println!("  Sent: {}", report.succeeded);
            println!("  Failed: {}", report.failed);
            println!("  Deferred: {}", report.deferred);
            println!("  Remaining: {}", report.remaining);
        }
        SyncOutcome::Skipped(reason) => println!("Sync skipped: {}", reason),
        SyncOutcome::Aborted(reason) => println!("Sync aborted: {}", reason),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.log_dir.as_ref())?;

    let config = load_config(&cli)?;
    let engine = build_engine(&cli, &config).await?;
    let user = cli.user.as_deref();

    match cli.command {
        Commands::List { kind, json } => {
            let owner = resolve_owner(&engine, user).await?;
            let records = engine.list(kind, &owner).await?;
            print_records(kind, &records, json)?;
        }

        Commands::Add { draft } => {
            let owner = resolve_owner(&engine, user).await?;
            let record = add(&engine, &owner, draft).await?;
            print_created(&record);
        }

        Commands::Update { kind, id, fields } => {
            let owner = resolve_owner(&engine, user).await?;
            let changes: Fields = fields.into_iter().collect();
            let id = RecordId::new(id);
            match engine.update(kind, &owner, &id, changes).await? {
                Some(record) => println!("Updated {}", record.label()),
                None => println!("Queued update for {} (not in local cache)", id),
            }
        }

        Commands::Delete { kind, id } => {
            let owner = resolve_owner(&engine, user).await?;
            engine.delete(kind, &owner, &RecordId::new(id.clone())).await?;
            println!("Deleted {}", id);
        }

        Commands::Guest { action } => match action {
            GuestAction::Enable => {
                let profile = engine.enable_guest_mode()?;
                println!("Guest mode enabled");
                println!("  Name: {}", profile.name);
                println!("  ID: {}", profile.id);
            }
            GuestAction::Migrate { user_id } => {
                let report = engine.migrate_guest_data(&user_id).await?;
                if !report.performed {
                    println!("Not in guest mode; nothing to migrate.");
                } else {
                    println!("Migrated {} records to {}", report.migrated, user_id);
                    for (kind, id) in &report.failed {
                        println!("  Lost {} {}", kind, id);
                    }
                }
            }
        },

        Commands::Sync => {
            let outcome = engine.sync_with_server().await?;
            print_outcome(&outcome);
        }

        Commands::Queue { json } => {
            let queue = engine.pending_queue()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&queue)?);
            } else if queue.is_empty() {
                println!("Queue is empty.");
            } else {
                for entry in &queue {
                    println!(
                        "{}  {:<8} {:<7} {}",
                        entry.id,
                        entry.kind.tag(),
                        entry.op.name(),
                        entry.op.target()
                    );
                }
            }
        }

        Commands::Status => {
            let identity = engine.active_identity().await?;
            println!("StudySync v0.1.0");
            println!();
            println!(
                "Connectivity: {}",
                if engine.is_online() { "online" } else { "offline" }
            );
            println!("Guest mode: {}", if engine.is_guest_mode()? { "on" } else { "off" });
            match identity.as_ref().map(|i| i.id()).or(user) {
                Some(id) => println!("User: {}", id),
                None => println!("User: (none)"),
            }
            println!("Pending writes: {}", engine.pending_queue()?.len());
            println!("Data directory: {}", config.data_dir.display());
        }

        Commands::Clear => {
            let owner = resolve_owner(&engine, user)
                .await
                .unwrap_or_else(|_| GUEST_USER_ID.to_string());
            engine.clear_offline_data(&owner)?;
            println!("Offline data cleared.");
        }

        Commands::Logout => {
            engine.logout()?;
            println!("Logged out; local data wiped.");
        }
    }

    Ok(())
}
