//! Core types for StudySync
//!
//! Every user-owned entity (task, mood entry, journal entry, AI note) is held
//! as a [`Record`]: a few fixed columns plus an open JSON field map that is
//! mirrored verbatim between the local cache and the remote gateway.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use ulid::{Generator, Ulid};

mod entities;
mod identity;

pub use entities::{
    EntityDraft, NewAiNote, NewJournalEntry, NewMoodEntry, NewTask, NoteType, Priority,
    ProcessingStatus,
};
pub use identity::{GuestProfile, UserIdentity, GUEST_USER_ID};

/// Entity-specific fields of a record
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Reserved prefix for locally-minted record ids
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Columns owned by the engine; change sets never overwrite them.
const RESERVED_FIELDS: [&str; 4] = ["id", "user_id", "created_at", "updated_at"];

pub(crate) fn next_ulid() -> Ulid {
    static GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();
    let generator = GENERATOR.get_or_init(|| Mutex::new(Generator::new()));
    // Overflow only happens after 2^80 ids in one millisecond.
    generator.lock().generate().unwrap_or_else(|_| Ulid::new())
}

/// The kinds of user data the engine caches and syncs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "task")]
    Task,
    #[serde(rename = "feeling")]
    MoodEntry,
    #[serde(rename = "journal")]
    JournalEntry,
    #[serde(rename = "ai_note")]
    AiNote,
}

/// Where an optimistic create lands in its cached collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// Oldest first
    Append,
    /// Newest first
    Prepend,
}

impl EntityKind {
    /// All kinds, in migration order
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Task,
        EntityKind::MoodEntry,
        EntityKind::JournalEntry,
        EntityKind::AiNote,
    ];

    /// Stable tag used in queue entries
    pub fn tag(&self) -> &'static str {
        match self {
            EntityKind::Task => "task",
            EntityKind::MoodEntry => "feeling",
            EntityKind::JournalEntry => "journal",
            EntityKind::AiNote => "ai_note",
        }
    }

    /// Local Store key prefix for this kind's collections
    pub fn collection_prefix(&self) -> &'static str {
        match self {
            EntityKind::Task => "offline_tasks",
            EntityKind::MoodEntry => "offline_feelings",
            EntityKind::JournalEntry => "offline_journal",
            EntityKind::AiNote => "offline_ai_notes",
        }
    }

    /// Local Store key of the collection owned by `owner_id`
    pub fn collection_key(&self, owner_id: &str) -> String {
        format!("{}:{}", self.collection_prefix(), owner_id)
    }

    /// Remote table backing this kind
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Task => "tasks",
            EntityKind::MoodEntry => "feelings",
            EntityKind::JournalEntry => "journal_entries",
            EntityKind::AiNote => "ai_notes",
        }
    }

    pub fn insertion(&self) -> Insertion {
        match self {
            EntityKind::Task => Insertion::Append,
            _ => Insertion::Prepend,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "task" | "tasks" => Ok(EntityKind::Task),
            "feeling" | "feelings" | "mood" | "moods" => Ok(EntityKind::MoodEntry),
            "journal" | "journals" | "entry" | "entries" => Ok(EntityKind::JournalEntry),
            "ai_note" | "note" | "notes" => Ok(EntityKind::AiNote),
            other => Err(format!(
                "unknown entity kind '{}' (expected task, mood, journal or note)",
                other
            )),
        }
    }
}

/// Identifier of a record, either server-assigned or locally minted.
///
/// Temporary ids carry [`TEMP_ID_PREFIX`] followed by a time-ordered ULID;
/// they are unique per device and are replaced once the server confirms the
/// creating mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Wrap an existing id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh temporary id
    pub fn temporary() -> Self {
        Self(format!("{}{}", TEMP_ID_PREFIX, next_ulid()))
    }

    /// Whether this id was minted locally and never confirmed by the server
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// Backends hand out either text (uuid) or integer primary keys.
impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Int(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => RecordId(s),
            RawId::Int(n) => RecordId(n.to_string()),
        })
    }
}

/// A snapshot of one user-owned entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    /// Owner (foreign key to the user identity)
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Entity-specific columns
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    /// Build a not-yet-confirmed record with a temporary id.
    pub fn new_local(owner_id: impl Into<String>, fields: Fields) -> Self {
        let now = Utc::now();
        let mut fields = fields;
        for key in RESERVED_FIELDS {
            fields.remove(key);
        }
        Self {
            id: RecordId::temporary(),
            user_id: owner_id.into(),
            created_at: now,
            updated_at: Some(now),
            fields,
        }
    }

    /// Merge a change set into this record and bump `updated_at`.
    ///
    /// Engine-owned columns in `changes` are ignored.
    pub fn apply_changes(&mut self, changes: &Fields) {
        for (key, value) in changes {
            if RESERVED_FIELDS.contains(&key.as_str()) {
                continue;
            }
            self.fields.insert(key.clone(), value.clone());
        }
        self.updated_at = Some(Utc::now());
    }

    /// Read a string column
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }

    /// Short human-readable label (title, else content, else id)
    pub fn label(&self) -> String {
        self.field_str("title")
            .filter(|s| !s.is_empty())
            .or_else(|| self.field_str("content"))
            .map(str::to_string)
            .unwrap_or_else(|| self.id.to_string())
    }
}
