//! Typed drafts for each entity kind.
//!
//! Drafts are what callers fill in to create a record. They serialize into the
//! open [`Fields`] map carried by [`Record`](super::Record), so the cache and
//! gateway never need to know the concrete shape.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::{EntityKind, Fields};
use crate::error::{SyncError, SyncResult};

/// A value that can become the fields of a new record of one kind.
pub trait EntityDraft: Serialize {
    const KIND: EntityKind;

    /// Check invariants the UI would otherwise enforce.
    fn validate(&self) -> SyncResult<()> {
        Ok(())
    }

    fn into_fields(self) -> SyncResult<Fields>
    where
        Self: Sized,
    {
        self.validate()?;
        match serde_json::to_value(&self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(SyncError::InvalidRecord(format!(
                "{} draft serialized to non-object {}",
                Self::KIND,
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_time: Option<NaiveTime>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_category")]
    pub category: String,
    /// 1 (calm) to 5 (overwhelmed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress_level: Option<u8>,
    #[serde(default)]
    pub completed: bool,
}

fn default_category() -> String {
    "general".to_string()
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            due_date: None,
            due_time: None,
            priority: Priority::default(),
            category: default_category(),
            stress_level: None,
            completed: false,
        }
    }
}

impl EntityDraft for NewTask {
    const KIND: EntityKind = EntityKind::Task;

    fn validate(&self) -> SyncResult<()> {
        if self.title.trim().is_empty() {
            return Err(SyncError::InvalidRecord("task title is empty".into()));
        }
        if let Some(level) = self.stress_level {
            if !(1..=5).contains(&level) {
                return Err(SyncError::InvalidRecord(format!(
                    "stress level {} outside 1..=5",
                    level
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMoodEntry {
    /// 1 (low) to 5 (great)
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

impl NewMoodEntry {
    pub fn new(rating: u8) -> Self {
        Self {
            rating,
            comments: None,
        }
    }
}

impl EntityDraft for NewMoodEntry {
    const KIND: EntityKind = EntityKind::MoodEntry;

    fn validate(&self) -> SyncResult<()> {
        if !(1..=5).contains(&self.rating) {
            return Err(SyncError::InvalidRecord(format!(
                "mood rating {} outside 1..=5",
                self.rating
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJournalEntry {
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
}

impl NewJournalEntry {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            title: None,
            content: content.into(),
        }
    }
}

impl EntityDraft for NewJournalEntry {
    const KIND: EntityKind = EntityKind::JournalEntry;

    fn validate(&self) -> SyncResult<()> {
        if self.content.trim().is_empty() {
            return Err(SyncError::InvalidRecord("journal entry is empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    #[default]
    Text,
    Recording,
    Document,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    #[default]
    Completed,
    Failed,
}

/// An AI note as produced by the (external) transcription/summary service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAiNote {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub note_type: NoteType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file_size: Option<u64>,
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<u32>,
    #[serde(default)]
    pub processing_status: ProcessingStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Fields::new())
}

impl Default for NewAiNote {
    fn default() -> Self {
        Self {
            title: String::new(),
            content: String::new(),
            transcript: None,
            ai_summary: None,
            note_type: NoteType::default(),
            source_file_name: None,
            source_file_type: None,
            source_file_size: None,
            audio_duration: None,
            processing_status: ProcessingStatus::default(),
            tags: Vec::new(),
            metadata: empty_object(),
        }
    }
}

impl NewAiNote {
    pub fn text(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }
}

impl EntityDraft for NewAiNote {
    const KIND: EntityKind = EntityKind::AiNote;

    fn validate(&self) -> SyncResult<()> {
        if self.title.trim().is_empty() {
            return Err(SyncError::InvalidRecord("note title is empty".into()));
        }
        if !self.metadata.is_object() {
            return Err(SyncError::InvalidRecord("note metadata must be an object".into()));
        }
        Ok(())
    }
}
