//! Per-entity operations over the generic read and write paths.

use super::OfflineEngine;
use crate::error::SyncResult;
use crate::types::{
    EntityDraft, EntityKind, Fields, NewAiNote, NewJournalEntry, NewMoodEntry, NewTask, Record,
    RecordId,
};

impl OfflineEngine {
    /// Validate a draft and create it
    pub async fn create_draft<D: EntityDraft>(&self, owner_id: &str, draft: D) -> SyncResult<Record> {
        let fields = draft.into_fields()?;
        self.create(D::KIND, owner_id, fields).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Tasks
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn get_tasks(&self, owner_id: &str) -> SyncResult<Vec<Record>> {
        self.list(EntityKind::Task, owner_id).await
    }

    pub async fn add_task(&self, owner_id: &str, task: NewTask) -> SyncResult<Record> {
        self.create_draft(owner_id, task).await
    }

    pub async fn update_task(
        &self,
        owner_id: &str,
        id: &RecordId,
        changes: Fields,
    ) -> SyncResult<Option<Record>> {
        self.update(EntityKind::Task, owner_id, id, changes).await
    }

    pub async fn delete_task(&self, owner_id: &str, id: &RecordId) -> SyncResult<()> {
        self.delete(EntityKind::Task, owner_id, id).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Mood entries
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn get_mood_entries(&self, owner_id: &str) -> SyncResult<Vec<Record>> {
        self.list(EntityKind::MoodEntry, owner_id).await
    }

    pub async fn add_mood_entry(&self, owner_id: &str, entry: NewMoodEntry) -> SyncResult<Record> {
        self.create_draft(owner_id, entry).await
    }

    pub async fn update_mood_entry(
        &self,
        owner_id: &str,
        id: &RecordId,
        changes: Fields,
    ) -> SyncResult<Option<Record>> {
        self.update(EntityKind::MoodEntry, owner_id, id, changes).await
    }

    pub async fn delete_mood_entry(&self, owner_id: &str, id: &RecordId) -> SyncResult<()> {
        self.delete(EntityKind::MoodEntry, owner_id, id).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Journal entries
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn get_journal_entries(&self, owner_id: &str) -> SyncResult<Vec<Record>> {
        self.list(EntityKind::JournalEntry, owner_id).await
    }

    pub async fn add_journal_entry(
        &self,
        owner_id: &str,
        entry: NewJournalEntry,
    ) -> SyncResult<Record> {
        self.create_draft(owner_id, entry).await
    }

    pub async fn update_journal_entry(
        &self,
        owner_id: &str,
        id: &RecordId,
        changes: Fields,
    ) -> SyncResult<Option<Record>> {
        self.update(EntityKind::JournalEntry, owner_id, id, changes).await
    }

    pub async fn delete_journal_entry(&self, owner_id: &str, id: &RecordId) -> SyncResult<()> {
        self.delete(EntityKind::JournalEntry, owner_id, id).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // AI notes
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn get_notes(&self, owner_id: &str) -> SyncResult<Vec<Record>> {
        self.list(EntityKind::AiNote, owner_id).await
    }

    pub async fn save_note(&self, owner_id: &str, note: NewAiNote) -> SyncResult<Record> {
        self.create_draft(owner_id, note).await
    }

    pub async fn update_note(
        &self,
        owner_id: &str,
        id: &RecordId,
        changes: Fields,
    ) -> SyncResult<Option<Record>> {
        self.update(EntityKind::AiNote, owner_id, id, changes).await
    }

    pub async fn delete_note(&self, owner_id: &str, id: &RecordId) -> SyncResult<()> {
        self.delete(EntityKind::AiNote, owner_id, id).await
    }
}
