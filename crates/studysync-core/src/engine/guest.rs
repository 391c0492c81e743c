//! Guest mode and guest-to-account migration.
//!
//! Guest data lives under the [`GUEST_USER_ID`] owner and never reaches the
//! gateway on its own. `migrate_guest_data` is the only way out: it pushes
//! every unconfirmed guest record to the new account once, then discards all
//! guest state whether or not every record made it.

use tracing::{debug, error, info, warn};

use super::OfflineEngine;
use crate::cache::{self, CollectionCache};
use crate::error::{SyncError, SyncResult};
use crate::events::{EngineEvent, MigrationReport};
use crate::storage::keys;
use crate::types::{EntityKind, GuestProfile, UserIdentity, GUEST_USER_ID};

const GUEST_MODE_ON: &str = "true";

impl OfflineEngine {
    /// Switch to guest mode, creating the guest profile on first use.
    pub fn enable_guest_mode(&self) -> SyncResult<GuestProfile> {
        if self.is_guest_mode()? {
            if let Some(profile) = self.guest_profile()? {
                debug!("Guest mode already enabled");
                return Ok(profile);
            }
        }

        let profile = GuestProfile::new();
        let raw = serde_json::to_string(&profile)?;
        self.inner.store.set(keys::USER_PROFILE, &raw)?;
        self.inner.store.set(keys::GUEST_MODE, GUEST_MODE_ON)?;
        info!("Guest mode enabled");
        Ok(profile)
    }

    pub fn is_guest_mode(&self) -> SyncResult<bool> {
        Ok(self.inner.store.get(keys::GUEST_MODE)?.as_deref() == Some(GUEST_MODE_ON))
    }

    /// The stored guest profile, if any
    pub fn guest_profile(&self) -> SyncResult<Option<GuestProfile>> {
        match self.inner.store.get(keys::USER_PROFILE)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Who the engine is acting for.
    ///
    /// The guest when guest mode is on; otherwise the gateway session, which
    /// is only asked while online. `None` when there is neither.
    pub async fn active_identity(&self) -> SyncResult<Option<UserIdentity>> {
        if self.is_guest_mode()? {
            let profile = self.guest_profile()?.unwrap_or_default();
            return Ok(Some(UserIdentity::Guest(profile)));
        }
        if !self.is_online() {
            return Ok(None);
        }
        match self.inner.gateway.current_user_id().await {
            Ok(id) => Ok(id.map(|id| UserIdentity::Authenticated { id })),
            Err(e) => {
                debug!(error = %e, "Session lookup failed");
                Ok(None)
            }
        }
    }

    /// Move guest data to `new_user_id`.
    ///
    /// No-op when not in guest mode. Each temporary-id guest record is created
    /// remotely under the new owner; failures are logged and skipped. Afterwards
    /// the guest collections, the sync queue, the guest flag and the guest
    /// profile are removed regardless of how many records failed.
    pub async fn migrate_guest_data(&self, new_user_id: &str) -> SyncResult<MigrationReport> {
        if !self.is_guest_mode()? {
            debug!("Not in guest mode, nothing to migrate");
            return Ok(MigrationReport::default());
        }
        let new_user_id = new_user_id.trim();
        if new_user_id.is_empty() || new_user_id == GUEST_USER_ID {
            return Err(SyncError::Migration(format!(
                "cannot migrate guest data to {:?}",
                new_user_id
            )));
        }

        info!(new_user_id, "Migrating guest data");
        let mut report = MigrationReport {
            performed: true,
            ..Default::default()
        };

        // All local reads happen before the first remote create; past that
        // point guest state is always cleared.
        let mut guest_data = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            guest_data.push((kind, self.inner.cache.load(kind, GUEST_USER_ID)?));
        }

        for (kind, records) in guest_data {
            let mut confirmed = Vec::new();
            for record in records.iter().filter(|r| r.id.is_temporary()) {
                match self.inner.gateway.create(kind, record, new_user_id).await {
                    Ok(server) => {
                        debug!(%kind, temp_id = %record.id, id = %server.id, "Migrated record");
                        confirmed.push(server);
                        report.migrated += 1;
                    }
                    Err(e) => {
                        warn!(%kind, id = %record.id, label = %record.label(), error = %e, "Failed to migrate record");
                        report.failed.push((kind, record.id.clone()));
                    }
                }
            }

            if !confirmed.is_empty() {
                // Keep migrated data readable for the new owner before the next refresh
                let seeded = self.inner.cache.modify(kind, new_user_id, |records| {
                    confirmed.retain(|server| !records.iter().any(|r| r.id == server.id));
                    cache::insert_batch(records, kind, confirmed);
                });
                if let Err(e) = seeded {
                    error!(%kind, new_user_id, error = %e, "Failed to seed migrated records, next refresh restores them");
                }
            }
        }

        let mut doomed = CollectionCache::keys_for_owner(GUEST_USER_ID);
        doomed.extend(
            [keys::GUEST_MODE, keys::USER_PROFILE, keys::SYNC_QUEUE, keys::ID_REMAPS]
                .iter()
                .map(|k| k.to_string()),
        );
        self.inner.store.remove_all(&doomed)?;

        info!(
            migrated = report.migrated,
            failed = report.failed.len(),
            "Guest migration finished"
        );
        self.emit(EngineEvent::GuestMigrated(report.clone()));
        Ok(report)
    }
}
