//! Remote Data Gateway contract.
//!
//! The engine talks to the hosted backend only through [`RemoteGateway`]:
//! CRUD per entity kind plus a session query. Every call returns an explicit
//! [`GatewayResult`]; nothing is expected to panic or throw past this seam.

use async_trait::async_trait;

use crate::error::{GatewayError, GatewayResult};
use crate::types::{EntityKind, Fields, Record, RecordId};

mod postgrest;

pub use postgrest::PostgrestGateway;

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// All records of `kind` owned by `owner_id`, newest first
    async fn list(&self, kind: EntityKind, owner_id: &str) -> GatewayResult<Vec<Record>>;

    /// Insert a record for `owner_id` and return the server's version of it.
    ///
    /// The server assigns the id; a temporary id on `record` is advisory.
    async fn create(
        &self,
        kind: EntityKind,
        record: &Record,
        owner_id: &str,
    ) -> GatewayResult<Record>;

    /// Merge `changes` into the record and return the updated version
    async fn update(
        &self,
        kind: EntityKind,
        id: &RecordId,
        changes: &Fields,
        owner_id: &str,
    ) -> GatewayResult<Record>;

    async fn delete(&self, kind: EntityKind, id: &RecordId, owner_id: &str) -> GatewayResult<()>;

    /// Id of the authenticated principal, `None` without a session
    async fn current_user_id(&self) -> GatewayResult<Option<String>>;
}

#[async_trait]
impl<T: RemoteGateway + ?Sized> RemoteGateway for std::sync::Arc<T> {
    async fn list(&self, kind: EntityKind, owner_id: &str) -> GatewayResult<Vec<Record>> {
        (**self).list(kind, owner_id).await
    }

    async fn create(
        &self,
        kind: EntityKind,
        record: &Record,
        owner_id: &str,
    ) -> GatewayResult<Record> {
        (**self).create(kind, record, owner_id).await
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &RecordId,
        changes: &Fields,
        owner_id: &str,
    ) -> GatewayResult<Record> {
        (**self).update(kind, id, changes, owner_id).await
    }

    async fn delete(&self, kind: EntityKind, id: &RecordId, owner_id: &str) -> GatewayResult<()> {
        (**self).delete(kind, id, owner_id).await
    }

    async fn current_user_id(&self) -> GatewayResult<Option<String>> {
        (**self).current_user_id().await
    }
}

/// Stand-in used when no backend is configured: every data call fails with a
/// network error and there is never a session, so writes stay queued.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredGateway;

impl UnconfiguredGateway {
    fn unavailable<T>() -> GatewayResult<T> {
        Err(GatewayError::Network("no gateway configured".into()))
    }
}

#[async_trait]
impl RemoteGateway for UnconfiguredGateway {
    async fn list(&self, _kind: EntityKind, _owner_id: &str) -> GatewayResult<Vec<Record>> {
        Self::unavailable()
    }

    async fn create(
        &self,
        _kind: EntityKind,
        _record: &Record,
        _owner_id: &str,
    ) -> GatewayResult<Record> {
        Self::unavailable()
    }

    async fn update(
        &self,
        _kind: EntityKind,
        _id: &RecordId,
        _changes: &Fields,
        _owner_id: &str,
    ) -> GatewayResult<Record> {
        Self::unavailable()
    }

    async fn delete(&self, _kind: EntityKind, _id: &RecordId, _owner_id: &str) -> GatewayResult<()> {
        Self::unavailable()
    }

    async fn current_user_id(&self) -> GatewayResult<Option<String>> {
        Ok(None)
    }
}
