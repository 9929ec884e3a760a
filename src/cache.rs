//! Result cache: durable local persistence of finished cases plus the
//! best-effort reconciliation path to the server. A failed sync never drops a
//! case; it stays queued in its offline form for a later retry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::api::ApiClient;
use crate::errors::{StorageError, SyncError};
use crate::storage::{self, KeyValueStore};
use crate::types::CaseId;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedCaseData {
    pub case_id: CaseId,
    pub synced: bool,
    pub upgraded: bool,
    /// Call sites attach different payloads; everything else rides along.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CachedCaseData {
    pub fn new(case_id: CaseId) -> Self {
        Self {
            case_id,
            synced: false,
            upgraded: false,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

#[async_trait]
pub trait SyncBackend: Send + Sync {
    async fn push(&self, case: &CachedCaseData) -> Result<(), SyncError>;
}

/// POSTs cases to the sync endpoint; any 2xx response counts as accepted.
pub struct HttpSyncBackend {
    api: Arc<ApiClient>,
}

impl HttpSyncBackend {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl SyncBackend for HttpSyncBackend {
    async fn push(&self, case: &CachedCaseData) -> Result<(), SyncError> {
        self.api.sync_case(case.case_id.as_str(), case).await
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct CaseCache {
    store: Arc<dyn KeyValueStore>,
}

impl CaseCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Idempotent upsert keyed by `case_id`.
    pub fn cache_case(&self, case: &CachedCaseData) -> Result<(), StorageError> {
        storage::put_json(self.store.as_ref(), &storage::case_key(&case.case_id), case)
    }

    /// Unknown ids are `Ok(None)`, not an error.
    pub fn get_case(&self, case_id: &CaseId) -> Result<Option<CachedCaseData>, StorageError> {
        storage::get_json(self.store.as_ref(), &storage::case_key(case_id))
    }

    /// Attempt to push every queued offline case. Accepted cases are
    /// re-cached with `synced = true, upgraded = true`; rejected cases are
    /// left untouched for a later retry.
    pub async fn sync_queue(
        &self,
        queued: &[CachedCaseData],
        backend: &dyn SyncBackend,
    ) -> SyncReport {
        let mut report = SyncReport::default();

        for case in queued {
            match backend.push(case).await {
                Ok(()) => {
                    let mut upgraded = case.clone();
                    upgraded.synced = true;
                    upgraded.upgraded = true;
                    if let Err(e) = self.cache_case(&upgraded) {
                        log::warn!("synced case {} but could not re-cache: {e}", case.case_id);
                    }
                    report.synced += 1;
                }
                Err(e) => {
                    log::warn!("sync failed for case {}, keeping offline copy: {e}", case.case_id);
                    report.failed += 1;
                }
            }
        }

        report
    }
}
