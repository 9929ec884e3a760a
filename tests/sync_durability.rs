//! Durability of the cached-case store across sync attempts, on the real
//! file-backed store.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use sproutline::cache::{CachedCaseData, CaseCache, SyncBackend};
use sproutline::errors::SyncError;
use sproutline::storage::FileStore;
use sproutline::types::CaseId;

struct FlakyBackend {
    reject: &'static str,
    attempts: Mutex<usize>,
}

#[async_trait]
impl SyncBackend for FlakyBackend {
    async fn push(&self, case: &CachedCaseData) -> Result<(), SyncError> {
        *self.attempts.lock().unwrap() += 1;
        if case.case_id.as_str() == self.reject {
            return Err(SyncError::Rejected {
                case_id: case.case_id.to_string(),
                status: 503,
            });
        }
        Ok(())
    }
}

fn seeded_cache(dir: &TempDir, ids: &[&str]) -> (CaseCache, Vec<CachedCaseData>) {
    let cache = CaseCache::new(Arc::new(FileStore::new(dir.path())));
    let cases: Vec<CachedCaseData> = ids
        .iter()
        .map(|id| {
            CachedCaseData::new(CaseId::new(*id))
                .with_field("risk", "monitor".into())
                .with_field("age_months", 24.into())
        })
        .collect();
    for case in &cases {
        cache.cache_case(case).unwrap();
    }
    (cache, cases)
}

#[tokio::test]
async fn rejected_case_survives_for_retry() {
    let tmp = TempDir::new().unwrap();
    let (cache, cases) = seeded_cache(&tmp, &["a", "b", "c", "d"]);

    let backend = FlakyBackend {
        reject: "c",
        attempts: Mutex::new(0),
    };
    let report = cache.sync_queue(&cases, &backend).await;
    assert_eq!(report.synced, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(*backend.attempts.lock().unwrap(), 4);

    // All four cases remain retrievable; only the rejected one is unsynced.
    for case in &cases {
        let stored = cache.get_case(&case.case_id).unwrap().unwrap();
        if case.case_id.as_str() == "c" {
            assert!(!stored.synced && !stored.upgraded);
            assert_eq!(&stored, case);
        } else {
            assert!(stored.synced && stored.upgraded);
        }
    }
}

#[tokio::test]
async fn retry_after_recovery_upgrades_the_remaining_case() {
    let tmp = TempDir::new().unwrap();
    let (cache, cases) = seeded_cache(&tmp, &["a", "b"]);

    let failing = FlakyBackend {
        reject: "b",
        attempts: Mutex::new(0),
    };
    cache.sync_queue(&cases, &failing).await;

    // Next pass with a healthy backend picks up the leftover offline case.
    let pending: Vec<CachedCaseData> = cases
        .iter()
        .filter_map(|c| cache.get_case(&c.case_id).unwrap())
        .filter(|c| !c.synced)
        .collect();
    assert_eq!(pending.len(), 1);

    let healthy = FlakyBackend {
        reject: "",
        attempts: Mutex::new(0),
    };
    let report = cache.sync_queue(&pending, &healthy).await;
    assert_eq!(report.synced, 1);

    let stored = cache.get_case(&CaseId::new("b")).unwrap().unwrap();
    assert!(stored.synced && stored.upgraded);
    assert_eq!(stored.fields["risk"], "monitor");
}

#[test]
fn reload_from_disk_preserves_payload() {
    let tmp = TempDir::new().unwrap();
    let (cache, cases) = seeded_cache(&tmp, &["persist"]);
    drop(cache);

    // A fresh cache over the same directory sees the same entry.
    let reopened = CaseCache::new(Arc::new(FileStore::new(tmp.path())));
    let stored = reopened.get_case(&cases[0].case_id).unwrap().unwrap();
    assert_eq!(stored, cases[0]);
}
