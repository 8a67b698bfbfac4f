use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use moka::future::Cache;
use rand::Rng;

use crate::core::report::ScanReport;

pub const DEFAULT_STORE_CAPACITY: u64 = 256;
pub const DEFAULT_STORE_TTL: Duration = Duration::from_secs(60 * 60);

/// A finished scan as kept by the store.
#[derive(Debug, Clone)]
pub struct StoredScan {
    pub id: String,
    pub report: Arc<ScanReport>,
    pub report_path: Option<PathBuf>,
}

/// Finished scans keyed by scan id. Entries leave on TTL expiry or when the
/// capacity bound evicts them.
#[derive(Clone)]
pub struct ScanStore {
    cache: Cache<String, StoredScan>,
}

impl ScanStore {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(max_capacity).time_to_live(ttl).build();
        info!("scan store initialized: capacity={}, ttl={}s", max_capacity, ttl.as_secs());
        Self { cache }
    }

    /// `<generated>-<random hex>`
    pub fn new_id(report: &ScanReport) -> String {
        let suffix: u32 = rand::rng().random();
        format!("{}-{:08x}", report.generated, suffix)
    }

    pub async fn insert(&self, report: ScanReport, report_path: Option<PathBuf>) -> StoredScan {
        let id = Self::new_id(&report);
        let entry = StoredScan {
            id: id.clone(),
            report: Arc::new(report),
            report_path,
        };
        self.cache.insert(id, entry.clone()).await;
        entry
    }

    pub async fn get(&self, id: &str) -> Option<StoredScan> {
        self.cache.get(id).await
    }

    pub async fn remove(&self, id: &str) -> Option<StoredScan> {
        self.cache.remove(id).await
    }

    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

impl Default for ScanStore {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_CAPACITY, DEFAULT_STORE_TTL)
    }
}
