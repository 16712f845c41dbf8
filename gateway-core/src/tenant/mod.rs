//! In-memory tenant directory: [`TenantInstance`], status, and the manager
//! that owns a cache of them.

pub mod events;
pub mod manager;

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use manager::{Stats, TenantManager, TenantManagerConfig};

/// Only `Active` tenants may authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Expired,
}

/// The authoritative in-memory record for a loaded user.
///
/// `last_activity_at` and `pending_requests` are atomics rather than
/// `Mutex`-guarded fields so that [`TenantManager::increment_pending`] /
/// `decrement_pending` can update them without holding the manager lock
/// across an `.await` — only the cleanup pass needs a consistent read of
/// every instance at once, and it takes the manager lock for that.
#[derive(Debug)]
pub struct TenantInstance {
    pub user_id: String,
    pub gateway_token: Option<String>,
    pub status: parking_lot::Mutex<TenantStatus>,
    pub config: parking_lot::Mutex<Value>,
    pub llm_api_key: parking_lot::Mutex<Option<String>>,
    pub workspace_path: Utf8PathBuf,
    pub config_path: Utf8PathBuf,
    last_activity_at_epoch_ms: AtomicI64,
    pending_requests: AtomicU32,
}

impl TenantInstance {
    pub fn new(
        user_id: String,
        gateway_token: Option<String>,
        status: TenantStatus,
        config: Value,
        llm_api_key: Option<String>,
        workspace_path: Utf8PathBuf,
        config_path: Utf8PathBuf,
    ) -> Self {
        Self {
            user_id,
            gateway_token,
            status: parking_lot::Mutex::new(status),
            config: parking_lot::Mutex::new(config),
            llm_api_key: parking_lot::Mutex::new(llm_api_key),
            workspace_path,
            config_path,
            last_activity_at_epoch_ms: AtomicI64::new(now_ms()),
            pending_requests: AtomicU32::new(0),
        }
    }

    pub fn status(&self) -> TenantStatus {
        *self.status.lock()
    }

    pub fn last_activity_at_ms(&self) -> i64 {
        self.last_activity_at_epoch_ms.load(Ordering::Acquire)
    }

    pub fn touch(&self) {
        self.last_activity_at_epoch_ms
            .store(now_ms(), Ordering::Release);
    }

    pub fn pending_requests(&self) -> u32 {
        self.pending_requests.load(Ordering::Acquire)
    }

    pub(crate) fn increment_pending(&self) {
        self.pending_requests.fetch_add(1, Ordering::AcqRel);
        self.touch();
    }

    /// Decrementing below zero is a programmer error elsewhere, but the
    /// contract (spec.md invariant 3) says this call is a defensive no-op
    /// when the counter is already at zero rather than a panic.
    pub(crate) fn decrement_pending(&self) {
        let _ = self
            .pending_requests
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n == 0 {
                    None
                } else {
                    Some(n - 1)
                }
            });
        self.touch();
    }

    /// Backdate the activity clock so idle/LRU eviction tests don't have to
    /// sleep in real time. Not exposed outside test builds.
    #[cfg(any(test, feature = "testing"))]
    pub fn last_activity_at_ms_for_test(&self, epoch_ms: i64) {
        self.last_activity_at_epoch_ms
            .store(epoch_ms, Ordering::Release);
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

/// Reason an instance was removed from the cache, carried on the
/// `user-evicted` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Idle,
    Lru,
    Manual,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::Idle => "idle",
            EvictionReason::Lru => "lru",
            EvictionReason::Manual => "manual",
        }
    }
}
