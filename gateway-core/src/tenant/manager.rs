//! Central in-memory tenant directory and bounded cache.
//!
//! A single [`tokio::sync::Mutex`] guards the map structures (`instances`,
//! `token_index`, `resolvers`); the simplest-correct option spec.md §9 calls
//! out. Per-tenant fields (`status`, `config`, `llm_api_key`,
//! `pending_requests`, `last_activity_at`) live behind their own
//! `parking_lot::Mutex`/atomics on [`TenantInstance`] so a request's
//! increment/decrement never has to contend for the map lock. The lock is
//! only held across short critical sections — never across a remote
//! verify call or a background sync fetch — so one slow authenticator's own
//! I/O cannot block anyone else's.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cloud::messages::CloudTenantRecord;
use crate::cloud::CloudBackend;
use crate::error::{GatewayError, Result};
use crate::paths::TenantPaths;
use crate::provision::{provision_user, ProvisionInputs};
use crate::tenant::events::{EventBus, GatewayEvent};
use crate::tenant::{EvictionReason, TenantInstance, TenantStatus};
use crate::workspace::WorkspaceResolver;

#[derive(Debug, Clone)]
pub struct TenantManagerConfig {
    pub config_root: Utf8PathBuf,
    pub workspace_root: Utf8PathBuf,
    pub template_path: Option<Utf8PathBuf>,
    pub llm_proxy_base_url: Option<String>,
    pub max_cached_users: usize,
    pub user_idle_timeout: Duration,
}

impl Default for TenantManagerConfig {
    fn default() -> Self {
        Self {
            config_root: Utf8PathBuf::from("/etc/gateway/tenants"),
            workspace_root: Utf8PathBuf::from("/var/lib/gateway/workspaces"),
            template_path: None,
            llm_proxy_base_url: None,
            max_cached_users: 100,
            user_idle_timeout: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Stats {
    pub cached_instances: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub sync_failures: u32,
    /// Epoch milliseconds, 0 if no sync has ever completed.
    pub last_sync_at_ms: i64,
}

struct ManagerMaps {
    /// `BTreeMap` gives deterministic, stable iteration order for the
    /// eviction scan's tie-break rule (spec.md §4.4) without an extra
    /// dependency for insertion-ordered maps.
    instances: BTreeMap<String, Arc<TenantInstance>>,
    token_index: BTreeMap<String, String>,
    resolvers: BTreeMap<String, WorkspaceResolver>,
}

impl ManagerMaps {
    fn new() -> Self {
        Self {
            instances: BTreeMap::new(),
            token_index: BTreeMap::new(),
            resolvers: BTreeMap::new(),
        }
    }
}

pub struct TenantManager {
    config: TenantManagerConfig,
    cloud: Arc<dyn CloudBackend>,
    maps: Mutex<ManagerMaps>,
    events: EventBus,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    sync_failures: AtomicU32,
    last_sync_at_ms: AtomicI64,
    cleanup_cancel: Mutex<Option<CancellationToken>>,
}

impl TenantManager {
    pub fn new(config: TenantManagerConfig, cloud: Arc<dyn CloudBackend>) -> Arc<Self> {
        Arc::new(Self {
            config,
            cloud,
            maps: Mutex::new(ManagerMaps::new()),
            events: EventBus::new(),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            sync_failures: AtomicU32::new(0),
            last_sync_at_ms: AtomicI64::new(0),
            cleanup_cancel: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> Stats {
        // `try_lock` would be ideal for a read-only snapshot, but stats is
        // queried rarely (CLI, Monitor) so a brief wait for the map lock is
        // fine and keeps the snapshot consistent with counters.
        let cached_instances = self
            .maps
            .try_lock()
            .map(|m| m.instances.len())
            .unwrap_or(0);
        Stats {
            cached_instances,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            sync_failures: self.sync_failures.load(Ordering::Relaxed),
            last_sync_at_ms: self.last_sync_at_ms.load(Ordering::Relaxed),
        }
    }

    /// Begin the 1 Hz cleanup tick. Idempotent: calling twice while already
    /// running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut guard = self.cleanup_cancel.lock().await;
        if guard.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        *guard = Some(cancel.clone());
        drop(guard);

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.cleanup_inactive().await;
                    }
                }
            }
        });
    }

    /// Cancel the periodic cleanup tick. Existing instances remain cached
    /// for graceful drain; in-flight requests are unaffected.
    pub async fn stop(&self) {
        if let Some(cancel) = self.cleanup_cancel.lock().await.take() {
            cancel.cancel();
        }
    }

    fn paths_for(&self, user_id: &str) -> Result<TenantPaths> {
        TenantPaths::derive(&self.config.config_root, &self.config.workspace_root, user_id)
    }

    /// `None` means "authentication failed" (invalid/unknown/suspended/
    /// expired token, or a transport failure talking upstream) — never an
    /// error the caller should retry on the core's behalf.
    pub async fn authenticate_token(&self, token: &str) -> Option<String> {
        {
            let maps = self.maps.lock().await;
            if let Some(user_id) = maps.token_index.get(token) {
                if let Some(instance) = maps.instances.get(user_id) {
                    match instance.status() {
                        TenantStatus::Active => {
                            instance.touch();
                            self.cache_hits.fetch_add(1, Ordering::Relaxed);
                            crate::metrics::record_cache_hit();
                            return Some(user_id.clone());
                        }
                        TenantStatus::Suspended => {
                            self.events.publish(GatewayEvent::UserSuspended {
                                user_id: user_id.clone(),
                            });
                            return None;
                        }
                        TenantStatus::Expired => {
                            self.events.publish(GatewayEvent::UserExpired {
                                user_id: user_id.clone(),
                            });
                            return None;
                        }
                    }
                }
            }
        }

        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_miss();

        let data = match self.cloud.verify_token(token).await {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "token verification transport failure");
                return None;
            }
        };

        if data.status != TenantStatus::Active {
            return None;
        }

        let record = CloudTenantRecord {
            user_id: data.user_id.clone(),
            gateway_token: token.to_string(),
            openclaw_config: data.openclaw_config,
            status: data.status,
            llm_api_key: None,
            updated_at: String::new(),
        };

        if let Err(e) = self.load_record(&record).await {
            tracing::warn!(error = %e, user_id = %record.user_id, "failed to materialize tenant after verify");
            return None;
        }

        Some(data.user_id)
    }

    /// Cache-or-load a tenant by user id. Returns `Ok(None)` (not an error)
    /// when no on-disk config exists for this user.
    pub async fn get_instance(&self, user_id: &str) -> Result<Option<Arc<TenantInstance>>> {
        {
            let maps = self.maps.lock().await;
            if let Some(instance) = maps.instances.get(user_id) {
                instance.touch();
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_hit();
                return Ok(Some(Arc::clone(instance)));
            }
        }

        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_miss();

        let paths = self.paths_for(user_id)?;
        let content = match tokio::fs::read_to_string(&paths.config_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredTenantConfig = serde_json::from_str(&content)
            .map_err(|e| GatewayError::transient_upstream(format!("corrupt config: {e}")))?;

        provision_user(
            &paths,
            &ProvisionInputs {
                llm_api_key: stored.llm_api_key.as_deref(),
                llm_proxy_base_url: self.config.llm_proxy_base_url.as_deref(),
            },
        )
        .await?;

        let instance = Arc::new(TenantInstance::new(
            paths.user_id.clone(),
            stored.gateway_token.clone(),
            stored.status,
            stored.config,
            stored.llm_api_key,
            paths.workspace_path.clone(),
            paths.config_path.clone(),
        ));

        let resolver = WorkspaceResolver::new(
            paths.user_id.clone(),
            paths.workspace_path.clone(),
            self.config.template_path.clone(),
        );

        {
            let mut maps = self.maps.lock().await;
            if let Some(token) = &stored.gateway_token {
                maps.token_index
                    .insert(token.clone(), paths.user_id.clone());
            }
            maps.instances
                .insert(paths.user_id.clone(), Arc::clone(&instance));
            maps.resolvers.insert(paths.user_id.clone(), resolver);
        }

        self.events.publish(GatewayEvent::UserLoaded {
            user_id: paths.user_id.clone(),
        });
        tracing::info!(user_id = %paths.user_id, "tenant loaded");

        Ok(Some(instance))
    }

    pub async fn resolver_for(&self, user_id: &str) -> Option<WorkspaceResolver> {
        self.maps.lock().await.resolvers.get(user_id).cloned()
    }

    /// Persist `record` to disk and, if cached, patch the live instance in
    /// place — never overwriting a sync in flight with a torn state.
    async fn load_record(&self, record: &CloudTenantRecord) -> Result<()> {
        let paths = self.paths_for(&record.user_id)?;
        let stored = StoredTenantConfig {
            gateway_token: Some(record.gateway_token.clone()),
            config: record.openclaw_config.clone(),
            status: record.status,
            llm_api_key: record.llm_api_key.clone(),
        };
        crate::workspace::create_private_dir_all(
            paths
                .config_path
                .parent()
                .expect("config path always has a parent"),
        )
        .await?;
        let serialized = serde_json::to_string_pretty(&stored)
            .map_err(|e| GatewayError::transient_upstream(e.to_string()))?;
        tokio::fs::write(&paths.config_path, serialized).await?;
        set_private_file_mode(&paths.config_path).await?;

        provision_user(
            &paths,
            &ProvisionInputs {
                llm_api_key: record.llm_api_key.as_deref(),
                llm_proxy_base_url: self.config.llm_proxy_base_url.as_deref(),
            },
        )
        .await?;

        let mut maps = self.maps.lock().await;

        // Token rebinding: sever any prior (user, token) link that pointed
        // elsewhere before this token is re-bound.
        if let Some(previous_owner) = maps.token_index.get(&record.gateway_token).cloned() {
            if previous_owner != record.user_id {
                maps.token_index.remove(&record.gateway_token);
            }
        }
        maps.token_index
            .insert(record.gateway_token.clone(), record.user_id.clone());

        if let Some(instance) = maps.instances.get(&record.user_id) {
            *instance.status.lock() = record.status;
            *instance.config.lock() = record.openclaw_config.clone();
            *instance.llm_api_key.lock() = record.llm_api_key.clone();
            instance.touch();
        } else {
            let instance = Arc::new(TenantInstance::new(
                record.user_id.clone(),
                Some(record.gateway_token.clone()),
                record.status,
                record.openclaw_config.clone(),
                record.llm_api_key.clone(),
                paths.workspace_path.clone(),
                paths.config_path.clone(),
            ));
            maps.instances.insert(record.user_id.clone(), instance);
            maps.resolvers.insert(
                record.user_id.clone(),
                WorkspaceResolver::new(
                    record.user_id.clone(),
                    paths.workspace_path.clone(),
                    self.config.template_path.clone(),
                ),
            );
        }

        Ok(())
    }

    /// Bulk-apply tenant records pulled by the synchronizer. One failing
    /// record is logged and skipped; it does not abort the batch.
    pub async fn update_configs(&self, records: &[CloudTenantRecord]) -> usize {
        let mut applied = 0usize;
        for record in records {
            match self.load_record(record).await {
                Ok(()) => {
                    applied += 1;
                    match record.status {
                        TenantStatus::Suspended => {
                            self.events.publish(GatewayEvent::UserSuspended {
                                user_id: record.user_id.clone(),
                            });
                        }
                        TenantStatus::Expired => {
                            self.events.publish(GatewayEvent::UserExpired {
                                user_id: record.user_id.clone(),
                            });
                        }
                        TenantStatus::Active => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, user_id = %record.user_id, "failed to apply synced record, skipping");
                }
            }
        }

        self.last_sync_at_ms.store(now_ms(), Ordering::Relaxed);
        self.sync_failures.store(0, Ordering::Relaxed);
        self.events.publish(GatewayEvent::ConfigSynced {
            count: applied,
            timestamp_epoch_ms: now_ms(),
        });

        applied
    }

    pub fn record_sync_failure(&self, message: &str) {
        let consecutive = self.sync_failures.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::error!(error = %message, consecutive_failures = consecutive, "sync failed");
        self.events.publish(GatewayEvent::SyncFailed {
            error: message.to_string(),
            consecutive_failures: consecutive,
        });
    }

    pub async fn increment_pending(&self, user_id: &str) {
        let maps = self.maps.lock().await;
        if let Some(instance) = maps.instances.get(user_id) {
            instance.increment_pending();
        }
    }

    pub async fn decrement_pending(&self, user_id: &str) {
        let maps = self.maps.lock().await;
        if let Some(instance) = maps.instances.get(user_id) {
            instance.decrement_pending();
        }
    }

    /// Two-pass sweep: evict idle instances, then enforce the LRU cap.
    /// Holding the map lock across the whole sweep is what guarantees
    /// ordering guarantee (c) in spec.md §5 — a sync that just patched an
    /// instance's activity timestamp can't race a concurrent cleanup pass.
    pub async fn cleanup_inactive(&self) {
        let mut maps = self.maps.lock().await;
        let now = now_ms();
        let idle_timeout_ms = self.config.user_idle_timeout.as_millis() as i64;

        let idle_candidates: Vec<String> = maps
            .instances
            .iter()
            .filter(|(_, instance)| {
                instance.pending_requests() == 0
                    && now.saturating_sub(instance.last_activity_at_ms()) > idle_timeout_ms
            })
            .map(|(user_id, _)| user_id.clone())
            .collect();

        for user_id in idle_candidates {
            self.remove_locked(&mut maps, &user_id, EvictionReason::Idle);
        }

        while maps.instances.len() > self.config.max_cached_users {
            let oldest = maps
                .instances
                .iter()
                .filter(|(_, instance)| instance.pending_requests() == 0)
                .min_by_key(|(_, instance)| instance.last_activity_at_ms())
                .map(|(user_id, _)| user_id.clone());

            match oldest {
                Some(user_id) => self.remove_locked(&mut maps, &user_id, EvictionReason::Lru),
                None => break, // everything remaining has pending work
            }
        }
    }

    /// Unconditional removal unless `force` is false and the instance has
    /// pending work — spec.md §9's open question resolves to "refuse by
    /// default", matching invariant (4) rather than the source's
    /// unconditional behavior.
    pub async fn force_evict(&self, user_id: &str, force: bool) -> bool {
        let mut maps = self.maps.lock().await;
        let Some(instance) = maps.instances.get(user_id) else {
            return false;
        };
        if !force && instance.pending_requests() > 0 {
            return false;
        }
        self.remove_locked(&mut maps, user_id, EvictionReason::Manual);
        true
    }

    fn remove_locked(&self, maps: &mut ManagerMaps, user_id: &str, reason: EvictionReason) {
        if maps.instances.remove(user_id).is_none() {
            return;
        }
        maps.resolvers.remove(user_id);
        maps.token_index.retain(|_, owner| owner != user_id);
        self.events.publish(GatewayEvent::UserEvicted {
            user_id: user_id.to_string(),
            reason,
        });
        tracing::info!(user_id, reason = reason.as_str(), "tenant evicted");
    }

    pub async fn cached_user_ids(&self) -> Vec<String> {
        self.maps.lock().await.instances.keys().cloned().collect()
    }

    pub async fn is_cached(&self, user_id: &str) -> bool {
        self.maps.lock().await.instances.contains_key(user_id)
    }

    /// Sum of `pending_requests` across every cached instance, for the
    /// `gateway_pending_requests` gauge a Monitor tick pushes.
    pub async fn pending_requests_sum(&self) -> i64 {
        self.maps
            .lock()
            .await
            .instances
            .values()
            .map(|instance| instance.pending_requests() as i64)
            .sum()
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StoredTenantConfig {
    gateway_token: Option<String>,
    config: Value,
    status: TenantStatus,
    llm_api_key: Option<String>,
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

#[cfg(unix)]
async fn set_private_file_mode(path: &camino::Utf8Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_private_file_mode(_path: &camino::Utf8Path) -> Result<()> {
    Ok(())
}
