//! End-to-end scenario tests (spec.md §8, S1-S6) exercising the public
//! `TenantManager`/`ConfigSynchronizer` API against an in-process fake cloud
//! backend rather than a real HTTP server — the same "closure-backed stub"
//! seam the unit tests colocated in each module use, just driven here at
//! the crate's public surface instead of against private internals.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gateway_core::alert::test_support::CollectingAlertSink;
use gateway_core::cloud::messages::{CloudTenantRecord, ConfigsResponse, VerifyTokenData};
use gateway_core::cloud::CloudBackend;
use gateway_core::sync::{ConfigSynchronizer, ConfigSynchronizerConfig};
use gateway_core::tenant::{TenantManager, TenantManagerConfig, TenantStatus};
use gateway_core::Result;

struct FakeCloud {
    verify: std::sync::Mutex<Option<VerifyTokenData>>,
    pages: std::sync::Mutex<Vec<ConfigsResponse>>,
    fetch_calls: AtomicUsize,
}

impl FakeCloud {
    fn empty() -> Self {
        Self {
            verify: std::sync::Mutex::new(None),
            pages: std::sync::Mutex::new(Vec::new()),
            fetch_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CloudBackend for FakeCloud {
    async fn verify_token(&self, _token: &str) -> Result<Option<VerifyTokenData>> {
        Ok(self.verify.lock().unwrap().take())
    }

    async fn fetch_configs(&self, _since: Option<&str>) -> Result<ConfigsResponse> {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);
        let mut pages = self.pages.lock().unwrap();
        if pages.is_empty() {
            return Err(gateway_core::GatewayError::transient_upstream(
                "no more scripted pages",
            ));
        }
        Ok(pages.remove(0))
    }
}

fn manager_config(root: &camino::Utf8Path, max_cached_users: usize, idle_timeout: Duration) -> TenantManagerConfig {
    TenantManagerConfig {
        config_root: root.join("config"),
        workspace_root: root.join("workspace"),
        template_path: None,
        llm_proxy_base_url: None,
        max_cached_users,
        user_idle_timeout: idle_timeout,
    }
}

fn active_record(user_id: &str, token: &str) -> CloudTenantRecord {
    CloudTenantRecord {
        user_id: user_id.to_string(),
        gateway_token: token.to_string(),
        openclaw_config: serde_json::json!({}),
        status: TenantStatus::Active,
        llm_api_key: None,
        updated_at: "now".into(),
    }
}

#[tokio::test]
async fn s1_cold_auth_materializes_directories_and_config() {
    let tmp = camino_tempfile::tempdir().unwrap();
    let cloud = Arc::new(FakeCloud::empty());
    *cloud.verify.lock().unwrap() = Some(VerifyTokenData {
        user_id: "u-1".into(),
        status: TenantStatus::Active,
        openclaw_config: serde_json::json!({"m": 1}),
    });
    let manager = TenantManager::new(manager_config(tmp.path(), 100, Duration::from_secs(3600)), cloud);

    let user_id = manager.authenticate_token("gt_abc").await;
    assert_eq!(user_id.as_deref(), Some("u-1"));

    let instance = manager.get_instance("u-1").await.unwrap().unwrap();
    assert!(tokio::fs::metadata(&instance.workspace_path).await.unwrap().is_dir());
    assert!(tokio::fs::metadata(instance.workspace_path.join("agent")).await.is_ok());
    assert_eq!(*instance.config.lock(), serde_json::json!({"m": 1}));
}

#[tokio::test]
async fn s2_suspended_tenant_rejects_and_emits_event_once() {
    let tmp = camino_tempfile::tempdir().unwrap();
    let cloud = Arc::new(FakeCloud::empty());
    let manager = TenantManager::new(manager_config(tmp.path(), 100, Duration::from_secs(3600)), cloud);

    let mut suspended = active_record("u-2", "gt-2");
    suspended.status = TenantStatus::Suspended;
    manager.update_configs(&[suspended]).await;

    let mut events = manager.subscribe();
    assert_eq!(manager.authenticate_token("gt-2").await, None);

    let event = events.recv().await.unwrap();
    assert!(matches!(
        event,
        gateway_core::tenant::events::GatewayEvent::UserSuspended { user_id } if user_id == "u-2"
    ));
}

#[tokio::test]
async fn s3_and_s4_idle_eviction_respects_pending_work() {
    let tmp = camino_tempfile::tempdir().unwrap();
    let cloud = Arc::new(FakeCloud::empty());
    let manager = TenantManager::new(
        manager_config(tmp.path(), 100, Duration::from_millis(50)),
        cloud,
    );

    manager.update_configs(&[active_record("u-3", "gt-3")]).await;
    manager.get_instance("u-3").await.unwrap();
    manager.increment_pending("u-3").await;

    tokio::time::sleep(Duration::from_millis(120)).await;
    manager.cleanup_inactive().await;
    assert!(
        manager.is_cached("u-3").await,
        "a tenant with pending work must survive idle cleanup"
    );

    manager.decrement_pending("u-3").await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    manager.cleanup_inactive().await;
    assert!(!manager.is_cached("u-3").await);
}

#[tokio::test]
async fn s5_lru_cap_evicts_only_when_over_capacity() {
    let tmp = camino_tempfile::tempdir().unwrap();
    let cloud = Arc::new(FakeCloud::empty());
    let manager = TenantManager::new(
        manager_config(tmp.path(), 2, Duration::from_secs(3600)),
        cloud,
    );

    for id in ["u-a", "u-b"] {
        manager
            .update_configs(&[active_record(id, &format!("gt-{id}"))])
            .await;
        manager.get_instance(id).await.unwrap();
    }
    manager.cleanup_inactive().await;
    assert!(manager.is_cached("u-a").await);
    assert!(manager.is_cached("u-b").await);

    manager
        .update_configs(&[active_record("u-c", "gt-u-c")])
        .await;
    manager.get_instance("u-c").await.unwrap();

    manager.cleanup_inactive().await;
    assert!(!manager.is_cached("u-a").await, "oldest idle entry should be evicted over the cap");
    assert!(manager.is_cached("u-b").await);
    assert!(manager.is_cached("u-c").await);
}

#[tokio::test]
async fn s6_sync_backoff_then_recovery_resets_failure_count_and_alerts_once() {
    let tmp = camino_tempfile::tempdir().unwrap();
    let manager = TenantManager::new(
        manager_config(tmp.path(), 100, Duration::from_secs(3600)),
        Arc::new(FakeCloud::empty()),
    );
    let cloud = Arc::new(FakeCloud::empty());
    // The scripted pages queue starts empty, so every call fails until we
    // push a page for the recovery attempt.

    let alert_sink = Arc::new(CollectingAlertSink::default());
    let config = ConfigSynchronizerConfig {
        alert_threshold: 4,
        ..ConfigSynchronizerConfig::default()
    };
    let synchronizer = ConfigSynchronizer::new(manager, cloud.clone(), config, alert_sink.clone());

    for _ in 0..4 {
        let outcome = synchronizer.sync_now().await;
        assert!(!outcome.success);
    }
    assert_eq!(synchronizer.consecutive_failures(), 4);
    assert_eq!(alert_sink.alerts.lock().unwrap().len(), 1);

    cloud.pages.lock().unwrap().push(ConfigsResponse {
        users: vec![],
        sync_timestamp: "2026-01-01T00:00:00Z".into(),
        has_more: false,
        next_cursor: None,
    });
    let recovered = synchronizer.sync_now().await;
    assert!(recovered.success);
    assert_eq!(synchronizer.consecutive_failures(), 0);
}
