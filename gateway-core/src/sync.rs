//! Background configuration synchronizer: periodic, incremental pulls of
//! tenant records from the cloud backend, applied through
//! [`TenantManager::update_configs`].
//!
//! State machine per spec.md §4.5: idle -> syncing -> (success: schedule
//! next tick, or immediately if `hasMore`) | (failure: exponential backoff,
//! alert past threshold). Grounded on `pageserver::tenant::tasks`'s
//! `tokio::select!`-over-`CancellationToken` shutdown pattern and
//! `proxy::redis::notifications::task_main`'s retry-with-backoff loop.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::alert::{Alert, AlertSeverity, AlertSink};
use crate::cloud::CloudBackend;
use crate::tenant::TenantManager;

const PAGINATION_FOLLOWUP_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ConfigSynchronizerConfig {
    pub sync_interval: Duration,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Consecutive failures at which the alert sink is invoked.
    pub alert_threshold: u32,
}

impl Default for ConfigSynchronizerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(300),
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(60),
            alert_threshold: 4,
        }
    }
}

/// Result of one `syncNow()` invocation, returned synchronously relative to
/// its own call (spec.md §4.5).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub users_updated: usize,
    pub error: Option<String>,
}

impl SyncOutcome {
    fn in_progress() -> Self {
        Self {
            success: false,
            users_updated: 0,
            error: Some("sync_in_progress".to_string()),
        }
    }
}

struct BackoffState {
    last_sync_cursor: Option<String>,
    consecutive_failures: u32,
    current_retry_delay: Duration,
}

pub struct ConfigSynchronizer {
    manager: Arc<TenantManager>,
    cloud: Arc<dyn CloudBackend>,
    config: ConfigSynchronizerConfig,
    alert_sink: Arc<dyn AlertSink>,
    state: Mutex<BackoffState>,
    in_flight: AtomicBool,
    consecutive_failures_gauge: AtomicU32,
    cancel: Mutex<Option<CancellationToken>>,
}

impl ConfigSynchronizer {
    pub fn new(
        manager: Arc<TenantManager>,
        cloud: Arc<dyn CloudBackend>,
        config: ConfigSynchronizerConfig,
        alert_sink: Arc<dyn AlertSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            cloud,
            state: Mutex::new(BackoffState {
                last_sync_cursor: None,
                consecutive_failures: 0,
                current_retry_delay: config.initial_retry_delay,
            }),
            config,
            alert_sink,
            in_flight: AtomicBool::new(false),
            consecutive_failures_gauge: AtomicU32::new(0),
            cancel: Mutex::new(None),
        })
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures_gauge.load(Ordering::Relaxed)
    }

    /// Begin the periodic sync loop. The first run is immediate. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        let mut guard = self.cancel.lock().await;
        if guard.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        *guard = Some(cancel.clone());
        drop(guard);

        let synchronizer = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let outcome = synchronizer.sync_now().await;
                let delay = synchronizer.next_delay_after(&outcome).await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        });
    }

    pub async fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().await.take() {
            cancel.cancel();
        }
    }

    /// Delay before the next full sync cycle. `run_pages` already drains
    /// pagination (`hasMore`) internally with its own short follow-up
    /// delay, so by the time an outcome reaches here it always reflects a
    /// fully-paged attempt: on failure, the current backoff delay; on
    /// success, the ordinary sync interval.
    async fn next_delay_after(&self, outcome: &SyncOutcome) -> Duration {
        if !outcome.success {
            return self.state.lock().await.current_retry_delay;
        }
        self.config.sync_interval
    }

    /// Run one sync attempt, draining all pages before returning. Reentrant
    /// calls (while a prior call is still running) are a no-op that reports
    /// `sync_in_progress` rather than queuing or blocking.
    pub async fn sync_now(&self) -> SyncOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return SyncOutcome::in_progress();
        }
        let result = self.run_pages().await;
        self.in_flight.store(false, Ordering::Release);
        result
    }

    async fn run_pages(&self) -> SyncOutcome {
        let mut total_updated = 0usize;
        loop {
            let since = self.state.lock().await.last_sync_cursor.clone();

            match self.cloud.fetch_configs(since.as_deref()).await {
                Ok(response) => {
                    let applied = self.manager.update_configs(&response.users).await;
                    total_updated += applied;

                    let mut state = self.state.lock().await;
                    state.last_sync_cursor = Some(response.sync_timestamp.clone());
                    state.consecutive_failures = 0;
                    state.current_retry_delay = self.config.initial_retry_delay;
                    self.consecutive_failures_gauge.store(0, Ordering::Relaxed);
                    let has_more = response.has_more;
                    drop(state);

                    if has_more {
                        tokio::time::sleep(PAGINATION_FOLLOWUP_DELAY).await;
                        continue;
                    }

                    return SyncOutcome {
                        success: true,
                        users_updated: total_updated,
                        error: None,
                    };
                }
                Err(e) => {
                    let message = e.to_string();
                    self.manager.record_sync_failure(&message);

                    let mut state = self.state.lock().await;
                    state.consecutive_failures += 1;
                    state.current_retry_delay = retry_delay_after_failures(
                        self.config.initial_retry_delay,
                        self.config.max_retry_delay,
                        state.consecutive_failures,
                    );
                    let consecutive = state.consecutive_failures;
                    self.consecutive_failures_gauge
                        .store(consecutive, Ordering::Relaxed);
                    drop(state);

                    if consecutive >= self.config.alert_threshold {
                        self.alert_sink.alert(Alert {
                            severity: AlertSeverity::Error,
                            message: format!(
                                "config sync has failed {consecutive} times in a row: {message}"
                            ),
                        });
                    }

                    return SyncOutcome {
                        success: false,
                        users_updated: total_updated,
                        error: Some(message),
                    };
                }
            }
        }
    }
}

/// Pure backoff-delay computation, kept separate from the loop so the
/// monotonicity property (spec.md §8 invariant 7) is directly testable
/// without spinning up a synchronizer or waiting on real timers.
pub fn retry_delay_after_failures(
    initial: Duration,
    max: Duration,
    consecutive_failures: u32,
) -> Duration {
    if consecutive_failures == 0 {
        return initial;
    }
    let scaled = initial.saturating_mul(1u32.checked_shl(consecutive_failures - 1).unwrap_or(u32::MAX));
    std::cmp::min(scaled, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::test_support::CollectingAlertSink;
    use crate::cloud::messages::ConfigsResponse;
    use crate::tenant::TenantManagerConfig;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn backoff_is_monotonic_and_capped() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(8);
        let delays: Vec<Duration> = (1..=6)
            .map(|k| retry_delay_after_failures(initial, max, k))
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(8),
                Duration::from_secs(8),
            ]
        );
    }

    #[test]
    fn zero_failures_is_initial_delay() {
        assert_eq!(
            retry_delay_after_failures(Duration::from_secs(1), Duration::from_secs(8), 0),
            Duration::from_secs(1)
        );
    }

    struct ScriptedCloud {
        responses: std::sync::Mutex<Vec<Result<ConfigsResponse, String>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CloudBackend for ScriptedCloud {
        async fn verify_token(
            &self,
            _token: &str,
        ) -> crate::error::Result<Option<crate::cloud::messages::VerifyTokenData>> {
            unimplemented!("not exercised by synchronizer tests")
        }

        async fn fetch_configs(
            &self,
            _since: Option<&str>,
        ) -> crate::error::Result<ConfigsResponse> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(crate::error::GatewayError::transient_upstream(
                    "no more scripted responses",
                ));
            }
            responses
                .remove(0)
                .map_err(crate::error::GatewayError::transient_upstream)
        }
    }

    fn test_manager(root: &camino::Utf8Path) -> Arc<TenantManager> {
        struct UnusedCloud;
        #[async_trait]
        impl CloudBackend for UnusedCloud {
            async fn verify_token(
                &self,
                _token: &str,
            ) -> crate::error::Result<Option<crate::cloud::messages::VerifyTokenData>> {
                unimplemented!()
            }
            async fn fetch_configs(
                &self,
                _since: Option<&str>,
            ) -> crate::error::Result<ConfigsResponse> {
                unimplemented!()
            }
        }
        TenantManager::new(
            TenantManagerConfig {
                config_root: root.join("config"),
                workspace_root: root.join("workspace"),
                template_path: None,
                llm_proxy_base_url: None,
                max_cached_users: 100,
                user_idle_timeout: Duration::from_secs(3600),
            },
            Arc::new(UnusedCloud),
        )
    }

    #[tokio::test]
    async fn sync_now_applies_users_and_resets_backoff_on_success() {
        let tmp = camino_tempfile::tempdir().unwrap();
        let manager = test_manager(tmp.path());
        let cloud = Arc::new(ScriptedCloud {
            responses: std::sync::Mutex::new(vec![Ok(ConfigsResponse {
                users: vec![crate::cloud::messages::CloudTenantRecord {
                    user_id: "u-1".into(),
                    gateway_token: "gt-1".into(),
                    openclaw_config: serde_json::json!({}),
                    status: crate::tenant::TenantStatus::Active,
                    llm_api_key: None,
                    updated_at: "now".into(),
                }],
                sync_timestamp: "2026-01-01T00:00:00Z".into(),
                has_more: false,
                next_cursor: None,
            })]),
            calls: AtomicUsize::new(0),
        });
        let alert_sink = Arc::new(CollectingAlertSink::default());
        let synchronizer = ConfigSynchronizer::new(
            manager,
            cloud,
            ConfigSynchronizerConfig::default(),
            alert_sink,
        );

        let outcome = synchronizer.sync_now().await;
        assert!(outcome.success);
        assert_eq!(outcome.users_updated, 1);
        assert_eq!(synchronizer.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn sync_now_pages_until_has_more_is_false() {
        let tmp = camino_tempfile::tempdir().unwrap();
        let manager = test_manager(tmp.path());
        let page = |id: &str, has_more: bool| ConfigsResponse {
            users: vec![crate::cloud::messages::CloudTenantRecord {
                user_id: id.to_string(),
                gateway_token: format!("gt-{id}"),
                openclaw_config: serde_json::json!({}),
                status: crate::tenant::TenantStatus::Active,
                llm_api_key: None,
                updated_at: "now".into(),
            }],
            sync_timestamp: "2026-01-01T00:00:00Z".into(),
            has_more,
            next_cursor: None,
        };
        let cloud = Arc::new(ScriptedCloud {
            responses: std::sync::Mutex::new(vec![Ok(page("a", true)), Ok(page("b", false))]),
            calls: AtomicUsize::new(0),
        });
        let alert_sink = Arc::new(CollectingAlertSink::default());
        let synchronizer = ConfigSynchronizer::new(
            manager,
            cloud.clone(),
            ConfigSynchronizerConfig::default(),
            alert_sink,
        );

        let outcome = synchronizer.sync_now().await;
        assert!(outcome.success);
        assert_eq!(outcome.users_updated, 2);
        assert_eq!(cloud.calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn sync_now_alerts_once_threshold_is_reached() {
        let tmp = camino_tempfile::tempdir().unwrap();
        let manager = test_manager(tmp.path());
        let cloud = Arc::new(ScriptedCloud {
            responses: std::sync::Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
        });
        let alert_sink = Arc::new(CollectingAlertSink::default());
        let config = ConfigSynchronizerConfig {
            alert_threshold: 2,
            ..ConfigSynchronizerConfig::default()
        };
        let synchronizer = ConfigSynchronizer::new(manager, cloud, config, alert_sink.clone());

        let first = synchronizer.sync_now().await;
        assert!(!first.success);
        assert!(alert_sink.alerts.lock().unwrap().is_empty());

        let second = synchronizer.sync_now().await;
        assert!(!second.success);
        assert_eq!(alert_sink.alerts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reentrant_sync_now_reports_in_progress() {
        // Exercised at the type level: a second concurrent call while the
        // in-flight flag is held returns the sentinel without touching the
        // cloud backend. We simulate this directly via the flag rather than
        // racing real futures, which would be flaky under test schedulers.
        let tmp = camino_tempfile::tempdir().unwrap();
        let manager = test_manager(tmp.path());
        let cloud = Arc::new(ScriptedCloud {
            responses: std::sync::Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
        });
        let alert_sink = Arc::new(CollectingAlertSink::default());
        let synchronizer = ConfigSynchronizer::new(
            manager,
            cloud,
            ConfigSynchronizerConfig::default(),
            alert_sink,
        );

        synchronizer.in_flight.store(true, Ordering::Release);
        let outcome = synchronizer.sync_now().await;
        assert_eq!(outcome.error.as_deref(), Some("sync_in_progress"));
    }
}
