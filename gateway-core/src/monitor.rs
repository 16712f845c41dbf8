//! Periodic health sampler: manager stats + process memory, with
//! threshold-driven alerts. Subscribes to the manager's event bus to log
//! lifecycle transitions and to elevate `sync-failed` past threshold to an
//! alert, grounded on the same `tokio::select!`/`CancellationToken` shutdown
//! shape used by [`crate::sync::ConfigSynchronizer`] and
//! `pageserver::tenant::tasks`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::alert::{Alert, AlertSeverity, AlertSink};
use crate::tenant::events::GatewayEvent;
use crate::tenant::TenantManager;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub sample_interval: Duration,
    pub heap_threshold_mb: u64,
    /// `activeInstances / totalUsers * 100` threshold, as a percent.
    pub active_ratio_threshold_percent: f64,
    pub sync_failures_threshold: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(60),
            heap_threshold_mb: 1024,
            active_ratio_threshold_percent: 90.0,
            sync_failures_threshold: 4,
        }
    }
}

/// One sampled tick. `total_users` is caller-supplied (the manager does not
/// itself know the upstream total tenant count — only its cached subset) so
/// the active-ratio check can be computed against whatever denominator the
/// deployment considers authoritative.
#[derive(Debug, Clone)]
pub struct MonitorSnapshot {
    pub cached_instances: usize,
    pub heap_mb: u64,
    pub rss_mb: u64,
    pub sync_failures: u32,
}

pub trait TotalUserCount: Send + Sync {
    fn total_users(&self) -> usize;
}

/// Fixed total, for deployments that don't track an external tenant count
/// separately from the cache.
pub struct FixedTotal(pub usize);

impl TotalUserCount for FixedTotal {
    fn total_users(&self) -> usize {
        self.0
    }
}

pub struct Monitor {
    manager: Arc<TenantManager>,
    config: MonitorConfig,
    alert_sink: Arc<dyn AlertSink>,
    total_users: Arc<dyn TotalUserCount>,
    last_snapshot: std::sync::Mutex<Option<MonitorSnapshot>>,
    cancel: Mutex<Option<CancellationToken>>,
    ticks: AtomicU32,
}

impl Monitor {
    pub fn new(
        manager: Arc<TenantManager>,
        config: MonitorConfig,
        alert_sink: Arc<dyn AlertSink>,
        total_users: Arc<dyn TotalUserCount>,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            config,
            alert_sink,
            total_users,
            last_snapshot: std::sync::Mutex::new(None),
            cancel: Mutex::new(None),
            ticks: AtomicU32::new(0),
        })
    }

    pub fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn last_snapshot(&self) -> Option<MonitorSnapshot> {
        self.last_snapshot.lock().unwrap().clone()
    }

    pub async fn start(self: &Arc<Self>) {
        let mut guard = self.cancel.lock().await;
        if guard.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        *guard = Some(cancel.clone());
        drop(guard);

        let monitor = Arc::clone(self);
        let mut events = monitor.manager.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.sample_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => monitor.sample().await,
                    Ok(event) = events.recv() => monitor.on_event(event),
                }
            }
        });
    }

    pub async fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().await.take() {
            cancel.cancel();
        }
    }

    fn on_event(&self, event: GatewayEvent) {
        match event {
            GatewayEvent::UserLoaded { user_id } => {
                tracing::info!(user_id = %user_id, "tenant loaded");
            }
            GatewayEvent::UserEvicted { user_id, reason } => {
                tracing::info!(user_id = %user_id, reason = reason.as_str(), "tenant evicted");
            }
            GatewayEvent::UserSuspended { user_id } => {
                tracing::warn!(user_id = %user_id, "tenant suspended");
            }
            GatewayEvent::UserExpired { user_id } => {
                tracing::warn!(user_id = %user_id, "tenant expired");
            }
            GatewayEvent::ConfigSynced { count, .. } => {
                tracing::info!(count, "config sync completed");
            }
            GatewayEvent::SyncFailed {
                error,
                consecutive_failures,
            } => {
                if consecutive_failures >= self.config.sync_failures_threshold {
                    self.alert_sink.alert(Alert {
                        severity: AlertSeverity::Critical,
                        message: format!(
                            "sync has failed {consecutive_failures} times in a row: {error}"
                        ),
                    });
                }
            }
        }
    }

    pub async fn sample(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        let stats = self.manager.stats();
        let pending_requests = self.manager.pending_requests_sum().await;
        crate::metrics::observe_stats(&stats, pending_requests);
        let (heap_mb, rss_mb) = process_memory_mb();

        let total = self.total_users.total_users().max(1);
        let active_ratio_percent = (stats.cached_instances as f64 / total as f64) * 100.0;

        if heap_mb >= self.config.heap_threshold_mb {
            self.alert_sink.alert(Alert {
                severity: AlertSeverity::Warning,
                message: format!(
                    "heap usage {heap_mb}MB exceeds threshold {}MB",
                    self.config.heap_threshold_mb
                ),
            });
        }
        if active_ratio_percent > self.config.active_ratio_threshold_percent {
            self.alert_sink.alert(Alert {
                severity: AlertSeverity::Warning,
                message: format!(
                    "active instance ratio {active_ratio_percent:.1}% exceeds threshold {:.1}%",
                    self.config.active_ratio_threshold_percent
                ),
            });
        }
        if stats.sync_failures >= self.config.sync_failures_threshold {
            self.alert_sink.alert(Alert {
                severity: AlertSeverity::Error,
                message: format!(
                    "sync_failures {} at or above threshold {}",
                    stats.sync_failures, self.config.sync_failures_threshold
                ),
            });
        }

        *self.last_snapshot.lock().unwrap() = Some(MonitorSnapshot {
            cached_instances: stats.cached_instances,
            heap_mb,
            rss_mb,
            sync_failures: stats.sync_failures,
        });
    }
}

/// `(heap_mb, rss_mb)` for the current process. `sysinfo` gives us a
/// cross-platform reading without hand-rolling `/proc/self/status` parsing;
/// "heap" here is approximated by RSS since Rust's allocator does not expose
/// a separate heap figure without a jemalloc-style allocator hook.
fn process_memory_mb() -> (u64, u64) {
    use sysinfo::{Pid, System};

    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();
    system.refresh_process(pid);
    let rss_mb = system
        .process(pid)
        .map(|p| p.memory() / (1024 * 1024))
        .unwrap_or(0);
    (rss_mb, rss_mb)
}
