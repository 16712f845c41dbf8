//! Global configuration resolution (spec.md §6): search-path lookup,
//! permissive JSON-with-comments parsing, and a short TTL cache so a busy
//! gateway doesn't re-read and re-parse the file on every connection.
//!
//! Grounded on `pageserver::config`'s pattern of a `once_cell`-backed cache
//! with an explicit test-reset hook, generalized here to a TTL rather than
//! pageserver's load-once-at-startup model since this config can be hot-
//! reloaded by an operator editing the file on disk.

use std::env;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

const GLOBAL_CONFIG_ENV_VAR: &str = "OPENCLAW_GLOBAL_CONFIG";
const SERVICE_TOKEN_ENV_VAR: &str = "OPENCLAW_SERVICE_TOKEN";
const CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MultiTenantSection {
    #[serde(default)]
    pub enabled: bool,
    pub cloud_backend_url: Option<String>,
    pub service_token: Option<String>,
    pub config_root: Option<Utf8PathBuf>,
    pub workspace_root: Option<Utf8PathBuf>,
    pub template_path: Option<Utf8PathBuf>,
    pub max_cached_users: Option<usize>,
    #[serde(with = "humantime_serde::option", default, rename = "userIdleTimeoutMs")]
    pub user_idle_timeout: Option<Duration>,
    #[serde(with = "humantime_serde::option", default, rename = "syncIntervalMs")]
    pub sync_interval: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GlobalConfig {
    #[serde(default, rename = "multiTenant")]
    pub multi_tenant: Option<MultiTenantSection>,
}

impl GlobalConfig {
    /// Defaults per spec.md §6, applied on top of whatever the file
    /// specifies, with `OPENCLAW_SERVICE_TOKEN` taking precedence over a
    /// token written into the file (secrets belong in the environment).
    pub fn resolved_multi_tenant(&self) -> Result<MultiTenantSection> {
        let mut section = self.multi_tenant.clone().unwrap_or_default();
        if !section.enabled {
            return Err(GatewayError::config_unavailable(
                "multi-tenant mode is disabled",
            ));
        }
        if let Ok(token) = env::var(SERVICE_TOKEN_ENV_VAR) {
            section.service_token = Some(token);
        }
        if section.max_cached_users.is_none() {
            section.max_cached_users = Some(100);
        }
        if section.user_idle_timeout.is_none() {
            section.user_idle_timeout = Some(Duration::from_secs(3600));
        }
        if section.sync_interval.is_none() {
            section.sync_interval = Some(Duration::from_secs(300));
        }
        if section.cloud_backend_url.is_none() || section.config_root.is_none() {
            return Err(GatewayError::config_unavailable(
                "multi-tenant mode is enabled but cloudBackendUrl/configRoot is missing",
            ));
        }
        Ok(section)
    }
}

struct CachedConfig {
    config: GlobalConfig,
    loaded_at: Instant,
}

static CACHE: Lazy<Mutex<Option<CachedConfig>>> = Lazy::new(|| Mutex::new(None));

/// Load the global config, honoring the 60s TTL cache. Search order:
/// `$OPENCLAW_GLOBAL_CONFIG`, `/etc/openclaw/config.json`,
/// `~/.clawdbot/openclaw.json`, `~/.openclaw/openclaw.json` — first
/// existing file wins.
pub fn load() -> Result<GlobalConfig> {
    {
        let cache = CACHE.lock().unwrap();
        if let Some(cached) = cache.as_ref() {
            if cached.loaded_at.elapsed() < CACHE_TTL {
                return Ok(cached.config.clone());
            }
        }
    }

    let path = resolve_path().ok_or_else(|| {
        GatewayError::config_unavailable("no global config file found on the search path")
    })?;
    let config = parse_file(&path)?;

    let mut cache = CACHE.lock().unwrap();
    *cache = Some(CachedConfig {
        config: config.clone(),
        loaded_at: Instant::now(),
    });
    Ok(config)
}

/// Clear the cache so tests can exercise [`load`] repeatedly against
/// different fixtures without waiting out the TTL.
pub fn reset_cache_for_test() {
    *CACHE.lock().unwrap() = None;
}

fn resolve_path() -> Option<Utf8PathBuf> {
    if let Ok(path) = env::var(GLOBAL_CONFIG_ENV_VAR) {
        let path = Utf8PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let candidates = [
        Utf8PathBuf::from("/etc/openclaw/config.json"),
        home_dir_path(".clawdbot/openclaw.json"),
        home_dir_path(".openclaw/openclaw.json"),
    ];
    candidates.into_iter().flatten().find(|p| p.exists())
}

fn home_dir_path(suffix: &str) -> Option<Utf8PathBuf> {
    let home = env::var("HOME").ok()?;
    Some(Utf8PathBuf::from(home).join(suffix))
}

/// Parse permissively: comments and trailing commas are allowed, matching
/// spec.md §6's "JSON with comments / trailing commas" requirement.
fn parse_file(path: &Utf8PathBuf) -> Result<GlobalConfig> {
    let content = std::fs::read_to_string(path)?;
    json5::from_str(&content)
        .map_err(|e| GatewayError::config_unavailable(format!("failed to parse {path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    // Tests that touch process env vars serialize against each other; the
    // env var + 60s TTL cache combination is otherwise a classic source of
    // cross-test flakiness.
    static ENV_LOCK: StdMutex<()> = StdMutex::new(());

    #[test]
    fn loads_and_caches_from_env_path() {
        let _guard = ENV_LOCK.lock().unwrap();
        reset_cache_for_test();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // trailing comment is fine
                "multiTenant": {
                    "enabled": true,
                    "cloudBackendUrl": "https://cloud.example.com",
                    "configRoot": "/etc/gateway/tenants",
                },
            }"#,
        )
        .unwrap();
        env::set_var(GLOBAL_CONFIG_ENV_VAR, &path);

        let config = load().unwrap();
        let section = config.resolved_multi_tenant().unwrap();
        assert!(section.enabled);
        assert_eq!(section.max_cached_users, Some(100));

        env::remove_var(GLOBAL_CONFIG_ENV_VAR);
        reset_cache_for_test();
    }

    #[test]
    fn disabled_section_is_config_unavailable() {
        let config = GlobalConfig {
            multi_tenant: Some(MultiTenantSection {
                enabled: false,
                ..Default::default()
            }),
        };
        assert!(config.resolved_multi_tenant().is_err());
    }

    #[test]
    fn env_service_token_overrides_file_value() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(SERVICE_TOKEN_ENV_VAR, "env-token");
        let config = GlobalConfig {
            multi_tenant: Some(MultiTenantSection {
                enabled: true,
                cloud_backend_url: Some("https://cloud.example.com".into()),
                config_root: Some(Utf8PathBuf::from("/etc/gateway/tenants")),
                service_token: Some("file-token".into()),
                ..Default::default()
            }),
        };
        let section = config.resolved_multi_tenant().unwrap();
        assert_eq!(section.service_token.as_deref(), Some("env-token"));
        env::remove_var(SERVICE_TOKEN_ENV_VAR);
    }
}
