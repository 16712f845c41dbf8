//! Per-user directory tree and bootstrap-credential provisioning.
//!
//! Runs once per tenant materialization. Directory creation is idempotent;
//! pre-existing directories are left alone. Credential files (`auth-profiles.json`,
//! `models.json`) are the one exception to "don't overwrite": they are
//! refreshed on every call to track upstream key rotation.

use camino::Utf8Path;
use serde::Serialize;

use crate::error::Result;
use crate::paths::TenantPaths;
use crate::workspace::create_private_dir_all;

const AUTH_PROFILES_VERSION: u32 = 1;

/// Inputs needed to materialize upstream LLM credentials into a workspace.
/// `llm_api_key` is `None` when the tenant has no upstream credential yet
/// (e.g. first provisioning before a sync has populated one).
#[derive(Debug, Clone)]
pub struct ProvisionInputs<'a> {
    pub llm_api_key: Option<&'a str>,
    pub llm_proxy_base_url: Option<&'a str>,
}

#[derive(Serialize)]
struct AuthProfile<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    provider: &'a str,
    key: &'a str,
    #[serde(rename = "baseURL", skip_serializing_if = "Option::is_none")]
    base_url: Option<&'a str>,
}

#[derive(Serialize)]
struct AuthProfiles<'a> {
    version: u32,
    profiles: std::collections::BTreeMap<&'static str, AuthProfile<'a>>,
}

#[derive(Serialize)]
struct ModelProviderConfig<'a> {
    #[serde(rename = "baseUrl")]
    base_url: &'a str,
}

/// Create the directory tree and (if a credential is present) the
/// credential files for a tenant. Safe to call repeatedly.
pub async fn provision_user(paths: &TenantPaths, inputs: &ProvisionInputs<'_>) -> Result<()> {
    create_private_dir_all(&paths.workspace_path).await?;
    create_private_dir_all(&paths.agent_dir).await?;
    create_private_dir_all(&paths.sessions_path).await?;
    create_private_dir_all(&paths.memory_path).await?;
    create_private_dir_all(&paths.workspace_path.join("custom")).await?;

    if let Some(key) = inputs.llm_api_key {
        write_auth_profiles(paths, key, inputs.llm_proxy_base_url).await?;
        write_models_config(paths, inputs.llm_proxy_base_url).await?;
    }

    write_if_absent(&paths.agent_dir.join("openclaw.json"), MINIMAL_USER_CONFIG).await?;
    write_if_absent(&paths.workspace_path.join("HEARTBEAT.md"), DEFAULT_HEARTBEAT).await?;
    write_if_absent(&paths.workspace_path.join("USER.md"), DEFAULT_USER_MD).await?;

    Ok(())
}

async fn write_auth_profiles(
    paths: &TenantPaths,
    key: &str,
    base_url: Option<&str>,
) -> Result<()> {
    let mut profiles = std::collections::BTreeMap::new();
    profiles.insert(
        "anthropic:default",
        AuthProfile {
            kind: "api_key",
            provider: "anthropic",
            key,
            base_url,
        },
    );
    profiles.insert(
        "openai:default",
        AuthProfile {
            kind: "api_key",
            provider: "openai",
            key,
            base_url,
        },
    );

    let doc = AuthProfiles {
        version: AUTH_PROFILES_VERSION,
        profiles,
    };
    let content = serde_json::to_string_pretty(&doc).expect("serializable");
    write_credential_file(&paths.agent_dir.join("auth-profiles.json"), &content).await
}

async fn write_models_config(paths: &TenantPaths, base_url: Option<&str>) -> Result<()> {
    let base_url = base_url.unwrap_or("https://api.anthropic.com");
    let mut doc = std::collections::BTreeMap::new();
    doc.insert("anthropic", ModelProviderConfig { base_url });
    doc.insert("openai", ModelProviderConfig { base_url });
    let content = serde_json::to_string_pretty(&doc).expect("serializable");
    write_credential_file(&paths.agent_dir.join("models.json"), &content).await
}

async fn write_credential_file(path: &Utf8Path, content: &str) -> Result<()> {
    tokio::fs::write(path, content).await?;
    set_private_file_mode(path).await
}

async fn write_if_absent(path: &Utf8Path, content: &str) -> Result<()> {
    if tokio::fs::metadata(path).await.is_ok() {
        return Ok(());
    }
    tokio::fs::write(path, content).await?;
    set_private_file_mode(path).await
}

#[cfg(unix)]
async fn set_private_file_mode(path: &Utf8Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_private_file_mode(_path: &Utf8Path) -> Result<()> {
    Ok(())
}

const MINIMAL_USER_CONFIG: &str = "{}\n";
const DEFAULT_HEARTBEAT: &str = "# Heartbeat\n\nNo periodic heartbeat tasks are configured.\n";
const DEFAULT_USER_MD: &str = "# User\n\nNo profile information has been recorded for this user yet.\n";
