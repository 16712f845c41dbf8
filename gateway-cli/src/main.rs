//! Read-only administrative CLI for the multi-tenant gateway core.
//!
//! A thin `clap` façade over [`gateway_core::tenant::TenantManager`] and
//! [`gateway_core::sync::ConfigSynchronizer`] — it performs no independent
//! business logic and never talks to the cloud backend except through
//! those two types, grounded on `pagectl`'s shape (a small admin binary
//! operating directly on the same on-disk/in-memory state a running
//! daemon would use, rather than proxying a separate management API).

mod output;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gateway_core::alert::default_alert_sink;
use gateway_core::cloud::HttpCloudBackend;
use gateway_core::sync::{ConfigSynchronizer, ConfigSynchronizerConfig};
use gateway_core::tenant::{TenantManager, TenantManagerConfig};
use output::OutputFormat;
use serde_json::json;

#[derive(Parser)]
#[command(name = "gateway-cli", version, about = "Inspect and administer the multi-tenant gateway core", long_about = None)]
struct Cli {
    /// How to render command output.
    #[arg(long, global = true, value_enum, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manager + synchronizer counters.
    Stats,
    /// Enumerate or inspect cached tenants.
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },
    /// Trigger or inspect the configuration synchronizer.
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },
    /// Evict a cached tenant.
    Evict {
        user_id: String,
        /// Remove even if the tenant has requests in flight.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum UsersAction {
    /// List cached tenant ids with status and last activity.
    List,
    /// Show one tenant's cached projection.
    Show { user_id: String },
}

#[derive(Subcommand)]
enum SyncAction {
    /// Run one synchronization pass immediately and print the outcome.
    Now,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("GATEWAY_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let global = gateway_core::config::load().context("loading global configuration")?;
    let section = global
        .resolved_multi_tenant()
        .context("multi-tenant mode is not available")?;

    let cloud_backend_url = section
        .cloud_backend_url
        .clone()
        .expect("validated by resolved_multi_tenant");
    let service_token = section.service_token.clone().unwrap_or_default();
    let config_root = section
        .config_root
        .clone()
        .expect("validated by resolved_multi_tenant");
    let workspace_root = section.workspace_root.clone().unwrap_or_else(|| config_root.clone());

    let manager_config = TenantManagerConfig {
        config_root,
        workspace_root,
        template_path: section.template_path.clone(),
        llm_proxy_base_url: None,
        max_cached_users: section.max_cached_users.unwrap_or(100),
        user_idle_timeout: section.user_idle_timeout.unwrap_or(Duration::from_secs(3600)),
    };

    let base_url = url::Url::parse(&cloud_backend_url).context("parsing cloudBackendUrl")?;
    let cloud = Arc::new(HttpCloudBackend::new(base_url, service_token));
    let manager = TenantManager::new(manager_config, cloud.clone());
    let synchronizer = ConfigSynchronizer::new(
        manager.clone(),
        cloud,
        ConfigSynchronizerConfig {
            sync_interval: section.sync_interval.unwrap_or(Duration::from_secs(300)),
            ..ConfigSynchronizerConfig::default()
        },
        default_alert_sink(),
    );

    match cli.command {
        Command::Stats => print_stats(&cli.format, &manager, &synchronizer),
        Command::Users { action } => match action {
            UsersAction::List => print_users_list(&cli.format, &manager).await,
            UsersAction::Show { user_id } => print_user_show(&cli.format, &manager, &user_id).await?,
        },
        Command::Sync { action } => match action {
            SyncAction::Now => {
                let outcome = synchronizer.sync_now().await;
                println!("{}", output::render(cli.format, &outcome));
                if !outcome.success {
                    bail!(outcome.error.unwrap_or_else(|| "sync failed".to_string()));
                }
            }
        },
        Command::Evict { user_id, force } => {
            let removed = manager.force_evict(&user_id, force).await;
            println!(
                "{}",
                output::render(cli.format, &json!({ "user_id": user_id, "evicted": removed }))
            );
            if !removed {
                bail!("tenant not cached, or has pending requests (retry with --force)");
            }
        }
    }

    Ok(())
}

fn print_stats(format: &OutputFormat, manager: &TenantManager, synchronizer: &ConfigSynchronizer) {
    let stats = manager.stats();
    let view = json!({
        "cached_instances": stats.cached_instances,
        "cache_hits": stats.cache_hits,
        "cache_misses": stats.cache_misses,
        "sync_failures": stats.sync_failures,
        "last_sync_at_ms": stats.last_sync_at_ms,
        "synchronizer_consecutive_failures": synchronizer.consecutive_failures(),
    });
    println!("{}", output::render(*format, &view));
}

async fn print_users_list(format: &OutputFormat, manager: &TenantManager) {
    let mut rows = Vec::new();
    for user_id in manager.cached_user_ids().await {
        if let Ok(Some(instance)) = manager.get_instance(&user_id).await {
            rows.push(json!({
                "user_id": instance.user_id,
                "status": instance.status(),
                "pending_requests": instance.pending_requests(),
                "last_activity_at_ms": instance.last_activity_at_ms(),
            }));
        }
    }
    println!("{}", output::render(*format, &rows));
}

async fn print_user_show(format: &OutputFormat, manager: &TenantManager, user_id: &str) -> Result<()> {
    let Some(instance) = manager
        .get_instance(user_id)
        .await
        .context("reading tenant instance")?
    else {
        bail!("no such tenant: {user_id}");
    };
    let view = json!({
        "user_id": instance.user_id,
        "status": instance.status(),
        "config": instance.config.lock().clone(),
        "workspace_path": instance.workspace_path.as_str(),
        "config_path": instance.config_path.as_str(),
        "pending_requests": instance.pending_requests(),
        "last_activity_at_ms": instance.last_activity_at_ms(),
    });
    println!("{}", output::render(*format, &view));
    Ok(())
}
