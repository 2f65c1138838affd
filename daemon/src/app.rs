use chrono::{DateTime, Utc};
use log::{debug, info};
use std::ops::Deref;
use std::sync::{Arc, LazyLock};

use crate::config::AppConfig;
use crate::management::backup::NoBackup;
use crate::management::installer::SteamCmd;
use crate::management::mods::ModRegistry;
use crate::management::query::SourceQuery;
use crate::management::variant::{BranchIndex, VariantContext, VariantRegistry};
use crate::management::{Orchestrator, Registry};
use crate::storage::InstanceRecords;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
static START_TIME: LazyLock<DateTime<Utc>> = LazyLock::new(Utc::now);

pub fn get_start_time() -> &'static DateTime<Utc> {
    START_TIME.deref()
}

fn init_orchestrator() -> anyhow::Result<Arc<Orchestrator>> {
    let config = AppConfig::get();
    debug!("config loaded: {}", serde_json::to_string_pretty(config)?);

    let context = VariantContext {
        steamcmd: Arc::new(SteamCmd::new(&config.steamcmd_path)),
        branches: Arc::new(BranchIndex::new(config.branches_url.clone())),
        query: Arc::new(SourceQuery::default()),
    };
    let registry = Registry::new(
        InstanceRecords::new(&config.data_dir),
        VariantRegistry::with_catalog(context),
    );
    Ok(Arc::new(Orchestrator::new(
        registry,
        ModRegistry::with_builtin(),
        Arc::new(NoBackup),
        config.orchestrator_settings(),
    )))
}

pub async fn run_app() -> anyhow::Result<()> {
    let started_at = get_start_time();
    info!("gsm-daemon {} starting at {}", VERSION, started_at);

    let orchestrator = init_orchestrator()?;
    orchestrator.start().await?;
    info!(
        "{} server(s) managed, supported types: {}",
        orchestrator.registry().len(),
        orchestrator
            .registry()
            .variants()
            .class_names()
            .collect::<Vec<_>>()
            .join(", ")
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    orchestrator.shutdown().await;
    info!("Bye.");
    Ok(())
}
