mod cli;
mod config;

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use artifact_sync::{SyncEngine, SyncReport};
use clap::Parser;
use process_guard::stop_recorded_process;
use state_store::EnvRunState;
use tracing::{error, info, warn};

use cli::{Cli, Commands, PostArgs, StopArgs, SyncArgs};
use config::{CacheDirs, SERVER_LOG_NAME};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(&cli.log_level);

    info!("🚀 cache-relay {} starting", env!("CARGO_PKG_VERSION"));

    let outcome = match cli.command {
        Commands::Post(args) => post(args).await,
        Commands::Sync(args) => {
            let dirs = CacheDirs::resolve(&args.dirs, &config::runner_temp());
            sync(&args, &dirs).await
        }
        Commands::StopServer(args) => Ok(stop_server(&args)),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Post-step: stop the server, surface its log, then sync
async fn post(args: PostArgs) -> Result<bool> {
    // The sync runs whatever happened to the server
    stop_server(&args.stop);

    let dirs = CacheDirs::resolve(&args.sync.dirs, &config::runner_temp());
    let server_log = args
        .server_log
        .clone()
        .unwrap_or_else(|| dirs.work_dir.join(SERVER_LOG_NAME));
    echo_server_log(&server_log).await;

    sync(&args.sync, &dirs).await
}

fn stop_server(args: &StopArgs) -> bool {
    let outcome = stop_recorded_process(&EnvRunState, &args.state_key);
    !outcome.is_failure()
}

async fn echo_server_log(path: &Path) {
    match tokio::fs::read(path).await {
        Ok(content) => {
            info!("📜 Server log ({}):", path.display());
            for line in String::from_utf8_lossy(&content).lines() {
                info!("{}", line);
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No server log at {}", path.display());
        }
        Err(e) => warn!("⚠️ Could not read server log {}: {}", path.display(), e),
    }
}

/// Run one sync pass; `Ok(false)` when items failed and partial runs are not allowed
async fn sync(args: &SyncArgs, dirs: &CacheDirs) -> Result<bool> {
    dirs.ensure().await?;

    let catalog = config::build_catalog(args)?;
    let engine = SyncEngine::new(catalog, config::sync_options(args, dirs));

    info!("🔄 Syncing {} with the artifact store", dirs.work_dir.display());
    let report = engine
        .synchronize(&dirs.work_dir, &dirs.archive_dir)
        .await
        .context("Sync aborted")?;

    telemetry::log_report(&report);

    if let Some(path) = &args.report_json {
        write_report(&report, path).await?;
    }

    if report.has_failures() && !args.allow_partial {
        error!("❌ {} artifact(s) failed to sync", report.failure_count());
        return Ok(false);
    }
    Ok(true)
}

async fn write_report(report: &SyncReport, path: &Path) -> Result<()> {
    let json = serde_json::to_vec_pretty(report).context("Failed to serialize sync report")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write sync report to {}", path.display()))?;
    info!("📝 Wrote sync report to {}", path.display());
    Ok(())
}
