/*!
# Telemetry

Logging setup and end-of-run summaries for the cache relay.
*/

use artifact_sync::{ItemFailure, SyncReport};
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` is used. Calling this
/// more than once is harmless: later calls leave the first subscriber in place.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Emit the summary of a synchronisation pass
pub fn log_report(report: &SyncReport) {
    if report.is_empty() {
        tracing::info!("✅ Cache already in sync, nothing transferred");
        return;
    }

    tracing::info!(
        "📊 Sync summary: {} uploaded, {} downloaded, {} extracted, {} failed",
        report.uploaded.len(),
        report.downloaded.len(),
        report.extracted.len(),
        report.failure_count()
    );

    log_failures("upload", &report.upload_failures);
    log_failures("download", &report.download_failures);
    log_failures("extract", &report.extract_failures);

    if report.has_failures() {
        tracing::warn!("⚠️ Sync finished with failures");
    } else {
        tracing::info!("✅ Sync finished");
    }
}

fn log_failures(stage: &str, failures: &[ItemFailure]) {
    for failure in failures {
        tracing::warn!(
            "❌ {} {} failed ({:?}): {}",
            stage,
            failure.identifier,
            failure.kind,
            failure.message
        );
    }
}
