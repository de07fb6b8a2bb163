// Command line surface of the cache relay

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub const DEFAULT_STATE_KEY: &str = "TURBO_LOCAL_SERVER_PID";

#[derive(Parser, Debug)]
#[command(name = "cache-relay", version, about = "Post-step for CI build caches")]
pub struct Cli {
    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, env = "CACHE_RELAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stop the local cache server, echo its log and sync the cache
    Post(PostArgs),

    /// Sync the local cache with the artifact store
    Sync(SyncArgs),

    /// Stop the local cache server recorded in run state
    StopServer(StopArgs),
}

#[derive(Args, Debug)]
pub struct PostArgs {
    #[command(flatten)]
    pub stop: StopArgs,

    #[command(flatten)]
    pub sync: SyncArgs,

    /// Server log echoed before syncing [default: <work-dir>/out.log]
    #[arg(long, env = "CACHE_RELAY_SERVER_LOG")]
    pub server_log: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Run-state key holding the server pid
    #[arg(long, env = "CACHE_RELAY_STATE_KEY", default_value = DEFAULT_STATE_KEY)]
    pub state_key: String,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub dirs: DirArgs,

    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Bearer token for the HTTP artifact store
    #[arg(long, env = "CACHE_RELAY_TOKEN", requires = "remote_url", hide_env_values = true)]
    pub token: Option<String>,

    /// Per-request timeout for the HTTP artifact store
    #[arg(long, env = "CACHE_RELAY_REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    pub request_timeout_secs: u64,

    /// Pull remote artifacts down and extract them
    #[arg(long, env = "CACHE_RELAY_DOWNLOAD")]
    pub download: bool,

    /// Ceiling on simultaneous transfers (unbounded when absent)
    #[arg(long, env = "CACHE_RELAY_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Exit successfully even when individual artifacts failed
    #[arg(long, env = "CACHE_RELAY_ALLOW_PARTIAL")]
    pub allow_partial: bool,

    /// Write the sync report as JSON to this path
    #[arg(long, env = "CACHE_RELAY_REPORT_JSON")]
    pub report_json: Option<PathBuf>,
}

/// Local directories, defaulting under RUNNER_TEMP
#[derive(Args, Debug, Default)]
pub struct DirArgs {
    /// Upload candidates [default: $RUNNER_TEMP/turbo-cache]
    #[arg(long, env = "CACHE_RELAY_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Downloaded archives [default: $RUNNER_TEMP/turbo-archives]
    #[arg(long, env = "CACHE_RELAY_ARCHIVE_DIR")]
    pub archive_dir: Option<PathBuf>,

    /// Extraction root [default: $RUNNER_TEMP/turbo-downloads]
    #[arg(long, env = "CACHE_RELAY_EXTRACT_DIR")]
    pub extract_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct RemoteArgs {
    /// Base URL of the HTTP artifact store
    #[arg(long, env = "CACHE_RELAY_REMOTE_URL")]
    pub remote_url: Option<String>,

    /// Directory used as the artifact store
    #[arg(long, env = "CACHE_RELAY_REMOTE_DIR")]
    pub remote_dir: Option<PathBuf>,
}
