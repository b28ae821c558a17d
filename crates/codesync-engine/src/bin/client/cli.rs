use std::path::PathBuf;

use clap::Parser;
use codesync_domain::DEFAULT_MAX_REQUEST_BYTES;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Base URL of the sync API
    #[arg(long, env = "CODESYNC_SERVER", default_value = "http://localhost:3015", global = true)]
    pub server: String,

    /// Bearer token identifying the tenant
    #[arg(long, env = "CODESYNC_API_KEY", global = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "CODESYNC_TENANT", default_value = "local", global = true)]
    pub tenant: String,

    /// Project id, defaults to the project directory name
    #[arg(long, env = "CODESYNC_PROJECT", global = true)]
    pub project: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 120, global = true)]
    pub timeout_secs: u64,

    /// Request body cap; must not exceed the server's `protocol.max_request_bytes`
    #[arg(long, env = "CODESYNC_MAX_REQUEST_BYTES", default_value_t = DEFAULT_MAX_REQUEST_BYTES, global = true)]
    pub max_request_bytes: usize,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Parser, Debug)]
pub enum Commands {
    /// Run one sync round
    Sync {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Mark changed files dirty as they change and sync after each burst
    Watch {
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Quiet period that ends a burst of changes
        #[arg(long, default_value_t = 500)]
        debounce_ms: u64,
    },
    /// Show the local root, dirty paths and changes since the last sync
    Status {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Search the synced project
    Search {
        query: String,

        #[arg(long, default_value = ".")]
        path: PathBuf,

        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },
}
