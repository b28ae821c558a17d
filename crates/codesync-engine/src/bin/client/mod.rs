pub mod cli;
pub mod service;

pub use cli::{Args, Commands};
pub use service::{run_search, run_status, run_sync, run_watch};
