//! Domain model and collaborator contracts for incremental content sync

mod chunk;
mod config;
mod derivation;
mod kv;
mod language;
mod protocol;
mod vector;

pub use chunk::*;
pub use config::*;
pub use derivation::*;
pub use kv::*;
pub use language::*;
pub use protocol::*;
pub use vector::*;
