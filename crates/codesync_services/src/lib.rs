//! In-process implementations of the external collaborators
//!
//! These back local development and tests. Production deployments swap in
//! a networked key-value store, a vector database and a real deriver.

pub mod derivation;
pub mod kv;
pub mod vector_index;

pub use derivation::{MockDeriver, MockMode};
pub use kv::MemoryKeyValueStore;
pub use vector_index::InMemoryVectorIndex;
