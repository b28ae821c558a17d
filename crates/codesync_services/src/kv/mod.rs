//! Key-value store implementations

mod memory;

pub use memory::MemoryKeyValueStore;
