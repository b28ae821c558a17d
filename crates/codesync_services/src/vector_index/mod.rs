//! Vector index implementations and utilities

mod in_memory;

pub use in_memory::InMemoryVectorIndex;
