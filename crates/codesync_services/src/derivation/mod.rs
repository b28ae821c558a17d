//! Derivation service doubles

mod mock_deriver;

pub use mock_deriver::{MockDeriver, MockMode};
