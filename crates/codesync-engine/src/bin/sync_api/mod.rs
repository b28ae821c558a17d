pub mod handlers;
pub mod state;
pub mod types;

pub use handlers::router;
pub use state::AppState;
