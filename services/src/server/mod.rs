//! HTTP API of the order service.

pub mod error;
pub mod health;
pub mod orders;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::build_router;
pub use state::AppState;
