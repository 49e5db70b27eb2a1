//! OTA release HTTP service
//!
//! Thin axum layer over [`ota_release::Coordinator`]. Every blocking
//! coordinator call runs on the blocking pool under its operation-class
//! time budget.

pub mod error;
pub mod handlers;
pub mod request_id;
pub mod server;
pub mod state;

pub use error::ServerError;
pub use server::{router, serve};
pub use state::AppState;
