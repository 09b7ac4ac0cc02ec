//! HTTP API handlers for huertbeat

pub mod callback;
pub mod health;

pub use callback::handle_callback;
pub use health::health_routes;
