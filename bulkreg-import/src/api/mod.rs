//! HTTP API handlers

pub mod bulk;
pub mod health;

pub use bulk::bulk_routes;
pub use health::health_routes;
