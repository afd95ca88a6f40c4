//! HTTP API handlers for stemway-media

pub mod export;
pub mod health;
pub mod upload;

pub use export::export_routes;
pub use health::health_routes;
pub use upload::upload_routes;
