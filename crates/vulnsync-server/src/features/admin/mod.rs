//! Admin feature module
//!
//! Ingestion status and dataset backup/restore.

pub mod commands;
pub mod queries;
pub mod routes;

pub use routes::admin_routes;
