//! Purls feature module
//!
//! Pass-through lookup of advisories by package URL.

pub mod queries;
pub mod routes;

pub use routes::purls_routes;
