//! Database repositories
//!
//! Repository pattern for database access, separating data access logic
//! from protocol handling.

pub mod local_content;
pub mod overrides;
pub mod synced;
pub mod upstreams;
