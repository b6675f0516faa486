//! prohealth-core: shared infrastructure for ProHealth Connect services.
pub mod error;
pub mod middleware;
pub mod rate_limit;
