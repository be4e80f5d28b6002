pub mod admission;
pub mod auth;
pub mod metrics;
pub mod trace;
