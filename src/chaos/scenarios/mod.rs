//! Scenario bodies
//!
//! Each module plugs one fault into the runner contract and owns the log
//! records the analyzer expects for that fault.

pub mod api_timeout;
pub mod db_failure;
pub mod high_cpu;
pub mod jwt_expiry;
pub mod memory_leak;
pub mod pool_exhaustion;
pub mod slow_query;

/// RFC 3339 timestamp field for diagnostic records
pub(crate) fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub(crate) fn millis(duration: std::time::Duration) -> String {
    format!("{}ms", duration.as_millis())
}
