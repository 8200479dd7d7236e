//! Scenario failure types
//!
//! These are the faults a scenario run captures. They are data, not control
//! flow: a scenario returns them inside [`super::ActionResult::Errored`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Fault taxonomy used by the log analyzer to group failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultClass {
    /// Wrong endpoint, refused or unreachable connection
    Connectivity,
    /// Pool exhausted, heap pressure, CPU saturation
    ResourceExhaustion,
    /// Upstream call or credential validity window exceeded
    Timeout,
    /// Anything the application layer rejected
    Application,
}

/// Error types captured by scenario runs
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScenarioError {
    /// Could not open a connection to the target
    #[error("Connection failed ({code}): {message}")]
    Connection {
        code: String,
        errno: Option<i32>,
        message: String,
    },

    /// Some attempts could not get a pooled connection in time
    #[error("Connection pool exhausted: {failed} of {attempts} attempts failed")]
    PoolExhausted { failed: usize, attempts: usize },

    /// A query failed for a reason other than connectivity
    #[error("Query failed: {0}")]
    Query(String),

    /// The outbound HTTP call failed at the transport level
    #[error("Transport error ({code}): {message}")]
    Transport { code: String, message: String },

    /// The credential was rejected because it expired
    #[error("jwt expired")]
    TokenExpired { expired_at: DateTime<Utc> },

    /// The credential was rejected for any other reason
    #[error("Invalid token: {0}")]
    TokenInvalid(String),
}

impl ScenarioError {
    /// Stable error name, logged as `errorName`
    pub fn kind(&self) -> &'static str {
        match self {
            ScenarioError::Connection { .. } => "ConnectionError",
            ScenarioError::PoolExhausted { .. } => "ConnectionAcquireTimeoutError",
            ScenarioError::Query(_) => "QueryError",
            ScenarioError::Transport { .. } => "TransportError",
            ScenarioError::TokenExpired { .. } => "TokenExpiredError",
            ScenarioError::TokenInvalid(_) => "JsonWebTokenError",
        }
    }

    pub fn class(&self) -> FaultClass {
        match self {
            ScenarioError::Connection { .. } | ScenarioError::Transport { .. } => {
                FaultClass::Connectivity
            }
            ScenarioError::PoolExhausted { .. } => FaultClass::ResourceExhaustion,
            ScenarioError::TokenExpired { .. } => FaultClass::Timeout,
            ScenarioError::Query(_) | ScenarioError::TokenInvalid(_) => FaultClass::Application,
        }
    }
}

impl From<StoreError> for ScenarioError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection {
                code,
                errno,
                message,
            } => ScenarioError::Connection {
                code,
                errno,
                message,
            },
            StoreError::AcquireTimeout { .. } => ScenarioError::PoolExhausted {
                failed: 1,
                attempts: 1,
            },
            other => ScenarioError::Query(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let conn = ScenarioError::Connection {
            code: "ECONNREFUSED".into(),
            errno: Some(111),
            message: "refused".into(),
        };
        assert_eq!(conn.class(), FaultClass::Connectivity);
        assert_eq!(conn.kind(), "ConnectionError");

        let pool = ScenarioError::PoolExhausted {
            failed: 20,
            attempts: 30,
        };
        assert_eq!(pool.class(), FaultClass::ResourceExhaustion);
        assert_eq!(pool.to_string(), "Connection pool exhausted: 20 of 30 attempts failed");

        let expired = ScenarioError::TokenExpired {
            expired_at: Utc::now(),
        };
        assert_eq!(expired.class(), FaultClass::Timeout);
        assert_eq!(expired.to_string(), "jwt expired");
    }

    #[test]
    fn test_store_error_conversion() {
        let err: ScenarioError = StoreError::Connection {
            code: "ENOTFOUND".into(),
            errno: None,
            message: "lookup failed".into(),
        }
        .into();
        assert!(matches!(err, ScenarioError::Connection { ref code, .. } if code == "ENOTFOUND"));

        let err: ScenarioError = StoreError::UniqueViolation("email".into()).into();
        assert_eq!(err.class(), FaultClass::Application);
    }
}
