//! Board storage
//!
//! The relational collaborator behind a narrow trait. `MySqlStore` is the
//! production backend (sqlx pool); `MemoryStore` keeps tables in process and
//! models the bounded pool with a semaphore, so every chaos scenario can be
//! reproduced without a database.

pub mod memory;
pub mod mysql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::time::Duration;

pub use memory::MemoryStore;
pub use mysql::MySqlStore;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Could not reach the database
    #[error("Connection failed ({code}): {message}")]
    Connection {
        code: String,
        errno: Option<i32>,
        message: String,
    },

    /// No pooled connection became available in time
    #[error("ResourceRequest timed out after {waited_ms}ms")]
    AcquireTimeout { waited_ms: u64 },

    /// Insert collided with a unique key
    #[error("Duplicate value for unique field: {0}")]
    UniqueViolation(String),

    #[error("Record not found")]
    NotFound,

    #[error("Query failed: {0}")]
    Query(String),
}

impl StoreError {
    /// errno-style code for log records, when there is one
    pub fn code(&self) -> Option<&str> {
        match self {
            StoreError::Connection { code, .. } => Some(code),
            StoreError::AcquireTimeout { .. } => Some("ETIMEDOUT"),
            _ => None,
        }
    }

    pub fn errno(&self) -> Option<i32> {
        match self {
            StoreError::Connection { errno, .. } => *errno,
            _ => None,
        }
    }

    /// Error name as logged in `errorName`
    pub fn name(&self) -> &'static str {
        match self {
            StoreError::Connection { .. } => "ConnectionError",
            StoreError::AcquireTimeout { .. } => "ConnectionAcquireTimeoutError",
            StoreError::UniqueViolation(_) => "UniqueConstraintError",
            StoreError::NotFound => "NotFoundError",
            StoreError::Query(_) => "DatabaseError",
        }
    }

    pub fn from_io(err: &io::Error) -> Self {
        StoreError::Connection {
            code: io_error_code(err).to_string(),
            errno: err.raw_os_error(),
            message: err.to_string(),
        }
    }
}

/// Map an I/O error onto the errno names log analyzers key on
pub fn io_error_code(err: &io::Error) -> &'static str {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
        io::ErrorKind::ConnectionReset => "ECONNRESET",
        io::ErrorKind::ConnectionAborted => "ECONNABORTED",
        io::ErrorKind::TimedOut => "ETIMEDOUT",
        io::ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL",
        io::ErrorKind::PermissionDenied => "EACCES",
        io::ErrorKind::BrokenPipe => "EPIPE",
        io::ErrorKind::NotConnected => "ENOTCONN",
        _ if is_lookup_failure(err) => "ENOTFOUND",
        _ => "UNKNOWN",
    }
}

fn is_lookup_failure(err: &io::Error) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("lookup") || message.contains("name or service not known") || message.contains("no such host")
}

/// Find the innermost I/O error in an error's source chain
pub fn find_io_error<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a io::Error> {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    let mut found = None;
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            found = Some(io_err);
        }
        current = e.source();
    }
    found
}

/// Pool limits the store was built with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

/// A registered board user
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    #[sqlx(rename = "password")]
    pub password_hash: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
}

/// Public author fields embedded in posts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Author {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
}

impl From<&User> for Author {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub user_id: i64,
    pub title: String,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostWithAuthor {
    #[serde(flatten)]
    pub post: Post,
    pub author: Option<Author>,
}

/// Operations the board and the chaos scenarios need from the database
#[async_trait]
pub trait BoardStore: Send + Sync {
    /// Backend name for logs and health output
    fn backend(&self) -> &'static str;

    fn pool_settings(&self) -> PoolSettings;

    /// Round-trip a trivial query
    async fn ping(&self) -> Result<(), StoreError>;

    /// Create tables if they do not exist
    async fn init_schema(&self) -> Result<(), StoreError>;

    /// Hold a pooled connection for `duration` inside the database
    async fn sleep_query(&self, duration: Duration) -> Result<(), StoreError>;

    async fn first_user(&self) -> Result<Option<User>, StoreError>;

    async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn count_posts_by_user(&self, user_id: i64) -> Result<u64, StoreError>;

    async fn create_post(&self, post: NewPost) -> Result<Post, StoreError>;

    /// Newest first, without authors
    async fn list_posts(&self, limit: u32, offset: u32) -> Result<Vec<Post>, StoreError>;

    /// Newest first, authors loaded in the same query
    async fn list_posts_with_authors(&self, limit: u32, offset: u32) -> Result<Vec<PostWithAuthor>, StoreError>;

    async fn find_post(&self, id: i64) -> Result<Option<Post>, StoreError>;

    async fn find_post_with_author(&self, id: i64) -> Result<Option<PostWithAuthor>, StoreError>;

    /// Returns whether a row was deleted
    async fn delete_post(&self, id: i64) -> Result<bool, StoreError>;
}
