//! MySQL board store over a sqlx connection pool

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;
use std::time::Duration;

use super::{
    find_io_error, Author, BoardStore, NewPost, NewUser, PoolSettings, Post, PostWithAuthor,
    StoreError, User,
};
use crate::config::DatabaseConfig;

const CREATE_USERS: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    email VARCHAR(255) NOT NULL,
    password VARCHAR(255) NOT NULL,
    name VARCHAR(100) NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
    UNIQUE KEY unique_email (email)
) DEFAULT CHARSET = utf8mb4 COLLATE = utf8mb4_unicode_ci
"#;

const CREATE_POSTS: &str = r#"
CREATE TABLE IF NOT EXISTS posts (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    user_id BIGINT NOT NULL,
    title VARCHAR(255) NOT NULL,
    content TEXT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
    KEY idx_posts_user_id (user_id),
    CONSTRAINT fk_posts_user FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
) DEFAULT CHARSET = utf8mb4 COLLATE = utf8mb4_unicode_ci
"#;

const USER_COLUMNS: &str = "id, email, password, name, created_at, updated_at";
const POST_COLUMNS: &str = "id, user_id, title, content, created_at, updated_at";

const POSTS_WITH_AUTHORS: &str = r#"
SELECT p.id, p.user_id, p.title, p.content, p.created_at, p.updated_at,
       u.id AS author_id, u.email AS author_email, u.name AS author_name
FROM posts p
LEFT JOIN users u ON u.id = p.user_id
"#;

/// Connection options for a MySQL endpoint
pub fn connect_options(host: &str, port: u16, user: &str, password: &str, database: &str) -> MySqlConnectOptions {
    MySqlConnectOptions::new()
        .host(host)
        .port(port)
        .username(user)
        .password(password)
        .database(database)
        .charset("utf8mb4")
}

/// Translate a sqlx error, filling in the pool's acquire timeout
pub fn map_sqlx_error(err: sqlx::Error, acquire_timeout: Duration) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut => StoreError::AcquireTimeout {
            waited_ms: acquire_timeout.as_millis() as u64,
        },
        sqlx::Error::Io(io_err) => StoreError::from_io(&io_err),
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreError::UniqueViolation(db_err.constraint().unwrap_or("email").to_string())
        }
        sqlx::Error::PoolClosed => StoreError::Connection {
            code: "ECONNRESET".to_string(),
            errno: None,
            message: "connection pool closed".to_string(),
        },
        other => match find_io_error(&other) {
            Some(io_err) => StoreError::from_io(io_err),
            None => StoreError::Query(other.to_string()),
        },
    }
}

pub struct MySqlStore {
    pool: MySqlPool,
    settings: PoolSettings,
}

impl MySqlStore {
    /// Build the pool without connecting; the first query opens connections.
    pub fn connect_lazy(config: &DatabaseConfig) -> Self {
        let settings = config.pool.settings();

        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool.max)
            .min_connections(config.pool.min)
            .acquire_timeout(settings.acquire_timeout)
            .idle_timeout(Some(Duration::from_millis(config.pool.idle_timeout_ms)))
            .connect_lazy_with(connect_options(
                &config.host,
                config.port,
                &config.user,
                &config.password,
                &config.name,
            ));

        tracing::debug!(
            "MySQL pool configured for {}:{} (max={}, acquire={}ms)",
            config.host,
            config.port,
            config.pool.max,
            config.pool.acquire_timeout_ms
        );

        Self { pool, settings }
    }

    fn error(&self, err: sqlx::Error) -> StoreError {
        map_sqlx_error(err, self.settings.acquire_timeout)
    }

    fn post_with_author(row: &MySqlRow) -> Result<PostWithAuthor, sqlx::Error> {
        let post = Post {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        };
        let author_id: Option<i64> = row.try_get("author_id")?;
        let author = match author_id {
            Some(id) => Some(Author {
                id,
                email: row.try_get("author_email")?,
                name: row.try_get("author_name")?,
            }),
            None => None,
        };
        Ok(PostWithAuthor { post, author })
    }
}

#[async_trait]
impl BoardStore for MySqlStore {
    fn backend(&self) -> &'static str {
        "mysql"
    }

    fn pool_settings(&self) -> PoolSettings {
        self.settings
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| self.error(e))?;
        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in [CREATE_USERS, CREATE_POSTS] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| self.error(e))?;
        }
        tracing::info!("Database tables synchronized");
        Ok(())
    }

    async fn sleep_query(&self, duration: Duration) -> Result<(), StoreError> {
        sqlx::query("SELECT SLEEP(?) AS result")
            .bind(duration.as_secs_f64())
            .execute(&self.pool)
            .await
            .map_err(|e| self.error(e))?;
        Ok(())
    }

    async fn first_user(&self) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users ORDER BY id LIMIT 1", USER_COLUMNS))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.error(e))
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.error(e))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.error(e))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let result = sqlx::query("INSERT INTO users (email, password, name) VALUES (?, ?, ?)")
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.name)
            .execute(&self.pool)
            .await
            .map_err(|e| self.error(e))?;

        self.find_user(result.last_insert_id() as i64)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn count_posts_by_user(&self, user_id: i64) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.error(e))?;
        Ok(count.max(0) as u64)
    }

    async fn create_post(&self, post: NewPost) -> Result<Post, StoreError> {
        let result = sqlx::query("INSERT INTO posts (user_id, title, content) VALUES (?, ?, ?)")
            .bind(post.user_id)
            .bind(&post.title)
            .bind(&post.content)
            .execute(&self.pool)
            .await
            .map_err(|e| self.error(e))?;

        self.find_post(result.last_insert_id() as i64)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn list_posts(&self, limit: u32, offset: u32) -> Result<Vec<Post>, StoreError> {
        sqlx::query_as::<_, Post>(&format!(
            "SELECT {} FROM posts ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            POST_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.error(e))
    }

    async fn list_posts_with_authors(&self, limit: u32, offset: u32) -> Result<Vec<PostWithAuthor>, StoreError> {
        let rows = sqlx::query(&format!(
            "{} ORDER BY p.created_at DESC, p.id DESC LIMIT ? OFFSET ?",
            POSTS_WITH_AUTHORS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.error(e))?;

        rows.iter()
            .map(Self::post_with_author)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.error(e))
    }

    async fn find_post(&self, id: i64) -> Result<Option<Post>, StoreError> {
        sqlx::query_as::<_, Post>(&format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.error(e))
    }

    async fn find_post_with_author(&self, id: i64) -> Result<Option<PostWithAuthor>, StoreError> {
        let row = sqlx::query(&format!("{} WHERE p.id = ?", POSTS_WITH_AUTHORS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.error(e))?;

        row.as_ref()
            .map(Self::post_with_author)
            .transpose()
            .map_err(|e| self.error(e))
    }

    async fn delete_post(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| self.error(e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_pool_timeout_maps_to_acquire_timeout() {
        let err = map_sqlx_error(sqlx::Error::PoolTimedOut, Duration::from_secs(30));
        assert!(matches!(err, StoreError::AcquireTimeout { waited_ms: 30000 }));
    }

    #[test]
    fn test_io_error_maps_to_connection() {
        let err = map_sqlx_error(
            sqlx::Error::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
            Duration::from_secs(1),
        );
        assert_eq!(err.code(), Some("ECONNREFUSED"));
        assert_eq!(err.name(), "ConnectionError");
    }

    #[test]
    fn test_row_not_found() {
        let err = map_sqlx_error(sqlx::Error::RowNotFound, Duration::from_secs(1));
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_lazy_pool_reports_settings() {
        let config = DatabaseConfig::default();
        let store = MySqlStore::connect_lazy(&config);
        assert_eq!(store.backend(), "mysql");
        assert_eq!(store.pool_settings().max_connections, config.pool.max);
    }
}
