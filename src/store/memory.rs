//! In-process board store
//!
//! Tables live behind a mutex. Every operation first checks out a permit
//! from a semaphore sized like the connection pool, with the same acquire
//! timeout, so pool exhaustion behaves as it would against MySQL.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time;

use super::{
    Author, BoardStore, NewPost, NewUser, PoolSettings, Post, PostWithAuthor, StoreError, User,
};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    posts: Vec<Post>,
    next_user_id: i64,
    next_post_id: i64,
}

impl Tables {
    fn author_of(&self, post: &Post) -> Option<Author> {
        self.users
            .iter()
            .find(|u| u.id == post.user_id)
            .map(Author::from)
    }

    fn newest_first(&self) -> Vec<&Post> {
        let mut posts: Vec<&Post> = self.posts.iter().collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        posts
    }
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    pool: Semaphore,
    settings: PoolSettings,
    query_latency: Duration,
}

impl MemoryStore {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            pool: Semaphore::new(settings.max_connections as usize),
            settings,
            query_latency: Duration::ZERO,
        }
    }

    /// Add a fixed round-trip delay to every query
    pub fn with_query_latency(mut self, latency: Duration) -> Self {
        self.query_latency = latency;
        self
    }

    async fn checkout(&self) -> Result<SemaphorePermit<'_>, StoreError> {
        match time::timeout(self.settings.acquire_timeout, self.pool.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(StoreError::Connection {
                code: "ECONNRESET".to_string(),
                errno: None,
                message: "connection pool closed".to_string(),
            }),
            Err(_) => Err(StoreError::AcquireTimeout {
                waited_ms: self.settings.acquire_timeout.as_millis() as u64,
            }),
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` against the tables while holding a pooled "connection"
    async fn query<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T, StoreError> {
        let _permit = self.checkout().await?;
        if !self.query_latency.is_zero() {
            time::sleep(self.query_latency).await;
        }
        let mut tables = self.tables();
        Ok(f(&mut tables))
    }
}

#[async_trait]
impl BoardStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn pool_settings(&self) -> PoolSettings {
        self.settings
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.query(|_| ()).await
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn sleep_query(&self, duration: Duration) -> Result<(), StoreError> {
        let _permit = self.checkout().await?;
        time::sleep(duration).await;
        Ok(())
    }

    async fn first_user(&self) -> Result<Option<User>, StoreError> {
        self.query(|t| t.users.first().cloned()).await
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        self.query(|t| t.users.iter().find(|u| u.id == id).cloned()).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.query(|t| t.users.iter().find(|u| u.email == email).cloned())
            .await
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        self.query(|t| {
            if t.users.iter().any(|u| u.email == user.email) {
                return Err(StoreError::UniqueViolation("email".to_string()));
            }
            t.next_user_id += 1;
            let now = Utc::now();
            let created = User {
                id: t.next_user_id,
                email: user.email,
                password_hash: user.password_hash,
                name: user.name,
                created_at: now,
                updated_at: now,
            };
            t.users.push(created.clone());
            Ok(created)
        })
        .await?
    }

    async fn count_posts_by_user(&self, user_id: i64) -> Result<u64, StoreError> {
        self.query(|t| t.posts.iter().filter(|p| p.user_id == user_id).count() as u64)
            .await
    }

    async fn create_post(&self, post: NewPost) -> Result<Post, StoreError> {
        self.query(|t| {
            if !t.users.iter().any(|u| u.id == post.user_id) {
                return Err(StoreError::Query(format!(
                    "foreign key violation: user {} does not exist",
                    post.user_id
                )));
            }
            t.next_post_id += 1;
            let now = Utc::now();
            let created = Post {
                id: t.next_post_id,
                user_id: post.user_id,
                title: post.title,
                content: post.content,
                created_at: now,
                updated_at: now,
            };
            t.posts.push(created.clone());
            Ok(created)
        })
        .await?
    }

    async fn list_posts(&self, limit: u32, offset: u32) -> Result<Vec<Post>, StoreError> {
        self.query(|t| {
            t.newest_first()
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect()
        })
        .await
    }

    async fn list_posts_with_authors(&self, limit: u32, offset: u32) -> Result<Vec<PostWithAuthor>, StoreError> {
        self.query(|t| {
            t.newest_first()
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .map(|p| PostWithAuthor {
                    post: p.clone(),
                    author: t.author_of(p),
                })
                .collect()
        })
        .await
    }

    async fn find_post(&self, id: i64) -> Result<Option<Post>, StoreError> {
        self.query(|t| t.posts.iter().find(|p| p.id == id).cloned()).await
    }

    async fn find_post_with_author(&self, id: i64) -> Result<Option<PostWithAuthor>, StoreError> {
        self.query(|t| {
            t.posts.iter().find(|p| p.id == id).map(|p| PostWithAuthor {
                post: p.clone(),
                author: t.author_of(p),
            })
        })
        .await
    }

    async fn delete_post(&self, id: i64) -> Result<bool, StoreError> {
        self.query(|t| {
            let before = t.posts.len();
            t.posts.retain(|p| p.id != id);
            t.posts.len() != before
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn settings(max: u32, acquire_ms: u64) -> PoolSettings {
        PoolSettings {
            max_connections: max,
            acquire_timeout: Duration::from_millis(acquire_ms),
        }
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            name: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = MemoryStore::new(settings(2, 100));
        store.create_user(new_user("a@example.com")).await.unwrap();
        let err = store.create_user(new_user("a@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(ref f) if f == "email"));
    }

    #[tokio::test]
    async fn test_posts_listed_newest_first_with_authors() {
        let store = MemoryStore::new(settings(2, 100));
        let user = store.create_user(new_user("a@example.com")).await.unwrap();
        for i in 0..3 {
            store
                .create_post(NewPost {
                    user_id: user.id,
                    title: format!("Post {}", i),
                    content: None,
                })
                .await
                .unwrap();
        }

        let posts = store.list_posts_with_authors(2, 0).await.unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].post.title, "Post 2");
        assert_eq!(posts[0].author.as_ref().unwrap().email, "a@example.com");

        let rest = store.list_posts(10, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].title, "Post 0");
        assert_eq!(store.count_posts_by_user(user.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_post_requires_existing_user() {
        let store = MemoryStore::new(settings(2, 100));
        let err = store
            .create_post(NewPost {
                user_id: 42,
                title: "orphan".into(),
                content: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));
    }

    #[tokio::test]
    async fn test_delete_post() {
        let store = MemoryStore::new(settings(2, 100));
        let user = store.create_user(new_user("a@example.com")).await.unwrap();
        let post = store
            .create_post(NewPost {
                user_id: user.id,
                title: "t".into(),
                content: Some("c".into()),
            })
            .await
            .unwrap();
        assert!(store.delete_post(post.id).await.unwrap());
        assert!(!store.delete_post(post.id).await.unwrap());
        assert!(store.find_post(post.id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_when_pool_held() {
        let store = Arc::new(MemoryStore::new(settings(1, 50)));
        let holder = {
            let store = store.clone();
            tokio::spawn(async move { store.sleep_query(Duration::from_secs(1)).await })
        };
        tokio::task::yield_now().await;

        let err = store.ping().await.unwrap_err();
        assert!(matches!(err, StoreError::AcquireTimeout { waited_ms: 50 }));
        assert_eq!(err.code(), Some("ETIMEDOUT"));

        holder.await.unwrap().unwrap();
        store.ping().await.unwrap();
    }
}
