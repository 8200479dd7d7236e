//! Slow query: list posts, then fetch each author with its own query (N+1)

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{millis, timestamp};
use crate::auth::password;
use crate::chaos::report::{ActionResult, DiagnosticReport, Metrics};
use crate::chaos::runner::run_action;
use crate::chaos::{ScenarioError, ScenarioKind};
use crate::store::{BoardStore, NewPost, NewUser, User};

const SEED_PASSWORD: &str = "password123";

#[derive(Debug, Clone)]
pub struct SlowQueryPlan {
    /// Posts the seed user should own before the pattern runs
    pub seed_posts: u32,
    /// Author lookups slower than this are logged individually
    pub slow_threshold: Duration,
}

pub async fn run(store: Arc<dyn BoardStore>, plan: SlowQueryPlan) -> DiagnosticReport {
    run_action(ScenarioKind::SlowQuery, n_plus_one(store.as_ref(), &plan)).await
}

async fn n_plus_one(store: &dyn BoardStore, plan: &SlowQueryPlan) -> ActionResult {
    match execute(store, plan).await {
        Ok(metrics) => ActionResult::Completed(metrics),
        Err(err) => {
            tracing::error!(error = %err, errorName = err.kind(), "[CHAOS ERROR] Failed to trigger slow query");
            ActionResult::errored(err)
        }
    }
}

/// Top the seed user up to `seed_posts` posts. Returns the user and how many
/// posts this call created.
async fn seed(store: &dyn BoardStore, seed_posts: u32) -> Result<(User, u64), ScenarioError> {
    let user = match store.first_user().await? {
        Some(user) => user,
        None => {
            let password_hash = password::hash(SEED_PASSWORD.to_string())
                .await
                .map_err(|e| ScenarioError::Query(e.to_string()))?;
            store
                .create_user(NewUser {
                    email: format!("chaos-test-{}@example.com", Utc::now().timestamp_millis()),
                    password_hash,
                    name: Some("Chaos Test User".to_string()),
                })
                .await?
        }
    };

    let existing = store.count_posts_by_user(user.id).await?;
    let mut created = 0u64;
    for i in existing..u64::from(seed_posts) {
        store
            .create_post(NewPost {
                user_id: user.id,
                title: format!("Test Post {}", i + 1),
                content: Some(format!("This is test content {}", i + 1)),
            })
            .await?;
        created += 1;
    }
    if created > 0 {
        tracing::info!("   Seeded {} posts for user {}", created, user.id);
    }
    Ok((user, created))
}

async fn execute(store: &dyn BoardStore, plan: &SlowQueryPlan) -> Result<Metrics, ScenarioError> {
    let (user, seeded) = seed(store, plan.seed_posts).await?;

    let started = Instant::now();
    let posts = store.list_posts(plan.seed_posts, 0).await?;
    tracing::info!("[QUERY] Initial query completed: {}ms", started.elapsed().as_millis());

    let mut slow_queries = 0u64;
    let mut slowest = Duration::ZERO;
    for post in &posts {
        let lookup = Instant::now();
        let _author = store.find_user(post.user_id).await?;
        let query_time = lookup.elapsed();
        slowest = slowest.max(query_time);

        if query_time > plan.slow_threshold {
            slow_queries += 1;
            tracing::error!(
                timestamp = %timestamp(),
                queryTime = %millis(query_time),
                postId = post.id,
                userId = post.user_id,
                "[SLOW QUERY] Author fetch for post {} took {}",
                post.id,
                millis(query_time)
            );
        }
    }

    let total = started.elapsed();
    let total_queries = posts.len() + 1;
    let avg_ms = total.as_secs_f64() * 1000.0 / posts.len().max(1) as f64;

    tracing::error!(
        timestamp = %timestamp(),
        totalQueries = total_queries,
        totalTime = %millis(total),
        avgTimePerQuery = %format!("{:.2}ms", avg_ms),
        recommendation = "Use eager loading to fetch authors with posts in one query",
        "[PERFORMANCE ERROR] N+1 Query detected"
    );

    Ok(Metrics::new()
        .with("totalQueries", total_queries)
        .with("totalTimeMs", total.as_millis() as u64)
        .with("totalTime", millis(total))
        .with("avgTimePerQueryMs", (avg_ms * 100.0).round() / 100.0)
        .with("slowestQueryMs", slowest.as_millis() as u64)
        .with("slowQueries", slow_queries)
        .with("slowThresholdMs", plan.slow_threshold.as_millis() as u64)
        .with("postsFetched", posts.len())
        .with("seededPosts", seeded)
        .with("seedUserId", user.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::Outcome;
    use crate::store::{MemoryStore, PoolSettings};

    fn settings() -> PoolSettings {
        PoolSettings {
            max_connections: 4,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    fn plan(seed_posts: u32) -> SlowQueryPlan {
        SlowQueryPlan {
            seed_posts,
            slow_threshold: Duration::from_millis(100),
        }
    }

    async fn seed_user(store: &dyn BoardStore) -> User {
        store
            .create_user(NewUser {
                email: "seed@example.com".into(),
                password_hash: "hash".into(),
                name: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_repeat_runs_do_not_grow_seed() {
        let store: Arc<dyn BoardStore> = Arc::new(MemoryStore::new(settings()));
        let user = seed_user(store.as_ref()).await;

        let first = run(store.clone(), plan(100)).await;
        let second = run(store.clone(), plan(100)).await;

        assert_eq!(first.outcome, Outcome::Completed);
        assert_eq!(first.metrics.get_u64("totalQueries"), Some(101));
        assert_eq!(first.metrics.get_u64("seededPosts"), Some(100));
        assert_eq!(second.metrics.get_u64("totalQueries"), Some(101));
        assert_eq!(second.metrics.get_u64("seededPosts"), Some(0));
        assert_eq!(store.count_posts_by_user(user.id).await.unwrap(), 100);
        assert!(second.diagnosis.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_lookups_are_counted() {
        let store: Arc<dyn BoardStore> =
            Arc::new(MemoryStore::new(settings()).with_query_latency(Duration::from_millis(150)));
        seed_user(store.as_ref()).await;

        let report = run(store, plan(3)).await;

        assert_eq!(report.metrics.get_u64("totalQueries"), Some(4));
        assert_eq!(report.metrics.get_u64("slowQueries"), Some(3));
        assert!(report.metrics.get_u64("totalTimeMs").unwrap() >= 600);
    }

    #[tokio::test]
    async fn test_seed_user_created_when_board_empty() {
        let store: Arc<dyn BoardStore> = Arc::new(MemoryStore::new(settings()));

        let report = run(store.clone(), plan(2)).await;

        assert_eq!(report.outcome, Outcome::Completed);
        let user = store.first_user().await.unwrap().unwrap();
        assert!(user.email.starts_with("chaos-test-"));
        assert!(password::verify(SEED_PASSWORD.to_string(), user.password_hash).await.unwrap());
    }
}
