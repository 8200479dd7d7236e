//! Board posts

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;

use super::auth::AuthUser;
use super::{ApiError, AppState};
use crate::store::{Author, BoardStore, NewPost, Post, PostWithAuthor, StoreError};

const DEFAULT_LIMIT: u32 = 10;
const MAX_TITLE_LEN: usize = 255;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePost {
    pub title: Option<String>,
    pub content: Option<String>,
}

fn db_error(context: &str, err: &StoreError, started: Instant) -> ApiError {
    tracing::error!(
        timestamp = %Utc::now().to_rfc3339(),
        error = %err,
        code = ?err.code(),
        responseTime = %format!("{}ms", started.elapsed().as_millis()),
        "[DB ERROR] {}",
        context
    );
    ApiError::Internal(context.to_string())
}

/// One author lookup per post, all in flight at once
async fn load_authors_per_post(
    store: &dyn BoardStore,
    posts: Vec<Post>,
    started: Instant,
) -> Result<Vec<PostWithAuthor>, StoreError> {
    try_join_all(posts.into_iter().map(|post| async move {
        let author = store.find_user(post.user_id).await?;
        tracing::info!(
            "[SLOW QUERY] Fetching author for post {}: {}ms",
            post.id,
            started.elapsed().as_millis()
        );
        Ok::<_, StoreError>(PostWithAuthor {
            author: author.as_ref().map(Author::from),
            post,
        })
    }))
    .await
}

pub async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Result<Json<Value>, ApiError> {
    let started = Instant::now();
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let posts = if state.config.chaos.mode {
        tracing::warn!("[CHAOS] N+1 Query scenario enabled");
        let posts = state
            .store
            .list_posts(limit, offset)
            .await
            .map_err(|e| db_error("Failed to fetch posts", &e, started))?;
        let posts = load_authors_per_post(state.store.as_ref(), posts, started)
            .await
            .map_err(|e| db_error("Failed to fetch posts", &e, started))?;
        tracing::warn!(
            "[PERFORMANCE WARNING] Total query time: {}ms (N+1 detected)",
            started.elapsed().as_millis()
        );
        posts
    } else {
        let posts = state
            .store
            .list_posts_with_authors(limit, offset)
            .await
            .map_err(|e| db_error("Failed to fetch posts", &e, started))?;
        tracing::info!(
            "[API] GET /api/posts - {} posts ({}ms)",
            posts.len(),
            started.elapsed().as_millis()
        );
        posts
    };

    Ok(Json(json!({
        "count": posts.len(),
        "posts": posts,
        "queryTime": format!("{}ms", started.elapsed().as_millis()),
    })))
}

pub async fn show(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<PostWithAuthor>, ApiError> {
    let started = Instant::now();
    let post = state
        .store
        .find_post_with_author(id)
        .await
        .map_err(|e| db_error("Failed to fetch post", &e, started))?
        .ok_or_else(|| ApiError::NotFound("Post not found".to_string()))?;
    tracing::info!("[API] GET /api/posts/{} ({}ms)", id, started.elapsed().as_millis());
    Ok(Json(post))
}

pub async fn create(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(body): Json<CreatePost>,
) -> Result<(StatusCode, Json<Post>), ApiError> {
    let started = Instant::now();
    let title = body
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Title is required".to_string()))?;
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ApiError::BadRequest(format!(
            "Title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }

    let post = state
        .store
        .create_post(NewPost {
            user_id: claims.id,
            title,
            content: Some(body.content.unwrap_or_default()),
        })
        .await
        .map_err(|e| db_error("Failed to create post", &e, started))?;

    tracing::info!(
        "[API] POST /api/posts - Created post {} ({}ms)",
        post.id,
        started.elapsed().as_millis()
    );
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn remove(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let started = Instant::now();
    let post = state
        .store
        .find_post(id)
        .await
        .map_err(|e| db_error("Failed to delete post", &e, started))?
        .ok_or_else(|| ApiError::NotFound("Post not found".to_string()))?;

    if post.user_id != claims.id {
        return Err(ApiError::Forbidden(
            "Forbidden: You can only delete your own posts".to_string(),
        ));
    }

    state
        .store
        .delete_post(id)
        .await
        .map_err(|e| db_error("Failed to delete post", &e, started))?;

    tracing::info!("[API] DELETE /api/posts/{} - Deleted by user {}", id, claims.id);
    Ok(Json(json!({ "message": "Post deleted successfully" })))
}
