//! Registration, login and token verification

use axum::extract::{FromRequestParts, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

use super::{ApiError, AppState};
use crate::auth::{password, Claims, TokenError};
use crate::store::{NewUser, StoreError};

const PASSWORD_LEN: std::ops::RangeInclusive<usize> = 6..=100;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

fn elapsed_ms(started: Instant) -> String {
    format!("{}ms", started.elapsed().as_millis())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Both fields present and non-empty
fn credentials(email: Option<String>, password: Option<String>) -> Result<(String, String), ApiError> {
    match (email, password) {
        (Some(e), Some(p)) if !e.is_empty() && !p.is_empty() => Ok((e, p)),
        _ => Err(ApiError::BadRequest("Email and password are required".to_string())),
    }
}

/// Claims of a request carrying a valid bearer token
pub struct AuthUser(pub Claims);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        match state.signer.verify(token) {
            Ok(claims) => Ok(AuthUser(claims)),
            Err(err) => {
                if let TokenError::Expired { expired_at } = &err {
                    tracing::error!(expiredAt = %expired_at.to_rfc3339(), "[JWT ERROR] Token expired at: {}", expired_at);
                }
                Err(ApiError::unauthorized("Invalid or expired token"))
            }
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let started = Instant::now();
    let (email, plain) = credentials(body.email, body.password)?;

    if !is_valid_email(&email) {
        tracing::error!("[AUTH ERROR] Validation failed: invalid email {} ({})", email, elapsed_ms(started));
        return Err(ApiError::BadRequest("Invalid email format".to_string()));
    }
    if !PASSWORD_LEN.contains(&plain.chars().count()) {
        tracing::error!("[AUTH ERROR] Validation failed: password length ({})", elapsed_ms(started));
        return Err(ApiError::BadRequest(
            "Password must be between 6 and 100 characters".to_string(),
        ));
    }

    let password_hash = password::hash(plain).await.map_err(|e| {
        tracing::error!(error = %e, "[AUTH ERROR] Password hashing failed");
        ApiError::Internal("Failed to create user".to_string())
    })?;

    let created = state
        .store
        .create_user(NewUser {
            email: email.clone(),
            password_hash,
            name: Some(body.name.filter(|n| !n.is_empty()).unwrap_or_else(|| "Anonymous".to_string())),
        })
        .await;

    match created {
        Ok(user) => {
            tracing::info!("[AUTH] User registered: {} ({})", email, elapsed_ms(started));
            Ok((
                StatusCode::CREATED,
                Json(json!({ "message": "User created successfully", "user": user })),
            ))
        }
        Err(StoreError::UniqueViolation(_)) => {
            tracing::error!("[AUTH ERROR] Duplicate email: {} ({})", email, elapsed_ms(started));
            Err(ApiError::Conflict("Email already exists".to_string()))
        }
        Err(err) => {
            tracing::error!(
                timestamp = %Utc::now().to_rfc3339(),
                error = %err,
                code = ?err.code(),
                responseTime = %elapsed_ms(started),
                "[DB ERROR] Registration failed"
            );
            Err(ApiError::Internal("Failed to create user".to_string()))
        }
    }
}

pub async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> Result<Json<Value>, ApiError> {
    let started = Instant::now();
    let (email, plain) = credentials(body.email, body.password)?;

    let login_failed = |err: &dyn std::fmt::Display| {
        tracing::error!(
            timestamp = %Utc::now().to_rfc3339(),
            error = %err,
            responseTime = %elapsed_ms(started),
            "[AUTH ERROR] Login failed"
        );
        ApiError::Internal("Login failed".to_string())
    };

    let user = match state.store.find_user_by_email(&email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::error!("[AUTH ERROR] User not found: {} ({})", email, elapsed_ms(started));
            return Err(ApiError::unauthorized("Invalid email or password"));
        }
        Err(err) => return Err(login_failed(&err)),
    };

    let valid = password::verify(plain, user.password_hash.clone())
        .await
        .map_err(|e| login_failed(&e))?;
    if !valid {
        tracing::error!("[AUTH ERROR] Invalid password for user: {} ({})", email, elapsed_ms(started));
        return Err(ApiError::unauthorized("Invalid email or password"));
    }

    let ttl = Duration::from_secs(state.config.auth.token_ttl_secs);
    let token = state
        .signer
        .sign(user.id, &user.email, ttl)
        .map_err(|e| login_failed(&e))?;

    tracing::info!("[AUTH] User logged in: {} ({})", email, elapsed_ms(started));
    Ok(Json(json!({
        "message": "Login successful",
        "token": token,
        "user": user,
    })))
}

pub async fn verify(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
    let token = bearer_token(&headers).ok_or_else(|| ApiError::unauthorized("No token provided"))?;

    match state.signer.verify(token) {
        Ok(claims) => Ok(Json(json!({ "valid": true, "user": claims }))),
        Err(TokenError::Expired { expired_at }) => {
            tracing::error!(
                timestamp = %Utc::now().to_rfc3339(),
                expiredAt = %expired_at.to_rfc3339(),
                "[JWT ERROR] Token expired"
            );
            Err(ApiError::Unauthorized {
                message: "Token expired".to_string(),
                expired_at: Some(expired_at),
            })
        }
        Err(err) => {
            tracing::error!("[JWT ERROR] Token verification failed: {}", err);
            Err(ApiError::unauthorized("Invalid token"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("a@example.com"));
        assert!(!is_valid_email("example.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@localhost"));
    }

    #[test]
    fn test_credentials_required() {
        assert!(credentials(Some("a@example.com".into()), None).is_err());
        assert!(credentials(Some(String::new()), Some("secret".into())).is_err());
        assert!(credentials(Some("a@example.com".into()), Some("secret".into())).is_ok());
    }
}
