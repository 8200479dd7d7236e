//! bcrypt password hashing, off the async workers

/// Work factor for new hashes
pub const COST: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("bcrypt failed: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),

    #[error("hashing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub async fn hash(plain: String) -> Result<String, PasswordError> {
    let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(plain, COST)).await??;
    Ok(hashed)
}

/// `Ok(false)` on mismatch; errors only for malformed hashes
pub async fn verify(plain: String, hashed: String) -> Result<bool, PasswordError> {
    let matches = tokio::task::spawn_blocking(move || bcrypt::verify(plain, &hashed)).await??;
    Ok(matches)
}
