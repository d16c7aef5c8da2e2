use axum::http::{header, HeaderMap};

use crate::config::AuthConfig;
use crate::error::AppError;

/// Checks client tokens against the configured shared secret.
pub struct TokenValidator {
    secret: String,
}

impl TokenValidator {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            secret: config.token.clone(),
        }
    }

    /// Exact string comparison against the secret; no expiry or claims.
    pub fn validate(&self, token: Option<&str>) -> Result<(), AppError> {
        match token {
            None => Err(AppError::Auth("Missing authentication token".to_string())),
            Some(t) if t == self.secret => Ok(()),
            Some(_) => Err(AppError::Auth("Invalid token".to_string())),
        }
    }
}

/// Extract token from query parameter or Authorization header
pub fn extract_token(query_token: Option<&str>, headers: &HeaderMap) -> Option<String> {
    // First try query parameter
    if let Some(token) = query_token {
        return Some(token.to_string());
    }

    // Then try Authorization header
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}
