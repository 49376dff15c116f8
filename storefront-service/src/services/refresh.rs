use chrono::Utc;
use std::sync::Arc;

use super::error::{ServiceError, TokenError};
use super::jwt::JwtService;
use super::store::{RefreshTokenStore, UserStore};
use crate::models::{RefreshToken, User};
use crate::utils::token::sha256_hex;

/// Three non-empty dot-separated segments.
fn is_jwt_shaped(token: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    segments.len() == 3 && segments.iter().all(|s| !s.is_empty())
}

/// Issues, verifies and revokes persisted refresh sessions.
#[derive(Clone)]
pub struct RefreshTokenService {
    jwt: JwtService,
    tokens: Arc<dyn RefreshTokenStore>,
    users: Arc<dyn UserStore>,
}

impl RefreshTokenService {
    pub fn new(
        jwt: JwtService,
        tokens: Arc<dyn RefreshTokenStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self { jwt, tokens, users }
    }

    /// Signs a refresh token and persists its session record. A persistence
    /// failure fails the call; no token is handed out without a record.
    pub async fn issue(&self, user_id: &str) -> Result<String, ServiceError> {
        let signed = self.jwt.issue_refresh_token(user_id)?;
        let record = RefreshToken::new(
            signed.jti.clone(),
            user_id.to_string(),
            &signed.token,
            signed.expires_at,
        );

        self.tokens.insert(&record).await.map_err(|e| {
            tracing::error!(user_id = %user_id, error = %e, "Failed to persist refresh token");
            e
        })?;

        tracing::debug!(user_id = %user_id, session_id = %signed.jti, "Refresh token issued");
        Ok(signed.token)
    }

    /// Resolves a refresh token to its owner.
    ///
    /// The stored record is checked independently of the JWT `exp` claim, so
    /// a revoked or store-expired session fails even with a valid signature.
    pub async fn verify(&self, token: &str) -> Result<User, ServiceError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ServiceError::Validation(
                "Refresh token is required".to_string(),
            ));
        }
        if !is_jwt_shaped(token) {
            return Err(ServiceError::Validation(
                "Refresh token is malformed".to_string(),
            ));
        }

        let claims = self.jwt.verify_refresh_token(token)?;

        let record = self
            .tokens
            .find_by_hash(&sha256_hex(token))
            .await?
            .ok_or(TokenError::ExpiredOrRevoked)?;

        if record.is_expired_at(Utc::now()) || record.user_id != claims.sub {
            return Err(TokenError::ExpiredOrRevoked.into());
        }

        let user = self
            .users
            .find_by_id(&record.user_id)
            .await?
            .ok_or(TokenError::ExpiredOrRevoked)?;

        Ok(user)
    }

    pub async fn revoke(&self, token: &str) -> Result<(), ServiceError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ServiceError::Validation(
                "Refresh token is required".to_string(),
            ));
        }

        if !self.tokens.delete_by_hash(&sha256_hex(token)).await? {
            return Err(ServiceError::RefreshTokenNotFound);
        }
        Ok(())
    }

    /// Revokes a session only when it belongs to `user_id`. Someone else's
    /// token is reported as not found.
    pub async fn revoke_owned(&self, user_id: &str, token: &str) -> Result<(), ServiceError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ServiceError::Validation(
                "Refresh token is required".to_string(),
            ));
        }

        let hash = sha256_hex(token);
        match self.tokens.find_by_hash(&hash).await? {
            Some(record) if record.user_id == user_id => {}
            Some(_) => {
                tracing::warn!(user_id = %user_id, "Attempt to revoke a session owned by another user");
                return Err(ServiceError::RefreshTokenNotFound);
            }
            None => return Err(ServiceError::RefreshTokenNotFound),
        }

        if !self.tokens.delete_by_hash(&hash).await? {
            return Err(ServiceError::RefreshTokenNotFound);
        }
        Ok(())
    }

    /// Ends every session of a user. Returns the number removed.
    pub async fn revoke_all(&self, user_id: &str) -> Result<u64, ServiceError> {
        let removed = self.tokens.delete_for_user(user_id).await?;
        if removed > 0 {
            tracing::info!(user_id = %user_id, sessions = removed, "Revoked refresh sessions");
        }
        Ok(removed)
    }
}
