use chrono::{Duration, Utc};
use std::sync::Arc;

use super::error::ServiceError;
use super::refresh::RefreshTokenService;
use super::store::UserStore;
use crate::models::{User, UserLookup, UserPatch, VerificationDigest};
use crate::utils::token::{generate_random_token, sha256_hex};
use crate::utils::{hash_password, Password};

/// Each purpose has its own slot on the user record, so tokens of different
/// purposes never interfere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    EmailVerification,
    PasswordReset,
}

impl TokenPurpose {
    fn lookup(self, token_hash: String) -> UserLookup {
        match self {
            TokenPurpose::EmailVerification => UserLookup::EmailVerificationHash(token_hash),
            TokenPurpose::PasswordReset => UserLookup::PasswordResetHash(token_hash),
        }
    }

    fn slot(self, user: &User) -> Option<&VerificationDigest> {
        match self {
            TokenPurpose::EmailVerification => user.email_verification.as_ref(),
            TokenPurpose::PasswordReset => user.password_reset.as_ref(),
        }
    }

    fn set_slot(self, patch: &mut UserPatch, value: Option<VerificationDigest>) {
        match self {
            TokenPurpose::EmailVerification => patch.email_verification = Some(value),
            TokenPurpose::PasswordReset => patch.password_reset = Some(value),
        }
    }
}

/// What redeeming a token does to the account.
#[derive(Debug, Clone)]
pub enum Redemption {
    VerifyEmail,
    ResetPassword(Password),
}

impl Redemption {
    pub fn purpose(&self) -> TokenPurpose {
        match self {
            Redemption::VerifyEmail => TokenPurpose::EmailVerification,
            Redemption::ResetPassword(_) => TokenPurpose::PasswordReset,
        }
    }
}

#[derive(Clone)]
pub struct VerificationTokenService {
    users: Arc<dyn UserStore>,
    refresh: RefreshTokenService,
    email_verification_ttl: Duration,
    password_reset_ttl: Duration,
}

impl VerificationTokenService {
    pub fn new(
        users: Arc<dyn UserStore>,
        refresh: RefreshTokenService,
        email_verification_ttl: Duration,
        password_reset_ttl: Duration,
    ) -> Self {
        Self {
            users,
            refresh,
            email_verification_ttl,
            password_reset_ttl,
        }
    }

    fn ttl(&self, purpose: TokenPurpose) -> Duration {
        match purpose {
            TokenPurpose::EmailVerification => self.email_verification_ttl,
            TokenPurpose::PasswordReset => self.password_reset_ttl,
        }
    }

    /// Stores the digest of a fresh token, replacing any outstanding token of
    /// the same purpose, and returns the raw token for delivery.
    pub async fn issue(&self, purpose: TokenPurpose, user_id: &str) -> Result<String, ServiceError> {
        let raw = generate_random_token();
        let digest = VerificationDigest {
            token_hash: sha256_hex(&raw),
            expires_at: Utc::now() + self.ttl(purpose),
        };

        let mut patch = UserPatch::default();
        purpose.set_slot(&mut patch, Some(digest));
        self.users
            .update(user_id, &patch)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        tracing::debug!(user_id = %user_id, ?purpose, "Verification token issued");
        Ok(raw)
    }

    /// Redeems a token: applies the purpose's mutation and clears the slot.
    pub async fn consume(&self, redemption: Redemption, raw: &str) -> Result<User, ServiceError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ServiceError::InvalidVerificationToken);
        }

        let purpose = redemption.purpose();
        let token_hash = sha256_hex(raw);
        let user = self
            .users
            .find_by(&purpose.lookup(token_hash.clone()))
            .await?
            .ok_or(ServiceError::InvalidVerificationToken)?;

        let digest = purpose
            .slot(&user)
            .filter(|d| d.token_hash == token_hash)
            .ok_or(ServiceError::InvalidVerificationToken)?;

        if digest.is_expired_at(Utc::now()) {
            return Err(ServiceError::VerificationTokenExpired);
        }

        let mut patch = UserPatch::default();
        purpose.set_slot(&mut patch, None);
        match &redemption {
            Redemption::VerifyEmail => {
                patch.email_verified = Some(true);
            }
            Redemption::ResetPassword(password) => {
                let hash = hash_password(password).map_err(|e| {
                    ServiceError::Internal(anyhow::anyhow!("Password hashing error: {}", e))
                })?;
                patch.password_hash = Some(hash);
            }
        }

        let updated = self
            .users
            .update(&user.id, &patch)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        if let Redemption::ResetPassword(_) = redemption {
            self.refresh.revoke_all(&updated.id).await?;
        }

        tracing::info!(user_id = %updated.id, ?purpose, "Verification token redeemed");
        Ok(updated)
    }
}
