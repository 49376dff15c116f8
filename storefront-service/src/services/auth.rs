use std::sync::Arc;
use tokio_util::task::TaskTracker;

use super::cache::user_cache_key;
use super::error::{ServiceError, TokenError};
use super::jwt::{AccessTokenClaims, JwtService, TokenResponse};
use super::metrics::record_auth_event;
use super::notifier::{password_reset_email, verification_email, Notifier};
use super::queue::{enqueue_invalidation, QueueClient};
use super::refresh::RefreshTokenService;
use super::store::UserStore;
use super::verification::{Redemption, TokenPurpose, VerificationTokenService};
use crate::config::AuthPolicyConfig;
use crate::models::{Role, User, UserLookup};
use crate::utils::{hash_password, verify_password, Password};

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Input for creating an account, through registration or by an admin.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: Option<String>,
    pub email: String,
    pub password: Password,
    pub phone: Option<String>,
    pub role: Role,
}

#[derive(Debug)]
pub struct AuthSession {
    pub user: User,
    pub tokens: TokenResponse,
}

#[derive(Debug)]
pub struct RefreshedSession {
    pub access_token: String,
    /// Present only when refresh tokens are rotated.
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    jwt: JwtService,
    refresh: RefreshTokenService,
    verification: VerificationTokenService,
    notifier: Arc<dyn Notifier>,
    queue: Arc<dyn QueueClient>,
    policy: AuthPolicyConfig,
    outbox: TaskTracker,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        jwt: JwtService,
        refresh: RefreshTokenService,
        verification: VerificationTokenService,
        notifier: Arc<dyn Notifier>,
        queue: Arc<dyn QueueClient>,
        policy: AuthPolicyConfig,
    ) -> Self {
        Self {
            users,
            jwt,
            refresh,
            verification,
            notifier,
            queue,
            policy,
            outbox: TaskTracker::new(),
        }
    }

    /// Hands a message to the notifier on a detached task. The caller never
    /// waits on delivery and failures are only logged.
    fn dispatch_email(
        &self,
        user_id: &str,
        kind: &'static str,
        to: String,
        subject: String,
        body: String,
    ) {
        let notifier = self.notifier.clone();
        let user_id = user_id.to_string();
        self.outbox.spawn(async move {
            if let Err(e) = notifier.send(&to, &subject, &body).await {
                tracing::warn!(user_id = %user_id, kind, error = %e, "Failed to send email");
            }
        });
    }

    /// Waits for every dispatched email to finish, then accepts new ones.
    pub async fn drain_outbox(&self) {
        self.outbox.close();
        self.outbox.wait().await;
        self.outbox.reopen();
    }

    /// Creates the account and schedules the eviction of any stale profile
    /// cached under its id. Email and phone must be unused.
    pub async fn create_account(&self, account: NewAccount) -> Result<User, ServiceError> {
        let email = normalize_email(&account.email);
        if self
            .users
            .find_by(&UserLookup::Email(email.clone()))
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict("Email already registered".to_string()));
        }
        if let Some(phone) = &account.phone {
            if self
                .users
                .find_by(&UserLookup::Phone(phone.clone()))
                .await?
                .is_some()
            {
                return Err(ServiceError::Conflict("Phone already registered".to_string()));
            }
        }

        let password_hash = hash_password(&account.password)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Password hashing error: {}", e)))?;

        let user = User::new(account.name, email, account.phone, account.role);
        self.users.create(&user, &password_hash).await?;
        enqueue_invalidation(self.queue.as_ref(), user_cache_key(&user.id)).await;

        tracing::info!(user_id = %user.id, role = %user.role, "Account created");
        Ok(user)
    }

    /// Issues a fresh email-verification token and dispatches the link.
    pub async fn send_verification_email(&self, user: &User) -> Result<(), ServiceError> {
        let token = self
            .verification
            .issue(TokenPurpose::EmailVerification, &user.id)
            .await?;
        let (subject, body) = verification_email(&self.policy.public_base_url, &token);

        self.dispatch_email(&user.id, "email_verification", user.email.clone(), subject, body);
        Ok(())
    }

    async fn issue_session(&self, user: &User) -> Result<TokenResponse, ServiceError> {
        let access_token = self.jwt.issue_access_token(&user.id)?;
        let refresh_token = self.refresh.issue(&user.id).await?;

        Ok(TokenResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
        })
    }

    pub async fn register(
        &self,
        name: Option<String>,
        email: String,
        password: Password,
        phone: Option<String>,
    ) -> Result<AuthSession, ServiceError> {
        let user = self
            .create_account(NewAccount {
                name,
                email,
                password,
                phone,
                role: Role::User,
            })
            .await
            .inspect_err(|_| record_auth_event("register", "failure"))?;

        let tokens = self.issue_session(&user).await?;

        if let Err(e) = self.send_verification_email(&user).await {
            tracing::warn!(user_id = %user.id, error = %e, "Could not issue verification token at registration");
        }

        record_auth_event("register", "success");
        Ok(AuthSession { user, tokens })
    }

    pub async fn login(&self, email: &str, password: &Password) -> Result<AuthSession, ServiceError> {
        let email = normalize_email(email);
        let Some((user, password_hash)) = self.users.find_credentials(&email).await? else {
            record_auth_event("login", "unknown_email");
            return Err(ServiceError::InvalidCredentials);
        };

        if verify_password(password, &password_hash).is_err() {
            tracing::info!(user_id = %user.id, "Login failed: wrong password");
            record_auth_event("login", "wrong_password");
            return Err(ServiceError::InvalidCredentials);
        }

        if !user.is_active {
            record_auth_event("login", "deactivated");
            return Err(ServiceError::AccountDeactivated);
        }

        if self.policy.require_verified_email && !user.email_verified {
            record_auth_event("login", "unverified");
            return Err(ServiceError::EmailNotVerified);
        }

        let tokens = self.issue_session(&user).await?;
        tracing::info!(user_id = %user.id, "User logged in");
        record_auth_event("login", "success");
        Ok(AuthSession { user, tokens })
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedSession, ServiceError> {
        let user = self
            .refresh
            .verify(refresh_token)
            .await
            .inspect_err(|_| record_auth_event("refresh", "failure"))?;

        if !user.is_active {
            record_auth_event("refresh", "deactivated");
            return Err(ServiceError::AccountDeactivated);
        }

        let access_token = self.jwt.issue_access_token(&user.id)?;

        let rotated = if self.policy.rotate_refresh_tokens {
            match self.refresh.revoke(refresh_token).await {
                Ok(()) => {}
                // Lost a race with a concurrent rotation of the same token.
                Err(ServiceError::RefreshTokenNotFound) => {
                    return Err(TokenError::ExpiredOrRevoked.into());
                }
                Err(e) => return Err(e),
            }
            Some(self.refresh.issue(&user.id).await?)
        } else {
            None
        };

        record_auth_event("refresh", "success");
        Ok(RefreshedSession {
            access_token,
            refresh_token: rotated,
            expires_in: self.jwt.access_token_expiry_seconds(),
        })
    }

    pub async fn logout(&self, user_id: &str, refresh_token: &str) -> Result<(), ServiceError> {
        self.refresh.revoke_owned(user_id, refresh_token).await?;
        tracing::info!(user_id = %user_id, "User logged out");
        record_auth_event("logout", "success");
        Ok(())
    }

    pub fn verify_token(&self, token: &str) -> Result<AccessTokenClaims, ServiceError> {
        Ok(self.jwt.verify_access_token(token.trim())?)
    }

    pub async fn verify_email(&self, token: &str) -> Result<User, ServiceError> {
        let user = self
            .verification
            .consume(Redemption::VerifyEmail, token)
            .await
            .inspect_err(|_| record_auth_event("verify_email", "failure"))?;

        enqueue_invalidation(self.queue.as_ref(), user_cache_key(&user.id)).await;
        record_auth_event("verify_email", "success");
        Ok(user)
    }

    pub async fn resend_verification(&self, user_id: &str) -> Result<(), ServiceError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        if user.email_verified {
            return Err(ServiceError::Validation(
                "Email address is already verified".to_string(),
            ));
        }

        self.send_verification_email(&user).await
    }

    /// Succeeds whether or not the address belongs to an account.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), ServiceError> {
        let email = normalize_email(email);
        let user = match self.users.find_by(&UserLookup::Email(email)).await? {
            Some(user) if user.is_active => user,
            _ => {
                tracing::debug!("Password reset requested for unknown or inactive account");
                record_auth_event("password_reset_request", "ignored");
                return Ok(());
            }
        };

        let token = self
            .verification
            .issue(TokenPurpose::PasswordReset, &user.id)
            .await?;
        let (subject, body) = password_reset_email(
            &self.policy.public_base_url,
            &token,
            self.policy.password_reset_ttl_minutes,
        );

        self.dispatch_email(&user.id, "password_reset", user.email.clone(), subject, body);

        record_auth_event("password_reset_request", "issued");
        Ok(())
    }

    pub async fn confirm_password_reset(
        &self,
        token: &str,
        new_password: Password,
    ) -> Result<(), ServiceError> {
        let user = self
            .verification
            .consume(Redemption::ResetPassword(new_password), token)
            .await
            .inspect_err(|_| record_auth_event("password_reset_confirm", "failure"))?;

        enqueue_invalidation(self.queue.as_ref(), user_cache_key(&user.id)).await;
        tracing::info!(user_id = %user.id, "Password reset completed");
        record_auth_event("password_reset_confirm", "success");
        Ok(())
    }
}
