use std::sync::Arc;

use super::auth::{normalize_email, AuthService, NewAccount};
use super::cache::{user_cache_key, Cache};
use super::error::ServiceError;
use super::queue::{enqueue_invalidation, QueueClient};
use super::refresh::RefreshTokenService;
use super::store::UserStore;
use crate::models::{PageRequest, User, UserFilter, UserPatch, UserResponse};

/// Profile reads (cached) and account management.
#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UserStore>,
    cache: Arc<dyn Cache>,
    queue: Arc<dyn QueueClient>,
    refresh: RefreshTokenService,
    auth: AuthService,
    cache_ttl_seconds: u64,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserStore>,
        cache: Arc<dyn Cache>,
        queue: Arc<dyn QueueClient>,
        refresh: RefreshTokenService,
        auth: AuthService,
        cache_ttl_seconds: u64,
    ) -> Self {
        Self {
            users,
            cache,
            queue,
            refresh,
            auth,
            cache_ttl_seconds,
        }
    }

    /// Read-through: a cache outage degrades to a store read.
    pub async fn get_profile(&self, user_id: &str) -> Result<UserResponse, ServiceError> {
        let key = user_cache_key(user_id);

        match self.cache.get(&key).await {
            Ok(Some(cached)) => match serde_json::from_str::<UserResponse>(&cached) {
                Ok(profile) => {
                    metrics::counter!("user_profile_cache_total", "result" => "hit").increment(1);
                    return Ok(profile);
                }
                Err(e) => tracing::warn!(cache_key = %key, error = %e, "Discarding unreadable cache entry"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(cache_key = %key, error = %e, "Cache read failed"),
        }
        metrics::counter!("user_profile_cache_total", "result" => "miss").increment(1);

        let profile = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?
            .to_response();

        match serde_json::to_string(&profile) {
            Ok(json) => {
                if let Err(e) = self
                    .cache
                    .set_with_ttl(&key, &json, self.cache_ttl_seconds)
                    .await
                {
                    tracing::warn!(cache_key = %key, error = %e, "Cache write failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize profile for cache"),
        }

        Ok(profile)
    }

    pub async fn list(
        &self,
        filter: &UserFilter,
        page: PageRequest,
    ) -> Result<(Vec<UserResponse>, u64), ServiceError> {
        let (users, total) = self.users.list(filter, page).await?;
        Ok((users.iter().map(User::to_response).collect(), total))
    }

    pub async fn create(&self, account: NewAccount) -> Result<UserResponse, ServiceError> {
        let user = self.auth.create_account(account).await?;
        if let Err(e) = self.auth.send_verification_email(&user).await {
            tracing::warn!(user_id = %user.id, error = %e, "Could not issue verification token");
        }
        Ok(user.to_response())
    }

    /// Applies a profile or admin patch. Changing the email address resets
    /// verification; deactivating ends every session.
    pub async fn update(&self, user_id: &str, mut patch: UserPatch) -> Result<UserResponse, ServiceError> {
        if patch.password_hash.is_some() {
            return Err(ServiceError::Validation(
                "Passwords cannot be changed through a profile update".to_string(),
            ));
        }

        let current = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        patch.email = patch
            .email
            .map(|email| normalize_email(&email))
            .filter(|email| *email != current.email);
        let email_changed = patch.email.is_some();
        if email_changed {
            patch.email_verified = Some(false);
            patch.email_verification = Some(None);
        }

        if patch.is_empty() {
            return Ok(current.to_response());
        }

        let updated = self
            .users
            .update(user_id, &patch)
            .await?
            .ok_or(ServiceError::UserNotFound)?;
        enqueue_invalidation(self.queue.as_ref(), user_cache_key(user_id)).await;

        if current.is_active && !updated.is_active {
            self.refresh.revoke_all(user_id).await?;
            tracing::info!(user_id = %user_id, "Account deactivated");
        }

        if email_changed {
            if let Err(e) = self.auth.send_verification_email(&updated).await {
                tracing::warn!(user_id = %user_id, error = %e, "Could not issue verification token");
            }
        }

        tracing::info!(user_id = %user_id, "User updated");
        Ok(updated.to_response())
    }

    pub async fn toggle_active(&self, user_id: &str) -> Result<UserResponse, ServiceError> {
        let current = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        self.update(
            user_id,
            UserPatch {
                is_active: Some(!current.is_active),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete(&self, user_id: &str) -> Result<(), ServiceError> {
        if !self.users.delete(user_id).await? {
            return Err(ServiceError::UserNotFound);
        }
        self.refresh.revoke_all(user_id).await?;
        enqueue_invalidation(self.queue.as_ref(), user_cache_key(user_id)).await;

        tracing::info!(user_id = %user_id, "User deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::models::Role;
    use crate::services::cache::MemoryCache;
    use crate::services::jwt::JwtService;
    use crate::services::notifier::MockNotifier;
    use crate::services::queue::MemoryQueue;
    use crate::services::store::{InMemoryRefreshTokenStore, InMemoryUserStore};
    use crate::services::verification::VerificationTokenService;
    use crate::utils::Password;
    use chrono::Duration;

    struct Fixture {
        service: UserService,
        auth: AuthService,
        refresh: RefreshTokenService,
        cache: Arc<MemoryCache>,
        queue: Arc<MemoryQueue>,
        notifier: Arc<MockNotifier>,
    }

    fn fixture() -> Fixture {
        let config = test_config();
        let users = Arc::new(InMemoryUserStore::new());
        let tokens = Arc::new(InMemoryRefreshTokenStore::new());
        let cache = Arc::new(MemoryCache::new());
        let queue = Arc::new(MemoryQueue::new(3));
        let notifier = Arc::new(MockNotifier::new());
        let jwt = JwtService::new(&config.jwt).unwrap();
        let refresh = RefreshTokenService::new(jwt.clone(), tokens, users.clone());
        let verification = VerificationTokenService::new(
            users.clone(),
            refresh.clone(),
            Duration::hours(24),
            Duration::minutes(60),
        );
        let auth = AuthService::new(
            users.clone(),
            jwt,
            refresh.clone(),
            verification,
            notifier.clone(),
            queue.clone(),
            config.auth,
        );

        Fixture {
            service: UserService::new(
                users,
                cache.clone(),
                queue.clone(),
                refresh.clone(),
                auth.clone(),
                300,
            ),
            auth,
            refresh,
            cache,
            queue,
            notifier,
        }
    }

    async fn create(fx: &Fixture, email: &str, role: Role) -> UserResponse {
        fx.service
            .create(NewAccount {
                name: None,
                email: email.into(),
                password: Password::new("password-123".into()),
                phone: None,
                role,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn profile_is_cached_until_invalidated() {
        let fx = fixture();
        let user = create(&fx, "a@example.com", Role::User).await;

        fx.service.get_profile(&user.id).await.unwrap();
        assert!(fx.cache.contains(&format!("user:{}", user.id)));
    }

    #[tokio::test]
    async fn cached_profile_is_served_without_store() {
        let fx = fixture();
        let user = create(&fx, "a@example.com", Role::User).await;
        let mut stale = user.clone();
        stale.name = Some("From cache".into());
        fx.cache
            .set_with_ttl(
                &format!("user:{}", user.id),
                &serde_json::to_string(&stale).unwrap(),
                60,
            )
            .await
            .unwrap();

        let profile = fx.service.get_profile(&user.id).await.unwrap();
        assert_eq!(profile.name.as_deref(), Some("From cache"));
    }

    #[tokio::test]
    async fn every_mutation_enqueues_invalidation() {
        let fx = fixture();
        let user = create(&fx, "a@example.com", Role::User).await;
        let before = fx.queue.pending_len().await.unwrap();

        fx.service
            .update(
                &user.id,
                UserPatch {
                    name: Some("Renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        fx.service.toggle_active(&user.id).await.unwrap();
        fx.service.delete(&user.id).await.unwrap();

        assert_eq!(fx.queue.pending_len().await.unwrap(), before + 3);
    }

    #[tokio::test]
    async fn email_change_resets_verification() {
        let fx = fixture();
        let user = create(&fx, "a@example.com", Role::User).await;

        let updated = fx
            .service
            .update(
                &user.id,
                UserPatch {
                    email: Some("New@Example.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.email, "new@example.com");
        assert!(!updated.email_verified);
        fx.auth.drain_outbox().await;
        assert!(fx.notifier.last_to("new@example.com").is_some());
    }

    #[tokio::test]
    async fn unchanged_email_is_a_noop() {
        let fx = fixture();
        let user = create(&fx, "a@example.com", Role::User).await;
        let before = fx.queue.pending_len().await.unwrap();

        fx.service
            .update(
                &user.id,
                UserPatch {
                    email: Some("A@example.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(fx.queue.pending_len().await.unwrap(), before);
    }

    #[tokio::test]
    async fn deactivation_revokes_sessions() {
        let fx = fixture();
        let user = create(&fx, "a@example.com", Role::User).await;
        let session = fx.refresh.issue(&user.id).await.unwrap();

        let toggled = fx.service.toggle_active(&user.id).await.unwrap();
        assert!(!toggled.is_active);
        assert!(fx.refresh.verify(&session).await.is_err());

        let reactivated = fx.service.toggle_active(&user.id).await.unwrap();
        assert!(reactivated.is_active);
    }

    #[tokio::test]
    async fn list_filters_by_role() {
        let fx = fixture();
        create(&fx, "a@example.com", Role::User).await;
        create(&fx, "b@example.com", Role::User).await;
        create(&fx, "admin@example.com", Role::Admin).await;

        let (admins, total) = fx
            .service
            .list(
                &UserFilter {
                    role: Some(Role::Admin),
                    is_active: None,
                },
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(admins[0].email, "admin@example.com");
    }

    #[tokio::test]
    async fn missing_users_are_not_found() {
        let fx = fixture();
        assert!(matches!(
            fx.service.get_profile("missing").await,
            Err(ServiceError::UserNotFound)
        ));
        assert!(matches!(
            fx.service.delete("missing").await,
            Err(ServiceError::UserNotFound)
        ));
        assert!(matches!(
            fx.service.toggle_active("missing").await,
            Err(ServiceError::UserNotFound)
        ));
    }
}
