//! Persistence seams for accounts and refresh sessions.
//!
//! `MongoDb` implements both traits in production; the in-memory stores
//! back the test suite.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::error::ServiceError;
use crate::models::{PageRequest, RefreshToken, User, UserFilter, UserLookup, UserPatch};
use crate::utils::PasswordHashString;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `ServiceError::Conflict` when the email or phone is taken.
    async fn create(&self, user: &User, password_hash: &PasswordHashString)
        -> Result<(), ServiceError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, ServiceError>;

    async fn find_by(&self, lookup: &UserLookup) -> Result<Option<User>, ServiceError>;

    /// The only read that exposes the password hash.
    async fn find_credentials(
        &self,
        email: &str,
    ) -> Result<Option<(User, PasswordHashString)>, ServiceError>;

    /// Returns the updated user, or `None` when no user has this id.
    async fn update(&self, id: &str, patch: &UserPatch) -> Result<Option<User>, ServiceError>;

    async fn delete(&self, id: &str) -> Result<bool, ServiceError>;

    /// Newest first, with the total count of matching users.
    async fn list(
        &self,
        filter: &UserFilter,
        page: PageRequest,
    ) -> Result<(Vec<User>, u64), ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(&self, token: &RefreshToken) -> Result<(), ServiceError>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, ServiceError>;

    /// `true` when a record was removed.
    async fn delete_by_hash(&self, token_hash: &str) -> Result<bool, ServiceError>;

    async fn delete_for_user(&self, user_id: &str) -> Result<u64, ServiceError>;
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, ServiceError> {
    mutex
        .lock()
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Store lock poisoned: {}", e)))
}

struct StoredUser {
    user: User,
    password_hash: PasswordHashString,
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: Mutex<HashMap<String, StoredUser>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_unique(
        users: &HashMap<String, StoredUser>,
        id: &str,
        email: &str,
        phone: Option<&str>,
    ) -> Result<(), ServiceError> {
        for stored in users.values().filter(|s| s.user.id != id) {
            if stored.user.email == email {
                return Err(ServiceError::Conflict("Email already registered".to_string()));
            }
            if phone.is_some() && stored.user.phone.as_deref() == phone {
                return Err(ServiceError::Conflict("Phone already registered".to_string()));
            }
        }
        Ok(())
    }
}

fn matches_lookup(user: &User, lookup: &UserLookup) -> bool {
    match lookup {
        UserLookup::Email(email) => &user.email == email,
        UserLookup::Phone(phone) => user.phone.as_ref() == Some(phone),
        UserLookup::EmailVerificationHash(hash) => user
            .email_verification
            .as_ref()
            .is_some_and(|d| &d.token_hash == hash),
        UserLookup::PasswordResetHash(hash) => user
            .password_reset
            .as_ref()
            .is_some_and(|d| &d.token_hash == hash),
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(
        &self,
        user: &User,
        password_hash: &PasswordHashString,
    ) -> Result<(), ServiceError> {
        let mut users = lock(&self.users)?;
        if users.contains_key(&user.id) {
            return Err(ServiceError::Conflict("User already exists".to_string()));
        }
        Self::check_unique(&users, &user.id, &user.email, user.phone.as_deref())?;
        users.insert(
            user.id.clone(),
            StoredUser {
                user: user.clone(),
                password_hash: password_hash.clone(),
            },
        );
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, ServiceError> {
        Ok(lock(&self.users)?.get(id).map(|s| s.user.clone()))
    }

    async fn find_by(&self, lookup: &UserLookup) -> Result<Option<User>, ServiceError> {
        Ok(lock(&self.users)?
            .values()
            .find(|s| matches_lookup(&s.user, lookup))
            .map(|s| s.user.clone()))
    }

    async fn find_credentials(
        &self,
        email: &str,
    ) -> Result<Option<(User, PasswordHashString)>, ServiceError> {
        Ok(lock(&self.users)?
            .values()
            .find(|s| s.user.email == email)
            .map(|s| (s.user.clone(), s.password_hash.clone())))
    }

    async fn update(&self, id: &str, patch: &UserPatch) -> Result<Option<User>, ServiceError> {
        let mut users = lock(&self.users)?;
        let Some(current) = users.get(id) else {
            return Ok(None);
        };

        let mut updated = current.user.clone();
        patch.apply_to(&mut updated, Utc::now());
        Self::check_unique(&users, id, &updated.email, updated.phone.as_deref())?;

        let Some(stored) = users.get_mut(id) else {
            return Ok(None);
        };
        stored.user = updated.clone();
        if let Some(hash) = &patch.password_hash {
            stored.password_hash = hash.clone();
        }
        Ok(Some(updated))
    }

    async fn delete(&self, id: &str) -> Result<bool, ServiceError> {
        Ok(lock(&self.users)?.remove(id).is_some())
    }

    async fn list(
        &self,
        filter: &UserFilter,
        page: PageRequest,
    ) -> Result<(Vec<User>, u64), ServiceError> {
        let users = lock(&self.users)?;
        let mut matching: Vec<User> = users
            .values()
            .filter(|s| filter.matches(&s.user))
            .map(|s| s.user.clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(usize::try_from(page.skip()).unwrap_or(usize::MAX))
            .take(page.limit as usize)
            .collect();
        Ok((items, total))
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        lock(&self.users).map(|_| ())
    }
}

#[derive(Default)]
pub struct InMemoryRefreshTokenStore {
    tokens: Mutex<HashMap<String, RefreshToken>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn insert(&self, token: &RefreshToken) -> Result<(), ServiceError> {
        let mut tokens = lock(&self.tokens)?;
        if tokens.values().any(|t| t.token_hash == token.token_hash) {
            return Err(ServiceError::Conflict("Refresh token already stored".to_string()));
        }
        tokens.insert(token.id.clone(), token.clone());
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, ServiceError> {
        Ok(lock(&self.tokens)?
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn delete_by_hash(&self, token_hash: &str) -> Result<bool, ServiceError> {
        let mut tokens = lock(&self.tokens)?;
        let before = tokens.len();
        tokens.retain(|_, t| t.token_hash != token_hash);
        Ok(tokens.len() < before)
    }

    async fn delete_for_user(&self, user_id: &str) -> Result<u64, ServiceError> {
        let mut tokens = lock(&self.tokens)?;
        let before = tokens.len();
        tokens.retain(|_, t| t.user_id != user_id);
        Ok((before - tokens.len()) as u64)
    }
}
