use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::utils::PasswordHashString;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Digest of an outstanding single-use token. The raw token is only ever
/// held by the recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationDigest {
    pub token_hash: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
}

impl VerificationDigest {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Account record as read from the store.
///
/// Carries no password material; the hash is only reachable through
/// `UserStore::find_credentials`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verification: Option<VerificationDigest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_reset: Option<VerificationDigest>,
    /// BSON dates, so listing can sort chronologically
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl User {
    pub fn new(name: Option<String>, email: String, phone: Option<String>, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            email,
            phone,
            role,
            is_active: true,
            email_verified: false,
            email_verification: None,
            password_reset: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn to_response(&self) -> UserResponse {
        UserResponse {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            role: self.role,
            is_active: self.is_active,
            email_verified: self.email_verified,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Public projection of a user. Also the cached representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    #[schema(example = "1b4e28ba-2fa1-11d2-883f-0016d3cca427")]
    pub id: String,
    #[schema(example = "Sara Ahmadi")]
    pub name: Option<String>,
    #[schema(example = "sara@example.com")]
    pub email: String,
    #[schema(example = "09123456789")]
    pub phone: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Unique-field lookups supported by the user store.
#[derive(Debug, Clone, PartialEq)]
pub enum UserLookup {
    Email(String),
    Phone(String),
    EmailVerificationHash(String),
    PasswordResetHash(String),
}

/// Partial update. `None` leaves a field untouched; for the digest slots
/// `Some(None)` clears the slot.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub email_verified: Option<bool>,
    pub email_verification: Option<Option<VerificationDigest>>,
    pub password_reset: Option<Option<VerificationDigest>>,
    pub password_hash: Option<PasswordHashString>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.role.is_none()
            && self.is_active.is_none()
            && self.email_verified.is_none()
            && self.email_verification.is_none()
            && self.password_reset.is_none()
            && self.password_hash.is_none()
    }

    /// Applies every non-password field to `user`.
    pub fn apply_to(&self, user: &mut User, now: DateTime<Utc>) {
        if let Some(name) = &self.name {
            user.name = Some(name.clone());
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(phone) = &self.phone {
            user.phone = Some(phone.clone());
        }
        if let Some(role) = self.role {
            user.role = role;
        }
        if let Some(is_active) = self.is_active {
            user.is_active = is_active;
        }
        if let Some(verified) = self.email_verified {
            user.email_verified = verified;
        }
        if let Some(slot) = &self.email_verification {
            user.email_verification = slot.clone();
        }
        if let Some(slot) = &self.password_reset {
            user.password_reset = slot.clone();
        }
        user.updated_at = now;
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        self.role.map_or(true, |role| user.role == role)
            && self.is_active.map_or(true, |active| user.is_active == active)
    }
}

/// 1-based page number and page size.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u64 = 10;
    pub const MAX_LIMIT: u64 = 100;

    pub fn new(page: Option<u64>, limit: Option<u64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
        }
    }

    /// Saturates at `i64::MAX`, the largest skip MongoDB accepts.
    pub fn skip(&self) -> u64 {
        (self.page - 1)
            .saturating_mul(self.limit)
            .min(i64::MAX as u64)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_has_no_secret_material() {
        let mut user = User::new(None, "a@example.com".into(), None, Role::User);
        user.email_verification = Some(VerificationDigest {
            token_hash: "deadbeef".into(),
            expires_at: Utc::now(),
        });

        let json = serde_json::to_value(user.to_response()).unwrap();
        let object = json.as_object().unwrap();
        assert!(!object.contains_key("password"));
        assert!(!object.contains_key("password_hash"));
        assert!(!object.contains_key("email_verification"));
        assert!(!json.to_string().contains("deadbeef"));
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        assert_eq!("ADMIN".parse::<Role>(), Ok(Role::Admin));
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn patch_clears_digest_slot() {
        let mut user = User::new(None, "a@example.com".into(), None, Role::User);
        user.password_reset = Some(VerificationDigest {
            token_hash: "x".into(),
            expires_at: Utc::now(),
        });

        let patch = UserPatch {
            password_reset: Some(None),
            ..Default::default()
        };
        patch.apply_to(&mut user, Utc::now());
        assert!(user.password_reset.is_none());
    }

    #[test]
    fn page_request_clamps_values() {
        let page = PageRequest::new(Some(0), Some(1000));
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, PageRequest::MAX_LIMIT);
        assert_eq!(PageRequest::new(Some(3), None).skip(), 20);
    }

    #[test]
    fn huge_page_saturates_skip() {
        let page = PageRequest::new(Some(u64::MAX), Some(PageRequest::MAX_LIMIT));
        assert_eq!(page.skip(), i64::MAX as u64);
    }

    #[test]
    fn filter_matches_role_and_activity() {
        let mut user = User::new(None, "a@example.com".into(), None, Role::Admin);
        user.is_active = false;

        assert!(UserFilter::default().matches(&user));
        assert!(UserFilter {
            role: Some(Role::Admin),
            is_active: Some(false)
        }
        .matches(&user));
        assert!(!UserFilter {
            role: Some(Role::User),
            is_active: None
        }
        .matches(&user));
    }
}
