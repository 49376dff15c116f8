use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::utils::token::sha256_hex;

/// Persisted refresh session. Deleting the record revokes the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Matches the `jti` claim of the signed token
    #[serde(rename = "_id")]
    pub id: String,

    pub user_id: String,

    /// SHA-256 of the signed token; lookups match on this, never on the raw value
    pub token_hash: String,

    /// Stored as a BSON date so the TTL index can reap stale sessions
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,

    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    pub fn new(id: String, user_id: String, token: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            token_hash: sha256_hex(token),
            expires_at,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
