use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::TokenError;
use crate::config::JwtConfig;

/// HS256 signer with independent keys for access and refresh tokens, so a
/// token of one kind never verifies as the other.
#[derive(Clone)]
pub struct JwtService {
    access_encoding_key: EncodingKey,
    access_decoding_key: DecodingKey,
    refresh_encoding_key: EncodingKey,
    refresh_decoding_key: DecodingKey,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    pub jti: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub sub: String,
    /// Matches the stored session id
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
}

/// Freshly signed refresh token plus the fields needed to persist it.
#[derive(Debug, Clone)]
pub struct SignedRefreshToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    /// Access token lifetime in seconds
    #[schema(example = 3600)]
    pub expires_in: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        if config.access_secret.is_empty() || config.refresh_secret.is_empty() {
            return Err(anyhow::anyhow!("JWT secrets must not be empty"));
        }

        tracing::info!("JWT service initialized with HS256 secrets");

        Ok(Self {
            access_encoding_key: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding_key: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding_key: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding_key: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
        })
    }

    pub fn issue_access_token(&self, user_id: &str) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.access_encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        decode::<AccessTokenClaims>(token, &self.access_decoding_key, &strict_validation())
            .map(|data| data.claims)
            .map_err(classify)
    }

    pub fn issue_refresh_token(&self, user_id: &str) -> Result<SignedRefreshToken, anyhow::Error> {
        let now = Utc::now();
        let expires_at = now + Duration::days(self.refresh_token_expiry_days);
        let jti = Uuid::new_v4().to_string();

        let claims = RefreshTokenClaims {
            sub: user_id.to_string(),
            jti: jti.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.refresh_encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode refresh token: {}", e))?;

        Ok(SignedRefreshToken {
            token,
            jti,
            expires_at,
        })
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<RefreshTokenClaims, TokenError> {
        decode::<RefreshTokenClaims>(token, &self.refresh_decoding_key, &strict_validation())
            .map(|data| data.claims)
            .map_err(classify)
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }
}

fn strict_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;
    validation
}

fn classify(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::ExpiredOrRevoked,
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        _ => TokenError::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JwtConfig {
        JwtConfig {
            access_secret: "access-secret-for-unit-tests-000000".to_string(),
            refresh_secret: "refresh-secret-for-unit-tests-00000".to_string(),
            access_token_expiry_minutes: 60,
            refresh_token_expiry_days: 7,
        }
    }

    #[test]
    fn access_token_round_trips_subject() -> Result<(), anyhow::Error> {
        let jwt = JwtService::new(&config())?;
        let token = jwt.issue_access_token("user-42")?;

        let claims = jwt.verify_access_token(&token)?;
        assert_eq!(claims.sub, "user-42");
        assert_eq!(claims.exp - claims.iat, 3600);
        Ok(())
    }

    #[test]
    fn expired_access_token_is_rejected() -> Result<(), anyhow::Error> {
        let jwt = JwtService::new(&config())?;
        let past = Utc::now() - Duration::hours(2);
        let claims = AccessTokenClaims {
            sub: "user-42".to_string(),
            exp: (past + Duration::hours(1)).timestamp(),
            iat: past.timestamp(),
            jti: "j".to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &jwt.access_encoding_key)?;

        assert_eq!(
            jwt.verify_access_token(&token).unwrap_err(),
            TokenError::ExpiredOrRevoked
        );
        Ok(())
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() -> Result<(), anyhow::Error> {
        let jwt = JwtService::new(&config())?;
        let mut other = config();
        other.access_secret = "a-completely-different-access-secret".to_string();
        let forged = JwtService::new(&other)?.issue_access_token("user-42")?;

        assert_eq!(
            jwt.verify_access_token(&forged).unwrap_err(),
            TokenError::InvalidSignature
        );
        Ok(())
    }

    #[test]
    fn refresh_token_does_not_verify_as_access_token() -> Result<(), anyhow::Error> {
        let jwt = JwtService::new(&config())?;
        let refresh = jwt.issue_refresh_token("user-42")?;

        assert!(jwt.verify_access_token(&refresh.token).is_err());
        let claims = jwt.verify_refresh_token(&refresh.token)?;
        assert_eq!(claims.sub, "user-42");
        assert_eq!(claims.jti, refresh.jti);
        Ok(())
    }

    #[test]
    fn garbage_is_malformed() -> Result<(), anyhow::Error> {
        let jwt = JwtService::new(&config())?;
        assert_eq!(
            jwt.verify_access_token("not-a-jwt").unwrap_err(),
            TokenError::Malformed
        );
        Ok(())
    }

    #[test]
    fn empty_secret_is_refused() {
        let mut cfg = config();
        cfg.refresh_secret.clear();
        assert!(JwtService::new(&cfg).is_err());
    }
}
