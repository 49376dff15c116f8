use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::models::Role;
use crate::services::{JwtService, UserStore};
use crate::AppState;

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    MissingCredential,
    InvalidCredential,
    UnknownSubject,
    AccountDeactivated,
    InsufficientPermissions,
    Internal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GateErrorResponse {
    pub error: String,
    #[schema(example = "InvalidCredential")]
    pub code: String,
}

impl GateRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            GateRejection::MissingCredential | GateRejection::InvalidCredential => {
                StatusCode::UNAUTHORIZED
            }
            GateRejection::UnknownSubject => StatusCode::NOT_FOUND,
            GateRejection::AccountDeactivated | GateRejection::InsufficientPermissions => {
                StatusCode::FORBIDDEN
            }
            GateRejection::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GateRejection::MissingCredential => "MissingCredential",
            GateRejection::InvalidCredential => "InvalidCredential",
            GateRejection::UnknownSubject => "UnknownSubject",
            GateRejection::AccountDeactivated => "AccountDeactivated",
            GateRejection::InsufficientPermissions => "InsufficientPermissions",
            GateRejection::Internal => "Internal",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            GateRejection::MissingCredential => "Missing or invalid Authorization header",
            GateRejection::InvalidCredential => "Invalid or expired token",
            GateRejection::UnknownSubject => "User not found",
            GateRejection::AccountDeactivated => "Account is deactivated",
            GateRejection::InsufficientPermissions => "Insufficient permissions",
            GateRejection::Internal => "Internal server error",
        }
    }
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(GateErrorResponse {
                error: self.message().to_string(),
                code: self.code().to_string(),
            }),
        )
            .into_response()
    }
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolves the bearer token to a live account. The user is always read from
/// the store so deactivation takes effect on the next request.
pub async fn authenticate_request(
    jwt: &JwtService,
    users: &dyn UserStore,
    headers: &HeaderMap,
) -> Result<AuthContext, GateRejection> {
    let token = extract_bearer(headers).ok_or(GateRejection::MissingCredential)?;

    let claims = jwt.verify_access_token(token).map_err(|e| {
        tracing::debug!(error = %e, "Access token rejected");
        GateRejection::InvalidCredential
    })?;

    let user = users
        .find_by_id(&claims.sub)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %claims.sub, error = %e, "Failed to load user for authentication");
            GateRejection::Internal
        })?
        .ok_or(GateRejection::UnknownSubject)?;

    if !user.is_active {
        return Err(GateRejection::AccountDeactivated);
    }

    Ok(AuthContext {
        user_id: user.id,
        role: user.role,
    })
}

pub fn check_roles(context: Option<&AuthContext>, allowed: &[Role]) -> Result<(), GateRejection> {
    let context = context.ok_or(GateRejection::MissingCredential)?;
    if allowed.contains(&context.role) {
        Ok(())
    } else {
        Err(GateRejection::InsufficientPermissions)
    }
}

/// Middleware to require authentication
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, GateRejection> {
    let context = authenticate_request(&state.jwt, state.user_store.as_ref(), req.headers())
        .await
        .inspect_err(|rejection| {
            tracing::info!(code = rejection.code(), path = %req.uri().path(), "Authentication rejected");
        })?;

    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}

#[derive(Debug, Clone)]
pub struct AllowedRoles(pub Arc<[Role]>);

impl AllowedRoles {
    pub fn new(roles: &[Role]) -> Self {
        Self(Arc::from(roles))
    }
}

/// Middleware to restrict a route to the configured roles. Runs after
/// `authenticate`.
pub async fn authorize_roles(
    State(allowed): State<AllowedRoles>,
    req: Request,
    next: Next,
) -> Result<Response, GateRejection> {
    let context = req.extensions().get::<AuthContext>();
    if let Err(rejection) = check_roles(context, &allowed.0) {
        tracing::warn!(
            user_id = ?context.map(|c| c.user_id.as_str()),
            required = ?allowed.0,
            "Role check failed"
        );
        return Err(rejection);
    }

    Ok(next.run(req).await)
}

/// Extractor to easily get the caller in handlers
pub struct AuthUser(pub AuthContext);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = GateRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let context = parts
            .extensions
            .get::<AuthContext>()
            .ok_or(GateRejection::MissingCredential)?;

        Ok(AuthUser(context.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::models::{User, UserPatch};
    use crate::services::InMemoryUserStore;
    use crate::utils::PasswordHashString;
    use axum::http::HeaderValue;

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    async fn setup(role: Role) -> (JwtService, InMemoryUserStore, User) {
        let jwt = JwtService::new(&test_config().jwt).unwrap();
        let users = InMemoryUserStore::new();
        let user = User::new(None, "gate@example.com".into(), None, role);
        users
            .create(&user, &PasswordHashString::new("$argon2id$stub".into()))
            .await
            .unwrap();
        (jwt, users, user)
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer(&bearer("abc")), Some("abc"));
        assert_eq!(extract_bearer(&HeaderMap::new()), None);

        let mut basic = HeaderMap::new();
        basic.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));
        assert_eq!(extract_bearer(&basic), None);
    }

    #[tokio::test]
    async fn each_stage_rejects_with_its_own_kind() {
        let (jwt, users, user) = setup(Role::User).await;

        assert_eq!(
            authenticate_request(&jwt, &users, &HeaderMap::new()).await,
            Err(GateRejection::MissingCredential)
        );
        assert_eq!(
            authenticate_request(&jwt, &users, &bearer("garbage")).await,
            Err(GateRejection::InvalidCredential)
        );

        let orphan = jwt.issue_access_token("no-such-user").unwrap();
        assert_eq!(
            authenticate_request(&jwt, &users, &bearer(&orphan)).await,
            Err(GateRejection::UnknownSubject)
        );

        let token = jwt.issue_access_token(&user.id).unwrap();
        assert_eq!(
            authenticate_request(&jwt, &users, &bearer(&token)).await,
            Ok(AuthContext {
                user_id: user.id.clone(),
                role: Role::User
            })
        );

        users
            .update(
                &user.id,
                &UserPatch {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            authenticate_request(&jwt, &users, &bearer(&token)).await,
            Err(GateRejection::AccountDeactivated)
        );
    }

    #[test]
    fn role_check() {
        let admin = AuthContext {
            user_id: "1".into(),
            role: Role::Admin,
        };
        let user = AuthContext {
            user_id: "2".into(),
            role: Role::User,
        };

        assert!(check_roles(Some(&admin), &[Role::Admin]).is_ok());
        assert_eq!(
            check_roles(Some(&user), &[Role::Admin]),
            Err(GateRejection::InsufficientPermissions)
        );
        assert_eq!(
            check_roles(None, &[Role::Admin]),
            Err(GateRejection::MissingCredential)
        );
    }

    #[test]
    fn rejection_statuses() {
        assert_eq!(GateRejection::UnknownSubject.status(), StatusCode::NOT_FOUND);
        assert_eq!(GateRejection::AccountDeactivated.status(), StatusCode::FORBIDDEN);
        assert_eq!(GateRejection::InvalidCredential.status(), StatusCode::UNAUTHORIZED);
    }
}
