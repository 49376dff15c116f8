pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Duration;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{ip_rate_limit_middleware, IpRateLimit},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, RequestId, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{openapi::security::SecurityScheme, Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{StorefrontConfig, SwaggerMode};
use crate::middleware::{authenticate, authorize_roles, AllowedRoles};
use crate::models::Role;
use crate::services::{
    AuthService, Cache, JwtService, Notifier, QueueClient, RefreshTokenService,
    RefreshTokenStore, UserService, UserStore, VerificationTokenService,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::registration::register,
        handlers::auth::registration::verify_email,
        handlers::auth::registration::resend_verification,
        handlers::auth::session::login,
        handlers::auth::session::refresh_token,
        handlers::auth::session::logout,
        handlers::auth::session::verify_token,
        handlers::auth::session::me,
        handlers::auth::password::request_password_reset,
        handlers::auth::password::confirm_password_reset,
        handlers::user::update_me,
        handlers::admin::list_users,
        handlers::admin::create_user,
        handlers::admin::get_user,
        handlers::admin::update_user,
        handlers::admin::toggle_user_active,
        handlers::admin::delete_user,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::auth::RegisterRequest,
            dtos::auth::AuthResponse,
            dtos::auth::LoginRequest,
            dtos::auth::RefreshTokenRequest,
            dtos::auth::RefreshResponse,
            dtos::auth::LogoutRequest,
            dtos::auth::VerifyTokenRequest,
            dtos::auth::PasswordResetRequest,
            dtos::auth::PasswordResetConfirm,
            dtos::user::CreateUserRequest,
            dtos::user::UpdateMeRequest,
            dtos::user::UpdateUserRequest,
            dtos::user::UserListResponse,
            middleware::auth::GateErrorResponse,
            services::TokenResponse,
            services::AccessTokenClaims,
            models::UserResponse,
            models::Role,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Registration, sessions and account verification"),
        (name = "Users", description = "Profile and account management"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct RateLimiters {
    pub login: IpRateLimit,
    pub register: IpRateLimit,
    pub password_reset: IpRateLimit,
    pub global_ip: IpRateLimit,
}

impl RateLimiters {
    pub fn from_config(config: &config::RateLimitConfig) -> Self {
        let trust = config.trust_forwarded_for;
        Self {
            login: IpRateLimit::new(config.login_attempts, config.login_window_seconds, trust),
            register: IpRateLimit::new(
                config.register_attempts,
                config.register_window_seconds,
                trust,
            ),
            password_reset: IpRateLimit::new(
                config.password_reset_attempts,
                config.password_reset_window_seconds,
                trust,
            ),
            global_ip: IpRateLimit::new(
                config.global_ip_limit,
                config.global_ip_window_seconds,
                trust,
            ),
        }
    }

    fn all(&self) -> [&IpRateLimit; 4] {
        [&self.login, &self.register, &self.password_reset, &self.global_ip]
    }

    pub fn prune(&self) {
        for limit in self.all() {
            limit.prune();
        }
    }

    pub fn tracked_addresses(&self) -> usize {
        self.all().iter().map(|limit| limit.tracked_addresses()).sum()
    }

    /// Periodically forgets idle client addresses until `shutdown` fires.
    pub fn spawn_pruner(
        &self,
        every: std::time::Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let limiters = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        limiters.prune();
                        tracing::debug!(
                            tracked = limiters.tracked_addresses(),
                            "Pruned rate limiter state"
                        );
                    }
                }
            }
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: StorefrontConfig,
    pub user_store: Arc<dyn UserStore>,
    pub cache: Arc<dyn Cache>,
    pub queue: Arc<dyn QueueClient>,
    pub jwt: JwtService,
    pub auth_service: AuthService,
    pub user_service: UserService,
    pub rate_limiters: RateLimiters,
}

impl AppState {
    /// Wires the services on top of the given backends.
    pub fn new(
        config: StorefrontConfig,
        user_store: Arc<dyn UserStore>,
        refresh_store: Arc<dyn RefreshTokenStore>,
        cache: Arc<dyn Cache>,
        queue: Arc<dyn QueueClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AppError> {
        let jwt = JwtService::new(&config.jwt).map_err(AppError::ConfigError)?;
        let refresh = RefreshTokenService::new(jwt.clone(), refresh_store, user_store.clone());
        let verification = VerificationTokenService::new(
            user_store.clone(),
            refresh.clone(),
            Duration::hours(config.auth.email_verification_ttl_hours),
            Duration::minutes(config.auth.password_reset_ttl_minutes),
        );
        let auth_service = AuthService::new(
            user_store.clone(),
            jwt.clone(),
            refresh.clone(),
            verification,
            notifier,
            queue.clone(),
            config.auth.clone(),
        );
        let user_service = UserService::new(
            user_store.clone(),
            cache.clone(),
            queue.clone(),
            refresh,
            auth_service.clone(),
            config.cache.user_ttl_seconds,
        );
        let rate_limiters = RateLimiters::from_config(&config.rate_limit);

        Ok(Self {
            config,
            user_store,
            cache,
            queue,
            jwt,
            auth_service,
            user_service,
            rate_limiters,
        })
    }
}

pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let login_route = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .layer(from_fn_with_state(
            state.rate_limiters.login.clone(),
            ip_rate_limit_middleware,
        ));

    let register_route = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .layer(from_fn_with_state(
            state.rate_limiters.register.clone(),
            ip_rate_limit_middleware,
        ));

    let reset_request_route = Router::new()
        .route(
            "/auth/password-reset/request",
            post(handlers::auth::request_password_reset),
        )
        .layer(from_fn_with_state(
            state.rate_limiters.password_reset.clone(),
            ip_rate_limit_middleware,
        ));

    // Role gate runs inside the authentication gate below.
    let admin_routes = Router::new()
        .route(
            "/users",
            get(handlers::admin::list_users).post(handlers::admin::create_user),
        )
        .route(
            "/users/:id",
            get(handlers::admin::get_user)
                .patch(handlers::admin::update_user)
                .delete(handlers::admin::delete_user),
        )
        .route(
            "/users/:id/toggle-active",
            patch(handlers::admin::toggle_user_active),
        )
        .layer(from_fn_with_state(
            AllowedRoles::new(&[Role::Admin]),
            authorize_roles,
        ));

    let protected_routes = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/verify-token", post(handlers::auth::verify_token))
        .route(
            "/auth/verify-email/resend",
            post(handlers::auth::resend_verification),
        )
        .route("/auth/me", get(handlers::auth::me))
        .route("/users/me", patch(handlers::user::update_me))
        .merge(admin_routes)
        .layer(from_fn_with_state(state.clone(), authenticate));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics));

    if state.config.swagger.enabled == SwaggerMode::Public {
        app =
            app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );
    }

    let allowed_origins = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", origin, e);
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    let app = app
        .route("/auth/refresh-token", post(handlers::auth::refresh_token))
        .route("/auth/verify-email", get(handlers::auth::verify_email))
        .route(
            "/auth/password-reset/confirm",
            post(handlers::auth::confirm_password_reset),
        )
        .merge(login_route)
        .merge(register_route)
        .merge(reset_request_route)
        .merge(protected_routes)
        .with_state(state.clone())
        // Global IP rate limiting
        .layer(from_fn_with_state(
            state.rate_limiters.global_ip.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .extensions()
                    .get::<RequestId>()
                    .map(|RequestId(id)| id.as_str())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static(REQUEST_ID_HEADER),
                ]),
        );

    Ok(app)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "A dependency is unavailable")
    ),
    tag = "Observability"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = match state.user_store.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::error!(error = %e, "User store health check failed");
            "down"
        }
    };
    let cache = match state.cache.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::error!(error = %e, "Cache health check failed");
            "down"
        }
    };
    let queue = match state.queue.pending_len().await {
        Ok(_) => "up",
        Err(e) => {
            tracing::error!(error = %e, "Queue health check failed");
            "down"
        }
    };

    let healthy = [store, cache, queue].iter().all(|check| *check == "up");
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "service": state.config.service_name,
            "version": state.config.service_version,
            "environment": format!("{:?}", state.config.environment),
            "checks": {
                "store": store,
                "cache": cache,
                "queue": queue,
            }
        })),
    )
}
