//! Test helper module for storefront-service integration tests.
//!
//! Builds the full router on top of in-memory stores, cache and queue so the
//! HTTP surface can be driven with `oneshot` without external services.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use storefront_service::{
    build_router,
    config::{
        AuthPolicyConfig, CacheConfig, Environment, JwtConfig, MongoConfig, QueueConfig,
        RateLimitConfig, RedisConfig, SecurityConfig, SmtpConfig, StorefrontConfig,
        SwaggerConfig, SwaggerMode,
    },
    models::Role,
    services::{
        worker::JobOutcome, InMemoryRefreshTokenStore, InMemoryUserStore, InvalidationWorker,
        MemoryCache, MemoryQueue, MockNotifier, NewAccount,
    },
    utils::Password,
    AppState,
};
use tower::util::ServiceExt;

pub const TEST_PASSWORD: &str = "password123";

pub fn test_config() -> StorefrontConfig {
    StorefrontConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "storefront-service-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        mongodb: MongoConfig {
            uri: "mongodb://localhost:27017".to_string(),
            database: "storefront_test".to_string(),
        },
        redis: RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
        },
        jwt: JwtConfig {
            access_secret: "integration-access-secret-0123456789".to_string(),
            refresh_secret: "integration-refresh-secret-0123456789".to_string(),
            access_token_expiry_minutes: 60,
            refresh_token_expiry_days: 7,
        },
        auth: AuthPolicyConfig {
            require_verified_email: false,
            rotate_refresh_tokens: false,
            public_base_url: "http://localhost:8080".to_string(),
            email_verification_ttl_hours: 24,
            password_reset_ttl_minutes: 60,
        },
        smtp: SmtpConfig {
            host: String::new(),
            port: 587,
            user: String::new(),
            password: String::new(),
            from: "no-reply@localhost".to_string(),
        },
        cache: CacheConfig {
            user_ttl_seconds: 300,
        },
        queue: QueueConfig {
            name: "taskQueue".to_string(),
            jobs_per_second: 100,
            max_attempts: 3,
            poll_timeout_seconds: 1,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        swagger: SwaggerConfig {
            enabled: SwaggerMode::Disabled,
        },
        rate_limit: RateLimitConfig {
            login_attempts: 100,
            login_window_seconds: 60,
            register_attempts: 100,
            register_window_seconds: 60,
            password_reset_attempts: 100,
            password_reset_window_seconds: 60,
            global_ip_limit: 1000,
            global_ip_window_seconds: 60,
            trust_forwarded_for: false,
            prune_interval_seconds: 60,
        },
    }
}

/// Test application wired to in-memory backends.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub users: Arc<InMemoryUserStore>,
    pub refresh_tokens: Arc<InMemoryRefreshTokenStore>,
    pub cache: Arc<MemoryCache>,
    pub queue: Arc<MemoryQueue>,
    pub notifier: Arc<MockNotifier>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::spawn_with(test_config())
    }

    pub fn spawn_with(config: StorefrontConfig) -> Self {
        let users = Arc::new(InMemoryUserStore::new());
        let refresh_tokens = Arc::new(InMemoryRefreshTokenStore::new());
        let cache = Arc::new(MemoryCache::new());
        let queue = Arc::new(MemoryQueue::new(config.queue.max_attempts));
        let notifier = Arc::new(MockNotifier::new());

        let state = AppState::new(
            config,
            users.clone(),
            refresh_tokens.clone(),
            cache.clone(),
            queue.clone(),
            notifier.clone(),
        )
        .expect("Failed to build app state");
        let router = build_router(state.clone()).expect("Failed to build router");

        Self {
            router,
            state,
            users,
            refresh_tokens,
            cache,
            queue,
            notifier,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        // Emails go out on detached tasks; settle them before asserting.
        self.state.auth_service.drain_outbox().await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> TestResponse {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, token: Option<&str>, body: Option<Value>) -> TestResponse {
        self.request(Method::PATCH, uri, token, body).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::DELETE, uri, token, None).await
    }

    /// Registers through the HTTP surface and returns the response body.
    pub async fn register(&self, email: &str) -> Value {
        let response = self
            .post(
                "/auth/register",
                None,
                serde_json::json!({
                    "name": "Test User",
                    "email": email,
                    "password": TEST_PASSWORD,
                }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body
    }

    pub async fn login(&self, email: &str, password: &str) -> TestResponse {
        self.post(
            "/auth/login",
            None,
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    /// Creates an admin directly through the service layer and logs in.
    pub async fn admin_token(&self) -> String {
        self.state
            .user_service
            .create(NewAccount {
                name: Some("Admin".to_string()),
                email: "admin@example.com".to_string(),
                password: Password::new(TEST_PASSWORD.to_string()),
                phone: None,
                role: Role::Admin,
            })
            .await
            .expect("Failed to create admin");

        let response = self.login("admin@example.com", TEST_PASSWORD).await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.body);
        access_token(&response.body)
    }

    /// Processes exactly one pending invalidation job.
    pub async fn run_worker_once(&self) -> Option<JobOutcome> {
        let worker =
            InvalidationWorker::new(self.queue.clone(), self.cache.clone(), &self.state.config.queue);
        worker.run_once().await.expect("Worker failed to poll queue")
    }
}

pub fn access_token(body: &Value) -> String {
    body["tokens"]["access_token"]
        .as_str()
        .expect("access token missing")
        .to_string()
}

pub fn refresh_token(body: &Value) -> String {
    body["tokens"]["refresh_token"]
        .as_str()
        .expect("refresh token missing")
        .to_string()
}
