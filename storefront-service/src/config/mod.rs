use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub mongodb: MongoConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub auth: AuthPolicyConfig,
    pub smtp: SmtpConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub security: SecurityConfig,
    pub swagger: SwaggerConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

/// Account policy switches.
#[derive(Debug, Clone)]
pub struct AuthPolicyConfig {
    /// Reject logins until the e-mail address has been verified.
    pub require_verified_email: bool,
    /// Replace the presented refresh token on every refresh.
    pub rotate_refresh_tokens: bool,
    /// Base URL used to build links in outgoing e-mails.
    pub public_base_url: String,
    pub email_verification_ttl_hours: i64,
    pub password_reset_ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub user_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,
    pub jobs_per_second: u32,
    pub max_attempts: u32,
    pub poll_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwaggerMode {
    Public,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
    pub password_reset_attempts: u32,
    pub password_reset_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
    /// Honour `x-forwarded-for`; only safe behind a proxy that sets it.
    pub trust_forwarded_for: bool,
    pub prune_interval_seconds: u64,
}

impl StorefrontConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = StorefrontConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("storefront-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("storefront"), is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://127.0.0.1:6379"), is_prod)?,
            },
            jwt: JwtConfig {
                access_secret: get_env("JWT_ACCESS_SECRET", None, is_prod)?,
                refresh_secret: get_env("JWT_REFRESH_SECRET", None, is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "60",
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env("JWT_REFRESH_TOKEN_EXPIRY_DAYS", "7", is_prod)?,
            },
            auth: AuthPolicyConfig {
                require_verified_email: parse_env("AUTH_REQUIRE_VERIFIED_EMAIL", "false", false)?,
                rotate_refresh_tokens: parse_env("AUTH_ROTATE_REFRESH_TOKENS", "false", false)?,
                public_base_url: get_env(
                    "PUBLIC_BASE_URL",
                    Some("http://localhost:8080"),
                    is_prod,
                )?,
                email_verification_ttl_hours: parse_env(
                    "EMAIL_VERIFICATION_TTL_HOURS",
                    "24",
                    false,
                )?,
                password_reset_ttl_minutes: parse_env("PASSWORD_RESET_TTL_MINUTES", "60", false)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some(""), false)?,
                port: parse_env("SMTP_PORT", "587", false)?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: get_env("SMTP_PASSWORD", Some(""), is_prod)?,
                from: get_env("SMTP_FROM", Some("no-reply@localhost"), is_prod)?,
            },
            cache: CacheConfig {
                user_ttl_seconds: parse_env("CACHE_USER_TTL_SECONDS", "300", false)?,
            },
            queue: QueueConfig {
                name: get_env("QUEUE_NAME", Some("taskQueue"), false)?,
                jobs_per_second: parse_env("QUEUE_JOBS_PER_SECOND", "10", false)?,
                max_attempts: parse_env("QUEUE_MAX_ATTEMPTS", "5", false)?,
                poll_timeout_seconds: parse_env("QUEUE_POLL_TIMEOUT_SECONDS", "1", false)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
            swagger: SwaggerConfig {
                enabled: get_env("ENABLE_SWAGGER", Some("public"), false)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "5", false)?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900", false)?,
                register_attempts: parse_env("RATE_LIMIT_REGISTER_ATTEMPTS", "3", false)?,
                register_window_seconds: parse_env(
                    "RATE_LIMIT_REGISTER_WINDOW_SECONDS",
                    "3600",
                    false,
                )?,
                password_reset_attempts: parse_env(
                    "RATE_LIMIT_PASSWORD_RESET_ATTEMPTS",
                    "3",
                    false,
                )?,
                password_reset_window_seconds: parse_env(
                    "RATE_LIMIT_PASSWORD_RESET_WINDOW_SECONDS",
                    "3600",
                    false,
                )?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", "100", false)?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    "60",
                    false,
                )?,
                trust_forwarded_for: parse_env("RATE_LIMIT_TRUST_FORWARDED_FOR", "false", false)?,
                prune_interval_seconds: parse_env(
                    "RATE_LIMIT_PRUNE_INTERVAL_SECONDS",
                    "60",
                    false,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Prod
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(config_error("JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(config_error("JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"));
        }

        if self.jwt.access_secret.is_empty() || self.jwt.refresh_secret.is_empty() {
            return Err(config_error("JWT secrets must not be empty"));
        }

        if self.jwt.access_secret == self.jwt.refresh_secret {
            return Err(config_error(
                "JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ",
            ));
        }

        if self.auth.email_verification_ttl_hours <= 0 || self.auth.password_reset_ttl_minutes <= 0
        {
            return Err(config_error("Verification token lifetimes must be positive"));
        }

        if self.queue.jobs_per_second == 0 {
            return Err(config_error("QUEUE_JOBS_PER_SECOND must be positive"));
        }

        if self.queue.max_attempts == 0 {
            return Err(config_error("QUEUE_MAX_ATTEMPTS must be positive"));
        }

        if self.rate_limit.prune_interval_seconds == 0 {
            return Err(config_error("RATE_LIMIT_PRUNE_INTERVAL_SECONDS must be positive"));
        }

        if self.is_production() {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error("Wildcard CORS origin not allowed in production"));
            }

            if self.jwt.access_secret.len() < 32 || self.jwt.refresh_secret.len() < 32 {
                return Err(config_error(
                    "JWT secrets must be at least 32 bytes in production",
                ));
            }

            if self.swagger.enabled == SwaggerMode::Public {
                tracing::warn!("Swagger UI is publicly accessible in production");
            }
        }

        Ok(())
    }
}

fn config_error(message: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(message.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(key, Some(default), is_prod)?;
    raw.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e))
    })
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" | "true" => Ok(SwaggerMode::Public),
            "disabled" | "false" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> StorefrontConfig {
    StorefrontConfig {
        common: core_config::Config::default(),
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
            access_secret: "test-access-secret-0123456789abcdef".to_string(),
            refresh_secret: "test-refresh-secret-0123456789abcdef".to_string(),
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
            host: "localhost".to_string(),
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
            jobs_per_second: 10,
            max_attempts: 3,
            poll_timeout_seconds: 1,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        swagger: SwaggerConfig {
            enabled: SwaggerMode::Public,
        },
        rate_limit: RateLimitConfig {
            login_attempts: 5,
            login_window_seconds: 900,
            register_attempts: 3,
            register_window_seconds: 3600,
            password_reset_attempts: 3,
            password_reset_window_seconds: 3600,
            global_ip_limit: 100,
            global_ip_window_seconds: 60,
            trust_forwarded_for: false,
            prune_interval_seconds: 60,
        },
    }
}
