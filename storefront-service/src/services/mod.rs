pub mod auth;
pub mod cache;
pub mod database;
pub mod error;
pub mod jwt;
pub mod metrics;
pub mod notifier;
pub mod payment;
pub mod queue;
pub mod refresh;
pub mod store;
pub mod users;
pub mod verification;
pub mod worker;

pub use auth::{AuthService, NewAccount};
pub use cache::{Cache, CacheKeyPattern, MemoryCache, RedisCache};
pub use database::MongoDb;
pub use error::{ServiceError, TokenError};
pub use jwt::{AccessTokenClaims, JwtService, TokenResponse};
pub use notifier::{LogNotifier, MockNotifier, Notifier, SmtpNotifier};
pub use payment::{
    MockPaymentGateway, PaymentGateway, PaymentRedirect, PaymentRequest, PaymentVerification,
};
pub use queue::{Job, MemoryQueue, QueueClient, RedisQueue};
pub use refresh::RefreshTokenService;
pub use store::{InMemoryRefreshTokenStore, InMemoryUserStore, RefreshTokenStore, UserStore};
pub use users::UserService;
pub use verification::VerificationTokenService;
pub use worker::InvalidationWorker;
