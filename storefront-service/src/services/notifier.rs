use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox}, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::SmtpConfig;

/// Outbound messages to account holders.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), anyhow::Error>;
}

pub fn verification_email(public_base_url: &str, token: &str) -> (String, String) {
    let link = format!(
        "{}/auth/verify-email?token={}",
        public_base_url.trim_end_matches('/'),
        token
    );
    (
        "Verify your email address".to_string(),
        format!(
            "Welcome! Confirm your email address by opening this link:\n\n{}\n\n\
             If you did not create an account, ignore this message.",
            link
        ),
    )
}

pub fn password_reset_email(public_base_url: &str, token: &str, ttl_minutes: i64) -> (String, String) {
    let link = format!(
        "{}/auth/password-reset?token={}",
        public_base_url.trim_end_matches('/'),
        token
    );
    (
        "Reset your password".to_string(),
        format!(
            "A password reset was requested for your account. Use this link within {} minutes:\n\n{}\n\n\
             If you did not request a reset, ignore this message.",
            ttl_minutes, link
        ),
    )
}

#[derive(Clone)]
pub struct SmtpNotifier {
    mailer: SmtpTransport,
    from: String,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, anyhow::Error> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| anyhow::anyhow!("Failed to create SMTP relay: {}", e))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "SMTP notifier initialized");

        Ok(Self {
            mailer,
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), anyhow::Error> {
        let email = Message::builder()
            .from(
                self.from
                    .parse::<Mailbox>()
                    .map_err(|e| anyhow::anyhow!("Invalid sender address: {}", e))?,
            )
            .to(to
                .parse::<Mailbox>()
                .map_err(|e| anyhow::anyhow!("Invalid recipient address: {}", e))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| anyhow::anyhow!("Failed to build email: {}", e))?;

        let mailer = self.mailer.clone();
        tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| anyhow::anyhow!("Email task failed: {}", e))?
            .map_err(|e| anyhow::anyhow!("SMTP send failed: {}", e))?;

        tracing::info!(to = %to, subject = %subject, "Email sent");
        Ok(())
    }
}

/// Used when no SMTP host is configured; bodies go to the debug log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), anyhow::Error> {
        tracing::info!(to = %to, subject = %subject, "Email delivery skipped: SMTP not configured");
        tracing::debug!(to = %to, body = %body, "Undelivered email body");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl SentMessage {
    /// The value of the first `token=` parameter in the body.
    pub fn token(&self) -> Option<String> {
        let start = self.body.find("token=")? + "token=".len();
        let token: String = self.body[start..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        (!token.is_empty()).then_some(token)
    }
}

/// Records messages instead of sending them.
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<SentMessage>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn last_to(&self, to: &str) -> Option<SentMessage> {
        self.sent().into_iter().rev().find(|m| m.to == to)
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), anyhow::Error> {
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock notifier mutex poisoned: {}", e))?
            .push(SentMessage {
                to: to.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
        Ok(())
    }
}
