//! Payment gateway contract.
//!
//! Checkout hands the shopper to the gateway with `request_payment` and
//! settles the order with `verify_payment` once the gateway calls back with
//! the authority it issued. Gateway wire protocols live behind the trait.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::error::ServiceError;

/// A charge to start. `amount` is in the smallest currency unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub amount: u64,
    pub callback_url: String,
    pub description: String,
}

impl PaymentRequest {
    pub fn new(
        amount: u64,
        callback_url: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        let callback_url = callback_url.into();
        if amount == 0 {
            return Err(ServiceError::Validation(
                "Payment amount must be positive".to_string(),
            ));
        }
        if !(callback_url.starts_with("https://") || callback_url.starts_with("http://")) {
            return Err(ServiceError::Validation(
                "Callback URL must be an http(s) URL".to_string(),
            ));
        }

        Ok(Self {
            amount,
            callback_url,
            description: description.into(),
        })
    }
}

/// Where to send the shopper, and the handle to verify the payment by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRedirect {
    pub authority: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentVerification {
    pub ok: bool,
    /// Gateway receipt, present when `ok`.
    pub reference_id: Option<String>,
}

impl PaymentVerification {
    pub fn settled(reference_id: impl Into<String>) -> Self {
        Self {
            ok: true,
            reference_id: Some(reference_id.into()),
        }
    }

    pub fn declined() -> Self {
        Self {
            ok: false,
            reference_id: None,
        }
    }
}

/// External payment gateway.
///
/// A gateway that cannot be reached or answers with an error status returns
/// `ServiceError::Upstream`. A payment the gateway refuses to confirm is not
/// an error: it verifies with `ok == false`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn request_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentRedirect, ServiceError>;

    async fn verify_payment(
        &self,
        authority: &str,
        amount: u64,
    ) -> Result<PaymentVerification, ServiceError>;
}

#[derive(Default)]
struct MockLedger {
    next_id: u64,
    pending: HashMap<String, u64>,
    settled: HashMap<String, String>,
    unavailable: bool,
}

/// In-memory gateway that settles any payment verified with its original
/// amount.
#[derive(Default)]
pub struct MockPaymentGateway {
    ledger: Mutex<MockLedger>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following call fail as if the gateway were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut ledger) = self.ledger.lock() {
            ledger.unavailable = unavailable;
        }
    }

    fn ledger(&self) -> Result<std::sync::MutexGuard<'_, MockLedger>, ServiceError> {
        let ledger = self.ledger.lock().map_err(|e| {
            ServiceError::Internal(anyhow::anyhow!("Mock gateway mutex poisoned: {}", e))
        })?;
        if ledger.unavailable {
            return Err(ServiceError::Upstream(
                "Payment gateway is unavailable".to_string(),
            ));
        }
        Ok(ledger)
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn request_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentRedirect, ServiceError> {
        let mut ledger = self.ledger()?;
        ledger.next_id += 1;
        let authority = format!("A{:035}", ledger.next_id);
        ledger.pending.insert(authority.clone(), request.amount);

        tracing::debug!(authority = %authority, amount = request.amount, "Mock payment requested");
        Ok(PaymentRedirect {
            redirect_url: format!("https://gateway.test/pay/{}", authority),
            authority,
        })
    }

    async fn verify_payment(
        &self,
        authority: &str,
        amount: u64,
    ) -> Result<PaymentVerification, ServiceError> {
        let mut ledger = self.ledger()?;

        if let Some(reference_id) = ledger.settled.get(authority) {
            return Ok(PaymentVerification::settled(reference_id.clone()));
        }

        let expected = ledger.pending.get(authority).copied();
        match expected {
            Some(expected) if expected == amount => {
                ledger.pending.remove(authority);
                let reference_id = format!("REF-{}", ledger.settled.len() + 1);
                ledger
                    .settled
                    .insert(authority.to_string(), reference_id.clone());
                Ok(PaymentVerification::settled(reference_id))
            }
            _ => Ok(PaymentVerification::declined()),
        }
    }
}
