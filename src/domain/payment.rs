use super::{PaymentId, PrincipalId};
use crate::error::{ProvisionError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Pending payments older than this are expired by the stale-payment sweep.
pub const PAYMENT_TTL_HOURS: i64 = 24;

/// A positive payment amount.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(ProvisionError::Validation(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = ProvisionError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Expired,
    Refunded,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        self != PaymentStatus::Pending
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Refunded => "refunded",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDraft {
    pub principal: PrincipalId,
    pub tariff: String,
    pub endpoint: String,
    pub amount: Amount,
    pub currency: String,
    /// Reconciliation key against the gateway ledger.
    pub label: String,
    #[serde(default)]
    pub payload: String,
}

/// A ledger intent awaiting confirmation from the payment gateway.
///
/// Status only ever moves out of `Pending`; every other state is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub principal: PrincipalId,
    pub tariff: String,
    pub endpoint: String,
    pub amount: Amount,
    pub currency: String,
    pub status: PaymentStatus,
    pub label: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn from_draft(id: PaymentId, draft: PaymentDraft, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            principal: draft.principal,
            tariff: draft.tariff,
            endpoint: draft.endpoint,
            amount: draft.amount,
            currency: draft.currency,
            status: PaymentStatus::Pending,
            label: draft.label,
            payload: draft.payload,
            created_at,
            completed_at: None,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Pending
            && now - self.created_at > Duration::hours(PAYMENT_TTL_HOURS)
    }

    /// pending -> completed.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(PaymentStatus::Completed)?;
        self.completed_at = Some(now);
        Ok(())
    }

    /// pending -> expired.
    pub fn expire(&mut self) -> Result<()> {
        self.transition(PaymentStatus::Expired)
    }

    fn transition(&mut self, to: PaymentStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(ProvisionError::InvalidTransition {
                payment_id: self.id,
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}
