use super::{GrantId, PaymentId, PrincipalId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything needed to persist a freshly provisioned grant.
///
/// The store assigns the id and creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantDraft {
    pub principal: PrincipalId,
    pub endpoint: String,
    pub client_id: Uuid,
    pub email: String,
    pub tariff: String,
    /// `None` for permanent grants.
    pub expires_at: Option<DateTime<Utc>>,
    pub device_limit: u32,
    pub traffic_quota: u64,
    /// The payment that paid for this grant, if any.
    pub payment_id: Option<PaymentId>,
}

impl GrantDraft {
    /// Remote-visible name for a client: `{principal}_{uuid prefix}@{endpoint}`.
    pub fn client_email(principal: PrincipalId, client_id: Uuid, endpoint: &str) -> String {
        let simple = client_id.simple().to_string();
        format!("{}_{}@{}", principal, &simple[..8], endpoint)
    }

    /// Expiry as the panel expects it: epoch milliseconds, 0 for never.
    pub fn expiry_epoch_ms(&self) -> i64 {
        self.expires_at.map_or(0, |at| at.timestamp_millis())
    }
}

/// A provisioned access client mirrored on a remote panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub id: GrantId,
    pub principal: PrincipalId,
    pub endpoint: String,
    pub client_id: Uuid,
    pub email: String,
    pub tariff: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub device_limit: u32,
    /// Bytes, 0 means unlimited.
    pub traffic_quota: u64,
    pub traffic_used: u64,
    pub active: bool,
    pub payment_id: Option<PaymentId>,
    pub created_at: DateTime<Utc>,
}

impl Grant {
    pub fn from_draft(id: GrantId, draft: GrantDraft, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            principal: draft.principal,
            endpoint: draft.endpoint,
            client_id: draft.client_id,
            email: draft.email,
            tariff: draft.tariff,
            expires_at: draft.expires_at,
            device_limit: draft.device_limit,
            traffic_quota: draft.traffic_quota,
            traffic_used: 0,
            active: true,
            payment_id: draft.payment_id,
            created_at,
        }
    }

    /// Active and past its expiry. Permanent grants never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.is_some_and(|at| at <= now)
    }

    /// Deactivates the grant. Returns false if it was already inactive.
    pub fn deactivate(&mut self) -> bool {
        std::mem::replace(&mut self.active, false)
    }
}
