use super::alert::Alert;
use super::endpoint::Endpoint;
use super::grant::{Grant, GrantDraft};
use super::payment::{Payment, PaymentDraft};
use super::{GrantId, PaymentId, PrincipalId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn create_grant(&self, draft: GrantDraft) -> Result<Grant>;
    async fn get_grant(&self, id: GrantId) -> Result<Option<Grant>>;
    /// Returns false if the grant was already inactive.
    async fn deactivate_grant(&self, id: GrantId) -> Result<bool>;
    /// Deactivates every active grant of `principal`, returning the ones changed.
    async fn deactivate_all_grants_for_principal(&self, principal: PrincipalId)
    -> Result<Vec<Grant>>;
    async fn list_expired_grants(&self, now: DateTime<Utc>) -> Result<Vec<Grant>>;
    async fn list_active_grants(&self, principal: PrincipalId) -> Result<Vec<Grant>>;
    async fn update_traffic(&self, id: GrantId, used_bytes: u64) -> Result<()>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn create_payment(&self, draft: PaymentDraft) -> Result<Payment>;
    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>>;
    async fn find_payment_by_label(&self, label: &str) -> Result<Option<Payment>>;
    /// pending -> completed, `InvalidTransition` otherwise.
    async fn complete_payment(&self, id: PaymentId) -> Result<Payment>;
    /// Expires pending payments older than the payment TTL; returns how many changed.
    async fn expire_stale_payments(&self, now: DateTime<Utc>) -> Result<usize>;
    async fn list_pending_payments(&self) -> Result<Vec<Payment>>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn record_alert(&self, alert: Alert) -> Result<()>;
    async fn list_alerts(&self) -> Result<Vec<Alert>>;
}

/// The full persistence surface used by the engine.
#[async_trait]
pub trait LifecycleStore: GrantStore + PaymentStore + AlertStore {
    /// Atomically checks the payment is pending, inserts the grant and
    /// completes the payment.
    async fn activate(&self, payment_id: PaymentId, draft: GrantDraft) -> Result<Grant>;
}

pub type LifecycleStoreRef = Arc<dyn LifecycleStore>;

/// Client definition sent to a panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClient {
    pub id: Uuid,
    pub email: String,
    pub device_limit: u32,
    pub traffic_quota: u64,
    /// 0 means never expires.
    pub expiry_epoch_ms: i64,
    pub principal: PrincipalId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub uploaded: u64,
    pub downloaded: u64,
    pub total: u64,
}

impl Usage {
    pub fn new(uploaded: u64, downloaded: u64) -> Self {
        Self {
            uploaded,
            downloaded,
            total: uploaded.saturating_add(downloaded),
        }
    }
}

/// Typed operations against the configured access-control panels.
#[async_trait]
pub trait PanelApi: Send + Sync {
    fn endpoints(&self) -> &[Endpoint];

    fn endpoint(&self, code: &str) -> Result<&Endpoint>;

    async fn add_client(&self, endpoint: &Endpoint, client: &NewClient) -> Result<()>;

    async fn remove_client(&self, endpoint: &Endpoint, client_id: Uuid) -> Result<()>;

    /// Zero usage when the panel has no record.
    async fn client_usage(&self, endpoint: &Endpoint, email: &str) -> Result<Usage>;

    fn connection_descriptor(
        &self,
        endpoint: &Endpoint,
        client_id: Uuid,
        label: &str,
    ) -> Result<String>;

    /// Never fails; any problem means "down".
    async fn health_check(&self, endpoint: &Endpoint) -> bool;

    async fn health_check_all(&self) -> BTreeMap<String, bool>;
}

pub type PanelApiRef = Arc<dyn PanelApi>;

/// The external ledger payments are confirmed against.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// True once the ledger shows a successful deposit for `label`.
    async fn is_paid(&self, label: &str) -> Result<bool>;

    /// Checkout URL handed to the payer out-of-band.
    fn payment_url(&self, payment: &Payment) -> String;
}

pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;

/// Messaging collaborator. Delivery is best-effort and failures are swallowed.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_principal(&self, principal: PrincipalId, message: &str);
    async fn notify_operator(&self, message: &str);
}

pub type NotifierRef = Arc<dyn Notifier>;
