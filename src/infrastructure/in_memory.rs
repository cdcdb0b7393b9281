use crate::domain::alert::Alert;
use crate::domain::grant::{Grant, GrantDraft};
use crate::domain::payment::{Payment, PaymentDraft, PaymentStatus};
use crate::domain::ports::{AlertStore, GrantStore, LifecycleStore, PaymentStore};
use crate::domain::{GrantId, PaymentId, PrincipalId};
use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    grants: BTreeMap<GrantId, Grant>,
    payments: BTreeMap<PaymentId, Payment>,
    alerts: Vec<Alert>,
    next_grant_id: GrantId,
    next_payment_id: PaymentId,
}

impl Tables {
    fn insert_grant(&mut self, draft: GrantDraft) -> Grant {
        self.next_grant_id += 1;
        let grant = Grant::from_draft(self.next_grant_id, draft, Utc::now());
        self.grants.insert(grant.id, grant.clone());
        grant
    }

    fn payment_mut(&mut self, id: PaymentId) -> Result<&mut Payment> {
        self.payments
            .get_mut(&id)
            .ok_or_else(|| ProvisionError::not_found("payment", id))
    }
}

/// A thread-safe in-memory lifecycle store.
///
/// All tables sit behind a single `RwLock`, so every operation (including
/// the multi-row activation) is atomic. Clones share the same tables.
/// Ideal for testing or deployments that can afford to lose state on restart.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GrantStore for InMemoryStore {
    async fn create_grant(&self, draft: GrantDraft) -> Result<Grant> {
        let mut tables = self.tables.write().await;
        Ok(tables.insert_grant(draft))
    }

    async fn get_grant(&self, id: GrantId) -> Result<Option<Grant>> {
        let tables = self.tables.read().await;
        Ok(tables.grants.get(&id).cloned())
    }

    async fn deactivate_grant(&self, id: GrantId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let grant = tables
            .grants
            .get_mut(&id)
            .ok_or_else(|| ProvisionError::not_found("grant", id))?;
        Ok(grant.deactivate())
    }

    async fn deactivate_all_grants_for_principal(
        &self,
        principal: PrincipalId,
    ) -> Result<Vec<Grant>> {
        let mut tables = self.tables.write().await;
        let mut affected = Vec::new();
        for grant in tables.grants.values_mut() {
            if grant.principal == principal && grant.deactivate() {
                affected.push(grant.clone());
            }
        }
        Ok(affected)
    }

    async fn list_expired_grants(&self, now: DateTime<Utc>) -> Result<Vec<Grant>> {
        let tables = self.tables.read().await;
        Ok(tables
            .grants
            .values()
            .filter(|g| g.is_expired(now))
            .cloned()
            .collect())
    }

    async fn list_active_grants(&self, principal: PrincipalId) -> Result<Vec<Grant>> {
        let tables = self.tables.read().await;
        Ok(tables
            .grants
            .values()
            .filter(|g| g.active && g.principal == principal)
            .cloned()
            .collect())
    }

    async fn update_traffic(&self, id: GrantId, used_bytes: u64) -> Result<()> {
        let mut tables = self.tables.write().await;
        let grant = tables
            .grants
            .get_mut(&id)
            .ok_or_else(|| ProvisionError::not_found("grant", id))?;
        grant.traffic_used = used_bytes;
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn create_payment(&self, draft: PaymentDraft) -> Result<Payment> {
        let mut tables = self.tables.write().await;
        tables.next_payment_id += 1;
        let payment = Payment::from_draft(tables.next_payment_id, draft, Utc::now());
        tables.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables.payments.get(&id).cloned())
    }

    async fn find_payment_by_label(&self, label: &str) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables.payments.values().find(|p| p.label == label).cloned())
    }

    async fn complete_payment(&self, id: PaymentId) -> Result<Payment> {
        let mut tables = self.tables.write().await;
        let payment = tables.payment_mut(id)?;
        payment.complete(Utc::now())?;
        Ok(payment.clone())
    }

    async fn expire_stale_payments(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let mut expired = 0;
        for payment in tables.payments.values_mut() {
            if payment.is_stale(now) {
                payment.expire()?;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn list_pending_payments(&self) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AlertStore for InMemoryStore {
    async fn record_alert(&self, alert: Alert) -> Result<()> {
        self.tables.write().await.alerts.push(alert);
        Ok(())
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>> {
        Ok(self.tables.read().await.alerts.clone())
    }
}

#[async_trait]
impl LifecycleStore for InMemoryStore {
    async fn activate(&self, payment_id: PaymentId, draft: GrantDraft) -> Result<Grant> {
        let mut tables = self.tables.write().await;
        // Completing first leaves the tables untouched if the payment is not pending.
        tables.payment_mut(payment_id)?.complete(Utc::now())?;
        Ok(tables.insert_grant(draft))
    }
}
