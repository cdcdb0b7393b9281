use super::provisioning::Provisioner;
use crate::domain::grant::Grant;
use crate::domain::payment::{Amount, Payment, PaymentDraft, PaymentStatus};
use crate::domain::ports::{LifecycleStoreRef, PaymentGatewayRef};
use crate::domain::{PaymentId, PrincipalId};
use crate::error::{ProvisionError, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_CURRENCY: &str = "RUB";

/// Result of checking one payment against the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Activated(Grant),
    NotPaid,
    /// Another caller is activating this payment right now.
    InProgress,
    AlreadySettled(PaymentStatus),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub activated: usize,
    pub failed: usize,
}

/// A freshly opened invoice and the URL the payer should visit.
#[derive(Debug, Clone, PartialEq)]
pub struct Invoice {
    pub payment: Payment,
    pub url: String,
}

/// Removes a payment id from the in-flight set when dropped.
struct Claim<'a> {
    in_flight: &'a Mutex<HashSet<PaymentId>>,
    id: PaymentId,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.id);
        }
    }
}

/// Drives pending payments to completion by polling the gateway.
///
/// The scheduled sweep and user-triggered checks share one instance, so the
/// in-flight set serializes activation per payment across both paths.
pub struct PaymentReconciler {
    store: LifecycleStoreRef,
    gateway: PaymentGatewayRef,
    provisioner: Arc<Provisioner>,
    in_flight: Mutex<HashSet<PaymentId>>,
}

impl PaymentReconciler {
    pub fn new(
        store: LifecycleStoreRef,
        gateway: PaymentGatewayRef,
        provisioner: Arc<Provisioner>,
    ) -> Self {
        Self {
            store,
            gateway,
            provisioner,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Opens a pending payment for `tariff` on `endpoint`.
    pub async fn open_invoice(
        &self,
        principal: PrincipalId,
        tariff: &str,
        endpoint: &str,
    ) -> Result<Invoice> {
        self.provisioner.sales().ensure_open()?;
        let tariff = self.provisioner.tariffs().get(tariff)?;
        let endpoint = self.provisioner.endpoint(endpoint)?.code.clone();
        let amount = Amount::new(tariff.price)?;

        let label = format!("pay_{}", Uuid::new_v4().simple());
        let payment = self
            .store
            .create_payment(PaymentDraft {
                principal,
                tariff: tariff.id.clone(),
                endpoint,
                amount,
                currency: DEFAULT_CURRENCY.to_string(),
                label,
                payload: String::new(),
            })
            .await?;
        let url = self.gateway.payment_url(&payment);
        info!(payment_id = payment.id, principal, "invoice opened");
        Ok(Invoice { payment, url })
    }

    /// One pass over every pending payment. Failures are counted, not raised.
    pub async fn reconcile_pending(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for payment in self.store.list_pending_payments().await? {
            if payment.label.is_empty() {
                continue;
            }
            report.checked += 1;
            match self.check(payment.id, &payment.label).await {
                Ok(CheckOutcome::Activated(_)) => report.activated += 1,
                Ok(_) => {}
                Err(err) => {
                    report.failed += 1;
                    warn!(payment_id = payment.id, error = %err, "payment reconciliation failed");
                }
            }
        }
        if report.checked > 0 {
            debug!(?report, "pending payments reconciled");
        }
        Ok(report)
    }

    /// User-triggered "check now" for a single payment.
    pub async fn check_payment(&self, payment_id: PaymentId) -> Result<CheckOutcome> {
        let payment = self.load(payment_id).await?;
        if payment.status.is_terminal() {
            return Ok(CheckOutcome::AlreadySettled(payment.status));
        }
        self.check(payment.id, &payment.label).await
    }

    async fn check(&self, payment_id: PaymentId, label: &str) -> Result<CheckOutcome> {
        // An empty label would match every deposit in the ledger.
        if label.is_empty() || !self.gateway.is_paid(label).await? {
            return Ok(CheckOutcome::NotPaid);
        }
        self.check_and_activate(payment_id).await
    }

    /// Activates a payment the ledger has confirmed, at most once.
    async fn check_and_activate(&self, payment_id: PaymentId) -> Result<CheckOutcome> {
        let Some(_claim) = self.claim(payment_id) else {
            debug!(payment_id, "activation already in flight");
            return Ok(CheckOutcome::InProgress);
        };

        // Re-read under the claim; the row may have settled since it was listed.
        let payment = self.load(payment_id).await?;
        if payment.status != PaymentStatus::Pending {
            return Ok(CheckOutcome::AlreadySettled(payment.status));
        }

        let grant = self.provisioner.activate_subscription(&payment).await?;
        Ok(CheckOutcome::Activated(grant))
    }

    fn claim(&self, id: PaymentId) -> Option<Claim<'_>> {
        let mut in_flight = self.in_flight.lock().ok()?;
        if in_flight.insert(id) {
            Some(Claim {
                in_flight: &self.in_flight,
                id,
            })
        } else {
            None
        }
    }

    async fn load(&self, id: PaymentId) -> Result<Payment> {
        self.store
            .get_payment(id)
            .await?
            .ok_or_else(|| ProvisionError::not_found("payment", id))
    }
}
