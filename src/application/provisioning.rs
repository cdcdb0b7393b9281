use crate::domain::endpoint::Endpoint;
use crate::domain::grant::{Grant, GrantDraft};
use crate::domain::payment::Payment;
use crate::domain::ports::{LifecycleStoreRef, NewClient, NotifierRef, PanelApiRef};
use crate::domain::tariff::TariffCatalog;
use crate::domain::{GrantId, PrincipalId};
use crate::error::{ProvisionError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Whether new subscriptions may be sold and activated.
///
/// Owned by whoever administers the deployment and shared by `Arc` with the
/// activation path.
#[derive(Debug)]
pub struct SalesGate {
    open: AtomicBool,
}

impl Default for SalesGate {
    fn default() -> Self {
        Self {
            open: AtomicBool::new(true),
        }
    }
}

impl SalesGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn block(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn unblock(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ProvisionError::SalesBlocked)
        }
    }
}

/// Creates and tears down grants, keeping the panel and the store in step.
///
/// Remote side effects always happen first; the local write follows only once
/// the panel has accepted the change (activation) or regardless of the panel
/// (deactivation).
pub struct Provisioner {
    store: LifecycleStoreRef,
    panel: PanelApiRef,
    notifier: NotifierRef,
    tariffs: Arc<TariffCatalog>,
    sales: Arc<SalesGate>,
}

impl Provisioner {
    pub fn new(
        store: LifecycleStoreRef,
        panel: PanelApiRef,
        notifier: NotifierRef,
        tariffs: Arc<TariffCatalog>,
        sales: Arc<SalesGate>,
    ) -> Self {
        Self {
            store,
            panel,
            notifier,
            tariffs,
            sales,
        }
    }

    pub fn sales(&self) -> &Arc<SalesGate> {
        &self.sales
    }

    pub fn tariffs(&self) -> &TariffCatalog {
        &self.tariffs
    }

    /// Looks up a configured endpoint by code.
    pub fn endpoint(&self, code: &str) -> Result<&Endpoint> {
        self.panel.endpoint(code)
    }

    /// Provisions the grant paid for by `payment` and completes the payment.
    ///
    /// Callers must have verified the payment is still pending.
    pub async fn activate_subscription(&self, payment: &Payment) -> Result<Grant> {
        match self.try_activate(payment).await {
            Ok(grant) => Ok(grant),
            // Lost race, already rolled back and logged.
            Err(err @ ProvisionError::InvalidTransition { .. }) => Err(err),
            Err(err) => {
                error!(payment_id = payment.id, error = %err, "activation failed");
                self.notifier
                    .notify_operator(&format!(
                        "Activation of payment {} (principal {}) failed: {}",
                        payment.id, payment.principal, err
                    ))
                    .await;
                Err(err)
            }
        }
    }

    async fn try_activate(&self, payment: &Payment) -> Result<Grant> {
        self.sales.ensure_open()?;
        let tariff = self.tariffs.get(&payment.tariff)?;
        let endpoint = self.panel.endpoint(&payment.endpoint)?;

        let now = Utc::now();
        let draft = self.draft(
            payment.principal,
            &endpoint.code,
            &tariff.id,
            Some(tariff.expires_at(now)),
            tariff.device_limit,
            tariff.traffic_quota_bytes(),
        );
        let draft = GrantDraft {
            payment_id: Some(payment.id),
            ..draft
        };

        let client = new_client(&draft);
        self.panel.add_client(endpoint, &client).await?;

        let grant = match self.store.activate(payment.id, draft).await {
            Ok(grant) => grant,
            Err(err @ ProvisionError::InvalidTransition { .. }) => {
                // Settled elsewhere between our status check and the write.
                warn!(payment_id = payment.id, client_id = %client.id, "payment settled concurrently, removing client");
                if let Err(remove_err) = self.panel.remove_client(endpoint, client.id).await {
                    warn!(client_id = %client.id, error = %remove_err, "rollback removal failed");
                }
                return Err(err);
            }
            Err(err) => return Err(self.orphaned(&endpoint.code, client.id, &err)),
        };

        info!(
            payment_id = payment.id,
            grant_id = grant.id,
            endpoint = %grant.endpoint,
            "subscription activated"
        );
        self.announce(&grant, &tariff.title).await;
        Ok(grant)
    }

    /// Provisions a grant that never expires, without a payment.
    pub async fn grant_permanent(
        &self,
        principal: PrincipalId,
        endpoint_code: &str,
        label: &str,
    ) -> Result<Grant> {
        let endpoint = self.panel.endpoint(endpoint_code)?;
        let draft = self.draft(principal, &endpoint.code, "permanent", None, 0, 0);
        let grant = self.provision_unpaid(endpoint, draft, label).await?;
        info!(grant_id = grant.id, principal, "permanent grant issued");
        Ok(grant)
    }

    /// Issues a grant for a zero-price tariff such as the trial.
    pub async fn issue_free(
        &self,
        principal: PrincipalId,
        tariff_id: &str,
        endpoint_code: &str,
    ) -> Result<Grant> {
        self.sales.ensure_open()?;
        let tariff = self.tariffs.get(tariff_id)?;
        if !tariff.price.is_zero() {
            return Err(ProvisionError::Validation(format!(
                "tariff {} is not free",
                tariff.id
            )));
        }
        let endpoint = self.panel.endpoint(endpoint_code)?;
        let draft = self.draft(
            principal,
            &endpoint.code,
            &tariff.id,
            Some(tariff.expires_at(Utc::now())),
            tariff.device_limit,
            tariff.traffic_quota_bytes(),
        );
        let grant = self.provision_unpaid(endpoint, draft, &tariff.title).await?;
        info!(grant_id = grant.id, principal, tariff = %tariff.id, "free grant issued");
        Ok(grant)
    }

    async fn provision_unpaid(
        &self,
        endpoint: &Endpoint,
        draft: GrantDraft,
        label: &str,
    ) -> Result<Grant> {
        let client = new_client(&draft);
        self.panel.add_client(endpoint, &client).await?;
        let grant = self
            .store
            .create_grant(draft)
            .await
            .map_err(|err| self.orphaned(&endpoint.code, client.id, &err))?;
        self.announce(&grant, label).await;
        Ok(grant)
    }

    /// Removes the remote client (best-effort) and deactivates the grant.
    ///
    /// Returns false if the grant was already inactive locally.
    pub async fn deactivate(&self, grant: &Grant) -> Result<bool> {
        self.remove_remote(grant).await;
        self.store.deactivate_grant(grant.id).await
    }

    /// Deactivates every grant a principal holds, e.g. when they are banned.
    pub async fn revoke_principal(&self, principal: PrincipalId) -> Result<Vec<Grant>> {
        let revoked = self
            .store
            .deactivate_all_grants_for_principal(principal)
            .await?;
        for grant in &revoked {
            self.remove_remote(grant).await;
        }
        info!(principal, count = revoked.len(), "principal revoked");
        Ok(revoked)
    }

    /// Pulls consumed traffic for each active grant of `principal` into the store.
    pub async fn refresh_usage(&self, principal: PrincipalId) -> Result<Vec<Grant>> {
        let mut refreshed = Vec::new();
        for mut grant in self.store.list_active_grants(principal).await? {
            let usage = match self.panel.endpoint(&grant.endpoint) {
                Ok(endpoint) => self.panel.client_usage(endpoint, &grant.email).await,
                Err(err) => Err(err),
            };
            match usage {
                Ok(usage) => match self.store.update_traffic(grant.id, usage.total).await {
                    Ok(()) => grant.traffic_used = usage.total,
                    Err(err) => {
                        warn!(grant_id = grant.id, error = %err, "usage write failed");
                    }
                },
                Err(err) => {
                    warn!(grant_id = grant.id, error = %err, "usage refresh failed");
                }
            }
            refreshed.push(grant);
        }
        Ok(refreshed)
    }

    pub async fn grant(&self, id: GrantId) -> Result<Grant> {
        self.store
            .get_grant(id)
            .await?
            .ok_or_else(|| ProvisionError::not_found("grant", id))
    }

    fn draft(
        &self,
        principal: PrincipalId,
        endpoint: &str,
        tariff: &str,
        expires_at: Option<DateTime<Utc>>,
        device_limit: u32,
        traffic_quota: u64,
    ) -> GrantDraft {
        let client_id = Uuid::new_v4();
        GrantDraft {
            principal,
            endpoint: endpoint.to_string(),
            client_id,
            email: GrantDraft::client_email(principal, client_id, endpoint),
            tariff: tariff.to_string(),
            expires_at,
            device_limit,
            traffic_quota,
            payment_id: None,
        }
    }

    async fn announce(&self, grant: &Grant, label: &str) {
        let Ok(endpoint) = self.panel.endpoint(&grant.endpoint) else {
            return;
        };
        match self
            .panel
            .connection_descriptor(endpoint, grant.client_id, label)
        {
            Ok(uri) => {
                let until = grant
                    .expires_at
                    .map_or_else(|| "forever".to_string(), |at| at.format("%Y-%m-%d %H:%M UTC").to_string());
                self.notifier
                    .notify_principal(
                        grant.principal,
                        &format!("Your access is ready (valid until {}):\n{}", until, uri),
                    )
                    .await;
            }
            Err(err) => warn!(grant_id = grant.id, error = %err, "descriptor build failed"),
        }
        self.notifier
            .notify_operator(&format!(
                "New grant {} for principal {} on {}",
                grant.id, grant.principal, grant.endpoint
            ))
            .await;
    }

    async fn remove_remote(&self, grant: &Grant) {
        let result = match self.panel.endpoint(&grant.endpoint) {
            Ok(endpoint) => self.panel.remove_client(endpoint, grant.client_id).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(
                grant_id = grant.id,
                client_id = %grant.client_id,
                error = %err,
                "remote removal failed, deactivating locally anyway"
            );
        }
    }

    /// The remote client exists but no local row does. Logged for audit, not healed.
    fn orphaned(&self, endpoint: &str, client_id: Uuid, err: &ProvisionError) -> ProvisionError {
        error!(endpoint, %client_id, error = %err, "remote client provisioned but grant not stored");
        ProvisionError::Inconsistency(format!(
            "client {} provisioned on {} but not stored: {}",
            client_id, endpoint, err
        ))
    }
}

fn new_client(draft: &GrantDraft) -> NewClient {
    NewClient {
        id: draft.client_id,
        email: draft.email.clone(),
        device_limit: draft.device_limit,
        traffic_quota: draft.traffic_quota,
        expiry_epoch_ms: draft.expiry_epoch_ms(),
        principal: draft.principal,
    }
}
