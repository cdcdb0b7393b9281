use super::provisioning::Provisioner;
use crate::domain::alert::Alert;
use crate::domain::ports::{LifecycleStoreRef, NotifierRef, PanelApiRef};
use crate::error::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// The periodic maintenance passes over the lifecycle store.
pub struct Maintenance {
    store: LifecycleStoreRef,
    panel: PanelApiRef,
    notifier: NotifierRef,
    provisioner: Arc<Provisioner>,
}

impl Maintenance {
    pub fn new(
        store: LifecycleStoreRef,
        panel: PanelApiRef,
        notifier: NotifierRef,
        provisioner: Arc<Provisioner>,
    ) -> Self {
        Self {
            store,
            panel,
            notifier,
            provisioner,
        }
    }

    /// Deactivates every grant past its expiry. Returns how many were deactivated.
    pub async fn expire_grants(&self) -> Result<usize> {
        let expired = self.store.list_expired_grants(Utc::now()).await?;
        let mut deactivated = 0;
        for grant in expired {
            match self.provisioner.deactivate(&grant).await {
                Ok(true) => {
                    deactivated += 1;
                    self.notifier
                        .notify_principal(
                            grant.principal,
                            &format!(
                                "Your subscription on {} has expired. Renew it to keep access.",
                                grant.endpoint
                            ),
                        )
                        .await;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(grant_id = grant.id, error = %err, "failed to deactivate expired grant");
                }
            }
        }
        if deactivated > 0 {
            info!(count = deactivated, "expired grants deactivated");
        }
        Ok(deactivated)
    }

    /// Probes every endpoint and raises an alert for each one that is down.
    /// Returns the codes of the endpoints found down.
    pub async fn check_endpoints(&self) -> Result<Vec<String>> {
        let health = self.panel.health_check_all().await;
        let down: Vec<String> = health
            .into_iter()
            .filter(|(_, up)| !up)
            .map(|(code, _)| code)
            .collect();

        for code in &down {
            let alert = Alert::endpoint_down(code, Utc::now());
            if let Err(err) = self.store.record_alert(alert.clone()).await {
                warn!(endpoint = %code, error = %err, "failed to record alert");
            }
            self.notifier.notify_operator(&alert.message).await;
        }
        Ok(down)
    }

    /// Expires pending payments that outlived the payment TTL.
    pub async fn expire_payments(&self) -> Result<usize> {
        let expired = self.store.expire_stale_payments(Utc::now()).await?;
        if expired > 0 {
            info!(count = expired, "stale payments expired");
        }
        Ok(expired)
    }
}
