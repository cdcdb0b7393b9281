#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use panelsync::application::engine::Engine;
use panelsync::domain::alert::Alert;
use panelsync::domain::endpoint::{ConnectionParams, DEFAULT_FINGERPRINT, DEFAULT_FLOW, Endpoint};
use panelsync::domain::grant::{Grant, GrantDraft};
use panelsync::domain::payment::{Payment, PaymentDraft};
use panelsync::domain::ports::{
    AlertStore, GrantStore, LifecycleStore, NewClient, Notifier, PanelApi, PaymentGateway,
    PaymentStore, Usage,
};
use panelsync::domain::tariff::TariffCatalog;
use panelsync::domain::{GrantId, PaymentId, PrincipalId};
use panelsync::error::{ProvisionError, Result};
use panelsync::infrastructure::in_memory::InMemoryStore;
use panelsync::infrastructure::session::RetryPolicy;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

pub fn endpoint(code: &str, base_url: &str) -> Endpoint {
    Endpoint {
        code: code.to_string(),
        base_url: base_url.to_string(),
        username: "admin".to_string(),
        password: "secret".to_string(),
        inbound_id: 1,
        connection: ConnectionParams {
            address: format!("{}.example.net", code),
            port: 443,
            public_key: "pbk".to_string(),
            short_id: "ab12".to_string(),
            server_name: "www.microsoft.com".to_string(),
            fingerprint: DEFAULT_FINGERPRINT.to_string(),
            flow: DEFAULT_FLOW.to_string(),
        },
    }
}

/// Millisecond backoff so retry tests finish quickly.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        base_backoff: Duration::from_millis(10),
        attempt_timeout: Duration::from_millis(300),
    }
}

/// A panel that records calls instead of making them.
#[derive(Default)]
pub struct FakePanel {
    endpoints: Vec<Endpoint>,
    pub added: Mutex<Vec<NewClient>>,
    pub removed: Mutex<Vec<Uuid>>,
    pub usage: Mutex<HashMap<String, Usage>>,
    pub down: Mutex<HashSet<String>>,
    pub fail_add: AtomicBool,
    pub fail_remove: AtomicBool,
    pub add_delay: Mutex<Option<Duration>>,
}

impl FakePanel {
    pub fn new(codes: &[&str]) -> Self {
        Self {
            endpoints: codes
                .iter()
                .map(|code| endpoint(code, "http://127.0.0.1:1"))
                .collect(),
            ..Default::default()
        }
    }

    pub fn added_count(&self) -> usize {
        self.added.lock().unwrap().len()
    }

    pub fn removed(&self) -> Vec<Uuid> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PanelApi for FakePanel {
    fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    fn endpoint(&self, code: &str) -> Result<&Endpoint> {
        self.endpoints
            .iter()
            .find(|e| e.code == code)
            .ok_or_else(|| ProvisionError::not_found("endpoint", code))
    }

    async fn add_client(&self, _endpoint: &Endpoint, client: &NewClient) -> Result<()> {
        let delay = *self.add_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(ProvisionError::RemoteRejection("inbound full".to_string()));
        }
        self.added.lock().unwrap().push(client.clone());
        Ok(())
    }

    async fn remove_client(&self, _endpoint: &Endpoint, client_id: Uuid) -> Result<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(ProvisionError::transport("fake-panel", "connection reset"));
        }
        self.removed.lock().unwrap().push(client_id);
        Ok(())
    }

    async fn client_usage(&self, _endpoint: &Endpoint, email: &str) -> Result<Usage> {
        Ok(self
            .usage
            .lock()
            .unwrap()
            .get(email)
            .copied()
            .unwrap_or_default())
    }

    fn connection_descriptor(
        &self,
        endpoint: &Endpoint,
        client_id: Uuid,
        label: &str,
    ) -> Result<String> {
        panelsync::interfaces::descriptor::build(endpoint, client_id, label)
    }

    async fn health_check(&self, endpoint: &Endpoint) -> bool {
        !self.down.lock().unwrap().contains(&endpoint.code)
    }

    async fn health_check_all(&self) -> BTreeMap<String, bool> {
        let mut health = BTreeMap::new();
        for endpoint in &self.endpoints {
            health.insert(endpoint.code.clone(), self.health_check(endpoint).await);
        }
        health
    }
}

/// A ledger whose paid labels are set by the test.
#[derive(Default)]
pub struct ScriptedGateway {
    paid: Mutex<HashSet<String>>,
    pub checks: AtomicUsize,
}

impl ScriptedGateway {
    pub fn mark_paid(&self, label: &str) {
        self.paid.lock().unwrap().insert(label.to_string());
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn is_paid(&self, label: &str) -> Result<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.paid.lock().unwrap().contains(label))
    }

    fn payment_url(&self, payment: &Payment) -> String {
        format!("https://pay.test/checkout?label={}", payment.label)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub principal: Mutex<Vec<(PrincipalId, String)>>,
    pub operator: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn to_principal(&self, principal: PrincipalId) -> Vec<String> {
        self.principal
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == principal)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn operator_messages(&self) -> Vec<String> {
        self.operator.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_principal(&self, principal: PrincipalId, message: &str) {
        self.principal
            .lock()
            .unwrap()
            .push((principal, message.to_string()));
    }

    async fn notify_operator(&self, message: &str) {
        self.operator.lock().unwrap().push(message.to_string());
    }
}

/// In-memory store whose traffic writes fail for chosen grants.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub fail_traffic: Mutex<HashSet<GrantId>>,
}

#[async_trait]
impl GrantStore for FlakyStore {
    async fn create_grant(&self, draft: GrantDraft) -> Result<Grant> {
        self.inner.create_grant(draft).await
    }

    async fn get_grant(&self, id: GrantId) -> Result<Option<Grant>> {
        self.inner.get_grant(id).await
    }

    async fn deactivate_grant(&self, id: GrantId) -> Result<bool> {
        self.inner.deactivate_grant(id).await
    }

    async fn deactivate_all_grants_for_principal(
        &self,
        principal: PrincipalId,
    ) -> Result<Vec<Grant>> {
        self.inner.deactivate_all_grants_for_principal(principal).await
    }

    async fn list_expired_grants(&self, now: DateTime<Utc>) -> Result<Vec<Grant>> {
        self.inner.list_expired_grants(now).await
    }

    async fn list_active_grants(&self, principal: PrincipalId) -> Result<Vec<Grant>> {
        self.inner.list_active_grants(principal).await
    }

    async fn update_traffic(&self, id: GrantId, used_bytes: u64) -> Result<()> {
        let failing = self.fail_traffic.lock().unwrap().contains(&id);
        if failing {
            return Err(ProvisionError::Storage(Box::new(std::io::Error::other(
                "disk full",
            ))));
        }
        self.inner.update_traffic(id, used_bytes).await
    }
}

#[async_trait]
impl PaymentStore for FlakyStore {
    async fn create_payment(&self, draft: PaymentDraft) -> Result<Payment> {
        self.inner.create_payment(draft).await
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.inner.get_payment(id).await
    }

    async fn find_payment_by_label(&self, label: &str) -> Result<Option<Payment>> {
        self.inner.find_payment_by_label(label).await
    }

    async fn complete_payment(&self, id: PaymentId) -> Result<Payment> {
        self.inner.complete_payment(id).await
    }

    async fn expire_stale_payments(&self, now: DateTime<Utc>) -> Result<usize> {
        self.inner.expire_stale_payments(now).await
    }

    async fn list_pending_payments(&self) -> Result<Vec<Payment>> {
        self.inner.list_pending_payments().await
    }
}

#[async_trait]
impl AlertStore for FlakyStore {
    async fn record_alert(&self, alert: Alert) -> Result<()> {
        self.inner.record_alert(alert).await
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>> {
        self.inner.list_alerts().await
    }
}

#[async_trait]
impl LifecycleStore for FlakyStore {
    async fn activate(&self, payment_id: PaymentId, draft: GrantDraft) -> Result<Grant> {
        self.inner.activate(payment_id, draft).await
    }
}

/// An engine over in-memory fakes, with handles to each of them.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub panel: Arc<FakePanel>,
    pub gateway: Arc<ScriptedGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: Engine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_endpoints(&["de1"])
    }

    pub fn with_endpoints(codes: &[&str]) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let panel = Arc::new(FakePanel::new(codes));
        let gateway = Arc::new(ScriptedGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = Engine::new(
            store.clone(),
            panel.clone(),
            gateway.clone(),
            notifier.clone(),
            TariffCatalog::default(),
        );
        Self {
            store,
            panel,
            gateway,
            notifier,
            engine,
        }
    }
}
