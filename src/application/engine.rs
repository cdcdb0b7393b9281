use super::provisioning::{Provisioner, SalesGate};
use super::reconciler::PaymentReconciler;
use super::scheduler::{ScheduleConfig, Scheduler};
use super::sweeps::Maintenance;
use crate::domain::ports::{LifecycleStoreRef, NotifierRef, PanelApiRef, PaymentGatewayRef};
use crate::domain::tariff::TariffCatalog;
use std::sync::Arc;

/// The main entry point of the subscription lifecycle.
///
/// `Engine` owns the store and the outward-facing adapters and hands the same
/// instances to every service, so the scheduled sweeps and user-triggered
/// operations observe one sales gate and one in-flight activation set.
pub struct Engine {
    store: LifecycleStoreRef,
    provisioner: Arc<Provisioner>,
    reconciler: Arc<PaymentReconciler>,
    maintenance: Arc<Maintenance>,
}

impl Engine {
    /// Wires the services over the given adapters.
    ///
    /// # Arguments
    ///
    /// * `store` - Persistence for grants, payments and alerts.
    /// * `panel` - The access-control panels.
    /// * `gateway` - The payment ledger.
    /// * `notifier` - Where principal and operator messages go.
    /// * `tariffs` - The tariff catalog prices and durations are read from.
    pub fn new(
        store: LifecycleStoreRef,
        panel: PanelApiRef,
        gateway: PaymentGatewayRef,
        notifier: NotifierRef,
        tariffs: TariffCatalog,
    ) -> Self {
        let provisioner = Arc::new(Provisioner::new(
            store.clone(),
            panel.clone(),
            notifier.clone(),
            Arc::new(tariffs),
            Arc::new(SalesGate::new()),
        ));
        let reconciler = Arc::new(PaymentReconciler::new(
            store.clone(),
            gateway,
            provisioner.clone(),
        ));
        let maintenance = Arc::new(Maintenance::new(
            store.clone(),
            panel,
            notifier,
            provisioner.clone(),
        ));
        Self {
            store,
            provisioner,
            reconciler,
            maintenance,
        }
    }

    pub fn store(&self) -> &LifecycleStoreRef {
        &self.store
    }

    pub fn provisioner(&self) -> &Arc<Provisioner> {
        &self.provisioner
    }

    pub fn reconciler(&self) -> &Arc<PaymentReconciler> {
        &self.reconciler
    }

    pub fn maintenance(&self) -> &Arc<Maintenance> {
        &self.maintenance
    }

    pub fn sales(&self) -> &Arc<SalesGate> {
        self.provisioner.sales()
    }

    /// Starts the periodic sweeps. Must be called inside a tokio runtime.
    pub fn start(&self, config: ScheduleConfig) -> Scheduler {
        Scheduler::start(config, self.maintenance.clone(), self.reconciler.clone())
    }
}
