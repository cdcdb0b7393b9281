use crate::domain::alert::Alert;
use crate::domain::grant::{Grant, GrantDraft};
use crate::domain::payment::{Payment, PaymentDraft, PaymentStatus};
use crate::domain::ports::{AlertStore, GrantStore, LifecycleStore, PaymentStore};
use crate::domain::{GrantId, PaymentId, PrincipalId};
use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for grants, keyed by big-endian grant id.
pub const CF_GRANTS: &str = "grants";
/// Column Family for payments, keyed by big-endian payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for health alerts, keyed by insertion sequence.
pub const CF_ALERTS: &str = "alerts";
/// Column Family for id counters.
pub const CF_META: &str = "meta";

const NEXT_GRANT_ID: &[u8] = b"next_grant_id";
const NEXT_PAYMENT_ID: &[u8] = b"next_payment_id";
const NEXT_ALERT_ID: &[u8] = b"next_alert_id";

/// A persistent lifecycle store backed by RocksDB.
///
/// Each entity lives in its own Column Family as JSON. Read-check-write
/// sequences are serialized by `write_lock` and committed with a single
/// `WriteBatch`, which keeps every operation atomic even across rows.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_GRANTS, CF_PAYMENTS, CF_ALERTS, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            ProvisionError::Storage(Box::new(std::io::Error::other(format!(
                "{} column family not found",
                name
            ))))
        })
    }

    fn get_row<T: DeserializeOwned>(&self, cf: &str, id: u64) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    fn put_row<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf: &str,
        id: u64,
        row: &T,
    ) -> Result<()> {
        batch.put_cf(self.cf(cf)?, id.to_be_bytes(), serde_json::to_vec(row)?);
        Ok(())
    }

    /// Reserves the next id for `counter`, staging the bump in `batch`.
    fn next_id(&self, batch: &mut WriteBatch, counter: &[u8]) -> Result<u64> {
        let meta = self.cf(CF_META)?;
        let current = match self.db.get_cf(meta, counter)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    ProvisionError::Storage(Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "corrupt id counter",
                    )))
                })?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = current + 1;
        batch.put_cf(meta, counter, next.to_be_bytes());
        Ok(next)
    }

    fn stage_grant(&self, batch: &mut WriteBatch, draft: GrantDraft) -> Result<Grant> {
        let id = self.next_id(batch, NEXT_GRANT_ID)?;
        let grant = Grant::from_draft(id, draft, Utc::now());
        self.put_row(batch, CF_GRANTS, id, &grant)?;
        Ok(grant)
    }

    fn require_grant(&self, id: GrantId) -> Result<Grant> {
        self.get_row(CF_GRANTS, id)?
            .ok_or_else(|| ProvisionError::not_found("grant", id))
    }

    fn require_payment(&self, id: PaymentId) -> Result<Payment> {
        self.get_row(CF_PAYMENTS, id)?
            .ok_or_else(|| ProvisionError::not_found("payment", id))
    }
}

#[async_trait]
impl GrantStore for RocksDBStore {
    async fn create_grant(&self, draft: GrantDraft) -> Result<Grant> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        let grant = self.stage_grant(&mut batch, draft)?;
        self.db.write(batch)?;
        Ok(grant)
    }

    async fn get_grant(&self, id: GrantId) -> Result<Option<Grant>> {
        self.get_row(CF_GRANTS, id)
    }

    async fn deactivate_grant(&self, id: GrantId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut grant = self.require_grant(id)?;
        if !grant.deactivate() {
            return Ok(false);
        }
        let mut batch = WriteBatch::default();
        self.put_row(&mut batch, CF_GRANTS, id, &grant)?;
        self.db.write(batch)?;
        Ok(true)
    }

    async fn deactivate_all_grants_for_principal(
        &self,
        principal: PrincipalId,
    ) -> Result<Vec<Grant>> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        let mut affected = Vec::new();
        for mut grant in self.scan::<Grant>(CF_GRANTS)? {
            if grant.principal == principal && grant.deactivate() {
                self.put_row(&mut batch, CF_GRANTS, grant.id, &grant)?;
                affected.push(grant);
            }
        }
        self.db.write(batch)?;
        Ok(affected)
    }

    async fn list_expired_grants(&self, now: DateTime<Utc>) -> Result<Vec<Grant>> {
        Ok(self
            .scan::<Grant>(CF_GRANTS)?
            .into_iter()
            .filter(|g| g.is_expired(now))
            .collect())
    }

    async fn list_active_grants(&self, principal: PrincipalId) -> Result<Vec<Grant>> {
        Ok(self
            .scan::<Grant>(CF_GRANTS)?
            .into_iter()
            .filter(|g| g.active && g.principal == principal)
            .collect())
    }

    async fn update_traffic(&self, id: GrantId, used_bytes: u64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut grant = self.require_grant(id)?;
        grant.traffic_used = used_bytes;
        let mut batch = WriteBatch::default();
        self.put_row(&mut batch, CF_GRANTS, id, &grant)?;
        self.db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn create_payment(&self, draft: PaymentDraft) -> Result<Payment> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        let id = self.next_id(&mut batch, NEXT_PAYMENT_ID)?;
        let payment = Payment::from_draft(id, draft, Utc::now());
        self.put_row(&mut batch, CF_PAYMENTS, id, &payment)?;
        self.db.write(batch)?;
        Ok(payment)
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.get_row(CF_PAYMENTS, id)
    }

    async fn find_payment_by_label(&self, label: &str) -> Result<Option<Payment>> {
        Ok(self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .find(|p| p.label == label))
    }

    async fn complete_payment(&self, id: PaymentId) -> Result<Payment> {
        let _guard = self.write_lock.lock().await;
        let mut payment = self.require_payment(id)?;
        payment.complete(Utc::now())?;
        let mut batch = WriteBatch::default();
        self.put_row(&mut batch, CF_PAYMENTS, id, &payment)?;
        self.db.write(batch)?;
        Ok(payment)
    }

    async fn expire_stale_payments(&self, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        let mut expired = 0;
        for mut payment in self.scan::<Payment>(CF_PAYMENTS)? {
            if payment.is_stale(now) {
                payment.expire()?;
                self.put_row(&mut batch, CF_PAYMENTS, payment.id, &payment)?;
                expired += 1;
            }
        }
        self.db.write(batch)?;
        Ok(expired)
    }

    async fn list_pending_payments(&self) -> Result<Vec<Payment>> {
        Ok(self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .filter(|p| p.status == PaymentStatus::Pending)
            .collect())
    }
}

#[async_trait]
impl AlertStore for RocksDBStore {
    async fn record_alert(&self, alert: Alert) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        let id = self.next_id(&mut batch, NEXT_ALERT_ID)?;
        self.put_row(&mut batch, CF_ALERTS, id, &alert)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>> {
        self.scan(CF_ALERTS)
    }
}

#[async_trait]
impl LifecycleStore for RocksDBStore {
    async fn activate(&self, payment_id: PaymentId, draft: GrantDraft) -> Result<Grant> {
        let _guard = self.write_lock.lock().await;
        let mut payment = self.require_payment(payment_id)?;
        payment.complete(Utc::now())?;

        let mut batch = WriteBatch::default();
        let grant = self.stage_grant(&mut batch, draft)?;
        self.put_row(&mut batch, CF_PAYMENTS, payment_id, &payment)?;
        self.db.write(batch)?;
        Ok(grant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::Amount;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn grant_draft(principal: PrincipalId) -> GrantDraft {
        let client_id = Uuid::new_v4();
        GrantDraft {
            principal,
            endpoint: "de1".to_string(),
            client_id,
            email: GrantDraft::client_email(principal, client_id, "de1"),
            tariff: "month".to_string(),
            expires_at: Some(Utc::now() - Duration::minutes(5)),
            device_limit: 3,
            traffic_quota: 0,
            payment_id: None,
        }
    }

    fn payment_draft() -> PaymentDraft {
        PaymentDraft {
            principal: 1,
            tariff: "month".to_string(),
            endpoint: "de1".to_string(),
            amount: Amount::new(dec!(150)).unwrap(),
            currency: "RUB".to_string(),
            label: "pay_1".to_string(),
            payload: String::new(),
        }
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for cf in [CF_GRANTS, CF_PAYMENTS, CF_ALERTS, CF_META] {
            assert!(store.db.cf_handle(cf).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_grant_store() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let first = store.create_grant(grant_draft(1)).await.unwrap();
        let second = store.create_grant(grant_draft(1)).await.unwrap();
        assert_eq!((first.id, second.id), (1, 2));

        assert_eq!(store.list_expired_grants(Utc::now()).await.unwrap().len(), 2);
        assert!(store.deactivate_grant(first.id).await.unwrap());
        assert_eq!(store.list_active_grants(1).await.unwrap(), vec![second]);
    }

    #[tokio::test]
    async fn test_rocksdb_activation_survives_reopen() {
        let dir = tempdir().unwrap();
        let payment_id = {
            let store = RocksDBStore::open(dir.path()).unwrap();
            let payment = store.create_payment(payment_draft()).await.unwrap();
            store.activate(payment.id, grant_draft(1)).await.unwrap();
            payment.id
        };

        let store = RocksDBStore::open(dir.path()).unwrap();
        let payment = store.get_payment(payment_id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(store.list_active_grants(1).await.unwrap().len(), 1);
        assert!(store.list_pending_payments().await.unwrap().is_empty());

        // Counters survive the reopen too.
        let next = store.create_payment(payment_draft()).await.unwrap();
        assert_eq!(next.id, payment_id + 1);
    }

    #[tokio::test]
    async fn test_rocksdb_activation_rejects_completed_payment() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let payment = store.create_payment(payment_draft()).await.unwrap();
        store.complete_payment(payment.id).await.unwrap();

        let result = store.activate(payment.id, grant_draft(1)).await;
        assert!(matches!(
            result,
            Err(ProvisionError::InvalidTransition { .. })
        ));
        assert!(store.list_active_grants(1).await.unwrap().is_empty());
    }
}
