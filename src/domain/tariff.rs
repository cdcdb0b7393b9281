use crate::error::{ProvisionError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

const BYTES_PER_GIB: u64 = 1024 * 1024 * 1024;
/// Longest duration a tariff may grant, so expiry arithmetic cannot overflow.
pub const MAX_TARIFF_DAYS: i64 = 100 * 365;

/// How long a tariff keeps a grant alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TariffDuration {
    /// Short trial measured in minutes.
    Trial { minutes: u32 },
    Days(u32),
}

impl TariffDuration {
    pub fn as_duration(&self) -> Duration {
        match *self {
            TariffDuration::Trial { minutes } => Duration::minutes(i64::from(minutes)),
            TariffDuration::Days(days) => Duration::days(i64::from(days)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tariff {
    pub id: String,
    pub title: String,
    pub price: Decimal,
    pub duration: TariffDuration,
    pub device_limit: u32,
    /// Traffic quota in GiB, 0 means unlimited.
    #[serde(default)]
    pub traffic_gb: u64,
}

impl Tariff {
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.duration.as_duration()
    }

    pub fn traffic_quota_bytes(&self) -> u64 {
        self.traffic_gb.saturating_mul(BYTES_PER_GIB)
    }
}

/// The set of tariffs on sale.
#[derive(Debug, Clone, PartialEq)]
pub struct TariffCatalog {
    tariffs: Vec<Tariff>,
}

impl TariffCatalog {
    pub fn new(tariffs: Vec<Tariff>) -> Result<Self> {
        if tariffs.is_empty() {
            return Err(ProvisionError::Config(
                "tariff catalog must not be empty".to_string(),
            ));
        }
        for (i, tariff) in tariffs.iter().enumerate() {
            if tariff.price < Decimal::ZERO {
                return Err(ProvisionError::Config(format!(
                    "tariff {} has a negative price",
                    tariff.id
                )));
            }
            if tariff.duration.as_duration() > Duration::days(MAX_TARIFF_DAYS) {
                return Err(ProvisionError::Config(format!(
                    "tariff {} lasts longer than {} days",
                    tariff.id, MAX_TARIFF_DAYS
                )));
            }
            if tariffs[..i].iter().any(|t| t.id == tariff.id) {
                return Err(ProvisionError::Config(format!(
                    "duplicate tariff id {}",
                    tariff.id
                )));
            }
        }
        Ok(Self { tariffs })
    }

    /// Parses a JSON array of tariffs.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::new(serde_json::from_str(json)?)
    }

    pub fn get(&self, id: &str) -> Result<&Tariff> {
        self.tariffs
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| ProvisionError::not_found("tariff", id))
    }

    pub fn all(&self) -> &[Tariff] {
        &self.tariffs
    }
}

impl Default for TariffCatalog {
    fn default() -> Self {
        let tariff = |id: &str, title: &str, price, duration| Tariff {
            id: id.to_string(),
            title: title.to_string(),
            price,
            duration,
            device_limit: 3,
            traffic_gb: 0,
        };
        Self {
            tariffs: vec![
                tariff(
                    "trial",
                    "Trial",
                    Decimal::ZERO,
                    TariffDuration::Trial { minutes: 60 },
                ),
                tariff("month", "1 month", dec!(150), TariffDuration::Days(30)),
                tariff("quarter", "3 months", dec!(400), TariffDuration::Days(90)),
                tariff("year", "12 months", dec!(1400), TariffDuration::Days(365)),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_for_day_and_trial_units() {
        let catalog = TariffCatalog::default();
        let now = Utc::now();

        let month = catalog.get("month").unwrap();
        assert_eq!(month.expires_at(now) - now, Duration::days(30));

        let trial = catalog.get("trial").unwrap();
        assert_eq!(trial.expires_at(now) - now, Duration::minutes(60));
    }

    #[test]
    fn test_unknown_tariff_is_not_found() {
        let catalog = TariffCatalog::default();
        assert!(matches!(
            catalog.get("platinum"),
            Err(ProvisionError::NotFound { kind: "tariff", .. })
        ));
    }

    #[test]
    fn test_catalog_from_json() {
        let json = r#"[
            {"id": "week", "title": "1 week", "price": "50", "duration": {"days": 7}, "device_limit": 1, "traffic_gb": 100},
            {"id": "taste", "title": "Taste", "price": "0", "duration": {"trial": {"minutes": 15}}, "device_limit": 1}
        ]"#;
        let catalog = TariffCatalog::from_json(json).unwrap();
        let week = catalog.get("week").unwrap();
        assert_eq!(week.price, dec!(50));
        assert_eq!(week.traffic_quota_bytes(), 100 * BYTES_PER_GIB);
        assert_eq!(
            catalog.get("taste").unwrap().duration,
            TariffDuration::Trial { minutes: 15 }
        );
    }

    #[test]
    fn test_catalog_rejects_duplicates_and_empty() {
        assert!(TariffCatalog::new(vec![]).is_err());
        let month = TariffCatalog::default().get("month").unwrap().clone();
        assert!(TariffCatalog::new(vec![month.clone(), month]).is_err());
    }

    #[test]
    fn test_catalog_rejects_unbounded_duration() {
        let json = r#"[{"id": "forever", "title": "Forever", "price": "10", "duration": {"days": 4294967295}, "device_limit": 1}]"#;
        assert!(matches!(
            TariffCatalog::from_json(json),
            Err(ProvisionError::Config(_))
        ));

        let longest = format!(
            r#"[{{"id": "century", "title": "Century", "price": "10", "duration": {{"days": {}}}, "device_limit": 1}}]"#,
            MAX_TARIFF_DAYS
        );
        let catalog = TariffCatalog::from_json(&longest).unwrap();
        let now = Utc::now();
        let century = catalog.get("century").unwrap();
        assert_eq!(century.expires_at(now) - now, Duration::days(MAX_TARIFF_DAYS));
    }
}
