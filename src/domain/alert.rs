use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raised by the health sweep when an endpoint fails its liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub endpoint: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn endpoint_down(endpoint: &str, raised_at: DateTime<Utc>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            message: format!("endpoint {} failed its health check", endpoint),
            raised_at,
        }
    }
}
