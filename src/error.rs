use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProvisionError>;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("transport error talking to {target}: {message}")]
    Transport { target: String, message: String },
    #[error("authentication rejected by {endpoint}: {message}")]
    Auth { endpoint: String, message: String },
    #[error("remote rejected request: {0}")]
    RemoteRejection(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("local write failed after remote side effect: {0}")]
    Inconsistency(String),
    #[error("invalid payment transition for payment {payment_id}: {from} -> {to}")]
    InvalidTransition {
        payment_id: u64,
        from: String,
        to: String,
    },
    #[error("sales are currently blocked")]
    SalesBlocked,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ProvisionError {
    pub fn transport(target: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            target: target.into(),
            message: err.to_string(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether the failure is worth another attempt under the retry budget.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for ProvisionError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Storage(Box::new(err))
    }
}
