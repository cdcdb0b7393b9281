use super::session::{RetryPolicy, transport_error};
use crate::domain::payment::Payment;
use crate::domain::ports::PaymentGateway;
use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://yoomoney.ru";

/// How many matching operations to request per history query.
const HISTORY_RECORDS: &str = "10";
const GATEWAY: &str = "gateway";

#[derive(Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub api_url: String,
    /// Receiving wallet for quickpay forms.
    pub wallet: String,
    /// Bearer token for the operation-history API.
    pub token: String,
    pub success_url: Option<String>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_url", &self.api_url)
            .field("wallet", &self.wallet)
            .field("token", &"<redacted>")
            .field("success_url", &self.success_url)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct OperationHistory {
    #[serde(default)]
    operations: Vec<Operation>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Operation {
    status: String,
}

/// Poll-based client for the payment ledger.
pub struct GatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
    history_url: Url,
    quickpay_url: Url,
    policy: RetryPolicy,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig, policy: RetryPolicy) -> Result<Self> {
        let base = Url::parse(&config.api_url).map_err(|e| {
            ProvisionError::Config(format!("invalid gateway url {}: {}", config.api_url, e))
        })?;
        let join = |path: &str| {
            base.join(path)
                .map_err(|e| ProvisionError::Config(format!("invalid gateway url: {}", e)))
        };
        let history_url = join("api/operation-history")?;
        let quickpay_url = join("quickpay/confirm.xml")?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ProvisionError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            config,
            history_url,
            quickpay_url,
            policy,
        })
    }

    /// Checkout URL for `amount` tagged with `label`.
    pub fn quickpay_url(&self, amount: &str, label: &str, target: &str) -> String {
        let mut url = self.quickpay_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("receiver", &self.config.wallet)
                .append_pair("quickpay-form", "shop")
                .append_pair("targets", target)
                .append_pair("paymentType", "AC")
                .append_pair("sum", amount)
                .append_pair("label", label);
            if let Some(success_url) = &self.config.success_url {
                query.append_pair("successURL", success_url);
            }
        }
        url.to_string()
    }
}

#[async_trait]
impl PaymentGateway for GatewayClient {
    async fn is_paid(&self, label: &str) -> Result<bool> {
        let url = &self.history_url;
        let token = self.config.token.as_str();
        let form = [
            ("type", "deposition"),
            ("label", label),
            ("records", HISTORY_RECORDS),
        ];
        let history = self
            .policy
            .run(GATEWAY, move || async move {
                let response = self
                    .http
                    .post(url.clone())
                    .bearer_auth(token)
                    .form(&form)
                    .send()
                    .await
                    .map_err(|e| transport_error(GATEWAY, e))?;
                match response.status() {
                    status if status.is_success() => {}
                    StatusCode::UNAUTHORIZED => {
                        return Err(ProvisionError::Auth {
                            endpoint: GATEWAY.to_string(),
                            message: "token rejected".to_string(),
                        });
                    }
                    status => {
                        return Err(ProvisionError::RemoteRejection(format!(
                            "operation-history returned {}",
                            status
                        )));
                    }
                }
                response
                    .json::<OperationHistory>()
                    .await
                    .map_err(|e| transport_error(GATEWAY, e))
            })
            .await?;

        if let Some(error) = history.error {
            return Err(ProvisionError::RemoteRejection(error));
        }
        let paid = history.operations.iter().any(|op| op.status == "success");
        debug!(label, paid, "operation history checked");
        Ok(paid)
    }

    fn payment_url(&self, payment: &Payment) -> String {
        self.quickpay_url(
            &payment.amount.value().to_string(),
            &payment.label,
            &format!("Subscription {}", payment.tariff),
        )
    }
}
