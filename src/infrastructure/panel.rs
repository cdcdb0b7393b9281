use super::session::SessionClient;
use crate::domain::endpoint::Endpoint;
use crate::domain::ports::{NewClient, PanelApi, Usage};
use crate::error::{ProvisionError, Result};
use crate::interfaces::descriptor;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

const ADD_CLIENT: &str = "panel/api/inbounds/addClient";

/// Client object as the panel stores it inside an inbound's `settings`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PanelClientEntry<'a> {
    id: String,
    flow: &'a str,
    email: &'a str,
    limit_ip: u32,
    #[serde(rename = "totalGB")]
    total_gb: u64,
    expiry_time: i64,
    enable: bool,
    tg_id: String,
    sub_id: String,
}

#[derive(Debug, Serialize)]
struct InboundSettings<'a> {
    clients: Vec<PanelClientEntry<'a>>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientTraffic {
    #[serde(default)]
    up: u64,
    #[serde(default)]
    down: u64,
}

/// [`PanelApi`] over the panels' HTTP API.
pub struct PanelClient {
    endpoints: Vec<Endpoint>,
    session: SessionClient,
}

impl PanelClient {
    pub fn new(endpoints: Vec<Endpoint>, session: SessionClient) -> Self {
        Self { endpoints, session }
    }
}

#[async_trait]
impl PanelApi for PanelClient {
    fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    fn endpoint(&self, code: &str) -> Result<&Endpoint> {
        self.endpoints
            .iter()
            .find(|e| e.code == code)
            .ok_or_else(|| ProvisionError::not_found("endpoint", code))
    }

    async fn add_client(&self, endpoint: &Endpoint, client: &NewClient) -> Result<()> {
        let entry = PanelClientEntry {
            id: client.id.to_string(),
            flow: &endpoint.connection.flow,
            email: &client.email,
            limit_ip: client.device_limit,
            // The panel's field is named in GB but holds bytes.
            total_gb: client.traffic_quota,
            expiry_time: client.expiry_epoch_ms,
            enable: true,
            tg_id: client.principal.to_string(),
            sub_id: client.id.simple().to_string(),
        };
        let settings = serde_json::to_string(&InboundSettings {
            clients: vec![entry],
        })?;
        let body = json!({ "id": endpoint.inbound_id, "settings": settings });

        self.session
            .call(endpoint, Method::POST, ADD_CLIENT, Some(&body))
            .await?;
        debug!(endpoint = %endpoint.code, client_id = %client.id, "client added");
        Ok(())
    }

    async fn remove_client(&self, endpoint: &Endpoint, client_id: Uuid) -> Result<()> {
        let path = format!(
            "panel/api/inbounds/{}/delClient/{}",
            endpoint.inbound_id, client_id
        );
        self.session
            .call(endpoint, Method::POST, &path, None)
            .await?;
        debug!(endpoint = %endpoint.code, %client_id, "client removed");
        Ok(())
    }

    async fn client_usage(&self, endpoint: &Endpoint, email: &str) -> Result<Usage> {
        let path = format!("panel/api/inbounds/getClientTraffics/{}", email);
        let envelope = self
            .session
            .call(endpoint, Method::GET, &path, None)
            .await?;
        let traffic = match envelope.obj {
            Some(obj) if !obj.is_null() => serde_json::from_value::<ClientTraffic>(obj)?,
            _ => ClientTraffic::default(),
        };
        Ok(Usage::new(traffic.up, traffic.down))
    }

    fn connection_descriptor(
        &self,
        endpoint: &Endpoint,
        client_id: Uuid,
        label: &str,
    ) -> Result<String> {
        descriptor::build(endpoint, client_id, label)
    }

    async fn health_check(&self, endpoint: &Endpoint) -> bool {
        let timeout = self.session.policy().attempt_timeout;
        let probe = self.session.http().get(endpoint.url("")).send();
        match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(response)) => {
                let status = response.status();
                let up = status.is_success() || status.is_redirection();
                if !up {
                    warn!(endpoint = %endpoint.code, %status, "health probe failed");
                }
                up
            }
            Ok(Err(err)) => {
                warn!(endpoint = %endpoint.code, error = %err, "health probe failed");
                false
            }
            Err(_) => {
                warn!(endpoint = %endpoint.code, ?timeout, "health probe timed out");
                false
            }
        }
    }

    async fn health_check_all(&self) -> BTreeMap<String, bool> {
        let probes = self.endpoints.iter().map(|endpoint| async move {
            (endpoint.code.clone(), self.health_check(endpoint).await)
        });
        join_all(probes).await.into_iter().collect()
    }
}
