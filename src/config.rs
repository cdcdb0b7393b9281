//! Start-up configuration read from environment-style key groups.
//!
//! Each panel is described by a `PANEL_<N>_*` group; the payment gateway by
//! the `GATEWAY_*` keys. Parsing works on any `(key, value)` iterator so it can
//! be exercised without touching the process environment.

use crate::domain::endpoint::{ConnectionParams, DEFAULT_FINGERPRINT, DEFAULT_FLOW, Endpoint};
use crate::error::{ProvisionError, Result};
use crate::infrastructure::gateway::{DEFAULT_API_URL, GatewayConfig};
use std::collections::{BTreeMap, HashMap};

const PANEL_PREFIX: &str = "PANEL_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub endpoints: Vec<Endpoint>,
    pub gateway: GatewayConfig,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        Ok(Self {
            endpoints: parse_endpoints(&vars)?,
            gateway: parse_gateway(&vars)?,
        })
    }
}

fn parse_endpoints(vars: &HashMap<String, String>) -> Result<Vec<Endpoint>> {
    // index -> field -> value, ordered by numeric index
    let mut groups: BTreeMap<u32, HashMap<&str, &str>> = BTreeMap::new();
    for (key, value) in vars {
        let Some(rest) = key.strip_prefix(PANEL_PREFIX) else {
            continue;
        };
        let Some((index, field)) = rest.split_once('_') else {
            continue;
        };
        let Ok(index) = index.parse::<u32>() else {
            continue;
        };
        groups.entry(index).or_default().insert(field, value.as_str());
    }

    if groups.is_empty() {
        return Err(ProvisionError::Config(
            "no panel endpoints configured (expected PANEL_<N>_* keys)".to_string(),
        ));
    }

    let endpoints = groups
        .into_iter()
        .map(|(index, fields)| parse_endpoint(index, &fields))
        .collect::<Result<Vec<_>>>()?;

    for (i, endpoint) in endpoints.iter().enumerate() {
        if endpoints[..i].iter().any(|e| e.code == endpoint.code) {
            return Err(ProvisionError::Config(format!(
                "duplicate endpoint code {}",
                endpoint.code
            )));
        }
    }
    Ok(endpoints)
}

fn parse_endpoint(index: u32, fields: &HashMap<&str, &str>) -> Result<Endpoint> {
    let required = |field: &str| -> Result<String> {
        fields
            .get(field)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ProvisionError::Config(format!("missing {}{}_{}", PANEL_PREFIX, index, field))
            })
    };
    let optional = |field: &str, default: &str| {
        fields
            .get(field)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
            .to_string()
    };
    let number = |field: &str| -> Result<u32> {
        required(field)?.parse().map_err(|_| {
            ProvisionError::Config(format!("{}{}_{} must be a number", PANEL_PREFIX, index, field))
        })
    };

    let port = number("PORT")?;
    let port = u16::try_from(port).map_err(|_| {
        ProvisionError::Config(format!("{}{}_PORT out of range", PANEL_PREFIX, index))
    })?;

    Ok(Endpoint {
        code: required("CODE")?,
        base_url: required("URL")?.trim_end_matches('/').to_string(),
        username: required("USERNAME")?,
        password: required("PASSWORD")?,
        inbound_id: number("INBOUND_ID")?,
        connection: ConnectionParams {
            address: required("ADDRESS")?,
            port,
            public_key: required("PUBLIC_KEY")?,
            short_id: required("SHORT_ID")?,
            server_name: required("SNI")?,
            fingerprint: optional("FINGERPRINT", DEFAULT_FINGERPRINT),
            flow: optional("FLOW", DEFAULT_FLOW),
        },
    })
}

fn parse_gateway(vars: &HashMap<String, String>) -> Result<GatewayConfig> {
    let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
    let required = |key: &str| {
        get(key)
            .map(str::to_string)
            .ok_or_else(|| ProvisionError::Config(format!("missing {}", key)))
    };
    Ok(GatewayConfig {
        api_url: get("GATEWAY_API_URL")
            .unwrap_or(DEFAULT_API_URL)
            .to_string(),
        wallet: required("GATEWAY_WALLET")?,
        token: required("GATEWAY_TOKEN")?,
        success_url: get("GATEWAY_SUCCESS_URL").map(str::to_string),
    })
}
