//! Client-facing `vless://` connection URIs for REALITY inbounds.

use crate::domain::endpoint::Endpoint;
use crate::error::{ProvisionError, Result};
use reqwest::Url;
use uuid::Uuid;

pub const SCHEME: &str = "vless";

/// The security parameters a client needs to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub client_id: Uuid,
    pub address: String,
    pub port: u16,
    pub public_key: String,
    pub short_id: String,
    pub server_name: String,
    pub fingerprint: String,
    pub flow: String,
    /// Percent-encoded label, exactly as it appears in the fragment.
    pub label: Option<String>,
}

/// Builds the connection URI for `client_id` on `endpoint`.
///
/// Pure: the same inputs always produce the same string.
pub fn build(endpoint: &Endpoint, client_id: Uuid, label: &str) -> Result<String> {
    let conn = &endpoint.connection;
    let mut url = Url::parse(&format!(
        "{}://{}@{}:{}",
        SCHEME, client_id, conn.address, conn.port
    ))
    .map_err(|e| {
        ProvisionError::Validation(format!(
            "endpoint {} has an unusable address: {}",
            endpoint.code, e
        ))
    })?;

    url.query_pairs_mut()
        .append_pair("type", "tcp")
        .append_pair("security", "reality")
        .append_pair("pbk", &conn.public_key)
        .append_pair("fp", &conn.fingerprint)
        .append_pair("sni", &conn.server_name)
        .append_pair("sid", &conn.short_id)
        .append_pair("spx", "/")
        .append_pair("flow", &conn.flow);
    url.set_fragment(Some(label));

    Ok(url.to_string())
}

pub fn parse(uri: &str) -> Result<Descriptor> {
    let invalid = |reason: &str| ProvisionError::Validation(format!("invalid descriptor: {}", reason));

    let url = Url::parse(uri).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != SCHEME {
        return Err(invalid("unexpected scheme"));
    }
    let client_id = Uuid::parse_str(url.username()).map_err(|_| invalid("bad client id"))?;
    let address = url.host_str().ok_or_else(|| invalid("missing host"))?;
    let port = url.port().ok_or_else(|| invalid("missing port"))?;

    let param = |key: &str| {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .ok_or_else(|| invalid(&format!("missing {}", key)))
    };

    Ok(Descriptor {
        client_id,
        address: address.to_string(),
        port,
        public_key: param("pbk")?,
        short_id: param("sid")?,
        server_name: param("sni")?,
        fingerprint: param("fp")?,
        flow: param("flow")?,
        label: url.fragment().map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::endpoint::{ConnectionParams, DEFAULT_FINGERPRINT, DEFAULT_FLOW};

    fn endpoint() -> Endpoint {
        Endpoint {
            code: "de1".to_string(),
            base_url: "https://panel.example.net".to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            inbound_id: 1,
            connection: ConnectionParams {
                address: "de1.example.net".to_string(),
                port: 8443,
                public_key: "Zq3-kT_9xYvL0mQpR2sU4wE6rT8yU1iO3pA5sD7fG9h".to_string(),
                short_id: "6ba85179e30d4fc2".to_string(),
                server_name: "www.microsoft.com".to_string(),
                fingerprint: DEFAULT_FINGERPRINT.to_string(),
                flow: DEFAULT_FLOW.to_string(),
            },
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let id = Uuid::new_v4();
        let a = build(&endpoint(), id, "Germany #1").unwrap();
        let b = build(&endpoint(), id, "Germany #1").unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(&format!("vless://{}@de1.example.net:8443?", id)));
        assert!(a.contains("security=reality"));
    }

    #[test]
    fn test_security_parameters_round_trip() {
        let ep = endpoint();
        let id = Uuid::new_v4();
        let parsed = parse(&build(&ep, id, "Germany").unwrap()).unwrap();

        assert_eq!(parsed.client_id, id);
        assert_eq!(parsed.address, ep.connection.address);
        assert_eq!(parsed.port, ep.connection.port);
        assert_eq!(parsed.public_key, ep.connection.public_key);
        assert_eq!(parsed.short_id, ep.connection.short_id);
        assert_eq!(parsed.server_name, ep.connection.server_name);
        assert_eq!(parsed.fingerprint, ep.connection.fingerprint);
        assert_eq!(parsed.flow, ep.connection.flow);
        assert_eq!(parsed.label.as_deref(), Some("Germany"));
    }

    #[test]
    fn test_label_is_escaped() {
        let uri = build(&endpoint(), Uuid::new_v4(), "my phone").unwrap();
        assert!(uri.ends_with("#my%20phone"));
    }

    #[test]
    fn test_parse_rejects_foreign_scheme() {
        assert!(parse("https://example.net").is_err());
        assert!(parse("vless://not-a-uuid@host:443?pbk=x").is_err());
    }
}
