use serde::{Deserialize, Serialize};

/// Default XTLS flow tag applied to provisioned clients.
pub const DEFAULT_FLOW: &str = "xtls-rprx-vision";
/// Default TLS fingerprint advertised in connection descriptors.
pub const DEFAULT_FINGERPRINT: &str = "chrome";

/// Client-facing parameters of a REALITY inbound.
///
/// These never reach the panel API; they are only embedded in the
/// connection descriptor handed to the end user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub address: String,
    pub port: u16,
    pub public_key: String,
    pub short_id: String,
    pub server_name: String,
    pub fingerprint: String,
    pub flow: String,
}

/// A configured remote panel.
///
/// Loaded once at start-up and never mutated afterwards.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Short identity code, e.g. `de1`.
    pub code: String,
    /// Panel base URL without a trailing slash.
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Inbound the clients are attached to.
    pub inbound_id: u32,
    pub connection: ConnectionParams,
}

impl Endpoint {
    /// Joins `path` onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

// Credentials stay out of logs.
impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("code", &self.code)
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("inbound_id", &self.inbound_id)
            .field("connection", &self.connection)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(base_url: &str) -> Endpoint {
        Endpoint {
            code: "de1".to_string(),
            base_url: base_url.to_string(),
            username: "admin".to_string(),
            password: "hunter2".to_string(),
            inbound_id: 1,
            connection: ConnectionParams {
                address: "de1.example.net".to_string(),
                port: 443,
                public_key: "pk".to_string(),
                short_id: "ab12".to_string(),
                server_name: "www.microsoft.com".to_string(),
                fingerprint: DEFAULT_FINGERPRINT.to_string(),
                flow: DEFAULT_FLOW.to_string(),
            },
        }
    }

    #[test]
    fn test_url_joining_handles_slashes() {
        assert_eq!(
            endpoint("https://panel.example.net/secret/").url("/login"),
            "https://panel.example.net/secret/login"
        );
        assert_eq!(
            endpoint("https://panel.example.net").url("login"),
            "https://panel.example.net/login"
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let debug = format!("{:?}", endpoint("https://panel.example.net"));
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("hunter2"));
    }
}
