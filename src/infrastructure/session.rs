//! Authenticated access to panel endpoints.
//!
//! [`SessionClient`] keeps one session cookie per endpoint in a
//! [`SessionCache`], logs in lazily, and re-authenticates once when the panel
//! answers 401. Transport failures are retried under a [`RetryPolicy`].

use crate::domain::endpoint::Endpoint;
use crate::error::{ProvisionError, Result};
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Bounded retry with exponential backoff and a hard per-attempt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_backoff: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    /// Wait before retrying after the zero-based `attempt` failed: 1s, 2s, 4s...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(1u32 << attempt.min(16))
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent. The last error is returned.
    pub async fn run<T, F, Fut>(&self, target: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProvisionError::transport(
                    target,
                    format!("timed out after {:?}", self.attempt_timeout),
                )),
            };
            match outcome {
                Err(err) if err.is_transient() && attempt + 1 < self.attempts => {
                    let wait = self.backoff(attempt);
                    warn!(peer = target, attempt = attempt + 1, error = %err, ?wait, "retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Session cookies keyed by endpoint code.
///
/// Last writer wins; a redundant login simply replaces the cookie.
#[derive(Debug, Default)]
pub struct SessionCache {
    cookies: RwLock<HashMap<String, String>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, endpoint: &str) -> Option<String> {
        self.cookies.read().await.get(endpoint).cloned()
    }

    pub async fn store(&self, endpoint: &str, cookie: String) {
        self.cookies.write().await.insert(endpoint.to_string(), cookie);
    }

    pub async fn invalidate(&self, endpoint: &str) {
        self.cookies.write().await.remove(endpoint);
    }
}

/// Response envelope shared by every panel call.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub obj: Option<Value>,
}

impl Envelope {
    fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(ProvisionError::RemoteRejection(
                self.msg.unwrap_or_else(|| "success: false".to_string()),
            ))
        }
    }
}

enum Reply {
    Unauthorized,
    Envelope(Envelope),
}

pub(crate) fn transport_error(target: &str, err: reqwest::Error) -> ProvisionError {
    if err.is_decode() {
        ProvisionError::RemoteRejection(format!("{}: malformed response: {}", target, err))
    } else {
        ProvisionError::transport(target, err)
    }
}

#[derive(Clone)]
pub struct SessionClient {
    http: reqwest::Client,
    sessions: Arc<SessionCache>,
    policy: RetryPolicy,
}

impl SessionClient {
    pub fn new(sessions: Arc<SessionCache>, policy: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProvisionError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            sessions,
            policy,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Issues an authenticated call and returns the successful envelope.
    pub async fn call(
        &self,
        endpoint: &Endpoint,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Envelope> {
        let cookie = match self.sessions.get(&endpoint.code).await {
            Some(cookie) => cookie,
            None => self.login(endpoint).await?,
        };

        match self.send(endpoint, &method, path, body, &cookie).await? {
            Reply::Envelope(envelope) => envelope.into_result(),
            Reply::Unauthorized => {
                info!(endpoint = %endpoint.code, "session rejected, logging in again");
                self.sessions.invalidate(&endpoint.code).await;
                let cookie = self.login(endpoint).await?;
                match self.send(endpoint, &method, path, body, &cookie).await? {
                    Reply::Envelope(envelope) => envelope.into_result(),
                    Reply::Unauthorized => Err(ProvisionError::Auth {
                        endpoint: endpoint.code.clone(),
                        message: "fresh session rejected".to_string(),
                    }),
                }
            }
        }
    }

    /// Authenticates against `endpoint` and caches the session cookie.
    pub async fn login(&self, endpoint: &Endpoint) -> Result<String> {
        let url = endpoint.url("login");
        let url = url.as_str();
        let form = [
            ("username", endpoint.username.as_str()),
            ("password", endpoint.password.as_str()),
        ];
        let (status, cookie, envelope) = self
            .policy
            .run(&endpoint.code, move || async move {
                let response = self
                    .http
                    .post(url)
                    .form(&form)
                    .send()
                    .await
                    .map_err(|e| transport_error(&endpoint.code, e))?;
                let status = response.status();
                let cookie = session_cookie(response.headers());
                let envelope = response.json::<Envelope>().await.ok();
                Ok::<_, ProvisionError>((status, cookie, envelope))
            })
            .await?;

        let rejected = |message: String| ProvisionError::Auth {
            endpoint: endpoint.code.clone(),
            message,
        };
        if !status.is_success() {
            return Err(rejected(format!("login returned {}", status)));
        }
        if let Some(envelope) = envelope.filter(|e| !e.success) {
            return Err(rejected(
                envelope.msg.unwrap_or_else(|| "login refused".to_string()),
            ));
        }
        let cookie = cookie.ok_or_else(|| rejected("no session cookie issued".to_string()))?;

        debug!(endpoint = %endpoint.code, "logged in");
        self.sessions.store(&endpoint.code, cookie.clone()).await;
        Ok(cookie)
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        cookie: &str,
    ) -> Result<Reply> {
        let url = endpoint.url(path);
        let url = url.as_str();
        self.policy
            .run(&endpoint.code, move || async move {
                let mut request = self
                    .http
                    .request(method.clone(), url)
                    .header(COOKIE, cookie);
                if let Some(body) = body {
                    request = request.json(body);
                }
                let response = request
                    .send()
                    .await
                    .map_err(|e| transport_error(&endpoint.code, e))?;

                let status = response.status();
                if status == StatusCode::UNAUTHORIZED {
                    return Ok(Reply::Unauthorized);
                }
                if !status.is_success() {
                    return Err(ProvisionError::RemoteRejection(format!(
                        "{} {} returned {}",
                        method, path, status
                    )));
                }
                let envelope = response
                    .json::<Envelope>()
                    .await
                    .map_err(|e| transport_error(&endpoint.code, e))?;
                Ok::<_, ProvisionError>(Reply::Envelope(envelope))
            })
            .await
    }
}

/// Collapses every `Set-Cookie` header into a single `Cookie` header value.
fn session_cookie(headers: &reqwest::header::HeaderMap) -> Option<String> {
    let pairs: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}
