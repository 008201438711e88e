//! Remote client boundary: the single request/response primitive the
//! daemon uses to reach the sync server.

use base64::Engine as _;
use serde_json::Value;
use thiserror::Error;

use syncbox_core::Config;

/// Why an operation did not reach the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteFailure {
    /// No answer, or a transient server error. Worth retrying.
    #[error("remote server unreachable")]
    Unreachable,
    /// The server answered and refused the request. Retrying cannot help.
    #[error("remote server rejected the request: {0}")]
    Rejected(String),
}

/// Sends one command to the server. `None` means the server could not be
/// reached or answered with an error; call sites decide whether that is fatal.
pub trait RemoteClient: Send + Sync {
    fn dispatch_request(&self, command: &str, data: Option<&Value>) -> Option<Value>;

    /// Deliver a sync operation, telling a refusal apart from an outage.
    /// Clients that cannot tell the two apart report every failure as
    /// [`RemoteFailure::Unreachable`].
    fn deliver(&self, command: &str, data: Option<&Value>) -> Result<Value, RemoteFailure> {
        self.dispatch_request(command, data)
            .ok_or(RemoteFailure::Unreachable)
    }
}

/// JSON-over-HTTP transport: `POST {server}{api_suffix}{command}` with basic auth,
/// or `GET` when there is no payload.
pub struct HttpRemote {
    base_url: String,
    authorization: String,
    agent: ureq::Agent,
}

impl HttpRemote {
    pub fn from_config(config: &Config) -> Self {
        let credentials = format!("{}:{}", config.user, config.pass);
        Self {
            base_url: join_url(&config.server_address, &config.api_suffix),
            authorization: format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode(credentials)
            ),
            agent: ureq::AgentBuilder::new()
                .timeout(config.remote_timeout())
                .build(),
        }
    }

    pub fn endpoint(&self, command: &str) -> String {
        format!("{}{}", self.base_url, command)
    }

    fn call(&self, command: &str, data: Option<&Value>) -> Result<ureq::Response, RemoteFailure> {
        let url = self.endpoint(command);
        let result = match data {
            Some(body) => self
                .agent
                .post(&url)
                .set("Authorization", &self.authorization)
                .send_json(body),
            None => self
                .agent
                .get(&url)
                .set("Authorization", &self.authorization)
                .call(),
        };

        match result {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(status, _)) if is_transient(status) => {
                tracing::warn!(command, status, "remote temporarily unavailable");
                Err(RemoteFailure::Unreachable)
            }
            Err(ureq::Error::Status(status, _)) => {
                tracing::warn!(command, status, "remote rejected request");
                Err(RemoteFailure::Rejected(format!("HTTP {status}")))
            }
            Err(err) => {
                tracing::warn!(command, error = %err, "remote transport failure");
                Err(RemoteFailure::Unreachable)
            }
        }
    }
}

impl RemoteClient for HttpRemote {
    fn dispatch_request(&self, command: &str, data: Option<&Value>) -> Option<Value> {
        let response = self.call(command, data).ok()?;
        match response.into_json::<Value>() {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(command, error = %err, "remote returned an unreadable body");
                None
            }
        }
    }

    fn deliver(&self, command: &str, data: Option<&Value>) -> Result<Value, RemoteFailure> {
        let response = self.call(command, data)?;
        // Accepted with a 2xx: the body is informational.
        Ok(response.into_json::<Value>().unwrap_or_else(|err| {
            tracing::debug!(command, error = %err, "ignoring unreadable delivery body");
            Value::Null
        }))
    }
}

/// Timeouts, throttling and server-side errors may clear up on their own.
fn is_transient(status: u16) -> bool {
    matches!(status, 408 | 429) || status >= 500
}

/// `http://host:5000` + `/API/V1/` with exactly one `/` between them and a
/// trailing `/` so command names can be appended.
fn join_url(server: &str, suffix: &str) -> String {
    let server = server.trim_end_matches('/');
    let suffix = suffix.trim_matches('/');
    if suffix.is_empty() {
        format!("{server}/")
    } else {
        format!("{server}/{suffix}/")
    }
}
