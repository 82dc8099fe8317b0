//! Plain HTTP endpoints of the local eID client (`/eID-Client`).

use crate::{eid::identity::first_texts, APP_USER_AGENT};
use reqwest::Client;
use serde_json::Value;
use std::{fmt, str::FromStr, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

const CLIENT_PATH: &str = "eID-Client";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("cannot reach eID client at {url}: {reason}")]
    Unreachable { url: String, reason: String },
    #[error("eID client at {url} answered {status}")]
    Rejected { url: String, status: u16 },
    #[error("invalid eID client URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("cannot build HTTP client: {0}")]
    Client(String),
    #[error("request cancelled")]
    Cancelled,
}

/// Dotted numeric version, ordered component-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ClientVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for ClientVersion {
    type Err = String;

    /// Accepts `1`, `1.16` or `1.16.0`, ignoring any suffix after the numbers
    /// (`1.22.3+rc1`, `2.0.0-beta`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let numeric: &str = s
            .trim()
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .next()
            .unwrap_or_default();

        let mut parts = numeric.split('.').filter(|p| !p.is_empty());
        let mut next = |required: bool| -> Result<u32, String> {
            match parts.next() {
                Some(part) => part
                    .parse()
                    .map_err(|e| format!("invalid version component {part:?}: {e}")),
                None if required => Err(format!("invalid version {s:?}")),
                None => Ok(0),
            }
        };

        Ok(Self {
            major: next(true)?,
            minor: next(false)?,
            patch: next(false)?,
        })
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// What the client says about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStatus {
    pub name: Option<String>,
    pub version: Option<ClientVersion>,
}

impl ClientStatus {
    /// Parse a status body: a JSON object, `Key: Value` lines, or XML with a `Name`
    /// element.
    #[must_use]
    pub fn parse(body: &str) -> Self {
        let trimmed = body.trim_start();
        if trimmed.starts_with('{') {
            Self::from_json(trimmed)
        } else if trimmed.starts_with('<') {
            let [name] = first_texts(trimmed.as_bytes(), ["Name"]);
            Self {
                name: name.filter(|n| !n.is_empty()),
                version: None,
            }
        } else {
            Self::from_lines(trimmed)
        }
    }

    fn from_json(body: &str) -> Self {
        let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
            return Self::default();
        };
        let field = |key: &str| {
            map.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        Self {
            name: field("Name").map(ToString::to_string),
            version: field("Implementation-Version").and_then(|v| v.parse().ok()),
        }
    }

    fn from_lines(body: &str) -> Self {
        let mut status = Self::default();
        for line in body.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "Name" if status.name.is_none() && !value.is_empty() => {
                    status.name = Some(value.to_string());
                }
                "Implementation-Version" if status.version.is_none() => {
                    status.version = value.parse().ok();
                }
                _ => {}
            }
        }
        status
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, &self.version) {
            (Some(name), Some(version)) => write!(f, "{name} {version}"),
            (Some(name), None) => f.write_str(name),
            (None, _) => f.write_str("unknown eID Client"),
        }
    }
}

/// Screens the client can be asked to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiAction {
    Settings,
    PinManagement,
}

impl UiAction {
    #[must_use]
    pub const fn query(self) -> &'static str {
        match self {
            Self::Settings => "ShowUI=Settings",
            Self::PinManagement => "ShowUI=PINManagement",
        }
    }
}

/// Client for `<client-url>/eID-Client`.
#[derive(Debug, Clone)]
pub struct ClientApi {
    endpoint: Url,
    http: Client,
}

impl ClientApi {
    /// # Errors
    /// Returns an error if `base` cannot carry a path or the HTTP client fails to build.
    pub fn new(base: &Url) -> Result<Self, StatusError> {
        let endpoint = base.join(CLIENT_PATH)?;
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StatusError::Client(e.to_string()))?;
        Ok(Self { endpoint, http })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// `eID-Client?tcTokenURL=<url>`, the entry point of the legacy flow.
    #[must_use]
    pub fn auth_url(&self, tc_token_url: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("tcTokenURL", tc_token_url);
        url
    }

    fn with_query(&self, query: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.set_query(Some(query));
        url
    }

    /// # Errors
    /// Returns `StatusError::Unreachable` if the client does not answer.
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    pub async fn status(&self, cancel: &CancellationToken) -> Result<ClientStatus, StatusError> {
        let body = self.get(self.with_query("Status"), cancel).await?;
        let status = ClientStatus::parse(&body);
        debug!("client status: {:?}", status);
        Ok(status)
    }

    /// # Errors
    /// Returns `StatusError::Unreachable` if the client does not answer.
    #[instrument(skip_all, fields(action = ?action))]
    pub async fn show_ui(
        &self,
        action: UiAction,
        cancel: &CancellationToken,
    ) -> Result<(), StatusError> {
        self.get(self.with_query(action.query()), cancel).await?;
        Ok(())
    }

    async fn get(&self, url: Url, cancel: &CancellationToken) -> Result<String, StatusError> {
        let unreachable = |reason: String| StatusError::Unreachable {
            url: url.to_string(),
            reason,
        };

        let request = async {
            let response = self
                .http
                .get(url.clone())
                .send()
                .await
                .map_err(|e| unreachable(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(StatusError::Rejected {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            response.text().await.map_err(|e| unreachable(e.to_string()))
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(StatusError::Cancelled),
            result = request => result,
        }
    }
}
