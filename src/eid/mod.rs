//! Authentication against a local eID client.
//!
//! [`Orchestrator`] ties the pieces together:
//!
//! 1. pick the flow, by asking the client for its version unless forced,
//! 2. obtain the URL of the identity response, from a [`session`] with the client
//!    (WebSocket flow) or from the client's `tcTokenURL` entry point (legacy flow),
//! 3. fetch it through [`verify::Fetcher`] and either record it as the reference
//!    (enrollment) or compare it against the reference (verification).

pub mod channel;
pub mod error;
pub mod identity;
pub mod interaction;
pub mod marker;
pub mod pinning;
pub mod session;
pub mod status;
pub mod trust;
pub mod url;
pub mod verify;

pub use self::error::{Error, ErrorKind};

use self::{
    identity::IdentitySummary,
    interaction::Interaction,
    marker::SUCCESS_MARKER,
    session::SessionConfig,
    status::{ClientApi, ClientStatus, ClientVersion, UiAction},
    trust::TrustStore,
    verify::{Comparator, FetchReport, Fetcher, Mode, Recorder},
};
use ::url::Url;
use std::{fmt, io::BufReader, path::PathBuf, str::FromStr, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub const DEFAULT_CLIENT_URL: &str = "http://127.0.0.1:24727";
pub const DEFAULT_KERNEL_URL: &str = "ws://127.0.0.1:24727/eID-Kernel";
pub const DEFAULT_TC_TOKEN_URL: &str =
    "https://www.autentapp.de/AusweisAuskunft/WebServiceRequesterServlet?mode=xml";
pub const DEFAULT_TRUSTED_ISSUER: &str = "www.autentapp.de";
pub const DEFAULT_WEBSOCKET_MIN_VERSION: ClientVersion = ClientVersion::new(1, 16, 0);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Final answer of an authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Success,
    /// The response did not match the reference, or the client misbehaved.
    Denied,
    /// The eID client could not be reached, or nothing is enrolled.
    Unavailable,
}

impl AuthOutcome {
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Denied => 1,
            Self::Unavailable => 2,
        }
    }
}

impl fmt::Display for AuthOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Denied => "denied",
            Self::Unavailable => "unavailable",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    #[default]
    Auto,
    Legacy,
    WebSocket,
}

impl Flow {
    pub const VARIANTS: [&'static str; 3] = ["auto", "legacy", "websocket"];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Legacy => "legacy",
            Self::WebSocket => "websocket",
        }
    }
}

impl FromStr for Flow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "legacy" => Ok(Self::Legacy),
            "websocket" | "ws" => Ok(Self::WebSocket),
            other => Err(format!("unknown flow {other:?}")),
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub client_url: String,
    pub kernel_url: String,
    pub tc_token_url: String,
    pub trust_dir: PathBuf,
    pub trusted_issuer: String,
    pub flow: Flow,
    pub websocket_min_version: ClientVersion,
    pub poll_interval: Duration,
    /// Bound for each prompt; `None` waits as long as the user takes.
    pub interaction_timeout: Option<Duration>,
    pub max_redirects: usize,
    /// Accept the trusted issuer over plain `http`. Not reachable from the CLI;
    /// loopback test issuers only.
    pub allow_plain_http: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_url: DEFAULT_CLIENT_URL.to_string(),
            kernel_url: DEFAULT_KERNEL_URL.to_string(),
            tc_token_url: DEFAULT_TC_TOKEN_URL.to_string(),
            trust_dir: trust::home_trust_dir().unwrap_or_else(|| PathBuf::from(trust::TRUST_DIR_NAME)),
            trusted_issuer: DEFAULT_TRUSTED_ISSUER.to_string(),
            flow: Flow::Auto,
            websocket_min_version: DEFAULT_WEBSOCKET_MIN_VERSION,
            poll_interval: DEFAULT_POLL_INTERVAL,
            interaction_timeout: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            allow_plain_http: false,
        }
    }
}

/// Result of a successful enrollment.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub reference: PathBuf,
    pub identity: IdentitySummary,
    pub report: FetchReport,
}

#[derive(Debug)]
pub struct Orchestrator {
    config: Config,
    kernel_url: Url,
    client: ClientApi,
    trust: TrustStore,
}

impl Orchestrator {
    /// # Errors
    /// Returns `Error::Config` if one of the configured URLs does not parse.
    pub fn new(config: Config) -> Result<Self, Error> {
        let parse = |setting: &'static str, value: &str| {
            Url::parse(value).map_err(|e| Error::Config {
                setting,
                reason: format!("{value:?}: {e}"),
            })
        };

        let client_url = parse("client URL", &config.client_url)?;
        let kernel_url = parse("kernel URL", &config.kernel_url)?;
        parse("TC token URL", &config.tc_token_url)?;

        Ok(Self {
            client: ClientApi::new(&client_url)?,
            trust: TrustStore::new(config.trust_dir.clone()),
            kernel_url,
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn trust_store(&self) -> &TrustStore {
        &self.trust
    }

    /// # Errors
    /// Returns an error if the client cannot be reached.
    pub async fn client_status(&self, cancel: &CancellationToken) -> Result<ClientStatus, Error> {
        Ok(self.client.status(cancel).await?)
    }

    /// # Errors
    /// Returns an error if the client cannot be reached.
    pub async fn show_ui(&self, action: UiAction, cancel: &CancellationToken) -> Result<(), Error> {
        Ok(self.client.show_ui(action, cancel).await?)
    }

    /// Resolve [`Flow::Auto`] into a concrete flow.
    ///
    /// # Errors
    /// Returns an error if the status query fails.
    pub async fn select_flow(&self, cancel: &CancellationToken) -> Result<Flow, Error> {
        if self.config.flow != Flow::Auto {
            return Ok(self.config.flow);
        }

        let status = self.client_status(cancel).await?;
        let flow = match status.version {
            Some(version) if version >= self.config.websocket_min_version => Flow::WebSocket,
            _ => Flow::Legacy,
        };
        info!("connected to {}, using {} flow", status, flow);
        Ok(flow)
    }

    /// URL whose response is the identity data to verify.
    ///
    /// # Errors
    /// Session failures, or a URL from the client that does not split.
    pub async fn target_url(
        &self,
        flow: Flow,
        interaction: &dyn Interaction,
        cancel: &CancellationToken,
    ) -> Result<Url, Error> {
        match flow {
            Flow::Legacy => Ok(self.client.auth_url(&self.config.tc_token_url)),
            Flow::WebSocket | Flow::Auto => {
                let session = SessionConfig {
                    kernel_url: self.kernel_url.clone(),
                    tc_token_url: self.config.tc_token_url.clone(),
                    poll_interval: self.config.poll_interval,
                    interaction_timeout: self.config.interaction_timeout,
                };
                let reported = session::run_auth(&session, interaction, cancel).await?;
                let split = url::split(&reported)?;
                info!("eID client reported {}", split);
                Ok(split.to_url()?)
            }
        }
    }

    fn fetcher(&self) -> Result<Fetcher, Error> {
        let anchor = self.trust.pin_anchor()?;
        if anchor.is_none() {
            warn!(
                "no pin anchor at {}, {} is not pinned",
                self.trust.pin_path().display(),
                self.config.trusted_issuer
            );
        }
        Ok(Fetcher::new(
            self.config.trusted_issuer.clone(),
            anchor.as_ref(),
            self.config.max_redirects,
        )?
        .allow_plain_http(self.config.allow_plain_http))
    }

    async fn run(
        &self,
        mode: Mode,
        interaction: &dyn Interaction,
        cancel: &CancellationToken,
    ) -> Result<(FetchReport, Option<PathBuf>), Error> {
        // fail before the user is prompted if nothing can be compared
        let reference = match mode {
            Mode::Compare => Some(self.trust.open_reference()?),
            Mode::Record => None,
        };
        let fetcher = self.fetcher()?;

        let flow = self.select_flow(cancel).await?;
        let target = self.target_url(flow, interaction, cancel).await?;

        match reference {
            Some(reference) => {
                let mut comparator = Comparator::new(BufReader::new(reference), SUCCESS_MARKER);
                let report = fetcher.fetch(target, &mut comparator, cancel).await?;
                Ok((report, None))
            }
            None => {
                let pending = self.trust.begin_record()?;
                let mut recorder = Recorder::new(pending, SUCCESS_MARKER);
                let report = fetcher.fetch(target, &mut recorder, cancel).await?;
                let stored = recorder.into_inner().commit()?;
                Ok((report, Some(stored)))
            }
        }
    }

    /// Compare a fresh identity response against the enrolled reference.
    ///
    /// # Errors
    /// Every failure; [`Error::outcome`] maps it to `Denied` or `Unavailable`.
    #[instrument(skip_all, fields(trust_dir = %self.trust.dir().display()))]
    pub async fn verify(
        &self,
        interaction: &dyn Interaction,
        cancel: &CancellationToken,
    ) -> Result<FetchReport, Error> {
        let (report, _) = self.run(Mode::Compare, interaction, cancel).await?;
        info!("identity matches the enrolled reference");
        Ok(report)
    }

    /// [`verify`](Self::verify) collapsed into an [`AuthOutcome`].
    pub async fn authenticate(
        &self,
        interaction: &dyn Interaction,
        cancel: &CancellationToken,
    ) -> AuthOutcome {
        match self.verify(interaction, cancel).await {
            Ok(_) => AuthOutcome::Success,
            Err(e) => {
                warn!("authentication failed ({}): {}", e.kind(), e);
                e.outcome()
            }
        }
    }

    /// Record a fresh identity response as the new reference.
    ///
    /// # Errors
    /// Every failure; an existing reference is left untouched.
    #[instrument(skip_all, fields(trust_dir = %self.trust.dir().display()))]
    pub async fn enroll(
        &self,
        interaction: &dyn Interaction,
        cancel: &CancellationToken,
    ) -> Result<Enrollment, Error> {
        let (report, stored) = self.run(Mode::Record, interaction, cancel).await?;
        let reference = stored.unwrap_or_else(|| self.trust.reference_path());

        let identity = IdentitySummary::from_file(&reference).unwrap_or_else(|e| {
            warn!("cannot summarize {}: {}", reference.display(), e);
            IdentitySummary::default()
        });

        Ok(Enrollment {
            reference,
            identity,
            report,
        })
    }
}
