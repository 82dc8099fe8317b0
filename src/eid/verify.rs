//! Streaming verification of the identity response.
//!
//! [`Fetcher`] follows redirects by hand so the pin anchor is applied only to hops
//! whose host is the trusted issuer. The issuer is only trusted over `https`; a
//! plain `http` hop to it ends the fetch. The body of the terminal response is fed chunk
//! by chunk to a [`Verification`]:
//!
//! - [`Recorder`] stores every byte and looks for the success marker (enrollment).
//! - [`Comparator`] matches every byte against the enrolled reference, looks for the
//!   marker in matched data and finally requires the reference to be exhausted.
//!
//! A mismatch is permanent for the rest of the fetch; remaining chunks are drained.

use crate::{
    eid::{
        marker::MarkerScanner,
        pinning::{PinAnchor, PinningError},
    },
    APP_USER_AGENT,
};
use reqwest::{header::LOCATION, redirect::Policy, Client, StatusCode};
use std::{
    fmt,
    io::{self, Read, Write},
};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Which strategy a fetch feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Record,
    Compare,
}

/// Why a response was not accepted. Only for logs, never shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchKind {
    ContentDiffers,
    MarkerMissing,
    ReferenceNotConsumed,
    ReferenceExhausted,
    UntrustedSource,
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ContentDiffers => "response differs from the reference",
            Self::MarkerMissing => "success marker missing",
            Self::ReferenceNotConsumed => "reference is longer than the response",
            Self::ReferenceExhausted => "response is longer than the reference",
            Self::UntrustedSource => "response not served by the trusted issuer",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("verification failed: {0}")]
    Mismatch(MismatchKind),
    #[error("cannot build HTTP client: {0}")]
    Client(String),
    #[error("cannot fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("more than {0} redirects")]
    TooManyRedirects(usize),
    #[error("invalid redirect from {from}: {reason}")]
    BadRedirect { from: String, reason: String },
    #[error(transparent)]
    Pinning(#[from] PinningError),
    #[error("reference I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("fetch cancelled")]
    Cancelled,
}

/// A strategy consuming the terminal response body.
pub trait Verification: Send {
    /// # Errors
    /// Only I/O failures; mismatches are reported by [`finish`](Self::finish).
    fn consume(&mut self, chunk: &[u8]) -> Result<(), VerifyError>;

    /// # Errors
    /// Returns `VerifyError::Mismatch` unless the stream was accepted.
    fn finish(&mut self) -> Result<(), VerifyError>;
}

/// Appends every chunk to `sink` and watches for the marker.
#[derive(Debug)]
pub struct Recorder<W> {
    sink: W,
    scanner: MarkerScanner,
    written: u64,
}

impl<W: Write + Send> Recorder<W> {
    pub fn new(sink: W, marker: &str) -> Self {
        Self {
            sink,
            scanner: MarkerScanner::new(marker),
            written: 0,
        }
    }

    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write + Send> Verification for Recorder<W> {
    fn consume(&mut self, chunk: &[u8]) -> Result<(), VerifyError> {
        self.sink.write_all(chunk)?;
        self.written += chunk.len() as u64;
        self.scanner.feed(chunk);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), VerifyError> {
        self.sink.flush()?;
        if self.scanner.found() {
            debug!("recorded {} bytes", self.written);
            Ok(())
        } else {
            Err(VerifyError::Mismatch(MismatchKind::MarkerMissing))
        }
    }
}

/// Compares the stream against `reference` byte for byte.
#[derive(Debug)]
pub struct Comparator<R> {
    reference: R,
    scanner: MarkerScanner,
    mismatch: Option<MismatchKind>,
    slice: Vec<u8>,
}

impl<R: Read + Send> Comparator<R> {
    pub fn new(reference: R, marker: &str) -> Self {
        Self {
            reference,
            scanner: MarkerScanner::new(marker),
            mismatch: None,
            slice: Vec::new(),
        }
    }

    /// Read up to `len` bytes, stopping early only at end of file.
    fn next_slice(&mut self, len: usize) -> io::Result<&[u8]> {
        self.slice.resize(len, 0);
        let mut filled = 0;
        while filled < len {
            match self.reference.read(&mut self.slice[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(&self.slice[..filled])
    }
}

impl<R: Read + Send> Verification for Comparator<R> {
    fn consume(&mut self, chunk: &[u8]) -> Result<(), VerifyError> {
        if self.mismatch.is_some() || chunk.is_empty() {
            return Ok(());
        }

        let expected = self.next_slice(chunk.len())?;
        let verdict = if expected.len() < chunk.len() {
            Some(MismatchKind::ReferenceExhausted)
        } else if bool::from(expected.ct_eq(chunk)) {
            None
        } else {
            Some(MismatchKind::ContentDiffers)
        };

        match verdict {
            Some(kind) => self.mismatch = Some(kind),
            None => {
                self.scanner.feed(chunk);
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), VerifyError> {
        if let Some(kind) = self.mismatch {
            return Err(VerifyError::Mismatch(kind));
        }
        if !self.next_slice(1)?.is_empty() {
            self.mismatch = Some(MismatchKind::ReferenceNotConsumed);
            return Err(VerifyError::Mismatch(MismatchKind::ReferenceNotConsumed));
        }
        if !self.scanner.found() {
            return Err(VerifyError::Mismatch(MismatchKind::MarkerMissing));
        }
        Ok(())
    }
}

/// Where the terminal response came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub final_url: Url,
    pub status: StatusCode,
    pub redirects: usize,
}

/// HTTP client following redirects manually with per-hop pinning.
#[derive(Debug, Clone)]
pub struct Fetcher {
    plain: Client,
    pinned: Option<Client>,
    trusted_issuer: String,
    max_redirects: usize,
    allow_plain_http: bool,
}

impl Fetcher {
    /// # Errors
    /// Returns an error if an HTTP client cannot be built.
    pub fn new(
        trusted_issuer: impl Into<String>,
        anchor: Option<&PinAnchor>,
        max_redirects: usize,
    ) -> Result<Self, VerifyError> {
        let pinned = match anchor {
            Some(anchor) => Some(build_client(Some(anchor.client_config()?))?),
            None => None,
        };
        Ok(Self {
            plain: build_client(None)?,
            pinned,
            trusted_issuer: trusted_issuer.into(),
            max_redirects,
            allow_plain_http: false,
        })
    }

    /// Accept the trusted issuer over plain `http`. Only meant for loopback
    /// issuers in tests; a pinned issuer still requires `https`.
    #[must_use]
    pub fn allow_plain_http(mut self, allow: bool) -> Self {
        self.allow_plain_http = allow;
        self
    }

    fn is_issuer_host(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(&self.trusted_issuer))
    }

    /// Host is the trusted issuer and the hop is encrypted.
    #[must_use]
    pub fn is_trusted(&self, url: &Url) -> bool {
        self.is_issuer_host(url) && (url.scheme() == "https" || self.allow_plain_http)
    }

    #[must_use]
    pub const fn is_pinning(&self) -> bool {
        self.pinned.is_some()
    }

    /// Fetch `url` and stream the terminal body into `verification`.
    ///
    /// # Errors
    /// Transport failures, redirect problems, untrusted terminal hops, cancellation
    /// and whatever `verification` rejects.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(
        &self,
        url: Url,
        verification: &mut dyn Verification,
        cancel: &CancellationToken,
    ) -> Result<FetchReport, VerifyError> {
        let mut current = url;
        let mut redirects = 0;

        loop {
            let encrypted = current.scheme() == "https";
            if self.is_issuer_host(&current)
                && !encrypted
                && (self.pinned.is_some() || !self.allow_plain_http)
            {
                warn!("refusing unencrypted hop to trusted issuer {}", current);
                return Err(VerifyError::Mismatch(MismatchKind::UntrustedSource));
            }

            let trusted = self.is_trusted(&current);
            let client = match (&self.pinned, trusted) {
                (Some(pinned), true) => {
                    debug!("pinning {}", current);
                    pinned
                }
                _ => &self.plain,
            };

            let response = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(VerifyError::Cancelled),
                sent = client.get(current.clone()).send() => sent.map_err(|e| VerifyError::Fetch {
                    url: current.to_string(),
                    reason: e.to_string(),
                })?,
            };
            let status = response.status();

            if status.is_redirection() {
                if let Some(location) = response.headers().get(LOCATION) {
                    redirects += 1;
                    if redirects > self.max_redirects {
                        return Err(VerifyError::TooManyRedirects(self.max_redirects));
                    }

                    let bad_redirect = |reason: String| VerifyError::BadRedirect {
                        from: current.to_string(),
                        reason,
                    };
                    let location = location
                        .to_str()
                        .map_err(|e| bad_redirect(e.to_string()))?;
                    let next = current
                        .join(location)
                        .map_err(|e| bad_redirect(e.to_string()))?;

                    debug!("{} redirects to {}", status, next);
                    current = next;
                    continue;
                }
                warn!("{} without Location, treating as final", status);
            }

            if redirects > 0 && !trusted {
                warn!("final hop {} is not the trusted issuer", current);
                return Err(VerifyError::Mismatch(MismatchKind::UntrustedSource));
            }
            if !status.is_success() {
                warn!("final response status {}", status);
            }

            let mut response = response;
            let mut received: u64 = 0;
            loop {
                let chunk = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(VerifyError::Cancelled),
                    chunk = response.chunk() => chunk.map_err(|e| VerifyError::Fetch {
                        url: current.to_string(),
                        reason: e.to_string(),
                    })?,
                };
                let Some(chunk) = chunk else { break };
                received += chunk.len() as u64;
                verification.consume(&chunk)?;
            }

            verification.finish()?;
            info!("verified {} bytes from {}", received, current);

            return Ok(FetchReport {
                final_url: current,
                status,
                redirects,
            });
        }
    }
}

fn build_client(tls: Option<rustls::ClientConfig>) -> Result<Client, VerifyError> {
    let builder = Client::builder()
        .user_agent(APP_USER_AGENT)
        .redirect(Policy::none());
    let builder = match tls {
        Some(config) => builder.use_preconfigured_tls(config),
        None => builder,
    };
    builder
        .build()
        .map_err(|e| VerifyError::Client(e.to_string()))
}
