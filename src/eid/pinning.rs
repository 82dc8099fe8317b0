//! Public key pinning for connections to the trusted issuer.
//!
//! The anchor is a SubjectPublicKeyInfo stored as DER or PEM. The TLS verifier first
//! runs regular WebPKI validation and then requires the server's end-entity key to be
//! the anchor. Only hops to the trusted issuer get this configuration.

use base64ct::{Base64, Encoding};
use rustls::{
    client::{
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        WebPkiServerVerifier,
    },
    crypto::CryptoProvider,
    pki_types::{CertificateDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};
use x509_parser::prelude::{FromDer, SubjectPublicKeyInfo, X509Certificate};

const PEM_BEGIN: &str = "-----BEGIN PUBLIC KEY-----";
const PEM_END: &str = "-----END PUBLIC KEY-----";

#[derive(Debug, Error)]
pub enum PinningError {
    #[error("cannot read pin anchor {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("pin anchor is not a DER or PEM encoded public key")]
    Format,
    #[error("TLS configuration failed: {0}")]
    Tls(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct PinAnchor {
    spki: Vec<u8>,
}

impl std::fmt::Debug for PinAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinAnchor")
            .field("spki_len", &self.spki.len())
            .finish()
    }
}

impl PinAnchor {
    /// Parse a DER or PEM encoded SubjectPublicKeyInfo.
    ///
    /// # Errors
    /// Returns `PinningError::Format` if the bytes hold neither.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PinningError> {
        let der = match std::str::from_utf8(bytes) {
            Ok(text) if text.trim_start().starts_with(PEM_BEGIN) => decode_pem(text)?,
            _ => bytes.to_vec(),
        };

        match SubjectPublicKeyInfo::from_der(&der) {
            Ok((rest, _)) if rest.is_empty() => Ok(Self { spki: der }),
            _ => Err(PinningError::Format),
        }
    }

    /// # Errors
    /// Returns an error if the file cannot be read or does not hold a public key.
    pub fn load(path: &Path) -> Result<Self, PinningError> {
        let bytes = fs::read(path).map_err(|source| PinningError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let anchor = Self::from_bytes(&bytes)?;
        debug!("loaded pin anchor from {}", path.display());
        Ok(anchor)
    }

    #[must_use]
    pub fn spki(&self) -> &[u8] {
        &self.spki
    }

    /// Whether the certificate carries the pinned public key.
    #[must_use]
    pub fn matches_certificate(&self, certificate_der: &[u8]) -> bool {
        match X509Certificate::from_der(certificate_der) {
            Ok((_, certificate)) => {
                let presented = certificate.public_key().raw;
                presented.len() == self.spki.len() && bool::from(presented.ct_eq(&self.spki))
            }
            Err(e) => {
                warn!("cannot parse server certificate: {}", e);
                false
            }
        }
    }

    /// TLS client configuration that validates against the Mozilla roots and the pin.
    ///
    /// # Errors
    /// Returns `PinningError::Tls` if rustls rejects the configuration.
    pub fn client_config(&self) -> Result<ClientConfig, PinningError> {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        self.client_config_with_roots(roots)
    }

    /// Same as [`client_config`](Self::client_config) with a caller supplied root store.
    ///
    /// # Errors
    /// Returns `PinningError::Tls` if rustls rejects the configuration.
    pub fn client_config_with_roots(
        &self,
        roots: RootCertStore,
    ) -> Result<ClientConfig, PinningError> {
        let provider: Arc<CryptoProvider> = Arc::new(rustls::crypto::ring::default_provider());

        let webpki = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .map_err(|e| PinningError::Tls(e.to_string()))?;

        let verifier = PinnedVerifier {
            webpki,
            anchor: self.clone(),
        };

        Ok(ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| PinningError::Tls(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth())
    }
}

fn decode_pem(text: &str) -> Result<Vec<u8>, PinningError> {
    let body: String = text
        .lines()
        .map(str::trim)
        .skip_while(|line| *line != PEM_BEGIN)
        .skip(1)
        .take_while(|line| *line != PEM_END)
        .collect();
    Base64::decode_vec(&body).map_err(|_| PinningError::Format)
}

#[derive(Debug)]
struct PinnedVerifier {
    webpki: Arc<WebPkiServerVerifier>,
    anchor: PinAnchor,
}

impl ServerCertVerifier for PinnedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let verified = self.webpki.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        )?;

        if self.anchor.matches_certificate(end_entity.as_ref()) {
            Ok(verified)
        } else {
            warn!("server public key for {:?} does not match the pin anchor", server_name);
            Err(rustls::Error::General(
                "server public key does not match pin anchor".to_string(),
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.webpki.supported_verify_schemes()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn self_signed() -> rcgen::CertifiedKey {
        rcgen::generate_simple_self_signed(vec!["www.autentapp.de".to_string()]).unwrap()
    }

    #[test]
    fn der_anchor_matches_its_certificate() {
        let issuer = self_signed();
        let anchor = PinAnchor::from_bytes(&issuer.key_pair.public_key_der()).unwrap();
        assert!(anchor.matches_certificate(issuer.cert.der()));
    }

    #[test]
    fn pem_anchor_matches_its_certificate() {
        let issuer = self_signed();
        let pem = issuer.key_pair.public_key_pem();
        let anchor = PinAnchor::from_bytes(pem.as_bytes()).unwrap();
        assert_eq!(anchor.spki(), issuer.key_pair.public_key_der().as_slice());
        assert!(anchor.matches_certificate(issuer.cert.der()));
    }

    #[test]
    fn other_key_does_not_match() {
        let issuer = self_signed();
        let impostor = self_signed();
        let anchor = PinAnchor::from_bytes(&issuer.key_pair.public_key_der()).unwrap();
        assert!(!anchor.matches_certificate(impostor.cert.der()));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            PinAnchor::from_bytes(b"not a key"),
            Err(PinningError::Format)
        ));
        assert!(matches!(
            PinAnchor::from_bytes(b"-----BEGIN PUBLIC KEY-----\n!!!\n-----END PUBLIC KEY-----\n"),
            Err(PinningError::Format)
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let issuer = self_signed();
        let mut der = issuer.key_pair.public_key_der();
        der.push(0);
        assert!(PinAnchor::from_bytes(&der).is_err());
    }

    #[test]
    fn unparsable_certificate_never_matches() {
        let issuer = self_signed();
        let anchor = PinAnchor::from_bytes(&issuer.key_pair.public_key_der()).unwrap();
        assert!(!anchor.matches_certificate(b"\x30\x03\x02\x01\x00"));
    }

    #[test]
    fn builds_a_client_config() {
        let issuer = self_signed();
        let anchor = PinAnchor::from_bytes(&issuer.key_pair.public_key_der()).unwrap();
        assert!(anchor.client_config().is_ok());
    }

    #[test]
    fn load_reports_missing_file() {
        let missing = std::env::temp_dir().join("eid-login-no-such-anchor");
        assert!(matches!(
            PinAnchor::load(&missing),
            Err(PinningError::Read { .. })
        ));
    }
}
