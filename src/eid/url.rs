//! Decompose the URL reported by the eID client into scheme, host, port and path.
//!
//! The eID client hands back whatever the issuer told it, so the splitter is
//! deliberately lenient about the scheme (it may be missing) and strict about
//! everything that decides where the next connection goes.

use std::fmt;
use thiserror::Error;
use url::Url;

/// Longest URL accepted from the eID client.
pub const MAX_URL_LEN: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("malformed URL: {0}")]
    MalformedUrl(String),
    #[error("unknown scheme {0:?} and no explicit port")]
    UnknownScheme(Option<String>),
    #[error("URL exceeds {MAX_URL_LEN} bytes ({0} bytes)")]
    TooLong(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitUrl {
    pub scheme: Option<String>,
    pub host: String,
    pub port: u16,
    /// Always starts with `/`; carries the query string, if any.
    pub path: String,
}

impl SplitUrl {
    /// Rebuild an absolute URL for the HTTP client. A missing scheme means plain `http`.
    ///
    /// # Errors
    /// Returns `UrlError::MalformedUrl` if the parts do not form a valid URL.
    pub fn to_url(&self) -> Result<Url, UrlError> {
        let scheme = self.scheme.as_deref().unwrap_or("http");
        Url::parse(&format!("{scheme}://{}:{}{}", self.host, self.port, self.path))
            .map_err(|e| UrlError::MalformedUrl(e.to_string()))
    }
}

impl fmt::Display for SplitUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{scheme}://")?;
        }
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}

fn default_port(scheme: Option<&str>) -> Result<u16, UrlError> {
    match scheme.map(str::to_ascii_lowercase).as_deref() {
        Some("https") => Ok(443),
        Some("http") => Ok(80),
        other => Err(UrlError::UnknownScheme(other.map(ToString::to_string))),
    }
}

/// Split `raw` into its components.
///
/// Without `scheme://` the whole input is host and path. The path starts at the first
/// `/` (or `?`/`#`) after the host and defaults to `/`. A colon in the authority
/// introduces a numeric port; otherwise the port follows from the scheme.
///
/// # Errors
/// `TooLong` above [`MAX_URL_LEN`], `UnknownScheme` if no port can be derived,
/// `MalformedUrl` for an empty host or a non-numeric port.
pub fn split(raw: &str) -> Result<SplitUrl, UrlError> {
    if raw.len() > MAX_URL_LEN {
        return Err(UrlError::TooLong(raw.len()));
    }

    let raw = raw.trim();
    if raw.is_empty() {
        return Err(UrlError::MalformedUrl("empty URL".to_string()));
    }

    let (scheme, rest) = match raw.find("://") {
        Some(idx) => {
            let scheme = &raw[..idx];
            if scheme.is_empty() {
                return Err(UrlError::MalformedUrl("empty scheme".to_string()));
            }
            (Some(scheme.to_string()), &raw[idx + 3..])
        }
        None => (None, raw),
    };

    let (authority, path) = match rest.find(['/', '?', '#']) {
        Some(idx) if rest[idx..].starts_with('/') => (&rest[..idx], rest[idx..].to_string()),
        Some(idx) => (&rest[..idx], format!("/{}", &rest[idx..])),
        None => (rest, "/".to_string()),
    };

    let (host, port) = split_authority(authority)?;
    if host.is_empty() {
        return Err(UrlError::MalformedUrl(format!("no host in {raw:?}")));
    }

    let port = match port {
        Some(port) => port,
        None => default_port(scheme.as_deref())?,
    };

    Ok(SplitUrl {
        scheme,
        host: host.to_string(),
        port,
        path,
    })
}

fn split_authority(authority: &str) -> Result<(&str, Option<u16>), UrlError> {
    // [v6]:port keeps its brackets so the host can be put back into a URL
    let (host, port) = if authority.starts_with('[') {
        let end = authority
            .find(']')
            .ok_or_else(|| UrlError::MalformedUrl(format!("unterminated IPv6 host {authority:?}")))?;
        let (host, tail) = authority.split_at(end + 1);
        match tail.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if tail.is_empty() => (host, None),
            None => {
                return Err(UrlError::MalformedUrl(format!(
                    "unexpected {tail:?} after IPv6 host"
                )))
            }
        }
    } else {
        match authority.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    let port = port
        .map(|p| {
            p.parse::<u16>()
                .map_err(|_| UrlError::MalformedUrl(format!("invalid port {p:?}")))
        })
        .transpose()?;

    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_all_four_components() {
        let url = split("https://www.autentapp.de:8443/AusweisAuskunft/Refresh?x=1").unwrap();
        assert_eq!(url.scheme.as_deref(), Some("https"));
        assert_eq!(url.host, "www.autentapp.de");
        assert_eq!(url.port, 8443);
        assert_eq!(url.path, "/AusweisAuskunft/Refresh?x=1");
    }

    #[test]
    fn default_ports_follow_scheme() {
        assert_eq!(split("https://example.org/a").unwrap().port, 443);
        assert_eq!(split("http://example.org/a").unwrap().port, 80);
        assert_eq!(split("HTTPS://example.org").unwrap().port, 443);
    }

    #[test]
    fn missing_path_defaults_to_root() {
        let url = split("http://127.0.0.1:24727").unwrap();
        assert_eq!(url.path, "/");
        assert_eq!(url.port, 24727);
    }

    #[test]
    fn query_without_path_keeps_query() {
        let url = split("https://example.org?a=b").unwrap();
        assert_eq!(url.host, "example.org");
        assert_eq!(url.path, "/?a=b");
    }

    #[test]
    fn scheme_less_input_needs_a_port() {
        let url = split("127.0.0.1:24727/eID-Client?Status").unwrap();
        assert_eq!(url.scheme, None);
        assert_eq!(url.host, "127.0.0.1");
        assert_eq!(url.path, "/eID-Client?Status");

        assert_eq!(
            split("127.0.0.1/eID-Client"),
            Err(UrlError::UnknownScheme(None))
        );
    }

    #[test]
    fn unknown_scheme_without_port_fails() {
        assert_eq!(
            split("ftp://example.org/file"),
            Err(UrlError::UnknownScheme(Some("ftp".to_string())))
        );
        assert_eq!(split("ftp://example.org:21/file").unwrap().port, 21);
    }

    #[test]
    fn invalid_ports_and_hosts_are_malformed() {
        assert!(matches!(
            split("https://example.org:http/"),
            Err(UrlError::MalformedUrl(_))
        ));
        assert!(matches!(
            split("https://example.org:70000/"),
            Err(UrlError::MalformedUrl(_))
        ));
        assert!(matches!(split("https:///path"), Err(UrlError::MalformedUrl(_))));
        assert!(matches!(split(""), Err(UrlError::MalformedUrl(_))));
    }

    #[test]
    fn ipv6_hosts_keep_brackets() {
        let url = split("http://[::1]:8080/x").unwrap();
        assert_eq!(url.host, "[::1]");
        assert_eq!(url.port, 8080);
        assert_eq!(url.to_url().unwrap().as_str(), "http://[::1]:8080/x");
    }

    #[test]
    fn overlong_input_is_rejected_not_truncated() {
        let long = format!("https://example.org/{}", "a".repeat(MAX_URL_LEN));
        assert_eq!(split(&long), Err(UrlError::TooLong(long.len())));

        let fits = format!("https://example.org/{}", "a".repeat(MAX_URL_LEN - 20));
        let url = split(&fits).unwrap();
        assert_eq!(url.host, "example.org");
        assert_eq!(url.path.len(), MAX_URL_LEN - 19);
    }

    #[test]
    fn rebuilds_a_url_for_the_client() {
        let url = split("https://www.autentapp.de/AusweisAuskunft/Refresh?id=7").unwrap();
        assert_eq!(
            url.to_url().unwrap().as_str(),
            "https://www.autentapp.de/AusweisAuskunft/Refresh?id=7"
        );
        let plain = split("localhost:8080/status").unwrap();
        assert_eq!(plain.to_url().unwrap().as_str(), "http://localhost:8080/status");
    }
}
