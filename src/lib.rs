//! # eid-login (local login backed by a national eID client)
//!
//! `eid-login` authenticates a local user by delegating to an AusweisApp2-compatible
//! eID client listening on loopback, then checking that the identity artifact the
//! client produces matches a previously enrolled reference.
//!
//! ## Flow Overview
//!
//! 1. The [`eid::session`] engine drives the eID client over its `eid` WebSocket
//!    (`RUN_AUTH`, access rights, PIN/CAN entry, card insertion) until the client
//!    reports the final URL.
//! 2. The URL is decomposed by [`eid::url::split`].
//! 3. The [`eid::verify`] engine fetches it, following redirects by hand so that
//!    certificate pinning applies only to hops towards the trusted issuer, and
//!    streams the body into one of two strategies:
//!    - **RECORD** (enrollment): the bytes become the reference artifact.
//!    - **COMPARE** (login): the bytes must equal the reference, contain the
//!      success marker, and consume the reference completely.
//!
//! Older eID clients without the WebSocket interface use the legacy flow, where the
//! client's own HTTP endpoint redirects to the issuer and step 1 is skipped.
//!
//! ## Trust-on-first-use
//!
//! The first successful fetch is stored verbatim under the user's trust directory.
//! Every later login must reproduce it byte-for-byte. A byte-identical prefix of
//! the reference is rejected.

pub mod cli;
pub mod eid;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
