//! Content decryption module capability.
//!
//! The CDM is consumed as an opaque service: open a session, build a
//! license challenge for a protection header, feed back the license, read
//! the keys, close the session. Key derivation never happens in this crate.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::pssh::Pssh;
use crate::error::Result;

/// Key type carrying the media decryption key.
pub const CONTENT_KEY_TYPE: &str = "CONTENT";

/// Opaque CDM session handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A key returned by the CDM after a license has been parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    /// Key id.
    pub kid: Vec<u8>,
    /// "CONTENT", "SIGNING", …
    pub key_type: String,
    pub key: Vec<u8>,
}

impl Key {
    pub fn is_content(&self) -> bool {
        self.key_type == CONTENT_KEY_TYPE
    }

    /// Key bytes as lowercase hex, the form the remux tools expect.
    pub fn key_hex(&self) -> String {
        hex::encode(&self.key)
    }
}

/// License-exchange capability of a CDM.
#[async_trait]
pub trait Cdm: Send + Sync {
    /// Open a new session.
    async fn open(&self) -> Result<SessionId>;

    /// Build a license challenge for `pssh`.
    async fn get_license_challenge(&self, session: &SessionId, pssh: &Pssh) -> Result<Vec<u8>>;

    /// Feed a license blob (base64, as returned by the license endpoint).
    async fn parse_license(&self, session: &SessionId, license: &str) -> Result<()>;

    /// Keys loaded into the session.
    async fn get_keys(&self, session: &SessionId) -> Result<Vec<Key>>;

    /// Release the session.
    async fn close(&self, session: &SessionId) -> Result<()>;
}
