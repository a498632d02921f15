//! Per-track decryption key acquisition.
//!
//! Each call walks `Idle → SessionOpen → ChallengeBuilt → LicenseAcquired →
//! KeyExtracted → Closed` with a fresh CDM session. The session is closed
//! exactly once on every exit path.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, warn};

use super::cdm::{Cdm, SessionId};
use super::pssh::Pssh;
use crate::api::PlaybackClient;
use crate::error::{AmdlError, Result};

/// Progress of a single key acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseState {
    Idle,
    SessionOpen,
    ChallengeBuilt,
    LicenseAcquired,
    KeyExtracted,
    Closed,
}

/// Obtains the license blob for a challenge. Implemented by the playback
/// client; tests substitute their own.
#[async_trait::async_trait]
pub trait LicenseExchange: Send + Sync {
    async fn exchange(&self, track_id: &str, track_uri: &str, challenge: &str) -> Result<String>;
}

#[async_trait::async_trait]
impl LicenseExchange for PlaybackClient {
    async fn exchange(&self, track_id: &str, track_uri: &str, challenge: &str) -> Result<String> {
        self.get_license(track_id, track_uri, challenge).await
    }
}

/// Turns a protection header into a hex content key.
pub struct DecryptionKeyProvider {
    cdm: Arc<dyn Cdm>,
    license: Arc<dyn LicenseExchange>,
}

impl DecryptionKeyProvider {
    pub fn new(cdm: Arc<dyn Cdm>, license: Arc<dyn LicenseExchange>) -> Self {
        Self { cdm, license }
    }

    /// Hex-encoded `CONTENT` key for `track_id`.
    ///
    /// `key_uri` is the full key URI from the stream playlist; it is sent
    /// as-is to the license endpoint and its last comma-separated field is
    /// the protection header.
    pub async fn get_decryption_key(&self, key_uri: &str, track_id: &str) -> Result<String> {
        self.run(key_uri, track_id).await.0
    }

    /// Key acquisition plus the state it ended in: `Idle` when the session
    /// never opened, `Closed` otherwise.
    async fn run(&self, key_uri: &str, track_id: &str) -> (Result<String>, LicenseState) {
        let mut state = LicenseState::Idle;
        let pssh = match Pssh::from_key_uri(key_uri) {
            Ok(pssh) => pssh,
            Err(e) => return (Err(e), state),
        };
        let session = match self.cdm.open().await {
            Ok(session) => session,
            Err(e) => return (Err(e), state),
        };
        state = LicenseState::SessionOpen;
        debug!(track_id, session = %session, "CDM session opened");

        let result = self
            .acquire(&session, &pssh, key_uri, track_id, &mut state)
            .await;

        match self.cdm.close(&session).await {
            Ok(()) => debug!(track_id, reached = ?state, "CDM session closed"),
            Err(e) => warn!(track_id, error = %e, "Failed to close CDM session"),
        }
        state = LicenseState::Closed;

        (result, state)
    }

    async fn acquire(
        &self,
        session: &SessionId,
        pssh: &Pssh,
        key_uri: &str,
        track_id: &str,
        state: &mut LicenseState,
    ) -> Result<String> {
        let challenge = self.cdm.get_license_challenge(session, pssh).await?;
        *state = LicenseState::ChallengeBuilt;

        let license = self
            .license
            .exchange(track_id, key_uri, &STANDARD.encode(challenge))
            .await?;
        *state = LicenseState::LicenseAcquired;

        self.cdm.parse_license(session, &license).await?;
        let key = self
            .cdm
            .get_keys(session)
            .await?
            .into_iter()
            .find(|k| k.is_content())
            .ok_or_else(|| AmdlError::License(format!("no CONTENT key for track {}", track_id)))?;
        *state = LicenseState::KeyExtracted;

        Ok(key.key_hex())
    }
}
