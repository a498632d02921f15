//! Webplayback negotiation and license acquisition.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};

use super::session::Session;
use crate::error::{AmdlError, Result};
use crate::retry::network_error;

/// Key system requested from the license endpoint.
pub const KEY_SYSTEM: &str = "com.widevine.alpha";

/// A downloadable asset listed in a webplayback response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    #[serde(default)]
    pub flavor: String,

    #[serde(rename = "URL", default)]
    pub url: String,
}

/// First entry of a webplayback `songList`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Webplayback {
    #[serde(default)]
    pub assets: Vec<Asset>,

    /// Master playlist for music videos.
    #[serde(rename = "hls-playlist-url", default)]
    pub hls_playlist_url: Option<String>,

    #[serde(rename = "hls-key-server-url", default)]
    pub hls_key_server_url: Option<String>,
}

impl Webplayback {
    /// Asset URL for a given flavor.
    pub fn asset_url(&self, flavor: &str) -> Option<&str> {
        self.assets
            .iter()
            .find(|a| a.flavor == flavor)
            .map(|a| a.url.as_str())
    }
}

/// Client for the webplayback and license endpoints.
#[derive(Debug, Clone)]
pub struct PlaybackClient {
    session: Arc<Session>,
}

impl PlaybackClient {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// POST a JSON body and pull `field` out of the response, failing with
    /// `CatalogResponse` when it is absent or empty.
    async fn post_for(&self, url: &str, body: &Value, field: &str) -> Result<Value> {
        let session = &self.session;
        session
            .retry()
            .run(|| async move {
                debug!("POST {}", url);
                let response = session
                    .post(url)
                    .json(body)
                    .send()
                    .await
                    .map_err(network_error(url))?;
                let status = response.status();
                let text = response.text().await.map_err(network_error(url))?;

                let fail = || AmdlError::CatalogResponse {
                    url: url.to_string(),
                    status: status.as_u16(),
                    body: text.chars().take(500).collect(),
                };
                if !status.is_success() {
                    error!("POST {} failed with status {}", url, status);
                    return Err(fail());
                }
                let mut value: Value = serde_json::from_str(&text).map_err(|_| fail())?;
                match value.get_mut(field).map(Value::take) {
                    Some(v) if !is_empty(&v) => Ok(v),
                    _ => Err(fail()),
                }
            })
            .await
    }

    /// Negotiate playback for a track and return the first `songList` entry.
    pub async fn get_webplayback(&self, track_id: &str) -> Result<Webplayback> {
        let url = &self.session.endpoints().webplayback;
        let body = json!({
            "salableAdamId": track_id,
            "language": self.session.language(),
        });
        let song_list = self.post_for(url, &body, "songList").await?;
        let first = song_list
            .as_array()
            .and_then(|l| l.first())
            .cloned()
            .ok_or_else(|| AmdlError::CatalogResponse {
                url: url.clone(),
                status: 200,
                body: "empty songList".to_string(),
            })?;
        Ok(serde_json::from_value(first)?)
    }

    /// Exchange a base64 license challenge for a base64 license blob.
    pub async fn get_license(&self, track_id: &str, track_uri: &str, challenge: &str) -> Result<String> {
        let url = &self.session.endpoints().license;
        let body = json!({
            "challenge": challenge,
            "key-system": KEY_SYSTEM,
            "uri": track_uri,
            "adamId": track_id,
            "isLibrary": false,
            "user-initiated": true,
        });
        let license = self.post_for(url, &body, "license").await?;
        license
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AmdlError::License(format!("license for {} is not a string", track_id)))
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
