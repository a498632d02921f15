//! CDM backed by a remote CDM HTTP service.
//!
//! The service exposes one route family per provisioned device:
//! `/{device}/open`, `/{device}/get_license_challenge/{type}`,
//! `/{device}/parse_license`, `/{device}/get_keys/{type}` and
//! `/{device}/close/{session}`. Every request carries `X-Secret-Key`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::cdm::{Cdm, Key, SessionId};
use super::pssh::Pssh;
use crate::config::CdmConfig;
use crate::error::{AmdlError, Result};
use crate::retry::{network_error, RetryPolicy};

/// Device used when none is configured; the service resolves it to its
/// built-in device.
pub const DEFAULT_DEVICE: &str = "default";

const LICENSE_TYPE: &str = "STREAMING";

const SECRET_HEADER: &str = "X-Secret-Key";

#[derive(Debug, Deserialize)]
struct Envelope {
    status: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct RemoteKey {
    key_id: String,
    key: String,
    #[serde(rename = "type")]
    key_type: String,
}

/// Remote CDM client.
#[derive(Debug, Clone)]
pub struct RemoteCdm {
    client: Client,
    base_url: String,
    secret: String,
    device: String,
    retry: RetryPolicy,
}

impl RemoteCdm {
    pub fn new(config: &CdmConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| AmdlError::Config(format!("Failed to create client: {}", e)))?;
        let device = config
            .device
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| DEFAULT_DEVICE.to_string());
        info!("Using remote CDM at {} with device {}", config.url, device);

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            secret: config.secret.clone(),
            device,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    async fn call(&self, method: Method, route: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}/{}/{}", self.base_url, self.device, route);
        let url = url.as_str();
        let body = body.as_ref();
        let this = self;

        this.retry
            .run(|| {
                let method = method.clone();
                async move {
                    debug!("{} {}", method, url);
                    let mut request = this
                        .client
                        .request(method, url)
                        .header(SECRET_HEADER, &this.secret);
                    if let Some(body) = body {
                        request = request.json(body);
                    }
                    let response = request.send().await.map_err(network_error(url))?;
                    let status = response.status();
                    let text = response.text().await.map_err(network_error(url))?;

                    let envelope: Envelope = serde_json::from_str(&text).map_err(|_| {
                        AmdlError::License(format!(
                            "CDM service returned status {} with non-JSON body",
                            status
                        ))
                    })?;
                    if !status.is_success() || envelope.status != 200 {
                        return Err(AmdlError::License(format!(
                            "CDM service error on {}: {}",
                            route, envelope.message
                        )));
                    }
                    Ok(envelope.data)
                }
            })
            .await
    }
}

fn data_str<'a>(data: &'a Value, field: &str) -> Result<&'a str> {
    data.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| AmdlError::License(format!("CDM response is missing {}", field)))
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|e| AmdlError::License(format!("bad hex in CDM key: {}", e)))
}

#[async_trait]
impl Cdm for RemoteCdm {
    async fn open(&self) -> Result<SessionId> {
        let data = self.call(Method::GET, "open", None).await?;
        let session = SessionId(data_str(&data, "session_id")?.to_string());
        debug!("Opened CDM session {}", session);
        Ok(session)
    }

    async fn get_license_challenge(&self, session: &SessionId, pssh: &Pssh) -> Result<Vec<u8>> {
        let data = self
            .call(
                Method::POST,
                &format!("get_license_challenge/{}", LICENSE_TYPE),
                Some(json!({
                    "session_id": session.0,
                    "init_data": pssh.to_base64(),
                    "privacy_mode": false,
                })),
            )
            .await?;
        STANDARD
            .decode(data_str(&data, "challenge_b64")?)
            .map_err(|e| AmdlError::License(format!("challenge is not base64: {}", e)))
    }

    async fn parse_license(&self, session: &SessionId, license: &str) -> Result<()> {
        self.call(
            Method::POST,
            "parse_license",
            Some(json!({
                "session_id": session.0,
                "license_message": license,
            })),
        )
        .await?;
        Ok(())
    }

    async fn get_keys(&self, session: &SessionId) -> Result<Vec<Key>> {
        let data = self
            .call(
                Method::POST,
                "get_keys/ALL",
                Some(json!({"session_id": session.0})),
            )
            .await?;
        let keys: Vec<RemoteKey> = serde_json::from_value(
            data.get("keys").cloned().unwrap_or(Value::Array(Vec::new())),
        )?;
        keys.into_iter()
            .map(|k| {
                Ok(Key {
                    kid: decode_hex(&k.key_id)?,
                    key_type: k.key_type,
                    key: decode_hex(&k.key)?,
                })
            })
            .collect()
    }

    async fn close(&self, session: &SessionId) -> Result<()> {
        self.call(Method::GET, &format!("close/{}", session.0), None)
            .await?;
        debug!("Closed CDM session {}", session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cdm(server: &MockServer, device: Option<&str>) -> RemoteCdm {
        RemoteCdm::new(&CdmConfig {
            url: server.uri(),
            secret: "s3cret".into(),
            device: device.map(str::to_string),
        })
        .unwrap()
        .with_retry_policy(RetryPolicy::none())
    }

    fn ok(data: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "status": 200,
            "message": "Success",
            "data": data
        }))
    }

    #[tokio::test]
    async fn test_full_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pixel/open"))
            .and(header("X-Secret-Key", "s3cret"))
            .respond_with(ok(json!({"session_id": "abc"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/pixel/get_license_challenge/STREAMING"))
            .and(body_partial_json(json!({"session_id": "abc"})))
            .respond_with(ok(json!({"challenge_b64": STANDARD.encode(b"challenge")})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/pixel/parse_license"))
            .and(body_partial_json(json!({"license_message": "TElD"})))
            .respond_with(ok(Value::Null))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/pixel/get_keys/ALL"))
            .respond_with(ok(json!({"keys": [
                {"key_id": "00", "key": "0102", "type": "SIGNING", "permissions": []},
                {"key_id": "11", "key": "a0b1", "type": "CONTENT", "permissions": []}
            ]})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pixel/close/abc"))
            .respond_with(ok(Value::Null))
            .expect(1)
            .mount(&server)
            .await;

        let cdm = cdm(&server, Some("pixel"));
        let session = cdm.open().await.unwrap();
        let pssh = Pssh::from_init_data(vec![1, 2, 3]);
        assert_eq!(
            cdm.get_license_challenge(&session, &pssh).await.unwrap(),
            b"challenge"
        );
        cdm.parse_license(&session, "TElD").await.unwrap();
        let keys = cdm.get_keys(&session).await.unwrap();
        let content = keys.iter().find(|k| k.is_content()).unwrap();
        assert_eq!(content.key_hex(), "a0b1");
        cdm.close(&session).await.unwrap();
    }

    #[tokio::test]
    async fn test_service_error_is_license_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/default/open"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "status": 401,
                "message": "Secret Key is Invalid"
            })))
            .mount(&server)
            .await;

        let cdm = cdm(&server, None);
        assert_eq!(cdm.device(), DEFAULT_DEVICE);
        match cdm.open().await {
            Err(AmdlError::License(msg)) => assert!(msg.contains("Secret Key")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
