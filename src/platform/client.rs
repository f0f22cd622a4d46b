//! REST client for the device-management platform

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{AdapterConfigSource, AuthToken, Authenticator};
use crate::config::ConfigError;
use crate::error::AuthError;

const SYSTEM_KEY_HEADER: &str = "ClearBlade-SystemKey";
const SYSTEM_SECRET_HEADER: &str = "ClearBlade-SystemSecret";
const DEVICE_TOKEN_HEADER: &str = "ClearBlade-DeviceToken";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity of a device on a platform system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCredentials {
    pub platform_url: String,
    pub system_key: String,
    pub system_secret: String,
    pub device_name: String,
    pub active_key: String,
}

#[derive(Clone)]
pub struct PlatformClient {
    http: Client,
    credentials: PlatformCredentials,
}

#[derive(Deserialize)]
struct DeviceAuthResponse {
    #[serde(rename = "deviceToken", default)]
    device_token: String,
}

#[derive(Deserialize)]
struct DataResponse {
    #[serde(rename = "DATA", default)]
    data: Vec<Value>,
}

impl PlatformClient {
    pub fn new(credentials: PlatformCredentials) -> Self {
        Self {
            http: Client::new(),
            credentials,
        }
    }

    pub fn credentials(&self) -> &PlatformCredentials {
        &self.credentials
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.credentials.platform_url.trim_end_matches('/'),
            path
        )
    }
}

#[async_trait]
impl Authenticator for PlatformClient {
    async fn authenticate(&self) -> Result<AuthToken, AuthError> {
        let creds = &self.credentials;
        let url = self.url(&format!("/api/v/2/devices/{}/auth", creds.system_key));
        debug!("Authenticating device '{}' at {}", creds.device_name, url);

        let res = self
            .http
            .post(url)
            .timeout(REQUEST_TIMEOUT)
            .header(SYSTEM_KEY_HEADER, &creds.system_key)
            .header(SYSTEM_SECRET_HEADER, &creds.system_secret)
            .json(&json!({
                "deviceName": creds.device_name,
                "activeKey": creds.active_key,
            }))
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(AuthError::Rejected { status, body });
        }

        let auth: DeviceAuthResponse = res.json().await?;
        if auth.device_token.is_empty() {
            return Err(AuthError::MissingField("deviceToken"));
        }
        Ok(AuthToken::new(auth.device_token))
    }

    fn system_key(&self) -> &str {
        &self.credentials.system_key
    }
}

#[async_trait]
impl AdapterConfigSource for PlatformClient {
    async fn fetch_adapter_record(
        &self,
        token: &AuthToken,
        collection_id: &str,
        adapter_name: &str,
    ) -> Result<Value, ConfigError> {
        let query = json!({ "FILTERS": [[{ "EQ": [{ "adapter_name": adapter_name }] }]] });
        let url = Url::parse_with_params(
            &self.url(&format!("/api/v/1/data/{}", collection_id)),
            &[("query", query.to_string())],
        )
        .map_err(|e| ConfigError::Fetch(format!("invalid platform URL: {}", e)))?;
        debug!("Querying adapter collection {}", collection_id);

        let fetch_err = |e: reqwest::Error| ConfigError::Fetch(e.to_string());
        let res = self
            .http
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .header(DEVICE_TOKEN_HEADER, token.as_str())
            .send()
            .await
            .map_err(fetch_err)?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ConfigError::Fetch(format!(
                "unexpected status: {} body={}",
                status, body
            )));
        }

        let data: DataResponse = res.json().await.map_err(fetch_err)?;
        data.data
            .into_iter()
            .next()
            .ok_or_else(|| ConfigError::AdapterNotFound(adapter_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    /// Serve one canned HTTP response and hand back the raw request head
    async fn serve_once(status: &'static str, body: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (format!("http://{}", addr), handle)
    }

    fn client(platform_url: String) -> PlatformClient {
        PlatformClient::new(PlatformCredentials {
            platform_url,
            system_key: "sys-key".to_string(),
            system_secret: "sys-secret".to_string(),
            device_name: "mqttBridgeAdapter".to_string(),
            active_key: "active".to_string(),
        })
    }

    #[tokio::test]
    async fn test_authenticate_sends_device_credentials() {
        let (url, server) = serve_once("200 OK", r#"{"deviceToken":"tok-123"}"#.to_string()).await;

        let token = client(url).authenticate().await.unwrap();
        assert_eq!(token.as_str(), "tok-123");

        let request = server.await.unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /api/v/2/devices/sys-key/auth "), "{}", request);
        assert!(lower.contains("clearblade-systemkey: sys-key"));
        assert!(lower.contains("clearblade-systemsecret: sys-secret"));
        assert!(request.contains(r#""deviceName":"mqttBridgeAdapter""#));
        assert!(request.contains(r#""activeKey":"active""#));
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let (url, _server) =
            serve_once("401 Unauthorized", r#"{"error":"bad key"}"#.to_string()).await;

        let err = client(url).authenticate().await.unwrap_err();
        assert!(
            matches!(err, AuthError::Rejected { status, .. } if status.as_u16() == 401),
            "{:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_authenticate_missing_token() {
        let (url, _server) = serve_once("200 OK", "{}".to_string()).await;

        let err = client(url).authenticate().await.unwrap_err();
        assert!(matches!(err, AuthError::MissingField("deviceToken")));
    }

    #[tokio::test]
    async fn test_fetch_adapter_record() {
        let body = json!({
            "DATA": [{ "adapter_name": "mqttBridgeAdapter", "topic_root": "bridge" }],
            "TOTAL": 1,
        })
        .to_string();
        let (url, server) = serve_once("200 OK", body).await;

        let record = client(url)
            .fetch_adapter_record(&AuthToken::new("tok-123"), "coll-1", "mqttBridgeAdapter")
            .await
            .unwrap();
        assert_eq!(record["topic_root"], "bridge");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/v/1/data/coll-1?query="), "{}", request);
        assert!(request.to_ascii_lowercase().contains("clearblade-devicetoken: tok-123"));
        assert!(request.contains("adapter_name"));
    }

    #[tokio::test]
    async fn test_fetch_adapter_record_empty_result() {
        let (url, _server) = serve_once("200 OK", r#"{"DATA":[]}"#.to_string()).await;

        let err = client(url)
            .fetch_adapter_record(&AuthToken::new("t"), "coll-1", "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::AdapterNotFound(name) if name == "missing"));
    }
}
