//! Credential providers
//!
//! The hub authenticates bus connections with a bearer token obtained via
//! the OAuth 2.0 client-credentials grant.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use varsync_core::{VarsyncError, VarsyncResult};

/// Scope needed to read and write variables
pub const DEFAULT_SCOPE: &str = "hub.variables.readwrite";

/// Scope a provider needs to publish definitions as well
pub const PROVIDER_SCOPE: &str = "hub.variables.provide hub.variables.readwrite";

/// Token request timeout
pub const TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Client-credentials registration on the hub
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthCredentials {
    pub client_name: String,
    pub client_id: String,
    pub client_secret: String,
    pub token_endpoint: String,
    pub scope: String,
    /// Hubs ship self-signed certificates
    pub accept_invalid_certs: bool,
}

impl OAuthCredentials {
    /// Credentials against the token endpoint of `host`
    pub fn for_host(
        host: &str,
        client_name: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        OAuthCredentials {
            client_name: client_name.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_endpoint: format!("https://{}/oauth2/token", host),
            ..OAuthCredentials::default()
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }
}

impl Default for OAuthCredentials {
    fn default() -> Self {
        OAuthCredentials {
            client_name: "varsync".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            token_endpoint: "https://localhost/oauth2/token".to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            accept_invalid_certs: true,
        }
    }
}

/// Source of bus tokens
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a token. Fails with `AuthFailure`.
    async fn fetch_token(&self, credentials: &OAuthCredentials) -> VarsyncResult<String>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Client-credentials grant over HTTPS
#[derive(Clone, Debug)]
pub struct OAuthClient {
    timeout: Duration,
}

impl OAuthClient {
    pub fn new() -> Self {
        OAuthClient {
            timeout: TOKEN_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        OAuthClient { timeout }
    }
}

impl Default for OAuthClient {
    fn default() -> Self {
        OAuthClient::new()
    }
}

#[async_trait]
impl CredentialProvider for OAuthClient {
    async fn fetch_token(&self, credentials: &OAuthCredentials) -> VarsyncResult<String> {
        let auth_err = |msg: String| VarsyncError::AuthFailure(msg);

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(credentials.accept_invalid_certs)
            .user_agent("varsync")
            .build()
            .map_err(|e| auth_err(format!("Failed to build HTTP client: {}", e)))?;

        tracing::debug!(
            endpoint = %credentials.token_endpoint,
            client = %credentials.client_name,
            scope = %credentials.scope,
            "Requesting bus token"
        );

        let response = client
            .post(&credentials.token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", credentials.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                auth_err(format!(
                    "Token request to {} failed: {}",
                    credentials.token_endpoint, e
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(auth_err(format!(
                "Token endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| auth_err(format!("Malformed token response: {}", e)))?;

        match parsed.access_token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(auth_err("Token response does not contain access_token".into())),
        }
    }
}

/// A fixed token
#[derive(Clone, Debug)]
pub struct StaticToken(pub String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        StaticToken(token.into())
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn fetch_token(&self, _credentials: &OAuthCredentials) -> VarsyncResult<String> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the raw request
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });

        (format!("http://{}/oauth2/token", addr), handle)
    }

    fn credentials(endpoint: String) -> OAuthCredentials {
        OAuthCredentials {
            client_id: "client".into(),
            client_secret: "secret".into(),
            token_endpoint: endpoint,
            ..OAuthCredentials::default()
        }
    }

    #[test]
    fn test_for_host_endpoint() {
        let creds = OAuthCredentials::for_host("192.168.10.108", "sampleprovider", "id", "secret");
        assert_eq!(creds.token_endpoint, "https://192.168.10.108/oauth2/token");
        assert_eq!(creds.scope, DEFAULT_SCOPE);
        assert_eq!(creds.with_scope(PROVIDER_SCOPE).scope, PROVIDER_SCOPE);
    }

    #[tokio::test]
    async fn test_static_token() {
        let token = StaticToken::new("abc")
            .fetch_token(&OAuthCredentials::default())
            .await
            .unwrap();
        assert_eq!(token, "abc");
    }

    #[tokio::test]
    async fn test_client_credentials_grant() {
        let (endpoint, server) = serve_once("200 OK", r#"{"access_token":"tok-123","token_type":"bearer"}"#).await;
        let token = OAuthClient::new()
            .fetch_token(&credentials(endpoint))
            .await
            .unwrap();
        assert_eq!(token, "tok-123");

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("post /oauth2/token"));
        assert!(request.contains("authorization: basic "));
        assert!(request.contains("grant_type=client_credentials"));
        assert!(request.contains("scope=hub.variables.readwrite"));
    }

    #[tokio::test]
    async fn test_missing_access_token() {
        let (endpoint, _server) = serve_once("200 OK", r#"{"token_type":"bearer"}"#).await;
        let err = OAuthClient::new()
            .fetch_token(&credentials(endpoint))
            .await
            .unwrap_err();
        assert!(matches!(err, VarsyncError::AuthFailure(_)));
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let (endpoint, _server) = serve_once("401 Unauthorized", r#"{"error":"invalid_client"}"#).await;
        let err = OAuthClient::new()
            .fetch_token(&credentials(endpoint))
            .await
            .unwrap_err();
        assert!(matches!(err, VarsyncError::AuthFailure(m) if m.contains("401")));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = OAuthClient::with_timeout(Duration::from_secs(2))
            .fetch_token(&credentials(format!("http://{}/oauth2/token", addr)))
            .await
            .unwrap_err();
        assert!(!err.is_recoverable());
    }
}
