//! Reqwest-based HTTP client shared by the manifest source, the fetcher and
//! the remote license gate.

use crate::config::TollgateConfig;
use crate::{TollgateError, TollgateResult};
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::{redirect, Client};
use serde::Serialize;
use std::time::Duration;

/// HTTP response with the status and fully read body.
#[derive(Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,

    /// Raw response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get the body as a UTF-8 string.
    pub fn body_str(&self) -> TollgateResult<&str> {
        std::str::from_utf8(&self.body)
            .map_err(|e| TollgateError::InvalidInput(format!("Invalid UTF-8 in body: {}", e)))
    }
}

/// Async HTTP client carrying the product User-Agent.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    user_agent: String,
}

impl HttpClient {
    /// Create a client that follows redirects itself.
    pub fn new(config: &TollgateConfig) -> TollgateResult<Self> {
        Self::build(build_user_agent(config), redirect::Policy::limited(config.max_redirects))
    }

    /// Create a client that never follows redirects, for callers that walk
    /// the redirect chain by hand.
    pub fn without_redirects(config: &TollgateConfig) -> TollgateResult<Self> {
        Self::build(build_user_agent(config), redirect::Policy::none())
    }

    fn build(user_agent: String, policy: redirect::Policy) -> TollgateResult<Self> {
        let client = Client::builder()
            .redirect(policy)
            .build()
            .map_err(|e| TollgateError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, user_agent })
    }

    /// Underlying reqwest client, for streaming requests.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// User-Agent sent with every request.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// GET `url` and read the whole body.
    pub async fn get(&self, url: &str, timeout: Duration) -> TollgateResult<HttpResponse> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TollgateError::Network(format!("Request failed: {}", e)))?;

        read_response(response).await
    }

    /// POST `body` as JSON to `url` and read the whole response.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        timeout: Duration,
    ) -> TollgateResult<HttpResponse> {
        let body_bytes = serde_json::to_vec(body)
            .map_err(|e| TollgateError::InvalidInput(format!("Failed to serialize: {}", e)))?;

        let response = self
            .client
            .post(url)
            .header(USER_AGENT, &self.user_agent)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .timeout(timeout)
            .body(body_bytes)
            .send()
            .await
            .map_err(|e| TollgateError::Network(format!("Request failed: {}", e)))?;

        read_response(response).await
    }
}

async fn read_response(response: reqwest::Response) -> TollgateResult<HttpResponse> {
    let status = response.status().as_u16();
    let body = response
        .bytes()
        .await
        .map_err(|e| TollgateError::Network(format!("Failed to read body: {}", e)))?
        .to_vec();

    Ok(HttpResponse { status, body })
}

/// Build a User-Agent string from config.
///
/// Format: `<product>/tollgate-<version> <app>/<app_version>`
/// Example: `sakura-pos-updater/tollgate-0.1.0 sakura-pos/2.0.0`
pub fn build_user_agent(config: &TollgateConfig) -> String {
    format!(
        "{}/tollgate-{} {}/{}",
        config.user_agent_product,
        env!("CARGO_PKG_VERSION"),
        config.app_name,
        config.app_version
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> TollgateConfig {
        let mut config = TollgateConfig::new("sakura-pos", "2.0.0", "/opt/sakura").unwrap();
        config.user_agent_product = "sakura-updater".to_string();
        config
    }

    #[test]
    fn test_build_user_agent_format() {
        let ua = build_user_agent(&test_config());
        assert_eq!(
            ua,
            format!(
                "sakura-updater/tollgate-{} sakura-pos/2.0.0",
                env!("CARGO_PKG_VERSION")
            )
        );
    }

    #[test]
    fn test_response_body_str() {
        let ok = HttpResponse {
            status: 200,
            body: b"hello world".to_vec(),
        };
        assert_eq!(ok.body_str().unwrap(), "hello world");
        assert!(ok.is_success());

        let bad = HttpResponse {
            status: 500,
            body: vec![0xFF, 0xFE],
        };
        assert!(bad.body_str().is_err());
        assert!(!bad.is_success());
    }

    #[tokio::test]
    async fn test_get_sends_user_agent() {
        let server = MockServer::start().await;
        let config = test_config();
        Mock::given(method("GET"))
            .and(path("/update.json"))
            .and(header("user-agent", build_user_agent(&config).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let client = HttpClient::new(&config).unwrap();
        let response = client
            .get(&format!("{}/update.json", server.uri()), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_post_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/echo"))
            .and(body_json(serde_json::json!({"a": 1})))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let client = HttpClient::new(&test_config()).unwrap();
        let response = client
            .post_json(
                &format!("{}/echo", server.uri()),
                &serde_json::json!({"a": 1}),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn test_transport_failure_is_network_error() {
        let client = HttpClient::new(&test_config()).unwrap();
        let result = client
            .get("http://127.0.0.1:9/nothing", Duration::from_secs(2))
            .await;
        assert!(matches!(result, Err(TollgateError::Network(_))));
    }
}
