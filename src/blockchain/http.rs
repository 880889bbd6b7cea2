// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Thin reqwest wrapper shared by the REST and JSON-RPC backed adapters.
//!
//! Transport failures and 5xx responses map to retryable errors; other
//! non-success responses are treated as rejections.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::types::ChainError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl HttpClient {
    pub fn new(base_url: &str) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET returning `None` on 404.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ChainError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| ChainError::Rpc(format!("invalid response body: {e}")))
    }

    pub async fn get_text(&self, path: &str) -> Result<String, ChainError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        check_status(response)
            .await?
            .text()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))
    }

    pub async fn post_text(&self, path: &str, body: String) -> Result<String, ChainError> {
        let response = self
            .client
            .post(self.url(path))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        check_status(response)
            .await?
            .text()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))
    }

    pub async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<T, ChainError> {
        let response = self
            .client
            .post(self.url(path))
            .form(form)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        check_status(response)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ChainError::Rpc(format!("invalid response body: {e}")))
    }

    /// JSON-RPC 2.0 call against the base URL.
    pub async fn rpc<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self
            .client
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        let parsed: RpcResponse<T> = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ChainError::Rpc(format!("invalid rpc response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(ChainError::Rejected(format!(
                "{method} failed ({}): {}",
                err.code, err.message
            )));
        }
        parsed
            .result
            .ok_or_else(|| ChainError::Rpc(format!("{method} returned no result")))
    }
}

async fn check_status(response: Response) -> Result<Response, ChainError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(ChainError::Rpc(format!("{status}: {body}")))
    } else {
        Err(ChainError::Rejected(format!("{status}: {body}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Retryable;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn rpc_returns_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": 42
            })))
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri()).unwrap();
        let value: u64 = client.rpc("getSlot", json!([])).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn rpc_error_object_is_a_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "error": {"code": -32002, "message": "insufficient funds"}
            })))
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri()).unwrap();
        let err = client.rpc::<u64>("sendTransaction", json!([])).await.unwrap_err();
        assert!(matches!(err, ChainError::Rejected(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn server_errors_are_retryable_and_404_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri()).unwrap();
        let err = client.get_text("/broken").await.unwrap_err();
        assert!(err.is_retryable());

        let missing: Option<Value> = client.get_json("/missing").await.unwrap();
        assert!(missing.is_none());
    }
}
