// crates/enrun-core/src/http.rs

//! A thin internal-API client, modelled on
//! `fluent_engines::shared::http_client::EngineHttpClient`: one
//! `reqwest::Client`, a base URL, and a `post_json`-shaped call that
//! the engine builds every request on top of.
//!
//! Every internal endpoint and the operations service wrap their
//! response in `{data: T, error?: string}`; this module is the single
//! place that unwraps that envelope, so `enrun-engine` only ever deals
//! in the inner `T`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::error::HttpError;

/// The internal HTTP surface the engine needs: POST a JSON body to a
/// path under the internal API (or an arbitrary absolute URL, for the
/// operations service and the deep-research provider) and get back the
/// unwrapped `data` value.
///
/// Abstracted behind a trait so engine tests run against a
/// hand-written fake instead of a live `reqwest::Client`.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// POSTs `body` to `path` (resolved against the internal API base
    /// URL) with the internal bearer token, and returns the unwrapped
    /// `data` field.
    async fn post_internal(&self, path: &str, body: &Value) -> anyhow::Result<Value>;

    /// POSTs `body` to `path` with the internal bearer token plus the
    /// org/company headers the operations service expects, and returns
    /// the unwrapped `data` field.
    async fn post_operation(
        &self,
        path: &str,
        organization_id: &str,
        company_id: &str,
        body: &Value,
    ) -> anyhow::Result<Value>;

    /// Arbitrary absolute-URL POST carrying a raw header (not the
    /// internal bearer token) — used by the deep-research provider,
    /// which authenticates with `x-api-key` instead. Returns the raw
    /// response body (no `data` envelope to unwrap).
    async fn post_raw(&self, url: &str, header: (&str, &str), body: &Value) -> anyhow::Result<(reqwest::StatusCode, Value)>;

    /// Arbitrary absolute-URL GET with a raw header. Returns the raw
    /// response body.
    async fn get_raw(&self, url: &str, header: (&str, &str)) -> anyhow::Result<(reqwest::StatusCode, Value)>;
}

/// The real, `reqwest`-backed implementation.
pub struct HttpApiClient {
    client: Client,
    base_url: String,
    internal_api_key: String,
}

impl HttpApiClient {
    pub fn new(config: &RuntimeConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: config.data_engine_api_url.trim_end_matches('/').to_string(),
            internal_api_key: config.data_engine_internal_api_key.expose().to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn unwrap_data(url: &str, response: reqwest::Response) -> anyhow::Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(HttpError::RequestFailed {
                url: url.to_string(),
                status: Some(status.as_u16()),
                message,
            }
            .into());
        }

        let body: Value = response.json().await?;
        match body.get("data") {
            Some(data) => Ok(data.clone()),
            None => Err(HttpError::MissingDataEnvelope { url: url.to_string() }.into()),
        }
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn post_internal(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        let url = self.url(path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.internal_api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;
        Self::unwrap_data(&url, response).await
    }

    async fn post_operation(
        &self,
        path: &str,
        organization_id: &str,
        company_id: &str,
        body: &Value,
    ) -> anyhow::Result<Value> {
        let url = self.url(path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.internal_api_key)
            .header("Content-Type", "application/json")
            .header("x-internal-org-id", organization_id)
            .header("x-internal-company-id", company_id)
            .json(body)
            .send()
            .await?;
        Self::unwrap_data(&url, response).await
    }

    async fn post_raw(&self, url: &str, header: (&str, &str), body: &Value) -> anyhow::Result<(reqwest::StatusCode, Value)> {
        let response = self.client.post(url).header(header.0, header.1).json(body).send().await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    async fn get_raw(&self, url: &str, header: (&str, &str)) -> anyhow::Result<(reqwest::StatusCode, Value)> {
        let response = self.client.get(url).header(header.0, header.1).send().await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        Ok((status, body))
    }
}
