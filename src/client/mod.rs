// This file is part of the terraform-provider-otc project
//
// Copyright (C) ANEO, 2024-2024. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License")
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use anyhow::{Context, Result};
use jiff::Timestamp;
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::Config;

mod auth;
pub mod error;
pub mod job;

use auth::Token;
pub use error::{check_deleted, is_not_found, ApiError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Authenticated access to the cloud REST APIs
pub struct CloudClient {
    http: reqwest::Client,
    config: Config,
    token: RwLock<Token>,
    pub(crate) s3: Mutex<Option<aws_sdk_s3::Client>>,
}

impl std::fmt::Debug for CloudClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudClient")
            .field("auth_url", &self.config.auth_url)
            .field("region", &self.config.region)
            .finish_non_exhaustive()
    }
}

impl CloudClient {
    /// Build the HTTP client and authenticate
    pub async fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Could not build the HTTP client")?;
        let token = auth::authenticate(&http, &config).await?;

        Ok(Self {
            http,
            config,
            token: RwLock::new(token),
            s3: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    /// Client for one service of the cloud (`ecs`, `vpc`, `kms`...)
    pub fn service(&self, service: &str) -> ServiceClient<'_> {
        ServiceClient {
            client: self,
            endpoint: endpoint(&self.config, service),
        }
    }

    pub async fn project_id(&self) -> Result<String, ApiError> {
        Ok(self.token().await?.project_id)
    }

    async fn token(&self) -> Result<Token, ApiError> {
        {
            let token = self.token.read().await;
            if token.is_fresh(Timestamp::now()) {
                return Ok(token.clone());
            }
        }
        let mut token = self.token.write().await;
        if !token.is_fresh(Timestamp::now()) {
            *token = auth::authenticate(&self.http, &self.config).await?;
        }
        Ok(token.clone())
    }

    /// Force the renewal of the token on the next request
    async fn invalidate_token(&self) -> bool {
        let mut token = self.token.write().await;
        if token.expires_at.is_none() {
            return false;
        }
        token.expires_at = Some(Timestamp::UNIX_EPOCH);
        true
    }
}

/// Base URL of a service: explicit override first, then the regional convention
pub(crate) fn endpoint(config: &Config, service: &str) -> String {
    match config.endpoints.get(service) {
        Some(url) => url.trim_end_matches('/').to_owned(),
        None => format!("https://{service}.{}.{}", config.region, config.cloud),
    }
}

/// REST calls against a single service endpoint
#[derive(Debug, Clone)]
pub struct ServiceClient<'c> {
    client: &'c CloudClient,
    endpoint: String,
}

impl<'c> ServiceClient<'c> {
    pub async fn project_id(&self) -> Result<String, ApiError> {
        self.client.project_id().await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, &[], None::<&()>).await
    }

    /// GET with query parameters, encoded by the HTTP client
    pub async fn get_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        self.request(Method::GET, path, query, None::<&()>).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, &[], Some(body)).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        self.request(Method::PUT, path, &[], Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.request::<(), serde_json::Value>(Method::DELETE, path, &[], None)
            .await
            .map(|_| ())
    }

    /// DELETE answering with a body, such as the job tracking the deletion
    pub async fn delete_with<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, &[], None::<&()>).await
    }

    /// POST whose response body is irrelevant
    pub async fn action<B>(&self, path: &str, body: &B) -> Result<(), ApiError>
    where
        B: Serialize + ?Sized + Sync,
    {
        self.request::<B, serde_json::Value>(Method::POST, path, &[], Some(body))
            .await
            .map(|_| ())
    }

    async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.endpoint, path);
        let mut delay = RETRY_DELAY;
        let mut attempt = 0;
        let mut renewed = false;

        loop {
            match self.send_once(&method, &url, query, body).await {
                Err(err) if err.status() == Some(StatusCode::UNAUTHORIZED) && !renewed => {
                    renewed = true;
                    if !self.client.invalidate_token().await {
                        return Err(err);
                    }
                    debug!(%url, "token rejected, renewing");
                }
                Err(err) if err.is_retryable() && attempt < self.client.config.max_retries => {
                    attempt += 1;
                    warn!(%url, attempt, error = %err, "request failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => return Err(err),
                Ok(text) => {
                    let text = if text.trim().is_empty() { "null" } else { &text };
                    return serde_json::from_str(text).map_err(|source| ApiError::Decode {
                        method: method.clone(),
                        url: url.clone(),
                        source,
                    });
                }
            }
        }
    }

    async fn send_once<B>(
        &self,
        method: &Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<String, ApiError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let token = self.client.token().await?;
        let transport = |source| ApiError::Transport {
            method: method.clone(),
            url: url.to_owned(),
            source,
        };

        let mut request = self
            .client
            .http
            .request(method.clone(), url)
            .header("X-Auth-Token", &token.value)
            .header("X-Project-Id", &token.project_id)
            .header("Accept", "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(%method, %url, "sending request");
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        debug!(%method, %url, %status, "received response");

        if status.is_success() {
            Ok(text)
        } else {
            Err(ApiError::Status {
                method: method.clone(),
                url: url.to_owned(),
                status,
                body: text,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::{Query, State};
    use axum::http::HeaderMap;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    #[derive(Debug, Default)]
    struct Calls {
        tokens: AtomicUsize,
        queues: AtomicUsize,
    }

    async fn issue_token(State(calls): State<Arc<Calls>>) -> impl IntoResponse {
        let issued = calls.tokens.fetch_add(1, Ordering::SeqCst) + 1;
        (
            [("X-Subject-Token", format!("token-{issued}"))],
            Json(json!({
                "token": {"expires_at": "2099-01-01T00:00:00Z", "project": {"id": "p-1"}}
            })),
        )
    }

    /// Rejects the first token ever issued
    async fn queue(State(calls): State<Arc<Calls>>, headers: HeaderMap) -> Response {
        calls.queues.fetch_add(1, Ordering::SeqCst);
        match headers.get("X-Auth-Token") {
            Some(token) if token.as_bytes() != b"token-1" => Json(json!({"id": "q-1"})).into_response(),
            _ => StatusCode::UNAUTHORIZED.into_response(),
        }
    }

    async fn denied() -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    async fn networks(Query(query): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
        Json(json!({"networks": [{"id": "n-1", "name": query.get("name")}]}))
    }

    /// Client of a local IAM and service mock
    async fn mock_client() -> (CloudClient, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let app = Router::new()
            .route("/v3/auth/tokens", post(issue_token))
            .route("/v1.0/p-1/queues/q-1", get(queue))
            .route("/v1.0/p-1/queues/denied", get(denied))
            .route("/v2.0/networks", get(networks))
            .with_state(calls.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await });

        let config = Config {
            auth_url: format!("{base}/v3"),
            region: "eu-de".to_owned(),
            user_name: Some("alice".to_owned()),
            password: Some("secret".to_owned()),
            max_retries: 0,
            endpoints: [("dms", &base), ("vpc", &base)]
                .into_iter()
                .map(|(service, url)| (service.to_owned(), url.clone()))
                .collect(),
            ..Default::default()
        };
        (CloudClient::new(config).await.unwrap(), calls)
    }

    #[tokio::test]
    async fn rejected_token_is_renewed_once() {
        let (client, calls) = mock_client().await;
        assert_eq!(calls.tokens.load(Ordering::SeqCst), 1);

        let queue: serde_json::Value = client
            .service("dms")
            .get("/v1.0/p-1/queues/q-1")
            .await
            .unwrap();
        assert_eq!(queue["id"], "q-1");
        assert_eq!(calls.tokens.load(Ordering::SeqCst), 2);
        assert_eq!(calls.queues.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_rejection_is_an_error() {
        let (client, calls) = mock_client().await;
        let err = client
            .service("dms")
            .get::<serde_json::Value>("/v1.0/p-1/queues/denied")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(calls.tokens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn query_parameters_are_encoded() {
        let (client, _) = mock_client().await;
        let body: serde_json::Value = client
            .service("vpc")
            .get_query("/v2.0/networks", &[("name", "front & back #1")])
            .await
            .unwrap();
        assert_eq!(body["networks"][0]["name"], "front & back #1");
    }

    #[test]
    fn endpoint_follows_region_convention() {
        let config = Config {
            region: "eu-de".to_owned(),
            cloud: "otc.t-systems.com".to_owned(),
            ..Default::default()
        };
        assert_eq!(endpoint(&config, "ecs"), "https://ecs.eu-de.otc.t-systems.com");
    }

    #[test]
    fn endpoint_override_wins() {
        let config = Config {
            region: "eu-de".to_owned(),
            cloud: "otc.t-systems.com".to_owned(),
            endpoints: [("kms".to_owned(), "http://127.0.0.1:8080/".to_owned())]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        assert_eq!(endpoint(&config, "kms"), "http://127.0.0.1:8080");
        assert_eq!(endpoint(&config, "vpc"), "https://vpc.eu-de.otc.t-systems.com");
    }
}
