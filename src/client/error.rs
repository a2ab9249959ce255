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

use reqwest::{Method, StatusCode};

/// Error returned by a REST call to the cloud
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{method} {url}: unexpected status {status}: {body}")]
    Status {
        method: Method,
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("{method} {url}: {source}")]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} {url}: invalid response body: {source}")]
    Decode {
        method: Method,
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl ApiError {
    /// HTTP status of the response, if the server answered
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// Whether the same request may succeed if sent again
    ///
    /// A timed out request may have been processed, so it is only sent again
    /// when the method is idempotent.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Transport { method, source, .. } => {
                source.is_connect() || (source.is_timeout() && method.is_idempotent())
            }
            _ => false,
        }
    }
}

/// Check whether an error chain is rooted in a 404 response
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<ApiError>())
        .any(ApiError::is_not_found)
}

/// Turn a 404 into `None`, keep every other outcome
pub fn check_deleted<T>(result: Result<T, ApiError>) -> Result<Option<T>, ApiError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Context;
    use tokio::net::TcpListener;

    use super::*;

    fn status(code: u16) -> ApiError {
        ApiError::Status {
            method: Method::GET,
            url: "https://ecs.eu-de.example.com/v2.1/p/servers/x".to_owned(),
            status: StatusCode::from_u16(code).unwrap(),
            body: "{}".to_owned(),
        }
    }

    #[test]
    fn not_found_is_detected_through_context() {
        let err = Err::<(), _>(status(404))
            .context("Error reading server")
            .unwrap_err();
        assert!(is_not_found(&err));

        let err = Err::<(), _>(status(400))
            .context("Error reading server")
            .unwrap_err();
        assert!(!is_not_found(&err));
    }

    #[test]
    fn check_deleted_swallows_only_404() {
        assert_eq!(check_deleted(Ok::<_, ApiError>(3)).unwrap(), Some(3));
        assert_eq!(check_deleted::<u8>(Err(status(404))).unwrap(), None);
        assert!(check_deleted::<u8>(Err(status(500))).is_err());
    }

    #[test]
    fn throttling_is_retryable() {
        assert!(status(429).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(500).is_retryable());
        assert!(!ApiError::Auth("denied".to_owned()).is_retryable());
    }

    /// Error of a request sent to `addr` with a short timeout
    async fn transport_error(method: Method, addr: std::net::SocketAddr) -> ApiError {
        let url = format!("http://{addr}/v2.1/p/servers");
        let source = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap()
            .request(method.clone(), &url)
            .send()
            .await
            .unwrap_err();
        ApiError::Transport { method, url, source }
    }

    /// Server accepting connections and never answering
    async fn silent_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });
        addr
    }

    #[tokio::test]
    async fn timed_out_posts_are_not_sent_again() {
        let addr = silent_server().await;

        let post = transport_error(Method::POST, addr).await;
        assert!(matches!(&post, ApiError::Transport { source, .. } if source.is_timeout()));
        assert!(!post.is_retryable());

        assert!(transport_error(Method::GET, addr).await.is_retryable());
        assert!(transport_error(Method::PUT, addr).await.is_retryable());
        assert!(transport_error(Method::DELETE, addr).await.is_retryable());
    }

    #[tokio::test]
    async fn refused_connections_are_retried_for_every_method() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let post = transport_error(Method::POST, addr).await;
        assert!(matches!(&post, ApiError::Transport { source, .. } if source.is_connect()));
        assert!(post.is_retryable());
    }

    #[test]
    fn status_message_contains_url_and_body() {
        let msg = status(409).to_string();
        assert!(msg.contains("409"));
        assert!(msg.contains("/servers/x"));
    }
}
