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

use jiff::{SignedDuration, Timestamp};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::Config;

use super::error::ApiError;

/// Tokens are renewed this long before they expire
const RENEW_MARGIN: SignedDuration = SignedDuration::from_mins(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub project_id: String,
    /// `None` for user-supplied tokens, which are never renewed
    pub expires_at: Option<Timestamp>,
}

impl Token {
    pub fn is_fresh(&self, now: Timestamp) -> bool {
        self.expires_at
            .map_or(true, |expires_at| expires_at.duration_since(now) > RENEW_MARGIN)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    expires_at: String,
    #[serde(default)]
    project: Option<ProjectRef>,
}

#[derive(Debug, Deserialize)]
struct ProjectRef {
    id: String,
}

/// Body of a Keystone v3 password authentication scoped to the configured project
pub(super) fn password_request(config: &Config) -> serde_json::Value {
    let domain = json!({ "name": config.domain_name.as_deref().unwrap_or_default() });
    let project = match (&config.tenant_id, &config.tenant_name) {
        (Some(id), _) => json!({ "id": id }),
        (None, name) => json!({ "name": name.as_deref().unwrap_or(&config.region), "domain": domain.clone() }),
    };
    json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": config.user_name.as_deref().unwrap_or_default(),
                        "password": config.password.as_deref().unwrap_or_default(),
                        "domain": domain,
                    },
                },
            },
            "scope": { "project": project },
        }
    })
}

fn parse_token(value: String, body: &str) -> Result<Token, ApiError> {
    let response: TokenResponse = serde_json::from_str(body)
        .map_err(|err| ApiError::Auth(format!("invalid token response: {err}")))?;
    let expires_at = response
        .token
        .expires_at
        .parse::<Timestamp>()
        .map_err(|err| ApiError::Auth(format!("invalid token expiration: {err}")))?;
    let project_id = response
        .token
        .project
        .map(|project| project.id)
        .ok_or_else(|| ApiError::Auth("token is not scoped to a project".to_owned()))?;
    Ok(Token {
        value,
        project_id,
        expires_at: Some(expires_at),
    })
}

/// Get a token, either the pre-issued one or a new one from Keystone
pub(super) async fn authenticate(http: &reqwest::Client, config: &Config) -> Result<Token, ApiError> {
    if let Some(token) = &config.token {
        return Ok(Token {
            value: token.clone(),
            project_id: config.tenant_id.clone().unwrap_or_default(),
            expires_at: None,
        });
    }

    let url = format!("{}/auth/tokens", config.auth_url);
    debug!(%url, user = ?config.user_name, "requesting token");
    let response = http
        .post(&url)
        .json(&password_request(config))
        .send()
        .await
        .map_err(|source| ApiError::Transport {
            method: Method::POST,
            url: url.clone(),
            source,
        })?;

    let status = response.status();
    let subject = response
        .headers()
        .get("X-Subject-Token")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let body = response.text().await.map_err(|source| ApiError::Transport {
        method: Method::POST,
        url: url.clone(),
        source,
    })?;

    if !status.is_success() {
        return Err(ApiError::Auth(format!("{status}: {body}")));
    }
    let subject =
        subject.ok_or_else(|| ApiError::Auth("missing X-Subject-Token header".to_owned()))?;

    let token = parse_token(subject, &body)?;
    info!(project_id = %token.project_id, expires_at = ?token.expires_at, "authenticated");
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_scoped_by_project_name() {
        let config = Config {
            region: "eu-de".to_owned(),
            user_name: Some("alice".to_owned()),
            password: Some("secret".to_owned()),
            domain_name: Some("OTC-EU-DE-0001".to_owned()),
            ..Default::default()
        };
        let body = password_request(&config);
        assert_eq!(
            body["auth"]["identity"]["password"]["user"]["name"],
            "alice"
        );
        assert_eq!(body["auth"]["scope"]["project"]["name"], "eu-de");
        assert_eq!(
            body["auth"]["scope"]["project"]["domain"]["name"],
            "OTC-EU-DE-0001"
        );
    }

    #[test]
    fn request_prefers_project_id() {
        let config = Config {
            region: "eu-de".to_owned(),
            tenant_id: Some("0123".to_owned()),
            tenant_name: Some("eu-de_project".to_owned()),
            ..Default::default()
        };
        let body = password_request(&config);
        assert_eq!(body["auth"]["scope"]["project"], json!({ "id": "0123" }));
    }

    #[test]
    fn token_body_is_parsed() {
        let body = r#"{"token": {"expires_at": "2030-01-02T03:04:05.000000Z",
            "project": {"id": "p-1", "name": "eu-de"}, "methods": ["password"]}}"#;
        let token = parse_token("abc".to_owned(), body).unwrap();
        assert_eq!(token.project_id, "p-1");
        assert_eq!(token.value, "abc");
        assert!(token.is_fresh("2030-01-02T02:00:00Z".parse().unwrap()));
        assert!(!token.is_fresh("2030-01-02T03:00:00Z".parse().unwrap()));
    }

    #[test]
    fn unscoped_token_is_rejected() {
        let body = r#"{"token": {"expires_at": "2030-01-02T03:04:05Z"}}"#;
        assert!(matches!(
            parse_token("abc".to_owned(), body),
            Err(ApiError::Auth(_))
        ));
    }

    #[test]
    fn supplied_tokens_never_expire() {
        let token = Token {
            value: "t".to_owned(),
            project_id: "p".to_owned(),
            expires_at: None,
        };
        assert!(token.is_fresh(Timestamp::now()));
    }
}
