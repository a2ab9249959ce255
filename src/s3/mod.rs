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

use anyhow::{anyhow, Result};
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials, Region};
use aws_sdk_s3::Client;
use tracing::debug;

use crate::client::{endpoint, CloudClient};
use crate::config::Config;

mod bucket;
mod object;

pub use bucket::S3Bucket;
pub use object::S3BucketObject;

const CREDENTIALS_PROVIDER: &str = "otc-provider";

fn build_client(config: &Config) -> Result<Client> {
    let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) else {
        return Err(anyhow!(
            "`access_key` and `secret_key` are required to manage object storage"
        ));
    };
    let endpoint_url = endpoint(config, "obs");
    debug!(endpoint_url, "building object storage client");

    let conf = Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .credentials_provider(Credentials::new(
            access_key.clone(),
            secret_key.clone(),
            None,
            None,
            CREDENTIALS_PROVIDER,
        ))
        .endpoint_url(endpoint_url)
        .force_path_style(true)
        .build();
    Ok(Client::from_conf(conf))
}

/// Object storage client, built on first use and then shared
pub(crate) async fn s3_client(client: &CloudClient) -> Result<Client> {
    let mut s3 = client.s3.lock().await;
    if let Some(s3) = s3.as_ref() {
        return Ok(s3.clone());
    }
    let built = build_client(client.config())?;
    *s3 = Some(built.clone());
    Ok(built)
}

/// Host name of a bucket on the object storage endpoint
pub(crate) fn bucket_domain_name(config: &Config, bucket: &str) -> String {
    let endpoint = endpoint(config, "obs");
    let host = endpoint
        .split_once("://")
        .map_or(endpoint.as_str(), |(_, host)| host);
    format!("{bucket}.{host}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            region: "eu-de".to_owned(),
            cloud: "otc.t-systems.com".to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn domain_name_uses_obs_endpoint() {
        assert_eq!(
            bucket_domain_name(&config(), "logs"),
            "logs.obs.eu-de.otc.t-systems.com"
        );

        let mut config = config();
        config
            .endpoints
            .insert("obs".to_owned(), "http://127.0.0.1:9000/".to_owned());
        assert_eq!(bucket_domain_name(&config, "logs"), "logs.127.0.0.1:9000");
    }

    #[test]
    fn credentials_are_required() {
        let err = build_client(&config()).unwrap_err().to_string();
        assert!(err.contains("access_key"));

        let config = Config {
            access_key: Some("AK".to_owned()),
            secret_key: Some("SK".to_owned()),
            ..config()
        };
        assert!(build_client(&config).is_ok());
    }
}
