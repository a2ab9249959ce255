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

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tf_provider::{
    map, value::ValueBool, Attribute, AttributeConstraint, AttributePath, AttributeType, Block,
    Description, Diagnostics, Schema, ValueMap, ValueNumber, ValueString,
};

use crate::utils::WithSchema;

pub const DEFAULT_CLOUD: &str = "otc.t-systems.com";
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Provider block as written in the Terraform configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig<'a> {
    #[serde(borrow = "'a")]
    pub auth_url: ValueString<'a>,
    pub region: ValueString<'a>,
    pub user_name: ValueString<'a>,
    pub password: ValueString<'a>,
    pub domain_name: ValueString<'a>,
    pub tenant_name: ValueString<'a>,
    pub tenant_id: ValueString<'a>,
    pub token: ValueString<'a>,
    pub access_key: ValueString<'a>,
    pub secret_key: ValueString<'a>,
    pub cloud: ValueString<'a>,
    pub insecure: ValueBool,
    pub max_retries: ValueNumber,
    pub endpoints: ValueMap<'a, ValueString<'a>>,
}

/// Provider configuration once every environment fallback has been applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub auth_url: String,
    pub region: String,
    pub user_name: Option<String>,
    pub password: Option<String>,
    pub domain_name: Option<String>,
    pub tenant_name: Option<String>,
    pub tenant_id: Option<String>,
    pub token: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub cloud: String,
    pub insecure: bool,
    pub max_retries: u32,
    pub endpoints: HashMap<String, String>,
}

impl Config {
    pub fn resolve(config: &ProviderConfig) -> Self {
        Self::resolve_with(config, |name| std::env::var(name).ok())
    }

    pub(crate) fn resolve_with<E>(config: &ProviderConfig, env: E) -> Self
    where
        E: Fn(&str) -> Option<String>,
    {
        let pick = |value: &ValueString, names: &[&str]| {
            value
                .as_deref_option()
                .map(str::to_owned)
                .or_else(|| names.iter().find_map(|name| env(name)))
                .filter(|value| !value.is_empty())
        };

        let region = pick(&config.region, &["OS_REGION_NAME"]).unwrap_or_default();
        let tenant_id = pick(&config.tenant_id, &["OS_TENANT_ID", "OS_PROJECT_ID"]);
        let mut tenant_name = pick(&config.tenant_name, &["OS_TENANT_NAME", "OS_PROJECT_NAME"]);
        if tenant_name.is_none() && tenant_id.is_none() && !region.is_empty() {
            // projects are named after their region by default
            tenant_name = Some(region.clone());
        }

        let insecure = match config.insecure.as_ref_option() {
            Some(insecure) => *insecure,
            None => env("OS_INSECURE").map_or(false, |v| v == "1" || v == "true"),
        };
        let max_retries = match config.max_retries.as_ref_option() {
            Some(retries) => (*retries).max(0) as u32,
            None => env("OS_MAX_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_RETRIES),
        };

        Config {
            auth_url: pick(&config.auth_url, &["OS_AUTH_URL"])
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_owned(),
            region,
            user_name: pick(&config.user_name, &["OS_USERNAME"]),
            password: pick(&config.password, &["OS_PASSWORD"]),
            domain_name: pick(&config.domain_name, &["OS_DOMAIN_NAME", "OS_USER_DOMAIN_NAME"]),
            tenant_name,
            tenant_id,
            token: pick(&config.token, &["OS_AUTH_TOKEN"]),
            access_key: pick(&config.access_key, &["OS_ACCESS_KEY", "AWS_ACCESS_KEY_ID"]),
            secret_key: pick(&config.secret_key, &["OS_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"]),
            cloud: pick(&config.cloud, &["OS_CLOUD"]).unwrap_or_else(|| DEFAULT_CLOUD.to_owned()),
            insecure,
            max_retries,
            endpoints: config
                .endpoints
                .iter()
                .flatten()
                .filter_map(|(service, url)| {
                    Some((service.to_string(), url.as_deref_option()?.to_owned()))
                })
                .collect(),
        }
    }

    /// Report missing or inconsistent settings.
    ///
    /// Settings still unknown at plan time are not checked.
    pub fn validate(&self, diags: &mut Diagnostics, raw: &ProviderConfig) {
        if self.auth_url.is_empty() && !raw.auth_url.is_unknown() {
            diags.error(
                "Missing authentication endpoint",
                "`auth_url` must be set, either in the provider block or with `OS_AUTH_URL`",
                AttributePath::new("auth_url"),
            );
        }
        if self.region.is_empty() && !raw.region.is_unknown() {
            diags.error(
                "Missing region",
                "`region` must be set, either in the provider block or with `OS_REGION_NAME`",
                AttributePath::new("region"),
            );
        }
        let has_password = self.user_name.is_some() && self.password.is_some();
        let maybe_later = raw.token.is_unknown()
            || raw.user_name.is_unknown()
            || raw.password.is_unknown();
        if self.token.is_none() && !has_password && !maybe_later {
            diags.root_error(
                "Missing credentials",
                "Either `token` or both `user_name` and `password` must be provided",
            );
        }
        if self.token.is_some() && self.tenant_id.is_none() && !raw.tenant_id.is_unknown() {
            diags.error(
                "Missing project id",
                "`tenant_id` is required when authenticating with a pre-issued `token`",
                AttributePath::new("tenant_id"),
            );
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            diags.root_error(
                "Incomplete object storage credentials",
                "`access_key` and `secret_key` must be set together",
            );
        }
        if let Some(retries) = raw.max_retries.as_ref_option() {
            if *retries < 0 {
                diags.error_short(
                    "`max_retries` must be positive",
                    AttributePath::new("max_retries"),
                );
            }
        }
    }
}

fn string_attribute(description: &str, sensitive: bool) -> Attribute {
    Attribute {
        attr_type: AttributeType::String,
        description: Description::plain(description),
        constraint: AttributeConstraint::Optional,
        sensitive,
        ..Default::default()
    }
}

impl<'a> WithSchema for ProviderConfig<'a> {
    fn schema() -> Schema {
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "auth_url" => string_attribute("Identity endpoint (OS_AUTH_URL)", false),
                    "region" => string_attribute("Region of the resources (OS_REGION_NAME)", false),
                    "user_name" => string_attribute("User to authenticate with (OS_USERNAME)", false),
                    "password" => string_attribute("Password of the user (OS_PASSWORD)", true),
                    "domain_name" => string_attribute("Domain of the user (OS_DOMAIN_NAME)", false),
                    "tenant_name" => string_attribute("Project name, defaults to the region (OS_TENANT_NAME)", false),
                    "tenant_id" => string_attribute("Project id (OS_TENANT_ID)", false),
                    "token" => string_attribute("Pre-issued authentication token (OS_AUTH_TOKEN)", true),
                    "access_key" => string_attribute("Access key used for object storage (OS_ACCESS_KEY)", false),
                    "secret_key" => string_attribute("Secret key used for object storage (OS_SECRET_KEY)", true),
                    "cloud" => string_attribute("Domain suffix of the service endpoints (OS_CLOUD)", false),
                    "insecure" => Attribute {
                        attr_type: AttributeType::Bool,
                        description: Description::plain("Skip TLS certificate verification"),
                        constraint: AttributeConstraint::Optional,
                        ..Default::default()
                    },
                    "max_retries" => Attribute {
                        attr_type: AttributeType::Number,
                        description: Description::plain("Number of retries of throttled or failed requests"),
                        constraint: AttributeConstraint::Optional,
                        ..Default::default()
                    },
                    "endpoints" => Attribute {
                        attr_type: AttributeType::Map(AttributeType::String.into()),
                        description: Description::plain("Override of the endpoint of a service (e.g. `ecs`)"),
                        constraint: AttributeConstraint::Optional,
                        ..Default::default()
                    },
                },
                description: Description::plain("Open Telekom Cloud"),
                ..Default::default()
            },
        }
    }
}
