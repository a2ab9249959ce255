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

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tf_provider::{
    map, AttributeConstraint, AttributeType, Block, Description, Diagnostics, Schema, Value,
    ValueString,
};
use tracing::debug;

use crate::client::CloudClient;
use crate::resource::CloudDataSource;
use crate::utils::{attribute, string_or_null, validate_one_of};

use super::{describe_key, kms_path, KeyInfo};

const DESCRIBE_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KeyDataState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub key_alias: ValueString<'a>,
    pub key_id: ValueString<'a>,
    pub key_state: ValueString<'a>,
    pub key_description: ValueString<'a>,
    pub realm: ValueString<'a>,
    pub domain_id: ValueString<'a>,
    pub creation_date: ValueString<'a>,
    pub scheduled_deletion_date: ValueString<'a>,
    pub default_key_flag: ValueString<'a>,
    pub origin: ValueString<'a>,
}

/// Criteria a key must match, unset criteria match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFilter {
    pub key_alias: Option<String>,
    pub key_id: Option<String>,
    pub key_state: Option<String>,
}

impl KeyFilter {
    fn matches(&self, key: &KeyInfo) -> bool {
        let check = |criterion: &Option<String>, value: &str| {
            criterion.as_deref().map_or(true, |criterion| criterion == value)
        };
        check(&self.key_alias, &key.key_alias)
            && check(&self.key_id, &key.key_id)
            && check(&self.key_state, &key.key_state)
    }
}

/// The single key matching the filter
pub(super) fn select_key(filter: &KeyFilter, keys: Vec<KeyInfo>) -> Result<KeyInfo> {
    let mut matching: Vec<_> = keys.into_iter().filter(|key| filter.matches(key)).collect();
    match matching.len() {
        0 => Err(anyhow!(
            "Your query returned no results. Please change your search criteria and try again."
        )),
        1 => Ok(matching.swap_remove(0)),
        n => Err(anyhow!(
            "Your query returned {n} results. Please try a more specific search criteria."
        )),
    }
}

#[derive(Debug, Deserialize)]
struct KeyList {
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    next_marker: String,
    #[serde(default)]
    truncated: String,
}

/// `otc_kms_key_v1` data source
#[derive(Debug, Default)]
pub struct KmsKeyDataSource;

#[async_trait]
impl CloudDataSource for KmsKeyDataSource {
    const NAME: &'static str = "otc_kms_key_v1";

    type State<'a> = KeyDataState<'a>;

    fn schema() -> Schema {
        let computed = |description: &str| {
            attribute(AttributeType::String, AttributeConstraint::Computed, description)
        };
        let filter = |description: &str| {
            attribute(AttributeType::String, AttributeConstraint::OptionalComputed, description)
        };
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => computed("Identifier of the key"),
                    "key_alias" => filter("Alias of the key"),
                    "key_id" => filter("Identifier of the key"),
                    "key_state" => filter("State of the key: `1` to `5`"),
                    "key_description" => computed("Description of the key"),
                    "realm" => computed("Region of the key"),
                    "domain_id" => computed("Domain owning the key"),
                    "creation_date" => computed("Creation timestamp"),
                    "scheduled_deletion_date" => computed("Date the key gets deleted"),
                    "default_key_flag" => computed("`1` for the default master key"),
                    "origin" => computed("Origin of the key material"),
                },
                description: Description::plain("Look up a single KMS key"),
                ..Default::default()
            },
        }
    }

    fn validate(&self, diags: &mut Diagnostics, config: &Self::State<'_>) {
        validate_one_of(diags, "key_state", &config.key_state, &["1", "2", "3", "4", "5"]);
    }

    async fn read<'a>(&self, client: &CloudClient, config: Self::State<'a>) -> Result<Self::State<'a>> {
        let kms = client.service("kms");
        let project_id = kms.project_id().await?;
        let filter = KeyFilter {
            key_alias: config.key_alias.as_deref_option().map(str::to_owned),
            key_id: config.key_id.as_deref_option().map(str::to_owned),
            key_state: config.key_state.as_deref_option().map(str::to_owned),
        };

        let mut key_ids = Vec::new();
        let mut marker = String::new();
        loop {
            let mut body = json!({ "limit": "1000" });
            if !marker.is_empty() {
                body["marker"] = json!(marker);
            }
            if let Some(key_state) = &filter.key_state {
                body["key_state"] = json!(key_state);
            }
            let page: KeyList = kms
                .post(&kms_path(&project_id, "list-keys"), &body)
                .await
                .context("Error listing KMS keys")?;
            key_ids.extend(page.keys);
            if page.truncated != "true" || page.next_marker.is_empty() {
                break;
            }
            marker = page.next_marker;
        }
        debug!(count = key_ids.len(), "KMS keys listed");

        let kms = &kms;
        let keys: Vec<KeyInfo> = stream::iter(key_ids)
            .map(|key_id| async move { describe_key(kms, &key_id).await })
            .buffer_unordered(DESCRIBE_CONCURRENCY)
            .try_filter_map(|key| async move { Ok(key) })
            .try_collect()
            .await
            .context("Error describing KMS keys")?;

        let key = select_key(&filter, keys)?;
        Ok(KeyDataState {
            id: Value::from(key.key_id.clone()),
            key_alias: Value::from(key.key_alias),
            key_id: Value::from(key.key_id),
            key_state: Value::from(key.key_state),
            key_description: string_or_null(Some(key.key_description)),
            realm: string_or_null(Some(key.realm)),
            domain_id: string_or_null(Some(key.domain_id)),
            creation_date: string_or_null(Some(key.creation_date)),
            scheduled_deletion_date: string_or_null(Some(key.scheduled_deletion_date)),
            default_key_flag: string_or_null(Some(key.default_key_flag)),
            origin: string_or_null(Some(key.origin)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str, alias: &str, state: &str) -> KeyInfo {
        KeyInfo {
            key_id: id.to_owned(),
            key_alias: alias.to_owned(),
            key_state: state.to_owned(),
            ..Default::default()
        }
    }

    fn keys() -> Vec<KeyInfo> {
        vec![
            key("k-1", "app", "2"),
            key("k-2", "app", "4"),
            key("k-3", "db", "2"),
        ]
    }

    #[test]
    fn single_match_is_returned() {
        let filter = KeyFilter {
            key_alias: Some("app".to_owned()),
            key_state: Some("2".to_owned()),
            ..Default::default()
        };
        assert_eq!(select_key(&filter, keys()).unwrap().key_id, "k-1");
    }

    #[test]
    fn ambiguous_query_fails() {
        let filter = KeyFilter {
            key_alias: Some("app".to_owned()),
            ..Default::default()
        };
        let err = select_key(&filter, keys()).unwrap_err().to_string();
        assert!(err.contains("2 results"));
    }

    #[test]
    fn empty_query_fails() {
        let filter = KeyFilter {
            key_id: Some("k-9".to_owned()),
            ..Default::default()
        };
        let err = select_key(&filter, keys()).unwrap_err().to_string();
        assert!(err.contains("no results"));
    }

    #[test]
    fn invalid_state_filter() {
        let mut diags = Diagnostics::default();
        KmsKeyDataSource.validate(
            &mut diags,
            &KeyDataState {
                key_state: Value::from("9"),
                ..Default::default()
            },
        );
        assert_eq!(diags.errors.len(), 1);
    }
}
