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

use std::borrow::Cow;
use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tf_provider::{Attribute, AttributeConstraint, AttributeType, Description, Value, ValueMap, ValueString};

use crate::client::ServiceClient;

pub type Tags<'a> = ValueMap<'a, ValueString<'a>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

pub fn tags_attribute() -> Attribute {
    Attribute {
        attr_type: AttributeType::Map(AttributeType::String.into()),
        description: Description::plain("Key/value tags of the resource"),
        constraint: AttributeConstraint::Optional,
        ..Default::default()
    }
}

pub fn expand_tags(tags: &Tags) -> Vec<Tag> {
    tags.iter()
        .flatten()
        .map(|(key, value)| Tag {
            key: key.to_string(),
            value: value.as_deref_option().unwrap_or_default().to_owned(),
        })
        .collect()
}

/// Tags as stored in the state, null when the remote object has none
pub fn flatten_tags<'a>(tags: Vec<Tag>) -> Tags<'a> {
    if tags.is_empty() {
        return Value::Null;
    }
    Value::Value(
        tags.into_iter()
            .map(|tag| (Cow::Owned(tag.key), Value::Value(Cow::Owned(tag.value))))
            .collect(),
    )
}

/// Tags to remove and tags to create so that `old` becomes `new`
///
/// A tag whose value changed is removed then created again.
pub fn diff_tags(old: &Tags, new: &Tags) -> (Vec<Tag>, Vec<Tag>) {
    let old: BTreeMap<String, String> = expand_tags(old)
        .into_iter()
        .map(|tag| (tag.key, tag.value))
        .collect();
    let new: BTreeMap<String, String> = expand_tags(new)
        .into_iter()
        .map(|tag| (tag.key, tag.value))
        .collect();

    let remove = old
        .iter()
        .filter(|(key, value)| new.get(*key) != Some(*value))
        .map(|(key, value)| Tag {
            key: key.clone(),
            value: value.clone(),
        })
        .collect();
    let create = new
        .iter()
        .filter(|(key, value)| old.get(*key) != Some(*value))
        .map(|(key, value)| Tag {
            key: key.clone(),
            value: value.clone(),
        })
        .collect();
    (remove, create)
}

/// Apply a tag change with the batch `tags/action` API found at `path`
pub async fn update_tags(service: &ServiceClient<'_>, path: &str, old: &Tags<'_>, new: &Tags<'_>) -> Result<()> {
    let (remove, create) = diff_tags(old, new);
    let path = format!("{path}/tags/action");

    if !remove.is_empty() {
        service
            .action(&path, &json!({ "action": "delete", "tags": remove }))
            .await
            .context("Error deleting tags")?;
    }
    if !create.is_empty() {
        service
            .action(&path, &json!({ "action": "create", "tags": create }))
            .await
            .context("Error creating tags")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&'static str, &'static str)]) -> Tags<'static> {
        Value::Value(
            pairs
                .iter()
                .map(|(k, v)| (Cow::Borrowed(*k), Value::from(*v)))
                .collect(),
        )
    }

    fn keys(tags: &[Tag]) -> Vec<&str> {
        tags.iter().map(|tag| tag.key.as_str()).collect()
    }

    #[test]
    fn changed_values_are_removed_and_created() {
        let old = tags(&[("env", "dev"), ("team", "a"), ("gone", "x")]);
        let new = tags(&[("env", "prod"), ("team", "a"), ("new", "y")]);
        let (remove, create) = diff_tags(&old, &new);
        assert_eq!(keys(&remove), ["env", "gone"]);
        assert_eq!(keys(&create), ["env", "new"]);
        assert_eq!(create[0].value, "prod");
    }

    #[test]
    fn null_maps_are_empty() {
        let (remove, create) = diff_tags(&Value::Null, &tags(&[("a", "1")]));
        assert!(remove.is_empty());
        assert_eq!(keys(&create), ["a"]);

        let (remove, create) = diff_tags(&tags(&[("a", "1")]), &Value::Null);
        assert_eq!(keys(&remove), ["a"]);
        assert!(create.is_empty());
    }

    #[test]
    fn flatten_is_null_without_tags() {
        assert!(flatten_tags(Vec::new()).is_null());
        let flat = flatten_tags(vec![Tag {
            key: "k".to_owned(),
            value: "v".to_owned(),
        }]);
        assert_eq!(flat, tags(&[("k", "v")]));
        assert_eq!(expand_tags(&flat).len(), 1);
    }
}
