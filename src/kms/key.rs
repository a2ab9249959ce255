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
use serde::{Deserialize, Serialize};
use serde_json::json;
use tf_provider::{
    map, value::ValueBool, AttributeConstraint, AttributePath, AttributeType, Block, Description,
    Diagnostics, Schema, Value, ValueNumber, ValueString,
};
use tracing::info;

use crate::client::CloudClient;
use crate::resource::{CloudResource, CreateResult, KeepState};
use crate::utils::{
    attribute, force_new, known_string, string_or_null, unknown_if_null, validate_range,
    ID_ATTRIBUTE,
};

use super::{describe_key, kms_path, KeyInfo, KeyInfoBody, ENABLED, PENDING_DELETION};

const DEFAULT_PENDING_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KeyState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub key_alias: ValueString<'a>,
    pub key_description: ValueString<'a>,
    pub realm: ValueString<'a>,
    pub pending_days: ValueNumber,
    pub is_enabled: ValueBool,
    pub key_id: ValueString<'a>,
    pub domain_id: ValueString<'a>,
    pub default_key_flag: ValueString<'a>,
    pub scheduled_deletion_date: ValueString<'a>,
    pub origin: ValueString<'a>,
}

/// `otc_kms_key_v1`
#[derive(Debug, Default)]
pub struct KmsKey;

impl KmsKey {
    fn apply<'a>(mut state: KeyState<'a>, key: KeyInfo) -> KeyState<'a> {
        state.is_enabled = Value::Value(key.key_state == ENABLED);
        state.id = Value::from(key.key_id.clone());
        state.key_id = Value::from(key.key_id);
        state.key_alias = Value::from(key.key_alias);
        state.key_description = string_or_null(Some(key.key_description));
        state.realm = string_or_null(Some(key.realm));
        state.domain_id = string_or_null(Some(key.domain_id));
        state.default_key_flag = Value::from(key.default_key_flag);
        state.scheduled_deletion_date = string_or_null(Some(key.scheduled_deletion_date));
        state.origin = string_or_null(Some(key.origin));
        if state.pending_days.is_null() || state.pending_days.is_unknown() {
            state.pending_days = Value::Value(DEFAULT_PENDING_DAYS);
        }
        state
    }
}

#[async_trait]
impl CloudResource for KmsKey {
    const NAME: &'static str = "otc_kms_key_v1";

    type State<'a> = KeyState<'a>;

    fn schema() -> Schema {
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => ID_ATTRIBUTE.clone(),
                    "key_alias" => attribute(AttributeType::String, AttributeConstraint::Required, "Alias of the key"),
                    "key_description" => attribute(AttributeType::String, AttributeConstraint::Optional, "Description of the key"),
                    "realm" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "Region of the key"),
                    "pending_days" => attribute(AttributeType::Number, AttributeConstraint::OptionalComputed, "Days before a scheduled deletion, between 7 and 1096"),
                    "is_enabled" => attribute(AttributeType::Bool, AttributeConstraint::OptionalComputed, "Whether the key is enabled"),
                    "key_id" => attribute(AttributeType::String, AttributeConstraint::Computed, "Identifier of the key"),
                    "domain_id" => attribute(AttributeType::String, AttributeConstraint::Computed, "Domain owning the key"),
                    "default_key_flag" => attribute(AttributeType::String, AttributeConstraint::Computed, "`1` for the default master key"),
                    "scheduled_deletion_date" => attribute(AttributeType::String, AttributeConstraint::Computed, "Date the key gets deleted"),
                    "origin" => attribute(AttributeType::String, AttributeConstraint::Computed, "Origin of the key material"),
                },
                description: Description::plain("KMS customer master key"),
                ..Default::default()
            },
        }
    }

    fn validate(&self, diags: &mut Diagnostics, config: &Self::State<'_>) {
        validate_range(diags, "pending_days", &config.pending_days, 7, 1096);
    }

    fn plan_create<'a>(&self, _diags: &mut Diagnostics, mut proposed: Self::State<'a>) -> Self::State<'a> {
        proposed.id = Value::Unknown;
        proposed.key_id = Value::Unknown;
        proposed.domain_id = Value::Unknown;
        proposed.default_key_flag = Value::Unknown;
        proposed.scheduled_deletion_date = Value::Unknown;
        proposed.origin = Value::Unknown;
        unknown_if_null(&mut proposed.realm);
        if proposed.pending_days.is_null() {
            proposed.pending_days = Value::Value(DEFAULT_PENDING_DAYS);
        }
        if proposed.is_enabled.is_null() {
            proposed.is_enabled = Value::Value(true);
        }
        proposed
    }

    fn plan_update<'a>(
        &self,
        _diags: &mut Diagnostics,
        prior: &Self::State<'a>,
        mut proposed: Self::State<'a>,
    ) -> (Self::State<'a>, Vec<AttributePath>) {
        let mut replace = Vec::new();
        if !proposed.realm.is_null() {
            force_new(&mut replace, "realm", &prior.realm, &proposed.realm);
        }
        if proposed.pending_days.is_null() {
            proposed.pending_days = Value::Value(DEFAULT_PENDING_DAYS);
        }
        if proposed.is_enabled.is_null() {
            proposed.is_enabled = Value::Value(true);
        }
        (proposed, replace)
    }

    async fn create<'a>(&self, client: &CloudClient, mut planned: Self::State<'a>) -> CreateResult<Self::State<'a>> {
        let kms = client.service("kms");
        let project_id = kms.project_id().await?;
        let created: KeyInfoBody = kms
            .post(
                &kms_path(&project_id, "create-key"),
                &json!({
                    "key_alias": planned.key_alias.as_str(),
                    "key_description": known_string(&planned.key_description),
                    "realm": known_string(&planned.realm),
                }),
            )
            .await
            .context("Error creating KMS key")?;
        let key_id = created.key_info.key_id;
        info!(key_id, "KMS key created");
        planned.id = Value::from(key_id.clone());
        planned.key_id = Value::from(key_id.clone());

        if planned.is_enabled.as_ref_option() == Some(&false) {
            kms.action(&kms_path(&project_id, "disable-key"), &json!({ "key_id": key_id }))
                .await
                .context("Error disabling KMS key")
                .keep_state(&planned)?;
        }

        let key = describe_key(&kms, &key_id)
            .await
            .context("Error reading KMS key")
            .and_then(|key| key.ok_or_else(|| anyhow!("KMS key {key_id} disappeared after creation")))
            .keep_state(&planned)?;
        Ok(Self::apply(planned, key))
    }

    async fn read<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<Option<Self::State<'a>>> {
        let key = describe_key(&client.service("kms"), state.id.as_str())
            .await
            .context("Error reading KMS key")?;
        Ok(key
            .filter(|key| key.key_state != PENDING_DELETION)
            .map(|key| Self::apply(state, key)))
    }

    async fn update<'a>(
        &self,
        client: &CloudClient,
        prior: Self::State<'a>,
        planned: Self::State<'a>,
    ) -> Result<Self::State<'a>> {
        let kms = client.service("kms");
        let project_id = kms.project_id().await?;
        let key_id = prior.id.as_str();

        if prior.key_alias != planned.key_alias {
            kms.action(
                &kms_path(&project_id, "update-key-alias"),
                &json!({ "key_id": key_id, "key_alias": planned.key_alias.as_str() }),
            )
            .await
            .context("Error updating KMS key alias")?;
        }
        if prior.key_description != planned.key_description {
            kms.action(
                &kms_path(&project_id, "update-key-description"),
                &json!({
                    "key_id": key_id,
                    "key_description": planned.key_description.as_deref_option().unwrap_or_default(),
                }),
            )
            .await
            .context("Error updating KMS key description")?;
        }
        if prior.is_enabled != planned.is_enabled {
            let action = match planned.is_enabled.as_ref_option() {
                Some(false) => "disable-key",
                _ => "enable-key",
            };
            kms.action(&kms_path(&project_id, action), &json!({ "key_id": key_id }))
                .await
                .with_context(|| format!("Error calling {action} on KMS key"))?;
        }

        let key = describe_key(&kms, key_id)
            .await
            .context("Error reading KMS key")?
            .ok_or_else(|| anyhow!("KMS key {key_id} disappeared"))?;
        Ok(Self::apply(planned, key))
    }

    async fn delete<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<()> {
        let kms = client.service("kms");
        let project_id = kms.project_id().await?;
        let pending_days = state
            .pending_days
            .as_ref_option()
            .copied()
            .unwrap_or(DEFAULT_PENDING_DAYS);
        kms.action(
            &kms_path(&project_id, "schedule-key-deletion"),
            &json!({
                "key_id": state.id.as_str(),
                "pending_days": pending_days.to_string(),
            }),
        )
        .await
        .context("Error scheduling KMS key deletion")?;
        info!(key_id = state.id.as_str(), pending_days, "KMS key deletion scheduled");
        Ok(())
    }

    fn import<'a>(&self, id: String) -> Option<Self::State<'a>> {
        Some(KeyState {
            id: Value::from(id),
            ..Default::default()
        })
    }
}
