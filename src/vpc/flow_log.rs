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

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tf_provider::{
    map, value::ValueBool, AttributeConstraint, AttributePath, AttributeType, Block, Description,
    Diagnostics, Schema, Value, ValueString,
};

use crate::client::{check_deleted, CloudClient};
use crate::resource::{CloudResource, CreateResult, KeepState};
use crate::utils::{
    attribute, force_new, known_string, string_or_null, unknown_if_null, validate_one_of,
    ID_ATTRIBUTE,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowLogState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub name: ValueString<'a>,
    pub description: ValueString<'a>,
    pub resource_type: ValueString<'a>,
    pub resource_id: ValueString<'a>,
    pub traffic_type: ValueString<'a>,
    pub log_group_id: ValueString<'a>,
    pub log_topic_id: ValueString<'a>,
    pub admin_state: ValueBool,
    pub status: ValueString<'a>,
}

#[derive(Debug, Deserialize)]
struct FlowLogBody {
    flow_log: FlowLogObject,
}

#[derive(Debug, Deserialize)]
struct FlowLogObject {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    resource_type: String,
    resource_id: String,
    traffic_type: String,
    log_group_id: String,
    log_topic_id: String,
    #[serde(default)]
    admin_state: bool,
    #[serde(default)]
    status: String,
}

/// `otc_vpc_flow_log_v1`
#[derive(Debug, Default)]
pub struct FlowLog;

fn flow_log_path(project_id: &str, id: &str) -> String {
    format!("/v1/{project_id}/fl/flow_logs/{id}")
}

impl FlowLog {
    fn apply<'a>(mut state: FlowLogState<'a>, flow_log: FlowLogObject) -> FlowLogState<'a> {
        state.id = Value::from(flow_log.id);
        state.name = string_or_null(Some(flow_log.name));
        state.description = string_or_null(flow_log.description);
        state.resource_type = Value::from(flow_log.resource_type);
        state.resource_id = Value::from(flow_log.resource_id);
        state.traffic_type = Value::from(flow_log.traffic_type);
        state.log_group_id = Value::from(flow_log.log_group_id);
        state.log_topic_id = Value::from(flow_log.log_topic_id);
        state.admin_state = Value::Value(flow_log.admin_state);
        state.status = Value::from(flow_log.status);
        state
    }
}

#[async_trait]
impl CloudResource for FlowLog {
    const NAME: &'static str = "otc_vpc_flow_log_v1";

    type State<'a> = FlowLogState<'a>;

    fn schema() -> Schema {
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => ID_ATTRIBUTE.clone(),
                    "name" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "Name of the flow log"),
                    "description" => attribute(AttributeType::String, AttributeConstraint::Optional, "Description"),
                    "resource_type" => attribute(AttributeType::String, AttributeConstraint::Required, "Type of the logged resource: `port`, `network` or `vpc`"),
                    "resource_id" => attribute(AttributeType::String, AttributeConstraint::Required, "Logged resource"),
                    "traffic_type" => attribute(AttributeType::String, AttributeConstraint::Required, "Logged traffic: `all`, `accept` or `reject`"),
                    "log_group_id" => attribute(AttributeType::String, AttributeConstraint::Required, "LTS log group"),
                    "log_topic_id" => attribute(AttributeType::String, AttributeConstraint::Required, "LTS log topic"),
                    "admin_state" => attribute(AttributeType::Bool, AttributeConstraint::OptionalComputed, "Whether the flow log is enabled"),
                    "status" => attribute(AttributeType::String, AttributeConstraint::Computed, "Status of the flow log"),
                },
                description: Description::plain("VPC flow log"),
                ..Default::default()
            },
        }
    }

    fn validate(&self, diags: &mut Diagnostics, config: &Self::State<'_>) {
        validate_one_of(diags, "resource_type", &config.resource_type, &["port", "network", "vpc"]);
        validate_one_of(diags, "traffic_type", &config.traffic_type, &["all", "accept", "reject"]);
    }

    fn plan_create<'a>(&self, _diags: &mut Diagnostics, mut proposed: Self::State<'a>) -> Self::State<'a> {
        proposed.id = Value::Unknown;
        proposed.status = Value::Unknown;
        unknown_if_null(&mut proposed.name);
        unknown_if_null(&mut proposed.admin_state);
        proposed
    }

    fn plan_update<'a>(
        &self,
        _diags: &mut Diagnostics,
        prior: &Self::State<'a>,
        mut proposed: Self::State<'a>,
    ) -> (Self::State<'a>, Vec<AttributePath>) {
        let mut replace = Vec::new();
        force_new(&mut replace, "resource_type", &prior.resource_type, &proposed.resource_type);
        force_new(&mut replace, "resource_id", &prior.resource_id, &proposed.resource_id);
        force_new(&mut replace, "traffic_type", &prior.traffic_type, &proposed.traffic_type);
        force_new(&mut replace, "log_group_id", &prior.log_group_id, &proposed.log_group_id);
        force_new(&mut replace, "log_topic_id", &prior.log_topic_id, &proposed.log_topic_id);
        if prior.admin_state != proposed.admin_state {
            proposed.status = Value::Unknown;
        }
        (proposed, replace)
    }

    async fn create<'a>(&self, client: &CloudClient, mut planned: Self::State<'a>) -> CreateResult<Self::State<'a>> {
        let vpc = client.service("vpc");
        let project_id = vpc.project_id().await?;
        let created: FlowLogBody = vpc
            .post(
                &format!("/v1/{project_id}/fl/flow_logs"),
                &json!({
                    "flow_log": {
                        "name": known_string(&planned.name),
                        "description": known_string(&planned.description),
                        "resource_type": planned.resource_type.as_str(),
                        "resource_id": planned.resource_id.as_str(),
                        "traffic_type": planned.traffic_type.as_str(),
                        "log_group_id": planned.log_group_id.as_str(),
                        "log_topic_id": planned.log_topic_id.as_str(),
                    }
                }),
            )
            .await
            .context("Error creating flow log")?;

        let mut flow_log = created.flow_log;
        planned.id = Value::from(flow_log.id.clone());
        if planned.admin_state.as_ref_option() == Some(&false) {
            let updated: FlowLogBody = vpc
                .put(
                    &flow_log_path(&project_id, &flow_log.id),
                    &json!({ "flow_log": { "admin_state": false } }),
                )
                .await
                .context("Error disabling flow log")
                .keep_state(&planned)?;
            flow_log = updated.flow_log;
        }
        Ok(Self::apply(planned, flow_log))
    }

    async fn read<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<Option<Self::State<'a>>> {
        let vpc = client.service("vpc");
        let project_id = vpc.project_id().await?;
        let flow_log = check_deleted(
            vpc.get::<FlowLogBody>(&flow_log_path(&project_id, state.id.as_str()))
                .await,
        )
        .context("Error reading flow log")?;
        Ok(flow_log.map(|body| Self::apply(state, body.flow_log)))
    }

    async fn update<'a>(
        &self,
        client: &CloudClient,
        _prior: Self::State<'a>,
        planned: Self::State<'a>,
    ) -> Result<Self::State<'a>> {
        let vpc = client.service("vpc");
        let project_id = vpc.project_id().await?;
        let mut body = json!({
            "name": planned.name.as_str(),
            "description": planned.description.as_deref_option().unwrap_or_default(),
        });
        if let Some(admin_state) = planned.admin_state.as_ref_option() {
            body["admin_state"] = json!(admin_state);
        }
        let updated: FlowLogBody = vpc
            .put(
                &flow_log_path(&project_id, planned.id.as_str()),
                &json!({ "flow_log": body }),
            )
            .await
            .context("Error updating flow log")?;
        Ok(Self::apply(planned, updated.flow_log))
    }

    async fn delete<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<()> {
        let vpc = client.service("vpc");
        let project_id = vpc.project_id().await?;
        vpc.delete(&flow_log_path(&project_id, state.id.as_str()))
            .await
            .context("Error deleting flow log")?;
        Ok(())
    }

    fn import<'a>(&self, id: String) -> Option<Self::State<'a>> {
        Some(FlowLogState {
            id: Value::from(id),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow_log() -> FlowLogState<'static> {
        FlowLogState {
            id: Value::from("fl-1"),
            name: Value::from("logs"),
            resource_type: Value::from("port"),
            resource_id: Value::from("port-1"),
            traffic_type: Value::from("all"),
            log_group_id: Value::from("g"),
            log_topic_id: Value::from("t"),
            admin_state: Value::Value(true),
            status: Value::from("ACTIVE"),
            ..Default::default()
        }
    }

    #[test]
    fn name_and_state_are_updatable() {
        let mut diags = Diagnostics::default();
        let proposed = FlowLogState {
            name: Value::from("renamed"),
            admin_state: Value::Value(false),
            ..flow_log()
        };
        let (state, replace) = FlowLog.plan_update(&mut diags, &flow_log(), proposed);
        assert!(replace.is_empty());
        assert!(state.status.is_unknown());
    }

    #[test]
    fn resource_change_forces_replacement() {
        let mut diags = Diagnostics::default();
        let proposed = FlowLogState {
            resource_id: Value::from("port-2"),
            ..flow_log()
        };
        let (_, replace) = FlowLog.plan_update(&mut diags, &flow_log(), proposed);
        assert_eq!(replace, [AttributePath::new("resource_id")]);
    }

    #[test]
    fn invalid_types_are_rejected() {
        let mut diags = Diagnostics::default();
        let config = FlowLogState {
            resource_type: Value::from("subnet"),
            traffic_type: Value::from("everything"),
            ..flow_log()
        };
        FlowLog.validate(&mut diags, &config);
        assert_eq!(diags.errors.len(), 2);
    }

    #[test]
    fn plan_create_leaves_optional_description_null() {
        let mut diags = Diagnostics::default();
        let state = FlowLog.plan_create(
            &mut diags,
            FlowLogState {
                id: Value::Null,
                name: Value::Null,
                admin_state: Value::Null,
                status: Value::Null,
                ..flow_log()
            },
        );
        assert!(state.id.is_unknown());
        assert!(state.name.is_unknown());
        assert!(state.admin_state.is_unknown());
        assert!(state.description.is_null());
    }
}
