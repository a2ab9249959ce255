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
    map, AttributeConstraint, AttributePath, AttributeType, Block, Description, Diagnostics,
    Schema, Value, ValueNumber, ValueString,
};
use tracing::info;

use crate::client::{check_deleted, CloudClient, ServiceClient};
use crate::resource::{CloudResource, CreateResult, KeepState};
use crate::utils::{
    attribute, force_new, known_string, string_or_null, unknown_if_null, validate_one_of,
    validate_range, ID_ATTRIBUTE,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueueState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub name: ValueString<'a>,
    pub description: ValueString<'a>,
    pub queue_mode: ValueString<'a>,
    pub redrive_policy: ValueString<'a>,
    pub max_consume_count: ValueNumber,
    pub retention_hours: ValueNumber,
    pub created: ValueNumber,
    pub reservation: ValueNumber,
    pub max_msg_size_byte: ValueNumber,
    pub produced_messages: ValueNumber,
    pub group_count: ValueNumber,
}

#[derive(Debug, Deserialize)]
struct Queue {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    queue_mode: String,
    #[serde(default)]
    redrive_policy: Option<String>,
    #[serde(default)]
    max_consume_count: Option<i64>,
    #[serde(default)]
    retention_hours: Option<i64>,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    reservation: i64,
    #[serde(default)]
    max_msg_size_byte: i64,
    #[serde(default)]
    produced_messages: i64,
    #[serde(default)]
    group_count: i64,
}

#[derive(Debug, Deserialize)]
struct CreatedQueue {
    id: String,
}

fn queue_path(project_id: &str, id: &str) -> String {
    format!("/v1.0/{project_id}/queues/{id}")
}

async fn get_queue(dms: &ServiceClient<'_>, id: &str) -> Result<Option<Queue>> {
    let project_id = dms.project_id().await?;
    Ok(check_deleted(dms.get(&queue_path(&project_id, id)).await)?)
}

/// `otc_dms_queue_v1`
#[derive(Debug, Default)]
pub struct DmsQueue;

impl DmsQueue {
    fn apply<'a>(mut state: QueueState<'a>, queue: Queue) -> QueueState<'a> {
        state.id = Value::from(queue.id);
        state.name = Value::from(queue.name);
        state.description = string_or_null(queue.description);
        state.queue_mode = Value::from(queue.queue_mode);
        state.redrive_policy = string_or_null(queue.redrive_policy);
        state.max_consume_count = queue.max_consume_count.into();
        state.retention_hours = queue.retention_hours.into();
        state.created = Value::Value(queue.created);
        state.reservation = Value::Value(queue.reservation);
        state.max_msg_size_byte = Value::Value(queue.max_msg_size_byte);
        state.produced_messages = Value::Value(queue.produced_messages);
        state.group_count = Value::Value(queue.group_count);
        state
    }
}

#[async_trait]
impl CloudResource for DmsQueue {
    const NAME: &'static str = "otc_dms_queue_v1";

    type State<'a> = QueueState<'a>;

    fn schema() -> Schema {
        let computed = |description: &str| {
            attribute(AttributeType::Number, AttributeConstraint::Computed, description)
        };
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => ID_ATTRIBUTE.clone(),
                    "name" => attribute(AttributeType::String, AttributeConstraint::Required, "Name of the queue"),
                    "description" => attribute(AttributeType::String, AttributeConstraint::Optional, "Description of the queue"),
                    "queue_mode" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "`NORMAL` or `FIFO`"),
                    "redrive_policy" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "Dead letter policy: `enable` or `disable`"),
                    "max_consume_count" => attribute(AttributeType::Number, AttributeConstraint::OptionalComputed, "Consumption attempts before dead lettering, between 1 and 100"),
                    "retention_hours" => attribute(AttributeType::Number, AttributeConstraint::OptionalComputed, "Message retention, between 1 and 72 hours"),
                    "created" => computed("Creation timestamp in milliseconds"),
                    "reservation" => computed("Message retention in minutes"),
                    "max_msg_size_byte" => computed("Maximum message size"),
                    "produced_messages" => computed("Number of messages in the queue"),
                    "group_count" => computed("Number of consumer groups"),
                },
                description: Description::plain("DMS message queue"),
                ..Default::default()
            },
        }
    }

    fn validate(&self, diags: &mut Diagnostics, config: &Self::State<'_>) {
        validate_one_of(diags, "queue_mode", &config.queue_mode, &["NORMAL", "FIFO"]);
        validate_one_of(diags, "redrive_policy", &config.redrive_policy, &["enable", "disable"]);
        validate_range(diags, "max_consume_count", &config.max_consume_count, 1, 100);
        validate_range(diags, "retention_hours", &config.retention_hours, 1, 72);
    }

    fn plan_create<'a>(&self, _diags: &mut Diagnostics, mut proposed: Self::State<'a>) -> Self::State<'a> {
        proposed.id = Value::Unknown;
        unknown_if_null(&mut proposed.queue_mode);
        unknown_if_null(&mut proposed.redrive_policy);
        unknown_if_null(&mut proposed.max_consume_count);
        unknown_if_null(&mut proposed.retention_hours);
        proposed.created = Value::Unknown;
        proposed.reservation = Value::Unknown;
        proposed.max_msg_size_byte = Value::Unknown;
        proposed.produced_messages = Value::Unknown;
        proposed.group_count = Value::Unknown;
        proposed
    }

    fn plan_update<'a>(
        &self,
        _diags: &mut Diagnostics,
        prior: &Self::State<'a>,
        proposed: Self::State<'a>,
    ) -> (Self::State<'a>, Vec<AttributePath>) {
        let mut replace = Vec::new();
        force_new(&mut replace, "name", &prior.name, &proposed.name);
        force_new(&mut replace, "description", &prior.description, &proposed.description);
        force_new(&mut replace, "queue_mode", &prior.queue_mode, &proposed.queue_mode);
        force_new(&mut replace, "redrive_policy", &prior.redrive_policy, &proposed.redrive_policy);
        force_new(&mut replace, "max_consume_count", &prior.max_consume_count, &proposed.max_consume_count);
        force_new(&mut replace, "retention_hours", &prior.retention_hours, &proposed.retention_hours);
        (proposed, replace)
    }

    async fn create<'a>(&self, client: &CloudClient, mut planned: Self::State<'a>) -> CreateResult<Self::State<'a>> {
        let dms = client.service("dms");
        let project_id = dms.project_id().await?;

        let mut body = json!({ "name": planned.name.as_str() });
        if let Some(description) = known_string(&planned.description) {
            body["description"] = json!(description);
        }
        if let Some(queue_mode) = known_string(&planned.queue_mode) {
            body["queue_mode"] = json!(queue_mode);
        }
        if let Some(redrive_policy) = known_string(&planned.redrive_policy) {
            body["redrive_policy"] = json!(redrive_policy);
        }
        if let Some(max_consume_count) = planned.max_consume_count.as_ref_option() {
            body["max_consume_count"] = json!(max_consume_count);
        }
        if let Some(retention_hours) = planned.retention_hours.as_ref_option() {
            body["retention_hours"] = json!(retention_hours);
        }

        let created: CreatedQueue = dms
            .post(&format!("/v1.0/{project_id}/queues"), &body)
            .await
            .context("Error creating DMS queue")?;
        info!(queue_id = created.id, "DMS queue created");
        planned.id = Value::from(created.id.clone());

        let queue = get_queue(&dms, &created.id)
            .await
            .context("Error reading DMS queue")
            .and_then(|queue| {
                queue.ok_or_else(|| anyhow!("DMS queue {} disappeared after creation", created.id))
            })
            .keep_state(&planned)?;
        Ok(Self::apply(planned, queue))
    }

    async fn read<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<Option<Self::State<'a>>> {
        let queue = get_queue(&client.service("dms"), state.id.as_str())
            .await
            .context("Error reading DMS queue")?;
        Ok(queue.map(|queue| Self::apply(state, queue)))
    }

    async fn update<'a>(
        &self,
        _client: &CloudClient,
        _prior: Self::State<'a>,
        planned: Self::State<'a>,
    ) -> Result<Self::State<'a>> {
        Ok(planned)
    }

    async fn delete<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<()> {
        let dms = client.service("dms");
        let project_id = dms.project_id().await?;
        dms.delete(&queue_path(&project_id, state.id.as_str()))
            .await
            .context("Error deleting DMS queue")?;
        Ok(())
    }

    fn import<'a>(&self, id: String) -> Option<Self::State<'a>> {
        Some(QueueState {
            id: Value::from(id),
            ..Default::default()
        })
    }
}
