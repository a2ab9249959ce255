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
    Diagnostics, Schema, Value, ValueString,
};
use tracing::info;

use crate::client::{check_deleted, CloudClient, ServiceClient};
use crate::resource::{CloudResource, CreateResult, KeepState};
use crate::utils::{attribute, force_new, ID_ATTRIBUTE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TopicState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub group_id: ValueString<'a>,
    pub topic_name: ValueString<'a>,
    pub index_enabled: ValueBool,
}

#[derive(Debug, Deserialize)]
struct LogTopic {
    log_topic_id: String,
    log_topic_name: String,
    #[serde(default)]
    index_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct LogTopics {
    #[serde(default)]
    log_topics: Vec<LogTopic>,
}

#[derive(Debug, Deserialize)]
struct CreatedTopic {
    log_topic_id: String,
}

fn topics_path(project_id: &str, group_id: &str) -> String {
    format!("/v2.0/{project_id}/log-groups/{group_id}/log-topics")
}

/// Topic from the listing of its group, `None` when the group itself is gone
async fn get_topic(lts: &ServiceClient<'_>, group_id: &str, id: &str) -> Result<Option<LogTopic>> {
    let project_id = lts.project_id().await?;
    let topics = check_deleted(
        lts.get::<LogTopics>(&topics_path(&project_id, group_id))
            .await,
    )?;
    Ok(topics
        .into_iter()
        .flat_map(|topics| topics.log_topics)
        .find(|topic| topic.log_topic_id == id))
}

/// `otc_lts_topic_v2`
#[derive(Debug, Default)]
pub struct LtsTopic;

impl LtsTopic {
    fn apply<'a>(mut state: TopicState<'a>, topic: LogTopic) -> TopicState<'a> {
        state.id = Value::from(topic.log_topic_id);
        state.topic_name = Value::from(topic.log_topic_name);
        state.index_enabled = Value::Value(topic.index_enabled);
        state
    }
}

#[async_trait]
impl CloudResource for LtsTopic {
    const NAME: &'static str = "otc_lts_topic_v2";

    type State<'a> = TopicState<'a>;

    fn schema() -> Schema {
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => ID_ATTRIBUTE.clone(),
                    "group_id" => attribute(AttributeType::String, AttributeConstraint::Required, "Log group of the topic"),
                    "topic_name" => attribute(AttributeType::String, AttributeConstraint::Required, "Name of the log topic"),
                    "index_enabled" => attribute(AttributeType::Bool, AttributeConstraint::Computed, "Whether search indexing is enabled"),
                },
                description: Description::plain("LTS log topic"),
                ..Default::default()
            },
        }
    }

    fn plan_create<'a>(&self, _diags: &mut Diagnostics, mut proposed: Self::State<'a>) -> Self::State<'a> {
        proposed.id = Value::Unknown;
        proposed.index_enabled = Value::Unknown;
        proposed
    }

    fn plan_update<'a>(
        &self,
        _diags: &mut Diagnostics,
        prior: &Self::State<'a>,
        proposed: Self::State<'a>,
    ) -> (Self::State<'a>, Vec<AttributePath>) {
        let mut replace = Vec::new();
        force_new(&mut replace, "group_id", &prior.group_id, &proposed.group_id);
        force_new(&mut replace, "topic_name", &prior.topic_name, &proposed.topic_name);
        (proposed, replace)
    }

    async fn create<'a>(&self, client: &CloudClient, mut planned: Self::State<'a>) -> CreateResult<Self::State<'a>> {
        let lts = client.service("lts");
        let project_id = lts.project_id().await?;
        let group_id = planned.group_id.as_str().to_owned();
        let created: CreatedTopic = lts
            .post(
                &topics_path(&project_id, &group_id),
                &json!({ "log_topic_name": planned.topic_name.as_str() }),
            )
            .await
            .context("Error creating log topic")?;
        info!(%group_id, log_topic_id = created.log_topic_id, "log topic created");
        planned.id = Value::from(created.log_topic_id.clone());

        let topic = get_topic(&lts, &group_id, &created.log_topic_id)
            .await
            .context("Error reading log topic")
            .and_then(|topic| {
                topic.ok_or_else(|| anyhow!("log topic {} is missing after creation", created.log_topic_id))
            })
            .keep_state(&planned)?;
        Ok(Self::apply(planned, topic))
    }

    async fn read<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<Option<Self::State<'a>>> {
        let topic = get_topic(&client.service("lts"), state.group_id.as_str(), state.id.as_str())
            .await
            .context("Error reading log topic")?;
        Ok(topic.map(|topic| Self::apply(state, topic)))
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
        let lts = client.service("lts");
        let project_id = lts.project_id().await?;
        let path = format!(
            "{}/{}",
            topics_path(&project_id, state.group_id.as_str()),
            state.id.as_str()
        );
        lts.delete(&path).await.context("Error deleting log topic")?;
        Ok(())
    }

    /// Imported as `<group_id>/<topic_id>`
    fn import<'a>(&self, id: String) -> Option<Self::State<'a>> {
        let (group_id, topic_id) = id.split_once('/')?;
        Some(TopicState {
            id: Value::from(topic_id.to_owned()),
            group_id: Value::from(group_id.to_owned()),
            ..Default::default()
        })
    }
}
