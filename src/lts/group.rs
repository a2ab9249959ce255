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

use crate::client::{CloudClient, ServiceClient};
use crate::resource::{CloudResource, CreateResult, KeepState};
use crate::utils::{attribute, force_new, ID_ATTRIBUTE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GroupState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub group_name: ValueString<'a>,
    pub ttl_in_days: ValueNumber,
}

#[derive(Debug, Deserialize)]
pub(super) struct LogGroup {
    log_group_id: String,
    log_group_name: String,
    #[serde(default)]
    ttl_in_days: i64,
}

#[derive(Debug, Deserialize)]
struct LogGroups {
    #[serde(default)]
    log_groups: Vec<LogGroup>,
}

#[derive(Debug, Deserialize)]
struct CreatedGroup {
    log_group_id: String,
}

/// Find a group in the listing, there is no API reading a single group
pub(super) fn find_group(groups: Vec<LogGroup>, id: &str) -> Option<LogGroup> {
    groups.into_iter().find(|group| group.log_group_id == id)
}

async fn get_group(lts: &ServiceClient<'_>, id: &str) -> Result<Option<LogGroup>> {
    let project_id = lts.project_id().await?;
    let groups: LogGroups = lts
        .get(&format!("/v2.0/{project_id}/log-groups"))
        .await?;
    Ok(find_group(groups.log_groups, id))
}

/// `otc_lts_group_v2`
#[derive(Debug, Default)]
pub struct LtsGroup;

impl LtsGroup {
    fn apply<'a>(mut state: GroupState<'a>, group: LogGroup) -> GroupState<'a> {
        state.id = Value::from(group.log_group_id);
        state.group_name = Value::from(group.log_group_name);
        state.ttl_in_days = Value::Value(group.ttl_in_days);
        state
    }
}

#[async_trait]
impl CloudResource for LtsGroup {
    const NAME: &'static str = "otc_lts_group_v2";

    type State<'a> = GroupState<'a>;

    fn schema() -> Schema {
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => ID_ATTRIBUTE.clone(),
                    "group_name" => attribute(AttributeType::String, AttributeConstraint::Required, "Name of the log group"),
                    "ttl_in_days" => attribute(AttributeType::Number, AttributeConstraint::Computed, "Log retention in days"),
                },
                description: Description::plain("LTS log group"),
                ..Default::default()
            },
        }
    }

    fn plan_create<'a>(&self, _diags: &mut Diagnostics, mut proposed: Self::State<'a>) -> Self::State<'a> {
        proposed.id = Value::Unknown;
        proposed.ttl_in_days = Value::Unknown;
        proposed
    }

    fn plan_update<'a>(
        &self,
        _diags: &mut Diagnostics,
        prior: &Self::State<'a>,
        proposed: Self::State<'a>,
    ) -> (Self::State<'a>, Vec<AttributePath>) {
        let mut replace = Vec::new();
        force_new(&mut replace, "group_name", &prior.group_name, &proposed.group_name);
        (proposed, replace)
    }

    async fn create<'a>(&self, client: &CloudClient, mut planned: Self::State<'a>) -> CreateResult<Self::State<'a>> {
        let lts = client.service("lts");
        let project_id = lts.project_id().await?;
        let created: CreatedGroup = lts
            .post(
                &format!("/v2.0/{project_id}/log-groups"),
                &json!({ "log_group_name": planned.group_name.as_str() }),
            )
            .await
            .context("Error creating log group")?;
        info!(log_group_id = created.log_group_id, "log group created");
        planned.id = Value::from(created.log_group_id.clone());

        let group = get_group(&lts, &created.log_group_id)
            .await
            .context("Error reading log group")
            .and_then(|group| {
                group.ok_or_else(|| anyhow!("log group {} is missing after creation", created.log_group_id))
            })
            .keep_state(&planned)?;
        Ok(Self::apply(planned, group))
    }

    async fn read<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<Option<Self::State<'a>>> {
        let group = get_group(&client.service("lts"), state.id.as_str())
            .await
            .context("Error reading log group")?;
        Ok(group.map(|group| Self::apply(state, group)))
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
        lts.delete(&format!("/v2.0/{project_id}/log-groups/{}", state.id.as_str()))
            .await
            .context("Error deleting log group")?;
        Ok(())
    }

    fn import<'a>(&self, id: String) -> Option<Self::State<'a>> {
        Some(GroupState {
            id: Value::from(id),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> Vec<LogGroup> {
        serde_json::from_value::<LogGroups>(json!({
            "log_groups": [
                {"log_group_id": "g-1", "log_group_name": "app", "ttl_in_days": 7, "creation_time": 1700000000000i64},
                {"log_group_id": "g-2", "log_group_name": "audit", "ttl_in_days": 30, "creation_time": 1700000000000i64}
            ]
        }))
        .unwrap()
        .log_groups
    }

    #[test]
    fn group_is_found_in_listing() {
        let group = find_group(listing(), "g-2").unwrap();
        let state = LtsGroup::apply(GroupState::default(), group);
        assert_eq!(state.group_name.as_str(), "audit");
        assert_eq!(state.ttl_in_days, Value::Value(30));
    }

    #[test]
    fn absent_group_is_gone() {
        assert!(find_group(listing(), "g-3").is_none());
        assert!(find_group(Vec::new(), "g-1").is_none());
    }

    #[test]
    fn rename_forces_replacement() {
        let mut diags = Diagnostics::default();
        let prior = GroupState {
            id: Value::from("g-1"),
            group_name: Value::from("app"),
            ttl_in_days: Value::Value(7),
        };
        let proposed = GroupState {
            group_name: Value::from("app2"),
            ..prior.clone()
        };
        let (_, replace) = LtsGroup.plan_update(&mut diags, &prior, proposed);
        assert_eq!(replace, [AttributePath::new("group_name")]);
    }
}
