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

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tf_provider::{
    map, value, AttributeConstraint, AttributePath, AttributeType, Block, Description,
    Diagnostics, Schema, Value, ValueString,
};
use tracing::info;

use crate::client::job::{wait_for_job, Job, JobRef};
use crate::client::{check_deleted, CloudClient, ServiceClient};
use crate::resource::{CloudResource, CreateResult, KeepState};
use crate::timeouts::{Operation, Timeouts, TIMEOUTS_BLOCK};
use crate::utils::{attribute, force_new, known_string, string_or_null, WithValidate, ID_ATTRIBUTE};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const DEFAULT_DR_TYPE: &str = "migration";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProtectionGroupState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub name: ValueString<'a>,
    pub description: ValueString<'a>,
    pub source_availability_zone: ValueString<'a>,
    pub target_availability_zone: ValueString<'a>,
    pub domain_id: ValueString<'a>,
    pub source_vpc_id: ValueString<'a>,
    pub dr_type: ValueString<'a>,
    #[serde(with = "value::serde_as_vec")]
    pub timeouts: Value<Timeouts<'a>>,
}

#[derive(Debug, Deserialize)]
struct ServerGroupBody {
    server_group: ServerGroup,
}

#[derive(Debug, Deserialize)]
struct ServerGroup {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    source_availability_zone: String,
    #[serde(default)]
    target_availability_zone: String,
    #[serde(default)]
    domain_id: String,
    #[serde(default)]
    source_vpc_id: String,
    #[serde(default)]
    dr_type: Option<String>,
}

fn group_path(project_id: &str, id: &str) -> String {
    format!("/v1/{project_id}/server-groups/{id}")
}

/// Protection group id found in the entities of the creation job
fn server_group_id(job: &Job) -> Result<String> {
    job.entities
        .get("server_group_id")
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| anyhow!("job {} does not reference a protection group", job.job_id))
}

async fn get_group(sdrs: &ServiceClient<'_>, id: &str) -> Result<Option<ServerGroup>> {
    let project_id = sdrs.project_id().await?;
    let group = check_deleted(
        sdrs.get::<ServerGroupBody>(&group_path(&project_id, id))
            .await,
    )?;
    Ok(group.map(|body| body.server_group))
}

/// `otc_sdrs_protectiongroup_v1`
#[derive(Debug, Default)]
pub struct ProtectionGroup;

impl ProtectionGroup {
    fn apply<'a>(mut state: ProtectionGroupState<'a>, group: ServerGroup) -> ProtectionGroupState<'a> {
        state.id = Value::from(group.id);
        state.name = Value::from(group.name);
        state.description = string_or_null(group.description);
        state.source_availability_zone = Value::from(group.source_availability_zone);
        state.target_availability_zone = Value::from(group.target_availability_zone);
        state.domain_id = Value::from(group.domain_id);
        state.source_vpc_id = Value::from(group.source_vpc_id);
        state.dr_type = Value::from(group.dr_type.unwrap_or_else(|| DEFAULT_DR_TYPE.to_owned()));
        state
    }
}

#[async_trait]
impl CloudResource for ProtectionGroup {
    const NAME: &'static str = "otc_sdrs_protectiongroup_v1";

    type State<'a> = ProtectionGroupState<'a>;

    fn schema() -> Schema {
        let required = |description: &str| {
            attribute(AttributeType::String, AttributeConstraint::Required, description)
        };
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => ID_ATTRIBUTE.clone(),
                    "name" => required("Name of the protection group"),
                    "description" => attribute(AttributeType::String, AttributeConstraint::Optional, "Description of the protection group"),
                    "source_availability_zone" => required("Production site availability zone"),
                    "target_availability_zone" => required("Disaster recovery site availability zone"),
                    "domain_id" => required("Active-active domain"),
                    "source_vpc_id" => required("VPC of the production site"),
                    "dr_type" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "Deployment model, defaults to `migration`"),
                },
                blocks: map! {
                    "timeouts" => TIMEOUTS_BLOCK.clone(),
                },
                description: Description::plain("SDRS protection group"),
                ..Default::default()
            },
        }
    }

    fn validate(&self, diags: &mut Diagnostics, config: &Self::State<'_>) {
        config
            .timeouts
            .validate(diags, AttributePath::new("timeouts").index(0));
    }

    fn plan_create<'a>(&self, _diags: &mut Diagnostics, mut proposed: Self::State<'a>) -> Self::State<'a> {
        proposed.id = Value::Unknown;
        if proposed.dr_type.is_null() {
            proposed.dr_type = Value::from(DEFAULT_DR_TYPE);
        }
        proposed
    }

    fn plan_update<'a>(
        &self,
        _diags: &mut Diagnostics,
        prior: &Self::State<'a>,
        mut proposed: Self::State<'a>,
    ) -> (Self::State<'a>, Vec<AttributePath>) {
        if proposed.dr_type.is_null() {
            proposed.dr_type = Value::from(DEFAULT_DR_TYPE);
        }
        let mut replace = Vec::new();
        force_new(&mut replace, "description", &prior.description, &proposed.description);
        force_new(&mut replace, "source_availability_zone", &prior.source_availability_zone, &proposed.source_availability_zone);
        force_new(&mut replace, "target_availability_zone", &prior.target_availability_zone, &proposed.target_availability_zone);
        force_new(&mut replace, "domain_id", &prior.domain_id, &proposed.domain_id);
        force_new(&mut replace, "source_vpc_id", &prior.source_vpc_id, &proposed.source_vpc_id);
        force_new(&mut replace, "dr_type", &prior.dr_type, &proposed.dr_type);
        (proposed, replace)
    }

    async fn create<'a>(&self, client: &CloudClient, mut planned: Self::State<'a>) -> CreateResult<Self::State<'a>> {
        let sdrs = client.service("sdrs");
        let project_id = sdrs.project_id().await?;
        let timeout = Timeouts::pick(&planned.timeouts, Operation::Create, DEFAULT_TIMEOUT);

        let mut group = json!({
            "name": planned.name.as_str(),
            "source_availability_zone": planned.source_availability_zone.as_str(),
            "target_availability_zone": planned.target_availability_zone.as_str(),
            "domain_id": planned.domain_id.as_str(),
            "source_vpc_id": planned.source_vpc_id.as_str(),
            "dr_type": planned.dr_type.as_deref_option().unwrap_or(DEFAULT_DR_TYPE),
        });
        if let Some(description) = known_string(&planned.description) {
            group["description"] = json!(description);
        }

        let job: JobRef = sdrs
            .post(&format!("/v1/{project_id}/server-groups"), &json!({ "server_group": group }))
            .await
            .context("Error creating SDRS protection group")?;
        let job = wait_for_job(&sdrs, &job.job_id, timeout).await?;
        let id = server_group_id(&job)?;
        info!(server_group_id = id, "SDRS protection group created");
        planned.id = Value::from(id.clone());

        let group = get_group(&sdrs, &id)
            .await
            .context("Error reading SDRS protection group")
            .and_then(|group| {
                group.ok_or_else(|| anyhow!("SDRS protection group {id} disappeared after creation"))
            })
            .keep_state(&planned)?;
        Ok(Self::apply(planned, group))
    }

    async fn read<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<Option<Self::State<'a>>> {
        let group = get_group(&client.service("sdrs"), state.id.as_str())
            .await
            .context("Error reading SDRS protection group")?;
        Ok(group.map(|group| Self::apply(state, group)))
    }

    async fn update<'a>(
        &self,
        client: &CloudClient,
        prior: Self::State<'a>,
        planned: Self::State<'a>,
    ) -> Result<Self::State<'a>> {
        if prior.name == planned.name {
            return Ok(planned);
        }
        let sdrs = client.service("sdrs");
        let project_id = sdrs.project_id().await?;
        let id = planned.id.as_str();
        let updated: ServerGroupBody = sdrs
            .put(
                &group_path(&project_id, id),
                &json!({ "server_group": { "name": planned.name.as_str() } }),
            )
            .await
            .context("Error updating SDRS protection group")?;
        Ok(Self::apply(planned, updated.server_group))
    }

    async fn delete<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<()> {
        let sdrs = client.service("sdrs");
        let project_id = sdrs.project_id().await?;
        let timeout = Timeouts::pick(&state.timeouts, Operation::Delete, DEFAULT_TIMEOUT);
        let job: JobRef = sdrs
            .delete_with(&group_path(&project_id, state.id.as_str()))
            .await
            .context("Error deleting SDRS protection group")?;
        wait_for_job(&sdrs, &job.job_id, timeout).await?;
        Ok(())
    }

    fn import<'a>(&self, id: String) -> Option<Self::State<'a>> {
        Some(ProtectionGroupState {
            id: Value::from(id),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> ProtectionGroupState<'static> {
        ProtectionGroupState {
            id: Value::from("g-1"),
            name: Value::from("pg"),
            source_availability_zone: Value::from("eu-de-01"),
            target_availability_zone: Value::from("eu-de-02"),
            domain_id: Value::from("dom-1"),
            source_vpc_id: Value::from("vpc-1"),
            dr_type: Value::from("migration"),
            ..Default::default()
        }
    }

    #[test]
    fn dr_type_defaults_to_migration() {
        let mut diags = Diagnostics::default();
        let state = ProtectionGroup.plan_create(
            &mut diags,
            ProtectionGroupState {
                dr_type: Value::Null,
                ..group()
            },
        );
        assert_eq!(state.dr_type.as_str(), "migration");
        assert!(state.id.is_unknown());
    }

    #[test]
    fn only_name_updates_in_place() {
        let mut diags = Diagnostics::default();
        let proposed = ProtectionGroupState {
            name: Value::from("renamed"),
            ..group()
        };
        let (_, replace) = ProtectionGroup.plan_update(&mut diags, &group(), proposed);
        assert!(replace.is_empty());

        let proposed = ProtectionGroupState {
            target_availability_zone: Value::from("eu-de-03"),
            ..group()
        };
        let (_, replace) = ProtectionGroup.plan_update(&mut diags, &group(), proposed);
        assert_eq!(replace, [AttributePath::new("target_availability_zone")]);
    }

    #[test]
    fn group_id_comes_from_job_entities() {
        let job: Job = serde_json::from_value(json!({
            "job_id": "j-1",
            "job_type": "createServerGroup",
            "status": "SUCCESS",
            "entities": {"server_group_id": "g-9"}
        }))
        .unwrap();
        assert_eq!(server_group_id(&job).unwrap(), "g-9");
    }
}
