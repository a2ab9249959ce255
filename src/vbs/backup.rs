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
    Diagnostics, Schema, Value, ValueNumber, ValueString,
};
use tracing::info;

use crate::client::job::{wait_for_job, Job, JobRef};
use crate::client::{check_deleted, CloudClient, ServiceClient};
use crate::resource::{CloudResource, CreateResult, KeepState};
use crate::tags::{expand_tags, tags_attribute, Tags};
use crate::timeouts::{Operation, Timeouts, TIMEOUTS_BLOCK};
use crate::utils::{
    attribute, force_new, known_string, string_or_null, WithValidate, ID_ATTRIBUTE,
};
use crate::wait::StateChangeConf;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BackupState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub volume_id: ValueString<'a>,
    pub name: ValueString<'a>,
    pub description: ValueString<'a>,
    pub snapshot_id: ValueString<'a>,
    pub tags: Tags<'a>,
    pub status: ValueString<'a>,
    pub size: ValueNumber,
    pub container: ValueString<'a>,
    pub service_metadata: ValueString<'a>,
    #[serde(with = "value::serde_as_vec")]
    pub timeouts: Value<Timeouts<'a>>,
}

#[derive(Debug, Deserialize)]
struct BackupBody {
    backup: Backup,
}

#[derive(Debug, Deserialize)]
struct Backup {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    container: Option<String>,
    #[serde(default)]
    volume_id: String,
    #[serde(default)]
    snapshot_id: Option<String>,
    #[serde(default)]
    service_metadata: Option<String>,
}

/// Backup id found in the entities of the creation job
fn backup_id(job: &Job) -> Result<String> {
    job.entities
        .get("backup_id")
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| anyhow!("job {} does not reference a backup", job.job_id))
}

fn backup_path(project_id: &str, id: &str) -> String {
    format!("/v2/{project_id}/backups/{id}")
}

async fn get_backup(vbs: &ServiceClient<'_>, id: &str) -> Result<Option<Backup>> {
    let project_id = vbs.project_id().await?;
    let backup = check_deleted(vbs.get::<BackupBody>(&backup_path(&project_id, id)).await)?;
    Ok(backup.map(|body| body.backup))
}

/// `otc_vbs_backup_v2`
#[derive(Debug, Default)]
pub struct VbsBackup;

impl VbsBackup {
    fn apply<'a>(mut state: BackupState<'a>, backup: Backup) -> BackupState<'a> {
        state.id = Value::from(backup.id);
        state.name = Value::from(backup.name);
        state.description = string_or_null(backup.description);
        state.volume_id = Value::from(backup.volume_id);
        state.snapshot_id = string_or_null(backup.snapshot_id);
        state.status = Value::from(backup.status);
        state.size = Value::Value(backup.size);
        state.container = string_or_null(backup.container);
        state.service_metadata = string_or_null(backup.service_metadata);
        state
    }
}

#[async_trait]
impl CloudResource for VbsBackup {
    const NAME: &'static str = "otc_vbs_backup_v2";

    type State<'a> = BackupState<'a>;

    fn schema() -> Schema {
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => ID_ATTRIBUTE.clone(),
                    "volume_id" => attribute(AttributeType::String, AttributeConstraint::Required, "Volume to back up"),
                    "name" => attribute(AttributeType::String, AttributeConstraint::Required, "Name of the backup"),
                    "description" => attribute(AttributeType::String, AttributeConstraint::Optional, "Description of the backup"),
                    "snapshot_id" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "Snapshot the backup is taken from"),
                    "tags" => tags_attribute(),
                    "status" => attribute(AttributeType::String, AttributeConstraint::Computed, "Status of the backup"),
                    "size" => attribute(AttributeType::Number, AttributeConstraint::Computed, "Size in GB"),
                    "container" => attribute(AttributeType::String, AttributeConstraint::Computed, "Container of the backup"),
                    "service_metadata" => attribute(AttributeType::String, AttributeConstraint::Computed, "Metadata of the backup service"),
                },
                blocks: map! {
                    "timeouts" => TIMEOUTS_BLOCK.clone(),
                },
                description: Description::plain("Backup of an EVS volume"),
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
        proposed.status = Value::Unknown;
        proposed.size = Value::Unknown;
        proposed.container = Value::Unknown;
        proposed.service_metadata = Value::Unknown;
        if proposed.snapshot_id.is_null() {
            proposed.snapshot_id = Value::Unknown;
        }
        proposed
    }

    fn plan_update<'a>(
        &self,
        _diags: &mut Diagnostics,
        prior: &Self::State<'a>,
        proposed: Self::State<'a>,
    ) -> (Self::State<'a>, Vec<AttributePath>) {
        let mut replace = Vec::new();
        force_new(&mut replace, "volume_id", &prior.volume_id, &proposed.volume_id);
        force_new(&mut replace, "name", &prior.name, &proposed.name);
        force_new(&mut replace, "description", &prior.description, &proposed.description);
        force_new(&mut replace, "snapshot_id", &prior.snapshot_id, &proposed.snapshot_id);
        force_new(&mut replace, "tags", &prior.tags, &proposed.tags);
        (proposed, replace)
    }

    async fn create<'a>(&self, client: &CloudClient, mut planned: Self::State<'a>) -> CreateResult<Self::State<'a>> {
        let vbs = client.service("vbs");
        let project_id = vbs.project_id().await?;
        let timeout = Timeouts::pick(&planned.timeouts, Operation::Create, DEFAULT_TIMEOUT);

        let mut backup = json!({
            "volume_id": planned.volume_id.as_str(),
            "name": planned.name.as_str(),
        });
        if let Some(description) = known_string(&planned.description) {
            backup["description"] = json!(description);
        }
        if let Some(snapshot_id) = known_string(&planned.snapshot_id) {
            backup["snapshot_id"] = json!(snapshot_id);
        }
        let tags = expand_tags(&planned.tags);
        if !tags.is_empty() {
            backup["tags"] = json!(tags);
        }

        let job: JobRef = vbs
            .post(&format!("/v2/{project_id}/cloudbackups"), &json!({ "backup": backup }))
            .await
            .context("Error creating VBS backup")?;
        let job = wait_for_job(&vbs, &job.job_id, timeout).await?;
        let id = backup_id(&job)?;
        info!(backup_id = id, "VBS backup created");
        planned.id = Value::from(id.clone());

        let backup = get_backup(&vbs, &id)
            .await
            .context("Error reading VBS backup")
            .and_then(|backup| backup.ok_or_else(|| anyhow!("VBS backup {id} disappeared after creation")))
            .keep_state(&planned)?;
        Ok(Self::apply(planned, backup))
    }

    async fn read<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<Option<Self::State<'a>>> {
        let backup = get_backup(&client.service("vbs"), state.id.as_str())
            .await
            .context("Error reading VBS backup")?;
        Ok(backup.map(|backup| Self::apply(state, backup)))
    }

    async fn update<'a>(
        &self,
        _client: &CloudClient,
        _prior: Self::State<'a>,
        planned: Self::State<'a>,
    ) -> Result<Self::State<'a>> {
        // replacement only, timeouts are the only in-place change
        Ok(planned)
    }

    async fn delete<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<()> {
        let vbs = client.service("vbs");
        let project_id = vbs.project_id().await?;
        let id = state.id.as_str();
        let timeout = Timeouts::pick(&state.timeouts, Operation::Delete, DEFAULT_TIMEOUT);

        let job: JobRef = vbs
            .delete_with(&format!("/v2/{project_id}/cloudbackups/{id}"))
            .await
            .context("Error deleting VBS backup")?;
        wait_for_job(&vbs, &job.job_id, timeout).await?;

        let vbs = &vbs;
        StateChangeConf::new(&[], &[], timeout)
            .min_timeout(Duration::from_secs(3))
            .wait_for_state(move || async move {
                let backup = get_backup(vbs, id).await?;
                anyhow::Ok(backup.map(|backup| ((), backup.status)))
            })
            .await
            .with_context(|| format!("Error waiting for VBS backup {id} to be deleted"))?;
        Ok(())
    }

    fn import<'a>(&self, id: String) -> Option<Self::State<'a>> {
        Some(BackupState {
            id: Value::from(id),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    fn backup() -> BackupState<'static> {
        BackupState {
            id: Value::from("b-1"),
            volume_id: Value::from("vol-1"),
            name: Value::from("nightly"),
            status: Value::from("available"),
            ..Default::default()
        }
    }

    #[test]
    fn backup_id_comes_from_job_entities() {
        let job: Job = serde_json::from_value(json!({
            "job_id": "j-1",
            "job_type": "bksCreateBackup",
            "status": "SUCCESS",
            "entities": {"backup_id": "b-42", "volume_id": "vol-1"}
        }))
        .unwrap();
        assert_eq!(backup_id(&job).unwrap(), "b-42");

        let job = Job {
            job_id: "j-2".to_owned(),
            ..Default::default()
        };
        assert!(backup_id(&job).unwrap_err().to_string().contains("j-2"));
    }

    #[test]
    fn every_change_forces_replacement() {
        let mut diags = Diagnostics::default();
        let proposed = BackupState {
            name: Value::from("weekly"),
            tags: Value::Value([(Cow::Borrowed("env"), Value::from("prod"))].into()),
            ..backup()
        };
        let (_, replace) = VbsBackup.plan_update(&mut diags, &backup(), proposed);
        assert_eq!(replace, [AttributePath::new("name"), AttributePath::new("tags")]);
    }

    #[test]
    fn timeouts_alone_update_in_place() {
        let mut diags = Diagnostics::default();
        let proposed = BackupState {
            timeouts: Value::Value(Timeouts {
                delete: Value::from("30m"),
                ..Default::default()
            }),
            ..backup()
        };
        let (_, replace) = VbsBackup.plan_update(&mut diags, &backup(), proposed);
        assert!(replace.is_empty());
    }

    #[test]
    fn computed_attributes_are_unknown_on_create() {
        let mut diags = Diagnostics::default();
        let state = VbsBackup.plan_create(
            &mut diags,
            BackupState {
                id: Value::Null,
                status: Value::Null,
                ..backup()
            },
        );
        assert!(state.id.is_unknown());
        assert!(state.size.is_unknown());
        assert!(state.snapshot_id.is_unknown());
        assert!(state.description.is_null());
    }
}
