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

use anyhow::{Context, Result};
use futures::{stream, StreamExt, TryStreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::client::{check_deleted, CloudClient};

const VOLUME_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Deserialize)]
pub(super) struct Attachment {
    #[serde(rename = "volumeId")]
    volume_id: String,
    #[serde(default)]
    device: String,
}

#[derive(Debug, Deserialize)]
struct Attachments {
    #[serde(rename = "volumeAttachments", default)]
    volume_attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct Volume {
    id: String,
    #[serde(default)]
    size: i64,
    /// `"true"` or `"false"`
    #[serde(default)]
    bootable: String,
    #[serde(default)]
    volume_type: String,
}

#[derive(Debug, Deserialize)]
struct VolumeBody {
    volume: Volume,
}

/// Volume attached to a server
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttachedVolume {
    pub id: String,
    pub device: String,
    pub size: Option<i64>,
    pub bootable: Option<bool>,
    pub volume_type: Option<String>,
}

/// Merge the compute attachments with the block storage details
///
/// Volumes without details (deleted meanwhile) are still reported.
pub(super) fn stitch_volumes(attachments: Vec<Attachment>, volumes: &HashMap<String, Volume>) -> Vec<AttachedVolume> {
    let mut attached: Vec<_> = attachments
        .into_iter()
        .map(|attachment| {
            let volume = volumes.get(&attachment.volume_id);
            AttachedVolume {
                device: attachment.device,
                size: volume.map(|volume| volume.size),
                bootable: volume.map(|volume| volume.bootable == "true"),
                volume_type: volume
                    .map(|volume| volume.volume_type.clone())
                    .filter(|volume_type| !volume_type.is_empty()),
                id: attachment.volume_id,
            }
        })
        .collect();
    attached.sort_by(|a, b| a.device.cmp(&b.device));
    attached
}

/// Attachments of a server, completed with the volume of each
pub async fn read_volumes(client: &CloudClient, server_id: &str) -> Result<Vec<AttachedVolume>> {
    let ecs = client.service("ecs");
    let evs = client.service("evs");
    let project_id = client.project_id().await?;

    let attachments: Attachments = ecs
        .get(&format!(
            "/v2.1/{project_id}/servers/{server_id}/os-volume_attachments"
        ))
        .await
        .context("Error listing volume attachments")?;
    debug!(server_id, count = attachments.volume_attachments.len(), "volume attachments");

    let volumes: HashMap<String, Volume> = stream::iter(attachments.volume_attachments.iter().cloned())
        .map(|attachment: Attachment| {
            let path = format!("/v2/{project_id}/volumes/{}", attachment.volume_id);
            let evs = &evs;
            async move { check_deleted(evs.get::<VolumeBody>(&path).await) }
        })
        .buffer_unordered(VOLUME_CONCURRENCY)
        .try_filter_map(|volume| async move { Ok(volume.map(|body| (body.volume.id.clone(), body.volume))) })
        .try_collect()
        .await
        .context("Error reading attached volumes")?;

    Ok(stitch_volumes(attachments.volume_attachments, &volumes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachments_are_completed_and_sorted() {
        let attachments: Attachments = serde_json::from_str(
            r#"{"volumeAttachments": [
                {"id": "v2", "volumeId": "v2", "serverId": "s", "device": "/dev/vdb"},
                {"id": "v1", "volumeId": "v1", "serverId": "s", "device": "/dev/vda"},
                {"id": "v3", "volumeId": "v3", "serverId": "s", "device": "/dev/vdc"}
            ]}"#,
        )
        .unwrap();
        let volumes: HashMap<String, Volume> = [
            r#"{"id": "v1", "size": 40, "bootable": "true", "volume_type": "SSD"}"#,
            r#"{"id": "v2", "size": 100, "bootable": "false", "volume_type": "SATA"}"#,
        ]
        .into_iter()
        .map(|body| {
            let volume: Volume = serde_json::from_str(body).unwrap();
            (volume.id.clone(), volume)
        })
        .collect();

        let attached = stitch_volumes(attachments.volume_attachments, &volumes);
        let ids: Vec<_> = attached.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, ["v1", "v2", "v3"]);
        assert_eq!(attached[0].bootable, Some(true));
        assert_eq!(attached[1].size, Some(100));
        assert_eq!(attached[2].size, None);
        assert_eq!(attached[2].volume_type, None);
    }
}
