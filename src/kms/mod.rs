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

use anyhow::Result;
use serde::Deserialize;
use serde_json::json;

use crate::client::{check_deleted, ServiceClient};

mod data_source;
mod key;

pub use data_source::KmsKeyDataSource;
pub use key::KmsKey;

/// Key scheduled for deletion
pub(crate) const PENDING_DELETION: &str = "4";
pub(crate) const ENABLED: &str = "2";

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct KeyInfo {
    pub key_id: String,
    #[serde(default)]
    pub domain_id: String,
    #[serde(default)]
    pub key_alias: String,
    #[serde(default)]
    pub realm: String,
    #[serde(default)]
    pub key_description: String,
    #[serde(default)]
    pub creation_date: String,
    #[serde(default)]
    pub scheduled_deletion_date: String,
    #[serde(default)]
    pub key_state: String,
    #[serde(default)]
    pub default_key_flag: String,
    #[serde(default)]
    pub origin: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct KeyInfoBody {
    pub key_info: KeyInfo,
}

pub(crate) fn kms_path(project_id: &str, action: &str) -> String {
    format!("/v1.0/{project_id}/kms/{action}")
}

/// Describe a key, `None` once it is gone
pub(crate) async fn describe_key(kms: &ServiceClient<'_>, key_id: &str) -> Result<Option<KeyInfo>> {
    let project_id = kms.project_id().await?;
    let body = check_deleted(
        kms.post::<_, KeyInfoBody>(
            &kms_path(&project_id, "describe-key"),
            &json!({ "key_id": key_id }),
        )
        .await,
    )?;
    Ok(body.map(|body| body.key_info))
}
