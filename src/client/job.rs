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
use serde::Deserialize;
use tracing::info;

use crate::wait::StateChangeConf;

use super::ServiceClient;

/// Asynchronous task returned by the VBS and SDRS APIs
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Job {
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub job_type: String,
    pub status: String,
    #[serde(default)]
    pub entities: serde_json::Value,
    #[serde(default)]
    pub fail_reason: Option<String>,
}

/// Body of the calls starting a job
#[derive(Debug, Clone, Deserialize)]
pub struct JobRef {
    pub job_id: String,
}

fn job_state(job: &Job) -> Result<String> {
    if job.status == "FAIL" {
        return Err(anyhow!(
            "job {} ({}) failed: {}",
            job.job_id,
            job.job_type,
            job.fail_reason.as_deref().unwrap_or("unknown reason")
        ));
    }
    Ok(job.status.clone())
}

/// Wait until the job succeeds and return it
pub async fn wait_for_job(service: &ServiceClient<'_>, job_id: &str, timeout: Duration) -> Result<Job> {
    let project_id = service.project_id().await?;
    let path = &format!("/v1/{project_id}/jobs/{job_id}");

    let job = StateChangeConf::new(&["INIT", "RUNNING"], &["SUCCESS"], timeout)
        .delay(Duration::from_secs(1))
        .min_timeout(Duration::from_secs(3))
        .wait_for_state(move || async move {
            let job: Job = service.get(path).await?;
            let state = job_state(&job)?;
            anyhow::Ok(Some((job, state)))
        })
        .await
        .with_context(|| format!("Error waiting for job {job_id}"))?
        .ok_or_else(|| anyhow!("job {job_id} disappeared"))?;

    info!(job_id, job_type = %job.job_type, "job succeeded");
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_job_carries_reason() {
        let job: Job = serde_json::from_str(
            r#"{"job_id": "j-1", "job_type": "bksCreateBackup", "status": "FAIL",
                "fail_reason": "volume is busy", "entities": {}}"#,
        )
        .unwrap();
        let err = job_state(&job).unwrap_err().to_string();
        assert!(err.contains("j-1"));
        assert!(err.contains("volume is busy"));
    }

    #[test]
    fn running_job_reports_status() {
        let job: Job = serde_json::from_str(r#"{"status": "RUNNING"}"#).unwrap();
        assert_eq!(job_state(&job).unwrap(), "RUNNING");
        assert!(job.entities.is_null());
    }
}
