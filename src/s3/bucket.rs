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
use aws_sdk_s3::types::{
    BucketCannedAcl, BucketLocationConstraint, BucketVersioningStatus, CreateBucketConfiguration,
    Delete, ObjectIdentifier, VersioningConfiguration,
};
use aws_sdk_s3::Client;
use serde::{Deserialize, Serialize};
use tf_provider::{
    map, value::ValueBool, AttributeConstraint, AttributePath, AttributeType, Block, Description,
    Diagnostics, Schema, Value, ValueString,
};
use tracing::{debug, info};

use crate::client::CloudClient;
use crate::resource::{CloudResource, CreateResult, KeepState};
use crate::utils::{attribute, force_new, validate_one_of};

use super::{bucket_domain_name, s3_client};

const DEFAULT_ACL: &str = "private";
pub(super) const CANNED_ACLS: &[&str] = &[
    "private",
    "public-read",
    "public-read-write",
    "authenticated-read",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BucketState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub bucket: ValueString<'a>,
    pub acl: ValueString<'a>,
    pub force_destroy: ValueBool,
    pub versioning: ValueBool,
    pub bucket_domain_name: ValueString<'a>,
    pub region: ValueString<'a>,
}

fn versioning_configuration(enabled: bool) -> VersioningConfiguration {
    let status = if enabled {
        BucketVersioningStatus::Enabled
    } else {
        BucketVersioningStatus::Suspended
    };
    VersioningConfiguration::builder().status(status).build()
}

async fn put_versioning(s3: &Client, bucket: &str, enabled: bool) -> Result<()> {
    s3.put_bucket_versioning()
        .bucket(bucket)
        .versioning_configuration(versioning_configuration(enabled))
        .send()
        .await
        .with_context(|| format!("Error setting versioning of bucket {bucket}"))?;
    Ok(())
}

/// Delete every object version and delete marker of the bucket
async fn empty_bucket(s3: &Client, bucket: &str) -> Result<()> {
    let mut key_marker = None;
    let mut version_marker = None;
    loop {
        let page = s3
            .list_object_versions()
            .bucket(bucket)
            .set_key_marker(key_marker.take())
            .set_version_id_marker(version_marker.take())
            .send()
            .await
            .with_context(|| format!("Error listing objects of bucket {bucket}"))?;

        let versions = page
            .versions()
            .iter()
            .map(|version| (version.key(), version.version_id()));
        let markers = page
            .delete_markers()
            .iter()
            .map(|marker| (marker.key(), marker.version_id()));
        let objects = versions
            .chain(markers)
            .filter_map(|(key, version_id)| {
                Some(
                    ObjectIdentifier::builder()
                        .key(key?)
                        .set_version_id(version_id.map(str::to_owned))
                        .build(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        if !objects.is_empty() {
            debug!(bucket, count = objects.len(), "deleting objects");
            s3.delete_objects()
                .bucket(bucket)
                .delete(Delete::builder().set_objects(Some(objects)).quiet(true).build()?)
                .send()
                .await
                .with_context(|| format!("Error deleting objects of bucket {bucket}"))?;
        }

        if page.is_truncated() != Some(true) {
            return Ok(());
        }
        key_marker = page.next_key_marker().map(str::to_owned);
        version_marker = page.next_version_id_marker().map(str::to_owned);
    }
}

/// `otc_s3_bucket`
#[derive(Debug, Default)]
pub struct S3Bucket;

#[async_trait]
impl CloudResource for S3Bucket {
    const NAME: &'static str = "otc_s3_bucket";

    type State<'a> = BucketState<'a>;

    fn schema() -> Schema {
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => attribute(AttributeType::String, AttributeConstraint::Computed, "Name of the bucket"),
                    "bucket" => attribute(AttributeType::String, AttributeConstraint::Required, "Name of the bucket"),
                    "acl" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "Canned ACL, defaults to `private`"),
                    "force_destroy" => attribute(AttributeType::Bool, AttributeConstraint::Optional, "Delete every object when the bucket is destroyed"),
                    "versioning" => attribute(AttributeType::Bool, AttributeConstraint::OptionalComputed, "Whether object versioning is enabled"),
                    "bucket_domain_name" => attribute(AttributeType::String, AttributeConstraint::Computed, "Host name of the bucket"),
                    "region" => attribute(AttributeType::String, AttributeConstraint::Computed, "Region of the bucket"),
                },
                description: Description::plain("Object storage bucket"),
                ..Default::default()
            },
        }
    }

    fn validate(&self, diags: &mut Diagnostics, config: &Self::State<'_>) {
        validate_one_of(diags, "acl", &config.acl, CANNED_ACLS);
    }

    fn plan_create<'a>(&self, _diags: &mut Diagnostics, mut proposed: Self::State<'a>) -> Self::State<'a> {
        proposed.id = proposed.bucket.clone();
        if proposed.acl.is_null() {
            proposed.acl = Value::from(DEFAULT_ACL);
        }
        if proposed.versioning.is_null() {
            proposed.versioning = Value::Value(false);
        }
        proposed.bucket_domain_name = Value::Unknown;
        proposed.region = Value::Unknown;
        proposed
    }

    fn plan_update<'a>(
        &self,
        _diags: &mut Diagnostics,
        prior: &Self::State<'a>,
        mut proposed: Self::State<'a>,
    ) -> (Self::State<'a>, Vec<AttributePath>) {
        let mut replace = Vec::new();
        force_new(&mut replace, "bucket", &prior.bucket, &proposed.bucket);
        if proposed.acl.is_null() {
            proposed.acl = Value::from(DEFAULT_ACL);
        }
        (proposed, replace)
    }

    async fn create<'a>(&self, client: &CloudClient, mut planned: Self::State<'a>) -> CreateResult<Self::State<'a>> {
        let s3 = s3_client(client).await?;
        let bucket = planned.bucket.as_str().to_owned();
        let acl = planned.acl.as_deref_option().unwrap_or(DEFAULT_ACL);

        s3.create_bucket()
            .bucket(&bucket)
            .acl(BucketCannedAcl::from(acl))
            .create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(client.region()))
                    .build(),
            )
            .send()
            .await
            .with_context(|| format!("Error creating bucket {bucket}"))?;
        info!(bucket, "bucket created");
        planned.bucket_domain_name = Value::from(bucket_domain_name(client.config(), &bucket));
        planned.region = Value::from(client.region().to_owned());
        planned.id = Value::from(bucket.clone());

        if planned.versioning.as_ref_option() == Some(&true) {
            put_versioning(&s3, &bucket, true)
                .await
                .keep_state(&planned)?;
        }
        Ok(planned)
    }

    async fn read<'a>(&self, client: &CloudClient, mut state: Self::State<'a>) -> Result<Option<Self::State<'a>>> {
        let s3 = s3_client(client).await?;
        let bucket = state.id.as_str().to_owned();

        match s3.head_bucket().bucket(&bucket).send().await {
            Err(err) if err.as_service_error().is_some_and(|err| err.is_not_found()) => {
                return Ok(None)
            }
            result => result.with_context(|| format!("Error reading bucket {bucket}"))?,
        };

        let versioning = s3
            .get_bucket_versioning()
            .bucket(&bucket)
            .send()
            .await
            .with_context(|| format!("Error reading versioning of bucket {bucket}"))?;
        state.versioning = Value::Value(versioning.status() == Some(&BucketVersioningStatus::Enabled));

        if state.acl.is_null() {
            state.acl = Value::from(DEFAULT_ACL);
        }
        state.bucket_domain_name = Value::from(bucket_domain_name(client.config(), &bucket));
        state.region = Value::from(client.region().to_owned());
        state.bucket = Value::from(bucket);
        Ok(Some(state))
    }

    async fn update<'a>(
        &self,
        client: &CloudClient,
        prior: Self::State<'a>,
        planned: Self::State<'a>,
    ) -> Result<Self::State<'a>> {
        let s3 = s3_client(client).await?;
        let bucket = planned.id.as_str();

        if prior.acl != planned.acl {
            let acl = planned.acl.as_deref_option().unwrap_or(DEFAULT_ACL);
            s3.put_bucket_acl()
                .bucket(bucket)
                .acl(BucketCannedAcl::from(acl))
                .send()
                .await
                .with_context(|| format!("Error setting ACL of bucket {bucket}"))?;
        }
        if prior.versioning != planned.versioning {
            if let Some(enabled) = planned.versioning.as_ref_option() {
                put_versioning(&s3, bucket, *enabled).await?;
            }
        }
        Ok(planned)
    }

    async fn delete<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<()> {
        let s3 = s3_client(client).await?;
        let bucket = state.id.as_str();

        if state.force_destroy.as_ref_option() == Some(&true) {
            empty_bucket(&s3, bucket).await?;
        }
        s3.delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .with_context(|| format!("Error deleting bucket {bucket}"))?;
        info!(bucket, "bucket deleted");
        Ok(())
    }

    fn import<'a>(&self, id: String) -> Option<Self::State<'a>> {
        Some(BucketState {
            id: Value::from(id.clone()),
            bucket: Value::from(id),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket() -> BucketState<'static> {
        BucketState {
            id: Value::from("logs"),
            bucket: Value::from("logs"),
            acl: Value::from("private"),
            versioning: Value::Value(false),
            ..Default::default()
        }
    }

    #[test]
    fn acl_defaults_to_private() {
        let mut diags = Diagnostics::default();
        let state = S3Bucket.plan_create(
            &mut diags,
            BucketState {
                bucket: Value::from("logs"),
                ..Default::default()
            },
        );
        assert_eq!(state.acl.as_str(), "private");
        assert_eq!(state.id.as_str(), "logs");
        assert_eq!(state.versioning, Value::Value(false));
        assert!(state.bucket_domain_name.is_unknown());
    }

    #[test]
    fn rename_forces_replacement() {
        let mut diags = Diagnostics::default();
        let proposed = BucketState {
            bucket: Value::from("logs-2"),
            versioning: Value::Value(true),
            ..bucket()
        };
        let (_, replace) = S3Bucket.plan_update(&mut diags, &bucket(), proposed);
        assert_eq!(replace, [AttributePath::new("bucket")]);
    }

    #[test]
    fn unknown_acl_is_rejected() {
        let mut diags = Diagnostics::default();
        S3Bucket.validate(
            &mut diags,
            &BucketState {
                acl: Value::from("everyone"),
                ..bucket()
            },
        );
        assert_eq!(diags.errors.len(), 1);
    }

    #[test]
    fn versioning_can_be_suspended() {
        let configuration = versioning_configuration(false);
        assert_eq!(configuration.status(), Some(&BucketVersioningStatus::Suspended));
    }
}
