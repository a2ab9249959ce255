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
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use serde::{Deserialize, Serialize};
use tf_provider::{
    map, AttributeConstraint, AttributePath, AttributeType, Block, Description, Diagnostics,
    Schema, Value, ValueString,
};
use tracing::info;

use crate::client::CloudClient;
use crate::resource::{CloudResource, CreateResult};
use crate::utils::{
    attribute, force_new, known_string, string_or_null, unknown_if_null, validate_one_of,
};

use super::bucket::CANNED_ACLS;
use super::s3_client;

const DEFAULT_ACL: &str = "private";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ObjectState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub bucket: ValueString<'a>,
    pub key: ValueString<'a>,
    pub content: ValueString<'a>,
    pub source: ValueString<'a>,
    pub content_type: ValueString<'a>,
    pub acl: ValueString<'a>,
    pub etag: ValueString<'a>,
    pub version_id: ValueString<'a>,
}

fn object_id(bucket: &str, key: &str) -> String {
    format!("{bucket}/{key}")
}

/// ETags are returned quoted
fn trim_etag(etag: &str) -> String {
    etag.trim_matches('"').to_owned()
}

/// Changed body, or an `etag` set to something else than the stored object
fn needs_upload(prior: &ObjectState, planned: &ObjectState) -> bool {
    planned.etag.is_unknown() || planned.etag != prior.etag
}

/// `otc_s3_bucket_object`
#[derive(Debug, Default)]
pub struct S3BucketObject;

impl S3BucketObject {
    async fn upload<'a>(&self, client: &CloudClient, mut planned: ObjectState<'a>) -> Result<ObjectState<'a>> {
        let s3 = s3_client(client).await?;
        let bucket = planned.bucket.as_str().to_owned();
        let key = planned.key.as_str().to_owned();

        let body = match (known_string(&planned.content), known_string(&planned.source)) {
            (Some(content), _) => ByteStream::from(content.into_bytes()),
            (None, Some(source)) => ByteStream::from(
                tokio::fs::read(&source)
                    .await
                    .with_context(|| format!("Could not read {source}"))?,
            ),
            (None, None) => ByteStream::from_static(b""),
        };
        let acl = planned.acl.as_deref_option().unwrap_or(DEFAULT_ACL);

        let output = s3
            .put_object()
            .bucket(&bucket)
            .key(&key)
            .body(body)
            .acl(ObjectCannedAcl::from(acl))
            .set_content_type(known_string(&planned.content_type))
            .send()
            .await
            .with_context(|| format!("Error uploading object {key} to bucket {bucket}"))?;
        info!(bucket, key, "object uploaded");

        planned.etag = Value::from(output.e_tag().map(trim_etag).unwrap_or_default());
        planned.version_id = string_or_null(output.version_id().map(str::to_owned));
        if planned.acl.is_unknown() || planned.acl.is_null() {
            planned.acl = Value::from(DEFAULT_ACL);
        }
        if planned.content_type.is_unknown() {
            let head = s3
                .head_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .with_context(|| format!("Error reading object {key} of bucket {bucket}"))?;
            planned.content_type = string_or_null(head.content_type().map(str::to_owned));
        }
        planned.id = Value::from(object_id(&bucket, &key));
        Ok(planned)
    }
}

#[async_trait]
impl CloudResource for S3BucketObject {
    const NAME: &'static str = "otc_s3_bucket_object";

    type State<'a> = ObjectState<'a>;

    fn schema() -> Schema {
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => attribute(AttributeType::String, AttributeConstraint::Computed, "`<bucket>/<key>`"),
                    "bucket" => attribute(AttributeType::String, AttributeConstraint::Required, "Bucket of the object"),
                    "key" => attribute(AttributeType::String, AttributeConstraint::Required, "Key of the object"),
                    "content" => attribute(AttributeType::String, AttributeConstraint::Optional, "Literal content of the object"),
                    "source" => attribute(AttributeType::String, AttributeConstraint::Optional, "Local file uploaded as the object"),
                    "content_type" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "MIME type of the object"),
                    "acl" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "Canned ACL, defaults to `private`"),
                    "etag" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "ETag of the object, `filemd5(source)` to follow changes of the file"),
                    "version_id" => attribute(AttributeType::String, AttributeConstraint::Computed, "Version of the object in a versioned bucket"),
                },
                description: Description::plain("Object stored in a bucket"),
                ..Default::default()
            },
        }
    }

    fn validate(&self, diags: &mut Diagnostics, config: &Self::State<'_>) {
        validate_one_of(diags, "acl", &config.acl, CANNED_ACLS);
        if !config.content.is_null() && !config.source.is_null() {
            diags.error(
                "Conflicting object body",
                "Only one of `content` and `source` can be set",
                AttributePath::new("source"),
            );
        }
    }

    fn plan_create<'a>(&self, _diags: &mut Diagnostics, mut proposed: Self::State<'a>) -> Self::State<'a> {
        proposed.id = Value::Unknown;
        unknown_if_null(&mut proposed.etag);
        proposed.version_id = Value::Unknown;
        if proposed.acl.is_null() {
            proposed.acl = Value::from(DEFAULT_ACL);
        }
        if proposed.content_type.is_null() {
            proposed.content_type = Value::Unknown;
        }
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
        force_new(&mut replace, "key", &prior.key, &proposed.key);
        if proposed.acl.is_null() {
            proposed.acl = Value::from(DEFAULT_ACL);
        }
        let body_changed = prior.content != proposed.content
            || prior.source != proposed.source
            || prior.content_type != proposed.content_type;
        if body_changed && proposed.etag == prior.etag {
            proposed.etag = Value::Unknown;
        }
        if needs_upload(prior, &proposed) {
            proposed.version_id = Value::Unknown;
        }
        (proposed, replace)
    }

    async fn create<'a>(&self, client: &CloudClient, planned: Self::State<'a>) -> CreateResult<Self::State<'a>> {
        Ok(self.upload(client, planned).await?)
    }

    async fn read<'a>(&self, client: &CloudClient, mut state: Self::State<'a>) -> Result<Option<Self::State<'a>>> {
        let s3 = s3_client(client).await?;
        let bucket = state.bucket.as_str().to_owned();
        let key = state.key.as_str().to_owned();

        let head = match s3.head_object().bucket(&bucket).key(&key).send().await {
            Err(err) if err.as_service_error().is_some_and(|err| err.is_not_found()) => {
                return Ok(None)
            }
            result => result.with_context(|| format!("Error reading object {key} of bucket {bucket}"))?,
        };

        state.etag = Value::from(head.e_tag().map(trim_etag).unwrap_or_default());
        state.version_id = string_or_null(head.version_id().map(str::to_owned));
        state.content_type = string_or_null(head.content_type().map(str::to_owned));
        if state.acl.is_null() {
            state.acl = Value::from(DEFAULT_ACL);
        }
        state.id = Value::from(object_id(&bucket, &key));
        Ok(Some(state))
    }

    async fn update<'a>(
        &self,
        client: &CloudClient,
        prior: Self::State<'a>,
        planned: Self::State<'a>,
    ) -> Result<Self::State<'a>> {
        if needs_upload(&prior, &planned) {
            return self.upload(client, planned).await;
        }
        if prior.acl != planned.acl {
            let s3 = s3_client(client).await?;
            let key = planned.key.as_str();
            s3.put_object_acl()
                .bucket(planned.bucket.as_str())
                .key(key)
                .acl(ObjectCannedAcl::from(planned.acl.as_deref_option().unwrap_or(DEFAULT_ACL)))
                .send()
                .await
                .with_context(|| format!("Error setting ACL of object {key}"))?;
        }
        Ok(planned)
    }

    async fn delete<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<()> {
        let s3 = s3_client(client).await?;
        let bucket = state.bucket.as_str();
        let key = state.key.as_str();
        s3.delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Error deleting object {key} of bucket {bucket}"))?;
        Ok(())
    }

    /// Imported as `<bucket>/<key>`
    fn import<'a>(&self, id: String) -> Option<Self::State<'a>> {
        let (bucket, key) = id.split_once('/')?;
        Some(ObjectState {
            bucket: Value::from(bucket.to_owned()),
            key: Value::from(key.to_owned()),
            id: Value::from(id.clone()),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object() -> ObjectState<'static> {
        ObjectState {
            id: Value::from("site/index.html"),
            bucket: Value::from("site"),
            key: Value::from("index.html"),
            content: Value::from("<html></html>"),
            content_type: Value::from("text/html"),
            acl: Value::from("public-read"),
            etag: Value::from("0123456789abcdef"),
            ..Default::default()
        }
    }

    #[test]
    fn content_and_source_conflict() {
        let mut diags = Diagnostics::default();
        S3BucketObject.validate(
            &mut diags,
            &ObjectState {
                source: Value::from("index.html"),
                ..object()
            },
        );
        assert_eq!(diags.errors.len(), 1);
    }

    #[test]
    fn content_change_uploads_again() {
        let mut diags = Diagnostics::default();
        let proposed = ObjectState {
            content: Value::from("<html>v2</html>"),
            ..object()
        };
        let (state, replace) = S3BucketObject.plan_update(&mut diags, &object(), proposed);
        assert!(replace.is_empty());
        assert!(state.etag.is_unknown());

        let proposed = ObjectState {
            key: Value::from("404.html"),
            ..object()
        };
        let (_, replace) = S3BucketObject.plan_update(&mut diags, &object(), proposed);
        assert_eq!(replace, [AttributePath::new("key")]);
    }

    #[test]
    fn new_etag_uploads_again() {
        let mut diags = Diagnostics::default();
        let prior = ObjectState {
            content: Value::Null,
            source: Value::from("dist/index.html"),
            ..object()
        };

        let (state, replace) = S3BucketObject.plan_update(&mut diags, &prior, prior.clone());
        assert!(replace.is_empty());
        assert!(!needs_upload(&prior, &state));

        let proposed = ObjectState {
            etag: Value::from("fedcba9876543210"),
            ..prior.clone()
        };
        let (state, replace) = S3BucketObject.plan_update(&mut diags, &prior, proposed);
        assert!(replace.is_empty());
        assert_eq!(state.etag.as_str(), "fedcba9876543210");
        assert!(state.version_id.is_unknown());
        assert!(needs_upload(&prior, &state));
    }

    #[test]
    fn configured_etag_is_kept_on_create() {
        let mut diags = Diagnostics::default();
        let state = S3BucketObject.plan_create(&mut diags, object());
        assert_eq!(state.etag.as_str(), "0123456789abcdef");
        let state = S3BucketObject.plan_create(
            &mut diags,
            ObjectState {
                etag: Value::Null,
                ..object()
            },
        );
        assert!(state.etag.is_unknown());
    }

    #[test]
    fn import_splits_bucket_and_key() {
        let state = S3BucketObject.import("site/assets/app.js".to_owned()).unwrap();
        assert_eq!(state.bucket.as_str(), "site");
        assert_eq!(state.key.as_str(), "assets/app.js");
        assert!(S3BucketObject.import("site".to_owned()).is_none());
    }

    #[test]
    fn etag_quotes_are_removed() {
        assert_eq!(trim_etag("\"d41d8cd98f00b204e9800998ecf8427e\""), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
