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

use async_trait::async_trait;

use tf_provider::{
    data_source::DynamicDataSource, map, resource::DynamicResource, Diagnostics, Provider, Schema,
    ValueEmpty,
};
use tracing::info;

use crate::client::CloudClient;
use crate::compute::ComputeInstance;
use crate::config::{Config, ProviderConfig};
use crate::dms::DmsQueue;
use crate::kms::{KmsKey, KmsKeyDataSource};
use crate::lts::{LtsGroup, LtsTopic};
use crate::resource::{
    ClientHandle, CloudDataSource, CloudResource, ManagedDataSource, ManagedResource,
};
use crate::s3::{S3Bucket, S3BucketObject};
use crate::sdrs::ProtectionGroup;
use crate::utils::WithSchema;
use crate::vbs::VbsBackup;
use crate::vpc::{FlowLog, VpcRoute};
use crate::waf::WafDomain;

#[derive(Debug, Default, Clone)]
pub struct CloudProvider {
    client: ClientHandle,
}

impl CloudProvider {
    fn resource<R: CloudResource + Default>(&self) -> ManagedResource<R> {
        ManagedResource::new(R::default(), self.client.clone())
    }

    fn data_source<D: CloudDataSource + Default>(&self) -> ManagedDataSource<D> {
        ManagedDataSource::new(D::default(), self.client.clone())
    }
}

#[async_trait]
impl Provider for CloudProvider {
    type Config<'a> = ProviderConfig<'a>;
    type MetaState<'a> = ValueEmpty;

    fn schema(&self, _diags: &mut Diagnostics) -> Option<Schema> {
        Some(ProviderConfig::schema())
    }

    async fn validate<'a>(&self, diags: &mut Diagnostics, config: Self::Config<'a>) -> Option<()> {
        Config::resolve(&config).validate(diags, &config);

        if diags.errors.is_empty() {
            Some(())
        } else {
            None
        }
    }

    async fn configure<'a>(
        &self,
        diags: &mut Diagnostics,
        terraform_version: String,
        config: Self::Config<'a>,
    ) -> Option<()> {
        let resolved = Config::resolve(&config);
        resolved.validate(diags, &config);
        if !diags.errors.is_empty() {
            return None;
        }

        info!(%terraform_version, region = %resolved.region, "configuring provider");
        let client = match CloudClient::new(resolved).await {
            Ok(client) => client,
            Err(err) => {
                diags.root_error("Failed to authenticate", format!("{err:#}"));
                return None;
            }
        };

        if self.client.set(client).is_err() {
            diags.root_warning_short("Provider is already configured, keeping the first configuration");
        }
        Some(())
    }

    fn get_resources(
        &self,
        _diags: &mut Diagnostics,
    ) -> Option<HashMap<String, Box<dyn DynamicResource>>> {
        Some(map! {
            ComputeInstance::NAME => self.resource::<ComputeInstance>(),
            VpcRoute::NAME        => self.resource::<VpcRoute>(),
            FlowLog::NAME         => self.resource::<FlowLog>(),
            KmsKey::NAME          => self.resource::<KmsKey>(),
            WafDomain::NAME       => self.resource::<WafDomain>(),
            VbsBackup::NAME       => self.resource::<VbsBackup>(),
            DmsQueue::NAME        => self.resource::<DmsQueue>(),
            ProtectionGroup::NAME => self.resource::<ProtectionGroup>(),
            LtsGroup::NAME        => self.resource::<LtsGroup>(),
            LtsTopic::NAME        => self.resource::<LtsTopic>(),
            S3Bucket::NAME        => self.resource::<S3Bucket>(),
            S3BucketObject::NAME  => self.resource::<S3BucketObject>(),
        })
    }

    fn get_data_sources(
        &self,
        _diags: &mut Diagnostics,
    ) -> Option<HashMap<String, Box<dyn DynamicDataSource>>> {
        Some(map! {
            KmsKeyDataSource::NAME => self.data_source::<KmsKeyDataSource>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use tf_provider::{AttributeConstraint, Resource, Value};

    use super::*;

    #[test]
    fn every_resource_has_a_computed_id() {
        let provider = CloudProvider::default();
        let mut diags = Diagnostics::default();
        let resources = provider.get_resources(&mut diags).unwrap();
        assert_eq!(resources.len(), 12);

        for (name, resource) in resources {
            assert!(name.starts_with("otc_"), "{name}");
            let schema = resource.schema(&mut diags).unwrap();
            let id = schema
                .block
                .attributes
                .get("id")
                .unwrap_or_else(|| panic!("{name} has no id"));
            assert!(
                matches!(
                    id.constraint,
                    AttributeConstraint::Computed | AttributeConstraint::OptionalComputed
                ),
                "{name}"
            );
        }
        assert!(diags.errors.is_empty());
    }

    #[test]
    fn kms_data_source_is_registered() {
        let provider = CloudProvider::default();
        let mut diags = Diagnostics::default();
        let data_sources = provider.get_data_sources(&mut diags).unwrap();
        let schema = data_sources["otc_kms_key_v1"].schema(&mut diags).unwrap();
        assert!(schema.block.attributes.contains_key("key_alias"));
    }

    #[tokio::test]
    async fn unconfigured_resources_report_an_error() {
        let provider = CloudProvider::default();
        let resource = provider.resource::<LtsGroup>();
        let mut diags = Diagnostics::default();
        let state = Value::Value(Default::default());
        let read =
            Resource::read(&resource, &mut diags, state, Default::default(), Default::default())
                .await;
        assert!(read.is_none());
        assert_eq!(diags.errors.len(), 1);
    }
}
