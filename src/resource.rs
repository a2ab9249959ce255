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

use std::fmt::Debug;
use std::sync::{Arc, OnceLock};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tf_provider::{
    AttributePath, DataSource, Diagnostics, Resource, Schema, Value, ValueEmpty,
};
use tracing::{debug, info, warn};

use crate::client::{is_not_found, ApiError, CloudClient};

/// Client shared between the provider and its resources, set once configured
pub type ClientHandle = Arc<OnceLock<CloudClient>>;

/// Failed creation
///
/// `state` is set once the remote object exists, so that it stays tracked
/// (and tainted) instead of being leaked.
#[derive(Debug)]
pub struct CreateError<S> {
    pub state: Option<S>,
    pub error: anyhow::Error,
}

impl<S> From<anyhow::Error> for CreateError<S> {
    fn from(error: anyhow::Error) -> Self {
        Self { state: None, error }
    }
}

impl<S> From<ApiError> for CreateError<S> {
    fn from(error: ApiError) -> Self {
        Self {
            state: None,
            error: error.into(),
        }
    }
}

pub type CreateResult<S> = std::result::Result<S, CreateError<S>>;

/// Steps of a creation running after the remote object exists
pub trait KeepState<T> {
    /// On failure, keep `state` as the state of the created object
    fn keep_state<S: Clone>(self, state: &S) -> std::result::Result<T, CreateError<S>>;
}

impl<T, E: Into<anyhow::Error>> KeepState<T> for std::result::Result<T, E> {
    fn keep_state<S: Clone>(self, state: &S) -> std::result::Result<T, CreateError<S>> {
        self.map_err(|error| CreateError {
            state: Some(state.clone()),
            error: error.into(),
        })
    }
}

/// Resource backed by a REST API of the cloud
///
/// `ManagedResource` turns it into a [`tf_provider::Resource`].
#[async_trait]
pub trait CloudResource: Send + Sync + 'static {
    /// Terraform type name
    const NAME: &'static str;

    type State<'a>: Serialize + Deserialize<'a> + Clone + PartialEq + Debug + Send + Sync;

    fn schema() -> Schema;

    fn validate(&self, diags: &mut Diagnostics, config: &Self::State<'_>) {
        _ = diags;
        _ = config;
    }

    /// Mark every attribute computed on creation as unknown
    fn plan_create<'a>(&self, diags: &mut Diagnostics, proposed: Self::State<'a>) -> Self::State<'a>;

    /// Plan a change, returning the attributes forcing a replacement
    fn plan_update<'a>(
        &self,
        diags: &mut Diagnostics,
        prior: &Self::State<'a>,
        proposed: Self::State<'a>,
    ) -> (Self::State<'a>, Vec<AttributePath>);

    /// Create the remote object, keeping its state on failures past its creation
    async fn create<'a>(&self, client: &CloudClient, planned: Self::State<'a>) -> CreateResult<Self::State<'a>>;

    /// Refresh the state, `None` when the remote object is gone
    async fn read<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<Option<Self::State<'a>>>;

    async fn update<'a>(
        &self,
        client: &CloudClient,
        prior: Self::State<'a>,
        planned: Self::State<'a>,
    ) -> Result<Self::State<'a>>;

    async fn delete<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<()>;

    /// State to read after `terraform import`
    fn import<'a>(&self, id: String) -> Option<Self::State<'a>> {
        _ = id;
        None
    }
}

#[derive(Debug, Default)]
pub struct ManagedResource<R: CloudResource> {
    inner: R,
    client: ClientHandle,
}

impl<R: CloudResource> ManagedResource<R> {
    pub fn new(inner: R, client: ClientHandle) -> Self {
        Self { inner, client }
    }
}

fn configured<'c>(client: &'c ClientHandle, diags: &mut Diagnostics) -> Option<&'c CloudClient> {
    let client = client.get();
    if client.is_none() {
        diags.root_error(
            "Provider is not configured",
            "The provider must be configured before managing resources",
        );
    }
    client
}

fn known<T>(diags: &mut Diagnostics, value: Value<T>) -> Option<T> {
    match value {
        Value::Value(value) => Some(value),
        _ => {
            diags.internal_error();
            None
        }
    }
}

fn report<T>(diags: &mut Diagnostics, summary: String, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            diags.root_error(summary, format!("{err:#}"));
            None
        }
    }
}

#[async_trait]
impl<R: CloudResource> Resource for ManagedResource<R> {
    type State<'a> = Value<R::State<'a>>;
    type PrivateState<'a> = ValueEmpty;
    type ProviderMetaState<'a> = ValueEmpty;

    fn schema(&self, _diags: &mut Diagnostics) -> Option<Schema> {
        Some(R::schema())
    }

    async fn validate<'a>(&self, diags: &mut Diagnostics, config: Self::State<'a>) -> Option<()> {
        if let Value::Value(config) = &config {
            self.inner.validate(diags, config);
        }

        if diags.errors.is_empty() {
            Some(())
        } else {
            None
        }
    }

    async fn read<'a>(
        &self,
        diags: &mut Diagnostics,
        state: Self::State<'a>,
        private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let Value::Value(state) = state else {
            return Some((state, private_state));
        };
        let client = configured(&self.client, diags)?;

        let state = report(
            diags,
            format!("Error reading {}", R::NAME),
            self.inner.read(client, state).await,
        )?;
        if state.is_none() {
            warn!(resource = R::NAME, "remote object is gone, removing it from state");
        }
        Some((state.map_or(Value::Null, Value::Value), private_state))
    }

    async fn plan_create<'a>(
        &self,
        diags: &mut Diagnostics,
        proposed_state: Self::State<'a>,
        _config_state: Self::State<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let proposed = known(diags, proposed_state)?;
        let state = self.inner.plan_create(diags, proposed);
        Some((Value::Value(state), Default::default()))
    }

    async fn plan_update<'a>(
        &self,
        diags: &mut Diagnostics,
        prior_state: Self::State<'a>,
        proposed_state: Self::State<'a>,
        _config_state: Self::State<'a>,
        prior_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>, Vec<AttributePath>)> {
        let prior = known(diags, prior_state)?;
        let proposed = known(diags, proposed_state)?;
        if prior == proposed {
            return Some((Value::Value(proposed), prior_private_state, Vec::new()));
        }

        let (state, replace) = self.inner.plan_update(diags, &prior, proposed);
        if !replace.is_empty() {
            debug!(resource = R::NAME, ?replace, "replacement required");
        }
        Some((Value::Value(state), prior_private_state, replace))
    }

    async fn plan_destroy<'a>(
        &self,
        _diags: &mut Diagnostics,
        _prior_state: Self::State<'a>,
        _prior_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<()> {
        Some(())
    }

    async fn create<'a>(
        &self,
        diags: &mut Diagnostics,
        planned_state: Self::State<'a>,
        _config_state: Self::State<'a>,
        planned_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let planned = known(diags, planned_state)?;
        let client = configured(&self.client, diags)?;

        info!(resource = R::NAME, "creating");
        match self.inner.create(client, planned).await {
            Ok(state) => Some((Value::Value(state), planned_private_state)),
            Err(CreateError { state, error }) => {
                diags.root_error(format!("Error creating {}", R::NAME), format!("{error:#}"));
                let state = state?;
                warn!(resource = R::NAME, "created but not completed, keeping it in state");
                Some((Value::Value(state), planned_private_state))
            }
        }
    }

    async fn update<'a>(
        &self,
        diags: &mut Diagnostics,
        prior_state: Self::State<'a>,
        planned_state: Self::State<'a>,
        _config_state: Self::State<'a>,
        planned_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let prior = known(diags, prior_state)?;
        let planned = known(diags, planned_state)?;
        let client = configured(&self.client, diags)?;

        info!(resource = R::NAME, "updating");
        let state = report(
            diags,
            format!("Error updating {}", R::NAME),
            self.inner.update(client, prior, planned).await,
        )?;
        Some((Value::Value(state), planned_private_state))
    }

    async fn destroy<'a>(
        &self,
        diags: &mut Diagnostics,
        state: Self::State<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<()> {
        let Value::Value(state) = state else {
            return Some(());
        };
        let client = configured(&self.client, diags)?;

        info!(resource = R::NAME, "deleting");
        match self.inner.delete(client, state).await {
            Err(err) if is_not_found(&err) => {
                debug!(resource = R::NAME, "already deleted");
                Some(())
            }
            result => report(diags, format!("Error deleting {}", R::NAME), result),
        }
    }

    async fn import<'a>(
        &self,
        diags: &mut Diagnostics,
        id: String,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        match self.inner.import(id.clone()) {
            Some(state) => Some((Value::Value(state), Default::default())),
            None => {
                diags.root_error_short(format!("Cannot import {} from `{id}`", R::NAME));
                None
            }
        }
    }
}

/// Data source backed by a REST API of the cloud
#[async_trait]
pub trait CloudDataSource: Send + Sync + 'static {
    const NAME: &'static str;

    type State<'a>: Serialize + Deserialize<'a> + Clone + Debug + Send + Sync;

    fn schema() -> Schema;

    fn validate(&self, diags: &mut Diagnostics, config: &Self::State<'_>) {
        _ = diags;
        _ = config;
    }

    async fn read<'a>(&self, client: &CloudClient, config: Self::State<'a>) -> Result<Self::State<'a>>;
}

#[derive(Debug, Default)]
pub struct ManagedDataSource<D: CloudDataSource> {
    inner: D,
    client: ClientHandle,
}

impl<D: CloudDataSource> ManagedDataSource<D> {
    pub fn new(inner: D, client: ClientHandle) -> Self {
        Self { inner, client }
    }
}

#[async_trait]
impl<D: CloudDataSource> DataSource for ManagedDataSource<D> {
    type State<'a> = Value<D::State<'a>>;
    type ProviderMetaState<'a> = ValueEmpty;

    fn schema(&self, _diags: &mut Diagnostics) -> Option<Schema> {
        Some(D::schema())
    }

    async fn validate<'a>(&self, diags: &mut Diagnostics, config: Self::State<'a>) -> Option<()> {
        if let Value::Value(config) = &config {
            self.inner.validate(diags, config);
        }

        if diags.errors.is_empty() {
            Some(())
        } else {
            None
        }
    }

    async fn read<'a>(
        &self,
        diags: &mut Diagnostics,
        config: Self::State<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<Self::State<'a>> {
        let config = known(diags, config)?;
        let client = configured(&self.client, diags)?;

        let state = report(
            diags,
            format!("Error reading {}", D::NAME),
            self.inner.read(client, config).await,
        )?;
        Some(Value::Value(state))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Context};
    use reqwest::{Method, StatusCode};
    use tf_provider::ValueString;

    use crate::config::Config;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
    struct WidgetState<'a> {
        #[serde(borrow = "'a")]
        id: ValueString<'a>,
        name: ValueString<'a>,
    }

    /// Remote object already gone, whose creation fails once it exists
    #[derive(Debug, Default)]
    struct Widget;

    #[async_trait]
    impl CloudResource for Widget {
        const NAME: &'static str = "otc_widget_v1";

        type State<'a> = WidgetState<'a>;

        fn schema() -> Schema {
            Schema {
                version: 1,
                block: Default::default(),
            }
        }

        fn plan_create<'a>(&self, _diags: &mut Diagnostics, proposed: Self::State<'a>) -> Self::State<'a> {
            proposed
        }

        fn plan_update<'a>(
            &self,
            _diags: &mut Diagnostics,
            _prior: &Self::State<'a>,
            proposed: Self::State<'a>,
        ) -> (Self::State<'a>, Vec<AttributePath>) {
            (proposed, Vec::new())
        }

        async fn create<'a>(&self, _client: &CloudClient, mut planned: Self::State<'a>) -> CreateResult<Self::State<'a>> {
            planned.id = Value::from("w-1");
            Err::<(), _>(anyhow!("timeout while waiting for ACTIVE")).keep_state(&planned)?;
            Ok(planned)
        }

        async fn read<'a>(&self, _client: &CloudClient, _state: Self::State<'a>) -> Result<Option<Self::State<'a>>> {
            Ok(None)
        }

        async fn update<'a>(
            &self,
            _client: &CloudClient,
            _prior: Self::State<'a>,
            planned: Self::State<'a>,
        ) -> Result<Self::State<'a>> {
            Ok(planned)
        }

        async fn delete<'a>(&self, _client: &CloudClient, state: Self::State<'a>) -> Result<()> {
            Err(ApiError::Status {
                method: Method::DELETE,
                url: format!("https://widget.eu-de.example.com/{}", state.id.as_str()),
                status: StatusCode::NOT_FOUND,
                body: String::new(),
            })
            .context("Error deleting widget")
        }
    }

    /// Handle holding a client authenticated with a supplied token
    async fn handle() -> ClientHandle {
        let config = Config {
            region: "eu-de".to_owned(),
            token: Some("token".to_owned()),
            tenant_id: Some("p-1".to_owned()),
            ..Default::default()
        };
        let handle = ClientHandle::default();
        handle.set(CloudClient::new(config).await.unwrap()).unwrap();
        handle
    }

    fn widget() -> Value<WidgetState<'static>> {
        Value::Value(WidgetState {
            id: Value::from("w-1"),
            name: Value::from("w"),
        })
    }

    #[tokio::test]
    async fn failed_creation_keeps_the_created_object() {
        let resource = ManagedResource::new(Widget, handle().await);
        let mut diags = Diagnostics::default();
        let planned = Value::Value(WidgetState {
            id: Value::Unknown,
            name: Value::from("w"),
        });
        let (state, _) = resource
            .create(&mut diags, planned.clone(), planned, Default::default(), Default::default())
            .await
            .unwrap();
        assert_eq!(state.as_ref_option().unwrap().id.as_str(), "w-1");
        assert_eq!(diags.errors.len(), 1);
        assert_eq!(diags.errors[0].summary, "Error creating otc_widget_v1");
        assert!(diags.errors[0].detail.contains("timeout while waiting for ACTIVE"));
    }

    #[test]
    fn errors_before_creation_keep_nothing() {
        let err: CreateError<WidgetState> = anyhow!("quota exceeded").into();
        assert!(err.state.is_none());
    }

    #[tokio::test]
    async fn vanished_object_reads_as_null() {
        let resource = ManagedResource::new(Widget, handle().await);
        let mut diags = Diagnostics::default();
        let (state, _) = resource
            .read(&mut diags, widget(), Default::default(), Default::default())
            .await
            .unwrap();
        assert!(state.is_null());
        assert!(diags.errors.is_empty());
    }

    #[tokio::test]
    async fn deleting_a_missing_object_succeeds() {
        let resource = ManagedResource::new(Widget, handle().await);
        let mut diags = Diagnostics::default();
        let deleted = resource
            .destroy(&mut diags, widget(), Default::default())
            .await;
        assert_eq!(deleted, Some(()));
        assert!(diags.errors.is_empty());
    }

    #[test]
    fn errors_keep_their_chain() {
        let mut diags = Diagnostics::default();
        let result: Result<()> = Err(anyhow!("HTTP 409").context("Error creating queue"));
        assert!(report(&mut diags, "Error creating otc_dms_queue_v1".to_owned(), result).is_none());
        assert_eq!(diags.errors.len(), 1);
        assert_eq!(diags.errors[0].summary, "Error creating otc_dms_queue_v1");
        assert_eq!(diags.errors[0].detail, "Error creating queue: HTTP 409");
    }

    #[test]
    fn unconfigured_provider_is_reported() {
        let handle = ClientHandle::default();
        let mut diags = Diagnostics::default();
        assert!(configured(&handle, &mut diags).is_none());
        assert_eq!(diags.errors.len(), 1);
    }

    #[test]
    fn unknown_state_is_an_internal_error() {
        let mut diags = Diagnostics::default();
        assert_eq!(known(&mut diags, Value::Value(1)), Some(1));
        assert!(diags.errors.is_empty());
        assert_eq!(known::<i64>(&mut diags, Value::Unknown), None);
        assert_eq!(diags.errors.len(), 1);
    }
}
