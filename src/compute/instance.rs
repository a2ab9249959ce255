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

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tf_provider::{
    map, value::{self, ValueBool}, Attribute, AttributeConstraint, AttributePath, AttributeType,
    Block, Description, Diagnostics, Schema, Value, ValueList, ValueMap, ValueNumber, ValueSet,
    ValueString,
};
use tracing::info;

use crate::client::{check_deleted, CloudClient, ServiceClient};
use crate::resource::{CloudResource, CreateResult, KeepState};
use crate::tags::{flatten_tags, tags_attribute, update_tags, Tag, Tags};
use crate::timeouts::{Operation, Timeouts, TIMEOUTS_BLOCK};
use crate::utils::{
    attribute, force_new, known_map, known_string, known_strings, string_or_null,
    string_set, tracked_map, unknown_if_null, WithValidate, ID_ATTRIBUTE,
};
use crate::wait::StateChangeConf;

use super::network::{access_addresses, aggregate_networks, Interface, Network, NetworkConfig, Port};
use super::volume::{read_volumes, AttachedVolume};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InstanceState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub name: ValueString<'a>,
    pub image_id: ValueString<'a>,
    pub flavor_id: ValueString<'a>,
    pub flavor_name: ValueString<'a>,
    pub key_pair: ValueString<'a>,
    pub security_groups: ValueSet<ValueString<'a>>,
    pub availability_zone: ValueString<'a>,
    pub user_data: ValueString<'a>,
    pub admin_pass: ValueString<'a>,
    pub metadata: ValueMap<'a, ValueString<'a>>,
    pub tags: Tags<'a>,
    pub network: ValueList<Value<NetworkState<'a>>>,
    pub stop_before_destroy: ValueBool,
    pub access_ip_v4: ValueString<'a>,
    pub access_ip_v6: ValueString<'a>,
    pub status: ValueString<'a>,
    pub volume_attached: ValueList<Value<VolumeAttachedState<'a>>>,
    #[serde(with = "value::serde_as_vec")]
    pub timeouts: Value<Timeouts<'a>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NetworkState<'a> {
    #[serde(borrow = "'a")]
    pub uuid: ValueString<'a>,
    pub name: ValueString<'a>,
    pub port: ValueString<'a>,
    pub fixed_ip_v4: ValueString<'a>,
    pub fixed_ip_v6: ValueString<'a>,
    pub mac: ValueString<'a>,
    pub access_network: ValueBool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VolumeAttachedState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub device: ValueString<'a>,
    pub size: ValueNumber,
    pub bootable: ValueBool,
    pub volume_type: ValueString<'a>,
}

impl<'a> NetworkState<'a> {
    fn config(&self) -> NetworkConfig {
        NetworkConfig {
            uuid: known_string(&self.uuid),
            name: known_string(&self.name),
            port: known_string(&self.port),
            fixed_ip_v4: known_string(&self.fixed_ip_v4),
            fixed_ip_v6: known_string(&self.fixed_ip_v6),
            access_network: self.access_network.as_ref_option().copied(),
        }
    }
}

impl From<Network> for NetworkState<'_> {
    fn from(network: Network) -> Self {
        NetworkState {
            uuid: string_or_null(network.uuid),
            name: string_or_null(network.name),
            port: string_or_null(network.port),
            fixed_ip_v4: string_or_null(network.fixed_ip_v4),
            fixed_ip_v6: string_or_null(network.fixed_ip_v6),
            mac: string_or_null(network.mac),
            access_network: network.access_network.map_or(Value::Null, Value::Value),
        }
    }
}

impl From<AttachedVolume> for VolumeAttachedState<'_> {
    fn from(volume: AttachedVolume) -> Self {
        VolumeAttachedState {
            id: Value::from(volume.id),
            device: string_or_null(Some(volume.device)),
            size: volume.size.into(),
            bootable: volume.bootable.into(),
            volume_type: string_or_null(volume.volume_type),
        }
    }
}

lazy_static! {
    static ref NETWORK_ATTRIBUTE: Attribute = attribute(
        AttributeType::AttributeList(map! {
            "uuid" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "Network id"),
            "name" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "Network name"),
            "port" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "Port to attach"),
            "fixed_ip_v4" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "IPv4 address on the network"),
            "fixed_ip_v6" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "IPv6 address on the network"),
            "mac" => attribute(AttributeType::String, AttributeConstraint::Computed, "MAC address of the interface"),
            "access_network" => attribute(AttributeType::Bool, AttributeConstraint::Optional, "Use this network for the access addresses"),
        }),
        AttributeConstraint::OptionalComputed,
        "Networks the instance is attached to",
    );
    static ref VOLUME_ATTACHED_ATTRIBUTE: Attribute = attribute(
        AttributeType::AttributeList(map! {
            "id" => attribute(AttributeType::String, AttributeConstraint::Computed, "Volume id"),
            "device" => attribute(AttributeType::String, AttributeConstraint::Computed, "Device name in the instance"),
            "size" => attribute(AttributeType::Number, AttributeConstraint::Computed, "Size in GB"),
            "bootable" => attribute(AttributeType::Bool, AttributeConstraint::Computed, "Whether the volume is bootable"),
            "volume_type" => attribute(AttributeType::String, AttributeConstraint::Computed, "Disk type"),
        }),
        AttributeConstraint::Computed,
        "Volumes attached to the instance",
    );
}

#[derive(Debug, Deserialize)]
struct ServerBody {
    server: Server,
}

#[derive(Debug, Clone, Deserialize)]
struct Server {
    id: String,
    #[serde(default)]
    name: String,
    status: String,
    #[serde(default)]
    flavor: Option<IdRef>,
    /// object, or empty string when booted from a volume
    #[serde(default)]
    image: serde_json::Value,
    #[serde(default)]
    key_name: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    security_groups: Vec<NameRef>,
    #[serde(rename = "OS-EXT-AZ:availability_zone", default)]
    availability_zone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CreatedServer {
    server: IdRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NameRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Flavor {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct FlavorBody {
    flavor: Flavor,
}

#[derive(Debug, Deserialize)]
struct Flavors {
    flavors: Vec<Flavor>,
}

#[derive(Debug, Deserialize)]
struct NetworkRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Networks {
    networks: Vec<NetworkRef>,
}

#[derive(Debug, Deserialize)]
struct Ports {
    ports: Vec<Port>,
}

#[derive(Debug, Deserialize)]
struct TagsBody {
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Serialize)]
struct NewServer {
    name: String,
    #[serde(rename = "imageRef", skip_serializing_if = "Option::is_none")]
    image_ref: Option<String>,
    #[serde(rename = "flavorRef")]
    flavor_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    security_groups: Vec<NameRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    availability_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_data: Option<String>,
    #[serde(rename = "adminPass", skip_serializing_if = "Option::is_none")]
    admin_pass: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
    networks: Vec<NetworkRequest>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct NetworkRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fixed_ip: Option<String>,
}

/// `otc_compute_instance_v2`
#[derive(Debug, Default)]
pub struct ComputeInstance;

struct Api<'c> {
    client: &'c CloudClient,
    ecs: ServiceClient<'c>,
    vpc: ServiceClient<'c>,
    project_id: String,
}

impl<'c> Api<'c> {
    async fn new(client: &'c CloudClient) -> Result<Self> {
        Ok(Self {
            client,
            ecs: client.service("ecs"),
            vpc: client.service("vpc"),
            project_id: client.project_id().await?,
        })
    }

    fn server_path(&self, id: &str) -> String {
        format!("/v2.1/{}/servers/{id}", self.project_id)
    }

    fn tags_path(&self, id: &str) -> String {
        format!("/v1/{}/cloudservers/{id}", self.project_id)
    }

    /// Server, `None` once deleted
    async fn server(&self, id: &str) -> Result<Option<Server>> {
        let server = check_deleted(self.ecs.get::<ServerBody>(&self.server_path(id)).await)
            .with_context(|| format!("Error reading server {id}"))?;
        Ok(server
            .map(|body| body.server)
            .filter(|server| server.status != "DELETED" && server.status != "SOFT_DELETED"))
    }

    async fn wait_status(
        &self,
        id: &str,
        pending: &[&str],
        target: &[&str],
        timeout: Duration,
    ) -> Result<Option<Server>> {
        let server = StateChangeConf::new(pending, target, timeout)
            .delay(Duration::from_secs(5))
            .min_timeout(Duration::from_secs(3))
            .wait_for_state(move || async move {
                let server = self.server(id).await?;
                anyhow::Ok(server.map(|server| {
                    let status = server.status.clone();
                    (server, status)
                }))
            })
            .await
            .with_context(|| {
                format!(
                    "Error waiting for server {id} to become {}",
                    if target.is_empty() { "deleted" } else { target[0] }
                )
            })?;
        Ok(server)
    }

    async fn action(&self, id: &str, body: serde_json::Value) -> Result<()> {
        self.ecs
            .action(&format!("{}/action", self.server_path(id)), &body)
            .await?;
        Ok(())
    }

    async fn flavor_id(&self, state: &InstanceState<'_>) -> Result<String> {
        if let Some(id) = known_string(&state.flavor_id) {
            return Ok(id);
        }
        let name = known_string(&state.flavor_name)
            .ok_or_else(|| anyhow!("either `flavor_id` or `flavor_name` must be set"))?;
        let flavors: Flavors = self
            .ecs
            .get(&format!("/v2.1/{}/flavors/detail", self.project_id))
            .await
            .context("Error listing flavors")?;
        flavors
            .flavors
            .into_iter()
            .find(|flavor| flavor.name == name)
            .map(|flavor| flavor.id)
            .ok_or_else(|| anyhow!("no flavor named `{name}`"))
    }

    async fn flavor_name(&self, id: &str) -> Result<Option<String>> {
        let flavor = check_deleted(
            self.ecs
                .get::<FlavorBody>(&format!("/v2.1/{}/flavors/{id}", self.project_id))
                .await,
        )
        .with_context(|| format!("Error reading flavor {id}"))?;
        Ok(flavor.map(|body| body.flavor.name))
    }

    async fn network_request(&self, network: &NetworkConfig) -> Result<NetworkRequest> {
        let uuid = match (&network.uuid, &network.name, &network.port) {
            (None, Some(name), None) => {
                let networks: Networks = self
                    .vpc
                    .get_query("/v2.0/networks", &[("name", name.as_str())])
                    .await
                    .with_context(|| format!("Error looking up network `{name}`"))?;
                let network = networks
                    .networks
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("no network named `{name}`"))?;
                Some(network.id)
            }
            (uuid, _, _) => uuid.clone(),
        };
        Ok(NetworkRequest {
            uuid,
            port: network.port.clone(),
            fixed_ip: network.fixed_ip_v4.clone(),
        })
    }

    async fn interfaces(&self, id: &str) -> Result<Vec<Interface>> {
        let ports: Ports = self
            .vpc
            .get_query("/v2.0/ports", &[("device_id", id)])
            .await
            .context("Error listing the ports of the server")?;
        Ok(ports.ports.into_iter().map(Interface::from).collect())
    }

    async fn tags(&self, id: &str) -> Result<Vec<Tag>> {
        let tags: TagsBody = self
            .ecs
            .get(&format!("{}/tags", self.tags_path(id)))
            .await
            .context("Error reading tags")?;
        Ok(tags.tags)
    }

    /// Refresh the state from the server and the APIs around it
    async fn refresh<'a>(&self, mut state: InstanceState<'a>, server: Server) -> Result<InstanceState<'a>> {
        let flavor_id = server.flavor.as_ref().map(|flavor| flavor.id.clone());
        let flavor_name = match &flavor_id {
            Some(id) => self.flavor_name(id).await?,
            None => None,
        };
        let configured: Vec<_> = state
            .network
            .iter()
            .flatten()
            .flatten()
            .map(NetworkState::config)
            .collect();
        let networks = aggregate_networks(&configured, &self.interfaces(&server.id).await?);
        let (access_ip_v4, access_ip_v6) = access_addresses(&networks);
        let volumes = read_volumes(self.client, &server.id).await?;
        let tags = self.tags(&server.id).await?;

        state.id = Value::from(server.id);
        state.name = Value::from(server.name);
        state.status = Value::from(server.status);
        state.image_id = string_or_null(
            server
                .image
                .get("id")
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned),
        );
        state.flavor_id = string_or_null(flavor_id);
        state.flavor_name = string_or_null(flavor_name);
        state.key_pair = string_or_null(server.key_name);
        state.availability_zone = string_or_null(server.availability_zone);
        state.security_groups = string_set(server.security_groups.into_iter().map(|sg| sg.name));
        state.metadata = tracked_map(server.metadata, &state.metadata);
        state.tags = match flatten_tags(tags) {
            Value::Null if !state.tags.is_null() => Value::Value(Default::default()),
            tags => tags,
        };
        state.network = Value::Value(
            networks
                .into_iter()
                .map(|network| Value::Value(network.into()))
                .collect(),
        );
        state.access_ip_v4 = string_or_null(access_ip_v4);
        state.access_ip_v6 = string_or_null(access_ip_v6);
        state.volume_attached = Value::Value(
            volumes
                .into_iter()
                .map(|volume| Value::Value(volume.into()))
                .collect(),
        );
        Ok(state)
    }
}

fn networks_changed(prior: &InstanceState, proposed: &InstanceState) -> bool {
    let configs = |state: &InstanceState| -> Vec<NetworkConfig> {
        state
            .network
            .iter()
            .flatten()
            .flatten()
            .map(NetworkState::config)
            .collect()
    };
    proposed.network.is_unknown() || configs(prior) != configs(proposed)
}

#[async_trait]
impl CloudResource for ComputeInstance {
    const NAME: &'static str = "otc_compute_instance_v2";

    type State<'a> = InstanceState<'a>;

    fn schema() -> Schema {
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => ID_ATTRIBUTE.clone(),
                    "name" => attribute(AttributeType::String, AttributeConstraint::Required, "Name of the instance"),
                    "image_id" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "Image to boot from"),
                    "flavor_id" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "Flavor id"),
                    "flavor_name" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "Flavor name"),
                    "key_pair" => attribute(AttributeType::String, AttributeConstraint::Optional, "SSH key pair injected in the instance"),
                    "security_groups" => attribute(AttributeType::Set(AttributeType::String.into()), AttributeConstraint::OptionalComputed, "Names of the security groups"),
                    "availability_zone" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "Availability zone"),
                    "user_data" => attribute(AttributeType::String, AttributeConstraint::Optional, "User data passed to cloud-init"),
                    "admin_pass" => Attribute {
                        sensitive: true,
                        ..attribute(AttributeType::String, AttributeConstraint::Optional, "Administrator password")
                    },
                    "metadata" => attribute(AttributeType::Map(AttributeType::String.into()), AttributeConstraint::Optional, "Metadata key/value pairs"),
                    "tags" => tags_attribute(),
                    "network" => NETWORK_ATTRIBUTE.clone(),
                    "stop_before_destroy" => attribute(AttributeType::Bool, AttributeConstraint::Optional, "Stop the instance gracefully before deleting it"),
                    "access_ip_v4" => attribute(AttributeType::String, AttributeConstraint::Computed, "IPv4 address of the access network"),
                    "access_ip_v6" => attribute(AttributeType::String, AttributeConstraint::Computed, "IPv6 address of the access network"),
                    "status" => attribute(AttributeType::String, AttributeConstraint::Computed, "Status of the instance"),
                    "volume_attached" => VOLUME_ATTACHED_ATTRIBUTE.clone(),
                },
                blocks: map! {
                    "timeouts" => TIMEOUTS_BLOCK.clone(),
                },
                description: Description::plain("Compute instance"),
                ..Default::default()
            },
        }
    }

    fn validate(&self, diags: &mut Diagnostics, config: &Self::State<'_>) {
        if config.flavor_id.is_null() && config.flavor_name.is_null() {
            diags.root_error_short("Either `flavor_id` or `flavor_name` must be set");
        }
        for (i, network) in config.network.iter().flatten().enumerate() {
            if let Value::Value(network) = network {
                if network.uuid.is_null() && network.name.is_null() && network.port.is_null() {
                    diags.error_short(
                        "A network needs one of `uuid`, `name` or `port`",
                        AttributePath::new("network").index(i as i64),
                    );
                }
            }
        }
        config
            .timeouts
            .validate(diags, AttributePath::new("timeouts").index(0));
    }

    fn plan_create<'a>(&self, _diags: &mut Diagnostics, mut proposed: Self::State<'a>) -> Self::State<'a> {
        proposed.id = Value::Unknown;
        proposed.status = Value::Unknown;
        proposed.access_ip_v4 = Value::Unknown;
        proposed.access_ip_v6 = Value::Unknown;
        proposed.volume_attached = Value::Unknown;
        unknown_if_null(&mut proposed.image_id);
        unknown_if_null(&mut proposed.flavor_id);
        unknown_if_null(&mut proposed.flavor_name);
        unknown_if_null(&mut proposed.security_groups);
        unknown_if_null(&mut proposed.availability_zone);
        unknown_if_null(&mut proposed.network);
        for network in proposed.network.iter_mut().flatten().flatten() {
            unknown_if_null(&mut network.uuid);
            unknown_if_null(&mut network.name);
            unknown_if_null(&mut network.port);
            unknown_if_null(&mut network.fixed_ip_v4);
            unknown_if_null(&mut network.fixed_ip_v6);
            unknown_if_null(&mut network.mac);
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
        force_new(&mut replace, "image_id", &prior.image_id, &proposed.image_id);
        force_new(&mut replace, "key_pair", &prior.key_pair, &proposed.key_pair);
        force_new(&mut replace, "availability_zone", &prior.availability_zone, &proposed.availability_zone);
        force_new(&mut replace, "user_data", &prior.user_data, &proposed.user_data);
        force_new(&mut replace, "admin_pass", &prior.admin_pass, &proposed.admin_pass);
        if networks_changed(prior, &proposed) {
            replace.push(AttributePath::new("network"));
        }

        let flavor_id_changed = prior.flavor_id != proposed.flavor_id;
        let flavor_name_changed = prior.flavor_name != proposed.flavor_name;
        if flavor_name_changed && !flavor_id_changed {
            proposed.flavor_id = Value::Unknown;
        }
        if flavor_id_changed && !flavor_name_changed {
            proposed.flavor_name = Value::Unknown;
        }
        if flavor_id_changed || flavor_name_changed {
            proposed.status = Value::Unknown;
        }

        (proposed, replace)
    }

    async fn create<'a>(&self, client: &CloudClient, mut planned: Self::State<'a>) -> CreateResult<Self::State<'a>> {
        let api = Api::new(client).await?;
        let timeout = Timeouts::pick(&planned.timeouts, Operation::Create, DEFAULT_TIMEOUT);

        let mut networks = Vec::new();
        for network in planned.network.iter().flatten().flatten() {
            networks.push(api.network_request(&network.config()).await?);
        }
        let body = NewServer {
            name: planned.name.as_str().to_owned(),
            image_ref: known_string(&planned.image_id),
            flavor_ref: api.flavor_id(&planned).await?,
            key_name: known_string(&planned.key_pair),
            security_groups: known_strings(planned.security_groups.iter().flatten())
                .into_iter()
                .map(|name| NameRef { name })
                .collect(),
            availability_zone: known_string(&planned.availability_zone),
            user_data: planned
                .user_data
                .as_deref_option()
                .map(|data| STANDARD.encode(data)),
            admin_pass: known_string(&planned.admin_pass),
            metadata: known_map(&planned.metadata),
            networks,
        };

        let created: CreatedServer = api
            .ecs
            .post(
                &format!("/v2.1/{}/servers", api.project_id),
                &json!({ "server": body }),
            )
            .await
            .context("Error creating server")?;
        let id = created.server.id;
        planned.id = Value::from(id.clone());
        info!(server_id = %id, "server created, waiting for it to become ACTIVE");

        let server = api
            .wait_status(&id, &["BUILD"], &["ACTIVE"], timeout)
            .await
            .and_then(|server| server.ok_or_else(|| anyhow!("server {id} disappeared")))
            .keep_state(&planned)?;

        if !planned.tags.is_null() {
            update_tags(&api.ecs, &api.tags_path(&id), &Value::Null, &planned.tags)
                .await
                .keep_state(&planned)?;
        }

        let partial = planned.clone();
        api.refresh(planned, server).await.keep_state(&partial)
    }

    async fn read<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<Option<Self::State<'a>>> {
        let api = Api::new(client).await?;
        let Some(server) = api.server(state.id.as_str()).await? else {
            return Ok(None);
        };
        Ok(Some(api.refresh(state, server).await?))
    }

    async fn update<'a>(
        &self,
        client: &CloudClient,
        prior: Self::State<'a>,
        planned: Self::State<'a>,
    ) -> Result<Self::State<'a>> {
        let api = Api::new(client).await?;
        let id = prior.id.as_str();
        let timeout = Timeouts::pick(&planned.timeouts, Operation::Update, DEFAULT_TIMEOUT);

        if prior.name != planned.name {
            api.ecs
                .put::<_, serde_json::Value>(
                    &api.server_path(id),
                    &json!({ "server": { "name": planned.name.as_str() } }),
                )
                .await
                .context("Error renaming server")?;
        }

        if prior.metadata != planned.metadata {
            let old = known_map(&prior.metadata);
            let new = known_map(&planned.metadata);
            for key in old.keys().filter(|key| !new.contains_key(*key)) {
                api.ecs
                    .delete(&format!("{}/metadata/{key}", api.server_path(id)))
                    .await
                    .with_context(|| format!("Error deleting metadata `{key}`"))?;
            }
            if !new.is_empty() {
                api.ecs
                    .action(
                        &format!("{}/metadata", api.server_path(id)),
                        &json!({ "metadata": new }),
                    )
                    .await
                    .context("Error updating metadata")?;
            }
        }

        if prior.security_groups != planned.security_groups && !planned.security_groups.is_unknown() {
            let old: BTreeSet<_> = known_strings(prior.security_groups.iter().flatten()).into_iter().collect();
            let new: BTreeSet<_> = known_strings(planned.security_groups.iter().flatten()).into_iter().collect();
            for name in old.difference(&new) {
                api.action(id, json!({ "removeSecurityGroup": { "name": name } }))
                    .await
                    .with_context(|| format!("Error removing security group `{name}`"))?;
            }
            for name in new.difference(&old) {
                api.action(id, json!({ "addSecurityGroup": { "name": name } }))
                    .await
                    .with_context(|| format!("Error adding security group `{name}`"))?;
            }
        }

        if prior.flavor_id != planned.flavor_id || prior.flavor_name != planned.flavor_name {
            let flavor_ref = api.flavor_id(&planned).await?;
            info!(server_id = id, %flavor_ref, "resizing server");
            api.action(id, json!({ "resize": { "flavorRef": flavor_ref } }))
                .await
                .context("Error resizing server")?;
            api.wait_status(id, &["ACTIVE", "RESIZE"], &["VERIFY_RESIZE"], timeout)
                .await?;
            api.action(id, json!({ "confirmResize": null }))
                .await
                .context("Error confirming the resize")?;
            api.wait_status(id, &["VERIFY_RESIZE"], &["ACTIVE"], timeout)
                .await?;
        }

        if prior.tags != planned.tags {
            update_tags(&api.ecs, &api.tags_path(id), &prior.tags, &planned.tags).await?;
        }

        let server = api
            .server(id)
            .await?
            .ok_or_else(|| anyhow!("server {id} disappeared"))?;
        api.refresh(planned, server).await
    }

    async fn delete<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<()> {
        let api = Api::new(client).await?;
        let id = state.id.as_str();
        let timeout = Timeouts::pick(&state.timeouts, Operation::Delete, DEFAULT_TIMEOUT);

        if state.stop_before_destroy.unwrap_or(false) {
            api.action(id, json!({ "os-stop": {} }))
                .await
                .context("Error stopping server")?;
            api.wait_status(id, &["ACTIVE"], &["SHUTOFF"], timeout)
                .await?;
        }

        api.ecs
            .delete(&api.server_path(id))
            .await
            .context("Error deleting server")?;
        api.wait_status(id, &[], &[], timeout).await?;
        Ok(())
    }

    fn import<'a>(&self, id: String) -> Option<Self::State<'a>> {
        Some(InstanceState {
            id: Value::from(id),
            ..Default::default()
        })
    }
}
