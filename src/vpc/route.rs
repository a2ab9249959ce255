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
use serde::{Deserialize, Serialize};
use serde_json::json;
use tf_provider::{
    map, AttributeConstraint, AttributePath, AttributeType, Block, Description, Diagnostics,
    Schema, Value, ValueString,
};

use crate::client::{check_deleted, CloudClient};
use crate::resource::{CloudResource, CreateResult};
use crate::utils::{attribute, force_new, known_string, string_or_null, unknown_if_null, validate_one_of, ID_ATTRIBUTE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RouteState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    #[serde(rename = "type")]
    pub route_type: ValueString<'a>,
    pub nexthop: ValueString<'a>,
    pub destination: ValueString<'a>,
    pub vpc_id: ValueString<'a>,
    pub tenant_id: ValueString<'a>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Route {
    #[serde(default, skip_serializing)]
    id: String,
    #[serde(rename = "type")]
    route_type: String,
    nexthop: String,
    destination: String,
    vpc_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tenant_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RouteBody {
    route: Route,
}

/// `otc_vpc_route_v2`
#[derive(Debug, Default)]
pub struct VpcRoute;

impl VpcRoute {
    fn apply<'a>(mut state: RouteState<'a>, route: Route) -> RouteState<'a> {
        state.id = Value::from(route.id);
        state.route_type = Value::from(route.route_type);
        state.nexthop = Value::from(route.nexthop);
        state.destination = Value::from(route.destination);
        state.vpc_id = Value::from(route.vpc_id);
        state.tenant_id = string_or_null(route.tenant_id);
        state
    }
}

#[async_trait]
impl CloudResource for VpcRoute {
    const NAME: &'static str = "otc_vpc_route_v2";

    type State<'a> = RouteState<'a>;

    fn schema() -> Schema {
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => ID_ATTRIBUTE.clone(),
                    "type" => attribute(AttributeType::String, AttributeConstraint::Required, "Route type, only `peering` is supported"),
                    "nexthop" => attribute(AttributeType::String, AttributeConstraint::Required, "Next hop (VPC peering id)"),
                    "destination" => attribute(AttributeType::String, AttributeConstraint::Required, "Destination CIDR"),
                    "vpc_id" => attribute(AttributeType::String, AttributeConstraint::Required, "VPC the route belongs to"),
                    "tenant_id" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "Project of the route"),
                },
                description: Description::plain("Route of a VPC peering connection"),
                ..Default::default()
            },
        }
    }

    fn validate(&self, diags: &mut Diagnostics, config: &Self::State<'_>) {
        validate_one_of(diags, "type", &config.route_type, &["peering"]);
    }

    fn plan_create<'a>(&self, _diags: &mut Diagnostics, mut proposed: Self::State<'a>) -> Self::State<'a> {
        proposed.id = Value::Unknown;
        unknown_if_null(&mut proposed.tenant_id);
        proposed
    }

    fn plan_update<'a>(
        &self,
        _diags: &mut Diagnostics,
        prior: &Self::State<'a>,
        proposed: Self::State<'a>,
    ) -> (Self::State<'a>, Vec<AttributePath>) {
        let mut replace = Vec::new();
        force_new(&mut replace, "type", &prior.route_type, &proposed.route_type);
        force_new(&mut replace, "nexthop", &prior.nexthop, &proposed.nexthop);
        force_new(&mut replace, "destination", &prior.destination, &proposed.destination);
        force_new(&mut replace, "vpc_id", &prior.vpc_id, &proposed.vpc_id);
        force_new(&mut replace, "tenant_id", &prior.tenant_id, &proposed.tenant_id);
        (proposed, replace)
    }

    async fn create<'a>(&self, client: &CloudClient, planned: Self::State<'a>) -> CreateResult<Self::State<'a>> {
        let route = Route {
            id: String::new(),
            route_type: planned.route_type.as_str().to_owned(),
            nexthop: planned.nexthop.as_str().to_owned(),
            destination: planned.destination.as_str().to_owned(),
            vpc_id: planned.vpc_id.as_str().to_owned(),
            tenant_id: known_string(&planned.tenant_id),
        };
        let created: RouteBody = client
            .service("vpc")
            .post("/v2.0/vpc/routes", &json!({ "route": route }))
            .await
            .context("Error creating VPC route")?;
        Ok(Self::apply(planned, created.route))
    }

    async fn read<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<Option<Self::State<'a>>> {
        let path = format!("/v2.0/vpc/routes/{}", state.id.as_str());
        let route = check_deleted(client.service("vpc").get::<RouteBody>(&path).await)
            .context("Error reading VPC route")?;
        Ok(route.map(|body| Self::apply(state, body.route)))
    }

    async fn update<'a>(
        &self,
        _client: &CloudClient,
        _prior: Self::State<'a>,
        planned: Self::State<'a>,
    ) -> Result<Self::State<'a>> {
        // every attribute forces a replacement
        Ok(planned)
    }

    async fn delete<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<()> {
        client
            .service("vpc")
            .delete(&format!("/v2.0/vpc/routes/{}", state.id.as_str()))
            .await
            .context("Error deleting VPC route")?;
        Ok(())
    }

    fn import<'a>(&self, id: String) -> Option<Self::State<'a>> {
        Some(RouteState {
            id: Value::from(id),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route() -> RouteState<'static> {
        RouteState {
            id: Value::from("r-1"),
            route_type: Value::from("peering"),
            nexthop: Value::from("peer-1"),
            destination: Value::from("192.168.0.0/16"),
            vpc_id: Value::from("vpc-1"),
            tenant_id: Value::from("p-1"),
        }
    }

    #[test]
    fn every_change_forces_replacement() {
        let mut diags = Diagnostics::default();
        let proposed = RouteState {
            destination: Value::from("10.0.0.0/8"),
            nexthop: Value::from("peer-2"),
            ..route()
        };
        let (_, replace) = VpcRoute.plan_update(&mut diags, &route(), proposed);
        assert_eq!(
            replace,
            [AttributePath::new("nexthop"), AttributePath::new("destination")]
        );
    }

    #[test]
    fn only_peering_routes() {
        let mut diags = Diagnostics::default();
        VpcRoute.validate(
            &mut diags,
            &RouteState {
                route_type: Value::from("local"),
                ..route()
            },
        );
        assert_eq!(diags.errors.len(), 1);
    }

    #[test]
    fn state_uses_type_as_attribute_name() {
        let json = serde_json::to_value(route()).unwrap();
        assert_eq!(json["type"], "peering");
        let body: RouteBody = serde_json::from_str(
            r#"{"route": {"id": "r-2", "type": "peering", "nexthop": "p", "destination": "0.0.0.0/0", "vpc_id": "v"}}"#,
        )
        .unwrap();
        let state = VpcRoute::apply(RouteState::default(), body.route);
        assert_eq!(state.id.as_str(), "r-2");
        assert!(state.tenant_id.is_null());
    }
}
