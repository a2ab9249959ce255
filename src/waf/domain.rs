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
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tf_provider::{
    map, value::ValueBool, Attribute, AttributeConstraint, AttributePath, AttributeType, Block,
    Description, Diagnostics, Schema, Value, ValueList, ValueNumber, ValueString,
};

use crate::client::{check_deleted, CloudClient};
use crate::resource::{CloudResource, CreateResult};
use crate::utils::{
    attribute, force_new, known_string, known_strings, string_or_null, unknown_if_null,
    validate_one_of, validate_range, ID_ATTRIBUTE,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DomainState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub hostname: ValueString<'a>,
    pub certificate_id: ValueString<'a>,
    pub server: ValueList<Value<ServerState<'a>>>,
    pub proxy: ValueBool,
    pub sip_header_name: ValueString<'a>,
    pub sip_header_list: ValueList<ValueString<'a>>,
    pub policy_id: ValueString<'a>,
    pub access_code: ValueString<'a>,
    pub cname: ValueString<'a>,
    pub txt_code: ValueString<'a>,
    pub sub_domain: ValueString<'a>,
    pub protect_status: ValueNumber,
    pub access_status: ValueNumber,
    pub protocol: ValueString<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerState<'a> {
    #[serde(borrow = "'a")]
    pub client_protocol: ValueString<'a>,
    pub server_protocol: ValueString<'a>,
    pub address: ValueString<'a>,
    pub port: ValueNumber,
}

/// Backend server as exchanged with the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Server {
    client_protocol: String,
    server_protocol: String,
    address: String,
    port: i64,
}

impl From<&ServerState<'_>> for Server {
    fn from(server: &ServerState) -> Self {
        Server {
            client_protocol: server.client_protocol.as_str().to_owned(),
            server_protocol: server.server_protocol.as_str().to_owned(),
            address: server.address.as_str().to_owned(),
            port: server.port.unwrap_or(0),
        }
    }
}

impl From<Server> for ServerState<'_> {
    fn from(server: Server) -> Self {
        ServerState {
            client_protocol: Value::from(server.client_protocol),
            server_protocol: Value::from(server.server_protocol),
            address: Value::from(server.address),
            port: Value::Value(server.port),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Domain {
    id: String,
    hostname: String,
    #[serde(default)]
    certificate_id: Option<String>,
    #[serde(default)]
    server: Vec<Server>,
    #[serde(default)]
    proxy: bool,
    #[serde(default)]
    sip_header_name: Option<String>,
    #[serde(default)]
    sip_header_list: Vec<String>,
    #[serde(default)]
    policy_id: Option<String>,
    #[serde(default)]
    access_code: Option<String>,
    #[serde(default)]
    cname: Option<String>,
    #[serde(default)]
    txt_code: Option<String>,
    #[serde(default)]
    sub_domain: Option<String>,
    #[serde(default)]
    protect_status: i64,
    #[serde(default)]
    access_status: i64,
    #[serde(default)]
    protocol: Option<String>,
}

lazy_static! {
    static ref SERVER_ATTRIBUTE: Attribute = attribute(
        AttributeType::AttributeList(map! {
            "client_protocol" => attribute(AttributeType::String, AttributeConstraint::Required, "Protocol between the client and WAF: `HTTP` or `HTTPS`"),
            "server_protocol" => attribute(AttributeType::String, AttributeConstraint::Required, "Protocol between WAF and the server: `HTTP` or `HTTPS`"),
            "address" => attribute(AttributeType::String, AttributeConstraint::Required, "Address of the origin server"),
            "port" => attribute(AttributeType::Number, AttributeConstraint::Required, "Port of the origin server"),
        }),
        AttributeConstraint::Required,
        "Origin servers of the domain",
    );
}

const PROTOCOLS: &[&str] = &["HTTP", "HTTPS"];

/// `otc_waf_domain_v1`
#[derive(Debug, Default)]
pub struct WafDomain;

fn domain_path(project_id: &str, id: &str) -> String {
    format!("/v1/{project_id}/waf/instance/{id}")
}

fn servers(state: &DomainState) -> Vec<Server> {
    state
        .server
        .iter()
        .flatten()
        .filter_map(Value::as_ref_option)
        .map(Server::from)
        .collect()
}

/// Attributes shared by the creation and the update
fn mutable_body(state: &DomainState) -> serde_json::Value {
    let mut body = json!({
        "server": servers(state),
        "proxy": state.proxy.unwrap_or(false),
    });
    if let Some(certificate_id) = known_string(&state.certificate_id) {
        body["certificate_id"] = json!(certificate_id);
    }
    if let Some(sip_header_name) = known_string(&state.sip_header_name) {
        body["sip_header_name"] = json!(sip_header_name);
        body["sip_header_list"] = json!(known_strings(state.sip_header_list.iter().flatten()));
    }
    body
}

impl WafDomain {
    fn apply<'a>(mut state: DomainState<'a>, domain: Domain) -> DomainState<'a> {
        state.id = Value::from(domain.id);
        state.hostname = Value::from(domain.hostname);
        state.certificate_id = string_or_null(domain.certificate_id);
        state.server = Value::Value(
            domain
                .server
                .into_iter()
                .map(|server| Value::Value(server.into()))
                .collect(),
        );
        state.proxy = Value::Value(domain.proxy);
        state.sip_header_name = string_or_null(domain.sip_header_name);
        state.sip_header_list = if domain.sip_header_list.is_empty() && state.sip_header_list.is_null() {
            Value::Null
        } else {
            Value::Value(domain.sip_header_list.into_iter().map(Value::from).collect())
        };
        state.policy_id = string_or_null(domain.policy_id);
        state.access_code = string_or_null(domain.access_code);
        state.cname = string_or_null(domain.cname);
        state.txt_code = string_or_null(domain.txt_code);
        state.sub_domain = string_or_null(domain.sub_domain);
        state.protect_status = Value::Value(domain.protect_status);
        state.access_status = Value::Value(domain.access_status);
        state.protocol = string_or_null(domain.protocol);
        state
    }
}

#[async_trait]
impl CloudResource for WafDomain {
    const NAME: &'static str = "otc_waf_domain_v1";

    type State<'a> = DomainState<'a>;

    fn schema() -> Schema {
        let computed = |attr_type, description: &str| {
            attribute(attr_type, AttributeConstraint::Computed, description)
        };
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => ID_ATTRIBUTE.clone(),
                    "hostname" => attribute(AttributeType::String, AttributeConstraint::Required, "Protected domain name"),
                    "certificate_id" => attribute(AttributeType::String, AttributeConstraint::Optional, "Certificate used for HTTPS"),
                    "server" => SERVER_ATTRIBUTE.clone(),
                    "proxy" => attribute(AttributeType::Bool, AttributeConstraint::OptionalComputed, "Whether a proxy sits in front of WAF"),
                    "sip_header_name" => attribute(AttributeType::String, AttributeConstraint::Optional, "Type of the source IP header"),
                    "sip_header_list" => attribute(AttributeType::List(AttributeType::String.into()), AttributeConstraint::Optional, "Headers carrying the source IP"),
                    "policy_id" => attribute(AttributeType::String, AttributeConstraint::OptionalComputed, "Policy applied to the domain"),
                    "access_code" => computed(AttributeType::String, "CNAME prefix"),
                    "cname" => computed(AttributeType::String, "CNAME of the domain"),
                    "txt_code" => computed(AttributeType::String, "TXT record"),
                    "sub_domain" => computed(AttributeType::String, "Sub-domain to verify"),
                    "protect_status" => computed(AttributeType::Number, "Protection status"),
                    "access_status" => computed(AttributeType::Number, "Whether the domain is accessed through WAF"),
                    "protocol" => computed(AttributeType::String, "Protocols of the domain"),
                },
                description: Description::plain("Domain protected by the web application firewall"),
                ..Default::default()
            },
        }
    }

    fn validate(&self, diags: &mut Diagnostics, config: &Self::State<'_>) {
        for server in config.server.iter().flatten().filter_map(Value::as_ref_option) {
            validate_one_of(diags, "client_protocol", &server.client_protocol, PROTOCOLS);
            validate_one_of(diags, "server_protocol", &server.server_protocol, PROTOCOLS);
            validate_range(diags, "port", &server.port, 0, 65535);
        }
        let https = config
            .server
            .iter()
            .flatten()
            .filter_map(Value::as_ref_option)
            .any(|server| server.client_protocol.as_deref_option() == Some("HTTPS"));
        if https && config.certificate_id.is_null() {
            diags.error_short(
                "`certificate_id` is required when a server uses HTTPS",
                AttributePath::new("certificate_id"),
            );
        }
    }

    fn plan_create<'a>(&self, _diags: &mut Diagnostics, mut proposed: Self::State<'a>) -> Self::State<'a> {
        proposed.id = Value::Unknown;
        unknown_if_null(&mut proposed.proxy);
        unknown_if_null(&mut proposed.policy_id);
        proposed.access_code = Value::Unknown;
        proposed.cname = Value::Unknown;
        proposed.txt_code = Value::Unknown;
        proposed.sub_domain = Value::Unknown;
        proposed.protect_status = Value::Unknown;
        proposed.access_status = Value::Unknown;
        proposed.protocol = Value::Unknown;
        proposed
    }

    fn plan_update<'a>(
        &self,
        _diags: &mut Diagnostics,
        prior: &Self::State<'a>,
        mut proposed: Self::State<'a>,
    ) -> (Self::State<'a>, Vec<AttributePath>) {
        let mut replace = Vec::new();
        force_new(&mut replace, "hostname", &prior.hostname, &proposed.hostname);
        force_new(&mut replace, "policy_id", &prior.policy_id, &proposed.policy_id);
        if prior.server != proposed.server {
            proposed.protocol = Value::Unknown;
        }
        (proposed, replace)
    }

    async fn create<'a>(&self, client: &CloudClient, planned: Self::State<'a>) -> CreateResult<Self::State<'a>> {
        let waf = client.service("waf");
        let project_id = waf.project_id().await?;
        let mut body = mutable_body(&planned);
        body["hostname"] = json!(planned.hostname.as_str());
        if let Some(policy_id) = known_string(&planned.policy_id) {
            body["policy_id"] = json!(policy_id);
        }
        let domain: Domain = waf
            .post(&format!("/v1/{project_id}/waf/instance"), &body)
            .await
            .context("Error creating WAF domain")?;
        Ok(Self::apply(planned, domain))
    }

    async fn read<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<Option<Self::State<'a>>> {
        let waf = client.service("waf");
        let project_id = waf.project_id().await?;
        let domain = check_deleted(
            waf.get::<Domain>(&domain_path(&project_id, state.id.as_str()))
                .await,
        )
        .context("Error reading WAF domain")?;
        Ok(domain.map(|domain| Self::apply(state, domain)))
    }

    async fn update<'a>(
        &self,
        client: &CloudClient,
        _prior: Self::State<'a>,
        planned: Self::State<'a>,
    ) -> Result<Self::State<'a>> {
        let waf = client.service("waf");
        let project_id = waf.project_id().await?;
        let domain: Domain = waf
            .put(
                &domain_path(&project_id, planned.id.as_str()),
                &mutable_body(&planned),
            )
            .await
            .context("Error updating WAF domain")?;
        Ok(Self::apply(planned, domain))
    }

    async fn delete<'a>(&self, client: &CloudClient, state: Self::State<'a>) -> Result<()> {
        let waf = client.service("waf");
        let project_id = waf.project_id().await?;
        waf.delete(&domain_path(&project_id, state.id.as_str()))
            .await
            .context("Error deleting WAF domain")?;
        Ok(())
    }

    fn import<'a>(&self, id: String) -> Option<Self::State<'a>> {
        Some(DomainState {
            id: Value::from(id),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(client_protocol: &'static str, port: i64) -> Value<ServerState<'static>> {
        Value::Value(ServerState {
            client_protocol: Value::from(client_protocol),
            server_protocol: Value::from("HTTP"),
            address: Value::from("192.168.1.10"),
            port: Value::Value(port),
        })
    }

    fn domain() -> DomainState<'static> {
        DomainState {
            id: Value::from("d-1"),
            hostname: Value::from("www.example.com"),
            server: Value::Value(vec![server("HTTP", 80)]),
            proxy: Value::Value(false),
            ..Default::default()
        }
    }

    #[test]
    fn https_requires_certificate() {
        let mut diags = Diagnostics::default();
        let config = DomainState {
            server: Value::Value(vec![server("HTTPS", 443)]),
            ..domain()
        };
        WafDomain.validate(&mut diags, &config);
        assert_eq!(diags.errors.len(), 1);

        let mut diags = Diagnostics::default();
        let config = DomainState {
            certificate_id: Value::from("cert-1"),
            ..config
        };
        WafDomain.validate(&mut diags, &config);
        assert!(diags.errors.is_empty());
    }

    #[test]
    fn invalid_server_is_rejected() {
        let mut diags = Diagnostics::default();
        let config = DomainState {
            server: Value::Value(vec![server("FTP", 70000)]),
            ..domain()
        };
        WafDomain.validate(&mut diags, &config);
        assert_eq!(diags.errors.len(), 2);
    }

    #[test]
    fn servers_update_in_place() {
        let mut diags = Diagnostics::default();
        let proposed = DomainState {
            server: Value::Value(vec![server("HTTP", 8080)]),
            ..domain()
        };
        let (state, replace) = WafDomain.plan_update(&mut diags, &domain(), proposed);
        assert!(replace.is_empty());
        assert!(state.protocol.is_unknown());

        let proposed = DomainState {
            hostname: Value::from("api.example.com"),
            ..domain()
        };
        let (_, replace) = WafDomain.plan_update(&mut diags, &domain(), proposed);
        assert_eq!(replace, [AttributePath::new("hostname")]);
    }

    #[test]
    fn body_only_carries_sip_headers_with_a_name() {
        let body = mutable_body(&DomainState {
            sip_header_list: Value::Value(vec![Value::from("X-Forwarded-For")]),
            ..domain()
        });
        assert!(body.get("sip_header_list").is_none());
        assert_eq!(body["server"][0]["port"], 80);

        let body = mutable_body(&DomainState {
            sip_header_name: Value::from("default"),
            sip_header_list: Value::Value(vec![Value::from("X-Forwarded-For")]),
            ..domain()
        });
        assert_eq!(body["sip_header_list"], json!(["X-Forwarded-For"]));
    }

    #[test]
    fn response_is_flattened() {
        let domain: Domain = serde_json::from_value(json!({
            "id": "d-2",
            "hostname": "www.example.com",
            "server": [{"client_protocol": "HTTP", "server_protocol": "HTTP", "address": "10.0.0.1", "port": 80}],
            "proxy": true,
            "access_code": "1b18879b9d064f8bbcbf8abce7294cac",
            "cname": "1b18879b9d064f8bbcbf8abce7294cac.waf.example.com",
            "protect_status": 1,
            "access_status": 0,
            "protocol": "HTTP"
        }))
        .unwrap();
        let state = WafDomain::apply(DomainState::default(), domain);
        assert_eq!(state.id.as_str(), "d-2");
        assert_eq!(state.proxy, Value::Value(true));
        assert!(state.sip_header_list.is_null());
        assert!(state.certificate_id.is_null());
        assert_eq!(state.server.as_ref_option().map(Vec::len), Some(1));
    }
}
