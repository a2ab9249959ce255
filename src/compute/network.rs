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

use serde::Deserialize;

/// Network interface of a server, as reported by the networking API
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Interface {
    pub port_id: String,
    pub network_id: String,
    pub mac: String,
    pub fixed_ip_v4: Option<String>,
    pub fixed_ip_v6: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Port {
    id: String,
    network_id: String,
    #[serde(default)]
    mac_address: String,
    #[serde(default)]
    fixed_ips: Vec<FixedIp>,
}

#[derive(Debug, Deserialize)]
struct FixedIp {
    ip_address: String,
}

impl From<Port> for Interface {
    fn from(port: Port) -> Self {
        let (v6, v4): (Vec<_>, Vec<_>) = port
            .fixed_ips
            .into_iter()
            .map(|ip| ip.ip_address)
            .partition(|ip| ip.contains(':'));
        Interface {
            port_id: port.id,
            network_id: port.network_id,
            mac: port.mac_address,
            fixed_ip_v4: v4.into_iter().next(),
            fixed_ip_v6: v6.into_iter().next(),
        }
    }
}

/// `network` block as configured
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetworkConfig {
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub port: Option<String>,
    pub fixed_ip_v4: Option<String>,
    pub fixed_ip_v6: Option<String>,
    /// Left unset in the configuration when `None`
    pub access_network: Option<bool>,
}

/// Configured network completed with the interface attached to it
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Network {
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub port: Option<String>,
    pub fixed_ip_v4: Option<String>,
    pub fixed_ip_v6: Option<String>,
    pub mac: Option<String>,
    pub access_network: Option<bool>,
}

impl Network {
    fn new(config: &NetworkConfig, interface: Option<&Interface>) -> Self {
        match interface {
            Some(interface) => Network {
                uuid: Some(interface.network_id.clone()),
                name: config.name.clone(),
                port: Some(interface.port_id.clone()),
                fixed_ip_v4: interface.fixed_ip_v4.clone(),
                fixed_ip_v6: interface.fixed_ip_v6.clone(),
                mac: Some(interface.mac.clone()),
                access_network: config.access_network,
            },
            None => Network {
                uuid: config.uuid.clone(),
                name: config.name.clone(),
                port: config.port.clone(),
                fixed_ip_v4: config.fixed_ip_v4.clone(),
                fixed_ip_v6: config.fixed_ip_v6.clone(),
                mac: None,
                access_network: config.access_network,
            },
        }
    }
}

/// Match every configured network with an interface of the server.
///
/// A block with a port takes the interface of that port. Otherwise it takes
/// the first interface of its network not already taken by a previous block.
/// Without any configured block, every interface is reported.
pub fn aggregate_networks(configured: &[NetworkConfig], interfaces: &[Interface]) -> Vec<Network> {
    if configured.is_empty() {
        return interfaces
            .iter()
            .map(|interface| Network::new(&NetworkConfig::default(), Some(interface)))
            .collect();
    }

    let mut used = vec![false; interfaces.len()];
    let mut take = |matches: &dyn Fn(&Interface) -> bool| {
        let index = interfaces
            .iter()
            .enumerate()
            .position(|(i, interface)| !used[i] && matches(interface))?;
        used[index] = true;
        Some(&interfaces[index])
    };

    configured
        .iter()
        .map(|config| {
            let interface = match (&config.port, &config.uuid) {
                (Some(port), _) => take(&|interface| &interface.port_id == port),
                (None, Some(uuid)) => take(&|interface| &interface.network_id == uuid),
                (None, None) => None,
            };
            Network::new(config, interface)
        })
        .collect()
}

/// Addresses exposed as `access_ip_v4`/`access_ip_v6`
///
/// The first network flagged `access_network` wins, then the first network.
pub fn access_addresses(networks: &[Network]) -> (Option<String>, Option<String>) {
    networks
        .iter()
        .find(|network| network.access_network == Some(true))
        .or_else(|| networks.first())
        .map_or((None, None), |network| {
            (network.fixed_ip_v4.clone(), network.fixed_ip_v6.clone())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interface(port: &str, network: &str, ip: &str) -> Interface {
        Interface {
            port_id: port.to_owned(),
            network_id: network.to_owned(),
            mac: format!("fa:16:3e:00:00:{}", &port[port.len() - 2..]),
            fixed_ip_v4: Some(ip.to_owned()),
            fixed_ip_v6: None,
        }
    }

    fn on_network(uuid: &str) -> NetworkConfig {
        NetworkConfig {
            uuid: Some(uuid.to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn first_unmatched_interface_wins() {
        let interfaces = [
            interface("port-01", "net-a", "10.0.0.1"),
            interface("port-02", "net-a", "10.0.0.2"),
            interface("port-03", "net-b", "10.1.0.1"),
        ];
        let networks = aggregate_networks(
            &[on_network("net-a"), on_network("net-b"), on_network("net-a")],
            &interfaces,
        );
        let ports: Vec<_> = networks.iter().map(|n| n.port.as_deref()).collect();
        assert_eq!(ports, [Some("port-01"), Some("port-03"), Some("port-02")]);
    }

    #[test]
    fn port_match_takes_precedence() {
        let interfaces = [
            interface("port-01", "net-a", "10.0.0.1"),
            interface("port-02", "net-a", "10.0.0.2"),
        ];
        let by_port = NetworkConfig {
            port: Some("port-01".to_owned()),
            ..Default::default()
        };
        let networks = aggregate_networks(&[on_network("net-a"), by_port], &interfaces);
        assert_eq!(networks[0].port.as_deref(), Some("port-02"));
        assert_eq!(networks[1].port.as_deref(), Some("port-01"));
        assert_eq!(networks[1].uuid.as_deref(), Some("net-a"));
    }

    #[test]
    fn missing_interface_keeps_configuration() {
        let config = NetworkConfig {
            uuid: Some("net-z".to_owned()),
            name: Some("z".to_owned()),
            fixed_ip_v4: Some("10.9.9.9".to_owned()),
            ..Default::default()
        };
        let networks = aggregate_networks(&[config], &[interface("port-01", "net-a", "10.0.0.1")]);
        assert_eq!(networks.len(), 1);
        assert_eq!(networks[0].fixed_ip_v4.as_deref(), Some("10.9.9.9"));
        assert_eq!(networks[0].mac, None);
    }

    #[test]
    fn every_interface_is_reported_without_configuration() {
        let interfaces = [
            interface("port-01", "net-a", "10.0.0.1"),
            interface("port-02", "net-b", "10.1.0.1"),
        ];
        let networks = aggregate_networks(&[], &interfaces);
        assert_eq!(networks.len(), 2);
        assert_eq!(networks[1].uuid.as_deref(), Some("net-b"));
    }

    #[test]
    fn access_network_overrides_first_network() {
        let interfaces = [
            interface("port-01", "net-a", "10.0.0.1"),
            interface("port-02", "net-b", "10.1.0.1"),
        ];
        let mut access = on_network("net-b");
        access.access_network = Some(true);
        let networks = aggregate_networks(&[on_network("net-a"), access], &interfaces);
        assert_eq!(access_addresses(&networks).0.as_deref(), Some("10.1.0.1"));

        let networks = aggregate_networks(&[on_network("net-a"), on_network("net-b")], &interfaces);
        assert_eq!(access_addresses(&networks).0.as_deref(), Some("10.0.0.1"));
        assert_eq!(access_addresses(&[]), (None, None));
    }

    #[test]
    fn unset_access_network_stays_unset() {
        let interfaces = [interface("port-01", "net-a", "10.0.0.1")];
        let networks = aggregate_networks(&[on_network("net-a")], &interfaces);
        assert_eq!(networks[0].access_network, None);
        assert_eq!(access_addresses(&networks).0.as_deref(), Some("10.0.0.1"));

        let mut off = on_network("net-a");
        off.access_network = Some(false);
        let networks = aggregate_networks(&[off], &interfaces);
        assert_eq!(networks[0].access_network, Some(false));
    }

    #[test]
    fn ports_split_address_families() {
        let port: Port = serde_json::from_str(
            r#"{"id": "p", "network_id": "n", "mac_address": "fa:16:3e:aa:bb:cc",
                "fixed_ips": [{"subnet_id": "s6", "ip_address": "2001:db8::5"},
                              {"subnet_id": "s4", "ip_address": "192.168.0.5"}]}"#,
        )
        .unwrap();
        let interface = Interface::from(port);
        assert_eq!(interface.fixed_ip_v4.as_deref(), Some("192.168.0.5"));
        assert_eq!(interface.fixed_ip_v6.as_deref(), Some("2001:db8::5"));
    }
}
