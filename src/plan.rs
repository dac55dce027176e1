//! JSON node plans
//!
//! A plan lists the nodes a driver should provision. Each node picks a
//! preset role set and optionally a network namespace to run in:
//!
//! ```json
//! {
//!   "overlay_base": "/tmp",
//!   "nodes": [
//!     { "name": "j1", "preset": "linux_router", "namespace": "j1" },
//!     { "name": "s11", "preset": "lldp_switch", "namespace": "s11",
//!       "interfaces": ["s11-eth2"] },
//!     { "name": "root", "preset": "nat",
//!       "nat_rules": [ { "iface": "eth0", "proto": "udp", "dport": 30001,
//!                        "todest": "10.200.1.201", "toport": 161 } ] }
//!   ]
//! }
//! ```

use crate::errors::{NodeError, Result};
use crate::exec::{Executor, HostExecutor, NamespaceExecutor};
use crate::monitoring::{DiscoveryAgent, MonitoringOptions, MonitoringRole};
use crate::nat::{NatRole, NatRule};
use crate::node::Node;
use crate::overlay::{validate_node_name, PrivateOverlay, DEFAULT_BASE};
use crate::role::RoleKind;
use crate::router::ForwardingRole;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Role sets available to plan entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Forwarding only
    BaseRouter,
    /// Forwarding, SNMP agent and LLDP on every interface
    LinuxRouter,
    /// SNMP agent only
    SnmpSwitch,
    /// SNMP agent and LLDP, optionally restricted to `interfaces`
    LldpSwitch,
    /// Forwarding and NAT rules
    Nat,
}

impl Preset {
    pub fn roles(self) -> &'static [RoleKind] {
        match self {
            Preset::BaseRouter => &[RoleKind::Forwarding],
            Preset::LinuxRouter => &[RoleKind::Forwarding, RoleKind::Monitoring],
            Preset::SnmpSwitch | Preset::LldpSwitch => &[RoleKind::Monitoring],
            Preset::Nat => &[RoleKind::Forwarding, RoleKind::Nat],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePlan {
    pub name: String,
    pub preset: Preset,
    /// Namespace to execute in; host when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub monitoring: MonitoringOptions,
    /// LLDP interfaces for `lldp_switch`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interfaces: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nat_rules: Vec<NatRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyPlan {
    #[serde(default = "default_overlay_base")]
    pub overlay_base: PathBuf,
    pub nodes: Vec<NodePlan>,
}

fn default_overlay_base() -> PathBuf {
    PathBuf::from(DEFAULT_BASE)
}

impl TopologyPlan {
    pub fn from_json(json: &str) -> Result<Self> {
        let plan: TopologyPlan = serde_json::from_str(json)?;
        plan.validate()?;
        Ok(plan)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub fn node(&self, name: &str) -> Option<&NodePlan> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Structural checks that do not need role construction
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(NodeError::Configuration("plan has no nodes".to_string()));
        }
        let mut names = HashSet::new();
        for node in &self.nodes {
            validate_node_name(&node.name)?;
            if !names.insert(node.name.as_str()) {
                return Err(NodeError::Configuration(format!(
                    "duplicate node name: {}",
                    node.name
                )));
            }
            if node.preset != Preset::Nat && !node.nat_rules.is_empty() {
                return Err(NodeError::Configuration(format!(
                    "node {} has nat_rules but preset {:?}",
                    node.name, node.preset
                )));
            }
            if node.preset != Preset::LldpSwitch && node.interfaces.is_some() {
                return Err(NodeError::Configuration(format!(
                    "node {}: interfaces only apply to lldp_switch",
                    node.name
                )));
            }
        }
        Ok(())
    }

    /// Build every node with the default executors
    pub fn build_nodes(&self) -> Result<Vec<Node>> {
        self.nodes
            .iter()
            .map(|n| {
                let executor = n.default_executor();
                n.build(&self.overlay_base, executor)
            })
            .collect()
    }
}

impl NodePlan {
    /// `ip netns exec` executor when a namespace is set, host otherwise
    pub fn default_executor(&self) -> Arc<dyn Executor> {
        match &self.namespace {
            Some(ns) => Arc::new(NamespaceExecutor::new(ns.clone())),
            None => Arc::new(HostExecutor::new()),
        }
    }

    /// Monitoring role for monitored presets
    pub fn monitoring_role(&self) -> Result<Option<MonitoringRole>> {
        let role = match self.preset {
            Preset::LinuxRouter => MonitoringRole::router(&self.name, &self.monitoring)?,
            Preset::SnmpSwitch => MonitoringRole::switch(&self.name, &self.monitoring)?,
            Preset::LldpSwitch => {
                let discovery = match &self.interfaces {
                    Some(ifaces) => DiscoveryAgent::on_interfaces(ifaces.iter().cloned())?,
                    None => DiscoveryAgent::all_interfaces(),
                };
                MonitoringRole::switch(&self.name, &self.monitoring)?.with_discovery(discovery)
            }
            Preset::BaseRouter | Preset::Nat => return Ok(None),
        };
        Ok(Some(role))
    }

    pub fn build(&self, overlay_base: &Path, executor: Arc<dyn Executor>) -> Result<Node> {
        let overlay = PrivateOverlay::with_base(overlay_base, &self.name)?;
        let mut node = Node::with_overlay(self.name.clone(), overlay, executor);

        for kind in self.preset.roles() {
            match kind {
                RoleKind::Forwarding => node.attach(Box::new(ForwardingRole::new()))?,
                RoleKind::Monitoring => {
                    if let Some(role) = self.monitoring_role()? {
                        node.attach(Box::new(role))?;
                    }
                }
                RoleKind::Nat => node.attach(Box::new(NatRole::new(&self.nat_rules)?))?,
            }
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"{
        "nodes": [
            { "name": "j1", "preset": "linux_router", "namespace": "j1" },
            { "name": "s11", "preset": "lldp_switch", "interfaces": ["s11-eth2"] },
            { "name": "root", "preset": "nat",
              "nat_rules": [ { "iface": "eth0", "proto": "udp", "dport": 30001,
                               "toport": 161, "todest": "10.200.1.201" } ] }
        ]
    }"#;

    #[test]
    fn test_parse_plan() {
        let plan = TopologyPlan::from_json(PLAN).unwrap();
        assert_eq!(plan.overlay_base, PathBuf::from("/tmp"));
        assert_eq!(plan.nodes.len(), 3);
        assert_eq!(plan.node("j1").unwrap().namespace.as_deref(), Some("j1"));
        assert_eq!(plan.node("root").unwrap().nat_rules.len(), 1);
    }

    #[test]
    fn test_build_nodes_roles() {
        let plan = TopologyPlan::from_json(PLAN).unwrap();
        let nodes = plan.build_nodes().unwrap();
        assert_eq!(
            nodes[0].role_kinds(),
            vec![RoleKind::Forwarding, RoleKind::Monitoring]
        );
        assert_eq!(nodes[1].role_kinds(), vec![RoleKind::Monitoring]);
        assert_eq!(nodes[2].role_kinds(), vec![RoleKind::Forwarding, RoleKind::Nat]);
        assert_eq!(nodes[0].executor().sandbox(), "netns:j1");
        assert_eq!(nodes[2].executor().sandbox(), "host");
    }

    #[test]
    fn test_lldp_interfaces_reach_discovery() {
        let plan = TopologyPlan::from_json(PLAN).unwrap();
        let role = plan.node("s11").unwrap().monitoring_role().unwrap().unwrap();
        let discovery = role.discovery().unwrap();
        assert_eq!(discovery.interfaces().unwrap(), ["s11-eth2".to_string()]);
        assert!(role.config().sys_location.contains("switch s11"));
    }

    #[test]
    fn test_rejects_bad_plans() {
        let dup = r#"{"nodes": [{"name": "a", "preset": "base_router"},
                                {"name": "a", "preset": "nat"}]}"#;
        assert!(matches!(
            TopologyPlan::from_json(dup),
            Err(NodeError::Configuration(_))
        ));

        let misplaced = r#"{"nodes": [{"name": "a", "preset": "snmp_switch",
                                       "nat_rules": [{"toport": 53}]}]}"#;
        assert!(TopologyPlan::from_json(misplaced).is_err());

        assert!(matches!(
            TopologyPlan::from_json(r#"{"nodes": [{"name": "a", "preset": "hub"}]}"#),
            Err(NodeError::Json(_))
        ));
        assert!(TopologyPlan::from_json(r#"{"nodes": []}"#).is_err());
    }

    #[test]
    fn test_invalid_nat_rule_fails_build() {
        let plan = TopologyPlan::from_json(
            r#"{"nodes": [{"name": "gw", "preset": "nat", "nat_rules": [{"iface": "eth0"}]}]}"#,
        )
        .unwrap();
        assert!(matches!(
            plan.build_nodes(),
            Err(NodeError::RuleTranslation(_))
        ));
    }
}
