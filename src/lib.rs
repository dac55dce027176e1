//! Emulated network elements
//!
//! Nodes (routers, switches, NAT gateways) are composed from roles:
//!
//! - [`ForwardingRole`] toggles IPv4 forwarding
//! - [`MonitoringRole`] renders an snmpd configuration and launches snmpd
//!   and, optionally, lldpd with a matching AgentX transport
//! - [`NatRole`] compiles abstract NAT rules into iptables commands
//!
//! Every node runs through configure → start → stop → terminate. All effects
//! are commands sent through the node's [`Executor`], so the same roles run
//! on the host, inside a network namespace, or against a
//! [`testing::RecordingExecutor`].

pub mod errors;
pub mod exec;
pub mod monitoring;
pub mod nat;
pub mod node;
pub mod overlay;
pub mod plan;
pub mod role;
pub mod router;
pub mod testing;

pub use errors::{NodeError, Result};
pub use exec::{ExecOutcome, Executor, HostExecutor, NamespaceExecutor};
pub use monitoring::{
    AgentTransport, DeviceClass, DiscoveryAgent, MonitoringConfig, MonitoringOptions,
    MonitoringRole,
};
pub use nat::{compile, NatRole, NatRule, NatTranslator, Selector};
pub use node::{HookReport, LifecycleState, Node};
pub use overlay::PrivateOverlay;
pub use plan::{NodePlan, Preset, TopologyPlan};
pub use role::{Role, RoleContext, RoleKind};
pub use router::ForwardingRole;
