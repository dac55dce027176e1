//! SNMP agent configuration and LLDP discovery launch
//!
//! The monitoring role renders an `snmpd.conf` into the node's private tree
//! before every start, then launches `snmpd` and optionally `lldpd` bound to
//! the same AgentX transport. Daemons are started in the background and
//! never checked for readiness.

use crate::errors::{NodeError, Result};
use crate::exec::{is_plain_token, launch_daemon, shell_quote};
use crate::role::{Role, RoleContext, RoleKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use tracing::{info, warn};

/// AgentX master socket used when no port override is given
pub const DEFAULT_AGENTX_SOCKET: &str = "/var/agentx/master";

/// OID prefixes exposed through the `systemonly` view
pub const DEFAULT_ACCESS_VIEWS: [&str; 2] = [".1.3.6.1.2.1.1", ".1.0.8802.1.1.2"];

/// Name of the rendered file under the overlay root
pub const CONFIG_FILE_NAME: &str = "snmpd.conf";

const COMMUNITY_DIRECTIVES: [&str; 2] = [
    "rocommunity public  default    -V systemonly",
    "rocommunity6 public  default   -V systemonly",
];

const BOILERPLATE_DIRECTIVES: [&str; 15] = [
    "sysServices    72",
    "proc  mountd",
    "proc  ntalkd    4",
    "proc  sendmail 10 1",
    "disk       /     10000",
    "disk       /var  5%",
    "includeAllDisks  10%",
    "load   12 10 5",
    "trapsink     localhost public",
    "iquerySecName   internalUser",
    "rouser          internalUser",
    "defaultMonitors          yes",
    "linkUpDownNotifications  yes",
    "extend    test1   /bin/echo  Hello, world!",
    "extend-sh test2   echo Hello, world! ; echo Hi there ; exit 35",
];

const TRANSPORT_DIRECTIVE: &str = "master     agentx";

/// Kind of device being monitored; drives the defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Router,
    Switch,
}

impl DeviceClass {
    fn default_agent_address(self) -> &'static str {
        match self {
            DeviceClass::Router => "udp:161,udp6:[::1]:161",
            DeviceClass::Switch => "udp:161",
        }
    }

    fn default_location(self, node: &str) -> String {
        match self {
            DeviceClass::Router => format!("Sitting on the Dock of the Bay at {}", node),
            DeviceClass::Switch => format!("Sitting on the Dock of the Bay at switch {}", node),
        }
    }
}

/// AgentX endpoint shared by snmpd and lldpd
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentTransport {
    /// The local master socket at [`DEFAULT_AGENTX_SOCKET`]
    #[default]
    LocalSocket,
    /// `tcp:127.0.0.1:<port>`
    Tcp(u16),
}

impl AgentTransport {
    /// Parse the `agentx_socket` option: the default socket path or a port
    pub fn from_option(value: &str) -> Result<Self> {
        let value = value.trim();
        if value == DEFAULT_AGENTX_SOCKET {
            return Ok(AgentTransport::LocalSocket);
        }
        match value.parse::<u16>() {
            Ok(0) => Err(NodeError::Configuration(
                "AgentX port must be non-zero".to_string(),
            )),
            Ok(port) => Ok(AgentTransport::Tcp(port)),
            Err(_) => Err(NodeError::Configuration(format!(
                "agentx_socket must be {} or a TCP port, got '{}'",
                DEFAULT_AGENTX_SOCKET, value
            ))),
        }
    }

    /// TCP endpoint, `None` for the local socket
    pub fn endpoint(&self) -> Option<String> {
        match self {
            AgentTransport::LocalSocket => None,
            AgentTransport::Tcp(port) => Some(format!("tcp:127.0.0.1:{}", port)),
        }
    }
}

/// Caller overrides; every unset field keeps its default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringOptions {
    pub agent_address: Option<String>,
    pub access_views: Option<Vec<String>>,
    pub sys_location: Option<String>,
    pub sys_contact: Option<String>,
    pub sys_name: Option<String>,
    pub agentx_socket: Option<String>,
}

/// Fully resolved agent configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringConfig {
    pub agent_address: String,
    pub access_views: Vec<String>,
    pub sys_location: String,
    pub sys_contact: String,
    pub sys_name: String,
    pub transport: AgentTransport,
}

fn single_line(field: &str, value: &str) -> Result<()> {
    if value.contains(['\n', '\r']) {
        return Err(NodeError::Configuration(format!(
            "{} must be a single line",
            field
        )));
    }
    Ok(())
}

impl MonitoringConfig {
    /// Defaults derived from the node name
    pub fn for_node(node: &str, class: DeviceClass) -> Self {
        Self {
            agent_address: class.default_agent_address().to_string(),
            access_views: DEFAULT_ACCESS_VIEWS.iter().map(|v| v.to_string()).collect(),
            sys_location: class.default_location(node),
            sys_contact: format!("{} <{}@example.org>", node, node),
            sys_name: node.to_string(),
            transport: AgentTransport::LocalSocket,
        }
    }

    /// Defaults with caller overrides applied and validated
    pub fn with_options(
        node: &str,
        class: DeviceClass,
        options: &MonitoringOptions,
    ) -> Result<Self> {
        let mut config = Self::for_node(node, class);
        if let Some(address) = &options.agent_address {
            config.agent_address = address.clone();
        }
        if let Some(views) = &options.access_views {
            config.access_views = views.clone();
        }
        if let Some(location) = &options.sys_location {
            config.sys_location = location.clone();
        }
        if let Some(contact) = &options.sys_contact {
            config.sys_contact = contact.clone();
        }
        if let Some(name) = &options.sys_name {
            config.sys_name = name.clone();
        }
        if let Some(socket) = &options.agentx_socket {
            config.transport = AgentTransport::from_option(socket)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent_address.trim().is_empty() {
            return Err(NodeError::Configuration(
                "agent_address must not be empty".to_string(),
            ));
        }
        if self.access_views.is_empty() {
            return Err(NodeError::Configuration(
                "at least one access view is required".to_string(),
            ));
        }
        for view in &self.access_views {
            if view.is_empty() || view.chars().any(char::is_whitespace) {
                return Err(NodeError::Configuration(format!(
                    "invalid access view '{}'",
                    view
                )));
            }
        }
        single_line("agent_address", &self.agent_address)?;
        single_line("sys_location", &self.sys_location)?;
        single_line("sys_contact", &self.sys_contact)?;
        single_line("sys_name", &self.sys_name)?;
        if self.transport == AgentTransport::Tcp(0) {
            return Err(NodeError::Configuration(
                "AgentX port must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the snmpd directive document
    pub fn render(&self) -> String {
        let mut doc = String::new();
        let _ = writeln!(doc, "agentAddress {}", self.agent_address);
        for view in &self.access_views {
            let _ = writeln!(doc, "view   systemonly  included   {}", view);
        }
        for line in COMMUNITY_DIRECTIVES {
            let _ = writeln!(doc, "{}", line);
        }
        let _ = writeln!(doc, "sysLocation    {}", self.sys_location);
        let _ = writeln!(doc, "sysContact     {}", self.sys_contact);
        let _ = writeln!(doc, "sysName STRING {}", self.sys_name);
        for line in BOILERPLATE_DIRECTIVES {
            let _ = writeln!(doc, "{}", line);
        }
        let _ = writeln!(doc, "{}", TRANSPORT_DIRECTIVE);
        doc
    }
}

/// snmpd command line for a rendered configuration file
pub fn agent_command(config_path: &Path, transport: AgentTransport) -> String {
    let mut cmd = format!(
        "snmpd -C -c {}",
        shell_quote(&config_path.to_string_lossy())
    );
    if let Some(endpoint) = transport.endpoint() {
        cmd.push_str(" -x ");
        cmd.push_str(&endpoint);
    }
    cmd
}

/// LLDP discovery companion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryAgent {
    interfaces: Option<Vec<String>>,
}

impl DiscoveryAgent {
    /// Advertise on every interface
    pub fn all_interfaces() -> Self {
        Self { interfaces: None }
    }

    /// Advertise only on the given interfaces
    pub fn on_interfaces<I, S>(interfaces: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let interfaces: Vec<String> = interfaces.into_iter().map(Into::into).collect();
        if interfaces.is_empty() {
            return Err(NodeError::Configuration(
                "discovery interface list is empty".to_string(),
            ));
        }
        for iface in &interfaces {
            if !is_plain_token(iface) {
                return Err(NodeError::Configuration(format!(
                    "invalid discovery interface '{}'",
                    iface
                )));
            }
        }
        Ok(Self {
            interfaces: Some(interfaces),
        })
    }

    pub fn interfaces(&self) -> Option<&[String]> {
        self.interfaces.as_deref()
    }

    /// lldpd command line with AgentX support on `transport`
    pub fn command(&self, transport: AgentTransport) -> String {
        let mut cmd = String::from("lldpd -x");
        if let Some(endpoint) = transport.endpoint() {
            cmd.push_str(" -X ");
            cmd.push_str(&endpoint);
        }
        if let Some(interfaces) = &self.interfaces {
            cmd.push_str(" -I ");
            cmd.push_str(&interfaces.join(","));
        }
        cmd
    }
}

/// SNMP agent plus optional LLDP discovery
#[derive(Debug, Clone)]
pub struct MonitoringRole {
    config: MonitoringConfig,
    discovery: Option<DiscoveryAgent>,
}

impl MonitoringRole {
    pub fn new(config: MonitoringConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            discovery: None,
        })
    }

    pub fn with_discovery(mut self, discovery: DiscoveryAgent) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Router monitoring: snmpd plus lldpd on every interface
    pub fn router(node: &str, options: &MonitoringOptions) -> Result<Self> {
        let config = MonitoringConfig::with_options(node, DeviceClass::Router, options)?;
        Ok(Self::new(config)?.with_discovery(DiscoveryAgent::all_interfaces()))
    }

    /// Switch monitoring: snmpd only
    pub fn switch(node: &str, options: &MonitoringOptions) -> Result<Self> {
        Self::new(MonitoringConfig::with_options(node, DeviceClass::Switch, options)?)
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    pub fn discovery(&self) -> Option<&DiscoveryAgent> {
        self.discovery.as_ref()
    }
}

#[async_trait]
impl Role for MonitoringRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Monitoring
    }

    async fn on_start(&self, ctx: &RoleContext<'_>) -> Result<()> {
        let path = ctx.overlay.file(CONFIG_FILE_NAME);
        // Truncating write: a restart must not accumulate directives
        tokio::fs::write(&path, self.config.render())
            .await
            .map_err(|e| {
                NodeError::Resource(format!("cannot write {}: {}", path.display(), e))
            })?;

        // lldpd is launched even when snmpd failed to spawn
        let command = agent_command(&path, self.config.transport);
        let agent = launch_daemon(ctx.executor, &command).await;
        match &agent {
            Ok(()) => info!("Started SNMP agent on {}", ctx.node),
            Err(e) => warn!("{}: SNMP agent not started: {}", ctx.node, e),
        }

        if let Some(discovery) = &self.discovery {
            launch_daemon(ctx.executor, &discovery.command(self.config.transport)).await?;
            info!("Started LLDP agent on {}", ctx.node);
        }
        agent
    }
}
