//! NAT rule translation to iptables commands
//!
//! A [`NatRule`] is an abstract pre-routing rule. Each field is either a
//! concrete value or the wildcard `*`, meaning "do not match on this".
//! Rules compile to the argument part of an iptables command; the
//! translator installs them in the nat table's PREROUTING chain in the order
//! given (the firewall is first-match-wins).

use crate::errors::{NodeError, Result};
use crate::exec::{is_plain_token, run_logged, Executor};
use crate::role::{Role, RoleContext, RoleKind};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use tracing::{debug, info};

pub const WILDCARD: &str = "*";

/// Base chain policies set before any rule is inserted
pub const ACCEPT_POLICIES: [&str; 3] = [
    "iptables -P INPUT ACCEPT",
    "iptables -P FORWARD ACCEPT",
    "iptables -P OUTPUT ACCEPT",
];

/// Flushes issued by [`NatTranslator::revoke_all`]
pub const FLUSH_TABLES: [&str; 2] = ["iptables -F", "iptables -t nat -F"];

const PREROUTING_APPEND: &str = "iptables -t nat -A PREROUTING";

/// One field of a NAT rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Selector {
    #[default]
    Any,
    Value(String),
}

impl Selector {
    pub fn value(&self) -> Option<&str> {
        match self {
            Selector::Any => None,
            Selector::Value(v) => Some(v),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Selector::Any)
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        if s == WILDCARD {
            Selector::Any
        } else {
            Selector::Value(s.to_string())
        }
    }
}

impl From<String> for Selector {
    fn from(s: String) -> Self {
        if s == WILDCARD {
            Selector::Any
        } else {
            Selector::Value(s)
        }
    }
}

impl From<u16> for Selector {
    fn from(port: u16) -> Self {
        Selector::Value(port.to_string())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value().unwrap_or(WILDCARD))
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // Ports are commonly written as JSON numbers
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Selector::from(s),
            Raw::Number(n) => Selector::Value(n.to_string()),
        })
    }
}

/// Abstract NAT rule record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NatRule {
    pub iface: Selector,
    pub proto: Selector,
    pub src: Selector,
    pub dport: Selector,
    pub todest: Selector,
    pub toport: Selector,
}

/// Target of a compiled rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NatAction {
    /// Rewrite the destination to the local node
    Redirect { to_port: String },
    /// Rewrite the destination address, optionally remapping the port
    Dnat { to: String, port: Option<String> },
}

impl NatRule {
    /// Rule forwarding matches to `todest`. The destination is always taken
    /// literally, so `dnat("*")` does not compile.
    pub fn dnat(todest: impl Into<String>) -> Self {
        Self {
            todest: Selector::Value(todest.into()),
            ..Default::default()
        }
    }

    /// Rule redirecting matches to a local port
    pub fn redirect(toport: u16) -> Self {
        Self {
            toport: Selector::from(toport),
            ..Default::default()
        }
    }

    pub fn iface(mut self, iface: impl Into<String>) -> Self {
        self.iface = Selector::from(iface.into());
        self
    }

    pub fn proto(mut self, proto: impl Into<String>) -> Self {
        self.proto = Selector::from(proto.into());
        self
    }

    pub fn src(mut self, src: impl Into<String>) -> Self {
        self.src = Selector::from(src.into());
        self
    }

    pub fn dport(mut self, dport: u16) -> Self {
        self.dport = Selector::from(dport);
        self
    }

    pub fn toport(mut self, toport: u16) -> Self {
        self.toport = Selector::from(toport);
        self
    }

    /// Resolve the action, enforcing the todest/toport invariant
    pub fn action(&self) -> Result<NatAction> {
        match (self.todest.value(), self.toport.value()) {
            (None, None) => Err(NodeError::RuleTranslation(
                "rule has neither todest nor toport".to_string(),
            )),
            (None, Some(port)) => Ok(NatAction::Redirect {
                to_port: port.to_string(),
            }),
            (Some(dest), port) => Ok(NatAction::Dnat {
                to: dest.to_string(),
                port: port.map(str::to_string),
            }),
        }
    }

    fn fields(&self) -> [(&'static str, &Selector); 6] {
        [
            ("iface", &self.iface),
            ("proto", &self.proto),
            ("src", &self.src),
            ("dport", &self.dport),
            ("todest", &self.todest),
            ("toport", &self.toport),
        ]
    }
}

/// Compile a rule into its iptables clause, e.g.
/// `-i eth0 -p udp --dport 30001 -j DNAT --to 10.200.1.201:161`
pub fn compile(rule: &NatRule) -> Result<String> {
    for (field, selector) in rule.fields() {
        let Some(v) = selector.value() else { continue };
        // Only `src` may carry a prefix length
        let plain = match field {
            "src" => v.split('/').all(is_plain_token) && v.matches('/').count() <= 1,
            _ => is_plain_token(v),
        };
        if !plain {
            return Err(NodeError::RuleTranslation(format!(
                "{} value '{}' is not a plain iptables argument",
                field, v
            )));
        }
    }

    let mut parts: Vec<String> = Vec::new();
    let selectors = [
        ("-i", &rule.iface),
        ("-p", &rule.proto),
        ("-s", &rule.src),
        ("--dport", &rule.dport),
    ];
    for (flag, selector) in selectors {
        if let Some(v) = selector.value() {
            parts.push(format!("{} {}", flag, v));
        }
    }

    match rule.action()? {
        NatAction::Redirect { to_port } => {
            parts.push(format!("-j REDIRECT --to-port {}", to_port));
        }
        NatAction::Dnat { to, port: None } => {
            parts.push(format!("-j DNAT --to {}", to));
        }
        NatAction::Dnat { to, port: Some(port) } => {
            parts.push(format!("-j DNAT --to {}:{}", to, port));
        }
    }

    Ok(parts.join(" "))
}

/// Full command inserting a compiled clause into nat PREROUTING
pub fn prerouting_command(clause: &str) -> String {
    format!("{} {}", PREROUTING_APPEND, clause)
}

/// Applies and revokes NAT rule sets on a node
pub struct NatTranslator;

impl NatTranslator {
    /// Compile a whole batch; the first invalid rule rejects all of them
    pub fn compile_all(rules: &[NatRule]) -> Result<Vec<String>> {
        rules
            .iter()
            .enumerate()
            .map(|(i, rule)| {
                compile(rule).map_err(|e| match e {
                    NodeError::RuleTranslation(msg) => {
                        NodeError::RuleTranslation(format!("rule #{}: {}", i, msg))
                    }
                    other => other,
                })
            })
            .collect()
    }

    /// Set accept-by-default policies, then append every rule in order.
    ///
    /// Returns the number of rules the firewall accepted.
    pub async fn apply(executor: &dyn Executor, rules: &[NatRule]) -> Result<usize> {
        let clauses = Self::compile_all(rules)?;
        Ok(Self::apply_compiled(executor, &clauses).await)
    }

    async fn apply_compiled(executor: &dyn Executor, clauses: &[String]) -> usize {
        for policy in ACCEPT_POLICIES {
            run_logged(executor, policy).await;
        }

        let mut inserted = 0;
        for clause in clauses {
            if run_logged(executor, &prerouting_command(clause)).await {
                inserted += 1;
            }
        }
        info!(
            "[{}] installed {}/{} NAT rules",
            executor.sandbox(),
            inserted,
            clauses.len()
        );
        inserted
    }

    /// Flush the filter and nat tables entirely
    pub async fn revoke_all(executor: &dyn Executor) {
        for flush in FLUSH_TABLES {
            run_logged(executor, flush).await;
        }
        debug!("[{}] firewall tables flushed", executor.sandbox());
    }
}

/// Node role installing a fixed NAT rule set while the node runs
#[derive(Debug, Clone)]
pub struct NatRole {
    clauses: Vec<String>,
}

impl NatRole {
    /// Validate and compile the rules up front
    pub fn new(rules: &[NatRule]) -> Result<Self> {
        Ok(Self {
            clauses: NatTranslator::compile_all(rules)?,
        })
    }

    pub fn clauses(&self) -> &[String] {
        &self.clauses
    }
}

#[async_trait]
impl Role for NatRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Nat
    }

    async fn on_start(&self, ctx: &RoleContext<'_>) -> Result<()> {
        let inserted = NatTranslator::apply_compiled(ctx.executor, &self.clauses).await;
        if inserted < self.clauses.len() {
            return Err(NodeError::Execution {
                command: PREROUTING_APPEND.to_string(),
                reason: format!(
                    "only {} of {} rules installed on {}",
                    inserted,
                    self.clauses.len(),
                    ctx.node
                ),
            });
        }
        Ok(())
    }

    async fn on_stop(&self, ctx: &RoleContext<'_>) -> Result<()> {
        NatTranslator::revoke_all(ctx.executor).await;
        Ok(())
    }
}
