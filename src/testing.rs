//! In-memory execution capability for tests and dry runs
//!
//! [`RecordingExecutor`] records every command and tracks the small amount
//! of kernel state the roles touch: the IPv4 forwarding flag, chain
//! policies and the contents of the nat PREROUTING chain and filter table.
//! Commands matching a configured failure pattern exit with status 1.

use crate::exec::{ExecOutcome, Executor};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// How a recorded command was issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Executed(String),
    Launched(String),
}

impl Invocation {
    pub fn command(&self) -> &str {
        match self {
            Invocation::Executed(c) | Invocation::Launched(c) => c,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    log: Vec<Invocation>,
    forwarding: Option<bool>,
    policies: BTreeMap<String, String>,
    nat_prerouting: Vec<String>,
    filter_rules: Vec<String>,
}

impl State {
    fn apply(&mut self, command: &str) {
        let words: Vec<&str> = command.split_whitespace().collect();
        match words.as_slice() {
            ["sysctl", setting] => {
                if let Some(value) = setting.strip_prefix("net.ipv4.ip_forward=") {
                    self.forwarding = Some(value == "1");
                }
            }
            ["iptables", "-P", chain, policy] => {
                self.policies.insert(chain.to_string(), policy.to_string());
            }
            ["iptables", "-F"] => self.filter_rules.clear(),
            ["iptables", "-t", "nat", "-F"] => self.nat_prerouting.clear(),
            ["iptables", "-t", "nat", "-A", "PREROUTING", rest @ ..] => {
                self.nat_prerouting.push(rest.join(" "));
            }
            ["iptables", "-A", _chain, rest @ ..] => {
                self.filter_rules.push(rest.join(" "));
            }
            _ => {}
        }
    }
}

/// Executor that never touches the system
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    label: String,
    failing: Vec<String>,
    state: Mutex<State>,
}

impl RecordingExecutor {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Make every command containing `pattern` fail with exit status 1
    pub fn failing_on(mut self, pattern: impl Into<String>) -> Self {
        self.failing.push(pattern.into());
        self
    }

    fn fails(&self, command: &str) -> bool {
        self.failing.iter().any(|p| command.contains(p.as_str()))
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().log.clone()
    }

    /// Commands run to completion, in order
    pub fn executed(&self) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .filter_map(|i| match i {
                Invocation::Executed(c) => Some(c.clone()),
                Invocation::Launched(_) => None,
            })
            .collect()
    }

    /// Background launches, in order
    pub fn launched(&self) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .filter_map(|i| match i {
                Invocation::Launched(c) => Some(c.clone()),
                Invocation::Executed(_) => None,
            })
            .collect()
    }

    /// Last forwarding value written, `None` if never touched
    pub fn forwarding(&self) -> Option<bool> {
        self.state.lock().forwarding
    }

    pub fn policy(&self, chain: &str) -> Option<String> {
        self.state.lock().policies.get(chain).cloned()
    }

    /// Clauses currently in nat PREROUTING, in evaluation order
    pub fn nat_prerouting(&self) -> Vec<String> {
        self.state.lock().nat_prerouting.clone()
    }

    pub fn filter_rules(&self) -> Vec<String> {
        self.state.lock().filter_rules.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    fn sandbox(&self) -> String {
        format!("recording:{}", self.label)
    }

    async fn execute(&self, command: &str) -> std::io::Result<ExecOutcome> {
        let mut state = self.state.lock();
        state.log.push(Invocation::Executed(command.to_string()));
        if self.fails(command) {
            return Ok(ExecOutcome::failed(1, "injected failure"));
        }
        state.apply(command);
        Ok(ExecOutcome::ok())
    }

    async fn launch(&self, command: &str) -> std::io::Result<()> {
        self.state
            .lock()
            .log
            .push(Invocation::Launched(command.to_string()));
        if self.fails(command) {
            return Err(std::io::Error::other(format!(
                "injected launch failure: {}",
                command
            )));
        }
        Ok(())
    }
}
