//! Node lifecycle
//!
//! A [`Node`] owns its roles, its private overlay and its lifecycle state.
//! Transitions:
//!
//! ```text
//! Unconfigured -> Configured -> Started <-> Stopped
//!        \             \           |          /
//!         `-------------`----> Terminated <--'
//! ```
//!
//! Configure errors are fatal for the node. Start and stop hooks are
//! best-effort: a failing hook is logged and the remaining hooks still run.
//! `terminate` never fails.

use crate::errors::{NodeError, Result};
use crate::exec::Executor;
use crate::overlay::PrivateOverlay;
use crate::role::{Role, RoleContext, RoleKind};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Unconfigured,
    Configured,
    Started,
    Stopped,
    Terminated,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Unconfigured, Configured) => true,
            (Configured, Started) | (Stopped, Started) => true,
            (Started, Stopped) => true,
            _ => false,
        }
    }
}

/// A hook that did not complete
#[derive(Debug)]
pub struct HookFailure {
    pub role: RoleKind,
    pub error: NodeError,
}

/// Outcome of running one lifecycle phase over every role
#[derive(Debug, Default)]
pub struct HookReport {
    pub ran: Vec<RoleKind>,
    pub failures: Vec<HookFailure>,
}

impl HookReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self, role: RoleKind) -> bool {
        self.failures.iter().any(|f| f.role == role)
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Configure,
    Start,
    Stop,
    Terminate,
}

/// Emulated network element
pub struct Node {
    name: String,
    roles: Vec<Box<dyn Role>>,
    overlay: PrivateOverlay,
    executor: Arc<dyn Executor>,
    state: LifecycleState,
}

impl Node {
    /// Node with the default overlay under `/tmp`
    pub fn new(name: impl Into<String>, executor: Arc<dyn Executor>) -> Result<Self> {
        let name = name.into();
        let overlay = PrivateOverlay::new(&name)?;
        Ok(Self::with_overlay(name, overlay, executor))
    }

    /// Node with an explicit overlay
    pub fn with_overlay(
        name: impl Into<String>,
        overlay: PrivateOverlay,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            name: name.into(),
            roles: Vec::new(),
            overlay,
            executor,
            state: LifecycleState::Unconfigured,
        }
    }

    /// Attach a role, keeping hook order. One role per kind.
    pub fn attach(&mut self, role: Box<dyn Role>) -> Result<()> {
        if self.state != LifecycleState::Unconfigured {
            return Err(NodeError::Configuration(format!(
                "roles can only be attached to an unconfigured node ({} is {:?})",
                self.name, self.state
            )));
        }
        let kind = role.kind();
        if self.has_role(kind) {
            return Err(NodeError::Configuration(format!(
                "node {} already has a {} role",
                self.name, kind
            )));
        }
        let pos = self.roles.partition_point(|r| r.kind() < kind);
        self.roles.insert(pos, role);
        Ok(())
    }

    /// Builder-style [`Node::attach`]
    pub fn with_role(mut self, role: impl Role + 'static) -> Result<Self> {
        self.attach(Box::new(role))?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn overlay(&self) -> &PrivateOverlay {
        &self.overlay
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    pub fn role_kinds(&self) -> Vec<RoleKind> {
        self.roles.iter().map(|r| r.kind()).collect()
    }

    pub fn has_role(&self, kind: RoleKind) -> bool {
        self.roles.iter().any(|r| r.kind() == kind)
    }

    fn check_transition(&self, to: LifecycleState) -> Result<()> {
        if self.state.can_transition_to(to) {
            Ok(())
        } else {
            Err(NodeError::InvalidTransition {
                node: self.name.clone(),
                from: self.state,
                to,
            })
        }
    }

    async fn run_hooks(&self, phase: Phase) -> HookReport {
        let ctx = RoleContext {
            node: &self.name,
            executor: self.executor.as_ref(),
            overlay: &self.overlay,
        };
        let ordered: Vec<&dyn Role> = match phase {
            Phase::Configure | Phase::Start => self.roles.iter().map(|r| r.as_ref()).collect(),
            Phase::Stop | Phase::Terminate => {
                self.roles.iter().rev().map(|r| r.as_ref()).collect()
            }
        };

        let mut report = HookReport::default();
        for role in ordered {
            debug!("{}: {:?} hook of {} role", self.name, phase, role.kind());
            let result = match phase {
                Phase::Configure => role.on_configure(&ctx).await,
                Phase::Start => role.on_start(&ctx).await,
                Phase::Stop => role.on_stop(&ctx).await,
                Phase::Terminate => role.on_terminate(&ctx).await,
            };
            report.ran.push(role.kind());
            if let Err(error) = result {
                warn!(
                    "{}: {:?} hook of {} role failed: {}",
                    self.name,
                    phase,
                    role.kind(),
                    error
                );
                report.failures.push(HookFailure {
                    role: role.kind(),
                    error,
                });
            }
        }
        report
    }

    /// Materialize the overlay and run configure hooks.
    ///
    /// Command failures are reported; any other error aborts and leaves the
    /// node unconfigured.
    pub async fn configure(&mut self) -> Result<HookReport> {
        self.check_transition(LifecycleState::Configured)?;
        self.overlay.materialize().await?;

        let mut report = self.run_hooks(Phase::Configure).await;
        if let Some(pos) = report.failures.iter().position(|f| !f.error.is_execution()) {
            let fatal = report.failures.swap_remove(pos);
            return Err(fatal.error);
        }

        self.state = LifecycleState::Configured;
        info!("Configured node {} with roles {:?}", self.name, self.role_kinds());
        Ok(report)
    }

    /// Run start hooks in role order
    pub async fn start(&mut self) -> Result<HookReport> {
        self.check_transition(LifecycleState::Started)?;
        let report = self.run_hooks(Phase::Start).await;
        self.state = LifecycleState::Started;
        info!(
            "Started node {} ({} hook failures)",
            self.name,
            report.failures.len()
        );
        Ok(report)
    }

    /// Run stop hooks in reverse role order
    pub async fn stop(&mut self) -> Result<HookReport> {
        self.check_transition(LifecycleState::Stopped)?;
        let report = self.run_hooks(Phase::Stop).await;
        self.state = LifecycleState::Stopped;
        info!("Stopped node {}", self.name);
        Ok(report)
    }

    /// Best-effort cleanup from any state. Never fails.
    pub async fn terminate(&mut self) -> HookReport {
        let mut report = HookReport::default();
        if self.state == LifecycleState::Started {
            report = self.run_hooks(Phase::Stop).await;
        }
        let terminate = self.run_hooks(Phase::Terminate).await;
        report.ran.extend(terminate.ran);
        report.failures.extend(terminate.failures);

        self.state = LifecycleState::Terminated;
        info!("Terminated node {}", self.name);
        report
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("roles", &self.role_kinds())
            .field("overlay", &self.overlay.root())
            .field("sandbox", &self.executor.sandbox())
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if !matches!(
            self.state,
            LifecycleState::Terminated | LifecycleState::Unconfigured
        ) {
            warn!(
                "Node {} dropped in state {:?} without terminate()",
                self.name, self.state
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    #[test]
    fn test_transition_table() {
        assert!(Unconfigured.can_transition_to(Configured));
        assert!(Configured.can_transition_to(Started));
        assert!(Started.can_transition_to(Stopped));
        assert!(Stopped.can_transition_to(Started));

        assert!(!Unconfigured.can_transition_to(Started));
        assert!(!Configured.can_transition_to(Configured));
        assert!(!Started.can_transition_to(Started));
        assert!(!Stopped.can_transition_to(Configured));

        for state in [Unconfigured, Configured, Started, Stopped] {
            assert!(state.can_transition_to(Terminated));
        }
        for state in [Unconfigured, Configured, Started, Stopped, Terminated] {
            assert!(!Terminated.can_transition_to(state));
        }
    }
}
