//! Composable node behaviors
//!
//! A node carries an ordered set of roles. Hooks run in [`RoleKind`] order on
//! configure/start and in reverse order on stop/terminate.

use crate::errors::Result;
use crate::exec::Executor;
use crate::overlay::PrivateOverlay;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role kinds in hook order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Forwarding,
    Monitoring,
    Nat,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoleKind::Forwarding => "forwarding",
            RoleKind::Monitoring => "monitoring",
            RoleKind::Nat => "nat",
        };
        f.write_str(name)
    }
}

/// What a hook can see of its node
pub struct RoleContext<'a> {
    pub node: &'a str,
    pub executor: &'a dyn Executor,
    pub overlay: &'a PrivateOverlay,
}

#[async_trait]
pub trait Role: Send + Sync + fmt::Debug {
    fn kind(&self) -> RoleKind;

    async fn on_configure(&self, _ctx: &RoleContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn on_start(&self, _ctx: &RoleContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn on_stop(&self, _ctx: &RoleContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn on_terminate(&self, _ctx: &RoleContext<'_>) -> Result<()> {
        Ok(())
    }
}
