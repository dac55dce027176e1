//! IP forwarding role

use crate::errors::Result;
use crate::exec::run_checked;
use crate::role::{Role, RoleContext, RoleKind};
use async_trait::async_trait;
use tracing::info;

pub const ENABLE_FORWARDING: &str = "sysctl net.ipv4.ip_forward=1";
pub const DISABLE_FORWARDING: &str = "sysctl net.ipv4.ip_forward=0";

/// Turns a node into a router: forwarding on at configure, off at terminate
#[derive(Debug, Clone, Default)]
pub struct ForwardingRole;

impl ForwardingRole {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Role for ForwardingRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Forwarding
    }

    async fn on_configure(&self, ctx: &RoleContext<'_>) -> Result<()> {
        run_checked(ctx.executor, ENABLE_FORWARDING).await?;
        info!("IP forwarding enabled on {}", ctx.node);
        Ok(())
    }

    async fn on_terminate(&self, ctx: &RoleContext<'_>) -> Result<()> {
        run_checked(ctx.executor, DISABLE_FORWARDING).await?;
        info!("IP forwarding disabled on {}", ctx.node);
        Ok(())
    }
}
