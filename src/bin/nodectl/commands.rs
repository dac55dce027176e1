//! CLI command implementations

use anyhow::{Context, Result};
use futures::future::join_all;
use ne_nodes::nat::{prerouting_command, NatTranslator};
use ne_nodes::testing::{Invocation, RecordingExecutor};
use ne_nodes::{Executor, NatRule, Node, TopologyPlan};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::sleep;
use tracing::{error, info, warn};

async fn load_plan(path: &Path) -> Result<TopologyPlan> {
    TopologyPlan::from_file(path)
        .await
        .with_context(|| format!("loading plan {}", path.display()))
}

/// Implementation of the 'check' command
pub async fn cmd_check(plan: PathBuf) -> Result<()> {
    let topology = load_plan(&plan).await?;
    // Building validates monitoring options and NAT rules as well
    let nodes = topology.build_nodes()?;

    println!("Plan {} is valid:", plan.display());
    for node in &nodes {
        let roles: Vec<String> = node.role_kinds().iter().map(|k| k.to_string()).collect();
        println!(
            "  {:<12} [{}] on {} overlay {}",
            node.name(),
            roles.join(", "),
            node.executor().sandbox(),
            node.overlay().root().display()
        );
    }
    Ok(())
}

/// Implementation of the 'render' command
pub async fn cmd_render(plan: PathBuf, node: String) -> Result<()> {
    let topology = load_plan(&plan).await?;
    let entry = topology
        .node(&node)
        .with_context(|| format!("node {} is not in the plan", node))?;
    let role = entry
        .monitoring_role()?
        .with_context(|| format!("node {} has no monitoring role", node))?;

    print!("{}", role.config().render());
    Ok(())
}

/// Implementation of the 'compile' command
pub async fn cmd_compile(rules: PathBuf) -> Result<()> {
    let json = tokio::fs::read_to_string(&rules)
        .await
        .with_context(|| format!("reading {}", rules.display()))?;
    let rules: Vec<NatRule> = serde_json::from_str(&json)?;

    for clause in NatTranslator::compile_all(&rules)? {
        println!("{}", prerouting_command(&clause));
    }
    Ok(())
}

type Recorders = Vec<Arc<RecordingExecutor>>;

fn build(topology: &TopologyPlan, dry_run: bool) -> Result<(Vec<Node>, Recorders)> {
    if !dry_run {
        return Ok((topology.build_nodes()?, Vec::new()));
    }

    let mut nodes = Vec::new();
    let mut recorders = Vec::new();
    for entry in &topology.nodes {
        let recorder = Arc::new(RecordingExecutor::new(entry.name.clone()));
        let executor: Arc<dyn Executor> = recorder.clone();
        nodes.push(entry.build(&topology.overlay_base, executor)?);
        recorders.push(recorder);
    }
    Ok((nodes, recorders))
}

async fn terminate_all(nodes: &mut [Node]) {
    join_all(nodes.iter_mut().map(|n| n.terminate())).await;
}

/// Implementation of the 'up' command
pub async fn cmd_up(plan: PathBuf, duration: u64, dry_run: bool) -> Result<()> {
    let topology = load_plan(&plan).await?;
    let (mut nodes, recorders) = build(&topology, dry_run)?;
    info!("Bringing up {} nodes", nodes.len());

    let configured = join_all(nodes.iter_mut().map(|n| n.configure())).await;
    let mut fatal = None;
    for (node, result) in topology.nodes.iter().zip(configured) {
        if let Err(e) = result {
            error!("Failed to configure {}: {}", node.name, e);
            fatal.get_or_insert_with(|| format!("{}: {}", node.name, e));
        }
    }
    if let Some(reason) = fatal {
        terminate_all(&mut nodes).await;
        anyhow::bail!("configuration failed ({})", reason);
    }

    for result in join_all(nodes.iter_mut().map(|n| n.start())).await {
        match result {
            Ok(report) => {
                for failure in &report.failures {
                    warn!("{} role did not start cleanly: {}", failure.role, failure.error);
                }
            }
            Err(e) => warn!("{}", e),
        }
    }
    info!("All nodes started");

    if duration > 0 {
        tokio::select! {
            _ = sleep(Duration::from_secs(duration)) => {
                info!("Duration completed");
            }
            _ = signal::ctrl_c() => {
                info!("Interrupted by user");
            }
        }
    } else if !dry_run {
        signal::ctrl_c().await?;
        info!("Interrupted by user");
    }

    for result in join_all(nodes.iter_mut().map(|n| n.stop())).await {
        if let Err(e) = result {
            warn!("{}", e);
        }
    }
    terminate_all(&mut nodes).await;
    info!("All nodes terminated");

    for recorder in recorders {
        println!("# {}", recorder.sandbox());
        for invocation in recorder.invocations() {
            match invocation {
                Invocation::Executed(cmd) => println!("exec   {}", cmd),
                Invocation::Launched(cmd) => println!("launch {}", cmd),
            }
        }
    }
    Ok(())
}
