//! Per-node private filesystem overlay
//!
//! Co-located nodes share one filesystem, so daemon state directories are
//! redirected into a private tree keyed by the node name:
//! `/var/run` of node `j1` lives at `<base>/j1.priv.dir/var/run`.

use crate::errors::{NodeError, Result};
use crate::exec::is_plain_token;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Daemon state directories every node gets a private copy of
pub const PRIVATE_DIRS: [&str; 5] = [
    "/var/log",
    "/var/run",
    "/var/agentx",
    "/var/lib/snmp",
    "/var/mn",
];

/// Directory the private trees are created under
pub const DEFAULT_BASE: &str = "/tmp";

/// Validate a node name for use as a path component and in daemon
/// command lines
pub fn validate_node_name(name: &str) -> Result<()> {
    if name == "." || name == ".." || !is_plain_token(name) {
        return Err(NodeError::Configuration(format!(
            "invalid node name '{}': use ASCII letters, digits and ._:@+-",
            name
        )));
    }
    Ok(())
}

fn validate_dir(dir: &Path) -> Result<()> {
    if !dir.is_absolute() {
        return Err(NodeError::Configuration(format!(
            "overlay path {} is not absolute",
            dir.display()
        )));
    }
    if dir.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(NodeError::Configuration(format!(
            "overlay path {} must not contain '..'",
            dir.display()
        )));
    }
    if dir.parent().is_none() {
        return Err(NodeError::Configuration(
            "the filesystem root cannot be made private".to_string(),
        ));
    }
    Ok(())
}

/// Private tree of one node
#[derive(Debug, Clone)]
pub struct PrivateOverlay {
    root: PathBuf,
    dirs: Vec<PathBuf>,
}

impl PrivateOverlay {
    /// Overlay for `node` under [`DEFAULT_BASE`] with [`PRIVATE_DIRS`]
    pub fn new(node: &str) -> Result<Self> {
        Self::with_base(DEFAULT_BASE, node)
    }

    /// Overlay for `node` under an arbitrary base directory
    pub fn with_base(base: impl AsRef<Path>, node: &str) -> Result<Self> {
        validate_node_name(node)?;
        let root = base.as_ref().join(format!("{}.priv.dir", node));
        Ok(Self {
            root,
            dirs: PRIVATE_DIRS.iter().map(PathBuf::from).collect(),
        })
    }

    /// Replace the set of private directories
    pub fn with_dirs<I, P>(mut self, dirs: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let dirs: Vec<PathBuf> = dirs.into_iter().map(Into::into).collect();
        for dir in &dirs {
            validate_dir(dir)?;
        }
        self.dirs = dirs;
        Ok(self)
    }

    /// Root of the private tree, `<base>/<node>.priv.dir`
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Translate a shared path into the private tree.
    ///
    /// Only the configured directories and paths below them are mapped.
    pub fn map(&self, path: impl AsRef<Path>) -> Option<PathBuf> {
        let path = path.as_ref();
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return None;
        }
        self.dirs
            .iter()
            .find(|dir| path.starts_with(dir))
            .and_then(|_| path.strip_prefix("/").ok())
            .map(|relative| self.root.join(relative))
    }

    /// All (shared, private) directory pairs
    pub fn mappings(&self) -> Vec<(PathBuf, PathBuf)> {
        self.dirs
            .iter()
            .filter_map(|dir| self.map(dir).map(|private| (dir.clone(), private)))
            .collect()
    }

    /// Location of a node-level file directly under the root
    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Create every private directory. Must succeed before any daemon runs.
    pub async fn materialize(&self) -> Result<()> {
        for (shared, private) in self.mappings() {
            tokio::fs::create_dir_all(&private).await.map_err(|e| {
                NodeError::Resource(format!(
                    "cannot create {} (private {}): {}",
                    private.display(),
                    shared.display(),
                    e
                ))
            })?;
            debug!("Mapped {} -> {}", shared.display(), private.display());
        }
        info!("Private overlay ready at {}", self.root.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let overlay = PrivateOverlay::new("j1").unwrap();
        assert_eq!(overlay.root(), Path::new("/tmp/j1.priv.dir"));
        assert_eq!(
            overlay.map("/var/agentx").unwrap(),
            PathBuf::from("/tmp/j1.priv.dir/var/agentx")
        );
        assert_eq!(
            overlay.map("/var/lib/snmp/snmpd.conf").unwrap(),
            PathBuf::from("/tmp/j1.priv.dir/var/lib/snmp/snmpd.conf")
        );
        assert_eq!(overlay.mappings().len(), PRIVATE_DIRS.len());
    }

    #[test]
    fn test_unmapped_paths() {
        let overlay = PrivateOverlay::new("j1").unwrap();
        assert!(overlay.map("/etc/snmp").is_none());
        // prefix match is per component, not per character
        assert!(overlay.map("/var/logs").is_none());
        assert!(overlay.map("/var/log/../../etc").is_none());
    }

    #[test]
    fn test_rejects_bad_names_and_dirs() {
        assert!(matches!(
            PrivateOverlay::new(""),
            Err(NodeError::Configuration(_))
        ));
        assert!(PrivateOverlay::new("a/b").is_err());
        assert!(PrivateOverlay::new("..").is_err());
        for name in ["x$(touch${IFS}f)", "a;b", "a b", "`id`", "-n", "a'b"] {
            assert!(
                matches!(PrivateOverlay::new(name), Err(NodeError::Configuration(_))),
                "{} accepted",
                name
            );
        }

        let overlay = PrivateOverlay::new("n").unwrap();
        assert!(matches!(
            overlay.clone().with_dirs(["var/log"]),
            Err(NodeError::Configuration(_))
        ));
        assert!(overlay.clone().with_dirs(["/var/../etc"]).is_err());
        assert!(overlay.with_dirs(["/"]).is_err());
    }

    #[tokio::test]
    async fn test_materialize_creates_tree() {
        let base = tempfile::tempdir().unwrap();
        let overlay = PrivateOverlay::with_base(base.path(), "r1").unwrap();
        overlay.materialize().await.unwrap();
        for (_, private) in overlay.mappings() {
            assert!(private.is_dir(), "{} missing", private.display());
        }
    }

    #[tokio::test]
    async fn test_materialize_failure_is_resource_error() {
        let base = tempfile::tempdir().unwrap();
        let blocker = base.path().join("blocked");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let overlay = PrivateOverlay::with_base(&blocker, "r1").unwrap();
        let err = overlay.materialize().await.unwrap_err();
        assert!(matches!(err, NodeError::Resource(_)), "got {:?}", err);
    }
}
