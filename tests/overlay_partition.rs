//! Private overlays of distinct nodes never overlap

use ne_nodes::overlay::PRIVATE_DIRS;
use ne_nodes::PrivateOverlay;
use std::path::Path;

#[test]
fn test_nodes_do_not_share_private_paths() {
    let a = PrivateOverlay::with_base("/tmp", "a").unwrap();
    let b = PrivateOverlay::with_base("/tmp", "b").unwrap();

    for dir in PRIVATE_DIRS {
        let pa = a.map(dir).unwrap();
        let pb = b.map(dir).unwrap();
        assert!(pa.starts_with(a.root()));
        assert!(pb.starts_with(b.root()));
        assert!(!pa.starts_with(b.root()));
        assert!(!pb.starts_with(a.root()));
    }
    assert!(!a.root().starts_with(b.root()) && !b.root().starts_with(a.root()));
}

#[test]
fn test_prefix_names_stay_partitioned() {
    // "s1" must not be a path prefix of "s11"
    let s1 = PrivateOverlay::with_base("/tmp", "s1").unwrap();
    let s11 = PrivateOverlay::with_base("/tmp", "s11").unwrap();
    let p = s11.map("/var/run/lldpd.socket").unwrap();
    assert_eq!(p, Path::new("/tmp/s11.priv.dir/var/run/lldpd.socket"));
    assert!(!p.starts_with(s1.root()));
}

#[tokio::test]
async fn test_materialized_trees_are_disjoint() {
    let base = tempfile::tempdir().unwrap();
    let a = PrivateOverlay::with_base(base.path(), "a").unwrap();
    let b = PrivateOverlay::with_base(base.path(), "b").unwrap();
    a.materialize().await.unwrap();
    b.materialize().await.unwrap();

    std::fs::write(a.map("/var/log").unwrap().join("snmpd.log"), b"a").unwrap();
    assert!(!b.map("/var/log").unwrap().join("snmpd.log").exists());
}
