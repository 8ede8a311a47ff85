use oracle_core::{load_or_create_identity, IdentityError, NodeConfig, OracleNode};

#[test]
fn test_identity_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys").join("private.key");

    let first = load_or_create_identity(&path).unwrap();
    assert!(path.exists());
    let written = std::fs::read(&path).unwrap();

    // Second run: no new write, same peer id
    let second = load_or_create_identity(&path).unwrap();
    assert_eq!(first.peer_id(), second.peer_id());
    assert_eq!(std::fs::read(&path).unwrap(), written);
}

#[cfg(unix)]
#[test]
fn test_key_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("private.key");
    load_or_create_identity(&path).unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn test_truncated_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("private.key");
    load_or_create_identity(&path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    assert!(matches!(
        load_or_create_identity(&path),
        Err(IdentityError::CorruptKey { .. })
    ));
}

#[tokio::test]
async fn test_node_keeps_peer_id_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig {
        key_path: dir.path().join("node.key"),
        listen_addr: "/ip4/127.0.0.1/tcp/0".parse().unwrap(),
        enable_fanout: false,
        ..NodeConfig::default()
    };

    let node = OracleNode::start(config.clone()).await.unwrap();
    let first = node.peer_id();
    assert!(node.address().to_string().ends_with(&format!("/p2p/{}", first)));
    node.shutdown().await;

    let node = OracleNode::start(config).await.unwrap();
    assert_eq!(node.peer_id(), first);
    node.shutdown().await;
}
