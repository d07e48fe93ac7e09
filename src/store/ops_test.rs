use super::*;
use crate::StoreError;

#[test]
fn test_path_helpers() {
    assert_eq!(join_path("/", "a"), "/a");
    assert_eq!(join_path("/a", "b"), "/a/b");

    assert_eq!(parent_of("/"), None);
    assert_eq!(parent_of("/a"), Some("/"));
    assert_eq!(parent_of("/a/b/c"), Some("/a/b"));

    assert_eq!(node_name("/a/b"), "b");
    assert_eq!(node_name("/a"), "a");
}

#[test]
fn test_validate_path() {
    assert!(validate_path("/").is_ok());
    assert!(validate_path("/a/.complete").is_ok());
    assert!(validate_path("").is_err());
    assert!(validate_path("a/b").is_err());
    assert!(validate_path("/a/").is_err());
    assert!(validate_path("/a//b").is_err());
    assert!(validate_path("/a/../b").is_err());
}

#[test]
fn test_sequence_of() {
    assert_eq!(sequence_of("command_0000000042"), Some(42));
    assert_eq!(sequence_of("0000000007"), Some(7));
    assert_eq!(sequence_of("command_"), None);
    assert_eq!(sequence_of("command_00000000x1"), None);
    // multi-byte character straddling the suffix boundary
    assert_eq!(sequence_of("é000000000"), None);
    assert_eq!(sequence_of("日本000000001"), None);
}

#[tokio::test]
async fn test_ensure_path_creates_missing_ancestors() {
    let cluster = MemoryCluster::new();
    let store = cluster.connect();
    store.create("/a", vec![], CreateMode::Persistent).await.unwrap();

    ensure_path(store.as_ref(), "/a/b/c").await.unwrap();
    ensure_path(store.as_ref(), "/a/b/c").await.unwrap();

    assert!(cluster.contains("/a/b"));
    assert!(cluster.contains("/a/b/c"));
}

#[tokio::test]
async fn test_create_if_absent_reports_first_writer() {
    let cluster = MemoryCluster::new();
    let store = cluster.connect();

    assert!(create_if_absent(store.as_ref(), "/x", vec![1], CreateMode::Persistent).await.unwrap());
    assert!(!create_if_absent(store.as_ref(), "/x", vec![2], CreateMode::Persistent).await.unwrap());

    let (data, _) = store.get_data("/x", None).await.unwrap();
    assert_eq!(data, vec![1]);
}

#[tokio::test]
async fn test_delete_recursive_removes_subtree_and_tolerates_missing() {
    let cluster = MemoryCluster::new();
    let store = cluster.connect();
    ensure_path(store.as_ref(), "/root/a/b").await.unwrap();
    ensure_path(store.as_ref(), "/root/c").await.unwrap();
    store.create("/keep", vec![], CreateMode::Persistent).await.unwrap();

    delete_recursive(store.as_ref(), "/root").await.unwrap();

    assert_eq!(cluster.paths(), vec!["/".to_string(), "/keep".to_string()]);
    delete_recursive(store.as_ref(), "/root").await.unwrap();
}

#[tokio::test]
async fn test_delete_if_exists_and_read_if_exists() {
    let cluster = MemoryCluster::new();
    let store = cluster.connect();
    store.create("/x", vec![9], CreateMode::Persistent).await.unwrap();

    let (data, stat) = read_if_exists(store.as_ref(), "/x", None).await.unwrap().unwrap();
    assert_eq!(data, vec![9]);
    assert_eq!(stat.version, 0);

    assert!(delete_if_exists(store.as_ref(), "/x").await.unwrap());
    assert!(!delete_if_exists(store.as_ref(), "/x").await.unwrap());
    assert!(read_if_exists(store.as_ref(), "/x", None).await.unwrap().is_none());
    assert!(children_or_empty(store.as_ref(), "/x").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_recursive_propagates_session_errors() {
    let mut mock = MockCoordinationStore::new();
    mock.expect_get_children()
        .returning(|_, _| Err(StoreError::ConnectionLoss));

    assert_eq!(
        delete_recursive(&mock, "/any").await,
        Err(StoreError::ConnectionLoss)
    );
}
