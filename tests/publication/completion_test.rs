use ringkeeper::CoordinationStore;
use ringkeeper::CreateMode;
use ringkeeper::DomainGroupMetadata;
use ringkeeper::MemoryCluster;
use ringkeeper::COMPLETION_MARKER;

use crate::common::connect;
use crate::common::eventually;

/// # Case 1: Half-written entities stay invisible
///
/// ## Setup
/// A domain group node is written by hand without its completion marker.
///
/// ## Validation criteria
/// 1. A coordinator does not expose the group
/// 2. It appears once the marker is written
#[tokio::test]
async fn test_incomplete_entity_hidden_until_marker() {
    let cluster = MemoryCluster::new();
    let coordinator = connect(&cluster).await;
    assert!(coordinator.domain_groups().await.unwrap().is_empty());
    let store = cluster.connect();
    let path = "/ringkeeper/domain_groups/serving";

    store
        .create(
            path,
            bincode::serialize(&DomainGroupMetadata::default()).unwrap(),
            CreateMode::Persistent,
        )
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(coordinator.domain_group("serving").await.unwrap().is_none());

    store
        .create(&format!("{path}/{COMPLETION_MARKER}"), Vec::new(), CreateMode::Persistent)
        .await
        .unwrap();

    assert!(eventually(|| async { coordinator.domain_group("serving").await.unwrap().is_some() }).await);
}

#[tokio::test]
async fn test_deleted_entity_disappears() {
    let cluster = MemoryCluster::new();
    let writer = connect(&cluster).await;
    let reader = connect(&cluster).await;
    writer.add_domain_group("serving").await.unwrap();
    assert!(eventually(|| async { reader.domain_group("serving").await.unwrap().is_some() }).await);

    writer.delete_domain_group("serving").await.unwrap();

    assert!(eventually(|| async { reader.domain_group("serving").await.unwrap().is_none() }).await);
}
