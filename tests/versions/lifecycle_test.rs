use ringkeeper::DomainDefinition;
use ringkeeper::MemoryCluster;
use ringkeeper::VersionProperties;

use crate::common::connect;
use crate::common::eventually;

#[tokio::test]
async fn test_open_fill_close() {
    let cluster = MemoryCluster::new();
    let coordinator = connect(&cluster).await;
    let domain = coordinator.add_domain("users", DomainDefinition::new(4)).await.unwrap();
    let serializer = coordinator.properties_serializer_for(&domain).unwrap();
    let properties = VersionProperties {
        parent_version: None,
        source: Some("hdfs://exports/users".to_string()),
        ..Default::default()
    };

    let version = domain
        .open_new_version(Some(serializer.serialize(&properties).unwrap()))
        .await
        .unwrap();
    for partition in 0..4 {
        version.add_partition_properties(partition, 1_000, 10).await.unwrap();
    }
    version.close().await.unwrap();

    let reader = connect(&cluster).await;
    let seen = reader.domain("users").await.unwrap().unwrap();
    let latest = seen.latest_closed_version().await.unwrap().unwrap();
    assert_eq!(latest.number(), 0);
    assert_eq!(latest.total_num_bytes(), 4_000);
    assert_eq!(latest.total_num_records(), 40);
    let decoded = serializer.deserialize(&latest.properties().unwrap()).unwrap();
    assert_eq!(decoded, properties);
}

/// # Case 1: Cancel removes an open version everywhere
///
/// ## Validation criteria
/// 1. Cancel of an open version succeeds and other coordinators stop seeing it
/// 2. A closed version refuses cancellation and survives
#[tokio::test]
async fn test_cancel_and_close_then_cancel() {
    let cluster = MemoryCluster::new();
    let writer = connect(&cluster).await;
    let reader = connect(&cluster).await;
    let domain = writer.add_domain("users", DomainDefinition::new(2)).await.unwrap();
    domain.open_new_version(None).await.unwrap();
    let closed = domain.open_new_version(None).await.unwrap();
    closed.close().await.unwrap();

    assert!(eventually(|| async {
        match reader.domain("users").await.unwrap() {
            Some(d) => d.versions().await.unwrap().len() == 2,
            None => false,
        }
    })
    .await);
    let observed = reader.domain("users").await.unwrap().unwrap();

    assert!(domain.cancel_version(0).await.unwrap());
    assert!(eventually(|| async { observed.version(0).await.unwrap().is_none() }).await);

    assert!(!domain.cancel_version(1).await.unwrap());
    assert!(observed.version(1).await.unwrap().unwrap().is_closed());
    assert_eq!(domain.open_new_version(None).await.unwrap().number(), 2);
}

#[tokio::test]
async fn test_cancel_from_stale_handle_after_remote_close() {
    let cluster = MemoryCluster::new();
    let writer = connect(&cluster).await;
    let domain = writer.add_domain("users", DomainDefinition::new(2)).await.unwrap();
    domain.open_new_version(None).await.unwrap();

    let closer = connect(&cluster).await;
    let remote = closer.domain("users").await.unwrap().unwrap();
    remote.version(0).await.unwrap().unwrap().close().await.unwrap();

    // The writer may not have observed the close yet; the cancel must still refuse
    assert!(!domain.cancel_version(0).await.unwrap());
    assert!(domain.version(0).await.unwrap().is_some());
}
