use ringkeeper::DomainDefinition;
use ringkeeper::HostAddress;
use ringkeeper::MemoryCluster;
use tokio::sync::mpsc;

use crate::common::connect;
use crate::common::eventually;
use crate::common::WAIT;

/// # Case 1: Ring listeners follow partition assignments made elsewhere
///
/// ## Validation criteria
/// 1. The observing ring fires its data-location listener with the host address
/// 2. The observer's host view converges on the assigned partitions and versions
#[tokio::test]
async fn test_assignment_propagates_to_observer() {
    let cluster = MemoryCluster::new();
    let operator = connect(&cluster).await;
    let observer = connect(&cluster).await;
    let domain = operator.add_domain("users", DomainDefinition::new(8)).await.unwrap();
    operator.add_domain_group("serving").await.unwrap();
    let ring_group = operator.add_ring_group("prod", "serving").await.unwrap();
    let ring = ring_group.add_ring(1).await.unwrap();
    let address = HostAddress::new("node-7", 9000);
    let host = ring.add_host(address.clone(), Default::default()).await.unwrap();

    assert!(eventually(|| async { observer.ring_group("prod").await.unwrap().is_some() }).await);
    let observed_ring = observer
        .ring_group("prod")
        .await
        .unwrap()
        .unwrap()
        .ring(1)
        .await
        .unwrap()
        .unwrap();
    let observed_host = observed_ring.host(&address).await.unwrap().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    observed_ring.add_data_location_listener(move |a| {
        let _ = tx.send(a.clone());
    });

    let host_domain = host.add_domain(&domain).await.unwrap();
    host_domain.add_partition(0).await.unwrap();
    host_domain.add_partition(5).await.unwrap();
    host_domain.set_current_version(5, Some(3)).await.unwrap();

    let notified = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(notified, address);
    assert!(eventually(|| async {
        observed_host
            .host_domain(domain.id())
            .and_then(|hd| hd.partition(5))
            .map(|p| p.current_version == Some(3))
            .unwrap_or(false)
    })
    .await);
    let partitions: Vec<u32> = observed_host
        .host_domain(domain.id())
        .unwrap()
        .partitions()
        .iter()
        .map(|p| p.partition)
        .collect();
    assert_eq!(partitions, vec![0, 5]);
}
