use std::collections::BTreeSet;

use futures::future::join_all;
use ringkeeper::DomainDefinition;
use ringkeeper::MemoryCluster;
use tracing_test::traced_test;

use crate::common::connect;
use crate::common::eventually;

const CALLERS: u32 = 10;
const VERSIONS_PER_CALLER: u32 = 5;

/// # Case 1: Concurrent version opening hands out every number exactly once
///
/// ## Setup
/// Ten coordinators, each on its own session, open five versions of the same domain
/// concurrently.
///
/// ## Validation criteria
/// 1. The returned numbers are exactly 0..50
/// 2. Every version is published and visible to a fresh coordinator
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn test_concurrent_open_new_version_is_gapless() {
    let cluster = MemoryCluster::new();
    let admin = connect(&cluster).await;
    admin.add_domain("users", DomainDefinition::new(16)).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..CALLERS {
        let coordinator = connect(&cluster).await;
        tasks.push(tokio::spawn(async move {
            assert!(eventually(|| async { coordinator.domain("users").await.unwrap().is_some() }).await);
            let domain = coordinator.domain("users").await.unwrap().unwrap();
            let mut numbers = Vec::new();
            for _ in 0..VERSIONS_PER_CALLER {
                numbers.push(domain.open_new_version(None).await.unwrap().number());
            }
            numbers
        }));
    }

    let mut numbers = Vec::new();
    for result in join_all(tasks).await {
        numbers.extend(result.unwrap());
    }
    let distinct: BTreeSet<u32> = numbers.iter().copied().collect();
    assert_eq!(numbers.len(), (CALLERS * VERSIONS_PER_CALLER) as usize);
    assert_eq!(distinct, (0..CALLERS * VERSIONS_PER_CALLER).collect());

    let reader = connect(&cluster).await;
    let domain = reader.domain("users").await.unwrap().unwrap();
    assert_eq!(domain.versions().await.unwrap().len(), 50);
    assert_eq!(domain.next_version_number(), 50);
}

/// # Case 2: Two concurrent increments of the same counter both land
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_domain_id_allocation() {
    let cluster = MemoryCluster::new();
    let first = connect(&cluster).await;
    let second = connect(&cluster).await;

    let (a, b) = tokio::join!(first.allocate_domain_id(), second.allocate_domain_id());

    let ids: BTreeSet<u32> = [a.unwrap(), b.unwrap()].into_iter().collect();
    assert_eq!(ids, BTreeSet::from([0, 1]));
    assert_eq!(first.allocate_domain_id().await.unwrap(), 2);
}
