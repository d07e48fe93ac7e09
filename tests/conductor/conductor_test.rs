use ringkeeper::CoordinationStore;
use ringkeeper::Coordinator;
use ringkeeper::ConductorMode;
use ringkeeper::Error;
use ringkeeper::MemoryCluster;
use ringkeeper::UsageError;

use crate::common::connect;
use crate::common::eventually;

async fn setup(coordinator: &Coordinator) {
    coordinator.add_domain_group("serving").await.unwrap();
    coordinator.add_ring_group("prod", "serving").await.unwrap();
}

/// # Case 1: One conductor per ring group
///
/// ## Setup
/// Two coordinators race for the conductor of the same ring group.
///
/// ## Validation criteria
/// 1. Exactly one claim succeeds
/// 2. The loser cannot release or change the mode
/// 3. After release the loser can claim
#[tokio::test]
async fn test_conductor_claim_release_reclaim() {
    let cluster = MemoryCluster::new();
    let a = connect(&cluster).await;
    let b = connect(&cluster).await;
    setup(&a).await;
    assert!(eventually(|| async { b.ring_group("prod").await.unwrap().is_some() }).await);
    let rg_a = a.ring_group("prod").await.unwrap().unwrap();
    let rg_b = b.ring_group("prod").await.unwrap().unwrap();

    let (claimed_a, claimed_b) = tokio::join!(
        rg_a.claim_conductor(ConductorMode::Active),
        rg_b.claim_conductor(ConductorMode::Active)
    );
    let (claimed_a, claimed_b) = (claimed_a.unwrap(), claimed_b.unwrap());
    assert!(claimed_a ^ claimed_b);
    let (holder, loser) = if claimed_a { (&rg_a, &rg_b) } else { (&rg_b, &rg_a) };

    let err = loser.release_conductor().await.unwrap_err();
    assert!(matches!(err, Error::Usage(UsageError::ConductorNotHeld { .. })));
    assert!(loser.set_conductor_mode(ConductorMode::Inactive).await.is_err());

    holder.set_conductor_mode(ConductorMode::Proactive).await.unwrap();
    assert!(eventually(|| async { loser.conductor_mode() == Some(ConductorMode::Proactive) }).await);

    holder.release_conductor().await.unwrap();
    assert!(eventually(|| async { !loser.is_conductor_online() }).await);
    assert!(loser.claim_conductor(ConductorMode::Active).await.unwrap());
    assert!(loser.is_conductor_held().await.unwrap());
    assert!(!holder.is_conductor_held().await.unwrap());
}

#[tokio::test]
async fn test_conductor_released_by_session_expiry() {
    let cluster = MemoryCluster::new();
    let observer = connect(&cluster).await;
    setup(&observer).await;
    let holder_store = cluster.connect();
    let holder = Coordinator::connect(
        holder_store.clone(),
        Default::default(),
        ringkeeper::StrategyRegistry::with_defaults(),
    )
    .await
    .unwrap();
    let rg = holder.ring_group("prod").await.unwrap().unwrap();
    assert!(rg.claim_conductor(ConductorMode::Active).await.unwrap());
    let observed = observer.ring_group("prod").await.unwrap().unwrap();
    assert!(eventually(|| async { observed.is_conductor_online() }).await);

    cluster.expire_session(holder_store.session_id());

    assert!(eventually(|| async { holder.is_session_expired() }).await);
    assert!(eventually(|| async { !observed.is_conductor_online() }).await);
    assert!(observed.claim_conductor(ConductorMode::Active).await.unwrap());
}
