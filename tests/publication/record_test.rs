use ringkeeper::DomainDefinition;
use ringkeeper::MemoryCluster;
use ringkeeper::MURMUR64_PARTITIONER;
use ringkeeper::OPAQUE_STORAGE_ENGINE;

use crate::common::connect;

/// # Case 1: A domain definition survives a round trip through the store
///
/// ## Validation criteria
/// 1. A fresh coordinator reads back every field, including the opaque options blob
/// 2. The resolved strategies accept the stored definition
#[tokio::test]
async fn test_domain_definition_round_trip() {
    let cluster = MemoryCluster::new();
    let writer = connect(&cluster).await;
    let options: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    writer
        .add_domain(
            "users",
            DomainDefinition::new(1024)
                .with_storage_engine(OPAQUE_STORAGE_ENGINE, options.clone())
                .with_partitioner(MURMUR64_PARTITIONER)
                .with_required_host_flags(["ssd", "10g"]),
        )
        .await
        .unwrap();

    let reader = connect(&cluster).await;
    let domain = reader.domain("users").await.unwrap().unwrap();
    assert_eq!(domain.num_partitions(), 1024);
    assert_eq!(domain.storage_engine_options(), options);
    assert_eq!(domain.partitioner_id(), MURMUR64_PARTITIONER);
    assert_eq!(domain.required_host_flags().len(), 2);

    let partitioner = reader.partitioner_for(&domain).unwrap();
    for key in 0..1000u32 {
        assert!(partitioner.partition(&key.to_be_bytes(), 1024) < 1024);
    }
    let engine = reader.storage_engine_for(&domain).unwrap();
    assert_eq!(engine.options(), options.as_slice());
}
