use std::future::Future;
use std::time::Duration;

use ringkeeper::Coordinator;
use ringkeeper::CoordinatorConfig;
use ringkeeper::MemoryCluster;
use ringkeeper::StrategyRegistry;

pub const WAIT: Duration = Duration::from_secs(5);

pub async fn connect(cluster: &MemoryCluster) -> Coordinator {
    Coordinator::connect(
        cluster.connect(),
        CoordinatorConfig::default(),
        StrategyRegistry::with_defaults(),
    )
    .await
    .expect("coordinator connects")
}

/// Polls `check` until it holds or [`WAIT`] elapses.
pub async fn eventually<F, Fut>(check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
