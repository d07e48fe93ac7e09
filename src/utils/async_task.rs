use std::future::Future;

use tokio::task::JoinHandle;
use tracing::error;
use tracing::warn;

use crate::config::BackoffPolicy;
use crate::Result;

/// Spawns a named background task whose failure is logged rather than propagated.
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
) -> JoinHandle<()>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    // Clone the name so it can be safely moved into the async block
    let name = name.to_string();
    tokio::spawn(async move {
        if let Err(e) = task_fn().await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    })
}

/// Runs `task` until it succeeds or fails with something other than `ConnectionLoss`,
/// sleeping per `policy` between attempts.
pub(crate) async fn retry_on_connection_loss<F, T, P>(
    task: F,
    policy: BackoffPolicy,
) -> Result<P>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let mut attempts = 0;
    loop {
        match task().await {
            Ok(r) => return Ok(r),
            Err(e) if e.is_retryable() && policy.allows(attempts + 1) => {
                attempts += 1;
                warn!(attempts, "retrying after {:?}", e);
                tokio::time::sleep(policy.delay_for(attempts)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
