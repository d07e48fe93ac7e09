use std::sync::Arc;

use ringkeeper::Coordinator;
use ringkeeper::Host;
use ringkeeper::HostAddress;
use ringkeeper::HostCommand;
use ringkeeper::HostState;
use ringkeeper::MemoryCluster;
use tokio::sync::mpsc;

use crate::common::connect;
use crate::common::eventually;
use crate::common::WAIT;

async fn setup_host(coordinator: &Coordinator) -> Arc<Host> {
    coordinator.add_domain_group("serving").await.unwrap();
    let ring_group = coordinator.add_ring_group("prod", "serving").await.unwrap();
    let ring = ring_group.add_ring(0).await.unwrap();
    ring.add_host(HostAddress::new("node-1", 12345), Default::default())
        .await
        .unwrap()
}

async fn remote_host(coordinator: &Coordinator) -> Arc<Host> {
    let address = HostAddress::new("node-1", 12345);
    assert!(eventually(|| async {
        match coordinator.ring_group("prod").await.unwrap() {
            Some(rg) => rg.ring_for_host(&address).await.unwrap().is_some(),
            None => false,
        }
    })
    .await);
    let ring_group = coordinator.ring_group("prod").await.unwrap().unwrap();
    let ring = ring_group.ring_for_host(&address).await.unwrap().unwrap();
    ring.host(&address).await.unwrap().unwrap()
}

/// # Case 1: Operator enqueues, host process dequeues
///
/// ## Setup
/// An operator coordinator enqueues three commands; the host process consumes them
/// through its own coordinator.
///
/// ## Validation criteria
/// 1. Commands come out in enqueue order
/// 2. The operator observes each as the current command
/// 3. Draining the queue clears the current command
#[tokio::test]
async fn test_commands_flow_fifo_between_sessions() {
    let cluster = MemoryCluster::new();
    let operator = connect(&cluster).await;
    let host_process = connect(&cluster).await;
    let operator_view = setup_host(&operator).await;
    let host = remote_host(&host_process).await;

    for command in [HostCommand::GoToIdle, HostCommand::ExecuteUpdate, HostCommand::ServeData] {
        operator_view.enqueue_command(command).await.unwrap();
    }

    let mut consumed = Vec::new();
    while let Some(command) = host.next_command().await.unwrap() {
        let observed = operator_view.clone();
        assert!(eventually(|| {
            let observed = observed.clone();
            async move { observed.current_command() == Some(command) }
        })
        .await);
        consumed.push(command);
    }

    assert_eq!(
        consumed,
        vec![HostCommand::GoToIdle, HostCommand::ExecuteUpdate, HostCommand::ServeData]
    );
    assert!(eventually(|| async { operator_view.current_command().is_none() }).await);
}

#[tokio::test]
async fn test_command_queue_listener_across_sessions() {
    let cluster = MemoryCluster::new();
    let operator = connect(&cluster).await;
    let host_process = connect(&cluster).await;
    let operator_view = setup_host(&operator).await;
    let host = remote_host(&host_process).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    host.add_command_queue_listener(move |address| {
        let _ = tx.send(address.clone());
    });

    operator_view.enqueue_command(HostCommand::ServeData).await.unwrap();

    let address = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(address, HostAddress::new("node-1", 12345));
    assert_eq!(host.command_queue().await.unwrap(), vec![HostCommand::ServeData]);
}

#[tokio::test]
async fn test_host_state_visible_to_operator() {
    let cluster = MemoryCluster::new();
    let operator = connect(&cluster).await;
    let host_store = cluster.connect();
    let host_process = Coordinator::connect(
        host_store.clone(),
        Default::default(),
        ringkeeper::StrategyRegistry::with_defaults(),
    )
    .await
    .unwrap();
    let operator_view = setup_host(&operator).await;
    let host = remote_host(&host_process).await;

    host.set_state(HostState::Serving).await.unwrap();
    assert!(eventually(|| async { operator_view.state() == HostState::Serving }).await);

    drop(host);
    drop(host_process);
    host_store.close();
    assert!(eventually(|| async { operator_view.state() == HostState::Offline }).await);
}
