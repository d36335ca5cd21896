//! Properties that must hold for every task, fan-out and schedule.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chaos_core::cluster::{classify_in_progress, ClusterEvent, ClusterEventBus, RecoveryAction};
use chaos_core::constants::{args, helpers};
use chaos_core::events::EventPublisher;
use chaos_core::execution::{CommandRunner, RetryPolicy};
use chaos_core::models::{EndpointSpec, FaultTarget, ScheduleStatus, TaskPayload};
use chaos_core::orchestration::{
    CommandFaultCapability, EndpointGroupResolver, ExecutionContext, FanOutTrigger, SingleTaskExecutor,
    TargetSelector, TaskHelper,
};
use chaos_core::persistence::{InMemoryStore, ScheduleRepository, TaskRepository};
use chaos_core::state_machine::TaskStatus;
use chaos_core::test_helpers::{RecordingExecutor, RecordingExecutorFactory};
use chaos_core::ChaosError;
use common::*;
use proptest::prelude::*;

fn fan_out_trigger(seed: u64) -> FanOutTrigger<EndpointGroupResolver> {
    let retry = RetryPolicy::new(1, Duration::from_millis(1));
    let command: Arc<dyn TaskHelper> = Arc::new(SingleTaskExecutor::new(
        helpers::COMMAND_FAULT,
        Arc::new(CommandFaultCapability::new(Arc::new(
            RecordingExecutorFactory::with_executor(Arc::new(RecordingExecutor::new())),
        ))),
        CommandRunner::new(Duration::from_millis(1), retry),
        retry,
    ));
    FanOutTrigger::new(
        helpers::ENDPOINT_GROUP_TRIGGER,
        EndpointGroupResolver,
        Arc::new(TargetSelector::seeded(seed)),
        command.clone(),
        command,
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime")
}

fn ipv4() -> impl Strategy<Value = String> {
    (1u8..=4, 1u8..=8).prop_map(|(subnet, host)| format!("10.0.{subnet}.{host}"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A network-partition child never partitions its own endpoint from itself
    #[test]
    fn network_partition_children_exclude_own_host(
        hosts in prop::collection::vec(ipv4(), 1..8),
        target_hosts in prop::collection::vec(ipv4(), 1..5),
        seed in any::<u64>(),
    ) {
        let targets: Vec<EndpointSpec> = target_hosts
            .iter()
            .enumerate()
            .map(|(i, host)| EndpointSpec::new(format!("node-{i}"), Some(host.clone())))
            .collect();
        let trigger = fan_out_trigger(seed);
        let mut parent = trigger
            .init(TaskPayload::FanOut(network_partition_group(targets, hosts.clone())), None)
            .unwrap();
        let store = Arc::new(InMemoryStore::new());
        let ctx = ExecutionContext::new("node-a", store, EventPublisher::default());

        let outcome = tokio_test::block_on(trigger.execute(&mut parent, &ctx)).unwrap();

        prop_assert_eq!(outcome.children.len(), target_hosts.len());
        for child in &outcome.children {
            let fault = child.fault();
            let own = fault.endpoint_host().unwrap().to_string();
            let FaultTarget::NetworkPartition { hosts: child_hosts } = &fault.target else {
                panic!("child lost its partition target");
            };
            prop_assert!(!child_hosts.contains(&own));
            prop_assert!(!fault.args[args::HOSTS].split(';').any(|h| h == own));
            for host in child_hosts {
                prop_assert!(hosts.contains(host));
            }
        }
    }

    /// After triggering children an injection parent has children or failed
    #[test]
    fn injection_fan_out_has_children_or_failed(count in 0usize..5, random in any::<bool>()) {
        let rt = runtime();
        let parent = rt.block_on(async {
            let cluster = TestCluster::new();
            let node = cluster.started_node("10.0.0.100", 1).await;
            let parent = node
                .submit_fault(helpers::ENDPOINT_GROUP_TRIGGER, TaskPayload::FanOut(endpoint_group(count, random)))
                .await;
            node.runner().wait_for_children().await;
            match parent {
                Ok(task) => task,
                Err(ChaosError::InvariantViolated(_)) => {
                    let stored = cluster.cluster.store().list_tasks_by_status(TaskStatus::Failed).await.unwrap();
                    stored.into_iter().find(|t| t.is_fan_out()).unwrap()
                }
                Err(e) => panic!("unexpected error {e}"),
            }
        });

        prop_assert!(!parent.child_task_ids.is_empty() || parent.task_status == TaskStatus::Failed);
        if count == 0 {
            prop_assert_eq!(parent.task_status, TaskStatus::Failed);
        }
    }

    /// Recovery queues strictly inside the window and fails at or beyond it
    #[test]
    fn recovery_window_is_strict(window_minutes in 1i64..120, offset_seconds in -600i64..600) {
        let cluster = TestCluster::new();
        let node = cluster.node("10.0.0.100", 1);
        let mut task = node
            .create_task(helpers::COMMAND_FAULT, TaskPayload::Single(two_step_fault("web-1", "10.0.0.1")), None)
            .unwrap();
        let now = chrono::Utc::now();
        let window = chrono::Duration::minutes(window_minutes);
        task.push_trigger("gone");
        task.triggers[0].start_time = now - window + chrono::Duration::seconds(offset_seconds);

        let expected = if offset_seconds > 0 { RecoveryAction::Queue } else { RecoveryAction::Fail };
        prop_assert_eq!(classify_in_progress(&task, now, window), expected);
    }
}

#[tokio::test]
async fn test_every_attempt_has_exactly_one_current_trigger() {
    let cluster = TestCluster::new();
    let node = cluster.started_node("10.0.0.100", 1).await;

    let first = node
        .submit_fault(
            helpers::COMMAND_FAULT,
            TaskPayload::Single(two_step_fault("web-1", "10.0.0.1")),
        )
        .await
        .unwrap();
    assert_eq!(first.triggers.len(), 1);

    let mut rerun = first.clone();
    rerun.reset_for_rerun();
    let second = node.runner().execute(rerun).await.unwrap();

    assert_eq!(second.triggers.len(), 2);
    assert_eq!(second.current_trigger().unwrap(), second.triggers.last().unwrap());
    assert!(second.triggers.iter().all(|t| t.task_status.is_terminal()));
    assert_eq!(second.task_status, second.current_trigger().unwrap().task_status);
}

#[tokio::test]
async fn test_repeated_pause_fails_without_events() {
    let cluster = TestCluster::new();
    let node = cluster.started_node("10.0.0.100", 1).await;

    let mut ids = Vec::new();
    for endpoint in ["web-1", "web-2"] {
        let task = node
            .create_task(
                helpers::COMMAND_FAULT,
                TaskPayload::Single(two_step_fault(endpoint, "10.0.0.1")),
                None,
            )
            .unwrap();
        ids.push(node.schedule_cron(task, "0 30 * * * *").await.unwrap().id);
    }

    node.pause_schedules(&ids).await.unwrap();
    let scheduler = node.scheduler().clone();
    let paused = ids.clone();
    assert!(
        eventually(|| {
            let scheduler = scheduler.clone();
            let paused = paused.clone();
            async move {
                scheduler
                    .list_schedules(Some(ScheduleStatus::Paused))
                    .await
                    .unwrap()
                    .len()
                    == paused.len()
            }
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut bus_events = cluster.cluster.bus().subscribe();
    let mut local_events = node.events().subscribe();
    match node.pause_schedules(&ids).await {
        Err(ChaosError::ScheduleStateMismatch { expected, offenders }) => {
            assert_eq!(expected, "SCHEDULED");
            assert_eq!(offenders.len(), 2);
            assert!(offenders.iter().all(|(_, status)| status == "PAUSED"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(bus_events.try_recv().is_err());
    assert!(local_events.try_recv().is_err());
}

#[tokio::test]
async fn test_failed_arming_leaves_no_documents() {
    let cluster = TestCluster::new();
    let node = cluster.started_node("10.0.0.100", 1).await;
    let store = cluster.cluster.store();

    let task = node
        .create_task(
            helpers::COMMAND_FAULT,
            TaskPayload::Single(two_step_fault("web-1", "10.0.0.1")),
            None,
        )
        .unwrap();
    let id = task.id.clone();

    let err = node.schedule_cron(task, "61 * * * * *").await.unwrap_err();
    assert!(matches!(err, ChaosError::InvalidCronExpression { .. }));
    assert!(store.load_task(&id).await.unwrap().is_none());
    assert!(store.load_schedule(&id).await.unwrap().is_none());
    assert!(!node.scheduler().has_live_timer(&id).await);
}

#[tokio::test]
async fn test_unknown_ids_fail_the_whole_batch() {
    let cluster = TestCluster::new();
    let node = cluster.started_node("10.0.0.100", 1).await;
    let task = node
        .create_task(
            helpers::COMMAND_FAULT,
            TaskPayload::Single(two_step_fault("web-1", "10.0.0.1")),
            None,
        )
        .unwrap();
    let id = node.schedule_cron(task, "0 0 * * * *").await.unwrap().id;

    let mut bus_events = cluster.cluster.bus().subscribe();
    let err = node
        .cancel_schedules(&[id.clone(), "nope".to_string()])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ChaosError::UnknownSchedules {
            ids: vec!["nope".to_string()]
        }
    );
    assert!(bus_events.try_recv().is_err());
    assert!(node.scheduler().has_live_timer(&id).await);

    node.cancel_schedules(&[id.clone()]).await.unwrap();
    assert_eq!(
        bus_events.try_recv().unwrap(),
        ClusterEvent::ScheduleCommand {
            schedule_id: id,
            action: chaos_core::ScheduleAction::Cancel
        }
    );
}
