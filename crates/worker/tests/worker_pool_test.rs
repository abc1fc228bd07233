use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use validator_core::{PoolEvent, TaskPriority, ValidatorError};
use validator_testing_utils::{
    patient_with, test_pool_config, MockEngineFactory, TaskBuilder, TestEnv,
};
use validator_worker::WorkerPool;

fn pool_with(factory: &MockEngineFactory, max_workers: usize) -> WorkerPool {
    WorkerPool::new(test_pool_config(max_workers), Arc::new(factory.clone())).unwrap()
}

async fn wait_until_busy(pool: &WorkerPool, busy: usize) {
    let ready = TestEnv::wait_for(
        || async move { pool.metrics().await.busy_workers == busy },
        Duration::from_secs(5),
    )
    .await;
    assert!(ready, "pool never reached {busy} busy workers");
}

async fn next_matching<F>(rx: &mut broadcast::Receiver<PoolEvent>, mut predicate: F) -> PoolEvent
where
    F: FnMut(&PoolEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("expected pool event was not emitted")
}

#[tokio::test]
async fn test_submit_and_complete() {
    let factory = MockEngineFactory::new();
    let pool = pool_with(&factory, 2);

    let result = pool.execute(TaskBuilder::new("p1").build()).await.unwrap();
    assert_eq!(result.resource_id.as_deref(), Some("p1"));
    assert!(result.is_valid);

    let metrics = pool.metrics().await;
    assert_eq!(metrics.tasks_completed, 1);
    assert_eq!(metrics.total_workers, 1);
    assert_eq!(metrics.idle_workers, 1);
    assert_eq!(metrics.queue_depth, 0);
    assert!(metrics.accepting);
    assert_eq!(metrics.workers[0].tasks_processed, 1);
}

#[tokio::test]
async fn test_priority_order_with_single_worker() {
    let factory = MockEngineFactory::new();
    let probe = factory.probe();
    let pool = pool_with(&factory, 1);

    let blocker = pool
        .submit(
            TaskBuilder::new("blocker")
                .with_resource(patient_with("blocker", json!({"mockDelayMs": 200})))
                .build(),
        )
        .await
        .unwrap();
    wait_until_busy(&pool, 1).await;

    let mut handles = Vec::new();
    for (id, priority) in [
        ("l1", TaskPriority::Low),
        ("n1", TaskPriority::Normal),
        ("h1", TaskPriority::High),
        ("n2", TaskPriority::Normal),
        ("h2", TaskPriority::High),
    ] {
        let task = TaskBuilder::new(id).with_priority(priority).build();
        handles.push(pool.submit(task).await.unwrap());
    }

    blocker.result().await.unwrap();
    for handle in handles {
        handle.result().await.unwrap();
    }

    assert_eq!(
        probe.execution_order(),
        vec!["blocker", "h1", "h2", "n1", "n2", "l1"]
    );
}

#[tokio::test]
async fn test_queue_full_rejects_submission() {
    let factory = MockEngineFactory::new();
    let mut config = test_pool_config(1);
    config.max_queue_depth = 2;
    let pool = WorkerPool::new(config, Arc::new(factory.clone())).unwrap();

    let blocker = pool
        .submit(
            TaskBuilder::new("blocker")
                .with_resource(patient_with("blocker", json!({"mockDelayMs": 200})))
                .build(),
        )
        .await
        .unwrap();
    wait_until_busy(&pool, 1).await;

    let first = pool.submit(TaskBuilder::new("q1").build()).await.unwrap();
    let second = pool.submit(TaskBuilder::new("q2").build()).await.unwrap();
    let rejected = pool.submit(TaskBuilder::new("q3").build()).await;
    assert!(matches!(
        rejected,
        Err(ValidatorError::QueueFull { max_depth: 2 })
    ));
    assert_eq!(pool.metrics().await.queue_depth, 2);

    blocker.result().await.unwrap();
    first.result().await.unwrap();
    second.result().await.unwrap();
}

#[tokio::test]
async fn test_timeout_replaces_worker() {
    let factory = MockEngineFactory::new();
    let pool = pool_with(&factory, 1);
    let mut events = pool.subscribe();

    let hung = TaskBuilder::new("hung")
        .with_resource(patient_with("hung", json!({"mockDelayMs": 3000})))
        .with_timeout(Duration::from_millis(100))
        .build();
    let hung_id = hung.id.clone();

    let result = pool.execute(hung).await;
    match result {
        Err(ValidatorError::TaskTimeout { task_id, timeout_ms }) => {
            assert_eq!(task_id, hung_id);
            assert_eq!(timeout_ms, 100);
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    next_matching(&mut events, |e| matches!(e, PoolEvent::TaskTimedOut { .. })).await;

    // 超时后池仍可用，由替代Worker执行
    let ok = pool.execute(TaskBuilder::new("after").build()).await.unwrap();
    assert_eq!(ok.resource_id.as_deref(), Some("after"));

    let replaced = next_matching(&mut events, |e| {
        matches!(e, PoolEvent::WorkerReplaced { .. })
    })
    .await;
    if let PoolEvent::WorkerReplaced { new_worker_id, .. } = replaced {
        assert!(new_worker_id.is_some());
    }

    let metrics = pool.metrics().await;
    assert_eq!(metrics.tasks_timed_out, 1);
    assert_eq!(metrics.workers_restarted, 1);
    assert_eq!(metrics.total_workers, 1);
    assert_eq!(metrics.tasks_completed, 1);
    assert_eq!(factory.probe().engines_created(), 2);
}

#[tokio::test]
async fn test_engine_panic_recovers() {
    let factory = MockEngineFactory::new();
    let pool = pool_with(&factory, 1);

    let crashed = pool
        .execute(
            TaskBuilder::new("boom")
                .with_resource(patient_with("boom", json!({"mockPanic": "segfault simulation"})))
                .build(),
        )
        .await;
    match crashed {
        Err(ValidatorError::WorkerFault(message)) => {
            assert!(message.contains("segfault simulation"))
        }
        other => panic!("expected worker fault, got {other:?}"),
    }

    let ok = pool.execute(TaskBuilder::new("next").build()).await.unwrap();
    assert!(ok.is_valid);

    let metrics = pool.metrics().await;
    assert_eq!(metrics.workers_restarted, 1);
    assert_eq!(metrics.tasks_failed, 1);
    assert_eq!(factory.probe().engines_created(), 2);
}

#[tokio::test]
async fn test_engine_error_keeps_worker() {
    let factory = MockEngineFactory::new();
    let pool = pool_with(&factory, 1);

    let failed = pool
        .execute(
            TaskBuilder::new("bad")
                .with_resource(patient_with("bad", json!({"mockFail": "profile not found"})))
                .build(),
        )
        .await;
    assert!(matches!(failed, Err(ValidatorError::Engine(ref m)) if m == "profile not found"));

    pool.execute(TaskBuilder::new("good").build()).await.unwrap();

    let metrics = pool.metrics().await;
    assert_eq!(metrics.workers_restarted, 0);
    assert_eq!(metrics.tasks_failed, 1);
    assert_eq!(metrics.workers[0].errors, 1);
    assert_eq!(factory.probe().engines_created(), 1);
}

#[tokio::test]
async fn test_worker_count_bounded() {
    let factory = MockEngineFactory::new().with_delay(Duration::from_millis(50));
    let probe = factory.probe();
    let pool = pool_with(&factory, 2);

    let mut handles = Vec::new();
    for i in 0..6 {
        handles.push(
            pool.submit(TaskBuilder::new(&format!("p{i}")).build())
                .await
                .unwrap(),
        );
    }
    for handle in handles {
        handle.result().await.unwrap();
    }

    assert_eq!(probe.executions(), 6);
    assert!(probe.max_concurrency() <= 2);
    assert!(probe.engines_created() <= 2);
    assert!(pool.metrics().await.total_workers <= 2);
}

#[tokio::test]
async fn test_shutdown_drains_in_flight() {
    let factory = MockEngineFactory::new();
    let pool = pool_with(&factory, 1);
    let mut events = pool.subscribe();

    let slow = pool
        .submit(
            TaskBuilder::new("slow")
                .with_resource(patient_with("slow", json!({"mockDelayMs": 200})))
                .build(),
        )
        .await
        .unwrap();
    wait_until_busy(&pool, 1).await;
    let queued = pool.submit(TaskBuilder::new("queued").build()).await.unwrap();

    pool.shutdown(Duration::from_secs(2)).await;

    assert!(slow.result().await.is_ok());
    assert!(matches!(
        queued.result().await,
        Err(ValidatorError::PoolShutdown)
    ));

    let completed = next_matching(&mut events, |e| {
        matches!(e, PoolEvent::ShutdownCompleted { .. })
    })
    .await;
    assert!(matches!(completed, PoolEvent::ShutdownCompleted { forced: false }));

    let metrics = pool.metrics().await;
    assert_eq!(metrics.total_workers, 0);
    assert_eq!(metrics.queue_depth, 0);
    assert!(!metrics.accepting);

    let rejected = pool.submit(TaskBuilder::new("late").build()).await;
    assert!(matches!(rejected, Err(ValidatorError::PoolShutdown)));

    // 重复关闭立即返回
    tokio::time::timeout(Duration::from_millis(500), pool.shutdown(Duration::from_secs(10)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_forces_after_drain_timeout() {
    let factory = MockEngineFactory::new();
    let pool = pool_with(&factory, 1);
    let mut events = pool.subscribe();

    let hung = pool
        .submit(
            TaskBuilder::new("hung")
                .with_resource(patient_with("hung", json!({"mockDelayMs": 3000})))
                .build(),
        )
        .await
        .unwrap();
    wait_until_busy(&pool, 1).await;

    pool.shutdown(Duration::from_millis(100)).await;

    assert!(matches!(
        hung.result().await,
        Err(ValidatorError::PoolShutdown)
    ));
    let completed = next_matching(&mut events, |e| {
        matches!(e, PoolEvent::ShutdownCompleted { .. })
    })
    .await;
    assert!(matches!(completed, PoolEvent::ShutdownCompleted { forced: true }));
    assert_eq!(pool.metrics().await.total_workers, 0);
}

#[tokio::test]
async fn test_reinitialize_after_shutdown() {
    let factory = MockEngineFactory::new();
    let pool = pool_with(&factory, 1);

    pool.execute(TaskBuilder::new("before").build()).await.unwrap();
    pool.shutdown(Duration::from_secs(1)).await;
    assert!(!pool.metrics().await.accepting);

    pool.reinitialize().await.unwrap();
    let result = pool.execute(TaskBuilder::new("after").build()).await.unwrap();
    assert_eq!(result.resource_id.as_deref(), Some("after"));
    assert!(pool.metrics().await.accepting);
}

#[tokio::test]
async fn test_worker_start_failure_is_survivable() {
    let factory = MockEngineFactory::new().failing_creations(1);
    let pool = pool_with(&factory, 1);
    let mut events = pool.subscribe();

    let failed = pool.execute(TaskBuilder::new("first").build()).await;
    assert!(matches!(failed, Err(ValidatorError::WorkerFault(_))));
    next_matching(&mut events, |e| {
        matches!(e, PoolEvent::WorkerRestartFailed { .. })
    })
    .await;

    let ok = pool.execute(TaskBuilder::new("second").build()).await.unwrap();
    assert_eq!(ok.resource_id.as_deref(), Some("second"));
}

#[tokio::test]
async fn test_update_config_changes_queue_depth() {
    let factory = MockEngineFactory::new();
    let pool = pool_with(&factory, 1);

    let mut config = test_pool_config(1);
    config.max_queue_depth = 1;
    pool.update_config(config).await.unwrap();

    let blocker = pool
        .submit(
            TaskBuilder::new("blocker")
                .with_resource(patient_with("blocker", json!({"mockDelayMs": 200})))
                .build(),
        )
        .await
        .unwrap();
    wait_until_busy(&pool, 1).await;

    let queued = pool.submit(TaskBuilder::new("q1").build()).await.unwrap();
    assert!(matches!(
        pool.submit(TaskBuilder::new("q2").build()).await,
        Err(ValidatorError::QueueFull { max_depth: 1 })
    ));

    let mut invalid = test_pool_config(1);
    invalid.max_workers = 0;
    assert!(matches!(
        pool.update_config(invalid).await,
        Err(ValidatorError::Configuration(_))
    ));

    blocker.result().await.unwrap();
    queued.result().await.unwrap();
}

#[tokio::test]
async fn test_cold_start_burst_not_rejected_while_workers_start() {
    let factory = MockEngineFactory::new().with_startup_delay(Duration::from_millis(300));
    let engines = factory.probe();
    let mut config = test_pool_config(4);
    config.max_queue_depth = 1;
    let pool = WorkerPool::new(config, Arc::new(factory.clone())).unwrap();

    // 引擎仍在加载时，可启动的Worker各自认领一个任务
    let mut handles = Vec::new();
    for i in 0..5 {
        let handle = pool
            .submit(TaskBuilder::new(&format!("p{i}")).build())
            .await
            .unwrap();
        handles.push(handle);
    }
    let metrics = pool.metrics().await;
    assert_eq!(metrics.total_workers, 0);
    assert_eq!(metrics.queue_depth, 5);

    // 全部Worker名额已被认领后，超出深度上限的提交被拒绝
    assert!(matches!(
        pool.submit(TaskBuilder::new("p5").build()).await,
        Err(ValidatorError::QueueFull { max_depth: 1 })
    ));

    for handle in handles {
        assert!(handle.result().await.unwrap().is_valid);
    }
    assert_eq!(engines.engines_created(), 4);
    assert_eq!(pool.metrics().await.total_workers, 4);
}

#[tokio::test]
async fn test_abandoned_queued_tasks_are_not_executed() {
    let factory = MockEngineFactory::new();
    let engines = factory.probe();
    let pool = pool_with(&factory, 1);

    let blocker = pool
        .submit(
            TaskBuilder::new("blocker")
                .with_resource(patient_with("blocker", json!({"mockDelayMs": 200})))
                .build(),
        )
        .await
        .unwrap();
    wait_until_busy(&pool, 1).await;

    let mut abandoned = Vec::new();
    for i in 0..3 {
        abandoned.push(pool.submit(TaskBuilder::new(&format!("a{i}")).build()).await.unwrap());
    }
    let kept = pool.submit(TaskBuilder::new("kept").build()).await.unwrap();
    assert_eq!(pool.metrics().await.queue_depth, 4);
    drop(abandoned);

    blocker.result().await.unwrap();
    let result = kept.result().await.unwrap();
    assert_eq!(result.resource_id.as_deref(), Some("kept"));

    assert_eq!(engines.execution_order(), vec!["blocker", "kept"]);
    let metrics = pool.metrics().await;
    assert_eq!(metrics.tasks_discarded, 3);
    assert_eq!(metrics.queue_depth, 0);
}
