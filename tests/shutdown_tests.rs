use std::time::Duration;

use flowstage::{identity, ExecContext, StageConfig};

#[tokio::test]
async fn shutdown_drains_pending_work() {
    let stage = identity::<u64>(StageConfig::workers(4));
    for v in 0..50 {
        stage.data(ExecContext::new(), v).await;
    }
    stage.shutdown().await;

    let stats = stage.stats();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.completed, 50);
    assert_eq!(stats.workers_running, 0);
    assert!(stats.closed);
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let stage = identity::<u32>(StageConfig::workers(2));
    stage.data(ExecContext::new(), 1).await;

    stage.shutdown().await;
    let first = stage.stats();

    // A second call must not panic, re-close anything, or change counters.
    stage.shutdown().await;
    assert_eq!(stage.stats(), first);
}

#[tokio::test]
async fn close_notify_fires_when_shutdown_completes() {
    let stage = identity::<u32>(StageConfig::workers(2));

    let waiter = {
        let notify = stage.close_notify();
        tokio::spawn(async move {
            notify.notified().await;
        })
    };

    // Not yet closed: the waiter must still be parked.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    stage.shutdown().await;
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("close notification never fired")
        .unwrap();

    // Signals taken after shutdown resolve immediately.
    tokio::time::timeout(Duration::from_millis(100), stage.close_notify().notified())
        .await
        .expect("close notification not observable after shutdown");
}

#[test]
fn pending_returns_to_zero_for_any_submission_sequence() {
    fn prop(values: Vec<u32>) -> bool {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let stage = identity::<u32>(StageConfig::workers(4));
            for v in &values {
                stage.data(ExecContext::new(), *v).await;
            }
            stage.shutdown().await;
            let stats = stage.stats();
            stats.pending == 0 && stats.completed == values.len() as u64 && stats.closed
        })
    }
    quickcheck::quickcheck(prop as fn(Vec<u32>) -> bool);
}
