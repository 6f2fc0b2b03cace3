use std::sync::Arc;

use flowstage::{
    derive, from_fn, identity, receive, receive_errors, ExecContext, Stage, StageConfig,
    StageError, StageResult,
};

#[tokio::test]
async fn from_fn_adapts_a_closure_into_a_processor() {
    let stage = Stage::with_workers(1, from_fn(|_ctx, input: StageResult<u32>| input.map(|v| v * 2)));
    let (mut rx, _bridge) = receive(&stage);

    stage.data(ExecContext::new(), 21).await;
    stage.shutdown().await;

    assert_eq!(rx.recv().await, Some(42));
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn derive_builds_and_subscribes_in_one_step() {
    let head = identity::<u32>(StageConfig::workers(1));
    let doubled = derive(Some(&head), StageConfig::workers(1), |_ctx, input: StageResult<u32>| {
        input.map(|v| v * 2)
    });
    let (mut rx, _bridge) = receive(&doubled);

    head.data(ExecContext::new(), 5).await;
    head.shutdown().await;
    doubled.shutdown().await;

    assert_eq!(rx.recv().await, Some(10));
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn receive_bridges_every_value_and_closes_with_the_stage() {
    let stage = identity::<u64>(StageConfig::workers(4));
    let (mut rx, _bridge) = receive(&stage);

    let consumer = tokio::spawn(async move {
        let mut got = Vec::new();
        while let Some(v) = rx.recv().await {
            got.push(v);
        }
        got
    });

    for v in 0..100u64 {
        stage.data(ExecContext::new(), v).await;
    }
    stage.shutdown().await;

    let mut got = consumer.await.unwrap();
    assert_eq!(got.len(), 100);
    got.sort_unstable();
    assert_eq!(got, (0..100).collect::<Vec<_>>());
}

#[tokio::test]
async fn receive_errors_bridges_only_failures() {
    let stage = identity::<u32>(StageConfig::workers(2));
    let (mut rx, _bridge) = receive_errors(&stage);

    stage.data(ExecContext::new(), 1).await;
    stage
        .error(ExecContext::new(), StageError::processor("boom"))
        .await;
    stage.shutdown().await;

    assert_eq!(rx.recv().await, Some(StageError::Processor("boom".into())));
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn identity_passes_errors_through_unchanged() {
    let head = identity::<String>(StageConfig::workers(1));
    let tap = identity::<String>(StageConfig::workers(1));
    head.subscribe(Arc::clone(&tap));
    let (mut rx, _bridge) = receive_errors(&tap);

    head.error(ExecContext::new(), StageError::processor("upstream"))
        .await;
    head.shutdown().await;
    tap.shutdown().await;

    assert_eq!(
        rx.recv().await,
        Some(StageError::Processor("upstream".into()))
    );
    assert_eq!(rx.recv().await, None);
}
