//! Test: Lifecycle ordering across a whole workflow tree

use crate::helpers::*;
use pipeline_runtime::core::lifecycle::{init_and_start, stop_and_close, ComponentState, Lifecycle};
use pipeline_runtime::execution::{ServiceChain, Workflow};

fn workflow(journal: &Journal, consumer: Recorder) -> Workflow {
    let mut chain = ServiceChain::direct("chain");
    chain.add_step(Recorder::new("step-a", journal)).unwrap();
    chain.add_step(Recorder::new("step-b", journal)).unwrap();
    Workflow::new(
        "orders",
        Recorder::new("connection", journal),
        consumer,
        chain,
        Recorder::new("producer", journal),
    )
}

/// Children come up in registration order and go down in reverse
#[tokio::test]
async fn test_start_forward_stop_reverse() {
    let journal = Journal::default();
    let mut wf = workflow(&journal, Recorder::new("consumer", &journal));

    init_and_start(&mut wf).await.unwrap();
    assert_eq!(
        journal.with_suffix("init"),
        vec!["connection", "producer", "step-a", "step-b", "consumer"]
    );
    assert_eq!(
        journal.with_suffix("start"),
        vec!["connection", "producer", "step-a", "step-b", "consumer"]
    );

    stop_and_close(&mut wf).await.unwrap();
    assert_eq!(
        journal.with_suffix("stop"),
        vec!["consumer", "step-b", "step-a", "producer", "connection"]
    );
    assert_eq!(
        journal.with_suffix("close"),
        vec!["consumer", "step-b", "step-a", "producer", "connection"]
    );
    assert_eq!(wf.state(), ComponentState::Closed);
}

/// A failing child stops init; the parent keeps its state and close cleans up
#[tokio::test]
async fn test_child_init_failure_then_close_from_root() {
    let journal = Journal::default();
    let mut wf = workflow(&journal, Recorder::failing_init("consumer", &journal));

    let err = wf.init().await.unwrap_err();
    assert_eq!(err.component(), "consumer");
    assert_eq!(wf.state(), ComponentState::Closed);
    assert_eq!(wf.connection().state(), ComponentState::Initialized);
    assert_eq!(wf.chain().state(), ComponentState::Initialized);

    wf.close().await.unwrap();
    assert_eq!(wf.connection().state(), ComponentState::Closed);
    assert_eq!(wf.chain().state(), ComponentState::Closed);
    assert_eq!(
        journal.with_suffix("close"),
        vec!["step-b", "step-a", "producer", "connection"]
    );
}

/// A failing child stops start; closing the root stops what did come up first
#[tokio::test]
async fn test_child_start_failure_then_close_from_root() {
    let journal = Journal::default();
    let mut wf = workflow(&journal, Recorder::failing_start("consumer", &journal));

    let err = init_and_start(&mut wf).await.unwrap_err();
    assert_eq!(err.component(), "consumer");
    assert_eq!(wf.state(), ComponentState::Initialized);
    assert_eq!(wf.connection().state(), ComponentState::Started);
    assert_eq!(wf.chain().state(), ComponentState::Started);

    stop_and_close(&mut wf).await.unwrap();
    assert_eq!(wf.state(), ComponentState::Closed);
    assert_eq!(wf.connection().state(), ComponentState::Closed);
    assert_eq!(wf.chain().state(), ComponentState::Closed);
    assert_eq!(
        journal.with_suffix("stop"),
        vec!["step-b", "step-a", "producer", "connection"]
    );
    assert_eq!(
        journal.with_suffix("close"),
        vec!["consumer", "step-b", "step-a", "producer", "connection"]
    );
}

/// Walks the whole state graph, including restart from Stopped
#[tokio::test]
async fn test_state_graph_walk() {
    let journal = Journal::default();
    let mut wf = workflow(&journal, Recorder::new("consumer", &journal));

    // nothing to stop yet
    assert!(wf.stop().await.unwrap_err().is_state());
    wf.init().await.unwrap();
    wf.init().await.unwrap();
    assert_eq!(journal.with_suffix("init").len(), 5);

    wf.start().await.unwrap();
    assert!(wf.init().await.unwrap_err().is_state());
    assert!(wf.close().await.unwrap_err().is_state());

    wf.stop().await.unwrap();
    assert_eq!(wf.state(), ComponentState::Stopped);
    wf.start().await.unwrap();
    assert_eq!(wf.state(), ComponentState::Started);
    assert_eq!(journal.with_suffix("start").len(), 10);

    stop_and_close(&mut wf).await.unwrap();
    wf.init().await.unwrap();
    assert_eq!(wf.state(), ComponentState::Initialized);
}
