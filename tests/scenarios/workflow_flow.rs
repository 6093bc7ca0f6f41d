//! Test: Messages flowing from consumer through chain to producer

use crate::helpers::*;
use pipeline_runtime::connection::NullConnection;
use pipeline_runtime::core::config::WorkflowConfig;
use pipeline_runtime::core::lifecycle::{init_and_start, stop_and_close, Lifecycle};
use pipeline_runtime::core::message::Message;
use pipeline_runtime::execution::workflow::{
    Delivery, ProducerFailureHandler, FAILURE_REASON_KEY, MESSAGE_PROCESSED_EVENT,
};
use pipeline_runtime::execution::{ServiceChain, Workflow};
use pipeline_runtime::transport::stdio::LineConsumer;
use pipeline_runtime::transport::Producer;
use std::sync::{Arc, Mutex};

fn tagging_chain(journal: &Journal) -> ServiceChain {
    let mut chain = ServiceChain::direct("chain");
    chain.add_step(Recorder::new("tagger", journal)).unwrap();
    chain
}

/// Every queued message reaches the producer with the chain's changes
#[tokio::test]
async fn test_messages_reach_producer() {
    let journal = Journal::default();
    let producer = MockProducer::new("out");
    let sent = producer.sent();
    let mut wf = Workflow::new(
        "orders",
        Recorder::new("connection", &journal),
        QueueConsumer::new(&["one", "two", "three"]),
        tagging_chain(&journal),
        producer,
    );

    init_and_start(&mut wf).await.unwrap();
    assert_eq!(wf.process_pending().await.unwrap(), 3);
    assert_eq!(wf.processed(), 3);
    assert_eq!(wf.failed(), 0);

    let sent = sent.lock().unwrap();
    let payloads: Vec<String> = sent.iter().map(|m| m.content().into_owned()).collect();
    assert_eq!(payloads, vec!["one", "two", "three"]);
    assert!(sent.iter().all(|m| m.metadata("tagger") == Some("done")));
}

/// A failing step sends the untouched original to the failure handler
#[tokio::test]
async fn test_step_failure_goes_to_failure_handler() {
    let journal = Journal::default();
    let mut chain = tagging_chain(&journal);
    chain.add_step(Recorder::failing("validator", &journal)).unwrap();

    let producer = MockProducer::new("out");
    let sent = producer.sent();
    let dead_letters = MockProducer::new("dead-letter");
    let failed = dead_letters.sent();

    let mut wf = Workflow::new(
        "orders",
        Recorder::new("connection", &journal),
        QueueConsumer::with_messages(vec![Message::with_id("m-1", "bad order")]),
        chain,
        producer,
    );
    wf.set_failure_handler(ProducerFailureHandler::new("failures", dead_letters))
        .unwrap();

    init_and_start(&mut wf).await.unwrap();
    wf.process_pending().await.unwrap();

    assert!(sent.lock().unwrap().is_empty());
    assert_eq!(wf.failed(), 1);
    let failed = failed.lock().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].unique_id(), "m-1");
    assert_eq!(failed[0].content(), "bad order");
    assert!(!failed[0].contains_metadata("tagger"));
    assert!(failed[0]
        .metadata(FAILURE_REASON_KEY)
        .is_some_and(|reason| reason.contains("validator failed on purpose")));
}

/// A producer error counts as a failed message too
#[tokio::test]
async fn test_producer_failure_goes_to_failure_handler() {
    let journal = Journal::default();
    let dead_letters = MockProducer::new("dead-letter");
    let failed = dead_letters.sent();
    let mut wf = Workflow::new(
        "orders",
        Recorder::new("connection", &journal),
        QueueConsumer::new(&[]),
        tagging_chain(&journal),
        MockProducer::failing("out"),
    );
    wf.set_failure_handler(ProducerFailureHandler::new("failures", dead_letters))
        .unwrap();
    init_and_start(&mut wf).await.unwrap();

    let delivery = wf.on_message(Message::new("payload")).await.unwrap();
    assert_eq!(delivery, Delivery::Failed);
    let failed = failed.lock().unwrap();
    assert!(failed[0]
        .metadata(FAILURE_REASON_KEY)
        .is_some_and(|reason| reason.contains("destination unavailable")));
}

/// Messages are refused unless the workflow is started; handlers are fixed once it is
#[tokio::test]
async fn test_requires_started_workflow() {
    let journal = Journal::default();
    let mut wf = Workflow::new(
        "orders",
        Recorder::new("connection", &journal),
        QueueConsumer::new(&[]),
        tagging_chain(&journal),
        MockProducer::new("out"),
    );

    assert!(wf.on_message(Message::new("early")).await.unwrap_err().is_state());
    assert!(wf.run_until_closed().await.unwrap_err().is_state());

    init_and_start(&mut wf).await.unwrap();
    let handler = ProducerFailureHandler::new("late", MockProducer::new("dead-letter"));
    assert!(wf.set_failure_handler(handler).unwrap_err().is_state());

    wf.stop().await.unwrap();
    assert!(wf.on_message(Message::new("late")).await.unwrap_err().is_state());
}

/// A line consumer drives the workflow until its input runs out
#[tokio::test]
async fn test_run_until_input_exhausted() {
    let journal = Journal::default();
    let producer = MockProducer::new("out");
    let sent = producer.sent();
    let mut wf = Workflow::new(
        "lines",
        Recorder::new("connection", &journal),
        LineConsumer::new("reader", &b"first\n\n  \nsecond\n"[..]),
        tagging_chain(&journal),
        producer,
    );

    init_and_start(&mut wf).await.unwrap();
    assert_eq!(wf.run_until_closed().await.unwrap(), 2);
    stop_and_close(&mut wf).await.unwrap();

    let payloads: Vec<String> = sent.lock().unwrap().iter().map(|m| m.content().into_owned()).collect();
    assert_eq!(payloads, vec!["first", "second"]);
}

/// A workflow built from YAML runs its configured steps and event rules
#[tokio::test]
async fn test_from_config() {
    let yaml = r#"
name: enrich
steps:
  - name: tag
    service: add-metadata
    metadata:
      origin: test
  - name: halt
    service: stop-processing
events:
  rules:
    - pattern: "MessageProcessedEvent"
      match: [type]
      sender: producer
  default_sender: "null"
"#;
    let config = WorkflowConfig::from_yaml(yaml).unwrap();
    let producer = MockProducer::new("out");
    let sent = producer.sent();
    let events = Arc::new(Mutex::new(Vec::new()));
    let event_sink = events.clone();

    let mut wf = Workflow::from_config(
        &config,
        NullConnection::new(),
        QueueConsumer::new(&["hello"]),
        producer,
        move || Box::new(MockProducer::sharing("event-out", &event_sink)) as Box<dyn Producer>,
    )
    .unwrap();
    assert_eq!(wf.chain().step_names(), vec!["tag", "halt"]);
    assert_eq!(wf.events().rules().len(), 1);

    init_and_start(&mut wf).await.unwrap();
    wf.process_pending().await.unwrap();
    stop_and_close(&mut wf).await.unwrap();

    let sent = sent.lock().unwrap();
    assert_eq!(sent[0].metadata("origin"), Some("test"));
    assert!(sent[0].is_stop_processing());

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].metadata("event-type"), Some(MESSAGE_PROCESSED_EVENT));
    assert!(events[0].content().contains("\"sourceId\":\"enrich\""));
}
