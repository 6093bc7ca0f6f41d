//! Test: Split/join over a worker pool under each exception strategy

use async_trait::async_trait;
use pipeline_runtime::core::config::CoordinatorConfig;
use pipeline_runtime::core::error::{CoreError, CoreResult};
use pipeline_runtime::core::lifecycle::{init_and_start, stop_and_close, Lifecycle, LifecycleManager};
use pipeline_runtime::core::message::Message;
use pipeline_runtime::core::service::Service;
use pipeline_runtime::execution::coordinator::ExceptionStrategy;
use pipeline_runtime::execution::split_join::{
    PayloadSplitter, PooledSplitJoinService, ServiceFactory, PARENT_MESSAGE_ID_KEY,
};
use pipeline_runtime::execution::ParallelExecutionCoordinator;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const FLAG: &str = "part-ok";

/// Worker that understands a few part commands:
/// `boom` fails, `flag` raises the success flag, `slow` sleeps past any test deadline
struct PartWorker {
    lifecycle: LifecycleManager,
    parents: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Lifecycle for PartWorker {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }
}

#[async_trait]
impl Service for PartWorker {
    async fn process(&mut self, msg: &mut Message) -> CoreResult<()> {
        if let Some(parent) = msg.metadata(PARENT_MESSAGE_ID_KEY) {
            self.parents.lock().unwrap().push(parent.to_string());
        }
        let content = msg.content().into_owned();
        match content.as_str() {
            "boom" => return Err(CoreError::processing("part-worker", "part exploded")),
            "flag" => msg.set_metadata(FLAG, "true"),
            "slow" => tokio::time::sleep(Duration::from_secs(10)).await,
            _ => {}
        }
        msg.set_content(&format!("<{}>", content));
        Ok(())
    }
}

fn split_join(
    strategy: ExceptionStrategy,
    timeout_ms: Option<u64>,
) -> (PooledSplitJoinService, Arc<Mutex<Vec<String>>>) {
    let config = CoordinatorConfig {
        max_workers: 3,
        timeout_ms,
    };
    let coordinator = ParallelExecutionCoordinator::new("fan-out", &config, strategy).unwrap();
    let parents = Arc::new(Mutex::new(Vec::new()));
    let seen = parents.clone();
    let factory: ServiceFactory = Arc::new(move || {
        Ok(Box::new(PartWorker {
            lifecycle: LifecycleManager::new("part-worker"),
            parents: seen.clone(),
        }) as Box<dyn Service>)
    });
    let service = PooledSplitJoinService::new(
        "split-join",
        PayloadSplitter::new(",").unwrap(),
        coordinator,
        factory,
    );
    (service, parents)
}

fn flag_strategy() -> ExceptionStrategy {
    ExceptionStrategy::MetadataFlag { key: FLAG.to_string() }
}

/// Five parts, one fails, none flagged: the failure propagates
#[tokio::test]
async fn test_unflagged_failure_propagates() {
    let (mut svc, _) = split_join(flag_strategy(), Some(5_000));
    init_and_start(&mut svc).await.unwrap();

    let mut msg = Message::new("a,b,boom,c,d");
    let err = svc.process(&mut msg).await.unwrap_err();
    assert!(err.is_processing());
    assert!(err.to_string().contains("part exploded"));
    // the original payload is untouched on failure
    assert_eq!(msg.content(), "a,b,boom,c,d");

    // every checked-out worker came back
    assert_eq!(svc.idle_workers().await, 3);
    stop_and_close(&mut svc).await.unwrap();
}

/// Five parts, one fails, one flagged: success with the completed parts joined
#[tokio::test]
async fn test_flagged_part_suppresses_failure() {
    let (mut svc, parents) = split_join(flag_strategy(), Some(5_000));
    init_and_start(&mut svc).await.unwrap();

    let mut msg = Message::with_id("parent-1", "a,flag,boom,c,d");
    svc.process(&mut msg).await.unwrap();
    assert_eq!(msg.content(), "<a>,<flag>,<c>,<d>");
    assert_eq!(msg.unique_id(), "parent-1");

    let parents = parents.lock().unwrap();
    assert_eq!(parents.len(), 5);
    assert!(parents.iter().all(|p| p == "parent-1"));
}

/// A part still running at the deadline makes the join time out, flag or not
#[tokio::test]
async fn test_timeout_wins_over_flag() {
    let (mut svc, _) = split_join(flag_strategy(), Some(100));
    init_and_start(&mut svc).await.unwrap();

    let mut msg = Message::new("flag,slow,a");
    let err = svc.process(&mut msg).await.unwrap_err();
    match err {
        CoreError::Timeout { timed_out, total, .. } => {
            assert_eq!(timed_out, 1);
            assert_eq!(total, 3);
        }
        other => panic!("Expected timeout, got {:?}", other),
    }
}

/// Ignoring failures joins whatever completed
#[tokio::test]
async fn test_ignore_failures_joins_survivors() {
    let (mut svc, _) = split_join(ExceptionStrategy::IgnoreFailures, None);
    init_and_start(&mut svc).await.unwrap();

    let mut msg = Message::new("boom,x,boom,y");
    svc.process(&mut msg).await.unwrap();
    assert_eq!(msg.content(), "<x>,<y>");
}

/// The pool follows the service lifecycle
#[tokio::test]
async fn test_pool_lifecycle() {
    let (mut svc, _) = split_join(ExceptionStrategy::FirstFailure, None);
    assert_eq!(svc.idle_workers().await, 0);

    init_and_start(&mut svc).await.unwrap();
    assert_eq!(svc.idle_workers().await, 3);

    // more parts than workers still all get processed
    let mut msg = Message::new("1,2,3,4,5,6,7");
    svc.process(&mut msg).await.unwrap();
    assert_eq!(msg.content(), "<1>,<2>,<3>,<4>,<5>,<6>,<7>");

    stop_and_close(&mut svc).await.unwrap();
    assert_eq!(svc.idle_workers().await, 0);
}
