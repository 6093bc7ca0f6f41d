//! Message execution: chains, fan-out and workflows

pub mod chain;
pub mod coordinator;
pub mod split_join;
pub mod workflow;

pub use chain::ServiceChain;
pub use coordinator::{ExceptionStrategy, JoinResult, ParallelExecutionCoordinator, TaskOutcome};
pub use split_join::{PayloadSplitter, PooledSplitJoinService};
pub use workflow::{Delivery, FailureHandler, LoggingFailureHandler, ProducerFailureHandler, Workflow};

/// The workflow is the pipeline executor: one managed unit per message flow
pub type PipelineExecutor = Workflow;
