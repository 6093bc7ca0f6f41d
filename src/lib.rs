//! pipeline-runtime - lifecycle-governed message workflows

pub mod cli;
pub mod connection;
pub mod core;
pub mod events;
pub mod execution;
pub mod services;
pub mod transport;

// Re-export commonly used types
pub use connection::{Connection, RetryingConnection};
pub use core::{ComponentState, CoreError, CoreResult, Lifecycle, Message, Service};
pub use events::{Event, EventRouter};
pub use execution::{ParallelExecutionCoordinator, PipelineExecutor, ServiceChain, Workflow};
