//! Scenario-based tests for pipeline-runtime

mod lifecycle_ordering;
mod parallel_join;
mod workflow_flow;
