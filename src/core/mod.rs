//! Core domain models for the runtime
//!
//! Messages, errors, configuration and the lifecycle every managed
//! component shares.

pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod id;
pub mod lifecycle;
pub mod message;
pub mod service;

pub use error::{CoreError, CoreResult};
pub use lifecycle::{ComponentState, Lifecycle, LifecycleManager};
pub use message::Message;
pub use service::Service;
