//! Connections to external resources

pub mod retrying;

use crate::core::{
    error::CoreResult,
    lifecycle::{Lifecycle, LifecycleManager},
};
use async_trait::async_trait;

pub use retrying::{AcquireError, Backoff, FixedInterval, ResourceFactory, RetryingConnection};

/// A managed handle to an external resource
#[async_trait]
pub trait Connection: Lifecycle {
    /// Acquire the resource; a no-op when already connected
    async fn connect(&mut self) -> CoreResult<()>;

    /// Release the resource. Always safe to call, any number of times.
    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Human readable description of the target resource
    fn descriptor(&self) -> String;
}

/// Connection for workflows that need no external resource
#[derive(Debug)]
pub struct NullConnection {
    lifecycle: LifecycleManager,
    connected: bool,
}

impl NullConnection {
    pub fn new() -> Self {
        Self {
            lifecycle: LifecycleManager::new("null-connection"),
            connected: false,
        }
    }
}

impl Default for NullConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Lifecycle for NullConnection {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }

    async fn on_init(&mut self) -> CoreResult<()> {
        self.connect().await
    }

    async fn on_close(&mut self) -> CoreResult<()> {
        self.disconnect().await;
        Ok(())
    }
}

#[async_trait]
impl Connection for NullConnection {
    async fn connect(&mut self) -> CoreResult<()> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn descriptor(&self) -> String {
        "null://".to_string()
    }
}
