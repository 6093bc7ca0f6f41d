//! Connection that retries transiently failing resource acquisition
//!
//! Attempts run on the calling task and sleep between failures; nothing is
//! spawned. The delay between attempts comes from a [`Backoff`], which
//! defaults to the fixed interval of the [`RetryPolicy`]. There is no
//! exponential growth unless a caller installs a backoff that provides it.

use crate::connection::Connection;
use crate::core::{
    config::RetryPolicy,
    error::{BoxError, CoreError, CoreResult},
    lifecycle::{Lifecycle, LifecycleManager},
};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Failure returned by a [`ResourceFactory`]
#[derive(Debug)]
pub enum AcquireError {
    /// Worth another attempt
    Transient(BoxError),
    /// Retrying cannot help; fail immediately
    Fatal(BoxError),
}

impl AcquireError {
    pub fn transient(cause: impl Into<BoxError>) -> Self {
        AcquireError::Transient(cause.into())
    }

    pub fn fatal(cause: impl Into<BoxError>) -> Self {
        AcquireError::Fatal(cause.into())
    }
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquireError::Transient(e) => write!(f, "transient: {}", e),
            AcquireError::Fatal(e) => write!(f, "fatal: {}", e),
        }
    }
}

/// Produces handles to the external resource
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    type Handle: Send + Sync;

    /// Target of the connection, used in diagnostics
    fn descriptor(&self) -> String;

    async fn acquire(&mut self) -> Result<Self::Handle, AcquireError>;

    /// Give a handle back. Dropping it is enough for most resources.
    async fn release(&mut self, _handle: Self::Handle) {}
}

/// Delay before the next attempt after `attempt` failed (1-based)
pub trait Backoff: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// The same delay after every failure
#[derive(Debug, Clone, Copy)]
pub struct FixedInterval(pub Duration);

impl Backoff for FixedInterval {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// A connection holding at most one handle from its factory
pub struct RetryingConnection<F: ResourceFactory> {
    lifecycle: LifecycleManager,
    policy: RetryPolicy,
    backoff: Box<dyn Backoff>,
    factory: F,
    handle: Option<F::Handle>,
    last_attempts: u32,
}

impl<F: ResourceFactory> RetryingConnection<F> {
    /// Create a connection; the policy is validated here
    pub fn new(name: impl Into<String>, factory: F, policy: RetryPolicy) -> CoreResult<Self> {
        let name = name.into();
        policy.validate(&name)?;
        Ok(Self {
            lifecycle: LifecycleManager::new(name),
            backoff: Box::new(FixedInterval(policy.retry_interval())),
            policy,
            factory,
            handle: None,
            last_attempts: 0,
        })
    }

    /// Replace the delay policy between attempts
    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Box::new(backoff);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn handle(&self) -> Option<&F::Handle> {
        self.handle.as_ref()
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Attempts made by the most recent connect that did any work
    pub fn last_attempts(&self) -> u32 {
        self.last_attempts
    }

    fn exhausted(&self, attempt: u32) -> bool {
        !self.policy.is_unlimited() && i64::from(attempt) >= i64::from(self.policy.max_attempts)
    }
}

#[async_trait]
impl<F: ResourceFactory> Lifecycle for RetryingConnection<F> {
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
impl<F: ResourceFactory> Connection for RetryingConnection<F> {
    async fn connect(&mut self) -> CoreResult<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let name = self.lifecycle.name().to_string();
        let resource = self.factory.descriptor();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.last_attempts = attempt;

            let cause = match self.factory.acquire().await {
                Ok(handle) => {
                    self.handle = Some(handle);
                    info!(component = %name, resource = %resource, attempt, "connected");
                    return Ok(());
                }
                Err(AcquireError::Fatal(cause)) => {
                    error!(component = %name, resource = %resource, error = %cause, "connection failed permanently");
                    return Err(CoreError::connection(name, resource, cause));
                }
                Err(AcquireError::Transient(cause)) => cause,
            };

            if attempt == 1 {
                warn!(
                    component = %name,
                    resource = %resource,
                    attempt,
                    error = ?cause,
                    "connection attempt failed"
                );
            }

            if self.exhausted(attempt) {
                error!(
                    component = %name,
                    resource = %resource,
                    attempts = attempt,
                    "connection attempts exhausted"
                );
                return Err(CoreError::connection(name, resource, cause));
            }

            let delay = self.backoff.delay(attempt);
            if attempt > 1 {
                warn!(
                    component = %name,
                    resource = %resource,
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    "connection attempt failed, retrying in {:?}",
                    delay
                );
            }
            debug!(component = %name, error = %cause, "retry cause");
            tokio::time::sleep(delay).await;
        }
    }

    async fn disconnect(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.factory.release(handle).await;
            info!(component = %self.lifecycle.name(), "disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    fn descriptor(&self) -> String {
        self.factory.descriptor()
    }
}
