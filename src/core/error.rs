//! Error taxonomy shared by every component

use crate::core::lifecycle::ComponentState;
use thiserror::Error;

/// Boxed cause carried inside a [`CoreError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used across the runtime
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by managed components
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid configuration, detected before a component is initialised
    #[error("configuration error in {component}: {reason}")]
    Configuration { component: String, reason: String },

    /// A resource could not be acquired within its retry policy
    #[error("connection error in {component} for {resource}: {source}")]
    Connection {
        component: String,
        resource: String,
        #[source]
        source: BoxError,
    },

    /// A processing step failed
    #[error("processing error in {component}: {source}")]
    Processing {
        component: String,
        #[source]
        source: BoxError,
    },

    /// Fan-out tasks did not complete in time
    #[error("timeout in {component}: {timed_out} of {total} task(s) did not complete")]
    Timeout {
        component: String,
        timed_out: usize,
        total: usize,
    },

    /// Illegal lifecycle transition or out-of-state operation
    #[error("state error in {component}: cannot {operation} while {state}")]
    State {
        component: String,
        operation: String,
        state: ComponentState,
    },
}

impl CoreError {
    pub fn configuration(component: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::Configuration {
            component: component.into(),
            reason: reason.into(),
        }
    }

    pub fn connection(
        component: impl Into<String>,
        resource: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        CoreError::Connection {
            component: component.into(),
            resource: resource.into(),
            source: source.into(),
        }
    }

    pub fn processing(component: impl Into<String>, source: impl Into<BoxError>) -> Self {
        CoreError::Processing {
            component: component.into(),
            source: source.into(),
        }
    }

    pub fn state(
        component: impl Into<String>,
        operation: impl Into<String>,
        state: ComponentState,
    ) -> Self {
        CoreError::State {
            component: component.into(),
            operation: operation.into(),
            state,
        }
    }

    /// Name of the component that raised the error
    pub fn component(&self) -> &str {
        match self {
            CoreError::Configuration { component, .. }
            | CoreError::Connection { component, .. }
            | CoreError::Processing { component, .. }
            | CoreError::Timeout { component, .. }
            | CoreError::State { component, .. } => component,
        }
    }

    /// Only connection failures are ever retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Connection { .. })
    }

    pub fn is_state(&self) -> bool {
        matches!(self, CoreError::State { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CoreError::Timeout { .. })
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, CoreError::Processing { .. })
    }
}
