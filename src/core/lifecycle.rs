//! Component lifecycle state machine
//!
//! Every managed component embeds a [`LifecycleManager`] and implements
//! [`Lifecycle`]. The provided `init`/`start`/`stop`/`close` methods enforce the
//! transition graph and forward each call to the component's children:
//! registration order for `init`/`start`, reverse order for `stop`/`close`.
//!
//! ```text
//! Closed -> Initialized -> Started <-> Stopped -> Closed
//!              \________________________________/ (close)
//! ```

use crate::core::error::{CoreError, CoreResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Lifecycle state of a managed component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentState {
    /// Constructed or fully shut down; configuration may still change
    Closed,
    /// Resources allocated, not yet processing
    Initialized,
    /// Processing
    Started,
    /// Paused; may be started again or closed
    Stopped,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentState::Closed => "Closed",
            ComponentState::Initialized => "Initialized",
            ComponentState::Started => "Started",
            ComponentState::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

/// A requested lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Init,
    Start,
    Stop,
    Close,
}

impl Transition {
    /// State the component is in after the transition succeeds
    pub fn target(self) -> ComponentState {
        match self {
            Transition::Init => ComponentState::Initialized,
            Transition::Start => ComponentState::Started,
            Transition::Stop => ComponentState::Stopped,
            Transition::Close => ComponentState::Closed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Init => "init",
            Transition::Start => "start",
            Transition::Stop => "stop",
            Transition::Close => "close",
        }
    }
}

/// Tracks the state of one component and validates transitions
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    name: String,
    state: ComponentState,
}

impl LifecycleManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ComponentState::Closed,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ComponentState {
        self.state
    }

    /// Validate a transition from the current state.
    ///
    /// Returns `Ok(true)` when the transition must run, `Ok(false)` when the
    /// component is already in the target state.
    pub fn check(&self, transition: Transition) -> CoreResult<bool> {
        use ComponentState::*;

        if self.state == transition.target() {
            return Ok(false);
        }
        let allowed = matches!(
            (self.state, transition),
            (Closed, Transition::Init)
                | (Initialized, Transition::Start)
                | (Stopped, Transition::Start)
                | (Started, Transition::Stop)
                | (Initialized, Transition::Close)
                | (Stopped, Transition::Close)
        );
        if allowed {
            Ok(true)
        } else {
            Err(CoreError::state(&self.name, transition.as_str(), self.state))
        }
    }

    /// Record a completed transition
    pub fn commit(&mut self, transition: Transition) {
        debug!(
            component = %self.name,
            from = %self.state,
            to = %transition.target(),
            "lifecycle transition"
        );
        self.state = transition.target();
    }

    /// Fail unless the component is in `expected`
    pub fn require(&self, expected: ComponentState, operation: &str) -> CoreResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CoreError::state(&self.name, operation, self.state))
        }
    }

    /// Guard for construction-only mutations
    pub fn require_closed(&self, operation: &str) -> CoreResult<()> {
        self.require(ComponentState::Closed, operation)
    }
}

/// A managed component
///
/// Implementors supply the embedded [`LifecycleManager`], their children and
/// optional `on_*` hooks; the transition methods are provided.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    fn lifecycle(&self) -> &LifecycleManager;

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager;

    /// Owned child components in registration order
    fn children_mut(&mut self) -> Vec<&mut dyn Lifecycle> {
        Vec::new()
    }

    async fn on_init(&mut self) -> CoreResult<()> {
        Ok(())
    }

    async fn on_start(&mut self) -> CoreResult<()> {
        Ok(())
    }

    async fn on_stop(&mut self) -> CoreResult<()> {
        Ok(())
    }

    async fn on_close(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        self.lifecycle().name()
    }

    fn state(&self) -> ComponentState {
        self.lifecycle().state()
    }

    /// Initialise children in order, then this component.
    ///
    /// A failing child stops propagation; this component keeps its state and
    /// children already initialised are left as they are.
    async fn init(&mut self) -> CoreResult<()> {
        if !self.lifecycle().check(Transition::Init)? {
            return Ok(());
        }
        for child in self.children_mut() {
            child.init().await?;
        }
        self.on_init().await?;
        self.lifecycle_mut().commit(Transition::Init);
        Ok(())
    }

    async fn start(&mut self) -> CoreResult<()> {
        if !self.lifecycle().check(Transition::Start)? {
            return Ok(());
        }
        for child in self.children_mut() {
            child.start().await?;
        }
        self.on_start().await?;
        self.lifecycle_mut().commit(Transition::Start);
        Ok(())
    }

    /// Stop this component, then its children in reverse order. Best effort.
    async fn stop(&mut self) -> CoreResult<()> {
        if !self.lifecycle().check(Transition::Stop)? {
            return Ok(());
        }
        let name = self.name().to_string();
        if let Err(e) = self.on_stop().await {
            warn!(component = %name, error = %e, "failed to stop cleanly");
        }
        for child in self.children_mut().into_iter().rev() {
            if let Err(e) = child.stop().await {
                warn!(component = %name, child = %child.name(), error = %e, "child failed to stop");
            }
        }
        self.lifecycle_mut().commit(Transition::Stop);
        Ok(())
    }

    /// Close this component, then its children in reverse order. Best effort.
    ///
    /// Children are visited even when this component is already closed, so a
    /// partially initialised tree can be cleaned up from its root. A child left
    /// started by a failed `start` is stopped before it is closed.
    async fn close(&mut self) -> CoreResult<()> {
        let proceed = self.lifecycle().check(Transition::Close)?;
        let name = self.name().to_string();
        if proceed {
            if let Err(e) = self.on_close().await {
                warn!(component = %name, error = %e, "failed to close cleanly");
            }
        }
        for child in self.children_mut().into_iter().rev() {
            if child.state() == ComponentState::Started {
                if let Err(e) = child.stop().await {
                    warn!(component = %name, child = %child.name(), error = %e, "child failed to stop");
                }
            }
            if let Err(e) = child.close().await {
                warn!(component = %name, child = %child.name(), error = %e, "child failed to close");
            }
        }
        if proceed {
            self.lifecycle_mut().commit(Transition::Close);
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Lifecycle + ?Sized> Lifecycle for Box<T> {
    fn lifecycle(&self) -> &LifecycleManager {
        (**self).lifecycle()
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        (**self).lifecycle_mut()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Lifecycle> {
        (**self).children_mut()
    }

    async fn on_init(&mut self) -> CoreResult<()> {
        (**self).on_init().await
    }

    async fn on_start(&mut self) -> CoreResult<()> {
        (**self).on_start().await
    }

    async fn on_stop(&mut self) -> CoreResult<()> {
        (**self).on_stop().await
    }

    async fn on_close(&mut self) -> CoreResult<()> {
        (**self).on_close().await
    }

    async fn init(&mut self) -> CoreResult<()> {
        (**self).init().await
    }

    async fn start(&mut self) -> CoreResult<()> {
        (**self).start().await
    }

    async fn stop(&mut self) -> CoreResult<()> {
        (**self).stop().await
    }

    async fn close(&mut self) -> CoreResult<()> {
        (**self).close().await
    }
}

/// `init` followed by `start`
pub async fn init_and_start(component: &mut (dyn Lifecycle + '_)) -> CoreResult<()> {
    component.init().await?;
    component.start().await
}

/// `stop` (when started) followed by `close`
pub async fn stop_and_close(component: &mut (dyn Lifecycle + '_)) -> CoreResult<()> {
    if component.state() == ComponentState::Started {
        component.stop().await?;
    }
    component.close().await
}

/// Full reset of a started component: stop, close, init, start
pub async fn restart(component: &mut (dyn Lifecycle + '_)) -> CoreResult<()> {
    stop_and_close(component).await?;
    init_and_start(component).await
}
