//! Service chain - runs an ordered list of steps against a message

use crate::core::{
    config::{ChainConfig, ChainMode, StepOptions},
    error::CoreResult,
    filter::MetadataFilter,
    id::{IdGenerator, UuidGenerator},
    lifecycle::{restart, ComponentState, Lifecycle, LifecycleManager},
    message::Message,
    service::Service,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A step and its per-step options
struct StepSlot {
    service: Box<dyn Service>,
    options: StepOptions,
}

/// Ordered list of services executed against one message at a time
///
/// In [`ChainMode::Direct`] the steps operate on the caller's message. In
/// [`ChainMode::Clone`] they operate on a private copy, and only metadata
/// allowed by the override filter is merged back after the whole chain
/// succeeded. A failed invocation leaves the chain usable for the next message.
pub struct ServiceChain {
    lifecycle: LifecycleManager,
    config: ChainConfig,
    filter: MetadataFilter,
    id_generator: Arc<dyn IdGenerator>,
    steps: Vec<StepSlot>,
}

impl ServiceChain {
    /// Create an empty chain, validating the configuration
    pub fn new(name: impl Into<String>, config: ChainConfig) -> CoreResult<Self> {
        let name = name.into();
        let filter = MetadataFilter::from_config(&config.override_metadata_filter, &name)?;
        Ok(Self {
            lifecycle: LifecycleManager::new(name),
            config,
            filter,
            id_generator: Arc::new(UuidGenerator),
            steps: Vec::new(),
        })
    }

    /// An empty direct-mode chain with default options
    pub fn direct(name: impl Into<String>) -> Self {
        Self {
            lifecycle: LifecycleManager::new(name),
            config: ChainConfig::default(),
            filter: MetadataFilter::RemoveAll,
            id_generator: Arc::new(UuidGenerator),
            steps: Vec::new(),
        }
    }

    /// Generator used for fresh ids in clone mode
    pub fn with_id_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = generator;
        self
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.service.name()).collect()
    }

    pub fn step_state(&self, name: &str) -> Option<ComponentState> {
        self.steps
            .iter()
            .find(|s| s.service.name() == name)
            .map(|s| s.service.state())
    }

    /// Append a step with default options
    pub fn add_step(&mut self, service: impl Service + 'static) -> CoreResult<()> {
        self.add_boxed_step(Box::new(service), StepOptions::default())
    }

    /// Append a step; only allowed while the chain is closed
    pub fn add_boxed_step(&mut self, service: Box<dyn Service>, options: StepOptions) -> CoreResult<()> {
        self.lifecycle.require_closed("add step")?;
        self.steps.push(StepSlot { service, options });
        Ok(())
    }

    /// Replace the metadata filter used in clone mode
    pub fn set_override_metadata_filter(&mut self, filter: MetadataFilter) -> CoreResult<()> {
        self.lifecycle.require_closed("change metadata filter")?;
        self.filter = filter;
        Ok(())
    }

    /// Run every step in order against `msg`
    async fn run_steps(&mut self, msg: &mut Message) -> CoreResult<()> {
        let chain = self.lifecycle.name();
        let total = self.steps.len();

        for (index, slot) in self.steps.iter_mut().enumerate() {
            if msg.is_stop_processing() {
                info!(
                    chain = %chain,
                    message_id = %msg.unique_id(),
                    skipped = total - index,
                    "stop-processing set, skipping remaining steps"
                );
                break;
            }

            let step = slot.service.name().to_string();
            debug!(chain = %chain, step = %step, message_id = %msg.unique_id(), "executing step");

            let err = match slot.service.process(msg).await {
                Ok(()) => {
                    msg.append_lifecycle_event(step);
                    continue;
                }
                Err(e) => e,
            };

            if self.config.restart_on_exception {
                warn!(chain = %chain, step = %step, "restarting step after failure");
                if let Err(restart_err) = restart(&mut slot.service).await {
                    error!(
                        chain = %chain,
                        step = %step,
                        original = %err,
                        error = %restart_err,
                        "step restart failed"
                    );
                    return Err(restart_err);
                }
            }

            if slot.options.continue_on_fail {
                warn!(chain = %chain, step = %step, error = %err, "step failed, continuing");
                continue;
            }

            error!(chain = %chain, step = %step, error = %err, "step failed");
            return Err(err);
        }

        Ok(())
    }
}

#[async_trait]
impl Lifecycle for ServiceChain {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Lifecycle> {
        self.steps
            .iter_mut()
            .map(|s| &mut s.service as &mut dyn Lifecycle)
            .collect()
    }
}

#[async_trait]
impl Service for ServiceChain {
    async fn process(&mut self, msg: &mut Message) -> CoreResult<()> {
        self.lifecycle.require(ComponentState::Started, "process")?;

        match self.config.mode {
            ChainMode::Direct => self.run_steps(msg).await,
            ChainMode::Clone => {
                let mut working = msg.clone();
                if self.config.new_unique_id_per_message {
                    working.set_unique_id(self.id_generator.next_id());
                }
                self.run_steps(&mut working).await?;
                let merged = self.filter.merge(&working, msg);
                debug!(chain = %self.lifecycle.name(), merged, "merged metadata from clone");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ServiceChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceChain")
            .field("name", &self.lifecycle.name())
            .field("state", &self.lifecycle.state())
            .field("mode", &self.config.mode)
            .field("steps", &self.step_names())
            .finish()
    }
}
