//! Services that touch message metadata and identity

use crate::core::{
    error::CoreResult,
    id::{IdGenerator, UuidGenerator},
    lifecycle::{Lifecycle, LifecycleManager},
    message::Message,
    service::Service,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Sets fixed metadata values, overwriting existing keys
pub struct AddMetadataService {
    lifecycle: LifecycleManager,
    entries: Vec<(String, String)>,
}

impl AddMetadataService {
    pub fn new(name: impl Into<String>, entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            lifecycle: LifecycleManager::new(name),
            entries: entries.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Lifecycle for AddMetadataService {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }
}

#[async_trait]
impl Service for AddMetadataService {
    async fn process(&mut self, msg: &mut Message) -> CoreResult<()> {
        for (key, value) in &self.entries {
            msg.set_metadata(key.clone(), value.clone());
        }
        Ok(())
    }
}

enum IdSource {
    Generated(Arc<dyn IdGenerator>),
    Fixed(String),
}

/// Reassigns the message's unique id
///
/// The only way an id changes inside a chain, other than clone mode with
/// fresh ids enabled.
pub struct MessageUniqueIdService {
    lifecycle: LifecycleManager,
    source: IdSource,
}

impl MessageUniqueIdService {
    pub fn generated(name: impl Into<String>) -> Self {
        Self::with_generator(name, Arc::new(UuidGenerator))
    }

    pub fn with_generator(name: impl Into<String>, generator: Arc<dyn IdGenerator>) -> Self {
        Self {
            lifecycle: LifecycleManager::new(name),
            source: IdSource::Generated(generator),
        }
    }

    pub fn fixed(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            lifecycle: LifecycleManager::new(name),
            source: IdSource::Fixed(id.into()),
        }
    }
}

#[async_trait]
impl Lifecycle for MessageUniqueIdService {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }
}

#[async_trait]
impl Service for MessageUniqueIdService {
    async fn process(&mut self, msg: &mut Message) -> CoreResult<()> {
        let id = match &self.source {
            IdSource::Generated(generator) => generator.next_id(),
            IdSource::Fixed(id) => id.clone(),
        };
        debug!(component = %self.lifecycle.name(), old = %msg.unique_id(), new = %id, "reassigning message id");
        msg.set_unique_id(id);
        Ok(())
    }
}

/// Marks the message so the enclosing chain skips its remaining steps
pub struct StopProcessingService {
    lifecycle: LifecycleManager,
}

impl StopProcessingService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            lifecycle: LifecycleManager::new(name),
        }
    }
}

#[async_trait]
impl Lifecycle for StopProcessingService {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }
}

#[async_trait]
impl Service for StopProcessingService {
    async fn process(&mut self, msg: &mut Message) -> CoreResult<()> {
        msg.stop_processing();
        Ok(())
    }
}
