//! Destinations for routed events

use super::Event;
use crate::core::{
    error::{CoreError, CoreResult},
    lifecycle::{Lifecycle, LifecycleManager},
    message::Message,
};
use crate::transport::Producer;
use async_trait::async_trait;
use tracing::{debug, info};

/// Delivers events somewhere
#[async_trait]
pub trait EventSender: Lifecycle {
    async fn send(&mut self, event: &Event) -> CoreResult<()>;
}

#[async_trait]
impl<T: EventSender + ?Sized> EventSender for Box<T> {
    async fn send(&mut self, event: &Event) -> CoreResult<()> {
        (**self).send(event).await
    }
}

/// Writes events to the log at INFO
#[derive(Debug)]
pub struct LoggingEventSender {
    lifecycle: LifecycleManager,
}

impl LoggingEventSender {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            lifecycle: LifecycleManager::new(name),
        }
    }
}

#[async_trait]
impl Lifecycle for LoggingEventSender {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }
}

#[async_trait]
impl EventSender for LoggingEventSender {
    async fn send(&mut self, event: &Event) -> CoreResult<()> {
        info!(
            sender = %self.lifecycle.name(),
            event_id = %event.unique_id,
            event_type = %event.event_type,
            namespace = %event.namespace,
            source = %event.source_id,
            "event"
        );
        Ok(())
    }
}

/// Discards events
#[derive(Debug)]
pub struct NullEventSender {
    lifecycle: LifecycleManager,
}

impl NullEventSender {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            lifecycle: LifecycleManager::new(name),
        }
    }
}

#[async_trait]
impl Lifecycle for NullEventSender {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }
}

#[async_trait]
impl EventSender for NullEventSender {
    async fn send(&mut self, event: &Event) -> CoreResult<()> {
        debug!(sender = %self.lifecycle.name(), event_id = %event.unique_id, "event discarded");
        Ok(())
    }
}

/// Serialises events as JSON messages and hands them to a producer it owns
pub struct ProducerEventSender {
    lifecycle: LifecycleManager,
    producer: Box<dyn Producer>,
}

impl ProducerEventSender {
    pub fn new(name: impl Into<String>, producer: Box<dyn Producer>) -> Self {
        Self {
            lifecycle: LifecycleManager::new(name),
            producer,
        }
    }
}

#[async_trait]
impl Lifecycle for ProducerEventSender {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Lifecycle> {
        vec![&mut self.producer as &mut dyn Lifecycle]
    }
}

#[async_trait]
impl EventSender for ProducerEventSender {
    async fn send(&mut self, event: &Event) -> CoreResult<()> {
        let body = serde_json::to_string(event).map_err(|e| CoreError::processing(self.lifecycle.name(), e))?;
        let mut msg = Message::with_id(event.unique_id.clone(), body);
        msg.set_metadata("event-type", event.event_type.clone());
        self.producer.produce(&msg).await
    }
}
