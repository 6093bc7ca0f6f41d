//! Workflow - connection, consumer, chain and producer managed as one unit

use crate::connection::Connection;
use crate::core::{
    config::{SenderKind, WorkflowConfig},
    error::{CoreError, CoreResult},
    lifecycle::{ComponentState, Lifecycle, LifecycleManager, Transition},
    message::Message,
    service::Service,
};
use crate::events::{
    Event, EventMatcher, EventRouter, EventSender, LoggingEventSender, NullEventSender, ProducerEventSender, Rule,
};
use crate::execution::chain::ServiceChain;
use crate::services::build_service;
use crate::transport::{Consumer, MessageSink, Producer};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Metadata key a [`ProducerFailureHandler`] stores the error text under
pub const FAILURE_REASON_KEY: &str = "workflow-failure-reason";

/// Namespace of every event a workflow publishes
pub const EVENT_NAMESPACE: &str = "workflow";

/// Prefix of lifecycle event types, followed by `.init`, `.start`, ...
pub const LIFECYCLE_EVENT: &str = "WorkflowLifecycleEvent";
pub const MESSAGE_PROCESSED_EVENT: &str = "MessageProcessedEvent";
pub const MESSAGE_FAILED_EVENT: &str = "MessageFailedEvent";

const INBOX_CAPACITY: usize = 64;

/// Receives messages the workflow could not process
#[async_trait]
pub trait FailureHandler: Lifecycle {
    /// `msg` is the message as it was delivered, before any step ran
    async fn handle(&mut self, msg: Message, error: &CoreError) -> CoreResult<()>;
}

#[async_trait]
impl<T: FailureHandler + ?Sized> FailureHandler for Box<T> {
    async fn handle(&mut self, msg: Message, error: &CoreError) -> CoreResult<()> {
        (**self).handle(msg, error).await
    }
}

/// Logs the failure and drops the message
#[derive(Debug)]
pub struct LoggingFailureHandler {
    lifecycle: LifecycleManager,
}

impl LoggingFailureHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            lifecycle: LifecycleManager::new(name),
        }
    }
}

#[async_trait]
impl Lifecycle for LoggingFailureHandler {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }
}

#[async_trait]
impl FailureHandler for LoggingFailureHandler {
    async fn handle(&mut self, msg: Message, error: &CoreError) -> CoreResult<()> {
        error!(
            component = %self.lifecycle.name(),
            message_id = %msg.unique_id(),
            error = %error,
            "message failed"
        );
        Ok(())
    }
}

/// Sends failed messages to a dedicated producer with the error attached
pub struct ProducerFailureHandler {
    lifecycle: LifecycleManager,
    producer: Box<dyn Producer>,
}

impl ProducerFailureHandler {
    pub fn new(name: impl Into<String>, producer: impl Producer + 'static) -> Self {
        Self {
            lifecycle: LifecycleManager::new(name),
            producer: Box::new(producer),
        }
    }
}

#[async_trait]
impl Lifecycle for ProducerFailureHandler {
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
impl FailureHandler for ProducerFailureHandler {
    async fn handle(&mut self, mut msg: Message, error: &CoreError) -> CoreResult<()> {
        msg.set_metadata(FAILURE_REASON_KEY, error.to_string());
        self.producer.produce(&msg).await
    }
}

/// What happened to one delivered message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The chain succeeded and the producer accepted the result
    Produced,
    /// The failure handler received the message
    Failed,
}

/// One consumer feeding one chain feeding one producer
///
/// Child lifecycle order is: event router, connection, producer, failure
/// handler, chain, consumer. The consumer starts last and stops first, so
/// nothing is delivered into a half-started workflow.
pub struct Workflow {
    lifecycle: LifecycleManager,
    events: EventRouter,
    connection: Box<dyn Connection>,
    producer: Box<dyn Producer>,
    failure_handler: Box<dyn FailureHandler>,
    chain: ServiceChain,
    consumer: Box<dyn Consumer>,
    inbox: mpsc::Receiver<Message>,
    processed: u64,
    failed: u64,
}

impl Workflow {
    pub fn new(
        name: impl Into<String>,
        connection: impl Connection + 'static,
        consumer: impl Consumer + 'static,
        chain: ServiceChain,
        producer: impl Producer + 'static,
    ) -> Self {
        let name = name.into();
        let (tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        let mut consumer: Box<dyn Consumer> = Box::new(consumer);
        consumer.register(MessageSink::new(name.clone(), tx));
        Self {
            events: EventRouter::new(format!("{}-events", name), LoggingEventSender::new("event-log")),
            failure_handler: Box::new(LoggingFailureHandler::new(format!("{}-failures", name))),
            lifecycle: LifecycleManager::new(name),
            connection: Box::new(connection),
            producer: Box::new(producer),
            chain,
            consumer,
            inbox,
            processed: 0,
            failed: 0,
        }
    }

    /// Build the chain and event routing a workflow file describes
    ///
    /// `event_output` supplies the producer for rules whose sender is
    /// [`SenderKind::Producer`]; it is called once per such sender.
    pub fn from_config<F>(
        config: &WorkflowConfig,
        connection: impl Connection + 'static,
        consumer: impl Consumer + 'static,
        producer: impl Producer + 'static,
        event_output: F,
    ) -> CoreResult<Self>
    where
        F: Fn() -> Box<dyn Producer>,
    {
        let mut chain = ServiceChain::new(format!("{}-chain", config.name), config.chain.clone())?;
        for step in &config.steps {
            chain.add_boxed_step(build_service(&step.name, &step.service)?, step.options)?;
        }

        let sender = |kind: SenderKind, name: String| -> Box<dyn EventSender> {
            match kind {
                SenderKind::Log => Box::new(LoggingEventSender::new(name)),
                SenderKind::Null => Box::new(NullEventSender::new(name)),
                SenderKind::Producer => Box::new(ProducerEventSender::new(name, event_output())),
            }
        };
        let mut router = EventRouter::new(
            format!("{}-events", config.name),
            sender(config.events.default_sender, "default-sender".to_string()),
        );
        for (index, rule) in config.events.rules.iter().enumerate() {
            let matcher = EventMatcher::regex(&rule.pattern, rule.match_on.iter().copied())?;
            router.add_rule(Rule {
                matcher,
                sender: sender(rule.sender, format!("rule-{}", index)),
            })?;
        }

        let mut workflow = Workflow::new(config.name.clone(), connection, consumer, chain, producer);
        workflow.set_event_router(router)?;
        Ok(workflow)
    }

    pub fn set_failure_handler(&mut self, handler: impl FailureHandler + 'static) -> CoreResult<()> {
        self.lifecycle.require_closed("set failure handler")?;
        self.failure_handler = Box::new(handler);
        Ok(())
    }

    pub fn set_event_router(&mut self, router: EventRouter) -> CoreResult<()> {
        self.lifecycle.require_closed("set event router")?;
        self.events = router;
        Ok(())
    }

    pub fn chain(&self) -> &ServiceChain {
        &self.chain
    }

    pub fn events(&self) -> &EventRouter {
        &self.events
    }

    pub fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    /// Messages produced successfully so far
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Messages handed to the failure handler so far
    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Run one message through the chain and on to the producer
    ///
    /// Chain and producer errors go to the failure handler and are not
    /// returned; an error here means the workflow is not started or the
    /// failure handler itself failed.
    pub async fn on_message(&mut self, mut msg: Message) -> CoreResult<Delivery> {
        self.lifecycle.require(ComponentState::Started, "process message")?;

        let original = msg.clone();
        let outcome = match self.chain.process(&mut msg).await {
            Ok(()) => self.producer.produce(&msg).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.processed += 1;
                debug!(workflow = %self.lifecycle.name(), message_id = %msg.unique_id(), "message produced");
                let destination = self.producer.name().to_string();
                self.publish(MESSAGE_PROCESSED_EVENT, Some(destination)).await;
                Ok(Delivery::Produced)
            }
            Err(err) => {
                self.failed += 1;
                warn!(
                    workflow = %self.lifecycle.name(),
                    message_id = %original.unique_id(),
                    error = %err,
                    "message failed, passing to failure handler"
                );
                let destination = self.failure_handler.name().to_string();
                self.publish(MESSAGE_FAILED_EVENT, Some(destination)).await;
                self.failure_handler.handle(original, &err).await?;
                Ok(Delivery::Failed)
            }
        }
    }

    /// Process every message already waiting in the inbox
    pub async fn process_pending(&mut self) -> CoreResult<usize> {
        let mut count = 0;
        while let Ok(msg) = self.inbox.try_recv() {
            self.on_message(msg).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Process messages until every consumer has released its sink
    pub async fn run_until_closed(&mut self) -> CoreResult<usize> {
        self.lifecycle.require(ComponentState::Started, "run")?;
        let mut count = 0;
        while let Some(msg) = self.inbox.recv().await {
            self.on_message(msg).await?;
            count += 1;
        }
        info!(
            workflow = %self.lifecycle.name(),
            messages = count,
            processed = self.processed,
            failed = self.failed,
            "inbox closed"
        );
        Ok(count)
    }

    /// Publish through the event router; failures are only logged
    async fn publish(&mut self, event_type: &str, destination: Option<String>) {
        let mut event = Event::new(event_type, EVENT_NAMESPACE).from_source(self.lifecycle.name());
        if let Some(destination) = destination {
            event = event.to_destination(destination);
        }
        if let Err(e) = self.events.send(&event).await {
            warn!(workflow = %self.lifecycle.name(), event_type, error = %e, "failed to publish event");
        }
    }

    async fn publish_transition(&mut self, transition: Transition) {
        let event_type = format!("{}.{}", LIFECYCLE_EVENT, transition.as_str());
        self.publish(&event_type, None).await;
    }
}

#[async_trait]
impl Lifecycle for Workflow {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Lifecycle> {
        vec![
            &mut self.events as &mut dyn Lifecycle,
            &mut self.connection as &mut dyn Lifecycle,
            &mut self.producer as &mut dyn Lifecycle,
            &mut self.failure_handler as &mut dyn Lifecycle,
            &mut self.chain as &mut dyn Lifecycle,
            &mut self.consumer as &mut dyn Lifecycle,
        ]
    }

    async fn on_init(&mut self) -> CoreResult<()> {
        info!(
            workflow = %self.lifecycle.name(),
            connection = %self.connection.descriptor(),
            steps = self.chain.len(),
            "workflow initialised"
        );
        self.publish_transition(Transition::Init).await;
        Ok(())
    }

    async fn on_start(&mut self) -> CoreResult<()> {
        self.publish_transition(Transition::Start).await;
        Ok(())
    }

    async fn on_stop(&mut self) -> CoreResult<()> {
        self.publish_transition(Transition::Stop).await;
        Ok(())
    }

    async fn on_close(&mut self) -> CoreResult<()> {
        self.publish_transition(Transition::Close).await;
        info!(
            workflow = %self.lifecycle.name(),
            processed = self.processed,
            failed = self.failed,
            "workflow closed"
        );
        Ok(())
    }
}
