//! Boundary between a workflow and the outside world

pub mod stdio;

use crate::core::{
    error::{CoreError, CoreResult},
    lifecycle::Lifecycle,
    message::Message,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use stdio::{StdinConsumer, StdoutProducer};

/// Handle a consumer uses to deliver messages into its workflow
#[derive(Debug, Clone)]
pub struct MessageSink {
    owner: String,
    tx: mpsc::Sender<Message>,
}

impl MessageSink {
    pub fn new(owner: impl Into<String>, tx: mpsc::Sender<Message>) -> Self {
        Self {
            owner: owner.into(),
            tx,
        }
    }

    /// Hand a message to the workflow, waiting while its inbox is full
    pub async fn deliver(&self, msg: Message) -> CoreResult<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| CoreError::processing(&self.owner, "workflow inbox closed"))
    }
}

/// Source of inbound messages
#[async_trait]
pub trait Consumer: Lifecycle {
    /// Called once, before init, with the sink to deliver into
    fn register(&mut self, sink: MessageSink);
}

/// Destination for outbound messages
#[async_trait]
pub trait Producer: Lifecycle {
    async fn produce(&mut self, msg: &Message) -> CoreResult<()>;
}

#[async_trait]
impl<T: Consumer + ?Sized> Consumer for Box<T> {
    fn register(&mut self, sink: MessageSink) {
        (**self).register(sink)
    }
}

#[async_trait]
impl<T: Producer + ?Sized> Producer for Box<T> {
    async fn produce(&mut self, msg: &Message) -> CoreResult<()> {
        (**self).produce(msg).await
    }
}
