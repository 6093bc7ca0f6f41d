//! Split a message, process the parts concurrently, join the results

use crate::core::{
    error::{CoreError, CoreResult},
    id::{IdGenerator, UuidGenerator},
    lifecycle::{Lifecycle, LifecycleManager},
    message::Message,
    service::Service,
};
use crate::execution::coordinator::ParallelExecutionCoordinator;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Metadata key holding the id of the message a part was split from
pub const PARENT_MESSAGE_ID_KEY: &str = "parent-message-id";

/// Builds one worker instance of the service applied to each part
pub type ServiceFactory = Arc<dyn Fn() -> CoreResult<Box<dyn Service>> + Send + Sync>;

/// Splits the payload on a delimiter
#[derive(Debug, Clone)]
pub struct PayloadSplitter {
    delimiter: String,
}

impl PayloadSplitter {
    pub fn new(delimiter: impl Into<String>) -> CoreResult<Self> {
        let delimiter = delimiter.into();
        if delimiter.is_empty() {
            return Err(CoreError::configuration("payload-splitter", "delimiter must not be empty"));
        }
        Ok(Self { delimiter })
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// One message per non-empty segment, each with a fresh id and a copy of
    /// the parent's metadata
    pub fn split(&self, msg: &Message, ids: &dyn IdGenerator) -> Vec<Message> {
        msg.content()
            .split(self.delimiter.as_str())
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut sub = Message::with_id(ids.next_id(), part);
                for (k, v) in msg.metadata_map() {
                    sub.set_metadata(k.clone(), v.clone());
                }
                sub.set_metadata(PARENT_MESSAGE_ID_KEY, msg.unique_id());
                sub
            })
            .collect()
    }

    /// Concatenate the payloads of `parts` in order
    pub fn join(&self, parts: &[Message]) -> String {
        parts
            .iter()
            .map(|p| p.content().into_owned())
            .collect::<Vec<_>>()
            .join(&self.delimiter)
    }
}

/// Service that fans parts of a message out to a pool of worker services
///
/// The pool holds one started instance per coordinator worker. A part checks
/// an instance out, processes with it and returns it.
pub struct PooledSplitJoinService {
    lifecycle: LifecycleManager,
    splitter: PayloadSplitter,
    coordinator: ParallelExecutionCoordinator,
    factory: ServiceFactory,
    ids: Arc<dyn IdGenerator>,
    pool: Arc<Mutex<Vec<Box<dyn Service>>>>,
}

impl PooledSplitJoinService {
    pub fn new(
        name: impl Into<String>,
        splitter: PayloadSplitter,
        coordinator: ParallelExecutionCoordinator,
        factory: ServiceFactory,
    ) -> Self {
        Self {
            lifecycle: LifecycleManager::new(name),
            splitter,
            coordinator,
            factory,
            ids: Arc::new(UuidGenerator),
            pool: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Number of idle worker instances
    pub async fn idle_workers(&self) -> usize {
        self.pool.lock().await.len()
    }

    /// Close every pooled instance and empty the pool
    async fn drain_pool(&mut self) {
        let mut pool = self.pool.lock().await;
        for svc in pool.iter_mut().rev() {
            if let Err(e) = svc.close().await {
                warn!(component = %self.lifecycle.name(), worker = %svc.name(), error = %e, "worker failed to close");
            }
        }
        pool.clear();
    }
}

#[async_trait]
impl Lifecycle for PooledSplitJoinService {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }

    async fn on_init(&mut self) -> CoreResult<()> {
        let workers = self.coordinator.max_workers();
        for _ in 0..workers {
            let created = (self.factory)();
            let mut svc = match created {
                Ok(svc) => svc,
                Err(e) => {
                    self.drain_pool().await;
                    return Err(e);
                }
            };
            if let Err(e) = svc.init().await {
                self.drain_pool().await;
                return Err(e);
            }
            self.pool.lock().await.push(svc);
        }
        debug!(component = %self.lifecycle.name(), workers, "worker pool initialised");
        Ok(())
    }

    async fn on_start(&mut self) -> CoreResult<()> {
        let mut pool = self.pool.lock().await;
        for svc in pool.iter_mut() {
            svc.start().await?;
        }
        Ok(())
    }

    async fn on_stop(&mut self) -> CoreResult<()> {
        self.coordinator.quiesce().await;
        let mut pool = self.pool.lock().await;
        for svc in pool.iter_mut().rev() {
            svc.stop().await?;
        }
        Ok(())
    }

    async fn on_close(&mut self) -> CoreResult<()> {
        self.coordinator.quiesce().await;
        self.drain_pool().await;
        Ok(())
    }
}

#[async_trait]
impl Service for PooledSplitJoinService {
    async fn process(&mut self, msg: &mut Message) -> CoreResult<()> {
        let parts = self.splitter.split(msg, self.ids.as_ref());
        if parts.is_empty() {
            debug!(component = %self.lifecycle.name(), "nothing to split");
            return Ok(());
        }
        let count = parts.len();

        let pool = self.pool.clone();
        let name = self.lifecycle.name().to_string();
        let result = self
            .coordinator
            .execute(parts, move |mut part: Message| {
                let pool = pool.clone();
                let name = name.clone();
                async move {
                    let checked_out = pool.lock().await.pop();
                    let mut svc = checked_out
                        .ok_or_else(|| CoreError::processing(&name, "no idle worker instance"))?;
                    let outcome = svc.process(&mut part).await;
                    pool.lock().await.push(svc);
                    outcome.map(|_| part)
                }
            })
            .await?;

        let joined = result.into_messages();
        info!(
            component = %self.lifecycle.name(),
            message_id = %msg.unique_id(),
            parts = count,
            joined = joined.len(),
            "split/join complete"
        );
        msg.set_content(&self.splitter.join(&joined));
        Ok(())
    }
}
