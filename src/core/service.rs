//! Processing step capability

use crate::core::{error::CoreResult, lifecycle::Lifecycle, message::Message};
use async_trait::async_trait;

/// One unit of message processing
#[async_trait]
pub trait Service: Lifecycle {
    async fn process(&mut self, msg: &mut Message) -> CoreResult<()>;
}

#[async_trait]
impl<T: Service + ?Sized> Service for Box<T> {
    async fn process(&mut self, msg: &mut Message) -> CoreResult<()> {
        (**self).process(msg).await
    }
}
