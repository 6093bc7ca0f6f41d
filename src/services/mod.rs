//! Built-in processing services

pub mod metadata;

pub use metadata::{AddMetadataService, MessageUniqueIdService, StopProcessingService};

use crate::core::{config::ServiceConfig, error::CoreResult, service::Service};
use crate::execution::{
    coordinator::ParallelExecutionCoordinator,
    split_join::{PayloadSplitter, PooledSplitJoinService, ServiceFactory},
};
use std::sync::Arc;

/// Build the service a workflow step names
pub fn build_service(name: &str, config: &ServiceConfig) -> CoreResult<Box<dyn Service>> {
    let service: Box<dyn Service> = match config {
        ServiceConfig::AddMetadata { metadata } => Box::new(AddMetadataService::new(
            name,
            metadata.iter().map(|(k, v)| (k.clone(), v.clone())),
        )),
        ServiceConfig::UniqueId { fixed } => match fixed {
            Some(id) => Box::new(MessageUniqueIdService::fixed(name, id.clone())),
            None => Box::new(MessageUniqueIdService::generated(name)),
        },
        ServiceConfig::StopProcessing => Box::new(StopProcessingService::new(name)),
        ServiceConfig::SplitJoin {
            delimiter,
            coordinator,
            strategy,
            worker,
        } => {
            let pool = ParallelExecutionCoordinator::new(name, coordinator, strategy.clone())?;
            let worker_name = format!("{}-worker", name);
            let worker_config = (**worker).clone();
            // validate the worker once up front
            build_service(&worker_name, &worker_config)?;
            let factory: ServiceFactory = Arc::new(move || build_service(&worker_name, &worker_config));
            Box::new(PooledSplitJoinService::new(
                name,
                PayloadSplitter::new(delimiter.clone())?,
                pool,
                factory,
            ))
        }
    };
    Ok(service)
}
