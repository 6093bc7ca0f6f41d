//! CLI output formatting

use crate::core::config::{ServiceConfig, StepConfig, WorkflowConfig};
use crate::execution::coordinator::ExceptionStrategy;
use console::Emoji;

// Re-export style
pub use console::style;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Short description of what a step's service does
pub fn describe_service(service: &ServiceConfig) -> String {
    match service {
        ServiceConfig::AddMetadata { metadata } => {
            let keys: Vec<&str> = metadata.keys().map(String::as_str).collect();
            format!("add-metadata [{}]", keys.join(", "))
        }
        ServiceConfig::UniqueId { fixed: Some(id) } => format!("unique-id = {}", id),
        ServiceConfig::UniqueId { fixed: None } => "unique-id (generated)".to_string(),
        ServiceConfig::StopProcessing => "stop-processing".to_string(),
        ServiceConfig::SplitJoin {
            delimiter,
            coordinator,
            strategy,
            worker,
        } => {
            let strategy = match strategy {
                ExceptionStrategy::FirstFailure => "first-failure".to_string(),
                ExceptionStrategy::IgnoreFailures => "ignore-failures".to_string(),
                ExceptionStrategy::MetadataFlag { key } => format!("metadata-flag({})", key),
            };
            format!(
                "split-join on {:?} x{} ({}) -> {}",
                delimiter,
                coordinator.max_workers,
                strategy,
                describe_service(worker)
            )
        }
    }
}

/// One line per step
pub fn format_step(index: usize, step: &StepConfig) -> String {
    let policy = if step.options.continue_on_fail {
        style(" (continue on fail)").yellow().to_string()
    } else {
        String::new()
    };
    format!(
        "  {}. {} {}{}",
        index + 1,
        style(&step.name).cyan(),
        style(describe_service(&step.service)).dim(),
        policy
    )
}

/// Summary printed after a successful validation
pub fn format_workflow_summary(config: &WorkflowConfig) -> String {
    let retry = &config.connection.retry;
    let attempts = if retry.is_unlimited() {
        "unlimited".to_string()
    } else {
        retry.max_attempts.to_string()
    };

    let mut lines = vec![
        format!("  Name: {}", style(&config.name).bold()),
        format!("  Chain mode: {}", style(format!("{:?}", config.chain.mode).to_lowercase()).cyan()),
        format!(
            "  Connection retries: {} every {}ms",
            style(attempts).cyan(),
            retry.retry_interval_ms
        ),
        format!("  Event rules: {}", style(config.events.rules.len()).cyan()),
        format!("  Steps: {}", style(config.steps.len()).cyan()),
    ];
    lines.extend(config.steps.iter().enumerate().map(|(i, s)| format_step(i, s)));
    lines.join("\n")
}
