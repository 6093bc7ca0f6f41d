use anyhow::{Context, Result};
use pipeline_runtime::cli::commands::{RunCommand, ValidateCommand};
use pipeline_runtime::cli::output::*;
use pipeline_runtime::cli::{Cli, Command};
use pipeline_runtime::connection::{AcquireError, ResourceFactory, RetryingConnection};
use pipeline_runtime::core::config::{OutputFormat, WorkflowConfig};
use pipeline_runtime::core::lifecycle::{init_and_start, stop_and_close};
use pipeline_runtime::execution::Workflow;
use pipeline_runtime::transport::{Producer, StdinConsumer, StdoutProducer};
use async_trait::async_trait;
use tracing::{error, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over --verbose
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_workflow(cmd).await?,
        Command::Validate(cmd) => validate_workflow(cmd)?,
    }

    Ok(())
}

/// Stands in for a real resource: the process's own standard streams
struct StdioFactory;

#[async_trait]
impl ResourceFactory for StdioFactory {
    type Handle = ();

    fn descriptor(&self) -> String {
        "stdio://".to_string()
    }

    async fn acquire(&mut self) -> Result<(), AcquireError> {
        Ok(())
    }
}

async fn run_workflow(cmd: &RunCommand) -> Result<()> {
    let config = WorkflowConfig::from_file(&cmd.file).context("Failed to load workflow config")?;

    eprintln!("{} Loaded workflow: {}", INFO, style(&config.name).bold());

    let connection = RetryingConnection::new(
        format!("{}-connection", config.name),
        StdioFactory,
        config.connection.retry,
    )?;
    let mut workflow = Workflow::from_config(
        &config,
        connection,
        StdinConsumer::stdin(),
        StdoutProducer::stdout(config.output),
        || Box::new(StdoutProducer::stdout(OutputFormat::Payload)) as Box<dyn Producer>,
    )
    .context("Failed to build workflow")?;

    if let Err(e) = init_and_start(&mut workflow).await {
        // tear down whatever part of the tree came up
        stop_and_close(&mut workflow).await.ok();
        return Err(e).context("Failed to start workflow");
    }

    eprintln!("{} Running {}", ROCKET, style(&config.name).bold());
    let result = workflow.run_until_closed().await;
    stop_and_close(&mut workflow).await.context("Failed to shut down workflow")?;

    match result {
        Ok(count) => {
            eprintln!(
                "\n{} {} handled {} message(s): {} produced, {} failed",
                CHECK,
                style(&config.name).bold(),
                count,
                style(workflow.processed()).green(),
                style(workflow.failed()).red()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("\n{} {} {}", CROSS, style(&config.name).bold(), style("failed").red());
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn validate_workflow(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating workflow...", INFO);

    match WorkflowConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Workflow configuration is valid!", CHECK);
            println!("{}", format_workflow_summary(&config));

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}
