//! Binary entry point for the Cumulus CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;

use cumulus::{
    AzureConfig, AzureProvider, AzureProviderError, BuildVariable, BuilderConfig, CiConfig,
    HttpRegistry, ImageBuilder, ImageSource, ProcessCommandRunner, ProvisionError,
    ProvisionOrchestrator, ProvisionOutcome, ProvisionRequest, RecordAction, RegistryError,
    StdinPrompter, WorkerImageSpec, registry::Registry, resolve_selection, run_preflight,
};

mod cli;

use cli::{Cli, ProvisionCommand, RegisterImageCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("builder error: {0}")]
    Builder(String),
    #[error("preflight failed: {0}")]
    Preflight(String),
    #[error("selection failed: {0}")]
    Select(String),
    #[error("provisioning failed: {0}")]
    Provision(#[from] ProvisionError<AzureProviderError, RegistryError>),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("summary could not be written: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Provision(command) => provision_command(command).await,
        Cli::RegisterImage(command) => register_image_command(command).await,
    }
}

async fn provision_command(args: ProvisionCommand) -> Result<(), CliError> {
    let mut azure_config =
        AzureConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    if args.subscription.is_some() {
        azure_config.subscription_id = args.subscription.clone();
    }
    if args.location.is_some() {
        azure_config.location = args.location.clone();
    }
    if args.vm_size.is_some() {
        azure_config.vm_size = args.vm_size.clone();
    }

    let ci_config =
        CiConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    ci_config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let image_source = image_source_from_args(&args)?;
    let builder = builder_for(&image_source)?;

    let provider = AzureProvider::new(azure_config.clone())
        .map_err(|err| CliError::Provider(err.to_string()))?;
    let registry = HttpRegistry::new(ci_config.clone())?;

    run_preflight(&provider, &registry, builder.as_ref())
        .await
        .map_err(|err| CliError::Preflight(err.to_string()))?;

    let selection = resolve_selection(
        &provider,
        &StdinPrompter,
        &azure_config,
        !args.non_interactive,
    )
    .await
    .map_err(|err| CliError::Select(err.to_string()))?;

    let request = ProvisionRequest::from_config(&azure_config, &ci_config, &selection, image_source)
        .map_err(|err| CliError::Config(err.to_string()))?;

    let orchestrator = ProvisionOrchestrator::new(provider, builder, registry);
    let outcome = orchestrator.execute(&request).await?;

    write_summary(io::stdout(), &outcome).map_err(|err| CliError::Output(err.to_string()))
}

async fn register_image_command(args: RegisterImageCommand) -> Result<(), CliError> {
    let ci_config =
        CiConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let registry = HttpRegistry::new(ci_config.clone())?;

    registry.check_service().await?;

    let spec = WorkerImageSpec {
        name: args.name.unwrap_or_else(|| ci_config.worker_image.clone()),
        image_uri: args.image,
        build_cloud: ci_config.build_cloud.clone(),
    };
    let outcome = registry.ensure_worker_image(&spec).await?;

    let mut stdout = io::stdout();
    writeln!(
        stdout,
        "build worker image '{}' {}",
        outcome.record.spec.name,
        action_text(outcome.action)
    )
    .map_err(|err| CliError::Output(err.to_string()))
}

fn image_source_from_args(args: &ProvisionCommand) -> Result<ImageSource, CliError> {
    if let Some(uri) = &args.image {
        return Ok(ImageSource::Existing(uri.clone()));
    }
    let variables = args
        .variables
        .iter()
        .map(|pair| BuildVariable::parse(pair))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| CliError::Builder(err.to_string()))?;
    Ok(ImageSource::Build { variables })
}

fn builder_for(
    image_source: &ImageSource,
) -> Result<Option<ImageBuilder<ProcessCommandRunner>>, CliError> {
    if matches!(image_source, ImageSource::Existing(_)) {
        return Ok(None);
    }
    let builder_config =
        BuilderConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let builder = ImageBuilder::with_process_runner(builder_config)
        .map_err(|err| CliError::Builder(err.to_string()))?;
    Ok(Some(builder))
}

const fn action_text(action: RecordAction) -> &'static str {
    match action {
        RecordAction::Created => "created",
        RecordAction::Updated => "updated",
        RecordAction::Unchanged => "unchanged",
    }
}

fn write_summary(mut target: impl Write, outcome: &ProvisionOutcome) -> io::Result<()> {
    writeln!(
        target,
        "service principal: {}",
        outcome.principal.value.name
    )?;
    writeln!(target, "resource group: {}", outcome.resource_group.value.name)?;
    for account in &outcome.storage_accounts {
        writeln!(target, "storage account: {}", account.value.name)?;
    }
    writeln!(target, "virtual network: {}", outcome.network.value.name)?;
    writeln!(
        target,
        "security group: {}",
        outcome.security_group.value.name
    )?;
    writeln!(target, "worker image: {}", outcome.image_uri)?;
    writeln!(
        target,
        "build cloud '{}' {}",
        outcome.build_cloud.record.spec.name,
        action_text(outcome.build_cloud.action)
    )?;
    writeln!(
        target,
        "build worker image '{}' {}",
        outcome.worker_image.record.spec.name,
        action_text(outcome.worker_image.action)
    )?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
