//! CLI command definitions and dispatch.

mod manifest;
mod pull;
mod push;
mod resolve;
mod version;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use soci_registry::RegistryClient;
use soci_registry_core::RegistryConfig;
use tokio_util::sync::CancellationToken;

use crate::image::ImageTarget;

/// SOCI Registry: resolve, pull and push OCI artifact graphs.
#[derive(Parser)]
#[command(name = "soci-registry", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// YAML configuration file (environment variables still apply on top)
    #[arg(long, global = true, env = "SOCI_REGISTRY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Maximum concurrent transfers per operation
    #[arg(long, global = true)]
    pub max_concurrency: Option<usize>,
}

impl GlobalArgs {
    /// Build the effective configuration.
    pub fn load_config(&self) -> Result<RegistryConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => RegistryConfig::from_yaml_file(path)?,
            None => RegistryConfig::from_env()?,
        };
        if let Some(max) = self.max_concurrency {
            config.max_concurrency = max;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Describe the manifest an image reference points at
    Resolve(resolve::ResolveArgs),
    /// Print the media type of an image reference
    MediaType(resolve::MediaTypeArgs),
    /// Print a summary of the manifest an image reference points at
    Manifest(manifest::ManifestArgs),
    /// Copy an artifact graph from a registry into an OCI layout
    Pull(pull::PullArgs),
    /// Copy an artifact graph from an OCI layout into a registry
    Push(push::PushArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Cancellation token fired on Ctrl-C.
pub(crate) fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });
    token
}

/// Parse `image` and connect to its registry.
pub(crate) async fn connect(
    global: &GlobalArgs,
    image: &str,
    cancel: &CancellationToken,
) -> Result<(RegistryClient, ImageTarget), Box<dyn std::error::Error>> {
    let target = ImageTarget::parse(image)?;
    let config = global.load_config()?;
    let client = RegistryClient::init(&target.registry, &config, cancel).await?;
    Ok((client, target))
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let global = cli.global;
    match cli.command {
        Command::Resolve(args) => resolve::execute(&global, args).await,
        Command::MediaType(args) => resolve::execute_media_type(&global, args).await,
        Command::Manifest(args) => manifest::execute(&global, args).await,
        Command::Pull(args) => pull::execute(&global, args).await,
        Command::Push(args) => push::execute(&global, args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
