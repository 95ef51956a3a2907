//! `soci-registry pull` command.

use std::path::PathBuf;

use clap::Args;
use soci_registry::OciLayoutStore;

use super::GlobalArgs;

#[derive(Args)]
pub struct PullArgs {
    /// Image reference (e.g., "public.ecr.aws/lambda/python:3.10")
    pub image: String,

    /// OCI layout directory to pull into (created if missing)
    #[arg(long)]
    pub layout: PathBuf,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(global: &GlobalArgs, args: PullArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = super::interrupt_token();
    let (client, target) = super::connect(global, &args.image, &cancel).await?;
    let store = OciLayoutStore::open(&args.layout)?;

    if !args.quiet {
        eprintln!("Pulling {}...", target);
    }
    let root = client
        .pull(target.repository(), target.reference(), &store, &cancel)
        .await?;

    if args.quiet {
        println!("{}", root.digest);
    } else {
        println!(
            "Pulled: {} ({}, {})",
            target,
            root.digest,
            args.layout.display()
        );
    }
    Ok(())
}
