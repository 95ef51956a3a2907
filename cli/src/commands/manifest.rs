//! `soci-registry manifest` command.

use clap::Args;

use super::GlobalArgs;

#[derive(Args)]
pub struct ManifestArgs {
    /// Image reference (e.g., "public.ecr.aws/docker/library/redis:7")
    pub image: String,
}

pub async fn execute(global: &GlobalArgs, args: ManifestArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = super::interrupt_token();
    let (client, target) = super::connect(global, &args.image, &cancel).await?;

    let summary = client
        .get_manifest(target.repository(), target.reference(), &cancel)
        .await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
