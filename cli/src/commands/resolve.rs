//! `soci-registry resolve` and `soci-registry media-type` commands.

use clap::Args;

use super::GlobalArgs;

#[derive(Args)]
pub struct ResolveArgs {
    /// Image reference (e.g., "public.ecr.aws/lambda/python:3.10")
    pub image: String,
}

#[derive(Args)]
pub struct MediaTypeArgs {
    /// Image reference (e.g., "public.ecr.aws/lambda/python:3.10")
    pub image: String,
}

pub async fn execute(global: &GlobalArgs, args: ResolveArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = super::interrupt_token();
    let (client, target) = super::connect(global, &args.image, &cancel).await?;

    let descriptor = client
        .resolve(target.repository(), target.reference(), &cancel)
        .await?;
    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}

pub async fn execute_media_type(
    global: &GlobalArgs,
    args: MediaTypeArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = super::interrupt_token();
    let (client, target) = super::connect(global, &args.image, &cancel).await?;

    let media_type = client
        .get_media_type(target.repository(), target.reference(), &cancel)
        .await?;
    println!("{}", media_type);
    Ok(())
}
