//! `soci-registry push` command: push a graph from an OCI layout.

use std::path::PathBuf;

use clap::Args;
use soci_registry::{ArtifactDescriptor, ContentStore, OciLayoutStore};

use super::GlobalArgs;
use crate::image::ImageTarget;

#[derive(Args)]
pub struct PushArgs {
    /// Target image reference (e.g., "123456789012.dkr.ecr.us-east-1.amazonaws.com/app:v1")
    pub image: String,

    /// OCI layout directory holding the graph
    #[arg(long)]
    pub layout: PathBuf,

    /// Tag or digest of the root inside the layout (defaults to the target's tag or digest)
    #[arg(long)]
    pub from: Option<String>,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(global: &GlobalArgs, args: PushArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = super::interrupt_token();
    let (client, target) = super::connect(global, &args.image, &cancel).await?;
    let store = OciLayoutStore::open(&args.layout)?;

    let root = resolve_root(&store, &args, &target).await?;

    if !args.quiet {
        eprintln!("Pushing {} ({})...", target, root.media_type);
    }

    if target.target.reference.is_digest() {
        client
            .push(&store, &root, target.repository(), &cancel)
            .await?;
    } else {
        client
            .push_tagged(&store, &root, target.repository(), target.reference(), &cancel)
            .await?;
    }

    if args.quiet {
        println!("{}", root.digest);
    } else {
        println!("Pushed: {} ({})", target, root.digest);
    }
    Ok(())
}

/// Find the graph root in the layout: `--from` if given, else the target's
/// tag or digest. A digest target must name the root it receives.
async fn resolve_root(
    store: &dyn ContentStore,
    args: &PushArgs,
    target: &ImageTarget,
) -> Result<ArtifactDescriptor, Box<dyn std::error::Error>> {
    let source = args.from.as_deref().unwrap_or_else(|| target.reference());
    let root = store.resolve(source).await.map_err(|_| {
        format!(
            "'{}' not found in layout {}. Pull or build it first.",
            source,
            args.layout.display()
        )
    })?;

    if target.target.reference.is_digest() && root.digest != target.reference() {
        return Err(format!(
            "'{}' resolves to {}, which does not match the target digest {}",
            source,
            root.digest,
            target.reference()
        )
        .into());
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use soci_registry::media_type;

    async fn layout_with(
        tmp: &tempfile::TempDir,
        tag: &str,
        content: &[u8],
    ) -> (OciLayoutStore, ArtifactDescriptor) {
        let store = OciLayoutStore::open(tmp.path()).unwrap();
        let desc = ArtifactDescriptor::from_content(media_type::OCI_MANIFEST, content);
        store.push(&desc, content.to_vec()).await.unwrap();
        store.tag(&desc, tag).await.unwrap();
        (store, desc)
    }

    fn args(tmp: &tempfile::TempDir, from: Option<&str>) -> PushArgs {
        PushArgs {
            image: String::new(),
            layout: tmp.path().to_path_buf(),
            from: from.map(str::to_string),
            quiet: true,
        }
    }

    #[tokio::test]
    async fn test_resolve_root_by_target_tag() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (store, desc) = layout_with(&tmp, "v1", br#"{"schemaVersion":2}"#).await;
        let target = ImageTarget::parse("localhost:5000/app:v1").unwrap();

        let root = resolve_root(&store, &args(&tmp, None), &target).await.unwrap();
        assert_eq!(root.digest, desc.digest);
    }

    #[tokio::test]
    async fn test_resolve_root_digest_target_must_match() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (store, desc) = layout_with(&tmp, "latest", br#"{"schemaVersion":2}"#).await;

        let target = ImageTarget::parse(&format!("localhost:5000/app@{}", desc.digest)).unwrap();
        let root = resolve_root(&store, &args(&tmp, Some("latest")), &target)
            .await
            .unwrap();
        assert_eq!(root.digest, desc.digest);

        let other = format!("sha256:{}", "0".repeat(64));
        let target = ImageTarget::parse(&format!("localhost:5000/app@{}", other)).unwrap();
        let err = resolve_root(&store, &args(&tmp, Some("latest")), &target)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not match the target digest"));
    }

    #[tokio::test]
    async fn test_resolve_root_missing_from_layout() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (store, _) = layout_with(&tmp, "latest", br#"{"schemaVersion":2}"#).await;
        let target = ImageTarget::parse("localhost:5000/app:v9").unwrap();

        let err = resolve_root(&store, &args(&tmp, None), &target).await.unwrap_err();
        assert!(err.to_string().contains("not found in layout"));
    }
}
