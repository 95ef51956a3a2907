//! Registry client: resolve, pull and push against one remote registry.

use std::future::Future;
use std::sync::Arc;

use soci_registry_core::error::{RegistryError, Result};
use soci_registry_core::{ArtifactDescriptor, Reference, RegistryConfig, RepositoryReference};
use tokio_util::sync::CancellationToken;

use crate::classifier::ProviderRegistry;
use crate::copy::{copy_graph, CopyStats};
use crate::credentials;
use crate::endpoint::RegistryEndpoint;
use crate::manifest::{parse_manifest, ManifestSummary};
use crate::repository::RemoteRepository;
use crate::store::ContentStore;
use crate::transport::{OciTransport, RegistryTransport};

/// Race `operation` against `cancel`; dropping the operation aborts its
/// in-flight requests.
async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RegistryError::Cancelled),
        result = operation => result,
    }
}

/// Client bound to one remote registry.
///
/// Only constructed fully authorized; afterwards the endpoint is read-only
/// and operations may run concurrently on a shared client.
pub struct RegistryClient {
    endpoint: Arc<RegistryEndpoint>,
    transport: Arc<dyn RegistryTransport>,
    max_concurrency: usize,
}

impl RegistryClient {
    /// Connect to the registry at `url`, injecting managed-registry
    /// credentials when the hostname calls for them.
    pub async fn init(
        url: &str,
        config: &RegistryConfig,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let providers = ProviderRegistry::with_defaults(config);
        Self::init_with_providers(url, config, &providers, cancel).await
    }

    /// Like [`RegistryClient::init`], with an explicit provider list.
    pub async fn init_with_providers(
        url: &str,
        config: &RegistryConfig,
        providers: &ProviderRegistry,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let mut endpoint = RegistryEndpoint::parse(url, config)?;

        if let Some(provider) = providers.provider_for(url) {
            cancellable(
                cancel,
                credentials::authorize(&mut endpoint, provider.as_ref()),
            )
            .await?;
        }

        let endpoint = Arc::new(endpoint);
        let transport = OciTransport::new(Arc::clone(&endpoint))?;

        tracing::info!(
            registry = %endpoint.host(),
            insecure = endpoint.is_insecure(),
            authorized = endpoint.credentials().is_some(),
            "Registry client ready"
        );

        Ok(Self {
            endpoint,
            transport: Arc::new(transport),
            max_concurrency: config.max_concurrency,
        })
    }

    /// Build a client over a caller-supplied transport.
    pub fn with_transport(
        endpoint: RegistryEndpoint,
        transport: Arc<dyn RegistryTransport>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            endpoint: Arc::new(endpoint),
            transport,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn endpoint(&self) -> &RegistryEndpoint {
        &self.endpoint
    }

    /// Handle to one repository of this registry, usable as a [`ContentStore`].
    pub fn repository(&self, name: &str) -> RemoteRepository {
        RemoteRepository::new(Arc::clone(&self.transport), name)
    }

    fn target(repository: &str, reference: &str) -> Result<RepositoryReference> {
        RepositoryReference::new(repository, Reference::parse(reference)?)
    }

    /// Describe the manifest at `repository:reference`.
    pub async fn resolve(
        &self,
        repository: &str,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<ArtifactDescriptor> {
        let target = Self::target(repository, reference)?;
        cancellable(
            cancel,
            self.transport
                .head_manifest(&target.repository, &target.reference),
        )
        .await
    }

    /// Media type of the manifest at `repository:reference`.
    pub async fn get_media_type(
        &self,
        repository: &str,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        Ok(self.resolve(repository, reference, cancel).await?.media_type)
    }

    /// Download and summarize the manifest at `repository:reference`.
    pub async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<ManifestSummary> {
        let target = Self::target(repository, reference)?;
        cancellable(cancel, async {
            let descriptor = self
                .transport
                .head_manifest(&target.repository, &target.reference)
                .await?;
            let content = self
                .transport
                .get_manifest(
                    &target.repository,
                    &Reference::Digest(descriptor.digest.clone()),
                )
                .await?;
            descriptor.verify(&content)?;
            parse_manifest(descriptor, &content)
        })
        .await
    }

    /// Copy the graph at `repository:reference` into `store`.
    ///
    /// Objects already in the store are not downloaded. The root is recorded
    /// in the store under `reference`.
    pub async fn pull(
        &self,
        repository: &str,
        reference: &str,
        store: &dyn ContentStore,
        cancel: &CancellationToken,
    ) -> Result<ArtifactDescriptor> {
        let target = Self::target(repository, reference)?;
        tracing::info!(
            registry = %self.endpoint.host(),
            reference = %target,
            "Pulling artifact graph"
        );

        cancellable(cancel, async {
            let root = self
                .transport
                .head_manifest(&target.repository, &target.reference)
                .await?;
            let remote = self.repository(&target.repository);
            let stats = copy_graph(&remote, store, &root, self.max_concurrency).await?;
            store.tag(&root, target.reference.as_str()).await?;

            tracing::info!(
                reference = %target,
                digest = %root.digest,
                copied = stats.copied,
                skipped = stats.skipped,
                "Pulled artifact graph"
            );
            Ok(root)
        })
        .await
    }

    /// Copy the graph rooted at `root` from `store` into `repository`.
    ///
    /// Objects whose digest already exists remotely are not uploaded. A
    /// registry without OCI artifact support yields `UnsupportedArtifactError`.
    pub async fn push(
        &self,
        store: &dyn ContentStore,
        root: &ArtifactDescriptor,
        repository: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let target = Self::target(repository, &root.digest)?;
        tracing::info!(
            registry = %self.endpoint.host(),
            reference = %target,
            media_type = %root.media_type,
            "Pushing artifact graph"
        );

        let remote = self.repository(&target.repository);
        let stats = cancellable(cancel, copy_graph(store, &remote, root, self.max_concurrency))
            .await
            .map_err(|e| self.log_push_failure(&target, e))?;
        self.log_pushed(&target, stats);
        Ok(())
    }

    /// [`RegistryClient::push`], then point `tag` at `root`.
    pub async fn push_tagged(
        &self,
        store: &dyn ContentStore,
        root: &ArtifactDescriptor,
        repository: &str,
        tag: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let target = Self::target(repository, tag)?;
        if target.reference.is_digest() {
            return Err(RegistryError::InvalidReference(format!(
                "Expected a tag, got digest '{}'",
                tag
            )));
        }

        self.push(store, root, repository, cancel).await?;
        let remote = self.repository(&target.repository);
        cancellable(cancel, remote.tag(root, tag))
            .await
            .map_err(|e| self.log_push_failure(&target, e))?;

        tracing::info!(reference = %target, digest = %root.digest, "Tagged artifact");
        Ok(())
    }

    fn log_push_failure(&self, target: &RepositoryReference, err: RegistryError) -> RegistryError {
        if err.is_recoverable() {
            tracing::warn!(
                registry = %self.endpoint.host(),
                repository = %target.repository,
                error = %err,
                "Registry does not support OCI artifacts"
            );
        }
        err
    }

    fn log_pushed(&self, target: &RepositoryReference, stats: CopyStats) {
        tracing::info!(
            reference = %target,
            copied = stats.copied,
            skipped = stats.skipped,
            "Pushed artifact graph"
        );
    }
}
