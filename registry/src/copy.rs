//! Content-addressable graph copy between two stores.
//!
//! Each unique digest is visited once per copy: concurrent visitors of a
//! shared node wait on the same [`OnceCell`]. A node's successors are written
//! before the node itself, so a manifest present at the destination implies
//! its whole subgraph is present. Store calls are bounded by a semaphore; no
//! permit is held while waiting on children.
//!
//! Manifests are read whole to find their successors. Blobs are streamed
//! from source to destination, verified on the way in.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use soci_registry_core::error::{RegistryError, Result};
use soci_registry_core::ArtifactDescriptor;
use tokio::sync::{OnceCell, Semaphore};

use crate::manifest;
use crate::store::ContentStore;

/// Outcome of a graph copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    /// Nodes transferred to the destination
    pub copied: usize,
    /// Nodes already present at the destination
    pub skipped: usize,
}

struct GraphCopy<'a> {
    src: &'a dyn ContentStore,
    dst: &'a dyn ContentStore,
    permits: Semaphore,
    visited: DashMap<String, Arc<OnceCell<()>>>,
    copied: AtomicUsize,
    skipped: AtomicUsize,
}

impl<'a> GraphCopy<'a> {
    async fn limited<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| RegistryError::transport("copy concurrency limiter closed"))?;
        call.await
    }

    fn copy_node<'b>(&'b self, descriptor: ArtifactDescriptor) -> BoxFuture<'b, Result<()>> {
        async move {
            let cell = Arc::clone(
                self.visited
                    .entry(descriptor.digest.clone())
                    .or_default()
                    .value(),
            );
            cell.get_or_try_init(|| self.transfer(&descriptor)).await?;
            Ok(())
        }
        .boxed()
    }

    async fn transfer(&self, descriptor: &ArtifactDescriptor) -> Result<()> {
        if self.limited(self.dst.exists(descriptor)).await? {
            tracing::debug!(digest = %descriptor.digest, "Already present, skipping");
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        if !descriptor.is_manifest() {
            tracing::debug!(
                digest = %descriptor.digest,
                media_type = %descriptor.media_type,
                size = descriptor.size,
                "Copying blob"
            );
            self.limited(async {
                let content = self.src.fetch_stream(descriptor).await?;
                self.dst.push_stream(descriptor, content).await
            })
            .await?;
            self.copied.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let content = self.limited(self.src.fetch(descriptor)).await?;
        let children = manifest::successors(descriptor, &content)?;
        try_join_all(children.into_iter().map(|child| self.copy_node(child))).await?;

        tracing::debug!(
            digest = %descriptor.digest,
            media_type = %descriptor.media_type,
            size = descriptor.size,
            "Copying manifest"
        );
        self.limited(self.dst.push(descriptor, content)).await?;
        self.copied.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Copy the graph rooted at `root` from `src` to `dst`.
///
/// At most `max_concurrency` store calls are in flight at once.
pub async fn copy_graph(
    src: &dyn ContentStore,
    dst: &dyn ContentStore,
    root: &ArtifactDescriptor,
    max_concurrency: usize,
) -> Result<CopyStats> {
    let copy = GraphCopy {
        src,
        dst,
        permits: Semaphore::new(max_concurrency.max(1)),
        visited: DashMap::new(),
        copied: AtomicUsize::new(0),
        skipped: AtomicUsize::new(0),
    };

    copy.copy_node(root.clone()).await?;

    Ok(CopyStats {
        copied: copy.copied.load(Ordering::Relaxed),
        skipped: copy.skipped.load(Ordering::Relaxed),
    })
}
