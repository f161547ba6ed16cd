//! Keeps the active policy up to date.
//!
//! Reloads are triggered by a signal, which re-reads the policy from its configured location, or
//! by a change to the policy's etcd key, which carries the new policy with it. A reload that fails
//! is logged and leaves the previously active policy in place.

use crate::source::{Fetcher, PolicySnapshot};
use anyhow::{Context, Result};
use futures::prelude::*;
use remote_abac_core::{Authorizer, PolicyEngine, PolicyLocation};
use remote_abac_etcd as etcd;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How long to wait before resuming a watch that failed.
pub const WATCH_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// A source of policy updates.
#[async_trait::async_trait]
pub trait PolicyWatch: Send {
    /// Waits for the policy to change and returns its new contents.
    async fn next(&mut self) -> Result<String>;
}

/// Compiles policies and publishes them to an [`Authorizer`].
pub struct Reloader<P: PolicyEngine> {
    descriptor: String,
    location: PolicyLocation,
    fetcher: Fetcher,
    engine: Arc<P>,
    authorizer: Authorizer<P::Engine>,

    // Serializes reloads so that writes to the scratch file aren't interleaved with compilation.
    reloading: Mutex<()>,
}

// === impl Reloader ===

impl<P: PolicyEngine> Reloader<P> {
    /// Loads the initial policy from `descriptor`.
    ///
    /// Any failure is returned; there is no policy to fall back to yet.
    pub async fn load(
        descriptor: impl Into<String>,
        fetcher: Fetcher,
        engine: P,
    ) -> Result<(Self, PolicySnapshot)> {
        let descriptor = descriptor.into();
        let location = descriptor
            .parse::<PolicyLocation>()
            .with_context(|| format!("invalid policy location: {descriptor}"))?;
        let snapshot = fetcher.fetch(&location).await?;

        let engine = Arc::new(engine);
        let compiled = compile(&engine, snapshot.path.clone()).await?;
        info!(%location, "Loaded policy");

        let reloader = Self {
            descriptor,
            location,
            fetcher,
            engine,
            authorizer: Authorizer::new(compiled),
            reloading: Mutex::new(()),
        };
        Ok((reloader, snapshot))
    }

    /// The location the initial policy was loaded from.
    pub fn location(&self) -> &PolicyLocation {
        &self.location
    }

    pub fn authorizer(&self) -> &Authorizer<P::Engine> {
        &self.authorizer
    }

    /// Re-reads the policy from its configured location and publishes it.
    pub async fn reload(&self) -> Result<()> {
        let _reloading = self.reloading.lock().await;

        let location = self
            .descriptor
            .parse::<PolicyLocation>()
            .with_context(|| format!("invalid policy location: {}", self.descriptor))?;
        let snapshot = self.fetcher.fetch(&location).await?;
        let compiled = compile(&self.engine, snapshot.path).await?;
        self.authorizer.set(compiled);
        info!(%location, "Reloaded policy");
        Ok(())
    }

    /// Writes `policy` to the scratch file and publishes it.
    pub async fn install(&self, policy: String) -> Result<()> {
        let _reloading = self.reloading.lock().await;

        let scratch = self.fetcher.scratch();
        scratch.write(policy).await?;
        let compiled = compile(&self.engine, scratch.path().to_path_buf()).await?;
        self.authorizer.set(compiled);
        info!(path = %scratch.path().display(), "Installed updated policy");
        Ok(())
    }

    /// Reloads the policy each time `triggers` yields, until `shutdown` completes or the triggers
    /// end.
    pub async fn on_signal<T>(&self, triggers: T, shutdown: impl Future<Output = ()>)
    where
        T: Stream<Item = ()>,
    {
        tokio::pin!(triggers);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Signal reloader shutting down");
                    return;
                }

                trigger = triggers.next() => {
                    if trigger.is_none() {
                        debug!("Reload triggers ended");
                        return;
                    }
                    info!("Reloading policy");
                    if let Err(error) = self.reload().await {
                        warn!(
                            error = format_args!("{error:#}"),
                            "Failed to reload policy; keeping the active policy"
                        );
                    }
                }
            }
        }
    }

    /// Installs each update reported by `watch`, until `shutdown` completes.
    ///
    /// A watch error is followed by a `backoff` pause before the watch resumes.
    pub async fn on_change<W: PolicyWatch>(
        &self,
        mut watch: W,
        backoff: Duration,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);
        loop {
            let res = tokio::select! {
                _ = &mut shutdown => {
                    debug!("Policy watch shutting down");
                    return;
                }
                res = watch.next() => res,
            };

            match res {
                Ok(policy) => {
                    if let Err(error) = self.install(policy).await {
                        warn!(
                            error = format_args!("{error:#}"),
                            "Failed to install updated policy; keeping the active policy"
                        );
                    }
                }
                Err(error) => {
                    warn!(
                        error = format_args!("{error:#}"),
                        ?backoff,
                        "Policy watch failed"
                    );
                    tokio::select! {
                        _ = &mut shutdown => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }
}

async fn compile<P: PolicyEngine>(engine: &Arc<P>, path: PathBuf) -> Result<P::Engine> {
    let engine = engine.clone();
    tokio::task::spawn_blocking(move || {
        engine
            .compile(&path)
            .with_context(|| format!("failed to compile {}", path.display()))
    })
    .await?
}

// === impl PolicyWatch ===

#[async_trait::async_trait]
impl PolicyWatch for etcd::Watcher {
    async fn next(&mut self) -> Result<String> {
        let node = etcd::Watcher::next(self)
            .await
            .with_context(|| format!("failed to watch {}", self.key()))?;
        Ok(node.value)
    }
}
