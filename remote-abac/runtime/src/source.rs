//! Retrieves policies from their configured location.

use anyhow::{Context, Result};
use remote_abac_core::PolicyLocation;
use remote_abac_etcd as etcd;
use std::{
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info};

/// Bounds each request of an etcd read.
pub const ETCD_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

pub const DEFAULT_SCRATCH_FILE: &str = "/tmp/abac-policy";

/// A policy file that is ready to be compiled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicySnapshot {
    pub path: PathBuf,

    /// The store's modification index of the fetched value, for policies read from etcd.
    pub index: Option<u64>,
}

/// The local file that holds policies read from etcd.
///
/// The file is replaced wholesale on every write, so a reader never observes a partially written
/// policy. It is left readable by all local users.
#[derive(Clone, Debug)]
pub struct ScratchFile(PathBuf);

/// Reads policies from a [`PolicyLocation`].
#[derive(Clone, Debug)]
pub struct Fetcher {
    scratch: ScratchFile,
    timeout: Duration,
}

// === impl ScratchFile ===

impl ScratchFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Replaces the file's contents.
    pub async fn write(&self, contents: String) -> Result<()> {
        let path = self.0.clone();
        tokio::task::spawn_blocking(move || replace(&path, contents.as_bytes()))
            .await?
            .with_context(|| format!("failed to write {}", self.0.display()))?;
        debug!(path = %self.0.display(), "Wrote policy");
        Ok(())
    }
}

impl Default for ScratchFile {
    fn default() -> Self {
        Self::new(DEFAULT_SCRATCH_FILE)
    }
}

/// Writes to a temporary file in the target's directory and renames it over the target.
fn replace(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".abac-policy")
        .tempfile_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// === impl Fetcher ===

impl Fetcher {
    pub fn new(scratch: ScratchFile) -> Self {
        Self {
            scratch,
            timeout: ETCD_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn scratch(&self) -> &ScratchFile {
        &self.scratch
    }

    /// Makes the policy at `location` available as a local file.
    ///
    /// Local files are used in place. Policies stored in etcd are read once, with each request
    /// bounded by a fixed timeout, and written to the scratch file.
    pub async fn fetch(&self, location: &PolicyLocation) -> Result<PolicySnapshot> {
        match location {
            PolicyLocation::File(path) => Ok(PolicySnapshot {
                path: path.clone(),
                index: None,
            }),

            PolicyLocation::Etcd { endpoints, key } => {
                let client = etcd::Client::new(endpoints.iter().cloned())?;
                let node = client
                    .get(key, self.timeout)
                    .await
                    .with_context(|| format!("failed to read {key} from etcd"))?;
                info!(%key, index = node.modified_index, "Fetched policy");

                self.scratch.write(node.value).await?;
                Ok(PolicySnapshot {
                    path: self.scratch.path().to_path_buf(),
                    index: Some(node.modified_index),
                })
            }
        }
    }
}
