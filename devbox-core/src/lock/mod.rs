//! The project lockfile, `devbox.lock`.
//!
//! Maps each raw package string to the locked installable it resolved to. An
//! entry, once written, is returned as-is on every later resolve so that
//! repeated runs are reproducible; only [`Lockfile::force_resolve`] replaces
//! it.

mod merge;
mod package;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::project::Project;
use crate::resolve::Resolver;

pub use merge::{MergeOutcome, merge_resolved};
pub use package::{Output, Package, Source, SystemInfo};

pub const LOCKFILE_NAME: &str = "devbox.lock";
pub const LOCKFILE_VERSION: &str = "1";

/// The on-disk layout of a lockfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockfileContents {
    pub lockfile_version: String,
    /// Keyed by the raw package string.
    #[serde(default)]
    pub packages: BTreeMap<String, Package>,
}

impl Default for LockfileContents {
    fn default() -> Self {
        Self {
            lockfile_version: LOCKFILE_VERSION.to_string(),
            packages: BTreeMap::new(),
        }
    }
}

impl LockfileContents {
    pub fn from_json(json: &str) -> Result<Self> {
        let mut contents: Self = serde_json::from_str(json)?;
        for pkg in contents.packages.values_mut() {
            pkg.upgrade_legacy();
        }
        Ok(contents)
    }

    /// Pretty-printed JSON with a trailing newline. Keys are sorted, so equal
    /// contents always produce identical bytes.
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    fn content_hash(&self) -> Result<blake3::Hash> {
        Ok(blake3::hash(self.to_json()?.as_bytes()))
    }
}

/// A project's lockfile. Every mutation is written to disk before it returns.
pub struct Lockfile {
    project: Arc<dyn Project>,
    resolver: Arc<Resolver>,
    contents: LockfileContents,
}

impl Lockfile {
    /// Reads the project's lockfile, starting empty if it doesn't exist yet.
    pub async fn open(project: Arc<dyn Project>, resolver: Arc<Resolver>) -> Result<Self> {
        let contents = read_contents(&lockfile_path(project.as_ref())).await?;
        Ok(Self {
            project,
            resolver,
            contents,
        })
    }

    pub fn path(&self) -> PathBuf {
        lockfile_path(self.project.as_ref())
    }

    pub fn contents(&self) -> &LockfileContents {
        &self.contents
    }

    /// Returns the locked entry for `raw`, resolving and saving it first if
    /// the lockfile doesn't have one yet.
    #[instrument(skip(self))]
    pub async fn resolve(&mut self, raw: &str) -> Result<&Package> {
        let needs_resolve = self
            .contents
            .packages
            .get(raw)
            .is_none_or(|pkg| !pkg.is_resolved());
        if needs_resolve {
            let pkg = self.fetch_resolved_package(raw).await?;
            info!("Resolved {raw} to {}", pkg.resolved);
            self.contents.packages.insert(raw.to_string(), pkg);
            self.save().await?;
        }
        self.get(raw)
            .ok_or_else(|| Error::UnresolvablePackage(raw.to_string()))
    }

    /// Re-resolves `raw` and merges the result into the existing entry.
    #[instrument(skip(self))]
    pub async fn force_resolve(&mut self, raw: &str) -> Result<MergeOutcome> {
        let resolved = self.fetch_resolved_package(raw).await?;
        let outcome = self.merge_resolved(raw, resolved);
        info!("{raw}: {outcome}");
        self.save().await?;
        Ok(outcome)
    }

    /// Resolves `raw` without storing the result. This lets callers try a new
    /// resolution before deciding whether to keep it.
    pub async fn fetch_resolved_package(&self, raw: &str) -> Result<Package> {
        self.resolver
            .resolve(raw, self.project.legacy_nixpkgs_commit())
            .await
    }

    /// Merges a freshly resolved entry into the lockfile in memory.
    pub fn merge_resolved(&mut self, raw: &str, resolved: Package) -> MergeOutcome {
        let system = self.resolver.settings().system.clone();
        merge_resolved(&mut self.contents.packages, raw, resolved, &system)
    }

    pub async fn add(&mut self, raws: &[&str]) -> Result<()> {
        for raw in raws {
            self.resolve(raw).await?;
        }
        Ok(())
    }

    pub async fn remove(&mut self, raws: &[&str]) -> Result<()> {
        for raw in raws {
            self.contents.packages.remove(*raw);
        }
        self.save().await
    }

    /// The resolved entry for `raw`, if any.
    pub fn get(&self, raw: &str) -> Option<&Package> {
        self.contents
            .packages
            .get(raw)
            .filter(|pkg| pkg.is_resolved())
    }

    /// Drops entries for packages the project no longer lists.
    pub async fn tidy(&mut self) -> Result<()> {
        let keep = self.project.package_names();
        self.contents
            .packages
            .retain(|raw, _| keep.iter().any(|name| name == raw));
        self.save().await
    }

    /// Reports whether the in-memory lockfile differs from the one on disk.
    pub async fn is_dirty(&self) -> Result<bool> {
        let on_disk = read_contents(&self.path()).await?;
        Ok(self.contents.content_hash()? != on_disk.content_hash()?)
    }

    pub async fn save(&self) -> Result<()> {
        let path = self.path();
        debug!(path = %path.display(), "Writing lockfile");
        tokio::fs::write(&path, self.contents.to_json()?)
            .await
            .map_err(|e| Error::io(path, e))
    }
}

fn lockfile_path(project: &dyn Project) -> PathBuf {
    project.project_dir().join(LOCKFILE_NAME)
}

async fn read_contents(path: &Path) -> Result<LockfileContents> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => LockfileContents::from_json(&json),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LockfileContents::default()),
        Err(e) => Err(Error::io(path, e)),
    }
}
