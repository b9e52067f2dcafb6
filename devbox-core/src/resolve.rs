//! Turns raw package strings into locked lockfile entries.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use futures::future::join_all;
use nix_flakeref::{FlakeRef, FlakeType, Installable};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::lock::{Package, Source, SystemInfo};
use crate::search::{PackageInfo, PackageVersion};
use crate::settings::ResolverSettings;
use crate::spec::{Candidate, PackageSpec, RunXRef};

/// Looks up a package version with the search service.
#[async_trait]
pub trait SearchResolver: Send + Sync {
    /// Fails with [`Error::PackageNotFound`] when the service doesn't know
    /// the name or version.
    async fn resolve(&self, name: &str, version: &str) -> Result<PackageVersion>;
}

/// Locks flake references.
#[async_trait]
pub trait FlakeMetadataResolver: Send + Sync {
    /// Returns a reference with enough of rev and narHash to be reproducible.
    async fn resolve_flake_metadata(&self, flake_ref: &FlakeRef) -> Result<FlakeRef>;
}

/// Finds the full store path for the hash part of a store path.
#[async_trait]
pub trait StorePathResolver: Send + Sync {
    async fn store_path_from_hash(&self, hash: &str, cache_url: &str) -> Result<String>;
}

/// Resolves a RunX reference to a concrete release.
#[async_trait]
pub trait RunXRegistry: Send + Sync {
    async fn resolve_version(&self, runx: &RunXRef) -> Result<RunXRef>;
}

/// Resolves package specs using injected external resolvers.
pub struct Resolver {
    settings: ResolverSettings,
    search: Arc<dyn SearchResolver>,
    flakes: Arc<dyn FlakeMetadataResolver>,
    store_paths: Arc<dyn StorePathResolver>,
    runx: Option<Arc<dyn RunXRegistry>>,
    cancel: CancellationToken,
}

impl Resolver {
    pub fn new(
        settings: ResolverSettings,
        search: Arc<dyn SearchResolver>,
        flakes: Arc<dyn FlakeMetadataResolver>,
        store_paths: Arc<dyn StorePathResolver>,
    ) -> Self {
        Self {
            settings,
            search,
            flakes,
            store_paths,
            runx: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_runx_registry(mut self, registry: Arc<dyn RunXRegistry>) -> Self {
        self.runx = Some(registry);
        self
    }

    /// Aborts in-flight external calls with [`Error::Cancelled`] once `cancel`
    /// fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Resolves `raw` without touching a lockfile.
    ///
    /// Candidates from [`PackageSpec::candidates`] are tried in order. A
    /// candidate that isn't found, or whose flake can't be locked, falls
    /// through to the next one. When every candidate fails the first error
    /// is returned, since it belongs to the most likely interpretation.
    #[instrument(skip(self))]
    pub async fn resolve(&self, raw: &str, legacy_nixpkgs_commit: &str) -> Result<Package> {
        let spec = PackageSpec::parse(raw, legacy_nixpkgs_commit);
        let candidates = spec.candidates();
        let last = candidates.len().saturating_sub(1);

        let mut first_err = None;
        for (i, candidate) in candidates.into_iter().enumerate() {
            match self.resolve_candidate(candidate).await {
                Ok(pkg) => return Ok(pkg),
                Err(err) if i < last && falls_through(&err) => {
                    debug!("Trying next interpretation of {raw:?}: {err}");
                    first_err.get_or_insert(err);
                }
                Err(err) => return Err(first_err.unwrap_or(err)),
            }
        }
        Err(Error::UnresolvablePackage(raw.to_string()))
    }

    async fn resolve_candidate(&self, candidate: Candidate<'_>) -> Result<Package> {
        match candidate {
            Candidate::RunX(runx) => self.resolve_runx(runx).await,
            Candidate::Search { name, version } => self.resolve_search(name, version).await,
            Candidate::Flake(installable) => self.lock_installable(installable, None).await,
            Candidate::AttrPath(installable) => {
                if let Some(pkg) = legacy_nixpkgs_package(installable) {
                    return Ok(pkg);
                }
                self.lock_installable(installable, Some(Source::Nixpkg)).await
            }
        }
    }

    async fn resolve_runx(&self, runx: &RunXRef) -> Result<Package> {
        let resolved = match &self.runx {
            Some(registry) => self.cancellable(registry.resolve_version(runx)).await?,
            None => runx.clone(),
        };
        Ok(Package {
            resolved: resolved.to_string(),
            version: resolved.version,
            ..Default::default()
        })
    }

    /// Resolves `name@version` to the nixpkgs commit the search service
    /// reports for the current system.
    #[instrument(skip(self))]
    pub async fn resolve_search(&self, name: &str, version: &str) -> Result<Package> {
        if version.is_empty() {
            return Err(Error::MissingVersion(name.to_string()));
        }

        let package_version = self.cancellable(self.search.resolve(name, version)).await?;
        let info = select_for_system(&package_version, &self.settings.system)?;
        let attr_path = info.attr_paths.first().ok_or_else(|| Error::NoAttrPaths {
            name: name.to_string(),
        })?;

        let nixpkgs = FlakeRef {
            owner: Some("NixOS".to_string()),
            repo: Some("nixpkgs".to_string()),
            rev: Some(info.commit_hash.clone()),
            ..FlakeRef::new(FlakeType::GitHub)
        };
        let systems = self.build_system_infos(&package_version).await?;

        Ok(Package {
            last_modified: format_timestamp(info.last_updated),
            resolved: Installable::new(nixpkgs, attr_path.as_str()).to_string(),
            version: package_version.version.clone(),
            source: Some(Source::DevboxSearch),
            systems,
            ..Default::default()
        })
    }

    /// Looks up each system's store path concurrently. A system whose lookup
    /// fails is left out so that the others can still install from the
    /// binary cache.
    async fn build_system_infos(
        &self,
        package_version: &PackageVersion,
    ) -> Result<BTreeMap<String, SystemInfo>> {
        let lookups = package_version
            .systems
            .iter()
            .filter(|(_, info)| info.has_store_path())
            .map(|(system, info)| async move {
                let path = self
                    .cancellable(
                        self.store_paths
                            .store_path_from_hash(&info.store_hash, &self.settings.binary_cache),
                    )
                    .await;
                (system, info, path)
            });

        let mut systems = BTreeMap::new();
        for (system, info, path) in join_all(lookups).await {
            match path {
                Ok(path) => {
                    systems.insert(system.clone(), SystemInfo::from_store_path(path));
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    warn!(
                        %system,
                        store_hash = %info.store_hash,
                        "Failed to resolve store path: {err}"
                    );
                }
            }
        }
        Ok(systems)
    }

    /// Locks the installable's flake reference unless it is already locked.
    async fn lock_installable(
        &self,
        installable: &Installable,
        source: Option<Source>,
    ) -> Result<Package> {
        let flake_ref = &installable.flake_ref;
        // Revisions are reproducible on their own; skip the narHash lookup.
        let locked = if flake_ref.is_locked()
            || (flake_ref.flake_type == FlakeType::GitHub && flake_ref.rev.is_some())
        {
            flake_ref.clone()
        } else {
            debug!(%flake_ref, "Locking flake");
            self.cancellable(self.flakes.resolve_flake_metadata(flake_ref))
                .await?
        };

        let last_modified = locked.last_modified.map(format_timestamp).unwrap_or_default();
        let resolved = Installable {
            flake_ref: locked,
            attr_path: installable.attr_path.clone(),
            outputs: installable.outputs.clone(),
        };
        Ok(Package {
            last_modified,
            resolved: resolved.to_string(),
            source,
            ..Default::default()
        })
    }

    async fn cancellable<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = fut => result,
        }
    }
}

/// Attribute paths pinned to a legacy nixpkgs commit resolve without any
/// network access.
fn legacy_nixpkgs_package(installable: &Installable) -> Option<Package> {
    let flake_ref = &installable.flake_ref;
    if flake_ref.flake_type != FlakeType::Indirect || flake_ref.id.as_deref() != Some("nixpkgs") {
        return None;
    }
    let commit = flake_ref.rev.as_ref().or(flake_ref.r#ref.as_ref())?;
    let nixpkgs = FlakeRef {
        owner: Some("NixOS".to_string()),
        repo: Some("nixpkgs".to_string()),
        rev: Some(commit.clone()),
        ..FlakeRef::new(FlakeType::GitHub)
    };
    let resolved = Installable {
        flake_ref: nixpkgs,
        attr_path: installable.attr_path.clone(),
        outputs: installable.outputs.clone(),
    };
    Some(Package {
        resolved: resolved.to_string(),
        source: Some(Source::Nixpkg),
        ..Default::default()
    })
}

/// Picks the current system's build, falling back to `x86_64-linux` and then
/// to any system at all.
pub(crate) fn select_for_system<'a>(
    package_version: &'a PackageVersion,
    system: &str,
) -> Result<&'a PackageInfo> {
    let systems = &package_version.systems;
    systems
        .get(system)
        .or_else(|| systems.get("x86_64-linux"))
        .or_else(|| systems.values().next())
        .ok_or_else(|| Error::NoSystems {
            name: package_version.name.clone(),
        })
}

fn falls_through(err: &Error) -> bool {
    err.is_not_found() || matches!(err, Error::FlakeMetadata { .. })
}

fn format_timestamp(unix_secs: i64) -> String {
    DateTime::from_timestamp(unix_secs, 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}
