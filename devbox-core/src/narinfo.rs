//! Checks whether a package's store paths are in the binary cache.
//!
//! Every check is a `HEAD <cache>/<hash>.narinfo` request. Results are
//! memoized per package and output for the lifetime of a [`NarInfoCache`],
//! and concurrent checks of the same output share one request.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use nix_flakeref::Outputs;
use reqwest::StatusCode;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::error::{Error, NarInfoError, Result};
use crate::lock::{Output, Package, SystemInfo};
use crate::settings::ResolverSettings;
use crate::store_path::StorePathParts;

type Entry = Arc<OnceCell<std::result::Result<bool, NarInfoError>>>;

/// A package as the binary cache sees it.
#[derive(Debug, Clone, Default)]
pub struct CachePackage {
    /// The raw package string. Memoized results are keyed by it.
    pub raw: String,
    /// Packages patched for a different glibc are rebuilt locally.
    pub patch_glibc: bool,
    /// Outputs selected by the package's installable.
    pub outputs: Outputs,
    /// The package's lockfile entry, if it has been resolved.
    pub locked: Option<Package>,
}

impl CachePackage {
    pub fn new(raw: impl Into<String>, locked: Option<Package>) -> Self {
        Self {
            raw: raw.into(),
            locked,
            ..Default::default()
        }
    }

    pub fn with_patch_glibc(mut self, patch_glibc: bool) -> Self {
        self.patch_glibc = patch_glibc;
        self
    }

    pub fn with_outputs(mut self, outputs: Outputs) -> Self {
        self.outputs = outputs;
        self
    }
}

pub struct NarInfoCache {
    client: reqwest::Client,
    cache_url: String,
    system: String,
    supports_binary_cache: bool,
    cancel: CancellationToken,
    entries: Mutex<HashMap<(String, String), Entry>>,
}

impl NarInfoCache {
    pub fn new(settings: &ResolverSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .build()
            .map_err(|e| NarInfoError {
                url: settings.binary_cache.clone(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            cache_url: settings.binary_cache.clone(),
            system: settings.system.clone(),
            supports_binary_cache: settings.supports_binary_cache(),
            cancel: CancellationToken::new(),
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Makes waiting checks fail with [`Error::Cancelled`] once `cancel`
    /// fires. A cancelled check is not memoized.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Reports whether every default output of the package is in the cache.
    ///
    /// Ineligible packages are `false` without any request: packages that
    /// patch glibc, that select specific outputs, that have no lockfile
    /// entry for this system, or when Nix is too old to use one.
    #[instrument(skip_all, fields(raw = %pkg.raw))]
    pub async fn is_in_cache(&self, pkg: &CachePackage) -> Result<bool> {
        let Some(info) = self.eligible_system_info(pkg, true) else {
            return Ok(false);
        };
        let outputs = info.default_outputs();
        if outputs.is_empty() {
            return Ok(false);
        }
        let checks = outputs.into_iter().map(|output| self.check(&pkg.raw, output));
        Ok(try_join_all(checks).await?.into_iter().all(|present| present))
    }

    /// Reports whether one named output of the package is in the cache.
    #[instrument(skip_all, fields(raw = %pkg.raw, output = name))]
    pub async fn is_output_in_cache(&self, pkg: &CachePackage, name: &str) -> Result<bool> {
        let Some(output) = self
            .eligible_system_info(pkg, false)
            .and_then(|info| info.output(name))
        else {
            return Ok(false);
        };
        self.check(&pkg.raw, output).await
    }

    /// Checks the default outputs of all eligible packages concurrently so
    /// that later calls are answered from memory. Fails on the first
    /// transport error; missing store paths are not errors.
    pub async fn fill_cache(&self, pkgs: &[CachePackage]) -> Result<()> {
        let checks = pkgs.iter().flat_map(|pkg| {
            self.eligible_system_info(pkg, true)
                .map(SystemInfo::default_outputs)
                .unwrap_or_default()
                .into_iter()
                .map(move |output| self.check(&pkg.raw, output))
        });
        try_join_all(checks).await?;
        Ok(())
    }

    fn eligible_system_info<'a>(
        &self,
        pkg: &'a CachePackage,
        default_outputs_only: bool,
    ) -> Option<&'a SystemInfo> {
        if pkg.patch_glibc || !self.supports_binary_cache {
            return None;
        }
        if default_outputs_only && pkg.outputs != Outputs::Default {
            return None;
        }
        pkg.locked.as_ref()?.systems.get(&self.system)
    }

    /// Returns the memoized result for one output, requesting it if no other
    /// caller has yet.
    async fn check(&self, raw: &str, output: &Output) -> Result<bool> {
        let entry = {
            let mut entries = self.entries.lock().await;
            entries
                .entry((raw.to_string(), output.name.clone()))
                .or_default()
                .clone()
        };

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            result = entry.get_or_init(|| self.fetch_narinfo(&output.path)) => result,
        };
        Ok(result.clone()?)
    }

    async fn fetch_narinfo(&self, store_path: &str) -> std::result::Result<bool, NarInfoError> {
        let hash = StorePathParts::parse(store_path).hash;
        if hash.is_empty() {
            return Ok(false);
        }

        let url = format!("{}/{hash}.narinfo", self.cache_url);
        debug!(%url, "Checking binary cache");
        let response = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| NarInfoError {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        // Drain the body so the connection can be reused.
        if let Err(e) = response.bytes().await {
            trace!(%url, "Failed to drain narinfo response: {e}");
        }
        Ok(status == StatusCode::OK)
    }
}
