//! Client for the devbox search service, which maps `name@version` to the
//! nixpkgs commit and store paths that provide it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::resolve::SearchResolver;
use crate::settings::ResolverSettings;

/// A package version as reported by the search service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersion {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub license: String,
    /// Keyed by Nix system.
    #[serde(default)]
    pub systems: BTreeMap<String, PackageInfo>,
}

/// Where one system's build of a package version lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    #[serde(default)]
    pub commit_hash: String,
    #[serde(default)]
    pub system: String,
    /// Unix timestamp of the nixpkgs commit.
    #[serde(default)]
    pub last_updated: i64,
    /// Hash part of the default output's store path.
    #[serde(default)]
    pub store_hash: String,
    #[serde(default)]
    pub store_name: String,
    #[serde(default)]
    pub store_version: String,
    #[serde(default)]
    pub attr_paths: Vec<String>,
}

impl PackageInfo {
    /// Whether the search service knows this system's store path.
    pub fn has_store_path(&self) -> bool {
        !self.store_hash.is_empty() && !self.store_name.is_empty()
    }
}

/// HTTP client for `GET <host>/v1/resolve?name=<name>&version=<version>`.
#[derive(Debug, Clone)]
pub struct SearchClient {
    client: reqwest::Client,
    host: String,
}

impl SearchClient {
    pub fn new(settings: &ResolverSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .build()
            .map_err(|e| Error::Search {
                name: String::new(),
                version: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            host: settings.search_host.clone(),
        })
    }
}

#[async_trait]
impl SearchResolver for SearchClient {
    async fn resolve(&self, name: &str, version: &str) -> Result<PackageVersion> {
        let search_error = |message: String| Error::Search {
            name: name.to_string(),
            version: version.to_string(),
            message,
        };

        let url = format!("{}/v1/resolve", self.host);
        debug!(%url, name, version, "Resolving package with search service");
        let response = self
            .client
            .get(&url)
            .query(&[("name", name), ("version", version)])
            .send()
            .await
            .map_err(|e| search_error(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::PackageNotFound {
                name: name.to_string(),
                version: version.to_string(),
            });
        }
        let response = response
            .error_for_status()
            .map_err(|e| search_error(e.to_string()))?;
        response
            .json::<PackageVersion>()
            .await
            .map_err(|e| search_error(format!("invalid response: {e}")))
    }
}
