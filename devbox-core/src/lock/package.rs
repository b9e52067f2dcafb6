use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::store_path::StorePathParts;

/// Where a locked package was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    /// An attribute path in nixpkgs, without a version.
    Nixpkg,
    /// A `name@version` looked up with the search service.
    DevboxSearch,
}

/// A resolved lockfile entry, keyed in the lockfile by the raw package
/// string it was resolved from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_insecure: bool,

    /// RFC 3339 timestamp of the nixpkgs commit the package came from.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_modified: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plugin_version: String,

    /// Locked flake installable.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resolved: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Keyed by Nix system.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub systems: BTreeMap<String, SystemInfo>,
}

impl Package {
    /// Fills in `outputs` for entries from lockfiles that predate per-output
    /// store paths. Applied once, right after reading a lockfile. The
    /// synthesized outputs only exist in memory.
    pub(crate) fn upgrade_legacy(&mut self) {
        for info in self.systems.values_mut() {
            info.upgrade_legacy();
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.resolved.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(into = "StoredSystemInfo")]
pub struct SystemInfo {
    #[serde(default)]
    pub outputs: Vec<Output>,

    /// Input-addressed store path from lockfiles written before `outputs`
    /// existed. Read it through [`SystemInfo::store_path`].
    #[serde(default)]
    pub store_path: String,

    /// Content-addressed store path of the default output, when known.
    #[serde(default)]
    pub ca_store_path: String,

    /// Set when `outputs` was synthesized from `store_path` on read. Such
    /// outputs are never written back.
    #[serde(skip)]
    pub(crate) upgraded_from_legacy: bool,
}

impl PartialEq for SystemInfo {
    fn eq(&self, other: &Self) -> bool {
        self.outputs == other.outputs
            && self.store_path == other.store_path
            && self.ca_store_path == other.ca_store_path
    }
}

impl Eq for SystemInfo {}

/// How a [`SystemInfo`] is written to devbox.lock.
#[derive(Serialize)]
struct StoredSystemInfo {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    outputs: Vec<Output>,
    #[serde(skip_serializing_if = "String::is_empty")]
    store_path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    ca_store_path: String,
}

impl From<SystemInfo> for StoredSystemInfo {
    fn from(info: SystemInfo) -> Self {
        Self {
            outputs: if info.upgraded_from_legacy {
                Vec::new()
            } else {
                info.outputs
            },
            store_path: info.store_path,
            ca_store_path: info.ca_store_path,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    /// Absolute store path.
    pub path: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
}

impl SystemInfo {
    /// A system whose only, default output lives at `store_path`. The output
    /// name comes from the store path, `out` when it doesn't have one.
    pub fn from_store_path(store_path: impl Into<String>) -> Self {
        let path = store_path.into();
        let output = StorePathParts::parse(&path).output;
        Self {
            outputs: vec![Output {
                name: if output.is_empty() {
                    "out".to_string()
                } else {
                    output
                },
                path,
                default: true,
            }],
            ..Default::default()
        }
    }

    pub fn from_outputs(outputs: Vec<Output>) -> Self {
        Self {
            outputs,
            ..Default::default()
        }
    }

    fn upgrade_legacy(&mut self) {
        if self.outputs.is_empty() && !self.store_path.is_empty() {
            self.outputs.push(Output {
                name: "out".to_string(),
                path: self.store_path.clone(),
                default: true,
            });
            self.upgraded_from_legacy = true;
        }
    }

    pub fn default_outputs(&self) -> Vec<&Output> {
        self.outputs.iter().filter(|output| output.default).collect()
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.iter().find(|output| output.name == name)
    }

    /// Store path of the first default output, or of the first output when
    /// none is marked default.
    pub fn store_path(&self) -> Option<&str> {
        self.outputs
            .iter()
            .find(|output| output.default)
            .or_else(|| self.outputs.first())
            .map(|output| output.path.as_str())
    }
}
