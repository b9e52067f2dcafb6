use miette::Diagnostic;
use nix_flakeref::ParseError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by package resolution and binary cache checks.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// The search service has no package with this name and version.
    #[error("package {name}@{version} not found")]
    #[diagnostic(help("run `devbox search {name}` to list the available versions"))]
    PackageNotFound { name: String, version: String },

    /// The package resolved, but none of its systems are usable.
    #[error("no systems found for package {name:?}")]
    NoSystems { name: String },

    #[error("no attribute paths found for package {name:?}")]
    NoAttrPaths { name: String },

    #[error("no version specified for {0:?}")]
    MissingVersion(String),

    #[error("unable to resolve package {0:?}")]
    UnresolvablePackage(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    FlakeRef(#[from] ParseError),

    #[error("search service request for {name}@{version} failed: {message}")]
    Search {
        name: String,
        version: String,
        message: String,
    },

    #[error("failed to lock flake {flake_ref}: {message}")]
    FlakeMetadata { flake_ref: String, message: String },

    #[error("failed to resolve store path for hash {hash} in {cache}: {message}")]
    StorePath {
        hash: String,
        cache: String,
        message: String,
    },

    #[error(transparent)]
    BinaryCache(#[from] NarInfoError),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Reports whether the package simply doesn't exist at this source, as
    /// opposed to the source being unreachable.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::PackageNotFound { .. })
    }
}

/// A failed narinfo request. Cloneable so that a single result can be shared
/// by every caller waiting on the same check.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
#[error("binary cache request {url} failed: {message}")]
pub struct NarInfoError {
    pub url: String,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, Error>;
