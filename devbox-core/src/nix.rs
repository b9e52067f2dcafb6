//! Resolvers backed by the `nix` command line.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use nix_flakeref::FlakeRef;
use semver::Version;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};
use crate::resolve::{FlakeMetadataResolver, StorePathResolver};
use crate::settings::ResolverSettings;

/// Runs `nix` subcommands with flakes enabled and a bounded run time.
#[derive(Debug, Clone)]
pub struct NixCli {
    binary: PathBuf,
    timeout: Duration,
}

/// Why a `nix` invocation produced no output. Callers fold it into the
/// [`Error`] variant of the operation that ran it.
#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error("timed out after {:?}", .0)]
    TimedOut(Duration),

    #[error("failed to run {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
}

/// The parts of `nix flake metadata --json` that matter for locking.
#[derive(Debug, Deserialize)]
struct FlakeMetadata {
    locked: FlakeRef,
}

impl NixCli {
    pub fn new(settings: &ResolverSettings) -> Self {
        Self {
            binary: PathBuf::from("nix"),
            timeout: settings.command_timeout,
        }
    }

    /// Uses a different `nix` executable.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Runs `nix` and returns its stdout.
    async fn run(&self, args: &[&str]) -> std::result::Result<String, CommandError> {
        debug!(binary = %self.binary.display(), ?args, "Running nix");
        let mut command = Command::new(&self.binary);
        command
            .args(["--extra-experimental-features", "nix-command flakes"])
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| CommandError::TimedOut(self.timeout))?
            .map_err(|source| CommandError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// The installed Nix version, or `None` if it can't be determined.
    pub async fn version(&self) -> Option<Version> {
        match self.run(&["--version"]).await {
            Ok(stdout) => parse_nix_version(&stdout),
            Err(err) => {
                debug!("Failed to get nix version: {err}");
                None
            }
        }
    }
}

#[async_trait]
impl FlakeMetadataResolver for NixCli {
    async fn resolve_flake_metadata(&self, flake_ref: &FlakeRef) -> Result<FlakeRef> {
        let raw = flake_ref.to_string();
        let metadata_error = |message: String| Error::FlakeMetadata {
            flake_ref: raw.clone(),
            message,
        };

        let stdout = self
            .run(&["flake", "metadata", "--json", &raw])
            .await
            .map_err(|e| metadata_error(e.to_string()))?;
        let metadata: FlakeMetadata = serde_json::from_str(&stdout)
            .map_err(|e| metadata_error(format!("invalid flake metadata: {e}")))?;
        Ok(metadata.locked)
    }
}

#[async_trait]
impl StorePathResolver for NixCli {
    async fn store_path_from_hash(&self, hash: &str, cache_url: &str) -> Result<String> {
        let stdout = self
            .run(&["store", "path-from-hash-part", "--store", cache_url, hash])
            .await
            .map_err(|e| Error::StorePath {
                hash: hash.to_string(),
                cache: cache_url.to_string(),
                message: e.to_string(),
            })?;
        Ok(stdout.trim().to_string())
    }
}

/// Parses the output of `nix --version`, such as `nix (Nix) 2.18.1`.
/// Pre-release suffixes are dropped and missing components read as zero.
pub fn parse_nix_version(output: &str) -> Option<Version> {
    let raw = output.split_whitespace().last()?;
    let numeric: String = raw
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    let mut parts = numeric
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<u64>());
    let major = parts.next()?.ok()?;
    let minor = parts.next().transpose().ok()?.unwrap_or(0);
    let patch = parts.next().transpose().ok()?.unwrap_or(0);
    Some(Version::new(major, minor, patch))
}
