//! Resolver options and resolved settings.
//!
//! Follows the same pattern for every concern:
//! - Options struct: all `Option<T>` fields, no clap dependency
//! - Resolved settings struct: plain Rust with concrete types
//! - `resolve()`: takes options by value, falls back to the environment and
//!   then to defaults

use std::time::Duration;

use semver::Version;

pub const DEFAULT_SEARCH_HOST: &str = "https://search.devbox.sh";
pub const DEFAULT_BINARY_CACHE: &str = "https://cache.nixos.org";
pub const SEARCH_HOST_ENV: &str = "DEVBOX_SEARCH_HOST";

/// Oldest Nix that can fetch store paths directly from the binary cache.
pub const MIN_BINARY_CACHE_NIX: Version = Version::new(2, 17, 0);

pub fn default_system() -> String {
    let arch = if cfg!(target_arch = "aarch64") {
        "aarch64"
    } else if cfg!(target_arch = "x86_64") {
        "x86_64"
    } else {
        "unknown architecture"
    };

    let os = if cfg!(target_os = "linux") {
        "linux"
    } else if cfg!(target_os = "macos") {
        "darwin"
    } else {
        "unknown OS"
    };
    format!("{arch}-{os}")
}

/// Combine two values, preferring `self` (higher precedence).
pub(crate) trait Combine: Sized {
    fn combine(self, other: Self) -> Self;
}

impl<T> Combine for Option<T> {
    fn combine(self, other: Self) -> Self {
        self.or(other)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResolverOptions {
    pub system: Option<String>,
    pub search_host: Option<String>,
    pub binary_cache: Option<String>,
    pub http_timeout: Option<Duration>,
    pub command_timeout: Option<Duration>,
    pub legacy_nixpkgs_commit: Option<String>,
    pub nix_version: Option<Version>,
}

/// Resolved resolver settings.
///
/// Produced by `ResolverSettings::resolve(ResolverOptions)` as a pure function
/// of the options and the process environment.
#[derive(Clone, Debug)]
pub struct ResolverSettings {
    /// Nix system of the current machine, such as `aarch64-darwin`.
    pub system: String,
    pub search_host: String,
    pub binary_cache: String,
    /// Bound on every HTTP request.
    pub http_timeout: Duration,
    /// Bound on every `nix` invocation.
    pub command_timeout: Duration,
    /// Deprecated project-wide nixpkgs commit. Empty when the project doesn't
    /// pin one.
    pub legacy_nixpkgs_commit: String,
    /// Installed Nix version. `None` when unknown, which is treated as new
    /// enough.
    pub nix_version: Option<Version>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            system: default_system(),
            search_host: DEFAULT_SEARCH_HOST.to_string(),
            binary_cache: DEFAULT_BINARY_CACHE.to_string(),
            http_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(60),
            legacy_nixpkgs_commit: String::new(),
            nix_version: None,
        }
    }
}

impl ResolverSettings {
    pub fn resolve(options: ResolverOptions) -> Self {
        Self::resolve_with_env(options, |key| std::env::var(key).ok())
    }

    fn resolve_with_env(options: ResolverOptions, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let env_search_host = env(SEARCH_HOST_ENV).filter(|host| !host.is_empty());
        Self {
            system: options.system.unwrap_or(defaults.system),
            search_host: trim_slash(
                options
                    .search_host
                    .combine(env_search_host)
                    .unwrap_or(defaults.search_host),
            ),
            binary_cache: trim_slash(options.binary_cache.unwrap_or(defaults.binary_cache)),
            http_timeout: options.http_timeout.unwrap_or(defaults.http_timeout),
            command_timeout: options.command_timeout.unwrap_or(defaults.command_timeout),
            legacy_nixpkgs_commit: options.legacy_nixpkgs_commit.unwrap_or_default(),
            nix_version: options.nix_version,
        }
    }

    /// Reports whether the installed Nix can use lockfile store paths.
    pub fn supports_binary_cache(&self) -> bool {
        self.nix_version
            .as_ref()
            .is_none_or(|version| *version >= MIN_BINARY_CACHE_NIX)
    }
}

fn trim_slash(url: String) -> String {
    match url.strip_suffix('/') {
        Some(trimmed) => trimmed.to_string(),
        None => url,
    }
}
