//! # devbox-core
//!
//! Package identity and resolution for devbox projects.
//!
//! - [`spec`]: what a raw package string such as `go@1.22` or
//!   `github:NixOS/nixpkgs#go` could mean
//! - [`resolve`]: turning it into a locked, reproducible installable
//! - [`lock`]: the `devbox.lock` file that keeps resolutions stable
//! - [`narinfo`]: whether a locked package can be fetched from the binary
//!   cache instead of being built
//!
//! The search service, flake locking and store path lookups sit behind
//! traits in [`resolve`]. [`search::SearchClient`] and [`nix::NixCli`] are
//! the real implementations.

pub mod error;
pub mod lock;
pub mod narinfo;
pub mod nix;
pub mod project;
pub mod resolve;
pub mod search;
pub mod settings;
pub mod spec;
pub mod store_path;

pub use error::{Error, NarInfoError, Result};
pub use lock::{Lockfile, MergeOutcome, Package, Source, SystemInfo};
pub use narinfo::{CachePackage, NarInfoCache};
pub use project::{Project, StaticProject};
pub use resolve::Resolver;
pub use settings::{ResolverOptions, ResolverSettings};
pub use spec::PackageSpec;
