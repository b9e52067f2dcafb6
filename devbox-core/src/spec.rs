use std::fmt;

use nix_flakeref::{FlakeRef, FlakeType, Installable};

pub const RUNX_PREFIX: &str = "runx:";

/// A package from the RunX registry of prebuilt GitHub release binaries,
/// written `runx:<owner>/<repo>[@<version>]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunXRef {
    pub owner: String,
    pub repo: String,
    /// Requested version. `latest` when the reference doesn't name one.
    pub version: String,
}

impl RunXRef {
    /// Parses a reference without its `runx:` prefix.
    pub fn parse(s: &str) -> Option<Self> {
        let (path, version) = match s.rsplit_once('@') {
            Some((path, version)) if !version.is_empty() => (path, version),
            Some((path, _)) => (path, "latest"),
            None => (s, "latest"),
        };
        let (owner, repo) = path.split_once('/')?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            version: version.to_string(),
        })
    }
}

impl fmt::Display for RunXRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{RUNX_PREFIX}{}/{}@{}", self.owner, self.repo, self.version)
    }
}

/// Every interpretation of a raw devbox package string. The supported
/// syntaxes are:
///
/// | Syntax           | Example                       | Resolved with            |
/// | ---------------- | ----------------------------- | ------------------------ |
/// | name@version     | `go@1.22`                     | search service           |
/// | name             | `go`                          | same as above, `@latest` |
/// | flake            | `github:NixOS/nixpkgs#go`     | flake locking            |
/// | attr path        | `go`                          | `flake:nixpkgs#go`       |
/// | legacy attr path | `go`                          | pinned nixpkgs commit    |
/// | runx             | `runx:golangci/golangci-lint` | RunX registry            |
///
/// Most specs are ambiguous: `cachix` is a devbox package, an indirect flake
/// and a nixpkgs attribute path all at once. Parsing keeps every
/// interpretation that doesn't conflict and [`PackageSpec::candidates`]
/// orders them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSpec {
    /// Name and version from devbox's `name@version` syntax.
    pub name: String,
    pub version: String,

    /// The raw string parsed as a flake installable.
    pub installable: Option<Installable>,

    /// The raw string parsed as a nixpkgs attribute path, pinned to the
    /// project's legacy nixpkgs commit when it has one.
    pub attr_path_installable: Option<Installable>,

    pub runx: Option<RunXRef>,

    explicit_version: bool,
}

/// One way of resolving a [`PackageSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate<'a> {
    RunX(&'a RunXRef),
    Search { name: &'a str, version: &'a str },
    Flake(&'a Installable),
    AttrPath(&'a Installable),
}

impl PackageSpec {
    /// Parses a raw package string. `legacy_nixpkgs_commit` is empty unless
    /// the project still sets the deprecated nixpkgs commit.
    ///
    /// Parsing is syntactic only and never fails; an unusable string yields a
    /// spec without candidates.
    pub fn parse(raw: &str, legacy_nixpkgs_commit: &str) -> Self {
        if raw.is_empty() {
            return Self::default();
        }
        if let Some(runx) = raw.strip_prefix(RUNX_PREFIX).and_then(RunXRef::parse) {
            return Self {
                runx: Some(runx),
                ..Default::default()
            };
        }

        let mut spec = Self {
            installable: Installable::parse(raw).ok(),
            ..Default::default()
        };
        if spec.is_installable_unambiguous(raw) {
            return spec;
        }
        // Attribute paths and devbox names never contain a '#'.
        if raw.contains('#') {
            return spec;
        }

        let nixpkgs = FlakeRef::indirect("nixpkgs", Some(legacy_nixpkgs_commit));
        spec.attr_path_installable = Some(Installable::new(nixpkgs, raw));
        if !legacy_nixpkgs_commit.is_empty() {
            // With a pinned commit, "cachix" means nixpkgs/<commit>#cachix
            // rather than the cachix flake.
            spec.installable = None;
        }

        match raw.rfind('@') {
            Some(i) if i > 0 && i < raw.len() - 1 => {
                spec.name = raw[..i].to_string();
                spec.version = raw[i + 1..].to_string();
                spec.explicit_version = true;
            }
            // Pinned projects keep the pre-versioning behaviour and install
            // the attribute path.
            _ if !legacy_nixpkgs_commit.is_empty() => {}
            _ => {
                spec.name = raw.to_string();
                spec.version = "latest".to_string();
            }
        }
        spec
    }

    /// Unambiguous installables have an explicit scheme or start with "./" or
    /// "/". They are never read as devbox names or attribute paths.
    fn is_installable_unambiguous(&self, raw: &str) -> bool {
        let Some(installable) = &self.installable else {
            return false;
        };
        match installable.flake_ref.flake_type {
            FlakeType::Indirect => raw.starts_with("flake:"),
            FlakeType::Path => {
                raw.starts_with("path:") || raw.starts_with("./") || raw.starts_with('/')
            }
            _ => true,
        }
    }

    /// Reports whether this is a plain name that only resolves against
    /// the legacy nixpkgs commit.
    pub fn is_legacy(&self) -> bool {
        self.name.is_empty()
            && self.installable.is_none()
            && self.runx.is_none()
            && self.attr_path_installable.is_some()
    }

    /// Ways to resolve this spec, most preferred first:
    ///
    /// 1. a RunX reference, which excludes everything else.
    /// 2. the search service, by name and version. An explicit version
    ///    excludes everything else.
    /// 3. the flake installable.
    /// 4. the nixpkgs attribute path.
    pub fn candidates(&self) -> Vec<Candidate<'_>> {
        if let Some(runx) = &self.runx {
            return vec![Candidate::RunX(runx)];
        }

        let mut candidates = Vec::new();
        if !self.name.is_empty() {
            candidates.push(Candidate::Search {
                name: &self.name,
                version: &self.version,
            });
            if self.explicit_version {
                return candidates;
            }
        }
        if let Some(installable) = &self.installable {
            candidates.push(Candidate::Flake(installable));
        }
        if let Some(installable) = &self.attr_path_installable {
            candidates.push(Candidate::AttrPath(installable));
        }
        candidates
    }
}
