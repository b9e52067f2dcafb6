use std::path::{Path, PathBuf};

/// What the lockfile needs to know about the devbox project that owns it.
pub trait Project: Send + Sync {
    /// Directory containing devbox.json and devbox.lock.
    fn project_dir(&self) -> &Path;

    /// The deprecated project-wide nixpkgs commit, or an empty string.
    fn legacy_nixpkgs_commit(&self) -> &str {
        ""
    }

    /// Raw package strings currently listed by the project.
    fn package_names(&self) -> Vec<String>;
}

/// A project described directly by its fields, for callers that have already
/// loaded their configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticProject {
    pub dir: PathBuf,
    pub legacy_nixpkgs_commit: String,
    pub packages: Vec<String>,
}

impl StaticProject {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn with_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages = packages.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_legacy_nixpkgs_commit(mut self, commit: impl Into<String>) -> Self {
        self.legacy_nixpkgs_commit = commit.into();
        self
    }
}

impl Project for StaticProject {
    fn project_dir(&self) -> &Path {
        &self.dir
    }

    fn legacy_nixpkgs_commit(&self) -> &str {
        &self.legacy_nixpkgs_commit
    }

    fn package_names(&self) -> Vec<String> {
        self.packages.clone()
    }
}
