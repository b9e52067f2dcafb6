use std::fmt;

pub const STORE_DIR: &str = "/nix/store/";

/// Length of the base-32 hash prefix of a store path's base name.
const HASH_LEN: usize = 32;

/// The components of a store path of the form
/// `/nix/store/<hash>-<name>[-<version>[-<output>]]`.
///
/// Like Nix, the version starts at the first dash-separated element that
/// begins with a digit. Everything after the version is the output name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StorePathParts {
    pub hash: String,
    pub name: String,
    pub version: String,
    pub output: String,
}

impl StorePathParts {
    pub fn parse(store_path: &str) -> Self {
        let base = store_path.strip_prefix(STORE_DIR).unwrap_or(store_path);
        // Guard against store paths from other stores or malformed input.
        let base = base.split('/').next().unwrap_or_default();

        // Too short to have a hash, so there's nothing to look up by.
        let Some((hash, rest)) = base.split_at_checked(HASH_LEN) else {
            return Self {
                name: base.to_string(),
                ..Default::default()
            };
        };
        let rest = rest.strip_prefix('-').unwrap_or(rest);

        let elems: Vec<&str> = rest.split('-').collect();
        let version_at = elems
            .iter()
            .skip(1)
            .position(|elem| elem.starts_with(|c: char| c.is_ascii_digit()))
            .map(|i| i + 1);

        match version_at {
            Some(i) => Self {
                hash: hash.to_string(),
                name: elems[..i].join("-"),
                version: elems[i].to_string(),
                output: elems[i + 1..].join("-"),
            },
            None => Self {
                hash: hash.to_string(),
                name: rest.to_string(),
                ..Default::default()
            },
        }
    }
}

impl fmt::Display for StorePathParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(STORE_DIR)?;
        if !self.hash.is_empty() {
            write!(f, "{}-", self.hash)?;
        }
        f.write_str(&self.name)?;
        for part in [&self.version, &self.output] {
            if !part.is_empty() {
                write!(f, "-{part}")?;
            }
        }
        Ok(())
    }
}
