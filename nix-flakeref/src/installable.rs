use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;
use crate::flakeref::{FlakeRef, parse_url_ref};
use crate::rawurl::escape_fragment;

/// The outputs an installable selects, from its `^out,lib` suffix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Outputs {
    /// The package's default outputs.
    #[default]
    Default,
    /// Every output, written as `^*`.
    All,
    /// A sorted, deduplicated list of output names.
    Names(Vec<String>),
}

impl Outputs {
    /// Parses a comma separated output spec. Empty elements are dropped and
    /// a `*` anywhere selects all outputs.
    pub fn parse(spec: &str) -> Self {
        let mut names: Vec<String> = Vec::new();
        for name in spec.split(',').filter(|name| !name.is_empty()) {
            if name == "*" {
                return Outputs::All;
            }
            names.push(name.to_string());
        }
        if names.is_empty() {
            return Outputs::Default;
        }
        names.sort();
        names.dedup();
        Outputs::Names(names)
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Outputs::Default)
    }
}

impl fmt::Display for Outputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outputs::Default => Ok(()),
            Outputs::All => f.write_str("*"),
            Outputs::Names(names) => f.write_str(&names.join(",")),
        }
    }
}

/// A flake reference with an optional attribute path and output selector,
/// as accepted by commands like `nix build`:
///
/// ```text
/// github:NixOS/nixpkgs/nixos-unstable#hello^out,man
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Installable {
    pub flake_ref: FlakeRef,

    /// Attribute path from the `#` fragment, percent-decoded.
    pub attr_path: Option<String>,

    pub outputs: Outputs,
}

impl Installable {
    pub fn new(flake_ref: FlakeRef, attr_path: impl Into<String>) -> Self {
        let attr_path = attr_path.into();
        Self {
            flake_ref,
            attr_path: (!attr_path.is_empty()).then_some(attr_path),
            outputs: Outputs::Default,
        }
    }

    /// Parses an installable string.
    ///
    /// The output spec after the last `^` is never percent-decoded. A
    /// path-style flake reference such as `./flake#attr` is read as
    /// `path:./flake#attr` so that its attribute path can be split off.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        if raw.is_empty() {
            return Err(ParseError::EmptyInstallable);
        }

        let (raw, outputs) = match raw.rsplit_once('^') {
            Some((raw, spec)) => (raw, Outputs::parse(spec)),
            None => (raw, Outputs::Default),
        };
        if raw.is_empty() {
            return Err(ParseError::EmptyInstallable);
        }

        let (flake_ref, fragment) = if raw.starts_with(['.', '/']) {
            parse_url_ref(&format!("path:{raw}"))?
        } else {
            parse_url_ref(raw)?
        };
        Ok(Self {
            flake_ref,
            attr_path: fragment.filter(|attr| !attr.is_empty()),
            outputs,
        })
    }

    /// The selected output names. All outputs are returned as `["*"]` and
    /// default outputs as an empty list.
    pub fn split_outputs(&self) -> Vec<String> {
        match &self.outputs {
            Outputs::Default => Vec::new(),
            Outputs::All => vec!["*".to_string()],
            Outputs::Names(names) => names.clone(),
        }
    }
}

/// Encodes the installable as `<flakeref>#<attrpath>^<outputs>`, omitting
/// the attribute path and outputs when unset. Like [`FlakeRef`], an
/// installable whose flake reference is invalid encodes as an empty string.
impl fmt::Display for Installable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flake_ref = self.flake_ref.to_string();
        if flake_ref.is_empty() {
            return Ok(());
        }
        f.write_str(&flake_ref)?;
        if let Some(attr_path) = &self.attr_path {
            write!(f, "#{}", escape_fragment(attr_path))?;
        }
        if !self.outputs.is_default() {
            write!(f, "^{}", self.outputs)?;
        }
        Ok(())
    }
}

impl FromStr for Installable {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
