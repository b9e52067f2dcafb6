use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::rawurl::{Query, RawUrl, clean_path, escape_segment, join_escaped};

/// The kind of source a flake reference points to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlakeType {
    /// Resolved through the flake registry, like `nixpkgs`.
    #[default]
    Indirect,
    Path,
    File,
    Ssh,
    GitHub,
    GitLab,
    BitBucket,
    Git,
    Tarball,
    Builtin,
}

impl FlakeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlakeType::Indirect => "indirect",
            FlakeType::Path => "path",
            FlakeType::File => "file",
            FlakeType::Ssh => "ssh",
            FlakeType::GitHub => "github",
            FlakeType::GitLab => "gitlab",
            FlakeType::BitBucket => "bitbucket",
            FlakeType::Git => "git",
            FlakeType::Tarball => "tarball",
            FlakeType::Builtin => "builtin",
        }
    }

    fn is_forge(&self) -> bool {
        matches!(
            self,
            FlakeType::GitHub | FlakeType::GitLab | FlakeType::BitBucket
        )
    }
}

impl fmt::Display for FlakeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed Nix flake reference.
///
/// The JSON encoding matches the attribute set form Nix uses for flake
/// references, so the `locked` field of `nix flake metadata --json`
/// deserializes directly into a `FlakeRef`.
///
/// A flake reference never contains an attribute path or output spec; see
/// [`crate::Installable`] for those.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlakeRef {
    #[serde(rename = "type")]
    pub flake_type: FlakeType,

    /// Registry identifier of an indirect reference, such as `nixpkgs`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,

    /// Filesystem path of a path reference.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub repo: Option<String>,

    /// Git commit hash.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rev: Option<String>,
    /// Git branch or tag.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub r#ref: Option<String>,

    /// Subdirectory containing `flake.nix`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dir: Option<String>,

    /// VCS host override for github, gitlab and bitbucket references.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub host: Option<String>,

    /// Transport URL of file, tarball, git and ssh references. It never
    /// carries the parameters that have their own field.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,

    /// SRI hash of the flake source.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub nar_hash: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_modified: Option<i64>,

    /// Port of a privately hosted git server.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub port: Option<u16>,
}

impl FlakeRef {
    pub fn new(flake_type: FlakeType) -> Self {
        Self {
            flake_type,
            ..Default::default()
        }
    }

    /// An indirect reference to `id`, optionally pinned to a branch or
    /// commit.
    pub fn indirect(id: impl Into<String>, rev_or_ref: Option<&str>) -> Self {
        let mut parsed = Self::new(FlakeType::Indirect);
        parsed.id = Some(id.into());
        if let Some(rev_or_ref) = rev_or_ref.filter(|s| !s.is_empty()) {
            parsed.set_rev_or_ref(rev_or_ref.to_string());
        }
        parsed
    }

    /// Parses a raw flake reference the way the Nix CLI does. The raw
    /// reference is one of:
    ///
    /// - a path-like reference starting with `.` or `/`, such as `./flake`.
    ///   It is kept verbatim and must not contain `?` or `#`.
    /// - an indirect reference such as `nixpkgs` or `nixpkgs/unstable`.
    /// - a URL-like reference with any special characters percent-encoded.
    ///
    /// Parsing is purely syntactic; a successfully parsed reference may still
    /// fail to resolve.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        if raw.is_empty() {
            return Err(ParseError::EmptyRef);
        }
        if raw.starts_with(['.', '/']) {
            if raw.contains(['?', '#']) {
                return Err(ParseError::PathContainsQueryOrFragment(raw.to_string()));
            }
            let mut parsed = Self::new(FlakeType::Path);
            parsed.path = Some(raw.to_string());
            return Ok(parsed);
        }

        let (parsed, fragment) = parse_url_ref(raw)?;
        if fragment.is_some() {
            return Err(ParseError::UnexpectedFragment(raw.to_string()));
        }
        Ok(parsed)
    }

    /// Reports whether the reference always resolves to the same content.
    /// Where that depends on local Nix settings this conservatively returns
    /// false.
    pub fn is_locked(&self) -> bool {
        match self.flake_type {
            FlakeType::File | FlakeType::Path | FlakeType::Tarball => self.nar_hash.is_some(),
            FlakeType::Git | FlakeType::Ssh => self.rev.is_some(),
            // Whether forge tarballs are trusted is a Nix setting, so require
            // both.
            FlakeType::GitHub | FlakeType::GitLab | FlakeType::BitBucket => {
                self.rev.is_some() && self.nar_hash.is_some()
            }
            FlakeType::Indirect | FlakeType::Builtin => false,
        }
    }

    fn set_rev_or_ref(&mut self, rev_or_ref: String) {
        if is_git_hash(&rev_or_ref) {
            self.rev = Some(rev_or_ref);
        } else {
            self.r#ref = Some(rev_or_ref);
        }
    }

    /// Normalized URL-like form, or `None` when a required field is missing.
    fn encode(&self) -> Option<String> {
        let mut query = Query::default();
        let encoded = match self.flake_type {
            FlakeType::Indirect => {
                let id = non_empty(&self.id)?;
                query.set("dir", self.dir.as_deref());
                format!(
                    "flake:{}",
                    join_escaped([
                        id,
                        self.r#ref.as_deref().unwrap_or_default(),
                        self.rev.as_deref().unwrap_or_default(),
                    ])
                )
            }
            FlakeType::Path => {
                let path = clean_path(non_empty(&self.path)?);
                let escaped = path.split('/').map(escape_segment).collect::<Vec<_>>();
                format!("path:{}", escaped.join("/"))
            }
            FlakeType::GitHub | FlakeType::GitLab | FlakeType::BitBucket => {
                let owner = non_empty(&self.owner)?;
                let repo = non_empty(&self.repo)?;
                let rev_or_ref = self.rev.as_deref().or(self.r#ref.as_deref());
                query.set("host", self.host.as_deref());
                query.set("dir", self.dir.as_deref());
                format!(
                    "{}:{}",
                    self.flake_type,
                    join_escaped([owner, repo, rev_or_ref.unwrap_or_default()])
                )
            }
            FlakeType::Git | FlakeType::Ssh => {
                let (base, existing) = split_query(non_empty(&self.url)?);
                query = existing;
                query.set("ref", self.r#ref.as_deref());
                query.set("rev", self.rev.as_deref());
                query.set("dir", self.dir.as_deref());
                if base.starts_with("git:") || base.starts_with("git+") {
                    base.to_string()
                } else {
                    format!("git+{base}")
                }
            }
            FlakeType::Tarball | FlakeType::File => {
                let (base, existing) = split_query(non_empty(&self.url)?);
                query = existing;
                query.set("dir", self.dir.as_deref());
                let prefix = format!("{}+", self.flake_type);
                if base.starts_with(&prefix) {
                    base.to_string()
                } else {
                    format!("{prefix}{base}")
                }
            }
            FlakeType::Builtin => return None,
        };

        query.set("lastModified", self.last_modified);
        query.set("narHash", self.nar_hash.as_deref());
        let query = query.encode();
        if query.is_empty() {
            Some(encoded)
        } else {
            Some(format!("{encoded}?{query}"))
        }
    }
}

/// Encodes the reference as a normalized URL-like string. If two references
/// are equal their strings are equal:
///
/// - the URL-like form and scheme are always used, even where optional.
/// - paths are lexically cleaned and path segments percent-escaped.
/// - fields that fit in either the path or the query go in the path.
/// - query parameters are sorted by key.
///
/// A reference with a missing required field encodes as an empty string.
impl fmt::Display for FlakeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode().unwrap_or_default())
    }
}

impl FromStr for FlakeRef {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parses a URL-like reference and returns it with its decoded fragment.
pub(crate) fn parse_url_ref(raw: &str) -> Result<(FlakeRef, Option<String>), ParseError> {
    // `nix eval --json --expr 'builtins.parseFlakeRef "<ref>"'` shows how Nix
    // itself parses a reference.
    let url = RawUrl::parse(raw)?;

    let parsed = match url.scheme.as_str() {
        "" | "flake" => parse_indirect(raw, &url)?,
        "path" => parse_path(raw, &url)?,
        "http" | "https" | "file" => {
            let flake_type = if is_archive(url.path) {
                FlakeType::Tarball
            } else {
                FlakeType::File
            };
            parse_transport(flake_type, &url, &url.scheme)?
        }
        "tarball+http" | "tarball+https" | "tarball+file" => {
            parse_transport(FlakeType::Tarball, &url, &url.scheme["tarball+".len()..])?
        }
        "file+http" | "file+https" | "file+file" => {
            parse_transport(FlakeType::File, &url, &url.scheme["file+".len()..])?
        }
        "git" => parse_transport(FlakeType::Git, &url, "git")?,
        "git+http" | "git+https" | "git+git" | "git+file" => {
            parse_transport(FlakeType::Git, &url, &url.scheme["git+".len()..])?
        }
        "git+ssh" => parse_transport(FlakeType::Ssh, &url, "ssh")?,
        "github" => parse_forge(FlakeType::GitHub, raw, &url)?,
        "gitlab" => parse_forge(FlakeType::GitLab, raw, &url)?,
        "bitbucket" => parse_forge(FlakeType::BitBucket, raw, &url)?,
        scheme => return Err(ParseError::UnsupportedScheme(scheme.to_string())),
    };
    Ok((parsed, url.fragment))
}

// [flake:]<flake-id>(/<rev-or-ref>(/rev)?)?
fn parse_indirect(raw: &str, url: &RawUrl<'_>) -> Result<FlakeRef, ParseError> {
    let mut split = url.split_path(3)?.into_iter();
    let id = split
        .next()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ParseError::MissingId(raw.to_string()))?;

    let mut parsed = FlakeRef::new(FlakeType::Indirect);
    parsed.id = Some(id);
    if let Some(rev_or_ref) = split.next() {
        parsed.set_rev_or_ref(rev_or_ref);
    }
    if let Some(rev) = split.next() {
        if parsed.rev.is_none() {
            parsed.rev = Some(rev);
        }
    }

    let mut query = url.query();
    parsed.dir = query.take("dir");
    read_lock_params(&mut parsed, &mut query)?;
    Ok(parsed)
}

// path:<path>(\?<params>)?
fn parse_path(raw: &str, url: &RawUrl<'_>) -> Result<FlakeRef, ParseError> {
    let escaped = if url.path.is_empty() {
        url.opaque
    } else {
        url.path
    };
    let path = crate::rawurl::unescape(escaped)
        .map_err(|_| ParseError::InvalidUrl(format!("{raw:?}: invalid URL escape in path")))?;
    if path.is_empty() {
        return Err(ParseError::MissingPath(raw.to_string()));
    }

    let mut parsed = FlakeRef::new(FlakeType::Path);
    parsed.path = Some(path);
    read_lock_params(&mut parsed, &mut url.query())?;
    Ok(parsed)
}

/// File, tarball, git and ssh references keep their transport URL. The
/// parameters that have their own field are moved out of its query; any
/// other parameters stay.
fn parse_transport(
    flake_type: FlakeType,
    url: &RawUrl<'_>,
    scheme: &str,
) -> Result<FlakeRef, ParseError> {
    let mut parsed = FlakeRef::new(flake_type);
    let mut query = url.query();
    parsed.dir = query.take("dir");
    if matches!(flake_type, FlakeType::Git | FlakeType::Ssh) {
        parsed.r#ref = query.take("ref");
        parsed.rev = query.take("rev");
    }
    if flake_type == FlakeType::Ssh {
        parsed.port = url.port()?;
    }
    read_lock_params(&mut parsed, &mut query)?;
    parsed.url = Some(url.to_string_with_query(scheme, &query));
    Ok(parsed)
}

// <github|gitlab|bitbucket>:<owner>/<repo>(/<rev-or-ref>)?(\?<params>)?
fn parse_forge(flake_type: FlakeType, raw: &str, url: &RawUrl<'_>) -> Result<FlakeRef, ParseError> {
    debug_assert!(flake_type.is_forge());
    let scheme = flake_type.to_string();

    // Split at most 3 times so that refs containing slashes survive:
    // "github:jetify-com/devbox/gcurtis/flakeref" has the ref
    // "gcurtis/flakeref".
    let mut split = url.split_path(3)?.into_iter();
    let (Some(owner), Some(repo)) = (split.next(), split.next()) else {
        return Err(ParseError::MissingOwnerOrRepo {
            scheme,
            raw: raw.to_string(),
        });
    };
    if owner.is_empty() || repo.is_empty() {
        return Err(ParseError::MissingOwnerOrRepo {
            scheme,
            raw: raw.to_string(),
        });
    }

    let mut parsed = FlakeRef::new(flake_type);
    parsed.owner = Some(owner);
    parsed.repo = Some(repo);
    if let Some(rev_or_ref) = split.next() {
        parsed.set_rev_or_ref(rev_or_ref);
    }

    let mut query = url.query();
    parsed.host = query.take("host");
    parsed.dir = query.take("dir");
    if let Some(query_ref) = query.take("ref") {
        if parsed.rev.is_some() {
            return Err(ParseError::RefAndRev(scheme));
        }
        if let Some(path_ref) = parsed.r#ref.as_deref() {
            if path_ref != query_ref {
                return Err(ParseError::ConflictingQuery {
                    scheme,
                    field: "ref",
                    path: path_ref.to_string(),
                    query: query_ref,
                });
            }
        }
        parsed.r#ref = Some(query_ref);
    }
    if let Some(query_rev) = query.take("rev") {
        if parsed.r#ref.is_some() {
            return Err(ParseError::RefAndRev(scheme));
        }
        if let Some(path_rev) = parsed.rev.as_deref() {
            if path_rev != query_rev {
                return Err(ParseError::ConflictingQuery {
                    scheme,
                    field: "rev",
                    path: path_rev.to_string(),
                    query: query_rev,
                });
            }
        }
        parsed.rev = Some(query_rev);
    }
    read_lock_params(&mut parsed, &mut query)?;
    Ok(parsed)
}

fn read_lock_params(parsed: &mut FlakeRef, query: &mut Query) -> Result<(), ParseError> {
    parsed.nar_hash = query.take("narHash");
    parsed.last_modified = query
        .take("lastModified")
        .map(|s| s.parse().map_err(|_| ParseError::InvalidLastModified(s)))
        .transpose()?;
    Ok(())
}

fn split_query(url: &str) -> (&str, Query) {
    match url.split_once('?') {
        Some((base, query)) => (base, Query::parse(query)),
        None => (url, Query::default()),
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

/// Reports whether `s` is a full, lowercase git commit hash.
pub fn is_git_hash(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn is_archive(path: &str) -> bool {
    const ARCHIVE_SUFFIXES: [&str; 7] = [
        ".zip", ".tar", ".tgz", ".tar.gz", ".tar.xz", ".tar.bz2", ".tar.zst",
    ];
    ARCHIVE_SUFFIXES.iter().any(|suffix| path.ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const REV: &str = "5233fd2ba76a3accb5aaa999c00509a11fd0793c";

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    fn path(p: &str) -> FlakeRef {
        FlakeRef {
            flake_type: FlakeType::Path,
            path: s(p),
            ..Default::default()
        }
    }

    fn github(owner: &str, repo: &str) -> FlakeRef {
        FlakeRef {
            flake_type: FlakeType::GitHub,
            owner: s(owner),
            repo: s(repo),
            ..Default::default()
        }
    }

    fn url(flake_type: FlakeType, u: &str) -> FlakeRef {
        FlakeRef {
            flake_type,
            url: s(u),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_path_style() {
        assert_eq!(FlakeRef::parse(".").unwrap(), path("."));
        assert_eq!(FlakeRef::parse("./flake").unwrap(), path("./flake"));
        assert_eq!(FlakeRef::parse("/abs/flake").unwrap(), path("/abs/flake"));
        // Raw unicode is kept verbatim; no URL parsing happens.
        assert_eq!(
            FlakeRef::parse("./Ûñî©ôδ€/flake\n").unwrap(),
            path("./Ûñî©ôδ€/flake\n")
        );

        for raw in ["./flake#attr", "./flake?dir=sub", "/flake#"] {
            assert_eq!(
                FlakeRef::parse(raw),
                Err(ParseError::PathContainsQueryOrFragment(raw.to_string()))
            );
        }
    }

    #[test]
    fn test_parse_url_path() {
        assert_eq!(FlakeRef::parse("path:.").unwrap(), path("."));
        assert_eq!(FlakeRef::parse("path:/flake").unwrap(), path("/flake"));
        assert_eq!(FlakeRef::parse("path:%25").unwrap(), path("%"));
        assert_eq!(
            FlakeRef::parse("path:flake?narHash=sha256-abc&lastModified=1700000000").unwrap(),
            FlakeRef {
                nar_hash: s("sha256-abc"),
                last_modified: Some(1700000000),
                ..path("flake")
            }
        );
        assert_eq!(
            FlakeRef::parse("path:flake?lastModified=yesterday"),
            Err(ParseError::InvalidLastModified("yesterday".to_string()))
        );
    }

    #[test]
    fn test_parse_indirect() {
        assert_eq!(
            FlakeRef::parse("nixpkgs").unwrap(),
            FlakeRef::indirect("nixpkgs", None)
        );
        assert_eq!(
            FlakeRef::parse("flake:nixpkgs/nixpkgs-unstable").unwrap(),
            FlakeRef {
                r#ref: s("nixpkgs-unstable"),
                ..FlakeRef::indirect("nixpkgs", None)
            }
        );
        assert_eq!(
            FlakeRef::parse(&format!("nixpkgs/{REV}")).unwrap(),
            FlakeRef {
                rev: s(REV),
                ..FlakeRef::indirect("nixpkgs", None)
            }
        );
        assert_eq!(
            FlakeRef::parse(&format!("flake:nixpkgs/release-23.11/{REV}?dir=sub")).unwrap(),
            FlakeRef {
                r#ref: s("release-23.11"),
                rev: s(REV),
                dir: s("sub"),
                ..FlakeRef::indirect("nixpkgs", None)
            }
        );
        assert_eq!(
            FlakeRef::parse("flake:"),
            Err(ParseError::MissingId("flake:".to_string()))
        );
    }

    #[test]
    fn test_parse_forges() {
        assert_eq!(FlakeRef::parse("github:NixOS/nix").unwrap(), github("NixOS", "nix"));
        assert_eq!(
            FlakeRef::parse(&format!("github:NixOS/nix/{REV}")).unwrap(),
            FlakeRef {
                rev: s(REV),
                ..github("NixOS", "nix")
            }
        );
        assert_eq!(
            FlakeRef::parse("github:NixOS/nix/v1.2.3").unwrap(),
            FlakeRef {
                r#ref: s("v1.2.3"),
                ..github("NixOS", "nix")
            }
        );
        // Uppercase or short hashes are refs.
        assert_eq!(
            FlakeRef::parse("github:NixOS/nix/5233FD2BA76A3ACCB5AAA999C00509A11FD0793C")
                .unwrap()
                .r#ref
                .as_deref(),
            Some("5233FD2BA76A3ACCB5AAA999C00509A11FD0793C")
        );
        assert_eq!(
            FlakeRef::parse("github:jetify-com/devbox/gcurtis/flakeref").unwrap(),
            FlakeRef {
                r#ref: s("gcurtis/flakeref"),
                ..github("jetify-com", "devbox")
            }
        );
        assert_eq!(
            FlakeRef::parse("github:NixOS/nix?ref=v1.2.3&dir=sub&host=example.com").unwrap(),
            FlakeRef {
                r#ref: s("v1.2.3"),
                dir: s("sub"),
                host: s("example.com"),
                ..github("NixOS", "nix")
            }
        );
        assert_eq!(
            FlakeRef::parse("gitlab:owner/repo/v1").unwrap(),
            FlakeRef {
                flake_type: FlakeType::GitLab,
                r#ref: s("v1"),
                ..github("owner", "repo")
            }
        );
        assert_eq!(
            FlakeRef::parse("bitbucket:owner/repo?host=bb.example.com").unwrap(),
            FlakeRef {
                flake_type: FlakeType::BitBucket,
                host: s("bb.example.com"),
                ..github("owner", "repo")
            }
        );
    }

    #[test]
    fn test_parse_forge_conflicts() {
        assert_eq!(
            FlakeRef::parse(&format!("github:NixOS/nix?ref=v1.2.3&rev={REV}")),
            Err(ParseError::RefAndRev("github".to_string()))
        );
        assert!(matches!(
            FlakeRef::parse("github:NixOS/nix/v1.2.3?ref=v2"),
            Err(ParseError::ConflictingQuery { field: "ref", .. })
        ));
        assert!(matches!(
            FlakeRef::parse(&format!(
                "github:NixOS/nix/{REV}?rev=e486d8d40e626a20e06d792db8cc5ac5aba9a5b4"
            )),
            Err(ParseError::ConflictingQuery { field: "rev", .. })
        ));
        assert_eq!(
            FlakeRef::parse("github:NixOS/nix/v1.2.3?ref=v1.2.3").unwrap(),
            FlakeRef {
                r#ref: s("v1.2.3"),
                ..github("NixOS", "nix")
            }
        );
        assert!(matches!(
            FlakeRef::parse("github:NixOS"),
            Err(ParseError::MissingOwnerOrRepo { .. })
        ));
    }

    #[test]
    fn test_parse_transports() {
        assert_eq!(
            FlakeRef::parse("https://example.com/flake.tar.gz?dir=sub").unwrap(),
            FlakeRef {
                dir: s("sub"),
                ..url(FlakeType::Tarball, "https://example.com/flake.tar.gz")
            }
        );
        assert_eq!(
            FlakeRef::parse("https://example.com/flake").unwrap(),
            url(FlakeType::File, "https://example.com/flake")
        );
        assert_eq!(
            FlakeRef::parse("tarball+https://example.com/flake").unwrap(),
            url(FlakeType::Tarball, "https://example.com/flake")
        );
        assert_eq!(
            FlakeRef::parse("file+file:///home/flake").unwrap(),
            url(FlakeType::File, "file:///home/flake")
        );
        assert_eq!(
            FlakeRef::parse("git+https://example.com/repo/flake?ref=main&shallow=1").unwrap(),
            FlakeRef {
                r#ref: s("main"),
                ..url(FlakeType::Git, "https://example.com/repo/flake?shallow=1")
            }
        );
        assert_eq!(
            FlakeRef::parse(&format!(
                "git+ssh://git@example.com:2222/repo/flake?rev={REV}"
            ))
            .unwrap(),
            FlakeRef {
                rev: s(REV),
                port: Some(2222),
                ..url(FlakeType::Ssh, "ssh://git@example.com:2222/repo/flake")
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(FlakeRef::parse(""), Err(ParseError::EmptyRef));
        assert_eq!(
            FlakeRef::parse("nixpkgs#hello"),
            Err(ParseError::UnexpectedFragment("nixpkgs#hello".to_string()))
        );
        assert_eq!(
            FlakeRef::parse("sourcehut:~user/repo"),
            Err(ParseError::UnsupportedScheme("sourcehut".to_string()))
        );
        assert!(matches!(
            FlakeRef::parse("git+ssh://example.com:abc/repo"),
            Err(ParseError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_string() {
        let cases = [
            (FlakeRef::default(), ""),
            (FlakeRef::new(FlakeType::Builtin), ""),
            // Paths.
            (path("."), "path:."),
            (path("./"), "path:."),
            (path("./flake"), "path:flake"),
            (path("./relative/../flake"), "path:flake"),
            (path("/"), "path:/"),
            (path("/absolute/flake"), "path:/absolute/flake"),
            (path("%"), "path:%25"),
            (path("/%2F"), "path:/%252F"),
            (
                path("./Ûñî©ôδ€/flake\n"),
                "path:%C3%9B%C3%B1%C3%AE%C2%A9%C3%B4%CE%B4%E2%82%AC/flake%0A",
            ),
            // Indirect.
            (FlakeRef::indirect("indirect", None), "flake:indirect"),
            (
                FlakeRef {
                    dir: s("sub/dir"),
                    ..FlakeRef::indirect("indirect", None)
                },
                "flake:indirect?dir=sub%2Fdir",
            ),
            (FlakeRef::indirect("indirect", Some("my/ref")), "flake:indirect/my%2Fref"),
            (
                FlakeRef::indirect("indirect", Some(REV)),
                "flake:indirect/5233fd2ba76a3accb5aaa999c00509a11fd0793c",
            ),
            (
                FlakeRef {
                    rev: s(REV),
                    ..FlakeRef::indirect("indirect", Some("ref"))
                },
                "flake:indirect/ref/5233fd2ba76a3accb5aaa999c00509a11fd0793c",
            ),
            // Forges.
            (github("NixOS", "nix"), "github:NixOS/nix"),
            (
                FlakeRef {
                    r#ref: s("my/ref"),
                    ..github("NixOS", "nix")
                },
                "github:NixOS/nix/my%2Fref",
            ),
            (
                FlakeRef {
                    rev: s(REV),
                    r#ref: s("main"),
                    ..github("NixOS", "nix")
                },
                "github:NixOS/nix/5233fd2ba76a3accb5aaa999c00509a11fd0793c",
            ),
            (
                FlakeRef {
                    dir: s("sub/dir"),
                    host: s("example.com"),
                    ..github("NixOS", "nix")
                },
                "github:NixOS/nix?dir=sub%2Fdir&host=example.com",
            ),
            (
                FlakeRef {
                    flake_type: FlakeType::GitLab,
                    rev: s(REV),
                    nar_hash: s("sha256-abc"),
                    ..github("owner", "repo")
                },
                "gitlab:owner/repo/5233fd2ba76a3accb5aaa999c00509a11fd0793c?narHash=sha256-abc",
            ),
            (FlakeRef { repo: None, ..github("NixOS", "nix") }, ""),
            // Git.
            (
                url(FlakeType::Git, "https://example.com/repo/flake"),
                "git+https://example.com/repo/flake",
            ),
            (
                url(FlakeType::Git, "git://example.com/repo/flake"),
                "git://example.com/repo/flake",
            ),
            (
                url(FlakeType::Ssh, "ssh://git@example.com/repo/flake"),
                "git+ssh://git@example.com/repo/flake",
            ),
            (
                FlakeRef {
                    r#ref: s("my/ref"),
                    rev: s("e486d8d40e626a20e06d792db8cc5ac5aba9a5b4"),
                    dir: s("sub/dir"),
                    ..url(FlakeType::Git, "https://example.com/repo/flake?shallow=1")
                },
                "git+https://example.com/repo/flake?dir=sub%2Fdir&ref=my%2Fref&rev=e486d8d40e626a20e06d792db8cc5ac5aba9a5b4&shallow=1",
            ),
            // Tarballs and files.
            (
                url(FlakeType::Tarball, "https://example.com/flake"),
                "tarball+https://example.com/flake",
            ),
            (
                FlakeRef {
                    dir: s("sub/dir"),
                    ..url(FlakeType::Tarball, "https://example.com/flake")
                },
                "tarball+https://example.com/flake?dir=sub%2Fdir",
            ),
            (
                url(FlakeType::Tarball, "file:///home/flake"),
                "tarball+file:///home/flake",
            ),
            (
                url(FlakeType::File, "http://example.com/flake.git"),
                "file+http://example.com/flake.git",
            ),
        ];

        for (flake_ref, want) in cases {
            assert_eq!(flake_ref.to_string(), want, "input = {flake_ref:?}");
        }
    }

    #[test]
    fn test_locked() {
        assert!(!FlakeRef::indirect("nixpkgs", Some(REV)).is_locked());
        assert!(!FlakeRef { rev: s(REV), ..github("NixOS", "nixpkgs") }.is_locked());
        assert!(
            FlakeRef {
                rev: s(REV),
                nar_hash: s("sha256-abc"),
                ..github("NixOS", "nixpkgs")
            }
            .is_locked()
        );
        assert!(FlakeRef { rev: s(REV), ..url(FlakeType::Git, "https://x/y") }.is_locked());
        assert!(!path("/flake").is_locked());
        assert!(FlakeRef { nar_hash: s("sha256-abc"), ..path("/flake") }.is_locked());
    }

    #[test]
    fn test_json_matches_nix_attrs() {
        let locked: FlakeRef = serde_json::from_str(
            r#"{"lastModified":1700000000,"narHash":"sha256-abc","owner":"NixOS","repo":"nixpkgs","rev":"5233fd2ba76a3accb5aaa999c00509a11fd0793c","type":"github"}"#,
        )
        .unwrap();
        assert_eq!(
            locked,
            FlakeRef {
                rev: s(REV),
                nar_hash: s("sha256-abc"),
                last_modified: Some(1700000000),
                ..github("NixOS", "nixpkgs")
            }
        );
        assert_eq!(
            locked.to_string(),
            "github:NixOS/nixpkgs/5233fd2ba76a3accb5aaa999c00509a11fd0793c?lastModified=1700000000&narHash=sha256-abc"
        );
    }
}
