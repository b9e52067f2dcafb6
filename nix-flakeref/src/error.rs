use miette::Diagnostic;
use thiserror::Error;

/// Errors produced while parsing flake references and installables.
///
/// Messages only ever echo the user's own input, so they are safe to show
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Diagnostic, Error)]
pub enum ParseError {
    #[error("empty flake reference")]
    EmptyRef,

    #[error("empty flake installable")]
    EmptyInstallable,

    #[error("path-style flake reference {0:?} contains a '?' or '#'")]
    PathContainsQueryOrFragment(String),

    #[error("flake reference {0:?} contains a URL fragment")]
    UnexpectedFragment(String),

    #[error("parse flake reference as URL: {0}")]
    #[diagnostic(help("special characters in URL-like flake references must be percent-encoded"))]
    InvalidUrl(String),

    #[error("unsupported flake reference URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("flake reference {0:?} is missing a flake id")]
    MissingId(String),

    #[error("path flake reference {0:?} is missing a path")]
    MissingPath(String),

    #[error("{scheme} flake reference {raw:?} must have an owner and a repo")]
    MissingOwnerOrRepo { scheme: String, raw: String },

    #[error("{0} flake reference has a ref and a rev")]
    RefAndRev(String),

    #[error("{scheme} flake reference has a {field} in the path ({path:?}) and a {field} query parameter ({query:?})")]
    ConflictingQuery {
        scheme: String,
        field: &'static str,
        path: String,
        query: String,
    },

    #[error("parse flake reference URL query parameter: lastModified={0}")]
    InvalidLastModified(String),

    #[error("invalid port {0:?} in flake reference URL")]
    InvalidPort(String),
}
