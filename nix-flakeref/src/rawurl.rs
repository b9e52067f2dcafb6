//! Minimal URL splitting for flake references.
//!
//! Flake references are "URL-like" rather than URLs: the scheme is optional
//! for indirect references, opaque forms such as `github:owner/repo` are the
//! norm, and escaping rules differ per component. This module splits a raw
//! string into its components following RFC 3986 and leaves interpretation to
//! the flake reference parser.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use url::form_urlencoded;

use crate::error::ParseError;

/// Characters escaped in a single path segment: everything except RFC 3986
/// unreserved characters and the sub-delimiters allowed in a segment. The
/// segment separator `/` is always escaped.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$');

/// Characters escaped in a fragment (attribute path).
const FRAGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b',')
    .remove(b'/')
    .remove(b':')
    .remove(b';')
    .remove(b'=')
    .remove(b'?')
    .remove(b'@')
    .remove(b'!')
    .remove(b'(')
    .remove(b')')
    .remove(b'*');

/// A raw string split into URL components. Only `fragment` is decoded.
#[derive(Debug, Default)]
pub(crate) struct RawUrl<'a> {
    /// Lowercased scheme, empty when absent.
    pub scheme: String,
    pub authority: Option<&'a str>,
    /// Escaped hierarchical path. Empty when the URL is opaque.
    pub path: &'a str,
    /// Escaped opaque part, as in `github:NixOS/nix`.
    pub opaque: &'a str,
    pub query: &'a str,
    pub fragment: Option<String>,
}

impl<'a> RawUrl<'a> {
    pub fn parse(raw: &'a str) -> Result<Self, ParseError> {
        let invalid = |msg: &str| ParseError::InvalidUrl(format!("{raw:?}: {msg}"));

        if raw.bytes().any(|b| b < 0x20 || b == 0x7f) {
            return Err(invalid("invalid control character in URL"));
        }

        let mut url = RawUrl::default();
        let (rest, fragment) = match raw.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment)),
            None => (raw, None),
        };
        if let Some(fragment) = fragment {
            url.fragment = Some(unescape(fragment).map_err(|_| invalid("invalid fragment escape"))?);
        }

        let (scheme, rest) = split_scheme(rest).ok_or_else(|| invalid("missing protocol scheme"))?;
        url.scheme = scheme.to_ascii_lowercase();

        let rest = match rest.split_once('?') {
            Some((rest, query)) => {
                url.query = query;
                rest
            }
            None => rest,
        };

        if !rest.starts_with('/') && !url.scheme.is_empty() {
            url.opaque = rest;
            return Ok(url);
        }
        if url.scheme.is_empty() {
            let first_segment = rest.split('/').next().unwrap_or_default();
            if first_segment.contains(':') {
                return Err(invalid("first path segment in URL cannot contain colon"));
            }
        }

        let mut rest = rest;
        if let Some(after) = rest.strip_prefix("//") {
            let end = after.find('/').unwrap_or(after.len());
            let authority = &after[..end];
            validate_port(authority)?;
            url.authority = Some(authority);
            rest = &after[end..];
        }
        check_escapes(rest).map_err(|_| invalid("invalid URL escape in path"))?;
        url.path = rest;
        Ok(url)
    }

    /// Decoded query parameters.
    pub fn query(&self) -> Query {
        Query::parse(self.query)
    }

    /// Reassembles the scheme, authority, and path with a new query string.
    pub fn to_string_with_query(&self, scheme: &str, query: &Query) -> String {
        let mut out = String::from(scheme);
        out.push(':');
        if let Some(authority) = self.authority {
            out.push_str("//");
            out.push_str(authority);
        }
        out.push_str(self.path);
        out.push_str(self.opaque);
        let query = query.encode();
        if !query.is_empty() {
            out.push('?');
            out.push_str(&query);
        }
        out
    }

    /// The port component of the authority, if any.
    pub fn port(&self) -> Result<Option<u16>, ParseError> {
        match self.authority.and_then(authority_port) {
            None | Some("") => Ok(None),
            Some(port) => port
                .parse()
                .map(Some)
                .map_err(|_| ParseError::InvalidPort(port.to_string())),
        }
    }

    /// Splits the path (or opaque part when there is no path) into at most
    /// `n` unescaped elements. Splitting happens before unescaping so that an
    /// encoded `%2F` stays inside its element.
    pub fn split_path(&self, n: usize) -> Result<Vec<String>, ParseError> {
        let raw = if self.path.is_empty() {
            self.opaque
        } else {
            self.path
        };
        let raw = raw.trim();
        let raw = raw.strip_prefix('/').unwrap_or(raw);
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        clean_path(raw)
            .splitn(n, '/')
            .map(|elem| {
                unescape(elem).map_err(|_| ParseError::InvalidUrl(format!("{elem:?}: invalid URL escape")))
            })
            .collect()
    }
}

/// Decoded query parameters, sorted by key. Only the first value of a
/// repeated key is kept.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Query(BTreeMap<String, String>);

impl Query {
    pub fn parse(raw: &str) -> Self {
        let mut params = BTreeMap::new();
        for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
            params.entry(key.into_owned()).or_insert_with(|| value.into_owned());
        }
        Self(params)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).filter(|v| !v.is_empty()).cloned()
    }

    /// Removes and returns a parameter.
    pub fn take(&mut self, key: &str) -> Option<String> {
        self.0.remove(key).filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, key: &str, value: Option<impl ToString>) {
        if let Some(value) = value {
            let value = value.to_string();
            if !value.is_empty() {
                self.0.insert(key.to_string(), value);
            }
        }
    }

    /// Encodes the parameters sorted by key, omitting empty values.
    pub fn encode(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in self.0.iter().filter(|(_, v)| !v.is_empty()) {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }
}

/// Escapes and joins path elements, skipping empty ones.
pub(crate) fn join_escaped<'s>(elems: impl IntoIterator<Item = &'s str>) -> String {
    elems
        .into_iter()
        .filter(|e| !e.is_empty())
        .map(escape_segment)
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn escape_segment(s: &str) -> String {
    utf8_percent_encode(s, PATH_SEGMENT).to_string()
}

pub(crate) fn escape_fragment(s: &str) -> String {
    utf8_percent_encode(s, FRAGMENT).to_string()
}

pub(crate) fn unescape(s: &str) -> Result<String, ()> {
    check_escapes(s)?;
    percent_decode_str(s)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| ())
}

/// Lexically cleans a slash-separated path: repeated separators and `.`
/// elements are removed and `..` elements are resolved.
pub(crate) fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let rooted = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for elem in path.split('/') {
        match elem {
            "" | "." => {}
            ".." => match out.last().copied() {
                Some(last) if last != ".." => {
                    out.pop();
                }
                _ if !rooted => out.push(".."),
                _ => {}
            },
            elem => out.push(elem),
        }
    }
    let joined = out.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Returns `None` if the string starts with a `:`, which is an empty scheme.
fn split_scheme(raw: &str) -> Option<(&str, &str)> {
    for (i, c) in raw.bytes().enumerate() {
        match c {
            b'a'..=b'z' | b'A'..=b'Z' => {}
            b'0'..=b'9' | b'+' | b'-' | b'.' if i > 0 => {}
            b':' if i == 0 => return None,
            b':' => return Some((&raw[..i], &raw[i + 1..])),
            _ => return Some(("", raw)),
        }
    }
    Some(("", raw))
}

fn check_escapes(s: &str) -> Result<(), ()> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(());
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

fn authority_port(authority: &str) -> Option<&str> {
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    if host.starts_with('[') {
        return host.rsplit_once("]:").map(|(_, port)| port);
    }
    host.rsplit_once(':').map(|(_, port)| port)
}

fn validate_port(authority: &str) -> Result<(), ParseError> {
    match authority_port(authority) {
        Some(port) if !port.bytes().all(|b| b.is_ascii_digit()) => {
            Err(ParseError::InvalidPort(port.to_string()))
        }
        _ => Ok(()),
    }
}
