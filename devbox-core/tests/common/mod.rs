//! Common test utilities shared across test files

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use devbox_core::resolve::{FlakeMetadataResolver, SearchResolver, StorePathResolver};
use devbox_core::search::{PackageInfo, PackageVersion};
use devbox_core::{Error, Resolver, ResolverSettings, Result};
use nix_flakeref::FlakeRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

pub const SYSTEM: &str = "x86_64-linux";
pub const OTHER_SYSTEM: &str = "aarch64-darwin";
pub const NIXPKGS_COMMIT: &str = "5233fd2ba76a3accb5aaa999c00509a11fd0793c";
pub const HELLO_HASH: &str = "cvrn84c1hshv2wcds7n1rhydi6lacqns";
pub const HELLO_DARWIN_HASH: &str = "q5ghm8dr5y1x6m6aiy8yb1pmfr1ai8c7";

pub fn test_settings() -> ResolverSettings {
    ResolverSettings {
        system: SYSTEM.to_string(),
        binary_cache: "https://cache.example.org".to_string(),
        ..Default::default()
    }
}

pub fn store_path(hash: &str, name: &str) -> String {
    format!("/nix/store/{hash}-{name}")
}

/// `hello` as the search service reports it, built for two systems.
pub fn hello(version: &str, last_updated: i64) -> PackageVersion {
    let info = |system: &str, hash: &str| PackageInfo {
        commit_hash: NIXPKGS_COMMIT.to_string(),
        system: system.to_string(),
        last_updated,
        store_hash: hash.to_string(),
        store_name: "hello".to_string(),
        store_version: version.to_string(),
        attr_paths: vec!["hello".to_string()],
    };
    PackageVersion {
        name: "hello".to_string(),
        version: version.to_string(),
        systems: BTreeMap::from([
            (SYSTEM.to_string(), info(SYSTEM, HELLO_HASH)),
            (OTHER_SYSTEM.to_string(), info(OTHER_SYSTEM, HELLO_DARWIN_HASH)),
        ]),
        ..Default::default()
    }
}

/// Search service answering from a fixed table.
#[derive(Default)]
pub struct MockSearch {
    packages: Mutex<HashMap<(String, String), PackageVersion>>,
    calls: AtomicUsize,
}

impl MockSearch {
    pub fn with(self, name: &str, version: &str, pkg: PackageVersion) -> Self {
        self.set(name, version, pkg);
        self
    }

    pub fn set(&self, name: &str, version: &str, pkg: PackageVersion) {
        self.packages
            .lock()
            .unwrap()
            .insert((name.to_string(), version.to_string()), pkg);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchResolver for MockSearch {
    async fn resolve(&self, name: &str, version: &str) -> Result<PackageVersion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.packages
            .lock()
            .unwrap()
            .get(&(name.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| Error::PackageNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }
}

/// Flake locking from a fixed table keyed by the unlocked reference string.
#[derive(Default)]
pub struct MockFlakes {
    locked: HashMap<String, FlakeRef>,
    calls: AtomicUsize,
}

impl MockFlakes {
    pub fn with(mut self, unlocked: &str, locked: &str) -> Self {
        self.locked
            .insert(unlocked.to_string(), FlakeRef::parse(locked).unwrap());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlakeMetadataResolver for MockFlakes {
    async fn resolve_flake_metadata(&self, flake_ref: &FlakeRef) -> Result<FlakeRef> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let raw = flake_ref.to_string();
        self.locked
            .get(&raw)
            .cloned()
            .ok_or_else(|| Error::FlakeMetadata {
                flake_ref: raw,
                message: "cannot find flake in the registry".to_string(),
            })
    }
}

/// Store path lookups from a fixed table keyed by hash.
#[derive(Default)]
pub struct MockStorePaths {
    paths: HashMap<String, String>,
    calls: AtomicUsize,
}

impl MockStorePaths {
    pub fn with(mut self, hash: &str, path: &str) -> Self {
        self.paths.insert(hash.to_string(), path.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorePathResolver for MockStorePaths {
    async fn store_path_from_hash(&self, hash: &str, cache_url: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.paths.get(hash).cloned().ok_or_else(|| Error::StorePath {
            hash: hash.to_string(),
            cache: cache_url.to_string(),
            message: "path not found".to_string(),
        })
    }
}

/// The mocks behind a [`Resolver`], kept around to inspect call counts.
pub struct Mocks {
    pub search: Arc<MockSearch>,
    pub flakes: Arc<MockFlakes>,
    pub store_paths: Arc<MockStorePaths>,
}

impl Default for Mocks {
    fn default() -> Self {
        Self::new(MockSearch::default(), MockFlakes::default(), hello_store_paths())
    }
}

impl Mocks {
    pub fn new(search: MockSearch, flakes: MockFlakes, store_paths: MockStorePaths) -> Self {
        Self {
            search: Arc::new(search),
            flakes: Arc::new(flakes),
            store_paths: Arc::new(store_paths),
        }
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::new(
            test_settings(),
            self.search.clone(),
            self.flakes.clone(),
            self.store_paths.clone(),
        )
    }

    pub fn total_calls(&self) -> usize {
        self.search.calls() + self.flakes.calls() + self.store_paths.calls()
    }
}

pub fn hello_store_paths() -> MockStorePaths {
    MockStorePaths::default()
        .with(HELLO_HASH, &store_path(HELLO_HASH, "hello-2.12.1"))
        .with(HELLO_DARWIN_HASH, &store_path(HELLO_DARWIN_HASH, "hello-2.12.1"))
}

/// A minimal HTTP server that answers every connection with one response and
/// counts the requests it served.
pub struct TestServer {
    pub url: String,
    requests: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// `handler` gets the request method and target and returns the status
    /// code and body.
    pub async fn spawn<F>(handler: F) -> Self
    where
        F: Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
    {
        Self::spawn_with_delay(Duration::ZERO, handler).await
    }

    /// Like [`TestServer::spawn`], but waits before answering so that
    /// concurrent requests overlap.
    pub async fn spawn_with_delay<F>(delay: Duration, handler: F) -> Self
    where
        F: Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(handler);

        let counter = requests.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let handler = handler.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let request = read_request_head(&mut stream).await;
                    counter.fetch_add(1, Ordering::SeqCst);

                    let mut parts = request.split_whitespace();
                    let method = parts.next().unwrap_or_default().to_string();
                    let target = parts.next().unwrap_or_default().to_string();
                    let (status, body) = handler(&method, &target);
                    tokio::time::sleep(delay).await;

                    let reason = match status {
                        200 => "OK",
                        404 => "Not Found",
                        _ => "Internal Server Error",
                    };
                    let body = if method == "HEAD" { String::new() } else { body };
                    let response = format!(
                        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self {
            url,
            requests,
            handle,
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read_request_head(stream: &mut tokio::net::TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}
