mod cli;
mod log;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands, GlobalOptions};
use devbox_core::nix::NixCli;
use devbox_core::search::SearchClient;
use devbox_core::spec::Candidate;
use devbox_core::{
    CachePackage, Lockfile, NarInfoCache, PackageSpec, Resolver, ResolverOptions,
    ResolverSettings, StaticProject,
};
use miette::{IntoDiagnostic, Result, WrapErr, bail};
use nix_flakeref::{FlakeRef, Installable, Outputs};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    log::init_tracing(cli.global_options.verbose);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Interrupted, cancelling");
                cancel.cancel();
            }
        }
    });

    let options = &cli.global_options;
    match cli.command {
        Commands::Parse { raw, flake_ref } => parse(&raw, flake_ref),
        Commands::Spec { raw } => {
            let legacy = options.legacy_nixpkgs_commit.as_deref().unwrap_or_default();
            print_candidates(&raw, legacy)
        }
        Commands::Resolve { packages } => {
            let settings = resolver_settings(options).await;
            let mut lockfile = open_lockfile(options, &packages, settings, cancel).await?;
            for raw in &packages {
                let pkg = lockfile.resolve(raw).await?;
                println!("{raw}\t{}", pkg.resolved);
            }
            Ok(())
        }
        Commands::Update { packages } => {
            let settings = resolver_settings(options).await;
            let mut lockfile = open_lockfile(options, &packages, settings, cancel).await?;
            for raw in &packages {
                let outcome = lockfile.force_resolve(raw).await?;
                println!("{raw}: {outcome}");
            }
            Ok(())
        }
        Commands::Cached { packages } => cached(options, &packages, cancel).await,
    }
}

fn parse(raw: &str, flake_ref: bool) -> Result<()> {
    let (normalized, parsed) = if flake_ref {
        let parsed = FlakeRef::parse(raw)?;
        (parsed.to_string(), parsed)
    } else {
        let installable = Installable::parse(raw)?;
        if let Some(attr_path) = &installable.attr_path {
            eprintln!("attribute path: {attr_path}");
        }
        if installable.outputs != Outputs::Default {
            eprintln!("outputs: {}", installable.outputs);
        }
        (installable.to_string(), installable.flake_ref)
    };

    println!("{normalized}");
    println!(
        "{}",
        serde_json::to_string_pretty(&parsed).into_diagnostic()?
    );
    Ok(())
}

fn print_candidates(raw: &str, legacy_nixpkgs_commit: &str) -> Result<()> {
    let spec = PackageSpec::parse(raw, legacy_nixpkgs_commit);
    let candidates = spec.candidates();
    if candidates.is_empty() {
        bail!("{raw:?} is not a valid package");
    }
    for (i, candidate) in candidates.into_iter().enumerate() {
        let description = match candidate {
            Candidate::RunX(runx) => format!("runx       {runx}"),
            Candidate::Search { name, version } => format!("search     {name}@{version}"),
            Candidate::Flake(installable) => format!("flake      {installable}"),
            Candidate::AttrPath(installable) => format!("attr path  {installable}"),
        };
        println!("{}. {description}", i + 1);
    }
    Ok(())
}

async fn resolver_settings(options: &GlobalOptions) -> ResolverSettings {
    let defaults = ResolverSettings::resolve(options.resolver_options());
    let nix_version = NixCli::new(&defaults).version().await;
    debug!(?nix_version, "Detected nix version");
    ResolverSettings::resolve(ResolverOptions {
        nix_version,
        ..options.resolver_options()
    })
}

async fn open_lockfile(
    options: &GlobalOptions,
    packages: &[String],
    settings: ResolverSettings,
    cancel: CancellationToken,
) -> Result<Lockfile> {
    let nix = Arc::new(NixCli::new(&settings));
    let search = Arc::new(SearchClient::new(&settings)?);
    let project = StaticProject::new(&options.project_dir)
        .with_packages(packages.iter().cloned())
        .with_legacy_nixpkgs_commit(settings.legacy_nixpkgs_commit.clone());
    let resolver = Resolver::new(settings, search, nix.clone(), nix).with_cancellation(cancel);

    Lockfile::open(Arc::new(project), Arc::new(resolver))
        .await
        .wrap_err_with(|| format!("Failed to open lockfile in {}", options.project_dir.display()))
}

async fn cached(options: &GlobalOptions, packages: &[String], cancel: CancellationToken) -> Result<()> {
    let settings = resolver_settings(options).await;
    let cache = NarInfoCache::new(&settings)?.with_cancellation(cancel.clone());
    let mut lockfile = open_lockfile(options, packages, settings, cancel).await?;

    let mut pkgs = Vec::with_capacity(packages.len());
    for raw in packages {
        let locked = lockfile.resolve(raw).await?.clone();
        // Flake entries keep their output selection in the resolved installable.
        let outputs = Installable::parse(&locked.resolved)
            .map(|installable| installable.outputs)
            .unwrap_or_default();
        pkgs.push(CachePackage::new(raw.as_str(), Some(locked)).with_outputs(outputs));
    }

    cache.fill_cache(&pkgs).await?;
    for pkg in &pkgs {
        let in_cache = cache.is_in_cache(pkg).await?;
        println!("{}\t{}", pkg.raw, if in_cache { "cached" } else { "not cached" });
    }
    Ok(())
}
