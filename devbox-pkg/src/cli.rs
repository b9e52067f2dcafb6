use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, crate_version};
use devbox_core::ResolverOptions;

#[derive(Parser)]
#[command(
    name = "devbox-pkg",
    color = clap::ColorChoice::Auto,
    about = format!("devbox-pkg {}: Resolve and lock devbox packages", crate_version!())
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global_options: GlobalOptions,
}

#[derive(Clone, Debug, Args)]
pub struct GlobalOptions {
    #[arg(short, long, global = true, help = "Enable additional debug logs.")]
    pub verbose: bool,

    #[arg(
        short,
        long,
        global = true,
        default_value = ".",
        help = "Directory containing devbox.lock."
    )]
    pub project_dir: PathBuf,

    #[arg(short, long, global = true, help = "Nix system to resolve for.")]
    pub system: Option<String>,

    #[arg(
        long,
        global = true,
        help = "Search service URL. Defaults to $DEVBOX_SEARCH_HOST."
    )]
    pub search_host: Option<String>,

    #[arg(long, global = true, help = "Binary cache URL.")]
    pub binary_cache: Option<String>,

    #[arg(
        long,
        global = true,
        help = "Resolve unversioned packages against this nixpkgs commit."
    )]
    pub legacy_nixpkgs_commit: Option<String>,
}

impl GlobalOptions {
    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            system: self.system.clone(),
            search_host: self.search_host.clone(),
            binary_cache: self.binary_cache.clone(),
            legacy_nixpkgs_commit: self.legacy_nixpkgs_commit.clone(),
            ..Default::default()
        }
    }
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    #[command(about = "Parse an installable and print its normalized form.")]
    Parse {
        raw: String,

        #[arg(long, help = "Parse a plain flake reference instead.")]
        flake_ref: bool,
    },

    #[command(about = "Show the ways a package string can be resolved, in order.")]
    Spec { raw: String },

    #[command(about = "Resolve packages, locking new ones in devbox.lock.")]
    Resolve {
        #[arg(required = true)]
        packages: Vec<String>,
    },

    #[command(about = "Resolve packages again and merge the results into devbox.lock.")]
    Update {
        #[arg(required = true)]
        packages: Vec<String>,
    },

    #[command(about = "Check whether locked packages are in the binary cache.")]
    Cached {
        #[arg(required = true)]
        packages: Vec<String>,
    },
}
