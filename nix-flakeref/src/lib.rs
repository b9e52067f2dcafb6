//! Parse and format Nix flake references and installables.
//!
//! Follows the reference syntax documented in the Nix manual:
//! https://nixos.org/manual/nix/stable/command-ref/new-cli/nix3-flake.html#flake-references
//!
//! Parsing is syntactic only. Nothing here touches the network, the flake
//! registry or the Nix store.
//!
//! ```
//! use nix_flakeref::{FlakeRef, Installable};
//!
//! let flake_ref: FlakeRef = "github:NixOS/nixpkgs/nixos-unstable".parse().unwrap();
//! assert_eq!(flake_ref.r#ref.as_deref(), Some("nixos-unstable"));
//!
//! let install: Installable = "nixpkgs#hello^out,man".parse().unwrap();
//! assert_eq!(install.to_string(), "flake:nixpkgs#hello^man,out");
//! ```
mod error;
mod flakeref;
mod installable;
mod rawurl;

pub use error::ParseError;
pub use flakeref::{FlakeRef, FlakeType, is_git_hash};
pub use installable::{Installable, Outputs};
