use std::collections::BTreeMap;
use std::fmt;

use chrono::DateTime;

use super::Package;

/// What merging a freshly resolved entry did to the lockfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The package had no entry.
    Added,
    /// The existing entry was locked to a newer nixpkgs than the resolved one
    /// and was kept.
    SkippedOlder { existing: String, resolved: String },
    /// The version changed.
    Updated { from: String, to: String },
    /// Same version, but some systems' store paths changed or were missing.
    SystemsUpdated,
    UpToDate,
}

impl fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeOutcome::Added => f.write_str("added"),
            MergeOutcome::SkippedOlder { existing, resolved } => {
                write!(f, "kept {existing}, resolved {resolved} is older")
            }
            MergeOutcome::Updated { from, to } => write!(f, "updated {from} -> {to}"),
            MergeOutcome::SystemsUpdated => f.write_str("updated system information"),
            MergeOutcome::UpToDate => f.write_str("already up-to-date"),
        }
    }
}

/// Merges `resolved` into the entry for `raw`:
///
/// - a missing entry is added.
/// - a different version replaces the entry, keeping `allow_insecure`, unless
///   the existing entry is from a newer nixpkgs commit.
/// - for the same version, the current system's info is overwritten when it
///   differs. Other systems are added when missing and replaced when their
///   store path differs, which drops any stale content-addressed path. If
///   any system changed, the entry also takes the new locked reference.
pub fn merge_resolved(
    packages: &mut BTreeMap<String, Package>,
    raw: &str,
    mut resolved: Package,
    current_system: &str,
) -> MergeOutcome {
    let Some(existing) = packages.get_mut(raw) else {
        packages.insert(raw.to_string(), resolved);
        return MergeOutcome::Added;
    };

    if existing.version != resolved.version {
        if is_newer(&existing.last_modified, &resolved.last_modified) {
            return MergeOutcome::SkippedOlder {
                existing: existing.version.clone(),
                resolved: resolved.version,
            };
        }
        let from = std::mem::take(&mut existing.version);
        let to = resolved.version.clone();
        resolved.allow_insecure = existing.allow_insecure;
        *existing = resolved;
        return MergeOutcome::Updated { from, to };
    }

    let mut updated = false;
    for (system, new_info) in resolved.systems {
        let replace = match existing.systems.get(&system) {
            None => true,
            Some(old_info) if system == current_system => *old_info != new_info,
            Some(old_info) => old_info.store_path() != new_info.store_path(),
        };
        if replace {
            existing.systems.insert(system, new_info);
            updated = true;
        }
    }
    if updated {
        // The new store paths come from the new nixpkgs commit.
        existing.resolved = resolved.resolved;
        existing.last_modified = resolved.last_modified;
        existing.source = resolved.source;
        existing.plugin_version = resolved.plugin_version;
        MergeOutcome::SystemsUpdated
    } else {
        MergeOutcome::UpToDate
    }
}

/// Compares RFC 3339 timestamps. Anything unparseable is never newer.
fn is_newer(a: &str, b: &str) -> bool {
    match (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
        (Ok(a), Ok(b)) => a > b,
        _ => false,
    }
}
