pub mod datasets;
pub mod pull;
pub mod serve;
pub mod status;

use crate::config::Config;

/// Deadline for metadata requests against a remote node
pub const METADATA_TIMEOUT_SECS: u64 = 30;

/// Resolve a `--target` value to a network address.
///
/// Configured target names take precedence; anything else containing a
/// port separator is taken as a literal `host:port`, so a node that is
/// not declared in the config (notably during disaster recovery) can
/// still be addressed directly.
pub fn resolve_target_address(config: &Config, target: &str) -> Option<String> {
    if let Some(configured) = config.targets.iter().find(|entry| entry.name == target) {
        return Some(configured.address.clone());
    }

    if target.contains(':') {
        return Some(target.to_string());
    }

    None
}
