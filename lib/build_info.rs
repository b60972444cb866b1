/// Build identity reported by `--version`, startup logs and the `build_info` metric.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_COMMIT_HASH: &str = env!("SYNC_WORKER_GIT_COMMIT_HASH");
pub const VERSION_WITH_COMMIT: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "+",
    env!("SYNC_WORKER_GIT_COMMIT_HASH")
);

/// Twelve-character commit prefix, or `"unknown"` for builds without git metadata.
pub fn short_commit_hash() -> &'static str {
    match GIT_COMMIT_HASH.get(..12) {
        Some(prefix) if GIT_COMMIT_HASH != "unknown" => prefix,
        _ => GIT_COMMIT_HASH,
    }
}

#[cfg(test)]
mod tests {
    use super::{short_commit_hash, GIT_COMMIT_HASH, VERSION, VERSION_WITH_COMMIT};

    #[test]
    fn version_with_commit_is_semver_plus_hash() {
        assert!(VERSION_WITH_COMMIT.starts_with(VERSION));
        assert!(VERSION_WITH_COMMIT.ends_with(GIT_COMMIT_HASH));
    }

    #[test]
    fn short_hash_is_a_prefix_of_the_full_hash() {
        assert!(GIT_COMMIT_HASH.starts_with(short_commit_hash()));
        assert!(short_commit_hash().len() <= 12 || short_commit_hash() == GIT_COMMIT_HASH);
    }
}
