use sha2::{Digest, Sha256};

/// ECR limits pull-through cache repository prefixes to 2-20 characters.
pub const MAX_CACHE_PREFIX_LEN: usize = 20;

const HASH_CHARS: usize = 6;

/// Derive the ECR repository prefix for a pull-through cache rule.
///
/// `prefix + suffix` is used as-is when it fits. Otherwise the first six
/// hex characters of `sha256(prefix)` stand in for the prefix, joined to
/// the suffix with `-`. The result never exceeds [`MAX_CACHE_PREFIX_LEN`].
pub fn cache_repo_prefix(prefix: &str, suffix: &str) -> String {
    let repo = format!("{prefix}{suffix}");
    if repo.len() <= MAX_CACHE_PREFIX_LEN {
        return repo;
    }

    let hash = hex::encode(Sha256::digest(prefix.as_bytes()));
    let short = format!("{}-{suffix}", &hash[..HASH_CHARS]);
    tracing::debug!(prefix, suffix, short = %short, "cache prefix too long; using hash");
    truncate(short, MAX_CACHE_PREFIX_LEN)
}

fn truncate(mut s: String, max_bytes: usize) -> String {
    if s.len() > max_bytes {
        let mut cut = max_bytes;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}
