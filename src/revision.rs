//! Revision tokens.
//!
//! A revision has the form `<generation>-<digest>`. The generation starts at
//! 1 and grows by one with every write to an identifier; the digest is a
//! SHA-256 over the previous revision and the new content, so two replicas
//! making the same edit produce the same token.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Returns the generation prefix of a revision, if it parses.
pub fn generation(rev: &str) -> Option<u64> {
    rev.split_once('-')
        .and_then(|(generation, _)| generation.parse().ok())
}

/// Computes the revision that follows `previous` for the given content.
pub fn next(previous: Option<&str>, body: &Map<String, Value>, deleted: bool) -> String {
    let generation = previous.and_then(generation).unwrap_or(0) + 1;

    let mut hasher = Sha256::new();
    hasher.update(previous.unwrap_or("").as_bytes());
    hasher.update([deleted as u8]);
    // Map serialization cannot fail; fall back to an empty body regardless
    let encoded = serde_json::to_vec(body).unwrap_or_default();
    hasher.update(&encoded);
    let digest = hasher.finalize();

    // 16 bytes of digest keeps tokens short
    let hex: String = digest[..16].iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}", generation, hex)
}

/// Decides whether a replicated revision replaces the current one.
///
/// Higher generation wins; equal generations are broken by comparing the
/// tokens so every replica picks the same winner.
pub fn wins(candidate: &str, current: &str) -> bool {
    let candidate_gen = generation(candidate).unwrap_or(0);
    let current_gen = generation(current).unwrap_or(0);
    match candidate_gen.cmp(&current_gen) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => candidate > current,
    }
}
