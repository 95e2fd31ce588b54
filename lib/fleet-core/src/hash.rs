//! Spec hashing for detecting unsynced provider parameters

use sha2::{Digest, Sha256};

/// Hash of a provider parameter document.
///
/// serde_json maps keep their keys sorted, so equal documents always
/// serialize to the same bytes.
pub fn spec_hash(params: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(params.to_string().as_bytes());
    let digest = hasher.finalize();
    format!("sha256:{}", hex::encode(&digest[..16]))
}
