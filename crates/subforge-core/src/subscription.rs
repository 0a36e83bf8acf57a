//! Subscription records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ingest::SubscriptionType;

/// A remote subscription. Its nodes are stored separately and replaced
/// wholesale on every refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Storage id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Download URL.
    pub url: String,
    /// Detected body format of the last successful refresh.
    #[serde(rename = "type")]
    pub kind: SubscriptionType,
    /// SHA-256 of the last ingested body.
    pub content_hash: Option<String>,
    /// Number of nodes currently owned.
    pub node_count: usize,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last successful refresh.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Parameters for creating a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubscription {
    /// Display name.
    pub name: String,
    /// Download URL.
    pub url: String,
}

/// Hashes a subscription body for change detection.
pub fn content_hash(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_hex_sha256() {
        let hash = content_hash(b"abc");
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(content_hash(b"abd"), hash);
    }
}
