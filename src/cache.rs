//! File-based neighbor-label cache
//!
//! Route lookups only see next-hop addresses; peer listings know which
//! neighbor sits behind each address. This cache persists a
//! `service -> family -> {neighbor address -> description}` map as JSON
//! files under the data directory, refreshed every time a peer listing
//! runs and consulted by route lookups to decorate next hops. A missing
//! or stale file is never an error, lookups just stay undecorated.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dump::IpFamily;
use crate::peer::Peer;

/// Cached label data for one service/family pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelCacheData {
    pub meta: LabelCacheMeta,
    /// Neighbor address (string form) to description.
    pub labels: HashMap<String, String>,
}

/// Metadata for a label cache file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelCacheMeta {
    pub service: String,
    pub family: IpFamily,
    pub cached_at: DateTime<Utc>,
    pub entry_count: usize,
}

/// Neighbor-label file cache manager.
#[derive(Debug, Clone)]
pub struct NeighborLabelCache {
    cache_dir: PathBuf,
}

impl NeighborLabelCache {
    /// Create a cache rooted under the data directory.
    pub fn new(data_dir: &str) -> Result<Self> {
        let cache_dir = PathBuf::from(data_dir).join("cache").join("neighbors");
        fs::create_dir_all(&cache_dir)
            .map_err(|e| anyhow!("Failed to create neighbor cache directory: {}", e))?;
        Ok(Self { cache_dir })
    }

    fn cache_path(&self, service: &str, family: IpFamily) -> PathBuf {
        let safe_service: String = service
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        self.cache_dir
            .join(format!("neighbors_{}_v{}.json", safe_service, family.digit()))
    }

    /// Fold the labels derived from a fresh peer listing into the existing
    /// map for this service/family. Both route servers feed the same file,
    /// so labels known only to the other server survive; a re-listed
    /// address takes the fresh description.
    pub fn store(&self, service: &str, family: IpFamily, peers: &[Peer]) -> Result<()> {
        let mut labels = self
            .load(service, family)
            .map(|data| data.labels)
            .unwrap_or_default();
        for peer in peers {
            if let Some(description) = &peer.description {
                labels.insert(peer.neighbor_address.to_string(), description.clone());
            }
        }

        let data = LabelCacheData {
            meta: LabelCacheMeta {
                service: service.to_string(),
                family,
                cached_at: Utc::now(),
                entry_count: labels.len(),
            },
            labels,
        };

        let path = self.cache_path(service, family);
        let content = serde_json::to_string(&data)
            .map_err(|e| anyhow!("Failed to serialize neighbor cache: {}", e))?;
        fs::write(&path, content)
            .map_err(|e| anyhow!("Failed to write neighbor cache file {:?}: {}", path, e))?;

        info!(
            "Cached {} neighbor labels to {:?}",
            data.meta.entry_count, path
        );
        Ok(())
    }

    /// Load the label map for a service/family pair.
    pub fn load(&self, service: &str, family: IpFamily) -> Result<LabelCacheData> {
        let path = self.cache_path(service, family);
        let content = fs::read_to_string(&path)
            .map_err(|e| anyhow!("Failed to read neighbor cache file {:?}: {}", path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse neighbor cache file {:?}: {}", path, e))
    }

    /// Label for one neighbor address, if the cache knows it. Absence of
    /// the file or the entry is not an error.
    pub fn lookup(&self, service: &str, family: IpFamily, address: &str) -> Option<String> {
        self.load(service, family)
            .ok()
            .and_then(|data| data.labels.get(address).cloned())
    }

    /// Cache metadata without the label map.
    pub fn get_meta(&self, service: &str, family: IpFamily) -> Option<LabelCacheMeta> {
        self.load(service, family).ok().map(|d| d.meta)
    }

    /// Remove the cache file for a service/family pair.
    pub fn clear(&self, service: &str, family: IpFamily) -> Result<()> {
        let path = self.cache_path(service, family);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| anyhow!("Failed to remove cache file {:?}: {}", path, e))?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_peers() -> Vec<Peer> {
        let block: Vec<String> = [
            "peer4_0012345 BGP master up 2024-01-01 10:00:00 Established",
            "  Description:    acme-ix",
            "    Neighbor address: 192.0.2.1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let undescribed: Vec<String> = [
            "peer4_0067890 BGP master up 2024-01-01 10:00:00 Established",
            "    Neighbor address: 192.0.2.2",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        vec![
            Peer::from_block(&block, IpFamily::V4).unwrap(),
            Peer::from_block(&undescribed, IpFamily::V4).unwrap(),
        ]
    }

    #[test]
    fn test_store_and_lookup() {
        let tmp = TempDir::new().unwrap();
        let cache = NeighborLabelCache::new(tmp.path().to_str().unwrap()).unwrap();

        cache.store("serviceA", IpFamily::V4, &sample_peers()).unwrap();

        assert_eq!(
            cache.lookup("serviceA", IpFamily::V4, "192.0.2.1").as_deref(),
            Some("acme-ix")
        );
        // peers without a description contribute no label
        assert_eq!(cache.lookup("serviceA", IpFamily::V4, "192.0.2.2"), None);
        // unknown address, wrong family, wrong service: all silent misses
        assert_eq!(cache.lookup("serviceA", IpFamily::V4, "192.0.2.9"), None);
        assert_eq!(cache.lookup("serviceA", IpFamily::V6, "192.0.2.1"), None);
        assert_eq!(cache.lookup("serviceB", IpFamily::V4, "192.0.2.1"), None);
    }

    fn described_peer(addr: &str, description: &str) -> Peer {
        let block: Vec<String> = [
            "peer4_0000001 BGP master up 2024-01-01 10:00:00 Established".to_string(),
            format!("  Description:    {}", description),
            format!("    Neighbor address: {}", addr),
        ]
        .into_iter()
        .collect();
        Peer::from_block(&block, IpFamily::V4).unwrap()
    }

    #[test]
    fn test_store_merges_previous_labels() {
        let tmp = TempDir::new().unwrap();
        let cache = NeighborLabelCache::new(tmp.path().to_str().unwrap()).unwrap();

        // two servers feed the same file; a later store must not erase
        // labels only the first one knew
        cache.store("serviceA", IpFamily::V4, &sample_peers()).unwrap();
        cache
            .store(
                "serviceA",
                IpFamily::V4,
                &[described_peer("192.0.2.3", "other-ix")],
            )
            .unwrap();

        assert_eq!(
            cache.lookup("serviceA", IpFamily::V4, "192.0.2.1").as_deref(),
            Some("acme-ix")
        );
        assert_eq!(
            cache.lookup("serviceA", IpFamily::V4, "192.0.2.3").as_deref(),
            Some("other-ix")
        );
        let meta = cache.get_meta("serviceA", IpFamily::V4).unwrap();
        assert_eq!(meta.entry_count, 2);

        // an empty listing keeps everything
        cache.store("serviceA", IpFamily::V4, &[]).unwrap();
        assert_eq!(
            cache.get_meta("serviceA", IpFamily::V4).unwrap().entry_count,
            2
        );
    }

    #[test]
    fn test_store_updates_relisted_address() {
        let tmp = TempDir::new().unwrap();
        let cache = NeighborLabelCache::new(tmp.path().to_str().unwrap()).unwrap();

        cache
            .store(
                "serviceA",
                IpFamily::V4,
                &[described_peer("192.0.2.1", "acme-ix")],
            )
            .unwrap();
        cache
            .store(
                "serviceA",
                IpFamily::V4,
                &[described_peer("192.0.2.1", "acme-ix-renamed")],
            )
            .unwrap();

        assert_eq!(
            cache.lookup("serviceA", IpFamily::V4, "192.0.2.1").as_deref(),
            Some("acme-ix-renamed")
        );
        assert_eq!(
            cache.get_meta("serviceA", IpFamily::V4).unwrap().entry_count,
            1
        );
    }

    #[test]
    fn test_clear() {
        let tmp = TempDir::new().unwrap();
        let cache = NeighborLabelCache::new(tmp.path().to_str().unwrap()).unwrap();

        cache.store("serviceA", IpFamily::V4, &sample_peers()).unwrap();
        assert!(cache.load("serviceA", IpFamily::V4).is_ok());

        cache.clear("serviceA", IpFamily::V4).unwrap();
        assert!(cache.load("serviceA", IpFamily::V4).is_err());
        // clearing an absent file is fine
        cache.clear("serviceA", IpFamily::V4).unwrap();
    }
}
