//! Durable JSON-file registry of pools and pricing routes, one file per
//! chain. Writes are atomic with respect to concurrent readers: the new
//! registry is written to a temporary sibling file and renamed into place,
//! and writes for a given chain are serialized through a per-chain mutex
//! (§5: "file-level write serialization per chain").

use crate::types::{Chain, PoolRegistry};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{error, warn};

pub struct Storage {
    root: PathBuf,
    write_locks: DashMap<u64, Mutex<()>>,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_locks: DashMap::new(),
        }
    }

    fn path_for(&self, chain: Chain) -> PathBuf {
        self.root
            .join(chain.name())
            .join("pools.json")
    }

    /// Returns an empty registry if the file is absent or unreadable.
    /// Storage failures never propagate to callers: discovery repopulates.
    pub async fn get_pool_registry(&self, chain: Chain) -> PoolRegistry {
        let path = self.path_for(chain);
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<PoolRegistry>(&bytes) {
                Ok(registry) => registry,
                Err(err) => {
                    warn!(chain = %chain, error = %err, "corrupt pool registry, treating as empty");
                    PoolRegistry::empty()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => PoolRegistry::empty(),
            Err(err) => {
                warn!(chain = %chain, error = %err, "storage unavailable reading registry");
                PoolRegistry::empty()
            }
        }
    }

    pub async fn save_pool_registry(&self, chain: Chain, registry: &PoolRegistry) -> anyhow::Result<()> {
        let lock = self
            .write_locks
            .entry(chain.chain_id())
            .or_insert_with(|| Mutex::new(()));
        let _guard = lock.lock().await;

        let dir = self.root.join(chain.name());
        tokio::fs::create_dir_all(&dir).await?;

        let bytes = serde_json::to_vec_pretty(registry)?;
        let final_path = self.path_for(chain);
        write_atomic(&final_path, &bytes).await.map_err(|err| {
            error!(chain = %chain, error = %err, "failed to persist pool registry");
            err
        })
    }
}

/// Writes `bytes` to `path` by first writing a temp sibling file, then
/// renaming it into place, so a concurrent reader never observes a partial
/// write.
async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("pools.json"),
        std::process::id()
    ));
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{order_pair, PoolMetadata};
    use ethers::types::Address;

    fn addr(n: u8) -> Address {
        Address::from_low_u64_be(n as u64)
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());

        let mut registry = PoolRegistry::empty();
        let (t0, t1) = order_pair(addr(1), addr(2));
        registry.insert_pool(PoolMetadata::new_v2(addr(10), t0, t1));

        storage.save_pool_registry(Chain::Ethereum, &registry).await.unwrap();
        let loaded = storage.get_pool_registry(Chain::Ethereum).await;

        assert_eq!(loaded.pools.len(), registry.pools.len());
        assert_eq!(loaded.routes_for(t0).len(), 1);
        assert_eq!(loaded.routes_for(t1).len(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let registry = storage.get_pool_registry(Chain::Polygon).await;
        assert!(registry.pools.is_empty());
    }
}
