//! Location of the catalog region itself
//!
//! The catalog region cannot record its own location in the catalog table,
//! so it is published to the coordination service instead: one key per
//! replica holding the server and state.

use crate::common::{Error, Result};
use crate::coordinator::region::{ServerName, State, DEFAULT_REPLICA_ID};
use rocksdb::{Options, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const META_LOCATION_KEY: &str = "meta-region-server";

/// Coordination-service key for a catalog replica's location
pub fn meta_location_key(replica_id: u32) -> String {
    if replica_id == DEFAULT_REPLICA_ID {
        META_LOCATION_KEY.to_string()
    } else {
        format!("{}-{}", META_LOCATION_KEY, replica_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaLocation {
    pub server: Option<ServerName>,
    pub state: State,
}

/// Strongly consistent store for the catalog region's location
pub trait MetaLocationRegistry: Send + Sync {
    /// Publish where a catalog replica lives and in which state. One write,
    /// no retries.
    fn set_meta_location(
        &self,
        server: Option<&ServerName>,
        replica_id: u32,
        state: State,
    ) -> Result<()>;

    fn get_meta_location(&self, replica_id: u32) -> Result<Option<MetaLocation>>;
}

/// Coordination store kept in a local RocksDB
pub struct RocksLocationRegistry {
    db: DB,
}

impl RocksLocationRegistry {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }
}

impl MetaLocationRegistry for RocksLocationRegistry {
    fn set_meta_location(
        &self,
        server: Option<&ServerName>,
        replica_id: u32,
        state: State,
    ) -> Result<()> {
        let location = MetaLocation {
            server: server.cloned(),
            state,
        };
        let value = serde_json::to_vec(&location)?;
        let key = meta_location_key(replica_id);
        self.db
            .put(key.as_bytes(), value)
            .map_err(|e| Error::CoordinationService(format!("{}: {}", key, e)))?;
        tracing::debug!(key = %key, state = %state, "Published meta location");
        Ok(())
    }

    fn get_meta_location(&self, replica_id: u32) -> Result<Option<MetaLocation>> {
        let key = meta_location_key(replica_id);
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_location_keys() {
        assert_eq!(meta_location_key(0), "meta-region-server");
        assert_eq!(meta_location_key(2), "meta-region-server-2");
    }

    #[test]
    fn test_publish_and_read() {
        let dir = tempdir().unwrap();
        let registry = RocksLocationRegistry::open(dir.path().join("coord")).unwrap();
        let sn = ServerName::new("master", 16000, 7);

        assert!(registry.get_meta_location(0).unwrap().is_none());
        registry
            .set_meta_location(Some(&sn), 0, State::Opening)
            .unwrap();
        registry.set_meta_location(Some(&sn), 0, State::Open).unwrap();
        registry.set_meta_location(None, 1, State::Offline).unwrap();

        let primary = registry.get_meta_location(0).unwrap().unwrap();
        assert_eq!(primary.server, Some(sn));
        assert_eq!(primary.state, State::Open);

        let replica = registry.get_meta_location(1).unwrap().unwrap();
        assert_eq!(replica.server, None);
        assert_eq!(replica.state, State::Offline);
    }
}
