//! Clients of the catalog table
//!
//! Two ways to reach the catalog region:
//! - a direct handle, when the region is hosted by this process
//! - pooled connections, which work wherever the region lives

use crate::common::{Error, Result};
use crate::coordinator::catalog::{CatalogStore, Mutation};
use crate::coordinator::region::TableName;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Handle to a region hosted in this process
pub trait CatalogRegion: Send + Sync {
    fn put(&self, mutation: &Mutation) -> Result<()>;
}

/// Connection to the cluster's catalog table
pub trait CatalogConnection: Send + Sync {
    /// Apply every mutation of `batch` to `table`. All entries are attempted;
    /// any failure is reported as one error for the batch.
    fn process_batch(&self, table: &TableName, batch: &[Mutation]) -> Result<()>;

    /// Apply mutations spanning several catalog rows in one atomic step
    fn mutate_rows_atomically(&self, batch: &[Mutation]) -> Result<()>;

    fn close(&self);
}

pub trait ConnectionFactory: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn CatalogConnection>>;
}

/// Regions currently hosted by this process, by encoded name
pub trait OnlineRegions: Send + Sync {
    fn get_online_region(&self, encoded_name: &str) -> Option<Arc<dyn CatalogRegion>>;
}

/// Fixed set of catalog connections, one picked at random per batch
pub struct ConnectionPool {
    connections: Vec<Arc<dyn CatalogConnection>>,
}

impl ConnectionPool {
    pub fn new(factory: &dyn ConnectionFactory, size: usize) -> Result<Self> {
        let size = size.max(1);
        let connections = (0..size)
            .map(|_| factory.connect())
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!("Opened {} catalog connection(s)", size);
        Ok(Self { connections })
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }

    pub fn process_batch(&self, table: &TableName, batch: &[Mutation]) -> Result<()> {
        let idx = rand::thread_rng().gen_range(0..self.connections.len());
        self.connections[idx].process_batch(table, batch)
    }

    pub fn close(&self) {
        for connection in &self.connections {
            connection.close();
        }
    }
}

/// The catalog region served straight out of a local [`CatalogStore`]
pub struct LocalCatalogRegion {
    store: Arc<CatalogStore>,
}

impl LocalCatalogRegion {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store }
    }
}

impl CatalogRegion for LocalCatalogRegion {
    fn put(&self, mutation: &Mutation) -> Result<()> {
        self.store
            .apply(mutation)
            .map_err(|e| Error::DirectWrite(e.to_string()))
    }
}

/// Connection to a [`CatalogStore`]
pub struct StoreConnection {
    store: Arc<CatalogStore>,
    closed: AtomicBool,
}

impl StoreConnection {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }
}

impl CatalogConnection for StoreConnection {
    fn process_batch(&self, table: &TableName, batch: &[Mutation]) -> Result<()> {
        self.check_open()?;
        if !table.is_meta() {
            return Err(Error::UnknownTable(table.to_string()));
        }

        let mut failed = 0;
        let mut first = None;
        for mutation in batch {
            if let Err(e) = self.store.apply(mutation) {
                failed += 1;
                first.get_or_insert_with(|| e.to_string());
            }
        }
        match first {
            None => Ok(()),
            Some(first) => Err(Error::BatchFailed {
                failed,
                total: batch.len(),
                first,
            }),
        }
    }

    fn mutate_rows_atomically(&self, batch: &[Mutation]) -> Result<()> {
        self.check_open()?;
        self.store.mutate_rows_atomically(batch)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Hands out connections to a shared [`CatalogStore`]
pub struct StoreConnectionFactory {
    store: Arc<CatalogStore>,
}

impl StoreConnectionFactory {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store }
    }
}

impl ConnectionFactory for StoreConnectionFactory {
    fn connect(&self) -> Result<Arc<dyn CatalogConnection>> {
        Ok(Arc::new(StoreConnection {
            store: self.store.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Registry of regions this process is serving
#[derive(Default)]
pub struct HostedRegions {
    regions: RwLock<HashMap<String, Arc<dyn CatalogRegion>>>,
}

impl HostedRegions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, encoded_name: impl Into<String>, region: Arc<dyn CatalogRegion>) {
        self.regions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(encoded_name.into(), region);
    }

    pub fn remove(&self, encoded_name: &str) -> Option<Arc<dyn CatalogRegion>> {
        self.regions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(encoded_name)
    }
}

impl OnlineRegions for HostedRegions {
    fn get_online_region(&self, encoded_name: &str) -> Option<Arc<dyn CatalogRegion>> {
        self.regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(encoded_name)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::catalog::{Family, Put};
    use crate::coordinator::region::RegionInfo;
    use tempfile::tempdir;

    fn put(row: &str) -> Mutation {
        let mut put = Put::new(row.as_bytes().to_vec());
        put.add_column(Family::Info, "state", "OPEN");
        put.into()
    }

    #[test]
    fn test_pool_size_at_least_one() {
        let dir = tempdir().unwrap();
        let store = Arc::new(CatalogStore::open(dir.path().join("catalog")).unwrap());
        let factory = StoreConnectionFactory::new(store);
        assert_eq!(ConnectionPool::new(&factory, 0).unwrap().size(), 1);
        assert_eq!(ConnectionPool::new(&factory, 4).unwrap().size(), 4);
    }

    #[test]
    fn test_pool_writes_and_closes() {
        let dir = tempdir().unwrap();
        let store = Arc::new(CatalogStore::open(dir.path().join("catalog")).unwrap());
        let pool = ConnectionPool::new(&StoreConnectionFactory::new(store.clone()), 2).unwrap();

        pool.process_batch(&TableName::meta(), &[put("r1"), put("r2")])
            .unwrap();
        assert!(store.get_row(b"r1").unwrap().is_some());
        assert!(store.get_row(b"r2").unwrap().is_some());

        let err = pool
            .process_batch(&TableName::new("t1"), &[put("r3")])
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTable(_)));

        pool.close();
        let err = pool
            .process_batch(&TableName::meta(), &[put("r3")])
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[test]
    fn test_hosted_regions() {
        let dir = tempdir().unwrap();
        let store = Arc::new(CatalogStore::open(dir.path().join("catalog")).unwrap());
        let hosted = HostedRegions::new();
        let meta = RegionInfo::first_meta().encoded_name();

        assert!(hosted.get_online_region(&meta).is_none());
        hosted.add(meta.clone(), Arc::new(LocalCatalogRegion::new(store)));
        let region = hosted.get_online_region(&meta).unwrap();
        region.put(&put("r1")).unwrap();
        assert!(hosted.remove(&meta).is_some());
        assert!(hosted.get_online_region(&meta).is_none());
    }
}
