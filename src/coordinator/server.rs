//! Coordinator host wiring the region state store to local storage

use crate::common::{Config, Result};
use crate::coordinator::abort::Abortable;
use crate::coordinator::catalog::CatalogStore;
use crate::coordinator::connection::{HostedRegions, LocalCatalogRegion, StoreConnectionFactory};
use crate::coordinator::location::{MetaLocationRegistry, RocksLocationRegistry};
use crate::coordinator::region::{InMemoryTableDescriptors, RegionInfo};
use crate::coordinator::state_store::{CoordinatorServices, RegionStateStore};
use std::sync::Arc;

pub struct Coordinator {
    catalog: Arc<CatalogStore>,
    meta_locations: Arc<RocksLocationRegistry>,
    tables: Arc<InMemoryTableDescriptors>,
    hosted: Arc<HostedRegions>,
    state_store: RegionStateStore,
}

impl Coordinator {
    /// Open the catalog and coordination stores under `config.data_dir`
    pub fn open(config: &Config, abortable: Arc<dyn Abortable>) -> Result<Self> {
        config.validate()?;
        tracing::info!("Opening coordinator");
        tracing::info!("  Data dir: {}", config.data_dir.display());
        tracing::info!("  Catalog co-located: {}", config.colocated_meta);
        tracing::info!("  Catalog connections: {}", config.meta_connections);

        std::fs::create_dir_all(&config.data_dir)?;
        let catalog = Arc::new(CatalogStore::open(config.catalog_path())?);
        let meta_locations = Arc::new(RocksLocationRegistry::open(config.coordination_path())?);
        let tables = Arc::new(InMemoryTableDescriptors::new());

        let hosted = Arc::new(HostedRegions::new());
        if config.colocated_meta {
            hosted.add(
                RegionInfo::first_meta().encoded_name(),
                Arc::new(LocalCatalogRegion::new(catalog.clone())),
            );
        }

        let state_store = RegionStateStore::new(CoordinatorServices {
            table_descriptors: tables.clone(),
            meta_locations: meta_locations.clone(),
            connections: Arc::new(StoreConnectionFactory::new(catalog.clone())),
            online_regions: Some(hosted.clone()),
            abortable,
            meta_connections: config.meta_connections,
        });

        Ok(Self {
            catalog,
            meta_locations,
            tables,
            hosted,
            state_store,
        })
    }

    pub fn start(&self) -> Result<()> {
        self.state_store.start()?;
        tracing::info!("✓ Coordinator ready ({:?})", self.state_store.write_mode());
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.state_store.stop();
        self.catalog.flush()
    }

    pub fn state_store(&self) -> &RegionStateStore {
        &self.state_store
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn meta_locations(&self) -> &dyn MetaLocationRegistry {
        self.meta_locations.as_ref()
    }

    pub fn tables(&self) -> &InMemoryTableDescriptors {
        &self.tables
    }

    /// Regions this coordinator serves; dropping the catalog region from here
    /// before start makes the store use pooled connections.
    pub fn hosted_regions(&self) -> &HostedRegions {
        &self.hosted
    }
}
