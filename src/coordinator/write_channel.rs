//! Catalog write channel
//!
//! Writes go through the co-located catalog region while we have one. The
//! first failure on that shortcut demotes the channel to pooled connections
//! for good: the region may have moved away, and we do not try to find out
//! whether it came back.

use crate::common::{Error, Result};
use crate::coordinator::catalog::Mutation;
use crate::coordinator::connection::{CatalogRegion, ConnectionFactory, ConnectionPool};
use crate::coordinator::region::TableName;
use std::sync::{Arc, PoisonError, RwLock};

/// One way of getting a batch into the catalog table
pub trait WritePath {
    fn write(&self, batch: &[Mutation]) -> Result<()>;
}

/// Straight into the co-located catalog region, entry by entry
pub struct DirectPath<'a> {
    region: &'a dyn CatalogRegion,
}

impl<'a> DirectPath<'a> {
    pub fn new(region: &'a dyn CatalogRegion) -> Self {
        Self { region }
    }
}

impl WritePath for DirectPath<'_> {
    fn write(&self, batch: &[Mutation]) -> Result<()> {
        for mutation in batch {
            self.region.put(mutation)?;
        }
        Ok(())
    }
}

/// Through a pooled connection, as one batch against the catalog table
pub struct PooledPath<'a> {
    pool: &'a ConnectionPool,
    table: TableName,
}

impl<'a> PooledPath<'a> {
    pub fn new(pool: &'a ConnectionPool) -> Self {
        Self {
            pool,
            table: TableName::meta(),
        }
    }
}

impl WritePath for PooledPath<'_> {
    fn write(&self, batch: &[Mutation]) -> Result<()> {
        self.pool.process_batch(&self.table, batch)
    }
}

#[derive(Clone)]
enum WriteStrategy {
    Direct(Arc<dyn CatalogRegion>),
    Pooled(Arc<ConnectionPool>),
}

/// Which path the channel currently writes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Direct,
    Pooled,
}

pub struct CatalogWriteChannel {
    factory: Arc<dyn ConnectionFactory>,
    pool_size: usize,
    /// `None` until started and after stop. Only demotion and the lifecycle
    /// methods take the write lock.
    strategy: RwLock<Option<WriteStrategy>>,
}

impl CatalogWriteChannel {
    pub fn new(factory: Arc<dyn ConnectionFactory>, pool_size: usize) -> Self {
        Self {
            factory,
            pool_size: pool_size.max(1),
            strategy: RwLock::new(None),
        }
    }

    /// Start writing through `colocated` if given, else through a freshly
    /// opened connection pool.
    pub fn start(&self, colocated: Option<Arc<dyn CatalogRegion>>) -> Result<()> {
        let strategy = match colocated {
            Some(region) => WriteStrategy::Direct(region),
            None => WriteStrategy::Pooled(Arc::new(ConnectionPool::new(
                self.factory.as_ref(),
                self.pool_size,
            )?)),
        };
        let previous = self
            .strategy
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(strategy);
        if let Some(WriteStrategy::Pooled(pool)) = previous {
            pool.close();
        }
        Ok(())
    }

    /// Close pooled connections. Later [`persist`](Self::persist) calls
    /// write nothing.
    pub fn stop(&self) {
        let previous = self
            .strategy
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(WriteStrategy::Pooled(pool)) = previous {
            pool.close();
        }
    }

    pub fn mode(&self) -> Option<WriteMode> {
        self.current().map(|s| match s {
            WriteStrategy::Direct(_) => WriteMode::Direct,
            WriteStrategy::Pooled(_) => WriteMode::Pooled,
        })
    }

    fn current(&self) -> Option<WriteStrategy> {
        self.strategy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Write `batch` to the catalog table.
    ///
    /// A direct write that succeeds is the only write. A direct write that
    /// fails demotes the channel and the same batch goes through the pool.
    /// Errors returned from here are unrecoverable.
    pub fn persist(&self, batch: &[Mutation]) -> Result<()> {
        let pool = match self.current() {
            None => return Ok(()),
            Some(WriteStrategy::Pooled(pool)) => pool,
            Some(WriteStrategy::Direct(region)) => {
                match DirectPath::new(region.as_ref()).write(batch) {
                    Ok(()) => return Ok(()),
                    Err(e) => match self.demote(&region, &e)? {
                        None => return Ok(()),
                        Some(WriteStrategy::Pooled(pool)) => pool,
                        // Restarted onto another region while we were writing
                        Some(WriteStrategy::Direct(_)) => return self.persist(batch),
                    },
                }
            }
        };
        PooledPath::new(&pool).write(batch)
    }

    /// Swap `failed` for a pool, once. Only the handle that actually failed is
    /// replaced: threads that lose the race, or that wrote through a handle a
    /// restart has since replaced, get back whatever is installed now.
    fn demote(
        &self,
        failed: &Arc<dyn CatalogRegion>,
        cause: &Error,
    ) -> Result<Option<WriteStrategy>> {
        let mut strategy = self
            .strategy
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let failed_is_current = matches!(
            strategy.as_ref(),
            Some(WriteStrategy::Direct(current)) if Arc::ptr_eq(current, failed)
        );
        if !failed_is_current {
            return Ok(strategy.clone());
        }
        tracing::info!(error = %cause, "Catalog region shortcut failed, switching to pooled connections");
        let pool = Arc::new(ConnectionPool::new(self.factory.as_ref(), self.pool_size)?);
        *strategy = Some(WriteStrategy::Pooled(pool.clone()));
        Ok(Some(WriteStrategy::Pooled(pool)))
    }
}
