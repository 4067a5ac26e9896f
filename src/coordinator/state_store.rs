//! Persists region state transitions in the catalog table
//!
//! The assignment manager reports every transition here. The catalog region
//! publishes its own location to the coordination service; every other
//! region gets its catalog row updated, unless the transition concerns a
//! region without a row. A transition that is valid but cannot be written
//! brings the coordinator down.

use crate::common::{Error, Result};
use crate::coordinator::abort::Abortable;
use crate::coordinator::barrier::{build_barrier, make_daughter_link, make_parent_link};
use crate::coordinator::catalog::{
    add_empty_location, add_location, delete_from_region_info, put_from_region_info,
    server_name_column, state_column, Family, Mutation, Put, MERGEA_QUALIFIER, MERGEB_QUALIFIER,
    SPLITA_QUALIFIER, SPLITB_QUALIFIER,
};
use crate::coordinator::connection::{ConnectionFactory, OnlineRegions};
use crate::coordinator::location::MetaLocationRegistry;
use crate::coordinator::policy::should_persist;
use crate::coordinator::region::{RegionInfo, RegionState, ServerName, State, TableDescriptors};
use crate::coordinator::write_channel::{CatalogWriteChannel, WriteMode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Sequence number passed when a transition carries no open sequence number
pub const NO_SEQNUM: i64 = -1;

/// Open sequence number recorded for the children of a split or merge
const CHILD_OPEN_SEQNUM: i64 = 1;

/// What the state store needs from the coordinator hosting it
pub struct CoordinatorServices {
    pub table_descriptors: Arc<dyn TableDescriptors>,
    pub meta_locations: Arc<dyn MetaLocationRegistry>,
    pub connections: Arc<dyn ConnectionFactory>,
    /// Regions hosted by the coordinator itself, if it serves any
    pub online_regions: Option<Arc<dyn OnlineRegions>>,
    pub abortable: Arc<dyn Abortable>,
    /// Size of the catalog connection pool
    pub meta_connections: usize,
}

pub struct RegionStateStore {
    services: CoordinatorServices,
    channel: CatalogWriteChannel,
    initialized: AtomicBool,
}

impl RegionStateStore {
    pub fn new(services: CoordinatorServices) -> Self {
        let channel =
            CatalogWriteChannel::new(services.connections.clone(), services.meta_connections);
        Self {
            services,
            channel,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn start(&self) -> Result<()> {
        let meta = RegionInfo::first_meta().encoded_name();
        let colocated = self
            .services
            .online_regions
            .as_ref()
            .and_then(|regions| regions.get_online_region(&meta));
        if colocated.is_some() {
            tracing::info!("Catalog region is hosted locally, writing to it directly");
        } else {
            tracing::info!(
                "Catalog region is remote, using {} pooled connection(s)",
                self.services.meta_connections.max(1)
            );
        }
        self.channel.start(colocated)?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Transitions reported after this are dropped
    pub fn stop(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.channel.stop();
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn write_mode(&self) -> Option<WriteMode> {
        self.channel.mode()
    }

    /// Record a transition of `new_state.region`.
    ///
    /// `open_seq_num` is the sequence number the region opened at, or
    /// [`NO_SEQNUM`]. A malformed transition is rejected with
    /// [`Error::IllegalArgument`] and nothing is written. Any other failure
    /// has already told the coordinator to abort; the error is returned for
    /// callers that outlive the abort.
    pub fn record_transition(
        &self,
        new_state: &RegionState,
        old_state: Option<&RegionState>,
        open_seq_num: i64,
    ) -> Result<()> {
        let region = &new_state.region;
        let result = if region.is_meta_region() {
            self.publish_meta_location(new_state)
        } else {
            let batch = self
                .transition_batch(new_state, old_state, open_seq_num)
                .map_err(|e| {
                    tracing::warn!(error = %e, "Rejected transition {}", new_state);
                    e
                })?;
            match batch {
                Some(batch) => self.channel.persist(&batch),
                None => Ok(()),
            }
        };

        match result {
            Ok(()) => Ok(()),
            // stop() closed the channel under an in-flight write
            Err(e) if !region.is_meta_region() && !self.is_initialized() => {
                tracing::debug!(error = %e, "Store stopped, dropping transition {}", new_state);
                Ok(())
            }
            Err(e) => {
                let e = Error::persist_failure(region.region_name_as_string(), new_state.state, e);
                tracing::error!(error = %e, "Failed to persist region state {}", new_state);
                self.services
                    .abortable
                    .abort("Failed to update region location", &e);
                Err(e)
            }
        }
    }

    fn publish_meta_location(&self, new_state: &RegionState) -> Result<()> {
        self.services.meta_locations.set_meta_location(
            new_state.server.as_ref(),
            new_state.region.replica_id(),
            new_state.state,
        )
    }

    /// Catalog mutations for a transition, or `None` when it is not written
    fn transition_batch(
        &self,
        new_state: &RegionState,
        old_state: Option<&RegionState>,
        open_seq_num: i64,
    ) -> Result<Option<Vec<Mutation>>> {
        let region = &new_state.region;
        if !self.is_initialized()
            || !should_persist(region, new_state.state, old_state.map(|s| s.state))
        {
            return Ok(None);
        }

        let mut batch = vec![Mutation::Put(build_state_put(
            new_state,
            old_state,
            open_seq_num,
        )?)];
        let descriptor = self.services.table_descriptors.get(region.table());
        if let Some(barrier) =
            build_barrier(region, descriptor.as_ref(), new_state.state, open_seq_num)
        {
            batch.push(barrier);
        }
        Ok(Some(batch))
    }

    /// Replace `parent` by daughters `a` and `b` in the catalog, in one
    /// atomic multi-row update. Both daughters are placed on `server`.
    pub fn record_split(
        &self,
        parent: &RegionInfo,
        a: &RegionInfo,
        b: &RegionInfo,
        server: &ServerName,
        region_replication: u32,
    ) -> Result<()> {
        let mut put_parent = put_from_region_info(&parent.as_split_parent())?;
        put_parent.add_column(Family::Info, SPLITA_QUALIFIER, a.to_bytes()?);
        put_parent.add_column(Family::Info, SPLITB_QUALIFIER, b.to_bytes()?);

        let put_a = child_put(a, server, region_replication)?;
        let put_b = child_put(b, server, region_replication)?;

        let mut batch = vec![put_parent.into(), put_a.into(), put_b.into()];
        if self.services.table_descriptors.is_serial(parent.table()) {
            batch.push(make_parent_link(a, &[parent]));
            batch.push(make_parent_link(b, &[parent]));
            batch.push(make_daughter_link(parent, &[a, b]));
        }

        tracing::info!("Recording split of {} into {} and {}", parent, a, b);
        self.mutate_catalog(&batch)
    }

    /// Replace `a` and `b` by `merged` in the catalog, in one atomic
    /// multi-row update. The merged region is placed on `server`.
    pub fn record_merge(
        &self,
        merged: &RegionInfo,
        a: &RegionInfo,
        b: &RegionInfo,
        server: &ServerName,
        region_replication: u32,
    ) -> Result<()> {
        let mut put_merged = child_put(merged, server, region_replication)?;
        put_merged.add_column(Family::Info, MERGEA_QUALIFIER, a.to_bytes()?);
        put_merged.add_column(Family::Info, MERGEB_QUALIFIER, b.to_bytes()?);

        let mut batch = vec![
            put_merged.into(),
            delete_from_region_info(a),
            delete_from_region_info(b),
        ];
        if self.services.table_descriptors.is_serial(merged.table()) {
            batch.push(make_daughter_link(a, &[merged]));
            batch.push(make_daughter_link(b, &[merged]));
            batch.push(make_parent_link(merged, &[a, b]));
        }

        tracing::info!("Recording merge of {} and {} into {}", a, b, merged);
        self.mutate_catalog(&batch)
    }

    fn mutate_catalog(&self, batch: &[Mutation]) -> Result<()> {
        let connection = self.services.connections.connect()?;
        let result = connection.mutate_rows_atomically(batch);
        connection.close();
        result
    }
}

/// Catalog put for one transition: state, the transitioning server when it
/// changed, and the location when the region just opened.
pub fn build_state_put(
    new_state: &RegionState,
    old_state: Option<&RegionState>,
    open_seq_num: i64,
) -> Result<Put> {
    let region = &new_state.region;
    let replica_id = region.replica_id();
    let state = new_state.state;
    let old_server = old_state.and_then(|s| s.server.as_ref());

    let mut put = Put::new(region.catalog_row_key());
    let mut info = format!("Updating catalog row {} with state={}", region, state);
    if let Some(server) = new_state.server.as_ref().filter(|sn| Some(*sn) != old_server) {
        put.add_column(
            Family::Info,
            server_name_column(replica_id),
            server.to_string().into_bytes(),
        );
        info.push_str(&format!(", sn={}", server));
    }
    if open_seq_num >= 0 {
        let server = match (&new_state.server, state) {
            (Some(server), State::Open) => server,
            _ => {
                return Err(Error::IllegalArgument(format!(
                    "open region {} should be on a server",
                    region
                )))
            }
        };
        add_location(&mut put, server, open_seq_num, replica_id);
        info.push_str(&format!(", openSeqNum={}, server={}", open_seq_num, server));
    }
    put.add_column(
        Family::Info,
        state_column(replica_id),
        state.as_str().as_bytes().to_vec(),
    );
    tracing::info!("{}", info);
    Ok(put)
}

/// Row of a region created by a split or merge: descriptor, location on
/// `server`, and blank locations for its other replicas.
fn child_put(region: &RegionInfo, server: &ServerName, region_replication: u32) -> Result<Put> {
    let mut put = put_from_region_info(region)?;
    add_location(&mut put, server, CHILD_OPEN_SEQNUM, region.replica_id());
    for replica_id in 1..region_replication {
        add_empty_location(&mut put, replica_id);
    }
    Ok(put)
}
