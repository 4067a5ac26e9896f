//! Recording stubs for the collaborators injected into the state store

#![allow(dead_code)]

use regionstore::common::{Error, Result};
use regionstore::coordinator::abort::Abortable;
use regionstore::coordinator::catalog::Mutation;
use regionstore::coordinator::connection::{
    CatalogConnection, CatalogRegion, ConnectionFactory, HostedRegions,
};
use regionstore::coordinator::location::{MetaLocation, MetaLocationRegistry};
use regionstore::coordinator::region::{
    InMemoryTableDescriptors, RegionInfo, ServerName, State, TableName,
};
use regionstore::coordinator::state_store::{CoordinatorServices, RegionStateStore};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct RecordingAbort {
    pub calls: Mutex<Vec<(String, String)>>,
}

impl Abortable for RecordingAbort {
    fn abort(&self, why: &str, cause: &Error) {
        self.calls
            .lock()
            .unwrap()
            .push((why.to_string(), cause.to_string()));
    }
}

/// Co-located catalog region that can be told to fail
#[derive(Default)]
pub struct StubRegion {
    pub fail: AtomicBool,
    pub puts: Mutex<Vec<Mutation>>,
    pub attempts: AtomicUsize,
}

impl CatalogRegion for StubRegion {
    fn put(&self, mutation: &Mutation) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::DirectWrite("catalog region moved".into()));
        }
        self.puts.lock().unwrap().push(mutation.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct BatchLog {
    pub batches: Mutex<Vec<(TableName, Vec<Mutation>)>>,
    pub atomic: Mutex<Vec<Vec<Mutation>>>,
    pub fail: AtomicBool,
    pub connects: AtomicUsize,
}

impl BatchLog {
    pub fn batches(&self) -> Vec<Vec<Mutation>> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(|(_, b)| b.clone())
            .collect()
    }
}

pub struct StubConnection {
    log: Arc<BatchLog>,
}

impl CatalogConnection for StubConnection {
    fn process_batch(&self, table: &TableName, batch: &[Mutation]) -> Result<()> {
        if self.log.fail.load(Ordering::SeqCst) {
            return Err(Error::BatchFailed {
                failed: batch.len(),
                total: batch.len(),
                first: "catalog unavailable".into(),
            });
        }
        self.log
            .batches
            .lock()
            .unwrap()
            .push((table.clone(), batch.to_vec()));
        Ok(())
    }

    fn mutate_rows_atomically(&self, batch: &[Mutation]) -> Result<()> {
        self.log.atomic.lock().unwrap().push(batch.to_vec());
        Ok(())
    }

    fn close(&self) {}
}

pub struct StubFactory {
    pub log: Arc<BatchLog>,
}

impl ConnectionFactory for StubFactory {
    fn connect(&self) -> Result<Arc<dyn CatalogConnection>> {
        self.log.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StubConnection {
            log: self.log.clone(),
        }))
    }
}

/// Pooled connections whose batches hold until the test releases them
pub struct Gate {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
    pub closed: AtomicBool,
}

struct GatedConnection {
    gate: Arc<Gate>,
}

impl CatalogConnection for GatedConnection {
    fn process_batch(&self, _table: &TableName, _batch: &[Mutation]) -> Result<()> {
        self.gate.entered.lock().unwrap().send(()).unwrap();
        self.gate.release.lock().unwrap().recv().unwrap();
        if self.gate.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    fn mutate_rows_atomically(&self, _batch: &[Mutation]) -> Result<()> {
        Ok(())
    }

    fn close(&self) {
        self.gate.closed.store(true, Ordering::SeqCst);
    }
}

struct GatedFactory {
    gate: Arc<Gate>,
}

impl ConnectionFactory for GatedFactory {
    fn connect(&self) -> Result<Arc<dyn CatalogConnection>> {
        Ok(Arc::new(GatedConnection {
            gate: self.gate.clone(),
        }))
    }
}

pub struct GatedHarness {
    pub store: Arc<RegionStateStore>,
    pub abort: Arc<RecordingAbort>,
    pub gate: Arc<Gate>,
    /// Signalled once per batch that reached a connection
    pub entered: Receiver<()>,
    /// One send lets one waiting batch finish
    pub release: Sender<()>,
}

/// Remote-catalog state store whose writes block inside `process_batch`
pub fn gated_harness() -> GatedHarness {
    let (entered_tx, entered) = mpsc::channel();
    let (release, release_rx) = mpsc::channel();
    let gate = Arc::new(Gate {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
        closed: AtomicBool::new(false),
    });
    let abort = Arc::new(RecordingAbort::default());

    let store = Arc::new(RegionStateStore::new(CoordinatorServices {
        table_descriptors: Arc::new(InMemoryTableDescriptors::new()),
        meta_locations: Arc::new(StubRegistry::default()),
        connections: Arc::new(GatedFactory { gate: gate.clone() }),
        online_regions: None,
        abortable: abort.clone(),
        meta_connections: 1,
    }));

    GatedHarness {
        store,
        abort,
        gate,
        entered,
        release,
    }
}

#[derive(Default)]
pub struct StubRegistry {
    pub writes: Mutex<Vec<(Option<ServerName>, u32, State)>>,
    pub fail: AtomicBool,
}

impl MetaLocationRegistry for StubRegistry {
    fn set_meta_location(
        &self,
        server: Option<&ServerName>,
        replica_id: u32,
        state: State,
    ) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::CoordinationService("session expired".into()));
        }
        self.writes
            .lock()
            .unwrap()
            .push((server.cloned(), replica_id, state));
        Ok(())
    }

    fn get_meta_location(&self, replica_id: u32) -> Result<Option<MetaLocation>> {
        Ok(self
            .writes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(_, r, _)| *r == replica_id)
            .map(|(server, _, state)| MetaLocation {
                server: server.clone(),
                state: *state,
            }))
    }
}

pub struct Harness {
    pub store: RegionStateStore,
    pub abort: Arc<RecordingAbort>,
    pub log: Arc<BatchLog>,
    pub registry: Arc<StubRegistry>,
    pub tables: Arc<InMemoryTableDescriptors>,
    pub region: Option<Arc<StubRegion>>,
}

/// State store wired to stubs; `colocated` hosts a stub catalog region
pub fn harness(colocated: bool) -> Harness {
    let abort = Arc::new(RecordingAbort::default());
    let log = Arc::new(BatchLog::default());
    let registry = Arc::new(StubRegistry::default());
    let tables = Arc::new(InMemoryTableDescriptors::new());
    let hosted = Arc::new(HostedRegions::new());
    let region = colocated.then(|| Arc::new(StubRegion::default()));
    if let Some(region) = &region {
        hosted.add(RegionInfo::first_meta().encoded_name(), region.clone());
    }

    let store = RegionStateStore::new(CoordinatorServices {
        table_descriptors: tables.clone(),
        meta_locations: registry.clone(),
        connections: Arc::new(StubFactory { log: log.clone() }),
        online_regions: Some(hosted),
        abortable: abort.clone(),
        meta_connections: 1,
    });

    Harness {
        store,
        abort,
        log,
        registry,
        tables,
        region,
    }
}

pub fn server(host: &str) -> ServerName {
    ServerName::new(host, 16020, 1_700_000_000_000)
}

pub fn user_region(table: &str, id: u64) -> RegionInfo {
    RegionInfo::new(TableName::new(table), Vec::new(), Vec::new(), id)
}
