//! Region state model
//!
//! - Region identity ([`RegionInfo`]) and the catalog row it maps to
//! - Lifecycle states ([`State`]) and the observed [`RegionState`]
//! - Per-table replication settings ([`TableDescriptor`])

use crate::common::{blake3_hash, timestamp_now_millis, to_printable, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

/// Name of the catalog table holding every region's location and state
pub const META_TABLE_NAME: &str = "system:meta";

/// Separator between the parts of a region name
pub const REGION_NAME_DELIMITER: u8 = b',';

/// Separator between a region or column name and its replica suffix
pub const REPLICA_ID_DELIMITER: char = '_';

/// Replica id of the primary replica
pub const DEFAULT_REPLICA_ID: u32 = 0;

const ENCODED_NAME_LEN: usize = 32;

/// Format a replica id the way it is suffixed onto names (`0001`, `001F`, ...)
pub fn replica_suffix(replica_id: u32) -> String {
    format!("{}{:04X}", REPLICA_ID_DELIMITER, replica_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The catalog table
    pub fn meta() -> Self {
        Self(META_TABLE_NAME.to_string())
    }

    pub fn is_meta(&self) -> bool {
        self.0 == META_TABLE_NAME
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a region server: host, port and the start code that tells
/// restarts of the same host:port apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerName {
    pub host: String,
    pub port: u16,
    pub start_code: u64,
}

impl ServerName {
    pub fn new(host: impl Into<String>, port: u16, start_code: u64) -> Self {
        Self {
            host: host.into(),
            port,
            start_code,
        }
    }

    /// `host:port`, as written to the location column
    pub fn host_and_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for ServerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{}", self.host, self.port, self.start_code)
    }
}

impl FromStr for ServerName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(',');
        let (Some(host), Some(port), Some(start_code), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidServerName(s.to_string()));
        };
        if host.is_empty() {
            return Err(Error::InvalidServerName(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| Error::InvalidServerName(s.to_string()))?;
        let start_code = start_code
            .parse()
            .map_err(|_| Error::InvalidServerName(s.to_string()))?;
        Ok(Self::new(host, port, start_code))
    }
}

/// Identity of one replica of a region. Never mutated once built; split and
/// merge bookkeeping derive flagged copies instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionInfo {
    table: TableName,
    start_key: Vec<u8>,
    end_key: Vec<u8>,
    region_id: u64,
    replica_id: u32,
    offline: bool,
    split: bool,
}

impl RegionInfo {
    pub fn new(
        table: TableName,
        start_key: impl Into<Vec<u8>>,
        end_key: impl Into<Vec<u8>>,
        region_id: u64,
    ) -> Self {
        Self {
            table,
            start_key: start_key.into(),
            end_key: end_key.into(),
            region_id,
            replica_id: DEFAULT_REPLICA_ID,
            offline: false,
            split: false,
        }
    }

    /// The first (and only) region of the catalog table
    pub fn first_meta() -> Self {
        Self::new(TableName::meta(), Vec::new(), Vec::new(), 1)
    }

    /// Same region, another replica
    pub fn with_replica(&self, replica_id: u32) -> Self {
        Self {
            replica_id,
            ..self.clone()
        }
    }

    /// Copy marked offline and split, as the parent row looks after a split
    pub fn as_split_parent(&self) -> Self {
        Self {
            offline: true,
            split: true,
            ..self.clone()
        }
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn start_key(&self) -> &[u8] {
        &self.start_key
    }

    pub fn end_key(&self) -> &[u8] {
        &self.end_key
    }

    pub fn region_id(&self) -> u64 {
        self.region_id
    }

    pub fn replica_id(&self) -> u32 {
        self.replica_id
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn is_split(&self) -> bool {
        self.split
    }

    pub fn is_meta_region(&self) -> bool {
        self.table.is_meta()
    }

    pub fn is_default_replica(&self) -> bool {
        self.replica_id == DEFAULT_REPLICA_ID
    }

    /// `table,start_key,region_id`, with a replica suffix for replicas > 0
    pub fn region_name(&self) -> Vec<u8> {
        let mut name = Vec::with_capacity(self.table.as_bytes().len() + self.start_key.len() + 32);
        name.extend_from_slice(self.table.as_bytes());
        name.push(REGION_NAME_DELIMITER);
        name.extend_from_slice(&self.start_key);
        name.push(REGION_NAME_DELIMITER);
        name.extend_from_slice(self.region_id.to_string().as_bytes());
        if !self.is_default_replica() {
            name.extend_from_slice(replica_suffix(self.replica_id).as_bytes());
        }
        name
    }

    pub fn region_name_as_string(&self) -> String {
        to_printable(&self.region_name())
    }

    /// Short, fixed-length identity derived from the region name
    pub fn encoded_name(&self) -> String {
        let mut hash = blake3_hash(&self.region_name());
        hash.truncate(ENCODED_NAME_LEN);
        hash
    }

    /// Catalog row key: every replica of a region shares the primary's row
    pub fn catalog_row_key(&self) -> Vec<u8> {
        if self.is_default_replica() {
            self.region_name()
        } else {
            self.with_replica(DEFAULT_REPLICA_ID).region_name()
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Corrupted(format!("regioninfo: {}", e)))
    }
}

impl std::fmt::Display for RegionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.region_name_as_string())
    }
}

/// Lifecycle state of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Offline,
    PendingOpen,
    Opening,
    Open,
    PendingClose,
    Closing,
    Closed,
    Splitting,
    Split,
    FailedOpen,
    FailedClose,
    Merging,
    Merged,
    /// New daughter of a split, not yet in the catalog
    SplittingNew,
    /// New region of a merge, not yet in the catalog
    MergingNew,
}

impl State {
    pub const ALL: [State; 15] = [
        State::Offline,
        State::PendingOpen,
        State::Opening,
        State::Open,
        State::PendingClose,
        State::Closing,
        State::Closed,
        State::Splitting,
        State::Split,
        State::FailedOpen,
        State::FailedClose,
        State::Merging,
        State::Merged,
        State::SplittingNew,
        State::MergingNew,
    ];

    /// Name stored in the catalog state column
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Offline => "OFFLINE",
            State::PendingOpen => "PENDING_OPEN",
            State::Opening => "OPENING",
            State::Open => "OPEN",
            State::PendingClose => "PENDING_CLOSE",
            State::Closing => "CLOSING",
            State::Closed => "CLOSED",
            State::Splitting => "SPLITTING",
            State::Split => "SPLIT",
            State::FailedOpen => "FAILED_OPEN",
            State::FailedClose => "FAILED_CLOSE",
            State::Merging => "MERGING",
            State::Merged => "MERGED",
            State::SplittingNew => "SPLITTING_NEW",
            State::MergingNew => "MERGING_NEW",
        }
    }

    /// States of regions that have no catalog row: not created yet, or
    /// already removed.
    pub fn is_synthetic(&self) -> bool {
        matches!(self, State::MergingNew | State::SplittingNew | State::Merged)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        State::ALL
            .iter()
            .copied()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidState(s.to_string()))
    }
}

/// Latest observed state of one region replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionState {
    pub region: RegionInfo,
    pub state: State,
    pub server: Option<ServerName>,
    /// When the region entered `state` (Unix millis)
    pub stamp: u64,
}

impl RegionState {
    pub fn new(region: RegionInfo, state: State, server: Option<ServerName>) -> Self {
        Self {
            region,
            state,
            server,
            stamp: timestamp_now_millis(),
        }
    }

    pub fn is_one_of(&self, states: &[State]) -> bool {
        states.contains(&self.state)
    }
}

impl std::fmt::Display for RegionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{} state={}, ts={}", self.region, self.state, self.stamp)?;
        if let Some(server) = &self.server {
            write!(f, ", server={}", server)?;
        }
        f.write_str("}")
    }
}

/// Per-table settings consulted when recording transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: TableName,
    /// Replication consumers must see region opens in sequence order
    pub serial_replication: bool,
    /// Number of replicas per region, primary included
    pub region_replication: u32,
}

impl TableDescriptor {
    pub fn new(name: TableName) -> Self {
        Self {
            name,
            serial_replication: false,
            region_replication: 1,
        }
    }

    pub fn with_serial_replication(mut self, serial: bool) -> Self {
        self.serial_replication = serial;
        self
    }

    pub fn with_region_replication(mut self, replicas: u32) -> Self {
        self.region_replication = replicas.max(1);
        self
    }
}

/// Lookup of table descriptors by name
pub trait TableDescriptors: Send + Sync {
    fn get(&self, table: &TableName) -> Option<TableDescriptor>;

    /// Tables without a descriptor replicate normally
    fn is_serial(&self, table: &TableName) -> bool {
        self.get(table).is_some_and(|d| d.serial_replication)
    }
}

/// Table descriptors held in memory
#[derive(Default)]
pub struct InMemoryTableDescriptors {
    tables: RwLock<HashMap<TableName, TableDescriptor>>,
}

impl InMemoryTableDescriptors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, descriptor: TableDescriptor) {
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(descriptor.name.clone(), descriptor);
    }
}

impl TableDescriptors for InMemoryTableDescriptors {
    fn get(&self, table: &TableName) -> Option<TableDescriptor> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_name_and_replicas() {
        let region = RegionInfo::new(TableName::new("t1"), b"a".to_vec(), b"m".to_vec(), 42);
        assert_eq!(region.region_name(), b"t1,a,42".to_vec());

        let replica = region.with_replica(2);
        assert_eq!(replica.region_name(), b"t1,a,42_0002".to_vec());
        assert_eq!(replica.catalog_row_key(), region.catalog_row_key());
        assert_ne!(replica.encoded_name(), region.encoded_name());
        assert_eq!(region.encoded_name().len(), 32);
    }

    #[test]
    fn test_replica_suffix_is_hex() {
        assert_eq!(replica_suffix(1), "_0001");
        assert_eq!(replica_suffix(31), "_001F");
    }

    #[test]
    fn test_meta_region() {
        let meta = RegionInfo::first_meta();
        assert!(meta.is_meta_region());
        assert!(meta.is_default_replica());
        assert!(!RegionInfo::new(TableName::new("t1"), vec![], vec![], 1).is_meta_region());
    }

    #[test]
    fn test_server_name_parse() {
        let sn = ServerName::new("rs1.example.com", 16020, 1700000000000);
        let parsed: ServerName = sn.to_string().parse().unwrap();
        assert_eq!(parsed, sn);
        assert_eq!(sn.host_and_port(), "rs1.example.com:16020");

        assert!("host".parse::<ServerName>().is_err());
        assert!("host,port,1".parse::<ServerName>().is_err());
        assert!(",1,1".parse::<ServerName>().is_err());
        assert!("h,1,1,1".parse::<ServerName>().is_err());
    }

    #[test]
    fn test_state_names() {
        for state in State::ALL {
            assert_eq!(state.as_str().parse::<State>().unwrap(), state);
        }
        assert_eq!("open".parse::<State>().unwrap(), State::Open);
        assert!("BOGUS".parse::<State>().is_err());
        assert!(State::Merged.is_synthetic());
        assert!(!State::Offline.is_synthetic());
    }

    #[test]
    fn test_split_parent_copy() {
        let region = RegionInfo::new(TableName::new("t1"), vec![], vec![], 7);
        let parent = region.as_split_parent();
        assert!(parent.is_offline() && parent.is_split());
        assert!(!region.is_offline());
        assert_eq!(parent.region_name(), region.region_name());

        let bytes = parent.to_bytes().unwrap();
        assert_eq!(RegionInfo::from_bytes(&bytes).unwrap(), parent);
    }

    #[test]
    fn test_table_descriptors() {
        let tables = InMemoryTableDescriptors::new();
        let t1 = TableName::new("t1");
        assert!(!tables.is_serial(&t1));
        tables.add(TableDescriptor::new(t1.clone()).with_serial_replication(true));
        assert!(tables.is_serial(&t1));
        assert_eq!(
            TableDescriptor::new(t1).with_region_replication(0).region_replication,
            1
        );
    }
}
