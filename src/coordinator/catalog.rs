//! Catalog table schema and RocksDB-backed storage
//!
//! Each region row lives under its primary replica's region name and holds,
//! per replica, a `state` and an `sn` (transitioning server) column plus the
//! location columns written when the region opens. Replicas other than the
//! primary suffix every column name with `_XXXX`.
//!
//! Families:
//! - `info`: region descriptor, location, state, split/merge references
//! - `rep_barrier`: serial replication barriers keyed by open sequence number
//! - `rep_meta`: serial replication bookkeeping (table name, lineage)

use crate::common::{Error, Result};
use crate::coordinator::region::{replica_suffix, RegionInfo, ServerName, State, DEFAULT_REPLICA_ID};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use std::collections::BTreeMap;
use std::path::Path;

pub const REGIONINFO_QUALIFIER: &str = "regioninfo";
pub const SERVER_QUALIFIER: &str = "server";
pub const STARTCODE_QUALIFIER: &str = "serverstartcode";
pub const SEQNUM_QUALIFIER: &str = "seqnumDuringOpen";
pub const SERVERNAME_QUALIFIER: &str = "sn";
pub const STATE_QUALIFIER: &str = "state";
pub const SPLITA_QUALIFIER: &str = "splitA";
pub const SPLITB_QUALIFIER: &str = "splitB";
pub const MERGEA_QUALIFIER: &str = "mergeA";
pub const MERGEB_QUALIFIER: &str = "mergeB";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    Info,
    RepBarrier,
    RepMeta,
}

impl Family {
    pub const ALL: [Family; 3] = [Family::Info, Family::RepBarrier, Family::RepMeta];

    pub fn name(&self) -> &'static str {
        match self {
            Family::Info => "info",
            Family::RepBarrier => "rep_barrier",
            Family::RepMeta => "rep_meta",
        }
    }
}

fn replica_column(base: &str, replica_id: u32) -> Vec<u8> {
    if replica_id == DEFAULT_REPLICA_ID {
        base.as_bytes().to_vec()
    } else {
        format!("{}{}", base, replica_suffix(replica_id)).into_bytes()
    }
}

pub fn state_column(replica_id: u32) -> Vec<u8> {
    replica_column(STATE_QUALIFIER, replica_id)
}

pub fn server_name_column(replica_id: u32) -> Vec<u8> {
    replica_column(SERVERNAME_QUALIFIER, replica_id)
}

pub fn server_column(replica_id: u32) -> Vec<u8> {
    replica_column(SERVER_QUALIFIER, replica_id)
}

pub fn start_code_column(replica_id: u32) -> Vec<u8> {
    replica_column(STARTCODE_QUALIFIER, replica_id)
}

pub fn seqnum_column(replica_id: u32) -> Vec<u8> {
    replica_column(SEQNUM_QUALIFIER, replica_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub family: Family,
    pub qualifier: Vec<u8>,
    pub value: Vec<u8>,
}

/// Column values written to a single row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Put {
    row: Vec<u8>,
    cells: Vec<Cell>,
}

impl Put {
    pub fn new(row: impl Into<Vec<u8>>) -> Self {
        Self {
            row: row.into(),
            cells: Vec::new(),
        }
    }

    pub fn add_column(
        &mut self,
        family: Family,
        qualifier: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> &mut Self {
        self.cells.push(Cell {
            family,
            qualifier: qualifier.into(),
            value: value.into(),
        });
        self
    }

    pub fn row(&self) -> &[u8] {
        &self.row
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Last value added for a column
    pub fn get(&self, family: Family, qualifier: &[u8]) -> Option<&[u8]> {
        self.cells
            .iter()
            .rev()
            .find(|c| c.family == family && c.qualifier == qualifier)
            .map(|c| c.value.as_slice())
    }
}

/// One entry of a catalog write batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Put(Put),
    /// Removes every column of the row
    Delete { row: Vec<u8> },
}

impl Mutation {
    pub fn row(&self) -> &[u8] {
        match self {
            Mutation::Put(put) => put.row(),
            Mutation::Delete { row } => row,
        }
    }

    pub fn as_put(&self) -> Option<&Put> {
        match self {
            Mutation::Put(put) => Some(put),
            Mutation::Delete { .. } => None,
        }
    }
}

impl From<Put> for Mutation {
    fn from(put: Put) -> Self {
        Mutation::Put(put)
    }
}

/// Record the location of an open region: server, start code and the
/// sequence number the region opened at.
pub fn add_location(put: &mut Put, server: &ServerName, open_seq_num: i64, replica_id: u32) {
    put.add_column(
        Family::Info,
        server_column(replica_id),
        server.host_and_port().into_bytes(),
    );
    put.add_column(
        Family::Info,
        start_code_column(replica_id),
        server.start_code.to_be_bytes().to_vec(),
    );
    put.add_column(
        Family::Info,
        seqnum_column(replica_id),
        open_seq_num.to_be_bytes().to_vec(),
    );
}

/// Blank location columns for a replica that is not assigned yet
pub fn add_empty_location(put: &mut Put, replica_id: u32) {
    put.add_column(Family::Info, server_column(replica_id), Vec::new());
    put.add_column(Family::Info, start_code_column(replica_id), Vec::new());
    put.add_column(Family::Info, seqnum_column(replica_id), Vec::new());
}

/// Row put carrying the serialized region descriptor
pub fn put_from_region_info(region: &RegionInfo) -> Result<Put> {
    let mut put = Put::new(region.catalog_row_key());
    put.add_column(Family::Info, REGIONINFO_QUALIFIER, region.to_bytes()?);
    Ok(put)
}

pub fn delete_from_region_info(region: &RegionInfo) -> Mutation {
    Mutation::Delete {
        row: region.catalog_row_key(),
    }
}

/// A catalog row as read back from storage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogRow {
    pub row: Vec<u8>,
    cells: BTreeMap<(Family, Vec<u8>), Vec<u8>>,
}

impl CatalogRow {
    pub fn get(&self, family: Family, qualifier: &[u8]) -> Option<&[u8]> {
        self.cells
            .get(&(family, qualifier.to_vec()))
            .map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn columns(&self, family: Family) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.cells
            .iter()
            .filter(move |((f, _), _)| *f == family)
            .map(|((_, q), v)| (q.as_slice(), v.as_slice()))
    }

    pub fn region_info(&self) -> Result<Option<RegionInfo>> {
        self.non_empty(Family::Info, REGIONINFO_QUALIFIER.as_bytes())
            .map(RegionInfo::from_bytes)
            .transpose()
    }

    /// Recorded state of a replica; rows written before states were tracked
    /// have none and are treated as OPEN.
    pub fn region_state(&self, replica_id: u32) -> Result<State> {
        match self.non_empty(Family::Info, &state_column(replica_id)) {
            None => Ok(State::Open),
            Some(value) => std::str::from_utf8(value)
                .map_err(|_| Error::Corrupted("state column is not UTF-8".into()))?
                .parse(),
        }
    }

    /// Server a replica is transitioning on, falling back to its location
    /// when no transition server was recorded.
    pub fn region_server(&self, replica_id: u32) -> Result<Option<ServerName>> {
        if let Some(value) = self.non_empty(Family::Info, &server_name_column(replica_id)) {
            let name = std::str::from_utf8(value)
                .map_err(|_| Error::Corrupted("sn column is not UTF-8".into()))?;
            return name.parse().map(Some);
        }
        self.location(replica_id)
    }

    /// Server a replica was last opened on, from the location columns
    pub fn location(&self, replica_id: u32) -> Result<Option<ServerName>> {
        let Some(host_port) = self.non_empty(Family::Info, &server_column(replica_id)) else {
            return Ok(None);
        };
        let host_port = std::str::from_utf8(host_port)
            .map_err(|_| Error::Corrupted("server column is not UTF-8".into()))?;
        let (host, port) = host_port
            .rsplit_once(':')
            .ok_or_else(|| Error::Corrupted(format!("bad location: {}", host_port)))?;
        let port = port
            .parse()
            .map_err(|_| Error::Corrupted(format!("bad location port: {}", host_port)))?;
        let start_code = match self.non_empty(Family::Info, &start_code_column(replica_id)) {
            Some(bytes) => u64::from_be_bytes(
                bytes
                    .try_into()
                    .map_err(|_| Error::Corrupted("bad serverstartcode".into()))?,
            ),
            None => 0,
        };
        Ok(Some(ServerName::new(host, port, start_code)))
    }

    /// Sequence number a replica was opened at, if recorded
    pub fn open_seq_num(&self, replica_id: u32) -> Result<Option<i64>> {
        self.non_empty(Family::Info, &seqnum_column(replica_id))
            .map(|bytes| {
                bytes
                    .try_into()
                    .map(i64::from_be_bytes)
                    .map_err(|_| Error::Corrupted("bad seqnumDuringOpen".into()))
            })
            .transpose()
    }

    fn non_empty(&self, family: Family, qualifier: &[u8]) -> Option<&[u8]> {
        self.get(family, qualifier).filter(|v| !v.is_empty())
    }
}

/// Storage key of a cell: length-prefixed row followed by the qualifier, so
/// that one row's cells sort together and never collide with another row.
fn cell_key(row: &[u8], qualifier: &[u8]) -> Vec<u8> {
    let mut key = row_prefix(row);
    key.extend_from_slice(qualifier);
    key
}

fn row_prefix(row: &[u8]) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(4 + row.len());
    prefix.extend_from_slice(&(row.len() as u32).to_be_bytes());
    prefix.extend_from_slice(row);
    prefix
}

/// The catalog table, one RocksDB column family per catalog family
pub struct CatalogStore {
    db: DB,
}

impl CatalogStore {
    /// Open or create the catalog table
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, Family::ALL.iter().map(|f| f.name()))?;

        Ok(Self { db })
    }

    fn cf(&self, family: Family) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(family.name())
            .ok_or_else(|| Error::Internal(format!("missing column family {}", family.name())))
    }

    /// Apply one mutation; the row is updated atomically
    pub fn apply(&self, mutation: &Mutation) -> Result<()> {
        self.mutate_rows_atomically(std::slice::from_ref(mutation))
    }

    /// Apply several mutations, possibly spanning rows, as one atomic write
    pub fn mutate_rows_atomically(&self, mutations: &[Mutation]) -> Result<()> {
        let mut batch = WriteBatch::default();
        for mutation in mutations {
            self.add_to_batch(&mut batch, mutation)?;
        }
        self.db.write(batch)?;
        Ok(())
    }

    fn add_to_batch(&self, batch: &mut WriteBatch, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::Put(put) => {
                for cell in put.cells() {
                    let cf = self.cf(cell.family)?;
                    batch.put_cf(cf, cell_key(put.row(), &cell.qualifier), &cell.value);
                }
            }
            Mutation::Delete { row } => {
                let prefix = row_prefix(row);
                for family in Family::ALL {
                    let cf = self.cf(family)?;
                    for key in self.keys_with_prefix(cf, &prefix)? {
                        batch.delete_cf(cf, key);
                    }
                }
            }
        }
        Ok(())
    }

    fn keys_with_prefix(&self, cf: &ColumnFamily, prefix: &[u8]) -> Result<Vec<Box<[u8]>>> {
        let mut keys = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    /// Read every column of a row
    pub fn get_row(&self, row: &[u8]) -> Result<Option<CatalogRow>> {
        let prefix = row_prefix(row);
        let mut result = CatalogRow {
            row: row.to_vec(),
            ..Default::default()
        };
        for family in Family::ALL {
            let cf = self.cf(family)?;
            for item in self
                .db
                .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
            {
                let (key, value) = item?;
                if !key.starts_with(&prefix) {
                    break;
                }
                result
                    .cells
                    .insert((family, key[prefix.len()..].to_vec()), value.to_vec());
            }
        }
        Ok((!result.is_empty()).then_some(result))
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        for family in Family::ALL {
            self.db.flush_cf(self.cf(family)?)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::region::TableName;
    use tempfile::tempdir;

    #[test]
    fn test_replica_columns() {
        assert_eq!(state_column(0), b"state".to_vec());
        assert_eq!(state_column(1), b"state_0001".to_vec());
        assert_eq!(server_name_column(0), b"sn".to_vec());
        assert_eq!(server_name_column(10), b"sn_000A".to_vec());
        assert_eq!(seqnum_column(2), b"seqnumDuringOpen_0002".to_vec());
    }

    #[test]
    fn test_put_and_read_row() {
        let dir = tempdir().unwrap();
        let store = CatalogStore::open(dir.path().join("catalog")).unwrap();
        let region = RegionInfo::new(TableName::new("t1"), vec![], vec![], 1);
        let sn = ServerName::new("rs1", 16020, 99);

        let mut put = put_from_region_info(&region).unwrap();
        add_location(&mut put, &sn, 5, 0);
        put.add_column(Family::Info, state_column(0), "OPEN");
        store.apply(&put.into()).unwrap();

        let row = store.get_row(&region.catalog_row_key()).unwrap().unwrap();
        assert_eq!(row.region_info().unwrap().unwrap(), region);
        assert_eq!(row.region_state(0).unwrap(), State::Open);
        assert_eq!(row.location(0).unwrap().unwrap(), sn);
        assert_eq!(row.region_server(0).unwrap().unwrap(), sn);
        assert_eq!(row.open_seq_num(0).unwrap(), Some(5));
        assert_eq!(row.open_seq_num(1).unwrap(), None);
    }

    #[test]
    fn test_missing_state_defaults_to_open() {
        let dir = tempdir().unwrap();
        let store = CatalogStore::open(dir.path().join("catalog")).unwrap();
        let mut put = Put::new(b"t1,,1".to_vec());
        put.add_column(Family::Info, state_column(1), "CLOSED");
        store.apply(&put.into()).unwrap();

        let row = store.get_row(b"t1,,1").unwrap().unwrap();
        assert_eq!(row.region_state(0).unwrap(), State::Open);
        assert_eq!(row.region_state(1).unwrap(), State::Closed);
        assert!(row.region_server(0).unwrap().is_none());
    }

    #[test]
    fn test_rows_do_not_overlap() {
        let dir = tempdir().unwrap();
        let store = CatalogStore::open(dir.path().join("catalog")).unwrap();
        let mut a = Put::new(b"t1,,1".to_vec());
        a.add_column(Family::Info, "state", "OPEN");
        let mut b = Put::new(b"t1,,10".to_vec());
        b.add_column(Family::Info, "state", "CLOSED");
        store
            .mutate_rows_atomically(&[a.into(), b.into()])
            .unwrap();

        assert_eq!(store.get_row(b"t1,,1").unwrap().unwrap().len(), 1);

        store
            .apply(&Mutation::Delete {
                row: b"t1,,1".to_vec(),
            })
            .unwrap();
        assert!(store.get_row(b"t1,,1").unwrap().is_none());
        assert!(store.get_row(b"t1,,10").unwrap().is_some());
    }
}
