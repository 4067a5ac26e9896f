//! Serial replication barriers
//!
//! Tables with serial replication need consumers to replay region opens in
//! sequence order. Every open of such a region appends a barrier holding the
//! sequence number it opened at; split and merge leave lineage entries so
//! consumers can finish a parent before moving on to its children.

use crate::coordinator::catalog::{Family, Mutation, Put};
use crate::coordinator::region::{RegionInfo, State, TableDescriptor};

pub const TABLE_NAME_QUALIFIER: &str = "tablename";
pub const PARENT_QUALIFIER: &str = "_PARENT_";
pub const DAUGHTER_QUALIFIER: &str = "_DAUGHTER_";

/// Barrier for a region that just opened at `open_seq_num`
pub fn make_barrier_put(region: &RegionInfo, open_seq_num: i64) -> Put {
    let seq = open_seq_num.to_be_bytes();
    let mut put = Put::new(region.encoded_name().into_bytes());
    put.add_column(Family::RepBarrier, seq.to_vec(), seq.to_vec());
    put.add_column(
        Family::RepMeta,
        TABLE_NAME_QUALIFIER,
        region.table().as_bytes().to_vec(),
    );
    put
}

/// Barrier to append after the state put, if the transition needs one.
///
/// Only call this for transitions the policy already approved.
pub fn build_barrier(
    region: &RegionInfo,
    descriptor: Option<&TableDescriptor>,
    state: State,
    open_seq_num: i64,
) -> Option<Mutation> {
    let serial = descriptor.is_some_and(|d| d.serial_replication);
    (serial && state == State::Open && open_seq_num >= 0)
        .then(|| make_barrier_put(region, open_seq_num).into())
}

/// Child row entry naming the parent(s) it came from
pub fn make_parent_link(child: &RegionInfo, parents: &[&RegionInfo]) -> Mutation {
    let mut put = Put::new(child.encoded_name().into_bytes());
    put.add_column(Family::RepMeta, PARENT_QUALIFIER, join_encoded(parents));
    put.into()
}

/// Parent row entry naming the child(ren) that replaced it
pub fn make_daughter_link(parent: &RegionInfo, children: &[&RegionInfo]) -> Mutation {
    let mut put = Put::new(parent.encoded_name().into_bytes());
    put.add_column(Family::RepMeta, DAUGHTER_QUALIFIER, join_encoded(children));
    put.into()
}

fn join_encoded(regions: &[&RegionInfo]) -> Vec<u8> {
    regions
        .iter()
        .map(|r| r.encoded_name())
        .collect::<Vec<_>>()
        .join(",")
        .into_bytes()
}
