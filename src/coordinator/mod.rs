//! Coordinator side of region assignment
//!
//! The coordinator is responsible for:
//! - Recording region state transitions in the catalog table
//! - Publishing the catalog region's own location
//! - Recording split and merge results
//! - Aborting when the catalog can no longer be kept in sync

pub mod abort;
pub mod barrier;
pub mod catalog;
pub mod connection;
pub mod location;
pub mod policy;
pub mod region;
pub mod server;
pub mod state_store;
pub mod write_channel;

pub use server::Coordinator;
pub use state_store::RegionStateStore;
