//! # regionstore
//!
//! Region state persistence for the coordinator of a partitioned
//! column-family store:
//! - Decides which region state transitions reach the catalog table
//! - Writes through the co-located catalog region, falling back to pooled
//!   connections for good once that shortcut fails
//! - Appends serial replication barriers for region opens
//! - Publishes the catalog region's own location to the coordination service
//! - Aborts the coordinator when a transition cannot be made durable
//!
//! ## Architecture
//!
//! ```text
//!        assignment manager
//!                │ record_transition(new, old, open_seq_num)
//!        ┌───────▼────────┐
//!        │RegionStateStore│── catalog region ──▶ MetaLocationRegistry
//!        └───────┬────────┘
//!                │ policy + barrier
//!        ┌───────▼──────────┐
//!        │CatalogWriteChannel│
//!        └──┬────────────┬──┘
//!   Direct  │            │  Pooled (after demotion)
//!  ┌────────▼───┐   ┌────▼───────────┐
//!  │ co-located │   │ ConnectionPool │
//!  │ catalog    │   │  (N conns)     │
//!  └────────────┘   └────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! regionstore --data-dir ./rs-data record \
//!   --region t1,,,1 --state OPEN --prev OPENING \
//!   --server rs1,16020,1700000000000 --seq 5
//! regionstore --data-dir ./rs-data show --region t1,,,1
//! ```

pub mod common;
pub mod coordinator;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::{Coordinator, RegionStateStore};

