//! Common utilities and types shared across regionstore

pub mod config;
pub mod error;
pub mod utils;

pub use config::Config;
pub use error::{Error, Result};
pub use utils::{blake3_hash, timestamp_now_millis, to_printable};
