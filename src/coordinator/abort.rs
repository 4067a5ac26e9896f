//! Fatal error handling for the host process

use crate::common::Error;

/// Capability to bring the host process down after an unrecoverable error.
///
/// Once a transition that should be durable could not be written, the
/// in-memory assignment view and the catalog may disagree; the host must not
/// keep serving on top of that. `abort` does not return control to a host
/// that keeps running, so there is no "already aborted" state to query.
pub trait Abortable: Send + Sync {
    fn abort(&self, why: &str, cause: &Error);
}

/// Logs the cause and exits the process
#[derive(Default)]
pub struct ProcessAbort;

impl ProcessAbort {
    pub fn new() -> Self {
        Self
    }
}

impl Abortable for ProcessAbort {
    fn abort(&self, why: &str, cause: &Error) {
        tracing::error!(cause = %cause, "ABORTING coordinator: {}", why);
        std::process::exit(1);
    }
}
