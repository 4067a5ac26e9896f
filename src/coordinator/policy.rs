//! Which region state transitions get written to the catalog table

use crate::coordinator::region::{RegionInfo, State};

/// Should a transition to `new_state` be recorded in the catalog?
///
/// Every transition is worth persisting except those of regions that have
/// no catalog row: new split daughters and merge results not created yet,
/// and merged parents already removed. Their later move to OFFLINE has
/// no row to update either. The catalog region never records itself in the
/// catalog table; its location goes to the coordination service.
pub fn should_persist(region: &RegionInfo, new_state: State, old_state: Option<State>) -> bool {
    if region.is_meta_region() || new_state.is_synthetic() {
        return false;
    }
    !(new_state == State::Offline && old_state.is_some_and(|s| s.is_synthetic()))
}
