//! Process-wide coordinator handle
//!
//! Hosts that want a single global session install one coordinator at
//! startup and call [`shutdown`] before exiting. Statics are never dropped,
//! so the installed coordinator's teardown only runs through [`shutdown`].

use std::sync::OnceLock;

use crate::coordinator::Coordinator;
use crate::error::Result;

/// Global coordinator instance
static COORDINATOR: OnceLock<Coordinator> = OnceLock::new();

/// Install the global coordinator.
///
/// Only the first call succeeds; later calls hand the coordinator back.
pub fn install(coordinator: Coordinator) -> std::result::Result<(), Coordinator> {
    COORDINATOR.set(coordinator)
}

/// Get the global coordinator, if one was installed
pub fn coordinator() -> Option<&'static Coordinator> {
    COORDINATOR.get()
}

/// Run teardown on the global coordinator, if one was installed
pub fn shutdown() -> Result<()> {
    match COORDINATOR.get() {
        Some(coordinator) => coordinator.shutdown(),
        None => Ok(()),
    }
}
