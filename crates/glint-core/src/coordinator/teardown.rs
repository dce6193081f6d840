//! Reset and teardown protocol
//!
//! Reset runs in a fixed order:
//!
//! 1. wait for the last dispatched job (owned data directory only)
//! 2. destroy the metrics core
//! 3. clear the core's test mode
//! 4. clear local flags
//! 5. disarm the teardown hook
//! 6. remove the owned data directory through the dispatcher
//!
//! Steps 1 and 6 go through the same FIFO dispatcher, so an upload queued
//! before reset always finishes before its data directory is deleted.

use std::path::PathBuf;

use anyhow::Context;
use glint_dispatch::job;
use tracing::{debug, error, info};

use super::Coordinator;
use crate::error::{Error, Result};

impl Coordinator {
    /// Return to `Uninitialized`, releasing the core and any owned data
    /// directory.
    ///
    /// Blocks while background jobs drain when the data directory is owned.
    /// Must not be called from inside an async runtime in that case.
    pub fn reset(&self) -> Result<()> {
        let owned_dir = self.owned_data_dir();

        if let Some(dir) = owned_dir.as_deref().filter(|dir| dir.exists()) {
            debug!(data_dir = %dir.display(), "Waiting for pending jobs before reset");
            self.shared.dispatcher.wait_for_last()?;
        }

        self.shared.core.destroy(false)?;
        self.shared.core.set_test_mode(false)?;

        {
            let mut state = self.shared.state.lock();
            state.init_finished = false;
            state.initialized = false;
            state.testing_mode = false;
            state.uploader = None;
            if state.exit_hook_armed {
                state.exit_hook_armed = false;
                debug!("Teardown hook disarmed");
            }
        }

        if let Some(dir) = owned_dir.filter(|dir| dir.exists()) {
            self.remove_data_dir(dir)?;
        }

        self.shared.state.lock().destroy_data_dir = false;
        info!("Coordinator reset");
        Ok(())
    }

    /// Explicit process-exit teardown.
    ///
    /// Runs [`reset`](Self::reset) once per accepted `initialize`; later
    /// calls do nothing.
    pub fn shutdown(&self) -> Result<()> {
        let armed = self.shared.state.lock().exit_hook_armed;
        if !armed {
            return Ok(());
        }
        debug!("Running teardown");
        self.reset()
    }

    fn owned_data_dir(&self) -> Option<PathBuf> {
        let state = self.shared.state.lock();
        if !state.destroy_data_dir {
            return None;
        }
        state.session.as_ref().map(|session| session.data_dir.clone())
    }

    fn remove_data_dir(&self, dir: PathBuf) -> Result<()> {
        let target = dir.clone();
        let removed = self
            .shared
            .dispatcher
            .submit(job(async move {
                tokio::fs::remove_dir_all(&target)
                    .await
                    .with_context(|| format!("removing {}", target.display()))?;
                anyhow::Ok(())
            }))
            .and_then(|handle| handle.wait());

        match removed {
            Ok(()) => {
                debug!(data_dir = %dir.display(), "Data directory removed");
                Ok(())
            }
            Err(source) => Err(Error::Teardown { path: dir, source }),
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "Teardown failed");
        }
    }
}
