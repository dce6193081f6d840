//! Experiment accessors
//!
//! Experiment state lives in the metrics core; every query goes through it.

use std::collections::HashMap;

use tracing::debug;

use super::Coordinator;
use crate::error::{Error, Result};
use crate::metrics_core::RecordedExperiment;

impl Coordinator {
    /// Annotate pings with an active experiment
    pub fn set_experiment_active(
        &self,
        experiment_id: &str,
        branch: &str,
        extra: Option<HashMap<String, String>>,
    ) -> Result<()> {
        debug!(experiment_id, branch, "Setting experiment active");
        self.shared
            .core
            .set_experiment_active(experiment_id, branch, extra.unwrap_or_default())?;
        Ok(())
    }

    /// Stop annotating pings with an experiment
    pub fn set_experiment_inactive(&self, experiment_id: &str) -> Result<()> {
        debug!(experiment_id, "Setting experiment inactive");
        self.shared.core.set_experiment_inactive(experiment_id)?;
        Ok(())
    }

    /// Whether the experiment is currently active
    pub fn test_is_experiment_active(&self, experiment_id: &str) -> Result<bool> {
        Ok(self.shared.core.get_experiment_data(experiment_id)?.is_some())
    }

    /// Recorded data of an active experiment.
    ///
    /// Fails with [`Error::ExperimentNotFound`] when the experiment is not
    /// active.
    pub fn test_get_experiment_data(&self, experiment_id: &str) -> Result<RecordedExperiment> {
        self.shared
            .core
            .get_experiment_data(experiment_id)?
            .ok_or_else(|| Error::ExperimentNotFound {
                experiment_id: experiment_id.to_string(),
            })
    }
}
