//! Per-project single flight for kickoff runs.
//!
//! At most one run per project id is registered at a time. The registration
//! lives in a [`FlightGuard`] and is removed when the guard drops, including
//! on panic unwind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use squadron_state::ProjectId;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub(crate) struct FlightRegistry {
    runs: Arc<Mutex<HashMap<ProjectId, CancellationToken>>>,
}

impl FlightRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<ProjectId, CancellationToken>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a run for `project`; `None` if one is already in flight.
    pub(crate) fn acquire(
        &self,
        project: ProjectId,
        token: CancellationToken,
    ) -> Option<FlightGuard> {
        let mut runs = self.lock();
        if runs.contains_key(&project) {
            return None;
        }
        runs.insert(project, token);
        Some(FlightGuard {
            registry: self.clone(),
            project,
        })
    }

    /// Cancel the in-flight run for `project`. Returns whether one existed.
    pub(crate) fn cancel(&self, project: &ProjectId) -> bool {
        match self.lock().get(project) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_running(&self, project: &ProjectId) -> bool {
        self.lock().contains_key(project)
    }

    pub(crate) fn running(&self) -> Vec<ProjectId> {
        self.lock().keys().copied().collect()
    }
}

/// Releases the project's registration on drop.
#[derive(Debug)]
pub(crate) struct FlightGuard {
    registry: FlightRegistry,
    project: ProjectId,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.project);
    }
}
