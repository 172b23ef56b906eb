//! Authoritative in-process cache of the simulated world.

use slotsim_gateway::{
    validate_process, validate_resource, Process, Resource, SimulationControl, SimulationRunState,
    ValidationError,
};
use std::sync::RwLock;
use tokio::sync::watch;

#[derive(Default)]
struct Collections {
    resources: Vec<Resource>,
    processes: Vec<Process>,
    control: SimulationControl,
    candidates: Vec<Process>,
}

/// The single shared source of truth for the session.
///
/// Consumers receive it as an `Arc<StateStore>` and never duplicate it.
/// Every mutation replaces an entire collection; there is deliberately no
/// partial-patch API, so a reader always observes either the old or the new
/// complete collection. A replacement that is structurally equal to the
/// current value does not bump the revision, so watchers are not woken for
/// re-delivered identical snapshots.
pub struct StateStore {
    inner: RwLock<Collections>,
    revision: watch::Sender<u64>,
}

impl StateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: RwLock::new(Collections::default()),
            revision,
        }
    }

    /// Current resource collection, in engine order.
    pub fn resources(&self) -> Vec<Resource> {
        self.inner.read().unwrap().resources.clone()
    }

    /// Current process collection, in engine order.
    pub fn processes(&self) -> Vec<Process> {
        self.inner.read().unwrap().processes.clone()
    }

    /// Current simulation control state.
    pub fn control(&self) -> SimulationControl {
        self.inner.read().unwrap().control
    }

    /// Processes currently flagged for possible removal.
    pub fn mitigation_candidates(&self) -> Vec<Process> {
        self.inner.read().unwrap().candidates.clone()
    }

    /// Current revision number. Bumped once per observable change.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Subscribes to change notifications for the read-only projection.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Replaces the resource collection. Returns whether anything changed.
    pub fn replace_resources(&self, resources: Vec<Resource>) -> Result<bool, ValidationError> {
        for resource in &resources {
            validate_resource(resource)?;
        }
        let mut inner = self.inner.write().unwrap();
        if inner.resources == resources {
            return Ok(false);
        }
        inner.resources = resources;
        drop(inner);
        self.bump();
        Ok(true)
    }

    /// Replaces the process collection. Returns whether anything changed.
    pub fn replace_processes(&self, processes: Vec<Process>) -> Result<bool, ValidationError> {
        for process in &processes {
            validate_process(process)?;
        }
        let mut inner = self.inner.write().unwrap();
        if inner.processes == processes {
            return Ok(false);
        }
        inner.processes = processes;
        drop(inner);
        self.bump();
        Ok(true)
    }

    /// Replaces the mitigation candidate set. Latest set wins, no merge.
    pub fn replace_candidates(&self, candidates: Vec<Process>) -> bool {
        let mut inner = self.inner.write().unwrap();
        if inner.candidates == candidates {
            return false;
        }
        inner.candidates = candidates;
        drop(inner);
        self.bump();
        true
    }

    /// Clears the mitigation candidate set.
    pub fn clear_candidates(&self) -> bool {
        self.replace_candidates(Vec::new())
    }

    /// Replaces the whole control state.
    pub fn set_control(&self, control: SimulationControl) -> bool {
        let mut inner = self.inner.write().unwrap();
        if inner.control == control {
            return false;
        }
        inner.control = control;
        drop(inner);
        self.bump();
        true
    }

    /// Sets the simulation speed, keeping the run state.
    pub fn set_speed(&self, speed: u64) -> bool {
        let control = self.control();
        self.set_control(SimulationControl { speed, ..control })
    }

    /// Sets the run state, keeping the speed.
    pub fn set_state(&self, state: SimulationRunState) -> bool {
        let control = self.control();
        self.set_control(SimulationControl { state, ..control })
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
