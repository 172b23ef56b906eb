//! Deadlock mitigation workflow.
//!
//! Triggered exclusively by `unsafe_state` push events. The workflow halts
//! the simulation, presents the implicated processes as removal candidates,
//! and applies the operator's decision. Resolving never resumes the
//! simulation; that is a separate, deliberate operator action.

use crate::coordinator::OperatorNotice;
use crate::store::StateStore;
use serde::Serialize;
use slotsim_gateway::{
    CommandKind, EngineGateway, GatewayError, Process, ProcessId, SimulationControl,
    SimulationRunState,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Where the workflow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MitigationState {
    /// Normal operation; control state is whatever the operator last set
    #[default]
    Idle,

    /// An unsafe state is on the table, awaiting an operator decision
    UnsafeDetected,
}

/// The operator's way out of an unsafe state.
#[derive(Debug, Clone)]
pub enum MitigationDecision {
    /// Remove the selected candidates (may be empty)
    RemoveCandidates(Vec<ProcessId>),

    /// Keep everything and carry on unsafely
    ContinueUnsafe,
}

/// State machine: `Idle → UnsafeDetected → Idle`.
pub struct MitigationWorkflow {
    gateway: Arc<dyn EngineGateway>,
    store: Arc<StateStore>,
    state: Mutex<MitigationState>,
    command_timeout: Duration,
    notices: mpsc::UnboundedSender<OperatorNotice>,
}

impl MitigationWorkflow {
    pub(crate) fn new(
        gateway: Arc<dyn EngineGateway>,
        store: Arc<StateStore>,
        command_timeout: Duration,
        notices: mpsc::UnboundedSender<OperatorNotice>,
    ) -> Self {
        Self {
            gateway,
            store,
            state: Mutex::new(MitigationState::Idle),
            command_timeout,
            notices,
        }
    }

    /// Current workflow state.
    pub fn state(&self) -> MitigationState {
        *self.state.lock().unwrap()
    }

    /// Handles an `unsafe_state` event from the engine.
    ///
    /// Implicated ids are resolved against the current process collection;
    /// ids with no match are dropped silently (the process may already be
    /// gone). A second event while one is pending replaces the candidate
    /// set outright.
    pub async fn on_unsafe_state(&self, implicated: Vec<ProcessId>) {
        let processes = self.store.processes();
        let candidates: Vec<Process> = processes
            .into_iter()
            .filter(|process| implicated.contains(&process.id))
            .collect();

        info!(
            implicated = implicated.len(),
            resolved = candidates.len(),
            "entering mitigation"
        );
        self.store.replace_candidates(candidates);

        // Forced stop, locally and on the engine.
        self.store.set_control(SimulationControl {
            speed: 0,
            state: SimulationRunState::Stopped,
        });
        if let Err(err) = self
            .call(
                CommandKind::SetSimulationSpeed,
                self.gateway.set_simulation_speed(0),
            )
            .await
        {
            self.notify(CommandKind::SetSimulationSpeed, "speed 0", &err);
        }
        if let Err(err) = self
            .call(
                CommandKind::SetSimulationState,
                self.gateway
                    .set_simulation_state(SimulationRunState::Stopped),
            )
            .await
        {
            self.notify(CommandKind::SetSimulationState, "stopped", &err);
        }

        *self.state.lock().unwrap() = MitigationState::UnsafeDetected;
    }

    /// Applies the operator's decision and returns to `Idle`.
    ///
    /// One `remove_process` command is issued per selected candidate; a
    /// rejection is surfaced but the local removal stands. Ids that are not
    /// in the candidate set are ignored. The forced speed-0/stopped control
    /// state is left in place either way.
    pub async fn resolve(&self, decision: MitigationDecision) {
        if self.state() == MitigationState::Idle {
            debug!("resolve called with no mitigation pending");
            return;
        }

        if let MitigationDecision::RemoveCandidates(selected) = decision {
            let candidates = self.store.mitigation_candidates();
            for candidate in candidates
                .iter()
                .filter(|candidate| selected.contains(&candidate.id))
            {
                let mut processes = self.store.processes();
                processes.retain(|process| process.id != candidate.id);
                if let Err(err) = self.store.replace_processes(processes) {
                    self.notify(CommandKind::RemoveProcess, candidate.id.as_str(), &err);
                }

                if let Err(err) = self
                    .call(
                        CommandKind::RemoveProcess,
                        self.gateway.remove_process(candidate.id.clone()),
                    )
                    .await
                {
                    self.notify(CommandKind::RemoveProcess, candidate.id.as_str(), &err);
                } else {
                    info!(process = %candidate.id, name = %candidate.name, "removed to resolve unsafe state");
                }
            }
        }

        self.store.clear_candidates();
        *self.state.lock().unwrap() = MitigationState::Idle;
    }

    async fn call(
        &self,
        command: CommandKind,
        operation: impl std::future::Future<Output = Result<(), GatewayError>>,
    ) -> Result<(), GatewayError> {
        match timeout(self.command_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::timeout(command, self.command_timeout)),
        }
    }

    fn notify(&self, action: CommandKind, target: &str, reason: &impl std::fmt::Display) {
        let notice = OperatorNotice {
            action,
            target: target.to_string(),
            reason: reason.to_string(),
        };
        warn!(%notice, "mitigation step failed");
        let _ = self.notices.send(notice);
    }
}
