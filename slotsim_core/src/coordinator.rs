//! Synchronization coordinator between operator intents and the engine.

use crate::mitigation::MitigationWorkflow;
use crate::store::StateStore;
use serde::Serialize;
use slotsim_gateway::{
    CommandKind, EngineEvent, EngineGateway, GatewayError, Process, ProcessId, Resource,
    ResourceId, ResourceIntensity, SimulationRunState, ValidationError,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Tuning knobs for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Bound on every wait for an engine acknowledgement. The gateway
    /// contract has no cancellation, so an unreachable engine surfaces
    /// here as a timeout failure instead of a hang.
    pub command_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(5),
        }
    }
}

/// A failed operation, described for the operator.
#[derive(Debug, Clone, Serialize)]
pub struct OperatorNotice {
    /// The command that was attempted
    pub action: CommandKind,

    /// Name or id of the entity the command targeted
    pub target: String,

    /// Human-readable failure description
    pub reason: String,
}

impl std::fmt::Display for OperatorNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed for {}: {}", self.action, self.target, self.reason)
    }
}

/// Why an operator intent could not be carried out.
#[derive(Debug, Clone, Error)]
pub enum CoordinatorError {
    /// A local invariant was violated; nothing was sent to the engine.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The engine rejected the command, or the bounded wait elapsed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Orchestrates bootstrap, push reconciliation, and outgoing mutations.
///
/// Mutations are optimistic: the operator-facing collections update as soon
/// as the command locally succeeds, and a later failure is surfaced as an
/// [`OperatorNotice`] without rolling the optimistic change back. The next
/// authoritative snapshot from the engine overwrites whatever did not stick.
pub struct SyncCoordinator {
    gateway: Arc<dyn EngineGateway>,
    store: Arc<StateStore>,
    mitigation: Arc<MitigationWorkflow>,
    config: CoordinatorConfig,
    notices: mpsc::UnboundedSender<OperatorNotice>,
}

impl SyncCoordinator {
    /// Creates a coordinator with a fresh store.
    ///
    /// Returns the coordinator and the receiving end of the operator
    /// notification channel.
    pub fn new(
        gateway: Arc<dyn EngineGateway>,
        config: CoordinatorConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<OperatorNotice>) {
        let store = Arc::new(StateStore::new());
        let (notices, notices_rx) = mpsc::unbounded_channel();
        let mitigation = Arc::new(MitigationWorkflow::new(
            Arc::clone(&gateway),
            Arc::clone(&store),
            config.command_timeout,
            notices.clone(),
        ));
        let coordinator = Arc::new(Self {
            gateway,
            store,
            mitigation,
            config,
            notices,
        });
        (coordinator, notices_rx)
    }

    /// The shared state store, for the read-only projection.
    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    /// The mitigation workflow driven by unsafe-state events.
    pub fn mitigation(&self) -> Arc<MitigationWorkflow> {
        Arc::clone(&self.mitigation)
    }

    /// Startup protocol: pull both snapshots, start the engine, and begin
    /// consuming push events.
    ///
    /// A failed fetch leaves the corresponding collection empty and is
    /// surfaced; there is no automatic retry anywhere in the core.
    pub async fn bootstrap(self: &Arc<Self>) -> JoinHandle<()> {
        match self
            .call(CommandKind::FetchResources, self.gateway.fetch_resources())
            .await
        {
            Ok(resources) => {
                info!(count = resources.len(), "bootstrapped resources");
                if let Err(err) = self.store.replace_resources(resources) {
                    self.notify(CommandKind::FetchResources, "resources", &err);
                }
            }
            Err(err) => self.notify(CommandKind::FetchResources, "resources", &err),
        }

        match self
            .call(CommandKind::FetchProcesses, self.gateway.fetch_processes())
            .await
        {
            Ok(processes) => {
                info!(count = processes.len(), "bootstrapped processes");
                if let Err(err) = self.store.replace_processes(processes) {
                    self.notify(CommandKind::FetchProcesses, "processes", &err);
                }
            }
            Err(err) => self.notify(CommandKind::FetchProcesses, "processes", &err),
        }

        match self
            .call(
                CommandKind::SetSimulationState,
                self.gateway.set_simulation_state(SimulationRunState::Running),
            )
            .await
        {
            Ok(()) => {
                self.store.set_state(SimulationRunState::Running);
            }
            Err(err) => self.notify(CommandKind::SetSimulationState, "simulation", &err),
        }

        let events = self.gateway.subscribe();
        let this = Arc::clone(self);
        tokio::spawn(async move { this.event_loop(events).await })
    }

    /// Creates a resource and appends it to the local collection on success.
    pub async fn create_resource(
        &self,
        name: &str,
        total_amount: u64,
    ) -> Result<Resource, CoordinatorError> {
        if total_amount == 0 {
            let err = ValidationError::ZeroAmount {
                action: "create_resource",
            };
            self.notify(CommandKind::CreateResource, name, &err);
            return Err(err.into());
        }

        match self
            .call(
                CommandKind::CreateResource,
                self.gateway.create_resource(name.to_string(), total_amount),
            )
            .await
        {
            Ok(resource) => {
                // Append in creation order; the collection is never re-sorted.
                let mut resources = self.store.resources();
                resources.push(resource.clone());
                self.store
                    .replace_resources(resources)
                    .map_err(|err| self.notified(CommandKind::CreateResource, name, err))?;
                Ok(resource)
            }
            Err(err) => {
                self.notify(CommandKind::CreateResource, name, &err);
                Err(err.into())
            }
        }
    }

    /// Creates a process and attaches its initial allocations.
    ///
    /// The allocations are issued only after the create acknowledgement is
    /// observed; among themselves they run concurrently, and each one
    /// commits or fails independently of its siblings.
    pub async fn spawn_process(
        &self,
        name: &str,
        resource_intensity: ResourceIntensity,
        allocations: Vec<(ResourceId, u64)>,
    ) -> Result<ProcessId, CoordinatorError> {
        let record = match self
            .call(
                CommandKind::CreateProcess,
                self.gateway
                    .create_process(name.to_string(), resource_intensity),
            )
            .await
        {
            Ok(record) => record,
            Err(err) => {
                self.notify(CommandKind::CreateProcess, name, &err);
                return Err(err.into());
            }
        };

        // Optimistic: show the process before its slots exist. Slot ids are
        // engine-assigned, so slots arrive with the next snapshot.
        let process = Process::new(record.id.clone(), record.name, record.resource_intensity);
        let mut processes = self.store.processes();
        processes.push(process);
        if let Err(err) = self.store.replace_processes(processes) {
            self.notify(CommandKind::CreateProcess, name, &err);
        }

        let mut pending = JoinSet::new();
        for (resource_id, amount) in allocations {
            if amount == 0 {
                let err = ValidationError::ZeroAmount {
                    action: "allocate_resource_to_process",
                };
                self.notify(CommandKind::AllocateResource, resource_id.as_str(), &err);
                continue;
            }
            let gateway = Arc::clone(&self.gateway);
            let process_id = record.id.clone();
            let command_timeout = self.config.command_timeout;
            pending.spawn(async move {
                let result = match timeout(
                    command_timeout,
                    gateway.allocate_resource(process_id, resource_id.clone(), amount),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(GatewayError::timeout(
                        CommandKind::AllocateResource,
                        command_timeout,
                    )),
                };
                (resource_id, result)
            });
        }

        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((resource_id, Err(err))) => {
                    self.notify(CommandKind::AllocateResource, resource_id.as_str(), &err);
                }
                Err(err) => warn!(error = %err, "allocation task failed to join"),
            }
        }

        Ok(record.id)
    }

    /// Removes a process, dropping it from the local collection up front.
    ///
    /// The local removal happens regardless of acknowledgement timing; a
    /// rejection is surfaced and the next snapshot restores the truth.
    pub async fn remove_process(&self, process_id: &ProcessId) -> Result<(), CoordinatorError> {
        let mut processes = self.store.processes();
        processes.retain(|process| &process.id != process_id);
        if let Err(err) = self.store.replace_processes(processes) {
            self.notify(CommandKind::RemoveProcess, process_id.as_str(), &err);
        }

        match self
            .call(
                CommandKind::RemoveProcess,
                self.gateway.remove_process(process_id.clone()),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                self.notify(CommandKind::RemoveProcess, process_id.as_str(), &err);
                Err(err.into())
            }
        }
    }

    /// Sets the simulation speed.
    ///
    /// The store updates immediately; propagation to the engine is
    /// fire-and-forget and never blocks the caller.
    pub fn set_speed(&self, speed: u64) {
        self.store.set_speed(speed);

        let gateway = Arc::clone(&self.gateway);
        let notices = self.notices.clone();
        let command_timeout = self.config.command_timeout;
        tokio::spawn(async move {
            let result = match timeout(command_timeout, gateway.set_simulation_speed(speed)).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::timeout(
                    CommandKind::SetSimulationSpeed,
                    command_timeout,
                )),
            };
            if let Err(err) = result {
                warn!(speed, error = %err, "speed change not acknowledged");
                let _ = notices.send(OperatorNotice {
                    action: CommandKind::SetSimulationSpeed,
                    target: format!("speed {speed}"),
                    reason: err.to_string(),
                });
            }
        });
    }

    /// Starts or stops the simulation.
    pub async fn set_state(&self, state: SimulationRunState) -> Result<(), CoordinatorError> {
        self.store.set_state(state);
        match self
            .call(
                CommandKind::SetSimulationState,
                self.gateway.set_simulation_state(state),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                self.notify(CommandKind::SetSimulationState, &state.to_string(), &err);
                Err(err.into())
            }
        }
    }

    async fn event_loop(&self, mut events: broadcast::Receiver<EngineEvent>) {
        loop {
            match events.recv().await {
                Ok(EngineEvent::ProcessSnapshot(processes)) => {
                    debug!(count = processes.len(), "process snapshot received");
                    if let Err(err) = self.store.replace_processes(processes) {
                        self.notify(CommandKind::FetchProcesses, "processes", &err);
                    }
                }
                Ok(EngineEvent::UnsafeState(ids)) => {
                    warn!(implicated = ids.len(), "engine reported unsafe state");
                    self.mitigation.on_unsafe_state(ids).await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Snapshots are full replacements, so skipping stale
                    // ones is safe; the next delivery catches up.
                    warn!(missed, "event subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("engine event stream closed");
                    break;
                }
            }
        }
    }

    async fn call<T>(
        &self,
        command: CommandKind,
        operation: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        match timeout(self.config.command_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::timeout(command, self.config.command_timeout)),
        }
    }

    fn notify(&self, action: CommandKind, target: &str, reason: &impl std::fmt::Display) {
        let notice = OperatorNotice {
            action,
            target: target.to_string(),
            reason: reason.to_string(),
        };
        warn!(%notice, "operation failed");
        let _ = self.notices.send(notice);
    }

    fn notified(
        &self,
        action: CommandKind,
        target: &str,
        err: ValidationError,
    ) -> CoordinatorError {
        self.notify(action, target, &err);
        err.into()
    }
}
