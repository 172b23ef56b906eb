//! Scripted engine gateway for coordinator tests.

use async_trait::async_trait;
use slotsim_gateway::{
    CommandKind, EngineEvent, EngineGateway, GatewayError, Process, ProcessId, ProcessRecord,
    Resource, ResourceId, ResourceIntensity, ResourceSlot, SimulationRunState,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

#[derive(Default)]
struct EngineState {
    resources: Vec<Resource>,
    processes: Vec<Process>,
}

/// Records every call and replays scripted responses.
///
/// Commands succeed against an in-memory world unless scripted to fail or
/// hang. Push events are injected through [`ScriptedGateway::push`].
pub(crate) struct ScriptedGateway {
    state: Mutex<EngineState>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<CommandKind, String>>,
    allocation_failures: Mutex<HashMap<String, String>>,
    hung: Mutex<Vec<CommandKind>>,
    next_id: AtomicU64,
    events: broadcast::Sender<EngineEvent>,
}

impl ScriptedGateway {
    pub(crate) fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::default(),
            calls: Mutex::default(),
            failures: Mutex::default(),
            allocation_failures: Mutex::default(),
            hung: Mutex::default(),
            next_id: AtomicU64::new(1),
            events,
        })
    }

    pub(crate) fn seed_resource(&self, id: &str, name: &str, total_amount: u64) {
        self.state
            .lock()
            .unwrap()
            .resources
            .push(Resource::new(ResourceId::from(id), name, total_amount));
    }

    pub(crate) fn seed_process(&self, id: &str, name: &str, intensity: ResourceIntensity) {
        self.state
            .lock()
            .unwrap()
            .processes
            .push(Process::new(ProcessId::from(id), name, intensity));
    }

    /// Scripts every future call of `command` to fail.
    pub(crate) fn fail(&self, command: CommandKind, reason: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(command, reason.to_string());
    }

    /// Scripts allocation failures for one resource only.
    pub(crate) fn fail_allocation(&self, resource_id: &str, reason: &str) {
        self.allocation_failures
            .lock()
            .unwrap()
            .insert(resource_id.to_string(), reason.to_string());
    }

    /// Scripts `command` to never resolve.
    pub(crate) fn hang(&self, command: CommandKind) {
        self.hung.lock().unwrap().push(command);
    }

    /// Injects a push event as the engine would.
    pub(crate) fn push(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    /// The call log, in issue order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Whether an allocation for the given process/resource pair committed.
    pub(crate) fn allocation_committed(&self, process_id: &ProcessId, resource_id: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .processes
            .iter()
            .find(|process| &process.id == process_id)
            .map(|process| process.held_amount(&ResourceId::from(resource_id)) > 0)
            .unwrap_or(false)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn gate(&self, command: CommandKind) -> Result<(), GatewayError> {
        if self.hung.lock().unwrap().contains(&command) {
            std::future::pending::<()>().await;
        }
        if let Some(reason) = self.failures.lock().unwrap().get(&command) {
            return Err(GatewayError::rejected(command, reason.clone()));
        }
        Ok(())
    }

    fn fresh_id(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl EngineGateway for ScriptedGateway {
    async fn fetch_resources(&self) -> Result<Vec<Resource>, GatewayError> {
        self.record("fetch_resources".to_string());
        self.gate(CommandKind::FetchResources).await?;
        Ok(self.state.lock().unwrap().resources.clone())
    }

    async fn fetch_processes(&self) -> Result<Vec<Process>, GatewayError> {
        self.record("fetch_processes".to_string());
        self.gate(CommandKind::FetchProcesses).await?;
        Ok(self.state.lock().unwrap().processes.clone())
    }

    async fn create_resource(
        &self,
        name: String,
        total_amount: u64,
    ) -> Result<Resource, GatewayError> {
        self.record(format!("create_resource {name}"));
        self.gate(CommandKind::CreateResource).await?;
        let resource = Resource::new(ResourceId::new(self.fresh_id("r")), name, total_amount);
        self.state
            .lock()
            .unwrap()
            .resources
            .push(resource.clone());
        Ok(resource)
    }

    async fn create_process(
        &self,
        name: String,
        resource_intensity: ResourceIntensity,
    ) -> Result<ProcessRecord, GatewayError> {
        self.record(format!("create_process {name}"));
        self.gate(CommandKind::CreateProcess).await?;
        let process = Process::new(
            ProcessId::new(self.fresh_id("p")),
            name.clone(),
            resource_intensity,
        );
        let record = ProcessRecord {
            id: process.id.clone(),
            name,
            resource_intensity,
        };
        self.state.lock().unwrap().processes.push(process);
        Ok(record)
    }

    async fn allocate_resource(
        &self,
        process_id: ProcessId,
        resource_id: ResourceId,
        amount: u64,
    ) -> Result<(), GatewayError> {
        self.record(format!("allocate {process_id} {resource_id} {amount}"));
        self.gate(CommandKind::AllocateResource).await?;
        if let Some(reason) = self
            .allocation_failures
            .lock()
            .unwrap()
            .get(resource_id.as_str())
        {
            return Err(GatewayError::rejected(
                CommandKind::AllocateResource,
                reason.clone(),
            ));
        }

        let slot_id = self.fresh_id("s");
        let mut state = self.state.lock().unwrap();
        if let Some(resource) = state.resources.iter_mut().find(|r| r.id == resource_id) {
            resource.free_amount = resource.free_amount.saturating_sub(amount);
        }
        match state
            .processes
            .iter_mut()
            .find(|process| process.id == process_id)
        {
            Some(process) => {
                process.resource_slots.push(ResourceSlot {
                    id: slot_id,
                    resource_id,
                    base_amount: amount,
                    current_amount: amount,
                });
                Ok(())
            }
            None => Err(GatewayError::rejected(
                CommandKind::AllocateResource,
                "process not found",
            )),
        }
    }

    async fn remove_process(&self, process_id: ProcessId) -> Result<(), GatewayError> {
        self.record(format!("remove_process {process_id}"));
        self.gate(CommandKind::RemoveProcess).await?;
        let mut state = self.state.lock().unwrap();
        state.processes.retain(|process| process.id != process_id);
        Ok(())
    }

    async fn set_simulation_speed(&self, speed: u64) -> Result<(), GatewayError> {
        self.record(format!("set_speed {speed}"));
        self.gate(CommandKind::SetSimulationSpeed).await
    }

    async fn set_simulation_state(&self, state: SimulationRunState) -> Result<(), GatewayError> {
        self.record(format!("set_state {state}"));
        self.gate(CommandKind::SetSimulationState).await
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
