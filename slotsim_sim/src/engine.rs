//! Seeded in-process simulation engine.
//!
//! Implements the full gateway contract against in-memory collections so
//! drills and tests can run without the real engine. All randomness (id
//! assignment) flows from one seeded generator, so a run is reproducible
//! from its seed.
//!
//! # Allocation model
//!
//! An allocation request records its full `base_amount` but is granted only
//! what the resource has free. A process with outstanding demand (base
//! minus current, summed over its slots) is `Blocked`; each safe step tops
//! outstanding slots up from whatever has become free. Unsafe states arise
//! exactly when outstanding demand can no longer be met in any order.

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use slotsim_gateway::{
    CommandKind, EngineEvent, EngineGateway, GatewayError, Process, ProcessId, ProcessRecord,
    ProcessState, Resource, ResourceId, ResourceIntensity, ResourceSlot, SimulationRunState,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::faults::FaultPlan;

const ID_LEN: usize = 7;
const DEFAULT_SPEED: u64 = 60;

/// What one engine tick observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Stopped or speed 0; the clock did not advance
    Idle,

    /// Clock advanced and every process can still finish in some order
    Safe,

    /// Unsafe state detected; payload names the irreducible processes
    Unsafe(Vec<ProcessId>),
}

struct EngineState {
    resources: Vec<Resource>,
    processes: Vec<Process>,
    speed: u64,
    last_speed: u64,
    running: bool,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            resources: Vec::new(),
            processes: Vec::new(),
            speed: DEFAULT_SPEED,
            last_speed: DEFAULT_SPEED,
            running: false,
        }
    }
}

/// Deterministic engine. One instance per drill or test.
pub struct SimEngine {
    state: Mutex<EngineState>,
    faults: FaultPlan,
    ids: Mutex<ChaCha8Rng>,
    events: broadcast::Sender<EngineEvent>,
    seed: u64,
}

impl SimEngine {
    pub fn new(seed: u64) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::default(),
            faults: FaultPlan::new(),
            ids: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            events,
            seed,
        }
    }

    /// Shared handle, as gateway consumers expect.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// The fault script for this engine.
    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Current clock rate.
    pub fn speed(&self) -> u64 {
        self.state.lock().unwrap().speed
    }

    /// Whether the engine loop is running.
    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    /// Snapshot of the resource collection.
    pub fn resources(&self) -> Vec<Resource> {
        self.state.lock().unwrap().resources.clone()
    }

    /// Snapshot of the process collection.
    pub fn processes(&self) -> Vec<Process> {
        self.state.lock().unwrap().processes.clone()
    }

    /// Advances the engine by one tick.
    ///
    /// A safe tick first tops up outstanding slots from free capacity, then
    /// verifies that the remaining demand is still satisfiable. Detecting an
    /// unsafe state stops the clock (speed stashed, then zeroed) and emits
    /// an [`EngineEvent::UnsafeState`] naming the irreducible processes.
    pub fn step(&self) -> StepOutcome {
        let mut state = self.state.lock().unwrap();
        if !state.running || state.speed == 0 {
            return StepOutcome::Idle;
        }

        let inner = &mut *state;
        let granted = top_up_allocations(&mut inner.resources, &mut inner.processes);
        refresh_process_states(&mut inner.processes, inner.running);

        let culprits = unsafe_culprits(&inner.resources, &inner.processes);
        if !culprits.is_empty() {
            warn!(culprits = culprits.len(), "unsafe state detected, halting clock");
            state.last_speed = state.speed;
            state.speed = 0;
            drop(state);
            self.emit_snapshot();
            let _ = self.events.send(EngineEvent::UnsafeState(culprits.clone()));
            return StepOutcome::Unsafe(culprits);
        }

        drop(state);
        if granted {
            self.emit_snapshot();
        }
        StepOutcome::Safe
    }

    async fn gate(&self, command: CommandKind) -> Result<(), GatewayError> {
        if let Some(latency) = self.faults.latency() {
            tokio::time::sleep(latency).await;
        }
        if let Some(reason) = self.faults.take_rejection(command) {
            debug!(%command, %reason, "injected rejection");
            return Err(GatewayError::rejected(command, reason));
        }
        Ok(())
    }

    fn fresh_id(&self, prefix: char) -> String {
        let mut rng = self.ids.lock().unwrap();
        let suffix: String = (&mut *rng)
            .sample_iter(&Alphanumeric)
            .take(ID_LEN)
            .map(char::from)
            .collect();
        format!("{prefix}{suffix}")
    }

    fn emit_snapshot(&self) {
        let processes = self.state.lock().unwrap().processes.clone();
        let _ = self.events.send(EngineEvent::ProcessSnapshot(processes));
    }
}

/// Sum of unmet demand per resource for one process.
fn outstanding_demand(process: &Process) -> HashMap<ResourceId, u64> {
    let mut demand: HashMap<ResourceId, u64> = HashMap::new();
    for slot in &process.resource_slots {
        let unmet = slot.base_amount - slot.current_amount;
        if unmet > 0 {
            *demand.entry(slot.resource_id.clone()).or_default() += unmet;
        }
    }
    demand
}

/// Grants free capacity to outstanding slots, in collection order.
fn top_up_allocations(resources: &mut [Resource], processes: &mut [Process]) -> bool {
    let mut granted = false;
    for process in processes.iter_mut() {
        for slot in process.resource_slots.iter_mut() {
            let unmet = slot.base_amount - slot.current_amount;
            if unmet == 0 {
                continue;
            }
            let Some(resource) = resources.iter_mut().find(|r| r.id == slot.resource_id) else {
                continue;
            };
            let grant = unmet.min(resource.free_amount);
            if grant > 0 {
                resource.free_amount -= grant;
                slot.current_amount += grant;
                granted = true;
            }
        }
    }
    granted
}

/// Recomputes each process's lifecycle state from its slots.
fn refresh_process_states(processes: &mut [Process], running: bool) {
    for process in processes.iter_mut() {
        let blocked = process
            .resource_slots
            .iter()
            .any(|slot| slot.current_amount < slot.base_amount);
        process.state = if blocked {
            ProcessState::Blocked
        } else if running && !process.resource_slots.is_empty() {
            ProcessState::Working
        } else {
            ProcessState::Ready
        };
    }
}

/// Whether every process in the subset can run to completion in some order.
///
/// Classic reduction: a process whose outstanding demand fits in the
/// available pool is assumed to finish and return everything it holds. The
/// available pool starts at total capacity minus what subset members hold.
fn is_reducible(resources: &[Resource], subset: &[&Process]) -> bool {
    let mut available: HashMap<ResourceId, u64> = resources
        .iter()
        .map(|resource| (resource.id.clone(), resource.total_amount))
        .collect();
    for process in subset {
        for slot in &process.resource_slots {
            if let Some(free) = available.get_mut(&slot.resource_id) {
                *free = free.saturating_sub(slot.current_amount);
            }
        }
    }

    let mut remaining: Vec<&Process> = subset.to_vec();
    loop {
        let Some(position) = remaining.iter().position(|process| {
            outstanding_demand(process)
                .iter()
                .all(|(resource, unmet)| available.get(resource).copied().unwrap_or(0) >= *unmet)
        }) else {
            break;
        };
        let finished = remaining.swap_remove(position);
        for slot in &finished.resource_slots {
            if let Some(free) = available.get_mut(&slot.resource_id) {
                *free += slot.current_amount;
            }
        }
    }
    remaining.is_empty()
}

/// Names the processes an unsafe state cannot do without.
///
/// Empty when the collection is safe. Otherwise processes are re-admitted
/// one by one in collection order; any process whose admission breaks
/// reducibility of the admitted set is a culprit.
fn unsafe_culprits(resources: &[Resource], processes: &[Process]) -> Vec<ProcessId> {
    let all: Vec<&Process> = processes.iter().collect();
    if is_reducible(resources, &all) {
        return Vec::new();
    }

    let mut admitted: Vec<&Process> = Vec::new();
    let mut culprits = Vec::new();
    for process in processes {
        let mut trial = admitted.clone();
        trial.push(process);
        if is_reducible(resources, &trial) {
            admitted = trial;
        } else {
            culprits.push(process.id.clone());
        }
    }
    culprits
}

#[async_trait]
impl EngineGateway for SimEngine {
    async fn fetch_resources(&self) -> Result<Vec<Resource>, GatewayError> {
        self.gate(CommandKind::FetchResources).await?;
        Ok(self.resources())
    }

    async fn fetch_processes(&self) -> Result<Vec<Process>, GatewayError> {
        self.gate(CommandKind::FetchProcesses).await?;
        Ok(self.processes())
    }

    async fn create_resource(
        &self,
        name: String,
        total_amount: u64,
    ) -> Result<Resource, GatewayError> {
        self.gate(CommandKind::CreateResource).await?;
        if total_amount == 0 {
            return Err(GatewayError::rejected(
                CommandKind::CreateResource,
                "total amount must be positive",
            ));
        }
        let resource = Resource::new(ResourceId::new(self.fresh_id('r')), name, total_amount);
        info!(id = %resource.id, name = %resource.name, total = total_amount, "resource created");
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
        self.gate(CommandKind::CreateProcess).await?;
        let process = Process::new(ProcessId::new(self.fresh_id('p')), name.clone(), resource_intensity);
        let record = ProcessRecord {
            id: process.id.clone(),
            name,
            resource_intensity,
        };
        info!(id = %record.id, name = %record.name, "process created");
        self.state.lock().unwrap().processes.push(process);
        self.emit_snapshot();
        Ok(record)
    }

    async fn allocate_resource(
        &self,
        process_id: ProcessId,
        resource_id: ResourceId,
        amount: u64,
    ) -> Result<(), GatewayError> {
        self.gate(CommandKind::AllocateResource).await?;
        if amount == 0 {
            return Err(GatewayError::rejected(
                CommandKind::AllocateResource,
                "amount must be positive",
            ));
        }

        let slot_id = self.fresh_id('s');
        {
            let mut state = self.state.lock().unwrap();
            let Some(resource) = state.resources.iter_mut().find(|r| r.id == resource_id) else {
                return Err(GatewayError::rejected(
                    CommandKind::AllocateResource,
                    format!("unknown resource {resource_id}"),
                ));
            };
            // Grant what is free now; the rest is outstanding demand the
            // tick loop tops up as capacity returns.
            let grant = amount.min(resource.free_amount);
            resource.free_amount -= grant;

            let running = state.running;
            let Some(position) = state
                .processes
                .iter()
                .position(|process| process.id == process_id)
            else {
                // Undo the debit; nothing took ownership of it.
                if let Some(resource) = state.resources.iter_mut().find(|r| r.id == resource_id) {
                    resource.free_amount += grant;
                }
                return Err(GatewayError::rejected(
                    CommandKind::AllocateResource,
                    format!("unknown process {process_id}"),
                ));
            };
            state.processes[position].resource_slots.push(ResourceSlot {
                id: slot_id,
                resource_id,
                base_amount: amount,
                current_amount: grant,
            });
            refresh_process_states(&mut state.processes, running);
        }
        self.emit_snapshot();
        Ok(())
    }

    async fn remove_process(&self, process_id: ProcessId) -> Result<(), GatewayError> {
        self.gate(CommandKind::RemoveProcess).await?;
        {
            let mut state = self.state.lock().unwrap();
            let Some(position) = state
                .processes
                .iter()
                .position(|process| process.id == process_id)
            else {
                return Err(GatewayError::rejected(
                    CommandKind::RemoveProcess,
                    format!("unknown process {process_id}"),
                ));
            };
            let removed = state.processes.remove(position);
            for slot in &removed.resource_slots {
                if let Some(resource) = state
                    .resources
                    .iter_mut()
                    .find(|r| r.id == slot.resource_id)
                {
                    resource.free_amount += slot.current_amount;
                }
            }
            info!(id = %removed.id, name = %removed.name, "process removed");
        }
        self.emit_snapshot();
        Ok(())
    }

    async fn set_simulation_speed(&self, speed: u64) -> Result<(), GatewayError> {
        self.gate(CommandKind::SetSimulationSpeed).await?;
        self.state.lock().unwrap().speed = speed;
        Ok(())
    }

    async fn set_simulation_state(&self, run_state: SimulationRunState) -> Result<(), GatewayError> {
        self.gate(CommandKind::SetSimulationState).await?;
        let mut state = self.state.lock().unwrap();
        match run_state {
            SimulationRunState::Running => {
                state.running = true;
                if state.speed == 0 {
                    state.speed = state.last_speed.max(1);
                }
            }
            SimulationRunState::Stopped => {
                state.running = false;
                if state.speed > 0 {
                    state.last_speed = state.speed;
                }
                state.speed = 0;
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
