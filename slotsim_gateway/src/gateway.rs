//! Command and push-event contract with the external simulation engine.

use crate::error::GatewayError;
use crate::model::{
    Process, ProcessId, Resource, ResourceId, ResourceIntensity, SimulationRunState,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// The command surface of the engine, for classification and fault scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    FetchResources,
    FetchProcesses,
    CreateResource,
    CreateProcess,
    AllocateResource,
    RemoveProcess,
    SetSimulationSpeed,
    SetSimulationState,
}

impl CommandKind {
    /// Wire/display name of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchResources => "fetch_resources",
            Self::FetchProcesses => "fetch_processes",
            Self::CreateResource => "create_resource",
            Self::CreateProcess => "create_process",
            Self::AllocateResource => "allocate_resource_to_process",
            Self::RemoveProcess => "remove_process",
            Self::SetSimulationSpeed => "set_simulation_speed",
            Self::SetSimulationState => "set_simulation_state",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Acknowledgement payload for a successful `create_process`.
///
/// Slots are always empty at creation time; they arrive through later
/// allocations and snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Engine-assigned identifier
    pub id: ProcessId,

    /// Display label, echoed back
    pub name: String,

    /// Intensity classification, echoed back
    pub resource_intensity: ResourceIntensity,
}

/// Asynchronous push notification from the engine.
///
/// Per stream, delivery is FIFO. Across the two streams there is no
/// relative ordering guarantee.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Full replacement snapshot of the process collection. Last wins.
    ProcessSnapshot(Vec<Process>),

    /// The engine detected an unsafe state; payload names the implicated
    /// processes.
    UnsafeState(Vec<ProcessId>),
}

/// Request/response boundary to the external simulation engine.
///
/// Every command resolves with either a typed success payload or a
/// [`GatewayError`]; a call never hangs forever from the caller's point of
/// view only if the caller bounds the wait (the contract itself offers no
/// cancellation).
///
/// # Implementations
///
/// - **Production**: IPC bridge to the real engine process
/// - **Simulation**: `slotsim_sim::SimEngine`, channel-backed and seeded
#[async_trait]
pub trait EngineGateway: Send + Sync + 'static {
    /// Fetches the full resource collection, in engine order.
    async fn fetch_resources(&self) -> Result<Vec<Resource>, GatewayError>;

    /// Fetches the full process collection, in engine order.
    async fn fetch_processes(&self) -> Result<Vec<Process>, GatewayError>;

    /// Creates a resource; the engine assigns the id.
    async fn create_resource(
        &self,
        name: String,
        total_amount: u64,
    ) -> Result<Resource, GatewayError>;

    /// Creates a process; the engine assigns the id.
    async fn create_process(
        &self,
        name: String,
        resource_intensity: ResourceIntensity,
    ) -> Result<ProcessRecord, GatewayError>;

    /// Attaches an allocation of `amount` of a resource to a process.
    ///
    /// Each allocation commits independently; a failure here says nothing
    /// about sibling allocations issued for the same process.
    async fn allocate_resource(
        &self,
        process_id: ProcessId,
        resource_id: ResourceId,
        amount: u64,
    ) -> Result<(), GatewayError>;

    /// Removes a process and releases everything it holds.
    async fn remove_process(&self, process_id: ProcessId) -> Result<(), GatewayError>;

    /// Sets the engine clock rate in ticks per second. 0 halts the clock.
    async fn set_simulation_speed(&self, speed: u64) -> Result<(), GatewayError>;

    /// Starts or stops the engine loop.
    async fn set_simulation_state(&self, state: SimulationRunState) -> Result<(), GatewayError>;

    /// Subscribes to the engine's push events.
    ///
    /// Dropping the receiver is the unsubscribe; nothing else to tear down.
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
