//! Domain model shared across the engine boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque engine-assigned identifier for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub String);

impl ResourceId {
    /// Wraps an engine-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Opaque engine-assigned identifier for a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub String);

impl ProcessId {
    /// Wraps an engine-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Ordinal classification of how aggressively a process consumes resources.
///
/// Ordering is meaningful: `None < Low < Medium < High < Extreme`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum ResourceIntensity {
    #[default]
    None,
    Low,
    Medium,
    High,
    Extreme,
}

impl ResourceIntensity {
    /// Returns the numeric level (0-4).
    pub fn level(&self) -> u8 {
        *self as u8
    }

    /// Maps a numeric level back to an intensity. Levels above 4 are invalid.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::None),
            1 => Some(Self::Low),
            2 => Some(Self::Medium),
            3 => Some(Self::High),
            4 => Some(Self::Extreme),
            _ => None,
        }
    }
}

/// A finite, named capacity pool shared across processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Engine-assigned identifier
    pub id: ResourceId,

    /// Display label
    pub name: String,

    /// Capacity of the pool
    pub total_amount: u64,

    /// Remaining capacity, always <= `total_amount`
    pub free_amount: u64,
}

impl Resource {
    /// Creates a fresh resource with nothing allocated.
    pub fn new(id: ResourceId, name: impl Into<String>, total_amount: u64) -> Self {
        Self {
            id,
            name: name.into(),
            total_amount,
            free_amount: total_amount,
        }
    }

    /// Amount currently held by processes.
    pub fn used_amount(&self) -> u64 {
        self.total_amount - self.free_amount
    }
}

/// An allocation of some amount of one resource, held by one process.
///
/// Slots live only inside a process's slot list and are owned exclusively
/// by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSlot {
    /// Engine-assigned slot identifier
    pub id: String,

    /// The resource this slot draws from
    pub resource_id: ResourceId,

    /// Amount originally requested
    pub base_amount: u64,

    /// Amount presently held, always <= `base_amount`
    pub current_amount: u64,
}

/// Lifecycle state of a process. Exactly one state is current at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProcessState {
    #[default]
    Ready,
    Blocked,
    Working,
}

/// A simulated unit of work with a lifecycle state and resource slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    /// Engine-assigned identifier, stable for the process's lifetime
    pub id: ProcessId,

    /// Display label
    pub name: String,

    /// How aggressively this process consumes resources
    pub resource_intensity: ResourceIntensity,

    /// Slots in insertion order
    pub resource_slots: Vec<ResourceSlot>,

    /// Current lifecycle state
    pub state: ProcessState,
}

impl Process {
    /// Creates a new ready process with no allocations.
    pub fn new(
        id: ProcessId,
        name: impl Into<String>,
        resource_intensity: ResourceIntensity,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            resource_intensity,
            resource_slots: Vec::new(),
            state: ProcessState::Ready,
        }
    }

    /// Amount of the given resource currently held across all slots.
    pub fn held_amount(&self, resource_id: &ResourceId) -> u64 {
        self.resource_slots
            .iter()
            .filter(|slot| &slot.resource_id == resource_id)
            .map(|slot| slot.current_amount)
            .sum()
    }
}

/// Whether the engine is advancing the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SimulationRunState {
    #[default]
    Stopped,
    Running,
}

impl std::fmt::Display for SimulationRunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Session-wide simulation control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationControl {
    /// Ticks per second; 0 halts the engine clock
    pub speed: u64,

    /// Whether the engine loop is running
    pub state: SimulationRunState,
}

impl Default for SimulationControl {
    fn default() -> Self {
        Self {
            speed: 1,
            state: SimulationRunState::Stopped,
        }
    }
}

/// A locally constructed or received entity violates a model invariant.
///
/// Fatal to the operation that produced it; never sent to the engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// free_amount > total_amount
    #[error("resource {name:?}: free amount {free} exceeds total {total}")]
    FreeExceedsTotal { name: String, free: u64, total: u64 },

    /// current_amount > base_amount on a slot
    #[error("process {process:?} slot {slot}: holds {current} over base {base}")]
    SlotOverdrawn {
        process: String,
        slot: String,
        current: u64,
        base: u64,
    },

    /// A command requires a strictly positive amount
    #[error("{action} requires a positive amount")]
    ZeroAmount { action: &'static str },
}

/// Checks the resource capacity invariant.
pub fn validate_resource(resource: &Resource) -> Result<(), ValidationError> {
    if resource.free_amount > resource.total_amount {
        return Err(ValidationError::FreeExceedsTotal {
            name: resource.name.clone(),
            free: resource.free_amount,
            total: resource.total_amount,
        });
    }
    Ok(())
}

/// Checks every slot invariant of a process.
pub fn validate_process(process: &Process) -> Result<(), ValidationError> {
    for slot in &process.resource_slots {
        if slot.current_amount > slot.base_amount {
            return Err(ValidationError::SlotOverdrawn {
                process: process.name.clone(),
                slot: slot.id.clone(),
                current: slot.current_amount,
                base: slot.base_amount,
            });
        }
    }
    Ok(())
}
