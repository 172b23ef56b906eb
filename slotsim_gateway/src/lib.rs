//! Slotsim Engine Gateway Boundary
//!
//! This crate defines the call boundary between the slotsim core and the
//! external simulation engine: the domain model the two sides exchange,
//! the [`EngineGateway`] command trait, and the push-event stream.
//!
//! # Core Concept: The Engine Is Authoritative
//!
//! Entities (processes, resources, slot ids) are assigned by the engine.
//! The local side issues commands and consumes snapshots; it never invents
//! identifiers and never patches collections element-by-element.
//!
//! # Example
//!
//! ```ignore
//! use slotsim_gateway::{EngineGateway, EngineEvent};
//!
//! async fn watch<G: EngineGateway>(gateway: &G) {
//!     let mut events = gateway.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             EngineEvent::ProcessSnapshot(processes) => { /* replace cache */ }
//!             EngineEvent::UnsafeState(ids) => { /* start mitigation */ }
//!         }
//!     }
//! }
//! ```

mod error;
mod gateway;
mod model;

pub use error::GatewayError;
pub use gateway::{CommandKind, EngineEvent, EngineGateway, ProcessRecord};
pub use model::{
    validate_process, validate_resource, Process, ProcessId, ProcessState, Resource, ResourceId,
    ResourceIntensity, ResourceSlot, SimulationControl, SimulationRunState, ValidationError,
};
