//! Slotsim Deterministic Simulation Harness
//!
//! An in-process stand-in for the external simulation engine, seeded so
//! that any failing run is reproducible from its seed number, plus drill
//! scenarios that exercise the full coordinator against it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      DrillRunner                     │
//! │   ┌────────────────┐         ┌────────────────────┐  │
//! │   │ SyncCoordinator│◄───────►│     SimEngine      │  │
//! │   │ (slotsim_core) │  calls  │ (seeded, in-proc)  │  │
//! │   └────────────────┘  events └────────────────────┘  │
//! │            │                          │              │
//! │            ▼                          ▼              │
//! │       StateStore                 FaultPlan           │
//! └──────────────────────────────────────────────────────┘
//! ```

mod drill;
mod engine;
mod faults;

pub use drill::{DrillId, DrillReport, DrillRunner};
pub use engine::{SimEngine, StepOutcome};
pub use faults::FaultPlan;
