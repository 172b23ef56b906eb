//! Slotsim Synchronization Core
//!
//! The core keeps a local view of an externally simulated process/resource
//! world consistent with the engine that owns it, and walks an operator
//! through recovery when the engine flags an unsafe (deadlock-risk) state.
//!
//! # Architecture
//!
//! ```text
//! operator intents ──► SyncCoordinator ──► EngineGateway ──► engine
//!                            │
//!        push events ────────┤
//!   (snapshots, unsafe) ─► MitigationWorkflow
//!                            │
//!                            ▼
//!                        StateStore ──► read-only UI projection
//! ```
//!
//! The engine is authoritative: every write to the [`StateStore`] replaces a
//! whole collection, and a later snapshot from the engine overwrites any
//! optimistic local change that did not stick.

mod coordinator;
mod mitigation;
mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{CoordinatorConfig, CoordinatorError, OperatorNotice, SyncCoordinator};
pub use mitigation::{MitigationDecision, MitigationState, MitigationWorkflow};
pub use store::StateStore;
