//! Fault injection for the simulated engine.

use slotsim_gateway::CommandKind;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted faults applied to gateway commands.
///
/// Rejections are one-shot and consumed in script order per command;
/// latency applies to every command until cleared.
pub struct FaultPlan {
    rejections: Mutex<HashMap<CommandKind, VecDeque<String>>>,
    latency: Mutex<Option<Duration>>,
}

impl FaultPlan {
    /// Creates an empty plan (no faults).
    pub fn new() -> Self {
        Self {
            rejections: Mutex::new(HashMap::new()),
            latency: Mutex::new(None),
        }
    }

    /// Scripts the next call of `command` to be rejected.
    pub fn reject_next(&self, command: CommandKind, reason: impl Into<String>) {
        self.rejections
            .lock()
            .unwrap()
            .entry(command)
            .or_default()
            .push_back(reason.into());
    }

    /// Adds latency to every command.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// Removes injected latency.
    pub fn clear_latency(&self) {
        *self.latency.lock().unwrap() = None;
    }

    /// Consumes the next scripted rejection for `command`, if any.
    pub fn take_rejection(&self, command: CommandKind) -> Option<String> {
        self.rejections
            .lock()
            .unwrap()
            .get_mut(&command)
            .and_then(|queue| queue.pop_front())
    }

    /// Current injected latency.
    pub fn latency(&self) -> Option<Duration> {
        *self.latency.lock().unwrap()
    }
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self::new()
    }
}
