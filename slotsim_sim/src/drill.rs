//! Scripted end-to-end drills.
//!
//! A drill wires a real coordinator to a seeded [`SimEngine`], plays a
//! scenario through the public operator surface, and reports whether the
//! session behaved. Reports serialize to JSON so a failing seed can be
//! rerun exactly.

use clap::ValueEnum;
use serde::Serialize;
use slotsim_core::{
    CoordinatorConfig, MitigationDecision, MitigationState, OperatorNotice, SyncCoordinator,
};
use slotsim_gateway::{ProcessId, ResourceIntensity, SimulationRunState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::info;

use crate::engine::{SimEngine, StepOutcome};

/// How long a drill waits for event propagation before calling it a hang.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DrillId {
    /// Safe allocations only; every tick must stay safe
    Steady,

    /// Provoke an unsafe state, then recover by removing a culprit
    UnsafeRecovery,
}

/// Outcome of one drill run.
#[derive(Debug, Serialize)]
pub struct DrillReport {
    pub drill: DrillId,
    pub seed: u64,
    pub ticks: u64,
    pub resources: usize,
    pub processes: usize,
    pub notices: usize,
    pub passed: bool,
    pub failure: Option<String>,
}

/// Runs drills against a fresh engine per run.
pub struct DrillRunner {
    seed: u64,
    ticks: u64,
}

impl DrillRunner {
    pub fn new(seed: u64, ticks: u64) -> Self {
        Self { seed, ticks }
    }

    pub async fn run(&self, drill: DrillId) -> DrillReport {
        info!(?drill, seed = self.seed, ticks = self.ticks, "drill starting");
        let engine = SimEngine::shared(self.seed);
        let (coordinator, notices) =
            SyncCoordinator::new(engine.clone(), CoordinatorConfig::default());
        coordinator.bootstrap().await;

        let outcome = match drill {
            DrillId::Steady => self.steady(&engine, &coordinator).await,
            DrillId::UnsafeRecovery => self.unsafe_recovery(&engine, &coordinator).await,
        };

        self.report(drill, &engine, &coordinator, notices, outcome)
    }

    /// Creates two resources and three processes whose combined demand fits,
    /// then ticks the clock; any outcome other than `Safe` fails the drill.
    async fn steady(
        &self,
        engine: &Arc<SimEngine>,
        coordinator: &Arc<SyncCoordinator>,
    ) -> Result<(), String> {
        let ram = coordinator
            .create_resource("RAM", 500)
            .await
            .map_err(|err| err.to_string())?;
        let cpu = coordinator
            .create_resource("CPU", 16)
            .await
            .map_err(|err| err.to_string())?;

        let workloads = [
            ("chrome.exe", ResourceIntensity::High, 200, 4),
            ("vim.exe", ResourceIntensity::Low, 50, 1),
            ("cc.exe", ResourceIntensity::Medium, 150, 6),
        ];
        for (name, intensity, ram_amount, cpu_amount) in workloads {
            coordinator
                .spawn_process(
                    name,
                    intensity,
                    vec![(ram.id.clone(), ram_amount), (cpu.id.clone(), cpu_amount)],
                )
                .await
                .map_err(|err| err.to_string())?;
        }

        for tick in 0..self.ticks {
            match engine.step() {
                StepOutcome::Safe => {}
                other => return Err(format!("tick {tick}: expected safe, got {other:?}")),
            }
            sleep(Duration::from_millis(1)).await;
        }

        // Converged when the last authoritative snapshot has been applied.
        self.settle(coordinator, |store| store.processes() == engine.processes())
            .await
            .map_err(|_| "store never converged with the engine".to_string())?;
        Ok(())
    }

    /// One overcommitted process drags the session unsafe; removing it as a
    /// mitigation candidate must make the next tick safe again.
    async fn unsafe_recovery(
        &self,
        engine: &Arc<SimEngine>,
        coordinator: &Arc<SyncCoordinator>,
    ) -> Result<(), String> {
        let ram = coordinator
            .create_resource("RAM", 10)
            .await
            .map_err(|err| err.to_string())?;

        // Demands 11 of a 10-pool: holds 10 and can never finish.
        let hog = coordinator
            .spawn_process(
                "hog.exe",
                ResourceIntensity::Extreme,
                vec![(ram.id.clone(), 5), (ram.id.clone(), 6)],
            )
            .await
            .map_err(|err| err.to_string())?;
        // Fits on its own, but is starved while the hog holds the pool.
        coordinator
            .spawn_process(
                "vim.exe",
                ResourceIntensity::Low,
                vec![(ram.id.clone(), 5), (ram.id.clone(), 4)],
            )
            .await
            .map_err(|err| err.to_string())?;

        let culprits = match engine.step() {
            StepOutcome::Unsafe(culprits) => culprits,
            other => return Err(format!("expected unsafe tick, got {other:?}")),
        };
        if culprits != vec![hog.clone()] {
            return Err(format!("expected culprit {hog}, got {culprits:?}"));
        }

        let mitigation = coordinator.mitigation();
        self.settle(coordinator, |_| {
            mitigation.state() == MitigationState::UnsafeDetected
        })
        .await
        .map_err(|_| "mitigation never engaged".to_string())?;

        let store = coordinator.store();
        if store.control().speed != 0 || store.control().state != SimulationRunState::Stopped {
            return Err("mitigation did not force a stop".to_string());
        }
        let candidates: Vec<ProcessId> = store
            .mitigation_candidates()
            .into_iter()
            .map(|process| process.id)
            .collect();
        if candidates != vec![hog.clone()] {
            return Err(format!("expected candidate {hog}, got {candidates:?}"));
        }

        mitigation
            .resolve(MitigationDecision::RemoveCandidates(vec![hog]))
            .await;
        coordinator
            .set_state(SimulationRunState::Running)
            .await
            .map_err(|err| err.to_string())?;

        match engine.step() {
            StepOutcome::Safe => {}
            other => return Err(format!("expected safe tick after recovery, got {other:?}")),
        }
        // The survivor's outstanding demand was topped up from the freed pool.
        let starved = engine
            .processes()
            .into_iter()
            .find(|process| process.name == "vim.exe")
            .ok_or_else(|| "survivor missing from engine".to_string())?;
        let outstanding: u64 = starved
            .resource_slots
            .iter()
            .map(|slot| slot.base_amount - slot.current_amount)
            .sum();
        if outstanding != 0 {
            return Err(format!("survivor still starved of {outstanding}"));
        }
        Ok(())
    }

    /// Polls the store until `done` holds or [`SETTLE_TIMEOUT`] elapses.
    async fn settle(
        &self,
        coordinator: &Arc<SyncCoordinator>,
        done: impl Fn(&slotsim_core::StateStore) -> bool,
    ) -> Result<(), tokio::time::error::Elapsed> {
        let store = coordinator.store();
        timeout(SETTLE_TIMEOUT, async {
            while !done(&store) {
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
    }

    fn report(
        &self,
        drill: DrillId,
        engine: &Arc<SimEngine>,
        coordinator: &Arc<SyncCoordinator>,
        mut notices: mpsc::UnboundedReceiver<OperatorNotice>,
        outcome: Result<(), String>,
    ) -> DrillReport {
        let mut notice_count = 0;
        while notices.try_recv().is_ok() {
            notice_count += 1;
        }
        let store = coordinator.store();
        DrillReport {
            drill,
            seed: engine.seed(),
            ticks: self.ticks,
            resources: store.resources().len(),
            processes: store.processes().len(),
            notices: notice_count,
            passed: outcome.is_ok(),
            failure: outcome.err(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_steady_drill_passes() {
        let report = DrillRunner::new(42, 20).run(DrillId::Steady).await;
        assert!(report.passed, "failure: {:?}", report.failure);
        assert_eq!(report.resources, 2);
        assert_eq!(report.processes, 3);
        assert_eq!(report.notices, 0);
    }

    #[tokio::test]
    async fn test_unsafe_recovery_drill_passes() {
        let report = DrillRunner::new(42, 20).run(DrillId::UnsafeRecovery).await;
        assert!(report.passed, "failure: {:?}", report.failure);
        assert_eq!(report.processes, 1);
    }

    #[tokio::test]
    async fn test_report_serializes_for_the_operator() {
        let report = DrillRunner::new(7, 5).run(DrillId::Steady).await;
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["drill"], "steady");
        assert_eq!(json["seed"], 7);
        assert_eq!(json["passed"], true);
    }
}
