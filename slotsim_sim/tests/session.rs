//! Full coordinator sessions against the seeded engine.

use slotsim_core::{
    CoordinatorConfig, MitigationDecision, MitigationState, OperatorNotice, SyncCoordinator,
};
use slotsim_gateway::{CommandKind, GatewayError, ResourceIntensity, SimulationRunState};
use slotsim_sim::{SimEngine, StepOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

async fn booted(
    seed: u64,
) -> (
    Arc<SimEngine>,
    Arc<SyncCoordinator>,
    mpsc::UnboundedReceiver<OperatorNotice>,
) {
    let engine = SimEngine::shared(seed);
    let (coordinator, notices) = SyncCoordinator::new(engine.clone(), CoordinatorConfig::default());
    coordinator.bootstrap().await;
    (engine, coordinator, notices)
}

/// Sleeps until the store mirrors the engine's process collection.
async fn converged(engine: &Arc<SimEngine>, coordinator: &Arc<SyncCoordinator>) {
    let store = coordinator.store();
    for _ in 0..1000 {
        if store.processes() == engine.processes() {
            return;
        }
        sleep(Duration::from_millis(1)).await;
    }
    panic!("store never converged with the engine");
}

fn drain(notices: &mut mpsc::UnboundedReceiver<OperatorNotice>) -> Vec<OperatorNotice> {
    let mut collected = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        collected.push(notice);
    }
    collected
}

#[tokio::test]
async fn test_session_lifecycle_converges_with_engine() {
    let (engine, coordinator, mut notices) = booted(11).await;

    let ram = coordinator.create_resource("RAM", 500).await.unwrap();
    let cpu = coordinator.create_resource("CPU", 16).await.unwrap();
    let chrome = coordinator
        .spawn_process(
            "chrome.exe",
            ResourceIntensity::High,
            vec![(ram.id.clone(), 200), (cpu.id.clone(), 4)],
        )
        .await
        .unwrap();
    coordinator
        .spawn_process("vim.exe", ResourceIntensity::Low, vec![(ram.id.clone(), 50)])
        .await
        .unwrap();

    converged(&engine, &coordinator).await;
    let store = coordinator.store();
    assert_eq!(store.resources().len(), 2);
    assert_eq!(store.processes().len(), 2);

    // Everything fit, so both requests were granted in full.
    let resources = engine.resources();
    assert_eq!(resources[0].free_amount, 250);
    assert_eq!(resources[1].free_amount, 12);
    assert_eq!(engine.step(), StepOutcome::Safe);

    // Removing the big process returns its capacity.
    coordinator.remove_process(&chrome).await.unwrap();
    converged(&engine, &coordinator).await;
    assert_eq!(engine.resources()[0].free_amount, 450);
    assert_eq!(store.processes().len(), 1);

    assert!(drain(&mut notices).is_empty());
}

#[tokio::test]
async fn test_speed_change_reaches_engine() {
    let (engine, coordinator, _notices) = booted(12).await;
    coordinator.set_speed(30);

    for _ in 0..1000 {
        if engine.speed() == 30 {
            return;
        }
        sleep(Duration::from_millis(1)).await;
    }
    panic!("speed change never reached the engine");
}

#[tokio::test]
async fn test_injected_rejection_surfaces_without_local_rollback() {
    let (engine, coordinator, mut notices) = booted(13).await;
    let pid = coordinator
        .spawn_process("vim.exe", ResourceIntensity::Low, Vec::new())
        .await
        .unwrap();
    converged(&engine, &coordinator).await;

    engine
        .faults()
        .reject_next(CommandKind::RemoveProcess, "engine busy");
    let err = coordinator.remove_process(&pid).await.unwrap_err();
    assert!(err.to_string().contains("engine busy"));

    // Optimistic removal stands locally; the engine still has the process.
    assert!(coordinator.store().processes().is_empty());
    assert_eq!(engine.processes().len(), 1);

    let notices = drain(&mut notices);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].action, CommandKind::RemoveProcess);
    assert_eq!(notices[0].target, pid.as_str());
}

#[tokio::test(start_paused = true)]
async fn test_injected_latency_beyond_bound_times_out() {
    let engine = SimEngine::shared(14);
    let (coordinator, mut notices) = SyncCoordinator::new(
        engine.clone(),
        CoordinatorConfig {
            command_timeout: Duration::from_millis(100),
        },
    );
    engine.faults().set_latency(Duration::from_secs(60));

    let result = coordinator.create_resource("RAM", 100).await;
    match result.unwrap_err() {
        slotsim_core::CoordinatorError::Gateway(GatewayError::Timeout { command, .. }) => {
            assert_eq!(command, CommandKind::CreateResource);
        }
        other => panic!("expected timeout, got {other}"),
    }
    assert_eq!(drain(&mut notices).len(), 1);
}

#[tokio::test]
async fn test_continue_unsafe_detects_again_on_next_tick() {
    let (engine, coordinator, _notices) = booted(15).await;
    let ram = coordinator.create_resource("RAM", 10).await.unwrap();
    let hog = coordinator
        .spawn_process(
            "hog.exe",
            ResourceIntensity::Extreme,
            vec![(ram.id.clone(), 5), (ram.id.clone(), 6)],
        )
        .await
        .unwrap();
    coordinator
        .spawn_process(
            "vim.exe",
            ResourceIntensity::Low,
            vec![(ram.id.clone(), 9)],
        )
        .await
        .unwrap();

    assert!(matches!(engine.step(), StepOutcome::Unsafe(_)));
    let mitigation = coordinator.mitigation();
    for _ in 0..1000 {
        if mitigation.state() == MitigationState::UnsafeDetected {
            break;
        }
        sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(mitigation.state(), MitigationState::UnsafeDetected);

    // Operator chooses to carry on; nothing is removed, so resuming the
    // clock detects the same unsafe state again.
    mitigation.resolve(MitigationDecision::ContinueUnsafe).await;
    assert_eq!(mitigation.state(), MitigationState::Idle);
    coordinator
        .set_state(SimulationRunState::Running)
        .await
        .unwrap();

    match engine.step() {
        StepOutcome::Unsafe(culprits) => {
            assert!(culprits.contains(&hog));
        }
        other => panic!("expected unsafe tick, got {other:?}"),
    }
}
