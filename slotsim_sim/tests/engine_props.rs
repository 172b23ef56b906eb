//! Capacity conservation under arbitrary operation sequences.

use proptest::prelude::*;
use slotsim_gateway::{EngineGateway, ProcessId, ResourceId, ResourceIntensity};
use slotsim_sim::SimEngine;

#[derive(Debug, Clone)]
enum Op {
    CreateResource { total: u64 },
    CreateProcess,
    Allocate {
        process: usize,
        resource: usize,
        amount: u64,
    },
    Remove { process: usize },
    Step,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..200).prop_map(|total| Op::CreateResource { total }),
        Just(Op::CreateProcess),
        (0usize..8, 0usize..8, 1u64..100).prop_map(|(process, resource, amount)| Op::Allocate {
            process,
            resource,
            amount,
        }),
        (0usize..8).prop_map(|process| Op::Remove { process }),
        Just(Op::Step),
    ]
}

fn pick<T: Clone>(items: &[T], index: usize) -> Option<T> {
    if items.is_empty() {
        None
    } else {
        Some(items[index % items.len()].clone())
    }
}

/// Accounting identities that must hold after every operation:
/// free never exceeds total, used capacity equals the sum of slot
/// holdings, and no slot holds more than it asked for.
fn check_conservation(engine: &SimEngine) {
    let resources = engine.resources();
    let processes = engine.processes();

    for resource in &resources {
        assert!(
            resource.free_amount <= resource.total_amount,
            "resource {} free {} over total {}",
            resource.id,
            resource.free_amount,
            resource.total_amount
        );
        let held: u64 = processes
            .iter()
            .map(|process| process.held_amount(&resource.id))
            .sum();
        assert_eq!(
            resource.total_amount - resource.free_amount,
            held,
            "resource {} capacity leaked",
            resource.id
        );
    }

    for process in &processes {
        for slot in &process.resource_slots {
            assert!(
                slot.current_amount <= slot.base_amount,
                "process {} slot {} overdrawn",
                process.id,
                slot.id
            );
        }
    }
}

async fn apply(engine: &SimEngine, op: Op, resources: &mut Vec<ResourceId>, processes: &mut Vec<ProcessId>) {
    match op {
        Op::CreateResource { total } => {
            let resource = engine
                .create_resource("pool".to_string(), total)
                .await
                .unwrap();
            resources.push(resource.id);
        }
        Op::CreateProcess => {
            let record = engine
                .create_process("proc".to_string(), ResourceIntensity::Medium)
                .await
                .unwrap();
            processes.push(record.id);
        }
        Op::Allocate {
            process,
            resource,
            amount,
        } => {
            let (Some(process), Some(resource)) = (pick(processes, process), pick(resources, resource))
            else {
                return;
            };
            engine
                .allocate_resource(process, resource, amount)
                .await
                .unwrap();
        }
        Op::Remove { process } => {
            let Some(process) = pick(processes, process) else {
                return;
            };
            engine.remove_process(process.clone()).await.unwrap();
            processes.retain(|id| id != &process);
        }
        Op::Step => {
            engine.step();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_capacity_is_conserved(
        ops in prop::collection::vec(op_strategy(), 1..60),
        seed in 0u64..1000,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let engine = SimEngine::new(seed);
            engine
                .set_simulation_state(slotsim_gateway::SimulationRunState::Running)
                .await
                .unwrap();

            let mut resources = Vec::new();
            let mut processes = Vec::new();
            for op in ops {
                apply(&engine, op, &mut resources, &mut processes).await;
                check_conservation(&engine);
            }
        });
    }

    #[test]
    fn prop_same_seed_same_ids(seed in 0u64..1000) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let a = SimEngine::new(seed);
            let b = SimEngine::new(seed);
            for _ in 0..3 {
                let ra = a.create_resource("pool".to_string(), 10).await.unwrap();
                let rb = b.create_resource("pool".to_string(), 10).await.unwrap();
                prop_assert_eq!(ra.id, rb.id);
            }
            Ok(())
        }).unwrap();
    }
}
