//! Event-loop throughput over a synthetic fan-out workload

use criterion::{criterion_group, criterion_main, Criterion};

use cwsim::{
    PredictModel, SchedulerKind, SimTime, Simulation, SimulationConfig, VmType, Workflow,
    WorkflowConstraint,
};

fn catalog() -> Vec<VmType> {
    let mk = |name: &str, cpu: u32, price: f64, io: u32| VmType {
        name: name.to_string(),
        cpu,
        memory_gb: 4 * cpu,
        price_per_period: price,
        billing_period_s: 3600,
        io_bandwidth_mbps: io,
    };
    vec![
        mk("small", 2, 0.1, 200),
        mk("medium", 4, 0.2, 400),
        mk("large", 8, 0.4, 800),
    ]
}

/// Root fanning out into `width` branches of length 2, joined at a sink
fn fan_out_workflow(width: usize, constraint: WorkflowConstraint) -> Workflow {
    let mut wf = Workflow::new("fanout", "bench workload", constraint);
    wf.add_task("root", vec![], vec![], vec![], 60.0).unwrap();
    let mut joins = Vec::with_capacity(width);
    for i in 0..width {
        let a = wf
            .add_task(format!("stage1_{}", i), vec![0], vec![], vec![], 120.0)
            .unwrap();
        let b = wf
            .add_task(format!("stage2_{}", i), vec![a], vec![], vec![], 90.0)
            .unwrap();
        joins.push(b);
    }
    wf.add_task("sink", joins, vec![], vec![], 30.0).unwrap();
    wf
}

fn bench_simulation(c: &mut Criterion) {
    let config = SimulationConfig {
        predict_model: PredictModel::IoAndRuntime,
        vm_provision_delay_s: 60.0,
        ..SimulationConfig::default()
    };

    c.bench_function("ebpsm_fanout_25", |b| {
        b.iter(|| {
            let mut sim =
                Simulation::new(SchedulerKind::Ebpsm, catalog(), config.clone()).unwrap();
            sim.submit_workflow(
                fan_out_workflow(25, WorkflowConstraint::Budget(500.0)),
                SimTime::ZERO,
            );
            sim.run().unwrap().cost
        })
    });

    c.bench_function("dyna_fanout_25", |b| {
        b.iter(|| {
            let mut sim = Simulation::new(SchedulerKind::Dyna, catalog(), config.clone()).unwrap();
            sim.submit_workflow(
                fan_out_workflow(25, WorkflowConstraint::Deadline(SimTime::from_secs(100_000.0))),
                SimTime::ZERO,
            );
            sim.run().unwrap().cost
        })
    });
}

criterion_group!(benches, bench_simulation);
criterion_main!(benches);
