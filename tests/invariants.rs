//! Cross-cutting simulator invariants
//!
//! Runs full simulations per policy and checks the structural guarantees:
//! task accounting, dependency ordering, cost reconciliation, and VM state
//! hygiene. Billing arithmetic is additionally property-tested.

use proptest::prelude::*;
use test_case::test_case;

use cwsim::cost::{calculate_price_for_vm, estimate_price_for_vm_type};
use cwsim::{
    PredictModel, SchedulerKind, SimTime, Simulation, SimulationConfig, Vm, VmState, VmType,
    Workflow, WorkflowConstraint,
};

fn vm_type(name: &str, cpu: u32, price: f64) -> VmType {
    VmType {
        name: name.to_string(),
        cpu,
        memory_gb: 4 * cpu,
        price_per_period: price,
        billing_period_s: 3600,
        io_bandwidth_mbps: 100,
    }
}

fn catalog() -> Vec<VmType> {
    vec![vm_type("slow", 1, 1.0), vm_type("fast", 4, 4.0)]
}

fn config() -> SimulationConfig {
    SimulationConfig {
        predict_model: PredictModel::IoAndRuntime,
        vm_provision_delay_s: 0.0,
        ..SimulationConfig::default()
    }
}

/// Diamond DAG with uneven branches, the workhorse workload
fn diamond(constraint: WorkflowConstraint) -> Workflow {
    let mut wf = Workflow::new("diamond", "", constraint);
    wf.add_task("a", vec![], vec![], vec![], 600.0).unwrap();
    wf.add_task("b", vec![0], vec![], vec![], 1200.0).unwrap();
    wf.add_task("c", vec![0], vec![], vec![], 300.0).unwrap();
    wf.add_task("d", vec![1, 2], vec![], vec![], 600.0).unwrap();
    wf
}

fn constraint_for(kind: SchedulerKind) -> WorkflowConstraint {
    match kind {
        SchedulerKind::Epsm | SchedulerKind::Dyna => {
            WorkflowConstraint::Deadline(SimTime::from_secs(50_000.0))
        }
        SchedulerKind::Ebpsm | SchedulerKind::MinMin => WorkflowConstraint::Budget(100.0),
    }
}

#[test_case(SchedulerKind::Epsm; "epsm")]
#[test_case(SchedulerKind::Ebpsm; "ebpsm")]
#[test_case(SchedulerKind::Dyna; "dyna")]
#[test_case(SchedulerKind::MinMin; "minmin")]
fn test_run_invariants(kind: SchedulerKind) {
    let mut sim = Simulation::new(kind, catalog(), config()).unwrap();
    let wf = diamond(constraint_for(kind));
    let id = wf.id;
    sim.submit_workflow(wf, SimTime::ZERO);
    sim.run().unwrap();

    let collector = sim.collector();

    // Every task ran exactly once.
    assert_eq!(collector.workflows_total_tasks, 4);
    assert_eq!(collector.scheduled_tasks, 4);
    assert_eq!(collector.finished_tasks, 4);

    // Children never finish before their parents.
    let wf = sim.workflow(id).unwrap();
    assert!(wf.is_finished());
    for task in &wf.tasks {
        let finish = task.finish_time.unwrap();
        assert!(task.start_time.unwrap() <= finish);
        for &parent in &task.parents {
            assert!(wf.tasks[parent].finish_time.unwrap() <= finish);
        }
    }

    // Total cost reconciles with the per-VM lease costs, and every lease
    // ended.
    let vm_cost_sum: f64 = sim.vm_manager().vms().map(Vm::cost).sum();
    assert!((vm_cost_sum - collector.cost).abs() < 1e-9);
    assert_eq!(collector.removed_vms, collector.initialized_vms);
    for vm in sim.vm_manager().vms() {
        assert_eq!(vm.state, VmState::Shutdown);
        assert!(vm.reserved_by().is_none());
    }

    // Per-workflow VM bookkeeping is consistent with the manager.
    let stats = &collector.workflows[&id];
    assert_eq!(stats.initialized_vms.len(), collector.initialized_vms);
    assert_eq!(stats.used_vms, collector.used_vms);
}

// EPSM cost is monotone (statistically) in catalog price for a fixed
// workload and deadline.
#[test]
fn test_epsm_cost_monotone_in_catalog_price() {
    let run = |price_scale: f64| -> f64 {
        let catalog = vec![
            vm_type("slow", 1, 1.0 * price_scale),
            vm_type("fast", 4, 4.0 * price_scale),
        ];
        let mut sim = Simulation::new(SchedulerKind::Epsm, catalog, config()).unwrap();
        sim.submit_workflow(
            diamond(WorkflowConstraint::Deadline(SimTime::from_secs(50_000.0))),
            SimTime::ZERO,
        );
        sim.run().unwrap().cost
    };

    let cheap = run(1.0);
    let pricey = run(2.0);
    assert!(pricey >= cheap);
}

// The event clock never runs backwards across a full simulation: the global
// finish time bounds every per-workflow finish time.
#[test]
fn test_clock_bounds_workflow_times() {
    let mut sim = Simulation::new(SchedulerKind::Ebpsm, catalog(), config()).unwrap();
    for offset in [0.0, 1000.0, 2000.0] {
        sim.submit_workflow(
            diamond(WorkflowConstraint::Budget(100.0)),
            SimTime::from_secs(offset),
        );
    }
    sim.run().unwrap();

    let collector = sim.collector();
    let global_finish = collector.finish_time.unwrap();
    for stats in collector.workflows.values() {
        let start = stats.start_time.unwrap();
        let finish = stats.finish_time.unwrap();
        assert!(start <= finish);
        assert!(finish <= global_finish);
    }
}

proptest! {
    // Pricing a zero-length use is always free, anywhere in the lease.
    #[test]
    fn prop_zero_use_time_is_free(elapsed in 0.0f64..100_000.0, period in 1u64..10_000) {
        let mut ty = vm_type("t", 1, 1.0);
        ty.billing_period_s = period;
        let mut vm = Vm::new(ty);
        vm.provision(SimTime::ZERO).unwrap();
        let price = calculate_price_for_vm(SimTime::from_secs(elapsed), 0.0, &vm).unwrap();
        prop_assert_eq!(price, 0.0);
    }

    // Type estimates charge ceil(use/period) periods exactly.
    #[test]
    fn prop_estimate_is_ceiled_periods(use_time in 0.0f64..1_000_000.0,
                                       period in 1u64..100_000,
                                       price in 0.01f64..100.0) {
        let mut ty = vm_type("t", 1, price);
        ty.billing_period_s = period;
        let estimate = estimate_price_for_vm_type(use_time, &ty);
        let periods = (use_time / period as f64).ceil();
        if use_time > 0.0 {
            prop_assert_eq!(estimate, periods * price);
            // Never cheaper than the per-second rate, never more than one
            // extra period.
            prop_assert!(estimate >= (use_time / period as f64) * price);
            prop_assert!(estimate <= (use_time / period as f64 + 1.0) * price);
        } else {
            prop_assert_eq!(estimate, 0.0);
        }
    }

    // An exact multiple of the period never rounds up.
    #[test]
    fn prop_whole_periods_charge_exactly(k in 1u64..50, period in 1u64..10_000) {
        let mut ty = vm_type("t", 1, 1.0);
        ty.billing_period_s = period;
        let estimate = estimate_price_for_vm_type((k * period) as f64, &ty);
        prop_assert_eq!(estimate, k as f64);
    }

    // Incremental VM pricing never exceeds the fresh-lease estimate for the
    // same use time.
    #[test]
    fn prop_reuse_never_costs_more_than_fresh(elapsed in 0.0f64..50_000.0,
                                              use_time in 0.0f64..50_000.0) {
        let ty = vm_type("t", 1, 1.0);
        let mut vm = Vm::new(ty.clone());
        vm.provision(SimTime::ZERO).unwrap();
        let reuse = calculate_price_for_vm(SimTime::from_secs(elapsed), use_time, &vm).unwrap();
        let fresh = estimate_price_for_vm_type(use_time, &ty);
        prop_assert!(reuse <= fresh + 1e-9);
    }
}
