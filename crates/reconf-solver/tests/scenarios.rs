//! End-to-end solving scenarios: source model and constraints in, plan
//! out, checked along its timeline.

use std::collections::BTreeSet;

use reconf_model::{
    check_plan, Action, ActionKind, AttrValue, Model, NodeId, ReconfigurationPlan,
    SatConstraint, ShareableResource, VmId,
};
use reconf_solver::{ReconfigurationAlgorithm, SolveOutcome, SolverConfig, SolverError};

fn nodes(mo: &mut Model, online: usize, offline: usize) -> Vec<NodeId> {
    let mut out = Vec::new();
    for _ in 0..online {
        let n = mo.new_node();
        mo.mapping_mut().add_online_node(n);
        out.push(n);
    }
    for _ in 0..offline {
        let n = mo.new_node();
        mo.mapping_mut().add_offline_node(n);
        out.push(n);
    }
    out
}

fn solve(mo: &Model, cstrs: &[SatConstraint]) -> SolveOutcome {
    ReconfigurationAlgorithm::new(SolverConfig::default())
        .solve(mo, cstrs)
        .unwrap()
}

fn find<'a>(plan: &'a ReconfigurationPlan, pred: impl Fn(&ActionKind) -> bool) -> &'a Action {
    plan.actions()
        .iter()
        .find(|a| pred(&a.kind))
        .unwrap_or_else(|| panic!("missing action in {:?}", plan.actions()))
}

#[test]
fn vm_boots_once_its_node_is_online() {
    let mut mo = Model::new();
    let n = nodes(&mut mo, 0, 1);
    let vm = mo.new_vm();
    mo.mapping_mut().add_ready_vm(vm);

    let outcome = solve(&mo, &[SatConstraint::Running { vm }]);
    let plan = outcome.plan.unwrap();
    let boot_node = find(&plan, |k| matches!(k, ActionKind::BootNode { .. }));
    let boot_vm = find(&plan, |k| matches!(k, ActionKind::BootVm { .. }));
    assert!(boot_node.end <= boot_vm.start);
    assert_eq!(boot_vm.kind, ActionKind::BootVm { vm, node: n[0] });
    assert_eq!(plan.duration(), 2);
}

#[test]
fn node_shuts_down_after_its_vms_left() {
    let mut mo = Model::new();
    let n = nodes(&mut mo, 2, 0);
    let (v0, v1) = (mo.new_vm(), mo.new_vm());
    mo.mapping_mut().add_running_vm(v0, n[0]);
    mo.mapping_mut().add_running_vm(v1, n[0]);

    let plan = solve(&mo, &[SatConstraint::Offline { node: n[0] }]).plan.unwrap();
    let halt = find(&plan, |k| matches!(k, ActionKind::ShutdownNode { .. }));
    for a in plan.actions() {
        if let ActionKind::MigrateVm { to, .. } = a.kind {
            assert_eq!(to, n[1]);
            assert!(a.end <= halt.start, "{a} ends after {halt}");
        }
    }
    let dst = plan.result().unwrap();
    assert!(dst.mapping().is_offline(n[0]));
    assert_eq!(dst.mapping().running_vms_on(n[1]), BTreeSet::from([v0, v1]));
}

#[test]
fn swapping_vms_is_only_possible_when_discrete() {
    let mut mo = Model::new();
    let n = nodes(&mut mo, 2, 0);
    let (v0, v1) = (mo.new_vm(), mo.new_vm());
    mo.mapping_mut().add_running_vm(v0, n[0]);
    mo.mapping_mut().add_running_vm(v1, n[1]);
    let swap = |continuous| {
        vec![
            SatConstraint::fence([v0], [n[1]]),
            SatConstraint::fence([v1], [n[0]]),
            SatConstraint::spread([v0, v1], continuous),
        ]
    };

    let plan = solve(&mo, &swap(false)).plan.unwrap();
    let dst = plan.result().unwrap();
    assert_eq!(dst.mapping().vm_location(v0), Some(n[1]));
    assert_eq!(dst.mapping().vm_location(v1), Some(n[0]));

    let err = ReconfigurationAlgorithm::new(SolverConfig::default())
        .solve(&mo, &swap(true))
        .unwrap_err();
    assert!(matches!(err, SolverError::Injection { .. }));
}

#[test]
fn continuous_spread_uses_a_free_node() {
    let mut mo = Model::new();
    let n = nodes(&mut mo, 3, 0);
    let (v0, v1) = (mo.new_vm(), mo.new_vm());
    mo.mapping_mut().add_running_vm(v0, n[0]);
    mo.mapping_mut().add_running_vm(v1, n[1]);
    let cstrs = vec![
        SatConstraint::ban([v0], [n[0]]),
        SatConstraint::spread([v0, v1], true),
    ];
    let plan = solve(&mo, &cstrs).plan.unwrap();
    assert_eq!(plan.size(), 1);
    assert_eq!(
        plan.actions()[0].kind,
        ActionKind::MigrateVm { vm: v0, from: n[0], to: n[2] }
    );
    assert!(check_plan(&plan, &cstrs).is_ok());
}

#[test]
fn forging_needs_a_template() {
    let mut mo = Model::new();
    nodes(&mut mo, 1, 0);
    let vm = mo.new_vm();
    let cstrs = [SatConstraint::Ready { vm }];

    let err = ReconfigurationAlgorithm::new(SolverConfig::default())
        .solve(&mo, &cstrs)
        .unwrap_err();
    assert!(matches!(err, SolverError::MissingTemplate(v) if v == vm));

    mo.attributes_mut()
        .put(vm, "template", AttrValue::Str("small".to_string()));
    let plan = solve(&mo, &cstrs).plan.unwrap();
    assert_eq!(plan.actions(), &[Action::forge_vm(vm, 0, 1)]);
    assert!(plan.result().unwrap().mapping().is_ready(vm));
}

#[test]
fn state_changes_of_vms() {
    let mut mo = Model::new();
    let n = nodes(&mut mo, 1, 0);
    let (sleeping, running, doomed) = (mo.new_vm(), mo.new_vm(), mo.new_vm());
    mo.mapping_mut().add_sleeping_vm(sleeping, n[0]);
    mo.mapping_mut().add_running_vm(running, n[0]);
    mo.mapping_mut().add_running_vm(doomed, n[0]);
    let cstrs = vec![
        SatConstraint::Running { vm: sleeping },
        SatConstraint::Ready { vm: running },
        SatConstraint::Killed { vm: doomed },
    ];
    let plan = solve(&mo, &cstrs).plan.unwrap();
    assert_eq!(plan.size(), 3);
    find(&plan, |k| {
        *k == ActionKind::ResumeVm { vm: sleeping, from: n[0], to: n[0] }
    });
    find(&plan, |k| *k == ActionKind::ShutdownVm { vm: running, node: n[0] });
    find(&plan, |k| *k == ActionKind::KillVm { vm: doomed, node: Some(n[0]) });

    let dst = plan.result().unwrap();
    assert!(dst.mapping().is_running(sleeping));
    assert!(dst.mapping().is_ready(running));
    assert!(!dst.mapping().contains_vm(doomed));
}

#[test]
fn repair_mode_only_moves_misplaced_vms() {
    let mut mo = Model::new();
    let n = nodes(&mut mo, 3, 0);
    let vms: Vec<VmId> = (0..3).map(|_| mo.new_vm()).collect();
    for vm in &vms {
        mo.mapping_mut().add_running_vm(*vm, n[0]);
    }
    let config = SolverConfig {
        repair: true,
        optimize: true,
        ..SolverConfig::default()
    };
    let cstrs = vec![SatConstraint::ban([vms[0]], [n[0]])];
    let outcome = ReconfigurationAlgorithm::new(config).solve(&mo, &cstrs).unwrap();
    assert!(outcome.stats.optimal);
    assert_eq!(outcome.stats.cost, Some(1));
    let plan = outcome.plan.unwrap();
    assert_eq!(plan.size(), 1);
    assert_eq!(plan.actions()[0].vm(), Some(vms[0]));
}

#[test]
fn preserve_allocates_and_makes_room() {
    let mut mo = Model::new();
    let n = nodes(&mut mo, 2, 0);
    let (v0, v1) = (mo.new_vm(), mo.new_vm());
    mo.mapping_mut().add_running_vm(v0, n[0]);
    mo.mapping_mut().add_running_vm(v1, n[0]);
    mo.attach(ShareableResource::with_defaults("mem", 5, 2));
    let cstrs = vec![SatConstraint::Preserve {
        vms: BTreeSet::from([v0]),
        resource: "mem".to_string(),
        amount: 4,
    }];

    let plan = solve(&mo, &cstrs).plan.unwrap();
    let alloc = find(&plan, |k| matches!(k, ActionKind::Allocate { .. }));
    assert_eq!(
        alloc.kind,
        ActionKind::Allocate {
            vm: v0,
            node: n[0],
            resource: "mem".to_string(),
            amount: 4,
        }
    );
    find(&plan, |k| *k == ActionKind::MigrateVm { vm: v1, from: n[0], to: n[1] });
    let dst = plan.result().unwrap();
    assert_eq!(dst.view("mem").unwrap().consumption(v0), 4);
}

#[test]
fn continuous_max_online_boots_after_shutdown() {
    let mut mo = Model::new();
    let n = nodes(&mut mo, 1, 1);
    let cstrs = vec![
        SatConstraint::Offline { node: n[0] },
        SatConstraint::Online { node: n[1] },
        SatConstraint::max_online([n[0], n[1]], 1, true),
    ];
    let plan = solve(&mo, &cstrs).plan.unwrap();
    let halt = find(&plan, |k| matches!(k, ActionKind::ShutdownNode { .. }));
    let boot = find(&plan, |k| matches!(k, ActionKind::BootNode { .. }));
    assert!(halt.end <= boot.start);

    let mut overlapping = ReconfigurationPlan::new(mo.clone());
    overlapping.add(Action::boot_node(n[1], 0, 1));
    overlapping.add(Action::shutdown_node(n[0], 0, 1));
    assert!(check_plan(&overlapping, &cstrs).is_err());
}

#[test]
fn impossible_capacity_fails_injection() {
    let mut mo = Model::new();
    let n = nodes(&mut mo, 1, 0);
    let vm = mo.new_vm();
    mo.mapping_mut().add_running_vm(vm, n[0]);
    let cstrs = vec![SatConstraint::SingleRunningCapacity {
        nodes: BTreeSet::from([n[0]]),
        amount: 0,
    }];
    let err = ReconfigurationAlgorithm::new(SolverConfig::default())
        .solve(&mo, &cstrs)
        .unwrap_err();
    assert!(matches!(
        err,
        SolverError::Injection { constraint: SatConstraint::SingleRunningCapacity { .. }, .. }
    ));
}

#[test]
fn durations_come_from_the_configuration() {
    let mut mo = Model::new();
    let n = nodes(&mut mo, 2, 0);
    let vm = mo.new_vm();
    mo.mapping_mut().add_running_vm(vm, n[0]);
    let mut mem = ShareableResource::with_defaults("mem", 16, 4);
    mem.set_consumption(vm, 6);
    mo.attach(mem);
    let config = SolverConfig::from_toml(
        r#"
        [durations]
        migrate_vm = { linear = { view = "mem", factor = 1, offset = 2 } }
        "#,
    )
    .unwrap();
    let plan = ReconfigurationAlgorithm::new(config)
        .solve(&mo, &[SatConstraint::ban([vm], [n[0]])])
        .unwrap()
        .plan
        .unwrap();
    assert_eq!(plan.actions(), &[Action::migrate_vm(vm, n[0], n[1], 0, 8)]);
}
