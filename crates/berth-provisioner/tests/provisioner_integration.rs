//! Provisioner integration tests.
//!
//! Every scenario runs in-process: the in-memory engine, the capturing
//! executor, the in-process router and an in-memory state store. Nothing
//! touches the network or a real container engine.

mod common;

use std::time::Duration;

use berth_engine::{ContainerEngine, EngineOp};
use berth_exec::FakeExecutor;
use berth_provisioner::{ContainerStatus, ProvisionError};
use berth_router::Router;
use berth_scheduler::SchedulerError;

use common::*;

// ── Provision / Addr ───────────────────────────────────────────

#[tokio::test]
async fn provision_registers_backend_without_containers() {
    let h = harness();
    h.prov.provision(&app("myapp")).unwrap();

    assert!(h.router.has_backend("myapp"));
    assert!(h.containers("myapp").is_empty());
    assert_eq!(h.engine.container_count(), 0);
}

#[tokio::test]
async fn addr_resolves_through_router() {
    let h = harness();
    h.deployed("myapp", "v1").await;

    let addr = h.prov.addr(&app("myapp")).unwrap();
    assert_eq!(addr, h.router.addr("myapp").unwrap());
    assert_eq!(addr, "http://127.0.0.1:49153");
}

// ── Deploy ─────────────────────────────────────────────────────

#[tokio::test]
async fn deploy_starts_unit_runs_hooks_and_routes_it() {
    let executor = FakeExecutor::new().with_output("*", "hook ran\n");
    let h = harness_with_nodes(&[("node-1", NODE1)], executor);
    let output = h.deployed("myapp", "v1").await;

    let containers = h.containers("myapp");
    assert_eq!(containers.len(), 1);
    let c = &containers[0];
    assert_eq!(c.status, ContainerStatus::Started);
    assert_eq!(c.version, "v1");
    assert_eq!(c.kind, "python");
    assert_eq!(c.host, "node-1");
    assert_eq!(c.ip.as_deref(), Some("172.17.0.2"));
    assert_eq!(c.host_port, Some(49153));

    assert!(h.router.has_route("myapp", "http://127.0.0.1:49153"));
    assert!(h.engine.has_image(NODE1, "berth/myapp:v1"));

    let calls = h.executor.calls();
    let hooks: Vec<String> = calls.iter().map(|c| c.command_line()).collect();
    assert_eq!(hooks, vec!["/var/lib/berth/serialize", "/var/lib/berth/restart"]);
    assert!(calls.iter().all(|c| c.target == "172.17.0.2"));

    assert!(output.contains("Pulling berth/myapp:v1 on node-1"));
    assert!(output.contains("hook ran"));
    assert!(output.contains("Deployed myapp v1"));
}

#[tokio::test]
async fn redeploy_replaces_a_single_unit() {
    let h = harness();
    h.deployed("myapp", "v1").await;
    let old = h.containers("myapp").remove(0);

    let mut out = Vec::new();
    let units = h.prov.deploy(&app("myapp"), "v2", &mut out).await.unwrap();

    let containers = h.containers("myapp");
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].version, "v2");
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].name, containers[0].id);
    assert_ne!(containers[0].id, old.id);
    assert_eq!(h.engine.container_ids(NODE1), vec![containers[0].id.clone()]);
    assert_eq!(h.router.routes("myapp").unwrap(), vec!["http://127.0.0.1:49154"]);
}

#[tokio::test]
async fn redeploy_keeps_the_unit_count() {
    let h = harness();
    h.deployed("myapp", "v1").await;
    h.prov.add_units(&app("myapp"), 3).await.unwrap();
    let old = h.containers("myapp");
    let old_routes = h.router.routes("myapp").unwrap();
    h.executor.reset();

    let units = h.prov.deploy(&app("myapp"), "v2", &mut Vec::new()).await.unwrap();

    let containers = h.containers("myapp");
    assert_eq!(containers.len(), 4);
    assert!(containers.iter().all(|c| c.version == "v2"));
    assert!(containers.iter().all(|c| c.status == ContainerStatus::Started));
    assert!(containers.iter().all(|c| old.iter().all(|o| o.id != c.id)));

    let ids: Vec<String> = containers.iter().map(|c| c.id.clone()).collect();
    let unit_names: Vec<String> = units.iter().map(|u| u.name.clone()).collect();
    assert_eq!(unit_names, ids);
    assert_eq!(h.engine.container_ids(NODE1), ids);

    let routes = h.router.routes("myapp").unwrap();
    assert_eq!(routes.len(), 4);
    assert!(routes.iter().all(|r| !old_routes.contains(r)));
    // Both post-start hooks ran in each replacement.
    assert_eq!(h.executor.calls().len(), 8);
}

#[tokio::test]
async fn redeploy_failure_midway_keeps_every_previous_unit() {
    // Replacements start at 172.17.0.5; the second one fails its hooks.
    let executor = FakeExecutor::new().fail_on("172.17.0.6", "bundle install failed");
    let h = harness_with_nodes(&[("node-1", NODE1)], executor);
    h.deployed("myapp", "v1").await;
    h.prov.add_units(&app("myapp"), 2).await.unwrap();
    let old = h.containers("myapp");
    let old_routes = h.router.routes("myapp").unwrap();

    let err = h
        .prov
        .deploy(&app("myapp"), "v2", &mut Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Exec(_)));

    assert_eq!(h.containers("myapp"), old);
    assert_eq!(h.engine.container_count(), 3);
    assert_eq!(h.router.routes("myapp").unwrap(), old_routes);
}

#[tokio::test]
async fn deploy_hook_failure_rolls_back_the_new_unit() {
    let executor = FakeExecutor::new().failing("bundle install: permission denied");
    let h = harness_with_nodes(&[("node-1", NODE1)], executor);
    let myapp = app("myapp");
    h.prov.provision(&myapp).unwrap();

    let mut out = Vec::new();
    let err = h.prov.deploy(&myapp, "v1", &mut out).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Exec(_)));

    assert!(h.containers("myapp").is_empty());
    assert_eq!(h.engine.container_count(), 0);
    assert!(h.router.routes("myapp").unwrap().is_empty());
    assert!(String::from_utf8(out).unwrap().contains("permission denied"));
}

#[tokio::test]
async fn deploy_reports_rollback_that_could_not_finish() {
    let executor = FakeExecutor::new().failing("bundle install: permission denied");
    let h = harness_with_nodes(&[("node-1", NODE1)], executor);
    let myapp = app("myapp");
    h.prov.provision(&myapp).unwrap();
    h.engine.fail(EngineOp::Remove);

    let err = h.prov.deploy(&myapp, "v1", &mut Vec::new()).await.unwrap_err();
    match &err {
        ProvisionError::RollbackIncomplete { source, failures } => {
            assert!(matches!(**source, ProvisionError::Exec(_)));
            assert_eq!(failures.len(), 1);
            assert!(failures[0].starts_with("create_container: "));
        }
        other => panic!("expected an incomplete rollback, got {other:?}"),
    }
    assert!(h.containers("myapp").is_empty());
    assert_eq!(h.engine.container_count(), 1);

    // The labelled leftover goes with the app.
    h.engine.recover(EngineOp::Remove);
    h.prov.destroy(&myapp).await.unwrap();
    assert_eq!(h.engine.container_count(), 0);
}

#[tokio::test]
async fn deploy_start_failure_rolls_back_the_new_unit() {
    let h = harness();
    let myapp = app("myapp");
    h.prov.provision(&myapp).unwrap();
    h.engine.fail(EngineOp::Start);

    let err = h.prov.deploy(&myapp, "v1", &mut Vec::new()).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Engine(_)));
    assert!(h.containers("myapp").is_empty());
    assert_eq!(h.engine.container_count(), 0);
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn deploy_failure_keeps_previous_units() {
    let h = harness();
    h.deployed("myapp", "v1").await;
    let old = h.containers("myapp").remove(0);

    h.engine.fail(EngineOp::Start);
    h.prov.deploy(&app("myapp"), "v2", &mut Vec::new()).await.unwrap_err();

    assert_eq!(h.containers("myapp"), vec![old]);
    assert!(h.router.has_route("myapp", "http://127.0.0.1:49153"));
}

#[tokio::test]
async fn deploy_without_backend_rolls_back() {
    let h = harness();
    let err = h.prov.deploy(&app("ghost"), "v1", &mut Vec::new()).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Router(_)));
    assert!(h.containers("ghost").is_empty());
    assert_eq!(h.engine.container_count(), 0);
}

#[tokio::test]
async fn deploy_without_nodes_fails() {
    let h = harness_with_nodes(&[], FakeExecutor::new());
    let myapp = app("myapp");
    h.prov.provision(&myapp).unwrap();

    let err = h.prov.deploy(&myapp, "v1", &mut Vec::new()).await.unwrap_err();
    assert!(matches!(
        err,
        ProvisionError::Scheduler(SchedulerError::NoNodesAvailable)
    ));
    assert!(h.containers("myapp").is_empty());
}

#[tokio::test]
async fn deploy_removes_untracked_containers_of_the_app() {
    let h = harness();
    let orphan = h.engine.spawn_untracked(NODE1, "myapp", "berth/myapp:v0");
    let stranger = h.engine.spawn_untracked(NODE1, "otherapp", "berth/otherapp:v1");

    h.deployed("myapp", "v1").await;

    let ids = h.engine.container_ids(NODE1);
    assert!(!ids.contains(&orphan));
    assert!(ids.contains(&stranger));
    assert_eq!(ids.len(), 2);
}

#[tokio::test]
async fn failed_deploy_still_sweeps_orphans() {
    let h = harness();
    let myapp = app("myapp");
    h.prov.provision(&myapp).unwrap();
    let orphan = h.engine.spawn_untracked(NODE1, "myapp", "berth/myapp:v0");
    h.engine.fail(EngineOp::Start);

    h.prov.deploy(&myapp, "v1", &mut Vec::new()).await.unwrap_err();
    assert!(!h.engine.container_ids(NODE1).contains(&orphan));
}

// ── AddUnits ───────────────────────────────────────────────────

#[tokio::test]
async fn add_zero_units_is_rejected() {
    let h = harness();
    h.deployed("myapp", "v1").await;

    let err = h.prov.add_units(&app("myapp"), 0).await.unwrap_err();
    assert!(matches!(err, ProvisionError::InvalidArgument(_)));
    assert_eq!(err.to_string(), "Cannot add 0 units");
    assert_eq!(h.containers("myapp").len(), 1);
}

#[tokio::test]
async fn add_units_adds_exactly_n() {
    let h = harness();
    h.deployed("myapp", "v1").await;

    let mut expected = 1;
    for n in 1..=4 {
        let units = h.prov.add_units(&app("myapp"), n).await.unwrap();
        expected += n as usize;
        assert_eq!(units.len(), n as usize);
        assert!(units.iter().all(|u| u.status == ContainerStatus::Started));
        assert_eq!(h.containers("myapp").len(), expected);
    }
    assert_eq!(h.router.routes("myapp").unwrap().len(), expected);
}

#[tokio::test]
async fn add_units_before_first_deploy_then_after() {
    let h = harness();
    let myapp = app("myapp");
    h.prov.provision(&myapp).unwrap();

    let err = h.prov.add_units(&myapp, 1).await.unwrap_err();
    assert!(matches!(err, ProvisionError::PreconditionFailed(_)));
    assert_eq!(
        err.to_string(),
        "New units can only be added after the first deployment"
    );
    assert!(h.containers("myapp").is_empty());

    h.prov.deploy(&myapp, "v1", &mut Vec::new()).await.unwrap();
    let units = h.prov.add_units(&myapp, 3).await.unwrap();
    assert_eq!(units.len(), 3);
    assert_eq!(h.containers("myapp").len(), 4);
    assert!(h.containers("myapp").iter().all(|c| c.version == "v1"));
}

#[tokio::test]
async fn add_units_runs_no_hooks() {
    let h = harness();
    h.deployed("myapp", "v1").await;
    h.executor.reset();

    h.prov.add_units(&app("myapp"), 2).await.unwrap();
    assert!(h.executor.calls().is_empty());
}

/// Documented, not assumed-correct: a failure mid-batch leaves the units
/// already added running and reports only the error.
#[tokio::test]
async fn add_units_partial_failure_keeps_created_units() {
    let h = harness_with_nodes(
        &[("node-1", NODE1), ("node-2", NODE2), ("node-3", NODE3)],
        FakeExecutor::new(),
    );
    h.deployed("myapp", "v1").await; // node-1
    h.engine.set_unreachable(NODE3, true);

    // node-2 succeeds, node-3 fails.
    let err = h.prov.add_units(&app("myapp"), 3).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Engine(_)));

    let containers = h.containers("myapp");
    assert_eq!(containers.len(), 2);
    assert!(containers.iter().all(|c| c.status == ContainerStatus::Started));
    assert_eq!(h.router.routes("myapp").unwrap().len(), 2);
}

// ── RemoveUnit ─────────────────────────────────────────────────

#[tokio::test]
async fn remove_unknown_unit_is_not_found() {
    let h = harness();
    h.deployed("myapp", "v1").await;

    let err = h.prov.remove_unit(&app("myapp"), "nope").await.unwrap_err();
    assert!(matches!(err, ProvisionError::NotFound(_)));
    assert_eq!(err.to_string(), "not found");
}

#[tokio::test]
async fn remove_unit_of_another_app_is_denied() {
    let h = harness();
    h.deployed("myapp", "v1").await;
    h.deployed("otherapp", "v1").await;
    let theirs = h.containers("otherapp").remove(0);

    let err = h.prov.remove_unit(&app("myapp"), &theirs.id).await.unwrap_err();
    assert!(matches!(err, ProvisionError::PermissionDenied(_)));
    assert_eq!(err.to_string(), "Unit does not belong to this app");

    assert_eq!(h.store.get_container(&theirs.id).unwrap(), Some(theirs.clone()));
    assert!(h.engine.container_ids(NODE1).contains(&theirs.id));
}

#[tokio::test]
async fn remove_unit_clears_engine_route_and_record() {
    let h = harness();
    h.deployed("myapp", "v1").await;
    h.prov.add_units(&app("myapp"), 1).await.unwrap();
    let victim = h.containers("myapp").remove(0);

    h.prov.remove_unit(&app("myapp"), &victim.id).await.unwrap();

    assert!(h.store.get_container(&victim.id).unwrap().is_none());
    assert!(!h.engine.container_ids(NODE1).contains(&victim.id));
    let route = format!("http://127.0.0.1:{}", victim.host_port.unwrap());
    assert!(!h.router.has_route("myapp", &route));
    // The survivor still runs the image.
    assert!(h.engine.has_image(NODE1, "berth/myapp:v1"));
}

#[tokio::test]
async fn remove_last_unit_drops_the_image() {
    let h = harness();
    h.deployed("myapp", "v1").await;
    let only = h.containers("myapp").remove(0);

    h.prov.remove_unit(&app("myapp"), &only.id).await.unwrap();
    assert!(!h.engine.has_image(NODE1, "berth/myapp:v1"));
    assert!(h.containers("myapp").is_empty());
}

// ── Destroy ────────────────────────────────────────────────────

#[tokio::test]
async fn destroy_removes_tracked_and_untracked_containers() {
    let h = harness();
    h.deployed("myapp", "v1").await;
    h.prov.add_units(&app("myapp"), 2).await.unwrap();
    h.engine.spawn_untracked(NODE1, "myapp", "berth/myapp:v0");

    h.prov.destroy(&app("myapp")).await.unwrap();

    assert!(h.containers("myapp").is_empty());
    assert!(h.engine.list_containers(NODE1, Some("myapp")).await.unwrap().is_empty());
    assert!(!h.router.has_backend("myapp"));
}

#[tokio::test]
async fn destroy_app_without_containers_removes_backend() {
    let h = harness();
    h.prov.provision(&app("myapp")).unwrap();

    h.prov.destroy(&app("myapp")).await.unwrap();
    assert!(!h.router.has_backend("myapp"));
}

#[tokio::test]
async fn destroy_collects_errors_and_keeps_going() {
    let h = harness();
    h.deployed("myapp", "v1").await;
    h.prov.add_units(&app("myapp"), 1).await.unwrap();
    h.engine.fail(EngineOp::Remove);

    let err = h.prov.destroy(&app("myapp")).await.unwrap_err();
    match err {
        ProvisionError::Destroy { app, errors } => {
            assert_eq!(app, "myapp");
            assert_eq!(errors.len(), 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.containers("myapp").is_empty());
    assert!(!h.router.has_backend("myapp"));
}

// ── ExecuteCommand ─────────────────────────────────────────────

#[tokio::test]
async fn execute_command_without_containers_fails() {
    let h = harness();
    h.prov.provision(&app("myapp")).unwrap();

    let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
    let err = h
        .prov
        .execute_command(&mut stdout, &mut stderr, &app("myapp"), "ls", &[])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "No containers for this app");
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn execute_command_runs_once_per_unit_in_order() {
    // The first unit answers last, so completion order differs from unit order.
    let executor = FakeExecutor::new()
        .with_output_for("10.10.10.1", "out1\n")
        .with_output_for("10.10.10.2", "out2\n")
        .with_delay("10.10.10.1", Duration::from_millis(30));
    let h = harness_with_nodes(&[("node-1", NODE1)], executor);
    h.insert_started("c-1", "starbreaker", "10.10.10.1", 49153);
    h.insert_started("c-2", "starbreaker", "10.10.10.2", 49154);

    let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
    h.prov
        .execute_command(
            &mut stdout,
            &mut stderr,
            &app("starbreaker"),
            "ls",
            &["-ar".to_string()],
        )
        .await
        .unwrap();

    let calls = h.executor.calls();
    let targets: Vec<&str> = calls.iter().map(|c| c.target.as_str()).collect();
    assert_eq!(targets, vec!["10.10.10.1", "10.10.10.2"]);
    assert!(calls.iter().all(|c| c.command_line() == "ls -ar"));
    assert_eq!(h.executor.finished(), vec!["10.10.10.2", "10.10.10.1"]);
    assert_eq!(String::from_utf8(stdout).unwrap(), "out1\nout2\n");
    assert!(stderr.is_empty());
}

#[tokio::test]
async fn execute_command_waits_for_every_unit_before_failing() {
    let executor = FakeExecutor::new()
        .fail_on("10.10.10.1", "permission denied")
        .with_delay("10.10.10.2", Duration::from_millis(50));
    let h = harness_with_nodes(&[("node-1", NODE1)], executor);
    h.insert_started("c-1", "starbreaker", "10.10.10.1", 49153);
    h.insert_started("c-2", "starbreaker", "10.10.10.2", 49154);

    let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
    let err = h
        .prov
        .execute_command(&mut stdout, &mut stderr, &app("starbreaker"), "ls", &[])
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Exec(_)));
    assert_eq!(h.executor.finished(), vec!["10.10.10.1", "10.10.10.2"]);
    assert!(stdout.is_empty());
    assert_eq!(stderr, b"permission denied");
}

#[tokio::test]
async fn execute_command_failure_writes_stderr() {
    let executor = FakeExecutor::new()
        .with_output("*", "ok\n")
        .fail_on("10.10.10.2", "permission denied");
    let h = harness_with_nodes(&[("node-1", NODE1)], executor);
    h.insert_started("c-1", "starbreaker", "10.10.10.1", 49153);
    h.insert_started("c-2", "starbreaker", "10.10.10.2", 49154);

    let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
    let err = h
        .prov
        .execute_command(&mut stdout, &mut stderr, &app("starbreaker"), "ls", &[])
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Exec(_)));
    assert_eq!(stdout, b"ok\n");
    assert_eq!(stderr, b"permission denied");
    assert_eq!(h.executor.calls().len(), 2);
}

// ── Restart ────────────────────────────────────────────────────

#[tokio::test]
async fn restart_runs_restart_hook_everywhere() {
    let h = harness();
    h.insert_started("c-1", "myapp", "10.10.10.1", 49153);
    h.insert_started("c-2", "myapp", "10.10.10.2", 49154);

    let mut out = Vec::new();
    h.prov.restart(&app("myapp"), &mut out).await.unwrap();

    assert!(String::from_utf8(out).unwrap().starts_with("Restarting app..."));
    let calls = h.executor.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].target, "10.10.10.1");
    assert_eq!(calls[1].target, "10.10.10.2");
    assert!(calls.iter().all(|c| c.command_line() == "/var/lib/berth/restart"));
}

// ── CName / Swap ───────────────────────────────────────────────

#[tokio::test]
async fn set_cname_copies_routes_and_unset_leaves_app_alone() {
    let h = harness();
    h.deployed("myapp", "v1").await;
    let myapp = app("myapp");

    h.prov.set_cname(&myapp, "mycname.com").unwrap();
    assert!(h.router.has_backend("mycname.com"));
    assert!(h.router.has_route("mycname.com", "http://127.0.0.1:49153"));

    // The alias evolves on its own after creation.
    h.prov.add_units(&myapp, 1).await.unwrap();
    assert_eq!(h.router.routes("mycname.com").unwrap().len(), 1);

    h.prov.unset_cname(&myapp, "mycname.com").unwrap();
    assert!(!h.router.has_backend("mycname.com"));
    assert!(!h.router.has_route("mycname.com", "http://127.0.0.1:49153"));
    assert_eq!(h.router.routes("myapp").unwrap().len(), 2);
}

#[tokio::test]
async fn swap_twice_restores_routes() {
    let h = harness();
    h.deployed("app1", "v1").await;
    h.deployed("app2", "v1").await;
    let (before1, before2) = (
        h.router.routes("app1").unwrap(),
        h.router.routes("app2").unwrap(),
    );

    h.prov.swap(&app("app1"), &app("app2")).unwrap();
    assert_eq!(h.router.routes("app1").unwrap(), before2);
    assert_eq!(h.router.routes("app2").unwrap(), before1);

    h.prov.swap(&app("app1"), &app("app2")).unwrap();
    assert_eq!(h.router.routes("app1").unwrap(), before1);
    assert_eq!(h.router.routes("app2").unwrap(), before2);
}
