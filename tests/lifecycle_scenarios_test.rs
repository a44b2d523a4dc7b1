//! End-to-end lifecycle runs against the in-memory supervisor and publisher.

mod common;

use common::{descriptor, fast_timings, unit, Harness};
use std::sync::Arc;
use std::time::Duration;
use tails_server::dispatcher::{EventDispatcher, EventSource};
use tails_server::service::OptionValue;
use tails_server::status::{
    InstallationState, PublicationState, ServiceState, Status, Substate, SubstateCategory,
};
use tails_server::{Error, ServiceLifecycle};

fn dispatcher_for(harness: &Harness, lifecycle: &Arc<ServiceLifecycle>) -> EventDispatcher {
    EventDispatcher::new(vec![lifecycle.clone()], harness.deps.tor_ready.clone())
}

async fn enabled(harness: &Harness, name: &str, publish_first: bool) -> Arc<ServiceLifecycle> {
    harness.mark_installed(name);
    let lifecycle = harness.lifecycle(descriptor(name, publish_first));
    lifecycle.guess_status().await.unwrap();
    lifecycle.spawn_enable().await.unwrap().unwrap();
    assert_eq!(lifecycle.status(), Status::Online);
    lifecycle
}

#[tokio::test]
async fn test_install_then_enable_walks_through_every_stage() {
    let harness = Harness::new();
    let lifecycle = harness.lifecycle(descriptor("mumble", false));

    assert_eq!(lifecycle.guess_status().await.unwrap(), Status::Uninstalled);
    lifecycle.spawn_install().await.unwrap().unwrap();
    lifecycle.spawn_enable().await.unwrap().unwrap();

    let rec = &harness.recorder;
    assert_eq!(
        rec.history("mumble", SubstateCategory::Installation),
        vec![
            Substate::Installation(InstallationState::Installing),
            Substate::Installation(InstallationState::Installed),
        ]
    );
    assert_eq!(
        rec.history("mumble", SubstateCategory::Service),
        vec![
            Substate::Service(ServiceState::Starting),
            Substate::Service(ServiceState::Running),
        ]
    );
    assert_eq!(
        rec.history("mumble", SubstateCategory::Publication),
        vec![
            Substate::Publication(PublicationState::Publishing),
            Substate::Publication(PublicationState::Online),
        ]
    );
    assert_eq!(
        rec.statuses("mumble"),
        vec![
            Status::Uninstalled,
            Status::Installing,
            Status::Stopped,
            Status::Starting,
            Status::Offline,
            Status::Publishing,
            Status::Online,
        ]
    );
    assert_eq!(harness.installer.installs(), vec!["mumble".to_string()]);
    assert!(lifecycle.is_installed().unwrap());
    assert!(lifecycle.service().address().unwrap().is_some());
}

#[tokio::test]
async fn test_enable_without_tor_changes_nothing() {
    let harness = Harness::new();
    harness.publisher.set_bootstrapped(false);
    harness.mark_installed("mumble");
    let lifecycle = harness.lifecycle(descriptor("mumble", false));
    lifecycle.guess_status().await.unwrap();

    let result = lifecycle.spawn_enable().await.unwrap();

    assert!(matches!(result, Err(Error::TorIsNotRunning)));
    assert_eq!(lifecycle.status(), Status::TorNotRunning);
    assert_eq!(harness.supervisor.start_calls(&unit("mumble")), 0);
    assert_eq!(harness.publisher.create_calls(), 0);
}

#[tokio::test]
async fn test_failed_start_withdraws_early_publication() {
    let harness = Harness::new();
    harness.mark_installed("sftp");
    harness.supervisor.fail_start(&unit("sftp"));
    let lifecycle = harness.lifecycle(descriptor("sftp", true));
    lifecycle.guess_status().await.unwrap();

    let result = lifecycle.spawn_enable().await.unwrap();

    assert!(matches!(result, Err(Error::ServiceStartFailed(..))));
    assert_eq!(harness.publisher.create_calls(), 1);
    assert_eq!(harness.publisher.remove_calls(), 1);
    assert_eq!(
        harness
            .recorder
            .history("sftp", SubstateCategory::Publication),
        vec![
            Substate::Publication(PublicationState::Publishing),
            Substate::Publication(PublicationState::Online),
            Substate::Publication(PublicationState::Offline),
        ]
    );
    assert_eq!(lifecycle.snapshot().publication, PublicationState::Offline);
    assert_eq!(lifecycle.status(), Status::Error);
}

#[tokio::test]
async fn test_process_dying_right_after_start_is_a_start_failure() {
    let harness = Harness::new();
    harness.mark_installed("mumble");
    harness.supervisor.die_after_start(&unit("mumble"));
    let lifecycle = harness.lifecycle(descriptor("mumble", false));
    lifecycle.guess_status().await.unwrap();

    let result = lifecycle.spawn_enable().await.unwrap();

    assert!(matches!(result, Err(Error::ServiceStartFailed(..))));
    assert_eq!(harness.publisher.remove_calls(), 1);
    assert_eq!(lifecycle.snapshot().publication, PublicationState::Offline);
    assert_eq!(lifecycle.status(), Status::Error);
}

#[tokio::test]
async fn test_failed_unit_event_reports_error_once() {
    let harness = Harness::new();
    let lifecycle = enabled(&harness, "mumble", false).await;
    let dispatcher = dispatcher_for(&harness, &lifecycle);
    harness.recorder.clear();

    let source = EventSource::Unit(unit("mumble"));
    dispatcher.notify(&source, "failed", "failed").unwrap();
    dispatcher.notify(&source, "failed", "failed").unwrap();

    assert_eq!(harness.recorder.statuses("mumble"), vec![Status::Error]);
    assert_eq!(
        harness.recorder.history("mumble", SubstateCategory::Service),
        vec![Substate::Service(ServiceState::Stopped)]
    );
}

#[tokio::test]
async fn test_process_exit_reads_as_stopped_unexpectedly() {
    let harness = Harness::new();
    let lifecycle = enabled(&harness, "mumble", false).await;
    let dispatcher = dispatcher_for(&harness, &lifecycle);

    dispatcher
        .notify(&EventSource::Unit(unit("mumble")), "inactive", "dead")
        .unwrap();

    assert_eq!(lifecycle.status(), Status::StoppedUnexpectedly);
}

#[tokio::test]
async fn test_concurrent_enables_run_one_at_a_time() {
    let harness = Harness::new();
    harness.mark_installed("mumble");
    harness.publisher.set_create_delay(Duration::from_millis(50));
    let lifecycle = harness.lifecycle(descriptor("mumble", false));
    lifecycle.guess_status().await.unwrap();

    let first = lifecycle.spawn_enable();
    let second = lifecycle.spawn_enable();
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(Error::AlreadyEnabled(_))))
            .count(),
        1
    );
    assert_eq!(harness.publisher.create_calls(), 1);
    assert_eq!(harness.supervisor.start_calls(&unit("mumble")), 1);
    assert_eq!(lifecycle.status(), Status::Online);
}

#[tokio::test]
async fn test_disable_waits_for_enable_in_flight() {
    let harness = Harness::new();
    harness.mark_installed("mumble");
    harness.publisher.set_create_delay(Duration::from_millis(50));
    let lifecycle = harness.lifecycle(descriptor("mumble", false));
    lifecycle.guess_status().await.unwrap();

    let enabling = lifecycle.spawn_enable();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(lifecycle.is_busy());
    let disabling = lifecycle.spawn_disable();

    enabling.await.unwrap().unwrap();
    disabling.await.unwrap().unwrap();

    assert_eq!(lifecycle.status(), Status::Stopped);
    assert_eq!(harness.supervisor.start_calls(&unit("mumble")), 1);
    assert_eq!(harness.supervisor.stop_calls(&unit("mumble")), 1);
    assert_eq!(harness.publisher.remove_calls(), 1);
    assert!(!lifecycle.is_busy());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disable_queued_behind_failed_enable_ends_stopped() {
    let harness = Harness::new();
    harness.mark_installed("sftp");
    harness.supervisor.fail_start(&unit("sftp"));
    harness.publisher.set_create_delay(Duration::from_millis(50));
    let lifecycle = harness.lifecycle(descriptor("sftp", true));
    lifecycle.guess_status().await.unwrap();

    let enabling = lifecycle.spawn_enable();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(lifecycle.is_busy());
    let disabling = lifecycle.spawn_disable();

    assert!(matches!(
        enabling.await.unwrap(),
        Err(Error::ServiceStartFailed(..))
    ));
    disabling.await.unwrap().unwrap();

    assert_eq!(lifecycle.status(), Status::Stopped);
    assert_eq!(harness.publisher.remove_calls(), 1);
    assert!(!lifecycle.is_busy());
}

#[tokio::test]
async fn test_disable_twice_is_quiet() {
    let harness = Harness::new();
    let lifecycle = enabled(&harness, "mumble", false).await;

    lifecycle.spawn_disable().await.unwrap().unwrap();
    assert_eq!(lifecycle.status(), Status::Stopped);
    let first = harness.recorder.statuses("mumble");
    assert!(first.ends_with(&[Status::Stopping, Status::Stopped]));
    assert!(!first.contains(&Status::StoppedUnexpectedly));

    harness.recorder.clear();
    lifecycle.spawn_disable().await.unwrap().unwrap();

    assert!(harness.recorder.statuses("mumble").is_empty());
    assert_eq!(harness.supervisor.stop_calls(&unit("mumble")), 1);
    assert_eq!(harness.publisher.remove_calls(), 1);
}

#[tokio::test]
async fn test_uninstall_cleans_up_stored_options() {
    let harness = Harness::new();
    let lifecycle = enabled(&harness, "mumble", false).await;
    lifecycle
        .set_option("server-password", "hunter2")
        .await
        .unwrap();
    let address = lifecycle.service().address().unwrap().unwrap();

    lifecycle.spawn_uninstall().await.unwrap().unwrap();

    assert_eq!(
        harness.cleanup.calls(),
        vec![(
            "mumble".to_string(),
            "server-password".to_string(),
            OptionValue::Text("hunter2".to_string()),
        )]
    );
    assert!(!lifecycle.is_installed().unwrap());
    assert!(!harness.deps.state.service_dir("mumble").exists());
    assert!(!harness.publisher.is_published_now(&address));
    assert!(lifecycle.service().address().unwrap().is_none());
    assert_eq!(lifecycle.status(), Status::Uninstalled);
    // One stop for the option restart, one for the uninstall
    assert_eq!(harness.supervisor.stop_calls(&unit("mumble")), 2);
}

#[tokio::test]
async fn test_install_and_uninstall_guard_their_preconditions() {
    let harness = Harness::new();
    let lifecycle = harness.lifecycle(descriptor("mumble", false));
    lifecycle.guess_status().await.unwrap();

    let result = lifecycle.spawn_uninstall().await.unwrap();
    assert!(matches!(result, Err(Error::NotInstalled(_))));
    assert_eq!(lifecycle.status(), Status::Uninstalled);

    lifecycle.spawn_install().await.unwrap().unwrap();
    let result = lifecycle.spawn_install().await.unwrap();
    assert!(matches!(result, Err(Error::AlreadyInstalled(_))));
    assert_eq!(lifecycle.status(), Status::Stopped);
    assert_eq!(harness.installer.installs().len(), 1);
}

#[tokio::test]
async fn test_failed_install_rolls_back() {
    let harness = Harness::new();
    harness.installer.fail();
    let lifecycle = harness.lifecycle(descriptor("mumble", false));
    lifecycle.guess_status().await.unwrap();

    let result = lifecycle.spawn_install().await.unwrap();

    assert!(matches!(result, Err(Error::Install(_))));
    assert!(!lifecycle.is_installed().unwrap());
    assert_eq!(
        lifecycle.snapshot().installation,
        InstallationState::Uninstalled
    );
    assert_eq!(lifecycle.status(), Status::Error);
}

#[tokio::test]
async fn test_install_waits_for_tor_target_event() {
    let mut timings = fast_timings();
    timings.tor_poll_interval = Duration::from_secs(60);
    let harness = Harness::with_timings(timings);
    harness.publisher.set_bootstrapped(false);
    let lifecycle = harness.lifecycle(descriptor("mumble", false));
    lifecycle.guess_status().await.unwrap();
    let dispatcher = dispatcher_for(&harness, &lifecycle);

    let installing = lifecycle.spawn_install();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(lifecycle.is_busy());
    assert!(harness.installer.installs().is_empty());

    harness.publisher.set_bootstrapped(true);
    dispatcher
        .notify(&EventSource::TorTarget, "active", "active")
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), installing)
        .await
        .expect("install woke up before the next poll")
        .unwrap()
        .unwrap();
    assert_eq!(harness.installer.installs(), vec!["mumble".to_string()]);
    assert_eq!(lifecycle.status(), Status::Stopped);
}

#[tokio::test]
async fn test_option_change_restarts_on_the_same_address() {
    let harness = Harness::new();
    let lifecycle = enabled(&harness, "mumble", false).await;
    let address = lifecycle.service().address().unwrap();

    lifecycle.set_option("virtual-port", "8080").await.unwrap();

    assert_eq!(harness.publisher.created_ports(), vec![(6000, 6000), (8080, 6000)]);
    assert_eq!(lifecycle.service().address().unwrap(), address);
    assert_eq!(harness.supervisor.stop_calls(&unit("mumble")), 1);
    assert_eq!(harness.supervisor.start_calls(&unit("mumble")), 2);
    assert_eq!(lifecycle.status(), Status::Online);
    assert!(!harness
        .recorder
        .statuses("mumble")
        .contains(&Status::StoppedUnexpectedly));
}

#[tokio::test]
async fn test_option_change_on_stopped_service_only_stores() {
    let harness = Harness::new();
    harness.mark_installed("mumble");
    let lifecycle = harness.lifecycle(descriptor("mumble", false));
    lifecycle.guess_status().await.unwrap();

    lifecycle.set_option("virtual-port", "8080").await.unwrap();

    let (_, value) = lifecycle.get_option("virtual-port").unwrap();
    assert_eq!(value, OptionValue::Port(8080));
    assert_eq!(harness.supervisor.start_calls(&unit("mumble")), 0);
    assert_eq!(harness.publisher.create_calls(), 0);

    lifecycle.reset_option("virtual-port").await.unwrap();
    let (_, value) = lifecycle.get_option("virtual-port").unwrap();
    assert_eq!(value, OptionValue::Port(6000));
}

#[tokio::test]
async fn test_option_errors() {
    let harness = Harness::new();
    let lifecycle = harness.lifecycle(descriptor("mumble", false));

    let result = lifecycle.set_option("virtual-port", "8080").await;
    assert!(matches!(result, Err(Error::NotInstalled(_))));

    harness.mark_installed("mumble");
    let result = lifecycle.set_option("colour", "blue").await;
    assert!(matches!(result, Err(Error::UnknownOption { .. })));

    let result = lifecycle.set_option("virtual-port", "not-a-port").await;
    assert!(matches!(result, Err(Error::InvalidOptionValue { .. })));

    let result = lifecycle
        .spawn_apply_options(vec![tails_server::OptionChange::Set(
            "autostart".to_string(),
            OptionValue::Port(1),
        )])
        .await
        .unwrap();
    assert!(matches!(result, Err(Error::InvalidOptionValue { .. })));
}

#[tokio::test]
async fn test_slow_supervisor_times_out() {
    let mut timings = fast_timings();
    timings.supervisor_timeout = Duration::from_millis(50);
    let harness = Harness::with_timings(timings);
    harness.mark_installed("mumble");
    harness.supervisor.set_start_delay(Duration::from_millis(500));
    let lifecycle = harness.lifecycle(descriptor("mumble", false));
    lifecycle.guess_status().await.unwrap();

    let result = lifecycle.spawn_enable().await.unwrap();

    assert!(matches!(result, Err(Error::Timeout(_))));
    assert_eq!(lifecycle.status(), Status::Error);
    assert_eq!(harness.publisher.create_calls(), 0);
}

#[tokio::test]
async fn test_guess_status_picks_up_a_published_service() {
    let harness = Harness::new();
    enabled(&harness, "mumble", false).await;

    let fresh = harness.lifecycle(descriptor("mumble", false));
    assert_eq!(fresh.guess_status().await.unwrap(), Status::Online);
    assert_eq!(fresh.snapshot().service, ServiceState::Running);
}

#[tokio::test]
async fn test_make_states_consistent_publishes_running_service() {
    let harness = Harness::new();
    harness.mark_installed("mumble");
    harness.supervisor.set_active(&unit("mumble"), true);
    let lifecycle = harness.lifecycle(descriptor("mumble", false));
    assert_eq!(lifecycle.guess_status().await.unwrap(), Status::Offline);

    lifecycle.make_states_consistent().await.unwrap();

    assert_eq!(lifecycle.status(), Status::Online);
    assert_eq!(harness.publisher.create_calls(), 1);
    assert_eq!(harness.supervisor.start_calls(&unit("mumble")), 0);
}
