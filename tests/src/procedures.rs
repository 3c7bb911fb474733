//! Procedure integration tests
//!
//! Tests procedure enable, result reporting, termination and loss of
//! synchronization with both controllers running the same step sequence.

use std::collections::HashSet;

use integration_tests::{
    all_steps, command_status, enable_completes, init_test_logging, procedure_done_statuses,
    subevent_results, LinkPair, Side, HANDLE,
};
use lecs_common::{ConfigSpec, ControllerConfig, HciStatus, PreferredParams};
use lecs_cs::params::START_LEAD_EVENTS;
use lecs_cs::results::FREQ_COMPENSATION_UNAVAILABLE;
use lecs_pdu::hci::{DoneStatus, HciEvent, SubeventAbortReason};

fn endless() -> PreferredParams {
    PreferredParams {
        max_procedure_count: 0,
        ..PreferredParams::default()
    }
}

/// Test a single-procedure series from enable to completion
#[test]
fn test_single_procedure_series() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.start_procedures(ConfigSpec::default(), PreferredParams::default());

    for side in [Side::Central, Side::Peripheral] {
        let enabled = enable_completes(pair.events(side));
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].status, HciStatus::Success);
        assert_eq!(enabled[0].state, 1);
    }

    pair.run_conn_events(20);

    let central = subevent_results(&pair.central_events);
    let peripheral = subevent_results(&pair.peripheral_events);
    assert!(!central.is_empty());
    assert!(!peripheral.is_empty());
    assert_eq!(central[0].start_acl_conn_event, START_LEAD_EVENTS);
    assert_eq!(peripheral[0].start_acl_conn_event, START_LEAD_EVENTS);
    assert_eq!(central[0].frequency_compensation, 0);
    assert_eq!(peripheral[0].frequency_compensation, FREQ_COMPENSATION_UNAVAILABLE);

    assert_eq!(
        procedure_done_statuses(&pair.central_events).last(),
        Some(&DoneStatus::Complete)
    );
    assert_eq!(
        procedure_done_statuses(&pair.peripheral_events).last(),
        Some(&DoneStatus::Complete)
    );

    // Both radios ran the same steps on the same channels
    let steps = pair.central.radio().steps();
    assert!(!steps.is_empty());
    assert_eq!(steps, pair.peripheral.radio().steps());
    assert_eq!(all_steps(&pair.central_events).len(), steps.len());
    assert_eq!(all_steps(&pair.peripheral_events).len(), steps.len());

    let central_count = pair.central.step_counter(HANDLE, 0);
    assert!(central_count.unwrap_or(0) > 0);
    assert_eq!(central_count, pair.peripheral.step_counter(HANDLE, 0));
    assert!(pair.central.scheduler().is_empty());
    assert!(pair.peripheral.scheduler().is_empty());
}

/// Test that a host disable stops both sides with equal step counters
#[test]
fn test_host_disable_terminates_both_sides() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.start_procedures(ConfigSpec::default(), endless());
    pair.run_conn_events(14);
    assert!(subevent_results(&pair.central_events).len() > 1);
    pair.take_events(Side::Central);
    pair.take_events(Side::Peripheral);

    let event = pair.set_enable(Side::Central, 0, false);
    assert_eq!(command_status(&event), HciStatus::Success);

    for side in [Side::Central, Side::Peripheral] {
        let disabled = enable_completes(pair.events(side));
        assert_eq!(disabled.len(), 1);
        assert_eq!(disabled[0].status, HciStatus::Success);
        assert_eq!(disabled[0].state, 0);
    }
    let steps = pair.central.step_counter(HANDLE, 0);
    assert!(steps.unwrap_or(0) > 0);
    assert_eq!(steps, pair.peripheral.step_counter(HANDLE, 0));

    pair.central.radio_mut().clear();
    pair.peripheral.radio_mut().clear();
    pair.run_conn_events(10);
    assert!(pair.central.radio().slots().is_empty());
    assert!(pair.peripheral.radio().slots().is_empty());
    assert!(subevent_results(&pair.central_events).is_empty());
}

/// Test that procedures can be enabled again after a disable
#[test]
fn test_reenable_after_disable() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.start_procedures(ConfigSpec::default(), endless());
    pair.run_conn_events(12);
    pair.set_enable(Side::Central, 0, false);
    let first_series = pair.central.step_counter(HANDLE, 0).unwrap_or(0);

    let event = pair.set_enable(Side::Central, 0, true);
    assert_eq!(command_status(&event), HciStatus::Success);
    pair.run_conn_events(12);
    pair.set_enable(Side::Central, 0, false);

    let second_series = pair.central.step_counter(HANDLE, 0).unwrap_or(0);
    assert!(second_series > first_series);
    assert_eq!(Some(second_series), pair.peripheral.step_counter(HANDLE, 0));
    assert_eq!(pair.central.radio().steps(), pair.peripheral.radio().steps());
}

/// Test that lost synchronization aborts one procedure and the series goes on
#[test]
fn test_sync_loss_aborts_procedure_only() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.peripheral.radio_mut().lose_sync(1);
    pair.start_procedures(ConfigSpec::default(), endless());
    pair.run_conn_events(16);

    let peripheral = subevent_results(&pair.peripheral_events);
    assert!(!peripheral.is_empty());
    assert_eq!(peripheral[0].procedure_done, DoneStatus::Aborted);
    assert_eq!(peripheral[0].subevent_done, DoneStatus::Aborted);
    assert_eq!(peripheral[0].abort.subevent, SubeventAbortReason::NoCsSync);

    let statuses = procedure_done_statuses(&pair.peripheral_events);
    assert!(statuses.iter().skip(1).any(|s| *s == DoneStatus::Complete));
    assert!(procedure_done_statuses(&pair.central_events)
        .iter()
        .all(|s| *s != DoneStatus::Aborted));

    // The peripheral stays on the central's channel sequence
    let central: HashSet<(u16, u8)> = pair.central.radio().steps().into_iter().collect();
    let after_loss = pair.peripheral.radio().steps();
    assert!(after_loss.len() > 1);
    assert!(after_loss.iter().all(|step| central.contains(step)));

    pair.set_enable(Side::Central, 0, false);
    assert_eq!(
        pair.central.step_counter(HANDLE, 0),
        pair.peripheral.step_counter(HANDLE, 0)
    );
}

/// Test that procedures need security first
#[test]
fn test_enable_requires_security() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.exchange_capabilities();
    pair.create_config(ConfigSpec::default());
    pair.set_params(Side::Central, 0, PreferredParams::default());

    let event = pair.set_enable(Side::Central, 0, true);
    assert_eq!(command_status(&event), HciStatus::CommandDisallowed);
    assert!(pair.central.poll_pdu().is_none());
}

/// Test that procedures need parameters first
#[test]
fn test_enable_requires_parameters() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.prepare(ConfigSpec::default());

    let event = pair.set_enable(Side::Central, 0, true);
    assert_eq!(command_status(&event), HciStatus::CommandDisallowed);
}

/// Test a procedure start requested by the peripheral's host
#[test]
fn test_peripheral_initiated_enable() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.prepare(ConfigSpec::default());
    pair.set_params(Side::Peripheral, 0, PreferredParams::default());

    let event = pair.set_enable(Side::Peripheral, 0, true);
    assert_eq!(command_status(&event), HciStatus::Success);
    for side in [Side::Central, Side::Peripheral] {
        let enabled = enable_completes(pair.events(side));
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].status, HciStatus::Success);
    }

    pair.run_conn_events(20);
    let steps = pair.peripheral.radio().steps();
    assert!(!steps.is_empty());
    assert_eq!(steps, pair.central.radio().steps());
}

/// Test that results are split across continuation events
#[test]
fn test_results_split_under_payload_limit() {
    init_test_logging();
    let central = ControllerConfig {
        max_event_payload: 40,
        ..ControllerConfig::default()
    };
    let mut pair = LinkPair::with_configs(central, ControllerConfig::default());
    pair.start_procedures(ConfigSpec::default(), PreferredParams::default());
    pair.run_conn_events(20);

    let continues = pair
        .central_events
        .iter()
        .filter(|e| matches!(e, HciEvent::SubeventResultContinue(_)))
        .count();
    assert!(continues > 0);
    assert_eq!(
        all_steps(&pair.central_events).len(),
        pair.central.radio().steps().len()
    );
    assert!(!pair
        .peripheral_events
        .iter()
        .any(|e| matches!(e, HciEvent::SubeventResultContinue(_))));
}
