//! Negotiation integration tests
//!
//! Tests request collisions, response timeouts, channel map updates,
//! malformed PDUs and radio time lost to other link-layer activity.

use std::collections::HashSet;

use integration_tests::{
    command_status, config_completes, enable_completes, init_test_logging, subevent_results,
    LinkPair, Side, HANDLE,
};
use lecs_common::{ChannelMap, ConfigSpec, HciStatus, LlTime, PreferredParams};
use lecs_cs::params::START_LEAD_EVENTS;
use lecs_cs::{CsState, MAP_UPDATE_LEAD_EVENTS};
use lecs_pdu::hci::{CreateConfig, HciCommand, HciEvent, ProcedureEnable, SubeventAbortReason};
use lecs_pdu::{ControlPdu, Opcode};
use lecs_sched::{ItemKind, PreemptPolicy, SchedItem};

fn endless() -> PreferredParams {
    PreferredParams {
        max_procedure_count: 0,
        ..PreferredParams::default()
    }
}

fn enable(config_id: u8) -> HciCommand {
    HciCommand::ProcedureEnable(ProcedureEnable {
        handle: HANDLE,
        config_id,
        enable: true,
    })
}

/// Test that simultaneous enables from both hosts start one series
#[test]
fn test_enable_collision_resolves_to_central() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.prepare(ConfigSpec::default());
    pair.set_params(Side::Central, 0, PreferredParams::default());
    pair.set_params(Side::Peripheral, 0, PreferredParams::default());

    let central = pair.command_deferred(Side::Central, enable(0));
    let peripheral = pair.command_deferred(Side::Peripheral, enable(0));
    assert_eq!(command_status(&central), HciStatus::Success);
    assert_eq!(command_status(&peripheral), HciStatus::Success);
    pair.pump();

    for side in [Side::Central, Side::Peripheral] {
        let enabled = enable_completes(pair.events(side));
        assert_eq!(enabled.len(), 1, "{side:?}");
        assert_eq!(enabled[0].status, HciStatus::Success);
        assert_eq!(enabled[0].state, 1);
    }
    assert_eq!(pair.central.state(HANDLE), Some(CsState::ActiveMeasurement));
    assert_eq!(pair.peripheral.state(HANDLE), Some(CsState::ActiveMeasurement));

    pair.run_conn_events(20);
    let steps = pair.central.radio().steps();
    assert!(!steps.is_empty());
    assert_eq!(steps, pair.peripheral.radio().steps());
}

fn create(config_id: u8) -> HciCommand {
    HciCommand::CreateConfig(CreateConfig {
        handle: HANDLE,
        create_context: 1,
        spec: ConfigSpec {
            config_id,
            ..ConfigSpec::default()
        },
    })
}

/// Test that crossing configuration requests leave only the central's
#[test]
fn test_config_collision_resolves_to_central() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.exchange_capabilities();

    let central = pair.command_deferred(Side::Central, create(2));
    let peripheral = pair.command_deferred(Side::Peripheral, create(1));
    assert_eq!(command_status(&central), HciStatus::Success);
    assert_eq!(command_status(&peripheral), HciStatus::Success);
    pair.pump();

    // The yielding peripheral host hears only about the central's configuration
    for side in [Side::Central, Side::Peripheral] {
        let done = config_completes(pair.events(side));
        assert_eq!(done.len(), 1, "{side:?}");
        assert_eq!(done[0].status, HciStatus::Success);
        assert_eq!(done[0].spec.config_id, 2);
    }
    assert!(pair.central.config_slot(HANDLE, 2).is_some());
    assert!(pair.peripheral.config_slot(HANDLE, 2).is_some());
    assert!(pair.central.config_slot(HANDLE, 1).is_none());
    assert!(pair.peripheral.config_slot(HANDLE, 1).is_none());
    assert_eq!(pair.central.state(HANDLE), Some(CsState::Idle));
    assert_eq!(pair.peripheral.state(HANDLE), Some(CsState::Idle));

    // Nothing is left pending, so the peripheral can retry on its own
    let event = pair.command(Side::Peripheral, create(1));
    assert_eq!(command_status(&event), HciStatus::Success);
    assert!(pair.central.config_slot(HANDLE, 1).is_some());
}

/// Test that an unanswered request fails after the response timeout
#[test]
fn test_response_timeout() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.mute_peripheral = true;
    pair.exchange_capabilities();
    assert_eq!(pair.dropped.len(), 1);

    let timeout = LlTime::from_millis(40_000);
    assert_eq!(pair.central.next_wakeup(), Some(timeout));

    // Only one request at a time
    let event = pair.command(
        Side::Central,
        HciCommand::ReadRemoteSupportedCapabilities { handle: HANDLE },
    );
    assert_eq!(command_status(&event), HciStatus::CommandDisallowed);

    pair.advance_to(LlTime::from_millis(39_999));
    assert!(pair.central_events.is_empty());

    pair.advance_to(timeout);
    assert!(matches!(
        pair.central_events.as_slice(),
        [HciEvent::RemoteCapabilitiesComplete {
            status: HciStatus::LlResponseTimeout,
            ..
        }]
    ));
    assert!(pair.central.remote_capabilities(HANDLE).is_none());
    assert_eq!(pair.central.next_wakeup(), None);

    pair.mute_peripheral = false;
    pair.exchange_capabilities();
    assert!(pair.central.remote_capabilities(HANDLE).is_some());
}

/// Test that host channel classification reaches both step sequences
#[test]
fn test_channel_classification_update() {
    init_test_logging();
    let mut pair = LinkPair::new();

    let mut map = ChannelMap::all_usable();
    for ch in 10..=19 {
        map.set(ch, false);
    }
    let event = pair.command(Side::Central, HciCommand::SetChannelClassification { map });
    assert_eq!(command_status(&event), HciStatus::Success);
    pair.run_conn_events(usize::from(MAP_UPDATE_LEAD_EVENTS) + 2);

    pair.start_procedures(ConfigSpec::default(), endless());
    pair.run_conn_events(20);

    let central = pair.central.radio().steps();
    assert!(!central.is_empty());
    assert_eq!(central, pair.peripheral.radio().steps());
    assert!(central.iter().all(|(_, ch)| !(10..=19).contains(ch)));
}

/// Test a classification update while procedures run
#[test]
fn test_channel_classification_during_procedures() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.start_procedures(ConfigSpec::default(), endless());
    pair.run_conn_events(12);

    let mut map = ChannelMap::all_usable();
    for ch in 40..=60 {
        map.set(ch, false);
    }
    pair.command(Side::Central, HciCommand::SetChannelClassification { map });
    pair.run_conn_events(usize::from(MAP_UPDATE_LEAD_EVENTS) + 12);

    assert_eq!(pair.central.radio().steps(), pair.peripheral.radio().steps());
    assert!(procedures_running(&pair));
}

fn procedures_running(pair: &LinkPair) -> bool {
    let last = |events: &[HciEvent]| {
        events
            .iter()
            .rev()
            .find_map(|e| match e {
                HciEvent::ProcedureEnableComplete(c) => Some(c.state),
                _ => None,
            })
    };
    last(&pair.central_events) == Some(1) && last(&pair.peripheral_events) == Some(1)
}

/// Test that a malformed PDU is rejected with its opcode
#[test]
fn test_malformed_pdu_rejected() {
    init_test_logging();
    let mut pair = LinkPair::new();

    let result = pair.peripheral.on_pdu(HANDLE, &[Opcode::CsReq as u8, 0x01], pair.now);
    assert!(result.is_err());

    let (handle, pdu) = pair.peripheral.poll_pdu().expect("reject queued");
    assert_eq!(handle, HANDLE);
    match lecs_pdu::decode(&pdu) {
        Ok(ControlPdu::RejectExtInd(reject)) => assert_eq!(reject.opcode, Opcode::CsReq as u8),
        other => panic!("Expected reject, got {other:?}"),
    }
    assert_eq!(pair.peripheral.state(HANDLE), Some(CsState::Idle));
}

/// Test that a subevent losing its radio time keeps both sides aligned
#[test]
fn test_scheduling_conflict_keeps_alignment() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.start_procedures(ConfigSpec::default(), endless());

    let start = pair.timing.anchor_of(START_LEAD_EVENTS);
    let blocker = SchedItem::new(ItemKind::Advertising, start, 20_000).with_priority(10);
    let insertion = pair
        .central
        .reserve_external(blocker, 0, PreemptPolicy::Always)
        .expect("reservation");
    assert_eq!(insertion.preempted.len(), 1);

    pair.run_conn_events(16);

    let central = subevent_results(&pair.central_events);
    assert!(central.len() > 1);
    assert_eq!(central[0].abort.subevent, SubeventAbortReason::SchedulingConflict);
    assert!(central[0].steps.is_empty());
    assert_eq!(
        subevent_results(&pair.peripheral_events)[0].abort.subevent,
        SubeventAbortReason::None
    );

    // The skipped subevent consumed the same DRBG output on the central
    let peripheral: HashSet<(u16, u8)> = pair.peripheral.radio().steps().into_iter().collect();
    let ran = pair.central.radio().steps();
    assert!(!ran.is_empty());
    assert!(ran.iter().all(|step| peripheral.contains(step)));

    pair.set_enable(Side::Central, 0, false);
    assert_eq!(
        pair.central.step_counter(HANDLE, 0),
        pair.peripheral.step_counter(HANDLE, 0)
    );
}
