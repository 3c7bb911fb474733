//! Configuration integration tests
//!
//! Tests configuration create, repeat and remove between two controllers.

use integration_tests::{
    command_status, config_completes, init_test_logging, LinkPair, Side, HANDLE,
};
use lecs_common::{
    ConfigSpec, ControllerConfig, CsRole, DefaultSettings, HciStatus, LlTime, PreferredParams,
};
use lecs_cs::CsState;
use lecs_pdu::hci::{CreateConfig, HciCommand};
use lecs_pdu::{ConfigAction, ControlPdu};

fn spec(config_id: u8) -> ConfigSpec {
    ConfigSpec {
        config_id,
        ..ConfigSpec::default()
    }
}

/// Test that a configuration created by the central exists on both sides
#[test]
fn test_create_config_on_both_sides() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.exchange_capabilities();
    pair.create_config(spec(1));

    let central = config_completes(&pair.central_events);
    assert_eq!(central.len(), 1);
    assert_eq!(central[0].status, HciStatus::Success);
    assert_eq!(central[0].action, ConfigAction::Create);
    assert_eq!(central[0].spec.role, CsRole::Initiator);

    let peripheral = config_completes(&pair.peripheral_events);
    assert_eq!(peripheral.len(), 1);
    assert_eq!(peripheral[0].status, HciStatus::Success);
    assert_eq!(peripheral[0].spec.role, CsRole::Reflector);
    assert_eq!(peripheral[0].spec.config_id, 1);

    assert!(pair.central.config_slot(HANDLE, 1).is_some());
    assert!(pair.peripheral.config_slot(HANDLE, 1).is_some());
}

/// Test that repeating an identical create only notifies the requesting host
#[test]
fn test_repeated_create_is_idempotent() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.exchange_capabilities();
    pair.create_config(spec(0));
    pair.create_config(spec(0));

    let central = config_completes(&pair.central_events);
    assert_eq!(central.len(), 2);
    assert!(central.iter().all(|c| c.status == HciStatus::Success));
    assert_eq!(config_completes(&pair.peripheral_events).len(), 1);
    assert!(pair.peripheral.config_slot(HANDLE, 0).is_some());
}

/// Test that a re-create the peer never answers leaves the stored configuration usable
#[test]
fn test_recreate_timeout_keeps_config() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.exchange_capabilities();
    pair.create_config(spec(0));
    pair.take_events(Side::Central);

    let changed = ConfigSpec {
        chm_repetition: 2,
        ..spec(0)
    };
    pair.mute_peripheral = true;
    pair.create_config(changed);
    assert_eq!(pair.central.state(HANDLE), Some(CsState::ConfigPending));
    let slot = pair.central.config_slot(HANDLE, 0).expect("slot while pending");
    assert_eq!(slot.spec.chm_repetition, 1);

    pair.advance_to(LlTime::from_millis(40_000));
    let central = config_completes(&pair.central_events);
    assert_eq!(central.len(), 1);
    assert_eq!(central[0].status, HciStatus::LlResponseTimeout);
    let slot = pair.central.config_slot(HANDLE, 0).expect("slot after timeout");
    assert_eq!(slot.spec.chm_repetition, 1);

    // The old configuration still takes procedure parameters
    pair.mute_peripheral = false;
    pair.set_params(Side::Central, 0, PreferredParams::default());
    assert_eq!(pair.central.state(HANDLE), Some(CsState::ProcedureParamsPending));

    pair.create_config(changed);
    let slot = pair.central.config_slot(HANDLE, 0).expect("slot after re-create");
    assert_eq!(slot.spec.chm_repetition, 2);
}

/// Test that a second copy of a configuration response changes nothing
#[test]
fn test_replayed_config_response_ignored() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.exchange_capabilities();

    let event = pair.command_deferred(
        Side::Central,
        HciCommand::CreateConfig(CreateConfig {
            handle: HANDLE,
            create_context: 1,
            spec: spec(3),
        }),
    );
    assert_eq!(command_status(&event), HciStatus::Success);
    let (handle, req) = pair.central.poll_pdu().expect("config request");
    pair.peripheral.on_pdu(handle, &req, pair.now).expect("request accepted");
    let (handle, rsp) = pair.peripheral.poll_pdu().expect("config response");
    assert_eq!(
        lecs_pdu::decode(&rsp).expect("decodes"),
        ControlPdu::CsConfigRsp { config_id: 3 }
    );

    pair.central.on_pdu(handle, &rsp, pair.now).expect("response accepted");
    pair.pump();
    assert_eq!(config_completes(&pair.central_events).len(), 1);
    pair.set_params(Side::Central, 3, PreferredParams::default());
    let stored = pair.central.config_slot(HANDLE, 3).cloned().expect("config stored");
    pair.take_events(Side::Central);

    let replay = lecs_pdu::encode(&ControlPdu::CsConfigRsp { config_id: 3 });
    for _ in 0..2 {
        pair.central.on_pdu(HANDLE, &replay, pair.now).expect("replay is not an error");
    }
    assert!(pair.central.poll_pdu().is_none());
    pair.pump();
    assert!(config_completes(&pair.central_events).is_empty());
    assert_eq!(pair.central.config_slot(HANDLE, 3), Some(&stored));
    assert_eq!(pair.central.state(HANDLE), Some(CsState::ProcedureParamsPending));
}

/// Test configuration removal on both sides
#[test]
fn test_remove_config() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.exchange_capabilities();
    pair.create_config(spec(2));
    pair.take_events(Side::Central);
    pair.take_events(Side::Peripheral);

    let event = pair.command(
        Side::Central,
        HciCommand::RemoveConfig {
            handle: HANDLE,
            config_id: 2,
        },
    );
    assert_eq!(command_status(&event), HciStatus::Success);

    for side in [Side::Central, Side::Peripheral] {
        let events = pair.events(side);
        let done = config_completes(events);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].action, ConfigAction::Remove);
        assert_eq!(done[0].status, HciStatus::Success);
    }
    assert!(pair.central.config_slot(HANDLE, 2).is_none());
    assert!(pair.peripheral.config_slot(HANDLE, 2).is_none());
}

/// Test a configuration the peer cannot run
#[test]
fn test_create_config_rejected_by_peer() {
    init_test_logging();
    let mut pair = LinkPair::new();
    pair.exchange_capabilities();

    // Peripheral host allows the initiator role only
    let settings = DefaultSettings {
        role_enable: 0x01,
        ..DefaultSettings::default()
    };
    let event = pair.command(
        Side::Peripheral,
        HciCommand::SetDefaultSettings {
            handle: HANDLE,
            settings,
        },
    );
    assert_eq!(command_status(&event), HciStatus::Success);

    pair.create_config(spec(0));

    let central = config_completes(&pair.central_events);
    assert_eq!(central.len(), 1);
    assert_ne!(central[0].status, HciStatus::Success);
    assert!(pair.central.config_slot(HANDLE, 0).is_none());
    assert!(config_completes(&pair.peripheral_events).is_empty());
    assert!(pair.peripheral.config_slot(HANDLE, 0).is_none());
}

/// Test the configuration limit of the smaller controller
#[test]
fn test_config_limit() {
    init_test_logging();
    let mut peripheral = ControllerConfig::default();
    peripheral.capabilities.num_configs = 2;
    let mut pair = LinkPair::with_configs(ControllerConfig::default(), peripheral);
    pair.exchange_capabilities();

    pair.create_config(spec(0));
    pair.create_config(spec(1));
    let event = pair.command(
        Side::Central,
        HciCommand::CreateConfig(CreateConfig {
            handle: HANDLE,
            create_context: 1,
            spec: spec(2),
        }),
    );
    assert_eq!(command_status(&event), HciStatus::LimitReached);
    assert!(pair.central.config_slot(HANDLE, 2).is_none());

    // Replacing an existing id stays possible
    pair.create_config(spec(1));
}
