//! Capability exchange integration tests
//!
//! Tests the capabilities and FAE table reads between two controllers.

use integration_tests::{command_status, init_test_logging, LinkPair, Side, HANDLE};
use lecs_common::{Capabilities, ControllerConfig, FaeTable, HciStatus};
use lecs_cs::CsState;
use lecs_pdu::hci::{HciCommand, HciEvent};

/// Test the central reading the peripheral's capabilities
#[test]
fn test_remote_capabilities_exchange() {
    init_test_logging();

    let mut peripheral = ControllerConfig::default();
    peripheral.capabilities.num_antennas = 2;
    peripheral.capabilities.max_antenna_paths = 2;
    let mut pair = LinkPair::with_configs(ControllerConfig::default(), peripheral);

    pair.exchange_capabilities();

    let caps = pair.central_events.iter().find_map(|e| match e {
        HciEvent::RemoteCapabilitiesComplete { status, handle, caps } => {
            assert_eq!(*status, HciStatus::Success);
            assert_eq!(*handle, HANDLE);
            Some(*caps)
        }
        _ => None,
    });
    let caps = caps.expect("capabilities complete");
    assert_eq!(caps.num_antennas, 2);
    assert_eq!(pair.central.remote_capabilities(HANDLE), Some(caps));

    // The responding side learns the requester's set without telling its host
    assert!(pair.peripheral_events.is_empty());
    assert_eq!(
        pair.peripheral.remote_capabilities(HANDLE).map(|c| c.num_antennas),
        Some(1)
    );
    assert_eq!(pair.central.state(HANDLE), Some(CsState::Idle));
    assert_eq!(pair.peripheral.state(HANDLE), Some(CsState::Idle));
}

/// Test that out-of-range remote values are clamped
#[test]
fn test_cached_capabilities_clamped() {
    init_test_logging();
    let mut pair = LinkPair::new();

    let caps = Capabilities {
        num_antennas: 9,
        max_antenna_paths: 12,
        ..Capabilities::default()
    };
    let event = pair.command(
        Side::Central,
        HciCommand::WriteCachedRemoteSupportedCapabilities { handle: HANDLE, caps },
    );
    assert_eq!(command_status(&event), HciStatus::Success);

    let stored = pair.central.remote_capabilities(HANDLE).expect("cached capabilities");
    assert_eq!(stored.num_antennas, 4);
    assert_eq!(stored.max_antenna_paths, 4);
    assert!(pair.central.poll_pdu().is_none());
}

/// Test an FAE read against a peer without a table
#[test]
fn test_fae_table_unsupported_by_peer() {
    init_test_logging();
    let mut pair = LinkPair::new();

    let event = pair.command(Side::Central, HciCommand::ReadRemoteFaeTable { handle: HANDLE });
    assert_eq!(command_status(&event), HciStatus::Success);

    assert!(pair.central_events.iter().any(|e| matches!(
        e,
        HciEvent::RemoteFaeTableComplete {
            status: HciStatus::UnsupportedRemoteFeature,
            ..
        }
    )));
    assert_eq!(pair.central.state(HANDLE), Some(CsState::Idle));

    // Once the capabilities say so, the controller refuses locally
    pair.exchange_capabilities();
    let event = pair.command(Side::Central, HciCommand::ReadRemoteFaeTable { handle: HANDLE });
    assert_eq!(command_status(&event), HciStatus::UnsupportedRemoteFeature);
}

/// Test an FAE read against a peer with a table
#[test]
fn test_fae_table_read() {
    init_test_logging();
    let mut peripheral = ControllerConfig::default();
    peripheral.capabilities.no_fae = false;
    let mut pair = LinkPair::with_configs(ControllerConfig::default(), peripheral);

    pair.exchange_capabilities();
    let event = pair.command(Side::Central, HciCommand::ReadRemoteFaeTable { handle: HANDLE });
    assert_eq!(command_status(&event), HciStatus::Success);

    assert!(pair.central_events.iter().any(|e| matches!(
        e,
        HciEvent::RemoteFaeTableComplete {
            status: HciStatus::Success,
            table,
            ..
        } if *table == FaeTable::default()
    )));
}
