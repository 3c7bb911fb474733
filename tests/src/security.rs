//! Security integration tests
//!
//! Tests that the security exchange leaves both controllers with the same
//! DRBG.

use integration_tests::{command_status, init_test_logging, LinkPair, Side, HANDLE};
use lecs_common::HciStatus;
use lecs_cs::CsState;
use lecs_pdu::hci::{HciCommand, HciEvent};

fn security_statuses(events: &[HciEvent]) -> Vec<HciStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            HciEvent::SecurityEnableComplete { status, .. } => Some(*status),
            _ => None,
        })
        .collect()
}

/// Test that both sides instantiate identical DRBGs
#[test]
fn test_security_enable_matches_drbgs() {
    init_test_logging();
    let mut pair = LinkPair::new();

    assert!(pair.central.drbg(HANDLE).is_none());
    pair.enable_security();

    assert_eq!(security_statuses(&pair.central_events), vec![HciStatus::Success]);
    assert_eq!(security_statuses(&pair.peripheral_events), vec![HciStatus::Success]);

    let central = pair.central.drbg(HANDLE).expect("central DRBG");
    let peripheral = pair.peripheral.drbg(HANDLE).expect("peripheral DRBG");
    assert!(central.same_state(peripheral));
    assert_eq!(pair.central.state(HANDLE), Some(CsState::Idle));
}

/// Test that a second security exchange re-keys both sides consistently
#[test]
fn test_security_restart() {
    init_test_logging();
    let mut pair = LinkPair::new();

    pair.enable_security();
    pair.enable_security();

    assert_eq!(security_statuses(&pair.central_events).len(), 2);
    let central = pair.central.drbg(HANDLE).expect("central DRBG");
    let peripheral = pair.peripheral.drbg(HANDLE).expect("peripheral DRBG");
    assert!(central.same_state(peripheral));
}

/// Test that only the central starts the exchange
#[test]
fn test_security_enable_from_peripheral_disallowed() {
    init_test_logging();
    let mut pair = LinkPair::new();

    let event = pair.command(Side::Peripheral, HciCommand::SecurityEnable { handle: HANDLE });
    assert_eq!(command_status(&event), HciStatus::CommandDisallowed);
    assert!(pair.peripheral.drbg(HANDLE).is_none());
    assert!(pair.central_events.is_empty());
}
