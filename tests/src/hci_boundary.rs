//! HCI boundary integration tests
//!
//! Tests command packets from the host and event packets to the host,
//! including result events split under the event payload limit.

use integration_tests::{init_test_logging, LinkPair, HANDLE};
use lecs_common::{Capabilities, ConfigSpec, ControllerConfig, HciStatus, LlTime, PreferredParams};
use lecs_pdu::hci::{decode_event, encode_command, encode_event, HciCommand, HciEvent, ReturnParams};

/// Test a command packet answered with a command complete
#[test]
fn test_read_local_capabilities_packet() {
    init_test_logging();
    let mut pair = LinkPair::new();

    let packet = encode_command(&HciCommand::ReadLocalSupportedCapabilities);
    let event = pair
        .central
        .host_packet(&packet, LlTime::ZERO)
        .expect("command decodes");
    match event {
        HciEvent::CommandComplete { status, params, .. } => {
            assert_eq!(status, HciStatus::Success);
            assert_eq!(params, ReturnParams::LocalCapabilities(Capabilities::default()));
        }
        other => panic!("Expected command complete, got {other:?}"),
    }
}

/// Test that an asynchronous command packet gets a command status
#[test]
fn test_async_command_packet() {
    init_test_logging();
    let mut pair = LinkPair::new();

    let packet = encode_command(&HciCommand::ReadRemoteSupportedCapabilities { handle: HANDLE });
    let event = pair
        .central
        .host_packet(&packet, LlTime::ZERO)
        .expect("command decodes");
    assert!(matches!(
        event,
        HciEvent::CommandStatus {
            status: HciStatus::Success,
            ..
        }
    ));
    assert!(pair.central.poll_pdu().is_some());
}

/// Test malformed command packets
#[test]
fn test_malformed_command_packets() {
    init_test_logging();
    let mut pair = LinkPair::new();

    assert!(pair.central.host_packet(&[0x89], LlTime::ZERO).is_err());
    assert!(pair.central.host_packet(&[0xFF, 0xFF, 0x00], LlTime::ZERO).is_err());

    // Declared length shorter than the parameters
    let mut packet =
        encode_command(&HciCommand::ReadRemoteSupportedCapabilities { handle: HANDLE }).to_vec();
    packet[2] = 1;
    assert!(pair.central.host_packet(&packet, LlTime::ZERO).is_err());
    assert!(pair.central.poll_pdu().is_none());
}

/// Test that queued events leave as decodable packets
#[test]
fn test_event_packets_decode() {
    init_test_logging();
    let mut pair = LinkPair::new();

    pair.command_deferred(
        integration_tests::Side::Central,
        HciCommand::ReadRemoteSupportedCapabilities { handle: HANDLE },
    );
    let (handle, req) = pair.central.poll_pdu().expect("capabilities request");
    pair.peripheral
        .on_pdu(handle, &req, LlTime::ZERO)
        .expect("peripheral accepts request");
    let (handle, rsp) = pair.peripheral.poll_pdu().expect("capabilities response");
    pair.central
        .on_pdu(handle, &rsp, LlTime::ZERO)
        .expect("central accepts response");

    let packet = pair.central.poll_event_packet().expect("event queued");
    assert_eq!(packet[0], 0x3E);
    assert_eq!(usize::from(packet[1]), packet.len() - 2);
    match decode_event(&packet) {
        Ok(HciEvent::RemoteCapabilitiesComplete { status, handle, .. }) => {
            assert_eq!(status, HciStatus::Success);
            assert_eq!(handle, HANDLE);
        }
        other => panic!("Expected capabilities complete, got {other:?}"),
    }
    assert!(pair.central.poll_event_packet().is_none());
}

/// Test that every event of a procedure run fits the payload limit and
/// survives the packet boundary
#[test]
fn test_result_events_respect_payload_limit() {
    init_test_logging();
    let limit = 40;
    let central = ControllerConfig {
        max_event_payload: limit,
        ..ControllerConfig::default()
    };
    let mut pair = LinkPair::with_configs(central, ControllerConfig::default());
    pair.start_procedures(ConfigSpec::default(), PreferredParams::default());
    pair.run_conn_events(20);

    let results: Vec<&HciEvent> = pair
        .central_events
        .iter()
        .filter(|e| {
            matches!(
                e,
                HciEvent::SubeventResult(_) | HciEvent::SubeventResultContinue(_)
            )
        })
        .collect();
    assert!(results.len() > 1);
    for event in results {
        assert!(event.param_len() <= limit, "{} too long", event.name());
        let packet = encode_event(event);
        assert_eq!(packet.len(), 2 + event.param_len());
        assert_eq!(decode_event(&packet).as_ref(), Ok(event));
    }
}
