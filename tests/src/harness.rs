//! Two-controller link harness
//!
//! Connects a central and a peripheral [`CsController`] over one simulated
//! ACL connection. Control PDUs are delivered immediately; time advances
//! one connection event at a time.

use bytes::Bytes;
use lecs_common::{
    ConfigSpec, ConnHandle, ConnTiming, ControllerConfig, HciStatus, LlTime, PreferredParams, Role,
};
use lecs_cs::CsController;
use lecs_pdu::hci::{CreateConfig, HciCommand, HciEvent, ProcedureEnable, SetProcedureParameters};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::mock_radio::MockRadio;
use crate::test_utils::command_status;

/// Connection handle used on both sides
pub const HANDLE: ConnHandle = ConnHandle(0x0040);

/// 30 ms connection interval
pub const CONN_INTERVAL_UNITS: u16 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Central,
    Peripheral,
}

pub type Controller = CsController<MockRadio, StdRng>;

pub struct LinkPair {
    pub central: Controller,
    pub peripheral: Controller,
    pub timing: ConnTiming,
    pub counter: u16,
    pub now: LlTime,
    pub central_events: Vec<HciEvent>,
    pub peripheral_events: Vec<HciEvent>,
    /// PDUs sent by the peripheral are discarded while set
    pub mute_peripheral: bool,
    pub dropped: Vec<Bytes>,
}

impl Default for LinkPair {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkPair {
    pub fn new() -> Self {
        Self::with_configs(ControllerConfig::default(), ControllerConfig::default())
    }

    pub fn with_configs(central: ControllerConfig, peripheral: ControllerConfig) -> Self {
        let timing = ConnTiming::from_units(CONN_INTERVAL_UNITS, 0, LlTime::ZERO);
        let mut central = CsController::with_rng(central, MockRadio::new(), StdRng::seed_from_u64(0xC5));
        let mut peripheral =
            CsController::with_rng(peripheral, MockRadio::new(), StdRng::seed_from_u64(0x5C));
        central
            .connection_created(HANDLE, Role::Central, timing)
            .expect("central connection");
        peripheral
            .connection_created(HANDLE, Role::Peripheral, timing)
            .expect("peripheral connection");
        Self {
            central,
            peripheral,
            timing,
            counter: 0,
            now: LlTime::ZERO,
            central_events: Vec::new(),
            peripheral_events: Vec::new(),
            mute_peripheral: false,
            dropped: Vec::new(),
        }
    }

    pub fn controller(&mut self, side: Side) -> &mut Controller {
        match side {
            Side::Central => &mut self.central,
            Side::Peripheral => &mut self.peripheral,
        }
    }

    pub fn events(&self, side: Side) -> &[HciEvent] {
        match side {
            Side::Central => &self.central_events,
            Side::Peripheral => &self.peripheral_events,
        }
    }

    pub fn take_events(&mut self, side: Side) -> Vec<HciEvent> {
        match side {
            Side::Central => std::mem::take(&mut self.central_events),
            Side::Peripheral => std::mem::take(&mut self.peripheral_events),
        }
    }

    /// Runs a host command and delivers the resulting PDUs
    pub fn command(&mut self, side: Side, cmd: HciCommand) -> HciEvent {
        let event = self.command_deferred(side, cmd);
        self.pump();
        event
    }

    /// Runs a host command without delivering its PDUs
    pub fn command_deferred(&mut self, side: Side, cmd: HciCommand) -> HciEvent {
        let now = self.now;
        self.controller(side).host_command(&cmd, now)
    }

    /// Delivers queued PDUs in both directions until both queues are empty
    pub fn pump(&mut self) {
        loop {
            let mut moved = false;
            while let Some((handle, pdu)) = self.central.poll_pdu() {
                moved = true;
                self.peripheral
                    .on_pdu(handle, &pdu, self.now)
                    .expect("peripheral accepts PDU");
            }
            while let Some((handle, pdu)) = self.peripheral.poll_pdu() {
                moved = true;
                if self.mute_peripheral {
                    self.dropped.push(pdu);
                    continue;
                }
                self.central
                    .on_pdu(handle, &pdu, self.now)
                    .expect("central accepts PDU");
            }
            if !moved {
                break;
            }
        }
        while let Some(event) = self.central.poll_event() {
            self.central_events.push(event);
        }
        while let Some(event) = self.peripheral.poll_event() {
            self.peripheral_events.push(event);
        }
    }

    /// Advances both sides to the next ACL connection event and runs every
    /// subevent that came due
    pub fn next_conn_event(&mut self) {
        self.counter = self.counter.wrapping_add(1);
        self.now = self.timing.anchor_of(self.counter);
        let (counter, now) = (self.counter, self.now);
        self.central
            .conn_event(HANDLE, counter, now)
            .expect("central connection event");
        self.peripheral
            .conn_event(HANDLE, counter, now)
            .expect("peripheral connection event");
        self.pump();
        self.central.on_tick(now);
        self.peripheral.on_tick(now);
        self.pump();
    }

    pub fn run_conn_events(&mut self, count: usize) {
        for _ in 0..count {
            self.next_conn_event();
        }
    }

    /// Moves time without a connection event
    pub fn advance_to(&mut self, now: LlTime) {
        self.now = now;
        self.central.on_tick(now);
        self.peripheral.on_tick(now);
        self.pump();
    }

    // ========================================================================
    // Setup sequences
    // ========================================================================

    pub fn exchange_capabilities(&mut self) {
        let event = self.command(
            Side::Central,
            HciCommand::ReadRemoteSupportedCapabilities { handle: HANDLE },
        );
        assert_eq!(command_status(&event), HciStatus::Success);
    }

    pub fn enable_security(&mut self) {
        let event = self.command(Side::Central, HciCommand::SecurityEnable { handle: HANDLE });
        assert_eq!(command_status(&event), HciStatus::Success);
    }

    pub fn create_config(&mut self, spec: ConfigSpec) {
        let event = self.command(
            Side::Central,
            HciCommand::CreateConfig(CreateConfig {
                handle: HANDLE,
                create_context: 1,
                spec,
            }),
        );
        assert_eq!(command_status(&event), HciStatus::Success);
    }

    pub fn set_params(&mut self, side: Side, config_id: u8, params: PreferredParams) {
        let event = self.command(
            side,
            HciCommand::SetProcedureParameters(SetProcedureParameters {
                handle: HANDLE,
                config_id,
                params,
            }),
        );
        assert_eq!(command_status(&event), HciStatus::Success);
    }

    pub fn set_enable(&mut self, side: Side, config_id: u8, enable: bool) -> HciEvent {
        self.command(
            side,
            HciCommand::ProcedureEnable(ProcedureEnable {
                handle: HANDLE,
                config_id,
                enable,
            }),
        )
    }

    /// Capabilities, security and one configuration, ready for procedures
    pub fn prepare(&mut self, spec: ConfigSpec) {
        self.exchange_capabilities();
        self.enable_security();
        self.create_config(spec);
    }

    /// Prepares the link and enables procedures from the central
    pub fn start_procedures(&mut self, spec: ConfigSpec, params: PreferredParams) {
        let config_id = spec.config_id;
        self.prepare(spec);
        self.set_params(Side::Central, config_id, params);
        let event = self.set_enable(Side::Central, config_id, true);
        assert_eq!(command_status(&event), HciStatus::Success);
    }
}
