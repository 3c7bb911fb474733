//! Integration test framework for the LE Channel Sounding stack
#![allow(missing_docs)]
//!
//! This crate wires two controllers together over a simulated connection
//! and drives them the way a host and a baseband would.
//!
//! # Components
//!
//! - [`harness`] - central/peripheral pair with PDU delivery and event time
//! - [`mock_radio`] - radio driver with sync-loss injection
//! - [`test_utils`] - logging setup and event filters
//!
//! # Test Categories
//!
//! 1. **Capability exchange** - capabilities and FAE table reads
//! 2. **Security** - DRBG instantiation on both sides
//! 3. **Configuration** - create, repeat and remove
//! 4. **Procedures** - enable, results, termination, sync loss
//! 5. **Negotiation** - collisions, timeouts, channel map updates
//! 6. **HCI boundary** - packet decoding and event encoding

pub mod harness;
pub mod mock_radio;
pub mod test_utils;

pub use harness::{Controller, LinkPair, Side, CONN_INTERVAL_UNITS, HANDLE};
pub use mock_radio::{MockRadio, SlotLog};
pub use test_utils::{
    all_steps, command_status, config_completes, enable_completes, init_test_logging,
    procedure_done_statuses, subevent_results,
};
