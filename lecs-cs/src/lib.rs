//! LE Channel Sounding procedure engine
//!
//! This crate provides:
//! - configuration and procedure parameter rules ([`config`], [`params`],
//!   [`capabilities`])
//! - the step and subevent generator driven by the CS DRBG ([`generator`],
//!   [`step`])
//! - slot-by-slot execution against a radio driver ([`procedure`], [`radio`])
//! - HCI result reporting ([`results`])
//! - the per-connection negotiation engine, [`CsController`]

pub mod capabilities;
pub mod config;
pub mod controller;
pub mod error;
pub mod generator;
pub mod negotiation;
pub mod params;
pub mod procedure;
pub mod radio;
pub mod results;
pub mod step;

pub use config::{ConfigSlot, ConfigStore};
pub use controller::{CsController, MAP_UPDATE_LEAD_EVENTS};
pub use error::{CsError, Result};
pub use generator::{Boundary, Generator, Layout, SubeventPlan};
pub use negotiation::CsState;
pub use procedure::{run_subevent, Series, SubeventRun};
pub use radio::{CsRadio, SlotOutcome, SlotReport, SlotRequest, ToneSample};
pub use step::{SlotKind, Step, StepTiming};
