//! Test utility functions for integration tests
//!
//! Provides logging setup and event filters shared by the test files.

use lecs_common::HciStatus;
use lecs_pdu::hci::{
    ConfigComplete, DoneStatus, HciEvent, ProcedureEnableComplete, StepResult, SubeventResult,
};
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize logging for tests
///
/// Uses RUST_LOG environment variable if set, otherwise defaults to "info"
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Status carried by a command complete or command status event
pub fn command_status(event: &HciEvent) -> HciStatus {
    match event {
        HciEvent::CommandComplete { status, .. } | HciEvent::CommandStatus { status, .. } => *status,
        other => panic!("expected a command response, got {}", other.name()),
    }
}

pub fn config_completes(events: &[HciEvent]) -> Vec<&ConfigComplete> {
    events
        .iter()
        .filter_map(|e| match e {
            HciEvent::ConfigComplete(c) => Some(c),
            _ => None,
        })
        .collect()
}

pub fn enable_completes(events: &[HciEvent]) -> Vec<&ProcedureEnableComplete> {
    events
        .iter()
        .filter_map(|e| match e {
            HciEvent::ProcedureEnableComplete(c) => Some(c),
            _ => None,
        })
        .collect()
}

pub fn subevent_results(events: &[HciEvent]) -> Vec<&SubeventResult> {
    events
        .iter()
        .filter_map(|e| match e {
            HciEvent::SubeventResult(r) => Some(r),
            _ => None,
        })
        .collect()
}

/// Final procedure done status of each subevent, continuation events
/// included
pub fn procedure_done_statuses(events: &[HciEvent]) -> Vec<DoneStatus> {
    let mut statuses: Vec<DoneStatus> = Vec::new();
    for event in events {
        match event {
            HciEvent::SubeventResult(r) => statuses.push(r.procedure_done),
            HciEvent::SubeventResultContinue(c) => {
                if let Some(last) = statuses.last_mut() {
                    *last = c.procedure_done;
                }
            }
            _ => {}
        }
    }
    statuses
}

/// Every step result reported, continuation events included
pub fn all_steps(events: &[HciEvent]) -> Vec<&StepResult> {
    events
        .iter()
        .flat_map(|e| match e {
            HciEvent::SubeventResult(r) => r.steps.iter(),
            HciEvent::SubeventResultContinue(c) => c.steps.iter(),
            _ => [].iter(),
        })
        .collect()
}
