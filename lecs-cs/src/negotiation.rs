//! Negotiation state
//!
//! Per-connection negotiation runs at most one CS link-layer procedure at a
//! time. This module holds the pending-request bookkeeping and the collision
//! rules; the handlers that drive it live in the controller.
//!
//! # States
//!
//! | State | Meaning |
//! |-------|---------|
//! | Idle | nothing pending, no procedure running |
//! | CapabilityExchangePending | CS_CAPABILITIES_REQ sent |
//! | SecurityPending | CS_SEC_REQ sent |
//! | ConfigPending | CS_CONFIG_REQ sent |
//! | ProcedureParamsPending | parameters set, waiting for the host to enable |
//! | StartPending | CS_REQ sent |
//! | ActiveMeasurement | procedures running |
//! | TerminatePending | CS_TERMINATE_REQ sent |

use std::fmt;

use lecs_common::{ConfigSpec, HciStatus, LlTime, ProcedureParams, Role};
use lecs_pdu::{ConfigAction, Opcode, SecurityVectors};

/// Negotiation state of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum CsState {
    /// Nothing in progress
    #[default]
    Idle,
    /// Waiting for the peer's capabilities
    CapabilityExchangePending,
    /// Waiting for the peer's security vectors
    SecurityPending,
    /// Waiting for the peer to accept a configuration
    ConfigPending,
    /// Procedure parameters set, procedures not enabled
    ProcedureParamsPending,
    /// Waiting for the peer to accept a procedure start
    StartPending,
    /// Procedures running
    ActiveMeasurement,
    /// Waiting for the peer to confirm termination
    TerminatePending,
}

impl CsState {
    /// True if a request to the peer is outstanding
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            CsState::CapabilityExchangePending
                | CsState::SecurityPending
                | CsState::ConfigPending
                | CsState::StartPending
                | CsState::TerminatePending
        )
    }
}

impl fmt::Display for CsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CsState::Idle => "IDLE",
            CsState::CapabilityExchangePending => "CAPS_PENDING",
            CsState::SecurityPending => "SEC_PENDING",
            CsState::ConfigPending => "CONFIG_PENDING",
            CsState::ProcedureParamsPending => "PARAMS_PENDING",
            CsState::StartPending => "START_PENDING",
            CsState::ActiveMeasurement => "ACTIVE",
            CsState::TerminatePending => "TERMINATE_PENDING",
        };
        write!(f, "{name}")
    }
}

/// Request waiting for the peer's answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingKind {
    /// CS_CAPABILITIES_REQ; `host` is set when the host asked for it
    Capabilities {
        /// Report completion to the host
        host: bool,
    },
    /// CS_FAE_REQ
    FaeTable,
    /// CS_SEC_REQ with the local half of the vectors
    Security {
        /// Local half
        local: SecurityVectors,
    },
    /// CS_CONFIG_REQ
    Config {
        /// Requested content, local role
        spec: ConfigSpec,
        /// Create or remove
        action: ConfigAction,
    },
    /// CS_REQ
    Start {
        /// Proposal
        params: ProcedureParams,
        /// Collision retries left
        retries_left: u8,
    },
    /// CS_TERMINATE_REQ
    Terminate {
        /// Configuration of the running series
        config_id: u8,
        /// Local step count at the time of the request
        step_count: u16,
    },
}

impl PendingKind {
    /// Opcode of the request that opened this procedure
    pub fn request_opcode(&self) -> Opcode {
        match self {
            PendingKind::Capabilities { .. } => Opcode::CsCapabilitiesReq,
            PendingKind::FaeTable => Opcode::CsFaeReq,
            PendingKind::Security { .. } => Opcode::CsSecReq,
            PendingKind::Config { .. } => Opcode::CsConfigReq,
            PendingKind::Start { .. } => Opcode::CsReq,
            PendingKind::Terminate { .. } => Opcode::CsTerminateReq,
        }
    }

    /// Opcode that answers this request on a link with the given local role
    pub fn response_opcode(&self, link_role: Role) -> Opcode {
        match self {
            PendingKind::Capabilities { .. } => Opcode::CsCapabilitiesRsp,
            PendingKind::FaeTable => Opcode::CsFaeRsp,
            PendingKind::Security { .. } => Opcode::CsSecRsp,
            PendingKind::Config { .. } => Opcode::CsConfigRsp,
            PendingKind::Start { .. } => match link_role {
                Role::Central => Opcode::CsRsp,
                Role::Peripheral => Opcode::CsInd,
            },
            PendingKind::Terminate { .. } => Opcode::CsTerminateRsp,
        }
    }

    /// Configuration the request is about, if any
    pub fn config_id(&self) -> Option<u8> {
        match self {
            PendingKind::Config { spec, .. } => Some(spec.config_id),
            PendingKind::Start { params, .. } => Some(params.config_id),
            PendingKind::Terminate { config_id, .. } => Some(*config_id),
            _ => None,
        }
    }

    /// State while this request is outstanding
    pub fn state(&self) -> CsState {
        match self {
            PendingKind::Capabilities { .. } | PendingKind::FaeTable => {
                CsState::CapabilityExchangePending
            }
            PendingKind::Security { .. } => CsState::SecurityPending,
            PendingKind::Config { .. } => CsState::ConfigPending,
            PendingKind::Start { .. } => CsState::StartPending,
            PendingKind::Terminate { .. } => CsState::TerminatePending,
        }
    }

    /// Capability and FAE reads never collide with other procedures
    pub fn is_informational(&self) -> bool {
        matches!(self, PendingKind::Capabilities { .. } | PendingKind::FaeTable)
    }
}

/// Outstanding request and when it was sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending {
    /// What was requested
    pub kind: PendingKind,
    /// When the request went out
    pub sent_at: LlTime,
}

impl Pending {
    /// Creates a pending request sent at `now`
    pub fn new(kind: PendingKind, now: LlTime) -> Self {
        Self { kind, sent_at: now }
    }

    /// True once the response timeout has elapsed
    pub fn timed_out(&self, now: LlTime, timeout_us: u64) -> bool {
        now.since(self.sent_at) >= timeout_us
    }
}

/// How to treat a request from the peer given the local pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionAction {
    /// No conflict
    Proceed,
    /// Local side is the peripheral: drop the local request and serve the
    /// peer's. The status is what a displaced procedure enable retries on.
    Yield(HciStatus),
    /// Refuse the peer's request with this status
    Reject(HciStatus),
}

/// Collision rule for an incoming request.
///
/// Capability and FAE reads, and terminations, are always served. On any
/// other conflict the central keeps its own request and the peripheral
/// gives way.
pub fn on_incoming(link_role: Role, pending: Option<&PendingKind>, incoming: Opcode) -> CollisionAction {
    let Some(pending) = pending else {
        return CollisionAction::Proceed;
    };
    if matches!(
        incoming,
        Opcode::CsCapabilitiesReq | Opcode::CsFaeReq | Opcode::CsTerminateReq
    ) || pending.is_informational()
    {
        return CollisionAction::Proceed;
    }
    let status = if pending.request_opcode() == incoming {
        HciStatus::LlProcedureCollision
    } else {
        HciStatus::DifferentTransactionCollision
    };
    match link_role {
        Role::Central => CollisionAction::Reject(status),
        Role::Peripheral => CollisionAction::Yield(status),
    }
}

/// True if a rejection status allows the procedure enable to be retried
pub fn is_retryable(status: HciStatus) -> bool {
    matches!(
        status,
        HciStatus::LlProcedureCollision | HciStatus::DifferentTransactionCollision
    )
}
