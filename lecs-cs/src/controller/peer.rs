//! Control PDU handling
//!
//! Requests from the peer first go through the collision rule, responses
//! are matched against the pending request and dropped when they answer
//! nothing. Replays of an already applied response are ignored, which
//! keeps every handler idempotent.

use rand::RngCore;
use tracing::{debug, info, warn};

use lecs_common::logging::{log_pdu, Direction};
use lecs_common::{
    Capabilities, ConnHandle, CsRole, FaeTable, HciStatus, LlTime, ProcedureParams, Role,
};
use lecs_crypto::DrbgContext;
use lecs_pdu::hci::{ConfigComplete, HciEvent, ProcedureAbortReason};
use lecs_pdu::{
    ChannelMapInd, ConfigAction, ConfigReq, ControlPdu, CsInd, CsRsp, Opcode, RejectExt,
    SecurityVectors, Terminate,
};

use super::host::security_half;
use super::link::{enable_complete, instant_reached, Link, Outputs};
use super::{CsController, Env};
use crate::capabilities::clamp_remote;
use crate::config::{check_support, validate_rules};
use crate::negotiation::{on_incoming, CollisionAction, Pending, PendingKind};
use crate::params::{resolve, Resolution, START_LEAD_EVENTS};
use crate::radio::CsRadio;

/// Fewest ACL events between an indication and the first procedure
const MIN_START_LEAD_EVENTS: u16 = 2;

/// Configuration a request targets, for collision bookkeeping
fn request_config_id(pdu: &ControlPdu) -> Option<u8> {
    match pdu {
        ControlPdu::CsConfigReq(req) => Some(req.spec.config_id),
        ControlPdu::CsReq(params) => Some(params.config_id),
        ControlPdu::CsTerminateReq(t) => Some(t.config_id),
        _ => None,
    }
}

fn is_request(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::CsSecReq
            | Opcode::CsCapabilitiesReq
            | Opcode::CsConfigReq
            | Opcode::CsReq
            | Opcode::CsTerminateReq
            | Opcode::CsFaeReq
    )
}

/// True once the ACL counter is past `instant`
fn instant_passed(counter: u16, instant: u16) -> bool {
    counter != instant && instant_reached(counter, instant)
}

fn rsp_from(params: &ProcedureParams) -> CsRsp {
    CsRsp {
        config_id: params.config_id,
        conn_event_counter: params.conn_event_counter,
        offset_min: params.offset_min,
        offset_max: params.offset_max,
        event_interval: params.event_interval,
        subevents_per_event: params.subevents_per_event,
        subevent_interval: params.subevent_interval,
        subevent_len: params.subevent_len,
        aci: params.aci,
        phy: params.phy,
        pwr_delta: params.pwr_delta,
    }
}

fn ind_from(params: &ProcedureParams) -> CsInd {
    CsInd {
        config_id: params.config_id,
        conn_event_counter: params.conn_event_counter,
        offset: params.offset,
        event_interval: params.event_interval,
        subevents_per_event: params.subevents_per_event,
        subevent_interval: params.subevent_interval,
        subevent_len: params.subevent_len,
        aci: params.aci,
        phy: params.phy,
        pwr_delta: params.pwr_delta,
    }
}

/// Central side: fixes the offset and makes sure the first procedure is
/// still ahead of the current ACL event
fn finalize(params: &mut ProcedureParams, counter: u16) {
    params.offset = params.offset_min;
    let earliest = counter.wrapping_add(MIN_START_LEAD_EVENTS);
    if !instant_reached(params.conn_event_counter, earliest) {
        params.conn_event_counter = counter.wrapping_add(START_LEAD_EVENTS);
    }
}

impl<R: CsRadio, G: RngCore> CsController<R, G> {
    /// Handles a control PDU received on a connection.
    ///
    /// A PDU that does not decode is answered with a reject carrying its
    /// opcode, and the decode error is returned.
    pub fn on_pdu(&mut self, handle: ConnHandle, data: &[u8], now: LlTime) -> crate::Result<()> {
        let (owner, link, env) = self.parts(handle)?;
        let pdu = match lecs_pdu::decode(data) {
            Ok(pdu) => pdu,
            Err(e) => {
                warn!(handle = handle.0, "Undecodable control PDU: {e}");
                if let Some(&opcode) = data.first() {
                    let reject = ControlPdu::RejectExtInd(RejectExt {
                        opcode,
                        error: e.status(),
                    });
                    link.send(env.out, reject);
                }
                return Err(e.into());
            }
        };
        log_pdu(Direction::Rx, pdu.name(), data);

        let opcode = pdu.opcode();
        if is_request(opcode) {
            let pending = link.pending.as_ref().map(|p| &p.kind);
            match on_incoming(link.role, pending, opcode) {
                CollisionAction::Proceed => {}
                CollisionAction::Reject(status) => {
                    debug!(handle = handle.0, request = %opcode, %status, "Collision, rejecting peer request");
                    link.send(env.out, ControlPdu::reject(opcode, status));
                    return Ok(());
                }
                CollisionAction::Yield(status) => {
                    if let Some(own) = link.pending.take() {
                        debug!(handle = handle.0, own = %own.kind.request_opcode(), peer = %opcode, "Collision, yielding");
                        link.yielded = Some(own.kind.request_opcode());
                        let superseded = own.kind.request_opcode() == opcode
                            && own.kind.config_id() == request_config_id(&pdu);
                        // Only a displaced procedure enable comes back, as a retry
                        if !superseded && matches!(own.kind, PendingKind::Start { .. }) {
                            link.fail_pending(env.out, own, status, true);
                        }
                    }
                }
            }
        }

        match pdu {
            ControlPdu::RejectExtInd(reject) => on_reject(link, env, reject),
            ControlPdu::CsCapabilitiesReq(caps) => {
                link.remote_caps = Some(clamp_remote(&caps));
                link.send(env.out, ControlPdu::CsCapabilitiesRsp(env.config.capabilities));
            }
            ControlPdu::CsCapabilitiesRsp(caps) => on_capabilities_rsp(link, env, caps),
            ControlPdu::CsFaeReq => {
                if env.config.capabilities.no_fae {
                    link.send(
                        env.out,
                        ControlPdu::reject(Opcode::CsFaeReq, HciStatus::UnsupportedRemoteFeature),
                    );
                } else {
                    link.send(env.out, ControlPdu::CsFaeRsp(FaeTable::default()));
                }
            }
            ControlPdu::CsFaeRsp(table) => {
                if link.take_pending_for(Opcode::CsFaeRsp).is_some() {
                    link.remote_fae = Some(table);
                    env.out.event(HciEvent::RemoteFaeTableComplete {
                        status: HciStatus::Success,
                        handle,
                        table,
                    });
                }
            }
            ControlPdu::CsSecReq(central) => on_security_req(link, env, central),
            ControlPdu::CsSecRsp(peripheral) => on_security_rsp(link, env, peripheral),
            ControlPdu::CsConfigReq(req) => on_config_req(link, env, req),
            ControlPdu::CsConfigRsp { config_id } => on_config_rsp(link, env, config_id),
            ControlPdu::CsReq(params) => on_cs_req(link, env, owner, params, now),
            ControlPdu::CsRsp(rsp) => on_cs_rsp(link, env, owner, rsp),
            ControlPdu::CsInd(ind) => on_cs_ind(link, env, owner, ind),
            ControlPdu::CsTerminateReq(t) => on_terminate_req(link, env, t),
            ControlPdu::CsTerminateRsp(t) => on_terminate_rsp(link, env, t),
            ControlPdu::CsChannelMapInd(ind) => on_channel_map_ind(link, env, ind, now),
        }
        Ok(())
    }
}

// ============================================================================
// Rejections and informational exchanges
// ============================================================================

fn on_reject<G>(link: &mut Link, env: Env<'_, G>, reject: RejectExt) {
    if link.yielded.map(|op| op as u8) == Some(reject.opcode) {
        link.yielded = None;
        debug!(handle = link.handle.0, opcode = reject.opcode, "Reject of a yielded request");
        return;
    }
    let matches = link
        .pending
        .as_ref()
        .map(|p| p.kind.request_opcode() as u8 == reject.opcode)
        .unwrap_or(false);
    match link.pending.take() {
        Some(pending) if matches => link.fail_pending(env.out, pending, reject.error, true),
        other => {
            link.pending = other;
            debug!(handle = link.handle.0, opcode = reject.opcode, "Reject matches no request");
        }
    }
}

fn on_capabilities_rsp<G>(link: &mut Link, env: Env<'_, G>, caps: Capabilities) {
    let Some(pending) = link.take_pending_for(Opcode::CsCapabilitiesRsp) else {
        debug!(handle = link.handle.0, "Unsolicited capabilities response");
        return;
    };
    let clamped = clamp_remote(&caps);
    link.remote_caps = Some(clamped);
    info!(handle = link.handle.0, antennas = clamped.num_antennas, configs = clamped.num_configs, "Remote capabilities received");
    if matches!(pending.kind, PendingKind::Capabilities { host: true }) {
        env.out.event(HciEvent::RemoteCapabilitiesComplete {
            status: HciStatus::Success,
            handle: link.handle,
            caps: clamped,
        });
    }
}

// ============================================================================
// Security
// ============================================================================

fn instantiate(central: &SecurityVectors, peripheral: &SecurityVectors) -> crate::Result<DrbgContext> {
    let (iv, instantiation_nonce, pv) = SecurityVectors::combine(central, peripheral);
    Ok(DrbgContext::new(&iv, &instantiation_nonce, &pv)?)
}

fn on_security_req<G: RngCore>(link: &mut Link, env: Env<'_, G>, central: SecurityVectors) {
    if link.role != Role::Peripheral || link.series.is_some() {
        link.send(
            env.out,
            ControlPdu::reject(Opcode::CsSecReq, HciStatus::CommandDisallowed),
        );
        return;
    }
    let local = security_half(env.rng);
    let status = match instantiate(&central, &local) {
        Ok(drbg) => {
            link.drbg = Some(drbg);
            link.send(env.out, ControlPdu::CsSecRsp(local));
            info!(handle = link.handle.0, "CS security enabled");
            HciStatus::Success
        }
        Err(e) => {
            warn!(handle = link.handle.0, "DRBG instantiation failed: {e}");
            link.send(env.out, ControlPdu::reject(Opcode::CsSecReq, e.status()));
            e.status()
        }
    };
    env.out.event(HciEvent::SecurityEnableComplete {
        status,
        handle: link.handle,
    });
}

fn on_security_rsp<G>(link: &mut Link, env: Env<'_, G>, peripheral: SecurityVectors) {
    let Some(pending) = link.take_pending_for(Opcode::CsSecRsp) else {
        return;
    };
    let PendingKind::Security { local } = pending.kind else {
        return;
    };
    let status = match instantiate(&local, &peripheral) {
        Ok(drbg) => {
            link.drbg = Some(drbg);
            info!(handle = link.handle.0, "CS security enabled");
            HciStatus::Success
        }
        Err(e) => {
            warn!(handle = link.handle.0, "DRBG instantiation failed: {e}");
            e.status()
        }
    };
    env.out.event(HciEvent::SecurityEnableComplete {
        status,
        handle: link.handle,
    });
}

// ============================================================================
// Configurations
// ============================================================================

fn on_config_req<G>(link: &mut Link, env: Env<'_, G>, req: ConfigReq) {
    let handle = link.handle;
    let config_id = req.spec.config_id;

    if req.action == ConfigAction::Remove {
        match link.configs.get(config_id).map(|slot| slot.in_use) {
            None => link.send(env.out, ControlPdu::CsConfigRsp { config_id }),
            Some(true) => reject_config(link, env.out, config_id, HciStatus::CommandDisallowed),
            Some(false) => {
                if let Ok(slot) = link.configs.remove(config_id) {
                    link.send(env.out, ControlPdu::CsConfigRsp { config_id });
                    env.out.event(HciEvent::ConfigComplete(ConfigComplete {
                        status: HciStatus::Success,
                        handle,
                        action: ConfigAction::Remove,
                        spec: slot.spec,
                    }));
                }
            }
        }
        return;
    }

    let Some(remote) = link.remote_caps else {
        reject_config(link, env.out, config_id, HciStatus::CommandDisallowed);
        return;
    };
    let local_caps = env.config.capabilities;
    let spec = match validate_rules(&req.spec.for_peer()) {
        Ok(spec) => spec,
        Err(v) => {
            reject_config(link, env.out, config_id, v.remote_status());
            return;
        }
    };
    if let Err(v) = check_support(&spec, &local_caps, &remote, &link.settings) {
        reject_config(link, env.out, config_id, v.remote_status());
        return;
    }
    let duplicate = link.configs.is_duplicate(&spec);
    let limit = local_caps.num_configs.min(remote.num_configs);
    if let Err(e) = link.configs.store(spec, limit) {
        reject_config(link, env.out, config_id, e.status());
        return;
    }
    link.send(env.out, ControlPdu::CsConfigRsp { config_id });
    if duplicate {
        debug!(handle = handle.0, config_id, "Configuration unchanged");
        return;
    }
    info!(handle = handle.0, config_id, role = %spec.role, "Configuration created by peer");
    env.out.event(HciEvent::ConfigComplete(ConfigComplete {
        status: HciStatus::Success,
        handle,
        action: ConfigAction::Create,
        spec,
    }));
}

fn reject_config(link: &Link, out: &mut Outputs, config_id: u8, status: HciStatus) {
    debug!(handle = link.handle.0, config_id, %status, "Configuration request rejected");
    link.send(out, ControlPdu::reject(Opcode::CsConfigReq, status));
}

fn on_config_rsp<G>(link: &mut Link, env: Env<'_, G>, config_id: u8) {
    let answers = matches!(
        &link.pending,
        Some(p) if matches!(p.kind, PendingKind::Config { .. }) && p.kind.config_id() == Some(config_id)
    );
    if !answers {
        debug!(handle = link.handle.0, config_id, "Configuration response matches no request");
        return;
    }
    let Some(PendingKind::Config { spec, action }) = link.pending.take().map(|p| p.kind) else {
        return;
    };
    let result = match action {
        ConfigAction::Create => {
            let limit = link
                .remote_caps
                .map_or(0, |remote| remote.num_configs)
                .min(env.config.capabilities.num_configs);
            link.configs.store(spec, limit).map(|()| spec)
        }
        ConfigAction::Remove => link.configs.remove(config_id).map(|slot| slot.spec),
    };
    let (status, spec) = match result {
        Ok(stored) => (HciStatus::Success, stored),
        Err(e) => (e.status(), spec),
    };
    info!(handle = link.handle.0, config_id, ?action, %status, "Configuration procedure complete");
    env.out.event(HciEvent::ConfigComplete(ConfigComplete {
        status,
        handle: link.handle,
        action,
        spec,
    }));
}

// ============================================================================
// Procedure start
// ============================================================================

/// Checks that a procedure can start on a configuration; yields the local
/// CS role and the remote capabilities
fn can_start(link: &Link, config_id: u8) -> Result<(CsRole, Capabilities), HciStatus> {
    let slot = link
        .configs
        .get(config_id)
        .ok_or(HciStatus::InvalidLlParameters)?;
    if slot.in_use || link.series.is_some() {
        return Err(HciStatus::CommandDisallowed);
    }
    let remote = link.remote_caps.ok_or(HciStatus::CommandDisallowed)?;
    if link.drbg.is_none() {
        return Err(HciStatus::CommandDisallowed);
    }
    Ok((slot.role(), remote))
}

fn start_series<G>(link: &mut Link, env: Env<'_, G>, owner: u32, params: ProcedureParams) {
    if let Err(e) = link.activate(env.out, env.sched, env.config, params, owner) {
        warn!(handle = link.handle.0, config_id = params.config_id, "Procedures not started: {e}");
        env.out
            .event(enable_complete(link.handle, e.status(), params.config_id, 0, None, 0));
    }
}

fn on_cs_req<G>(link: &mut Link, env: Env<'_, G>, owner: u32, req: ProcedureParams, now: LlTime) {
    let (role, remote) = match can_start(link, req.config_id) {
        Ok(found) => found,
        Err(status) => {
            link.send(env.out, ControlPdu::reject(Opcode::CsReq, status));
            return;
        }
    };
    let resolution = resolve(&req, role, &env.config.capabilities, &remote);

    match (link.role, resolution) {
        (_, Resolution::Rejected(status)) => {
            link.send(env.out, ControlPdu::reject(Opcode::CsReq, status));
        }
        (Role::Peripheral, Resolution::Resuggested(_)) => {
            link.send(
                env.out,
                ControlPdu::reject(Opcode::CsReq, HciStatus::UnsupportedLlParameterValue),
            );
        }
        (Role::Peripheral, Resolution::Accepted(params)) => {
            link.send(env.out, ControlPdu::CsRsp(rsp_from(&params)));
            link.pending = Some(Pending::new(
                PendingKind::Start {
                    params,
                    retries_left: 0,
                },
                now,
            ));
        }
        (Role::Central, Resolution::Accepted(mut params) | Resolution::Resuggested(mut params)) => {
            finalize(&mut params, link.counter);
            link.send(env.out, ControlPdu::CsInd(ind_from(&params)));
            start_series(link, env, owner, params);
        }
    }
}

fn on_cs_rsp<G>(link: &mut Link, env: Env<'_, G>, owner: u32, rsp: CsRsp) {
    let Some(pending) = link.take_pending_for(Opcode::CsRsp) else {
        debug!(handle = link.handle.0, "Unsolicited CS response");
        return;
    };
    let PendingKind::Start { mut params, .. } = pending.kind else {
        return;
    };
    if rsp.config_id != params.config_id {
        link.send(
            env.out,
            ControlPdu::reject(Opcode::CsRsp, HciStatus::InvalidLlParameters),
        );
        env.out.event(enable_complete(
            link.handle,
            HciStatus::InvalidLlParameters,
            params.config_id,
            0,
            None,
            0,
        ));
        return;
    }
    params.conn_event_counter = rsp.conn_event_counter;
    params.offset_min = rsp.offset_min;
    params.offset_max = rsp.offset_max;
    params.event_interval = rsp.event_interval;
    params.subevents_per_event = rsp.subevents_per_event;
    params.subevent_interval = rsp.subevent_interval;
    params.subevent_len = rsp.subevent_len;
    params.aci = rsp.aci;
    params.phy = rsp.phy;
    params.pwr_delta = rsp.pwr_delta;
    finalize(&mut params, link.counter);
    link.send(env.out, ControlPdu::CsInd(ind_from(&params)));
    start_series(link, env, owner, params);
}

fn on_cs_ind<G>(link: &mut Link, env: Env<'_, G>, owner: u32, ind: CsInd) {
    let Some(pending) = link.take_pending_for(Opcode::CsInd) else {
        debug!(handle = link.handle.0, "Unsolicited CS indication");
        return;
    };
    let PendingKind::Start { mut params, .. } = pending.kind else {
        return;
    };
    params.conn_event_counter = ind.conn_event_counter;
    params.offset = ind.offset;
    params.event_interval = ind.event_interval;
    params.subevents_per_event = ind.subevents_per_event;
    params.subevent_interval = ind.subevent_interval;
    params.subevent_len = ind.subevent_len;
    params.aci = ind.aci;
    params.phy = ind.phy;
    params.pwr_delta = ind.pwr_delta;

    if instant_passed(link.counter, ind.conn_event_counter) {
        warn!(handle = link.handle.0, instant = ind.conn_event_counter, counter = link.counter, "CS indication instant passed");
        env.out.event(enable_complete(
            link.handle,
            HciStatus::InstantPassed,
            params.config_id,
            0,
            None,
            0,
        ));
        return;
    }
    start_series(link, env, owner, params);
}

// ============================================================================
// Termination and channel map
// ============================================================================

fn on_terminate_req<G>(link: &mut Link, env: Env<'_, G>, req: Terminate) {
    let local = match &link.series {
        Some(series) if series.config_id == req.config_id => series.generator.step_counter(),
        _ => {
            let Some(slot) = link.configs.get(req.config_id) else {
                link.send(
                    env.out,
                    ControlPdu::reject(Opcode::CsTerminateReq, HciStatus::InvalidLlParameters),
                );
                return;
            };
            // Already stopped locally; reconcile the stored count
            let steps = slot.step_count.max(req.step_count);
            if let Some(slot) = link.configs.get_mut(req.config_id) {
                slot.step_count = steps;
            }
            link.send(
                env.out,
                ControlPdu::CsTerminateRsp(Terminate {
                    config_id: req.config_id,
                    step_count: steps,
                    error: HciStatus::Success,
                }),
            );
            return;
        }
    };
    link.send(
        env.out,
        ControlPdu::CsTerminateRsp(Terminate {
            config_id: req.config_id,
            step_count: local,
            error: HciStatus::Success,
        }),
    );
    if matches!(
        link.pending.as_ref().map(|p| &p.kind),
        Some(PendingKind::Terminate { .. })
    ) {
        link.pending = None;
    }
    let steps = local.max(req.step_count);
    info!(handle = link.handle.0, config_id = req.config_id, steps, reason = %req.error, "Procedures terminated by peer");
    if let Some(config_id) = link.finish_series(env.sched, steps) {
        env.out.event(enable_complete(
            link.handle,
            HciStatus::Success,
            config_id,
            0,
            None,
            0,
        ));
    }
}

fn on_terminate_rsp<G>(link: &mut Link, env: Env<'_, G>, rsp: Terminate) {
    let answers = matches!(
        link.pending.as_ref().map(|p| &p.kind),
        Some(PendingKind::Terminate { config_id, .. }) if *config_id == rsp.config_id
    );
    if !answers {
        debug!(handle = link.handle.0, config_id = rsp.config_id, "Terminate response matches no request");
        return;
    }
    let Some(PendingKind::Terminate { step_count, .. }) = link.pending.take().map(|p| p.kind) else {
        return;
    };
    let steps = step_count.max(rsp.step_count);
    match link.finish_series(env.sched, steps) {
        Some(config_id) => {
            info!(handle = link.handle.0, config_id, steps, "Procedures terminated");
            env.out.event(enable_complete(
                link.handle,
                HciStatus::Success,
                config_id,
                0,
                None,
                0,
            ));
        }
        None => {
            if let Some(slot) = link.configs.get_mut(rsp.config_id) {
                slot.step_count = slot.step_count.max(steps);
            }
        }
    }
}

fn on_channel_map_ind<G>(link: &mut Link, env: Env<'_, G>, ind: ChannelMapInd, now: LlTime) {
    if link.role != Role::Peripheral {
        debug!(handle = link.handle.0, "Channel map indication on a central link ignored");
        return;
    }
    if !ind.map.is_valid() {
        link.send(
            env.out,
            ControlPdu::reject(Opcode::CsChannelMapInd, HciStatus::InsufficientChannels),
        );
        return;
    }
    if !instant_passed(link.counter, ind.instant) {
        link.map_update = Some(ind);
        if link.series.is_none() {
            let counter = link.counter;
            link.apply_map_if_due(env.out, env.sched, counter, env.config.reference_power_level);
        }
        return;
    }

    let running = link
        .series
        .as_ref()
        .map(|s| (s.config_id, s.generator.step_counter()));
    let Some((config_id, steps)) = running else {
        link.classification = ind.map;
        return;
    };
    link.abort_series(
        env.out,
        env.sched,
        ProcedureAbortReason::InstantPassed,
        HciStatus::InstantPassed,
        env.config.reference_power_level,
    );
    if link.pending.is_none() {
        link.request(
            env.out,
            ControlPdu::CsTerminateReq(Terminate {
                config_id,
                step_count: steps,
                error: HciStatus::InstantPassed,
            }),
            PendingKind::Terminate {
                config_id,
                step_count: steps,
            },
            now,
        );
    }
    link.classification = ind.map;
}
