//! Host command handling
//!
//! Synchronous commands answer with a command complete carrying their
//! return parameters. Asynchronous ones answer with a command status and
//! finish later through an LE meta event, usually after a control procedure
//! with the peer.

use rand::RngCore;
use tracing::{debug, info, warn};

use lecs_common::logging::{log_hci, Direction};
use lecs_common::{ChannelMap, ConnHandle, HciStatus, LlTime, Role};
use lecs_pdu::hci::{
    decode_command, ConfigComplete, CreateConfig, HciCommand, HciEvent, ProcedureEnable,
    ReturnParams, SetProcedureParameters,
};
use lecs_pdu::{ChannelMapInd, ConfigAction, ConfigReq, ControlPdu, SecurityVectors, Terminate};

use super::link::{Link, Outputs};
use super::{CsController, MAP_UPDATE_LEAD_EVENTS};
use crate::capabilities::{apply_timing, clamp_remote};
use crate::config::{check_support, validate_rules};
use crate::error::{CsError, Result};
use crate::negotiation::PendingKind;
use crate::params::{propose, validate_preferred};
use crate::radio::CsRadio;

/// Sends the host classification to the peripheral with an instant
pub(crate) fn announce_map(link: &mut Link, out: &mut Outputs, map: ChannelMap) {
    let ind = ChannelMapInd {
        map,
        instant: link.counter.wrapping_add(MAP_UPDATE_LEAD_EVENTS),
    };
    debug!(handle = link.handle.0, instant = ind.instant, channels = map.count(), "Announcing channel map");
    link.send(out, ControlPdu::CsChannelMapInd(ind));
    link.map_update = Some(ind);
}

/// Sends the CS_REQ that starts procedure negotiation
pub(crate) fn begin_enable(
    link: &mut Link,
    out: &mut Outputs,
    config_id: u8,
    retries_left: u8,
    now: LlTime,
) -> Result<()> {
    let slot = link
        .configs
        .get(config_id)
        .ok_or(CsError::invalid("unknown configuration"))?;
    let preferred = slot
        .preferred
        .ok_or(CsError::disallowed("procedure parameters not set"))?;
    if slot.in_use || link.series.is_some() {
        return Err(CsError::disallowed("procedures already enabled"));
    }
    if link.drbg.is_none() {
        return Err(CsError::disallowed("security not enabled"));
    }
    if link.pending.is_some() {
        return Err(CsError::disallowed("procedure pending"));
    }
    let params = propose(&preferred, config_id, link.counter, link.timing.interval_us);
    link.request(
        out,
        ControlPdu::CsReq(params),
        PendingKind::Start {
            params,
            retries_left,
        },
        now,
    );
    Ok(())
}

/// Local half of the security vectors
pub(crate) fn security_half<G: RngCore>(rng: &mut G) -> SecurityVectors {
    let mut half = SecurityVectors::default();
    rng.fill_bytes(&mut half.iv);
    rng.fill_bytes(&mut half.instantiation_nonce);
    rng.fill_bytes(&mut half.pv);
    half
}

impl<R: CsRadio, G: RngCore> CsController<R, G> {
    /// Runs a host command and returns its command complete or command
    /// status event. Completion events of asynchronous commands are queued.
    pub fn host_command(&mut self, cmd: &HciCommand, now: LlTime) -> HciEvent {
        let result = self.dispatch_command(cmd, now);
        let status = match &result {
            Ok(_) => HciStatus::Success,
            Err(e) => {
                warn!(command = cmd.name(), "Command failed: {e}");
                e.status()
            }
        };
        if cmd.is_async() {
            return HciEvent::CommandStatus {
                status,
                opcode: cmd.opcode(),
            };
        }
        let params = match result {
            Ok(params) => params,
            Err(_) => cmd.handle().map(ReturnParams::Handle).unwrap_or(ReturnParams::Empty),
        };
        HciEvent::CommandComplete {
            opcode: cmd.opcode(),
            status,
            params,
        }
    }

    /// Decodes and runs an HCI command packet
    pub fn host_packet(&mut self, packet: &[u8], now: LlTime) -> Result<HciEvent> {
        let cmd = decode_command(packet)?;
        log_hci(Direction::Rx, cmd.name(), packet);
        Ok(self.host_command(&cmd, now))
    }

    fn dispatch_command(&mut self, cmd: &HciCommand, now: LlTime) -> Result<ReturnParams> {
        debug!(command = cmd.name(), "Host command");
        match cmd {
            HciCommand::ReadLocalSupportedCapabilities => {
                Ok(ReturnParams::LocalCapabilities(self.config.capabilities))
            }
            HciCommand::ReadRemoteSupportedCapabilities { handle } => {
                let local = self.config.capabilities;
                let (_, link, env) = self.parts(*handle)?;
                if link.pending.is_some() {
                    return Err(CsError::disallowed("procedure pending"));
                }
                link.request(
                    env.out,
                    ControlPdu::CsCapabilitiesReq(local),
                    PendingKind::Capabilities { host: true },
                    now,
                );
                Ok(ReturnParams::Empty)
            }
            HciCommand::WriteCachedRemoteSupportedCapabilities { handle, caps } => {
                let (_, link, _) = self.parts(*handle)?;
                if link.configs.any_in_use() {
                    return Err(CsError::disallowed("procedures running"));
                }
                link.remote_caps = Some(clamp_remote(caps));
                Ok(ReturnParams::Handle(*handle))
            }
            HciCommand::SecurityEnable { handle } => self.security_enable(*handle, now),
            HciCommand::SetDefaultSettings { handle, settings } => {
                let local = self.config.capabilities;
                let (_, link, _) = self.parts(*handle)?;
                if settings.role_enable > 0x03 {
                    return Err(CsError::invalid("role enable"));
                }
                if settings.role_enable & !local.roles & 0x03 != 0 {
                    return Err(CsError::unsupported("role not supported"));
                }
                if link.configs.any_in_use() {
                    return Err(CsError::disallowed("procedures running"));
                }
                link.settings = *settings;
                Ok(ReturnParams::Handle(*handle))
            }
            HciCommand::ReadRemoteFaeTable { handle } => {
                let (_, link, env) = self.parts(*handle)?;
                if link.remote_caps.map(|c| c.no_fae).unwrap_or(false) {
                    return Err(CsError::new(HciStatus::UnsupportedRemoteFeature, "peer has no FAE table"));
                }
                if link.pending.is_some() {
                    return Err(CsError::disallowed("procedure pending"));
                }
                link.request(env.out, ControlPdu::CsFaeReq, PendingKind::FaeTable, now);
                Ok(ReturnParams::Empty)
            }
            HciCommand::WriteCachedRemoteFaeTable { handle, table } => {
                let (_, link, _) = self.parts(*handle)?;
                link.remote_fae = Some(*table);
                Ok(ReturnParams::Handle(*handle))
            }
            HciCommand::CreateConfig(create) => self.create_config(create, now),
            HciCommand::RemoveConfig { handle, config_id } => {
                let (_, link, env) = self.parts(*handle)?;
                let slot = link
                    .configs
                    .get(*config_id)
                    .ok_or(CsError::invalid("unknown configuration"))?;
                if slot.in_use {
                    return Err(CsError::disallowed("configuration in use"));
                }
                if link.pending.is_some() {
                    return Err(CsError::disallowed("procedure pending"));
                }
                let spec = slot.spec;
                link.request(
                    env.out,
                    ControlPdu::CsConfigReq(ConfigReq {
                        action: ConfigAction::Remove,
                        spec,
                    }),
                    PendingKind::Config {
                        spec,
                        action: ConfigAction::Remove,
                    },
                    now,
                );
                Ok(ReturnParams::Handle(*handle))
            }
            HciCommand::SetChannelClassification { map } => {
                if !map.is_valid() {
                    return Err(CsError::invalid("channel classification"));
                }
                self.classification = *map;
                info!(channels = map.count(), "Channel classification set");
                let Self { links, out, .. } = self;
                for link in links.iter_mut().flatten() {
                    if link.role == Role::Central {
                        announce_map(link, out, *map);
                    }
                }
                Ok(ReturnParams::Empty)
            }
            HciCommand::SetProcedureParameters(set) => self.set_procedure_parameters(set),
            HciCommand::ProcedureEnable(enable) => self.procedure_enable(enable, now),
        }
    }

    fn security_enable(&mut self, handle: ConnHandle, now: LlTime) -> Result<ReturnParams> {
        let (_, link, env) = self.parts(handle)?;
        if link.role != Role::Central {
            return Err(CsError::disallowed("security is started by the central"));
        }
        if link.series.is_some() {
            return Err(CsError::disallowed("procedures running"));
        }
        if link.pending.is_some() {
            return Err(CsError::disallowed("procedure pending"));
        }
        let local = security_half(env.rng);
        link.request(
            env.out,
            ControlPdu::CsSecReq(local),
            PendingKind::Security { local },
            now,
        );
        Ok(ReturnParams::Empty)
    }

    fn create_config(&mut self, create: &CreateConfig, now: LlTime) -> Result<ReturnParams> {
        let (_, link, env) = self.parts(create.handle)?;
        let local = &env.config.capabilities;
        let remote = link
            .remote_caps
            .ok_or(CsError::disallowed("remote capabilities unknown"))?;

        let mut spec = validate_rules(&create.spec).map_err(|v| v.into_local_error())?;
        apply_timing(&mut spec, local, &remote);
        check_support(&spec, local, &remote, &link.settings).map_err(|v| v.into_local_error())?;
        let limit = local.num_configs.min(remote.num_configs);

        match create.create_context {
            0 => {
                link.configs.store(spec, limit)?;
                debug!(handle = create.handle.0, config_id = spec.config_id, "Configuration created locally");
                env.out.event(HciEvent::ConfigComplete(ConfigComplete {
                    status: HciStatus::Success,
                    handle: create.handle,
                    action: ConfigAction::Create,
                    spec,
                }));
            }
            1 => {
                if link.pending.is_some() {
                    return Err(CsError::disallowed("procedure pending"));
                }
                // The current slot stays usable until the peer accepts
                link.configs.check_room(spec.config_id, limit)?;
                link.request(
                    env.out,
                    ControlPdu::CsConfigReq(ConfigReq {
                        action: ConfigAction::Create,
                        spec,
                    }),
                    PendingKind::Config {
                        spec,
                        action: ConfigAction::Create,
                    },
                    now,
                );
            }
            _ => return Err(CsError::invalid("create context")),
        }
        Ok(ReturnParams::Handle(create.handle))
    }

    fn set_procedure_parameters(&mut self, set: &SetProcedureParameters) -> Result<ReturnParams> {
        let (_, link, env) = self.parts(set.handle)?;
        let remote = link
            .remote_caps
            .ok_or(CsError::disallowed("remote capabilities unknown"))?;
        let slot = link
            .configs
            .get(set.config_id)
            .ok_or(CsError::invalid("unknown configuration"))?;
        if slot.in_use {
            return Err(CsError::disallowed("configuration in use"));
        }
        validate_preferred(&set.params, slot.role(), &env.config.capabilities, &remote)?;
        if let Some(slot) = link.configs.get_mut(set.config_id) {
            slot.preferred = Some(set.params);
        }
        Ok(ReturnParams::Handle(set.handle))
    }

    fn procedure_enable(&mut self, enable: &ProcedureEnable, now: LlTime) -> Result<ReturnParams> {
        let (_, link, env) = self.parts(enable.handle)?;
        if enable.enable {
            let retries = env.config.procedure_enable_retries;
            begin_enable(link, env.out, enable.config_id, retries, now)?;
            return Ok(ReturnParams::Empty);
        }

        let steps = match &link.series {
            Some(series) if series.config_id == enable.config_id => series.generator.step_counter(),
            _ => return Err(CsError::disallowed("procedures not enabled")),
        };
        if link.pending.is_some() {
            return Err(CsError::disallowed("procedure pending"));
        }
        link.unschedule(env.sched);
        link.terminating = true;
        link.request(
            env.out,
            ControlPdu::CsTerminateReq(Terminate {
                config_id: enable.config_id,
                step_count: steps,
                error: HciStatus::LocalHostTerminated,
            }),
            PendingKind::Terminate {
                config_id: enable.config_id,
                step_count: steps,
            },
            now,
        );
        info!(handle = enable.handle.0, config_id = enable.config_id, steps, "Terminating procedures");
        Ok(ReturnParams::Empty)
    }
}
