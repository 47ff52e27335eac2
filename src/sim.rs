/*
 * This file is part of dcpipe.
 *
 * Copyright (C) 2025 dcpipe contributors
 *
 * dcpipe is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * dcpipe is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with dcpipe. If not, see <https://www.gnu.org/licenses/>.
 */

//! Simulated display hardware
//!
//! Implements every collaborator trait against shared in-memory state and
//! records each programming call as a line of text. Used by the scenario
//! runner and by tests that check programming order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use dc_error::{DcError, Result};
use tracing::trace;

use crate::bandwidth::DisplayConfiguration;
use crate::constants::{limits, sideband};
use crate::context::{PipeContext, ValidationContext};
use crate::services::{
    BiosService, ConnectorId, ConnectorInfo, DeviceServices, HwSequencer, I2cCommand, PipeLockControl, PowerService,
    SidebandService,
};
use crate::types::{LinkSettings, SignalType, Surface};

#[derive(Debug)]
struct SimState {
    connectors: Vec<ConnectorInfo>,
    accelerated: bool,
    drr_supported: bool,
    fail_next_apply: bool,
    blanked: [bool; limits::MAX_PIPES],
    calls: Vec<String>,
    requirements: Vec<DisplayConfiguration>,
    aux_transfers: Vec<(u32, usize)>,
    dpcd: HashMap<(u32, u32), u8>,
}

impl SimState {
    fn record(&mut self, call: String) {
        trace!(call = %call, "sim");
        self.calls.push(call);
    }
}

type Shared = Arc<Mutex<SimState>>;

fn lock(state: &Shared) -> MutexGuard<'_, SimState> {
    // A panicking test thread must not hide later calls
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Inspection and fault-injection handle onto the simulated hardware
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Shared,
}

impl SimHandle {
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Every display requirement record handed to power management
    pub fn display_requirements(&self) -> Vec<DisplayConfiguration> {
        lock(&self.state).requirements.clone()
    }

    /// `(address, length)` of every AUX transaction
    pub fn aux_transfers(&self) -> Vec<(u32, usize)> {
        lock(&self.state).aux_transfers.clone()
    }

    /// Make the next `apply_ctx_to_hw` fail
    pub fn fail_next_apply(&self) {
        lock(&self.state).fail_next_apply = true;
    }

    pub fn set_drr_supported(&self, supported: bool) {
        lock(&self.state).drr_supported = supported;
    }

    pub fn set_accelerated(&self, accelerated: bool) {
        lock(&self.state).accelerated = accelerated;
    }

    pub fn is_blanked(&self, tg_inst: usize) -> bool {
        lock(&self.state).blanked.get(tg_inst).copied().unwrap_or(true)
    }
}

/// Build simulated collaborators for `connectors`
pub fn services(connectors: Vec<ConnectorInfo>) -> (DeviceServices, SimHandle) {
    let state = Arc::new(Mutex::new(SimState {
        connectors,
        accelerated: false,
        drr_supported: true,
        fail_next_apply: false,
        blanked: [true; limits::MAX_PIPES],
        calls: Vec::new(),
        requirements: Vec::new(),
        aux_transfers: Vec::new(),
        dpcd: HashMap::new(),
    }));

    let services = DeviceServices {
        bios: Box::new(SimBios { state: Arc::clone(&state) }),
        power: Box::new(SimPower { state: Arc::clone(&state) }),
        hwss: Box::new(SimHwSequencer { state: Arc::clone(&state) }),
        sideband: Arc::new(SimSideband { state: Arc::clone(&state) }),
    };
    (services, SimHandle { state })
}

/// Connector descriptor for slot `index` carrying `signal`
pub fn connector(index: u32, signal: SignalType) -> ConnectorInfo {
    let id = match signal {
        SignalType::DisplayPort | SignalType::DisplayPortMst => ConnectorId::DisplayPort,
        SignalType::Edp => ConnectorId::Edp,
        SignalType::Lvds => ConnectorId::Lvds,
        SignalType::DviSingleLink => ConnectorId::DviD,
        SignalType::DviDualLink => ConnectorId::DviI,
        SignalType::Virtual | SignalType::None => ConnectorId::Virtual,
        SignalType::Hdmi => ConnectorId::Hdmi,
    };
    ConnectorInfo {
        id,
        enum_id: 1,
        signal,
        hpd_pin: Some(index as u8),
        ddc_pin: Some(index + 1),
        ddi_channel_mapping: 0xE4,
        transmitter: index as u8,
        max_link_settings: if signal.is_dp() { LinkSettings::HBR2_X4 } else { LinkSettings::default() },
    }
}

struct SimBios {
    state: Shared,
}

impl BiosService for SimBios {
    fn connectors_number(&self) -> usize {
        lock(&self.state).connectors.len()
    }

    fn connector_info(&self, index: usize) -> Option<ConnectorInfo> {
        lock(&self.state).connectors.get(index).cloned()
    }

    fn is_accelerated_mode(&self) -> bool {
        lock(&self.state).accelerated
    }
}

struct SimPower {
    state: Shared,
}

impl PowerService for SimPower {
    fn apply_safe_state(&mut self) {
        lock(&self.state).record("apply_safe_state".into());
    }

    fn apply_display_requirements(&mut self, config: &DisplayConfiguration) {
        let mut state = lock(&self.state);
        state.record("apply_display_requirements".into());
        state.requirements.push(config.clone());
    }
}

struct SimHwSequencer {
    state: Shared,
}

impl HwSequencer for SimHwSequencer {
    fn init_hw(&mut self) {
        let mut state = lock(&self.state);
        state.blanked = [true; limits::MAX_PIPES];
        state.record("init_hw".into());
    }

    fn enable_accelerated_mode(&mut self) {
        let mut state = lock(&self.state);
        state.accelerated = true;
        state.record("enable_accelerated_mode".into());
    }

    fn apply_ctx_to_hw(&mut self, context: &ValidationContext) -> Result<()> {
        let mut state = lock(&self.state);
        state.record("apply_ctx_to_hw".into());
        if state.fail_next_apply {
            state.fail_next_apply = false;
            return Err(DcError::Programming("simulated timing generator fault".into()));
        }
        for pipe in context.pipes() {
            if !pipe.is_bound() {
                if let Some(slot) = state.blanked.get_mut(pipe.pipe_idx) {
                    *slot = true;
                }
            }
        }
        Ok(())
    }

    fn apply_ctx_to_surface(&mut self, _context: &ValidationContext) {
        lock(&self.state).record("apply_ctx_to_surface".into());
    }

    fn update_plane_surface(&mut self, _context: &ValidationContext, _surfaces: &[Surface]) {
        lock(&self.state).record("update_plane_surface".into());
    }

    fn update_plane_addr(&mut self, pipe: &PipeContext) {
        lock(&self.state).record(format!("update_plane_addr({})", pipe.pipe_idx));
    }

    fn pipe_control_lock(&mut self, pipe_idx: usize, control: PipeLockControl, lock_pipe: bool) {
        lock(&self.state).record(format!("pipe_control_lock({},{},{})", pipe_idx, control.bits(), lock_pipe));
    }

    fn set_display_clock(&mut self, context: &ValidationContext) {
        lock(&self.state).record(format!("set_display_clock({})", context.bw_results.dispclk_khz));
    }

    fn enable_timing_synchronization(&mut self, group_index: usize, pipe_indices: &[usize]) {
        lock(&self.state).record(format!("enable_timing_synchronization({},{:?})", group_index, pipe_indices));
    }

    fn set_blank(&mut self, tg_inst: usize, blank: bool) -> bool {
        let mut state = lock(&self.state);
        state.record(format!("set_blank({},{})", tg_inst, blank));
        match state.blanked.get_mut(tg_inst) {
            Some(slot) => {
                *slot = blank;
                true
            }
            None => false,
        }
    }

    fn is_blanked(&self, tg_inst: usize) -> bool {
        lock(&self.state).blanked.get(tg_inst).copied().unwrap_or(true)
    }

    fn power_down(&mut self) {
        let mut state = lock(&self.state);
        state.blanked = [true; limits::MAX_PIPES];
        state.accelerated = false;
        state.record("power_down".into());
    }

    fn supports_drr(&self) -> bool {
        lock(&self.state).drr_supported
    }

    fn set_drr(&mut self, pipe_idx: usize, vmin: u32, vmax: u32) {
        lock(&self.state).record(format!("set_drr({},{},{})", pipe_idx, vmin, vmax));
    }

    fn update_info_frame(&mut self, pipe: &PipeContext) {
        lock(&self.state).record(format!("update_info_frame({})", pipe.pipe_idx));
    }

    fn set_plane_config(&mut self, pipe: &PipeContext) {
        lock(&self.state).record(format!("set_plane_config({})", pipe.pipe_idx));
    }

    fn send_null_packet(&mut self, stream_enc_inst: usize, enable: bool) {
        lock(&self.state).record(format!("send_null_packet({},{})", stream_enc_inst, enable));
    }
}

/// AUX/I2C backed by a per-pin DPCD map; unwritten registers read as zero
struct SimSideband {
    state: Shared,
}

impl SidebandService for SimSideband {
    fn aux_read(&self, ddc_pin: u32, address: u32, data: &mut [u8]) -> Result<()> {
        if data.len() > sideband::MAX_AUX_TRANSFER {
            return Err(DcError::Sideband {
                link_index: ddc_pin,
                reason: format!("AUX read of {} bytes", data.len()),
            });
        }
        let mut state = lock(&self.state);
        state.aux_transfers.push((address, data.len()));
        for (offset, byte) in data.iter_mut().enumerate() {
            *byte = state.dpcd.get(&(ddc_pin, address + offset as u32)).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn aux_write(&self, ddc_pin: u32, address: u32, data: &[u8]) -> Result<()> {
        if data.len() > sideband::MAX_AUX_TRANSFER {
            return Err(DcError::Sideband {
                link_index: ddc_pin,
                reason: format!("AUX write of {} bytes", data.len()),
            });
        }
        let mut state = lock(&self.state);
        state.aux_transfers.push((address, data.len()));
        for (offset, byte) in data.iter().enumerate() {
            state.dpcd.insert((ddc_pin, address + offset as u32), *byte);
        }
        Ok(())
    }

    fn submit_i2c(&self, ddc_pin: u32, command: &I2cCommand) -> Result<()> {
        lock(&self.state).record(format!("submit_i2c({},{})", ddc_pin, command.payloads.len()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accelerated_mode_shared_with_bios() {
        let (mut services, handle) = services(vec![connector(0, SignalType::Hdmi)]);
        assert!(!services.bios.is_accelerated_mode());
        services.hwss.enable_accelerated_mode();
        assert!(services.bios.is_accelerated_mode());
        assert_eq!(services.bios.connector_info(0).unwrap().id, ConnectorId::Hdmi);
        assert_eq!(handle.calls(), vec!["enable_accelerated_mode"]);
    }

    #[test]
    fn test_dpcd_memory_per_pin() {
        let (services, handle) = services(vec![]);
        services.sideband.aux_write(1, 0x100, &[0x0A, 0x04]).unwrap();
        let mut buf = [0u8; 3];
        services.sideband.aux_read(1, 0x100, &mut buf).unwrap();
        assert_eq!(buf, [0x0A, 0x04, 0x00]);
        services.sideband.aux_read(2, 0x100, &mut buf).unwrap();
        assert_eq!(buf, [0; 3]);
        assert_eq!(handle.aux_transfers().len(), 3);
        assert!(services.sideband.aux_read(1, 0, &mut [0u8; 17]).is_err());
    }
}
