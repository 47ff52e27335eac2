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

//! Collaborator interfaces consumed by the display core
//!
//! The core never touches registers itself. Firmware tables, platform power
//! management, the per-generation hardware sequencer and the sideband
//! transport are supplied by the driver through these traits.

use std::fmt;
use std::sync::Arc;

use dc_error::Result;
use serde::{Deserialize, Serialize};

use crate::bandwidth::DisplayConfiguration;
use crate::context::{PipeContext, ValidationContext};
use crate::types::{LinkSettings, SignalType, Surface};

// ============================================================================
// Firmware Tables
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorId {
    DviI,
    DviD,
    Hdmi,
    DisplayPort,
    Edp,
    Lvds,
    Virtual,
}

/// Connector description read from the firmware tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorInfo {
    pub id: ConnectorId,
    #[serde(default = "default_enum_id")]
    pub enum_id: u8,
    pub signal: SignalType,
    /// Hot-plug detect pin, if wired
    #[serde(default)]
    pub hpd_pin: Option<u8>,
    /// DDC/AUX pin for sideband traffic
    #[serde(default)]
    pub ddc_pin: Option<u32>,
    #[serde(default)]
    pub ddi_channel_mapping: u8,
    #[serde(default)]
    pub transmitter: u8,
    /// Highest link settings the connector was trained to
    #[serde(default)]
    pub max_link_settings: LinkSettings,
}

fn default_enum_id() -> u8 {
    1
}

/// Firmware-parameter service
pub trait BiosService {
    /// Number of connectors listed in the firmware object table
    fn connectors_number(&self) -> usize;

    fn connector_info(&self, index: usize) -> Option<ConnectorInfo>;

    /// Whether the display engine has left VGA/firmware mode
    fn is_accelerated_mode(&self) -> bool;
}

// ============================================================================
// Platform Power Management
// ============================================================================

/// Platform power-management service
pub trait PowerService {
    /// Raise clocks to a state that is safe for any configuration
    fn apply_safe_state(&mut self);

    fn apply_display_requirements(&mut self, config: &DisplayConfiguration);
}

// ============================================================================
// Hardware Sequencer
// ============================================================================

bitflags::bitflags! {
    /// Which pipe registers a lock freezes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipeLockControl: u8 {
        const GRAPHICS = 1 << 0;
        const BLENDER = 1 << 1;
        const SCL = 1 << 2;
        const SURFACE = 1 << 3;
        const MODE = 1 << 4;
    }
}

/// Per-generation hardware programming sequences
pub trait HwSequencer {
    fn init_hw(&mut self);

    fn enable_accelerated_mode(&mut self);

    /// Program every pipe to match `context`
    fn apply_ctx_to_hw(&mut self, context: &ValidationContext) -> Result<()>;

    /// Program surface (plane) state of every pipe in `context`
    fn apply_ctx_to_surface(&mut self, context: &ValidationContext);

    fn update_plane_surface(&mut self, context: &ValidationContext, surfaces: &[Surface]);

    fn update_plane_addr(&mut self, pipe: &PipeContext);

    fn pipe_control_lock(&mut self, pipe_idx: usize, control: PipeLockControl, lock: bool);

    fn set_display_clock(&mut self, context: &ValidationContext);

    /// Start the listed pipes' vertical blanks in lockstep
    fn enable_timing_synchronization(&mut self, group_index: usize, pipe_indices: &[usize]);

    /// Request blank/unblank of a timing generator; false if the request was refused
    fn set_blank(&mut self, tg_inst: usize, blank: bool) -> bool;

    fn is_blanked(&self, tg_inst: usize) -> bool;

    fn power_down(&mut self);

    /// Whether dynamic refresh rate programming is available
    fn supports_drr(&self) -> bool;

    fn set_drr(&mut self, pipe_idx: usize, vmin: u32, vmax: u32);

    fn update_info_frame(&mut self, pipe: &PipeContext);

    fn set_plane_config(&mut self, pipe: &PipeContext);

    fn send_null_packet(&mut self, stream_enc_inst: usize, enable: bool);
}

// ============================================================================
// Sideband Transport
// ============================================================================

/// One leg of an I2C transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct I2cPayload {
    pub write: bool,
    pub address: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct I2cCommand {
    pub payloads: Vec<I2cPayload>,
    /// Bus speed in kHz
    pub speed_khz: u32,
}

/// AUX/I2C transport addressed by DDC pin
pub trait SidebandService {
    fn aux_read(&self, ddc_pin: u32, address: u32, data: &mut [u8]) -> Result<()>;

    fn aux_write(&self, ddc_pin: u32, address: u32, data: &[u8]) -> Result<()>;

    fn submit_i2c(&self, ddc_pin: u32, command: &I2cCommand) -> Result<()>;
}

impl fmt::Debug for dyn SidebandService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SidebandService")
    }
}

/// Collaborators handed to the device at construction
pub struct DeviceServices {
    pub bios: Box<dyn BiosService>,
    pub power: Box<dyn PowerService>,
    pub hwss: Box<dyn HwSequencer>,
    pub sideband: Arc<dyn SidebandService>,
}

impl fmt::Debug for DeviceServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceServices").finish_non_exhaustive()
    }
}
