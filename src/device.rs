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

//! Display core device
//!
//! Owns the resource pool, the link registry and the current validation
//! context, and exposes the operations a driver calls. Commit operations live
//! in [`crate::commit`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dc_error::{DcError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::commit::CommitState;
use crate::constants::polling;
use crate::context::{StreamStatus, ValidationContext};
use crate::irq::{self, IrqSource};
use crate::link::{DdcService, GraphicsObjectId, Link, LinkRegistry, Sink, SinkInitData};
use crate::logger;
use crate::resource::{AsicId, DceVersion, ResourcePool};
use crate::services::{BiosService, DeviceServices, HwSequencer, I2cCommand, PowerService, SidebandService};
use crate::types::{AcpiPowerState, StreamId, Target, ValidationSet, VideoPowerState};

// ============================================================================
// Construction Data
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InitFlags {
    #[serde(default)]
    pub gpu_vm_support: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DebugOptions {
    /// Shrink every plane's output rectangle so plane edges are visible
    #[serde(default)]
    pub surface_visual_confirm: bool,
}

/// Bounded register poll: `retries` checks spaced by `delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for PollBudget {
    fn default() -> Self {
        Self {
            retries: polling::DEFAULT_POLL_RETRIES,
            delay: Duration::from_micros(polling::DEFAULT_POLL_DELAY_US),
        }
    }
}

impl PollBudget {
    /// Poll until `done` holds; false when the budget runs out
    pub fn wait_for(&self, mut done: impl FnMut() -> bool) -> bool {
        for attempt in 0..self.retries {
            if done() {
                return true;
            }
            if attempt + 1 < self.retries && !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
        }
        false
    }
}

#[derive(Debug, Clone)]
pub struct InitData {
    pub asic_id: AsicId,
    pub num_virtual_links: usize,
    pub flags: InitFlags,
    pub debug: DebugOptions,
    pub poll: PollBudget,
}

impl InitData {
    pub fn new(asic_id: AsicId) -> Self {
        Self {
            asic_id,
            num_virtual_links: 0,
            flags: InitFlags::default(),
            debug: DebugOptions::default(),
            poll: PollBudget::default(),
        }
    }

    pub fn with_virtual_links(mut self, count: usize) -> Self {
        self.num_virtual_links = count;
        self
    }

    pub fn with_debug(mut self, debug: DebugOptions) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_poll(mut self, poll: PollBudget) -> Self {
        self.poll = poll;
        self
    }
}

/// Capability limits derived from the pool and links at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceCaps {
    pub max_targets: usize,
    pub max_links: usize,
    pub max_audios: usize,
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Break-point hook for states that indicate a caller or driver bug
#[derive(Debug, Default)]
pub struct Diagnostics {
    break_count: u64,
    last_reason: Option<String>,
}

impl Diagnostics {
    pub fn break_to_debugger(&mut self, reason: &str) {
        self.break_count += 1;
        self.last_reason = Some(reason.to_string());
        error!(reason, count = self.break_count, "Break to debugger");
        logger::log_event("break_to_debugger", json!({ "reason": reason }));
    }

    pub fn break_count(&self) -> u64 {
        self.break_count
    }

    pub fn last_reason(&self) -> Option<&str> {
        self.last_reason.as_deref()
    }
}

// ============================================================================
// Device
// ============================================================================

/// Top-level display core controller.
///
/// Field order is teardown order: the current context goes first, then the
/// links, then the pool.
pub struct Device {
    pub(crate) current_context: Arc<ValidationContext>,
    pub(crate) links: LinkRegistry,
    pub(crate) pool: ResourcePool,
    pub(crate) hwss: Box<dyn HwSequencer>,
    pub(crate) power: Box<dyn PowerService>,
    pub(crate) bios: Box<dyn BiosService>,
    pub(crate) sideband: Arc<dyn SidebandService>,
    pub(crate) caps: DeviceCaps,
    pub(crate) debug: DebugOptions,
    pub(crate) flags: InitFlags,
    pub(crate) poll: PollBudget,
    pub(crate) state: CommitState,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) current_power_state: AcpiPowerState,
    pub(crate) previous_power_state: Option<AcpiPowerState>,
    pub(crate) video_power_state: VideoPowerState,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("version", &self.pool.version())
            .field("caps", &self.caps)
            .field("targets", &self.current_context.target_count())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Construct the pool, then the links, then an empty current context
    pub fn create(init: InitData, services: DeviceServices) -> Result<Self> {
        let DeviceServices { bios, power, mut hwss, sideband } = services;

        let pool = ResourcePool::create(&init.asic_id, init.num_virtual_links)?;
        let links = LinkRegistry::create(bios.as_ref(), Arc::clone(&sideband), init.num_virtual_links)?;

        let caps = DeviceCaps {
            max_targets: pool.max_targets(),
            max_links: links.len(),
            max_audios: pool.audio_count(),
        };
        let current_context = Arc::new(pool.new_context());

        hwss.init_hw();

        info!(
            version = %pool.version(),
            max_targets = caps.max_targets,
            links = caps.max_links,
            gpu_vm = init.flags.gpu_vm_support,
            "Display core created"
        );

        Ok(Self {
            current_context,
            links,
            pool,
            hwss,
            power,
            bios,
            sideband,
            caps,
            debug: init.debug,
            flags: init.flags,
            poll: init.poll,
            state: CommitState::Idle,
            diagnostics: Diagnostics::default(),
            current_power_state: AcpiPowerState::D0,
            previous_power_state: None,
            video_power_state: VideoPowerState::On,
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn version(&self) -> DceVersion {
        self.pool.version()
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    /// Snapshot of the committed configuration
    pub fn current_context(&self) -> Arc<ValidationContext> {
        Arc::clone(&self.current_context)
    }

    pub fn commit_state(&self) -> CommitState {
        self.state
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn target_count(&self) -> usize {
        self.current_context.target_count()
    }

    pub fn target(&self, index: usize) -> Option<Arc<Target>> {
        self.current_context.targets.get(index).cloned()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn link(&self, link_index: u32) -> Option<&Link> {
        self.links.get(link_index)
    }

    pub fn link_id(&self, link_index: u32) -> Option<GraphicsObjectId> {
        self.links.get(link_index).map(|l| l.link_id)
    }

    pub fn ddc_service(&self, link_index: u32) -> Option<&DdcService> {
        self.links.get(link_index).map(|l| l.ddc())
    }

    pub fn sideband_service(&self) -> Arc<dyn SidebandService> {
        Arc::clone(&self.sideband)
    }

    pub fn link_irq_source_hpd(&self, link_index: u32) -> IrqSource {
        self.links
            .get(link_index)
            .map(|l| l.irq_source_hpd)
            .unwrap_or(IrqSource::Invalid)
    }

    pub fn audio_count(&self) -> usize {
        self.pool.audio_count()
    }

    pub fn stream_status(&self, stream_id: StreamId) -> Option<StreamStatus> {
        self.current_context.stream_status(stream_id)
    }

    pub fn power_state(&self) -> (AcpiPowerState, Option<AcpiPowerState>) {
        (self.current_power_state, self.previous_power_state)
    }

    pub fn video_power_state(&self) -> VideoPowerState {
        self.video_power_state
    }

    pub fn gpu_vm_support(&self) -> bool {
        self.flags.gpu_vm_support
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Dry-run validation of `sets` against the current configuration
    pub fn validate_resources(&self, sets: &[ValidationSet]) -> Result<()> {
        self.pool
            .validate_with_context(&self.links, &self.current_context, sets, self.debug.surface_visual_confirm)
            .map(|_| ())
    }

    /// Whether `target` could be driven if it were the only one
    pub fn validate_guaranteed(&self, target: &Arc<Target>) -> Result<()> {
        self.pool.validate_guaranteed(&self.links, target).map(|_| ())
    }

    // ========================================================================
    // Stream Functions
    // ========================================================================

    /// Program a dynamic refresh range on every pipe of `stream_id`
    pub fn adjust_vmin_vmax(&mut self, stream_id: StreamId, vmin: u32, vmax: u32) -> bool {
        if !self.hwss.supports_drr() {
            return false;
        }
        let mut programmed = false;
        for pipe in self.current_context.bound_pipes() {
            if pipe.stream.as_ref().map(|s| s.id) == Some(stream_id) {
                self.hwss.set_drr(pipe.pipe_idx, vmin, vmax);
                self.hwss.update_info_frame(pipe);
                programmed = true;
            }
        }
        if programmed {
            debug!(stream = %stream_id, vmin, vmax, "Refresh range adjusted");
        }
        programmed
    }

    /// Reprogram color remapping on every pipe of `stream_id`
    pub fn set_gamut_remap(&mut self, stream_id: StreamId) -> bool {
        let mut programmed = false;
        for pipe in self.current_context.bound_pipes() {
            if pipe.stream.as_ref().map(|s| s.id) == Some(stream_id) {
                self.hwss.set_plane_config(pipe);
                programmed = true;
            }
        }
        programmed
    }

    pub fn send_null_packet(&mut self, stream_id: StreamId, enable: bool) -> bool {
        let mut sent = false;
        for pipe in self.current_context.bound_pipes() {
            if pipe.stream.as_ref().map(|s| s.id) != Some(stream_id) {
                continue;
            }
            if let Some(stream_enc) = pipe.stream_enc {
                self.hwss.send_null_packet(stream_enc, enable);
                sent = true;
            }
        }
        sent
    }

    // ========================================================================
    // Links and Sinks
    // ========================================================================

    fn link_mut(&mut self, link_index: u32) -> Result<&mut Link> {
        self.links.get_mut(link_index).ok_or(DcError::InvalidLink(link_index))
    }

    pub fn link_add_remote_sink(&mut self, link_index: u32, edid: &[u8], init: SinkInitData) -> Result<Arc<Sink>> {
        let result = self.link_mut(link_index)?.add_remote_sink(edid, init);
        if let Err(DcError::BoundExceeded { .. }) = &result {
            self.diagnostics.break_to_debugger("remote sink list full");
        }
        result
    }

    pub fn link_remove_remote_sink(&mut self, link_index: u32, sink: &Arc<Sink>) -> Result<()> {
        let result = self.link_mut(link_index)?.remove_remote_sink(sink);
        if let Err(e) = &result {
            self.diagnostics.break_to_debugger(&e.to_string());
        }
        result
    }

    pub fn link_set_sink(&mut self, link_index: u32, sink: Option<Arc<Sink>>) -> Result<()> {
        self.link_mut(link_index)?.set_sink(sink);
        Ok(())
    }

    pub fn read_dpcd(&self, link_index: u32, address: u32, data: &mut [u8]) -> Result<()> {
        let link = self.links.get(link_index).ok_or(DcError::InvalidLink(link_index))?;
        link.ddc().read_dpcd(address, data)
    }

    pub fn write_dpcd(&self, link_index: u32, address: u32, data: &[u8]) -> Result<()> {
        let link = self.links.get(link_index).ok_or(DcError::InvalidLink(link_index))?;
        link.ddc().write_dpcd(address, data)
    }

    pub fn submit_i2c(&self, link_index: u32, command: &I2cCommand) -> Result<()> {
        let link = self.links.get(link_index).ok_or(DcError::InvalidLink(link_index))?;
        link.ddc().submit_i2c(command)
    }

    // ========================================================================
    // Interrupts
    // ========================================================================

    pub fn interrupt_to_irq_source(&self, src_id: u32, ext_id: u32) -> IrqSource {
        irq::interrupt_to_irq_source(src_id, ext_id)
    }

    pub fn interrupt_set(&mut self, src: IrqSource, enable: bool) -> bool {
        self.pool.irqs.set(src, enable)
    }

    pub fn interrupt_ack(&mut self, src: IrqSource) -> bool {
        self.pool.irqs.ack(src)
    }

    pub fn interrupt_enabled(&self, src: IrqSource) -> bool {
        self.pool.irqs.is_enabled(src)
    }

    // ========================================================================
    // Power
    // ========================================================================

    /// Enter a power state; anything but D0 releases every target
    pub fn set_power_state(&mut self, power_state: AcpiPowerState, video_power_state: VideoPowerState) {
        self.previous_power_state = Some(self.current_power_state);
        self.current_power_state = power_state;
        self.video_power_state = video_power_state;

        match power_state {
            AcpiPowerState::D0 => {
                self.hwss.init_hw();
                info!("Display core powered up");
            }
            _ => {
                if let Err(e) = self.commit_targets(&[]) {
                    warn!(error = %e, "Failed to release targets before power down");
                }
                self.hwss.power_down();
                for link in self.links.iter_mut() {
                    link.suspend();
                }
                self.current_context = Arc::new(self.pool.new_context());
                info!(state = ?power_state, "Display core powered down");
            }
        }
    }

    pub fn resume(&mut self) {
        for link in self.links.iter_mut() {
            link.resume();
        }
        info!(links = self.links.len(), "Links resumed");
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        debug!(targets = self.current_context.target_count(), "Display core destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_utils::{
        asic_for, hdmi_connector, sim_device, sim_services, sim_target, MockBios, MockHwss, MockPower,
        RecordingSideband,
    };
    use crate::types::{CrtcTiming, Surface, SurfaceId};
    use std::cell::Cell;

    #[test]
    fn test_poll_budget_bounded() {
        let budget = PollBudget { retries: 3, delay: Duration::ZERO };
        let calls = Cell::new(0);
        assert!(!budget.wait_for(|| {
            calls.set(calls.get() + 1);
            false
        }));
        assert_eq!(calls.get(), 3);
        assert!(budget.wait_for(|| true));
    }

    #[test]
    fn test_caps_derived_from_pool() {
        let (device, _sim) = sim_device(DceVersion::Dce110, 2, 1);
        assert_eq!(device.caps().max_targets, 2);
        assert_eq!(device.caps().max_links, 3);
        assert_eq!(device.caps().max_audios, 2);
        assert_eq!(device.target_count(), 0);
        assert!(device.link_id(2).is_some());
        assert!(device.link_id(3).is_none());
    }

    #[test]
    fn test_unknown_asic_fails_construction() {
        let mut asic = asic_for(DceVersion::Dce112);
        asic.chip_family = 7;
        let (services, _sim) = sim_services(1);
        assert!(Device::create(InitData::new(asic), services).is_err());
    }

    #[test]
    fn test_interrupt_bookkeeping() {
        let (mut device, _sim) = sim_device(DceVersion::Dce112, 1, 0);
        let src = device.interrupt_to_irq_source(42, 0);
        assert_eq!(src, IrqSource::Hpd(0));
        assert_eq!(device.link_irq_source_hpd(0), IrqSource::Hpd(0));
        assert!(device.interrupt_set(src, true));
        assert!(device.interrupt_enabled(src));
        assert!(device.interrupt_ack(src));
        assert!(!device.interrupt_set(IrqSource::Invalid, true));
    }

    #[test]
    fn test_drr_requires_sequencer_support() {
        let (mut device, sim) = sim_device(DceVersion::Dce112, 1, 0);
        let target = sim_target(&device, 1, &[(1, 0)], CrtcTiming::cea_1080p60());
        device.commit_targets(&[target]).unwrap();

        sim.set_drr_supported(false);
        assert!(!device.adjust_vmin_vmax(StreamId(1), 1125, 1400));
        sim.set_drr_supported(true);
        assert!(device.adjust_vmin_vmax(StreamId(1), 1125, 1400));
        assert!(!device.adjust_vmin_vmax(StreamId(9), 1125, 1400));
        assert!(sim.calls().iter().any(|c| c == "set_drr(0,1125,1400)"));
    }

    #[test]
    fn test_stream_functions_reach_every_plane() {
        let (mut device, sim) = sim_device(DceVersion::Dce112, 1, 0);
        let target = sim_target(&device, 1, &[(1, 0)], CrtcTiming::cea_1080p60());
        device.commit_targets(&[Arc::clone(&target)]).unwrap();
        let planes = [Surface::new(SurfaceId(1), 1920, 1080), Surface::new(SurfaceId(2), 640, 480)];
        device.commit_surfaces_to_target(&planes, &target).unwrap();
        sim.clear_calls();

        assert!(device.adjust_vmin_vmax(StreamId(1), 1125, 1400));
        assert!(device.send_null_packet(StreamId(1), true));
        let calls = sim.calls();
        assert!(calls.iter().any(|c| c == "set_drr(0,1125,1400)"));
        assert!(calls.iter().any(|c| c == "set_drr(1,1125,1400)"));
        assert_eq!(calls.iter().filter(|c| c.starts_with("update_info_frame")).count(), 2);
        assert_eq!(calls.iter().filter(|c| c.starts_with("send_null_packet")).count(), 2);
    }

    #[test]
    fn test_power_down_suspends_links() {
        let mut bios = MockBios::new();
        bios.expect_connectors_number().return_const(1usize);
        bios.expect_connector_info().returning(|i| Some(hdmi_connector(i as u32)));
        bios.expect_is_accelerated_mode().return_const(true);
        let mut hwss = MockHwss::new();
        hwss.expect_init_hw().times(2).return_const(());
        hwss.expect_power_down().times(1).return_const(());
        let services = DeviceServices {
            bios: Box::new(bios),
            power: Box::new(MockPower::new()),
            hwss: Box::new(hwss),
            sideband: Arc::new(RecordingSideband::default()),
        };

        let mut device = Device::create(InitData::new(asic_for(DceVersion::Dce112)), services).unwrap();
        assert!(device.link(0).unwrap().hpd_enabled);
        device.set_power_state(AcpiPowerState::D3, VideoPowerState::Off);
        assert_eq!(device.power_state(), (AcpiPowerState::D3, Some(AcpiPowerState::D0)));
        assert!(!device.link(0).unwrap().hpd_enabled);

        device.set_power_state(AcpiPowerState::D0, VideoPowerState::On);
        device.resume();
        assert!(device.link(0).unwrap().hpd_enabled);
    }

    #[test]
    fn test_remove_missing_sink_hits_break_hook() {
        let (mut device, _sim) = sim_device(DceVersion::Dce112, 1, 0);
        let stray = Arc::new(Sink::new(0, SinkInitData::default()));
        assert!(device.link_remove_remote_sink(0, &stray).is_err());
        assert_eq!(device.diagnostics().break_count(), 1);
    }
}
