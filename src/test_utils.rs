/*
 * Test utilities and mock helpers for dcpipe
 *
 * This module provides fixtures, fake collaborators and mockall mocks that are
 * shared across the unit test modules.
 */

#[cfg(test)]
pub mod test_utils {
    use std::sync::{Arc, Mutex};

    use dc_error::Result;
    use mockall::mock;

    use crate::bandwidth::DisplayConfiguration;
    use crate::constants::{asic, limits};
    use crate::context::{ClockSourceId, PipeContext, TargetStatus, ValidationContext};
    use crate::device::{Device, InitData};
    use crate::link::{LinkRegistry, Sink, SinkInitData};
    use crate::resource::{AsicId, DceVersion, VramType};
    use crate::services::{
        BiosService, ConnectorInfo, DeviceServices, HwSequencer, I2cCommand, PipeLockControl, PowerService,
        SidebandService,
    };
    use crate::sim::{self, SimHandle};
    use crate::types::{CrtcTiming, SignalType, Stream, StreamId, Surface, Target, TargetId};

    // ========================================================================
    // Fake collaborators
    // ========================================================================

    /// Firmware table listing a fixed set of connectors
    pub struct FakeBios {
        connectors: Vec<ConnectorInfo>,
        accelerated: bool,
    }

    impl FakeBios {
        pub fn new(connectors: Vec<ConnectorInfo>) -> Self {
            Self { connectors, accelerated: false }
        }
    }

    impl BiosService for FakeBios {
        fn connectors_number(&self) -> usize {
            self.connectors.len()
        }

        fn connector_info(&self, index: usize) -> Option<ConnectorInfo> {
            self.connectors.get(index).cloned()
        }

        fn is_accelerated_mode(&self) -> bool {
            self.accelerated
        }
    }

    /// Sideband transport that records `(address, length)` of every AUX transfer
    #[derive(Default)]
    pub struct RecordingSideband {
        transfers: Mutex<Vec<(u32, usize)>>,
    }

    impl RecordingSideband {
        pub fn transfers(&self) -> Vec<(u32, usize)> {
            self.transfers.lock().unwrap().clone()
        }
    }

    impl SidebandService for RecordingSideband {
        fn aux_read(&self, _ddc_pin: u32, address: u32, data: &mut [u8]) -> Result<()> {
            self.transfers.lock().unwrap().push((address, data.len()));
            data.fill(0);
            Ok(())
        }

        fn aux_write(&self, _ddc_pin: u32, address: u32, data: &[u8]) -> Result<()> {
            self.transfers.lock().unwrap().push((address, data.len()));
            Ok(())
        }

        fn submit_i2c(&self, _ddc_pin: u32, _command: &I2cCommand) -> Result<()> {
            Ok(())
        }
    }

    // ========================================================================
    // Mocks
    // ========================================================================

    mock! {
        pub Bios {}
        impl BiosService for Bios {
            fn connectors_number(&self) -> usize;
            fn connector_info(&self, index: usize) -> Option<ConnectorInfo>;
            fn is_accelerated_mode(&self) -> bool;
        }
    }

    mock! {
        pub Power {}
        impl PowerService for Power {
            fn apply_safe_state(&mut self);
            fn apply_display_requirements(&mut self, config: &DisplayConfiguration);
        }
    }

    mock! {
        pub Hwss {}
        impl HwSequencer for Hwss {
            fn init_hw(&mut self);
            fn enable_accelerated_mode(&mut self);
            fn apply_ctx_to_hw(&mut self, context: &ValidationContext) -> Result<()>;
            fn apply_ctx_to_surface(&mut self, context: &ValidationContext);
            fn update_plane_surface(&mut self, context: &ValidationContext, surfaces: &[Surface]);
            fn update_plane_addr(&mut self, pipe: &PipeContext);
            fn pipe_control_lock(&mut self, pipe_idx: usize, control: PipeLockControl, lock: bool);
            fn set_display_clock(&mut self, context: &ValidationContext);
            fn enable_timing_synchronization(&mut self, group_index: usize, pipe_indices: &[usize]);
            fn set_blank(&mut self, tg_inst: usize, blank: bool) -> bool;
            fn is_blanked(&self, tg_inst: usize) -> bool;
            fn power_down(&mut self);
            fn supports_drr(&self) -> bool;
            fn set_drr(&mut self, pipe_idx: usize, vmin: u32, vmax: u32);
            fn update_info_frame(&mut self, pipe: &PipeContext);
            fn set_plane_config(&mut self, pipe: &PipeContext);
            fn send_null_packet(&mut self, stream_enc_inst: usize, enable: bool);
        }
    }

    // ========================================================================
    // Fixtures
    // ========================================================================

    pub fn dp_connector(index: u32) -> ConnectorInfo {
        sim::connector(index, SignalType::DisplayPort)
    }

    pub fn hdmi_connector(index: u32) -> ConnectorInfo {
        sim::connector(index, SignalType::Hdmi)
    }

    /// ASIC identity that selects `version`; the DCE 11.0 part is a two-pipe Stoney
    pub fn asic_for(version: DceVersion) -> AsicId {
        let (chip_family, chip_id, hw_internal_rev) = match version {
            DceVersion::Dce80 => (asic::FAMILY_CI, 0x6649, 0x14),
            DceVersion::Dce100 => (asic::FAMILY_VI, 0x6939, 0x14),
            DceVersion::Dce110 => (asic::FAMILY_CZ, 0x98E4, asic::CZ_STONEY_A0),
            DceVersion::Dce112 => (asic::FAMILY_VI, 0x67DF, asic::VI_POLARIS10_P_A0),
        };
        AsicId {
            chip_family,
            chip_id,
            pci_revision_id: 0,
            hw_internal_rev,
            vram_width_bits: 256,
            vram_type: VramType::Gddr5,
        }
    }

    pub fn hdmi_sink(link_index: u32) -> Arc<Sink> {
        Arc::new(Sink::new(link_index, SinkInitData { signal: SignalType::Hdmi, dongle_max_pix_clk_khz: None }))
    }

    pub fn hdmi_stream(id: u32, link_index: u32, timing: CrtcTiming) -> Arc<Stream> {
        Arc::new(Stream::new(StreamId(id), hdmi_sink(link_index), timing))
    }

    /// Stream on `link_index` carrying that link's connector signal
    pub fn stream_on(links: &LinkRegistry, id: u32, link_index: u32, timing: CrtcTiming) -> Arc<Stream> {
        let signal = links
            .get(link_index)
            .map(|l| l.connector_signal)
            .unwrap_or(SignalType::Hdmi);
        let sink = Arc::new(Sink::new(link_index, SinkInitData { signal, dongle_max_pix_clk_khz: None }));
        Arc::new(Stream::new(StreamId(id), sink, timing))
    }

    /// Registry of `count` HDMI links
    pub fn test_links(count: u32) -> LinkRegistry {
        let bios = FakeBios::new((0..count).map(hdmi_connector).collect());
        LinkRegistry::create(&bios, Arc::new(RecordingSideband::default()), 0).unwrap()
    }

    /// Six-pipe context with stream `i` bound to pipe `i`, each in its own target
    pub fn bound_context(streams: Vec<Arc<Stream>>) -> ValidationContext {
        let mut ctx = ValidationContext::new(limits::MAX_PIPES, limits::MAX_PIPES, limits::MAX_PIPES, 3);
        for (i, stream) in streams.into_iter().enumerate() {
            let pipe = &mut ctx.res_ctx.pipe_ctx[i];
            pipe.stream = Some(Arc::clone(&stream));
            pipe.tg = Some(i);
            pipe.stream_enc = Some(i);
            pipe.link_enc = Some(stream.link_index());
            pipe.clock_source = Some(ClockSourceId::Pll(i % 3));
            ctx.res_ctx.stream_enc_acquired[i] = true;
            ctx.res_ctx.clock_source_ref_count[i % 3] += 1;

            let target = Arc::new(Target::new(TargetId(i as u32 + 1), vec![stream]).unwrap());
            ctx.target_status.push(TargetStatus { target_id: target.id, surfaces: Vec::new() });
            ctx.targets.push(target);
        }
        ctx
    }

    /// Simulated collaborators for `connectors` HDMI connectors
    pub fn sim_services(connectors: u32) -> (DeviceServices, SimHandle) {
        sim::services((0..connectors).map(hdmi_connector).collect())
    }

    pub fn sim_device(version: DceVersion, connectors: u32, virtual_links: usize) -> (Device, SimHandle) {
        let (services, handle) = sim_services(connectors);
        let init = InitData::new(asic_for(version)).with_virtual_links(virtual_links);
        let device = Device::create(init, services).unwrap();
        (device, handle)
    }

    /// Target `id` with one stream per `(stream_id, link_index)` pair
    pub fn sim_target(device: &Device, id: u32, streams: &[(u32, u32)], timing: CrtcTiming) -> Arc<Target> {
        let streams = streams
            .iter()
            .map(|&(stream_id, link_index)| {
                let signal = device
                    .link(link_index)
                    .map(|l| l.connector_signal)
                    .unwrap_or(SignalType::Hdmi);
                let sink = Arc::new(Sink::new(link_index, SinkInitData { signal, dongle_max_pix_clk_khz: None }));
                Arc::new(Stream::new(StreamId(stream_id), sink, timing))
            })
            .collect();
        Arc::new(Target::new(TargetId(id), streams).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use crate::resource::DceVersion;
    use crate::types::CrtcTiming;

    #[test]
    fn test_bound_context_layout() {
        let ctx = bound_context(vec![
            hdmi_stream(1, 0, CrtcTiming::cea_1080p60()),
            hdmi_stream(2, 1, CrtcTiming::cea_720p60()),
        ]);
        assert_eq!(ctx.head_pipes().count(), 2);
        assert_eq!(ctx.target_count(), 2);
        assert_eq!(ctx.pipes()[1].tg, Some(1));
    }

    #[test]
    fn test_asic_fixtures_select_generation() {
        for version in [DceVersion::Dce80, DceVersion::Dce100, DceVersion::Dce110, DceVersion::Dce112] {
            assert_eq!(DceVersion::from_asic(&asic_for(version)).unwrap(), version);
        }
    }

    #[test]
    fn test_sim_target_uses_link_signal() {
        let (device, _sim) = sim_device(DceVersion::Dce112, 2, 0);
        let target = sim_target(&device, 1, &[(1, 0), (2, 1)], CrtcTiming::cea_1080p60());
        assert_eq!(target.stream_count(), 2);
        assert_eq!(target.streams[1].link_index(), 1);
    }
}
