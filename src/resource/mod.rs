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

//! Resource pool
//!
//! Inventory of pipe resources for one display engine generation and the
//! logic that binds requested streams to them. Binding only produces a new
//! in-memory validation context; hardware is never touched here.
//!
//! Generations:
//! - DCE 8.0 (Sea Islands, Kaveri)
//! - DCE 10.0 (Tonga, Fiji)
//! - DCE 11.0 (Carrizo, Stoney)
//! - DCE 11.2 (Polaris)

pub mod dce100;
pub mod dce110;
pub mod dce112;
pub mod dce80;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dc_error::{DcError, DcStatus, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bandwidth::{self, ClockLimits};
use crate::constants::{asic, clocks, limits};
use crate::context::{ClockSourceId, PipeContext, TargetStatus, ValidationContext};
use crate::irq::IrqService;
use crate::link::LinkRegistry;
use crate::types::{SignalType, Stream, SurfacePixelFormat, Target, TargetFlags, ValidationSet};

// ============================================================================
// ASIC Identity
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VramType {
    Ddr3,
    #[default]
    Gddr5,
    Hbm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsicId {
    pub chip_family: u32,
    pub chip_id: u32,
    #[serde(default)]
    pub pci_revision_id: u32,
    pub hw_internal_rev: u32,
    pub vram_width_bits: u32,
    #[serde(default)]
    pub vram_type: VramType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DceVersion {
    Dce80,
    Dce100,
    Dce110,
    Dce112,
}

impl DceVersion {
    pub fn from_asic(asic_id: &AsicId) -> Result<Self> {
        match asic_id.chip_family {
            asic::FAMILY_CI | asic::FAMILY_KV => Ok(DceVersion::Dce80),
            asic::FAMILY_VI if asic_id.hw_internal_rev >= asic::VI_POLARIS10_P_A0 => Ok(DceVersion::Dce112),
            asic::FAMILY_VI => Ok(DceVersion::Dce100),
            asic::FAMILY_CZ => Ok(DceVersion::Dce110),
            other => Err(DcError::invalid_config(
                "asic_id.chip_family",
                format!("unsupported chip family {}", other),
            )),
        }
    }
}

impl fmt::Display for DceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DceVersion::Dce80 => "DCE 8.0",
            DceVersion::Dce100 => "DCE 10.0",
            DceVersion::Dce110 => "DCE 11.0",
            DceVersion::Dce112 => "DCE 11.2",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Generation Capabilities
// ============================================================================

/// Resource counts and ceilings of one generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolCaps {
    pub pipe_count: usize,
    pub stream_enc_count: usize,
    pub audio_count: usize,
    pub pll_count: usize,
    pub tg_max_pix_clk_khz: u32,
    pub hdmi_max_pix_clk_khz: u32,
}

/// Per-generation capability table
pub trait ResourceGeneration: fmt::Debug {
    fn version(&self) -> DceVersion;

    fn caps(&self) -> PoolCaps;

    fn clock_limits(&self) -> ClockLimits;

    fn supports_format(&self, format: SurfacePixelFormat) -> bool {
        !format.is_video()
    }

    /// Encoder pixel clock ceiling for a signal, `None` when unlimited
    fn encoder_max_pix_clk_khz(&self, signal: SignalType) -> Option<u32> {
        match signal {
            SignalType::DviSingleLink => Some(clocks::TMDS_SINGLE_LINK_MAX_KHZ),
            SignalType::DviDualLink => Some(clocks::TMDS_DUAL_LINK_MAX_KHZ),
            SignalType::Hdmi => Some(self.caps().hdmi_max_pix_clk_khz),
            SignalType::Lvds => Some(clocks::LVDS_MAX_KHZ),
            _ => None,
        }
    }

    /// Discrete display clock levels, for generations that only run at those
    fn clock_levels(&self) -> Option<&'static [u32]> {
        None
    }
}

fn create_generation(asic_id: &AsicId) -> Result<Box<dyn ResourceGeneration>> {
    let generation: Box<dyn ResourceGeneration> = match DceVersion::from_asic(asic_id)? {
        DceVersion::Dce80 => Box::new(dce80::Dce80::new(asic_id.chip_family == asic::FAMILY_KV)),
        DceVersion::Dce100 => Box::new(dce100::Dce100),
        DceVersion::Dce110 => Box::new(dce110::Dce110::new(asic_id.hw_internal_rev >= asic::CZ_STONEY_A0)),
        DceVersion::Dce112 => Box::new(dce112::Dce112),
    };
    Ok(generation)
}

// ============================================================================
// Resource Pool
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEncoderKind {
    Digital,
    Virtual,
}

impl StreamEncoderKind {
    fn supports(self, signal: SignalType) -> bool {
        match self {
            StreamEncoderKind::Digital => !matches!(signal, SignalType::Virtual | SignalType::None),
            StreamEncoderKind::Virtual => signal == SignalType::Virtual,
        }
    }
}

#[derive(Debug)]
pub struct ResourcePool {
    generation: Box<dyn ResourceGeneration>,
    caps: PoolCaps,
    limits: ClockLimits,
    vram_width_bits: u32,
    stream_encoders: Vec<StreamEncoderKind>,
    pub irqs: IrqService,
}

impl ResourcePool {
    /// Build the pool for the generation identified by `asic_id`
    pub fn create(asic_id: &AsicId, num_virtual_links: usize) -> Result<Self> {
        let generation = create_generation(asic_id)?;
        let caps = generation.caps();
        if caps.pipe_count > limits::MAX_PIPES {
            return Err(DcError::BoundExceeded {
                what: "pipes",
                requested: caps.pipe_count,
                max: limits::MAX_PIPES,
            });
        }

        let mut stream_encoders = vec![StreamEncoderKind::Digital; caps.stream_enc_count];
        stream_encoders.extend(std::iter::repeat(StreamEncoderKind::Virtual).take(num_virtual_links));

        info!(
            version = %generation.version(),
            pipes = caps.pipe_count,
            stream_encoders = stream_encoders.len(),
            audios = caps.audio_count,
            "Resource pool created"
        );

        Ok(Self {
            limits: generation.clock_limits(),
            generation,
            caps,
            vram_width_bits: asic_id.vram_width_bits,
            stream_encoders,
            irqs: IrqService::new(),
        })
    }

    pub fn version(&self) -> DceVersion {
        self.generation.version()
    }

    pub fn caps(&self) -> &PoolCaps {
        &self.caps
    }

    pub fn clock_limits(&self) -> &ClockLimits {
        &self.limits
    }

    pub fn pipe_count(&self) -> usize {
        self.caps.pipe_count
    }

    pub fn audio_count(&self) -> usize {
        self.caps.audio_count
    }

    /// Most targets that can be committed at once
    pub fn max_targets(&self) -> usize {
        self.caps
            .pipe_count
            .min(self.stream_encoders.len())
            .min(limits::MAX_TARGETS)
    }

    pub fn supports_format(&self, format: SurfacePixelFormat) -> bool {
        self.generation.supports_format(format)
    }

    /// Fresh context with nothing bound
    pub fn new_context(&self) -> ValidationContext {
        ValidationContext::new(
            self.caps.pipe_count,
            self.stream_encoders.len(),
            self.caps.audio_count,
            self.caps.pll_count,
        )
    }

    /// Build a candidate context binding every stream of `sets`.
    ///
    /// Streams keep the pipe they had in `current` when their timing is
    /// unchanged and the pipe is still free; everything else takes the
    /// lowest free pipe.
    pub fn validate_with_context(
        &self,
        links: &LinkRegistry,
        current: &ValidationContext,
        sets: &[ValidationSet],
        visual_confirm: bool,
    ) -> Result<ValidationContext> {
        if sets.len() > self.max_targets() {
            return Err(DcError::resource(DcStatus::NoControllerResource));
        }

        let mut seen_targets = HashSet::new();
        let mut seen_streams = HashSet::new();
        for set in sets {
            if !seen_targets.insert(set.target.id) {
                return Err(DcError::unexpected(format!("{} requested twice", set.target.id)));
            }
            for stream in &set.target.streams {
                if !seen_streams.insert(stream.id) {
                    return Err(DcError::unexpected(format!("{} requested twice", stream.id)));
                }
            }
        }

        let mut ctx = self.new_context();
        let mut pending: Vec<(&Arc<Stream>, TargetFlags)> = Vec::new();

        for set in sets {
            for stream in &set.target.streams {
                let reuse = current.head_pipe_for_stream(stream.id).and_then(|old| {
                    let old_stream = old.stream.as_ref()?;
                    let free = old.pipe_idx < ctx.res_ctx.pipe_count && !ctx.res_ctx.pipe_ctx[old.pipe_idx].is_bound();
                    (free && old_stream.timing == stream.timing).then_some(old.pipe_idx)
                });
                match reuse {
                    Some(pipe_idx) => self.bind_stream(&mut ctx, pipe_idx, stream, set.target.flags, links)?,
                    None => pending.push((stream, set.target.flags)),
                }
            }
        }

        for (stream, flags) in pending {
            let pipe_idx = ctx
                .free_pipe()
                .ok_or(DcError::ResourceExhausted(DcStatus::NoControllerResource))?;
            self.bind_stream(&mut ctx, pipe_idx, stream, flags, links)?;
        }

        for set in sets {
            ctx.targets.push(Arc::clone(&set.target));
            ctx.target_status.push(TargetStatus { target_id: set.target.id, surfaces: Vec::new() });
        }
        for set in sets.iter().filter(|s| !s.surfaces.is_empty()) {
            ctx.attach_surfaces(&set.target, &set.surfaces, |f| self.supports_format(f), visual_confirm)?;
        }

        self.validate_bandwidth(&mut ctx)?;
        ctx.pp_display_cfg = bandwidth::build_display_configuration(&ctx, links);

        debug!(
            targets = ctx.target_count(),
            pipes = ctx.bound_pipes().count(),
            dispclk_khz = ctx.bw_results.dispclk_khz,
            "Candidate context validated"
        );
        Ok(ctx)
    }

    /// Validate `target` as if it were the only one on an idle pool
    pub fn validate_guaranteed(&self, links: &LinkRegistry, target: &Arc<Target>) -> Result<ValidationContext> {
        let empty = self.new_context();
        self.validate_with_context(links, &empty, &[ValidationSet::new(Arc::clone(target))], false)
    }

    fn bind_stream(
        &self,
        ctx: &mut ValidationContext,
        pipe_idx: usize,
        stream: &Arc<Stream>,
        flags: TargetFlags,
        links: &LinkRegistry,
    ) -> Result<()> {
        let link_index = stream.link_index();
        let link = links.get(link_index).ok_or(DcError::InvalidLink(link_index))?;
        let timing = &stream.timing;

        if !timing.is_valid() || timing.pix_clk_khz > self.caps.tg_max_pix_clk_khz {
            warn!(stream = %stream.id, pix_clk_khz = timing.pix_clk_khz, "Timing rejected by timing generator");
            return Err(DcError::validation(DcStatus::FailControllerValidate));
        }

        let stream_enc = ctx
            .res_ctx
            .stream_enc_acquired
            .iter()
            .zip(&self.stream_encoders)
            .position(|(acquired, kind)| !acquired && kind.supports(stream.signal))
            .ok_or(DcError::ResourceExhausted(DcStatus::NoStreamEngResource))?;

        if let Some(max) = self.generation.encoder_max_pix_clk_khz(stream.signal) {
            if timing.pix_clk_khz > max {
                warn!(stream = %stream.id, signal = %stream.signal, max_khz = max, "Timing rejected by encoder");
                return Err(DcError::validation(DcStatus::FailEncValidate));
            }
        }

        if stream.signal.is_dp() {
            let settings = stream.link_settings.unwrap_or(link.cur_link_settings);
            let required_kbps = timing.pix_clk_khz as u64 * timing.bits_per_pixel() as u64;
            if required_kbps > settings.bandwidth_kbps() {
                warn!(
                    stream = %stream.id,
                    required_kbps,
                    available_kbps = settings.bandwidth_kbps(),
                    "Link bandwidth too low"
                );
                return Err(DcError::validation(DcStatus::NoDpLinkBandwidth));
            }
        }

        if let Some(max_khz) = stream.sink.dongle_max_pix_clk_khz {
            if timing.pix_clk_khz > max_khz {
                return Err(DcError::ProtocolLimitExceeded { required_khz: timing.pix_clk_khz, max_khz });
            }
        }

        let clock_source = if stream.signal.is_dp() {
            Some(ClockSourceId::DpReference)
        } else if stream.signal.needs_pll() {
            Some(self.acquire_pll(ctx, stream)?)
        } else {
            None
        };

        let audio = if !flags.disable_audio && stream.signal.carries_audio() && stream.sink.supports_audio() {
            let free = ctx.res_ctx.audio_acquired.iter().position(|acquired| !acquired);
            if let Some(inst) = free {
                ctx.res_ctx.audio_acquired[inst] = true;
            }
            free
        } else {
            None
        };

        ctx.res_ctx.stream_enc_acquired[stream_enc] = true;
        ctx.res_ctx.pipe_ctx[pipe_idx] = PipeContext {
            pipe_idx,
            stream: Some(Arc::clone(stream)),
            tg: Some(pipe_idx),
            stream_enc: Some(stream_enc),
            link_enc: Some(link_index),
            audio,
            clock_source,
            ..PipeContext::default()
        };

        debug!(
            stream = %stream.id,
            pipe = pipe_idx,
            stream_enc,
            audio = ?audio,
            clock_source = ?clock_source,
            "Stream bound"
        );
        Ok(())
    }

    /// Share a PLL with a synchronizable stream or take the lowest free one
    fn acquire_pll(&self, ctx: &mut ValidationContext, stream: &Stream) -> Result<ClockSourceId> {
        let shared = ctx.head_pipes().find_map(|pipe| {
            let other = pipe.stream.as_ref()?;
            match pipe.clock_source {
                Some(ClockSourceId::Pll(inst))
                    if other.signal.needs_pll() && other.timing.is_synchronizable_with(&stream.timing) =>
                {
                    Some(inst)
                }
                _ => None,
            }
        });

        let inst = match shared {
            Some(inst) => inst,
            None => ctx
                .res_ctx
                .clock_source_ref_count
                .iter()
                .position(|count| *count == 0)
                .ok_or(DcError::ResourceExhausted(DcStatus::NoClockSourceResource))?,
        };
        ctx.res_ctx.clock_source_ref_count[inst] += 1;
        Ok(ClockSourceId::Pll(inst))
    }

    /// Compute clock requirements of `ctx` and check them against the platform
    pub fn validate_bandwidth(&self, ctx: &mut ValidationContext) -> Result<()> {
        ctx.bw_results = bandwidth::calculate(ctx, self.vram_width_bits, &self.limits);
        if !ctx.bw_results.fits(&self.limits) {
            warn!(
                yclk_khz = ctx.bw_results.required_yclk_khz,
                sclk_khz = ctx.bw_results.required_sclk_khz,
                dispclk_khz = ctx.bw_results.dispclk_khz,
                "Bandwidth validation failed"
            );
            return Err(DcError::validation(DcStatus::FailBandwidthValidate));
        }
        Ok(())
    }

    pub fn supports_clk_constraints(&self) -> bool {
        self.generation.clock_levels().is_some()
    }

    /// Copy of `ctx` with the display clock raised to the next supported level
    pub fn apply_clk_constraints(&self, ctx: &ValidationContext) -> Option<ValidationContext> {
        let levels = self.generation.clock_levels()?;
        let required = ctx.bw_results.dispclk_khz;
        let level = levels.iter().copied().find(|level| *level >= required)?;

        let mut adjusted = ctx.clone();
        adjusted.bw_results.dispclk_khz = level;
        adjusted.pp_display_cfg.disp_clk_khz = level;
        Some(adjusted)
    }
}

impl Drop for ResourcePool {
    fn drop(&mut self) {
        debug!(version = %self.generation.version(), "Resource pool destroyed");
    }
}
