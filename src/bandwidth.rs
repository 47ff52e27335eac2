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

//! Bandwidth and clock requirement calculation
//!
//! Turns the pipes bound in a validation context into the aggregate memory,
//! engine and display clocks the platform must provide, and into the display
//! requirements record handed to the power-management service.

use serde::{Deserialize, Serialize};

use crate::constants::clocks;
use crate::context::{PipeContext, ValidationContext};
use crate::link::{LinkEncoder, LinkRegistry};
use crate::types::{LinkSettings, SignalType};

/// Platform clock ceilings of one hardware generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockLimits {
    /// Effective memory clock ceiling (kHz)
    pub max_yclk_khz: u32,
    pub max_sclk_khz: u32,
    pub max_dispclk_khz: u32,
    /// Display clock floor while any pipe is bound
    pub min_dispclk_khz: u32,
    /// Time the memory controller needs to switch clocks (µs)
    pub mclk_switch_latency_us: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BandwidthResults {
    pub required_yclk_khz: u32,
    pub required_sclk_khz: u32,
    pub required_sclk_deep_sleep_khz: u32,
    pub dispclk_khz: u32,
    pub required_blackout_duration_us: u32,
    pub all_displays_in_sync: bool,
    pub nbp_state_change_enable: bool,
    pub cpuc_state_change_enable: bool,
    pub cpup_state_change_enable: bool,
}

impl BandwidthResults {
    /// Whether every requirement fits under the platform ceilings
    pub fn fits(&self, limits: &ClockLimits) -> bool {
        self.required_yclk_khz <= limits.max_yclk_khz
            && self.required_sclk_khz <= limits.max_sclk_khz
            && self.dispclk_khz <= limits.max_dispclk_khz
    }
}

/// Downscale factor as a (numerator, denominator) pair, never below 1:1
fn downscale(src: u32, dst: u32) -> (u64, u64) {
    if dst == 0 || src <= dst {
        (1, 1)
    } else {
        (src as u64, dst as u64)
    }
}

/// Memory fetch of one pipe in kB/s
fn pipe_fetch_kbps(pipe: &PipeContext) -> u64 {
    let Some(stream) = &pipe.stream else {
        return 0;
    };
    let pix_clk = stream.timing.pix_clk_khz as u64;
    match &pipe.surface {
        Some(surface) => {
            let (num, den) = downscale(pipe.scaling.v_ratio.src, pipe.scaling.v_ratio.dst);
            pix_clk * surface.format.bytes_per_pixel_x2() * num / (2 * den)
        }
        // Pipes without a plane still scan out a stream-depth background
        None => pix_clk * ((stream.timing.bits_per_pixel() as u64 + 7) / 8),
    }
}

fn pipe_dispclk_khz(pipe: &PipeContext) -> u64 {
    let Some(stream) = &pipe.stream else {
        return 0;
    };
    let (h_num, h_den) = downscale(pipe.scaling.h_ratio.src, pipe.scaling.h_ratio.dst);
    let (v_num, v_den) = downscale(pipe.scaling.v_ratio.src, pipe.scaling.v_ratio.dst);
    stream.timing.pix_clk_khz as u64 * h_num * v_num * clocks::DISPCLK_MARGIN_PERCENT / (h_den * v_den * 100)
}

/// Shortest vertical blank over all head pipes, `None` with nothing bound
pub fn min_vblank_time_us(ctx: &ValidationContext) -> Option<u32> {
    ctx.head_pipes()
        .filter_map(|pipe| pipe.stream.as_ref())
        .map(|stream| stream.timing.vblank_time_us())
        .min()
}

/// Compute clock requirements of every bound pipe in `ctx`
pub fn calculate(ctx: &ValidationContext, vram_width_bits: u32, limits: &ClockLimits) -> BandwidthResults {
    let bound: Vec<&PipeContext> = ctx.bound_pipes().collect();
    if bound.is_empty() {
        return BandwidthResults {
            nbp_state_change_enable: true,
            cpuc_state_change_enable: true,
            cpup_state_change_enable: true,
            ..BandwidthResults::default()
        };
    }

    let total_kbps: u64 = bound.iter().map(|p| pipe_fetch_kbps(p)).sum();
    let heaviest_kbps = bound.iter().map(|p| pipe_fetch_kbps(p)).max().unwrap_or(0);
    let bus_bytes = (vram_width_bits / 8).max(1) as u64;

    let yclk = total_kbps * 100 / (bus_bytes * clocks::MEMORY_EFFICIENCY_PERCENT);
    let sclk = total_kbps / clocks::RETURN_BUS_BYTES_PER_CLK;
    let deep_sleep = (heaviest_kbps / clocks::RETURN_BUS_BYTES_PER_CLK).max(clocks::SCLK_DEEP_SLEEP_KHZ as u64);
    let dispclk = bound
        .iter()
        .map(|p| pipe_dispclk_khz(p))
        .max()
        .unwrap_or(0)
        .max(limits.min_dispclk_khz as u64);

    let min_vblank = min_vblank_time_us(ctx).unwrap_or(0);
    let pstate_ok = min_vblank >= limits.mclk_switch_latency_us;

    let mut heads = ctx.head_pipes().filter_map(|p| p.stream.as_ref());
    let all_displays_in_sync = match heads.next() {
        Some(first) => heads.all(|s| s.timing.is_synchronizable_with(&first.timing)),
        None => false,
    };

    BandwidthResults {
        required_yclk_khz: clamp_u32(yclk),
        required_sclk_khz: clamp_u32(sclk),
        required_sclk_deep_sleep_khz: clamp_u32(deep_sleep),
        dispclk_khz: clamp_u32(dispclk),
        required_blackout_duration_us: min_vblank,
        all_displays_in_sync,
        nbp_state_change_enable: pstate_ok,
        cpuc_state_change_enable: pstate_ok,
        cpup_state_change_enable: pstate_ok,
    }
}

fn clamp_u32(v: u64) -> u32 {
    v.min(u32::MAX as u64) as u32
}

// ============================================================================
// Display Requirements
// ============================================================================

/// Per-display entry of the display requirements record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SingleDisplayConfig {
    pub signal: SignalType,
    pub pipe_idx: usize,
    pub src_width: u32,
    pub src_height: u32,
    pub pixel_clock_khz: u32,
    pub ddi_channel_mapping: u8,
    pub transmitter: Option<u8>,
    pub link_settings: LinkSettings,
    pub sym_clock_khz: u32,
    pub v_refresh: u32,
}

/// Requirements handed to the platform power-management service
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisplayConfiguration {
    pub all_displays_in_sync: bool,
    pub nb_pstate_switch_disable: bool,
    pub cpu_cc6_disable: bool,
    pub cpu_pstate_disable: bool,
    pub cpu_pstate_separation_time_us: u32,
    pub min_memory_clock_khz: u32,
    pub min_engine_clock_khz: u32,
    pub min_engine_clock_deep_sleep_khz: u32,
    pub avail_mclk_switch_time_us: u32,
    pub disp_clk_khz: u32,
    pub display_count: usize,
    pub disp_configs: Vec<SingleDisplayConfig>,
    /// Only reported when exactly one display is active
    pub crtc_index: Option<usize>,
    pub line_time_us: Option<u32>,
}

/// Build the display requirements record of `ctx`
pub fn build_display_configuration(ctx: &ValidationContext, links: &LinkRegistry) -> DisplayConfiguration {
    let bw = &ctx.bw_results;

    let mut disp_configs = Vec::new();
    for target in &ctx.targets {
        for stream in &target.streams {
            let Some(pipe) = ctx.head_pipe_for_stream(stream.id) else {
                continue;
            };
            let link = links.get(stream.link_index());
            let link_settings = stream
                .link_settings
                .or_else(|| link.map(|l| l.cur_link_settings))
                .unwrap_or_default();
            let sym_clock_khz = if stream.signal.is_dp() {
                (link_settings.link_rate as u64 * clocks::LINK_RATE_UNIT_KHZ) as u32
            } else {
                stream.timing.pix_clk_khz
            };
            disp_configs.push(SingleDisplayConfig {
                signal: stream.signal,
                pipe_idx: pipe.pipe_idx,
                src_width: stream.src.width,
                src_height: stream.src.height,
                pixel_clock_khz: stream.timing.pix_clk_khz,
                ddi_channel_mapping: link.map(|l| l.ddi_channel_mapping).unwrap_or(0),
                transmitter: link.and_then(|l| match l.link_enc {
                    LinkEncoder::Physical { transmitter } => Some(transmitter),
                    LinkEncoder::Virtual => None,
                }),
                link_settings,
                sym_clock_khz,
                v_refresh: stream.timing.refresh_hz(),
            });
        }
    }

    let mut config = DisplayConfiguration {
        all_displays_in_sync: bw.all_displays_in_sync,
        nb_pstate_switch_disable: !bw.nbp_state_change_enable,
        cpu_cc6_disable: !bw.cpuc_state_change_enable,
        cpu_pstate_disable: !bw.cpup_state_change_enable,
        cpu_pstate_separation_time_us: bw.required_blackout_duration_us,
        min_memory_clock_khz: bw.required_yclk_khz / clocks::MEMORY_TYPE_MULTIPLIER,
        min_engine_clock_khz: bw.required_sclk_khz,
        min_engine_clock_deep_sleep_khz: bw.required_sclk_deep_sleep_khz,
        avail_mclk_switch_time_us: min_vblank_time_us(ctx).unwrap_or(0),
        disp_clk_khz: bw.dispclk_khz,
        display_count: disp_configs.len(),
        disp_configs,
        crtc_index: None,
        line_time_us: None,
    };

    if config.display_count == 1 {
        if let Some(pipe) = ctx.head_pipes().next() {
            config.crtc_index = pipe.tg;
            config.line_time_us = pipe.stream.as_ref().map(|s| s.timing.line_time_us());
        }
    }

    config
}
