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

//! DCE 11.0 (Carrizo, Stoney)
//!
//! The APU display clock only runs at a few discrete levels, and the video
//! underlay pipe accepts 4:2:0 surfaces.

use super::{DceVersion, PoolCaps, ResourceGeneration};
use crate::bandwidth::ClockLimits;
use crate::types::SurfacePixelFormat;

const DISPCLK_LEVELS_KHZ: [u32; 6] = [300_000, 411_430, 480_000, 533_340, 576_000, 625_000];

#[derive(Debug, Clone, Copy)]
pub struct Dce110 {
    stoney: bool,
}

impl Dce110 {
    pub fn new(stoney: bool) -> Self {
        Self { stoney }
    }
}

impl ResourceGeneration for Dce110 {
    fn version(&self) -> DceVersion {
        DceVersion::Dce110
    }

    fn caps(&self) -> PoolCaps {
        let pipes = if self.stoney { 2 } else { 3 };
        PoolCaps {
            pipe_count: pipes,
            stream_enc_count: pipes,
            audio_count: pipes,
            pll_count: 2,
            tg_max_pix_clk_khz: 600_000,
            hdmi_max_pix_clk_khz: 594_000,
        }
    }

    fn clock_limits(&self) -> ClockLimits {
        ClockLimits {
            max_yclk_khz: 2_133_000,
            max_sclk_khz: 800_000,
            max_dispclk_khz: 643_000,
            min_dispclk_khz: 300_000,
            mclk_switch_latency_us: 460,
        }
    }

    fn supports_format(&self, _format: SurfacePixelFormat) -> bool {
        true
    }

    fn clock_levels(&self) -> Option<&'static [u32]> {
        Some(&DISPCLK_LEVELS_KHZ)
    }
}
