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

//! DCE 8.0 (Sea Islands, Kaveri)

use super::{DceVersion, PoolCaps, ResourceGeneration};
use crate::bandwidth::ClockLimits;
use crate::types::SurfacePixelFormat;

#[derive(Debug, Clone, Copy)]
pub struct Dce80 {
    /// Kaveri APUs carry four pipes instead of six
    apu: bool,
}

impl Dce80 {
    pub fn new(apu: bool) -> Self {
        Self { apu }
    }
}

impl ResourceGeneration for Dce80 {
    fn version(&self) -> DceVersion {
        DceVersion::Dce80
    }

    fn caps(&self) -> PoolCaps {
        let pipes = if self.apu { 4 } else { 6 };
        PoolCaps {
            pipe_count: pipes,
            stream_enc_count: pipes,
            audio_count: pipes,
            pll_count: 3,
            tg_max_pix_clk_khz: 400_000,
            hdmi_max_pix_clk_khz: 297_000,
        }
    }

    fn clock_limits(&self) -> ClockLimits {
        ClockLimits {
            max_yclk_khz: 6_000_000,
            max_sclk_khz: 800_000,
            max_dispclk_khz: 600_000,
            min_dispclk_khz: 300_000,
            mclk_switch_latency_us: 350,
        }
    }

    fn supports_format(&self, format: SurfacePixelFormat) -> bool {
        !matches!(format, SurfacePixelFormat::Nv12 | SurfacePixelFormat::Argb16161616F)
    }
}
