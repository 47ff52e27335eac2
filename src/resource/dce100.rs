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

//! DCE 10.0 (Tonga, Fiji)

use super::{DceVersion, PoolCaps, ResourceGeneration};
use crate::bandwidth::ClockLimits;

#[derive(Debug, Clone, Copy, Default)]
pub struct Dce100;

impl ResourceGeneration for Dce100 {
    fn version(&self) -> DceVersion {
        DceVersion::Dce100
    }

    fn caps(&self) -> PoolCaps {
        PoolCaps {
            pipe_count: 6,
            stream_enc_count: 6,
            audio_count: 6,
            pll_count: 3,
            tg_max_pix_clk_khz: 600_000,
            hdmi_max_pix_clk_khz: 297_000,
        }
    }

    fn clock_limits(&self) -> ClockLimits {
        ClockLimits {
            max_yclk_khz: 7_000_000,
            max_sclk_khz: 1_000_000,
            max_dispclk_khz: 643_000,
            min_dispclk_khz: 300_000,
            mclk_switch_latency_us: 300,
        }
    }
}
