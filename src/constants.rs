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

//! Constants and hardware limits for dcpipe
//!
//! Centralizes all hardware capacity limits, clock ceilings and defaults.
//! The capacity limits are hardware maxima: tables are sized from them and
//! never grow past them.

/// Hardware capacity limits
pub mod limits {
    /// Physical pipe slots on the largest supported display engine
    pub const MAX_PIPES: usize = 6;

    /// Targets that can be committed at once
    pub const MAX_TARGETS: usize = 6;

    /// Streams carried by a single target
    pub const MAX_STREAMS_PER_TARGET: usize = 4;

    /// Surfaces (planes) attached to a single target
    pub const MAX_SURFACES: usize = 3;

    /// Connectors the firmware tables can enumerate
    pub const MAX_CONNECTORS: usize = 6;

    /// Virtual (headless) links a caller may request
    pub const MAX_VIRTUAL_LINKS: usize = 4;

    /// Total link table capacity
    pub const MAX_LINKS: usize = MAX_CONNECTORS + MAX_VIRTUAL_LINKS;

    /// Remote (multi-stream) sinks attached to one link
    pub const MAX_SINKS_PER_LINK: usize = 4;

    /// Largest identity block accepted from a sink
    pub const MAX_EDID_BUFFER_SIZE: usize = 512;
}

/// Sideband (AUX/DDC) channel limits
pub mod sideband {
    /// Largest payload of a single AUX transaction
    pub const MAX_AUX_TRANSFER: usize = 16;

    /// Highest addressable DPCD register (20-bit address space)
    pub const DPCD_ADDRESS_MAX: u32 = 0xF_FFFF;

    /// Receiver capability field: maximum link rate
    pub const DPCD_MAX_LINK_RATE: u32 = 0x0001;

    /// Receiver capability field: maximum lane count
    pub const DPCD_MAX_LANE_COUNT: u32 = 0x0002;
}

/// Clock and bandwidth constants
pub mod clocks {
    /// Effective memory clock is reported to the platform divided by this
    pub const MEMORY_TYPE_MULTIPLIER: u32 = 2;

    /// Display clock margin applied over the scaled pixel rate (percent)
    pub const DISPCLK_MARGIN_PERCENT: u64 = 105;

    /// Usable share of raw memory bandwidth (percent)
    pub const MEMORY_EFFICIENCY_PERCENT: u64 = 80;

    /// Bytes returned per engine clock by the display data return bus
    pub const RETURN_BUS_BYTES_PER_CLK: u64 = 32;

    /// Engine clock floor while the engine is in deep sleep (kHz)
    pub const SCLK_DEEP_SLEEP_KHZ: u32 = 8_000;

    /// DisplayPort link rate unit (kHz of symbol clock per rate unit)
    pub const LINK_RATE_UNIT_KHZ: u64 = 27_000;

    /// 8b/10b channel coding payload share (percent)
    pub const LINK_CODING_EFFICIENCY_PERCENT: u64 = 80;

    /// Single-link TMDS ceiling (kHz)
    pub const TMDS_SINGLE_LINK_MAX_KHZ: u32 = 165_000;

    /// Dual-link TMDS ceiling (kHz)
    pub const TMDS_DUAL_LINK_MAX_KHZ: u32 = 330_000;

    /// LVDS ceiling (kHz)
    pub const LVDS_MAX_KHZ: u32 = 112_000;
}

/// Register poll budgets
pub mod polling {
    /// Default number of polls while waiting for a blank/unblank to land
    pub const DEFAULT_POLL_RETRIES: u32 = 100;

    /// Default delay between polls (microseconds)
    pub const DEFAULT_POLL_DELAY_US: u64 = 10;
}

/// Sink identity block (EDID) layout
pub mod edid {
    /// Fixed 8-byte block header
    pub const HEADER: [u8; 8] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];

    /// Size of the base block and of every extension block
    pub const BLOCK_SIZE: usize = 128;

    /// Offset of the extension count byte
    pub const EXTENSION_COUNT_OFFSET: usize = 126;

    /// Offsets of the four 18-byte descriptors
    pub const DESCRIPTOR_OFFSETS: [usize; 4] = [54, 72, 90, 108];

    /// Descriptor tag: display product name
    pub const TAG_PRODUCT_NAME: u8 = 0xFC;

    /// Descriptor tag: display range limits
    pub const TAG_RANGE_LIMITS: u8 = 0xFD;

    /// CTA-861 extension block tag
    pub const CTA_EXTENSION_TAG: u8 = 0x02;

    /// CTA flag bit: basic audio supported
    pub const CTA_BASIC_AUDIO: u8 = 0x40;
}

/// Interrupt source ids delivered by the interrupt handler
pub mod irq {
    /// First vertical-blank source id (one per timing generator)
    pub const SRC_VBLANK_FIRST: u32 = 1;

    /// Page-flip source ids are even, one per timing generator
    pub const SRC_PFLIP_FIRST: u32 = 8;

    /// Hot-plug detect source id; the extension id selects the pin
    pub const SRC_HPD: u32 = 42;

    /// Hot-plug detect pins
    pub const HPD_PIN_COUNT: u32 = 6;
}

/// ASIC identity values used to pick the display engine generation
pub mod asic {
    /// Sea Islands discrete parts
    pub const FAMILY_CI: u32 = 120;

    /// Kaveri/Kabini APUs
    pub const FAMILY_KV: u32 = 125;

    /// Volcanic Islands discrete parts
    pub const FAMILY_VI: u32 = 130;

    /// Carrizo/Stoney APUs
    pub const FAMILY_CZ: u32 = 135;

    /// First Polaris internal revision within the VI family
    pub const VI_POLARIS10_P_A0: u32 = 0x50;

    /// First Stoney internal revision within the CZ family
    pub const CZ_STONEY_A0: u32 = 0x61;
}
