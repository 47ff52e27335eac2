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

//! Display data types: targets, streams, surfaces and timings

use std::fmt;
use std::sync::Arc;

use dc_error::{DcError, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{clocks, limits};
use crate::link::Sink;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Identity of a target; two targets are the same iff their ids match
    TargetId,
    "target"
);
id_type!(
    /// Identity of a stream
    StreamId,
    "stream"
);
id_type!(
    /// Identity of a surface
    SurfaceId,
    "surface"
);

// ============================================================================
// Signals and Timing
// ============================================================================

/// Electrical/protocol signal carried by a link or stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    #[default]
    None,
    DviSingleLink,
    DviDualLink,
    Hdmi,
    Lvds,
    DisplayPort,
    DisplayPortMst,
    Edp,
    Virtual,
}

impl SignalType {
    pub fn is_dp(self) -> bool {
        matches!(self, SignalType::DisplayPort | SignalType::DisplayPortMst | SignalType::Edp)
    }

    pub fn is_tmds(self) -> bool {
        matches!(self, SignalType::DviSingleLink | SignalType::DviDualLink | SignalType::Hdmi)
    }

    /// Whether a stream on this signal needs its own PLL.
    ///
    /// DisplayPort streams run off the shared DP reference clock.
    pub fn needs_pll(self) -> bool {
        !self.is_dp() && !matches!(self, SignalType::Virtual | SignalType::None)
    }

    pub fn carries_audio(self) -> bool {
        matches!(self, SignalType::Hdmi | SignalType::DisplayPort | SignalType::DisplayPortMst)
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalType::None => "none",
            SignalType::DviSingleLink => "DVI-SL",
            SignalType::DviDualLink => "DVI-DL",
            SignalType::Hdmi => "HDMI",
            SignalType::Lvds => "LVDS",
            SignalType::DisplayPort => "DP",
            SignalType::DisplayPortMst => "DP-MST",
            SignalType::Edp => "eDP",
            SignalType::Virtual => "virtual",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelEncoding {
    Rgb,
    YCbCr422,
    YCbCr444,
    YCbCr420,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorDepth {
    Bpc6,
    Bpc8,
    Bpc10,
    Bpc12,
    Bpc16,
}

impl ColorDepth {
    pub fn bits_per_component(self) -> u32 {
        match self {
            ColorDepth::Bpc6 => 6,
            ColorDepth::Bpc8 => 8,
            ColorDepth::Bpc10 => 10,
            ColorDepth::Bpc12 => 12,
            ColorDepth::Bpc16 => 16,
        }
    }
}

/// CRTC timing of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrtcTiming {
    pub h_addressable: u32,
    pub h_total: u32,
    pub h_front_porch: u32,
    pub h_sync_width: u32,
    pub v_addressable: u32,
    pub v_total: u32,
    pub v_front_porch: u32,
    pub v_sync_width: u32,
    pub pix_clk_khz: u32,
    pub pixel_encoding: PixelEncoding,
    pub color_depth: ColorDepth,
}

impl CrtcTiming {
    /// Standard 1920x1080@60 (CEA VIC 16)
    pub fn cea_1080p60() -> Self {
        Self {
            h_addressable: 1920,
            h_total: 2200,
            h_front_porch: 88,
            h_sync_width: 44,
            v_addressable: 1080,
            v_total: 1125,
            v_front_porch: 4,
            v_sync_width: 5,
            pix_clk_khz: 148_500,
            pixel_encoding: PixelEncoding::Rgb,
            color_depth: ColorDepth::Bpc8,
        }
    }

    /// Standard 3840x2160@60 (CEA VIC 97)
    pub fn cea_2160p60() -> Self {
        Self {
            h_addressable: 3840,
            h_total: 4400,
            h_front_porch: 176,
            h_sync_width: 88,
            v_addressable: 2160,
            v_total: 2250,
            v_front_porch: 8,
            v_sync_width: 10,
            pix_clk_khz: 594_000,
            pixel_encoding: PixelEncoding::Rgb,
            color_depth: ColorDepth::Bpc8,
        }
    }

    /// Standard 1280x720@60 (CEA VIC 4)
    pub fn cea_720p60() -> Self {
        Self {
            h_addressable: 1280,
            h_total: 1650,
            h_front_porch: 110,
            h_sync_width: 40,
            v_addressable: 720,
            v_total: 750,
            v_front_porch: 5,
            v_sync_width: 5,
            pix_clk_khz: 74_250,
            pixel_encoding: PixelEncoding::Rgb,
            color_depth: ColorDepth::Bpc8,
        }
    }

    /// Structural sanity of the timing: blanking must fit porch and sync.
    pub fn is_valid(&self) -> bool {
        self.pix_clk_khz > 0
            && self.h_addressable > 0
            && self.v_addressable > 0
            && self.h_total > self.h_addressable
            && self.v_total > self.v_addressable
            && self
                .h_front_porch
                .checked_add(self.h_sync_width)
                .is_some_and(|blank| blank <= self.h_total - self.h_addressable)
            && self
                .v_front_porch
                .checked_add(self.v_sync_width)
                .is_some_and(|blank| blank <= self.v_total - self.v_addressable)
    }

    /// Bits per pixel on the wire
    pub fn bits_per_pixel(&self) -> u32 {
        let bpc = self.color_depth.bits_per_component();
        match self.pixel_encoding {
            PixelEncoding::Rgb | PixelEncoding::YCbCr444 => bpc * 3,
            PixelEncoding::YCbCr422 => bpc * 2,
            PixelEncoding::YCbCr420 => bpc * 3 / 2,
        }
    }

    /// Refresh rate in Hz, rounded to nearest
    pub fn refresh_hz(&self) -> u32 {
        if self.h_total == 0 || self.v_total == 0 {
            return 0;
        }
        let line_rate = self.pix_clk_khz as u64 * 1000 / self.h_total as u64;
        ((line_rate + self.v_total as u64 / 2) / self.v_total as u64) as u32
    }

    /// Duration of the vertical blank in microseconds
    pub fn vblank_time_us(&self) -> u32 {
        if self.pix_clk_khz == 0 {
            return 0;
        }
        let blank_pixels = self.h_total as u64 * self.v_total.saturating_sub(self.v_addressable) as u64;
        (blank_pixels * 1000 / self.pix_clk_khz as u64) as u32
    }

    /// Duration of one line in microseconds
    pub fn line_time_us(&self) -> u32 {
        if self.pix_clk_khz == 0 {
            return 0;
        }
        (self.h_total as u64 * 1000 / self.pix_clk_khz as u64) as u32
    }

    /// Two timings can share a vertical-blank lockstep when their total and
    /// active line/pixel counts and pixel clocks are identical.
    pub fn is_synchronizable_with(&self, other: &CrtcTiming) -> bool {
        self.h_total == other.h_total
            && self.v_total == other.v_total
            && self.h_addressable == other.h_addressable
            && self.v_addressable == other.v_addressable
            && self.pix_clk_khz == other.pix_clk_khz
    }
}

/// DisplayPort link configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LinkSettings {
    pub lane_count: u8,
    /// Link rate in units of 0.27 Gbps (0x06 RBR, 0x0A HBR, 0x14 HBR2)
    pub link_rate: u8,
    pub link_spread: bool,
}

impl LinkSettings {
    pub const HBR2_X4: LinkSettings = LinkSettings { lane_count: 4, link_rate: 0x14, link_spread: false };
    pub const HBR_X4: LinkSettings = LinkSettings { lane_count: 4, link_rate: 0x0A, link_spread: false };
    pub const RBR_X2: LinkSettings = LinkSettings { lane_count: 2, link_rate: 0x06, link_spread: false };

    /// Payload bandwidth in kbps after channel coding
    pub fn bandwidth_kbps(&self) -> u64 {
        let raw = self.lane_count as u64 * self.link_rate as u64 * clocks::LINK_RATE_UNIT_KHZ * 10;
        raw * clocks::LINK_CODING_EFFICIENCY_PERCENT / 100
    }
}

// ============================================================================
// Surfaces
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn sized(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersection of two rectangles; empty when they do not overlap
    pub fn intersect(&self, other: &Rect) -> Rect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x as i64 + self.width as i64).min(other.x as i64 + other.width as i64);
        let y1 = (self.y as i64 + self.height as i64).min(other.y as i64 + other.height as i64);
        if x1 <= x0 as i64 || y1 <= y0 as i64 {
            return Rect::new(x0, y0, 0, 0);
        }
        Rect::new(x0, y0, (x1 - x0 as i64) as u32, (y1 - y0 as i64) as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfacePixelFormat {
    Argb8888,
    Xrgb8888,
    Argb2101010,
    Rgb565,
    Argb16161616F,
    Nv12,
}

impl SurfacePixelFormat {
    /// Bytes fetched per pixel, doubled so 4:2:0 video stays integral
    pub fn bytes_per_pixel_x2(self) -> u64 {
        match self {
            SurfacePixelFormat::Rgb565 => 4,
            SurfacePixelFormat::Argb8888
            | SurfacePixelFormat::Xrgb8888
            | SurfacePixelFormat::Argb2101010 => 8,
            SurfacePixelFormat::Argb16161616F => 16,
            SurfacePixelFormat::Nv12 => 3,
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, SurfacePixelFormat::Nv12)
    }
}

/// Scan-out address of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PlaneAddress {
    pub primary: u64,
    /// Chroma plane for video formats
    pub chroma: Option<u64>,
}

/// A pixel buffer displayed on a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Surface {
    pub id: SurfaceId,
    pub visible: bool,
    pub format: SurfacePixelFormat,
    pub address: PlaneAddress,
    pub flip_immediate: bool,
    /// Region of the buffer that is scanned out
    pub src_rect: Rect,
    /// Where the region lands on the stream
    pub dst_rect: Rect,
    pub clip_rect: Rect,
}

impl Surface {
    /// Visible 32bpp surface covering `width` x `height` with no scaling
    pub fn new(id: SurfaceId, width: u32, height: u32) -> Self {
        let rect = Rect::sized(width, height);
        Self {
            id,
            visible: true,
            format: SurfacePixelFormat::Argb8888,
            address: PlaneAddress::default(),
            flip_immediate: false,
            src_rect: rect,
            dst_rect: rect,
            clip_rect: rect,
        }
    }

    pub fn with_format(mut self, format: SurfacePixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn with_address(mut self, address: PlaneAddress) -> Self {
        self.address = address;
        self
    }

    /// Scan out `src` into `dst` (scaling when the sizes differ)
    pub fn with_scaling(mut self, src: Rect, dst: Rect) -> Self {
        self.src_rect = src;
        self.dst_rect = dst;
        self.clip_rect = dst;
        self
    }
}

/// New scan-out address for a flip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlipAddrs {
    pub address: PlaneAddress,
    pub flip_immediate: bool,
}

// ============================================================================
// Streams and Targets
// ============================================================================

/// One timing/format configuration directed at one sink via one link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub id: StreamId,
    pub sink: Arc<Sink>,
    pub timing: CrtcTiming,
    pub signal: SignalType,
    /// Overrides the link's current settings for bandwidth validation
    pub link_settings: Option<LinkSettings>,
    pub src: Rect,
    pub dst: Rect,
}

impl Stream {
    pub fn new(id: StreamId, sink: Arc<Sink>, timing: CrtcTiming) -> Self {
        let signal = sink.signal;
        let rect = Rect::sized(timing.h_addressable, timing.v_addressable);
        Self {
            id,
            sink,
            timing,
            signal,
            link_settings: None,
            src: rect,
            dst: rect,
        }
    }

    pub fn with_link_settings(mut self, settings: LinkSettings) -> Self {
        self.link_settings = Some(settings);
        self
    }

    pub fn link_index(&self) -> u32 {
        self.sink.link_index
    }
}

/// Target configuration flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TargetFlags {
    /// Allows the vertical total to be adjusted at runtime
    #[serde(default)]
    pub variable_refresh: bool,
    /// Do not reserve audio engines for this target's streams
    #[serde(default)]
    pub disable_audio: bool,
}

/// A requested display output composed of an ordered list of streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: TargetId,
    pub streams: Vec<Arc<Stream>>,
    pub flags: TargetFlags,
}

impl Target {
    pub fn new(id: TargetId, streams: Vec<Arc<Stream>>) -> Result<Self> {
        if streams.is_empty() {
            return Err(DcError::invalid_config("streams", format!("{} has no streams", id)));
        }
        if streams.len() > limits::MAX_STREAMS_PER_TARGET {
            return Err(DcError::BoundExceeded {
                what: "streams per target",
                requested: streams.len(),
                max: limits::MAX_STREAMS_PER_TARGET,
            });
        }
        Ok(Self {
            id,
            streams,
            flags: TargetFlags::default(),
        })
    }

    pub fn with_flags(mut self, flags: TargetFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

/// A target and the surfaces to attach to it during validation
#[derive(Debug, Clone)]
pub struct ValidationSet {
    pub target: Arc<Target>,
    pub surfaces: Vec<Surface>,
}

impl ValidationSet {
    pub fn new(target: Arc<Target>) -> Self {
        Self { target, surfaces: Vec::new() }
    }

    pub fn with_surfaces(target: Arc<Target>, surfaces: Vec<Surface>) -> Self {
        Self { target, surfaces }
    }
}

// ============================================================================
// Power
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcpiPowerState {
    D0,
    D1,
    D2,
    D3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoPowerState {
    On,
    Standby,
    Suspend,
    Off,
    Hibernate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_sanity() {
        assert!(CrtcTiming::cea_1080p60().is_valid());
        let mut bad = CrtcTiming::cea_1080p60();
        bad.h_total = 1900;
        assert!(!bad.is_valid());

        let mut huge = CrtcTiming::cea_1080p60();
        huge.h_front_porch = u32::MAX;
        huge.v_sync_width = u32::MAX;
        assert!(!huge.is_valid());
    }

    #[test]
    fn test_refresh_and_blank_times() {
        let t = CrtcTiming::cea_1080p60();
        assert_eq!(t.refresh_hz(), 60);
        // 2200 * 45 pixels at 148.5 MHz
        assert_eq!(t.vblank_time_us(), 666);
        assert_eq!(t.line_time_us(), 14);
    }

    #[test]
    fn test_bits_per_pixel() {
        let mut t = CrtcTiming::cea_1080p60();
        assert_eq!(t.bits_per_pixel(), 24);
        t.pixel_encoding = PixelEncoding::YCbCr420;
        t.color_depth = ColorDepth::Bpc10;
        assert_eq!(t.bits_per_pixel(), 15);
    }

    #[test]
    fn test_link_bandwidth() {
        // HBR x4: 4 * 2.7 Gbps * 0.8
        assert_eq!(LinkSettings::HBR_X4.bandwidth_kbps(), 8_640_000);
    }

    #[test]
    fn test_synchronizable_requires_identical_counts() {
        let a = CrtcTiming::cea_1080p60();
        let mut b = a;
        b.h_front_porch = 90;
        b.h_sync_width = 42;
        assert!(a.is_synchronizable_with(&b));
        b.v_total = 1126;
        assert!(!a.is_synchronizable_with(&b));
    }

    #[test]
    fn test_rect_intersect() {
        let a = Rect::new(0, 0, 100, 100);
        let b = Rect::new(50, 50, 100, 100);
        assert_eq!(a.intersect(&b), Rect::new(50, 50, 50, 50));
        assert!(a.intersect(&Rect::new(200, 200, 10, 10)).is_empty());

        let wide = Rect::new(i32::MAX - 10, 0, u32::MAX, 100);
        assert_eq!(wide.intersect(&Rect::new(i32::MAX - 20, 0, 40, 10)), Rect::new(i32::MAX - 10, 0, 30, 10));
    }
}
