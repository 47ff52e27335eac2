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

//! Validation contexts
//!
//! A validation context is a complete proposed hardware configuration: one
//! pipe binding record per physical pipe slot, the admitted targets with
//! their attached surfaces, and the computed clock requirements. Cloning a
//! context is a deep element-wise copy, so a candidate can be validated and
//! thrown away without touching the published one.

use std::sync::Arc;

use dc_error::{DcError, DcStatus, Result};
use serde::Serialize;
use tracing::trace;

use crate::bandwidth::{BandwidthResults, DisplayConfiguration};
use crate::constants::limits;
use crate::types::{FlipAddrs, Rect, Stream, StreamId, Surface, SurfaceId, SurfacePixelFormat, Target, TargetId};

// ============================================================================
// Pipe Bindings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ClockSourceId {
    Pll(usize),
    /// Shared DisplayPort reference clock
    DpReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ScalingRatio {
    pub src: u32,
    pub dst: u32,
}

impl ScalingRatio {
    pub fn is_identity(&self) -> bool {
        self.src == self.dst
    }
}

/// Scaler programming derived from a surface and its stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ScalerData {
    pub h_ratio: ScalingRatio,
    pub v_ratio: ScalingRatio,
    /// Region of the surface fetched by the pipe
    pub viewport: Rect,
    /// Region of the stream the pipe writes
    pub recout: Rect,
    pub h_taps: u8,
    pub v_taps: u8,
}

/// Binding of one physical pipe slot
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipeContext {
    pub pipe_idx: usize,
    pub stream: Option<Arc<Stream>>,
    pub surface: Option<Surface>,
    /// Timing generator instance
    pub tg: Option<usize>,
    pub stream_enc: Option<usize>,
    /// Index of the link whose encoder drives this pipe
    pub link_enc: Option<u32>,
    pub audio: Option<usize>,
    pub clock_source: Option<ClockSourceId>,
    /// Pipe blending above this one when several planes share a stream
    pub top_pipe: Option<usize>,
    pub bottom_pipe: Option<usize>,
    pub scaling: ScalerData,
}

impl PipeContext {
    pub fn empty(pipe_idx: usize) -> Self {
        Self { pipe_idx, ..Self::default() }
    }

    pub fn is_bound(&self) -> bool {
        self.stream.is_some()
    }

    /// Bound pipe that owns its stream's timing generator
    pub fn is_head(&self) -> bool {
        self.stream.is_some() && self.top_pipe.is_none()
    }
}

/// Resource usage of one context
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceContext {
    pub pipe_ctx: [PipeContext; limits::MAX_PIPES],
    pub pipe_count: usize,
    pub stream_enc_acquired: Vec<bool>,
    pub audio_acquired: Vec<bool>,
    pub clock_source_ref_count: Vec<u32>,
}

impl ResourceContext {
    fn new(pipe_count: usize, stream_enc_count: usize, audio_count: usize, pll_count: usize) -> Self {
        let mut pipe_ctx: [PipeContext; limits::MAX_PIPES] = Default::default();
        for (i, pipe) in pipe_ctx.iter_mut().enumerate() {
            pipe.pipe_idx = i;
        }
        Self {
            pipe_ctx,
            pipe_count: pipe_count.min(limits::MAX_PIPES),
            stream_enc_acquired: vec![false; stream_enc_count],
            audio_acquired: vec![false; audio_count],
            clock_source_ref_count: vec![0; pll_count],
        }
    }
}

// ============================================================================
// Status Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetStatus {
    pub target_id: TargetId,
    pub surfaces: Vec<Surface>,
}

/// Hardware instances serving one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    pub stream_id: StreamId,
    pub pipe_idx: usize,
    pub tg_inst: Option<usize>,
    pub stream_enc_inst: Option<usize>,
    pub audio_inst: Option<usize>,
    pub link_index: u32,
    pub plane_count: usize,
}

// ============================================================================
// Validation Context
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationContext {
    pub res_ctx: ResourceContext,
    pub targets: Vec<Arc<Target>>,
    pub target_status: Vec<TargetStatus>,
    pub bw_results: BandwidthResults,
    pub pp_display_cfg: DisplayConfiguration,
}

impl ValidationContext {
    /// Unbound context sized for a pool's inventory
    pub fn new(pipe_count: usize, stream_enc_count: usize, audio_count: usize, pll_count: usize) -> Self {
        Self {
            res_ctx: ResourceContext::new(pipe_count, stream_enc_count, audio_count, pll_count),
            targets: Vec::with_capacity(limits::MAX_TARGETS),
            target_status: Vec::with_capacity(limits::MAX_TARGETS),
            bw_results: BandwidthResults::default(),
            pp_display_cfg: DisplayConfiguration::default(),
        }
    }

    /// Pipe slots that physically exist
    pub fn pipes(&self) -> &[PipeContext] {
        &self.res_ctx.pipe_ctx[..self.res_ctx.pipe_count]
    }

    pub fn bound_pipes(&self) -> impl Iterator<Item = &PipeContext> {
        self.pipes().iter().filter(|p| p.is_bound())
    }

    pub fn head_pipes(&self) -> impl Iterator<Item = &PipeContext> {
        self.pipes().iter().filter(|p| p.is_head())
    }

    pub fn head_pipe_for_stream(&self, stream_id: StreamId) -> Option<&PipeContext> {
        self.head_pipes()
            .find(|p| p.stream.as_ref().map(|s| s.id) == Some(stream_id))
    }

    /// Lowest-index pipe slot with nothing bound
    pub fn free_pipe(&self) -> Option<usize> {
        self.pipes().iter().position(|p| !p.is_bound())
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn target_index(&self, target_id: TargetId) -> Option<usize> {
        self.targets.iter().position(|t| t.id == target_id)
    }

    /// Same count and the very same target objects, in order
    pub fn has_same_targets(&self, targets: &[Arc<Target>]) -> bool {
        self.targets.len() == targets.len()
            && self.targets.iter().zip(targets).all(|(a, b)| Arc::ptr_eq(a, b))
    }

    pub fn visible_surface_count(&self) -> usize {
        self.target_status
            .iter()
            .flat_map(|status| status.surfaces.iter())
            .filter(|s| s.visible)
            .count()
    }

    pub fn stream_status(&self, stream_id: StreamId) -> Option<StreamStatus> {
        let head = self.head_pipe_for_stream(stream_id)?;
        let stream = head.stream.as_ref()?;
        let mut plane_count = usize::from(head.surface.is_some());
        let mut next = head.bottom_pipe;
        while let Some(idx) = next {
            plane_count += 1;
            next = self.res_ctx.pipe_ctx[idx].bottom_pipe;
        }
        Some(StreamStatus {
            stream_id,
            pipe_idx: head.pipe_idx,
            tg_inst: head.tg,
            stream_enc_inst: head.stream_enc,
            audio_inst: head.audio,
            link_index: stream.link_index(),
            plane_count,
        })
    }

    fn head_index(&self, stream_id: StreamId) -> Option<usize> {
        self.head_pipe_for_stream(stream_id).map(|p| p.pipe_idx)
    }

    /// Clear the plane on a head pipe and free every pipe stacked below it
    fn release_planes(&mut self, head: usize) {
        let pipe = &mut self.res_ctx.pipe_ctx[head];
        pipe.surface = None;
        pipe.scaling = ScalerData::default();
        let mut next = pipe.bottom_pipe.take();
        while let Some(idx) = next {
            next = self.res_ctx.pipe_ctx[idx].bottom_pipe;
            self.res_ctx.pipe_ctx[idx] = PipeContext::empty(idx);
        }
    }

    /// Bind `surfaces` to the pipes of an admitted target.
    ///
    /// The first surface lands on each stream's head pipe; every further
    /// surface takes the lowest free pipe and stacks below the previous one.
    pub fn attach_surfaces(
        &mut self,
        target: &Target,
        surfaces: &[Surface],
        supports_format: impl Fn(SurfacePixelFormat) -> bool,
        visual_confirm: bool,
    ) -> Result<()> {
        let status_idx = self
            .target_index(target.id)
            .ok_or_else(|| DcError::unexpected(format!("{} is not part of the context", target.id)))?;
        if surfaces.len() > limits::MAX_SURFACES {
            return Err(DcError::validation(DcStatus::FailAttachSurfaces));
        }
        if surfaces.iter().any(|s| !supports_format(s.format)) {
            return Err(DcError::validation(DcStatus::SurfacePixelFormatUnsupported));
        }

        for stream in &target.streams {
            let head = self
                .head_index(stream.id)
                .ok_or_else(|| DcError::unexpected(format!("{} has no bound pipe", stream.id)))?;
            self.release_planes(head);

            let mut prev = head;
            for (i, surface) in surfaces.iter().enumerate() {
                let idx = if i == 0 {
                    head
                } else {
                    let free = self.free_pipe().ok_or(DcError::ValidationFailed(DcStatus::FailAttachSurfaces))?;
                    let top = &self.res_ctx.pipe_ctx[head];
                    let plane = PipeContext {
                        pipe_idx: free,
                        stream: top.stream.clone(),
                        tg: top.tg,
                        stream_enc: top.stream_enc,
                        link_enc: top.link_enc,
                        clock_source: top.clock_source,
                        top_pipe: Some(prev),
                        ..PipeContext::default()
                    };
                    self.res_ctx.pipe_ctx[free] = plane;
                    self.res_ctx.pipe_ctx[prev].bottom_pipe = Some(free);
                    free
                };
                let pipe = &mut self.res_ctx.pipe_ctx[idx];
                pipe.scaling = build_scaling_params(surface, stream, visual_confirm);
                pipe.surface = Some(surface.clone());
                trace!(pipe = idx, surface = %surface.id, stream = %stream.id, "Surface attached");
                prev = idx;
            }
        }

        self.target_status[status_idx].surfaces = surfaces.to_vec();
        Ok(())
    }

    /// Replace surface state in place for surfaces already bound to `target`.
    ///
    /// Only pipes driving one of the target's streams are touched; their
    /// scaler data is rebuilt from the new rectangles.
    pub fn update_surfaces(&mut self, target: &Target, surfaces: &[Surface], visual_confirm: bool) -> Result<()> {
        let status_idx = self
            .target_index(target.id)
            .ok_or_else(|| DcError::unexpected(format!("{} is not part of the context", target.id)))?;

        for surface in surfaces {
            for pipe in self.res_ctx.pipe_ctx.iter_mut() {
                if pipe.surface.as_ref().map(|s| s.id) != Some(surface.id) {
                    continue;
                }
                let Some(stream) = pipe.stream.as_ref().filter(|s| target.streams.iter().any(|t| t.id == s.id)) else {
                    continue;
                };
                pipe.scaling = build_scaling_params(surface, stream, visual_confirm);
                pipe.surface = Some(surface.clone());
            }
            for slot in self.target_status[status_idx].surfaces.iter_mut() {
                if slot.id == surface.id {
                    *slot = surface.clone();
                }
            }
        }
        Ok(())
    }

    /// Point every pipe scanning out `surface_id` at a new address
    pub fn flip_surface_addr(&mut self, surface_id: SurfaceId, flip: &FlipAddrs) -> Vec<usize> {
        let mut flipped = Vec::new();
        for pipe in self.res_ctx.pipe_ctx.iter_mut() {
            if let Some(surface) = pipe.surface.as_mut().filter(|s| s.id == surface_id) {
                surface.address = flip.address;
                surface.flip_immediate = flip.flip_immediate;
                flipped.push(pipe.pipe_idx);
            }
        }
        for surface in self.target_status.iter_mut().flat_map(|s| s.surfaces.iter_mut()) {
            if surface.id == surface_id {
                surface.address = flip.address;
                surface.flip_immediate = flip.flip_immediate;
            }
        }
        flipped
    }
}

// ============================================================================
// Scaling
// ============================================================================

fn map_rect(r: &Rect, from: &Rect, to: &Rect) -> Rect {
    if from.is_empty() {
        return Rect::default();
    }
    let x = to.x as i64 + (r.x as i64 - from.x as i64) * to.width as i64 / from.width as i64;
    let y = to.y as i64 + (r.y as i64 - from.y as i64) * to.height as i64 / from.height as i64;
    Rect::new(
        x as i32,
        y as i32,
        (r.width as u64 * to.width as u64 / from.width as u64) as u32,
        (r.height as u64 * to.height as u64 / from.height as u64) as u32,
    )
}

/// Derive scaler programming for `surface` on `stream`
pub fn build_scaling_params(surface: &Surface, stream: &Stream, visual_confirm: bool) -> ScalerData {
    let clip = surface
        .clip_rect
        .intersect(&surface.dst_rect)
        .intersect(&stream.src);

    let mut recout = map_rect(&clip, &stream.src, &stream.dst);
    let viewport = map_rect(&clip, &surface.dst_rect, &surface.src_rect);

    let h_ratio = ScalingRatio { src: surface.src_rect.width, dst: surface.dst_rect.width };
    let v_ratio = ScalingRatio { src: surface.src_rect.height, dst: surface.dst_rect.height };

    if visual_confirm {
        recout.width = recout.width.saturating_sub(2);
        recout.height = recout.height.saturating_sub(2);
    }

    ScalerData {
        h_ratio,
        v_ratio,
        viewport,
        recout,
        h_taps: if h_ratio.is_identity() { 1 } else { 4 },
        v_taps: if v_ratio.is_identity() { 1 } else { 2 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_utils::{bound_context, hdmi_stream};
    use crate::types::{CrtcTiming, PlaneAddress};

    #[test]
    fn test_clone_is_independent() {
        let ctx = bound_context(vec![hdmi_stream(1, 0, CrtcTiming::cea_1080p60())]);
        let mut copy = ctx.clone();
        let target = copy.targets[0].clone();
        copy.attach_surfaces(&target, &[Surface::new(SurfaceId(1), 1920, 1080)], |_| true, false)
            .unwrap();
        assert!(ctx.pipes()[0].surface.is_none());
        assert!(copy.pipes()[0].surface.is_some());
        assert_ne!(ctx, copy);
    }

    #[test]
    fn test_extra_planes_take_free_pipes() {
        let mut ctx = bound_context(vec![hdmi_stream(1, 0, CrtcTiming::cea_1080p60())]);
        let target = ctx.targets[0].clone();
        let surfaces = vec![
            Surface::new(SurfaceId(1), 1920, 1080),
            Surface::new(SurfaceId(2), 1280, 720),
        ];
        ctx.attach_surfaces(&target, &surfaces, |_| true, false).unwrap();

        let plane = &ctx.pipes()[1];
        assert_eq!(plane.top_pipe, Some(0));
        assert_eq!(ctx.pipes()[0].bottom_pipe, Some(1));
        assert!(!plane.is_head());
        assert_eq!(ctx.head_pipes().count(), 1);
        assert_eq!(ctx.stream_status(StreamId(1)).unwrap().plane_count, 2);

        // Re-attaching a single surface frees the plane pipe
        ctx.attach_surfaces(&target, &surfaces[..1], |_| true, false).unwrap();
        assert!(!ctx.pipes()[1].is_bound());
    }

    #[test]
    fn test_attach_fails_without_free_pipe() {
        let mut ctx = bound_context(vec![hdmi_stream(1, 0, CrtcTiming::cea_1080p60())]);
        ctx.res_ctx.pipe_count = 1;
        let target = ctx.targets[0].clone();
        let surfaces = vec![Surface::new(SurfaceId(1), 64, 64), Surface::new(SurfaceId(2), 64, 64)];
        let err = ctx.attach_surfaces(&target, &surfaces, |_| true, false).unwrap_err();
        assert_eq!(err.status(), DcStatus::FailAttachSurfaces);
    }

    #[test]
    fn test_unsupported_format_rejected() {
        let mut ctx = bound_context(vec![hdmi_stream(1, 0, CrtcTiming::cea_1080p60())]);
        let target = ctx.targets[0].clone();
        let video = Surface::new(SurfaceId(1), 64, 64).with_format(SurfacePixelFormat::Nv12);
        let err = ctx
            .attach_surfaces(&target, &[video], |f| !f.is_video(), false)
            .unwrap_err();
        assert_eq!(err.status(), DcStatus::SurfacePixelFormatUnsupported);
    }

    #[test]
    fn test_scaling_params_and_visual_confirm() {
        let stream = hdmi_stream(1, 0, CrtcTiming::cea_1080p60());
        let surface = Surface::new(SurfaceId(1), 0, 0)
            .with_scaling(Rect::sized(3840, 2160), Rect::new(0, 0, 1920, 1080));
        let data = build_scaling_params(&surface, &stream, false);
        assert_eq!(data.viewport, Rect::sized(3840, 2160));
        assert_eq!(data.recout, Rect::sized(1920, 1080));
        assert_eq!(data.h_taps, 4);

        let confirm = build_scaling_params(&surface, &stream, true);
        assert_eq!(confirm.recout, Rect::sized(1918, 1078));
    }

    #[test]
    fn test_flip_updates_pipes_and_status() {
        let mut ctx = bound_context(vec![hdmi_stream(1, 0, CrtcTiming::cea_1080p60())]);
        let target = ctx.targets[0].clone();
        ctx.attach_surfaces(&target, &[Surface::new(SurfaceId(7), 1920, 1080)], |_| true, false)
            .unwrap();
        let flip = FlipAddrs { address: PlaneAddress { primary: 0x1000, chroma: None }, flip_immediate: true };
        assert_eq!(ctx.flip_surface_addr(SurfaceId(7), &flip), vec![0]);
        assert_eq!(ctx.target_status[0].surfaces[0].address.primary, 0x1000);
        assert!(ctx.flip_surface_addr(SurfaceId(8), &flip).is_empty());
    }
}
