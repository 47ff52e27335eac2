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

//! Commit engine
//!
//! Turns validated contexts into hardware state. Every operation builds its
//! result off to the side and publishes it with a single assignment, so a
//! failure leaves the committed context untouched.

use std::sync::Arc;

use dc_error::{DcError, DcStatus, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, trace, warn};

use crate::bandwidth;
use crate::context::ValidationContext;
use crate::device::Device;
use crate::logger;
use crate::services::PipeLockControl;
use crate::types::{CrtcTiming, FlipAddrs, Surface, Target, TargetId, ValidationSet};

/// Progress of the commit in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitState {
    #[default]
    Idle,
    Validating,
    Applying,
    Committed,
}

/// Group head pipes whose timings can run in vertical-blank lockstep.
///
/// Only groups with more than one member are returned; members are in pipe
/// order and groups are ordered by their first member.
pub fn timing_sync_groups(ctx: &ValidationContext) -> Vec<Vec<usize>> {
    let mut groups: Vec<(CrtcTiming, Vec<usize>)> = Vec::new();

    for pipe in ctx.head_pipes() {
        let Some(stream) = pipe.stream.as_ref() else { continue };
        match groups
            .iter_mut()
            .find(|(timing, _)| timing.is_synchronizable_with(&stream.timing))
        {
            Some((_, members)) => members.push(pipe.pipe_idx),
            None => groups.push((stream.timing, vec![pipe.pipe_idx])),
        }
    }

    groups
        .into_iter()
        .filter_map(|(_, members)| (members.len() > 1).then_some(members))
        .collect()
}

fn visible_surfaces(ctx: &ValidationContext, target_id: TargetId) -> usize {
    ctx.target_index(target_id)
        .map(|idx| ctx.target_status[idx].surfaces.iter().filter(|s| s.visible).count())
        .unwrap_or(0)
}

impl Device {
    fn report_failure(&mut self, operation: &str, err: &DcError) {
        self.state = CommitState::Idle;
        self.diagnostics.break_to_debugger(&format!("{}: {}", operation, err));
        logger::log_event(
            "commit_failed",
            json!({ "operation": operation, "status": err.status().name(), "error": err.to_string() }),
        );
    }

    /// Surfaces can only go to a committed target once the hardware runs in
    /// accelerated mode
    fn check_surface_target(&self, target: &Target) -> Result<()> {
        if self.current_context.target_count() == 0 {
            return Err(DcError::unexpected("no targets committed"));
        }
        if !self.bios.is_accelerated_mode() {
            return Err(DcError::unexpected("hardware is not in accelerated mode"));
        }
        if self.current_context.target_index(target.id).is_none() {
            return Err(DcError::unexpected(format!("{} is not committed", target.id)));
        }
        Ok(())
    }

    fn program_timing_sync(&mut self, ctx: &ValidationContext) {
        for (group_idx, pipes) in timing_sync_groups(ctx).iter().enumerate() {
            debug!(group = group_idx, pipes = ?pipes, "Enabling timing synchronization");
            self.hwss.enable_timing_synchronization(group_idx, pipes);
        }
    }

    /// Blank or unblank the timing generators of `target`; false when a
    /// generator did not reach the requested state within the poll budget
    fn set_target_blank(&mut self, ctx: &ValidationContext, target: &Target, blank: bool) -> bool {
        let mut settled = true;
        for stream in &target.streams {
            let Some(tg) = ctx.head_pipe_for_stream(stream.id).and_then(|p| p.tg) else {
                continue;
            };
            if !self.hwss.set_blank(tg, blank) {
                warn!(tg, blank, "Blank request refused");
                settled = false;
                continue;
            }
            let poll = self.poll;
            let hwss = &self.hwss;
            if !poll.wait_for(|| hwss.is_blanked(tg) == blank) {
                settled = false;
            }
        }
        if !settled {
            self.diagnostics
                .break_to_debugger(&format!("{} did not settle (blank = {})", target.id, blank));
        }
        settled
    }

    fn log_connection_status(ctx: &ValidationContext, target: &Target) {
        for stream in &target.streams {
            let pipe = ctx.head_pipe_for_stream(stream.id).map(|p| p.pipe_idx);
            info!(
                target = %target.id,
                stream = %stream.id,
                link = stream.link_index(),
                signal = %stream.signal,
                width = stream.timing.h_addressable,
                height = stream.timing.v_addressable,
                refresh = stream.timing.refresh_hz(),
                "Sink connected"
            );
            logger::log_event(
                "connection_status",
                json!({
                    "target": target.id.0,
                    "stream": stream.id.0,
                    "link": stream.link_index(),
                    "pipe": pipe,
                    "signal": stream.signal.to_string(),
                    "h_addressable": stream.timing.h_addressable,
                    "v_addressable": stream.timing.v_addressable,
                    "pix_clk_khz": stream.timing.pix_clk_khz,
                }),
            );
        }
    }

    /// Make `targets` the displayed configuration.
    ///
    /// Surfaces already attached to a target that stays committed are carried
    /// over into the new configuration.
    pub fn commit_targets(&mut self, targets: &[Arc<Target>]) -> Result<()> {
        if self.current_context.has_same_targets(targets) {
            debug!(targets = targets.len(), "Target set unchanged, nothing to commit");
            return Ok(());
        }

        self.state = CommitState::Validating;
        let sets: Vec<ValidationSet> = targets
            .iter()
            .map(|target| {
                let surfaces = self
                    .current_context
                    .target_index(target.id)
                    .map(|idx| self.current_context.target_status[idx].surfaces.clone())
                    .unwrap_or_default();
                ValidationSet::with_surfaces(Arc::clone(target), surfaces)
            })
            .collect();

        let candidate = match self.pool.validate_with_context(
            &self.links,
            &self.current_context,
            &sets,
            self.debug.surface_visual_confirm,
        ) {
            Ok(ctx) => ctx,
            Err(e) => {
                self.report_failure("commit_targets", &e);
                return Err(e);
            }
        };

        self.state = CommitState::Applying;
        self.power.apply_safe_state();
        if !self.bios.is_accelerated_mode() {
            self.hwss.enable_accelerated_mode();
        }

        if let Err(e) = self.hwss.apply_ctx_to_hw(&candidate) {
            self.report_failure("commit_targets", &e);
            return Err(e);
        }

        self.program_timing_sync(&candidate);

        for (target, status) in candidate.targets.iter().zip(&candidate.target_status) {
            if !status.surfaces.is_empty() {
                self.set_target_blank(&candidate, target, false);
            }
            Self::log_connection_status(&candidate, target);
        }

        self.power.apply_display_requirements(&candidate.pp_display_cfg);

        info!(
            targets = candidate.target_count(),
            pipes = candidate.bound_pipes().count(),
            dispclk_khz = candidate.bw_results.dispclk_khz,
            "Targets committed"
        );
        logger::log_event(
            "commit",
            json!({
                "targets": candidate.targets.iter().map(|t| t.id.0).collect::<Vec<_>>(),
                "dispclk_khz": candidate.bw_results.dispclk_khz,
            }),
        );

        self.current_context = Arc::new(candidate);
        self.state = CommitState::Committed;
        Ok(())
    }

    /// Replace the surfaces of a committed target.
    ///
    /// Display clock changes are ordered around surface programming: a raise
    /// happens before it, a drop after it.
    pub fn commit_surfaces_to_target(&mut self, surfaces: &[Surface], target: &Arc<Target>) -> Result<()> {
        if let Err(e) = self.check_surface_target(target) {
            self.report_failure("commit_surfaces_to_target", &e);
            return Err(e);
        }

        self.state = CommitState::Validating;
        let candidate = match self.build_surface_candidate(surfaces, target) {
            Ok(ctx) => ctx,
            Err(e) => {
                self.report_failure("commit_surfaces_to_target", &e);
                return Err(e);
            }
        };

        self.state = CommitState::Applying;
        let prev_dispclk = self.current_context.bw_results.dispclk_khz;
        let new_dispclk = candidate.bw_results.dispclk_khz;
        let prev_visible = visible_surfaces(&self.current_context, target.id);
        let new_visible = visible_surfaces(&candidate, target.id);

        if prev_dispclk < new_dispclk {
            self.power.apply_display_requirements(&candidate.pp_display_cfg);
            self.hwss.set_display_clock(&candidate);
        }

        if prev_visible > 0 && new_visible == 0 {
            let current = Arc::clone(&self.current_context);
            self.set_target_blank(&current, target, true);
        }

        self.hwss.apply_ctx_to_surface(&candidate);

        if prev_visible == 0 && new_visible > 0 {
            self.set_target_blank(&candidate, target, false);
        }

        if prev_dispclk > new_dispclk {
            self.hwss.set_display_clock(&candidate);
            self.power.apply_display_requirements(&candidate.pp_display_cfg);
        }

        debug!(
            target = %target.id,
            surfaces = surfaces.len(),
            prev_dispclk,
            new_dispclk,
            "Surfaces committed"
        );

        self.current_context = Arc::new(candidate);
        self.state = CommitState::Committed;
        Ok(())
    }

    fn build_surface_candidate(&self, surfaces: &[Surface], target: &Target) -> Result<ValidationContext> {
        let mut candidate = (*self.current_context).clone();
        candidate.attach_surfaces(
            target,
            surfaces,
            |format| self.pool.supports_format(format),
            self.debug.surface_visual_confirm,
        )?;
        self.pool.validate_bandwidth(&mut candidate)?;
        candidate.pp_display_cfg = bandwidth::build_display_configuration(&candidate, &self.links);

        if self.pool.supports_clk_constraints() {
            candidate = self
                .pool
                .apply_clk_constraints(&candidate)
                .ok_or(DcError::ValidationFailed(DcStatus::FailBandwidthValidate))?;
        }
        Ok(candidate)
    }

    /// Update properties of surfaces already bound to `target` without
    /// revalidating bandwidth
    pub fn update_surfaces_for_target(&mut self, surfaces: &[Surface], target: &Arc<Target>) -> Result<()> {
        if let Err(e) = self.check_surface_target(target) {
            self.report_failure("update_surfaces_for_target", &e);
            return Err(e);
        }

        let visual_confirm = self.debug.surface_visual_confirm;
        let ctx = Arc::make_mut(&mut self.current_context);
        if let Err(e) = ctx.update_surfaces(target, surfaces, visual_confirm) {
            self.report_failure("update_surfaces_for_target", &e);
            return Err(e);
        }
        self.hwss.update_plane_surface(&self.current_context, surfaces);
        Ok(())
    }

    /// Point each surface at its new scan-out address.
    ///
    /// Every pipe of a non-immediate flip stays locked until all addresses
    /// are programmed, then the locks are released in reverse pipe order.
    pub fn flip_surface_addrs(&mut self, surfaces: &[Surface], flips: &[FlipAddrs]) -> Result<()> {
        if surfaces.len() != flips.len() {
            let e = DcError::unexpected(format!(
                "{} surfaces but {} flip addresses",
                surfaces.len(),
                flips.len()
            ));
            self.report_failure("flip_surface_addrs", &e);
            return Err(e);
        }

        let ctx = Arc::make_mut(&mut self.current_context);
        let mut locked = Vec::new();
        for (surface, flip) in surfaces.iter().zip(flips) {
            for pipe_idx in ctx.flip_surface_addr(surface.id, flip) {
                if !flip.flip_immediate {
                    self.hwss
                        .pipe_control_lock(pipe_idx, PipeLockControl::SURFACE | PipeLockControl::MODE, true);
                    locked.push(pipe_idx);
                }
                self.hwss.update_plane_addr(&ctx.res_ctx.pipe_ctx[pipe_idx]);
            }
        }

        locked.sort_unstable();
        for &pipe_idx in locked.iter().rev() {
            self.hwss.pipe_control_lock(pipe_idx, PipeLockControl::SURFACE, false);
        }
        trace!(surfaces = surfaces.len(), locked = locked.len(), "Surface addresses flipped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::DceVersion;
    use crate::test_utils::test_utils::{bound_context, hdmi_stream, sim_device, sim_target};
    use crate::context::ScalingRatio;
    use crate::types::{PlaneAddress, Rect, StreamId, SurfaceId};

    #[test]
    fn test_sync_groups_need_identical_timings() {
        let ctx = bound_context(vec![
            hdmi_stream(1, 0, CrtcTiming::cea_1080p60()),
            hdmi_stream(2, 1, CrtcTiming::cea_720p60()),
            hdmi_stream(3, 2, CrtcTiming::cea_1080p60()),
        ]);
        assert_eq!(timing_sync_groups(&ctx), vec![vec![0, 2]]);

        let single = bound_context(vec![hdmi_stream(1, 0, CrtcTiming::cea_1080p60())]);
        assert!(timing_sync_groups(&single).is_empty());
    }

    #[test]
    fn test_unchanged_target_set_touches_nothing() {
        let (mut device, sim) = sim_device(DceVersion::Dce112, 2, 0);
        let target = sim_target(&device, 1, &[(1, 0)], CrtcTiming::cea_1080p60());
        device.commit_targets(&[Arc::clone(&target)]).unwrap();
        let before = sim.calls().len();

        device.commit_targets(&[target]).unwrap();
        assert_eq!(sim.calls().len(), before);
        assert_eq!(device.commit_state(), CommitState::Committed);
    }

    #[test]
    fn test_new_target_with_same_id_is_reprogrammed() {
        let (mut device, sim) = sim_device(DceVersion::Dce112, 1, 0);
        let first = sim_target(&device, 1, &[(1, 0)], CrtcTiming::cea_1080p60());
        device.commit_targets(&[first]).unwrap();
        sim.clear_calls();

        let second = sim_target(&device, 1, &[(1, 0)], CrtcTiming::cea_720p60());
        device.commit_targets(&[second]).unwrap();
        assert!(sim.calls().iter().any(|c| c == "apply_ctx_to_hw"));
        let ctx = device.current_context();
        let stream = ctx.pipes()[0].stream.as_ref().unwrap();
        assert_eq!(stream.timing.h_addressable, 1280);
    }

    #[test]
    fn test_hw_failure_keeps_previous_context() {
        let (mut device, sim) = sim_device(DceVersion::Dce112, 2, 0);
        let first = sim_target(&device, 1, &[(1, 0)], CrtcTiming::cea_1080p60());
        device.commit_targets(&[Arc::clone(&first)]).unwrap();
        let snapshot = device.current_context();

        sim.fail_next_apply();
        let second = sim_target(&device, 2, &[(2, 1)], CrtcTiming::cea_1080p60());
        assert!(device.commit_targets(&[first, second]).is_err());
        assert!(Arc::ptr_eq(&snapshot, &device.current_context()));
        assert_eq!(device.commit_state(), CommitState::Idle);
        assert_eq!(device.diagnostics().break_count(), 1);
    }

    #[test]
    fn test_surfaces_require_committed_target() {
        let (mut device, _sim) = sim_device(DceVersion::Dce112, 2, 0);
        let target = sim_target(&device, 1, &[(1, 0)], CrtcTiming::cea_1080p60());
        let surface = Surface::new(SurfaceId(1), 1920, 1080);

        let err = device.commit_surfaces_to_target(&[surface], &target).unwrap_err();
        assert_eq!(err.status(), DcStatus::ErrorUnexpected);
        assert_eq!(device.diagnostics().break_count(), 1);
    }

    #[test]
    fn test_removing_last_surface_blanks_first() {
        let (mut device, sim) = sim_device(DceVersion::Dce112, 1, 0);
        let target = sim_target(&device, 1, &[(1, 0)], CrtcTiming::cea_1080p60());
        device.commit_targets(&[Arc::clone(&target)]).unwrap();
        device
            .commit_surfaces_to_target(&[Surface::new(SurfaceId(1), 1920, 1080)], &target)
            .unwrap();
        sim.clear_calls();

        device.commit_surfaces_to_target(&[], &target).unwrap();
        let calls = sim.calls();
        let blank = calls.iter().position(|c| c == "set_blank(0,true)").unwrap();
        let program = calls.iter().position(|c| c == "apply_ctx_to_surface").unwrap();
        assert!(blank < program);
    }

    #[test]
    fn test_flip_locks_non_immediate_pipes() {
        let (mut device, sim) = sim_device(DceVersion::Dce112, 1, 0);
        let target = sim_target(&device, 1, &[(1, 0)], CrtcTiming::cea_1080p60());
        device.commit_targets(&[Arc::clone(&target)]).unwrap();
        let surface = Surface::new(SurfaceId(7), 1920, 1080);
        device.commit_surfaces_to_target(&[surface.clone()], &target).unwrap();
        sim.clear_calls();

        let flip = FlipAddrs { address: PlaneAddress { primary: 0x1000, chroma: None }, flip_immediate: false };
        device.flip_surface_addrs(&[surface.clone()], &[flip]).unwrap();
        assert_eq!(
            sim.calls(),
            vec!["pipe_control_lock(0,24,true)", "update_plane_addr(0)", "pipe_control_lock(0,8,false)"]
        );
        let ctx = device.current_context();
        assert_eq!(ctx.pipes()[0].surface.as_ref().unwrap().address.primary, 0x1000);

        sim.clear_calls();
        let immediate = FlipAddrs { flip_immediate: true, ..flip };
        device.flip_surface_addrs(&[surface], &[immediate]).unwrap();
        assert_eq!(sim.calls(), vec!["update_plane_addr(0)"]);
    }

    #[test]
    fn test_multi_plane_flip_unlocks_after_all_addresses() {
        let (mut device, sim) = sim_device(DceVersion::Dce112, 1, 0);
        let target = sim_target(&device, 1, &[(1, 0)], CrtcTiming::cea_1080p60());
        device.commit_targets(&[Arc::clone(&target)]).unwrap();
        let planes = vec![Surface::new(SurfaceId(1), 1920, 1080), Surface::new(SurfaceId(2), 640, 480)];
        device.commit_surfaces_to_target(&planes, &target).unwrap();
        sim.clear_calls();

        let flip = |primary| FlipAddrs { address: PlaneAddress { primary, chroma: None }, flip_immediate: false };
        device.flip_surface_addrs(&planes, &[flip(0x1000), flip(0x2000)]).unwrap();
        assert_eq!(
            sim.calls(),
            vec![
                "pipe_control_lock(0,24,true)",
                "update_plane_addr(0)",
                "pipe_control_lock(1,24,true)",
                "update_plane_addr(1)",
                "pipe_control_lock(1,8,false)",
                "pipe_control_lock(0,8,false)",
            ]
        );
        let ctx = device.current_context();
        assert_eq!(ctx.pipes()[1].surface.as_ref().unwrap().address.primary, 0x2000);
    }

    #[test]
    fn test_flip_length_mismatch_rejected() {
        let (mut device, _sim) = sim_device(DceVersion::Dce112, 1, 0);
        let surface = Surface::new(SurfaceId(1), 64, 64);
        assert!(device.flip_surface_addrs(&[surface], &[]).is_err());
    }

    #[test]
    fn test_update_surfaces_in_place() {
        let (mut device, sim) = sim_device(DceVersion::Dce112, 1, 0);
        let target = sim_target(&device, 1, &[(1, 0)], CrtcTiming::cea_1080p60());
        device.commit_targets(&[Arc::clone(&target)]).unwrap();
        let surface = Surface::new(SurfaceId(3), 1920, 1080);
        device.commit_surfaces_to_target(&[surface.clone()], &target).unwrap();
        let dispclk = device.current_context().bw_results.dispclk_khz;

        let moved = surface.with_scaling(Rect::sized(1920, 1080), Rect::new(0, 0, 960, 540));
        device.update_surfaces_for_target(&[moved.clone()], &target).unwrap();
        let ctx = device.current_context();
        assert_eq!(ctx.pipes()[0].surface.as_ref(), Some(&moved));
        assert_eq!(ctx.pipes()[0].scaling.h_ratio, ScalingRatio { src: 1920, dst: 960 });
        assert_eq!(ctx.pipes()[0].scaling.recout.width, 960);
        assert_eq!(ctx.bw_results.dispclk_khz, dispclk);
        assert!(sim.calls().iter().any(|c| c == "update_plane_surface"));
    }

    #[test]
    fn test_update_surfaces_requires_accelerated_mode() {
        let (mut device, sim) = sim_device(DceVersion::Dce112, 1, 0);
        let target = sim_target(&device, 1, &[(1, 0)], CrtcTiming::cea_1080p60());
        device.commit_targets(&[Arc::clone(&target)]).unwrap();
        let surface = Surface::new(SurfaceId(3), 1920, 1080);
        device.commit_surfaces_to_target(&[surface.clone()], &target).unwrap();
        let before = device.current_context();

        sim.set_accelerated(false);
        let moved = surface.with_scaling(Rect::sized(1920, 1080), Rect::new(0, 0, 960, 540));
        let err = device.update_surfaces_for_target(&[moved], &target).unwrap_err();
        assert_eq!(err.status(), DcStatus::ErrorUnexpected);
        assert_eq!(device.diagnostics().break_count(), 1);
        assert_eq!(*device.current_context(), *before);
    }

    #[test]
    fn test_update_surfaces_rejects_uncommitted_target() {
        let (mut device, _sim) = sim_device(DceVersion::Dce112, 2, 0);
        let target = sim_target(&device, 1, &[(1, 0)], CrtcTiming::cea_1080p60());
        let surface = Surface::new(SurfaceId(3), 1920, 1080);
        assert!(device.update_surfaces_for_target(&[surface.clone()], &target).is_err());

        device.commit_targets(&[Arc::clone(&target)]).unwrap();
        let other = sim_target(&device, 2, &[(2, 1)], CrtcTiming::cea_1080p60());
        assert!(device.update_surfaces_for_target(&[surface], &other).is_err());
        assert_eq!(device.diagnostics().break_count(), 2);
    }

    #[test]
    fn test_update_surfaces_leaves_other_targets_alone() {
        let (mut device, _sim) = sim_device(DceVersion::Dce112, 2, 0);
        let left = sim_target(&device, 1, &[(1, 0)], CrtcTiming::cea_1080p60());
        let right = sim_target(&device, 2, &[(2, 1)], CrtcTiming::cea_1080p60());
        device.commit_targets(&[Arc::clone(&left), Arc::clone(&right)]).unwrap();
        let surface = Surface::new(SurfaceId(3), 1920, 1080);
        device.commit_surfaces_to_target(&[surface.clone()], &left).unwrap();
        device.commit_surfaces_to_target(&[surface.clone()], &right).unwrap();

        let moved = surface.clone().with_scaling(Rect::sized(1920, 1080), Rect::new(0, 0, 960, 540));
        device.update_surfaces_for_target(&[moved.clone()], &left).unwrap();
        let ctx = device.current_context();
        let right_pipe = ctx.head_pipe_for_stream(StreamId(2)).unwrap();
        assert_eq!(right_pipe.surface.as_ref(), Some(&surface));
        assert_eq!(right_pipe.scaling.h_ratio, ScalingRatio { src: 1920, dst: 1920 });
    }
}
