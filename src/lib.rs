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

//! dcpipe - display core resource scheduler
//!
//! Assigns display pipelines (timing generators, stream encoders, audio
//! engines and clock sources) to requested targets, validates the result
//! against bandwidth and clock limits, and commits it to hardware through
//! driver-supplied services with a two-phase validate/commit protocol.

pub mod constants;
pub mod types;
pub mod edid;
pub mod irq;
pub mod services;
pub mod link;
pub mod context;
pub mod bandwidth;
pub mod resource;
pub mod device;
pub mod commit;
pub mod sim;
pub mod logger;
pub mod config;
pub mod scenario;

pub use dc_error::{DcError, DcStatus, Result};

pub use commit::CommitState;
pub use context::{PipeContext, StreamStatus, ValidationContext};
pub use device::{DebugOptions, Device, InitData, InitFlags, PollBudget};
pub use link::{Link, LinkRegistry, Sink, SinkInitData};
pub use resource::{AsicId, DceVersion, ResourcePool};
pub use services::{BiosService, DeviceServices, HwSequencer, PowerService, SidebandService};
pub use types::{CrtcTiming, FlipAddrs, SignalType, Stream, StreamId, Surface, SurfaceId, Target, TargetId, ValidationSet};

#[cfg(test)]
pub mod test_utils;
