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

//! Runs a scenario against the simulated hardware

use std::collections::HashMap;
use std::sync::Arc;

use dc_error::{DcError, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::bandwidth::DisplayConfiguration;
use crate::config::{ScenarioConfig, SurfaceConfig};
use crate::context::StreamStatus;
use crate::device::{Device, InitData};
use crate::edid::EdidBuilder;
use crate::link::{Sink, SinkInitData};
use crate::resource::DceVersion;
use crate::sim::{self, SimHandle};
use crate::types::{Rect, Stream, StreamId, Surface, SurfaceId, Target, TargetId};

/// Outcome of a scenario run
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub version: DceVersion,
    pub links: usize,
    pub targets: Vec<u32>,
    pub streams: Vec<StreamStatus>,
    pub dispclk_khz: u32,
    pub display_requirements: Option<DisplayConfiguration>,
    /// Programming calls in the order the hardware saw them
    pub calls: Vec<String>,
}

fn build_surface(cfg: &SurfaceConfig) -> Surface {
    let src = cfg.src.unwrap_or_else(|| Rect::sized(cfg.width, cfg.height));
    let dst = cfg.dst.unwrap_or_else(|| Rect::sized(src.width, src.height));
    Surface::new(SurfaceId(cfg.id), cfg.width, cfg.height)
        .with_format(cfg.format)
        .with_visible(cfg.visible)
        .with_scaling(src, dst)
}

/// Attach every configured sink, returning the sink each link's streams use
fn attach_sinks(device: &mut Device, cfg: &ScenarioConfig) -> Result<HashMap<u32, Arc<Sink>>> {
    let mut sinks = HashMap::new();
    for (serial, sink_cfg) in cfg.sinks.iter().enumerate() {
        let connector_signal = device
            .link(sink_cfg.link)
            .map(|l| l.connector_signal)
            .ok_or(DcError::InvalidLink(sink_cfg.link))?;
        let init = SinkInitData {
            signal: sink_cfg.signal.unwrap_or(connector_signal),
            dongle_max_pix_clk_khz: sink_cfg.dongle_max_pix_clk_khz,
        };
        let raw = EdidBuilder::new(sink_cfg.name.clone())
            .with_audio(sink_cfg.audio)
            .with_serial(serial as u32 + 1)
            .build();

        let sink = if sink_cfg.remote {
            device.link_add_remote_sink(sink_cfg.link, &raw, init)?
        } else {
            let sink = Arc::new(Sink::with_edid(sink_cfg.link, init, &raw)?);
            device.link_set_sink(sink_cfg.link, Some(Arc::clone(&sink)))?;
            sink
        };
        debug!(link = sink_cfg.link, name = %sink_cfg.name, remote = sink_cfg.remote, "Sink attached");
        sinks.entry(sink_cfg.link).or_insert(sink);
    }
    Ok(sinks)
}

fn build_targets(cfg: &ScenarioConfig, sinks: &HashMap<u32, Arc<Sink>>) -> Result<Vec<(Arc<Target>, Vec<Surface>)>> {
    cfg.targets
        .iter()
        .map(|target_cfg| {
            let streams = target_cfg
                .streams
                .iter()
                .map(|stream_cfg| {
                    let sink = sinks.get(&stream_cfg.link).ok_or_else(|| {
                        DcError::invalid_config("streams", format!("link {} has no sink", stream_cfg.link))
                    })?;
                    let mut stream = Stream::new(StreamId(stream_cfg.id), Arc::clone(sink), stream_cfg.timing.resolve()?);
                    if let Some(settings) = stream_cfg.link_settings {
                        stream = stream.with_link_settings(settings);
                    }
                    Ok(Arc::new(stream))
                })
                .collect::<Result<Vec<_>>>()?;
            let target = Target::new(TargetId(target_cfg.id), streams)?.with_flags(target_cfg.flags);
            let surfaces = target_cfg.surfaces.iter().map(build_surface).collect();
            Ok((Arc::new(target), surfaces))
        })
        .collect()
}

/// Create a simulated device, attach sinks, commit targets then surfaces
pub fn run_scenario(cfg: &ScenarioConfig) -> Result<ScenarioReport> {
    let connectors = cfg
        .connectors
        .iter()
        .enumerate()
        .map(|(i, c)| sim::connector(i as u32, c.signal))
        .collect();
    let (services, handle) = sim::services(connectors);

    let mut init = InitData::new(cfg.asic_id)
        .with_virtual_links(cfg.num_virtual_links)
        .with_debug(cfg.debug);
    init.flags = cfg.flags;
    let mut device = Device::create(init, services)?;

    let sinks = attach_sinks(&mut device, cfg)?;
    let targets = build_targets(cfg, &sinks)?;

    let committed: Vec<Arc<Target>> = targets.iter().map(|(t, _)| Arc::clone(t)).collect();
    device.commit_targets(&committed)?;
    for (target, surfaces) in targets.iter().filter(|(_, s)| !s.is_empty()) {
        device.commit_surfaces_to_target(surfaces, target)?;
    }

    let report = report(&device, &handle);
    info!(
        version = %report.version,
        targets = report.targets.len(),
        dispclk_khz = report.dispclk_khz,
        "Scenario complete"
    );
    Ok(report)
}

fn report(device: &Device, handle: &SimHandle) -> ScenarioReport {
    let ctx = device.current_context();
    let streams = ctx
        .targets
        .iter()
        .flat_map(|t| t.streams.iter())
        .filter_map(|s| device.stream_status(s.id))
        .collect();
    ScenarioReport {
        version: device.version(),
        links: device.link_count(),
        targets: ctx.targets.iter().map(|t| t.id.0).collect(),
        streams,
        dispclk_khz: ctx.bw_results.dispclk_khz,
        display_requirements: handle.display_requirements().pop(),
        calls: handle.calls(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectorConfig, SinkConfig, StreamConfig, TargetConfig, TimingConfig};
    use crate::test_utils::test_utils::asic_for;
    use crate::types::SignalType;

    fn two_display_scenario() -> ScenarioConfig {
        let sink = |link: u32, name: &str| SinkConfig {
            link,
            name: name.into(),
            audio: true,
            signal: None,
            dongle_max_pix_clk_khz: None,
            remote: false,
        };
        let target = |id: u32, link: u32| TargetConfig {
            id,
            streams: vec![StreamConfig { id, link, timing: TimingConfig::Preset("1080p60".into()), link_settings: None }],
            flags: Default::default(),
            surfaces: vec![SurfaceConfig {
                id,
                width: 1920,
                height: 1080,
                format: crate::types::SurfacePixelFormat::Argb8888,
                visible: true,
                src: None,
                dst: None,
            }],
        };
        ScenarioConfig {
            asic_id: asic_for(DceVersion::Dce112),
            num_virtual_links: 0,
            connectors: vec![ConnectorConfig { signal: SignalType::Hdmi }, ConnectorConfig { signal: SignalType::Hdmi }],
            sinks: vec![sink(0, "Left"), sink(1, "Right")],
            targets: vec![target(1, 0), target(2, 1)],
            flags: Default::default(),
            debug: Default::default(),
        }
    }

    #[test]
    fn test_two_synchronized_displays() {
        let report = run_scenario(&two_display_scenario()).unwrap();
        assert_eq!(report.targets, vec![1, 2]);
        assert_eq!(report.streams.len(), 2);
        assert_eq!(report.streams[1].pipe_idx, 1);
        assert!(report.calls.iter().any(|c| c == "enable_timing_synchronization(0,[0, 1])"));
        let reqs = report.display_requirements.unwrap();
        assert_eq!(reqs.display_count, 2);
        assert!(reqs.all_displays_in_sync);
    }

    #[test]
    fn test_remote_sinks_share_link() {
        let mut cfg = two_display_scenario();
        cfg.connectors[0].signal = SignalType::DisplayPort;
        for sink in cfg.sinks.iter_mut() {
            sink.link = 0;
            sink.remote = true;
            sink.signal = Some(SignalType::DisplayPortMst);
        }
        cfg.targets.truncate(1);
        let report = run_scenario(&cfg).unwrap();
        assert_eq!(report.streams[0].link_index, 0);
    }

    #[test]
    fn test_scaled_surface() {
        let mut cfg = two_display_scenario();
        cfg.targets.truncate(1);
        cfg.targets[0].surfaces[0].width = 3840;
        cfg.targets[0].surfaces[0].height = 2160;
        cfg.targets[0].surfaces[0].dst = Some(Rect::sized(1920, 1080));
        let report = run_scenario(&cfg).unwrap();
        assert_eq!(report.dispclk_khz, 148_500 * 4 * 105 / 100);
    }
}
