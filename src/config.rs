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

//! Scenario files
//!
//! A scenario describes a GPU, its connectors, the sinks plugged into them and
//! the targets and surfaces to commit. The CLI runs scenarios against the
//! simulated backend.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use dc_error::{DcError, Result};
use serde::{Deserialize, Serialize};

use crate::constants::limits;
use crate::device::{DebugOptions, InitFlags};
use crate::resource::{AsicId, DceVersion};
use crate::types::{CrtcTiming, LinkSettings, Rect, SignalType, SurfacePixelFormat, TargetFlags};

/// Longest display name an identity block descriptor can hold
const MAX_SINK_NAME_LEN: usize = 13;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectorConfig {
    pub signal: SignalType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    pub link: u32,
    pub name: String,
    #[serde(default)]
    pub audio: bool,
    /// Defaults to the connector's signal
    #[serde(default)]
    pub signal: Option<SignalType>,
    #[serde(default)]
    pub dongle_max_pix_clk_khz: Option<u32>,
    /// Attach behind an MST branch instead of as the local sink
    #[serde(default)]
    pub remote: bool,
}

/// Either a named mode ("720p60", "1080p60", "2160p60") or a full timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimingConfig {
    Preset(String),
    Explicit(CrtcTiming),
}

impl TimingConfig {
    pub fn resolve(&self) -> Result<CrtcTiming> {
        let timing = match self {
            TimingConfig::Preset(name) => match name.as_str() {
                "720p60" => CrtcTiming::cea_720p60(),
                "1080p60" => CrtcTiming::cea_1080p60(),
                "2160p60" => CrtcTiming::cea_2160p60(),
                other => return Err(DcError::invalid_config("timing", format!("unknown mode '{}'", other))),
            },
            TimingConfig::Explicit(timing) => *timing,
        };
        if !timing.is_valid() {
            return Err(DcError::invalid_config("timing", "inconsistent timing values"));
        }
        Ok(timing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    pub id: u32,
    pub link: u32,
    pub timing: TimingConfig,
    #[serde(default)]
    pub link_settings: Option<LinkSettings>,
}

fn default_format() -> SurfacePixelFormat {
    SurfacePixelFormat::Argb8888
}

fn default_visible() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SurfaceConfig {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_format")]
    pub format: SurfacePixelFormat,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Scan-out region of the buffer; the whole buffer when absent
    #[serde(default)]
    pub src: Option<Rect>,
    /// Destination on the stream; the source size at the origin when absent
    #[serde(default)]
    pub dst: Option<Rect>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub id: u32,
    pub streams: Vec<StreamConfig>,
    #[serde(default)]
    pub flags: TargetFlags,
    #[serde(default)]
    pub surfaces: Vec<SurfaceConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    pub asic_id: AsicId,
    #[serde(default)]
    pub num_virtual_links: usize,
    pub connectors: Vec<ConnectorConfig>,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub flags: InitFlags,
    #[serde(default)]
    pub debug: DebugOptions,
}

/// Read, parse and validate a scenario file
pub fn load_scenario_config(path: &Path) -> Result<ScenarioConfig> {
    let data = fs::read_to_string(path)?;
    if data.trim().is_empty() {
        return Err(DcError::config(format!("{} is empty", path.display())));
    }
    let cfg: ScenarioConfig = serde_json::from_str(&data)?;
    validate_scenario_config(&cfg)?;
    Ok(cfg)
}

pub fn validate_scenario_config(cfg: &ScenarioConfig) -> Result<()> {
    DceVersion::from_asic(&cfg.asic_id)?;

    if cfg.connectors.len() > limits::MAX_CONNECTORS {
        return Err(DcError::invalid_config(
            "connectors",
            format!("{} listed (max {})", cfg.connectors.len(), limits::MAX_CONNECTORS),
        ));
    }
    if cfg.num_virtual_links > limits::MAX_VIRTUAL_LINKS {
        return Err(DcError::invalid_config(
            "num_virtual_links",
            format!("{} requested (max {})", cfg.num_virtual_links, limits::MAX_VIRTUAL_LINKS),
        ));
    }
    if cfg.connectors.iter().any(|c| matches!(c.signal, SignalType::None | SignalType::Virtual)) {
        return Err(DcError::invalid_config("connectors", "connector needs a physical signal"));
    }

    let link_count = (cfg.connectors.len() + cfg.num_virtual_links) as u32;
    let mut sink_links = HashSet::new();
    for sink in &cfg.sinks {
        if sink.link >= link_count {
            return Err(DcError::invalid_config("sinks", format!("link {} does not exist", sink.link)));
        }
        if sink.name.is_empty() || sink.name.len() > MAX_SINK_NAME_LEN || !sink.name.is_ascii() {
            return Err(DcError::invalid_config("sinks", format!("bad display name '{}'", sink.name)));
        }
        sink_links.insert(sink.link);
    }

    if cfg.targets.len() > limits::MAX_TARGETS {
        return Err(DcError::invalid_config(
            "targets",
            format!("{} listed (max {})", cfg.targets.len(), limits::MAX_TARGETS),
        ));
    }

    let mut target_ids = HashSet::new();
    let mut stream_ids = HashSet::new();
    for target in &cfg.targets {
        if !target_ids.insert(target.id) {
            return Err(DcError::invalid_config("targets", format!("duplicate target id {}", target.id)));
        }
        if target.streams.is_empty() || target.streams.len() > limits::MAX_STREAMS_PER_TARGET {
            return Err(DcError::invalid_config(
                "targets",
                format!("target {} has {} streams", target.id, target.streams.len()),
            ));
        }
        for stream in &target.streams {
            if !stream_ids.insert(stream.id) {
                return Err(DcError::invalid_config("streams", format!("duplicate stream id {}", stream.id)));
            }
            if !sink_links.contains(&stream.link) {
                return Err(DcError::invalid_config(
                    "streams",
                    format!("stream {} targets link {} which has no sink", stream.id, stream.link),
                ));
            }
            stream.timing.resolve()?;
        }
        if target.surfaces.len() > limits::MAX_SURFACES {
            return Err(DcError::invalid_config(
                "surfaces",
                format!("target {} has {} surfaces (max {})", target.id, target.surfaces.len(), limits::MAX_SURFACES),
            ));
        }
        if target.surfaces.iter().any(|s| s.width == 0 || s.height == 0) {
            return Err(DcError::invalid_config("surfaces", format!("target {} has an empty surface", target.id)));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SCENARIO: &str = r#"{
        "asic_id": { "chip_family": 130, "chip_id": 26591, "hw_internal_rev": 80, "vram_width_bits": 256 },
        "connectors": [ { "signal": "hdmi" }, { "signal": "display_port" } ],
        "sinks": [
            { "link": 0, "name": "Living Room", "audio": true },
            { "link": 1, "name": "Desk" }
        ],
        "targets": [
            {
                "id": 1,
                "streams": [ { "id": 1, "link": 0, "timing": "1080p60" } ],
                "surfaces": [ { "id": 1, "width": 1920, "height": 1080 } ]
            },
            { "id": 2, "streams": [ { "id": 2, "link": 1, "timing": "2160p60" } ] }
        ],
        "debug": { "surface_visual_confirm": true }
    }"#;

    fn write_scenario(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn scenario() -> ScenarioConfig {
        serde_json::from_str(SCENARIO).unwrap()
    }

    #[test]
    fn test_load_scenario() {
        let file = write_scenario(SCENARIO);
        let cfg = load_scenario_config(file.path()).unwrap();
        assert_eq!(cfg.connectors.len(), 2);
        assert_eq!(cfg.targets[0].surfaces[0].format, SurfacePixelFormat::Argb8888);
        assert!(cfg.targets[0].surfaces[0].visible);
        assert!(cfg.debug.surface_visual_confirm);
        assert_eq!(cfg.num_virtual_links, 0);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let file = write_scenario(r#"{ "asic_id": { "chip_family": 130, "chip_id": 1, "hw_internal_rev": 80, "vram_width_bits": 256 }, "connectors": [], "fans": [] }"#);
        assert!(matches!(load_scenario_config(file.path()), Err(DcError::JsonParse(_))));
    }

    #[test]
    fn test_empty_file_rejected() {
        let file = write_scenario("  \n");
        assert!(matches!(load_scenario_config(file.path()), Err(DcError::Config(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = load_scenario_config(Path::new("/nonexistent/dcpipe.json")).unwrap_err();
        assert!(matches!(err, DcError::Io(_)));
    }

    #[test]
    fn test_timing_presets_and_explicit() {
        assert_eq!(TimingConfig::Preset("720p60".into()).resolve().unwrap(), CrtcTiming::cea_720p60());
        assert!(TimingConfig::Preset("480i".into()).resolve().is_err());
        let explicit: TimingConfig = serde_json::from_value(serde_json::to_value(CrtcTiming::cea_1080p60()).unwrap()).unwrap();
        assert_eq!(explicit.resolve().unwrap(), CrtcTiming::cea_1080p60());
    }

    #[test]
    fn test_validate_valid() {
        assert!(validate_scenario_config(&scenario()).is_ok());
    }

    #[test]
    fn test_validate_unknown_family() {
        let mut cfg = scenario();
        cfg.asic_id.chip_family = 1;
        assert!(validate_scenario_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_stream_without_sink() {
        let mut cfg = scenario();
        cfg.sinks.pop();
        let err = validate_scenario_config(&cfg).unwrap_err();
        assert!(matches!(err, DcError::InvalidConfig { ref field, .. } if field == "streams"));
    }

    #[test]
    fn test_validate_duplicate_stream_ids() {
        let mut cfg = scenario();
        cfg.targets[1].streams[0].id = 1;
        assert!(validate_scenario_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_sink_name_length() {
        let mut cfg = scenario();
        cfg.sinks[0].name = "A very long monitor name".into();
        assert!(validate_scenario_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_too_many_surfaces() {
        let mut cfg = scenario();
        let surface = cfg.targets[0].surfaces[0].clone();
        cfg.targets[0].surfaces = vec![surface; limits::MAX_SURFACES + 1];
        assert!(validate_scenario_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_virtual_link_bound() {
        let mut cfg = scenario();
        cfg.num_virtual_links = limits::MAX_VIRTUAL_LINKS + 1;
        assert!(validate_scenario_config(&cfg).is_err());
    }
}
