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

//! Link and sink registry
//!
//! Links are created in one batch at device construction from the firmware
//! connector table plus the requested number of virtual links, and dropped
//! together at teardown. Sinks are shared (`Arc`) between their link and any
//! stream that targets them.

use std::fmt;
use std::sync::Arc;

use dc_error::{DcError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::constants::{limits, sideband};
use crate::edid::{parse_edid_caps, Edid, EdidCaps};
use crate::irq::IrqSource;
use crate::services::{BiosService, ConnectorId, ConnectorInfo, I2cCommand, SidebandService};
use crate::types::{LinkSettings, SignalType};

// ============================================================================
// Sinks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SinkInitData {
    pub signal: SignalType,
    /// Pixel clock ceiling of a protocol converter between link and sink
    #[serde(default)]
    pub dongle_max_pix_clk_khz: Option<u32>,
}

/// A display endpoint discovered through its identity block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sink {
    pub link_index: u32,
    pub signal: SignalType,
    pub edid: Edid,
    pub caps: EdidCaps,
    pub dongle_max_pix_clk_khz: Option<u32>,
}

impl Sink {
    /// Sink with no identity block parsed yet
    pub fn new(link_index: u32, init: SinkInitData) -> Self {
        Self {
            link_index,
            signal: init.signal,
            edid: Edid::default(),
            caps: EdidCaps::default(),
            dongle_max_pix_clk_khz: init.dongle_max_pix_clk_khz,
        }
    }

    /// Sink with its identity block parsed
    pub fn with_edid(link_index: u32, init: SinkInitData, raw: &[u8]) -> Result<Self> {
        if raw.len() > limits::MAX_EDID_BUFFER_SIZE {
            return Err(DcError::EdidTooLarge { size: raw.len(), max_size: limits::MAX_EDID_BUFFER_SIZE });
        }
        let caps = parse_edid_caps(raw).map_err(|e| DcError::InvalidEdid(e.to_string()))?;
        Ok(Self {
            edid: Edid { raw: raw.to_vec() },
            caps,
            ..Self::new(link_index, init)
        })
    }

    pub fn supports_audio(&self) -> bool {
        self.caps.audio_supported
    }
}

// ============================================================================
// Link Identity
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    None,
    Single,
    MstBranch,
}

/// Connector identity of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphicsObjectId {
    pub connector: ConnectorId,
    pub enum_id: u8,
}

impl fmt::Display for GraphicsObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}.{}", self.connector, self.enum_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkEncoder {
    Physical { transmitter: u8 },
    Virtual,
}

// ============================================================================
// Sideband Channel
// ============================================================================

/// DDC/AUX channel of one link
#[derive(Clone)]
pub struct DdcService {
    link_index: u32,
    pin: Option<u32>,
    transport: Arc<dyn SidebandService>,
}

impl fmt::Debug for DdcService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DdcService")
            .field("link_index", &self.link_index)
            .field("pin", &self.pin)
            .finish()
    }
}

impl DdcService {
    pub fn new(link_index: u32, pin: Option<u32>, transport: Arc<dyn SidebandService>) -> Self {
        Self { link_index, pin, transport }
    }

    pub fn pin(&self) -> Option<u32> {
        self.pin
    }

    fn require_pin(&self) -> Result<u32> {
        self.pin.ok_or_else(|| DcError::Sideband {
            link_index: self.link_index,
            reason: "link has no sideband channel".to_string(),
        })
    }

    fn check_range(&self, address: u32, len: usize) -> Result<()> {
        let end = address as u64 + len as u64;
        if end > sideband::DPCD_ADDRESS_MAX as u64 + 1 {
            return Err(DcError::Sideband {
                link_index: self.link_index,
                reason: format!("DPCD range {:#x}+{} out of bounds", address, len),
            });
        }
        Ok(())
    }

    /// Read `data.len()` bytes of receiver registers starting at `address`
    pub fn read_dpcd(&self, address: u32, data: &mut [u8]) -> Result<()> {
        self.check_range(address, data.len())?;
        let pin = self.require_pin()?;
        for (i, chunk) in data.chunks_mut(sideband::MAX_AUX_TRANSFER).enumerate() {
            let offset = (i * sideband::MAX_AUX_TRANSFER) as u32;
            self.transport.aux_read(pin, address + offset, chunk)?;
        }
        Ok(())
    }

    /// Write `data` to receiver registers starting at `address`
    pub fn write_dpcd(&self, address: u32, data: &[u8]) -> Result<()> {
        self.check_range(address, data.len())?;
        let pin = self.require_pin()?;
        for (i, chunk) in data.chunks(sideband::MAX_AUX_TRANSFER).enumerate() {
            let offset = (i * sideband::MAX_AUX_TRANSFER) as u32;
            self.transport.aux_write(pin, address + offset, chunk)?;
        }
        Ok(())
    }

    pub fn submit_i2c(&self, command: &I2cCommand) -> Result<()> {
        let pin = self.require_pin()?;
        self.transport.submit_i2c(pin, command)
    }
}

// ============================================================================
// Links
// ============================================================================

#[derive(Debug)]
pub struct Link {
    pub link_index: u32,
    pub link_id: GraphicsObjectId,
    pub connector_signal: SignalType,
    pub connection_type: ConnectionType,
    pub local_sink: Option<Arc<Sink>>,
    remote_sinks: Vec<Arc<Sink>>,
    pub cur_link_settings: LinkSettings,
    pub verified_link_settings: LinkSettings,
    pub irq_source_hpd: IrqSource,
    pub ddi_channel_mapping: u8,
    pub link_enc: LinkEncoder,
    pub hpd_enabled: bool,
    ddc: DdcService,
}

impl Link {
    fn from_connector(link_index: u32, info: &ConnectorInfo, transport: Arc<dyn SidebandService>) -> Result<Self> {
        if info.signal == SignalType::None || info.id == ConnectorId::Virtual {
            return Err(DcError::unexpected(format!(
                "connector {:?} cannot back a physical link",
                info.id
            )));
        }
        Ok(Self {
            link_index,
            link_id: GraphicsObjectId { connector: info.id, enum_id: info.enum_id },
            connector_signal: info.signal,
            connection_type: ConnectionType::None,
            local_sink: None,
            remote_sinks: Vec::with_capacity(limits::MAX_SINKS_PER_LINK),
            cur_link_settings: info.max_link_settings,
            verified_link_settings: info.max_link_settings,
            irq_source_hpd: info.hpd_pin.map(IrqSource::Hpd).unwrap_or(IrqSource::Invalid),
            ddi_channel_mapping: info.ddi_channel_mapping,
            link_enc: LinkEncoder::Physical { transmitter: info.transmitter },
            hpd_enabled: true,
            ddc: DdcService::new(link_index, info.ddc_pin, transport),
        })
    }

    fn virtual_link(link_index: u32, enum_id: u8, transport: Arc<dyn SidebandService>) -> Self {
        Self {
            link_index,
            link_id: GraphicsObjectId { connector: ConnectorId::Virtual, enum_id },
            connector_signal: SignalType::Virtual,
            connection_type: ConnectionType::None,
            local_sink: None,
            remote_sinks: Vec::with_capacity(limits::MAX_SINKS_PER_LINK),
            cur_link_settings: LinkSettings::default(),
            verified_link_settings: LinkSettings::default(),
            irq_source_hpd: IrqSource::Invalid,
            ddi_channel_mapping: 0,
            link_enc: LinkEncoder::Virtual,
            hpd_enabled: false,
            ddc: DdcService::new(link_index, None, transport),
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.link_enc == LinkEncoder::Virtual
    }

    pub fn ddc(&self) -> &DdcService {
        &self.ddc
    }

    pub fn remote_sinks(&self) -> &[Arc<Sink>] {
        &self.remote_sinks
    }

    /// Attach a sink behind this link (multi-stream topologies)
    pub fn add_remote_sink(&mut self, edid: &[u8], init: SinkInitData) -> Result<Arc<Sink>> {
        if edid.len() > limits::MAX_EDID_BUFFER_SIZE {
            warn!(link = self.link_index, size = edid.len(), "Rejected oversized identity block");
            return Err(DcError::EdidTooLarge { size: edid.len(), max_size: limits::MAX_EDID_BUFFER_SIZE });
        }
        if self.remote_sinks.len() >= limits::MAX_SINKS_PER_LINK {
            return Err(DcError::BoundExceeded {
                what: "remote sinks",
                requested: self.remote_sinks.len() + 1,
                max: limits::MAX_SINKS_PER_LINK,
            });
        }

        let mut sink = Sink::new(self.link_index, init);
        sink.edid = Edid { raw: edid.to_vec() };
        self.remote_sinks.push(Arc::new(sink));

        match parse_edid_caps(edid) {
            Ok(caps) => {
                // Nothing else holds the new sink yet
                if let Some(sink) = self.remote_sinks.last_mut().and_then(Arc::get_mut) {
                    sink.caps = caps;
                }
            }
            Err(e) => {
                self.remote_sinks.pop();
                warn!(link = self.link_index, error = %e, "Failed to parse remote sink identity block");
                return Err(DcError::InvalidEdid(e.to_string()));
            }
        }

        let sink = self
            .remote_sinks
            .last()
            .cloned()
            .ok_or_else(|| DcError::unexpected("remote sink list emptied during attach"))?;
        info!(
            link = self.link_index,
            sinks = self.remote_sinks.len(),
            name = sink.caps.display_name.as_deref().unwrap_or("unknown"),
            "Remote sink attached"
        );
        Ok(sink)
    }

    /// Detach a remote sink, keeping the order of the others
    pub fn remove_remote_sink(&mut self, sink: &Arc<Sink>) -> Result<()> {
        if self.remote_sinks.is_empty() {
            return Err(DcError::unexpected(format!("link {} has no remote sinks", self.link_index)));
        }
        let position = self
            .remote_sinks
            .iter()
            .position(|s| Arc::ptr_eq(s, sink))
            .ok_or_else(|| DcError::unexpected(format!("sink not attached to link {}", self.link_index)))?;

        let detached = self.remote_sinks.remove(position);
        debug!(link = self.link_index, remaining = self.remote_sinks.len(), "Remote sink detached");
        drop(detached);
        Ok(())
    }

    /// Set or clear the directly attached sink
    pub fn set_sink(&mut self, sink: Option<Arc<Sink>>) {
        self.connection_type = match sink {
            Some(_) => ConnectionType::Single,
            None => ConnectionType::None,
        };
        self.local_sink = sink;
        debug!(link = self.link_index, connection = ?self.connection_type, "Local sink updated");
    }

    /// Quiesce the link for a low-power state
    pub fn suspend(&mut self) {
        self.hpd_enabled = false;
    }

    /// Restore link state after a low-power state; sinks are kept
    pub fn resume(&mut self) {
        self.cur_link_settings = self.verified_link_settings;
        self.hpd_enabled = self.irq_source_hpd != IrqSource::Invalid;
        debug!(link = self.link_index, "Link resumed");
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Every link owned by a device, indexed by link index
#[derive(Debug, Default)]
pub struct LinkRegistry {
    links: Vec<Link>,
}

impl LinkRegistry {
    /// Enumerate firmware connectors and append `num_virtual_links` virtual links
    pub fn create(
        bios: &dyn BiosService,
        transport: Arc<dyn SidebandService>,
        num_virtual_links: usize,
    ) -> Result<Self> {
        let connectors = bios.connectors_number();
        if connectors > limits::MAX_CONNECTORS {
            error!(connectors, max = limits::MAX_CONNECTORS, "Firmware lists too many connectors");
            return Err(DcError::BoundExceeded {
                what: "connectors",
                requested: connectors,
                max: limits::MAX_CONNECTORS,
            });
        }
        if num_virtual_links > limits::MAX_VIRTUAL_LINKS {
            return Err(DcError::BoundExceeded {
                what: "virtual links",
                requested: num_virtual_links,
                max: limits::MAX_VIRTUAL_LINKS,
            });
        }
        if connectors == 0 && num_virtual_links == 0 {
            error!("No connectors and no virtual links requested");
        }

        let mut links = Vec::new();
        links
            .try_reserve_exact(limits::MAX_LINKS)
            .map_err(|e| DcError::Allocation(format!("link table: {}", e)))?;
        for index in 0..connectors {
            let Some(info) = bios.connector_info(index) else {
                warn!(connector = index, "Connector missing from firmware table");
                continue;
            };
            match Link::from_connector(links.len() as u32, &info, Arc::clone(&transport)) {
                Ok(link) => links.push(link),
                Err(e) => error!(connector = index, error = %e, "Failed to create link"),
            }
        }

        for i in 0..num_virtual_links {
            let link = Link::virtual_link(links.len() as u32, (i + 1) as u8, Arc::clone(&transport));
            links.push(link);
        }

        info!(links = links.len(), virtual_links = num_virtual_links, "Link registry created");
        Ok(Self { links })
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&Link> {
        self.links.get(index as usize)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut Link> {
        self.links.get_mut(index as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.links.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Link> {
        self.links.iter_mut()
    }
}
