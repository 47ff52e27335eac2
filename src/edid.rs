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

//! Sink identity block (EDID) capability parsing

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::edid as edid_const;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EdidError {
    #[error("identity block truncated: {len} bytes, need {needed}")]
    Truncated { len: usize, needed: usize },
    #[error("bad identity block header")]
    BadHeader,
    #[error("checksum mismatch in block {block}")]
    BadChecksum { block: usize },
}

/// Capabilities parsed from a sink's identity block
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EdidCaps {
    /// Three-letter PNP manufacturer id
    pub manufacturer_id: String,
    pub product_code: u16,
    pub serial_number: u32,
    pub manufacture_week: u8,
    pub manufacture_year: u16,
    pub version: (u8, u8),
    pub display_name: Option<String>,
    /// From the range-limits descriptor
    pub max_pixel_clock_khz: Option<u32>,
    pub audio_supported: bool,
    pub extension_count: u8,
}

/// Raw identity block as stored on a sink
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Edid {
    pub raw: Vec<u8>,
}

impl Edid {
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

fn block_checksum_ok(block: &[u8]) -> bool {
    block.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)) == 0
}

fn decode_manufacturer(hi: u8, lo: u8) -> String {
    let packed = u16::from_be_bytes([hi, lo]);
    [(packed >> 10) & 0x1F, (packed >> 5) & 0x1F, packed & 0x1F]
        .iter()
        .map(|c| (b'A' + (*c as u8).saturating_sub(1)) as char)
        .collect()
}

fn encode_manufacturer(id: &str) -> [u8; 2] {
    let mut packed = 0u16;
    for c in id.bytes().take(3) {
        packed = (packed << 5) | ((c.to_ascii_uppercase().saturating_sub(b'A') + 1) as u16 & 0x1F);
    }
    packed.to_be_bytes()
}

/// Parse capability fields from an identity block
pub fn parse_edid_caps(raw: &[u8]) -> Result<EdidCaps, EdidError> {
    if raw.len() < edid_const::BLOCK_SIZE {
        return Err(EdidError::Truncated { len: raw.len(), needed: edid_const::BLOCK_SIZE });
    }
    if raw[..8] != edid_const::HEADER {
        return Err(EdidError::BadHeader);
    }
    let base = &raw[..edid_const::BLOCK_SIZE];
    if !block_checksum_ok(base) {
        return Err(EdidError::BadChecksum { block: 0 });
    }

    let extension_count = base[edid_const::EXTENSION_COUNT_OFFSET];
    let needed = edid_const::BLOCK_SIZE * (1 + extension_count as usize);
    if raw.len() < needed {
        return Err(EdidError::Truncated { len: raw.len(), needed });
    }

    let mut caps = EdidCaps {
        manufacturer_id: decode_manufacturer(base[8], base[9]),
        product_code: u16::from_le_bytes([base[10], base[11]]),
        serial_number: u32::from_le_bytes([base[12], base[13], base[14], base[15]]),
        manufacture_week: base[16],
        manufacture_year: 1990 + base[17] as u16,
        version: (base[18], base[19]),
        extension_count,
        ..EdidCaps::default()
    };

    for offset in edid_const::DESCRIPTOR_OFFSETS {
        let desc = &base[offset..offset + 18];
        // Display descriptors start with a zero pixel clock
        if desc[0] != 0 || desc[1] != 0 || desc[2] != 0 {
            continue;
        }
        match desc[3] {
            edid_const::TAG_PRODUCT_NAME => {
                let text: String = desc[5..]
                    .iter()
                    .take_while(|b| **b != 0x0A)
                    .map(|b| *b as char)
                    .collect();
                let text = text.trim().to_string();
                if !text.is_empty() {
                    caps.display_name = Some(text);
                }
            }
            edid_const::TAG_RANGE_LIMITS => {
                if desc[9] > 0 {
                    caps.max_pixel_clock_khz = Some(desc[9] as u32 * 10_000);
                }
            }
            _ => {}
        }
    }

    for index in 1..=extension_count as usize {
        let start = index * edid_const::BLOCK_SIZE;
        let block = &raw[start..start + edid_const::BLOCK_SIZE];
        if !block_checksum_ok(block) {
            return Err(EdidError::BadChecksum { block: index });
        }
        if block[0] == edid_const::CTA_EXTENSION_TAG && block[3] & edid_const::CTA_BASIC_AUDIO != 0 {
            caps.audio_supported = true;
        }
    }

    Ok(caps)
}

/// Builds well-formed identity blocks for virtual sinks and simulation
#[derive(Debug, Clone)]
pub struct EdidBuilder {
    pub manufacturer_id: String,
    pub product_code: u16,
    pub serial_number: u32,
    pub display_name: String,
    pub max_pixel_clock_mhz: u32,
    pub audio: bool,
}

impl EdidBuilder {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            manufacturer_id: "DCP".to_string(),
            product_code: 0x0001,
            serial_number: 0,
            display_name: display_name.into(),
            max_pixel_clock_mhz: 600,
            audio: false,
        }
    }

    pub fn with_audio(mut self, audio: bool) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_serial(mut self, serial: u32) -> Self {
        self.serial_number = serial;
        self
    }

    pub fn with_max_pixel_clock_mhz(mut self, mhz: u32) -> Self {
        self.max_pixel_clock_mhz = mhz;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut base = vec![0u8; edid_const::BLOCK_SIZE];
        base[..8].copy_from_slice(&edid_const::HEADER);
        base[8..10].copy_from_slice(&encode_manufacturer(&self.manufacturer_id));
        base[10..12].copy_from_slice(&self.product_code.to_le_bytes());
        base[12..16].copy_from_slice(&self.serial_number.to_le_bytes());
        base[16] = 1;
        base[17] = 35;
        base[18] = 1;
        base[19] = 4;

        let name_desc = edid_const::DESCRIPTOR_OFFSETS[1];
        base[name_desc + 3] = edid_const::TAG_PRODUCT_NAME;
        let mut name: Vec<u8> = self.display_name.bytes().take(13).collect();
        if name.len() < 13 {
            name.push(0x0A);
        }
        name.resize(13, b' ');
        base[name_desc + 5..name_desc + 18].copy_from_slice(&name);

        let range_desc = edid_const::DESCRIPTOR_OFFSETS[2];
        base[range_desc + 3] = edid_const::TAG_RANGE_LIMITS;
        base[range_desc + 9] = (self.max_pixel_clock_mhz / 10).min(255) as u8;

        let mut extension = None;
        if self.audio {
            base[edid_const::EXTENSION_COUNT_OFFSET] = 1;
            let mut block = vec![0u8; edid_const::BLOCK_SIZE];
            block[0] = edid_const::CTA_EXTENSION_TAG;
            block[1] = 3;
            block[2] = 4;
            block[3] = edid_const::CTA_BASIC_AUDIO;
            seal_checksum(&mut block);
            extension = Some(block);
        }
        seal_checksum(&mut base);

        if let Some(block) = extension {
            base.extend_from_slice(&block);
        }
        base
    }
}

fn seal_checksum(block: &mut [u8]) {
    let last = block.len() - 1;
    block[last] = 0;
    let sum = block.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    block[last] = 0u8.wrapping_sub(sum);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_output_parses() {
        let raw = EdidBuilder::new("DCP Panel").with_serial(42).build();
        let caps = parse_edid_caps(&raw).unwrap();
        assert_eq!(caps.manufacturer_id, "DCP");
        assert_eq!(caps.serial_number, 42);
        assert_eq!(caps.display_name.as_deref(), Some("DCP Panel"));
        assert_eq!(caps.max_pixel_clock_khz, Some(600_000));
        assert!(!caps.audio_supported);
    }

    #[test]
    fn test_audio_extension_detected() {
        let raw = EdidBuilder::new("TV").with_audio(true).build();
        assert_eq!(raw.len(), 256);
        let caps = parse_edid_caps(&raw).unwrap();
        assert!(caps.audio_supported);
        assert_eq!(caps.extension_count, 1);
    }

    #[test]
    fn test_rejects_bad_header_and_checksum() {
        let mut raw = EdidBuilder::new("X").build();
        raw[20] ^= 0xFF;
        assert_eq!(parse_edid_caps(&raw), Err(EdidError::BadChecksum { block: 0 }));
        raw[0] = 0x12;
        assert_eq!(parse_edid_caps(&raw), Err(EdidError::BadHeader));
    }

    #[test]
    fn test_rejects_missing_extension() {
        let raw = EdidBuilder::new("TV").with_audio(true).build();
        let err = parse_edid_caps(&raw[..128]).unwrap_err();
        assert_eq!(err, EdidError::Truncated { len: 128, needed: 256 });
    }
}
