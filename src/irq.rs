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

//! Display interrupt sources
//!
//! Maps the (source id, extension id) pairs delivered by the interrupt
//! handler to display interrupt sources and tracks enable/ack state.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::constants::{irq, limits};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IrqSource {
    Invalid,
    /// Vertical blank of a timing generator
    Vblank(u8),
    /// Page flip completion of a timing generator
    Pflip(u8),
    /// Hot-plug detect on a pin
    Hpd(u8),
    /// Short-pulse (receiver) interrupt on a hot-plug pin
    HpdRx(u8),
}

impl fmt::Display for IrqSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrqSource::Invalid => write!(f, "invalid"),
            IrqSource::Vblank(n) => write!(f, "vblank{}", n + 1),
            IrqSource::Pflip(n) => write!(f, "pflip{}", n + 1),
            IrqSource::Hpd(n) => write!(f, "hpd{}", n + 1),
            IrqSource::HpdRx(n) => write!(f, "hpd{}_rx", n + 1),
        }
    }
}

/// Translate an interrupt-handler (source, extension) pair
pub fn interrupt_to_irq_source(src_id: u32, ext_id: u32) -> IrqSource {
    let tg_count = limits::MAX_PIPES as u32;
    let vblank_last = irq::SRC_VBLANK_FIRST + tg_count - 1;
    let pflip_last = irq::SRC_PFLIP_FIRST + 2 * (tg_count - 1);

    match src_id {
        s if (irq::SRC_VBLANK_FIRST..=vblank_last).contains(&s) && ext_id == 0 => {
            IrqSource::Vblank((s - irq::SRC_VBLANK_FIRST) as u8)
        }
        s if (irq::SRC_PFLIP_FIRST..=pflip_last).contains(&s) && (s - irq::SRC_PFLIP_FIRST) % 2 == 0 => {
            IrqSource::Pflip(((s - irq::SRC_PFLIP_FIRST) / 2) as u8)
        }
        irq::SRC_HPD if ext_id < irq::HPD_PIN_COUNT => IrqSource::Hpd(ext_id as u8),
        irq::SRC_HPD if ext_id < 2 * irq::HPD_PIN_COUNT => {
            IrqSource::HpdRx((ext_id - irq::HPD_PIN_COUNT) as u8)
        }
        _ => IrqSource::Invalid,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct IrqState {
    enabled: bool,
    acks: u64,
}

/// Interrupt enable/ack bookkeeping owned by the resource pool
#[derive(Debug, Default)]
pub struct IrqService {
    sources: HashMap<IrqSource, IrqState>,
}

impl IrqService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable a source; false for the invalid source
    pub fn set(&mut self, src: IrqSource, enable: bool) -> bool {
        if src == IrqSource::Invalid {
            return false;
        }
        debug!(source = %src, enable, "Interrupt source state changed");
        self.sources.entry(src).or_default().enabled = enable;
        true
    }

    /// Acknowledge a pending interrupt; false for the invalid source
    pub fn ack(&mut self, src: IrqSource) -> bool {
        if src == IrqSource::Invalid {
            return false;
        }
        let state = self.sources.entry(src).or_default();
        state.acks += 1;
        trace!(source = %src, acks = state.acks, "Interrupt acknowledged");
        true
    }

    pub fn is_enabled(&self, src: IrqSource) -> bool {
        self.sources.get(&src).map(|s| s.enabled).unwrap_or(false)
    }

    pub fn ack_count(&self, src: IrqSource) -> u64 {
        self.sources.get(&src).map(|s| s.acks).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vblank_and_pflip_mapping() {
        assert_eq!(interrupt_to_irq_source(1, 0), IrqSource::Vblank(0));
        assert_eq!(interrupt_to_irq_source(6, 0), IrqSource::Vblank(5));
        assert_eq!(interrupt_to_irq_source(1, 3), IrqSource::Invalid);
        assert_eq!(interrupt_to_irq_source(8, 0), IrqSource::Pflip(0));
        assert_eq!(interrupt_to_irq_source(18, 0), IrqSource::Pflip(5));
        assert_eq!(interrupt_to_irq_source(9, 0), IrqSource::Invalid);
    }

    #[test]
    fn test_hpd_mapping() {
        assert_eq!(interrupt_to_irq_source(42, 0), IrqSource::Hpd(0));
        assert_eq!(interrupt_to_irq_source(42, 5), IrqSource::Hpd(5));
        assert_eq!(interrupt_to_irq_source(42, 6), IrqSource::HpdRx(0));
        assert_eq!(interrupt_to_irq_source(42, 12), IrqSource::Invalid);
        assert_eq!(interrupt_to_irq_source(200, 0), IrqSource::Invalid);
    }

    #[test]
    fn test_set_and_ack() {
        let mut irqs = IrqService::new();
        assert!(!irqs.set(IrqSource::Invalid, true));
        assert!(irqs.set(IrqSource::Vblank(1), true));
        assert!(irqs.is_enabled(IrqSource::Vblank(1)));
        assert!(irqs.ack(IrqSource::Vblank(1)));
        assert!(irqs.ack(IrqSource::Vblank(1)));
        assert_eq!(irqs.ack_count(IrqSource::Vblank(1)), 2);
        irqs.set(IrqSource::Vblank(1), false);
        assert!(!irqs.is_enabled(IrqSource::Vblank(1)));
    }
}
