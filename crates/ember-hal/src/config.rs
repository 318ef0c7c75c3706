//! Doorbell configuration.

use ember_core::bar::DOORBELL_BAR_INDEX;

/// Doorbells reserved for the SDMA paging queue page (one page of dwords)
pub const PAGING_DOORBELL_DWORDS: u32 = 0x400;

/// Doorbell aperture configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoorbellConfig {
    /// Highest doorbell index the ASIC assigns to kernel rings
    pub max_assignment: u32,
    /// BAR holding the aperture
    pub bar_index: u8,
}

impl Default for DoorbellConfig {
    fn default() -> Self {
        Self {
            max_assignment: 0x18F,
            bar_index: DOORBELL_BAR_INDEX,
        }
    }
}
