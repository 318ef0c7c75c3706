//! Simulated doorbell BAR backed by host memory.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use ember_core::{BarInfo, BarMapper, BarRegion, ByteSize, Error, PhysAddr, Result};

/// Physical base reported for the simulated BAR
pub const SIM_BAR_BASE: u64 = 0xE000_0000;

/// Host-memory BAR with map/unmap accounting
#[derive(Debug)]
pub struct SimBar {
    index: u8,
    size: ByteSize,
    unset: bool,
    backing: Box<[AtomicU64]>,
    fail_map: AtomicBool,
    maps: AtomicU32,
    unmaps: AtomicU32,
}

impl SimBar {
    /// Create an assigned BAR of `size` bytes
    pub fn new(index: u8, size: ByteSize) -> Self {
        let words = (size.as_bytes() / 8) as usize;
        let backing: Vec<AtomicU64> = (0..words).map(|_| AtomicU64::new(0)).collect();
        Self {
            index,
            size,
            unset: false,
            backing: backing.into_boxed_slice(),
            fail_map: AtomicBool::new(false),
            maps: AtomicU32::new(0),
            unmaps: AtomicU32::new(0),
        }
    }

    /// Create a BAR the platform never assigned
    pub fn unassigned(index: u8, size: ByteSize) -> Self {
        Self {
            unset: true,
            ..Self::new(index, size)
        }
    }

    /// Make the next `map_bar` fail
    pub fn fail_next_map(&self) {
        self.fail_map.store(true, Ordering::SeqCst);
    }

    /// Successful `map_bar` calls
    pub fn map_count(&self) -> u32 {
        self.maps.load(Ordering::SeqCst)
    }

    /// `unmap_bar` calls
    pub fn unmap_count(&self) -> u32 {
        self.unmaps.load(Ordering::SeqCst)
    }

    /// Read the dword at `index` straight from the backing store
    pub fn peek32(&self, index: usize) -> u32 {
        let word = self.peek64_at_byte((index * 4) & !7);
        if index % 2 == 0 {
            word as u32
        } else {
            (word >> 32) as u32
        }
    }

    /// Read the qword starting at dword `index` (must be even)
    pub fn peek64(&self, index: usize) -> u64 {
        self.peek64_at_byte(index * 4)
    }

    fn peek64_at_byte(&self, byte: usize) -> u64 {
        self.backing
            .get(byte / 8)
            .map_or(0, |w| w.load(Ordering::SeqCst))
    }

    /// Check that nothing was ever written to the BAR
    pub fn is_untouched(&self) -> bool {
        self.backing.iter().all(|w| w.load(Ordering::SeqCst) == 0)
    }
}

impl BarMapper for SimBar {
    fn bar_info(&self, index: u8) -> Result<BarInfo> {
        if index != self.index {
            return Err(Error::NotFound);
        }
        Ok(BarInfo {
            index,
            base_addr: PhysAddr::new(SIM_BAR_BASE),
            size: self.size,
            unset: self.unset,
        })
    }

    fn map_bar(&self, index: u8) -> Result<BarRegion> {
        if index != self.index || self.unset {
            return Err(Error::BarMappingFailed);
        }
        if self.fail_map.swap(false, Ordering::SeqCst) {
            return Err(Error::BarMappingFailed);
        }
        self.maps.fetch_add(1, Ordering::SeqCst);
        Ok(BarRegion {
            index,
            phys_addr: PhysAddr::new(SIM_BAR_BASE),
            virt_addr: self.backing.as_ptr() as usize,
            size: self.size,
        })
    }

    fn unmap_bar(&self, _region: BarRegion) {
        self.unmaps.fetch_add(1, Ordering::SeqCst);
    }
}
