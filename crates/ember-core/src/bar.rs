//! # BAR (Base Address Register) Types
//!
//! Descriptions of PCI BARs and of a BAR mapped into kernel address space.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::types::{ByteSize, PhysAddr};

// =============================================================================
// BAR INDICES
// =============================================================================

/// BAR index holding the doorbell aperture
pub const DOORBELL_BAR_INDEX: u8 = 2;

// =============================================================================
// BAR INFO
// =============================================================================

/// Information about a single BAR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarInfo {
    /// BAR index (0-5)
    pub index: u8,
    /// Physical base address
    pub base_addr: PhysAddr,
    /// BAR size
    pub size: ByteSize,
    /// Resource was never assigned by the platform
    pub unset: bool,
}

impl BarInfo {
    /// Check if BAR is assigned and non-empty
    pub fn is_enabled(&self) -> bool {
        !self.unset && self.size.as_bytes() > 0
    }
}

// =============================================================================
// BAR REGION
// =============================================================================

/// BAR mapped into the kernel's address space
#[derive(Debug)]
pub struct BarRegion {
    /// BAR index this region maps
    pub index: u8,
    /// Physical base address
    pub phys_addr: PhysAddr,
    /// Virtual address of the kernel mapping
    pub virt_addr: usize,
    /// Region size
    pub size: ByteSize,
}

impl BarRegion {
    /// Pointer to the start of the mapping
    pub fn as_ptr(&self) -> *mut u8 {
        self.virt_addr as *mut u8
    }

    /// Check if `len` bytes starting at `offset` are inside the mapping
    pub fn contains(&self, offset: usize, len: usize) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end as u64 <= self.size.as_bytes())
    }

    /// Read u32 at offset
    ///
    /// # Safety
    /// The mapping must be live, `offset` 4-byte aligned and in bounds.
    pub unsafe fn read32(&self, offset: usize) -> u32 {
        debug_assert!(offset % 4 == 0);
        debug_assert!(self.contains(offset, 4));

        let ptr = (self.virt_addr + offset) as *const u32;
        // SAFETY: Caller guarantees alignment and bounds
        unsafe { core::ptr::read_volatile(ptr) }
    }

    /// Write u32 at offset
    ///
    /// # Safety
    /// The mapping must be live, `offset` 4-byte aligned and in bounds.
    pub unsafe fn write32(&self, offset: usize, value: u32) {
        debug_assert!(offset % 4 == 0);
        debug_assert!(self.contains(offset, 4));

        let ptr = (self.virt_addr + offset) as *mut u32;
        // SAFETY: Caller guarantees alignment and bounds
        unsafe { core::ptr::write_volatile(ptr, value) }
    }

    /// Atomically read u64 at offset
    ///
    /// # Safety
    /// The mapping must be live, `offset` 8-byte aligned and in bounds.
    pub unsafe fn read64(&self, offset: usize) -> u64 {
        debug_assert!(offset % 8 == 0);
        debug_assert!(self.contains(offset, 8));

        let ptr = (self.virt_addr + offset) as *mut u64;
        // SAFETY: Caller guarantees alignment and bounds; doorbell memory is
        // only ever accessed through atomics or volatile ops
        let cell = unsafe { AtomicU64::from_ptr(ptr) };
        cell.load(Ordering::SeqCst)
    }

    /// Atomically write u64 at offset
    ///
    /// # Safety
    /// The mapping must be live, `offset` 8-byte aligned and in bounds.
    pub unsafe fn write64(&self, offset: usize, value: u64) {
        debug_assert!(offset % 8 == 0);
        debug_assert!(self.contains(offset, 8));

        let ptr = (self.virt_addr + offset) as *mut u64;
        // SAFETY: Caller guarantees alignment and bounds
        let cell = unsafe { AtomicU64::from_ptr(ptr) };
        cell.store(value, Ordering::SeqCst);
    }
}
