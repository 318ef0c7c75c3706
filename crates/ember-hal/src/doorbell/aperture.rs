//! Doorbell BAR mapping with validated access.
//!
//! Accesses take no lock: producers ring doorbells concurrently with each
//! other and with queue creation. Range registration needs `&mut self`, so
//! it can only happen while the owner has exclusive access (device init).

use core::sync::atomic::{AtomicBool, Ordering};

use ember_core::{BarRegion, ByteSize, Error, PhysAddr, Result};

use super::range::{DoorbellOwner, DoorbellRange, RangeTable};

/// Access width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    Dword,
    Qword,
}

impl Width {
    const fn bytes(self) -> usize {
        match self {
            Self::Dword => 4,
            Self::Qword => 8,
        }
    }
}

/// Mapped doorbell aperture
#[derive(Debug)]
pub struct DoorbellAperture {
    /// BAR physical base (0 when disabled)
    base: PhysAddr,
    /// BAR size (0 when disabled)
    size: ByteSize,
    /// Kernel mapping, present between init and fini
    region: Option<BarRegion>,
    /// Registered index ranges
    ranges: RangeTable,
    /// Hardware must not be touched (reset, hot unplug)
    skip_hw_access: AtomicBool,
}

impl DoorbellAperture {
    /// Aperture of a device without doorbells
    pub const fn disabled() -> Self {
        Self {
            base: PhysAddr::new(0),
            size: ByteSize::ZERO,
            region: None,
            ranges: RangeTable::new(),
            skip_hw_access: AtomicBool::new(false),
        }
    }

    /// Aperture over an established BAR mapping
    pub fn new(region: BarRegion) -> Self {
        Self {
            base: region.phys_addr,
            size: region.size,
            region: Some(region),
            ranges: RangeTable::new(),
            skip_hw_access: AtomicBool::new(false),
        }
    }

    /// BAR physical base
    pub fn base(&self) -> PhysAddr {
        self.base
    }

    /// BAR size
    pub fn size(&self) -> ByteSize {
        self.size
    }

    /// Check if the BAR is currently mapped
    pub fn is_mapped(&self) -> bool {
        self.region.is_some()
    }

    /// Take the mapping back for unmapping; later accesses are rejected
    pub fn take_region(&mut self) -> Option<BarRegion> {
        self.ranges.clear();
        self.region.take()
    }

    /// Register the index range of one owner
    pub fn register_range(&mut self, range: DoorbellRange) -> Result<()> {
        if self.region.is_none() {
            return Err(Error::BarMappingFailed);
        }
        self.ranges.register(range)?;
        log::debug!("doorbell range {} registered", range);
        Ok(())
    }

    /// Drop the index range of one owner
    pub fn unregister_range(&mut self, owner: DoorbellOwner) -> Option<DoorbellRange> {
        self.ranges.unregister(owner)
    }

    /// Range registered for `owner`
    pub fn range(&self, owner: DoorbellOwner) -> Option<DoorbellRange> {
        self.ranges.get(owner)
    }

    /// Gate hardware access (reset / unplug)
    pub fn set_skip_hw_access(&self, skip: bool) {
        self.skip_hw_access.store(skip, Ordering::Release);
    }

    /// Check if hardware access is currently suppressed
    pub fn skip_hw_access(&self) -> bool {
        self.skip_hw_access.load(Ordering::Acquire)
    }

    /// Check if `index` falls in exactly one registered range
    pub fn validate(&self, index: u32) -> bool {
        self.ranges.validate(index)
    }

    /// Byte offset for an access, or why it is refused
    fn slot(&self, index: u32, width: Width) -> Result<(&BarRegion, usize)> {
        let region = self.region.as_ref().ok_or(Error::OutOfRangeAccess)?;
        if !self.validate(index) {
            return Err(Error::OutOfRangeAccess);
        }
        // 64-bit doorbells start on even dwords; anything else cannot be
        // accessed atomically.
        if width == Width::Qword && index % 2 != 0 {
            return Err(Error::OutOfRangeAccess);
        }
        let offset = index as usize * 4;
        if !region.contains(offset, width.bytes()) {
            return Err(Error::OutOfRangeAccess);
        }
        Ok((region, offset))
    }

    /// Read a 32-bit doorbell; 0 when refused
    pub fn read32(&self, index: u32) -> u32 {
        if self.skip_hw_access() {
            return 0;
        }
        match self.slot(index, Width::Dword) {
            // SAFETY: `slot` checked mapping, alignment and bounds
            Ok((region, offset)) => unsafe { region.read32(offset) },
            Err(err) => {
                log::error!("reading beyond doorbell aperture: 0x{:08x} ({})", index, err);
                0
            }
        }
    }

    /// Write a 32-bit doorbell; no-op when refused
    pub fn write32(&self, index: u32, value: u32) {
        if self.skip_hw_access() {
            return;
        }
        match self.slot(index, Width::Dword) {
            Ok((region, offset)) => {
                log::trace!("doorbell32[0x{:x}] <- 0x{:08x}", index, value);
                // SAFETY: `slot` checked mapping, alignment and bounds
                unsafe { region.write32(offset, value) }
            }
            Err(err) => {
                log::error!("writing beyond doorbell aperture: 0x{:08x} ({})", index, err);
            }
        }
    }

    /// Atomically read a 64-bit doorbell; 0 when refused
    pub fn read64(&self, index: u32) -> u64 {
        if self.skip_hw_access() {
            return 0;
        }
        match self.slot(index, Width::Qword) {
            // SAFETY: `slot` checked mapping, 8-byte alignment and bounds
            Ok((region, offset)) => unsafe { region.read64(offset) },
            Err(err) => {
                log::error!("reading beyond doorbell aperture: 0x{:08x} ({})", index, err);
                0
            }
        }
    }

    /// Atomically write a 64-bit doorbell; no-op when refused
    pub fn write64(&self, index: u32, value: u64) {
        if self.skip_hw_access() {
            return;
        }
        match self.slot(index, Width::Qword) {
            Ok((region, offset)) => {
                log::trace!("doorbell64[0x{:x}] <- 0x{:016x}", index, value);
                // SAFETY: `slot` checked mapping, 8-byte alignment and bounds
                unsafe { region.write64(offset, value) }
            }
            Err(err) => {
                log::error!("writing beyond doorbell aperture: 0x{:08x} ({})", index, err);
            }
        }
    }
}
