//! Kernel doorbell page and slot bitmap.

use alloc::vec::Vec;

use ember_core::{
    BoHandle, BufferObjectService, ByteSize, Error, KernelBo, MemoryDomain, Result, PAGE_SIZE,
};

// =============================================================================
// INDEX CONVERSION
// =============================================================================

/// Absolute aperture index of slot `relative` of a doorbell object at
/// `offset_bytes` into the BAR
///
/// Indices are dword-granular but every doorbell is 64 bits wide. `None`
/// when the index does not fit the 32-bit index space.
#[inline]
pub fn index_from_offset(offset_bytes: u64, relative: u32) -> Option<u32> {
    let base = u32::try_from(offset_bytes / 4).ok()?;
    relative.checked_mul(2)?.checked_add(base)
}

/// Absolute aperture index of slot `relative` of doorbell object `bo`
///
/// Fails with `InvalidDoorbell` when the index overflows.
pub fn index_in_bar(bos: &dyn BufferObjectService, bo: BoHandle, relative: u32) -> Result<u32> {
    let offset = bos.gpu_offset(bo)?;
    index_from_offset(offset.raw(), relative).ok_or_else(|| {
        log::error!("doorbell slot {} of {:?} at {} overflows the index space", relative, bo, offset);
        Error::InvalidDoorbell
    })
}

// =============================================================================
// DOORBELL OBJECT
// =============================================================================

/// A pinned page range of the doorbell BAR
#[derive(Debug)]
pub struct DoorbellObject {
    bo: KernelBo,
    start: u32,
    end: u32,
}

impl DoorbellObject {
    /// Allocate a kernel doorbell page range of at least `size` bytes
    pub fn allocate(bos: &dyn BufferObjectService, size: ByteSize) -> Result<Self> {
        let size = size.page_align();
        let bo = bos
            .create_pinned(MemoryDomain::DOORBELL, size, PAGE_SIZE)
            .map_err(|err| {
                log::error!("failed to create doorbell BO: {}", err);
                Error::OutOfMemory
            })?;

        let start = match index_in_bar(bos, bo.handle, 0) {
            Ok(start) => start,
            Err(err) => {
                bos.free(bo.handle);
                return Err(err);
            }
        };
        let end = match u32::try_from(size.as_dwords())
            .ok()
            .and_then(|dwords| start.checked_add(dwords))
        {
            Some(end) => end,
            None => {
                bos.free(bo.handle);
                return Err(Error::InvalidDoorbell);
            }
        };
        log::debug!("doorbell page {:?}: [0x{:x}, 0x{:x})", bo.handle, start, end);
        Ok(Self { bo, start, end })
    }

    /// Release the backing allocation
    pub fn free(self, bos: &dyn BufferObjectService) {
        log::debug!("freeing doorbell page {:?}", self.bo.handle);
        bos.free(self.bo.handle);
    }

    /// First absolute index
    pub fn start(&self) -> u32 {
        self.start
    }

    /// One past the last absolute index
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Backing object
    pub fn handle(&self) -> BoHandle {
        self.bo.handle
    }

    /// Allocation size
    pub fn size(&self) -> ByteSize {
        self.bo.size
    }
}

// =============================================================================
// SLOT BITMAP
// =============================================================================

/// Fixed-size bitmap of allocated doorbell slots
///
/// A bit is set iff its slot belongs to a live allocation.
#[derive(Debug)]
pub struct DoorbellBitmap {
    words: Vec<u64>,
    bits: usize,
}

impl DoorbellBitmap {
    /// Create an all-clear bitmap of `bits` slots
    pub fn new(bits: usize) -> Result<Self> {
        let len = bits.div_ceil(64);
        let mut words = Vec::new();
        words.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
        words.resize(len, 0);
        Ok(Self { words, bits })
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.bits
    }

    /// Set the lowest clear bit and return it
    pub fn alloc(&mut self) -> Option<usize> {
        for (word_idx, word) in self.words.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = word.trailing_ones() as usize;
            let slot = word_idx * 64 + bit;
            if slot >= self.bits {
                return None;
            }
            *word |= 1 << bit;
            return Some(slot);
        }
        None
    }

    /// Clear `slot`; returns whether it was set
    pub fn free(&mut self, slot: usize) -> bool {
        if slot >= self.bits {
            return false;
        }
        let mask = 1u64 << (slot % 64);
        let word = &mut self.words[slot / 64];
        let was_set = *word & mask != 0;
        *word &= !mask;
        was_set
    }

    /// Check if `slot` is allocated
    pub fn test(&self, slot: usize) -> bool {
        slot < self.bits && self.words[slot / 64] & (1u64 << (slot % 64)) != 0
    }

    /// Number of allocated slots
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_test_framework::{BoFault, SimBoService};

    #[test]
    fn test_index_granularity() {
        for offset in [0u64, 0x1000, 0x8000] {
            let base = index_from_offset(offset, 0).unwrap();
            assert_eq!(base, (offset / 4) as u32);
            for relative in 0..64 {
                assert_eq!(index_from_offset(offset, relative), Some(base + 2 * relative));
            }
        }
    }

    #[test]
    fn test_index_overflow_is_rejected() {
        assert_eq!(index_from_offset(0, 0x8000_0000), None);
        assert_eq!(index_from_offset(0x1000, 0x7FFF_FFFF), None);
        assert_eq!(index_from_offset(0x4_0000_0000, 0), None);
        assert_eq!(index_from_offset(0, 0x7FFF_FFFF), Some(0xFFFF_FFFE));

        let bos = SimBoService::new();
        let page = DoorbellObject::allocate(&bos, ByteSize::PAGE).unwrap();
        assert_eq!(index_in_bar(&bos, page.handle(), 0x8000_0000), Err(Error::InvalidDoorbell));
        page.free(&bos);
    }

    #[test]
    fn test_index_in_bar_uses_object_offset() {
        let bos = SimBoService::new();
        let first = DoorbellObject::allocate(&bos, ByteSize::from_bytes(100)).unwrap();
        let second = DoorbellObject::allocate(&bos, ByteSize::PAGE).unwrap();

        assert_eq!(first.start(), 0);
        assert_eq!(first.end(), 0x400);
        assert_eq!(first.size(), ByteSize::PAGE);
        assert_eq!(second.start(), 0x400);
        assert_eq!(index_in_bar(&bos, second.handle(), 3).unwrap(), 0x406);

        first.free(&bos);
        second.free(&bos);
        assert_eq!(bos.live_kernel_objects(), 0);
        assert_eq!(bos.double_frees(), 0);
    }

    #[test]
    fn test_allocation_failure_is_out_of_memory() {
        let bos = SimBoService::new();
        bos.inject(BoFault::Create(MemoryDomain::DOORBELL));
        let err = DoorbellObject::allocate(&bos, ByteSize::PAGE).unwrap_err();
        assert_eq!(err, Error::OutOfMemory);
        assert_eq!(bos.live_kernel_objects(), 0);
    }

    #[test]
    fn test_bitmap_set_iff_allocated() {
        let mut bitmap = DoorbellBitmap::new(70).unwrap();
        let slots: Vec<usize> = (0..70).map_while(|_| bitmap.alloc()).collect();
        assert_eq!(slots.len(), 70);
        assert_eq!(slots[69], 69);
        assert!(bitmap.alloc().is_none());
        assert_eq!(bitmap.count(), 70);

        assert!(bitmap.free(65));
        assert!(!bitmap.test(65));
        assert!(!bitmap.free(65));
        assert_eq!(bitmap.alloc(), Some(65));
        assert!(bitmap.test(65));

        assert!(bitmap.free(3));
        assert!(bitmap.free(1));
        assert_eq!(bitmap.alloc(), Some(1));
        assert_eq!(bitmap.count(), 69);
        assert!(!bitmap.free(70));
    }
}
