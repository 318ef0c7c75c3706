//! Kernel buffer objects and scoped reservations.

use core::fmt;

use ember_core::{
    BoHandle, BufferObjectService, ByteSize, Error, GpuAddr, KernelBo, MemoryDomain, Result,
    PAGE_SIZE,
};

// =============================================================================
// RESERVATION GUARD
// =============================================================================

/// Exclusive reservation of a buffer object, dropped on scope exit
pub struct ReservationGuard<'a> {
    bos: &'a dyn BufferObjectService,
    bo: BoHandle,
}

impl<'a> ReservationGuard<'a> {
    /// Reserve `bo`
    pub fn acquire(bos: &'a dyn BufferObjectService, bo: BoHandle) -> Result<Self> {
        bos.reserve(bo)?;
        Ok(Self { bos, bo })
    }

    /// Reserved object
    pub fn handle(&self) -> BoHandle {
        self.bo
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        self.bos.unreserve(self.bo);
    }
}

impl fmt::Debug for ReservationGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReservationGuard")
            .field("bo", &self.bo)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// KERNEL BUFFER
// =============================================================================

/// Pinned, CPU-mapped, zero-initialized kernel allocation
///
/// Must be released with [`free`](Self::free).
#[derive(Debug)]
pub struct KernelBuffer {
    bo: KernelBo,
}

impl KernelBuffer {
    /// Allocate a page-aligned buffer of at least `size` bytes in `domain`
    pub fn create(bos: &dyn BufferObjectService, domain: MemoryDomain, size: ByteSize) -> Result<Self> {
        let bo = bos.create_pinned(domain, size.page_align(), PAGE_SIZE)?;
        if bo.cpu_ptr.is_null() || bo.size < size {
            bos.free(bo.handle);
            return Err(Error::InvalidMapping);
        }
        let mut buffer = Self { bo };
        buffer.as_mut_slice().fill(0);
        Ok(buffer)
    }

    /// Release the allocation
    pub fn free(self, bos: &dyn BufferObjectService) {
        bos.free(self.bo.handle);
    }

    /// Backing object
    pub fn handle(&self) -> BoHandle {
        self.bo.handle
    }

    /// Device address of the first byte
    pub fn gpu_addr(&self) -> GpuAddr {
        self.bo.gpu_addr
    }

    /// Allocation size
    pub fn size(&self) -> ByteSize {
        self.bo.size
    }

    /// CPU view of the whole allocation
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `create` checked the mapping; it covers `size` bytes and
        // lives as long as the object, which `self` owns.
        unsafe { core::slice::from_raw_parts(self.bo.cpu_ptr, self.bo.size.as_bytes() as usize) }
    }

    /// Mutable CPU view of the whole allocation
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as in `as_slice`; `&mut self` makes the view unique.
        unsafe {
            core::slice::from_raw_parts_mut(self.bo.cpu_ptr, self.bo.size.as_bytes() as usize)
        }
    }

    /// Read the little-endian dword at index `dword`
    pub fn read_dword(&self, dword: usize) -> Option<u32> {
        let bytes = self.as_slice().get(dword * 4..dword * 4 + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Write the little-endian dword at index `dword`
    pub fn write_dword(&mut self, dword: usize, value: u32) -> Result<()> {
        let bytes = self
            .as_mut_slice()
            .get_mut(dword * 4..dword * 4 + 4)
            .ok_or(Error::SizeExceeded)?;
        bytes.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_test_framework::{BoFault, SimBoService};

    #[test]
    fn test_buffer_is_zeroed_and_page_aligned() {
        let bos = SimBoService::new();
        let mut buffer =
            KernelBuffer::create(&bos, MemoryDomain::GTT, ByteSize::from_bytes(100)).unwrap();
        assert_eq!(buffer.size(), ByteSize::PAGE);
        assert!(buffer.gpu_addr().is_aligned(PAGE_SIZE));
        assert!(buffer.as_slice().iter().all(|b| *b == 0));

        buffer.write_dword(3, 0x1234_5678).unwrap();
        assert_eq!(buffer.read_dword(3), Some(0x1234_5678));
        assert_eq!(bos.read_dword(buffer.handle(), 3), Some(0x1234_5678));
        assert_eq!(buffer.write_dword(1024, 0), Err(Error::SizeExceeded));
        assert_eq!(buffer.read_dword(1024), None);

        buffer.free(&bos);
        assert_eq!(bos.live_kernel_objects(), 0);
    }

    #[test]
    fn test_create_failure_propagates() {
        let bos = SimBoService::new();
        bos.inject(BoFault::Create(MemoryDomain::GTT));
        let err = KernelBuffer::create(&bos, MemoryDomain::GTT, ByteSize::PAGE).unwrap_err();
        assert_eq!(err, Error::OutOfMemory);
        assert_eq!(bos.live_kernel_objects(), 0);
    }

    #[test]
    fn test_reservation_released_on_drop() {
        let bos = SimBoService::new();
        let buffer = KernelBuffer::create(&bos, MemoryDomain::GTT, ByteSize::PAGE).unwrap();
        {
            let guard = ReservationGuard::acquire(&bos, buffer.handle()).unwrap();
            assert_eq!(guard.handle(), buffer.handle());
            assert_eq!(bos.reserved_objects(), 1);
            assert_eq!(
                ReservationGuard::acquire(&bos, buffer.handle()).unwrap_err(),
                Error::Busy
            );
        }
        assert_eq!(bos.reserved_objects(), 0);
        buffer.free(&bos);
    }
}
