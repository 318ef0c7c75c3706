//! Simulated process address space.

use alloc::vec::Vec;

use ember_core::{BoHandle, ByteSize, GpuAddr, VaMapping, VmSpace};
use spin::Mutex;

/// Address space with an explicit mapping list
#[derive(Debug)]
pub struct SimVm {
    pasid: u32,
    max_pfn: u64,
    root: GpuAddr,
    mappings: Mutex<Vec<VaMapping>>,
}

impl SimVm {
    /// Create an empty address space
    pub fn new(pasid: u32, max_pfn: u64) -> Self {
        Self {
            pasid,
            max_pfn,
            root: GpuAddr::new(0x00F0_0000_0000 | ((pasid as u64) << 12)),
            mappings: Mutex::new(Vec::new()),
        }
    }

    /// Map `bo` at `start` for `size` bytes
    pub fn map(&self, bo: BoHandle, start: GpuAddr, size: ByteSize) {
        self.map_at(bo, start, size, 0);
    }

    /// Map `size` bytes of `bo` from byte `offset` at `start`
    pub fn map_at(&self, bo: BoHandle, start: GpuAddr, size: ByteSize, offset: u64) {
        self.mappings.lock().push(VaMapping {
            bo,
            start,
            size,
            offset,
        });
    }

    /// Remove every mapping of `bo`
    pub fn unmap(&self, bo: BoHandle) {
        self.mappings.lock().retain(|m| m.bo != bo);
    }
}

impl VmSpace for SimVm {
    fn lookup_mapping(&self, va_pfn: u64) -> Option<VaMapping> {
        let va = GpuAddr::new(va_pfn << 12);
        self.mappings.lock().iter().copied().find(|m| m.contains(va))
    }

    fn page_table_root(&self) -> GpuAddr {
        self.root
    }

    fn pasid(&self) -> u32 {
        self.pasid
    }

    fn max_pfn(&self) -> u64 {
        self.max_pfn
    }
}
