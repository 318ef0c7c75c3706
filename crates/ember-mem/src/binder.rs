//! # Address-Space Binder
//!
//! Makes a queue's write pointer reachable by the firmware scheduler.
//!
//! The write pointer lives in a user object mapped into the process VM.
//! The firmware polls it through the GART, so the backing object is pinned
//! into GTT and given a translation entry for as long as the queue lives.
//! The pin belongs to the returned [`WptrBinding`]; the queue manager hands
//! it back to [`unbind_write_pointer`] at destroy.

use ember_core::{
    BoHandle, BufferObjectService, Error, GpuAddr, MemoryDomain, Result, VmSpace, PAGE_SIZE,
};

use crate::bo::ReservationGuard;

/// A write pointer pinned into GTT
#[derive(Debug, PartialEq, Eq)]
pub struct WptrBinding {
    /// Backing user object
    pub bo: BoHandle,
    /// Write pointer (process VA)
    pub va: GpuAddr,
    /// Write pointer (GART address)
    pub mc_addr: GpuAddr,
}

/// Pin the object backing `wptr_va` and resolve its GART address
pub fn bind_write_pointer(
    bos: &dyn BufferObjectService,
    vm: &dyn VmSpace,
    wptr_va: GpuAddr,
) -> Result<WptrBinding> {
    let mapping = vm.lookup_mapping(wptr_va.pfn()).ok_or_else(|| {
        log::error!("wptr {} has no VM mapping", wptr_va);
        Error::InvalidMapping
    })?;

    let size = bos.size(mapping.bo)?;
    if size.as_bytes() > PAGE_SIZE {
        log::error!("wptr object {:?} spans {} (one page max)", mapping.bo, size);
        return Err(Error::SizeExceeded);
    }

    let guard = ReservationGuard::acquire(bos, mapping.bo).map_err(|err| {
        log::error!("failed to reserve wptr object: {}", err);
        err
    })?;
    bos.pin(mapping.bo, MemoryDomain::GTT).map_err(|err| {
        log::error!("failed to pin wptr object: {}", err);
        err
    })?;
    let gart = bos
        .ensure_translation(mapping.bo)
        .and_then(|()| bos.gpu_offset(mapping.bo));
    let gart = match gart {
        Ok(gart) => gart,
        Err(err) => {
            log::error!("failed to map wptr object into GART: {}", err);
            bos.unpin(mapping.bo);
            return Err(err);
        }
    };
    drop(guard);

    let binding = WptrBinding {
        bo: mapping.bo,
        va: wptr_va,
        mc_addr: gart + mapping.offset + (wptr_va - mapping.start),
    };
    log::debug!("wptr {} bound at {}", binding.va, binding.mc_addr);
    Ok(binding)
}

/// Drop the pin taken by [`bind_write_pointer`]
pub fn unbind_write_pointer(bos: &dyn BufferObjectService, binding: WptrBinding) {
    match ReservationGuard::acquire(bos, binding.bo) {
        Ok(_guard) => bos.unpin(binding.bo),
        Err(err) => {
            log::warn!("unpinning wptr object {:?} unreserved: {}", binding.bo, err);
            bos.unpin(binding.bo);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::ByteSize;
    use ember_test_framework::{BoFault, SimBoService, SimVm};

    const WPTR_VA: u64 = 0x7000_1000;

    fn setup(size: ByteSize) -> (SimBoService, SimVm, BoHandle) {
        let bos = SimBoService::new();
        let vm = SimVm::new(7, 1 << 36);
        let (_, bo) = bos.create_user_bo(size);
        vm.map(bo, GpuAddr::new(WPTR_VA), size);
        (bos, vm, bo)
    }

    #[test]
    fn test_bind_records_gart_address_and_pins() {
        let (bos, vm, bo) = setup(ByteSize::PAGE);
        let va = GpuAddr::new(WPTR_VA + 0x40);

        let binding = bind_write_pointer(&bos, &vm, va).unwrap();
        let gart = bos.gpu_offset(bo).unwrap();
        assert_eq!(binding.bo, bo);
        assert_eq!(binding.mc_addr, gart + 0x40);
        assert_eq!(bos.pin_count(bo), 1);
        assert_eq!(bos.reserved_objects(), 0);

        unbind_write_pointer(&bos, binding);
        assert_eq!(bos.pin_count(bo), 0);
        assert_eq!(bos.reserved_objects(), 0);
    }

    #[test]
    fn test_mapping_offset_into_object() {
        let bos = SimBoService::new();
        let vm = SimVm::new(7, 1 << 36);
        let (_, bo) = bos.create_user_bo(ByteSize::PAGE);
        vm.map_at(bo, GpuAddr::new(WPTR_VA), ByteSize::from_bytes(0x800), 0x800);

        let binding = bind_write_pointer(&bos, &vm, GpuAddr::new(WPTR_VA + 0x10)).unwrap();
        let gart = bos.gpu_offset(bo).unwrap();
        assert_eq!(binding.mc_addr, gart + 0x810);
        unbind_write_pointer(&bos, binding);
        assert_eq!(bos.pin_count(bo), 0);
    }

    #[test]
    fn test_unmapped_wptr() {
        let (bos, vm, _) = setup(ByteSize::PAGE);
        let err = bind_write_pointer(&bos, &vm, GpuAddr::new(0x1000)).unwrap_err();
        assert_eq!(err, Error::InvalidMapping);
    }

    #[test]
    fn test_wptr_object_larger_than_page() {
        let (bos, vm, bo) = setup(ByteSize::from_pages(2));
        let err = bind_write_pointer(&bos, &vm, GpuAddr::new(WPTR_VA)).unwrap_err();
        assert_eq!(err, Error::SizeExceeded);
        assert_eq!(bos.pin_count(bo), 0);
    }

    #[test]
    fn test_failures_leave_no_pin_or_reservation() {
        for fault in [
            BoFault::Reserve,
            BoFault::Pin(MemoryDomain::GTT),
            BoFault::Translation,
        ] {
            let (bos, vm, bo) = setup(ByteSize::PAGE);
            bos.inject(fault);
            assert!(bind_write_pointer(&bos, &vm, GpuAddr::new(WPTR_VA)).is_err());
            assert_eq!(bos.pin_count(bo), 0, "{:?}", fault);
            assert_eq!(bos.reserved_objects(), 0, "{:?}", fault);
        }
    }
}
