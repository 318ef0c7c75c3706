//! Simulated buffer-object service.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use ember_core::{
    BoHandle, BufferObjectService, ByteSize, Error, GpuAddr, KernelBo, MemoryDomain, Result,
    PAGE_SIZE,
};
use spin::Mutex;

/// First GART address handed out
const GART_BASE: u64 = 0x0000_8000_0000;

/// One-shot faults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoFault {
    /// Next `create_pinned` in this domain fails with `OutOfMemory`
    Create(MemoryDomain),
    /// Next `reserve` fails with `Busy`
    Reserve,
    /// Next `pin` into this domain fails with `OutOfMemory`
    Pin(MemoryDomain),
    /// Next `ensure_translation` fails with `OutOfMemory`
    Translation,
}

#[derive(Debug)]
struct SimBo {
    size: ByteSize,
    storage: Box<[u64]>,
    kernel: bool,
    pin_count: u32,
    reserved: bool,
    refs: u32,
    doorbell_offset: Option<u64>,
    gart_addr: Option<u64>,
}

#[derive(Debug)]
struct State {
    next_id: u64,
    next_user_handle: u32,
    next_doorbell: u64,
    next_gart: u64,
    objects: BTreeMap<BoHandle, SimBo>,
    user_handles: BTreeMap<u32, BoHandle>,
    faults: Vec<(BoFault, u32)>,
    double_frees: u32,
}

impl State {
    fn take_fault(&mut self, fault: BoFault) -> bool {
        let Some(pos) = self.faults.iter().position(|(f, _)| *f == fault) else {
            return false;
        };
        let skip = &mut self.faults[pos].1;
        if *skip > 0 {
            *skip -= 1;
            return false;
        }
        self.faults.remove(pos);
        true
    }

    fn insert(&mut self, size: ByteSize, kernel: bool) -> BoHandle {
        let handle = BoHandle::new(self.next_id);
        self.next_id += 1;
        let words = (size.as_bytes() / 8).max(1) as usize;
        self.objects.insert(handle, SimBo {
            size,
            storage: vec![0u64; words].into_boxed_slice(),
            kernel,
            pin_count: 0,
            reserved: false,
            refs: 0,
            doorbell_offset: None,
            gart_addr: None,
        });
        handle
    }

    fn place(&mut self, handle: BoHandle, domain: MemoryDomain) {
        let size = match self.objects.get(&handle) {
            Some(bo) => bo.size.as_bytes(),
            None => return,
        };
        let next_doorbell = self.next_doorbell;
        let next_gart = self.next_gart;
        let Some(bo) = self.objects.get_mut(&handle) else {
            return;
        };
        if domain.contains(MemoryDomain::DOORBELL) && bo.doorbell_offset.is_none() {
            bo.doorbell_offset = Some(next_doorbell);
            self.next_doorbell += size;
        } else if domain.contains(MemoryDomain::GTT) && bo.gart_addr.is_none() {
            bo.gart_addr = Some(next_gart);
            self.next_gart += size;
        }
    }
}

/// Software buffer-object service with leak accounting
#[derive(Debug)]
pub struct SimBoService {
    state: Mutex<State>,
}

impl SimBoService {
    /// Create an empty service
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                next_user_handle: 1,
                next_doorbell: 0,
                next_gart: GART_BASE,
                objects: BTreeMap::new(),
                user_handles: BTreeMap::new(),
                faults: Vec::new(),
                double_frees: 0,
            }),
        }
    }

    /// Queue a one-shot fault
    pub fn inject(&self, fault: BoFault) {
        self.inject_after(fault, 0);
    }

    /// Queue a one-shot fault that lets `skip` matching calls through first
    pub fn inject_after(&self, fault: BoFault, skip: u32) {
        self.state.lock().faults.push((fault, skip));
    }

    /// Create an unpinned object owned by "userspace"
    ///
    /// Returns the user-visible handle and the object.
    pub fn create_user_bo(&self, size: ByteSize) -> (u32, BoHandle) {
        let mut state = self.state.lock();
        let bo = state.insert(size.page_align(), false);
        let user = state.next_user_handle;
        state.next_user_handle += 1;
        state.user_handles.insert(user, bo);
        (user, bo)
    }

    /// Kernel objects created and not yet freed
    pub fn live_kernel_objects(&self) -> usize {
        self.state.lock().objects.values().filter(|bo| bo.kernel).count()
    }

    /// User objects that still carry a pin
    pub fn pinned_user_objects(&self) -> usize {
        self.state
            .lock()
            .objects
            .values()
            .filter(|bo| !bo.kernel && bo.pin_count > 0)
            .count()
    }

    /// Objects currently reserved
    pub fn reserved_objects(&self) -> usize {
        self.state.lock().objects.values().filter(|bo| bo.reserved).count()
    }

    /// References taken through `lookup` and not yet dropped
    pub fn outstanding_refs(&self) -> u32 {
        self.state.lock().objects.values().map(|bo| bo.refs).sum()
    }

    /// `free` calls on unknown objects
    pub fn double_frees(&self) -> u32 {
        self.state.lock().double_frees
    }

    /// Pin count of one object (0 if unknown)
    pub fn pin_count(&self, bo: BoHandle) -> u32 {
        self.state.lock().objects.get(&bo).map_or(0, |bo| bo.pin_count)
    }

    /// Read a dword from an object's backing store
    pub fn read_dword(&self, bo: BoHandle, dword: usize) -> Option<u32> {
        let state = self.state.lock();
        let word = state.objects.get(&bo)?.storage.get(dword / 2).copied()?;
        Some(if dword % 2 == 0 { word as u32 } else { (word >> 32) as u32 })
    }

    /// Everything released: no kernel objects, pins, reservations or refs
    pub fn is_quiescent(&self) -> bool {
        self.live_kernel_objects() == 0
            && self.pinned_user_objects() == 0
            && self.reserved_objects() == 0
            && self.outstanding_refs() == 0
    }
}

impl Default for SimBoService {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferObjectService for SimBoService {
    fn create_pinned(
        &self,
        domain: MemoryDomain,
        size: ByteSize,
        alignment: u64,
    ) -> Result<KernelBo> {
        let mut state = self.state.lock();
        if state.take_fault(BoFault::Create(domain)) {
            return Err(Error::OutOfMemory);
        }
        if !alignment.is_power_of_two() || alignment > PAGE_SIZE {
            return Err(Error::MisalignedAddress);
        }
        let size = size.page_align();
        let handle = state.insert(size, true);
        state.place(handle, domain);
        let bo = state.objects.get_mut(&handle).ok_or(Error::NotFound)?;
        bo.pin_count = 1;
        let gpu_addr = bo.doorbell_offset.or(bo.gart_addr).unwrap_or(0);
        Ok(KernelBo {
            handle,
            gpu_addr: GpuAddr::new(gpu_addr),
            cpu_ptr: bo.storage.as_mut_ptr() as *mut u8,
            size,
        })
    }

    fn free(&self, bo: BoHandle) {
        let mut state = self.state.lock();
        if state.objects.remove(&bo).is_none() {
            state.double_frees += 1;
        }
    }

    fn reserve(&self, bo: BoHandle) -> Result<()> {
        let mut state = self.state.lock();
        if state.take_fault(BoFault::Reserve) {
            return Err(Error::Busy);
        }
        let bo = state.objects.get_mut(&bo).ok_or(Error::NotFound)?;
        if bo.reserved {
            return Err(Error::Busy);
        }
        bo.reserved = true;
        Ok(())
    }

    fn unreserve(&self, bo: BoHandle) {
        if let Some(bo) = self.state.lock().objects.get_mut(&bo) {
            bo.reserved = false;
        }
    }

    fn pin(&self, bo: BoHandle, domain: MemoryDomain) -> Result<()> {
        let mut state = self.state.lock();
        if state.take_fault(BoFault::Pin(domain)) {
            return Err(Error::OutOfMemory);
        }
        if !state.objects.contains_key(&bo) {
            return Err(Error::NotFound);
        }
        state.place(bo, domain);
        if let Some(obj) = state.objects.get_mut(&bo) {
            obj.pin_count += 1;
        }
        Ok(())
    }

    fn unpin(&self, bo: BoHandle) {
        if let Some(bo) = self.state.lock().objects.get_mut(&bo) {
            bo.pin_count = bo.pin_count.saturating_sub(1);
        }
    }

    fn ensure_translation(&self, bo: BoHandle) -> Result<()> {
        let mut state = self.state.lock();
        if state.take_fault(BoFault::Translation) {
            return Err(Error::OutOfMemory);
        }
        let obj = state.objects.get(&bo).ok_or(Error::NotFound)?;
        if obj.pin_count == 0 {
            return Err(Error::InvalidParameter);
        }
        state.place(bo, MemoryDomain::GTT);
        Ok(())
    }

    fn gpu_offset(&self, bo: BoHandle) -> Result<GpuAddr> {
        let state = self.state.lock();
        let obj = state.objects.get(&bo).ok_or(Error::NotFound)?;
        obj.doorbell_offset
            .or(obj.gart_addr)
            .map(GpuAddr::new)
            .ok_or(Error::InvalidParameter)
    }

    fn size(&self, bo: BoHandle) -> Result<ByteSize> {
        let state = self.state.lock();
        state.objects.get(&bo).map(|bo| bo.size).ok_or(Error::NotFound)
    }

    fn lookup(&self, user_handle: u32) -> Option<BoHandle> {
        let mut state = self.state.lock();
        let bo = *state.user_handles.get(&user_handle)?;
        state.objects.get_mut(&bo)?.refs += 1;
        Some(bo)
    }

    fn put(&self, bo: BoHandle) {
        if let Some(bo) = self.state.lock().objects.get_mut(&bo) {
            bo.refs = bo.refs.saturating_sub(1);
        }
    }
}
