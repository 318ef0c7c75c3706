//! Shared test fixture: a GFX11 device on simulated collaborators and one
//! process manager on top of it.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use ember_core::{AsicGeneration, ByteSize, EngineKind, GpuAddr, IpVersion};
use ember_hal::{DoorbellConfig, DoorbellOwner};
use ember_test_framework::{SimBar, SimBoService, SimMqdInit, SimScheduler, SimVm};

use crate::config::UserqConfig;
use crate::device::{DeviceInfo, UserqDevice};
use crate::funcs::UserqContext;
use crate::idr::QueueId;
use crate::manager::UserqManager;
use crate::queue::{QueueFlags, UserqRequest, UsermodeQueue};

pub const PASID: u32 = 7;
pub const MAX_PFN: u64 = 1 << 36;

/// The kernel doorbell page
pub const DEVICE_KERNEL_OBJECTS: usize = 1;

const BAR_PAGES: u64 = 16;
/// First dword after the two-page kernel doorbell range
const PROCESS_DOORBELLS: u32 = 0x800;

pub struct Harness {
    pub bar: Arc<SimBar>,
    pub bos: Arc<SimBoService>,
    pub vm: Arc<SimVm>,
    pub mes: SimScheduler,
    pub mqd: Arc<SimMqdInit>,
    pub device: Arc<UserqDevice>,
    pub manager: UserqManager,
    next_va: AtomicU64,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_gc(IpVersion::new(11, 0, 0), UserqConfig::default())
    }

    pub fn with_gc(gc_version: IpVersion, config: UserqConfig) -> Self {
        let bar = Arc::new(SimBar::new(2, ByteSize::from_pages(BAR_PAGES)));
        let bos = Arc::new(SimBoService::new());
        let vm = Arc::new(SimVm::new(PASID, MAX_PFN));
        let mes = SimScheduler::new();
        let mqd = Arc::new(SimMqdInit::default());

        let info = DeviceInfo {
            generation: AsicGeneration::Gfx11,
            gc_version,
        };
        let mut device = UserqDevice::attach(
            info,
            DoorbellConfig::default(),
            bar.clone(),
            bos.clone(),
            Box::new(mes.clone()),
        )
        .unwrap();
        device
            .doorbells_mut()
            .register_range(
                DoorbellOwner::Process,
                PROCESS_DOORBELLS,
                (BAR_PAGES * 1024) as u32,
            )
            .unwrap();
        device.register_mqd(EngineKind::Gfx, mqd.clone());
        let device = Arc::new(device);

        let manager = UserqManager::new(device.clone(), vm.clone(), config).unwrap();
        Self {
            bar,
            bos,
            vm,
            mes,
            mqd,
            device,
            manager,
            next_va: AtomicU64::new(0x1_0000_0000),
        }
    }

    pub fn context(&self) -> UserqContext<'_> {
        UserqContext {
            device: self.device.as_ref(),
            config: self.manager.config(),
        }
    }

    /// Graphics queue request backed by a fresh doorbell object and a
    /// fresh one-page write pointer object
    pub fn request(&self) -> UserqRequest {
        self.request_in(&self.vm)
    }

    /// [`Harness::request`] with the write pointer mapped into `vm`
    pub fn request_in(&self, vm: &SimVm) -> UserqRequest {
        let (doorbell_handle, _) = self.bos.create_user_bo(ByteSize::PAGE);
        let (_, wptr_bo) = self.bos.create_user_bo(ByteSize::PAGE);
        let va = GpuAddr::new(self.next_va.fetch_add(0x10_0000, Ordering::Relaxed));
        vm.map(wptr_bo, va, ByteSize::PAGE);

        UserqRequest {
            engine: EngineKind::Gfx,
            flags: QueueFlags::empty(),
            queue_va: va + 0x1_0000,
            queue_size: 0x4000,
            wptr_va: va + 8,
            rptr_va: va,
            doorbell_handle,
            doorbell_offset: 0,
            shadow_va: Some(va + 0x2_0000),
        }
    }

    /// Nothing held beyond the device itself
    pub fn assert_clean(&self) {
        assert_eq!(self.bos.live_kernel_objects(), DEVICE_KERNEL_OBJECTS);
        assert_eq!(self.bos.pinned_user_objects(), 0);
        assert_eq!(self.bos.reserved_objects(), 0);
        assert_eq!(self.bos.outstanding_refs(), 0);
        assert_eq!(self.bos.double_frees(), 0);
        assert_eq!(self.mes.registered(), 0);
        assert_eq!(self.manager.live_count(), 0);
    }
}

/// Queue record with nothing bound, on its own address space
pub fn bare_queue(id: QueueId) -> UsermodeQueue {
    let request = UserqRequest {
        engine: EngineKind::Gfx,
        flags: QueueFlags::empty(),
        queue_va: GpuAddr::null(),
        queue_size: 0,
        wptr_va: GpuAddr::null(),
        rptr_va: GpuAddr::null(),
        doorbell_handle: 0,
        doorbell_offset: 0,
        shadow_va: None,
    };
    UsermodeQueue::new(id, &request, Arc::new(SimVm::new(PASID, MAX_PFN)))
}
