//! # Usermode Queue Manager
//!
//! Per-process queue table. Create and destroy each run as one sequence
//! under the manager lock:
//!
//! ```text
//! create:  engine check ─► reserve id ─► doorbell ─► wptr ─► mqd_create ─► publish
//!                              │            │          │          │
//!                              └────────────┴──────────┴──────────┴──► release + free id
//!
//! destroy: mqd_destroy ─► unbind wptr ─► unpin doorbell ─► free id
//! ```
//!
//! A failed create leaves nothing behind; destroy never fails.

use alloc::sync::Arc;
use core::fmt;

use ember_core::{Error, Result, VmSpace};
use ember_mem::{bind_write_pointer, unbind_write_pointer};
use spin::Mutex;

use crate::config::UserqConfig;
use crate::device::UserqDevice;
use crate::doorbell;
use crate::funcs::{FuncTable, UserqContext, UserqFuncs};
use crate::idr::{IdArena, QueueId};
use crate::queue::{QueueInfo, QueueState, UserqRequest, UsermodeQueue};
use crate::uapi::{UserqArgs, UserqOp, UserqOut};

// =============================================================================
// USERQ MANAGER
// =============================================================================

/// Usermode queues of one process
pub struct UserqManager {
    device: Arc<UserqDevice>,
    vm: Arc<dyn VmSpace>,
    config: UserqConfig,
    funcs: FuncTable,
    queues: Mutex<IdArena<UsermodeQueue>>,
}

impl UserqManager {
    /// Create a manager for the process owning `vm`
    ///
    /// Engine support is fixed here, from the device's GC version.
    pub fn new(device: Arc<UserqDevice>, vm: Arc<dyn VmSpace>, config: UserqConfig) -> Result<Self> {
        config.validate()?;
        let funcs = FuncTable::for_gc(device.info().gc_version);
        log::debug!("userq manager for pasid {}: engines {:?}", vm.pasid(), funcs);
        Ok(Self {
            device,
            vm,
            config,
            funcs,
            queues: Mutex::new(IdArena::new(1, config.max_queues)),
        })
    }

    /// Manager configuration
    pub fn config(&self) -> &UserqConfig {
        &self.config
    }

    /// Shared device
    pub fn device(&self) -> &Arc<UserqDevice> {
        &self.device
    }

    fn context(&self) -> UserqContext<'_> {
        UserqContext {
            device: self.device.as_ref(),
            config: &self.config,
        }
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Create a queue and register it with the firmware scheduler
    pub fn create_queue(&self, request: &UserqRequest) -> Result<QueueId> {
        let mut queues = self.queues.lock();

        let funcs = self.funcs.get(request.engine).ok_or_else(|| {
            log::error!("usermode queues not supported on {:?}", request.engine);
            Error::UnsupportedEngine
        })?;

        let id = queues.reserve().map_err(|err| {
            log::error!("no free queue id below {}", self.config.max_queues);
            err
        })?;

        let mut queue = UsermodeQueue::new(id, request, self.vm.clone());
        if let Err(err) = self.build(funcs, &mut queue, request) {
            log::error!("failed to create queue {}: {}", id, err);
            self.release(&mut queue);
            queues.release(id);
            return Err(err);
        }

        queue.state = QueueState::Live;
        let doorbell_index = queue.doorbell_index().unwrap_or_default();
        if let Err(mut queue) = queues.publish(id, queue) {
            self.release(&mut queue);
            queues.release(id);
            return Err(Error::InvalidParameter);
        }

        log::debug!(
            "queue {} live on {:?}, doorbell 0x{:x}",
            id,
            request.engine,
            doorbell_index
        );
        Ok(id)
    }

    fn build(
        &self,
        funcs: &dyn UserqFuncs,
        queue: &mut UsermodeQueue,
        request: &UserqRequest,
    ) -> Result<()> {
        let bos = self.device.bos();
        queue.doorbell = Some(doorbell::resolve(
            bos,
            request.doorbell_handle,
            request.doorbell_offset,
        )?);
        queue.wptr = Some(bind_write_pointer(bos, self.vm.as_ref(), request.wptr_va)?);
        funcs.mqd_create(&self.context(), queue)
    }

    /// Release everything `queue` holds, from whatever state it reached
    fn release(&self, queue: &mut UsermodeQueue) {
        let bos = self.device.bos();
        if let Some(funcs) = self.funcs.get(queue.engine) {
            funcs.mqd_destroy(&self.context(), queue);
        }
        if let Some(wptr) = queue.wptr.take() {
            unbind_write_pointer(bos, wptr);
        }
        if let Some(doorbell) = queue.doorbell.take() {
            doorbell::release(bos, doorbell);
        }
    }

    // =========================================================================
    // Destroy
    // =========================================================================

    fn destroy_locked(&self, queues: &mut IdArena<UsermodeQueue>, id: QueueId) -> bool {
        let Some(queue) = queues.get_mut(id) else {
            return false;
        };
        self.release(queue);
        queues.remove(id);
        true
    }

    /// Destroy a queue; unknown or stale ids are ignored
    pub fn destroy_queue(&self, id: QueueId) {
        let mut queues = self.queues.lock();
        if self.destroy_locked(&mut queues, id) {
            log::debug!("queue {} destroyed", id);
        } else {
            log::debug!("destroy of unknown queue {:?}", id);
        }
    }

    /// Destroy the queue currently published under integer id `index`
    pub fn destroy_raw(&self, index: u32) {
        let id = self.queues.lock().resolve(index);
        match id {
            Some(id) => self.destroy_queue(id),
            None => log::debug!("destroy of unknown queue {}", index),
        }
    }

    /// Destroy every live queue
    pub fn teardown(&self) {
        let mut queues = self.queues.lock();
        let ids = queues.ids();
        for id in &ids {
            self.destroy_locked(&mut queues, *id);
        }
        queues.clear();
        if !ids.is_empty() {
            log::debug!("userq teardown: {} queues destroyed", ids.len());
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Snapshot of a live queue
    pub fn query(&self, id: QueueId) -> Option<QueueInfo> {
        self.queues.lock().get(id).map(UsermodeQueue::info)
    }

    /// Number of live queues
    pub fn live_count(&self) -> usize {
        self.queues.lock().len()
    }

    // =========================================================================
    // Transport
    // =========================================================================

    /// Dispatch a create/free request
    pub fn handle_request(&self, args: &mut UserqArgs) -> Result<()> {
        match UserqOp::from_raw(args.input.op) {
            Some(UserqOp::Create) => {
                let request = args.input.mqd.to_request()?;
                let id = self.create_queue(&request)?;
                args.output = UserqOut {
                    queue_id: id.index(),
                    flags: 0,
                };
                Ok(())
            }
            Some(UserqOp::Free) => {
                self.destroy_raw(args.input.queue_id);
                Ok(())
            }
            None => {
                log::error!("invalid userq op {}", args.input.op);
                Err(Error::InvalidParameter)
            }
        }
    }
}

impl fmt::Debug for UserqManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserqManager")
            .field("pasid", &self.vm.pasid())
            .field("config", &self.config)
            .field("funcs", &self.funcs)
            .finish_non_exhaustive()
    }
}

impl Drop for UserqManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

static_assertions::assert_impl_all!(UserqManager: Send, Sync);
static_assertions::assert_impl_all!(UserqDevice: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{Harness, MAX_PFN, PASID};
    use crate::uapi::UserqMqdIn;
    use alloc::vec::Vec;
    use ember_core::{ByteSize, EngineKind, GpuAddr, IpVersion, MemoryDomain, MesStatus};
    use ember_test_framework::{BoFault, MesFault, SimVm};
    use std::thread;

    // =========================================================================
    // Create / Query
    // =========================================================================

    #[test]
    fn test_create_and_query() {
        let h = Harness::new();
        let request = h.request();
        let id = h.manager.create_queue(&request).unwrap();
        assert_eq!(id.index(), 1);

        let info = h.manager.query(id).unwrap();
        assert_eq!(info.state, QueueState::Live);
        assert_eq!(info.engine, EngineKind::Gfx);
        assert_eq!(info.doorbell_index, 0x800);
        assert_eq!(info.wptr_mc_addr, GpuAddr::new(0x8000_0008));
        assert_eq!(info.gang_ctx, info.process_ctx + 0x1000);
        assert_eq!(info.shadow_ctx, request.shadow_va);

        let add = h.mes.queue(0x800).unwrap();
        assert_eq!(add.process_id, PASID);
        assert_eq!(add.mqd_addr, info.mqd_gpu_addr);
        assert_eq!(add.wptr_addr, request.wptr_va);
        assert_eq!(add.wptr_mc_addr, info.wptr_mc_addr);
        assert_eq!(add.gang_context_addr, info.gang_ctx);
        assert_eq!(add.queue_size, 0x1000);
        assert_eq!(h.manager.live_count(), 1);

        h.manager.destroy_queue(id);
        assert!(h.manager.query(id).is_none());
        h.assert_clean();
    }

    #[test]
    fn test_ids_unique_and_independent() {
        let h = Harness::new();
        let ids: Vec<QueueId> = (0..3)
            .map(|_| h.manager.create_queue(&h.request()).unwrap())
            .collect();
        assert_eq!(ids.iter().map(|id| id.index()).collect::<Vec<_>>(), [1, 2, 3]);
        assert_eq!(h.mes.registered(), 3);

        let doorbell_a = h.manager.query(ids[0]).unwrap().doorbell_index;
        h.manager.destroy_queue(ids[1]);
        assert_eq!(h.manager.query(ids[0]).unwrap().doorbell_index, doorbell_a);
        assert!(h.manager.query(ids[2]).is_some());
        assert_eq!(h.mes.registered(), 2);

        // The freed slot is reused under a new generation.
        let reused = h.manager.create_queue(&h.request()).unwrap();
        assert_eq!(reused.index(), ids[1].index());
        assert!(h.manager.query(ids[1]).is_none());
        h.manager.destroy_queue(ids[1]);
        assert_eq!(h.manager.live_count(), 3);
        assert!(h.manager.query(reused).is_some());

        h.manager.teardown();
        h.assert_clean();
    }

    #[test]
    fn test_destroy_unknown_is_noop() {
        let h = Harness::new();
        let id = h.manager.create_queue(&h.request()).unwrap();
        h.manager.destroy_queue(id);
        h.manager.destroy_queue(id);
        h.manager.destroy_raw(42);
        assert_eq!(h.mes.remove_count(), 1);
        h.assert_clean();
    }

    // =========================================================================
    // Rejections
    // =========================================================================

    #[test]
    fn test_unsupported_engine() {
        let h = Harness::new();
        let mut request = h.request();
        request.engine = EngineKind::Compute;
        assert_eq!(h.manager.create_queue(&request), Err(Error::UnsupportedEngine));
        h.assert_clean();

        let h = Harness::with_gc(IpVersion::new(10, 3, 0), UserqConfig::default());
        assert_eq!(
            h.manager.create_queue(&h.request()),
            Err(Error::UnsupportedEngine)
        );
        h.assert_clean();
    }

    #[test]
    fn test_bad_request_fields() {
        let h = Harness::new();

        let mut request = h.request();
        request.doorbell_handle = 0xFFFF;
        assert_eq!(h.manager.create_queue(&request), Err(Error::InvalidDoorbell));
        h.assert_clean();

        let mut request = h.request();
        request.wptr_va = GpuAddr::new(0x7F00_0000_0000);
        assert_eq!(h.manager.create_queue(&request), Err(Error::InvalidMapping));
        h.assert_clean();

        let mut request = h.request();
        let (_, big) = h.bos.create_user_bo(ByteSize::from_pages(2));
        let va = GpuAddr::new(0x7000_0000);
        h.vm.map(big, va, ByteSize::from_pages(2));
        request.wptr_va = va;
        assert_eq!(h.manager.create_queue(&request), Err(Error::SizeExceeded));
        h.assert_clean();

        assert_eq!(h.manager.create_queue(&h.request()).unwrap().index(), 1);
    }

    #[test]
    fn test_doorbell_slot_overflow_rejected() {
        let h = Harness::new();
        for offset in [0x8000_0000, u32::MAX] {
            let mut request = h.request();
            request.doorbell_offset = offset;
            assert_eq!(h.manager.create_queue(&request), Err(Error::InvalidDoorbell));
            h.assert_clean();
        }
    }

    #[test]
    fn test_doorbell_slot_stays_inside_its_object() {
        let h = Harness::new();

        // Slot 0x200 of a one-page object is slot 0 of the next object.
        let mut stray = h.request();
        stray.doorbell_offset = 0x200;
        assert_eq!(h.manager.create_queue(&stray), Err(Error::InvalidDoorbell));
        h.assert_clean();

        let mut last = h.request();
        last.doorbell_offset = 0x1FF;
        let a = h.manager.create_queue(&last).unwrap();
        let b = h.manager.create_queue(&h.request()).unwrap();
        let index_a = h.manager.query(a).unwrap().doorbell_index;
        let index_b = h.manager.query(b).unwrap().doorbell_index;
        assert_eq!(index_a, 0x800 + 0x3FE);
        assert_eq!(index_b, 0xC00);
        assert!(h.mes.queue(index_a).is_some() && h.mes.queue(index_b).is_some());

        h.manager.teardown();
        h.assert_clean();
    }

    #[test]
    fn test_table_full() {
        let config = UserqConfig {
            max_queues: 3,
            ..UserqConfig::default()
        };
        let h = Harness::with_gc(IpVersion::new(11, 0, 0), config);
        h.manager.create_queue(&h.request()).unwrap();
        h.manager.create_queue(&h.request()).unwrap();

        assert_eq!(h.manager.create_queue(&h.request()), Err(Error::OutOfMemory));
        assert_eq!(h.manager.live_count(), 2);
        assert_eq!(h.mes.registered(), 2);
        assert_eq!(h.bos.outstanding_refs(), 2);

        h.manager.teardown();
        h.assert_clean();
    }

    // =========================================================================
    // Unwind
    // =========================================================================

    fn assert_create_unwinds(h: &Harness, expected: Error) {
        assert_eq!(h.manager.create_queue(&h.request()), Err(expected));
        h.assert_clean();
        // The id went back to the table.
        let id = h.manager.create_queue(&h.request()).unwrap();
        assert_eq!(id.index(), 1);
        h.manager.destroy_queue(id);
        h.assert_clean();
    }

    #[test]
    fn test_reservation_failure_at_each_step() {
        // doorbell pin, wptr pin, MQD init, shadow fields
        for skip in 0..4 {
            let h = Harness::new();
            h.bos.inject_after(BoFault::Reserve, skip);
            assert_create_unwinds(&h, Error::Busy);
        }
    }

    #[test]
    fn test_pin_and_translation_failures() {
        let faults = [
            BoFault::Pin(MemoryDomain::DOORBELL),
            BoFault::Pin(MemoryDomain::GTT),
            BoFault::Translation,
        ];
        for fault in faults {
            let h = Harness::new();
            h.bos.inject(fault);
            assert_create_unwinds(&h, Error::OutOfMemory);
        }
    }

    #[test]
    fn test_allocation_failure_at_each_step() {
        // MQD, then context space
        for skip in 0..2 {
            let h = Harness::new();
            h.bos.inject_after(BoFault::Create(MemoryDomain::GTT), skip);
            assert_create_unwinds(&h, Error::OutOfMemory);
        }
    }

    #[test]
    fn test_mqd_init_failure() {
        let h = Harness::new();
        h.mqd.fail_next();
        assert_create_unwinds(&h, Error::InvalidParameter);
    }

    #[test]
    fn test_scheduler_rejects_queue() {
        let h = Harness::new();
        h.mes.inject(MesFault::Add(MesStatus::NoResources));
        assert_create_unwinds(&h, Error::HardwareRejected(MesStatus::NoResources));
    }

    #[test]
    fn test_unmap_failure_does_not_block_destroy() {
        let h = Harness::new();
        let id = h.manager.create_queue(&h.request()).unwrap();
        h.mes.inject(MesFault::Remove(MesStatus::Timeout));

        h.manager.destroy_queue(id);
        assert!(h.manager.query(id).is_none());
        h.assert_clean();
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    #[test]
    fn test_teardown_destroys_every_queue() {
        let h = Harness::new();
        for _ in 0..5 {
            h.manager.create_queue(&h.request()).unwrap();
        }
        assert_eq!(h.mes.registered(), 5);

        h.manager.teardown();
        assert_eq!(h.mes.remove_count(), 5);
        h.assert_clean();

        assert_eq!(h.manager.create_queue(&h.request()).unwrap().index(), 1);
        h.manager.teardown();
    }

    #[test]
    fn test_drop_releases_live_queues() {
        let h = Harness::new();
        let other = UserqManager::new(h.device.clone(), h.vm.clone(), UserqConfig::default()).unwrap();
        let a = h.manager.create_queue(&h.request()).unwrap();
        let b = other.create_queue(&h.request()).unwrap();
        assert_eq!(a.index(), b.index());
        assert_ne!(
            h.manager.query(a).unwrap().doorbell_index,
            other.query(b).unwrap().doorbell_index
        );
        assert_eq!(h.mes.registered(), 2);

        drop(other);
        assert_eq!(h.mes.registered(), 1);
        h.manager.destroy_queue(a);
        h.assert_clean();
    }

    // =========================================================================
    // Doorbells & transport
    // =========================================================================

    #[test]
    fn test_ring_queue_doorbell() {
        let h = Harness::new();
        let id = h.manager.create_queue(&h.request()).unwrap();
        let index = h.manager.query(id).unwrap().doorbell_index;
        assert!(h.device.doorbells().validate(index));

        h.device.ring(index, 0x40);
        assert_eq!(h.bar.peek64(index as usize), 0x40);
        assert_eq!(h.device.doorbells().read64(index), 0x40);
        h.manager.destroy_queue(id);
    }

    #[test]
    fn test_handle_request() {
        let h = Harness::new();
        let mut args = UserqArgs::default();
        args.input.op = UserqOp::Create as u32;
        args.input.mqd = UserqMqdIn::from_request(&h.request());

        h.manager.handle_request(&mut args).unwrap();
        assert_eq!(args.output.queue_id, 1);
        assert_eq!(h.manager.live_count(), 1);

        args.input.op = UserqOp::Free as u32;
        args.input.queue_id = 1;
        h.manager.handle_request(&mut args).unwrap();
        // Freeing twice is harmless.
        h.manager.handle_request(&mut args).unwrap();
        h.assert_clean();

        args.input.op = 9;
        assert_eq!(h.manager.handle_request(&mut args), Err(Error::InvalidParameter));

        args.input.op = UserqOp::Create as u32;
        args.input.mqd.ip_type = 7;
        assert_eq!(h.manager.handle_request(&mut args), Err(Error::UnsupportedEngine));
        h.assert_clean();
    }

    // =========================================================================
    // Concurrency
    // =========================================================================

    const ROUNDS: usize = 25;

    /// Even index in the process range that no queue is given
    const RING_INDEX: u32 = 0x3FF0;

    fn claim(set: &Mutex<Vec<u32>>, value: u32) {
        let mut set = set.lock();
        assert!(!set.contains(&value), "0x{:x} handed out twice", value);
        set.push(value);
    }

    fn churn(
        manager: &UserqManager,
        request: impl Fn() -> UserqRequest,
        ids: &Mutex<Vec<u32>>,
        doorbells: &Mutex<Vec<u32>>,
    ) {
        for _ in 0..ROUNDS {
            let id = manager.create_queue(&request()).unwrap();
            let info = manager.query(id).unwrap();
            assert_eq!(info.state, QueueState::Live);
            claim(ids, id.index());
            claim(doorbells, info.doorbell_index);

            thread::yield_now();

            ids.lock().retain(|&i| i != id.index());
            doorbells.lock().retain(|&d| d != info.doorbell_index);
            manager.destroy_queue(id);
        }
    }

    fn ring_loop(h: &Harness) {
        for wptr in 1..=10_000u64 {
            let value = (wptr << 32) | wptr;
            h.device.ring(RING_INDEX, value);
            assert_eq!(h.device.doorbells().read64(RING_INDEX), value);
        }
    }

    #[test]
    fn test_concurrent_create_destroy() {
        const THREADS: usize = 4;
        let h = Harness::new();
        let (ids, doorbells) = (Mutex::new(Vec::new()), Mutex::new(Vec::new()));

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| churn(&h.manager, || h.request(), &ids, &doorbells));
            }
            s.spawn(|| ring_loop(&h));
        });

        assert!(ids.lock().is_empty() && doorbells.lock().is_empty());
        assert_eq!(h.mes.add_count(), (THREADS * ROUNDS) as u32);
        assert_eq!(h.mes.remove_count(), (THREADS * ROUNDS) as u32);
        h.assert_clean();
    }

    #[test]
    fn test_managers_share_scheduler_channel() {
        let h = Harness::new();
        let vm = Arc::new(SimVm::new(PASID + 1, MAX_PFN));
        let other = UserqManager::new(h.device.clone(), vm.clone(), UserqConfig::default()).unwrap();
        // Ids are per manager, doorbells are device-wide.
        let (mine, theirs) = (Mutex::new(Vec::new()), Mutex::new(Vec::new()));
        let doorbells = Mutex::new(Vec::new());

        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| churn(&h.manager, || h.request(), &mine, &doorbells));
                s.spawn(|| churn(&other, || h.request_in(&vm), &theirs, &doorbells));
            }
            s.spawn(|| ring_loop(&h));
        });

        assert_eq!(h.mes.add_count(), (4 * ROUNDS) as u32);
        assert_eq!(other.live_count(), 0);
        drop(other);
        h.assert_clean();
    }
}
