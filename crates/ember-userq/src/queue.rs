//! # Usermode Queue
//!
//! The kernel-side record of one hardware queue and everything it holds:
//! doorbell pin, write pointer pin, MQD, firmware context and the firmware
//! scheduler registration. Every resource slot is an `Option`, so teardown
//! works from whatever point creation reached.

use alloc::sync::Arc;
use core::fmt;

use ember_core::{EngineKind, GpuAddr, MqdProperties, VmSpace};
use ember_mem::{KernelBuffer, WptrBinding};

use crate::doorbell::QueueDoorbell;
use crate::idr::QueueId;
use crate::mqd::FwContext;

bitflags::bitflags! {
    /// Queue creation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QueueFlags: u64 {
        /// Queue priority field
        const PRIORITY_MASK = 0x3;
        /// Protected (TMZ) queue
        const SECURE = 1 << 2;
    }
}

/// Creation progress of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueueState {
    /// Id reserved; doorbell and write pointer being bound
    IdAllocated,
    /// MQD and firmware context allocated
    DescriptorBuilt,
    /// Registered with the firmware scheduler
    Bound,
    /// Published under its id
    Live,
}

/// Creation request, decoded from the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserqRequest {
    /// Target engine
    pub engine: EngineKind,
    /// Creation flags
    pub flags: QueueFlags,
    /// Ring buffer base (process VA)
    pub queue_va: GpuAddr,
    /// Ring buffer size in bytes
    pub queue_size: u64,
    /// Write pointer (process VA)
    pub wptr_va: GpuAddr,
    /// Read pointer (process VA)
    pub rptr_va: GpuAddr,
    /// User handle of the doorbell object
    pub doorbell_handle: u32,
    /// Doorbell slot inside that object
    pub doorbell_offset: u32,
    /// Shadow context (process VA), if the engine uses one
    pub shadow_va: Option<GpuAddr>,
}

/// Point-in-time view of a live queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueInfo {
    /// Queue id
    pub id: QueueId,
    /// Target engine
    pub engine: EngineKind,
    /// Creation flags
    pub flags: QueueFlags,
    /// Creation progress
    pub state: QueueState,
    /// Absolute doorbell index
    pub doorbell_index: u32,
    /// Write pointer GART address
    pub wptr_mc_addr: GpuAddr,
    /// MQD device address
    pub mqd_gpu_addr: GpuAddr,
    /// Process context region
    pub process_ctx: GpuAddr,
    /// Gang context region
    pub gang_ctx: GpuAddr,
    /// Firmware work area
    pub fw_ctx: GpuAddr,
    /// GDS backup region
    pub gds_ctx: GpuAddr,
    /// Shadow context, if any
    pub shadow_ctx: Option<GpuAddr>,
}

/// One usermode hardware queue
pub struct UsermodeQueue {
    pub(crate) id: QueueId,
    pub(crate) engine: EngineKind,
    pub(crate) flags: QueueFlags,
    pub(crate) state: QueueState,
    pub(crate) props: MqdProperties,
    pub(crate) doorbell: Option<QueueDoorbell>,
    pub(crate) wptr: Option<WptrBinding>,
    pub(crate) mqd: Option<KernelBuffer>,
    pub(crate) fw_ctx: Option<FwContext>,
    pub(crate) shadow_ctx_gpu_addr: Option<GpuAddr>,
    pub(crate) mapped: bool,
    pub(crate) vm: Arc<dyn VmSpace>,
}

impl UsermodeQueue {
    pub(crate) fn new(id: QueueId, request: &UserqRequest, vm: Arc<dyn VmSpace>) -> Self {
        Self {
            id,
            engine: request.engine,
            flags: request.flags,
            state: QueueState::IdAllocated,
            props: MqdProperties {
                hqd_base_gpu_addr: request.queue_va,
                queue_size: request.queue_size,
                rptr_gpu_addr: request.rptr_va,
                wptr_gpu_addr: request.wptr_va,
                ..MqdProperties::default()
            },
            doorbell: None,
            wptr: None,
            mqd: None,
            fw_ctx: None,
            shadow_ctx_gpu_addr: request.shadow_va,
            mapped: false,
            vm,
        }
    }

    /// Queue id
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Target engine
    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    /// Creation progress
    pub fn state(&self) -> QueueState {
        self.state
    }

    /// Properties handed to the MQD initializer
    pub fn props(&self) -> &MqdProperties {
        &self.props
    }

    /// Absolute doorbell index, once resolved
    pub fn doorbell_index(&self) -> Option<u32> {
        self.doorbell.as_ref().map(|db| db.index)
    }

    /// Write pointer GART address, once bound
    pub fn wptr_mc_addr(&self) -> Option<GpuAddr> {
        self.wptr.as_ref().map(|wptr| wptr.mc_addr)
    }

    /// Firmware context regions, once allocated
    pub fn fw_ctx(&self) -> Option<&FwContext> {
        self.fw_ctx.as_ref()
    }

    /// Owning address space
    pub fn vm(&self) -> &dyn VmSpace {
        self.vm.as_ref()
    }

    /// Check if the firmware scheduler knows this queue
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// Snapshot for diagnostics and queries
    pub fn info(&self) -> QueueInfo {
        let ctx = self.fw_ctx.as_ref();
        QueueInfo {
            id: self.id,
            engine: self.engine,
            flags: self.flags,
            state: self.state,
            doorbell_index: self.doorbell_index().unwrap_or(0),
            wptr_mc_addr: self.wptr_mc_addr().unwrap_or_default(),
            mqd_gpu_addr: self.props.mqd_gpu_addr,
            process_ctx: ctx.map(|c| c.process).unwrap_or_default(),
            gang_ctx: ctx.map(|c| c.gang).unwrap_or_default(),
            fw_ctx: ctx.map(|c| c.firmware).unwrap_or_default(),
            gds_ctx: ctx.map(|c| c.gds).unwrap_or_default(),
            shadow_ctx: self.shadow_ctx_gpu_addr,
        }
    }
}

impl fmt::Debug for UsermodeQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsermodeQueue")
            .field("id", &self.id)
            .field("engine", &self.engine)
            .field("state", &self.state)
            .field("doorbell", &self.doorbell)
            .field("wptr", &self.wptr)
            .field("mqd", &self.mqd)
            .field("fw_ctx", &self.fw_ctx)
            .field("mapped", &self.mapped)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(UsermodeQueue: Send, Sync);
static_assertions::assert_impl_all!(QueueInfo: Send, Sync, Copy);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness;

    #[test]
    fn test_new_queue_starts_with_id_only() {
        let queue = harness::bare_queue(QueueId::new(4, 1));
        assert_eq!(queue.state(), QueueState::IdAllocated);
        assert!(queue.doorbell_index().is_none() && queue.wptr_mc_addr().is_none());
        assert!(queue.fw_ctx().is_none() && !queue.is_mapped());

        assert!(QueueState::IdAllocated < QueueState::DescriptorBuilt);
        assert!(QueueState::Bound < QueueState::Live);
    }
}
