//! # Queue Descriptor Builder
//!
//! MQD and firmware context allocation for a queue.
//!
//! ## Firmware Context Layout
//!
//! ```text
//! base ──► ┌──────────────┐ +0
//!          │   process    │
//!          ├──────────────┤ +PAGE
//!          │     gang     │
//!          ├──────────────┤ +2 PAGE
//!          │  fw work     │
//!          ├──────────────┤ +3 PAGE
//!          │  GDS backup  │
//!          └──────────────┘ +4 PAGE
//! ```
//!
//! Order and sizes are fixed by the firmware.

use ember_core::{
    lower_32_bits, upper_32_bits, BufferObjectService, ByteSize, Error, GpuAddr, MemoryDomain,
    MqdInitializer, Result, PAGE_SIZE,
};
use ember_mem::{KernelBuffer, ReservationGuard};

use crate::queue::UsermodeQueue;

/// Process context offset
pub const PROC_CTX_OFFSET: u64 = 0;
/// Gang context offset
pub const GANG_CTX_OFFSET: u64 = PROC_CTX_OFFSET + PAGE_SIZE;
/// Firmware work area offset
pub const FW_CTX_OFFSET: u64 = GANG_CTX_OFFSET + PAGE_SIZE;
/// GDS backup offset
pub const GDS_CTX_OFFSET: u64 = FW_CTX_OFFSET + PAGE_SIZE;
/// Whole context block
pub const FW_CTX_SIZE: ByteSize = ByteSize::from_bytes(GDS_CTX_OFFSET + PAGE_SIZE);

/// Firmware context block of one queue
#[derive(Debug)]
pub struct FwContext {
    buffer: KernelBuffer,
    /// Process context region
    pub process: GpuAddr,
    /// Gang context region
    pub gang: GpuAddr,
    /// Firmware work area
    pub firmware: GpuAddr,
    /// GDS backup region
    pub gds: GpuAddr,
}

impl FwContext {
    /// Base of the block
    pub fn base(&self) -> GpuAddr {
        self.buffer.gpu_addr()
    }
}

/// Dword positions of the shadow address fields in an engine's MQD
///
/// Each field is a lo/hi pair; hi follows lo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MqdShadowLayout {
    /// Shadow context base, low dword
    pub shadow_base_lo: usize,
    /// GDS backup base, low dword
    pub gds_bkup_base_lo: usize,
    /// Firmware work area base, low dword
    pub fw_work_area_base_lo: usize,
}

#[inline]
fn split_addr(addr: GpuAddr) -> (u32, u32) {
    (lower_32_bits(addr.raw()) & 0xFFFF_FFFC, upper_32_bits(addr.raw()))
}

/// Allocate the MQD and let the engine initializer fill it
pub fn create_mqd(
    bos: &dyn BufferObjectService,
    init: &dyn MqdInitializer,
    queue: &mut UsermodeQueue,
) -> Result<()> {
    let doorbell_index = queue.doorbell_index().ok_or(Error::InvalidDoorbell)?;
    let size = init.mqd_size();

    let mut mqd = KernelBuffer::create(bos, MemoryDomain::GTT, ByteSize::from_bytes(size as u64))
        .map_err(|err| {
            log::error!("failed to allocate MQD for queue {}: {}", queue.id, err);
            err
        })?;

    queue.props.use_doorbell = true;
    queue.props.doorbell_index = doorbell_index;
    queue.props.mqd_gpu_addr = mqd.gpu_addr();

    let result = match ReservationGuard::acquire(bos, mqd.handle()) {
        Ok(_guard) => init.init_mqd(&mut mqd.as_mut_slice()[..size], &queue.props),
        Err(err) => {
            log::error!("failed to reserve MQD for queue {}: {}", queue.id, err);
            Err(err)
        }
    };
    if let Err(err) = result {
        log::error!("failed to init MQD for queue {}: {}", queue.id, err);
        mqd.free(bos);
        queue.props.mqd_gpu_addr = GpuAddr::null();
        return Err(err);
    }

    queue.mqd = Some(mqd);
    Ok(())
}

/// Allocate the four-region firmware context block
pub fn create_context_space(bos: &dyn BufferObjectService, queue: &mut UsermodeQueue) -> Result<()> {
    let buffer = KernelBuffer::create(bos, MemoryDomain::GTT, FW_CTX_SIZE).map_err(|err| {
        log::error!("failed to allocate context space for queue {}: {}", queue.id, err);
        err
    })?;
    let base = buffer.gpu_addr();
    queue.fw_ctx = Some(FwContext {
        buffer,
        process: base + PROC_CTX_OFFSET,
        gang: base + GANG_CTX_OFFSET,
        firmware: base + FW_CTX_OFFSET,
        gds: base + GDS_CTX_OFFSET,
    });
    Ok(())
}

/// Write shadow, GDS backup and firmware work area addresses into the MQD
pub fn bind_shadow_fields(
    bos: &dyn BufferObjectService,
    queue: &mut UsermodeQueue,
    layout: &MqdShadowLayout,
) -> Result<()> {
    let ctx = queue.fw_ctx.as_ref().ok_or(Error::InvalidParameter)?;
    let fields = [
        (layout.shadow_base_lo, queue.shadow_ctx_gpu_addr.unwrap_or_default()),
        (layout.gds_bkup_base_lo, ctx.gds),
        (layout.fw_work_area_base_lo, ctx.firmware),
    ];
    let mqd = queue.mqd.as_mut().ok_or(Error::InvalidParameter)?;

    let _guard = ReservationGuard::acquire(bos, mqd.handle()).map_err(|err| {
        log::error!("failed to reserve MQD for shadow fields: {}", err);
        err
    })?;
    for (lo_dword, addr) in fields {
        let (lo, hi) = split_addr(addr);
        mqd.write_dword(lo_dword, lo)?;
        mqd.write_dword(lo_dword + 1, hi)?;
    }
    Ok(())
}

/// Release the firmware context block, if allocated
pub fn destroy_context_space(bos: &dyn BufferObjectService, queue: &mut UsermodeQueue) {
    if let Some(ctx) = queue.fw_ctx.take() {
        ctx.buffer.free(bos);
    }
}

/// Release the MQD, if allocated
pub fn destroy_mqd(bos: &dyn BufferObjectService, queue: &mut UsermodeQueue) {
    if let Some(mqd) = queue.mqd.take() {
        mqd.free(bos);
    }
    queue.props.mqd_gpu_addr = GpuAddr::null();
}
