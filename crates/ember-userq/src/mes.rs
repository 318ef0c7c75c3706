//! # Firmware Scheduler Binding
//!
//! Registers a queue with the MES firmware scheduler and removes it again.
//! Every request goes through the device-wide scheduler channel guard,
//! taken inside the manager lock.

use ember_core::{Error, MesAddQueueInput, MesRemoveQueueInput, Result, PAGE_SHIFT};

use crate::config::UserqConfig;
use crate::device::UserqDevice;
use crate::queue::UsermodeQueue;

/// Build the firmware registration record of a queue
///
/// Needs the doorbell, write pointer and firmware context already bound.
pub fn add_queue_input(config: &UserqConfig, queue: &UsermodeQueue) -> Result<MesAddQueueInput> {
    let doorbell_offset = queue.doorbell_index().ok_or(Error::InvalidDoorbell)?;
    let wptr_mc_addr = queue.wptr_mc_addr().ok_or(Error::InvalidMapping)?;
    let ctx = queue.fw_ctx.as_ref().ok_or(Error::InvalidParameter)?;
    let queue_size = u32::try_from(queue.props.queue_size >> 2).map_err(|_| {
        log::error!("queue {}: ring of {} bytes too large", queue.id, queue.props.queue_size);
        Error::InvalidParameter
    })?;
    let vm = queue.vm();

    Ok(MesAddQueueInput {
        process_id: vm.pasid(),
        page_table_base_addr: vm.page_table_root(),
        process_va_start: 0,
        process_va_end: vm.max_pfn().saturating_sub(1) << PAGE_SHIFT,
        process_quantum: config.process_quantum,
        process_context_addr: ctx.process,
        gang_quantum: config.gang_quantum,
        gang_context_addr: ctx.gang,
        inprocess_gang_priority: config.priority,
        gang_global_priority_level: config.priority,
        doorbell_offset,
        mqd_addr: queue.props.mqd_gpu_addr,
        wptr_addr: queue.props.wptr_gpu_addr,
        wptr_mc_addr,
        queue_type: queue.engine as u32,
        queue_size,
        paging: false,
    })
}

/// Register `queue` with the firmware scheduler
pub fn map(device: &UserqDevice, config: &UserqConfig, queue: &mut UsermodeQueue) -> Result<()> {
    let input = add_queue_input(config, queue)?;

    if let Err(status) = device.scheduler().add_hw_queue(&input) {
        log::error!("failed to map queue {}: firmware status {}", queue.id, status);
        return Err(Error::HardwareRejected(status));
    }

    log::debug!(
        "queue {} mapped: doorbell 0x{:x} mqd {}",
        queue.id,
        input.doorbell_offset,
        input.mqd_addr
    );
    queue.mapped = true;
    Ok(())
}

/// Remove `queue` from the firmware scheduler
///
/// A firmware failure is logged; the queue counts as unmapped either way.
pub fn unmap(device: &UserqDevice, queue: &mut UsermodeQueue) {
    if !queue.mapped {
        return;
    }

    let input = MesRemoveQueueInput {
        doorbell_offset: queue.doorbell_index().unwrap_or_default(),
        gang_context_addr: queue.fw_ctx.as_ref().map(|ctx| ctx.gang).unwrap_or_default(),
    };
    if let Err(status) = device.scheduler().remove_hw_queue(&input) {
        log::error!("failed to unmap queue {}: firmware status {}", queue.id, status);
    }
    queue.mapped = false;
}
