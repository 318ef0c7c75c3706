//! Queue doorbell resolution.
//!
//! A queue rings a slot inside a doorbell object owned by the process. The
//! object is looked up by its user handle (taking a reference), pinned in
//! the DOORBELL domain for the queue's lifetime, and the slot converted to
//! an absolute aperture index.

use ember_core::{BoHandle, BufferObjectService, Error, MemoryDomain, Result};
use ember_hal::index_in_bar;
use ember_mem::ReservationGuard;

/// A pinned doorbell object and the queue's slot in it
#[derive(Debug, PartialEq, Eq)]
pub struct QueueDoorbell {
    /// Doorbell object
    pub bo: BoHandle,
    /// Absolute aperture index
    pub index: u32,
}

fn pin_doorbell(bos: &dyn BufferObjectService, bo: BoHandle) -> Result<()> {
    let _guard = ReservationGuard::acquire(bos, bo)?;
    bos.pin(bo, MemoryDomain::DOORBELL)
}

fn unpin_doorbell(bos: &dyn BufferObjectService, bo: BoHandle) {
    match ReservationGuard::acquire(bos, bo) {
        Ok(_guard) => bos.unpin(bo),
        Err(err) => {
            log::warn!("unpinning doorbell object {:?} unreserved: {}", bo, err);
            bos.unpin(bo);
        }
    }
}

/// Bytes of one doorbell slot
const DOORBELL_SLOT_BYTES: u64 = 8;

fn check_slot(bos: &dyn BufferObjectService, bo: BoHandle, relative: u32) -> Result<()> {
    let size = bos.size(bo)?;
    if (u64::from(relative) + 1) * DOORBELL_SLOT_BYTES > size.as_bytes() {
        log::error!("doorbell slot {} lies outside {:?} ({})", relative, bo, size);
        return Err(Error::InvalidDoorbell);
    }
    Ok(())
}

/// Resolve slot `relative` of the doorbell object behind `handle`
///
/// The slot must lie inside the object.
pub fn resolve(bos: &dyn BufferObjectService, handle: u32, relative: u32) -> Result<QueueDoorbell> {
    let bo = bos.lookup(handle).ok_or_else(|| {
        log::error!("doorbell handle {} does not resolve", handle);
        Error::InvalidDoorbell
    })?;

    if let Err(err) = check_slot(bos, bo, relative) {
        bos.put(bo);
        return Err(err);
    }

    if let Err(err) = pin_doorbell(bos, bo) {
        log::error!("failed to pin doorbell object {:?}: {}", bo, err);
        bos.put(bo);
        return Err(err);
    }

    match index_in_bar(bos, bo, relative) {
        Ok(index) => {
            log::debug!("doorbell {:?}[{}] -> index 0x{:x}", bo, relative, index);
            Ok(QueueDoorbell { bo, index })
        }
        Err(err) => {
            unpin_doorbell(bos, bo);
            bos.put(bo);
            Err(err)
        }
    }
}

/// Unpin the doorbell object and drop the lookup reference
pub fn release(bos: &dyn BufferObjectService, doorbell: QueueDoorbell) {
    unpin_doorbell(bos, doorbell.bo);
    bos.put(doorbell.bo);
}
