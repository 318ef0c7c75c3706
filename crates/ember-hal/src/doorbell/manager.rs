//! # Doorbell Manager
//!
//! Device-level owner of the doorbell aperture.
//!
//! ## Lifecycle
//!
//! ```text
//! init ──► create_kernel_doorbells ──► (ring / alloc / free) ──► fini
//!  │              │                                               │
//!  │ map BAR2     │ bitmap, then kernel page                      │ bitmap,
//!  │              │ (bitmap freed if the page fails)              │ kernel page,
//!  │              │                                               │ unmap BAR2
//! ```
//!
//! `fini` tolerates any partial init and runs at most once; `Drop` calls it.

use alloc::sync::Arc;

use ember_core::{AsicGeneration, BarMapper, BufferObjectService, ByteSize, Error, Result};
use spin::Mutex;

use super::aperture::DoorbellAperture;
use super::kernel::{DoorbellBitmap, DoorbellObject};
use super::range::{DoorbellOwner, DoorbellRange};
use crate::config::{DoorbellConfig, PAGING_DOORBELL_DWORDS};

/// Doorbell aperture, kernel doorbell page and slot allocator of one device
pub struct DoorbellManager {
    generation: AsicGeneration,
    config: DoorbellConfig,
    aperture: DoorbellAperture,
    num_kernel_doorbells: u32,
    kernel_page: Option<DoorbellObject>,
    bitmap: Mutex<Option<DoorbellBitmap>>,
    bars: Arc<dyn BarMapper>,
    bos: Arc<dyn BufferObjectService>,
}

impl core::fmt::Debug for DoorbellManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DoorbellManager")
            .field("generation", &self.generation)
            .field("aperture", &self.aperture)
            .field("num_kernel_doorbells", &self.num_kernel_doorbells)
            .field("kernel_page", &self.kernel_page)
            .finish_non_exhaustive()
    }
}

impl DoorbellManager {
    /// Discover and map the doorbell BAR
    ///
    /// Generations before CIK have no aperture; the manager then reports a
    /// zero-sized aperture and rejects every access.
    pub fn init(
        generation: AsicGeneration,
        config: DoorbellConfig,
        bars: Arc<dyn BarMapper>,
        bos: Arc<dyn BufferObjectService>,
    ) -> Result<Self> {
        let mut manager = Self {
            generation,
            config,
            aperture: DoorbellAperture::disabled(),
            num_kernel_doorbells: 0,
            kernel_page: None,
            bitmap: Mutex::new(None),
            bars,
            bos,
        };

        if !generation.has_doorbell() {
            log::debug!("{:?}: no doorbell aperture", generation);
            return Ok(manager);
        }

        let info = manager.bars.bar_info(config.bar_index)?;
        if info.unset {
            log::error!("doorbell BAR{} is not assigned", config.bar_index);
            return Err(Error::InvalidParameter);
        }

        let bar_dwords = info.size.as_dwords().min(u32::MAX as u64) as u32;
        let mut num = bar_dwords.min(config.max_assignment.saturating_add(1));
        if num == 0 {
            return Err(Error::InvalidParameter);
        }
        // The SDMA paging queue rings from the page after the assigned ones.
        if generation.has_paging_doorbell_page() {
            num += PAGING_DOORBELL_DWORDS;
        }

        let region = manager.bars.map_bar(config.bar_index)?;
        log::debug!(
            "doorbell BAR{}: base {:?} size {}, {} kernel doorbells",
            config.bar_index,
            info.base_addr,
            info.size,
            num
        );
        manager.aperture = DoorbellAperture::new(region);
        manager.num_kernel_doorbells = num;
        Ok(manager)
    }

    /// Allocate the kernel slot bitmap and the kernel doorbell page
    ///
    /// Registers the page as the kernel range of the aperture.
    pub fn create_kernel_doorbells(&mut self) -> Result<()> {
        if !self.aperture.is_mapped() || self.num_kernel_doorbells == 0 {
            return Err(Error::InvalidParameter);
        }
        if self.kernel_page.is_some() {
            return Err(Error::Busy);
        }

        let bitmap = DoorbellBitmap::new(self.num_kernel_doorbells as usize).map_err(|err| {
            log::error!("failed to create kernel doorbell bitmap");
            err
        })?;
        *self.bitmap.lock() = Some(bitmap);

        let size = ByteSize::from_bytes(self.num_kernel_doorbells as u64 * 4);
        let page = match self.allocate_kernel_page(size) {
            Ok(page) => page,
            Err(err) => {
                *self.bitmap.lock() = None;
                log::error!("failed to allocate kernel doorbells: {}", err);
                return Err(err);
            }
        };

        let range = DoorbellRange::new(DoorbellOwner::Kernel, page.start(), page.end());
        if let Err(err) = self.aperture.register_range(range) {
            page.free(self.bos.as_ref());
            *self.bitmap.lock() = None;
            return Err(err);
        }
        self.kernel_page = Some(page);
        Ok(())
    }

    /// Allocate a doorbell page range of at least `size` bytes
    pub fn allocate_kernel_page(&self, size: ByteSize) -> Result<DoorbellObject> {
        DoorbellObject::allocate(self.bos.as_ref(), size)
    }

    /// Release a page range from [`allocate_kernel_page`](Self::allocate_kernel_page)
    pub fn free_kernel_page(&self, page: DoorbellObject) {
        page.free(self.bos.as_ref());
    }

    /// Register the range another subsystem (MES, KFD) rings from
    pub fn register_range(&mut self, owner: DoorbellOwner, start: u32, end: u32) -> Result<()> {
        self.aperture.register_range(DoorbellRange::new(owner, start, end))
    }

    /// Claim the lowest free kernel doorbell; returns its absolute index
    pub fn alloc_kernel_doorbell(&self) -> Option<u32> {
        let start = self.kernel_page.as_ref()?.start();
        let slot = self.bitmap.lock().as_mut()?.alloc()?;
        Some(start + slot as u32)
    }

    /// Return a kernel doorbell claimed with
    /// [`alloc_kernel_doorbell`](Self::alloc_kernel_doorbell)
    pub fn free_kernel_doorbell(&self, index: u32) {
        let Some(start) = self.kernel_page.as_ref().map(DoorbellObject::start) else {
            log::error!("freeing kernel doorbell 0x{:x} without kernel page", index);
            return;
        };
        let mut bitmap = self.bitmap.lock();
        let freed = match (bitmap.as_mut(), index.checked_sub(start)) {
            (Some(bitmap), Some(slot)) => bitmap.free(slot as usize),
            _ => false,
        };
        if !freed {
            log::error!("kernel doorbell 0x{:x} was not allocated", index);
        }
    }

    /// Check if a kernel doorbell is currently claimed
    pub fn kernel_doorbell_allocated(&self, index: u32) -> bool {
        let Some(start) = self.kernel_page.as_ref().map(DoorbellObject::start) else {
            return false;
        };
        match (self.bitmap.lock().as_ref(), index.checked_sub(start)) {
            (Some(bitmap), Some(slot)) => bitmap.test(slot as usize),
            _ => false,
        }
    }

    /// Release the bitmap, the kernel page and the BAR mapping
    pub fn fini(&mut self) {
        if self.bitmap.lock().take().is_some() {
            log::debug!("kernel doorbell bitmap released");
        }
        if let Some(page) = self.kernel_page.take() {
            page.free(self.bos.as_ref());
        }
        if let Some(region) = self.aperture.take_region() {
            log::debug!("unmapping doorbell BAR{}", region.index);
            self.bars.unmap_bar(region);
        }
        self.num_kernel_doorbells = 0;
    }

    // =========================================================================
    // Access
    // =========================================================================

    /// Check if `index` falls in exactly one registered range
    pub fn validate(&self, index: u32) -> bool {
        self.aperture.validate(index)
    }

    /// Read a 32-bit doorbell
    pub fn read32(&self, index: u32) -> u32 {
        self.aperture.read32(index)
    }

    /// Write a 32-bit doorbell
    pub fn write32(&self, index: u32, value: u32) {
        self.aperture.write32(index, value)
    }

    /// Read a 64-bit doorbell
    pub fn read64(&self, index: u32) -> u64 {
        self.aperture.read64(index)
    }

    /// Write a 64-bit doorbell
    pub fn write64(&self, index: u32, value: u64) {
        self.aperture.write64(index, value)
    }

    /// Gate hardware access during reset or unplug
    pub fn set_skip_hw_access(&self, skip: bool) {
        self.aperture.set_skip_hw_access(skip)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Underlying aperture
    pub fn aperture(&self) -> &DoorbellAperture {
        &self.aperture
    }

    /// Number of kernel doorbells (0 when disabled)
    pub fn num_kernel_doorbells(&self) -> u32 {
        self.num_kernel_doorbells
    }

    /// Kernel doorbell page, once created
    pub fn kernel_page(&self) -> Option<&DoorbellObject> {
        self.kernel_page.as_ref()
    }

    /// Configuration this manager was created with
    pub fn config(&self) -> &DoorbellConfig {
        &self.config
    }

    /// Check if the device has a usable aperture
    pub fn is_enabled(&self) -> bool {
        self.aperture.is_mapped()
    }
}

impl Drop for DoorbellManager {
    fn drop(&mut self) {
        self.fini();
    }
}
