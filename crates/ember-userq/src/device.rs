//! # Usermode Queue Device
//!
//! Per-device state shared by every process' queue manager: the doorbell
//! aperture, the engine MQD layouts and the firmware scheduler channel.
//!
//! The device is fully set up (`attach`, `register_mqd`, doorbell ranges)
//! before it is shared; afterwards only the scheduler channel mutates, and
//! it sits behind its own guard.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;

use ember_core::{
    AsicGeneration, BarMapper, BufferObjectService, EngineKind, HwScheduler, IpVersion,
    MqdInitializer, Result,
};
use ember_hal::{DoorbellConfig, DoorbellManager};
use spin::{Mutex, MutexGuard};

/// Identification of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// ASIC generation
    pub generation: AsicGeneration,
    /// Graphics core IP version
    pub gc_version: IpVersion,
}

/// Device-wide usermode queue resources
pub struct UserqDevice {
    info: DeviceInfo,
    doorbells: DoorbellManager,
    bos: Arc<dyn BufferObjectService>,
    scheduler: Mutex<Box<dyn HwScheduler>>,
    mqds: [Option<Arc<dyn MqdInitializer>>; EngineKind::COUNT],
}

impl UserqDevice {
    /// Bring up the doorbell aperture and take the scheduler channel
    ///
    /// Kernel doorbells are created when the generation has an aperture.
    pub fn attach(
        info: DeviceInfo,
        doorbell_config: DoorbellConfig,
        bars: Arc<dyn BarMapper>,
        bos: Arc<dyn BufferObjectService>,
        scheduler: Box<dyn HwScheduler>,
    ) -> Result<Self> {
        let mut doorbells =
            DoorbellManager::init(info.generation, doorbell_config, bars, bos.clone())?;
        if doorbells.is_enabled() {
            doorbells.create_kernel_doorbells()?;
        }

        log::debug!(
            "userq device attached: {:?} GC {}, {} kernel doorbells",
            info.generation,
            info.gc_version,
            doorbells.num_kernel_doorbells()
        );
        Ok(Self {
            info,
            doorbells,
            bos,
            scheduler: Mutex::new(scheduler),
            mqds: Default::default(),
        })
    }

    /// Install the MQD layout of `engine`
    pub fn register_mqd(&mut self, engine: EngineKind, init: Arc<dyn MqdInitializer>) {
        self.mqds[engine.index()] = Some(init);
    }

    /// MQD layout of `engine`
    pub fn mqd_initializer(&self, engine: EngineKind) -> Option<&dyn MqdInitializer> {
        self.mqds[engine.index()].as_deref()
    }

    /// Device identification
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Buffer object service
    pub fn bos(&self) -> &dyn BufferObjectService {
        self.bos.as_ref()
    }

    /// Doorbell aperture
    pub fn doorbells(&self) -> &DoorbellManager {
        &self.doorbells
    }

    /// Doorbell aperture, for range setup before the device is shared
    pub fn doorbells_mut(&mut self) -> &mut DoorbellManager {
        &mut self.doorbells
    }

    /// Take the firmware scheduler channel
    pub fn scheduler(&self) -> MutexGuard<'_, Box<dyn HwScheduler>> {
        self.scheduler.lock()
    }

    /// Publish a new write pointer through a queue doorbell
    ///
    /// Vega and later take 64-bit doorbells.
    pub fn ring(&self, index: u32, wptr: u64) {
        log::trace!("ring doorbell 0x{:x} wptr 0x{:x}", index, wptr);
        if self.info.generation >= AsicGeneration::Vega {
            self.doorbells.write64(index, wptr);
        } else {
            self.doorbells.write32(index, wptr as u32);
        }
    }
}

impl fmt::Debug for UserqDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserqDevice")
            .field("info", &self.info)
            .field("doorbells", &self.doorbells)
            .finish_non_exhaustive()
    }
}

impl Drop for UserqDevice {
    fn drop(&mut self) {
        log::debug!("detaching userq device {:?}", self.info.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::{ByteSize, Error};
    use ember_hal::DoorbellOwner;
    use ember_test_framework::{SimBar, SimBoService, SimMqdInit, SimScheduler};

    fn attach(generation: AsicGeneration, bar: Arc<SimBar>) -> Result<UserqDevice> {
        let info = DeviceInfo {
            generation,
            gc_version: IpVersion::new(11, 0, 0),
        };
        UserqDevice::attach(
            info,
            DoorbellConfig::default(),
            bar,
            Arc::new(SimBoService::new()),
            Box::new(SimScheduler::new()),
        )
    }

    #[test]
    fn test_attach_creates_kernel_doorbells() {
        let bar = Arc::new(SimBar::new(2, ByteSize::from_pages(4)));
        let device = attach(AsicGeneration::Gfx11, bar.clone()).unwrap();
        assert!(device.doorbells().kernel_page().is_some());
        assert_eq!(device.doorbells().num_kernel_doorbells(), 0x590);

        drop(device);
        assert_eq!(bar.unmap_count(), 1);
    }

    #[test]
    fn test_attach_without_aperture() {
        let bar = Arc::new(SimBar::new(2, ByteSize::from_pages(4)));
        let device = attach(AsicGeneration::Si, bar.clone()).unwrap();
        assert!(!device.doorbells().is_enabled());
        assert_eq!(bar.map_count(), 0);
    }

    #[test]
    fn test_attach_unassigned_bar() {
        let bar = Arc::new(SimBar::unassigned(2, ByteSize::from_pages(4)));
        assert_eq!(
            attach(AsicGeneration::Gfx11, bar).map(|_| ()),
            Err(Error::InvalidParameter)
        );
    }

    #[test]
    fn test_register_mqd() {
        let bar = Arc::new(SimBar::new(2, ByteSize::from_pages(4)));
        let mut device = attach(AsicGeneration::Gfx11, bar).unwrap();
        assert!(device.mqd_initializer(EngineKind::Gfx).is_none());

        device.register_mqd(EngineKind::Gfx, Arc::new(SimMqdInit::new(1024)));
        assert_eq!(device.mqd_initializer(EngineKind::Gfx).map(|m| m.mqd_size()), Some(1024));
        assert!(device.mqd_initializer(EngineKind::Compute).is_none());
    }

    #[test]
    fn test_ring_width_follows_generation() {
        let bar = Arc::new(SimBar::new(2, ByteSize::from_pages(4)));
        let mut device = attach(AsicGeneration::Gfx11, bar.clone()).unwrap();
        device
            .doorbells_mut()
            .register_range(DoorbellOwner::Process, 0x800, 0x1000)
            .unwrap();

        device.ring(0x810, 0x1_0000_0040);
        assert_eq!(bar.peek64(0x810), 0x1_0000_0040);

        let bar = Arc::new(SimBar::new(2, ByteSize::from_pages(4)));
        let mut device = attach(AsicGeneration::Vi, bar.clone()).unwrap();
        device
            .doorbells_mut()
            .register_range(DoorbellOwner::Process, 0x800, 0x1000)
            .unwrap();

        device.ring(0x811, 0x1_0000_0040);
        assert_eq!(bar.peek32(0x811), 0x40);
        assert_eq!(bar.peek32(0x810), 0);
    }
}
