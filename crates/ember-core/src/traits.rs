//! # EMBER Collaborator Traits
//!
//! Narrow interfaces to the rest of the driver. The queue manager only ever
//! reaches memory, page tables, descriptor layouts and the firmware
//! scheduler through these.
//!
//! ## Trait Map
//!
//! ```text
//! UserqManager
//!    │
//!    ├── BufferObjectService   (create / pin / reserve / GART)
//!    ├── VmSpace               (wptr mapping lookup, PD root)
//!    ├── MqdInitializer        (one per engine variant)
//!    └── HwScheduler           (MES add / remove queue)
//!
//! DoorbellManager
//!    ├── BarMapper             (ioremap of the doorbell BAR)
//!    └── BufferObjectService   (kernel doorbell page)
//! ```

use crate::bar::{BarInfo, BarRegion};
use crate::error::{MesStatus, Result};
use crate::types::*;

// =============================================================================
// BUFFER OBJECT SERVICE
// =============================================================================

/// A pinned, CPU-mapped kernel buffer object
#[derive(Debug)]
pub struct KernelBo {
    /// Backing object
    pub handle: BoHandle,
    /// Device address of the first byte
    pub gpu_addr: GpuAddr,
    /// Kernel CPU mapping of the first byte
    pub cpu_ptr: *mut u8,
    /// Allocation size
    pub size: ByteSize,
}

// SAFETY: the mapping belongs to the object, not to the creating thread; all
// CPU access goes through the owner while it holds the object reservation.
unsafe impl Send for KernelBo {}
// SAFETY: see above, shared references never write through `cpu_ptr`.
unsafe impl Sync for KernelBo {}

/// Buffer object allocation, placement and reservation
pub trait BufferObjectService: Send + Sync {
    /// Create a pinned, CPU-mapped object in `domain`
    fn create_pinned(&self, domain: MemoryDomain, size: ByteSize, alignment: u64)
        -> Result<KernelBo>;

    /// Release an object created with [`create_pinned`](Self::create_pinned)
    fn free(&self, bo: BoHandle);

    /// Take exclusive reservation of an object
    fn reserve(&self, bo: BoHandle) -> Result<()>;

    /// Drop the reservation taken by [`reserve`](Self::reserve)
    fn unreserve(&self, bo: BoHandle);

    /// Pin an object into `domain`; caller holds the reservation
    fn pin(&self, bo: BoHandle, domain: MemoryDomain) -> Result<()>;

    /// Drop one pin; caller holds the reservation
    fn unpin(&self, bo: BoHandle);

    /// Make sure a pinned GTT object has a GART translation entry
    fn ensure_translation(&self, bo: BoHandle) -> Result<()>;

    /// Offset of the object inside its current domain
    ///
    /// Doorbell objects report their byte offset in the doorbell BAR, GTT
    /// objects their GART address.
    fn gpu_offset(&self, bo: BoHandle) -> Result<GpuAddr>;

    /// Size of an object
    fn size(&self, bo: BoHandle) -> Result<ByteSize>;

    /// Resolve a user-visible object handle, taking a reference
    fn lookup(&self, user_handle: u32) -> Option<BoHandle>;

    /// Drop the reference taken by [`lookup`](Self::lookup)
    fn put(&self, bo: BoHandle);
}

// =============================================================================
// VIRTUAL ADDRESS SPACE
// =============================================================================

/// One mapping of a buffer object into a process VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaMapping {
    /// Mapped object
    pub bo: BoHandle,
    /// First mapped virtual address
    pub start: GpuAddr,
    /// Mapped size
    pub size: ByteSize,
    /// Byte offset into the object at `start`
    pub offset: u64,
}

impl VaMapping {
    /// Check if `va` lies inside the mapping
    pub fn contains(&self, va: GpuAddr) -> bool {
        va >= self.start && va - self.start < self.size.as_bytes()
    }
}

/// GPU virtual address space of one process
pub trait VmSpace: Send + Sync {
    /// Mapping covering virtual page `va_pfn`
    fn lookup_mapping(&self, va_pfn: u64) -> Option<VaMapping>;

    /// Device address of the root page directory
    fn page_table_root(&self) -> GpuAddr;

    /// Process address space identifier
    fn pasid(&self) -> u32;

    /// Number of addressable pages
    fn max_pfn(&self) -> u64;
}

// =============================================================================
// MQD INITIALIZER
// =============================================================================

/// Properties an engine initializer writes into a memory queue descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MqdProperties {
    /// Device address of the descriptor itself
    pub mqd_gpu_addr: GpuAddr,
    /// Ring buffer base (process VA)
    pub hqd_base_gpu_addr: GpuAddr,
    /// Ring buffer size in bytes
    pub queue_size: u64,
    /// Read pointer location (process VA)
    pub rptr_gpu_addr: GpuAddr,
    /// Write pointer location (process VA)
    pub wptr_gpu_addr: GpuAddr,
    /// Queue is notified through a doorbell
    pub use_doorbell: bool,
    /// Absolute doorbell index in the aperture
    pub doorbell_index: u32,
}

/// Engine-specific memory queue descriptor layout
pub trait MqdInitializer: Send + Sync {
    /// Descriptor size in bytes
    fn mqd_size(&self) -> usize;

    /// Populate the hardware-defined descriptor fields
    fn init_mqd(&self, mqd: &mut [u8], props: &MqdProperties) -> Result<()>;
}

// =============================================================================
// HARDWARE SCHEDULER (MES)
// =============================================================================

/// Firmware scheduler priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u32)]
pub enum MesPriority {
    /// Background work
    Low      = 0,
    /// Default level
    #[default]
    Normal   = 1,
    /// Elevated
    Medium   = 2,
    /// Interactive
    High     = 3,
    /// Realtime
    Realtime = 4,
}

/// Registration record for a new hardware queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MesAddQueueInput {
    /// Owning process address space id
    pub process_id: u32,
    /// Root page directory of the owning VM
    pub page_table_base_addr: GpuAddr,
    /// First valid process VA
    pub process_va_start: u64,
    /// Last valid process VA
    pub process_va_end: u64,
    /// Process time slice (100 ns units)
    pub process_quantum: u64,
    /// Process context region
    pub process_context_addr: GpuAddr,
    /// Gang time slice (100 ns units)
    pub gang_quantum: u64,
    /// Gang context region
    pub gang_context_addr: GpuAddr,
    /// Priority among the process' gangs
    pub inprocess_gang_priority: MesPriority,
    /// Device-wide gang priority
    pub gang_global_priority_level: MesPriority,
    /// Absolute doorbell index
    pub doorbell_offset: u32,
    /// Memory queue descriptor
    pub mqd_addr: GpuAddr,
    /// Write pointer (process VA)
    pub wptr_addr: GpuAddr,
    /// Write pointer (GART address)
    pub wptr_mc_addr: GpuAddr,
    /// Hardware IP type
    pub queue_type: u32,
    /// Ring size in dwords
    pub queue_size: u32,
    /// Paging queue
    pub paging: bool,
}

/// Removal record for a hardware queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MesRemoveQueueInput {
    /// Absolute doorbell index
    pub doorbell_offset: u32,
    /// Gang context region
    pub gang_context_addr: GpuAddr,
}

/// Firmware scheduler channel
///
/// `&mut self` because every call must happen under the device-wide channel
/// guard.
pub trait HwScheduler: Send {
    /// Register a hardware queue
    fn add_hw_queue(&mut self, input: &MesAddQueueInput) -> core::result::Result<(), MesStatus>;

    /// Remove a hardware queue
    fn remove_hw_queue(
        &mut self,
        input: &MesRemoveQueueInput,
    ) -> core::result::Result<(), MesStatus>;
}

// =============================================================================
// BAR MAPPING
// =============================================================================

/// Platform BAR discovery and mapping
pub trait BarMapper: Send + Sync {
    /// Get info for a BAR
    fn bar_info(&self, index: u8) -> Result<BarInfo>;

    /// Map a BAR into kernel address space
    fn map_bar(&self, index: u8) -> Result<BarRegion>;

    /// Unmap a BAR mapped by [`map_bar`](Self::map_bar)
    fn unmap_bar(&self, region: BarRegion);
}

// =============================================================================
// STATIC ASSERTIONS
// =============================================================================

static_assertions::assert_impl_all!(GpuAddr: Send, Sync, Copy);
static_assertions::assert_impl_all!(ByteSize: Send, Sync, Copy);
static_assertions::assert_impl_all!(KernelBo: Send, Sync);
static_assertions::assert_impl_all!(MesAddQueueInput: Send, Sync, Copy);
