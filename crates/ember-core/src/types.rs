//! # EMBER Core Types
//!
//! Fundamental type definitions used across the queue/doorbell stack.
//!
//! - Strong typing for device addresses vs. sizes
//! - Buffer object and memory domain identifiers
//! - Engine tags and hardware generation used for dispatch

use core::fmt;
use core::ops::{Add, Sub};

// =============================================================================
// PAGE GEOMETRY
// =============================================================================

/// Device page shift
pub const PAGE_SHIFT: u32 = 12;

/// Device page size in bytes
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Low 32 bits of a 64-bit value
#[inline]
pub const fn lower_32_bits(value: u64) -> u32 {
    value as u32
}

/// High 32 bits of a 64-bit value
#[inline]
pub const fn upper_32_bits(value: u64) -> u32 {
    (value >> 32) as u32
}

// =============================================================================
// GPU ADDRESS
// =============================================================================

/// Device-visible address (GPU VA, GART or MC address)
///
/// Not a CPU pointer; cannot be dereferenced.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct GpuAddr(pub u64);

impl GpuAddr {
    /// Create a new GPU address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Create a null GPU address
    #[inline]
    pub const fn null() -> Self {
        Self(0)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Check if null
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Check alignment
    #[inline]
    pub const fn is_aligned(self, alignment: u64) -> bool {
        self.0 & (alignment - 1) == 0
    }

    /// Page frame number of this address
    #[inline]
    pub const fn pfn(self) -> u64 {
        self.0 >> PAGE_SHIFT
    }

    /// Byte offset within the containing page
    #[inline]
    pub const fn page_offset(self) -> u64 {
        self.0 & (PAGE_SIZE - 1)
    }

    /// Offset by bytes
    #[inline]
    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0.wrapping_add(bytes))
    }
}

impl Add<u64> for GpuAddr {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.wrapping_add(rhs))
    }
}

impl Sub<GpuAddr> for GpuAddr {
    type Output = u64;

    fn sub(self, rhs: GpuAddr) -> Self::Output {
        self.0.wrapping_sub(rhs.0)
    }
}

impl fmt::Debug for GpuAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GpuAddr(0x{:016x})", self.0)
    }
}

impl fmt::Display for GpuAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

// =============================================================================
// PHYSICAL ADDRESS
// =============================================================================

/// Host physical address (BAR base)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    /// Create a new physical address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr(0x{:016x})", self.0)
    }
}

// =============================================================================
// SIZE TYPES
// =============================================================================

/// Size in bytes
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct ByteSize(u64);

impl ByteSize {
    /// Zero size
    pub const ZERO: Self = Self(0);
    /// One device page
    pub const PAGE: Self = Self(PAGE_SIZE);

    /// Create from bytes
    #[inline]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Create from a page count
    #[inline]
    pub const fn from_pages(pages: u64) -> Self {
        Self(pages << PAGE_SHIFT)
    }

    /// Get as bytes
    #[inline]
    pub const fn as_bytes(self) -> u64 {
        self.0
    }

    /// Number of 32-bit words
    #[inline]
    pub const fn as_dwords(self) -> u64 {
        self.0 / 4
    }

    /// Align up
    #[inline]
    pub const fn align_up(self, alignment: u64) -> Self {
        let mask = alignment - 1;
        Self((self.0 + mask) & !mask)
    }

    /// Align up to the device page size
    #[inline]
    pub const fn page_align(self) -> Self {
        self.align_up(PAGE_SIZE)
    }
}

impl fmt::Debug for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1024 * 1024 {
            write!(f, "{} MiB", self.0 / (1024 * 1024))
        } else if self.0 >= 1024 {
            write!(f, "{} KiB", self.0 / 1024)
        } else {
            write!(f, "{} B", self.0)
        }
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// BUFFER OBJECTS
// =============================================================================

/// Opaque buffer object handle issued by the buffer-object service
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BoHandle(u64);

impl BoHandle {
    /// Create a new handle
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID
    #[inline]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for BoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoHandle(0x{:x})", self.0)
    }
}

bitflags::bitflags! {
    /// Memory domains a buffer object can be placed or pinned in
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryDomain: u32 {
        /// System memory, CPU only
        const CPU = 1 << 0;
        /// System memory reachable through the GART
        const GTT = 1 << 1;
        /// Device local memory
        const VRAM = 1 << 2;
        /// Doorbell BAR pages
        const DOORBELL = 1 << 3;
    }
}

// =============================================================================
// ENGINES
// =============================================================================

/// Hardware IP block a usermode queue targets
///
/// Discriminants follow the UAPI hardware IP numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum EngineKind {
    /// Graphics (GFX) ring
    Gfx     = 0,
    /// Compute ring
    Compute = 1,
    /// System DMA ring
    Dma     = 2,
}

impl EngineKind {
    /// Number of engine variants (dispatch table size)
    pub const COUNT: usize = 3;

    /// All engine variants, in table order
    pub const ALL: [EngineKind; Self::COUNT] = [Self::Gfx, Self::Compute, Self::Dma];

    /// Decode a UAPI IP type
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Gfx),
            1 => Some(Self::Compute),
            2 => Some(Self::Dma),
            _ => None,
        }
    }

    /// Index into per-engine tables
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// IP block version (major.minor.revision)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct IpVersion {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
    /// Revision
    pub rev: u8,
}

impl IpVersion {
    /// Create from components
    pub const fn new(major: u8, minor: u8, rev: u8) -> Self {
        Self { major, minor, rev }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.rev)
    }
}

// =============================================================================
// ASIC GENERATION
// =============================================================================

/// ASIC generation, ordered oldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AsicGeneration {
    /// Southern Islands (no doorbell aperture)
    Si,
    /// Sea Islands / CIK (first generation with doorbells)
    Cik,
    /// Volcanic Islands
    Vi,
    /// Vega (64-bit doorbells, paging queue doorbell page)
    Vega,
    /// Navi (GFX10)
    Navi,
    /// GFX11
    Gfx11,
}

impl AsicGeneration {
    /// Check if this generation exposes a doorbell BAR
    #[inline]
    pub const fn has_doorbell(self) -> bool {
        !matches!(self, Self::Si)
    }

    /// Check if an extra doorbell page is reserved for the SDMA paging queue
    #[inline]
    pub const fn has_paging_doorbell_page(self) -> bool {
        matches!(self, Self::Vega | Self::Navi | Self::Gfx11)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_helpers() {
        let addr = GpuAddr::new(0x1234_5678);
        assert_eq!(addr.pfn(), 0x12345);
        assert_eq!(addr.page_offset(), 0x678);
        assert_eq!(ByteSize::from_bytes(1).page_align(), ByteSize::PAGE);
        assert_eq!(ByteSize::from_pages(4).as_bytes(), 4 * PAGE_SIZE);
        assert_eq!(ByteSize::PAGE.as_dwords(), 1024);
    }

    #[test]
    fn test_split_words() {
        let value = 0xAAAA_BBBB_CCCC_DDDDu64;
        assert_eq!(lower_32_bits(value), 0xCCCC_DDDD);
        assert_eq!(upper_32_bits(value), 0xAAAA_BBBB);
    }

    #[test]
    fn test_engine_decode() {
        assert_eq!(EngineKind::from_raw(0), Some(EngineKind::Gfx));
        assert_eq!(EngineKind::from_raw(2), Some(EngineKind::Dma));
        assert_eq!(EngineKind::from_raw(7), None);
        for (i, engine) in EngineKind::ALL.iter().enumerate() {
            assert_eq!(engine.index(), i);
        }
    }

    #[test]
    fn test_generation_order() {
        assert!(AsicGeneration::Si < AsicGeneration::Cik);
        assert!(!AsicGeneration::Si.has_doorbell());
        assert!(AsicGeneration::Cik.has_doorbell());
        assert!(!AsicGeneration::Vi.has_paging_doorbell_page());
        assert!(AsicGeneration::Gfx11.has_paging_doorbell_page());
    }
}
