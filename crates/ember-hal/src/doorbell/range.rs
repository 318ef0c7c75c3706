//! Doorbell index ranges.

use alloc::vec::Vec;
use core::fmt;

use ember_core::{Error, Result};

/// Subsystem a doorbell range belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoorbellOwner {
    /// Kernel rings (kernel doorbell page)
    Kernel,
    /// Firmware scheduler (MES) queues
    Scheduler,
    /// Compute process queues (KFD)
    Process,
}

/// Half-open range of doorbell indices, in dwords
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoorbellRange {
    /// Owning subsystem
    pub owner: DoorbellOwner,
    /// First index
    pub start: u32,
    /// One past the last index
    pub end: u32,
}

impl DoorbellRange {
    /// Create a range
    pub const fn new(owner: DoorbellOwner, start: u32, end: u32) -> Self {
        Self { owner, start, end }
    }

    /// Check if `index` is inside the range
    #[inline]
    pub const fn contains(&self, index: u32) -> bool {
        index >= self.start && index < self.end
    }

    /// Number of indices
    #[inline]
    pub const fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// Check if the range holds no index
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if two ranges share an index
    pub const fn overlaps(&self, other: &DoorbellRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for DoorbellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[0x{:x}, 0x{:x})", self.owner, self.start, self.end)
    }
}

/// Disjoint set of registered ranges
#[derive(Debug, Default)]
pub struct RangeTable {
    ranges: Vec<DoorbellRange>,
}

impl RangeTable {
    /// Create an empty table
    pub const fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Register a range
    ///
    /// Empty ranges, ranges overlapping an existing one and a second range
    /// for the same owner are rejected.
    pub fn register(&mut self, range: DoorbellRange) -> Result<()> {
        if range.is_empty() {
            return Err(Error::InvalidParameter);
        }
        if let Some(existing) = self
            .ranges
            .iter()
            .find(|r| r.owner == range.owner || r.overlaps(&range))
        {
            log::error!("doorbell range {} conflicts with {}", range, existing);
            return Err(Error::InvalidParameter);
        }
        self.ranges.push(range);
        Ok(())
    }

    /// Drop the range of one owner
    pub fn unregister(&mut self, owner: DoorbellOwner) -> Option<DoorbellRange> {
        let pos = self.ranges.iter().position(|r| r.owner == owner)?;
        Some(self.ranges.remove(pos))
    }

    /// Range registered for `owner`
    pub fn get(&self, owner: DoorbellOwner) -> Option<DoorbellRange> {
        self.ranges.iter().copied().find(|r| r.owner == owner)
    }

    /// Check if `index` falls in exactly one registered range
    pub fn validate(&self, index: u32) -> bool {
        self.ranges.iter().filter(|r| r.contains(index)).count() == 1
    }

    /// Owner of `index`, if any
    pub fn owner_of(&self, index: u32) -> Option<DoorbellOwner> {
        self.ranges.iter().find(|r| r.contains(index)).map(|r| r.owner)
    }

    /// Drop every range
    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Number of registered ranges
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
