//! # Engine Function Tables
//!
//! Per-engine hooks for building and tearing down a queue's descriptor
//! state. The table is fixed when a manager is created, from the GC IP
//! version of the device; engines without an entry reject queue creation.

use core::fmt;

use ember_core::{EngineKind, IpVersion, Result};

use crate::config::UserqConfig;
use crate::device::UserqDevice;
use crate::queue::UsermodeQueue;

pub mod gfx_v11;

pub use gfx_v11::{Gfx11UserqFuncs, GFX11_SHADOW_LAYOUT, USERQ_GFX_V11_FUNCS};

/// What an engine hook may touch while the manager lock is held
#[derive(Debug, Clone, Copy)]
pub struct UserqContext<'a> {
    /// Device the queue lives on
    pub device: &'a UserqDevice,
    /// Manager configuration
    pub config: &'a UserqConfig,
}

/// Engine-specific descriptor lifecycle
pub trait UserqFuncs: Sync {
    /// Build the MQD and firmware context, then register with the scheduler
    ///
    /// Leaves nothing allocated on failure.
    fn mqd_create(&self, ctx: &UserqContext<'_>, queue: &mut UsermodeQueue) -> Result<()>;

    /// Undo [`mqd_create`](Self::mqd_create); tolerant of partial state
    fn mqd_destroy(&self, ctx: &UserqContext<'_>, queue: &mut UsermodeQueue);
}

/// Function table keyed by engine
#[derive(Clone, Copy)]
pub struct FuncTable {
    funcs: [Option<&'static dyn UserqFuncs>; EngineKind::COUNT],
}

impl FuncTable {
    /// Table with no engine supported
    pub const fn empty() -> Self {
        Self {
            funcs: [None; EngineKind::COUNT],
        }
    }

    /// Table for a graphics core IP version
    pub fn for_gc(version: IpVersion) -> Self {
        let mut table = Self::empty();
        match version.major {
            11 => table.set(EngineKind::Gfx, &USERQ_GFX_V11_FUNCS),
            _ => log::debug!("GC {}: no usermode queue support", version),
        }
        table
    }

    /// Hooks for `engine`
    pub fn get(&self, engine: EngineKind) -> Option<&'static dyn UserqFuncs> {
        self.funcs[engine.index()]
    }

    /// Install hooks for `engine`
    pub fn set(&mut self, engine: EngineKind, funcs: &'static dyn UserqFuncs) {
        self.funcs[engine.index()] = Some(funcs);
    }

    /// Check if `engine` takes usermode queues
    pub fn supports(&self, engine: EngineKind) -> bool {
        self.get(engine).is_some()
    }
}

impl fmt::Debug for FuncTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for engine in EngineKind::ALL {
            if self.supports(engine) {
                list.entry(&engine);
            }
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gc11_supports_gfx_only() {
        let table = FuncTable::for_gc(IpVersion::new(11, 0, 3));
        assert!(table.supports(EngineKind::Gfx));
        assert!(!table.supports(EngineKind::Compute));
        assert!(!table.supports(EngineKind::Dma));
    }

    #[test]
    fn test_older_gc_supports_nothing() {
        for version in [IpVersion::new(9, 4, 2), IpVersion::new(10, 3, 0)] {
            let table = FuncTable::for_gc(version);
            assert!(EngineKind::ALL.iter().all(|e| !table.supports(*e)));
        }
    }
}
