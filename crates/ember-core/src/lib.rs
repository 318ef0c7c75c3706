//! # EMBER Core
//!
//! Foundational types and collaborator interfaces for the usermode queue
//! and doorbell resource manager.
//!
//! Everything the manager consumes from the rest of the driver (buffer
//! objects, the process VM, MQD initializers, the firmware scheduler, BAR
//! mapping) is expressed as a trait here, so the higher crates never touch
//! a concrete allocator or page table.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         ember-core                           │
//! │  ┌─────────────┐  ┌──────────────┐  ┌──────────────────────┐ │
//! │  │   Types     │  │   Traits     │  │       Error          │ │
//! │  │ (GpuAddr,   │  │ (BO service, │  │  (UnsupportedEngine, │ │
//! │  │  EngineKind)│  │  VM, MES)    │  │   OutOfMemory, ...)  │ │
//! │  └─────────────┘  └──────────────┘  └──────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(feature = "std")]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod bar;
pub mod error;
pub mod traits;
pub mod types;

// Re-exports for convenience
pub use bar::{BarInfo, BarRegion};
pub use error::{Error, MesStatus, Result};
pub use traits::*;
pub use types::*;
