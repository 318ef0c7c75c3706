//! # EMBER Hardware Abstraction Layer
//!
//! Owns the doorbell BAR: its kernel mapping, the index ranges each
//! subsystem may ring, validated 32/64-bit access, and the kernel doorbell
//! page with its slot bitmap.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        DoorbellManager                           │
//! │                                                                  │
//! │  ┌────────────────────────┐     ┌─────────────────────────────┐  │
//! │  │    DoorbellAperture    │     │    Kernel Doorbell Page     │  │
//! │  │  BAR2 mapping          │     │  DOORBELL-domain BO         │  │
//! │  │  ranges:               │     │  [start, end) in dwords     │  │
//! │  │   kernel | MES | KFD   │     │  slot bitmap (spin::Mutex)  │  │
//! │  │  hw-access gate        │     └─────────────────────────────┘  │
//! │  └────────────────────────┘                                      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Indices are in 32-bit-word units throughout. Hardware doorbells are
//! 64 bits wide, so consecutive slots of one object are two indices apart.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod config;
pub mod doorbell;

pub use config::DoorbellConfig;
pub use doorbell::{
    index_in_bar, DoorbellAperture, DoorbellBitmap, DoorbellManager, DoorbellObject,
    DoorbellOwner, DoorbellRange,
};
