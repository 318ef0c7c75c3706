//! # EMBER Memory Management
//!
//! Thin ownership layer over the buffer-object service.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ember-mem                            │
//! │                                                             │
//! │  ┌────────────────────────┐   ┌──────────────────────────┐  │
//! │  │     KernelBuffer       │   │   Address-Space Binder   │  │
//! │  │  pinned, CPU-mapped,   │   │  wptr VA ─► VM mapping   │  │
//! │  │  zero-filled GTT block │   │  ─► pin GTT ─► GART addr │  │
//! │  └────────────────────────┘   └──────────────────────────┘  │
//! │               │                            │                │
//! │               └──────── ReservationGuard ──┘                │
//! │                    (unreserve on drop)                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(feature = "std")]
extern crate std;

pub mod binder;
pub mod bo;

pub use binder::{bind_write_pointer, unbind_write_pointer, WptrBinding};
pub use bo::{KernelBuffer, ReservationGuard};
