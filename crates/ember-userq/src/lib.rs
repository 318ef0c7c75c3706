//! # EMBER Usermode Queues
//!
//! Lifecycle of hardware queues that user processes submit into directly.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                UserqManager  (one per process, spin::Mutex)       │
//! │                                                                   │
//! │  create:  id ─► doorbell ─► wptr ─► funcs[engine].mqd_create      │
//! │  destroy: funcs[engine].mqd_destroy ─► wptr ─► doorbell ─► id     │
//! └───────┬───────────────┬──────────────────┬────────────────────────┘
//!         │               │                  │
//!   ┌─────┴──────┐  ┌─────┴──────┐  ┌────────┴───────────────────────┐
//!   │  IdArena   │  │ ember-mem  │  │ UserqFuncs (gfx v11)           │
//!   │ generation │  │ wptr pin   │  │  MQD ─► context ─► shadow ─►   │
//!   │  checked   │  │  into GTT  │  │  MES add queue                 │
//!   └────────────┘  └────────────┘  └────────────────┬───────────────┘
//!                                                    │
//!                 ┌──────────────────────────────────┴──────────────┐
//!                 │ UserqDevice  (shared by every manager)          │
//!                 │  DoorbellManager · MQD initializers ·           │
//!                 │  firmware scheduler channel (spin::Mutex)       │
//!                 └─────────────────────────────────────────────────┘
//! ```
//!
//! Lock order is always manager lock, then scheduler channel.
//!
//! ## Queue States
//!
//! ```text
//! UserqRequest ─► IdAllocated ─► DescriptorBuilt ─► Bound ─► Live
//!                     └─────────────────┴─────────────┴──► Absent (on failure)
//! Live ─► Absent (destroy only)
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod config;
pub mod device;
pub mod doorbell;
pub mod funcs;
pub mod idr;
pub mod manager;
pub mod mes;
pub mod mqd;
pub mod queue;
pub mod uapi;

#[cfg(test)]
mod harness;

pub use config::UserqConfig;
pub use device::{DeviceInfo, UserqDevice};
pub use funcs::{FuncTable, UserqContext, UserqFuncs};
pub use idr::{IdArena, QueueId};
pub use manager::UserqManager;
pub use mqd::{FwContext, MqdShadowLayout};
pub use queue::{QueueFlags, QueueInfo, QueueState, UserqRequest, UsermodeQueue};
pub use uapi::{UserqArgs, UserqIn, UserqMqdIn, UserqOp, UserqOut};
