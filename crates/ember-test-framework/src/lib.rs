//! # EMBER Test Framework
//!
//! Host-side simulations of every collaborator the queue manager consumes.
//!
//! Each simulation keeps exact accounting of what is alive (objects, pins,
//! reservations, references, firmware registrations) so tests can assert
//! that a failed or torn-down operation left nothing behind. Faults are
//! one-shot: an injected fault fires on the first matching call and is
//! then consumed.

#![no_std]
#![warn(missing_docs)]

extern crate alloc;

pub mod bar;
pub mod bo;
pub mod mes;
pub mod mqd;
pub mod vm;

pub use bar::{SimBar, SIM_BAR_BASE};
pub use bo::{BoFault, SimBoService};
pub use mes::{MesFault, SimScheduler};
pub use mqd::{SimMqdInit, SIM_MQD_PROPS_DWORD};
pub use vm::SimVm;
