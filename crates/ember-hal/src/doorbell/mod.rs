//! # Doorbell Aperture
//!
//! - [`range`]: owner-tagged `[start, end)` index ranges
//! - [`aperture`]: BAR mapping plus validated, lock-free access
//! - [`kernel`]: kernel doorbell page and slot bitmap
//! - [`manager`]: device init / fini

pub mod aperture;
pub mod kernel;
pub mod manager;
pub mod range;

pub use aperture::DoorbellAperture;
pub use kernel::{index_in_bar, DoorbellBitmap, DoorbellObject};
pub use manager::DoorbellManager;
pub use range::{DoorbellOwner, DoorbellRange};
