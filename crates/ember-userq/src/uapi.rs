//! # Queue Request ABI
//!
//! Fixed-layout create/free arguments as they cross the process boundary.
//!
//! ```text
//! UserqArgs
//!   in:  op │ queue_id │ mqd { ip_type, doorbell handle/offset, flags,
//!        │          │        queue va/size, rptr va, wptr va, shadow va }
//!   out: queue_id │ flags
//! ```

use ember_core::{EngineKind, Error, GpuAddr, Result};

use crate::queue::{QueueFlags, UserqRequest};

/// Request opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum UserqOp {
    /// Create a queue
    Create = 1,
    /// Free a queue
    Free   = 2,
}

impl UserqOp {
    /// Decode a raw opcode
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Create),
            2 => Some(Self::Free),
            _ => None,
        }
    }
}

/// Queue description supplied with a create request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct UserqMqdIn {
    /// Hardware IP type (0 graphics, 1 compute, 2 DMA)
    pub ip_type: u32,
    /// User handle of the doorbell object
    pub doorbell_handle: u32,
    /// Doorbell slot inside that object
    pub doorbell_offset: u32,
    /// Reserved, must be zero
    pub _pad: u32,
    /// Queue flags
    pub flags: u64,
    /// Ring buffer base
    pub queue_va: u64,
    /// Ring buffer size in bytes
    pub queue_size: u64,
    /// Read pointer
    pub rptr_va: u64,
    /// Write pointer
    pub wptr_va: u64,
    /// Shadow context, 0 if unused
    pub shadow_va: u64,
}

impl UserqMqdIn {
    /// Decode into a creation request
    ///
    /// Flags are carried verbatim, unknown bits included.
    pub fn to_request(&self) -> Result<UserqRequest> {
        let engine = EngineKind::from_raw(self.ip_type).ok_or_else(|| {
            log::error!("unknown IP type {}", self.ip_type);
            Error::UnsupportedEngine
        })?;
        Ok(UserqRequest {
            engine,
            flags: QueueFlags::from_bits_retain(self.flags),
            queue_va: GpuAddr::new(self.queue_va),
            queue_size: self.queue_size,
            wptr_va: GpuAddr::new(self.wptr_va),
            rptr_va: GpuAddr::new(self.rptr_va),
            doorbell_handle: self.doorbell_handle,
            doorbell_offset: self.doorbell_offset,
            shadow_va: (self.shadow_va != 0).then_some(GpuAddr::new(self.shadow_va)),
        })
    }

    /// Encode a creation request
    pub fn from_request(request: &UserqRequest) -> Self {
        Self {
            ip_type: request.engine as u32,
            doorbell_handle: request.doorbell_handle,
            doorbell_offset: request.doorbell_offset,
            _pad: 0,
            flags: request.flags.bits(),
            queue_va: request.queue_va.raw(),
            queue_size: request.queue_size,
            rptr_va: request.rptr_va.raw(),
            wptr_va: request.wptr_va.raw(),
            shadow_va: request.shadow_va.map_or(0, GpuAddr::raw),
        }
    }
}

/// Request input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct UserqIn {
    /// [`UserqOp`] as raw value
    pub op: u32,
    /// Queue to free
    pub queue_id: u32,
    /// Queue to create
    pub mqd: UserqMqdIn,
}

/// Request output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct UserqOut {
    /// Id of the created queue
    pub queue_id: u32,
    /// Output flags, none defined yet
    pub flags: u32,
}

/// Full request argument block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct UserqArgs {
    /// Input
    pub input: UserqIn,
    /// Output
    pub output: UserqOut,
}

static_assertions::const_assert_eq!(core::mem::size_of::<UserqMqdIn>(), 64);
static_assertions::const_assert_eq!(core::mem::size_of::<UserqIn>(), 72);
static_assertions::const_assert_eq!(core::mem::size_of::<UserqOut>(), 8);
