//! Simulated MQD initializer.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use ember_core::{
    lower_32_bits, upper_32_bits, Error, MqdInitializer, MqdProperties, Result,
};

/// Dword where the simulated layout starts recording properties
pub const SIM_MQD_PROPS_DWORD: usize = 32;

/// Initializer that records the properties it was given
///
/// Layout from [`SIM_MQD_PROPS_DWORD`]: doorbell control (index in bits
/// 0..28, enable in bit 30), ring base lo/hi, ring size, MQD address lo/hi.
#[derive(Debug)]
pub struct SimMqdInit {
    size: usize,
    fail_next: AtomicBool,
    calls: AtomicU32,
}

impl SimMqdInit {
    /// Create an initializer for descriptors of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            size,
            fail_next: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    /// Make the next `init_mqd` fail
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Number of `init_mqd` calls
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for SimMqdInit {
    fn default() -> Self {
        Self::new(2048)
    }
}

fn put(mqd: &mut [u8], dword: usize, value: u32) -> Result<()> {
    let bytes = mqd
        .get_mut(dword * 4..dword * 4 + 4)
        .ok_or(Error::SizeExceeded)?;
    bytes.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

impl MqdInitializer for SimMqdInit {
    fn mqd_size(&self) -> usize {
        self.size
    }

    fn init_mqd(&self, mqd: &mut [u8], props: &MqdProperties) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::InvalidParameter);
        }
        let base = SIM_MQD_PROPS_DWORD;
        let doorbell = (props.doorbell_index & 0x0FFF_FFFF) | ((props.use_doorbell as u32) << 30);
        put(mqd, base, doorbell)?;
        put(mqd, base + 1, lower_32_bits(props.hqd_base_gpu_addr.raw()))?;
        put(mqd, base + 2, upper_32_bits(props.hqd_base_gpu_addr.raw()))?;
        put(mqd, base + 3, props.queue_size as u32)?;
        put(mqd, base + 4, lower_32_bits(props.mqd_gpu_addr.raw()))?;
        put(mqd, base + 5, upper_32_bits(props.mqd_gpu_addr.raw()))?;
        Ok(())
    }
}
