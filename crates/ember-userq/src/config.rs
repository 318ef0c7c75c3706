//! Usermode queue configuration.

use ember_core::{Error, MesPriority, Result};

/// Queue ids are allocated in `[1, MAX_USERQ)`
pub const MAX_USERQ: u32 = 512;

/// Process time slice, 10 ms in 100 ns units
pub const DEFAULT_PROCESS_QUANTUM: u64 = 100_000;

/// Gang time slice, 1 ms in 100 ns units
pub const DEFAULT_GANG_QUANTUM: u64 = 10_000;

/// Per-process queue manager configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserqConfig {
    /// Exclusive upper bound on queue ids
    pub max_queues: u32,
    /// Firmware process quantum
    pub process_quantum: u64,
    /// Firmware gang quantum
    pub gang_quantum: u64,
    /// In-process and global gang priority
    pub priority: MesPriority,
}

impl UserqConfig {
    /// Reject configurations that can never hold a queue
    pub fn validate(&self) -> Result<()> {
        if self.max_queues < 2 || self.process_quantum == 0 || self.gang_quantum == 0 {
            return Err(Error::InvalidParameter);
        }
        Ok(())
    }
}

impl Default for UserqConfig {
    fn default() -> Self {
        Self {
            max_queues: MAX_USERQ,
            process_quantum: DEFAULT_PROCESS_QUANTUM,
            gang_quantum: DEFAULT_GANG_QUANTUM,
            priority: MesPriority::Normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UserqConfig::default();
        assert_eq!(config.max_queues, 512);
        assert_eq!(config.priority, MesPriority::Normal);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_needs_room_for_one_queue() {
        let config = UserqConfig {
            max_queues: 1,
            ..UserqConfig::default()
        };
        assert_eq!(config.validate(), Err(Error::InvalidParameter));
    }
}
