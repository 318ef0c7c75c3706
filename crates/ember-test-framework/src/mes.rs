//! Simulated firmware scheduler.
//!
//! Clones share state, so a test keeps one handle for inspection while the
//! device owns another behind its channel guard.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use ember_core::{HwScheduler, MesAddQueueInput, MesRemoveQueueInput, MesStatus};
use spin::Mutex;

/// One-shot scheduler faults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MesFault {
    /// Next add request fails with this status
    Add(MesStatus),
    /// Next remove request fails with this status
    Remove(MesStatus),
}

#[derive(Debug, Default)]
struct MesState {
    queues: BTreeMap<u32, MesAddQueueInput>,
    faults: Vec<MesFault>,
    adds: u32,
    removes: u32,
    last_add: Option<MesAddQueueInput>,
    last_remove: Option<MesRemoveQueueInput>,
}

impl MesState {
    fn take_fault(&mut self, matches: impl Fn(&MesFault) -> bool) -> Option<MesFault> {
        let pos = self.faults.iter().position(matches)?;
        Some(self.faults.remove(pos))
    }
}

/// Firmware scheduler keyed by doorbell offset
#[derive(Debug, Clone, Default)]
pub struct SimScheduler {
    state: Arc<Mutex<MesState>>,
}

impl SimScheduler {
    /// Create a scheduler with no registered queues
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot fault
    pub fn inject(&self, fault: MesFault) {
        self.state.lock().faults.push(fault);
    }

    /// Number of queues currently registered
    pub fn registered(&self) -> usize {
        self.state.lock().queues.len()
    }

    /// Registration record for a doorbell, if present
    pub fn queue(&self, doorbell_offset: u32) -> Option<MesAddQueueInput> {
        self.state.lock().queues.get(&doorbell_offset).copied()
    }

    /// Last add request seen, successful or not
    pub fn last_add(&self) -> Option<MesAddQueueInput> {
        self.state.lock().last_add
    }

    /// Last remove request seen, successful or not
    pub fn last_remove(&self) -> Option<MesRemoveQueueInput> {
        self.state.lock().last_remove
    }

    /// Successful add requests
    pub fn add_count(&self) -> u32 {
        self.state.lock().adds
    }

    /// Successful remove requests
    pub fn remove_count(&self) -> u32 {
        self.state.lock().removes
    }
}

impl HwScheduler for SimScheduler {
    fn add_hw_queue(&mut self, input: &MesAddQueueInput) -> Result<(), MesStatus> {
        let mut state = self.state.lock();
        state.last_add = Some(*input);
        if let Some(MesFault::Add(status)) =
            state.take_fault(|f| matches!(f, MesFault::Add(_)))
        {
            return Err(status);
        }
        if state.queues.contains_key(&input.doorbell_offset) {
            return Err(MesStatus::InvalidPacket);
        }
        state.queues.insert(input.doorbell_offset, *input);
        state.adds += 1;
        Ok(())
    }

    fn remove_hw_queue(&mut self, input: &MesRemoveQueueInput) -> Result<(), MesStatus> {
        let mut state = self.state.lock();
        state.last_remove = Some(*input);
        if let Some(MesFault::Remove(status)) =
            state.take_fault(|f| matches!(f, MesFault::Remove(_)))
        {
            // The firmware still drops the queue when it reports a failure.
            state.queues.remove(&input.doorbell_offset);
            return Err(status);
        }
        match state.queues.remove(&input.doorbell_offset) {
            Some(_) => {
                state.removes += 1;
                Ok(())
            }
            None => Err(MesStatus::QueueNotFound),
        }
    }
}
