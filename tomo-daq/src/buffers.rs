//! Double buffering of the acquired streams
//!
//! Each stream of a channel (timestamps, decision
//! samples, waveform) has two DMA buffers. While the
//! hardware fills one of them, we read out the other.
//! A buffer (slot) goes
//!
//! Free -> InFlight (armed) -> Filled (transfer done) -> Free (read out)
//!
//! and it can only be armed when it is Free, so data
//! which has not been read out can never be
//! overwritten.

use std::fmt;
use std::sync::Arc;

use crate::errors::{
    BufferError,
    RegisterError,
};
use crate::memory::{
    DmaMemory,
    Platform,
};

/// Number of waveform samples the fabric writes
/// per trigger
pub const GRAPHY_SAMPLES_PER_EVENT : usize = 1024;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DataClass {
  /// u32 timestamp per event
  Time,
  /// `interpolation` i16 samples per event
  Decision,
  /// 1024 i16 samples per event
  Waveform,
}

impl DataClass {
  pub fn bytes_per_event(&self, interpolation : usize) -> usize {
    match self {
      DataClass::Time     => 4,
      DataClass::Decision => 2 * interpolation,
      DataClass::Waveform => 2 * GRAPHY_SAMPLES_PER_EVENT,
    }
  }
}

impl fmt::Display for DataClass {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      DataClass::Time     => "time",
      DataClass::Decision => "dc",
      DataClass::Waveform => "graphy",
    };
    write!(f, "{}", repr)
  }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SlotState {
  Free,
  InFlight,
  Filled,
}

impl fmt::Display for SlotState {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      SlotState::Free     => "Free",
      SlotState::InFlight => "InFlight",
      SlotState::Filled   => "Filled",
    };
    write!(f, "{}", repr)
  }
}

/// One DMA-able region and its state
pub struct AcquisitionBuffer {
  memory : Arc<dyn DmaMemory>,
  state  : SlotState,
}

impl AcquisitionBuffer {
  pub fn new(memory : Arc<dyn DmaMemory>) -> Self {
    Self {
      memory,
      state : SlotState::Free,
    }
  }

  pub fn state(&self) -> SlotState {
    self.state
  }

  pub fn capacity(&self) -> usize {
    self.memory.len()
  }
}

/// The two slots of one stream
pub struct BufferSet {
  class : DataClass,
  slots : [AcquisitionBuffer; 2],
}

impl BufferSet {
  pub fn new(class : DataClass, slot0 : Arc<dyn DmaMemory>, slot1 : Arc<dyn DmaMemory>) -> Self {
    Self {
      class,
      slots : [AcquisitionBuffer::new(slot0), AcquisitionBuffer::new(slot1)],
    }
  }

  pub fn class(&self) -> DataClass {
    self.class
  }

  pub fn state(&self, slot : usize) -> SlotState {
    self.slots[slot % 2].state
  }

  fn wrong_state(&self, slot : usize, expected : SlotState) -> BufferError {
    BufferError::WrongState {
      class    : self.class.to_string(),
      slot,
      state    : self.slots[slot].state.to_string(),
      expected : expected.to_string(),
    }
  }

  /// Hand out the memory of a free slot for a new
  /// transfer. The slot is InFlight afterwards.
  pub fn arm(&mut self, slot : usize) -> Result<Arc<dyn DmaMemory>, BufferError> {
    let slot = slot % 2;
    if self.slots[slot].state != SlotState::Free {
      return Err(BufferError::SlotBusy {
        class : self.class.to_string(),
        slot,
        state : self.slots[slot].state.to_string(),
      });
    }
    self.slots[slot].state = SlotState::InFlight;
    Ok(self.slots[slot].memory.clone())
  }

  /// The transfer into this slot has finished
  pub fn complete(&mut self, slot : usize) -> Result<(), BufferError> {
    let slot = slot % 2;
    if self.slots[slot].state != SlotState::InFlight {
      return Err(self.wrong_state(slot, SlotState::InFlight));
    }
    self.slots[slot].state = SlotState::Filled;
    Ok(())
  }

  /// Copy the first `nbytes` out of a filled slot and
  /// free it. `nbytes` is capped to the slot size.
  pub fn take(&mut self, slot : usize, nbytes : usize) -> Result<Vec<u8>, BufferError> {
    let slot = slot % 2;
    if self.slots[slot].state != SlotState::Filled {
      return Err(self.wrong_state(slot, SlotState::Filled));
    }
    let nbytes    = nbytes.min(self.slots[slot].capacity());
    let mut bytes = vec![0u8; nbytes];
    self.slots[slot].memory.read_bytes(0, &mut bytes);
    self.slots[slot].state = SlotState::Free;
    Ok(bytes)
  }

  /// Forget about everything in flight. Only safe
  /// once the DMA engines have been reset.
  pub fn release_all(&mut self) {
    for buffer in self.slots.iter_mut() {
      buffer.state = SlotState::Free;
    }
  }
}

/// The buffer sets of all three streams of a channel
pub struct CycleBuffers {
  pub time   : BufferSet,
  pub dc     : BufferSet,
  pub graphy : BufferSet,
}

impl CycleBuffers {

  /// Get two buffers per stream, large enough for
  /// `trigger_limit` events
  pub fn allocate(platform      : &dyn Platform,
                  trigger_limit : usize,
                  interpolation : usize)
    -> Result<Self, RegisterError> {
    let mut sets = Vec::<BufferSet>::with_capacity(3);
    for class in [DataClass::Time, DataClass::Decision, DataClass::Waveform] {
      let nbytes = class.bytes_per_event(interpolation) * trigger_limit;
      let slot0  = platform.allocate(nbytes)?;
      let slot1  = platform.allocate(nbytes)?;
      sets.push(BufferSet::new(class, slot0, slot1));
    }
    let graphy = sets.remove(2);
    let dc     = sets.remove(1);
    let time   = sets.remove(0);
    Ok(Self { time, dc, graphy })
  }

  pub fn sets_mut(&mut self) -> [&mut BufferSet; 3] {
    [&mut self.time, &mut self.dc, &mut self.graphy]
  }

  pub fn complete(&mut self, slot : usize) -> Result<(), BufferError> {
    for set in self.sets_mut() {
      set.complete(slot)?;
    }
    Ok(())
  }

  pub fn release_all(&mut self) {
    for set in self.sets_mut() {
      set.release_all();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::Rng;
  use crate::sim::SimPlatform;

  fn set_of(nbytes : usize) -> BufferSet {
    let platform = SimPlatform::new();
    BufferSet::new(DataClass::Time,
                   platform.allocate(nbytes).unwrap(),
                   platform.allocate(nbytes).unwrap())
  }

  #[test]
  fn slot_lifecycle() {
    let mut set = set_of(64);
    assert!(set.arm(0).is_ok());
    assert_eq!(set.state(0), SlotState::InFlight);
    assert!(matches!(set.arm(0), Err(BufferError::SlotBusy {..})));
    assert!(matches!(set.take(0, 16), Err(BufferError::WrongState {..})));
    set.complete(0).unwrap();
    assert!(matches!(set.arm(2), Err(BufferError::SlotBusy {..})));
    let bytes = set.take(0, 128).unwrap();
    assert_eq!(bytes.len(), 64);
    assert_eq!(set.state(0), SlotState::Free);
    assert!(set.arm(0).is_ok());
  }

  #[test]
  fn never_armed_while_holding_data() {
    // random interleaving of the operations, checking
    // that a Filled slot is never re-armed
    let mut rng = rand::thread_rng();
    let mut set = set_of(16);
    for _ in 0..10000 {
      let slot = rng.gen_range(0..2usize);
      let before = set.state(slot);
      match rng.gen_range(0..4) {
        0 => {
          let result = set.arm(slot);
          assert_eq!(result.is_ok(), before == SlotState::Free);
        }
        1 => {
          let result = set.complete(slot);
          assert_eq!(result.is_ok(), before == SlotState::InFlight);
        }
        2 => {
          let result = set.take(slot, 16);
          assert_eq!(result.is_ok(), before == SlotState::Filled);
        }
        _ => {
          if rng.gen_bool(0.05) {
            set.release_all();
          }
        }
      }
      for k in 0..2 {
        if before == SlotState::Filled && k == slot {
          assert_ne!(set.state(k), SlotState::InFlight);
        }
      }
    }
  }

  #[test]
  fn bytes_per_event() {
    assert_eq!(DataClass::Time.bytes_per_event(4), 4);
    assert_eq!(DataClass::Decision.bytes_per_event(4), 8);
    assert_eq!(DataClass::Waveform.bytes_per_event(4), 2048);
  }
}
