//! Everything that can go wrong between the
//! register windows and the measurement results

use thiserror::Error;

use tomo_lib::errors::TraceError;

#[derive(Debug, Error)]
pub enum RegisterError {
  #[error("failed to map {len} bytes at 0x{addr:x} of {device}: {source}")]
  MMapFail { device : String, addr : u64, len : usize, source : std::io::Error },
  #[error("register window of {name} has {have} words, but the register map needs {need}")]
  WindowTooSmall { name : String, have : usize, need : usize },
  #[error("DMA pool exhausted, requested {requested} bytes but only {available} are left")]
  PoolExhausted { requested : usize, available : usize },
  #[error("block {0} has no address window")]
  NotAddressable(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DmaError {
  #[error("DMA transfer of {nbytes} bytes exceeds the {limit} byte limit")]
  TooLarge { nbytes : usize, limit : usize },
  #[error("DMA transfer of {nbytes} bytes does not fit the {capacity} byte buffer")]
  BufferTooSmall { nbytes : usize, capacity : usize },
  #[error("DMA channel {0} is not started")]
  NotStarted(String),
  #[error("DMA channel {0} is not idle")]
  NotIdle(String),
  #[error("DMA channel {name} reports an internal error (status 0x{status:x})")]
  Internal { name : String, status : u32 },
  #[error("DMA channel {name} reports a slave error (status 0x{status:x})")]
  Slave { name : String, status : u32 },
  #[error("DMA channel {name} reports a decode error (status 0x{status:x})")]
  Decode { name : String, status : u32 },
}

/// Violations of the double buffering rules
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BufferError {
  #[error("slot {slot} of the {class} buffers is {state} and can not be armed")]
  SlotBusy { class : String, slot : usize, state : String },
  #[error("slot {slot} of the {class} buffers is {state}, expected {expected}")]
  WrongState { class : String, slot : usize, state : String, expected : String },
}

/// A parameter is out of bounds. Nothing has been
/// changed when this is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
  #[error("number of triggers {trigger_num} exceeds the limit of {limit}")]
  TooManyTriggers { trigger_num : u64, limit : u32 },
  #[error("rise time and trigger rate give no triggers at all")]
  NoTriggers,
  #[error("fall time {0} ms is less than 50 ms")]
  FallTimeTooShort(f64),
  #[error("rise time {0} ms is not a positive number")]
  BadRiseTime(f64),
  #[error("maximum scale {0} is not within [0,1]")]
  ScaleOutOfRange(f64),
  #[error("trigger rate {0} Hz exceeds 100 kHz")]
  RateTooHigh(f64),
  #[error("TTL bit {0} does not exist, valid bits are 0..=7")]
  BadTtlBit(u8),
  #[error("TTL rise time {0} ms is less than 10 ms")]
  TtlRiseTooShort(f64),
  #[error("TTL fall time {0} ms exceeds 140 ms")]
  TtlFallTooLong(f64),
  #[error("threshold {0} is not within [0,1]")]
  ThresholdOutOfRange(f64),
  #[error("{what} of {ms} ms does not fit a 32 bit register at {f_fabric} MHz")]
  TickOverflow { what : String, ms : f64, f_fabric : f64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AcquisitionError {
  #[error("the tomography block signalled an error in cycle {cycle}")]
  HardwareFault { cycle : u32 },
  #[error("cycle failed: {0}")]
  CycleFailed(String),
  #[error("the number of cycles has to be at least 1")]
  InvalidCycleCount,
  #[error("the acquisition worker is not running anymore")]
  WorkerGone,
}

impl From<DmaError> for AcquisitionError {
  fn from(err : DmaError) -> Self {
    AcquisitionError::CycleFailed(err.to_string())
  }
}

impl From<BufferError> for AcquisitionError {
  fn from(err : BufferError) -> Self {
    AcquisitionError::CycleFailed(err.to_string())
  }
}

/// Errors of the per channel facade
#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("topology: {0}")]
  Trace(#[from] TraceError),
  #[error("registers: {0}")]
  Register(#[from] RegisterError),
  #[error("channel {channel} does not exist, there are {n_channels} channels")]
  IllegalChannel { channel : usize, n_channels : usize },
  #[error("the build has no RF data converter")]
  NoConverter,
  #[error("trigger limit {trigger_limit} of {channel} does not fit a DMA transfer, at most {max_triggers}")]
  TriggerLimitTooLarge { channel : String, trigger_limit : u32, max_triggers : usize },
  #[error("configuration: {0}")]
  Configuration(#[from] ConfigurationError),
  #[error("acquisition: {0}")]
  Acquisition(#[from] AcquisitionError),
}
