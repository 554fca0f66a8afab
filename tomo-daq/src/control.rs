//! Waveform and timing configuration of a
//! tomography block
//!
//! All durations are given in ms and converted to
//! ticks of the fabric clock the block runs on. The
//! derived register values are kept here and only
//! written to the block when a run is armed (see
//! `apply`), so configuring never disturbs a
//! measurement in progress.
//!
//! For the mapping of registers/offsets,
//! see `registers.rs`

use std::fmt;

use crate::errors::ConfigurationError;
use crate::memory::RegisterDevice;
use crate::registers::TomoReg;

/// Full scale of the DAC, 2^15 - 2
pub const MAXV : i64 = 32766;

/// Highest supported trigger rate
pub const MAX_TRIGGER_RATE_HZ : f64 = 100000.0;
pub const MIN_FALL_TIME_MS    : f64 = 50.0;
pub const MIN_TTL_RISE_MS     : f64 = 10.0;
pub const MAX_TTL_FALL_MS     : f64 = 140.0;

/// Default half period of the ramp
const DEFAULT_HALF_PERIOD_MS  : f64 = 150.0;
const DEFAULT_TRIGGER_RATE_HZ : f64 = 10000.0;

/// The ratio registers hold fixed point numbers
/// with 16 fractional bits
const RATIO_ONE : f64 = 65536.0;

/// Convert a duration in ms to fabric clock ticks
///
/// # Arguments
///
/// * ms       : duration
/// * f_fabric : fabric clock in MHz
pub fn ms_to_ticks(ms : f64, f_fabric : f64) -> i64 {
  (ms * 1000.0 * f_fabric).round() as i64
}

/// Convert fabric clock ticks to a duration in ms
pub fn ticks_to_ms(ticks : i64, f_fabric : f64) -> f64 {
  ticks as f64 / (1000.0 * f_fabric)
}

fn ticks_as_register(what : &str, ms : f64, f_fabric : f64) -> Result<u32, ConfigurationError> {
  let ticks = ms_to_ticks(ms, f_fabric);
  if ticks < 0 || ticks > u32::MAX as i64 {
    return Err(ConfigurationError::TickOverflow {
      what : String::from(what),
      ms,
      f_fabric,
    });
  }
  Ok(ticks as u32)
}

/// Every register value derived from the
/// configuration of one channel
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TimingRegisters {
  /// fabric clock in MHz
  pub f_fabric      : f64,
  pub trigger_limit : u32,
  pub tri_limit     : u32,
  pub tx_period     : u32,
  pub tx_tag_fall   : u32,
  pub ttl_rise      : [u32; 8],
  pub ttl_fall      : [u32; 8],
  pub ratio_rise    : i32,
  pub ratio_fall    : i32,
  pub tri_mode      : u32,
  pub threshold     : u32,
}

impl TimingRegisters {

  /// The power-up configuration: TTL pulses from
  /// 10 to 140 ms and a symmetric 300 ms ramp with
  /// 1500 triggers.
  pub fn new(f_fabric : f64, trigger_limit : u32) -> Self {
    let ttl_rise = (ms_to_ticks(MIN_TTL_RISE_MS, f_fabric) - 1).max(0) as u32;
    let ttl_fall = (ms_to_ticks(MAX_TTL_FALL_MS, f_fabric) - 1).max(0) as u32;
    let half     = ms_to_ticks(DEFAULT_HALF_PERIOD_MS, f_fabric).max(1);
    let ratio    = (MAXV as f64 * RATIO_ONE / half as f64).round() as i32;
    let trigger_num = (DEFAULT_HALF_PERIOD_MS * DEFAULT_TRIGGER_RATE_HZ * 0.001).round() as u32;
    Self {
      f_fabric,
      trigger_limit,
      tri_limit   : trigger_num.min(trigger_limit),
      tx_period   : (2 * half - 1) as u32,
      tx_tag_fall : (half - 1) as u32,
      ttl_rise    : [ttl_rise; 8],
      ttl_fall    : [ttl_fall; 8],
      ratio_rise  : ratio,
      ratio_fall  : -ratio,
      tri_mode    : 0,
      threshold   : (MAXV / 2) as u32,
    }
  }

  /// Number of triggers per cycle
  pub fn trigger_num(&self) -> u32 {
    self.tri_limit
  }

  /// Set up the ramp. The number of triggers is
  /// the rise time times the trigger rate.
  ///
  /// Nothing changes if any of the parameters is
  /// out of bounds.
  ///
  /// # Arguments
  ///
  /// * rise_time_ms    : duration of the rising half (triggers are taken here)
  /// * fall_time_ms    : duration of the falling half, at least 50 ms
  /// * max_scale       : amplitude as a fraction of full scale
  /// * trigger_rate_hz : at most 100 kHz
  pub fn set_waveform(&mut self,
                      rise_time_ms    : f64,
                      fall_time_ms    : f64,
                      max_scale       : f64,
                      trigger_rate_hz : f64)
    -> Result<(), ConfigurationError> {
    if !rise_time_ms.is_finite() || rise_time_ms <= 0.0 {
      return Err(ConfigurationError::BadRiseTime(rise_time_ms));
    }
    if !(fall_time_ms >= MIN_FALL_TIME_MS) {
      return Err(ConfigurationError::FallTimeTooShort(fall_time_ms));
    }
    if !(0.0..=1.0).contains(&max_scale) {
      return Err(ConfigurationError::ScaleOutOfRange(max_scale));
    }
    if !(trigger_rate_hz <= MAX_TRIGGER_RATE_HZ) {
      return Err(ConfigurationError::RateTooHigh(trigger_rate_hz));
    }
    let trigger_num = (rise_time_ms * trigger_rate_hz * 0.001).round();
    if trigger_num > self.trigger_limit as f64 {
      return Err(ConfigurationError::TooManyTriggers {
        trigger_num : trigger_num as u64,
        limit       : self.trigger_limit,
      });
    }
    if !(trigger_num >= 1.0) {
      return Err(ConfigurationError::NoTriggers);
    }
    let rise_clk = ticks_as_register("rise time", rise_time_ms, self.f_fabric)?;
    let fall_clk = ticks_as_register("fall time", fall_time_ms, self.f_fabric)?;
    let period   = rise_clk as u64 + fall_clk as u64;
    if rise_clk == 0 || fall_clk == 0 || period > u32::MAX as u64 + 1 {
      return Err(ConfigurationError::TickOverflow {
        what     : String::from("waveform period"),
        ms       : rise_time_ms + fall_time_ms,
        f_fabric : self.f_fabric,
      });
    }
    let amplitude = MAXV as f64 * max_scale * RATIO_ONE;
    self.tri_limit   = trigger_num as u32;
    self.tx_tag_fall = rise_clk - 1;
    self.tx_period   = (period - 1) as u32;
    self.ratio_rise  = (amplitude / rise_clk as f64).round() as i32;
    self.ratio_fall  = -((amplitude / fall_clk as f64).round() as i32);
    debug!("Waveform set, {} triggers, rise {} ticks, fall {} ticks, ratios {}/{}",
           self.tri_limit, rise_clk, fall_clk, self.ratio_rise, self.ratio_fall);
    Ok(())
  }

  /// Set the edges of one of the 8 TTL outputs
  pub fn set_ttl(&mut self, ttl_bit : u8, rise_ms : f64, fall_ms : f64)
    -> Result<(), ConfigurationError> {
    if TomoReg::ttl_rise(ttl_bit).is_none() {
      return Err(ConfigurationError::BadTtlBit(ttl_bit));
    }
    if !(rise_ms >= MIN_TTL_RISE_MS) {
      return Err(ConfigurationError::TtlRiseTooShort(rise_ms));
    }
    if !(fall_ms <= MAX_TTL_FALL_MS) {
      return Err(ConfigurationError::TtlFallTooLong(fall_ms));
    }
    let rise = ticks_as_register("TTL rise", rise_ms, self.f_fabric)?;
    let fall = ticks_as_register("TTL fall", fall_ms, self.f_fabric)?;
    self.ttl_rise[ttl_bit as usize] = rise.saturating_sub(1);
    self.ttl_fall[ttl_bit as usize] = fall.saturating_sub(1);
    Ok(())
  }

  /// Decision threshold as a fraction of full scale
  pub fn set_threshold(&mut self, threshold : f64) -> Result<(), ConfigurationError> {
    if !(0.0..=1.0).contains(&threshold) {
      return Err(ConfigurationError::ThresholdOutOfRange(threshold));
    }
    self.threshold = (MAXV as f64 * threshold).round() as u32;
    Ok(())
  }

  /// Write everything to the block, ready to run
  /// `cycles` cycles
  pub fn apply(&self, device : &RegisterDevice<TomoReg>, cycles : u32) {
    device.write(TomoReg::TriLimit,    self.tri_limit);
    device.write(TomoReg::TxPeriod,    self.tx_period);
    device.write(TomoReg::TxTagFall,   self.tx_tag_fall);
    for k in 0..TomoReg::N_TTL {
      device.write(TomoReg::TxTtlRise(k), self.ttl_rise[k as usize]);
      device.write(TomoReg::TxTtlFall(k), self.ttl_fall[k as usize]);
    }
    device.write_i32(TomoReg::TxRatioRise, self.ratio_rise);
    device.write_i32(TomoReg::TxRatioFall, self.ratio_fall);
    device.write(TomoReg::RxTriMode,   self.tri_mode);
    device.write(TomoReg::RxThreshold, self.threshold);
    device.write(TomoReg::Cycle,       cycles);
  }
}

impl fmt::Display for TimingRegisters {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<TimingRegisters:");
    repr += &(format!("\n  f_fabric    : {} MHz", self.f_fabric));
    repr += &(format!("\n  triggers    : {} (limit {})", self.tri_limit, self.trigger_limit));
    repr += &(format!("\n  period      : {} ticks", self.tx_period));
    repr += &(format!("\n  tag fall    : {} ticks", self.tx_tag_fall));
    repr += &(format!("\n  ratio r/f   : {}/{}", self.ratio_rise, self.ratio_fall));
    repr += &(format!("\n  threshold   : {}", self.threshold));
    repr += ">";
    write!(f, "{}", repr)
  }
}
