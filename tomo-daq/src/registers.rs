//! Register maps of the blocks we drive
//!
//! All registers are 32bit words. The offsets
//! here are word offsets (addr8 = 4 * offset)
//! relative to the base of the block's address
//! window.
//!
//! A register map is a closed set, so asking for a
//! register a block does not have can not compile.

use std::fmt;

/// A fixed, ordered map from register to word offset
pub trait RegisterMap : Copy + fmt::Debug + Send + Sync + 'static {
  /// Every register, in ascending offset order
  const ALL : &'static [Self];
  fn offset(&self) -> usize;
  fn name(&self) -> &'static str;

  fn from_name(name : &str) -> Option<Self> {
    Self::ALL.iter().copied().find(|r| r.name() == name)
  }

  /// Number of words the window has to span
  fn span() -> usize {
    Self::ALL.iter().map(|r| r.offset() + 1).max().unwrap_or(0)
  }
}

//========== axis_tomography ===========
//
//======================================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TomoReg {
  /// [0] 1 runs the cycles, 0 stops and resets the state
  Start,
  /// number of triggers per cycle
  TriLimit,
  /// number of cycles to run
  Cycle,
  /// waveform period in fabric ticks - 1
  TxPeriod,
  /// end of the tag window (ticks - 1)
  TxTagFall,
  /// TTL output rising edge taps, bits 0..=7.
  /// `offset` panics for any other bit, use
  /// `TomoReg::ttl_rise` for unchecked input
  TxTtlRise(u8),
  /// TTL output falling edge taps, bits 0..=7
  TxTtlFall(u8),
  /// ramp increment during the rising half (signed)
  TxRatioRise,
  /// ramp increment during the falling half (signed)
  TxRatioFall,
  /// [3:0] cycle counter, [4] error
  RxState,
  /// number of tagged events in the last cycle
  RxTagCnt,
  /// number of waveform samples in the last cycle
  RxDataCnt,
  RxTriMode,
  /// decision threshold in DAC units
  RxThreshold,
}

impl TomoReg {
  pub const ERROR_BIT     : u32 = 1 << 4;
  pub const COUNTER_MASK  : u32 = 0xf;
  pub const N_TTL         : u8  = 8;

  pub fn ttl_rise(bit : u8) -> Option<Self> {
    (bit < Self::N_TTL).then_some(TomoReg::TxTtlRise(bit))
  }

  pub fn ttl_fall(bit : u8) -> Option<Self> {
    (bit < Self::N_TTL).then_some(TomoReg::TxTtlFall(bit))
  }
}

impl RegisterMap for TomoReg {
  const ALL : &'static [TomoReg] = &[
    TomoReg::Start,
    TomoReg::TriLimit,
    TomoReg::Cycle,
    TomoReg::TxPeriod,
    TomoReg::TxTagFall,
    TomoReg::TxTtlRise(0), TomoReg::TxTtlRise(1), TomoReg::TxTtlRise(2), TomoReg::TxTtlRise(3),
    TomoReg::TxTtlRise(4), TomoReg::TxTtlRise(5), TomoReg::TxTtlRise(6), TomoReg::TxTtlRise(7),
    TomoReg::TxTtlFall(0), TomoReg::TxTtlFall(1), TomoReg::TxTtlFall(2), TomoReg::TxTtlFall(3),
    TomoReg::TxTtlFall(4), TomoReg::TxTtlFall(5), TomoReg::TxTtlFall(6), TomoReg::TxTtlFall(7),
    TomoReg::TxRatioRise,
    TomoReg::TxRatioFall,
    TomoReg::RxState,
    TomoReg::RxTagCnt,
    TomoReg::RxDataCnt,
    TomoReg::RxTriMode,
    TomoReg::RxThreshold,
  ];

  /// # Panics
  ///
  /// For TTL registers of bits outside 0..=7, which
  /// `TomoReg::ttl_rise`/`ttl_fall` never hand out
  fn offset(&self) -> usize {
    match self {
      TomoReg::Start        => 0,
      TomoReg::TriLimit     => 1,
      TomoReg::Cycle        => 2,
      TomoReg::TxPeriod     => 3,
      TomoReg::TxTagFall    => 4,
      TomoReg::TxTtlRise(k) => {
        assert!(*k < 8, "TTL bit {} does not exist", k);
        5 + *k as usize
      }
      TomoReg::TxTtlFall(k) => {
        assert!(*k < 8, "TTL bit {} does not exist", k);
        13 + *k as usize
      }
      TomoReg::TxRatioRise  => 21,
      TomoReg::TxRatioFall  => 22,
      TomoReg::RxState      => 23,
      TomoReg::RxTagCnt     => 24,
      TomoReg::RxDataCnt    => 25,
      TomoReg::RxTriMode    => 26,
      TomoReg::RxThreshold  => 27,
    }
  }

  fn name(&self) -> &'static str {
    const RISE : [&str; 8] = ["tx_ttl0_rise", "tx_ttl1_rise", "tx_ttl2_rise", "tx_ttl3_rise",
                              "tx_ttl4_rise", "tx_ttl5_rise", "tx_ttl6_rise", "tx_ttl7_rise"];
    const FALL : [&str; 8] = ["tx_ttl0_fall", "tx_ttl1_fall", "tx_ttl2_fall", "tx_ttl3_fall",
                              "tx_ttl4_fall", "tx_ttl5_fall", "tx_ttl6_fall", "tx_ttl7_fall"];
    match self {
      TomoReg::Start        => "start",
      TomoReg::TriLimit     => "tri_limit",
      TomoReg::Cycle        => "cycle",
      TomoReg::TxPeriod     => "tx_period",
      TomoReg::TxTagFall    => "tx_tag_fall",
      TomoReg::TxTtlRise(k) => RISE[*k as usize % 8],
      TomoReg::TxTtlFall(k) => FALL[*k as usize % 8],
      TomoReg::TxRatioRise  => "tx_ratio_rise",
      TomoReg::TxRatioFall  => "tx_ratio_fall",
      TomoReg::RxState      => "rx_state",
      TomoReg::RxTagCnt     => "rx_tag_cnt",
      TomoReg::RxDataCnt    => "rx_data_cnt",
      TomoReg::RxTriMode    => "rx_tri_mode",
      TomoReg::RxThreshold  => "rx_threshold",
    }
  }
}

//================ axi_dma ===============
// S2MM (stream to memory) channel only
//========================================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DmaReg {
  /// S2MM_DMACR - control
  Dmacr,
  /// S2MM_DMASR - status
  Dmasr,
  /// S2MM_DA - destination address
  Da,
  /// S2MM_DA_MSB - destination address, upper 32 bits
  DaMsb,
  /// S2MM_LENGTH - bytes, writing it starts the transfer.
  /// After completion it holds the bytes received
  Length,
}

impl DmaReg {
  /// DMACR [0] run/stop
  pub const CR_RUN_STOP   : u32 = 1 << 0;
  /// DMACR [2] soft reset
  pub const CR_RESET      : u32 = 1 << 2;
  /// DMASR [0] halted
  pub const SR_HALTED     : u32 = 1 << 0;
  /// DMASR [1] idle
  pub const SR_IDLE       : u32 = 1 << 1;
  pub const SR_INTERNAL   : u32 = 1 << 4;
  pub const SR_SLAVE      : u32 = 1 << 5;
  pub const SR_DECODE     : u32 = 1 << 6;
}

impl RegisterMap for DmaReg {
  const ALL : &'static [DmaReg] = &[
    DmaReg::Dmacr,
    DmaReg::Dmasr,
    DmaReg::Da,
    DmaReg::DaMsb,
    DmaReg::Length,
  ];

  fn offset(&self) -> usize {
    match self {
      DmaReg::Dmacr  => 12,
      DmaReg::Dmasr  => 13,
      DmaReg::Da     => 18,
      DmaReg::DaMsb  => 19,
      DmaReg::Length => 22,
    }
  }

  fn name(&self) -> &'static str {
    match self {
      DmaReg::Dmacr  => "S2MM_DMACR",
      DmaReg::Dmasr  => "S2MM_DMASR",
      DmaReg::Da     => "S2MM_DA",
      DmaReg::DaMsb  => "S2MM_DA_MSB",
      DmaReg::Length => "S2MM_LENGTH",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tomo_map_is_ordered_and_complete() {
    let offsets : Vec<usize> = TomoReg::ALL.iter().map(|r| r.offset()).collect();
    let expected : Vec<usize> = (0..28).collect();
    assert_eq!(offsets, expected);
    assert_eq!(TomoReg::span(), 28);
  }

  #[test]
  fn lookup_by_name() {
    assert_eq!(TomoReg::from_name("tx_ttl3_fall"), Some(TomoReg::TxTtlFall(3)));
    assert_eq!(TomoReg::from_name("rx_threshold").unwrap().offset(), 27);
    assert_eq!(TomoReg::from_name("tx_ttl8_rise"), None);
    assert_eq!(DmaReg::from_name("S2MM_LENGTH"), Some(DmaReg::Length));
    assert_eq!(DmaReg::span(), 23);
  }

  #[test]
  fn checked_ttl_registers() {
    assert_eq!(TomoReg::ttl_rise(7), Some(TomoReg::TxTtlRise(7)));
    assert_eq!(TomoReg::ttl_fall(0).map(|r| r.offset()), Some(13));
    assert_eq!(TomoReg::ttl_rise(8), None);
    assert_eq!(TomoReg::ttl_fall(255), None);
  }

  #[test]
  #[should_panic]
  fn ttl_out_of_range() {
    TomoReg::TxTtlRise(8).offset();
  }
}
