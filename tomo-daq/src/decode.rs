//! Turn the raw streams of a cycle into events
//!
//! For every tagged event the fabric delivers
//! * a timestamp in ADC sample clocks (u32)
//! * `interpolation` decision samples (i16)
//! * 1024 oversampled waveform samples (i16),
//!   written back to back for consecutive events.
//!
//! Consecutive events can sit closer together than
//! 1024 samples, so the waveform of an event starts
//! where its timestamp says, measured from the start
//! of the waveform stream.

use std::fmt;

use serde::Serialize;

use crate::buffers::GRAPHY_SAMPLES_PER_EVENT;

/// One tagged event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
  /// time of the event in ms
  pub time_ms        : f64,
  /// mean of the decision samples
  pub decision_value : f64,
  /// waveform snippet starting at the event
  pub waveform       : Vec<i16>,
}

impl fmt::Display for Record {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<Record: t {:.6} ms, dc {:.2}, {} samples>",
           self.time_ms, self.decision_value, self.waveform.len())
  }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Decoder {
  /// ADC sample rate in MHz
  pub sample_rate_mhz : f64,
  pub interpolation   : usize,
  /// maximum advance of the waveform start
  /// between two events, in fabric clocks
  pub graphy_clk      : u64,
  /// number of waveform samples per record
  pub snippet_len     : usize,
}

impl Decoder {
  /// # Panics
  ///
  /// The interpolation has to be at least 1
  pub fn new(sample_rate_mhz : f64, interpolation : usize, snippet_len : usize) -> Self {
    assert!(interpolation > 0, "interpolation has to be at least 1");
    Self {
      sample_rate_mhz,
      interpolation,
      graphy_clk : (GRAPHY_SAMPLES_PER_EVENT / interpolation) as u64,
      snippet_len,
    }
  }

  /// Decode one event per timestamp. Decision samples
  /// and waveform snippets missing from the received
  /// data come back shorter (or empty).
  pub fn decode(&self, times : &[u32], dc : &[i16], graphy : &[i16]) -> Vec<Record> {
    let interp        = self.interpolation as u64;
    let mut records   = Vec::<Record>::with_capacity(times.len());
    let mut start_clk = 0u64;
    let mut prev_q    = 0u64;
    for (i, t) in times.iter().enumerate() {
      let t = *t as u64;
      let time_ms = t as f64 / (self.sample_rate_mhz * 1000.0);

      let dc_lo = (i * self.interpolation).min(dc.len());
      let dc_hi = ((i + 1) * self.interpolation).min(dc.len());
      let dc_samples = &dc[dc_lo..dc_hi];
      let decision_value = if dc_samples.is_empty() {
        0.0
      } else {
        dc_samples.iter().map(|x| *x as f64).sum::<f64>() / dc_samples.len() as f64
      };

      let q = t / interp;
      let r = t % interp;
      if i > 0 {
        let delta = q.saturating_sub(prev_q).min(self.graphy_clk);
        start_clk += delta;
      }
      prev_q = q;
      let start = ((start_clk * interp + r) as usize).min(graphy.len());
      let end   = (start + self.snippet_len).min(graphy.len());

      records.push(Record {
        time_ms,
        decision_value,
        waveform : graphy[start..end].to_vec(),
      });
    }
    records
  }
}

/// Little endian words from a DMA buffer
pub fn u32_from_bytes(bytes : &[u8]) -> Vec<u32> {
  bytes.chunks_exact(4)
       .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
       .collect()
}

pub fn i16_from_bytes(bytes : &[u8]) -> Vec<i16> {
  bytes.chunks_exact(2)
       .map(|c| i16::from_le_bytes([c[0], c[1]]))
       .collect()
}
