//! Settings for the tomography DAQ
//!
//! Configure it from a .toml config
//! file

use std::fs::File;
use std::io::{
    Write,
    Read,
};
use std::fmt;
use std::path::PathBuf;

extern crate toml;

use crate::errors::SettingsError;

/// The reserved, physically contiguous memory
/// the DMA buffers are carved from
#[derive(Debug, Copy, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DmaPoolSettings {
  /// physical base address
  pub base : u64,
  /// size in bytes
  pub size : u64,
}

impl DmaPoolSettings {
  pub fn new() -> Self {
    Self {
      base : 0x7000_0000,
      size : 0x1000_0000,
    }
  }
}

impl Default for DmaPoolSettings {
  fn default() -> Self {
    Self::new()
  }
}

/// Settings for each acquisition engine
#[derive(Debug, Copy, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EngineSettings {
  /// Maximum number of triggers per cycle. This
  /// fixes the size of the DMA buffers
  pub trigger_limit    : u32,
  /// Interval to check the state register while
  /// waiting for a cycle to finish
  pub poll_interval_us : u64,
  /// Number of waveform samples kept per event
  pub snippet_len      : usize,
}

impl EngineSettings {
  pub fn new() -> Self {
    Self {
      trigger_limit    : 10000,
      poll_interval_us : 100,
      snippet_len      : 1000,
    }
  }
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for EngineSettings {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let disp = toml::to_string(self).unwrap_or(
      String::from("-- DESERIALIZATION ERROR! --"));
    write!(f, "<EngineSettings :\n{}>", disp)
  }
}

/// The measurement which is run when nothing
/// else is asked for
#[derive(Debug, Copy, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WaveformSettings {
  pub rise_time_ms    : f64,
  pub fall_time_ms    : f64,
  /// fraction of full scale, 0..1
  pub max_scale       : f64,
  pub trigger_rate_hz : f64,
  /// decision threshold, fraction of full scale
  pub threshold       : f64,
  /// number of cycles per run
  pub cycles          : u32,
}

impl WaveformSettings {
  pub fn new() -> Self {
    Self {
      rise_time_ms    : 100.0,
      fall_time_ms    : 50.0,
      max_scale       : 1.0,
      trigger_rate_hz : 100000.0,
      threshold       : 0.5,
      cycles          : 1,
    }
  }
}

impl Default for WaveformSettings {
  fn default() -> Self {
    Self::new()
  }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TomoSettings {
  /// The hardware description (json) of the
  /// loaded build
  pub description_path : PathBuf,
  /// device to map register windows and
  /// DMA buffers from
  pub mem_device       : PathBuf,
  pub dma_pool         : DmaPoolSettings,
  pub engine           : EngineSettings,
  pub waveform         : WaveformSettings,
}

impl TomoSettings {
  pub fn new() -> Self {
    Self {
      description_path : PathBuf::from("/etc/tomo/design.json"),
      mem_device       : PathBuf::from("/dev/mem"),
      dma_pool         : DmaPoolSettings::new(),
      engine           : EngineSettings::new(),
      waveform         : WaveformSettings::new(),
    }
  }

  /// Write the settings to a toml file
  pub fn to_toml(&self, mut filename : String) -> Result<(), SettingsError> {
    if !filename.ends_with(".toml") {
      filename += ".toml";
    }
    info!("Will write to file {}!", filename);
    let toml_string = toml::to_string_pretty(&self)?;
    let mut file = File::create(&filename).map_err(|source| SettingsError::Io {
      path : PathBuf::from(&filename),
      source
    })?;
    match file.write_all(toml_string.as_bytes()) {
      Err(source) => {
        error!("Unable to write to file {}! {}", filename, source);
        Err(SettingsError::Io { path : PathBuf::from(&filename), source })
      }
      Ok(_) => {
        debug!("Wrote settings to {}!", filename);
        Ok(())
      }
    }
  }

  pub fn from_toml(filename : &str) -> Result<TomoSettings, SettingsError> {
    let mut file = File::open(filename).map_err(|source| {
      error!("Unable to open {}! {}", filename, source);
      SettingsError::Io { path : PathBuf::from(filename), source }
    })?;
    let mut toml_string = String::from("");
    if let Err(source) = file.read_to_string(&mut toml_string) {
      error!("Unable to read {}! {}", filename, source);
      return Err(SettingsError::Io { path : PathBuf::from(filename), source });
    }
    match toml::from_str(&toml_string) {
      Err(err) => {
        error!("Can't interpret toml! {}", err);
        Err(SettingsError::from(err))
      }
      Ok(settings) => Ok(settings)
    }
  }
}

impl Default for TomoSettings {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for TomoSettings {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let disp = toml::to_string(self).unwrap_or(
      String::from("-- DESERIALIZATION ERROR! --"));
    write!(f, "<TomoSettings :\n{}>", disp)
  }
}
