//! What the RF data converter can do for a channel
//!
//! The converter block carries its whole tile/slice
//! configuration as parameters. A channel finds out
//! which converter slice it talks to by tracing its
//! DAC output and its ADC input to the converter
//! block. The port it arrives at (e.g. `s20_axis`)
//! names the slice ("20" = tile 2, slice 0).

use std::collections::BTreeMap;
use std::fmt;

use tomo_lib::errors::TraceError;
use tomo_lib::constants::RFDC_TYPE;
use tomo_lib::{
    NetlistGraph,
    PortTracer,
};

use crate::control::MAXV;

pub const N_TILES  : usize = 4;
pub const N_SLICES : usize = 4;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DacSlice {
  /// sampling rate in MHz
  pub fs            : f64,
  pub fs_mult       : u32,
  pub fs_div        : u32,
  /// fabric clock in MHz
  pub f_fabric      : f64,
  pub interpolation : u32,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AdcSlice {
  /// sampling rate in MHz
  pub fs         : f64,
  pub fs_mult    : u32,
  pub fs_div     : u32,
  /// fabric clock in MHz
  pub f_fabric   : f64,
  pub decimation : u32,
}

/// Tile and slice configuration of the converter
#[derive(Debug, Clone, PartialEq)]
pub struct RfdcConfig {
  pub fullpath       : String,
  /// dual ADCs only use the even slices
  pub high_speed_adc : bool,
  pub dac_tiles      : Vec<usize>,
  pub adc_tiles      : Vec<usize>,
  /// keyed by the two digit channel name
  pub dacs           : BTreeMap<String, DacSlice>,
  pub adcs           : BTreeMap<String, AdcSlice>,
  /// common reference clock of all tiles (MHz),
  /// None if no tile is enabled
  pub refclk_freq    : Option<f64>,
}

/// Tile level parameters shared by DAC and ADC tiles
struct TileClocks {
  f_fabric : f64,
  f_refclk : f64,
  fs_mult  : u32,
  fs_div   : u32,
  fs       : f64,
}

fn tile_clocks(graph : &NetlistGraph, block : &str, kind : &str, tile : usize)
  -> Result<TileClocks, TraceError> {
  let f_fabric : f64 = graph.get_param_as(block, &format!("C_{}{}_Fabric_Freq", kind, tile))?;
  let f_refclk : f64 = graph.get_param_as(block, &format!("C_{}{}_Refclk_Freq", kind, tile))?;
  let fbdiv    : u32 = graph.get_param_as(block, &format!("C_{}{}_FBDIV", kind, tile))?;
  let refdiv   : u32 = graph.get_param_as(block, &format!("C_{}{}_Refclk_Div", kind, tile))?;
  let outdiv   : u32 = graph.get_param_as(block, &format!("C_{}{}_OutDiv", kind, tile))?;
  let gsps     : f64 = graph.get_param_as(block, &format!("C_{}{}_Sampling_Rate", kind, tile))?;
  Ok(TileClocks {
    f_fabric,
    f_refclk,
    fs_mult : fbdiv,
    fs_div  : refdiv * outdiv,
    fs      : gsps * 1000.0,
  })
}

impl RfdcConfig {

  pub fn from_block(graph : &NetlistGraph, block : &str) -> Result<Self, TraceError> {
    let high_speed_adc = graph.get_param(block, "C_High_Speed_ADC")? == "1";
    let mut config = RfdcConfig {
      fullpath       : String::from(block),
      high_speed_adc,
      dac_tiles      : Vec::new(),
      adc_tiles      : Vec::new(),
      dacs           : BTreeMap::new(),
      adcs           : BTreeMap::new(),
      refclk_freq    : None,
    };
    let mut refclk_freqs = Vec::<f64>::new();
    for tile in 0..N_TILES {
      if graph.get_param(block, &format!("C_DAC{}_Enable", tile))? != "1" {
        continue;
      }
      config.dac_tiles.push(tile);
      let clocks = tile_clocks(graph, block, "DAC", tile)?;
      refclk_freqs.push(clocks.f_refclk);
      for slice in 0..N_SLICES {
        if graph.get_param(block, &format!("C_DAC_Slice{}{}_Enable", tile, slice))? != "true" {
          continue;
        }
        let interpolation : u32 = graph.get_param_as(block, &format!("C_DAC_Interpolation_Mode{}{}", tile, slice))?;
        config.dacs.insert(format!("{}{}", tile, slice), DacSlice {
          fs       : clocks.fs,
          fs_mult  : clocks.fs_mult,
          fs_div   : clocks.fs_div,
          f_fabric : clocks.f_fabric,
          interpolation,
        });
      }
    }
    for tile in 0..N_TILES {
      if graph.get_param(block, &format!("C_ADC{}_Enable", tile))? != "1" {
        continue;
      }
      config.adc_tiles.push(tile);
      let clocks = tile_clocks(graph, block, "ADC", tile)?;
      refclk_freqs.push(clocks.f_refclk);
      for slice in 0..N_SLICES {
        // each channel of a dual ADC spans two slices
        if high_speed_adc && slice % 2 != 0 {
          continue;
        }
        if graph.get_param(block, &format!("C_ADC_Slice{}{}_Enable", tile, slice))? != "true" {
          continue;
        }
        let decimation : u32 = graph.get_param_as(block, &format!("C_ADC_Decimation_Mode{}{}", tile, slice))?;
        config.adcs.insert(format!("{}{}", tile, slice), AdcSlice {
          fs       : clocks.fs,
          fs_mult  : clocks.fs_mult,
          fs_div   : clocks.fs_div,
          f_fabric : clocks.f_fabric,
          decimation,
        });
      }
    }
    if let Some(first) = refclk_freqs.first() {
      if refclk_freqs.iter().any(|f| f != first) {
        return Err(TraceError::RefclkMismatch(refclk_freqs));
      }
      config.refclk_freq = Some(*first);
    }
    debug!("Converter {} has {} DAC and {} ADC channels", block, config.dacs.len(), config.adcs.len());
    Ok(config)
  }
}

impl fmt::Display for RfdcConfig {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = format!("<RfdcConfig {}:", self.fullpath);
    for (name, dac) in &self.dacs {
      repr += &(format!("\n  DAC {} : fs {:.3} MHz, fabric {:.3} MHz, interpolation {}",
                        name, dac.fs, dac.f_fabric, dac.interpolation));
    }
    for (name, adc) in &self.adcs {
      repr += &(format!("\n  ADC {} : fs {:.3} MHz, fabric {:.3} MHz, decimation {}",
                        name, adc.fs, adc.f_fabric, adc.decimation));
    }
    if let Some(refclk) = self.refclk_freq {
      repr += &(format!("\n  reference clock {:.3} MHz", refclk));
    }
    repr += ">";
    write!(f, "{}", repr)
  }
}

/// Characters 1..3 of the converter port name
fn channel_name(port : &str) -> String {
  String::from(port.get(1..3).unwrap_or(""))
}

/// The DAC slice a block drives
#[derive(Debug, Clone, PartialEq)]
pub struct DacInfo {
  pub chname        : String,
  pub fs            : f64,
  pub fs_mult       : u32,
  pub fs_div        : u32,
  pub interpolation : u32,
  pub f_fabric      : f64,
  /// interpolation reduces the DDS range
  pub f_dds         : f64,
  pub fdds_div      : u32,
  pub maxv          : i64,
  pub maxv_scale    : f64,
}

impl DacInfo {

  /// Trace forward from `port` of `block` to the
  /// converter. There has to be exactly one.
  pub fn resolve(graph : &NetlistGraph, rfdc : &RfdcConfig, block : &str, port : &str)
    -> Result<Self, TraceError> {
    let found  = PortTracer::new(graph).trace_forward(block, port, &[RFDC_TYPE], Some(1))?;
    let chname = channel_name(&found[0].port);
    let dac    = rfdc.dacs.get(&chname).ok_or_else(|| TraceError::DisabledConverter {
      block   : rfdc.fullpath.clone(),
      channel : chname.clone(),
    })?;
    Ok(Self {
      chname,
      fs            : dac.fs,
      fs_mult       : dac.fs_mult,
      fs_div        : dac.fs_div,
      interpolation : dac.interpolation,
      f_fabric      : dac.f_fabric,
      f_dds         : dac.fs / dac.interpolation as f64,
      fdds_div      : dac.fs_div * dac.interpolation,
      maxv          : MAXV,
      maxv_scale    : 1.0,
    })
  }
}

/// The ADC slice which feeds a block
#[derive(Debug, Clone, PartialEq)]
pub struct AdcInfo {
  pub chname     : String,
  pub fs         : f64,
  pub fs_mult    : u32,
  pub fs_div     : u32,
  pub decimation : u32,
  pub f_fabric   : f64,
  pub f_dds      : f64,
  pub fdds_div   : u32,
}

impl AdcInfo {

  /// Trace back from `port` of `block` to the converter
  pub fn resolve(graph : &NetlistGraph, rfdc : &RfdcConfig, block : &str, port : &str)
    -> Result<Self, TraceError> {
    let found = PortTracer::new(graph).trace_back(block, port, &[RFDC_TYPE])?;
    let found = found.ok_or_else(|| TraceError::Dangling {
      start : format!("{}/{}", block, port),
      block : String::from(block),
      port  : String::from(port),
    })?;
    let chname = channel_name(&found.port);
    let adc    = rfdc.adcs.get(&chname).ok_or_else(|| TraceError::DisabledConverter {
      block   : rfdc.fullpath.clone(),
      channel : chname.clone(),
    })?;
    Ok(Self {
      chname,
      fs         : adc.fs,
      fs_mult    : adc.fs_mult,
      fs_div     : adc.fs_div,
      decimation : adc.decimation,
      f_fabric   : adc.f_fabric,
      f_dds      : adc.fs / adc.decimation as f64,
      fdds_div   : adc.fs_div * adc.decimation,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tomo_lib::netlist::HardwareDescription;
  use crate::sim::demo_description;

  fn demo_graph(n : usize) -> NetlistGraph {
    NetlistGraph::from_description(&demo_description(n)).unwrap()
  }

  #[test]
  fn parse_converter() {
    let graph = demo_graph(2);
    let rfdc  = RfdcConfig::from_block(&graph, "usp_rf_data_converter_0").unwrap();
    assert_eq!(rfdc.dac_tiles, vec![0, 1]);
    assert_eq!(rfdc.adc_tiles, vec![0, 1]);
    let names : Vec<&String> = rfdc.dacs.keys().collect();
    assert_eq!(names, vec!["00", "10"]);
    let dac = rfdc.dacs["10"];
    assert!((dac.fs - 4915.2).abs() < 1e-6);
    assert_eq!(dac.interpolation, 4);
    assert!((rfdc.refclk_freq.unwrap() - 245.76).abs() < 1e-9);
  }

  #[test]
  fn resolve_channels() {
    let graph = demo_graph(2);
    let rfdc  = RfdcConfig::from_block(&graph, "usp_rf_data_converter_0").unwrap();
    let dac   = DacInfo::resolve(&graph, &rfdc, "axis_tomography_1", "M0_DAC").unwrap();
    assert_eq!(dac.chname, "10");
    assert!((dac.f_fabric - 307.2).abs() < 1e-9);
    assert!((dac.f_dds - 1228.8).abs() < 1e-6);
    assert_eq!(dac.fdds_div, dac.fs_div * 4);
    let adc   = AdcInfo::resolve(&graph, &rfdc, "axis_tomography_1", "S0_ADC").unwrap();
    assert_eq!(adc.chname, "10");
    assert!((adc.fs - 2457.6).abs() < 1e-6);
    assert_eq!(adc.decimation, 2);
  }

  #[test]
  fn refclk_must_agree() {
    let mut desc : HardwareDescription = demo_description(2);
    for module in desc.modules.iter_mut() {
      if module.fullpath.ends_with("usp_rf_data_converter_0") {
        module.parameters.insert(String::from("C_ADC1_Refclk_Freq"), String::from("491.52"));
      }
    }
    let graph = NetlistGraph::from_description(&desc).unwrap();
    assert!(matches!(RfdcConfig::from_block(&graph, "usp_rf_data_converter_0"),
                     Err(TraceError::RefclkMismatch(_))));
  }

  #[test]
  fn high_speed_adc_skips_odd_slices() {
    let mut desc = demo_description(1);
    for module in desc.modules.iter_mut() {
      if module.fullpath.ends_with("usp_rf_data_converter_0") {
        module.parameters.insert(String::from("C_High_Speed_ADC"), String::from("1"));
        module.parameters.insert(String::from("C_ADC_Slice01_Enable"), String::from("true"));
        module.parameters.insert(String::from("C_ADC_Decimation_Mode01"), String::from("2"));
      }
    }
    let graph = NetlistGraph::from_description(&desc).unwrap();
    let rfdc  = RfdcConfig::from_block(&graph, "usp_rf_data_converter_0").unwrap();
    let names : Vec<&String> = rfdc.adcs.keys().collect();
    assert_eq!(names, vec!["00"]);
  }
}
