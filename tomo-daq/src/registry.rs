//! All tomography channels of a build
//!
//! Resolving a channel means finding out, from the
//! hardware description alone,
//!
//! * which DAC slice it drives and which ADC slice
//!   feeds it (and at which clocks those run)
//! * which DMA engine receives each of its streams
//!
//! and mapping the register windows of the block
//! and its DMA engines. Every channel then gets its
//! own acquisition engine.

use std::fmt;
use std::time::Duration;

use tomo_lib::constants::{
    ADC_RFDC_PORT,
    AXI_DMA_TYPE,
    DAC_RFDC_PORT,
    DMA_DC_PORT,
    DMA_GRAPHY_PORT,
    DMA_TIME_PORT,
    RFDC_TYPE,
    TOMOGRAPHY_TYPE,
};
use tomo_lib::errors::TraceError;
use tomo_lib::settings::EngineSettings;
use tomo_lib::{
    NetlistGraph,
    PortTracer,
};

use crate::buffers::{
    CycleBuffers,
    DataClass,
};
use crate::converters::{
    AdcInfo,
    DacInfo,
    RfdcConfig,
};
use crate::dma::{
    AxiDma,
    DmaSet,
    MAX_TRANSFER_BYTES,
};
use crate::engine::{
    AcquisitionEngine,
    ChannelState,
    CycleBatch,
};
use crate::errors::{
    RegisterError,
    RegistryError,
};
use crate::memory::{
    Platform,
    RegisterDevice,
};
use crate::registers::{
    DmaReg,
    RegisterMap,
    TomoReg,
};

/// The DMA engines receiving the streams of a channel
#[derive(Debug, Clone, PartialEq)]
pub struct DmaPeers {
  pub time   : String,
  pub dc     : String,
  pub graphy : String,
}

/// Everything we learned about a channel from
/// the hardware description
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
  pub name          : String,
  pub fullpath      : String,
  /// decision samples per event
  pub interpolation : usize,
  pub dac           : DacInfo,
  pub adc           : AdcInfo,
  pub dma           : DmaPeers,
}

impl fmt::Display for ChannelConfig {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = format!("<ChannelConfig {}:", self.name);
    repr += &(format!("\n  DAC {} : fabric {:.3} MHz, fs {:.3} MHz", self.dac.chname, self.dac.f_fabric, self.dac.fs));
    repr += &(format!("\n  ADC {} : fabric {:.3} MHz, fs {:.3} MHz", self.adc.chname, self.adc.f_fabric, self.adc.fs));
    repr += &(format!("\n  interpolation : {}", self.interpolation));
    repr += &(format!("\n  DMA time/dc/graphy : {}/{}/{}", self.dma.time, self.dma.dc, self.dma.graphy));
    repr += ">";
    write!(f, "{}", repr)
  }
}

/// The single DMA engine a stream port ends up at
fn dma_peer(graph : &NetlistGraph, block : &str, port : &str) -> Result<String, TraceError> {
  let found = PortTracer::new(graph).trace_forward(block, port, &[AXI_DMA_TYPE], Some(1))?;
  Ok(found[0].block.clone())
}

fn map_device<R : RegisterMap>(graph    : &NetlistGraph,
                               platform : &dyn Platform,
                               name     : &str)
  -> Result<RegisterDevice<R>, RegistryError> {
  let block  = graph.block(name).ok_or_else(|| TraceError::UnknownBlock(String::from(name)))?;
  let window = block.address.ok_or_else(|| RegisterError::NotAddressable(String::from(name)))?;
  let words  = platform.map_window(name, &window)?;
  Ok(RegisterDevice::<R>::new(name, &block.btype, words)?)
}

/// A resolved tomography block with its register
/// windows, before it gets an engine
pub struct TomographyDevice {
  pub config : ChannelConfig,
  pub tomo   : RegisterDevice<TomoReg>,
  pub dmas   : DmaSet,
}

impl TomographyDevice {

  pub fn resolve(graph    : &NetlistGraph,
                 rfdc     : &RfdcConfig,
                 platform : &dyn Platform,
                 block    : &str)
    -> Result<Self, RegistryError> {
    let dac = DacInfo::resolve(graph, rfdc, block, DAC_RFDC_PORT)?;
    let adc = AdcInfo::resolve(graph, rfdc, block, ADC_RFDC_PORT)?;
    let dma = DmaPeers {
      time   : dma_peer(graph, block, DMA_TIME_PORT)?,
      dc     : dma_peer(graph, block, DMA_DC_PORT)?,
      graphy : dma_peer(graph, block, DMA_GRAPHY_PORT)?,
    };
    let interpolation : usize = graph.get_param_as(block, "INTERPOLATION")?;
    if interpolation == 0 {
      return Err(RegistryError::Trace(TraceError::BadParameter {
        block : String::from(block),
        param : String::from("INTERPOLATION"),
        value : String::from("0"),
      }));
    }
    let tomo = map_device::<TomoReg>(graph, platform, block)?;
    let dmas = DmaSet {
      time   : AxiDma::new(map_device::<DmaReg>(graph, platform, &dma.time)?),
      dc     : AxiDma::new(map_device::<DmaReg>(graph, platform, &dma.dc)?),
      graphy : AxiDma::new(map_device::<DmaReg>(graph, platform, &dma.graphy)?),
    };
    let config = ChannelConfig {
      name     : String::from(block),
      fullpath : String::from(block),
      interpolation,
      dac,
      adc,
      dma,
    };
    debug!("Resolved {}", config);
    Ok(Self { config, tomo, dmas })
  }

  /// Get the DMA buffers and start the worker
  pub fn into_engine(self, platform : &dyn Platform, settings : &EngineSettings)
    -> Result<AcquisitionEngine, RegistryError> {
    // the largest stream has to fit into one transfer
    let per_event = DataClass::Waveform.bytes_per_event(self.config.interpolation)
      .max(DataClass::Decision.bytes_per_event(self.config.interpolation));
    let max_triggers = MAX_TRANSFER_BYTES / per_event;
    if settings.trigger_limit as usize > max_triggers {
      return Err(RegistryError::TriggerLimitTooLarge {
        channel       : self.config.name.clone(),
        trigger_limit : settings.trigger_limit,
        max_triggers,
      });
    }
    let buffers = CycleBuffers::allocate(platform,
                                         settings.trigger_limit as usize,
                                         self.config.interpolation)?;
    Ok(AcquisitionEngine::new(self.config, self.tomo, self.dmas, buffers, settings)?)
  }
}

/// Facade over all channels, addressed by index
pub struct ChannelRegistry {
  rfdc      : RfdcConfig,
  timestamp : Option<String>,
  channels  : Vec<AcquisitionEngine>,
}

impl ChannelRegistry {

  /// Find all addressable tomography blocks (ordered
  /// by path) and set them up
  pub fn resolve(graph    : &NetlistGraph,
                 platform : &dyn Platform,
                 settings : &EngineSettings)
    -> Result<Self, RegistryError> {
    let rfdc_block = graph.blocks_of_type(RFDC_TYPE).next().ok_or(RegistryError::NoConverter)?;
    let rfdc       = RfdcConfig::from_block(graph, &rfdc_block.fullpath)?;
    let mut channels = Vec::<AcquisitionEngine>::new();
    for block in graph.blocks_of_type(TOMOGRAPHY_TYPE) {
      if !block.is_addressable() {
        debug!("Skipping {}, it has no address window", block.fullpath);
        continue;
      }
      let device = TomographyDevice::resolve(graph, &rfdc, platform, &block.fullpath)?;
      channels.push(device.into_engine(platform, settings)?);
    }
    info!("Found {} tomography channels", channels.len());
    Ok(Self {
      rfdc,
      timestamp : graph.timestamp().map(String::from),
      channels,
    })
  }

  pub fn len(&self) -> usize {
    self.channels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.channels.is_empty()
  }

  pub fn rfdc(&self) -> &RfdcConfig {
    &self.rfdc
  }

  pub fn channel(&self, channel : usize) -> Result<&AcquisitionEngine, RegistryError> {
    self.channels.get(channel).ok_or(RegistryError::IllegalChannel {
      channel,
      n_channels : self.channels.len(),
    })
  }

  pub fn configure(&self,
                   channel         : usize,
                   rise_time_ms    : f64,
                   fall_time_ms    : f64,
                   max_scale       : f64,
                   trigger_rate_hz : f64)
    -> Result<(), RegistryError> {
    Ok(self.channel(channel)?.configure(rise_time_ms, fall_time_ms, max_scale, trigger_rate_hz)?)
  }

  pub fn set_ttl(&self, channel : usize, ttl_bit : u8, rise_ms : f64, fall_ms : f64)
    -> Result<(), RegistryError> {
    Ok(self.channel(channel)?.set_ttl(ttl_bit, rise_ms, fall_ms)?)
  }

  pub fn set_threshold(&self, channel : usize, threshold : f64) -> Result<(), RegistryError> {
    Ok(self.channel(channel)?.set_threshold(threshold)?)
  }

  pub fn start(&self, channel : usize, cycle_count : u32) -> Result<(), RegistryError> {
    Ok(self.channel(channel)?.start(cycle_count)?)
  }

  pub fn poll(&self, channel : usize, total_time : Option<Duration>, per_item_timeout : Duration)
    -> Result<Vec<CycleBatch>, RegistryError> {
    Ok(self.channel(channel)?.poll(total_time, per_item_timeout)?)
  }

  pub fn stop(&self, channel : usize) -> Result<(), RegistryError> {
    Ok(self.channel(channel)?.stop()?)
  }

  pub fn state(&self, channel : usize) -> Result<ChannelState, RegistryError> {
    Ok(self.channel(channel)?.state())
  }

  pub fn is_active(&self, channel : usize) -> Result<bool, RegistryError> {
    Ok(self.channel(channel)?.is_active())
  }

  /// Stop every channel, e.g. on shutdown
  pub fn stop_all(&self) {
    for engine in &self.channels {
      match engine.stop() {
        Err(err) => error!("Unable to stop {}! {}", engine.name(), err),
        Ok(_)    => ()
      }
    }
  }

  /// Human readable summary of the build
  pub fn describe(&self) -> String {
    let mut repr = String::from("<ChannelRegistry:");
    if let Some(ts) = &self.timestamp {
      repr += &(format!("\n  build     : {}", ts));
    }
    repr += &(format!("\n  converter : {}", self.rfdc));
    for (k, engine) in self.channels.iter().enumerate() {
      repr += &(format!("\n  [{}] {}", k, engine.config()));
    }
    repr += ">";
    repr
  }
}

impl fmt::Display for ChannelRegistry {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", self.describe())
  }
}
