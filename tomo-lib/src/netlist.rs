//! The parsed view of a hardware description
//!
//! A build is described by a list of modules (IP block
//! instances). Each module carries its type (as a vendor
//! VLNV identifier), parameters, the clock frequencies
//! of its ports and the names of the buses its bus
//! interfaces are connected to. Ports which sit on the
//! same bus are directly wired.
//!
//! From that we build
//! * `pins` : (block, port) -> bus name
//! * `nets` : bus name -> all (block, port) on it
//!
//! The graph is immutable after parsing.

use std::collections::{
    BTreeMap,
    BTreeSet,
    HashMap,
};
use std::fmt;
use std::fs::read_to_string;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEBUG_ENDPOINT_MARKER,
    NOC_BUS,
};
use crate::errors::{
    DescriptionError,
    TraceError,
};

/// Memory window of an addressable block
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AddressWindow {
  /// physical base address
  pub base  : u64,
  /// size of the window in bytes
  pub range : u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortDescription {
  pub name          : String,
  /// Clock frequency in Hz, only for clock ports
  #[serde(default)]
  pub clk_frequency : Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusInterfaceDescription {
  pub name : String,
  /// None for an unconnected interface
  #[serde(default)]
  pub bus  : Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModuleDescription {
  pub fullpath       : String,
  /// e.g. "xilinx.com:ip:axi_dma:7.1"
  pub vlnv           : String,
  #[serde(default)]
  pub revision       : u32,
  #[serde(default)]
  pub parameters     : BTreeMap<String, String>,
  #[serde(default)]
  pub ports          : Vec<PortDescription>,
  #[serde(default)]
  pub bus_interfaces : Vec<BusInterfaceDescription>,
  #[serde(default)]
  pub address        : Option<AddressWindow>,
}

/// The document as it comes from the build flow
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HardwareDescription {
  #[serde(default)]
  pub timestamp : Option<String>,
  pub modules   : Vec<ModuleDescription>,
}

/// Get the short type name from a versioned
/// vendor identifier
///
/// "vendor:library:name:version" -> "name"
pub fn vlnv_to_type(vlnv : &str) -> String {
  let fields : Vec<&str> = vlnv.split(':').collect();
  if fields.len() < 2 {
    return String::from(vlnv);
  }
  String::from(fields[fields.len() - 2])
}

#[derive(Debug, Clone, PartialEq)]
pub struct Port {
  pub name          : String,
  pub bus           : Option<String>,
  pub clk_frequency : Option<f64>,
}

/// One IP block instance
#[derive(Debug, Clone)]
pub struct Block {
  pub fullpath   : String,
  pub btype      : String,
  pub vlnv       : String,
  pub revision   : u32,
  pub parameters : BTreeMap<String, String>,
  pub ports      : Vec<Port>,
  pub address    : Option<AddressWindow>,
}

impl Block {
  pub fn port(&self, name : &str) -> Option<&Port> {
    self.ports.iter().find(|p| p.name == name)
  }

  pub fn is_addressable(&self) -> bool {
    self.address.is_some()
  }
}

impl fmt::Display for Block {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = format!("<Block {} [{}]", self.fullpath, self.btype);
    if let Some(addr) = self.address {
      repr += &(format!(" @0x{:x} (0x{:x} bytes)", addr.base, addr.range));
    }
    repr += &(format!(" {} ports>", self.ports.len()));
    write!(f, "{}", repr)
  }
}

/// A (block, port) pair sitting on a bus
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
  pub block : String,
  pub port  : String,
}

impl Endpoint {
  pub fn new(block : &str, port : &str) -> Self {
    Self {
      block : String::from(block),
      port  : String::from(port),
    }
  }

  /// Instrumentation endpoints are not part of any data path
  pub fn is_debug(&self) -> bool {
    self.block.contains(DEBUG_ENDPOINT_MARKER)
  }
}

impl fmt::Display for Endpoint {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}/{}", self.block, self.port)
  }
}

/// Immutable connectivity graph of a build
#[derive(Debug, Clone)]
pub struct NetlistGraph {
  timestamp : Option<String>,
  blocks    : BTreeMap<String, Block>,
  pins      : HashMap<Endpoint, String>,
  nets      : HashMap<String, BTreeSet<Endpoint>>,
}

impl NetlistGraph {

  pub fn from_description(desc : &HardwareDescription)
    -> Result<Self, DescriptionError> {
    let mut blocks = BTreeMap::<String, Block>::new();
    let mut pins   = HashMap::<Endpoint, String>::new();
    let mut nets   = HashMap::<String, BTreeSet<Endpoint>>::new();
    for module in &desc.modules {
      let fullpath = String::from(module.fullpath.trim_start_matches('/'));
      if blocks.contains_key(&fullpath) {
        return Err(DescriptionError::DuplicateModule(fullpath));
      }
      let mut ports = Vec::<Port>::new();
      for p in &module.ports {
        ports.push(Port {
          name          : p.name.clone(),
          bus           : None,
          clk_frequency : p.clk_frequency,
        });
      }
      for bus_if in &module.bus_interfaces {
        let endpoint = Endpoint::new(&fullpath, &bus_if.name);
        if pins.contains_key(&endpoint) {
          return Err(DescriptionError::DuplicatePin(endpoint.to_string()));
        }
        match ports.iter_mut().find(|p| p.name == bus_if.name) {
          Some(port) => port.bus = bus_if.bus.clone(),
          None => {
            ports.push(Port {
              name          : bus_if.name.clone(),
              bus           : bus_if.bus.clone(),
              clk_frequency : None,
            });
          }
        }
        if let Some(busname) = &bus_if.bus {
          pins.insert(endpoint.clone(), busname.clone());
          nets.entry(busname.clone())
              .or_insert_with(BTreeSet::new)
              .insert(endpoint);
        }
      }
      let block = Block {
        fullpath   : fullpath.clone(),
        btype      : vlnv_to_type(&module.vlnv),
        vlnv       : module.vlnv.clone(),
        revision   : module.revision,
        parameters : module.parameters.clone(),
        ports,
        address    : module.address,
      };
      blocks.insert(fullpath, block);
    }
    debug!("Parsed hardware description with {} blocks and {} buses", blocks.len(), nets.len());
    Ok(Self {
      timestamp : desc.timestamp.clone(),
      blocks,
      pins,
      nets,
    })
  }

  pub fn from_json_str(json : &str) -> Result<Self, DescriptionError> {
    let desc : HardwareDescription = serde_json::from_str(json)?;
    Self::from_description(&desc)
  }

  pub fn from_json_file(path : &Path) -> Result<Self, DescriptionError> {
    let json = read_to_string(path).map_err(|source| DescriptionError::Io {
      path : path.to_path_buf(),
      source
    })?;
    info!("Reading hardware description from {}", path.display());
    Self::from_json_str(&json)
  }

  /// Build timestamp, if the description carries one
  pub fn timestamp(&self) -> Option<&str> {
    self.timestamp.as_deref()
  }

  pub fn block(&self, name : &str) -> Option<&Block> {
    self.blocks.get(name)
  }

  /// All blocks, ordered by their full path
  pub fn blocks(&self) -> impl Iterator<Item = &Block> {
    self.blocks.values()
  }

  /// All blocks of a given (short) type, ordered by full path
  pub fn blocks_of_type<'a>(&'a self, btype : &'a str) -> impl Iterator<Item = &'a Block> + 'a {
    self.blocks.values().filter(move |b| b.btype == btype)
  }

  fn get_block(&self, name : &str) -> Result<&Block, TraceError> {
    self.blocks.get(name).ok_or_else(|| TraceError::UnknownBlock(String::from(name)))
  }

  /// The short type name of a block
  pub fn mod2type(&self, blockname : &str) -> Result<&str, TraceError> {
    Ok(&self.get_block(blockname)?.btype)
  }

  /// The core revision of a block
  pub fn mod2rev(&self, blockname : &str) -> Result<u32, TraceError> {
    Ok(self.get_block(blockname)?.revision)
  }

  /// Find the value of an IP parameter.
  ///
  /// This works for all IPs, including those which
  /// are not addressable.
  pub fn get_param(&self, blockname : &str, parname : &str) -> Result<&str, TraceError> {
    let block = self.get_block(blockname)?;
    match block.parameters.get(parname) {
      Some(value) => Ok(value),
      None => Err(TraceError::MissingParameter {
        block : String::from(blockname),
        param : String::from(parname)
      })
    }
  }

  /// Same as get_param, but parse the value
  pub fn get_param_as<T : FromStr>(&self, blockname : &str, parname : &str) -> Result<T, TraceError> {
    let value = self.get_param(blockname, parname)?;
    value.trim().parse::<T>().map_err(|_| TraceError::BadParameter {
      block : String::from(blockname),
      param : String::from(parname),
      value : String::from(value),
    })
  }

  /// Frequency of a clock port in MHz
  pub fn get_fclk(&self, blockname : &str, portname : &str) -> Result<f64, TraceError> {
    let block = self.get_block(blockname)?;
    let port  = block.port(portname).ok_or_else(|| TraceError::UnknownPort {
      block : String::from(blockname),
      port  : String::from(portname),
    })?;
    match port.clk_frequency {
      Some(freq) => Ok(freq/1e6),
      None => Err(TraceError::NoClock {
        block : String::from(blockname),
        port  : String::from(portname),
      })
    }
  }

  /// Find the blocks and ports which connect to this block and port.
  ///
  /// The port we started at and instrumentation endpoints
  /// are discarded. An empty result means the port is
  /// unconnected.
  pub fn trace_bus(&self, blockname : &str, portname : &str) -> Result<Vec<Endpoint>, TraceError> {
    let block = self.get_block(blockname)?;
    if block.port(portname).is_none() {
      return Err(TraceError::UnknownPort {
        block : String::from(blockname),
        port  : String::from(portname),
      });
    }
    let start = Endpoint::new(blockname, portname);
    let netname = match self.pins.get(&start) {
      None          => return Ok(Vec::new()),
      Some(netname) => netname
    };
    if netname == NOC_BUS {
      return Ok(Vec::new());
    }
    let mut result = Vec::<Endpoint>::new();
    if let Some(endpoints) = self.nets.get(netname) {
      for ep in endpoints {
        if *ep == start || ep.is_debug() {
          continue;
        }
        result.push(ep.clone());
      }
    }
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn small_graph() -> NetlistGraph {
    let desc = json!({
      "timestamp" : "Mon Oct 19 10:00:00 2026",
      "modules" : [
        { "fullpath" : "/src_0", "vlnv" : "vendor:user:axis_source:1.0",
          "parameters" : { "WIDTH" : "16" },
          "ports" : [ { "name" : "aclk", "clk_frequency" : 307200000.0 } ],
          "bus_interfaces" : [ { "name" : "m_axis", "bus" : "net_a" },
                               { "name" : "m_noc",  "bus" : "__NOC__" },
                               { "name" : "m_open" } ] },
        { "fullpath" : "sink_0", "vlnv" : "vendor:user:axis_sink:1.0",
          "bus_interfaces" : [ { "name" : "s_axis", "bus" : "net_a" } ] },
        { "fullpath" : "system_ila_0", "vlnv" : "xilinx.com:ip:system_ila:1.1",
          "bus_interfaces" : [ { "name" : "SLOT_0_AXIS", "bus" : "net_a" } ] },
        { "fullpath" : "noc_0", "vlnv" : "xilinx.com:ip:axi_noc:1.0",
          "bus_interfaces" : [ { "name" : "S00_AXI", "bus" : "__NOC__" } ] }
      ]
    });
    let desc : HardwareDescription = serde_json::from_value(desc).unwrap();
    NetlistGraph::from_description(&desc).unwrap()
  }

  #[test]
  fn vlnv_type() {
    assert_eq!(vlnv_to_type("Quantaser:user:axis_tomography:1.0"), "axis_tomography");
    assert_eq!(vlnv_to_type("xilinx.com:ip:axi_dma:7.1"), "axi_dma");
    assert_eq!(vlnv_to_type("plain"), "plain");
  }

  #[test]
  fn trace_bus_skips_self_and_ila() {
    let graph = small_graph();
    let result = graph.trace_bus("src_0", "m_axis").unwrap();
    assert_eq!(result, vec![Endpoint::new("sink_0", "s_axis")]);
    let back = graph.trace_bus("sink_0", "s_axis").unwrap();
    assert_eq!(back, vec![Endpoint::new("src_0", "m_axis")]);
  }

  #[test]
  fn trace_bus_unconnected() {
    let graph = small_graph();
    assert!(graph.trace_bus("src_0", "m_open").unwrap().is_empty());
    assert!(graph.trace_bus("src_0", "m_noc").unwrap().is_empty());
    assert!(matches!(graph.trace_bus("src_0", "nope"), Err(TraceError::UnknownPort {..})));
    assert!(matches!(graph.trace_bus("nope", "m_axis"), Err(TraceError::UnknownBlock(_))));
  }

  #[test]
  fn parameters_and_clocks() {
    let graph = small_graph();
    assert_eq!(graph.timestamp(), Some("Mon Oct 19 10:00:00 2026"));
    assert_eq!(graph.mod2type("src_0").unwrap(), "axis_source");
    assert_eq!(graph.get_param_as::<u32>("src_0", "WIDTH").unwrap(), 16);
    assert!(matches!(graph.get_param("src_0", "DEPTH"), Err(TraceError::MissingParameter {..})));
    assert!((graph.get_fclk("src_0", "aclk").unwrap() - 307.2).abs() < 1e-9);
    assert!(matches!(graph.get_fclk("src_0", "m_axis"), Err(TraceError::NoClock {..})));
  }

  #[test]
  fn duplicate_module_rejected() {
    let json = r#"{ "modules" : [ { "fullpath" : "a", "vlnv" : "v:l:x:1.0" },
                                  { "fullpath" : "/a", "vlnv" : "v:l:x:1.0" } ] }"#;
    assert!(matches!(NetlistGraph::from_json_str(json), Err(DescriptionError::DuplicateModule(_))));
  }
}
