//! Follow AXI-Stream connections through the
//! adapter blocks of a build
//!
//! Between the blocks we care about sit any number of
//! clock converters, register slices, broadcasters, FIFOs
//! and friends. They pass the stream through, so when
//! we meet one we continue at its other side.

use std::collections::{
    BTreeSet,
    HashSet,
    VecDeque,
};
use std::fmt;

use crate::errors::TraceError;
use crate::netlist::{
    Endpoint,
    NetlistGraph,
};

/// Where a trace ended up
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TraceResult {
  /// full path of the block we found
  pub block : String,
  /// the port of that block facing us
  pub port  : String,
  /// its short type
  pub btype : String,
}

impl fmt::Display for TraceResult {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<{}/{} [{}]>", self.block, self.port, self.btype)
  }
}

/// The input port to continue at when walking
/// backwards through a block of type `btype`, entered
/// at its output `port`.
fn upstream_port(btype : &str, port : &str) -> Option<String> {
  match btype {
    "axis_clock_converter"
    | "axis_dwidth_converter"
    | "axis_register_slice"
    | "axis_broadcaster"
    | "axis_sg_pulse"         => Some(String::from("S_AXIS")),
    // m4_axis -> s4_axis
    "axis_cdcsync_v1"         => Some(format!("s{}", port.get(1..).unwrap_or(""))),
    "sg_translator"           => Some(String::from("s_tproc_axis")),
    "axis_resampler_2x1_v1"   => Some(String::from("s_axis")),
    _                         => None
  }
}

/// Walks a `NetlistGraph`. Holds no state of its own
/// besides the graph reference, so any number of traces
/// can run from the same tracer.
pub struct PortTracer<'a> {
  graph : &'a NetlistGraph,
}

impl<'a> PortTracer<'a> {

  pub fn new(graph : &'a NetlistGraph) -> Self {
    Self { graph }
  }

  /// The output ports to continue at when walking
  /// forward through a block, None if the block
  /// does not pass streams through.
  fn downstream_ports(&self, block : &str, btype : &str) -> Result<Option<Vec<String>>, TraceError> {
    let ports = match btype {
      "axis_broadcaster" => {
        let n_out : usize = self.graph.get_param_as(block, "NUM_MI")?;
        (0..n_out).map(|k| format!("M{:02}_AXIS", k)).collect()
      }
      "axis_clock_converter"
      | "axis_dwidth_converter"
      | "axis_register_slice"
      | "axis_data_fifo"
      | "fifo_generator"         => vec![String::from("M_AXIS")],
      "axis_register_slice_nb"   => vec![String::from("m_axis")],
      "smartconnect"
      | "axi_interconnect"       => vec![String::from("M00_AXI")],
      "axis_chirp_mux"
      | "axis_wf_mux"            => vec![String::from("M00_AXIS")],
      _                          => return Ok(None)
    };
    Ok(Some(ports))
  }

  /// Follow the stream backwards from the input `start_port`
  /// of `start_block` until a block of one of `goal_types`
  /// is found.
  ///
  /// Returns `Ok(None)` if the start port itself is
  /// unconnected. Hitting an unknown block type, an
  /// unconnected or ambiguous adapter input or running
  /// in a circle is an error.
  pub fn trace_back(&self, start_block : &str, start_port : &str, goal_types : &[&str])
    -> Result<Option<TraceResult>, TraceError> {
    let start    = Endpoint::new(start_block, start_port);
    let mut here = start.clone();
    let mut visited = HashSet::<Endpoint>::new();
    loop {
      if !visited.insert(here.clone()) {
        return Err(TraceError::Loop {
          start : start.to_string(),
          block : here.block,
          port  : here.port,
        });
      }
      let mut peers = self.graph.trace_bus(&here.block, &here.port)?;
      if peers.is_empty() {
        if here == start {
          return Ok(None);
        }
        return Err(TraceError::Dangling {
          start : start.to_string(),
          block : here.block,
          port  : here.port,
        });
      }
      if peers.len() > 1 {
        return Err(TraceError::Ambiguous {
          start       : start.to_string(),
          block       : here.block,
          port        : here.port,
          n_endpoints : peers.len(),
        });
      }
      let peer  = peers.remove(0);
      let btype = self.graph.mod2type(&peer.block)?;
      if goal_types.contains(&btype) {
        return Ok(Some(TraceResult {
          block : peer.block,
          port  : peer.port,
          btype : String::from(btype),
        }));
      }
      match upstream_port(btype, &peer.port) {
        Some(port) => {
          trace!("Tracing back from {} through {} [{}]", start, peer, btype);
          here = Endpoint::new(&peer.block, &port);
        }
        None => {
          return Err(TraceError::UnrecognizedBlock {
            start : start.to_string(),
            block : peer.block,
            btype : String::from(btype),
          });
        }
      }
    }
  }

  /// Follow the stream forward from the output `start_port`
  /// of `start_block`, following every branch.
  ///
  /// Blocks of `goal_types` are collected, blocks which
  /// do not pass the stream on are dead ends. Both come
  /// back sorted, so the outcome does not depend on the
  /// order of the hardware description. With
  /// `expected_count` set, any other number of matches
  /// is an error.
  pub fn trace_forward(&self,
                       start_block    : &str,
                       start_port     : &str,
                       goal_types     : &[&str],
                       expected_count : Option<usize>)
    -> Result<Vec<TraceResult>, TraceError> {
    let mut to_check  = VecDeque::<Endpoint>::new();
    let mut visited   = HashSet::<Endpoint>::new();
    let mut found     = BTreeSet::<TraceResult>::new();
    let mut dead_ends = BTreeSet::<String>::new();
    to_check.push_back(Endpoint::new(start_block, start_port));
    while let Some(here) = to_check.pop_front() {
      if !visited.insert(here.clone()) {
        continue;
      }
      let peers = self.graph.trace_bus(&here.block, &here.port)?;
      if peers.is_empty() && (here.block != start_block || here.port != start_port) {
        dead_ends.insert(here.to_string());
      }
      for peer in peers {
        let btype = self.graph.mod2type(&peer.block)?;
        if goal_types.contains(&btype) {
          found.insert(TraceResult {
            block : peer.block,
            port  : peer.port,
            btype : String::from(btype),
          });
          continue;
        }
        match self.downstream_ports(&peer.block, btype)? {
          Some(ports) => {
            for port in ports {
              to_check.push_back(Endpoint::new(&peer.block, &port));
            }
          }
          None => {
            dead_ends.insert(peer.to_string());
          }
        }
      }
    }
    let found : Vec<TraceResult> = found.into_iter().collect();
    if let Some(expected) = expected_count {
      if found.len() != expected {
        return Err(TraceError::CountMismatch {
          start      : format!("{}/{}", start_block, start_port),
          goal_types : goal_types.iter().map(|t| String::from(*t)).collect(),
          expected,
          found,
          dead_ends  : dead_ends.into_iter().collect(),
        });
      }
    }
    Ok(found)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::netlist::HardwareDescription;
  use serde_json::{json, Value};

  fn module(path : &str, btype : &str, ifaces : &[(&str, Option<&str>)]) -> Value {
    let ifaces : Vec<Value> = ifaces.iter()
      .map(|(name, bus)| json!({ "name" : name, "bus" : bus }))
      .collect();
    json!({ "fullpath" : path,
            "vlnv"     : format!("vendor:ip:{}:1.0", btype),
            "bus_interfaces" : ifaces })
  }

  fn graph_from(modules : Vec<Value>) -> NetlistGraph {
    let desc : HardwareDescription = serde_json::from_value(json!({ "modules" : modules })).unwrap();
    NetlistGraph::from_description(&desc).unwrap()
  }

  #[test]
  fn back_through_cdcsync_and_slice() {
    let graph = graph_from(vec![
      module("rfdc",  "usp_rf_data_converter", &[("m00_axis", Some("a"))]),
      module("cdc",   "axis_cdcsync_v1",       &[("s0_axis", Some("a")), ("m0_axis", Some("b"))]),
      module("slice", "axis_register_slice",   &[("S_AXIS", Some("b")), ("M_AXIS", Some("c"))]),
      module("tomo",  "axis_tomography",       &[("S0_ADC", Some("c")), ("S1_ADC", None)]),
    ]);
    let tracer = PortTracer::new(&graph);
    let result = tracer.trace_back("tomo", "S0_ADC", &["usp_rf_data_converter"]).unwrap();
    assert_eq!(result, Some(TraceResult {
      block : String::from("rfdc"),
      port  : String::from("m00_axis"),
      btype : String::from("usp_rf_data_converter"),
    }));
    assert_eq!(tracer.trace_back("tomo", "S1_ADC", &["usp_rf_data_converter"]).unwrap(), None);
  }

  #[test]
  fn back_through_translator() {
    let graph = graph_from(vec![
      module("tproc", "axis_tproc64x32_x8",  &[("m0_axis", Some("a"))]),
      module("sg",    "sg_translator",       &[("s_tproc_axis", Some("a")), ("m_gen_v6_axis", Some("b"))]),
      module("gen",   "axis_signal_gen_v6",  &[("s1_axis", Some("b"))]),
    ]);
    let tracer = PortTracer::new(&graph);
    let result = tracer.trace_back("gen", "s1_axis", &["axis_tproc64x32_x8"]).unwrap().unwrap();
    assert_eq!(result.block, "tproc");
    assert_eq!(result.port,  "m0_axis");
  }

  #[test]
  fn back_failures() {
    let graph = graph_from(vec![
      module("mystery", "axis_mystery",       &[("M_AXIS", Some("a"))]),
      module("slice",   "axis_register_slice",&[("S_AXIS", None), ("M_AXIS", Some("b"))]),
      module("tomo",    "axis_tomography",    &[("S0_ADC", Some("a")), ("S1_ADC", Some("b"))]),
    ]);
    let tracer = PortTracer::new(&graph);
    assert!(matches!(tracer.trace_back("tomo", "S0_ADC", &["usp_rf_data_converter"]),
                     Err(TraceError::UnrecognizedBlock {..})));
    assert!(matches!(tracer.trace_back("tomo", "S1_ADC", &["usp_rf_data_converter"]),
                     Err(TraceError::Dangling {..})));
  }

  #[test]
  fn back_in_a_circle() {
    let graph = graph_from(vec![
      module("s0", "axis_register_slice", &[("S_AXIS", Some("b")), ("M_AXIS", Some("a"))]),
      module("s1", "axis_register_slice", &[("S_AXIS", Some("a")), ("M_AXIS", Some("b"))]),
    ]);
    let tracer = PortTracer::new(&graph);
    assert!(matches!(tracer.trace_back("s0", "S_AXIS", &["usp_rf_data_converter"]),
                     Err(TraceError::Loop {..})));
  }

  #[test]
  fn forward_through_broadcaster() {
    let graph = graph_from(vec![
      module("tomo",  "axis_tomography",  &[("M0_ADC", Some("a"))]),
      module("bc",    "axis_broadcaster", &[("S_AXIS", Some("a")), ("M00_AXIS", Some("b")),
                                            ("M01_AXIS", Some("c")), ("M02_AXIS", None)]),
      module("fifo",  "axis_data_fifo",   &[("S_AXIS", Some("b")), ("M_AXIS", Some("d"))]),
      module("dma_1", "axi_dma",          &[("S_AXIS_S2MM", Some("d"))]),
      module("dma_0", "axi_dma",          &[("S_AXIS_S2MM", Some("c"))]),
    ]);
    assert_eq!(graph.mod2type("bc").unwrap(), "axis_broadcaster");
    // NUM_MI is missing, so the broadcaster can not be followed
    let tracer = PortTracer::new(&graph);
    assert!(matches!(tracer.trace_forward("tomo", "M0_ADC", &["axi_dma"], None),
                     Err(TraceError::MissingParameter {..})));

    let mut with_param = vec![
      module("tomo",  "axis_tomography",  &[("M0_ADC", Some("a"))]),
      module("fifo",  "axis_data_fifo",   &[("S_AXIS", Some("b")), ("M_AXIS", Some("d"))]),
      module("dma_1", "axi_dma",          &[("S_AXIS_S2MM", Some("d"))]),
      module("dma_0", "axi_dma",          &[("S_AXIS_S2MM", Some("c"))]),
      module("sink",  "axis_terminator",  &[("S_AXIS", Some("e"))]),
    ];
    let mut bc = module("bc", "axis_broadcaster", &[("S_AXIS", Some("a")), ("M00_AXIS", Some("b")),
                                                  ("M01_AXIS", Some("c")), ("M02_AXIS", Some("e"))]);
    bc["parameters"] = json!({ "NUM_MI" : "3" });
    with_param.push(bc);
    let graph  = graph_from(with_param);
    let tracer = PortTracer::new(&graph);
    let found  = tracer.trace_forward("tomo", "M0_ADC", &["axi_dma"], Some(2)).unwrap();
    let blocks : Vec<&str> = found.iter().map(|r| r.block.as_str()).collect();
    assert_eq!(blocks, vec!["dma_0", "dma_1"]);
    match tracer.trace_forward("tomo", "M0_ADC", &["axi_dma"], Some(1)) {
      Err(TraceError::CountMismatch { expected, found, dead_ends, .. }) => {
        assert_eq!(expected, 1);
        assert_eq!(found.len(), 2);
        assert_eq!(dead_ends, vec![String::from("sink/S_AXIS")]);
      }
      other => panic!("Unexpected result {:?}", other),
    }
  }

  #[test]
  fn forward_is_order_independent() {
    use rand::seq::SliceRandom;
    use rand::thread_rng;
    let mut modules = vec![
      module("tomo",  "axis_tomography",       &[("M0_DAC", Some("a"))]),
      module("slice", "axis_register_slice",   &[("S_AXIS", Some("a")), ("M_AXIS", Some("b"))]),
      module("cc",    "axis_clock_converter",  &[("S_AXIS", Some("b")), ("M_AXIS", Some("c"))]),
      module("nb",    "axis_register_slice_nb",&[("s_axis", Some("c")), ("m_axis", Some("d"))]),
      module("rfdc",  "usp_rf_data_converter", &[("s00_axis", Some("d"))]),
    ];
    let reference = {
      let graph = graph_from(modules.clone());
      PortTracer::new(&graph).trace_forward("tomo", "M0_DAC", &["usp_rf_data_converter"], Some(1)).unwrap()
    };
    assert_eq!(reference[0].port, "s00_axis");
    let mut rng = thread_rng();
    for _ in 0..20 {
      modules.shuffle(&mut rng);
      let graph = graph_from(modules.clone());
      let result = PortTracer::new(&graph)
        .trace_forward("tomo", "M0_DAC", &["usp_rf_data_converter"], Some(1)).unwrap();
      assert_eq!(result, reference);
    }
  }
}
