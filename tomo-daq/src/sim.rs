//! A simulated fabric
//!
//! Register windows and DMA memory live in plain
//! process memory. Emulators for the tomography block
//! and the AXI DMA engines act on them the way the
//! hardware would, so the whole acquisition chain can
//! run without a board:
//!
//! * DMA engines: run/stop, soft reset, idle/halted
//!   status and one pending transfer which is filled
//!   when the block has data
//! * tomography block: a run starts when `start`
//!   rises and is reset when it falls. Every cycle
//!   produces `tri_limit` events, delivered to the
//!   three DMA engines, then the cycle counter advances.
//!   While a transfer is not armed the block holds its
//!   data and, after a while, flags an overflow.
//!
//! `demo_description` provides a matching hardware
//! description.

use std::collections::BTreeMap;
use std::sync::{
    Arc,
    Mutex,
    RwLock,
};
use std::sync::atomic::{
    AtomicBool,
    AtomicU32,
    Ordering,
};
use std::thread;
use std::thread::JoinHandle;
use std::time::{
    Duration,
    Instant,
};

use tomo_lib::constants::{
    AXI_DMA_TYPE,
    DMA_DC_PORT,
    DMA_GRAPHY_PORT,
    DMA_TIME_PORT,
    TOMOGRAPHY_TYPE,
};
use tomo_lib::errors::TraceError;
use tomo_lib::netlist::{
    AddressWindow,
    BusInterfaceDescription,
    HardwareDescription,
    ModuleDescription,
    PortDescription,
};
use tomo_lib::{
    NetlistGraph,
    PortTracer,
};

use crate::buffers::GRAPHY_SAMPLES_PER_EVENT;
use crate::engine::lock;
use crate::errors::RegisterError;
use crate::memory::{
    DmaMemory,
    Platform,
    WordWindow,
    DMA_ALIGNMENT,
    align_up,
    SIZEOF_U32,
};
use crate::registers::{
    DmaReg,
    RegisterMap,
    TomoReg,
};

/// Called after every write with the word offset
/// and the written value
pub type WriteHook = Box<dyn Fn(&SimWindow, usize, u32) + Send + Sync>;

/// Physical address of the first simulated DMA buffer
pub const SIM_POOL_BASE : u64 = 0x7000_0000;

/// A register window in process memory
pub struct SimWindow {
  words : Vec<AtomicU32>,
  hook  : RwLock<Option<WriteHook>>,
}

impl SimWindow {
  pub fn new(n_words : usize) -> Self {
    Self {
      words : (0..n_words).map(|_| AtomicU32::new(0)).collect(),
      hook  : RwLock::new(None),
    }
  }

  pub fn peek(&self, offset : usize) -> u32 {
    self.words[offset].load(Ordering::SeqCst)
  }

  /// Write without triggering the hook, this is
  /// what the emulated hardware uses
  pub fn poke(&self, offset : usize, value : u32) {
    self.words[offset].store(value, Ordering::SeqCst);
  }

  pub fn set_hook(&self, hook : WriteHook) {
    match self.hook.write() {
      Ok(mut slot)      => *slot = Some(hook),
      Err(poisoned)     => *poisoned.into_inner() = Some(hook),
    }
  }
}

impl WordWindow for SimWindow {
  fn n_words(&self) -> usize {
    self.words.len()
  }

  fn read_word(&self, offset : usize) -> u32 {
    self.peek(offset)
  }

  fn write_word(&self, offset : usize, value : u32) {
    self.poke(offset, value);
    let hook = match self.hook.read() {
      Ok(hook)      => hook,
      Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(hook) = hook.as_ref() {
      hook(self, offset, value);
    }
  }
}

/// DMA-able memory in process memory
pub struct SimMemory {
  phys_addr : u64,
  data      : Mutex<Vec<u8>>,
}

impl SimMemory {
  pub fn new(phys_addr : u64, len : usize) -> Self {
    Self {
      phys_addr,
      data : Mutex::new(vec![0u8; len]),
    }
  }

  /// Write as much of `bytes` as fits, starting at
  /// `offset`. Returns the number of bytes written.
  pub fn write_bytes(&self, offset : usize, bytes : &[u8]) -> usize {
    let mut data = lock(&self.data);
    if offset >= data.len() {
      return 0;
    }
    let n = bytes.len().min(data.len() - offset);
    data[offset..offset + n].copy_from_slice(&bytes[..n]);
    n
  }
}

impl DmaMemory for SimMemory {
  fn phys_addr(&self) -> u64 {
    self.phys_addr
  }

  fn len(&self) -> usize {
    lock(&self.data).len()
  }

  fn read_bytes(&self, offset : usize, dst : &mut [u8]) {
    let data = lock(&self.data);
    dst.copy_from_slice(&data[offset..offset + dst.len()]);
  }
}

/// A transfer the worker has armed
#[derive(Debug, Copy, Clone)]
struct PendingTransfer {
  addr   : u64,
  nbytes : usize,
}

/// The S2MM channel of an emulated AXI DMA engine
pub struct SimDma {
  window  : Arc<SimWindow>,
  pending : Arc<Mutex<Option<PendingTransfer>>>,
}

impl SimDma {
  fn attach(window : Arc<SimWindow>) -> Self {
    let pending = Arc::new(Mutex::new(None::<PendingTransfer>));
    let hook_pending = pending.clone();
    window.set_hook(Box::new(move |w : &SimWindow, offset : usize, value : u32| {
      if offset == DmaReg::Dmacr.offset() {
        let sr = w.peek(DmaReg::Dmasr.offset());
        if value & DmaReg::CR_RESET != 0 {
          // reset completes at once
          *lock(&hook_pending) = None;
          w.poke(DmaReg::Dmacr.offset(), 0);
          w.poke(DmaReg::Dmasr.offset(), DmaReg::SR_HALTED);
        } else if value & DmaReg::CR_RUN_STOP != 0 {
          w.poke(DmaReg::Dmasr.offset(), sr & !DmaReg::SR_HALTED);
        } else {
          w.poke(DmaReg::Dmasr.offset(), sr | DmaReg::SR_HALTED);
        }
      } else if offset == DmaReg::Length.offset() {
        let sr = w.peek(DmaReg::Dmasr.offset());
        let running = w.peek(DmaReg::Dmacr.offset()) & DmaReg::CR_RUN_STOP != 0
          && sr & DmaReg::SR_HALTED == 0;
        if running {
          let addr = w.peek(DmaReg::Da.offset()) as u64
            | ((w.peek(DmaReg::DaMsb.offset()) as u64) << 32);
          *lock(&hook_pending) = Some(PendingTransfer { addr, nbytes : value as usize });
          w.poke(DmaReg::Dmasr.offset(), sr & !DmaReg::SR_IDLE);
        }
      }
    }));
    Self { window, pending }
  }

  /// A transfer is waiting for data
  pub fn is_armed(&self) -> bool {
    lock(&self.pending).is_some()
  }

  /// Complete the pending transfer with `bytes` (cut
  /// to the armed length). False if nothing was armed.
  pub fn deliver(&self, platform : &SimPlatform, bytes : &[u8]) -> bool {
    let transfer = match lock(&self.pending).take() {
      None           => return false,
      Some(transfer) => transfer
    };
    let n = bytes.len().min(transfer.nbytes);
    let written = match platform.memory_at(transfer.addr) {
      None => {
        self.set_error(DmaReg::SR_DECODE);
        return true;
      }
      Some((memory, offset)) => memory.write_bytes(offset, &bytes[..n])
    };
    self.window.poke(DmaReg::Length.offset(), written as u32);
    let sr = self.window.peek(DmaReg::Dmasr.offset());
    self.window.poke(DmaReg::Dmasr.offset(), sr | DmaReg::SR_IDLE);
    true
  }

  /// Raise one of the error bits of the status register
  pub fn set_error(&self, bit : u32) {
    let sr = self.window.peek(DmaReg::Dmasr.offset());
    self.window.poke(DmaReg::Dmasr.offset(), sr | bit);
  }
}

/// Register windows and DMA memory of a simulated board
pub struct SimPlatform {
  windows   : Mutex<BTreeMap<u64, Arc<SimWindow>>>,
  dmas      : Mutex<BTreeMap<u64, Arc<SimDma>>>,
  memories  : Mutex<Vec<Arc<SimMemory>>>,
  next_phys : Mutex<u64>,
}

impl SimPlatform {
  pub fn new() -> Self {
    Self {
      windows   : Mutex::new(BTreeMap::new()),
      dmas      : Mutex::new(BTreeMap::new()),
      memories  : Mutex::new(Vec::new()),
      next_phys : Mutex::new(SIM_POOL_BASE),
    }
  }

  /// The window at `base`, created with `n_words`
  /// words if it does not exist yet
  pub fn window(&self, base : u64, n_words : usize) -> Arc<SimWindow> {
    lock(&self.windows)
      .entry(base)
      .or_insert_with(|| Arc::new(SimWindow::new(n_words)))
      .clone()
  }

  /// Give the window at `base` AXI DMA behaviour
  pub fn attach_dma(&self, base : u64) -> Arc<SimDma> {
    let window = self.window(base, DmaReg::span());
    lock(&self.dmas)
      .entry(base)
      .or_insert_with(|| Arc::new(SimDma::attach(window)))
      .clone()
  }

  /// The buffer holding physical address `phys`
  /// and the offset into it
  pub fn memory_at(&self, phys : u64) -> Option<(Arc<SimMemory>, usize)> {
    lock(&self.memories)
      .iter()
      .find(|m| phys >= m.phys_addr && phys < m.phys_addr + m.len() as u64)
      .map(|m| (m.clone(), (phys - m.phys_addr) as usize))
  }
}

impl Default for SimPlatform {
  fn default() -> Self {
    Self::new()
  }
}

impl Platform for SimPlatform {
  fn map_window(&self, name : &str, window : &AddressWindow)
    -> Result<Arc<dyn WordWindow>, RegisterError> {
    trace!("Simulated window for {} at 0x{:x}", name, window.base);
    Ok(self.window(window.base, window.range as usize / SIZEOF_U32))
  }

  fn allocate(&self, nbytes : usize) -> Result<Arc<dyn DmaMemory>, RegisterError> {
    let mut next = lock(&self.next_phys);
    let memory   = Arc::new(SimMemory::new(*next, nbytes));
    *next = align_up(*next + nbytes.max(1) as u64, DMA_ALIGNMENT);
    lock(&self.memories).push(memory.clone());
    Ok(memory)
  }
}

/// Knobs for the emulated tomography block
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SimBehaviour {
  /// time the block needs for one cycle
  pub cycle_period   : Duration,
  /// flag an error instead of finishing this cycle
  pub fault_at_cycle : Option<u32>,
  /// flag an error when data can not be delivered
  /// for this long
  pub overflow_after : Option<Duration>,
  /// clocks between two events. The event clock
  /// runs on across cycles and runs
  pub time_stride    : u32,
}

impl SimBehaviour {
  pub fn new() -> Self {
    Self {
      cycle_period   : Duration::from_millis(2),
      fault_at_cycle : None,
      overflow_after : None,
      time_stride    : 1000,
    }
  }
}

impl Default for SimBehaviour {
  fn default() -> Self {
    Self::new()
  }
}

/// Run state of the emulated block
struct EmulatorState {
  running       : bool,
  faulted       : bool,
  /// counts rising edges of start
  run_seq       : u32,
  cycle         : u32,
  /// events emitted since the emulator came up
  n_emitted     : u32,
  ready_at      : Instant,
  waiting_since : Option<Instant>,
}

/// Decision samples of the simulated events identify
/// the run and the cycle they were taken in
pub fn sim_decision_value(run_seq : u32, cycle : u32) -> i16 {
  ((run_seq % 100) * 100 + cycle % 100) as i16
}

/// Waveform samples are a sawtooth over the stream
pub fn sim_waveform_sample(index : usize) -> i16 {
  (index % 1000) as i16
}

fn event_data(first : u32, n_events : usize, interpolation : usize, stride : u32, decision : i16)
  -> [Vec<u8>; 3] {
  let mut times  = Vec::<u8>::with_capacity(n_events * 4);
  for k in 0..n_events {
    let t = (first + k as u32 + 1).wrapping_mul(stride);
    times.extend_from_slice(&t.to_le_bytes());
  }
  let mut dc = Vec::<u8>::with_capacity(n_events * interpolation * 2);
  for _ in 0..n_events * interpolation {
    dc.extend_from_slice(&decision.to_le_bytes());
  }
  let n_samples  = n_events * GRAPHY_SAMPLES_PER_EVENT;
  let mut graphy = Vec::<u8>::with_capacity(n_samples * 2);
  for j in 0..n_samples {
    graphy.extend_from_slice(&sim_waveform_sample(j).to_le_bytes());
  }
  [times, dc, graphy]
}

/// Emulates one tomography block in its own thread
pub struct SimTomography {
  stop   : Arc<AtomicBool>,
  handle : Option<JoinHandle<()>>,
}

impl SimTomography {

  /// # Arguments
  ///
  /// * tomo_base : address of the block's register window
  /// * dma_bases : addresses of the time, dc and graphy DMA engines
  pub fn spawn(platform      : Arc<SimPlatform>,
               tomo_base     : u64,
               dma_bases     : [u64; 3],
               interpolation : usize,
               behaviour     : SimBehaviour) -> Self {
    let tomo  = platform.window(tomo_base, TomoReg::span());
    let dmas : Vec<Arc<SimDma>> = dma_bases.iter().map(|b| platform.attach_dma(*b)).collect();
    let state = Arc::new(Mutex::new(EmulatorState {
      running       : false,
      faulted       : false,
      run_seq       : 0,
      cycle         : 0,
      n_emitted     : 0,
      ready_at      : Instant::now(),
      waiting_since : None,
    }));
    let hook_state = state.clone();
    let period     = behaviour.cycle_period;
    tomo.set_hook(Box::new(move |w : &SimWindow, offset : usize, value : u32| {
      if offset != TomoReg::Start.offset() {
        return;
      }
      let mut st = lock(&hook_state);
      if value == 0 {
        st.running = false;
        w.poke(TomoReg::RxState.offset(), 0);
      } else if !st.running {
        st.running       = true;
        st.faulted       = false;
        st.run_seq      += 1;
        st.cycle         = 0;
        st.ready_at      = Instant::now() + period;
        st.waiting_since = None;
        w.poke(TomoReg::RxState.offset(), 0);
      }
    }));
    let stop    = Arc::new(AtomicBool::new(false));
    let stop_em = stop.clone();
    let handle  = thread::Builder::new()
      .name(format!("sim-tomo-{:x}", tomo_base))
      .spawn(move || {
        while !stop_em.load(Ordering::SeqCst) {
          emulate_step(&platform, &tomo, &dmas, &state, interpolation, &behaviour);
          thread::sleep(Duration::from_micros(50));
        }
      });
    let handle = match handle {
      Err(err) => {
        error!("Unable to spawn the emulator! {}", err);
        None
      }
      Ok(handle) => Some(handle)
    };
    Self { stop, handle }
  }
}

fn emulate_step(platform      : &SimPlatform,
                tomo          : &SimWindow,
                dmas          : &[Arc<SimDma>],
                state         : &Mutex<EmulatorState>,
                interpolation : usize,
                behaviour     : &SimBehaviour) {
  let mut st = lock(state);
  if !st.running || st.faulted {
    return;
  }
  if st.cycle >= tomo.peek(TomoReg::Cycle.offset()) {
    return;
  }
  let now = Instant::now();
  if now < st.ready_at {
    return;
  }
  let counter = st.cycle & TomoReg::COUNTER_MASK;
  if behaviour.fault_at_cycle == Some(st.cycle) {
    tomo.poke(TomoReg::RxState.offset(), TomoReg::ERROR_BIT | counter);
    st.faulted = true;
    return;
  }
  if !dmas.iter().all(|d| d.is_armed()) {
    // nowhere to put the data
    if let Some(limit) = behaviour.overflow_after {
      let since = *st.waiting_since.get_or_insert(now);
      if now - since > limit {
        tomo.poke(TomoReg::RxState.offset(), TomoReg::ERROR_BIT | counter);
        st.faulted = true;
      }
    }
    return;
  }
  let n_events = tomo.peek(TomoReg::TriLimit.offset()) as usize;
  let decision = sim_decision_value(st.run_seq, st.cycle);
  let streams  = event_data(st.n_emitted, n_events, interpolation, behaviour.time_stride, decision);
  for (dma, bytes) in dmas.iter().zip(streams.iter()) {
    dma.deliver(platform, bytes);
  }
  tomo.poke(TomoReg::RxTagCnt.offset(),  n_events as u32);
  tomo.poke(TomoReg::RxDataCnt.offset(), (n_events * GRAPHY_SAMPLES_PER_EVENT) as u32);
  st.cycle     += 1;
  st.n_emitted  = st.n_emitted.wrapping_add(n_events as u32);
  tomo.poke(TomoReg::RxState.offset(), st.cycle & TomoReg::COUNTER_MASK);
  st.ready_at      = now + behaviour.cycle_period;
  st.waiting_since = None;
}

impl Drop for SimTomography {
  fn drop(&mut self) {
    self.stop.store(true, Ordering::SeqCst);
    if let Some(handle) = self.handle.take() {
      if handle.join().is_err() {
        error!("Emulator thread panicked!");
      }
    }
  }
}

/// Start an emulator for every addressable tomography
/// block of the graph, wired to the DMA engines its
/// streams end up at
pub fn spawn_emulators(graph     : &NetlistGraph,
                       platform  : &Arc<SimPlatform>,
                       behaviour : SimBehaviour)
  -> Result<Vec<SimTomography>, TraceError> {
  let tracer = PortTracer::new(graph);
  let mut emulators = Vec::<SimTomography>::new();
  for block in graph.blocks_of_type(TOMOGRAPHY_TYPE) {
    let tomo_window = match block.address {
      None         => continue,
      Some(window) => window
    };
    let mut dma_bases = [0u64; 3];
    for (k, port) in [DMA_TIME_PORT, DMA_DC_PORT, DMA_GRAPHY_PORT].iter().enumerate() {
      let found = tracer.trace_forward(&block.fullpath, port, &[AXI_DMA_TYPE], Some(1))?;
      let dma   = graph.block(&found[0].block)
        .ok_or_else(|| TraceError::UnknownBlock(found[0].block.clone()))?;
      dma_bases[k] = match dma.address {
        None         => return Err(TraceError::MissingParameter {
          block : dma.fullpath.clone(),
          param : String::from("address"),
        }),
        Some(window) => window.base
      };
    }
    let interpolation : usize = graph.get_param_as(&block.fullpath, "INTERPOLATION")?;
    debug!("Emulating {} at 0x{:x}", block.fullpath, tomo_window.base);
    emulators.push(SimTomography::spawn(platform.clone(),
                                        tomo_window.base,
                                        dma_bases,
                                        interpolation.max(1),
                                        behaviour));
  }
  Ok(emulators)
}

//============ demo description ============

fn bus_if(name : &str, bus : &str) -> BusInterfaceDescription {
  BusInterfaceDescription {
    name : String::from(name),
    bus  : Some(String::from(bus)),
  }
}

fn module(fullpath : &str,
          vlnv     : &str,
          params   : &[(&str, &str)],
          ifaces   : Vec<BusInterfaceDescription>,
          address  : Option<AddressWindow>) -> ModuleDescription {
  ModuleDescription {
    fullpath       : format!("/{}", fullpath),
    vlnv           : String::from(vlnv),
    revision       : 1,
    parameters     : params.iter().map(|(k, v)| (String::from(*k), String::from(*v))).collect(),
    ports          : Vec::new(),
    bus_interfaces : ifaces,
    address,
  }
}

/// Base address of the `k`th tomography block
pub fn demo_tomo_base(k : usize) -> u64 {
  0xA000_0000 + 0x10000 * k as u64
}

/// Base address of DMA engine `j` (time, dc, graphy)
/// of the `k`th tomography block
pub fn demo_dma_base(k : usize, j : usize) -> u64 {
  0xA010_0000 + 0x30000 * k as u64 + 0x10000 * j as u64
}

/// A build with `n_channels` tomography blocks, each
/// on its own converter tile, with register slices,
/// clock domain crossings, a FIFO and an ILA in the
/// stream paths.
///
/// # Panics
///
/// The converter has 4 tiles, so at most 4 channels
pub fn demo_description(n_channels : usize) -> HardwareDescription {
  assert!(n_channels <= 4, "the converter has 4 tiles");
  let mut rfdc_params = BTreeMap::<String, String>::new();
  let mut set = |k : String, v : &str| { rfdc_params.insert(k, String::from(v)); };
  set(String::from("C_High_Speed_ADC"), "0");
  for tile in 0..4 {
    let enabled = tile < n_channels;
    for (kind, fs, mode_name, mode) in [("DAC", "4.9152", "Interpolation", "4"),
                                        ("ADC", "2.4576", "Decimation",    "2")] {
      set(format!("C_{}{}_Enable", kind, tile), if enabled { "1" } else { "0" });
      set(format!("C_{}{}_Fabric_Freq", kind, tile), "307.200");
      set(format!("C_{}{}_Refclk_Freq", kind, tile), "245.760");
      set(format!("C_{}{}_FBDIV", kind, tile), "20");
      set(format!("C_{}{}_Refclk_Div", kind, tile), "1");
      set(format!("C_{}{}_OutDiv", kind, tile), "1");
      set(format!("C_{}{}_Sampling_Rate", kind, tile), fs);
      for slice in 0..4 {
        let on = enabled && slice == 0;
        set(format!("C_{}_Slice{}{}_Enable", kind, tile, slice), if on { "true" } else { "false" });
        set(format!("C_{}_{}_Mode{}{}", kind, mode_name, tile, slice), if on { mode } else { "0" });
      }
    }
  }
  let mut rfdc_ifaces = Vec::<BusInterfaceDescription>::new();
  let mut modules     = Vec::<ModuleDescription>::new();
  for k in 0..n_channels {
    rfdc_ifaces.push(bus_if(&format!("s{}0_axis", k), &format!("dac_{}", k)));
    rfdc_ifaces.push(bus_if(&format!("m{}0_axis", k), &format!("adc_raw_{}", k)));

    let mut tomo = module(&format!("axis_tomography_{}", k),
                          "Quantaser:user:axis_tomography:1.0",
                          &[("INTERPOLATION", "4")],
                          vec![bus_if("M0_DAC", &format!("tx_{}", k)),
                               bus_if("S0_ADC", &format!("rx_{}", k)),
                               bus_if("M0_ADC", &format!("time_{}", k)),
                               bus_if("M1_ADC", &format!("dc_{}", k)),
                               bus_if("M2_ADC", &format!("graphy_{}", k))],
                          Some(AddressWindow { base : demo_tomo_base(k), range : 0x10000 }));
    tomo.ports.push(PortDescription { name : String::from("s_axi_aclk"), clk_frequency : Some(99_999_001.0) });
    modules.push(tomo);
    modules.push(module(&format!("axis_register_slice_{}", k),
                        "xilinx.com:ip:axis_register_slice:1.1", &[],
                        vec![bus_if("S_AXIS", &format!("tx_{}", k)),
                             bus_if("M_AXIS", &format!("dac_{}", k))],
                        None));
    modules.push(module(&format!("axis_cdcsync_v1_{}", k),
                        "user.org:user:axis_cdcsync_v1:1.0", &[],
                        vec![bus_if("s0_axis", &format!("adc_raw_{}", k)),
                             bus_if("m0_axis", &format!("rx_{}", k))],
                        None));
    modules.push(module(&format!("axis_clock_converter_{}", k),
                        "xilinx.com:ip:axis_clock_converter:1.1", &[],
                        vec![bus_if("S_AXIS", &format!("time_{}", k)),
                             bus_if("M_AXIS", &format!("time_dma_{}", k))],
                        None));
    modules.push(module(&format!("axis_data_fifo_{}", k),
                        "xilinx.com:ip:axis_data_fifo:2.0", &[],
                        vec![bus_if("S_AXIS", &format!("dc_{}", k)),
                             bus_if("M_AXIS", &format!("dc_dma_{}", k))],
                        None));
    let dma_inputs = [format!("time_dma_{}", k), format!("dc_dma_{}", k), format!("graphy_{}", k)];
    for (j, (stream, input)) in ["time", "dc", "graphy"].iter().zip(dma_inputs.iter()).enumerate() {
      modules.push(module(&format!("axi_dma_{}_{}", stream, k),
                          "xilinx.com:ip:axi_dma:7.1",
                          &[("c_include_s2mm", "1"), ("c_include_mm2s", "0")],
                          vec![bus_if("S_AXIS_S2MM", input)],
                          Some(AddressWindow { base : demo_dma_base(k, j), range : 0x10000 })));
    }
    modules.push(module(&format!("system_ila_{}", k),
                        "xilinx.com:ip:system_ila:1.1", &[],
                        vec![bus_if("SLOT_0_AXIS", &format!("time_{}", k))],
                        None));
  }
  let mut rfdc = module("usp_rf_data_converter_0", "xilinx.com:ip:usp_rf_data_converter:2.6",
                        &[], rfdc_ifaces, Some(AddressWindow { base : 0xB000_0000, range : 0x40000 }));
  rfdc.parameters = rfdc_params;
  modules.push(rfdc);
  HardwareDescription {
    timestamp : Some(String::from("simulated build")),
    modules,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hook_sees_writes() {
    let window = SimWindow::new(4);
    window.set_hook(Box::new(|w : &SimWindow, offset : usize, value : u32| {
      if offset == 0 {
        w.poke(1, value + 1);
      }
    }));
    window.write_word(0, 41);
    assert_eq!(window.read_word(1), 42);
    window.poke(0, 7);
    assert_eq!(window.read_word(1), 42);
  }

  #[test]
  fn memory_lookup() {
    let platform = SimPlatform::new();
    let a = platform.allocate(100).unwrap();
    let b = platform.allocate(5000).unwrap();
    assert_eq!(a.phys_addr(), SIM_POOL_BASE);
    assert_eq!(b.phys_addr(), SIM_POOL_BASE + 4096);
    let (found, offset) = platform.memory_at(b.phys_addr() + 10).unwrap();
    assert_eq!(found.phys_addr(), b.phys_addr());
    assert_eq!(offset, 10);
    assert!(platform.memory_at(SIM_POOL_BASE + 200).is_none());
  }

  #[test]
  fn demo_description_resolves() {
    let graph = NetlistGraph::from_description(&demo_description(3)).unwrap();
    assert_eq!(graph.blocks_of_type(TOMOGRAPHY_TYPE).count(), 3);
    let tracer = PortTracer::new(&graph);
    let found  = tracer.trace_forward("axis_tomography_2", DMA_DC_PORT, &[AXI_DMA_TYPE], Some(1)).unwrap();
    assert_eq!(found[0].block, "axi_dma_dc_2");
  }
}
