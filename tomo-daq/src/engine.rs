//! The acquisition engine of one tomography channel
//!
//! The engine owns a persistent worker thread (see
//! `threads::worker`). The caller side stores
//! configuration, sends run commands and collects
//! results. Only the worker touches the hardware while
//! a run is active.
//!
//! Communication:
//! * commands  : bounded(1) channel, number of cycles
//! * results   : unbounded channel of `CycleBatch`
//! * errors    : unbounded channel of `AcquisitionError`
//! * stop flag : AtomicBool, observed by the worker
//!               between all blocking steps. Cleared
//!               again once the worker is done
//! * stop count: counts stop requests, so a running
//!               `poll` notices one
//! * done      : flag + condition variable, set by the
//!               worker when a run has finished
//!
//! The `ChannelState` is only ever written by the
//! worker.

use std::fmt;
use std::sync::{
    Arc,
    Condvar,
    Mutex,
    MutexGuard,
};
use std::sync::atomic::{
    AtomicBool,
    AtomicU64,
    Ordering,
};
use std::thread;
use std::thread::JoinHandle;
use std::time::{
    Duration,
    Instant,
};

use crossbeam_channel::{
    bounded,
    unbounded,
    Receiver,
    RecvTimeoutError,
    Sender,
};
use serde::Serialize;

use tomo_lib::settings::EngineSettings;

use crate::buffers::CycleBuffers;
use crate::control::TimingRegisters;
use crate::decode::{
    Decoder,
    Record,
};
use crate::dma::DmaSet;
use crate::errors::{
    AcquisitionError,
    ConfigurationError,
};
use crate::memory::RegisterDevice;
use crate::registers::TomoReg;
use crate::registry::ChannelConfig;
use crate::threads::acquisition_worker;
use crate::threads::worker::WorkerContext;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum ChannelState {
  Idle,
  Running,
  Stopping,
  /// the last run failed
  Error,
}

impl fmt::Display for ChannelState {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      ChannelState::Idle     => "Idle",
      ChannelState::Running  => "Running",
      ChannelState::Stopping => "Stopping",
      ChannelState::Error    => "Error",
    };
    write!(f, "{}", repr)
  }
}

/// Everything decoded from one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleBatch {
  /// 0-based index within the run
  pub cycle           : u32,
  /// triggers the cycle was configured for
  pub target_triggers : u32,
  /// tagged events reported by the block
  pub tag_count       : u32,
  /// waveform samples reported by the block
  pub data_count      : u32,
  pub records         : Vec<Record>,
}

impl fmt::Display for CycleBatch {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<CycleBatch {}: {}/{} events, {} samples>",
           self.cycle, self.tag_count, self.target_triggers, self.data_count)
  }
}

pub(crate) struct RunStatus {
  pub state : ChannelState,
  /// no run in progress
  pub done  : bool,
}

/// State shared between the engine and its worker
pub(crate) struct Shared {
  pub stop       : AtomicBool,
  pub stop_count : AtomicU64,
  pub status  : Mutex<RunStatus>,
  pub done_cv : Condvar,
  pub timing  : Mutex<TimingRegisters>,
}

/// A poisoned lock only means a panic happened while
/// holding it. The data is plain values, so go on.
pub(crate) fn lock<T>(mutex : &Mutex<T>) -> MutexGuard<'_, T> {
  match mutex.lock() {
    Ok(guard)     => guard,
    Err(poisoned) => poisoned.into_inner(),
  }
}

/// Time between checks for a vanished worker
/// while waiting for a run to end
const DONE_CHECK : Duration = Duration::from_millis(50);

/// Longest a `poll` waits before looking for
/// stop requests again
const STOP_CHECK : Duration = Duration::from_millis(20);

pub struct AcquisitionEngine {
  config  : ChannelConfig,
  tomo    : RegisterDevice<TomoReg>,
  shared  : Arc<Shared>,
  cmd_tx  : Option<Sender<u32>>,
  data_rx : Receiver<CycleBatch>,
  err_rx  : Receiver<AcquisitionError>,
  worker  : Option<JoinHandle<()>>,
}

impl AcquisitionEngine {

  /// Set up the channel and start its worker
  pub fn new(config   : ChannelConfig,
             tomo     : RegisterDevice<TomoReg>,
             dmas     : DmaSet,
             buffers  : CycleBuffers,
             settings : &EngineSettings)
    -> Result<Self, AcquisitionError> {
    let timing = TimingRegisters::new(config.dac.f_fabric, settings.trigger_limit);
    let shared = Arc::new(Shared {
      stop       : AtomicBool::new(false),
      stop_count : AtomicU64::new(0),
      status     : Mutex::new(RunStatus { state : ChannelState::Idle, done : true }),
      done_cv    : Condvar::new(),
      timing     : Mutex::new(timing),
    });
    let (cmd_tx, cmd_rx)   = bounded::<u32>(1);
    let (data_tx, data_rx) = unbounded::<CycleBatch>();
    let (err_tx, err_rx)   = unbounded::<AcquisitionError>();
    let ctx = WorkerContext {
      name          : config.name.clone(),
      tomo          : tomo.clone(),
      dmas,
      buffers,
      decoder       : Decoder::new(config.adc.fs, config.interpolation, settings.snippet_len),
      interpolation : config.interpolation,
      poll_interval : Duration::from_micros(settings.poll_interval_us),
      shared        : shared.clone(),
      data_tx,
      err_tx,
    };
    let worker = thread::Builder::new()
      .name(format!("tomo-{}", config.name))
      .spawn(move || acquisition_worker(cmd_rx, ctx));
    let worker = match worker {
      Err(err) => {
        error!("Unable to spawn worker for {}! {}", config.name, err);
        return Err(AcquisitionError::WorkerGone);
      }
      Ok(handle) => handle
    };
    info!("Acquisition engine for {} ({}) ready", config.name, config.fullpath);
    Ok(Self {
      config,
      tomo,
      shared,
      cmd_tx  : Some(cmd_tx),
      data_rx,
      err_rx,
      worker  : Some(worker),
    })
  }

  pub fn name(&self) -> &str {
    &self.config.name
  }

  pub fn config(&self) -> &ChannelConfig {
    &self.config
  }

  /// The register values the next run will use
  pub fn timing(&self) -> TimingRegisters {
    *lock(&self.shared.timing)
  }

  /// Set up the ramp for the next run. The hardware
  /// is not touched.
  pub fn configure(&self,
                   rise_time_ms    : f64,
                   fall_time_ms    : f64,
                   max_scale       : f64,
                   trigger_rate_hz : f64)
    -> Result<(), ConfigurationError> {
    lock(&self.shared.timing).set_waveform(rise_time_ms, fall_time_ms, max_scale, trigger_rate_hz)
  }

  pub fn set_ttl(&self, ttl_bit : u8, rise_ms : f64, fall_ms : f64) -> Result<(), ConfigurationError> {
    lock(&self.shared.timing).set_ttl(ttl_bit, rise_ms, fall_ms)
  }

  pub fn set_threshold(&self, threshold : f64) -> Result<(), ConfigurationError> {
    lock(&self.shared.timing).set_threshold(threshold)
  }

  pub fn state(&self) -> ChannelState {
    lock(&self.shared.status).state
  }

  /// A run was started and the worker is not done
  /// with it yet
  pub fn is_active(&self) -> bool {
    !lock(&self.shared.status).done
  }

  /// Error flag and cycle counter as reported
  /// by the block
  pub fn hardware_state(&self) -> (bool, u32) {
    let state = self.tomo.read(TomoReg::RxState);
    ((state >> 4) != 0, state & TomoReg::COUNTER_MASK)
  }

  /// Name and current value of every register
  /// of the block
  pub fn register_dump(&self) -> Vec<(&'static str, u32)> {
    self.tomo.dump()
  }

  fn request_stop(&self) {
    self.shared.stop.store(true, Ordering::SeqCst);
    self.shared.stop_count.fetch_add(1, Ordering::SeqCst);
  }

  /// Block until the worker has finished its run
  fn wait_done<'a>(&'a self, mut status : MutexGuard<'a, RunStatus>)
    -> Result<MutexGuard<'a, RunStatus>, AcquisitionError> {
    while !status.done {
      let worker_alive = self.worker.as_ref().map(|w| !w.is_finished()).unwrap_or(false);
      if !worker_alive {
        error!("Worker of {} vanished!", self.config.name);
        return Err(AcquisitionError::WorkerGone);
      }
      status = match self.shared.done_cv.wait_timeout(status, DONE_CHECK) {
        Ok((guard, _))  => guard,
        Err(poisoned)   => poisoned.into_inner().0,
      };
    }
    Ok(status)
  }

  /// Run `cycle_count` cycles. A run in progress is
  /// stopped first. Results and errors of earlier runs
  /// which have not been polled are thrown away.
  pub fn start(&self, cycle_count : u32) -> Result<(), AcquisitionError> {
    if cycle_count == 0 {
      return Err(AcquisitionError::InvalidCycleCount);
    }
    let cmd_tx = self.cmd_tx.as_ref().ok_or(AcquisitionError::WorkerGone)?;
    let mut status = lock(&self.shared.status);
    if !status.done {
      info!("{} is still running, stopping it first", self.config.name);
      self.request_stop();
      status = self.wait_done(status)?;
    }
    self.shared.stop.store(false, Ordering::SeqCst);
    let mut n_stale = 0usize;
    while self.data_rx.try_recv().is_ok() {
      n_stale += 1;
    }
    if n_stale > 0 {
      debug!("Discarded {} stale batches of {}", n_stale, self.config.name);
    }
    while let Ok(err) = self.err_rx.try_recv() {
      warn!("Discarding stale error of {}! {}", self.config.name, err);
    }
    status.done = false;
    drop(status);
    if cmd_tx.send(cycle_count).is_err() {
      lock(&self.shared.status).done = true;
      return Err(AcquisitionError::WorkerGone);
    }
    Ok(())
  }

  /// End the current run (if any) and wait until
  /// the worker is done with it. Batches of cycles
  /// which finished before stay available to `poll`.
  pub fn stop(&self) -> Result<(), AcquisitionError> {
    let status = lock(&self.shared.status);
    if status.done {
      return Ok(());
    }
    self.request_stop();
    let status = self.wait_done(status)?;
    self.shared.stop.store(false, Ordering::SeqCst);
    drop(status);
    info!("Stopped {}", self.config.name);
    Ok(())
  }

  /// Collect results
  ///
  /// A queued error is returned instead of any data.
  /// Otherwise batches are collected until no batch
  /// arrives within `per_item_timeout`, `total_time`
  /// has passed (None = no limit) or a stop is
  /// requested while polling. Running out of time is
  /// not an error, the result is just shorter.
  pub fn poll(&self, total_time : Option<Duration>, per_item_timeout : Duration)
    -> Result<Vec<CycleBatch>, AcquisitionError> {
    let stops_seen    = self.shared.stop_count.load(Ordering::SeqCst);
    let deadline      = total_time.map(|t| Instant::now() + t);
    let mut item_due  = Instant::now() + per_item_timeout;
    let mut batches   = Vec::<CycleBatch>::new();
    loop {
      if let Ok(err) = self.err_rx.try_recv() {
        return Err(err);
      }
      // queued batches stay for the next poll
      if self.shared.stop_count.load(Ordering::SeqCst) != stops_seen {
        debug!("Stop requested for {}, ending poll", self.config.name);
        break;
      }
      let until = match deadline {
        None           => item_due,
        Some(deadline) => {
          if Instant::now() >= deadline {
            break;
          }
          item_due.min(deadline)
        }
      };
      let wait = until.saturating_duration_since(Instant::now()).min(STOP_CHECK);
      match self.data_rx.recv_timeout(wait) {
        Ok(batch) => {
          batches.push(batch);
          item_due = Instant::now() + per_item_timeout;
        }
        Err(RecvTimeoutError::Timeout) => {
          if Instant::now() >= until {
            break;
          }
        }
        Err(RecvTimeoutError::Disconnected) => {
          if batches.is_empty() {
            return Err(AcquisitionError::WorkerGone);
          }
          break;
        }
      }
    }
    Ok(batches)
  }
}

impl Drop for AcquisitionEngine {
  fn drop(&mut self) {
    self.shared.stop.store(true, Ordering::SeqCst);
    // closing the command channel ends the worker
    self.cmd_tx.take();
    if let Some(worker) = self.worker.take() {
      match worker.join() {
        Err(_) => error!("Worker of {} panicked!", self.config.name),
        Ok(_)  => debug!("Worker of {} joined", self.config.name)
      }
    }
  }
}

impl fmt::Display for AcquisitionEngine {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = format!("<AcquisitionEngine {}:", self.config.name);
    repr += &(format!("\n  block  : {}", self.config.fullpath));
    repr += &(format!("\n  state  : {}", self.state()));
    repr += &(format!("\n  timing : {}", self.timing()));
    repr += ">";
    write!(f, "{}", repr)
  }
}
