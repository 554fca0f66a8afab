//! The per-channel acquisition loop
//!
//! Waits for a run command, then for every cycle
//!
//! * waits for the three DMA transfers of the cycle
//! * waits for the block to advance its cycle counter
//! * arms the other slot for the next cycle, so the
//!   hardware can go on while we read out
//! * copies the data out, decodes and sends it on
//!
//! and cleans up afterwards, whatever happened.

use std::any::Any;
use std::panic::{
    catch_unwind,
    AssertUnwindSafe,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{
    Receiver,
    Sender,
};

use crate::buffers::{
    CycleBuffers,
    DataClass,
};
use crate::control::TimingRegisters;
use crate::decode::{
    i16_from_bytes,
    u32_from_bytes,
    Decoder,
};
use crate::dma::DmaSet;
use crate::engine::{
    lock,
    ChannelState,
    CycleBatch,
    Shared,
};
use crate::errors::AcquisitionError;
use crate::memory::RegisterDevice;
use crate::registers::TomoReg;

/// Everything the worker owns
pub(crate) struct WorkerContext {
  pub name          : String,
  pub tomo          : RegisterDevice<TomoReg>,
  pub dmas          : DmaSet,
  pub buffers       : CycleBuffers,
  pub decoder       : Decoder,
  pub interpolation : usize,
  pub poll_interval : Duration,
  pub shared        : Arc<Shared>,
  pub data_tx       : Sender<CycleBatch>,
  pub err_tx        : Sender<AcquisitionError>,
}

/// How a wait on the hardware ended
enum Wait {
  Done,
  Fault,
  Stopped,
}

fn panic_message(payload : &(dyn Any + Send)) -> String {
  if let Some(msg) = payload.downcast_ref::<&str>() {
    return String::from(*msg);
  }
  if let Some(msg) = payload.downcast_ref::<String>() {
    return msg.clone();
  }
  String::from("worker panicked")
}

impl WorkerContext {

  /// Moves a running channel to `Stopping` once
  /// a stop shows up
  fn stop_requested(&self) -> bool {
    if !self.shared.stop.load(Ordering::SeqCst) {
      return false;
    }
    let mut status = lock(&self.shared.status);
    if status.state == ChannelState::Running {
      status.state = ChannelState::Stopping;
    }
    true
  }

  /// Expected bytes per stream for `trigger_num` events
  fn transfer_lengths(&self, trigger_num : u32) -> [usize; 3] {
    let n = trigger_num as usize;
    [DataClass::Time.bytes_per_event(self.interpolation) * n,
     DataClass::Decision.bytes_per_event(self.interpolation) * n,
     DataClass::Waveform.bytes_per_event(self.interpolation) * n]
  }

  /// Hand the buffers of `slot` to the DMA engines
  fn arm(&mut self, slot : usize, trigger_num : u32) -> Result<(), AcquisitionError> {
    let lengths = self.transfer_lengths(trigger_num);
    let sets    = self.buffers.sets_mut();
    let dmas    = self.dmas.all_mut();
    for ((set, dma), nbytes) in sets.into_iter().zip(dmas).zip(lengths) {
      let memory = set.arm(slot)?;
      dma.transfer(memory.as_ref(), nbytes)?;
    }
    trace!("{} armed slot {}", self.name, slot);
    Ok(())
  }

  fn block_error(&self) -> bool {
    self.tomo.read(TomoReg::RxState) & TomoReg::ERROR_BIT != 0
  }

  /// Wait until all three transfers are done. The block
  /// flags an error instead of delivering when it
  /// can not get rid of its data.
  fn wait_for_transfers(&self) -> Result<Wait, AcquisitionError> {
    loop {
      if self.stop_requested() {
        return Ok(Wait::Stopped);
      }
      let mut all_idle = true;
      for dma in self.dmas.all() {
        dma.check_error()?;
        all_idle &= dma.is_idle();
      }
      if all_idle {
        return Ok(Wait::Done);
      }
      if self.block_error() {
        return Ok(Wait::Fault);
      }
      thread::sleep(self.poll_interval);
    }
  }

  /// Wait until the cycle counter moves away
  /// from `cycle` mod 16
  fn wait_for_cycle_end(&self, cycle : u32) -> Wait {
    let expected = cycle & TomoReg::COUNTER_MASK;
    loop {
      if self.stop_requested() {
        return Wait::Stopped;
      }
      let state = self.tomo.read(TomoReg::RxState);
      if state & TomoReg::ERROR_BIT != 0 {
        return Wait::Fault;
      }
      if state & TomoReg::COUNTER_MASK != expected {
        return Wait::Done;
      }
      thread::sleep(self.poll_interval);
    }
  }

  /// Run `cycles` cycles. Returns the number of
  /// cycles which were sent on.
  fn run(&mut self, cycles : u32) -> Result<u32, AcquisitionError> {
    let timing : TimingRegisters = *lock(&self.shared.timing);
    let trigger_num = timing.trigger_num();
    for dma in self.dmas.all_mut() {
      dma.reset();
      dma.start();
    }
    // a falling start resets the block's state
    self.tomo.write(TomoReg::Start, 0);
    timing.apply(&self.tomo, cycles);
    self.arm(0, trigger_num)?;
    self.tomo.write(TomoReg::Start, 1);
    info!("{} started for {} cycles of {} triggers", self.name, cycles, trigger_num);

    for cycle in 0..cycles {
      let slot = (cycle % 2) as usize;
      match self.wait_for_transfers()? {
        Wait::Stopped => {
          info!("{} stopped while waiting for cycle {}", self.name, cycle);
          return Ok(cycle);
        }
        Wait::Fault => return Err(AcquisitionError::HardwareFault { cycle }),
        Wait::Done  => ()
      }
      let received : Vec<usize> = self.dmas.all().iter().map(|d| d.received_bytes()).collect();
      self.buffers.complete(slot)?;
      match self.wait_for_cycle_end(cycle) {
        Wait::Stopped => {
          info!("{} stopped at the end of cycle {}", self.name, cycle);
          return Ok(cycle);
        }
        Wait::Fault => return Err(AcquisitionError::HardwareFault { cycle }),
        Wait::Done  => ()
      }
      if cycle + 1 < cycles {
        self.arm(((cycle + 1) % 2) as usize, trigger_num)?;
      }
      let tag_count  = self.tomo.read(TomoReg::RxTagCnt);
      let data_count = self.tomo.read(TomoReg::RxDataCnt);
      let n_events   = tag_count.min(trigger_num) as usize;
      let expected   = self.transfer_lengths(n_events as u32);
      let graphy_len = (data_count as usize * 2).min(received[2]);
      let times  = u32_from_bytes(&self.buffers.time.take(slot, expected[0].min(received[0]))?);
      let dc     = i16_from_bytes(&self.buffers.dc.take(slot, expected[1].min(received[1]))?);
      let graphy = i16_from_bytes(&self.buffers.graphy.take(slot, graphy_len)?);
      let records = self.decoder.decode(&times, &dc, &graphy);
      debug!("{} cycle {} done, {} events, {} samples", self.name, cycle, tag_count, data_count);
      let batch = CycleBatch {
        cycle,
        target_triggers : trigger_num,
        tag_count,
        data_count,
        records,
      };
      if self.data_tx.send(batch).is_err() {
        warn!("Nobody is listening for results of {} anymore", self.name);
        return Ok(cycle);
      }
    }
    Ok(cycles)
  }

  /// Leave the hardware idle, whatever state the
  /// run ended in
  fn finish(&mut self) {
    self.tomo.write(TomoReg::Start, 0);
    for dma in self.dmas.all_mut() {
      dma.reset();
    }
    self.buffers.release_all();
  }
}

/// Serve run commands until the command channel closes
pub(crate) fn acquisition_worker(cmd_rx : Receiver<u32>, mut ctx : WorkerContext) {
  loop {
    let cycles = match cmd_rx.recv() {
      Err(_) => {
        debug!("Command channel of {} closed, ending worker", ctx.name);
        break;
      }
      Ok(cycles) => cycles
    };
    if ctx.shared.stop.load(Ordering::SeqCst) {
      info!("Run of {} cancelled before it started", ctx.name);
      let mut status = lock(&ctx.shared.status);
      status.state = ChannelState::Idle;
      status.done  = true;
      ctx.shared.done_cv.notify_all();
      continue;
    }
    lock(&ctx.shared.status).state = ChannelState::Running;
    let result = catch_unwind(AssertUnwindSafe(|| ctx.run(cycles)));
    let failed = match result {
      Ok(Ok(n_done)) => {
        info!("{} finished {}/{} cycles", ctx.name, n_done, cycles);
        false
      }
      Ok(Err(err)) => {
        error!("Run of {} failed! {}", ctx.name, err);
        if ctx.err_tx.send(err).is_err() {
          warn!("Unable to pass on the error of {}", ctx.name);
        }
        true
      }
      Err(payload) => {
        let msg = panic_message(payload.as_ref());
        error!("Run of {} panicked! {}", ctx.name, msg);
        if ctx.err_tx.send(AcquisitionError::CycleFailed(msg)).is_err() {
          warn!("Unable to pass on the error of {}", ctx.name);
        }
        true
      }
    };
    ctx.finish();
    let mut status = lock(&ctx.shared.status);
    status.state = if failed { ChannelState::Error } else { ChannelState::Idle };
    status.done  = true;
    ctx.shared.done_cv.notify_all();
  }
}
