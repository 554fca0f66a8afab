//! Driver for the stream-to-memory (S2MM) channel
//! of an AXI DMA engine in direct register mode
//!
//! One transfer at a time: program the destination,
//! write the length, wait for idle. After completion
//! the length register holds the number of bytes
//! which actually arrived.

use std::thread;
use std::time::Duration;

use crate::errors::DmaError;
use crate::memory::{
    DmaMemory,
    RegisterDevice,
};
use crate::registers::DmaReg;

/// The length register is 26 bits wide
pub const MAX_TRANSFER_BYTES : usize = (1 << 26) - 1;

/// How often we look at the reset bit before
/// giving up on it
const RESET_POLLS : usize = 1000;

pub struct AxiDma {
  regs           : RegisterDevice<DmaReg>,
  first_transfer : bool,
}

impl AxiDma {
  pub fn new(regs : RegisterDevice<DmaReg>) -> Self {
    Self {
      regs,
      first_transfer : true,
    }
  }

  pub fn name(&self) -> &str {
    self.regs.fullpath()
  }

  /// Soft reset the channel. It will be halted
  /// afterwards.
  pub fn reset(&mut self) {
    trace!("Resetting DMA {}", self.name());
    self.regs.write(DmaReg::Dmacr, DmaReg::CR_RESET);
    for _ in 0..RESET_POLLS {
      if self.regs.read(DmaReg::Dmacr) & DmaReg::CR_RESET == 0 {
        break;
      }
      thread::sleep(Duration::from_micros(1));
    }
    self.first_transfer = true;
  }

  /// Set the run bit and wait until the channel
  /// leaves the halted state
  pub fn start(&mut self) {
    trace!("Starting DMA {}", self.name());
    let cr = self.regs.read(DmaReg::Dmacr);
    self.regs.write(DmaReg::Dmacr, cr | DmaReg::CR_RUN_STOP);
    for _ in 0..RESET_POLLS {
      if self.is_running() {
        break;
      }
      thread::sleep(Duration::from_micros(1));
    }
  }

  pub fn is_running(&self) -> bool {
    (self.regs.read(DmaReg::Dmacr) & DmaReg::CR_RUN_STOP) != 0
      && (self.regs.read(DmaReg::Dmasr) & DmaReg::SR_HALTED) == 0
  }

  /// The idle bit is only meaningful once a
  /// transfer has been issued
  pub fn is_idle(&self) -> bool {
    (self.regs.read(DmaReg::Dmasr) & DmaReg::SR_IDLE) != 0
  }

  /// Arm a transfer of at most `nbytes` into `dst`
  pub fn transfer(&mut self, dst : &dyn DmaMemory, nbytes : usize) -> Result<(), DmaError> {
    if !self.is_running() {
      return Err(DmaError::NotStarted(String::from(self.name())));
    }
    if !self.first_transfer && !self.is_idle() {
      return Err(DmaError::NotIdle(String::from(self.name())));
    }
    if nbytes > MAX_TRANSFER_BYTES {
      return Err(DmaError::TooLarge { nbytes, limit : MAX_TRANSFER_BYTES });
    }
    if nbytes > dst.len() {
      return Err(DmaError::BufferTooSmall { nbytes, capacity : dst.len() });
    }
    let addr = dst.phys_addr();
    self.regs.write(DmaReg::Da,    (addr & 0xffff_ffff) as u32);
    self.regs.write(DmaReg::DaMsb, (addr >> 32) as u32);
    // writing the length kicks off the transfer
    self.regs.write(DmaReg::Length, nbytes as u32);
    self.first_transfer = false;
    Ok(())
  }

  /// Translate the error bits of the status register
  pub fn check_error(&self) -> Result<(), DmaError> {
    let status = self.regs.read(DmaReg::Dmasr);
    let name   = String::from(self.name());
    if status & DmaReg::SR_INTERNAL != 0 {
      return Err(DmaError::Internal { name, status });
    }
    if status & DmaReg::SR_SLAVE != 0 {
      return Err(DmaError::Slave { name, status });
    }
    if status & DmaReg::SR_DECODE != 0 {
      return Err(DmaError::Decode { name, status });
    }
    Ok(())
  }

  /// Bytes written by the last completed transfer
  pub fn received_bytes(&self) -> usize {
    self.regs.read(DmaReg::Length) as usize
  }
}

/// The three stream channels of a tomography block
pub struct DmaSet {
  pub time   : AxiDma,
  pub dc     : AxiDma,
  pub graphy : AxiDma,
}

impl DmaSet {
  pub fn all(&self) -> [&AxiDma; 3] {
    [&self.time, &self.dc, &self.graphy]
  }

  pub fn all_mut(&mut self) -> [&mut AxiDma; 3] {
    [&mut self.time, &mut self.dc, &mut self.graphy]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use crate::memory::{Platform, WordWindow};
  use crate::registers::RegisterMap;
  use crate::sim::{SimPlatform, SimWindow};
  use tomo_lib::netlist::AddressWindow;

  fn dma_on(platform : &SimPlatform) -> AxiDma {
    let window = AddressWindow { base : 0xA001_0000, range : 0x10000 };
    let w = platform.map_window("axi_dma_0", &window).unwrap();
    platform.attach_dma(0xA001_0000);
    AxiDma::new(RegisterDevice::new("axi_dma_0", "axi_dma", w).unwrap())
  }

  #[test]
  fn transfer_needs_running_channel() {
    let platform = SimPlatform::new();
    let mut dma  = dma_on(&platform);
    let buffer   = platform.allocate(4096).unwrap();
    dma.reset();
    assert!(!dma.is_running());
    assert_eq!(dma.transfer(buffer.as_ref(), 1024), Err(DmaError::NotStarted(String::from("axi_dma_0"))));
    dma.start();
    assert!(dma.is_running());
    assert!(dma.transfer(buffer.as_ref(), 1024).is_ok());
    // still busy with the first one
    assert_eq!(dma.transfer(buffer.as_ref(), 1024), Err(DmaError::NotIdle(String::from("axi_dma_0"))));
  }

  #[test]
  fn transfer_size_limits() {
    let platform = SimPlatform::new();
    let mut dma  = dma_on(&platform);
    let buffer   = platform.allocate(1024).unwrap();
    dma.reset();
    dma.start();
    assert!(matches!(dma.transfer(buffer.as_ref(), 2048), Err(DmaError::BufferTooSmall {..})));
    assert!(matches!(dma.transfer(buffer.as_ref(), 1 << 26), Err(DmaError::TooLarge {..})));
  }

  #[test]
  fn error_bits() {
    let window = Arc::new(SimWindow::new(DmaReg::span()));
    let dma = AxiDma::new(RegisterDevice::new("axi_dma_1", "axi_dma", window.clone()).unwrap());
    assert!(dma.check_error().is_ok());
    window.write_word(DmaReg::Dmasr.offset(), DmaReg::SR_SLAVE);
    assert!(matches!(dma.check_error(), Err(DmaError::Slave {..})));
  }
}
