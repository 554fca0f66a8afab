//! Memory access for register windows and
//! DMA buffers
//!
//! The fabric blocks map their registers into the
//! physical address space. We get at them through
//! /dev/mem (or anything else which can be mmapped
//! with physical offsets). The DMA engines write into
//! a reserved, physically contiguous memory pool, which
//! is mapped the same way.
//!
//! Everything hardware specific hides behind the
//! `Platform` trait, so the same engine runs on the
//! simulated fabric.

extern crate memmap;

use std::fs::File;
use std::fmt;
use std::marker::PhantomData;
use std::path::{
    Path,
    PathBuf,
};
use std::ptr;
use std::sync::{
    Arc,
    Mutex,
};

use memmap::MmapMut;

use tomo_lib::netlist::AddressWindow;
use tomo_lib::settings::DmaPoolSettings;

use crate::errors::RegisterError;
use crate::registers::RegisterMap;

/// The size of a 32bit unsigned int in byte
/// (all words in registers are u32)
pub const SIZEOF_U32 : usize = 4;

/// DMA buffers start at page boundaries
pub const DMA_ALIGNMENT : u64 = 4096;

/// Single word, volatile access to a
/// register window
pub trait WordWindow : Send + Sync {
  /// size of the window in 32bit words
  fn n_words(&self) -> usize;
  fn read_word(&self, offset : usize) -> u32;
  fn write_word(&self, offset : usize, value : u32);
}

/// A region DMA engines can write to
pub trait DmaMemory : Send + Sync {
  /// physical address, as the DMA engine sees it
  fn phys_addr(&self) -> u64;
  /// size in bytes
  fn len(&self) -> usize;
  /// copy `dst.len()` bytes, starting at `offset`
  fn read_bytes(&self, offset : usize, dst : &mut [u8]);

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Where register windows and DMA buffers
/// come from
pub trait Platform : Send + Sync {
  fn map_window(&self, name : &str, window : &AddressWindow)
    -> Result<Arc<dyn WordWindow>, RegisterError>;
  fn allocate(&self, nbytes : usize)
    -> Result<Arc<dyn DmaMemory>, RegisterError>;
}

/// Allow WRITE access to a piece of physical memory
///
/// # Arguments
///
/// * addr_space : e.g. /dev/mem
/// * addr       : physical address (page aligned)
/// * len        : number of bytes to map
pub fn map_physical_mem_write(addr_space : &Path,
                              addr       : u64,
                              len        : usize)
  -> Result<MmapMut, RegisterError> {
  let fail = |source| RegisterError::MMapFail {
    device : addr_space.display().to_string(),
    addr,
    len,
    source
  };
  let file = File::options()
    .read(true)
    .write(true)
    .open(addr_space)
    .map_err(fail)?;
  let m = unsafe {
    memmap::MmapOptions::new()
      .offset(addr)
      .len(len)
      .map_mut(&file)
      .map_err(|source| RegisterError::MMapFail {
        device : addr_space.display().to_string(),
        addr,
        len,
        source
      })?
  };
  Ok(m)
}

/// Register window backed by a memory map
pub struct MappedWindow {
  /// keeps `base` valid
  _map    : MmapMut,
  base    : *mut u32,
  n_words : usize,
}

// `base` points into the map owned by the window and
// all accesses go through volatile reads and writes
unsafe impl Send for MappedWindow {}
unsafe impl Sync for MappedWindow {}

impl MappedWindow {
  pub fn new(addr_space : &Path, window : &AddressWindow) -> Result<Self, RegisterError> {
    let len = window.range as usize;
    let mut map = map_physical_mem_write(addr_space, window.base, len)?;
    let base    = map.as_mut_ptr() as *mut u32;
    Ok(Self {
      _map    : map,
      base,
      n_words : len / SIZEOF_U32,
    })
  }
}

impl WordWindow for MappedWindow {
  fn n_words(&self) -> usize {
    self.n_words
  }

  fn read_word(&self, offset : usize) -> u32 {
    assert!(offset < self.n_words);
    unsafe {
      ptr::read_volatile(self.base.add(offset))
    }
  }

  fn write_word(&self, offset : usize, value : u32) {
    assert!(offset < self.n_words);
    trace!("Attempting to write {value} at word {offset}");
    unsafe {
      ptr::write_volatile(self.base.add(offset), value);
    }
  }
}

/// DMA buffer backed by a memory map of
/// the reserved pool
pub struct MappedBuffer {
  map       : MmapMut,
  phys_addr : u64,
  len       : usize,
}

impl MappedBuffer {
  pub fn new(addr_space : &Path, phys_addr : u64, len : usize) -> Result<Self, RegisterError> {
    let map = map_physical_mem_write(addr_space, phys_addr, len)?;
    Ok(Self {
      map,
      phys_addr,
      len,
    })
  }
}

impl DmaMemory for MappedBuffer {
  fn phys_addr(&self) -> u64 {
    self.phys_addr
  }

  fn len(&self) -> usize {
    self.len
  }

  fn read_bytes(&self, offset : usize, dst : &mut [u8]) {
    assert!(offset + dst.len() <= self.len);
    let p = self.map.as_ptr();
    unsafe {
      let slice = ptr::slice_from_raw_parts(p.add(offset), dst.len());
      dst.copy_from_slice(&*slice);
    }
  }
}

/// The real thing. Maps windows from /dev/mem and
/// carves DMA buffers from the reserved pool.
pub struct DevMemPlatform {
  device : PathBuf,
  pool   : DmaPoolSettings,
  next   : Mutex<u64>,
}

impl DevMemPlatform {
  pub fn new(device : &Path, pool : DmaPoolSettings) -> Self {
    Self {
      device : device.to_path_buf(),
      pool,
      next   : Mutex::new(pool.base),
    }
  }
}

impl Platform for DevMemPlatform {
  fn map_window(&self, name : &str, window : &AddressWindow)
    -> Result<Arc<dyn WordWindow>, RegisterError> {
    debug!("Mapping {} at 0x{:x} (0x{:x} bytes) from {}", name, window.base, window.range, self.device.display());
    Ok(Arc::new(MappedWindow::new(&self.device, window)?))
  }

  fn allocate(&self, nbytes : usize)
    -> Result<Arc<dyn DmaMemory>, RegisterError> {
    let mut next = match self.next.lock() {
      Ok(next)      => next,
      Err(poisoned) => poisoned.into_inner(),
    };
    let end       = self.pool.base + self.pool.size;
    let available = end.saturating_sub(*next) as usize;
    if nbytes > available {
      return Err(RegisterError::PoolExhausted { requested : nbytes, available });
    }
    let buffer = MappedBuffer::new(&self.device, *next, nbytes)?;
    debug!("Allocated {} bytes DMA buffer at 0x{:x}", nbytes, *next);
    *next = align_up(*next + nbytes as u64, DMA_ALIGNMENT).min(end);
    Ok(Arc::new(buffer))
  }
}

pub fn align_up(addr : u64, alignment : u64) -> u64 {
  addr.div_ceil(alignment) * alignment
}

/// Typed access to the registers of one block
#[derive(Clone)]
pub struct RegisterDevice<R : RegisterMap> {
  fullpath : String,
  btype    : String,
  window   : Arc<dyn WordWindow>,
  _map     : PhantomData<R>,
}

impl<R : RegisterMap> RegisterDevice<R> {

  /// Fails if the window does not span the register map
  pub fn new(fullpath : &str, btype : &str, window : Arc<dyn WordWindow>)
    -> Result<Self, RegisterError> {
    if window.n_words() < R::span() {
      return Err(RegisterError::WindowTooSmall {
        name : String::from(fullpath),
        have : window.n_words(),
        need : R::span(),
      });
    }
    Ok(Self {
      fullpath : String::from(fullpath),
      btype    : String::from(btype),
      window,
      _map     : PhantomData,
    })
  }

  pub fn fullpath(&self) -> &str {
    &self.fullpath
  }

  pub fn btype(&self) -> &str {
    &self.btype
  }

  pub fn read(&self, reg : R) -> u32 {
    self.window.read_word(reg.offset())
  }

  pub fn write(&self, reg : R, value : u32) {
    self.window.write_word(reg.offset(), value);
  }

  /// Signed registers take the two's complement
  pub fn write_i32(&self, reg : R, value : i32) {
    self.write(reg, value as u32);
  }

  pub fn read_i32(&self, reg : R) -> i32 {
    self.read(reg) as i32
  }

  pub fn read_by_name(&self, name : &str) -> Option<u32> {
    R::from_name(name).map(|reg| self.read(reg))
  }

  /// Every register with its current value
  pub fn dump(&self) -> Vec<(&'static str, u32)> {
    R::ALL.iter().map(|reg| (reg.name(), self.read(*reg))).collect()
  }
}

impl<R : RegisterMap> fmt::Display for RegisterDevice<R> {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<RegisterDevice {} [{}] {} words>", self.fullpath, self.btype, self.window.n_words())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::registers::{DmaReg, TomoReg};
  use crate::sim::SimWindow;

  #[test]
  fn typed_access() {
    let window = Arc::new(SimWindow::new(0x10000 / SIZEOF_U32));
    let dev = RegisterDevice::<TomoReg>::new("axis_tomography_0", "axis_tomography", window.clone()).unwrap();
    dev.write(TomoReg::TriLimit, 1500);
    dev.write_i32(TomoReg::TxRatioFall, -140);
    assert_eq!(window.read_word(1), 1500);
    assert_eq!(dev.read_i32(TomoReg::TxRatioFall), -140);
    assert_eq!(dev.read_by_name("tri_limit"), Some(1500));
    assert_eq!(dev.read_by_name("nope"), None);
    assert_eq!(dev.dump().len(), TomoReg::ALL.len());
  }

  #[test]
  fn window_too_small() {
    let window = Arc::new(SimWindow::new(20));
    assert!(matches!(RegisterDevice::<DmaReg>::new("axi_dma_0", "axi_dma", window),
                     Err(RegisterError::WindowTooSmall { have : 20, need : 23, .. })));
  }

  #[test]
  fn mapped_window_on_file() {
    let path = std::env::temp_dir().join(format!("tomo-daq-window-{}", std::process::id()));
    std::fs::write(&path, vec![0u8; 64]).unwrap();
    {
      let window = MappedWindow::new(&path, &AddressWindow { base : 0, range : 64 }).unwrap();
      assert_eq!(window.n_words(), 16);
      window.write_word(3, 0xdeadbeef);
      assert_eq!(window.read_word(3), 0xdeadbeef);
      assert_eq!(window.read_word(2), 0);
    }
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes[12..16], 0xdeadbeefu32.to_ne_bytes());
    std::fs::remove_file(&path).unwrap();
  }

  #[test]
  fn alignment() {
    assert_eq!(align_up(0, 4096), 0);
    assert_eq!(align_up(1, 4096), 4096);
    assert_eq!(align_up(8192, 4096), 8192);
  }
}
