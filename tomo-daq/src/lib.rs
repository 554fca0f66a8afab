//! # Data acquisition for the tomography channels
//!
//! Every tomography block of a fabric build drives a
//! DAC slice, listens to an ADC slice and pushes three
//! streams (timestamps, decision samples, waveform)
//! through AXI DMA engines into memory. Here we
//!
//! * find the blocks, their converters and DMA engines
//!   in the hardware description (`registry`)
//! * drive their registers (`registers`, `memory`,
//!   `control`) and the DMA engines (`dma`)
//! * run the double buffered acquisition in one worker
//!   thread per channel (`engine`, `threads`)
//! * decode the streams into events (`decode`)
//!
//! `sim` emulates the fabric, so all of this also runs
//! without a board.

pub mod errors;
pub mod registers;
pub mod memory;
pub mod dma;
pub mod buffers;
pub mod control;
pub mod converters;
pub mod decode;
pub mod engine;
pub mod threads;
pub mod registry;
pub mod sim;

pub use engine::{
    AcquisitionEngine,
    ChannelState,
    CycleBatch,
};
pub use registry::{
    ChannelConfig,
    ChannelRegistry,
};
pub use decode::Record;

extern crate crossbeam_channel;

#[macro_use] extern crate log;
