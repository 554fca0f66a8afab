//! Common ground for the tomography DAQ
//!
//! * parse the hardware description of a fabric build
//!   (`netlist`)
//! * find out which IP blocks are wired to which
//!   (`tracer`)
//! * settings (toml) and logging
//!
pub mod constants;
pub mod errors;
pub mod netlist;
pub mod tracer;
pub mod settings;

pub use netlist::{
    NetlistGraph,
    Block,
    Endpoint,
};
pub use tracer::{
    PortTracer,
    TraceResult,
};
pub use settings::TomoSettings;

use std::io::Write;

use colored::{Colorize, ColoredString};
use log::Level;

#[macro_use] extern crate log;
extern crate env_logger;

/// Make sure that the loglevel is in color, even though not using pretty_env logger
pub fn color_log(level : &Level) -> ColoredString {
  match level {
    Level::Error    => String::from(" ERROR!").red(),
    Level::Warn     => String::from(" WARN  ").yellow(),
    Level::Info     => String::from(" Info  ").green(),
    Level::Debug    => String::from(" debug ").blue(),
    Level::Trace    => String::from(" trace ").cyan(),
  }
}

/// Set up the environmental (env) logger
/// with our format
///
/// Ensure that the lines and module paths
/// are printed in the logging output
pub fn init_env_logger() {
  env_logger::builder()
    .format(|buf, record| {
    writeln!( buf, "[{level}][{module_path}:{line}] {args}",
      level = color_log(&record.level()),
      module_path = record.module_path().unwrap_or("<unknown>"),
      line = record.line().unwrap_or(0),
      args = record.args()
      )
    }).init();
}
