//! Errors which can occur while reading a hardware
//! description, tracing connections through it
//! or handling settings files.

use std::path::PathBuf;
use thiserror::Error;

use crate::tracer::TraceResult;

/// Topology resolution failed. These are fatal to
/// startup - the build does not look like what
/// we know how to drive.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TraceError {
  #[error("block {0} is not part of the hardware description")]
  UnknownBlock(String),
  #[error("port {block}/{port} is not part of the hardware description")]
  UnknownPort { block : String, port : String },
  #[error("failed to trace back from {start} - unrecognized IP block {block} of type {btype}")]
  UnrecognizedBlock { start : String, block : String, btype : String },
  #[error("failed to trace back from {start} - {block}/{port} is unconnected")]
  Dangling { start : String, block : String, port : String },
  #[error("failed to trace back from {start} - {block}/{port} connects to {n_endpoints} endpoints")]
  Ambiguous { start : String, block : String, port : String, n_endpoints : usize },
  #[error("trace from {start} runs in a loop at {block}/{port}")]
  Loop { start : String, block : String, port : String },
  #[error("traced forward from {start} for {expected} block(s) of type {goal_types:?}, but found {found:?} (and dead ends {dead_ends:?})")]
  CountMismatch {
    start      : String,
    goal_types : Vec<String>,
    expected   : usize,
    found      : Vec<TraceResult>,
    dead_ends  : Vec<String>,
  },
  #[error("block {block} has no parameter {param}")]
  MissingParameter { block : String, param : String },
  #[error("parameter {param} of block {block} has a value we can not interpret: {value}")]
  BadParameter { block : String, param : String, value : String },
  #[error("port {block}/{port} has no clock frequency")]
  NoClock { block : String, port : String },
  #[error("unexpected reference clock frequencies {0:?}")]
  RefclkMismatch(Vec<f64>),
  #[error("converter channel {channel} of {block} is not enabled")]
  DisabledConverter { block : String, channel : String },
}

/// The hardware description could not be read
#[derive(Debug, Error)]
pub enum DescriptionError {
  #[error("can not read hardware description {path:?}: {source}")]
  Io { path : PathBuf, source : std::io::Error },
  #[error("can not parse hardware description: {0}")]
  Json(#[from] serde_json::Error),
  #[error("module {0} is described more than once")]
  DuplicateModule(String),
  #[error("port {0} is described more than once")]
  DuplicatePin(String),
}

/// Issues with reading/writing settings
#[derive(Debug, Error)]
pub enum SettingsError {
  #[error("settings file {path:?} failed: {source}")]
  Io { path : PathBuf, source : std::io::Error },
  #[error("can't interpret toml! {0}")]
  TomlDecoding(#[from] toml::de::Error),
  #[error("unable to serialize toml! {0}")]
  TomlEncoding(#[from] toml::ser::Error),
}
