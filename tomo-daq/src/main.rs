//! # Run tomography measurements
//!
//! Resolve the tomography channels of the loaded
//! fabric build, configure one of them, run a number
//! of cycles and collect the decoded events.
//!
//! With `--simulate` everything runs on an emulated
//! fabric, either built after `--description` or a
//! demo build.
//!
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::time::{
    Duration,
    Instant,
};

use indicatif::{
    ProgressBar,
    ProgressStyle,
};

#[macro_use] extern crate log;

extern crate clap;
use clap::Parser;

use tomo_lib::settings::TomoSettings;
use tomo_lib::NetlistGraph;

use tomo_daq::memory::DevMemPlatform;
use tomo_daq::sim::{
    demo_description,
    spawn_emulators,
    SimBehaviour,
    SimPlatform,
    SimTomography,
};
use tomo_daq::{
    ChannelRegistry,
    ChannelState,
    CycleBatch,
};

#[derive(Parser, Debug)]
#[command(author = "tomography daq", version, about, long_about = None)]
struct Args {
  /// Settings file (toml). Without it, the defaults
  /// are used
  #[arg(short, long)]
  config : Option<String>,
  /// Hardware description (json) of the loaded build.
  /// Overrides the one from the settings
  #[arg(short, long)]
  description : Option<PathBuf>,
  /// Use the emulated fabric instead of /dev/mem
  #[arg(long, default_value_t = false)]
  simulate : bool,
  /// Number of channels of the demo build, if
  /// simulating without a description
  #[arg(long, default_value_t = 2)]
  sim_channels : usize,
  /// Index of the channel to run
  #[arg(long, default_value_t = 0)]
  channel : usize,
  /// Number of cycles to run
  #[arg(short, long)]
  nevents : Option<u32>,
  /// Rising half of the ramp, triggers are taken here
  #[arg(long)]
  rise_time_ms : Option<f64>,
  #[arg(long)]
  fall_time_ms : Option<f64>,
  /// Ramp amplitude as fraction of full scale
  #[arg(long)]
  max_scale : Option<f64>,
  #[arg(long)]
  trigger_rate : Option<f64>,
  /// Decision threshold as fraction of full scale
  #[arg(long)]
  threshold : Option<f64>,
  /// Give up if no cycle arrives for this long
  #[arg(long, default_value_t = 5000)]
  item_timeout_ms : u64,
  /// List the resolved channels and exit
  #[arg(long, default_value_t = false)]
  list : bool,
  /// Show a progress bar for the received cycles
  #[arg(long, default_value_t = false)]
  show_progress : bool,
  /// Write the effective settings to this file and exit
  #[arg(long)]
  write_config : Option<String>,
  /// Write all received cycles as json to this file
  #[arg(short, long)]
  output : Option<PathBuf>,
}

fn main() {
  tomo_lib::init_env_logger();
  let args = Args::parse();

  let mut settings = match &args.config {
    None => TomoSettings::new(),
    Some(config) => {
      match TomoSettings::from_toml(config) {
        Err(err) => {
          error!("Unable to read settings from {}! {}", config, err);
          exit(1);
        }
        Ok(settings) => settings
      }
    }
  };
  if let Some(desc) = &args.description {
    settings.description_path = desc.clone();
  }
  if let Some(rise) = args.rise_time_ms {
    settings.waveform.rise_time_ms = rise;
  }
  if let Some(fall) = args.fall_time_ms {
    settings.waveform.fall_time_ms = fall;
  }
  if let Some(scale) = args.max_scale {
    settings.waveform.max_scale = scale;
  }
  if let Some(rate) = args.trigger_rate {
    settings.waveform.trigger_rate_hz = rate;
  }
  if let Some(threshold) = args.threshold {
    settings.waveform.threshold = threshold;
  }
  if let Some(cycles) = args.nevents {
    settings.waveform.cycles = cycles;
  }
  if let Some(fname) = &args.write_config {
    match settings.to_toml(fname.clone()) {
      Err(err) => {
        error!("Unable to write settings! {}", err);
        exit(1);
      }
      Ok(_) => {
        println!("=> Settings written to {}", fname);
        exit(0);
      }
    }
  }

  println!("-----------------------------------------------");
  println!(" ** tomo-daq *****");
  println!(" .. acquisition for the tomography channels");
  if args.simulate {
    println!(" .. running on the EMULATED fabric");
  }
  println!("-----------------------------------------------");

  // the description comes from the file, unless we
  // simulate without one
  let graph = if args.simulate && args.description.is_none() {
    NetlistGraph::from_description(&demo_description(args.sim_channels.min(4)))
  } else {
    NetlistGraph::from_json_file(&settings.description_path)
  };
  let graph = match graph {
    Err(err) => {
      error!("Unable to load the hardware description! {}", err);
      exit(1);
    }
    Ok(graph) => graph
  };

  // the emulators have to outlive the registry
  let (registry, _emulators) = if args.simulate {
    let platform  = Arc::new(SimPlatform::new());
    let emulators = match spawn_emulators(&graph, &platform, SimBehaviour::new()) {
      Err(err) => {
        error!("Unable to set up the emulated fabric! {}", err);
        exit(1);
      }
      Ok(emulators) => emulators
    };
    (ChannelRegistry::resolve(&graph, platform.as_ref(), &settings.engine), emulators)
  } else {
    let platform = DevMemPlatform::new(&settings.mem_device, settings.dma_pool);
    (ChannelRegistry::resolve(&graph, &platform, &settings.engine), Vec::<SimTomography>::new())
  };
  let registry = match registry {
    Err(err) => {
      error!("Unable to resolve the tomography channels! {}", err);
      exit(1);
    }
    Ok(registry) => registry
  };

  if args.list {
    println!("{}", registry.describe());
    return;
  }

  let channel  = args.channel;
  let waveform = settings.waveform;
  let setup = registry.configure(channel,
                                 waveform.rise_time_ms,
                                 waveform.fall_time_ms,
                                 waveform.max_scale,
                                 waveform.trigger_rate_hz)
    .and_then(|_| registry.set_threshold(channel, waveform.threshold));
  match setup {
    Err(err) => {
      error!("Unable to configure channel {}! {}", channel, err);
      exit(1);
    }
    Ok(_) => info!("Channel {} configured", channel)
  }

  let terminate = Arc::new(AtomicBool::new(false));
  match signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&terminate)) {
    Err(err) => warn!("Unable to install the Ctrl-C handler! {}", err),
    Ok(_)    => ()
  }

  let bar = if args.show_progress {
    let bar = ProgressBar::new(waveform.cycles as u64);
    let template = "[{elapsed_precise}] {prefix} {msg} {spinner} {bar:60.red/grey} {pos:>7}/{len:7}";
    match ProgressStyle::with_template(template) {
      Err(err) => warn!("Unable to set progressbar style! {}", err),
      Ok(style) => bar.set_style(style)
    }
    bar.set_prefix("\u{2728}");
    bar.set_message("CYCLES");
    bar
  } else {
    ProgressBar::hidden()
  };

  if let Err(err) = registry.start(channel, waveform.cycles) {
    error!("Unable to start channel {}! {}", channel, err);
    exit(1);
  }
  let item_timeout   = Duration::from_millis(args.item_timeout_ms);
  let slice          = Duration::from_millis(200);
  let mut batches    = Vec::<CycleBatch>::new();
  let mut last_data  = Instant::now();
  let mut failed     = false;
  while batches.len() < waveform.cycles as usize {
    if terminate.load(Ordering::SeqCst) {
      warn!("Interrupted, stopping channel {}", channel);
      break;
    }
    match registry.poll(channel, Some(slice), slice) {
      Err(err) => {
        error!("Acquisition failed! {}", err);
        failed = true;
        break;
      }
      Ok(new_batches) => {
        if !new_batches.is_empty() {
          last_data = Instant::now();
          bar.inc(new_batches.len() as u64);
          for batch in &new_batches {
            debug!("{}", batch);
          }
          batches.extend(new_batches);
          continue;
        }
      }
    }
    match registry.is_active(channel) {
      Ok(true)  => (),
      Ok(false) => {
        // the worker may have sent more after the last poll
        match registry.poll(channel, Some(slice), Duration::from_millis(10)) {
          Err(err) => {
            error!("Acquisition failed! {}", err);
            failed = true;
          }
          Ok(rest) => {
            bar.inc(rest.len() as u64);
            batches.extend(rest);
          }
        }
        info!("Channel {} is {}, nothing more to collect", channel,
              registry.state(channel).unwrap_or(ChannelState::Error));
        break;
      }
      Err(err) => {
        error!("{}", err);
        break;
      }
    }
    if last_data.elapsed() > item_timeout {
      warn!("No data from channel {} for {:?}, giving up", channel, item_timeout);
      break;
    }
  }
  if let Err(err) = registry.stop(channel) {
    error!("Unable to stop channel {}! {}", channel, err);
  }
  bar.finish();

  let n_events : usize = batches.iter().map(|b| b.records.len()).sum();
  println!("=> Received {} cycles with {} events", batches.len(), n_events);
  for batch in &batches {
    println!("   {}", batch);
  }
  if let Some(path) = &args.output {
    let written = File::create(path)
      .map_err(|err| err.to_string())
      .and_then(|f| serde_json::to_writer_pretty(BufWriter::new(f), &batches)
                                  .map_err(|err| err.to_string()));
    match written {
      Err(err) => error!("Unable to write {}! {}", path.display(), err),
      Ok(_)    => println!("=> Cycles written to {}", path.display())
    }
  }
  registry.stop_all();
  drop(registry);
  if failed {
    exit(1);
  }
}
