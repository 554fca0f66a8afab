//! Print every register of every tomography block
//! of the loaded build
extern crate tomo_daq;

use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

#[macro_use] extern crate log;

use clap::Parser;

use tomo_lib::settings::TomoSettings;
use tomo_lib::NetlistGraph;

use tomo_daq::memory::DevMemPlatform;
use tomo_daq::sim::{
    demo_description,
    SimPlatform,
};
use tomo_daq::ChannelRegistry;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
  /// Settings file (toml)
  #[arg(short, long)]
  config : Option<String>,
  /// Hardware description (json), overrides the settings
  #[arg(short, long)]
  description : Option<PathBuf>,
  /// Look at the (idle) emulated demo fabric
  #[arg(long, default_value_t = false)]
  simulate : bool,
}

fn main() {
  tomo_lib::init_env_logger();
  let args = Args::parse();
  let mut settings = match &args.config {
    None         => TomoSettings::new(),
    Some(config) => TomoSettings::from_toml(config).unwrap_or_else(|err| {
      error!("Unable to read {}! {}", config, err);
      exit(1);
    })
  };
  if let Some(desc) = args.description {
    settings.description_path = desc;
  }
  let graph = if args.simulate {
    NetlistGraph::from_description(&demo_description(2))
  } else {
    NetlistGraph::from_json_file(&settings.description_path)
  };
  let graph = graph.unwrap_or_else(|err| {
    error!("Unable to load the hardware description! {}", err);
    exit(1);
  });
  let registry = if args.simulate {
    let platform = Arc::new(SimPlatform::new());
    ChannelRegistry::resolve(&graph, platform.as_ref(), &settings.engine)
  } else {
    let platform = DevMemPlatform::new(&settings.mem_device, settings.dma_pool);
    ChannelRegistry::resolve(&graph, &platform, &settings.engine)
  };
  let registry = registry.unwrap_or_else(|err| {
    error!("Unable to resolve the tomography channels! {}", err);
    exit(1);
  });
  for k in 0..registry.len() {
    let engine = match registry.channel(k) {
      Err(err)   => {
        error!("{}", err);
        continue;
      }
      Ok(engine) => engine
    };
    println!("=> [{}] {} ({})", k, engine.name(), engine.state());
    for (name, value) in engine.register_dump() {
      println!("   {:<16} : {:>10} (0x{:08x})", name, value, value);
    }
    let (error, counter) = engine.hardware_state();
    println!("   -- error flag {}, cycle counter {}", error, counter);
  }
}
