use std::sync::Arc;
use std::thread;
use std::time::{
    Duration,
    Instant,
};

use tomo_lib::settings::EngineSettings;
use tomo_lib::NetlistGraph;

use tomo_daq::errors::{
    AcquisitionError,
    ConfigurationError,
    RegistryError,
};
use tomo_daq::sim::{
    demo_description,
    sim_decision_value,
    sim_waveform_sample,
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

const N_TRIGGERS : usize = 100;

fn engine_settings() -> EngineSettings {
  EngineSettings {
    trigger_limit    : 200,
    poll_interval_us : 50,
    snippet_len      : 100,
  }
}

fn sim_setup(n_channels : usize, behaviour : SimBehaviour)
  -> (ChannelRegistry, Vec<SimTomography>, Arc<SimPlatform>) {
  let graph     = NetlistGraph::from_description(&demo_description(n_channels)).unwrap();
  let platform  = Arc::new(SimPlatform::new());
  let emulators = spawn_emulators(&graph, &platform, behaviour).unwrap();
  let registry  = ChannelRegistry::resolve(&graph, platform.as_ref(), &engine_settings()).unwrap();
  // 10 ms rise at 10 kHz gives 100 triggers per cycle
  for k in 0..registry.len() {
    registry.configure(k, 10.0, 50.0, 1.0, 10000.0).unwrap();
  }
  (registry, emulators, platform)
}

/// Poll until `n` batches are there, an error
/// shows up or `timeout` has passed
fn collect(registry : &ChannelRegistry, channel : usize, n : usize, timeout : Duration)
  -> Result<Vec<CycleBatch>, RegistryError> {
  let deadline    = Instant::now() + timeout;
  let mut batches = Vec::<CycleBatch>::new();
  while batches.len() < n && Instant::now() < deadline {
    let new = registry.poll(channel, Some(Duration::from_millis(50)), Duration::from_millis(50))?;
    batches.extend(new);
  }
  Ok(batches)
}

fn wait_for_state(registry : &ChannelRegistry, channel : usize, state : ChannelState) -> bool {
  let deadline = Instant::now() + Duration::from_secs(5);
  while Instant::now() < deadline {
    if registry.state(channel).unwrap() == state {
      return true;
    }
    thread::sleep(Duration::from_millis(5));
  }
  false
}

#[test]
fn resolve_demo_build() {
  let (registry, _emulators, _platform) = sim_setup(3, SimBehaviour::new());
  assert_eq!(registry.len(), 3);
  let config = registry.channel(2).unwrap().config();
  assert_eq!(config.name, "axis_tomography_2");
  assert_eq!(config.dac.chname, "20");
  assert_eq!(config.adc.chname, "20");
  assert_eq!(config.interpolation, 4);
  assert_eq!(config.dma.time,   "axi_dma_time_2");
  assert_eq!(config.dma.dc,     "axi_dma_dc_2");
  assert_eq!(config.dma.graphy, "axi_dma_graphy_2");
  assert!(registry.describe().contains("axis_tomography_1"));
  for k in 0..3 {
    assert_eq!(registry.state(k).unwrap(), ChannelState::Idle);
  }
}

#[test]
fn run_cycles() {
  let (registry, _emulators, _platform) = sim_setup(1, SimBehaviour::new());
  registry.start(0, 3).unwrap();
  let batches = collect(&registry, 0, 3, Duration::from_secs(10)).unwrap();
  assert_eq!(batches.len(), 3);
  for (k, batch) in batches.iter().enumerate() {
    assert_eq!(batch.cycle, k as u32);
    assert_eq!(batch.target_triggers, N_TRIGGERS as u32);
    assert_eq!(batch.tag_count, N_TRIGGERS as u32);
    assert_eq!(batch.data_count, (N_TRIGGERS * 1024) as u32);
    assert_eq!(batch.records.len(), N_TRIGGERS);
    for record in &batch.records {
      assert_eq!(record.decision_value, sim_decision_value(1, k as u32) as f64);
      assert_eq!(record.waveform.len(), 100);
    }
  }
  let first = &batches[0].records[0];
  // 1000 clocks at 2457.6 MHz
  assert!((first.time_ms - 1000.0 / 2457.6e3).abs() < 1e-12);
  let expected : Vec<i16> = (0..5).map(sim_waveform_sample).collect();
  assert_eq!(first.waveform[..5], expected[..]);
  assert!(wait_for_state(&registry, 0, ChannelState::Idle));
  // nothing left over
  let rest = registry.poll(0, Some(Duration::from_millis(20)), Duration::from_millis(20)).unwrap();
  assert!(rest.is_empty());
}

#[test]
fn restart_drops_previous_run() {
  let mut behaviour = SimBehaviour::new();
  behaviour.cycle_period = Duration::from_millis(5);
  let (registry, _emulators, _platform) = sim_setup(1, behaviour);
  registry.start(0, 1000).unwrap();
  let early = collect(&registry, 0, 2, Duration::from_secs(10)).unwrap();
  assert!(early.len() >= 2);
  assert_eq!(early[0].records[0].decision_value, sim_decision_value(1, 0) as f64);

  // restart while the first run is still going
  registry.start(0, 3).unwrap();
  let batches = collect(&registry, 0, 3, Duration::from_secs(10)).unwrap();
  assert_eq!(batches.len(), 3);
  for (k, batch) in batches.iter().enumerate() {
    assert_eq!(batch.cycle, k as u32);
    for record in &batch.records {
      assert_eq!(record.decision_value, sim_decision_value(2, k as u32) as f64);
    }
  }
  // no old event shows up after the new ones, and the
  // fabric clock keeps running across the restart
  let times : Vec<f64> = early.iter().chain(batches.iter())
    .flat_map(|b| b.records.iter().map(|r| r.time_ms))
    .collect();
  assert!(times.windows(2).all(|w| w[0] < w[1]));
  assert!(wait_for_state(&registry, 0, ChannelState::Idle));
}

#[test]
fn stop_ends_run() {
  let mut behaviour = SimBehaviour::new();
  behaviour.cycle_period = Duration::from_millis(5);
  let (registry, _emulators, _platform) = sim_setup(1, behaviour);
  registry.start(0, 1000).unwrap();
  let early = collect(&registry, 0, 1, Duration::from_secs(10)).unwrap();
  assert!(!early.is_empty());
  registry.stop(0).unwrap();
  assert_eq!(registry.state(0).unwrap(), ChannelState::Idle);
  let engine = registry.channel(0).unwrap();
  let start  = engine.register_dump().into_iter().find(|(name, _)| *name == "start").unwrap();
  assert_eq!(start.1, 0);
  // stopping twice is fine
  registry.stop(0).unwrap();
}

#[test]
fn hardware_fault_ends_run() {
  let mut behaviour = SimBehaviour::new();
  behaviour.fault_at_cycle = Some(1);
  let (registry, _emulators, _platform) = sim_setup(1, behaviour);
  registry.start(0, 3).unwrap();
  let deadline = Instant::now() + Duration::from_secs(10);
  let mut fault = None;
  while Instant::now() < deadline {
    match registry.poll(0, Some(Duration::from_millis(50)), Duration::from_millis(50)) {
      Err(err) => {
        fault = Some(err);
        break;
      }
      Ok(_) => ()
    }
  }
  assert!(matches!(fault,
                   Some(RegistryError::Acquisition(AcquisitionError::HardwareFault { cycle : 1 }))));
  assert!(wait_for_state(&registry, 0, ChannelState::Error));

  // the worker is still there for the next run
  registry.start(0, 1).unwrap();
  let batches = collect(&registry, 0, 1, Duration::from_secs(10)).unwrap();
  assert_eq!(batches.len(), 1);
  assert_eq!(batches[0].records[0].decision_value, sim_decision_value(2, 0) as f64);
  assert!(wait_for_state(&registry, 0, ChannelState::Idle));
}

#[test]
fn channels_run_independently() {
  let (registry, _emulators, _platform) = sim_setup(2, SimBehaviour::new());
  registry.configure(1, 5.0, 50.0, 0.5, 10000.0).unwrap();
  registry.start(0, 2).unwrap();
  registry.start(1, 4).unwrap();
  let b0 = collect(&registry, 0, 2, Duration::from_secs(10)).unwrap();
  let b1 = collect(&registry, 1, 4, Duration::from_secs(10)).unwrap();
  assert_eq!(b0.len(), 2);
  assert_eq!(b1.len(), 4);
  assert!(b0.iter().all(|b| b.records.len() == N_TRIGGERS));
  assert!(b1.iter().all(|b| b.records.len() == 50));
}

#[test]
fn illegal_channel() {
  let (registry, _emulators, _platform) = sim_setup(2, SimBehaviour::new());
  assert!(matches!(registry.start(5, 1),
                   Err(RegistryError::IllegalChannel { channel : 5, n_channels : 2 })));
  assert!(matches!(registry.poll(2, None, Duration::from_millis(1)),
                   Err(RegistryError::IllegalChannel { .. })));
  assert!(matches!(registry.start(0, 0),
                   Err(RegistryError::Acquisition(AcquisitionError::InvalidCycleCount))));
}

#[test]
fn rejected_configuration_changes_nothing() {
  let (registry, _emulators, _platform) = sim_setup(1, SimBehaviour::new());
  let engine = registry.channel(0).unwrap();
  let before = engine.timing();
  // 100 ms at 100 kHz are 10000 triggers, the limit is 200
  assert!(matches!(registry.configure(0, 100.0, 50.0, 1.0, 100000.0),
                   Err(RegistryError::Configuration(ConfigurationError::TooManyTriggers { .. }))));
  assert!(matches!(registry.configure(0, 10.0, 10.0, 1.0, 10000.0),
                   Err(RegistryError::Configuration(ConfigurationError::FallTimeTooShort(_)))));
  assert!(registry.set_threshold(0, 1.5).is_err());
  assert_eq!(engine.timing(), before);
  // nothing reaches the hardware before a run
  assert!(engine.register_dump().iter().all(|(_, value)| *value == 0));
}

#[test]
fn poll_after_stop_returns_finished_cycles() {
  let mut behaviour = SimBehaviour::new();
  behaviour.cycle_period = Duration::from_millis(5);
  let (registry, _emulators, _platform) = sim_setup(1, behaviour);
  registry.start(0, 1000).unwrap();
  let early = collect(&registry, 0, 1, Duration::from_secs(10)).unwrap();
  assert!(!early.is_empty());
  // let some cycles queue up
  thread::sleep(Duration::from_millis(200));
  registry.stop(0).unwrap();
  let mut late = Vec::<CycleBatch>::new();
  for _ in 0..5 {
    late.extend(registry.poll(0, Some(Duration::from_secs(1)), Duration::from_millis(50)).unwrap());
  }
  assert!(!late.is_empty());
  let mut next = early.last().unwrap().cycle + 1;
  for batch in &late {
    assert_eq!(batch.cycle, next);
    next += 1;
  }
  assert!(registry.poll(0, Some(Duration::from_millis(20)), Duration::from_millis(20)).unwrap().is_empty());
  assert_eq!(registry.state(0).unwrap(), ChannelState::Idle);
}

#[test]
fn stop_ends_poll_without_deadline() {
  let mut behaviour = SimBehaviour::new();
  behaviour.cycle_period = Duration::from_millis(5);
  let (registry, _emulators, _platform) = sim_setup(1, behaviour);
  registry.start(0, 1000).unwrap();
  let begin = Instant::now();
  let batches = thread::scope(|s| {
    s.spawn(|| {
      thread::sleep(Duration::from_millis(100));
      registry.stop(0).unwrap();
    });
    // batches keep coming, only the stop ends this
    registry.poll(0, None, Duration::from_secs(30)).unwrap()
  });
  assert!(begin.elapsed() < Duration::from_secs(10));
  assert!(!batches.is_empty());
  for (k, batch) in batches.iter().enumerate() {
    assert_eq!(batch.cycle, k as u32);
  }
  assert!(!registry.is_active(0).unwrap());
}

#[test]
fn state_follows_the_worker() {
  let mut behaviour = SimBehaviour::new();
  behaviour.cycle_period = Duration::from_millis(5);
  let (registry, _emulators, _platform) = sim_setup(1, behaviour);
  registry.start(0, 1000).unwrap();
  assert!(registry.is_active(0).unwrap());
  assert!(wait_for_state(&registry, 0, ChannelState::Running));
  registry.stop(0).unwrap();
  assert_eq!(registry.state(0).unwrap(), ChannelState::Idle);
  assert!(!registry.is_active(0).unwrap());

  // stopped before the worker may even have seen it
  registry.start(0, 1000).unwrap();
  registry.stop(0).unwrap();
  assert_eq!(registry.state(0).unwrap(), ChannelState::Idle);
  thread::sleep(Duration::from_millis(20));
  assert_eq!(registry.state(0).unwrap(), ChannelState::Idle);

  registry.start(0, 2).unwrap();
  let batches = collect(&registry, 0, 2, Duration::from_secs(10)).unwrap();
  assert_eq!(batches.len(), 2);
  assert!(wait_for_state(&registry, 0, ChannelState::Idle));
}

#[test]
fn trigger_limit_has_to_fit_a_transfer() {
  let graph    = NetlistGraph::from_description(&demo_description(1)).unwrap();
  let platform = SimPlatform::new();
  let mut settings = engine_settings();
  // 2048 waveform bytes per event, 2^26 - 1 bytes per transfer
  settings.trigger_limit = 40000;
  match ChannelRegistry::resolve(&graph, &platform, &settings) {
    Err(RegistryError::TriggerLimitTooLarge { trigger_limit, max_triggers, .. }) => {
      assert_eq!(trigger_limit, 40000);
      assert_eq!(max_triggers, 32767);
    }
    Err(err) => panic!("Unexpected error {}", err),
    Ok(_)    => panic!("A trigger limit of 40000 was accepted"),
  }
}
