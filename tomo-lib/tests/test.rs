use std::io::Write;

use tomo_lib::{
    NetlistGraph,
    PortTracer,
    TomoSettings,
};
use tomo_lib::errors::DescriptionError;

#[test]
fn write_and_read_config_file() {
  let mut settings = TomoSettings::new();
  settings.engine.trigger_limit   = 15000;
  settings.waveform.rise_time_ms  = 150.0;
  println!("{}", settings);
  let path = std::env::temp_dir().join("tomo-config-test");
  let name = String::from(path.to_string_lossy());
  settings.to_toml(name.clone()).unwrap();
  let back = TomoSettings::from_toml(&(name + ".toml")).unwrap();
  assert_eq!(back, settings);
}

#[test]
fn read_missing_config_file() {
  assert!(TomoSettings::from_toml("/nonexistent/tomo-config.toml").is_err());
}

#[test]
fn description_from_file() {
  let json = r#"{
    "timestamp" : "Mon Oct 19 10:00:00 2026",
    "modules" : [
      { "fullpath" : "/axis_tomography_0", "vlnv" : "Quantaser:user:axis_tomography:1.0",
        "parameters" : { "INTERPOLATION" : "4" },
        "bus_interfaces" : [ { "name" : "M0_ADC", "bus" : "t0" } ],
        "address" : { "base" : 2684354560, "range" : 65536 } },
      { "fullpath" : "/axi_dma_time_0", "vlnv" : "xilinx.com:ip:axi_dma:7.1",
        "bus_interfaces" : [ { "name" : "S_AXIS_S2MM", "bus" : "t0" } ],
        "address" : { "base" : 2684420096, "range" : 65536 } }
    ]
  }"#;
  let path = std::env::temp_dir().join("tomo-description-test.json");
  let mut file = std::fs::File::create(&path).unwrap();
  file.write_all(json.as_bytes()).unwrap();
  drop(file);

  let graph = NetlistGraph::from_json_file(&path).unwrap();
  assert_eq!(graph.blocks().count(), 2);
  assert_eq!(graph.blocks_of_type("axis_tomography").count(), 1);
  let tomo = graph.block("axis_tomography_0").unwrap();
  assert!(tomo.is_addressable());
  assert_eq!(tomo.address.unwrap().base, 0xA000_0000);
  let found = PortTracer::new(&graph)
    .trace_forward("axis_tomography_0", "M0_ADC", &["axi_dma"], Some(1))
    .unwrap();
  assert_eq!(found[0].block, "axi_dma_time_0");
  assert_eq!(found[0].port, "S_AXIS_S2MM");
}

#[test]
fn description_missing_file() {
  let result = NetlistGraph::from_json_file(std::path::Path::new("/nonexistent/design.json"));
  assert!(matches!(result, Err(DescriptionError::Io {..})));
}
