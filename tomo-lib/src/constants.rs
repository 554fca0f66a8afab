//! IP type names and port names we rely on when
//! resolving a build

/// The RF data converter (all DAC and ADC tiles)
pub const RFDC_TYPE        : &str = "usp_rf_data_converter";
/// AXI DMA engines, sinks of the acquired streams
pub const AXI_DMA_TYPE     : &str = "axi_dma";
/// The tomography (photon timing) block
pub const TOMOGRAPHY_TYPE  : &str = "axis_tomography";

/// Endpoints with this in their path are
/// instrumentation only (ILAs) and never
/// part of a data path
pub const DEBUG_ENDPOINT_MARKER : &str = "system_ila_";

/// Bus name the description uses for
/// connections through the NoC
pub const NOC_BUS : &str = "__NOC__";

/// Tomography output driving the DAC
pub const DAC_RFDC_PORT    : &str = "M0_DAC";
/// Tomography input fed by the ADC
pub const ADC_RFDC_PORT    : &str = "S0_ADC";
/// Per-event timestamps
pub const DMA_TIME_PORT    : &str = "M0_ADC";
/// Per-event decision samples
pub const DMA_DC_PORT      : &str = "M1_ADC";
/// Oversampled waveform
pub const DMA_GRAPHY_PORT  : &str = "M2_ADC";
