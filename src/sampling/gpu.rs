//! GPU telemetry backed by NVML.
//!
//! NVML is loaded dynamically when `NvmlGpuSource::detect` runs. Hosts without
//! the NVIDIA driver get a source whose capability is `Absent` and which
//! never touches the library again.

use crate::core::{GpuCapability, GpuReading, GpuSource};
use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::Nvml;
use tracing::{debug, info, trace};

/// A `GpuSource` reading NVIDIA devices through `nvml-wrapper`.
pub struct NvmlGpuSource {
    nvml: Option<Nvml>,
    capability: GpuCapability,
}

impl NvmlGpuSource {
    /// Initializes NVML once and records whether any device is usable.
    pub fn detect() -> Self {
        match Nvml::init() {
            Ok(nvml) => match nvml.device_count() {
                Ok(count) if count > 0 => {
                    info!(device_count = count, "GPU telemetry available");
                    Self {
                        nvml: Some(nvml),
                        capability: GpuCapability::Present {
                            device_count: count,
                        },
                    }
                }
                Ok(_) => {
                    info!("NVML initialized but no GPU devices were found");
                    Self::absent()
                }
                Err(e) => {
                    debug!(error = %e, "NVML device count failed, GPU telemetry disabled");
                    Self::absent()
                }
            },
            Err(e) => {
                debug!(error = %e, "NVML not available, GPU telemetry disabled");
                Self::absent()
            }
        }
    }

    /// A source for hosts without GPU telemetry.
    pub fn absent() -> Self {
        Self {
            nvml: None,
            capability: GpuCapability::Absent,
        }
    }
}

impl GpuSource for NvmlGpuSource {
    fn capability(&self) -> GpuCapability {
        self.capability
    }

    fn read_devices(&self) -> Vec<GpuReading> {
        let Some(nvml) = &self.nvml else {
            return Vec::new();
        };
        let count = self.capability.device_count();
        let mut readings = Vec::with_capacity(count as usize);
        for index in 0..count {
            let device = match nvml.device_by_index(index) {
                Ok(device) => device,
                Err(e) => {
                    trace!(index, error = %e, "Skipping unreadable GPU device");
                    continue;
                }
            };
            let utilization = device.utilization_rates().ok();
            readings.push(GpuReading {
                index,
                name: device.name().ok(),
                utilization_gpu: utilization.as_ref().map(|u| u.gpu),
                utilization_memory: utilization.as_ref().map(|u| u.memory),
                temperature_c: device.temperature(TemperatureSensor::Gpu).ok(),
                fan_percent: device.fan_speed(0).ok(),
                // NVML reports milliwatts.
                power_watts: device.power_usage().ok().map(|mw| mw as f64 / 1000.0),
            });
        }
        readings
    }
}
