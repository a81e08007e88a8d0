//! Compute device and precision selection.
//!
//! Selection runs once, before any model is loaded, and the resulting
//! [`DeviceSelection`] is copied into every adapter. Nothing re-probes the
//! hardware after that, even if accelerator availability changes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{InferenceError, InferenceResult};

/// Compute device a model is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Dedicated NVIDIA GPU
    Cuda,
    /// Unified-memory / on-chip accelerator (Apple silicon)
    CoreMl,
    /// General-purpose CPU
    Cpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cuda => write!(f, "cuda"),
            Device::CoreMl => write!(f, "coreml"),
            Device::Cpu => write!(f, "cpu"),
        }
    }
}

/// Numeric precision of the model weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    F16,
    F32,
}

impl Precision {
    /// Filename suffix of the ONNX export variant for this precision.
    ///
    /// FP16 graphs keep float32 inputs and outputs, so tensors crossing
    /// session boundaries are always `f32`.
    pub fn onnx_suffix(&self) -> &'static str {
        match self {
            Precision::F16 => "_fp16",
            Precision::F32 => "",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::F16 => write!(f, "fp16"),
            Precision::F32 => write!(f, "fp32"),
        }
    }
}

/// Device requested in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Walk the fallback chain: CUDA, then CoreML, then CPU
    #[default]
    Auto,
    Cuda,
    CoreMl,
    Cpu,
}

/// Accelerator availability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Accelerators {
    pub cuda: bool,
    pub coreml: bool,
}

impl Accelerators {
    /// Probe ONNX Runtime for usable execution providers.
    ///
    /// Providers are only probed when the matching cargo feature is enabled.
    pub fn probe() -> Self {
        let available = Self {
            cuda: probe_cuda(),
            coreml: probe_coreml(),
        };
        tracing::debug!(
            cuda = available.cuda,
            coreml = available.coreml,
            "Probed accelerators"
        );
        available
    }
}

#[cfg(feature = "cuda")]
fn probe_cuda() -> bool {
    use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
    CUDAExecutionProvider::default()
        .is_available()
        .unwrap_or(false)
}

#[cfg(not(feature = "cuda"))]
fn probe_cuda() -> bool {
    false
}

#[cfg(feature = "coreml")]
fn probe_coreml() -> bool {
    use ort::execution_providers::{CoreMLExecutionProvider, ExecutionProvider};
    CoreMLExecutionProvider::default()
        .is_available()
        .unwrap_or(false)
}

#[cfg(not(feature = "coreml"))]
fn probe_coreml() -> bool {
    false
}

/// The device/precision pair every adapter is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceSelection {
    pub device: Device,
    pub precision: Precision,
}

impl DeviceSelection {
    /// Bind to `device` with the precision policy: half precision on any
    /// accelerator, full precision on CPU.
    pub fn on(device: Device) -> Self {
        let precision = match device {
            Device::Cuda | Device::CoreMl => Precision::F16,
            Device::Cpu => Precision::F32,
        };
        Self { device, precision }
    }

    pub fn cpu() -> Self {
        Self::on(Device::Cpu)
    }
}

impl fmt::Display for DeviceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.device, self.precision)
    }
}

/// Pick the first available device in the fixed fallback order.
pub fn select(available: Accelerators) -> DeviceSelection {
    let device = if available.cuda {
        Device::Cuda
    } else if available.coreml {
        Device::CoreMl
    } else {
        Device::Cpu
    };
    DeviceSelection::on(device)
}

/// Resolve a configured preference against the available accelerators.
///
/// `Auto` never fails. An explicit accelerator that is not available fails
/// with [`InferenceError::DeviceUnavailable`]; there is no silent fallback.
pub fn select_with_preference(
    preference: DevicePreference,
    available: Accelerators,
) -> InferenceResult<DeviceSelection> {
    let unavailable = |device: Device| InferenceError::DeviceUnavailable {
        device: device.to_string(),
        message: format!(
            "execution provider not available (is glimpse built with the `{device}` feature?)"
        ),
    };

    match preference {
        DevicePreference::Auto => Ok(select(available)),
        DevicePreference::Cpu => Ok(DeviceSelection::cpu()),
        DevicePreference::Cuda if available.cuda => Ok(DeviceSelection::on(Device::Cuda)),
        DevicePreference::Cuda => Err(unavailable(Device::Cuda)),
        DevicePreference::CoreMl if available.coreml => Ok(DeviceSelection::on(Device::CoreMl)),
        DevicePreference::CoreMl => Err(unavailable(Device::CoreMl)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(cuda: bool, coreml: bool) -> Accelerators {
        Accelerators { cuda, coreml }
    }

    #[test]
    fn test_fallback_order() {
        assert_eq!(select(flags(true, true)).device, Device::Cuda);
        assert_eq!(select(flags(true, false)).device, Device::Cuda);
        assert_eq!(select(flags(false, true)).device, Device::CoreMl);
        assert_eq!(select(flags(false, false)).device, Device::Cpu);
    }

    #[test]
    fn test_precision_policy() {
        assert_eq!(select(flags(true, false)).precision, Precision::F16);
        assert_eq!(select(flags(false, true)).precision, Precision::F16);
        assert_eq!(select(flags(false, false)).precision, Precision::F32);
    }

    #[test]
    fn test_selection_is_deterministic() {
        for cuda in [false, true] {
            for coreml in [false, true] {
                let first = select(flags(cuda, coreml));
                let second = select(flags(cuda, coreml));
                assert_eq!(first, second);
            }
        }
    }

    #[test]
    fn test_explicit_preference_without_accelerator_fails() {
        let err = select_with_preference(DevicePreference::Cuda, flags(false, true)).unwrap_err();
        assert!(matches!(err, InferenceError::DeviceUnavailable { ref device, .. } if device == "cuda"));

        let err = select_with_preference(DevicePreference::CoreMl, flags(true, false)).unwrap_err();
        assert!(matches!(err, InferenceError::DeviceUnavailable { .. }));
    }

    #[test]
    fn test_explicit_preference_with_accelerator() {
        let selection = select_with_preference(DevicePreference::CoreMl, flags(true, true)).unwrap();
        assert_eq!(selection, DeviceSelection::on(Device::CoreMl));
    }

    #[test]
    fn test_cpu_preference_ignores_accelerators() {
        let selection = select_with_preference(DevicePreference::Cpu, flags(true, true)).unwrap();
        assert_eq!(selection.device, Device::Cpu);
        assert_eq!(selection.precision, Precision::F32);
    }

    #[test]
    fn test_onnx_suffix() {
        assert_eq!(Precision::F16.onnx_suffix(), "_fp16");
        assert_eq!(Precision::F32.onnx_suffix(), "");
    }
}
