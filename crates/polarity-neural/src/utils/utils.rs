use anyhow::{anyhow, Result};
use candle_core::Device;
use polarity_classifiers::PolarityError;

/// Converts a device string to a Candle Device.
///
/// # Supported Device Strings
///
/// - `"cpu"`: Returns the CPU device
/// - `"cuda"`: Returns the default CUDA device (index 0)
/// - `"cuda:N"`: Returns the CUDA device with the specified index
///
/// # Errors
///
/// Returns an error if the CUDA device is not available or the device type is
/// not recognised.
pub fn get_device(device_str: &str) -> Result<Device> {
    if device_str.starts_with("cuda") {
        let cuda_index = if device_str == "cuda" {
            0
        } else {
            device_str
                .split(':')
                .nth(1)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0)
        };

        let device = Device::cuda_if_available(cuda_index)?;
        if !device.is_cuda() {
            return Err(anyhow!("CUDA device {} is not available", cuda_index));
        }
        Ok(device)
    } else {
        match device_str {
            "cpu" => Ok(Device::Cpu),
            _ => Err(anyhow!("Unsupported device type: {}", device_str)),
        }
    }
}

/// Map an internal error onto the shared error type, keeping typed errors intact.
pub fn to_polarity_error(err: anyhow::Error) -> PolarityError {
    match err.downcast::<PolarityError>() {
        Ok(typed) => typed,
        Err(other) => PolarityError::backend(format!("{:#}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device() {
        assert!(matches!(get_device("cpu").unwrap(), Device::Cpu));
        assert!(get_device("tpu").is_err());
    }

    #[test]
    fn test_typed_errors_survive_conversion() {
        let err = anyhow::Error::new(PolarityError::NotTrained("lstm".to_string()));
        assert!(matches!(to_polarity_error(err), PolarityError::NotTrained(_)));

        let err = anyhow!("shape mismatch");
        assert!(matches!(to_polarity_error(err), PolarityError::Backend(_)));
    }
}
