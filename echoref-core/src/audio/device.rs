//! Audio output device enumeration.

use serde::{Deserialize, Serialize};

/// Metadata about an audio output device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default output device.
    pub is_default: bool,
}

/// Case- and whitespace-insensitive device name match.
pub fn matches_preference(name: &str, preferred: &str) -> bool {
    let preferred = preferred.trim();
    !preferred.is_empty() && name.trim().eq_ignore_ascii_case(preferred)
}

/// Resolve the output device: preferred name first, then the host default,
/// then the first device listed.
#[cfg(feature = "audio-cpal")]
pub fn select_output_device(
    host: &cpal::Host,
    preferred: Option<&str>,
) -> crate::error::Result<cpal::Device> {
    use crate::error::EchoRefError;
    use cpal::traits::{DeviceTrait, HostTrait};
    use tracing::warn;

    if let Some(preferred) = preferred {
        match host.output_devices() {
            Ok(mut devices) => {
                let found = devices.find(|device| {
                    device
                        .name()
                        .map(|name| matches_preference(&name, preferred))
                        .unwrap_or(false)
                });
                if let Some(device) = found {
                    return Ok(device);
                }
                warn!("preferred output device '{}' not found, falling back", preferred);
            }
            Err(e) => warn!("failed to list output devices while resolving preference: {e}"),
        }
    }

    if let Some(default) = host.default_output_device() {
        return Ok(default);
    }

    let mut devices = host
        .output_devices()
        .map_err(|e| EchoRefError::AudioDevice(e.to_string()))?;
    let fallback = devices.next().ok_or(EchoRefError::NoDefaultOutputDevice)?;
    warn!("no default output device, falling back to first available output");
    Ok(fallback)
}

/// List all available audio output devices, default first.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    match host.output_devices() {
        Ok(devices) => {
            let mut list = devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
                    let is_default = default_name.as_deref() == Some(name.as_str());
                    OutputDeviceInfo { name, is_default }
                })
                .collect::<Vec<_>>();
            list.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            default_name
                .map(|name| {
                    vec![OutputDeviceInfo {
                        name,
                        is_default: true,
                    }]
                })
                .unwrap_or_default()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    vec![]
}
