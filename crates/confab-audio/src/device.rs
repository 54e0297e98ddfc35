use confab_foundation::AudioError;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};

/// Enumerates and opens capture/playback devices on the default host.
///
/// Opening by name tries an exact match first, then a case-insensitive
/// substring match. When a specific name was requested and nothing matches,
/// the error is surfaced instead of silently falling back to the default:
/// device choice is a user decision.
pub struct DeviceManager {
    host: Host,
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
}

enum Direction {
    Input,
    Output,
}

impl DeviceManager {
    pub fn new() -> Result<Self, AudioError> {
        Ok(Self {
            host: cpal::default_host(),
        })
    }

    pub fn host_id(&self) -> cpal::HostId {
        self.host.id()
    }

    pub fn enumerate_inputs(&self) -> Vec<DeviceInfo> {
        self.enumerate(Direction::Input)
    }

    pub fn enumerate_outputs(&self) -> Vec<DeviceInfo> {
        self.enumerate(Direction::Output)
    }

    pub fn default_input_name(&self) -> Option<String> {
        self.host.default_input_device().and_then(|d| d.name().ok())
    }

    pub fn default_output_name(&self) -> Option<String> {
        self.host
            .default_output_device()
            .and_then(|d| d.name().ok())
    }

    pub fn open_input(&self, name: Option<&str>) -> Result<Device, AudioError> {
        match name {
            Some(preferred) => self
                .find_named(Direction::Input, preferred)
                .ok_or_else(|| AudioError::DeviceUnavailable {
                    name: Some(preferred.to_string()),
                }),
            None => self
                .host
                .default_input_device()
                .ok_or(AudioError::DeviceUnavailable { name: None }),
        }
    }

    pub fn open_output(&self, name: Option<&str>) -> Result<Device, AudioError> {
        match name {
            Some(preferred) => self
                .find_named(Direction::Output, preferred)
                .ok_or_else(|| AudioError::DeviceUnavailable {
                    name: Some(preferred.to_string()),
                }),
            None => self
                .host
                .default_output_device()
                .ok_or(AudioError::DeviceUnavailable { name: None }),
        }
    }

    fn enumerate(&self, direction: Direction) -> Vec<DeviceInfo> {
        let mut devices = Vec::new();
        let iter = match direction {
            Direction::Input => self.host.input_devices(),
            Direction::Output => self.host.output_devices(),
        };
        if let Ok(found) = iter {
            for device in found {
                if let Ok(name) = device.name() {
                    devices.push(DeviceInfo {
                        name,
                        is_default: false,
                    });
                }
            }
        }

        let default_name = match direction {
            Direction::Input => self.default_input_name(),
            Direction::Output => self.default_output_name(),
        };
        if let Some(default_name) = default_name {
            for device in &mut devices {
                if device.name == default_name {
                    device.is_default = true;
                }
            }
        }

        devices
    }

    fn find_named(&self, direction: Direction, name: &str) -> Option<Device> {
        let iter = match direction {
            Direction::Input => self.host.input_devices().ok()?,
            Direction::Output => self.host.output_devices().ok()?,
        };
        let mut fallback = None;
        for device in iter {
            if let Ok(device_name) = device.name() {
                if device_name == name {
                    return Some(device);
                }
                if fallback.is_none()
                    && device_name.to_lowercase().contains(&name.to_lowercase())
                {
                    fallback = Some(device);
                }
            }
        }
        if fallback.is_some() {
            tracing::warn!("Device '{}' not found exactly; using closest match", name);
        }
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_named_device_is_an_error_not_a_fallback() {
        let manager = match DeviceManager::new() {
            Ok(m) => m,
            Err(_) => return,
        };
        let result = manager.open_input(Some("definitely-not-a-real-device-9000"));
        assert!(matches!(
            result,
            Err(AudioError::DeviceUnavailable { name: Some(_) })
        ));
    }

    #[test]
    fn enumeration_marks_at_most_one_default_per_direction() {
        let manager = match DeviceManager::new() {
            Ok(m) => m,
            Err(_) => return,
        };
        for devices in [manager.enumerate_inputs(), manager.enumerate_outputs()] {
            let defaults = devices.iter().filter(|d| d.is_default).count();
            assert!(defaults <= 1);
        }
    }
}
