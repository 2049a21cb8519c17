//! Seams between the plugin and the automation host.

use log::info;

use crate::error::BridgeError;
use crate::slots::{DeviceSpec, Slot, SlotValue};

/// Device registry of the host, keyed by unit id.
pub trait Host {
    fn has_device(&self, unit: u8) -> bool;
    fn create_device(&mut self, spec: &DeviceSpec) -> Result<(), BridgeError>;
    fn update_device(&mut self, unit: u8, value: &SlotValue) -> Result<(), BridgeError>;
}

/// Source of user actions performed in the host UI.
pub trait CommandSource {
    fn poll_commands(&mut self) -> Result<Vec<HostCommand>, BridgeError>;
}

/// A user action on one of the bridge's devices, as the host reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub unit: u8,
    pub command: String,
    pub level: String,
}

impl HostCommand {
    pub fn switch(on: bool) -> Self {
        HostCommand {
            unit: Slot::Power.unit(),
            command: if on { "On" } else { "Off" }.to_string(),
            level: String::new(),
        }
    }

    pub fn set_level(unit: u8, level: impl Into<String>) -> Self {
        HostCommand {
            unit,
            command: "Set Level".to_string(),
            level: level.into(),
        }
    }
}

/// Create every slot device that the host does not know yet. Returns how many were created.
pub fn ensure_devices<H: Host + ?Sized>(host: &mut H) -> Result<usize, BridgeError> {
    let mut created = 0;
    for slot in Slot::ALL {
        let spec = slot.spec();
        if host.has_device(spec.unit) {
            continue;
        }
        host.create_device(&spec)?;
        info!("Created device: {} (unit {})", spec.name, spec.unit);
        created += 1;
    }
    Ok(created)
}
