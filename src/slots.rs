//! The four local device slots and how a snapshot maps onto them.

use crate::error::BridgeError;
use crate::models::ariston::Snapshot;

pub const OFFLINE_TEXT: &str = "Offline";
/// Status text after recovery when the plant has never reported a `dhw_mode`.
pub const ONLINE_TEXT: &str = "Online";
const POWER_OFF_MODE: &str = "OFF";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    CurrentTemperature,
    Power,
    Status,
    TargetTemperature,
}

impl Slot {
    pub const ALL: [Slot; 4] = [
        Slot::CurrentTemperature,
        Slot::Power,
        Slot::Status,
        Slot::TargetTemperature,
    ];

    pub fn unit(self) -> u8 {
        match self {
            Slot::CurrentTemperature => 1,
            Slot::Power => 2,
            Slot::Status => 3,
            Slot::TargetTemperature => 4,
        }
    }

    pub fn from_unit(unit: u8) -> Option<Slot> {
        Slot::ALL.into_iter().find(|s| s.unit() == unit)
    }

    pub fn spec(self) -> DeviceSpec {
        match self {
            Slot::CurrentTemperature => DeviceSpec {
                unit: 1,
                name: "DHW Temperature",
                device_type: 80,
                sub_type: 5,
            },
            Slot::Power => DeviceSpec {
                unit: 2,
                name: "DHW Power",
                device_type: 244,
                sub_type: 73,
            },
            Slot::Status => DeviceSpec {
                unit: 3,
                name: "DHW Mode",
                device_type: 243,
                sub_type: 19,
            },
            Slot::TargetTemperature => DeviceSpec {
                unit: 4,
                name: "DHW Set Temperature",
                device_type: 242,
                sub_type: 1,
            },
        }
    }
}

/// Fixed definition of a device the host creates for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSpec {
    pub unit: u8,
    pub name: &'static str,
    pub device_type: u16,
    pub sub_type: u16,
}

/// Display value pair of a host device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotValue {
    pub nvalue: i32,
    pub svalue: String,
}

impl SlotValue {
    pub fn text(s: impl Into<String>) -> Self {
        SlotValue {
            nvalue: 0,
            svalue: s.into(),
        }
    }

    pub fn temperature(celsius: f64) -> Self {
        SlotValue::text(format!("{:.1}", celsius))
    }

    pub fn power(on: bool) -> Self {
        if on {
            SlotValue {
                nvalue: 1,
                svalue: "On".to_string(),
            }
        } else {
            SlotValue {
                nvalue: 0,
                svalue: "Off".to_string(),
            }
        }
    }
}

/// `mode` is the only power indicator the plant reports.
pub fn mode_is_on(mode: &str) -> bool {
    mode != POWER_OFF_MODE
}

/// Slot updates for every sensor that carries a value. Absent and null sensors are skipped.
pub fn reconcile(snapshot: &Snapshot) -> Vec<(Slot, SlotValue)> {
    let mut updates = Vec::with_capacity(4);

    if let Some(t) = snapshot.dhw_storage_temperature.get() {
        updates.push((Slot::CurrentTemperature, SlotValue::temperature(t)));
    }
    if let Some(mode) = snapshot.mode.value() {
        updates.push((Slot::Power, SlotValue::power(mode_is_on(mode))));
    }
    if snapshot.available.get() == Some(false) {
        updates.push((Slot::Status, SlotValue::text(OFFLINE_TEXT)));
    } else if let Some(dhw_mode) = snapshot.dhw_mode.value() {
        updates.push((Slot::Status, SlotValue::text(dhw_mode.as_str())));
    }
    if let Some(t) = snapshot.dhw_set_temperature.get() {
        updates.push((Slot::TargetTemperature, SlotValue::temperature(t)));
    }

    updates
}

/// Closed range accepted for target temperature commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureBounds {
    pub min: f64,
    pub max: f64,
}

impl TemperatureBounds {
    /// Replace either end with what the plant reports; keeps the old range if the result would be empty.
    pub fn refined(self, min: Option<f64>, max: Option<f64>) -> TemperatureBounds {
        let next = TemperatureBounds {
            min: min.unwrap_or(self.min),
            max: max.unwrap_or(self.max),
        };
        if next.min.is_finite() && next.max.is_finite() && next.min < next.max {
            next
        } else {
            self
        }
    }

    pub fn check(&self, celsius: f64) -> Result<f64, BridgeError> {
        if !celsius.is_finite() {
            return Err(BridgeError::Validation(format!("temperature {} is not a number", celsius)));
        }
        if celsius < self.min || celsius > self.max {
            return Err(BridgeError::Validation(format!(
                "temperature {:.1} outside allowed range [{:.1}, {:.1}]",
                celsius, self.min, self.max
            )));
        }
        Ok(celsius)
    }

    /// Parse a host command level and check it against the range.
    pub fn parse_level(&self, level: &str) -> Result<f64, BridgeError> {
        let value = level
            .trim()
            .parse::<f64>()
            .map_err(|_| BridgeError::Validation(format!("temperature level '{}' is not a number", level)))?;
        self.check(value)
    }
}
