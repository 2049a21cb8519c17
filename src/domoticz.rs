//! [`Host`] implementation backed by the Domoticz JSON API.
//!
//! Devices live on a "Dummy" hardware entry and are found by name. User actions are
//! detected by reading the switch and setpoint back on every heartbeat and comparing
//! them with what the bridge last wrote.

use log::{debug, info};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::BridgeError;
use crate::host::{CommandSource, Host, HostCommand};
use crate::models::domoticz::{ApiResponse, DeviceInfo, Empty};
use crate::slots::{DeviceSpec, Slot, SlotValue};

const SETPOINT_EPSILON: f64 = 0.05;

pub struct DomoticzHost {
    agent: ureq::Agent,
    base_url: String,
    hardware_idx: u32,
    prefix: String,
    /// unit -> Domoticz device idx
    units: BTreeMap<u8, String>,
    echoes: Echoes,
}

/// Last value per unit that the bridge wrote or already acknowledged.
///
/// A read-back that differs from it is a user action; one that matches is our own write.
#[derive(Debug, Default)]
pub struct Echoes {
    last: BTreeMap<u8, String>,
}

impl Echoes {
    pub fn wrote(&mut self, unit: u8, svalue: &str) {
        self.last.insert(unit, svalue.to_string());
    }

    /// Record what the host shows now and report it as a command if it is not our echo.
    pub fn observe(&mut self, slot: Slot, observed: &str) -> Option<HostCommand> {
        let previous = self.last.insert(slot.unit(), observed.to_string());
        detect_command(slot, previous.as_deref(), observed)
    }
}

impl DomoticzHost {
    /// Look up the bridge's existing devices on the given hardware.
    pub fn connect(
        base_url: impl Into<String>,
        hardware_idx: u32,
        prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        let mut host = DomoticzHost {
            agent: config.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            hardware_idx,
            prefix: prefix.into(),
            units: BTreeMap::new(),
            echoes: Echoes::default(),
        };

        let devices: Vec<DeviceInfo> = host.command("getdevices", &[("filter", "all"), ("used", "all")])?.result;
        host.units = match_devices(&devices, hardware_idx, &host.prefix);
        info!(
            "Domoticz hardware {}: {} of {} bridge device(s) present",
            hardware_idx,
            host.units.len(),
            Slot::ALL.len()
        );
        Ok(host)
    }

    fn command<T: DeserializeOwned>(&self, param: &str, args: &[(&str, &str)]) -> Result<ApiResponse<T>, BridgeError> {
        let url = format!("{}/json.htm", self.base_url);
        let mut req = self.agent.get(&url).query("type", "command").query("param", param);
        for (k, v) in args {
            req = req.query(*k, *v);
        }
        let mut res = req
            .call()
            .map_err(|e| BridgeError::Transport(format!("domoticz {}: {}", param, e)))?;
        let status = res.status();
        let body = res
            .body_mut()
            .read_to_string()
            .map_err(|e| BridgeError::Transport(format!("domoticz {}: {}", param, e)))?;
        if !status.is_success() {
            return Err(BridgeError::Transport(format!(
                "domoticz {}: http {}: {}",
                param,
                status.as_u16(),
                body
            )));
        }
        let de = &mut serde_json::Deserializer::from_str(&body);
        let parsed: ApiResponse<T> = serde_path_to_error::deserialize(de)
            .map_err(|e| BridgeError::Transport(format!("domoticz {}: bad reply at '{}': {}", param, e.path(), e.inner())))?;
        if !parsed.is_ok() {
            return Err(BridgeError::Transport(format!(
                "domoticz {}: {}",
                param,
                parsed.message.as_deref().unwrap_or(&parsed.status)
            )));
        }
        Ok(parsed)
    }

    fn idx(&self, unit: u8) -> Result<&str, BridgeError> {
        self.units
            .get(&unit)
            .map(String::as_str)
            .ok_or_else(|| BridgeError::Transport(format!("unit {} has no Domoticz device", unit)))
    }

    fn read_back(&self, slot: Slot) -> Result<Option<String>, BridgeError> {
        let idx = self.idx(slot.unit())?;
        let devices: Vec<DeviceInfo> = self.command("getdevices", &[("rid", idx)])?.result;
        let Some(device) = devices.into_iter().next() else {
            return Err(BridgeError::Transport(format!("Domoticz device {} disappeared", idx)));
        };
        Ok(match slot {
            Slot::Power => device.status,
            Slot::TargetTemperature => device.set_point.or(device.data),
            _ => None,
        })
    }
}

impl Host for DomoticzHost {
    fn has_device(&self, unit: u8) -> bool {
        self.units.contains_key(&unit)
    }

    fn create_device(&mut self, spec: &DeviceSpec) -> Result<(), BridgeError> {
        let name = device_name(&self.prefix, spec);
        let hardware = self.hardware_idx.to_string();
        let device_type = spec.device_type.to_string();
        let sub_type = spec.sub_type.to_string();
        let reply: ApiResponse<Empty> = self.command(
            "createdevice",
            &[
                ("idx", hardware.as_str()),
                ("sensorname", name.as_str()),
                ("devicetype", device_type.as_str()),
                ("devicesubtype", sub_type.as_str()),
            ],
        )?;
        let idx = reply
            .idx
            .ok_or_else(|| BridgeError::Transport(format!("domoticz createdevice: no idx returned for '{}'", name)))?;
        debug!("Domoticz device '{}' has idx {}", name, idx);
        self.units.insert(spec.unit, idx);
        Ok(())
    }

    fn update_device(&mut self, unit: u8, value: &SlotValue) -> Result<(), BridgeError> {
        let idx = self.idx(unit)?.to_string();
        let nvalue = value.nvalue.to_string();
        let _: ApiResponse<Empty> = self.command(
            "udevice",
            &[
                ("idx", idx.as_str()),
                ("nvalue", nvalue.as_str()),
                ("svalue", value.svalue.as_str()),
            ],
        )?;
        self.echoes.wrote(unit, &value.svalue);
        Ok(())
    }
}

impl CommandSource for DomoticzHost {
    fn poll_commands(&mut self) -> Result<Vec<HostCommand>, BridgeError> {
        let mut commands = Vec::new();
        for slot in [Slot::Power, Slot::TargetTemperature] {
            if !self.units.contains_key(&slot.unit()) {
                continue;
            }
            let Some(observed) = self.read_back(slot)? else {
                continue;
            };
            if let Some(cmd) = self.echoes.observe(slot, &observed) {
                debug!("Detected user action on unit {}: {:?}", slot.unit(), cmd);
                commands.push(cmd);
            }
        }
        Ok(commands)
    }
}

pub fn device_name(prefix: &str, spec: &DeviceSpec) -> String {
    format!("{} - {}", prefix, spec.name)
}

/// Map slot units to the idx of same-named devices on our hardware.
fn match_devices(devices: &[DeviceInfo], hardware_idx: u32, prefix: &str) -> BTreeMap<u8, String> {
    let mut units = BTreeMap::new();
    for slot in Slot::ALL {
        let spec = slot.spec();
        let name = device_name(prefix, &spec);
        if let Some(dev) = devices
            .iter()
            .find(|d| d.hardware_id == hardware_idx && d.name == name)
        {
            units.insert(spec.unit, dev.idx.clone());
        }
    }
    units
}

/// A user action is a read-back value that differs from what was last written.
/// Without a previous value the observation is only a baseline.
fn detect_command(slot: Slot, previous: Option<&str>, observed: &str) -> Option<HostCommand> {
    let previous = previous?;
    match slot {
        Slot::Power => {
            let was_on = previous.eq_ignore_ascii_case("on");
            let is_on = observed.eq_ignore_ascii_case("on");
            (was_on != is_on).then(|| HostCommand::switch(is_on))
        }
        Slot::TargetTemperature => {
            let now = observed.trim().parse::<f64>().ok();
            let before = previous.trim().parse::<f64>().ok();
            let changed = match (before, now) {
                (Some(a), Some(b)) => (a - b).abs() > SETPOINT_EPSILON,
                _ => previous.trim() != observed.trim(),
            };
            changed.then(|| HostCommand::set_level(slot.unit(), observed.trim()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_devices() -> Vec<DeviceInfo> {
        let json = std::fs::read_to_string("tests/data/domoticz-devices.json").expect("fixture present");
        let resp: ApiResponse<DeviceInfo> = serde_json::from_str(&json).expect("parse getdevices");
        resp.result
    }

    #[test]
    fn devices_are_matched_by_hardware_and_name() {
        let units = match_devices(&fixture_devices(), 5, "Ariston");
        assert_eq!(units.get(&2).map(String::as_str), Some("17"));
        assert_eq!(units.get(&4).map(String::as_str), Some("18"));
        assert_eq!(units.len(), 2);

        let other_hw = match_devices(&fixture_devices(), 2, "Ariston");
        assert_eq!(other_hw.get(&2).map(String::as_str), Some("3"));
        assert!(match_devices(&fixture_devices(), 5, "Boiler").is_empty());
    }

    #[test]
    fn first_observation_is_a_baseline() {
        assert_eq!(detect_command(Slot::Power, None, "On"), None);
        assert_eq!(detect_command(Slot::TargetTemperature, None, "55.0"), None);
    }

    #[test]
    fn switch_changes_become_commands() {
        assert_eq!(detect_command(Slot::Power, Some("On"), "Off"), Some(HostCommand::switch(false)));
        assert_eq!(detect_command(Slot::Power, Some("Off"), "On"), Some(HostCommand::switch(true)));
        assert_eq!(detect_command(Slot::Power, Some("On"), "On"), None);
    }

    #[test]
    fn setpoint_changes_compare_numerically() {
        assert_eq!(detect_command(Slot::TargetTemperature, Some("55.0"), "55"), None);
        assert_eq!(
            detect_command(Slot::TargetTemperature, Some("55.0"), "60.0"),
            Some(HostCommand::set_level(4, "60.0"))
        );
        assert_eq!(detect_command(Slot::CurrentTemperature, Some("40.0"), "41.0"), None);
    }

    #[test]
    fn own_writes_read_back_as_no_command() {
        let mut echoes = Echoes::default();
        echoes.wrote(2, "On");
        echoes.wrote(4, "55.0");
        assert_eq!(echoes.observe(Slot::Power, "On"), None);
        assert_eq!(echoes.observe(Slot::TargetTemperature, "55"), None);

        assert_eq!(echoes.observe(Slot::Power, "Off"), Some(HostCommand::switch(false)));
        assert_eq!(echoes.observe(Slot::Power, "Off"), None);

        // a rejected setpoint is written back; the next read-back is quiet
        assert_eq!(
            echoes.observe(Slot::TargetTemperature, "95"),
            Some(HostCommand::set_level(4, "95"))
        );
        echoes.wrote(4, "55.0");
        assert_eq!(echoes.observe(Slot::TargetTemperature, "55.0"), None);
    }

    #[test]
    fn unwritten_units_start_with_a_baseline() {
        let mut echoes = Echoes::default();
        assert_eq!(echoes.observe(Slot::Power, "Off"), None);
        assert_eq!(echoes.observe(Slot::Power, "On"), Some(HostCommand::switch(true)));
    }

    #[test]
    fn names_carry_the_prefix() {
        assert_eq!(device_name("Ariston", &Slot::Status.spec()), "Ariston - DHW Mode");
    }
}
