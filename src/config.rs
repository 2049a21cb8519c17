//! Runtime configuration from environment variables, read once at startup.

use crate::client::{Credentials, DEFAULT_BASE_URL};
use crate::models::ariston::GatewayId;
use crate::slots::TemperatureBounds;
use log::warn;
use std::time::Duration;

pub const DEFAULT_POLL_SECS: u64 = 60;
pub const MIN_POLL_SECS: u64 = 30;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 10;
pub const DEFAULT_STATUS_CHECK_HEARTBEATS: u32 = 10;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MIN_TEMP: f64 = 40.0;
pub const DEFAULT_MAX_TEMP: f64 = 80.0;
pub const DEFAULT_DOMOTICZ_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_DEVICE_PREFIX: &str = "Ariston";

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub api_url: String,
    /// Remote polling cadence, never below [`MIN_POLL_SECS`].
    pub poll_interval: Duration,
    /// Host tick: command relay and display refresh.
    pub heartbeat: Duration,
    pub status_check_heartbeats: u32,
    pub command_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Target temperature range used until the plant reports one.
    pub fallback_bounds: TemperatureBounds,
    pub domoticz_url: String,
    /// Idx of the Dummy hardware the devices belong to.
    pub domoticz_hardware_idx: u32,
    pub domoticz_device_prefix: String,
    pub debug: bool,
}

/// Default `env_logger` filter: `LOG_MODE=Debug` turns on debug output.
pub fn default_log_filter() -> &'static str {
    match std::env::var("LOG_MODE") {
        Ok(v) if is_debug_mode(&v) => "debug",
        _ => "info",
    }
}

fn is_debug_mode(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("debug")
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let username = var("ARISTON_USERNAME").ok_or_else(|| "ARISTON_USERNAME is required".to_string())?;
        let password = var("ARISTON_PASSWORD").ok_or_else(|| "ARISTON_PASSWORD is required".to_string())?;
        let gateway = match var("ARISTON_GATEWAY") {
            Some(raw) => Some(GatewayId::parse(&raw).map_err(|e| format!("ARISTON_GATEWAY: {}", e))?),
            None => None,
        };

        let poll_secs = match var("POLL_INTERVAL_SECS") {
            None => DEFAULT_POLL_SECS,
            Some(raw) => match raw.parse::<u64>() {
                Ok(v) if v < MIN_POLL_SECS => {
                    warn!("Minimum poll interval is {}s; using it instead of {}s", MIN_POLL_SECS, v);
                    MIN_POLL_SECS
                }
                Ok(v) => v,
                Err(_) => {
                    warn!("POLL_INTERVAL_SECS '{}' is not a number; using {}s", raw, DEFAULT_POLL_SECS);
                    DEFAULT_POLL_SECS
                }
            },
        };

        let heartbeat_secs = parse_positive(&var, "HEARTBEAT_SECS", DEFAULT_HEARTBEAT_SECS)?;
        let status_check_heartbeats =
            parse_positive(&var, "STATUS_CHECK_HEARTBEATS", DEFAULT_STATUS_CHECK_HEARTBEATS)?;
        let command_timeout_secs = parse_positive(&var, "COMMAND_TIMEOUT_SECS", DEFAULT_COMMAND_TIMEOUT_SECS)?;
        let shutdown_timeout_secs = parse_positive(&var, "SHUTDOWN_TIMEOUT_SECS", DEFAULT_SHUTDOWN_TIMEOUT_SECS)?;

        let min_temp = parse_temp(&var, "DHW_MIN_TEMP", DEFAULT_MIN_TEMP)?;
        let max_temp = parse_temp(&var, "DHW_MAX_TEMP", DEFAULT_MAX_TEMP)?;
        if min_temp >= max_temp {
            return Err(format!(
                "DHW_MIN_TEMP ({}) must be below DHW_MAX_TEMP ({})",
                min_temp, max_temp
            ));
        }

        let domoticz_hardware_idx = var("DOMOTICZ_HARDWARE_IDX")
            .ok_or_else(|| "DOMOTICZ_HARDWARE_IDX is required (idx of a Dummy hardware)".to_string())?
            .parse::<u32>()
            .map_err(|_| "DOMOTICZ_HARDWARE_IDX must be a non-negative integer".to_string())?;

        Ok(Config {
            credentials: Credentials {
                username,
                password,
                gateway,
            },
            api_url: var("ARISTON_API_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            poll_interval: Duration::from_secs(poll_secs),
            heartbeat: Duration::from_secs(heartbeat_secs),
            status_check_heartbeats,
            command_timeout: Duration::from_secs(command_timeout_secs),
            shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
            fallback_bounds: TemperatureBounds {
                min: min_temp,
                max: max_temp,
            },
            domoticz_url: var("DOMOTICZ_URL").unwrap_or_else(|| DEFAULT_DOMOTICZ_URL.to_string()),
            domoticz_hardware_idx,
            domoticz_device_prefix: var("DOMOTICZ_DEVICE_PREFIX").unwrap_or_else(|| DEFAULT_DEVICE_PREFIX.to_string()),
            debug: var("LOG_MODE").is_some_and(|v| is_debug_mode(&v)),
        })
    }
}

fn parse_positive<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, String>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => match raw.parse::<T>() {
            Ok(v) if v > T::default() => Ok(v),
            _ => Err(format!("{} must be a positive integer, got '{}'", key, raw)),
        },
    }
}

fn parse_temp(var: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> Result<f64, String> {
    match var(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("{} must be a number, got '{}'", key, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(extra: &[(&str, &str)]) -> Result<Config, String> {
        let mut env: HashMap<String, String> = [
            ("ARISTON_USERNAME", "me@example.com"),
            ("ARISTON_PASSWORD", "secret"),
            ("DOMOTICZ_HARDWARE_IDX", "5"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in extra {
            env.insert(k.to_string(), v.to_string());
        }
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config_with(&[]).unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_secs(60));
        assert_eq!(cfg.heartbeat, Duration::from_secs(10));
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(cfg.fallback_bounds, TemperatureBounds { min: 40.0, max: 80.0 });
        assert_eq!(cfg.credentials.gateway, None);
        assert_eq!(cfg.api_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.domoticz_hardware_idx, 5);
        assert!(!cfg.debug);
    }

    #[test]
    fn poll_interval_is_clamped_to_minimum() {
        let cfg = config_with(&[("POLL_INTERVAL_SECS", "10")]).unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_secs(30));
        let cfg = config_with(&[("POLL_INTERVAL_SECS", "120")]).unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_secs(120));
    }

    #[test]
    fn non_numeric_poll_interval_falls_back() {
        let cfg = config_with(&[("POLL_INTERVAL_SECS", "often")]).unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_secs(60));
    }

    #[test]
    fn credentials_are_required() {
        let err = Config::from_lookup(|_| None).unwrap_err();
        assert!(err.contains("ARISTON_USERNAME"));
        let err = config_with(&[("ARISTON_PASSWORD", "  ")]).unwrap_err();
        assert!(err.contains("ARISTON_PASSWORD"));
    }

    #[test]
    fn gateway_is_validated_and_upper_cased() {
        let cfg = config_with(&[("ARISTON_GATEWAY", "14335cf112fc")]).unwrap();
        assert_eq!(cfg.credentials.gateway, Some(GatewayId("14335CF112FC".into())));
        assert!(config_with(&[("ARISTON_GATEWAY", "zz-top")]).is_err());
        let cfg = config_with(&[("ARISTON_GATEWAY", "")]).unwrap();
        assert_eq!(cfg.credentials.gateway, None);
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(config_with(&[("HEARTBEAT_SECS", "0")]).is_err());
        assert!(config_with(&[("COMMAND_TIMEOUT_SECS", "-3")]).is_err());
        assert!(config_with(&[("DHW_MIN_TEMP", "70"), ("DHW_MAX_TEMP", "60")]).is_err());
        assert!(config_with(&[("DHW_MAX_TEMP", "NaN")]).is_err());
        assert!(config_with(&[("DOMOTICZ_HARDWARE_IDX", "dummy")]).is_err());
    }

    #[test]
    fn debug_mode_toggle() {
        assert!(config_with(&[("LOG_MODE", "Debug")]).unwrap().debug);
        assert!(!config_with(&[("LOG_MODE", "Normal")]).unwrap().debug);
    }
}
