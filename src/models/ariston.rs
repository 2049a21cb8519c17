//! Models for the subset of the Ariston NET v2 API used by the bridge.
//!
//! Notes
//! - Plant listings and features use the vendor's camelCase keys.
//! - Plant data is a flat map of named sensors; every sensor is a [`Reported`] so that a
//!   missing key and an explicit `null` stay distinguishable.

use core::fmt;
use serde::{Deserialize, Deserializer, Serialize};

// =====================
// Scalar ID newtype wrappers
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayId(pub String);

impl GatewayId {
    /// Gateway ids are hex strings; the API is case-insensitive but reports them upper-cased.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("gateway id is empty".to_string());
        }
        if !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("gateway id must be hexadecimal, got '{}'", trimmed));
        }
        Ok(GatewayId(trimmed.to_ascii_uppercase()))
    }

    pub fn matches(&self, other: &GatewayId) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =====================
// Sensor value wrapper
// =====================

/// One named sensor of a plant data snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Reported<T> {
    /// Key missing from the response.
    Absent,
    /// Key present with a JSON `null`.
    Null,
    Value(T),
}

impl<T> Default for Reported<T> {
    fn default() -> Self {
        Reported::Absent
    }
}

impl<T> Reported<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Reported::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Reported::Absent)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Reported::Null)
    }
}

impl<T: Copy> Reported<T> {
    pub fn get(&self) -> Option<T> {
        self.value().copied()
    }
}

// Only called for keys that are present; missing keys fall back to `Default`.
impl<'de, T: Deserialize<'de>> Deserialize<'de> for Reported<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(v) => Reported::Value(v),
            None => Reported::Null,
        })
    }
}

// =====================
// Requests
// =====================

#[derive(Debug, Clone, Serialize)]
pub struct AppInfo {
    pub os: u8,
    #[serde(rename = "appVer")]
    pub app_ver: &'static str,
    #[serde(rename = "appId")]
    pub app_id: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub usr: &'a str,
    pub pwd: &'a str,
    pub imp: bool,
    #[serde(rename = "notTrack")]
    pub not_track: bool,
    #[serde(rename = "appInfo")]
    pub app_info: AppInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemperatureChange {
    pub new: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<f64>,
}

// =====================
// Responses
// =====================

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plant {
    pub gw: GatewayId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub whe_type: Option<i64>,
    #[serde(default)]
    pub whe_model_type: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantFeatures {
    #[serde(default)]
    pub min_set_temp: Option<f64>,
    #[serde(default)]
    pub max_set_temp: Option<f64>,
    #[serde(default)]
    pub has_dhw: Option<bool>,
}

/// Plant data as returned by one poll.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub dhw_storage_temperature: Reported<f64>,
    #[serde(default)]
    pub dhw_set_temperature: Reported<f64>,
    #[serde(default)]
    pub dhw_set_temperature_min: Reported<f64>,
    #[serde(default)]
    pub dhw_set_temperature_max: Reported<f64>,
    #[serde(default)]
    pub mode: Reported<String>,
    #[serde(default)]
    pub dhw_mode: Reported<String>,
    #[serde(default)]
    pub available: Reported<bool>,
    #[serde(default)]
    pub dhw_available: Reported<bool>,
}

impl Snapshot {
    /// Count of sensors carrying a value, for debug logging.
    pub fn reported_count(&self) -> usize {
        [
            self.dhw_storage_temperature.value().is_some(),
            self.dhw_set_temperature.value().is_some(),
            self.dhw_set_temperature_min.value().is_some(),
            self.dhw_set_temperature_max.value().is_some(),
            self.mode.value().is_some(),
            self.dhw_mode.value().is_some(),
            self.available.value().is_some(),
            self.dhw_available.value().is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}
