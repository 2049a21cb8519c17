//! Models for the Domoticz JSON API (`/json.htm?type=command&param=...`).

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    #[serde(default = "Vec::new")]
    pub result: Vec<T>,
    #[serde(default)]
    pub idx: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("OK")
    }
}

/// Device row from `param=getdevices`. Domoticz reports most fields as strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceInfo {
    #[serde(rename = "idx")]
    pub idx: String,
    pub name: String,
    #[serde(rename = "HardwareID")]
    pub hardware_id: u32,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub set_point: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

/// Placeholder row type for responses that carry no `result` list.
#[derive(Debug, Clone, Deserialize)]
pub struct Empty {}
