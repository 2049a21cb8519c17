//! Blocking HTTP client for the Ariston NET v2 API (water-heater subset).
//!
//! - Blocking client using `ureq` (no async); owned by the worker thread.
//! - Uses the models in `crate::models::ariston`.
//!
//! Authentication
//! - `accounts/login` returns a token that is sent back in the `ar.authToken` header.
//! - A 401/403 on any call drops the token; the next poll logs in again.

use core::fmt;
use http::StatusCode;
use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::BridgeError;
use crate::models::ariston::*;

pub const DEFAULT_BASE_URL: &str = "https://www.ariston-net.remotethermo.com/api/v2";
const AUTH_HEADER: &str = "ar.authToken";
const APP_INFO: AppInfo = AppInfo {
    os: 2,
    app_ver: "5.6.7772.40151",
    app_id: "com.remotethermo.aristonnet",
};

/// Login data, fixed for the lifetime of the process.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub gateway: Option<GatewayId>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("gateway", &self.gateway)
            .finish()
    }
}

/// Remote operations the worker needs. Implemented by [`AristonClient`] and by test stubs.
pub trait AristonApi: Send {
    fn login(&mut self) -> Result<(), BridgeError>;
    fn is_logged_in(&self) -> bool;
    /// Discovery: the water-heater plants of the account.
    fn hello(&mut self) -> Result<Vec<Plant>, BridgeError>;
    fn features(&mut self, gw: &GatewayId) -> Result<PlantFeatures, BridgeError>;
    fn plant_data(&mut self, gw: &GatewayId) -> Result<Snapshot, BridgeError>;
    fn set_power(&mut self, gw: &GatewayId, on: bool) -> Result<(), BridgeError>;
    fn set_temperature(&mut self, gw: &GatewayId, new: f64, old: Option<f64>) -> Result<(), BridgeError>;
}

#[derive(Debug)]
pub enum AristonClientError {
    MissingAuth,
    Transport(String),
    Http { status: u16, message: String },
    Json(serde_path_to_error::Error<serde_json::Error>),
    Auth(String),
}

impl fmt::Display for AristonClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AristonClientError::MissingAuth => write!(f, "not logged in"),
            AristonClientError::Transport(s) => write!(f, "{}", s),
            AristonClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            AristonClientError::Json(e) => write!(f, "unexpected response at '{}': {}", e.path(), e.inner()),
            AristonClientError::Auth(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AristonClientError {}

impl From<AristonClientError> for BridgeError {
    fn from(value: AristonClientError) -> Self {
        let message = value.to_string();
        match &value {
            AristonClientError::MissingAuth | AristonClientError::Auth(_) => BridgeError::Auth(message),
            AristonClientError::Http { status, .. }
                if *status == StatusCode::UNAUTHORIZED.as_u16() || *status == StatusCode::FORBIDDEN.as_u16() =>
            {
                BridgeError::Auth(message)
            }
            _ => BridgeError::Transport(message),
        }
    }
}

pub struct AristonClient {
    agent: ureq::Agent,
    base_url: String,
    credentials: Credentials,
    token: Option<String>,
}

impl AristonClient {
    pub fn new(base_url: impl Into<String>, credentials: Credentials, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        AristonClient {
            agent: config.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            token: None,
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn token(&self) -> Result<&str, AristonClientError> {
        self.token.as_deref().ok_or(AristonClientError::MissingAuth)
    }

    /// Read the body of a finished call, dropping the session on 401/403.
    fn read_body(
        &mut self,
        resp: Result<http::Response<ureq::Body>, ureq::Error>,
    ) -> Result<String, AristonClientError> {
        let mut resp = resp.map_err(|e| AristonClientError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .body_mut()
            .read_to_string()
            .map_err(|e| AristonClientError::Transport(e.to_string()));
        if status.is_success() {
            return body;
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            debug!("Ariston answered {}; dropping session", status.as_u16());
            self.token = None;
        }
        Err(AristonClientError::Http {
            status: status.as_u16(),
            message: body.unwrap_or_else(|_| String::from("<no body>")),
        })
    }

    fn decode<T: DeserializeOwned>(body: &str) -> Result<T, AristonClientError> {
        let de = &mut serde_json::Deserializer::from_str(body);
        serde_path_to_error::deserialize(de).map_err(AristonClientError::Json)
    }

    fn get_json<T: DeserializeOwned>(&mut self, path: &str) -> Result<T, AristonClientError> {
        let url = self.url(path);
        let resp = self
            .agent
            .get(&url)
            .header("Accept", "application/json")
            .header(AUTH_HEADER, self.token()?)
            .call();
        let body = self.read_body(resp)?;
        Self::decode(&body)
    }

    fn post_json<B: Serialize>(&mut self, path: &str, payload: &B) -> Result<(), AristonClientError> {
        let url = self.url(path);
        let resp = self
            .agent
            .post(&url)
            .header("Accept", "application/json")
            .header(AUTH_HEADER, self.token()?)
            .send_json(payload);
        self.read_body(resp).map(|_| ())
    }
}

impl AristonApi for AristonClient {
    fn login(&mut self) -> Result<(), BridgeError> {
        self.token = None;
        let url = self.url("accounts/login");
        let request = LoginRequest {
            usr: &self.credentials.username,
            pwd: &self.credentials.password,
            imp: false,
            not_track: true,
            app_info: APP_INFO,
        };
        let resp = self.agent.post(&url).header("Accept", "application/json").send_json(&request);
        let body = self.read_body(resp).map_err(|e| match e {
            AristonClientError::Http { status, message } if status < 500 => {
                AristonClientError::Auth(format!("login rejected (http {}): {}", status, message))
            }
            other => other,
        })?;
        let LoginResponse { token } = Self::decode(&body)?;
        if token.is_empty() {
            return Err(AristonClientError::Auth("login returned an empty token".into()).into());
        }
        self.token = Some(token);
        Ok(())
    }

    fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }

    fn hello(&mut self) -> Result<Vec<Plant>, BridgeError> {
        Ok(self.get_json("velis/plants")?)
    }

    fn features(&mut self, gw: &GatewayId) -> Result<PlantFeatures, BridgeError> {
        Ok(self.get_json(&format!("velis/plants/{}/features", gw.0))?)
    }

    fn plant_data(&mut self, gw: &GatewayId) -> Result<Snapshot, BridgeError> {
        Ok(self.get_json(&format!("velis/plantData/{}", gw.0))?)
    }

    fn set_power(&mut self, gw: &GatewayId, on: bool) -> Result<(), BridgeError> {
        Ok(self.post_json(&format!("velis/plantData/{}/switch", gw.0), &on)?)
    }

    fn set_temperature(&mut self, gw: &GatewayId, new: f64, old: Option<f64>) -> Result<(), BridgeError> {
        let change = TemperatureChange { new, old };
        Ok(self.post_json(&format!("velis/plantData/{}/temperature", gw.0), &change)?)
    }
}
