// src/state.rs
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::{
    errors::{RiderError, RiderResult},
    services::{
        api_client::ApiClient,
        auth_service::AuthService,
        ride_channel::{ChannelConfig, LiveConnector, WsConnector},
        ride_service::{RideApi, RideService},
        ride_view::{RideViewController, TrackerSettings},
        token_store::{FileTokenStore, TokenStore},
    },
};

pub const DEFAULT_API_URL: &str = "https://api-howfartransports.onrender.com";
pub const DEFAULT_WS_URL: &str = "wss://api-howfartransports.onrender.com";
pub const DEFAULT_STATE_DIR: &str = ".hfc-rider";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid URL: {reason}")]
    InvalidUrl { var: &'static str, reason: String },

    #[error("{var} must use one of {expected}, got '{scheme}'")]
    UnsupportedScheme { var: &'static str, expected: &'static str, scheme: String },

    #[error("{var} must be a positive number of seconds, got '{value}'")]
    InvalidTimeout { var: &'static str, value: String },
}

impl From<ConfigError> for RiderError {
    fn from(err: ConfigError) -> Self {
        RiderError::InvalidConfiguration(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_url: Url,
    pub ws_url: Url,
    pub state_dir: PathBuf,
    pub http_timeout: Duration,
}

impl AppConfig {
    /// Reads `HFC_API_URL`, `HFC_WS_URL`, `HFC_STATE_DIR` and
    /// `HFC_HTTP_TIMEOUT_SECS`, falling back to the production endpoints.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_url = parse_url(
            "HFC_API_URL",
            &get("HFC_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            &["http", "https"],
            "http/https",
        )?;
        let ws_url = parse_url(
            "HFC_WS_URL",
            &get("HFC_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
            &["ws", "wss"],
            "ws/wss",
        )?;

        let http_timeout = match get("HFC_HTTP_TIMEOUT_SECS") {
            None => Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidTimeout { var: "HFC_HTTP_TIMEOUT_SECS", value: raw });
                }
            },
        };

        Ok(Self {
            api_url,
            ws_url,
            state_dir: PathBuf::from(get("HFC_STATE_DIR").unwrap_or_else(|| DEFAULT_STATE_DIR.to_string())),
            http_timeout,
        })
    }

    /// `{api_url}/api/`, where every REST route hangs off.
    pub fn api_root(&self) -> RiderResult<Url> {
        let mut root = self.api_url.clone();
        root.path_segments_mut()
            .map_err(|_| RiderError::InvalidUrl(self.api_url.to_string()))?
            .pop_if_empty()
            .extend(["api", ""]);
        Ok(root)
    }
}

fn parse_url(
    var: &'static str,
    raw: &str,
    schemes: &[&str],
    expected: &'static str,
) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl { var, reason: e.to_string() })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::UnsupportedScheme {
            var,
            expected,
            scheme: url.scheme().to_string(),
        });
    }
    Ok(url)
}

pub struct AppState {
    pub tokens: Arc<dyn TokenStore>,
    pub api: Arc<ApiClient>,
    pub auth_service: Arc<AuthService>,
    pub ride_service: Arc<RideService>,
    pub connector: Arc<dyn LiveConnector>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(config: AppConfig) -> RiderResult<Self> {
        let tokens: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new(config.state_dir.clone()));
        Self::with_token_store(config, tokens)
    }

    pub fn with_token_store(config: AppConfig, tokens: Arc<dyn TokenStore>) -> RiderResult<Self> {
        let api = Arc::new(ApiClient::new(config.api_root()?, config.http_timeout, tokens.clone())?);
        let auth_service = Arc::new(AuthService::new(api.clone(), tokens.clone()));
        let ride_service = Arc::new(RideService::new(api.clone()));
        let connector: Arc<dyn LiveConnector> = Arc::new(WsConnector);

        tracing::debug!("Rider client configured for {}", config.api_url);

        Ok(Self {
            tokens,
            api,
            auth_service,
            ride_service,
            connector,
            config,
        })
    }

    /// A fresh controller for one tracking screen, sharing this state's
    /// API client and session.
    pub fn ride_view_controller(&self) -> RideViewController {
        let settings = TrackerSettings {
            ws_base_url: self.config.ws_url.clone(),
            fetch_timeout: self.config.http_timeout,
            redirect_delay: Duration::from_secs(3),
            channel: ChannelConfig::default(),
        };
        let api: Arc<dyn RideApi> = self.ride_service.clone();
        RideViewController::new(api, self.connector.clone(), settings).with_token_store(self.tokens.clone())
    }
}
