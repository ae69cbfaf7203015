use crate::error::{Result, WebError};
use ephemeral_blob_store::{BackendConfig, StoreConfig};
use std::time::Duration;

/// Service configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store: StoreConfig,
    pub backend: BackendConfig,
    /// `None` disables the background purge; purges still run on insert
    pub purge_interval: Option<Duration>,
    /// `None` means uploads are stored without processing
    pub deblur_api_url: Option<String>,
    pub deblur_timeout: Duration,
    pub max_upload_bytes: usize,
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            store: StoreConfig::default(),
            backend: BackendConfig::Memory,
            purge_interval: Some(Duration::from_secs(60)),
            deblur_api_url: None,
            deblur_timeout: Duration::from_secs(60),
            max_upload_bytes: 20 * 1024 * 1024, // 20 MiB
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl Config {
    /// Parse configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();
        let number = |key: &str| -> Result<Option<u64>> {
            match lookup(key).filter(|v| !v.trim().is_empty()) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| WebError::Config(format!("{} must be a number: {}", key, raw))),
                None => Ok(None),
            }
        };

        let port = match number("PORT")? {
            Some(port) => u16::try_from(port)
                .map_err(|_| WebError::Config(format!("PORT out of range: {}", port)))?,
            None => defaults.port,
        };

        let store = StoreConfig {
            max_age: number("IMAGE_MAX_AGE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.store.max_age),
            max_entries: number("MAX_STORAGE_ENTRIES")?
                .map(|n| n as usize)
                .unwrap_or(defaults.store.max_entries),
        };
        store
            .validate()
            .map_err(|e| WebError::Config(e.to_string()))?;

        let backend = match lookup("STORAGE_BACKEND").as_deref().map(str::trim) {
            None | Some("") | Some("memory") => BackendConfig::Memory,
            Some("remote") => {
                let base_url = lookup("BLOB_STORE_URL").ok_or_else(|| {
                    WebError::Config("BLOB_STORE_URL is required for the remote backend".into())
                })?;
                validate_url("BLOB_STORE_URL", &base_url)?;
                BackendConfig::Remote {
                    base_url,
                    token: lookup("BLOB_STORE_TOKEN").filter(|t| !t.is_empty()),
                }
            }
            Some(other) => {
                return Err(WebError::Config(format!(
                    "unknown STORAGE_BACKEND: {}",
                    other
                )))
            }
        };

        let purge_interval = match number("PURGE_INTERVAL_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.purge_interval,
        };

        let deblur_api_url = lookup("DEBLUR_API_URL").filter(|u| !u.trim().is_empty());
        if let Some(url) = &deblur_api_url {
            validate_url("DEBLUR_API_URL", url)?;
        }

        let deblur_timeout = number("DEBLUR_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.deblur_timeout);

        let max_upload_bytes = number("MAX_UPLOAD_BYTES")?
            .map(|n| n as usize)
            .unwrap_or(defaults.max_upload_bytes);

        let cors_origins = lookup("CORS_ORIGINS")
            .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
            .unwrap_or(defaults.cors_origins);

        Ok(Self {
            port,
            store,
            backend,
            purge_interval,
            deblur_api_url,
            deblur_timeout,
            max_upload_bytes,
            cors_origins,
        })
    }
}

fn validate_url(key: &str, value: &str) -> Result<()> {
    let parsed =
        url::Url::parse(value).map_err(|e| WebError::Config(format!("{}: {}", key, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(WebError::Config(format!(
            "{} must be http(s), got {}",
            key, scheme
        ))),
    }
}
