use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, Map};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SettingsError;

const DEFAULT_CONFIG_FILE: &str = "restock.toml";
const CONFIG_PATH_VAR: &str = "RESTOCK_CONFIG";
const ENV_PREFIX: &str = "RESTOCK";

/// CSS selectors describing one listing card on a catalog page.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SelectorSettings {
    pub listing: String,
    pub link: String,
    pub name: String,
    pub price: String,
    pub image: String,
    pub image_attr: String,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            listing: "div.product--root".to_string(),
            link: "a[href]".to_string(),
            name: "h2.product_name".to_string(),
            price: "div.product_price".to_string(),
            image: "img[data-src]".to_string(),
            image_attr: "data-src".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AppSettings {
    pub telegram_token: String,
    pub chat_id: String,
    pub catalog_url: String,
    pub site_origin: String,
    pub threshold: usize,
    pub check_interval_secs: u64,
    pub max_pages: u32,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub snapshot_path: PathBuf,
    pub archive_dir: PathBuf,
    pub send_delay_ms: u64,
    pub health_addr: String,
    pub image_width: String,
    pub selectors: SelectorSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            telegram_token: String::new(),
            chat_id: String::new(),
            catalog_url: "https://chiikawamarket.jp/collections/all".to_string(),
            site_origin: "https://chiikawamarket.jp".to_string(),
            threshold: 6500,
            check_interval_secs: 1200,
            max_pages: 250,
            request_timeout_secs: 10,
            user_agent: "Mozilla/5.0".to_string(),
            snapshot_path: PathBuf::from("products.json"),
            archive_dir: PathBuf::from("."),
            send_delay_ms: 1200,
            health_addr: "0.0.0.0:8080".to_string(),
            image_width: "800".to_string(),
            selectors: SelectorSettings::default(),
        }
    }
}

impl AppSettings {
    /// Loads settings from `RESTOCK_CONFIG` (or `restock.toml`) layered under `RESTOCK_*` variables.
    pub fn load() -> Result<Self, SettingsError> {
        let path = std::env::var_os(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        Self::load_layered(path, None)
    }

    /// `env` replaces the process environment as the source of `RESTOCK_*` overrides.
    /// Nested keys use `__`, e.g. `RESTOCK_SELECTORS__LISTING`.
    fn load_layered(path: &Path, env: Option<Map<String, String>>) -> Result<Self, SettingsError> {
        let settings: AppSettings = Config::builder()
            .add_source(Config::try_from(&AppSettings::default())?)
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.telegram_token.trim().is_empty() {
            return Err(invalid("telegram_token", "must not be empty"));
        }
        if self.chat_id.trim().is_empty() {
            return Err(invalid("chat_id", "must not be empty"));
        }
        if self.max_pages == 0 {
            return Err(invalid("max_pages", "must be at least 1"));
        }
        self.catalog_url()?;
        self.site_origin()?;
        self.health_addr()?;
        Ok(())
    }

    pub fn catalog_url(&self) -> Result<Url, SettingsError> {
        parse_url("catalog_url", &self.catalog_url)
    }

    pub fn site_origin(&self) -> Result<Url, SettingsError> {
        parse_url("site_origin", &self.site_origin)
    }

    pub fn health_addr(&self) -> Result<SocketAddr, SettingsError> {
        self.health_addr
            .parse()
            .map_err(|e: std::net::AddrParseError| invalid("health_addr", e.to_string()))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, SettingsError> {
    Url::parse(raw).map_err(|e| invalid(field, e.to_string()))
}

fn invalid(field: &'static str, reason: impl Into<String>) -> SettingsError {
    SettingsError::Invalid {
        field,
        reason: reason.into(),
    }
}
