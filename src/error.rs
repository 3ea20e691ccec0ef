use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Why a single catalog page could not be retrieved.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("page {page} returned HTTP {status}")]
    Status { page: u32, status: StatusCode },
    #[error("page {page} request failed: {source}")]
    Transport {
        page: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to build scraping client: {0}")]
    Client(#[source] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed snapshot {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),
    #[error("destination {destination} is unavailable: {source}")]
    Destination {
        destination: String,
        #[source]
        source: teloxide::RequestError,
    },
}

/// Failure of one fetch/guard/diff/persist/notify pass. Never fatal to the loop.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error("cycle task aborted: {0}")]
    Aborted(String),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
