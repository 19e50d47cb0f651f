//! Operator settings snapshot taken at the start of each invocation.
//!
//! Values saved in the settings table win over the config file and the
//! environment, so an operator can change them without touching either.

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};

use crate::config::Config;
use crate::storage::{PostStatus, SettingsStore};

pub const PUBLISHER_ID_KEY: &str = "publisher_id";
pub const DEFAULT_STATUS_KEY: &str = "default_status";

pub struct ImportSettings {
    pub publisher_id: Option<SecretString>,
    /// Status given to newly imported records
    pub default_status: PostStatus,
}

impl ImportSettings {
    pub async fn load<S: SettingsStore>(store: &S, config: &Config) -> Result<Self> {
        let stored_publisher = store
            .get_setting(PUBLISHER_ID_KEY)
            .await
            .context("Failed to read publisher setting")?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let publisher_id = match stored_publisher {
            Some(value) => Some(SecretString::from(value)),
            None => config
                .publisher_id
                .as_ref()
                .map(|p| SecretString::from(p.expose_secret().to_string())),
        };

        let default_status = match store
            .get_setting(DEFAULT_STATUS_KEY)
            .await
            .context("Failed to read default status setting")?
        {
            Some(raw) => raw.parse::<PostStatus>().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "Unknown default status, using publish");
                PostStatus::Publish
            }),
            None => PostStatus::Publish,
        };

        Ok(Self {
            publisher_id,
            default_status,
        })
    }
}

impl std::fmt::Debug for ImportSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportSettings")
            .field(
                "publisher_id",
                &self.publisher_id.as_ref().map(|_| "[REDACTED]"),
            )
            .field("default_status", &self.default_status)
            .finish()
    }
}
