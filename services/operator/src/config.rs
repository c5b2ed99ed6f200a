use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use gridop_reconcile::DEFAULT_STATUS_HA_RETRY;

use crate::controller::ControllerSettings;

/// Image used when neither the role nor the existing workload names one.
pub const DEFAULT_IMAGE: &str = "oraclecoherence/coherence-ce:latest";

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub workers: usize,
    pub status_ha_retry: Duration,
    pub health_timeout: Duration,
    pub management_port: u16,
    pub default_image: String,
    pub manifest: Option<PathBuf>,
    pub dev_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            workers: 4,
            status_ha_retry: DEFAULT_STATUS_HA_RETRY,
            health_timeout: Duration::from_secs(10),
            management_port: 30000,
            default_image: DEFAULT_IMAGE.to_string(),
            manifest: None,
            dev_mode: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let log_level = std::env::var("GRIDOP_LOG_LEVEL").unwrap_or(defaults.log_level);

        let workers = match std::env::var("GRIDOP_WORKERS") {
            Ok(v) => v.parse().context("GRIDOP_WORKERS must be a positive integer")?,
            Err(_) => defaults.workers,
        };
        if workers == 0 {
            anyhow::bail!("GRIDOP_WORKERS must be at least 1");
        }

        let status_ha_retry = match std::env::var("GRIDOP_STATUS_HA_RETRY_SECS") {
            Ok(v) => Duration::from_secs(
                v.parse()
                    .context("GRIDOP_STATUS_HA_RETRY_SECS must be a number of seconds")?,
            ),
            Err(_) => defaults.status_ha_retry,
        };

        let health_timeout = match std::env::var("GRIDOP_HEALTH_TIMEOUT_SECS") {
            Ok(v) => Duration::from_secs(
                v.parse()
                    .context("GRIDOP_HEALTH_TIMEOUT_SECS must be a number of seconds")?,
            ),
            Err(_) => defaults.health_timeout,
        };

        let management_port = match std::env::var("GRIDOP_MANAGEMENT_PORT") {
            Ok(v) => v.parse().context("GRIDOP_MANAGEMENT_PORT must be a port")?,
            Err(_) => defaults.management_port,
        };

        let default_image =
            std::env::var("GRIDOP_DEFAULT_IMAGE").unwrap_or(defaults.default_image);

        let manifest = std::env::var("GRIDOP_MANIFEST").ok().map(PathBuf::from);

        let dev_mode = std::env::var("GRIDOP_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            log_level,
            workers,
            status_ha_retry,
            health_timeout,
            management_port,
            default_image,
            manifest,
            dev_mode,
        })
    }

    /// Settings shared by the reconcilers.
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            status_ha_retry: self.status_ha_retry,
            health_timeout: self.health_timeout,
            default_image: self.default_image.clone(),
        }
    }
}
