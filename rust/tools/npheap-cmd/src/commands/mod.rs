//! Command implementations for npheap-cmd

use anyhow::{Context, Result};
use clap::Args;
use npheap::{Device, DeviceConfig};

pub mod run;
pub mod script;
pub mod stress;

/// Device settings shared by every subcommand. Flags override the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct DeviceArgs {
    /// JSON file with a device configuration
    #[arg(long)]
    pub config: Option<String>,

    /// Page size used to derive keys (defaults to the host page size)
    #[arg(long)]
    pub page_size: Option<u64>,

    /// Cap on the total backing storage, in bytes
    #[arg(long)]
    pub capacity: Option<u64>,

    /// Prefer large pages for backing storage
    #[arg(long)]
    pub large_pages: bool,

    /// Give up on `lock` after this many milliseconds
    #[arg(long)]
    pub lock_timeout_ms: Option<u64>,
}

impl DeviceArgs {
    pub fn to_config(&self) -> Result<DeviceConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {path}"))?;
                serde_json::from_str::<DeviceConfig>(&text)
                    .with_context(|| format!("Failed to parse config file: {path}"))?
            }
            None => DeviceConfig::default(),
        };
        if let Some(page_size) = self.page_size {
            config.page_size = Some(page_size);
        }
        if let Some(capacity) = self.capacity {
            config.capacity = Some(capacity);
        }
        if self.large_pages {
            config.large_pages = true;
        }
        if let Some(timeout) = self.lock_timeout_ms {
            config.lock_timeout_ms = Some(timeout);
        }
        Ok(config)
    }

    pub fn open(&self) -> Result<Device> {
        let config = self.to_config()?;
        Device::open(config).context("Failed to open device")
    }
}
