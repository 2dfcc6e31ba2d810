use std::time::Duration;

use npheap_common::{Result, verify_arg};
use serde::{Deserialize, Serialize};

/// Settings of a [`Device`](crate::Device), fixed for its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Page size used to derive keys from raw offsets and to check exposure
    /// ranges. Defaults to the host page size.
    pub page_size: Option<u64>,
    /// Upper bound on the total backing storage, in bytes. Unlimited when absent.
    pub capacity: Option<u64>,
    /// Try large pages before regular pages for backing storage.
    pub large_pages: bool,
    /// Default wait bound for `Lock`. `Lock` blocks indefinitely when absent.
    pub lock_timeout_ms: Option<u64>,
}

impl DeviceConfig {
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_large_pages(mut self, large_pages: bool) -> Self {
        self.large_pages = large_pages;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(page_size) = self.page_size {
            verify_arg!(page_size, page_size.is_power_of_two());
        }
        Ok(())
    }

    /// The configured page size, or the host's.
    pub fn resolved_page_size(&self) -> u64 {
        self.page_size
            .unwrap_or_else(|| npheap_page_alloc::page_size() as u64)
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }
}
