//! The heap endpoint: startup, request dispatch and teardown.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{debug, info};
use npheap_budget_tracker::Budget;
use npheap_common::{Result, error::Error};

use crate::{
    config::DeviceConfig,
    control::{self, Command, RawCommand, Reply},
    exposure::AddressSpace,
    mapping::{self, Mapping, MappingRequest},
    registry::Registry,
    storage::{BackingAllocator, PageAllocator},
};

/// A running heap, shared by every caller that issues requests to it.
///
/// Callers share it by reference (or `Arc`); [`Device::shutdown`] consumes
/// it, so teardown cannot overlap with a request in flight.
pub struct Device {
    config: DeviceConfig,
    page_size: u64,
    registry: Registry,
    allocator: Arc<dyn BackingAllocator>,
    budget: Option<Budget>,
    accepting: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStats {
    pub objects: usize,
    /// Sum of the sizes of all objects with storage.
    pub allocated_bytes: u64,
    /// Unused part of the configured capacity, if there is one.
    pub remaining_budget: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub objects: usize,
    pub bytes_freed: u64,
}

impl Device {
    /// Starts a device backed by anonymous page mappings.
    pub fn open(config: DeviceConfig) -> Result<Device> {
        config.validate()?;
        let budget = config.capacity.map(Budget::new);
        let allocator = Arc::new(PageAllocator::new(budget.clone(), config.large_pages));
        Self::start(config, allocator, budget)
    }

    /// Starts a device that takes backing storage from `allocator`.
    ///
    /// `config.capacity` is not enforced here; the allocator owns its limits.
    pub fn with_allocator(
        config: DeviceConfig,
        allocator: Arc<dyn BackingAllocator>,
    ) -> Result<Device> {
        config.validate()?;
        Self::start(config, allocator, None)
    }

    fn start(
        config: DeviceConfig,
        allocator: Arc<dyn BackingAllocator>,
        budget: Option<Budget>,
    ) -> Result<Device> {
        let page_size = config.resolved_page_size();
        info!(
            "npheap device installed (page size {page_size}, capacity {})",
            config
                .capacity
                .map_or_else(|| "unlimited".to_string(), |c| c.to_string())
        );
        Ok(Device {
            config,
            page_size,
            registry: Registry::new(),
            allocator,
            budget,
            accepting: AtomicBool::new(true),
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Key of the object addressed by a raw byte offset.
    pub fn key_for(&self, raw_offset: u64) -> u64 {
        raw_offset / self.page_size
    }

    /// Exposes object `request.offset` in the caller's `space`, allocating it
    /// on first use.
    pub fn handle_mapping(
        &self,
        space: &dyn AddressSpace,
        request: &MappingRequest,
    ) -> Result<Mapping> {
        self.ensure_accepting()?;
        mapping::map_object(
            &self.registry,
            self.allocator.as_ref(),
            space,
            self.page_size,
            request,
        )
    }

    pub fn handle_control(&self, command: Command) -> Result<Reply> {
        self.ensure_accepting()?;
        control::execute(&self.registry, command, self.config.lock_timeout())
    }

    /// Decodes and runs a transport command, returning the transport reply code.
    pub fn handle_raw(&self, raw: RawCommand) -> i64 {
        let result =
            Command::decode(raw, self.page_size).and_then(|command| self.handle_control(command));
        control::reply_code(&result)
    }

    /// Stops accepting requests. Requests already running are unaffected.
    pub fn close(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!("npheap device closed");
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> DeviceStats {
        let snapshot = self.registry.snapshot();
        DeviceStats {
            objects: snapshot.len(),
            allocated_bytes: snapshot.iter().map(|o| o.size).sum(),
            remaining_budget: self.budget.as_ref().map(Budget::remaining),
        }
    }

    /// Closes the device and frees every object.
    pub fn shutdown(mut self) -> ShutdownReport {
        self.close();
        for object in self.registry.snapshot() {
            debug!(
                "object {}: size {}, locked {}",
                object.key, object.size, object.locked
            );
        }
        let report = self.registry.drain_all();
        info!(
            "npheap device removed: freed {} objects, {} bytes",
            report.objects, report.bytes_freed
        );
        ShutdownReport {
            objects: report.objects,
            bytes_freed: report.bytes_freed,
        }
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.is_accepting() {
            Ok(())
        } else {
            Err(Error::endpoint_closed())
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("config", &self.config)
            .field("page_size", &self.page_size)
            .field("accepting", &self.is_accepting())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
