//! Stress command implementation

use std::{
    collections::BTreeMap,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, bail};
use log::info;
use npheap::{Command, Device, ErrorKind, ExposureTable, MappingRequest};
use serde::Serialize;

use super::DeviceArgs;
use crate::utils::format_size;

/// Outcome counts of one worker.
#[derive(Debug, Default, Clone, Serialize)]
struct WorkerStats {
    maps: u64,
    allocations: u64,
    locks: u64,
    getsizes: u64,
    deletes: u64,
    failures: BTreeMap<String, u64>,
}

impl WorkerStats {
    fn merge(&mut self, other: &WorkerStats) {
        self.maps += other.maps;
        self.allocations += other.allocations;
        self.locks += other.locks;
        self.getsizes += other.getsizes;
        self.deletes += other.deletes;
        for (kind, count) in &other.failures {
            *self.failures.entry(kind.clone()).or_default() += count;
        }
    }

    fn fail(&mut self, kind: &ErrorKind) {
        let name = match kind {
            ErrorKind::AllocationFailed { .. } => "allocation_failed",
            ErrorKind::ExposureFailed { .. } => "exposure_failed",
            ErrorKind::NotFound { .. } => "not_found",
            ErrorKind::NotLocked { .. } => "not_locked",
            ErrorKind::LockTimeout { .. } => "lock_timeout",
            _ => "other",
        };
        *self.failures.entry(name.to_string()).or_default() += 1;
    }
}

#[derive(Serialize)]
struct StressSummary {
    threads: usize,
    ops_per_thread: usize,
    seed: u64,
    elapsed_ms: u128,
    totals: WorkerStats,
    objects: usize,
    allocated_bytes: u64,
    freed_objects: usize,
    freed_bytes: u64,
}

pub fn run(
    args: DeviceArgs,
    threads: usize,
    keys: u64,
    ops: usize,
    seed: Option<u64>,
) -> Result<()> {
    if threads == 0 || keys == 0 {
        bail!("--threads and --keys must be positive");
    }
    let seed = seed.unwrap_or_else(|| fastrand::u64(..));
    let device = Arc::new(args.open()?);
    info!("stress: {threads} threads x {ops} ops over {keys} keys, seed {seed}");

    let started = Instant::now();
    let (totals, identities) = run_workers(&device, threads, keys, ops, seed)?;
    let elapsed = started.elapsed();

    check_identities(&device, &identities)?;
    let stats = device.stats();
    if stats.objects as u64 > keys {
        bail!("{} objects for {keys} keys", stats.objects);
    }

    let Some(device) = Arc::into_inner(device) else {
        bail!("device still shared after workers finished");
    };
    let report = device.shutdown();

    let summary = StressSummary {
        threads,
        ops_per_thread: ops,
        seed,
        elapsed_ms: elapsed.as_millis(),
        totals,
        objects: stats.objects,
        allocated_bytes: stats.allocated_bytes,
        freed_objects: report.objects,
        freed_bytes: report.bytes_freed,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!(
        "ok: {} objects, {} in use at the end",
        stats.objects,
        format_size(stats.allocated_bytes)
    );
    Ok(())
}

/// Object identity (address of its record) per key, as seen by each worker.
type Identities = Vec<BTreeMap<u64, usize>>;

fn run_workers(
    device: &Arc<Device>,
    threads: usize,
    keys: u64,
    ops: usize,
    seed: u64,
) -> Result<(WorkerStats, Identities)> {
    let handles = (0..threads)
        .map(|t| {
            let device = device.clone();
            let seed = seed.wrapping_add(t as u64);
            thread::spawn(move || worker(&device, keys, ops, seed))
        })
        .collect::<Vec<_>>();

    let mut totals = WorkerStats::default();
    let mut identities = Vec::with_capacity(threads);
    for handle in handles {
        let Ok((stats, seen)) = handle.join() else {
            bail!("stress worker panicked");
        };
        totals.merge(&stats);
        identities.push(seen);
    }
    Ok((totals, identities))
}

fn worker(
    device: &Device,
    keys: u64,
    ops: usize,
    seed: u64,
) -> (WorkerStats, BTreeMap<u64, usize>) {
    let mut rng = fastrand::Rng::with_seed(seed);
    let page_size = device.page_size();
    let space = ExposureTable::new(page_size);
    let mut stats = WorkerStats::default();
    let mut seen = BTreeMap::new();
    // Each key owns a fixed window of the worker's address space.
    let window = 4 * page_size;

    for _ in 0..ops {
        let key = rng.u64(0..keys);
        match rng.u8(0..8) {
            0..=2 => {
                space.withdraw(key * window);
                let length = rng.u64(1..=2) * page_size - rng.u64(0..page_size);
                let request = MappingRequest::new(key, length, key * window);
                match device.handle_mapping(&space, &request) {
                    Ok(mapping) => {
                        stats.maps += 1;
                        stats.allocations += mapping.allocated as u64;
                    }
                    Err(e) => stats.fail(e.kind()),
                }
            }
            3 | 4 => {
                let lock = Command::LockTimeout(key, Duration::from_secs(30));
                match device.handle_control(lock) {
                    Ok(_) => {
                        stats.locks += 1;
                        if let Err(e) = device.handle_control(Command::Unlock(key)) {
                            stats.fail(e.kind());
                        }
                    }
                    Err(e) => stats.fail(e.kind()),
                }
            }
            5 | 6 => match device.handle_control(Command::GetSize(key)) {
                Ok(_) => stats.getsizes += 1,
                Err(e) => stats.fail(e.kind()),
            },
            _ => match device.handle_control(Command::Delete(key)) {
                Ok(_) => stats.deletes += 1,
                Err(e) => stats.fail(e.kind()),
            },
        }
        if let Some(object) = device.registry().find(key) {
            let identity = Arc::as_ptr(&object) as usize;
            seen.entry(key).or_insert(identity);
        }
    }
    (stats, seen)
}

/// Every worker must have seen the same record for a key, and it must be the
/// one still registered.
fn check_identities(device: &Device, identities: &Identities) -> Result<()> {
    for seen in identities {
        for (&key, &identity) in seen {
            let Some(current) = device.registry().find(key) else {
                bail!("object {key} disappeared");
            };
            if Arc::as_ptr(&current) as usize != identity {
                bail!("object {key} was replaced while the device was running");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use npheap::DeviceConfig;

    use super::*;

    #[test]
    fn test_workers_keep_one_object_per_key() {
        let device = Arc::new(Device::open(DeviceConfig::default()).unwrap());
        let (totals, identities) = run_workers(&device, 4, 8, 400, 7).unwrap();
        assert_eq!(identities.len(), 4);
        assert!(totals.maps > 0);
        assert!(totals.locks > 0);
        check_identities(&device, &identities).unwrap();
        assert!(device.registry().len() <= 8);
    }

    #[test]
    fn test_run_with_capacity() {
        let args = DeviceArgs {
            capacity: Some(16 * DeviceConfig::default().resolved_page_size()),
            ..Default::default()
        };
        run(args, 2, 32, 200, Some(11)).unwrap();
    }

    #[test]
    fn test_rejects_empty_workload() {
        assert!(run(DeviceArgs::default(), 0, 4, 10, None).is_err());
        assert!(run(DeviceArgs::default(), 2, 0, 10, None).is_err());
    }
}
