//! Run command implementation

use std::{collections::BTreeMap, io::Write, time::Duration};

use anyhow::{Context, Result};
use npheap::{Device, DeviceConfig, ExposureTable, MappingRequest, ObjectInfo, RawCommand};
use serde::Serialize;

use super::{
    DeviceArgs,
    script::{self, Step},
};
use crate::utils::format_size;

#[derive(Serialize)]
struct ObjectEntry {
    key: u64,
    size: u64,
    locked: bool,
}

impl From<ObjectInfo> for ObjectEntry {
    fn from(info: ObjectInfo) -> Self {
        ObjectEntry {
            key: info.key,
            size: info.size,
            locked: info.locked,
        }
    }
}

#[derive(Serialize)]
struct Summary {
    objects: usize,
    allocated_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining_budget: Option<u64>,
    exposures: BTreeMap<String, usize>,
}

/// Lock timeout used when neither the flags nor the config file set one.
/// A script runs on one thread, so a second `lock` of a held key would
/// otherwise never return.
const SCRIPT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

pub fn run(args: DeviceArgs, script_path: String) -> Result<()> {
    let text = std::fs::read_to_string(&script_path)
        .with_context(|| format!("Failed to read script: {script_path}"))?;
    let steps = script::parse(&text).with_context(|| format!("Invalid script: {script_path}"))?;

    let device = Device::open(script_config(&args)?).context("Failed to open device")?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut session = Session::new(&device);
    session.execute(&steps, &mut out)?;
    session.summarize(&mut out)?;
    drop(session);

    let report = device.shutdown();
    writeln!(
        out,
        "shutdown: freed {} objects, {}",
        report.objects,
        format_size(report.bytes_freed)
    )?;
    Ok(())
}

fn script_config(args: &DeviceArgs) -> Result<DeviceConfig> {
    let config = args.to_config()?;
    Ok(match config.lock_timeout_ms {
        Some(_) => config,
        None => config.with_lock_timeout(SCRIPT_LOCK_TIMEOUT),
    })
}

/// Caller address spaces, each with a cursor for the next free destination.
struct Session<'a> {
    device: &'a Device,
    spaces: BTreeMap<String, (ExposureTable, u64)>,
}

impl<'a> Session<'a> {
    fn new(device: &'a Device) -> Self {
        Session {
            device,
            spaces: BTreeMap::new(),
        }
    }

    fn execute(&mut self, steps: &[(usize, Step)], out: &mut dyn Write) -> Result<()> {
        for (line, step) in steps {
            match step {
                Step::Map { key, length, space } => self.map(*line, *key, *length, space, out)?,
                Step::Control(raw) => self.control(*line, *raw, out)?,
                Step::Dump => {
                    let objects = self
                        .device
                        .registry()
                        .snapshot()
                        .into_iter()
                        .map(ObjectEntry::from)
                        .collect::<Vec<_>>();
                    writeln!(out, "{line}: dump {}", serde_json::to_string(&objects)?)?;
                }
            }
        }
        Ok(())
    }

    fn map(
        &mut self,
        line: usize,
        key: u64,
        length: u64,
        space: &str,
        out: &mut dyn Write,
    ) -> Result<()> {
        let page_size = self.device.page_size();
        let (table, cursor) = self
            .spaces
            .entry(space.to_string())
            .or_insert_with(|| (ExposureTable::new(page_size), 0));

        let request = MappingRequest::new(key, length, *cursor);
        match self.device.handle_mapping(&*table, &request) {
            Ok(mapping) => {
                // Leave an unmapped page between consecutive exposures.
                *cursor = mapping.range.end + page_size;
                writeln!(
                    out,
                    "{line}: map {key} in {space} -> size {} at [{:#x}, {:#x}){}",
                    mapping.size,
                    mapping.range.start,
                    mapping.range.end,
                    if mapping.allocated { " (allocated)" } else { "" }
                )?;
            }
            Err(e) => writeln!(out, "{line}: map {key} in {space} -> {} ({e})", e.errno())?,
        }
        Ok(())
    }

    fn control(&mut self, line: usize, raw: RawCommand, out: &mut dyn Write) -> Result<()> {
        let name = match raw.code {
            RawCommand::LOCK => "lock",
            RawCommand::UNLOCK => "unlock",
            RawCommand::GETSIZE => "getsize",
            RawCommand::DELETE => "delete",
            _ => "unknown",
        };
        let code = self.device.handle_raw(raw);
        writeln!(
            out,
            "{line}: {name} {:#x} (key {}) -> {code}",
            raw.offset,
            self.device.key_for(raw.offset)
        )?;
        Ok(())
    }

    fn summarize(&self, out: &mut dyn Write) -> Result<()> {
        let stats = self.device.stats();
        let summary = Summary {
            objects: stats.objects,
            allocated_bytes: stats.allocated_bytes,
            remaining_budget: stats.remaining_budget,
            exposures: self
                .spaces
                .iter()
                .map(|(name, (table, _))| (name.clone(), table.len()))
                .collect(),
        };
        writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
        Ok(())
    }
}
