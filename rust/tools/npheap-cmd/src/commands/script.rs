//! Parser for request scripts.
//!
//! One request per line, `#` starts a comment:
//!
//! ```text
//! map <key> <length> [space]   # expose object <key> in a named address space
//! lock <offset>
//! unlock <offset>
//! getsize <offset>
//! delete <offset>
//! dump
//! ```
//!
//! Control requests take a raw byte offset, as the transport carries it.
//! Address spaces stand in for separate callers; `main` is used when none is
//! named.
//!
//! A script runs on a single thread, so locking a key it already holds waits
//! for the device's lock timeout and then reports `-ETIMEDOUT`.

use anyhow::{Context, Result, bail};
use npheap::RawCommand;

use crate::utils::parse_u64;

pub const DEFAULT_SPACE: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Map {
        key: u64,
        length: u64,
        space: String,
    },
    Control(RawCommand),
    Dump,
}

pub fn parse(text: &str) -> Result<Vec<(usize, Step)>> {
    let mut steps = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        if let Some(step) =
            parse_line(line).with_context(|| format!("line {line_no}: {}", line.trim()))?
        {
            steps.push((line_no, step));
        }
    }
    Ok(steps)
}

pub fn parse_line(line: &str) -> Result<Option<Step>> {
    let line = line.split('#').next().unwrap_or_default();
    let words = line.split_whitespace().collect::<Vec<_>>();
    let Some((&verb, args)) = words.split_first() else {
        return Ok(None);
    };

    let step = match verb {
        "map" => match args {
            [key, length] | [key, length, _] => Step::Map {
                key: parse_u64(key)?,
                length: parse_u64(length)?,
                space: args.get(2).unwrap_or(&DEFAULT_SPACE).to_string(),
            },
            _ => bail!("usage: map <key> <length> [space]"),
        },
        "lock" => control(RawCommand::LOCK, verb, args)?,
        "unlock" => control(RawCommand::UNLOCK, verb, args)?,
        "getsize" => control(RawCommand::GETSIZE, verb, args)?,
        "delete" => control(RawCommand::DELETE, verb, args)?,
        "dump" => {
            if !args.is_empty() {
                bail!("usage: dump");
            }
            Step::Dump
        }
        other => bail!("unknown request: {other}"),
    };
    Ok(Some(step))
}

fn control(code: u32, verb: &str, args: &[&str]) -> Result<Step> {
    match args {
        [offset] => Ok(Step::Control(RawCommand::new(code, parse_u64(offset)?))),
        _ => bail!("usage: {verb} <offset>"),
    }
}
