//! The control service: Lock, Unlock, GetSize and Delete.
//!
//! `Lock` is the only command that creates an unknown object; the others
//! fail with `NotFound` for it. None of the commands take the advisory lock
//! internally: `GetSize` and `Delete` proceed even while another caller
//! holds it, and any caller may `Unlock` an object regardless of who locked it.

use std::time::Duration;

use log::debug;
use npheap_common::{Result, error::Error, verify_arg};

use crate::registry::Registry;

/// A decoded control request. Keys are page indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Acquire the advisory lock, blocking until it is free (or until the
    /// device's default lock timeout, when one is configured).
    Lock(u64),
    /// Acquire the advisory lock, giving up after the timeout.
    LockTimeout(u64, Duration),
    Unlock(u64),
    GetSize(u64),
    Delete(u64),
}

impl Command {
    pub fn key(&self) -> u64 {
        match *self {
            Command::Lock(key)
            | Command::LockTimeout(key, _)
            | Command::Unlock(key)
            | Command::GetSize(key)
            | Command::Delete(key) => key,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Lock(_) => "lock",
            Command::LockTimeout(..) => "lock-timeout",
            Command::Unlock(_) => "unlock",
            Command::GetSize(_) => "getsize",
            Command::Delete(_) => "delete",
        }
    }

    /// Decodes a transport command, deriving the key as `offset / page_size`.
    pub fn decode(raw: RawCommand, page_size: u64) -> Result<Command> {
        verify_arg!(page_size, page_size != 0);
        let key = raw.offset / page_size;
        match raw.code {
            RawCommand::LOCK => Ok(Command::Lock(key)),
            RawCommand::UNLOCK => Ok(Command::Unlock(key)),
            RawCommand::GETSIZE => Ok(Command::GetSize(key)),
            RawCommand::DELETE => Ok(Command::Delete(key)),
            code => Err(Error::unknown_command(code)),
        }
    }
}

/// A control request as carried by the transport: a command code and a raw
/// byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCommand {
    pub code: u32,
    pub offset: u64,
}

impl RawCommand {
    pub const LOCK: u32 = 1;
    pub const UNLOCK: u32 = 2;
    pub const GETSIZE: u32 = 3;
    pub const DELETE: u32 = 4;

    pub fn new(code: u32, offset: u64) -> RawCommand {
        RawCommand { code, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Done,
    Size(u64),
}

/// Encodes a command result for the transport: the size for `GetSize`, 0 for
/// any other success, a negative errno on failure.
pub fn reply_code(result: &Result<Reply>) -> i64 {
    match result {
        Ok(Reply::Done) => 0,
        Ok(Reply::Size(size)) => i64::try_from(*size).unwrap_or(i64::MAX),
        Err(e) => e.errno(),
    }
}

/// Runs `command` against `registry`.
///
/// `default_timeout` bounds a plain `Lock`; with `None` it blocks indefinitely.
pub fn execute(
    registry: &Registry,
    command: Command,
    default_timeout: Option<Duration>,
) -> Result<Reply> {
    debug!("{} {}", command.name(), command.key());
    match command {
        Command::Lock(key) => match default_timeout {
            Some(timeout) => lock_timeout(registry, key, timeout),
            None => {
                registry.get_or_insert(key).advisory_lock().lock();
                Ok(Reply::Done)
            }
        },
        Command::LockTimeout(key, timeout) => lock_timeout(registry, key, timeout),
        Command::Unlock(key) => {
            if registry.get(key)?.advisory_lock().unlock() {
                Ok(Reply::Done)
            } else {
                Err(Error::not_locked(key))
            }
        }
        Command::GetSize(key) => Ok(Reply::Size(registry.get(key)?.size())),
        Command::Delete(key) => {
            registry.remove(key)?;
            Ok(Reply::Done)
        }
    }
}

fn lock_timeout(registry: &Registry, key: u64, timeout: Duration) -> Result<Reply> {
    if registry.get_or_insert(key).advisory_lock().lock_timeout(timeout) {
        Ok(Reply::Done)
    } else {
        Err(Error::lock_timeout(key, timeout))
    }
}
