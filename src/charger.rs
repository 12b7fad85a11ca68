//! Charger interlock and pack current estimate.

use std::io;
use std::path::PathBuf;

/// The relay that lets the charger run. Only ever switched off from here.
pub trait ChargerRelay {
    fn shutdown(&mut self) -> io::Result<()>;
}

/// Signed pack current estimate in mA, negative while discharging.
pub trait PackCurrent {
    fn pack_current_ma(&mut self) -> Option<i32>;
}

/// Relay driven through a GPIO value file.
#[derive(Debug)]
pub struct FileRelay {
    path: PathBuf,
}

impl FileRelay {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ChargerRelay for FileRelay {
    fn shutdown(&mut self) -> io::Result<()> {
        log::warn!("Opening charger relay at {:?}", self.path);
        std::fs::write(&self.path, b"0")
    }
}

/// No relay configured: nothing to switch, the operator is told instead.
#[derive(Debug, Default)]
pub struct NoRelay;

impl ChargerRelay for NoRelay {
    fn shutdown(&mut self) -> io::Result<()> {
        log::error!("No charger relay configured, disconnect the charger manually");
        Ok(())
    }
}

/// Reads a signed mA value published by an external estimator.
#[derive(Debug)]
pub struct FilePackCurrent {
    path: PathBuf,
}

impl FilePackCurrent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PackCurrent for FilePackCurrent {
    fn pack_current_ma(&mut self) -> Option<i32> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) => {
                log::warn!("Cannot read pack current from {:?}: {err}", self.path);
                return None;
            }
        };
        match text.trim().parse() {
            Ok(current) => Some(current),
            Err(err) => {
                log::warn!("Invalid pack current {:?}: {err}", text.trim());
                None
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct NoPackCurrent;

impl PackCurrent for NoPackCurrent {
    fn pack_current_ma(&mut self) -> Option<i32> {
        None
    }
}
