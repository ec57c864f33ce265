/*! GPIO control lines.

Drives the PTT, DCD, connected and sync indicator outputs, and
reads the transmit inhibit input, through the sysfs GPIO interface.
Push to talk and carrier detect changes are also reported to the
receive queue so the link layer can pause its timers while the
channel is occupied.
 */
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

use crate::config::{Config, GpioSpec};
use crate::rxqueue::{BusyLine, ReceiveQueue};
use crate::{Error, Result};

/// The output lines this node can drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputLine {
    /// Push to talk.
    Ptt,
    /// Data carrier detect indicator.
    Dcd,
    /// Connected indicator.
    Con,
    /// Sync indicator.
    Syn,
}

const NUM_OUTPUTS: usize = 4;

fn index(line: OutputLine) -> usize {
    match line {
        OutputLine::Ptt => 0,
        OutputLine::Dcd => 1,
        OutputLine::Con => 2,
        OutputLine::Syn => 3,
    }
}

struct GpioLine {
    spec: GpioSpec,
    value_path: PathBuf,
}

impl GpioLine {
    fn export(base: &Path, spec: GpioSpec, direction: &str) -> Result<Self> {
        let export = base.join("export");
        // Export may fail if the pin is already exported; that is
        // fine as long as the value file turns up.
        if let Err(e) = std::fs::OpenOptions::new()
            .write(true)
            .open(&export)
            .and_then(|mut f| f.write_all(spec.pin.to_string().as_bytes()))
        {
            debug!("GPIO {} export: {e}", spec.pin);
        }
        let dir = base.join(format!("gpio{}", spec.pin));
        let value_path = dir.join("value");
        std::fs::write(dir.join("direction"), direction).map_err(|e| {
            Error::Io(e, format!("setting GPIO {} direction", spec.pin))
        })?;
        if !value_path.exists() {
            return Err(Error::Config(format!(
                "GPIO {} did not appear after export",
                spec.pin
            )));
        }
        Ok(Self { spec, value_path })
    }

    fn set(&self, state: bool) {
        let physical = state != self.spec.invert;
        if let Err(e) = std::fs::write(&self.value_path, if physical { "1" } else { "0" }) {
            warn!("failed to set GPIO {}: {e}", self.spec.pin);
        }
    }

    fn get(&self) -> bool {
        match std::fs::read_to_string(&self.value_path) {
            Ok(v) => {
                let raw = v.trim_start().starts_with('1');
                raw != self.spec.invert
            }
            Err(e) => {
                warn!("failed to read GPIO {}: {e}", self.spec.pin);
                false
            }
        }
    }
}

/// All configured control lines.
pub struct PttControl {
    outputs: [Option<GpioLine>; NUM_OUTPUTS],
    txinh: Option<GpioLine>,
    rxq: Arc<ReceiveQueue>,
}

impl PttControl {
    /// Set up the lines named in the configuration, with the
    /// standard sysfs base directory.
    pub fn new(config: &Config, rxq: Arc<ReceiveQueue>) -> Result<Self> {
        Self::with_base(config, rxq, Path::new("/sys/class/gpio"))
    }

    /// Same, against an arbitrary sysfs-like directory.
    pub fn with_base(config: &Config, rxq: Arc<ReceiveQueue>, base: &Path) -> Result<Self> {
        let mut outputs: [Option<GpioLine>; NUM_OUTPUTS] = Default::default();
        for (line, spec) in [
            (OutputLine::Ptt, config.ptt_gpio),
            (OutputLine::Dcd, config.dcd_gpio),
            (OutputLine::Con, config.con_gpio),
            (OutputLine::Syn, config.syn_gpio),
        ] {
            if let Some(spec) = spec {
                let gpio = GpioLine::export(base, spec, "out")?;
                gpio.set(false);
                outputs[index(line)] = Some(gpio);
            }
        }
        let txinh = match config.txinh_gpio {
            Some(spec) => Some(GpioLine::export(base, spec, "in")?),
            None => None,
        };
        Ok(Self {
            outputs,
            txinh,
            rxq,
        })
    }

    /// Drive an output line, and report channel activity changes.
    pub fn set(&self, line: OutputLine, state: bool) {
        if let Some(gpio) = &self.outputs[index(line)] {
            gpio.set(state);
        }
        match line {
            OutputLine::Ptt => self.rxq.channel_busy(BusyLine::Ptt, state),
            OutputLine::Dcd => self.rxq.channel_busy(BusyLine::Dcd, state),
            _ => {}
        }
    }

    /// Whether transmit is inhibited by the input line.
    pub fn tx_inhibited(&self) -> bool {
        self.txinh.as_ref().map(|g| g.get()).unwrap_or(false)
    }

    /// Drop all outputs to their inactive state.
    pub fn term(&self) {
        for gpio in self.outputs.iter().flatten() {
            gpio.set(false);
        }
    }
}
