//! CPU frequency scaling

use std::{fmt, path::PathBuf};

use super::SysfsLayout;
use crate::{
    controller::Actuator,
    settings::Khz,
    sysfs::{read_integer, write_integer, write_string},
};

/// Frequency ceiling of a logical core
#[derive(Clone, Debug)]
pub(crate) struct CpuFreq {
    /// Logical core index
    core: usize,
    /// Sysfs `scaling_max_freq` path
    max_freq_path: PathBuf,
    /// Sysfs `scaling_governor` path
    governor_path: PathBuf,
}

impl CpuFreq {
    /// Build frequency control for a logical core
    pub(crate) fn new(layout: &SysfsLayout, core: usize) -> Self {
        let dir = layout.cpufreq_dir(core);
        Self {
            core,
            max_freq_path: dir.join("scaling_max_freq"),
            governor_path: dir.join("scaling_governor"),
        }
    }

    /// Set scaling governor
    pub(crate) fn set_governor(&self, governor: &str) -> bool {
        log::info!("[{self}] Setting scaling governor to {governor}");
        write_string(&self.governor_path, governor)
    }
}

impl Actuator for CpuFreq {
    fn current(&self) -> Option<Khz> {
        read_integer(&self.max_freq_path)
    }

    fn apply(&self, value: Khz) -> bool {
        write_integer(&self.max_freq_path, value)
    }
}

impl fmt::Display for CpuFreq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.core)
    }
}
