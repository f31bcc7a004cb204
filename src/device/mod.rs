//! Sensors and actuators found under sysfs

mod cpu;
mod hwmon;

use std::path::{Path, PathBuf};

pub(crate) use cpu::CpuFreq;
pub(crate) use hwmon::{TempSensor, discover};

/// Sysfs locations probed for hardware
#[derive(Clone, Debug)]
pub(crate) struct SysfsLayout {
    /// Parent of the core temperature `hwmonN` nodes
    pub coretemp_root: PathBuf,
    /// Parent of the fan control `hwmonN` nodes
    pub fanctrl_root: PathBuf,
    /// Parent of the `cpuN` directories
    pub cpu_root: PathBuf,
    /// How many times to retry finding the core temperature node
    pub boot_retries: usize,
}

impl Default for SysfsLayout {
    fn default() -> Self {
        Self {
            coretemp_root: PathBuf::from("/sys/devices/platform/coretemp.0/hwmon"),
            fanctrl_root: PathBuf::from("/sys/devices/platform/asus_fan/hwmon"),
            cpu_root: PathBuf::from("/sys/devices/system/cpu"),
            boot_retries: 8,
        }
    }
}

impl SysfsLayout {
    /// Core temperature node directory
    pub(crate) fn coretemp_dir(&self, node: usize) -> PathBuf {
        hwmon_dir(&self.coretemp_root, node)
    }

    /// Fan control node directory
    pub(crate) fn fanctrl_dir(&self, node: usize) -> PathBuf {
        hwmon_dir(&self.fanctrl_root, node)
    }

    /// Frequency scaling directory of a logical core
    pub(crate) fn cpufreq_dir(&self, core: usize) -> PathBuf {
        self.cpu_root.join(format!("cpu{core}")).join("cpufreq")
    }
}

/// `hwmonN` directory under root
fn hwmon_dir(root: &Path, node: usize) -> PathBuf {
    root.join(format!("hwmon{node}"))
}
