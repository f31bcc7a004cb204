//! Hwmon discovery and temperature probes

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use backon::{BlockingRetryable as _, ExponentialBuilder};

use super::SysfsLayout;
use crate::{
    settings::{FanHardware, FanSpeed, Hardware, Khz, Temp},
    sysfs::{ensure_sysfs_dir, ensure_sysfs_file, read_integer},
};

/// Number of `hwmonN` and `pwmM` candidates probed
const MAX_NODE_INDEX: usize = 10;

/// Fan speed range used when the hardware does not report it
const FALLBACK_FAN_SPEEDS: (FanSpeed, FanSpeed) = (10, 255);

/// Fatal hardware discovery error
#[derive(thiserror::Error, Debug)]
pub(crate) enum DiscoveryError {
    /// No core temperature node
    #[error("No core temperature hwmon node found in {0:?}")]
    NoCoreTempNode(PathBuf),
    /// Scaling limits could not be read
    #[error("Could not read CPU scaling limit {0:?}")]
    ScalingLimits(PathBuf),
    /// Scaling limits make no sense
    #[error("Inconsistent CPU scaling limits: min {min} > max {max}")]
    InvalidScalingLimits {
        /// Minimum frequency
        min: Khz,
        /// Maximum frequency
        max: Khz,
    },
}

/// Find first existing `hwmonN` directory
fn probe_node(root: &Path) -> Option<usize> {
    (0..MAX_NODE_INDEX).find(|node| ensure_sysfs_dir(&super::hwmon_dir(root, *node)).is_ok())
}

/// Find first existing `pwmM_enable` file
fn probe_pwm_subnode(dir: &Path) -> Option<usize> {
    (0..MAX_NODE_INDEX)
        .find(|num| ensure_sysfs_file(&dir.join(format!("pwm{num}_enable"))).is_ok())
}

/// Read a CPU scaling limit
fn read_scaling_limit(path: PathBuf) -> Result<Khz, DiscoveryError> {
    read_integer(&path).ok_or(DiscoveryError::ScalingLimits(path))
}

/// Find fan control node and its speed limits
fn discover_fan(layout: &SysfsLayout) -> Option<FanHardware> {
    let Some(hwmon_node) = probe_node(&layout.fanctrl_root) else {
        log::warn!(
            "No fan control hwmon node found in {:?}, working without fan control",
            layout.fanctrl_root
        );
        return None;
    };
    let dir = layout.fanctrl_dir(hwmon_node);
    let Some(pwm_subnode) = probe_pwm_subnode(&dir) else {
        log::warn!("No PWM interface found in {dir:?}, working without fan control");
        return None;
    };
    let hw_min = read_integer(&dir.join(format!("fan{pwm_subnode}_min")));
    let hw_max = read_integer(&dir.join(format!("fan{pwm_subnode}_speed_max")));
    let (hw_min_speed, hw_max_speed) = match (hw_min, hw_max) {
        (Some(min), Some(max)) if min <= max => (min, max),
        _ => {
            log::warn!(
                "Unusable fan speed limits {hw_min:?}/{hw_max:?} in {dir:?}, assuming {}-{}",
                FALLBACK_FAN_SPEEDS.0,
                FALLBACK_FAN_SPEEDS.1
            );
            FALLBACK_FAN_SPEEDS
        }
    };
    log::info!(
        "Found fan control at {dir:?}, PWM {pwm_subnode}, speed {hw_min_speed}-{hw_max_speed}"
    );
    Some(FanHardware {
        hwmon_node,
        pwm_subnode,
        hw_min_speed,
        hw_max_speed,
    })
}

/// Probe hardware nodes and limits
pub(crate) fn discover(layout: &SysfsLayout) -> Result<Hardware, DiscoveryError> {
    // Hwmon drivers can register late at boot
    let coretemp_hwmon_node = (|| {
        probe_node(&layout.coretemp_root)
            .ok_or_else(|| DiscoveryError::NoCoreTempNode(layout.coretemp_root.clone()))
    })
    .retry(
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(50))
            .with_factor(1.5)
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(layout.boot_retries),
    )
    .notify(|err, delay| log::warn!("{err}, retrying in {delay:?}"))
    .call()?;
    log::info!(
        "Found core temperature node at {:?}",
        layout.coretemp_dir(coretemp_hwmon_node)
    );

    let fan = discover_fan(layout);

    let cpufreq_dir = layout.cpufreq_dir(0);
    let cpuinfo_min_freq = read_scaling_limit(cpufreq_dir.join("cpuinfo_min_freq"))?;
    let cpuinfo_max_freq = read_scaling_limit(cpufreq_dir.join("cpuinfo_max_freq"))?;
    if cpuinfo_min_freq > cpuinfo_max_freq {
        return Err(DiscoveryError::InvalidScalingLimits {
            min: cpuinfo_min_freq,
            max: cpuinfo_max_freq,
        });
    }
    log::info!("CPU scaling limits: {cpuinfo_min_freq}-{cpuinfo_max_freq}KHz");

    Ok(Hardware {
        coretemp_hwmon_node,
        fan,
        cpuinfo_min_freq,
        cpuinfo_max_freq,
    })
}

/// A hwmon temperature probe
pub(crate) struct TempSensor {
    /// Sysfs `tempN_input` path
    input_path: PathBuf,
    /// Display name
    name: String,
}

impl TempSensor {
    /// Temperature probe of a logical core
    pub(crate) fn core(
        layout: &SysfsLayout,
        hardware: &Hardware,
        core: usize,
        index: usize,
    ) -> Self {
        Self {
            input_path: layout
                .coretemp_dir(hardware.coretemp_hwmon_node)
                .join(format!("temp{index}_input")),
            name: format!("cpu{core}"),
        }
    }

    /// Temperature probe of the whole package
    pub(crate) fn package(layout: &SysfsLayout, hardware: &Hardware) -> Self {
        Self {
            input_path: layout
                .coretemp_dir(hardware.coretemp_hwmon_node)
                .join("temp1_input"),
            name: "package".to_owned(),
        }
    }

    /// Read current temperature, `None` if unavailable
    pub(crate) fn read(&self) -> Option<Temp> {
        read_integer(&self.input_path)
    }
}

impl fmt::Display for TempSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
