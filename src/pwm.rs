//! PWM fan code

// See https://docs.kernel.org/hwmon/sysfs-interface.html

use std::{fmt, path::PathBuf};

use crate::{
    controller::Actuator,
    device::SysfsLayout,
    settings::{FanHardware, FanSpeed},
    sysfs::{read_integer, read_value, write_integer, write_value},
};

/// PWM control modes
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum ControlMode {
    /// Fan driven by the hardware/firmware
    Automatic = 0,
    /// Fan driven by writes to the PWM value
    Manual = 1,
}

impl TryFrom<u8> for ControlMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Automatic),
            1 => Ok(Self::Manual),
            v => Err(v),
        }
    }
}

/// Stateless PWM control
#[derive(Clone, Debug)]
pub(crate) struct Pwm {
    /// `pwmN` sysfs filepath
    val: PathBuf,
    /// `pwmN_enable` sysfs filepath
    mode: PathBuf,
    /// Index among driver
    num: usize,
}

impl Pwm {
    /// Build a PWM driver for discovered fan hardware
    pub(crate) fn new(layout: &SysfsLayout, fan: &FanHardware) -> Self {
        let dir = layout.fanctrl_dir(fan.hwmon_node);
        let num = fan.pwm_subnode;
        Self {
            val: dir.join(format!("pwm{num}")),
            mode: dir.join(format!("pwm{num}_enable")),
            num,
        }
    }

    /// Get PWM control mode
    pub(crate) fn get_mode(&self) -> anyhow::Result<ControlMode> {
        read_value::<u8>(&self.mode)?
            .try_into()
            .map_err(|v| anyhow::anyhow!("Unexpected mode: {v}"))
    }

    /// Set PWM control mode
    pub(crate) fn set_mode(&self, mode: ControlMode) -> anyhow::Result<()> {
        log::trace!("Set PWM {self} mode to {mode}");
        write_value(&self.mode, mode as u8)
    }
}

impl Actuator for Pwm {
    fn current(&self) -> Option<FanSpeed> {
        read_integer(&self.val)
    }

    fn apply(&self, value: FanSpeed) -> bool {
        log::trace!("Set PWM {self} to {value}");
        write_integer(&self.val, value)
    }
}

impl fmt::Display for Pwm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "pwm{}", self.num)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::tests::FakeSysfs;

    fn fake_pwm() -> (FakeSysfs, Pwm) {
        let sysfs = FakeSysfs::new(1, true);
        let pwm = Pwm::new(&sysfs.layout, &sysfs.fan_hardware());
        (sysfs, pwm)
    }

    #[test]
    fn set() {
        let (sysfs, pwm) = fake_pwm();
        assert!(pwm.apply(123));
        assert_eq!(fs::read_to_string(sysfs.pwm_path()).unwrap(), "123\n");
    }

    #[test]
    fn get() {
        let (sysfs, pwm) = fake_pwm();
        fs::write(sysfs.pwm_path(), "124\n").unwrap();
        assert_eq!(pwm.current(), Some(124));
    }

    #[test]
    fn get_mode() {
        let (sysfs, pwm) = fake_pwm();
        fs::write(sysfs.pwm_enable_path(), "0\n").unwrap();
        assert_eq!(pwm.get_mode().unwrap(), ControlMode::Automatic);
        fs::write(sysfs.pwm_enable_path(), "1\n").unwrap();
        assert_eq!(pwm.get_mode().unwrap(), ControlMode::Manual);
        fs::write(sysfs.pwm_enable_path(), "2\n").unwrap();
        assert!(pwm.get_mode().is_err());
    }

    #[test]
    fn set_mode() {
        let (sysfs, pwm) = fake_pwm();
        pwm.set_mode(ControlMode::Manual).unwrap();
        assert_eq!(fs::read_to_string(sysfs.pwm_enable_path()).unwrap(), "1\n");
        pwm.set_mode(ControlMode::Automatic).unwrap();
        assert_eq!(fs::read_to_string(sysfs.pwm_enable_path()).unwrap(), "0\n");
    }

    #[test]
    fn display() {
        let (_sysfs, pwm) = fake_pwm();
        assert_eq!(pwm.to_string().as_str(), "pwm1");
        assert_eq!(ControlMode::Automatic.to_string(), "automatic");
    }
}
