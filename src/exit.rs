//! Exit hook to hand hardware control back to the system

use crate::{
    controller::Actuator as _,
    device::CpuFreq,
    pwm::{ControlMode, Pwm},
    settings::Khz,
};

/// Restore hardware defaults when dropped
pub(crate) struct ExitHook {
    /// Fan to switch back to automatic mode
    pwm: Option<Pwm>,
    /// Cores whose frequency ceiling is restored
    cores: Vec<CpuFreq>,
    /// Hardware maximum frequency
    max_freq: Khz,
}

impl ExitHook {
    /// Build hook restoring fan mode and frequency ceilings
    pub(crate) fn new(pwm: Option<Pwm>, cores: Vec<CpuFreq>, max_freq: Khz) -> Self {
        Self {
            pwm,
            cores,
            max_freq,
        }
    }
}

impl Drop for ExitHook {
    fn drop(&mut self) {
        if let Some(pwm) = &self.pwm {
            log::info!("Restoring automatic control of fan {pwm}");
            if let Err(err) = pwm.set_mode(ControlMode::Automatic) {
                log::error!("Failed to restore automatic control of fan {pwm}: {err}");
            }
        }
        for core in &self.cores {
            log::info!("Restoring {core} frequency ceiling to {}KHz", self.max_freq);
            let _ = core.apply(self.max_freq);
        }
    }
}
