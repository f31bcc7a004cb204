//! Package wide fan controller

use std::{fmt, sync::mpsc};

use super::{Adjustment, Band, Trend, actuate, classify, half, quarter, sleep, trend};
use crate::{
    device::TempSensor,
    pwm::{ControlMode, Pwm},
    settings::{Settings, SharedSettings, Temp, celsius},
};

/// Controller runtime state, owned by its thread
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct State {
    /// Last out of band temperature
    pub previous_temperature: Temp,
}

impl State {
    /// Update state from a new temperature reading, and decide how to change fan speed
    pub(crate) fn next(&mut self, temp: Temp, settings: &Settings) -> Adjustment {
        let step = settings.fan_scaling_step;
        match classify(temp, settings) {
            Band::AtOrBelowTarget => Adjustment::Lower(quarter(step)),
            Band::AboveTarget => Adjustment::Raise(quarter(step)),
            Band::BelowBand => {
                self.previous_temperature = temp;
                Adjustment::Lower(half(step))
            }
            Band::AboveBand => {
                let change = match trend(
                    self.previous_temperature,
                    temp,
                    settings.hysteresis_deviation(),
                ) {
                    Trend::Steady => quarter(step),
                    Trend::Cooling => half(step),
                    Trend::Warming(_) => step,
                };
                self.previous_temperature = temp;
                Adjustment::Raise(change)
            }
        }
    }
}

/// Fan speed controller, driven by the package temperature
pub(crate) struct FanController {
    /// Package temperature
    sensor: TempSensor,
    /// Fan
    pwm: Pwm,
    /// Runtime state
    state: State,
}

impl FanController {
    /// Build a controller with fresh state
    pub(crate) fn new(sensor: TempSensor, pwm: Pwm) -> Self {
        Self {
            sensor,
            pwm,
            state: State::default(),
        }
    }

    /// Run a single control cycle
    pub(crate) fn tick(&mut self, settings: &Settings) {
        let Some(bounds) = settings.fan_bounds() else {
            return;
        };
        let Some(temp) = self.sensor.read() else {
            log::error!("[{self}] Could not read {} temperature", self.sensor);
            return;
        };
        let adjustment = self.state.next(temp, settings);
        log::debug!("[{self}] Temperature {:.1}°C, {adjustment:?}", celsius(temp));
        actuate(&self.pwm, adjustment, &bounds);
    }

    /// Control loop, until exit is requested
    pub(crate) fn run(mut self, settings: &SharedSettings, exit_rx: &mpsc::Receiver<()>) {
        match self.pwm.get_mode() {
            Ok(ControlMode::Manual) => {}
            Ok(mode) => log::info!("[{self}] Switching from {mode} to manual control"),
            Err(err) => log::warn!("[{self}] Unknown control mode: {err}"),
        }
        if let Err(err) = self.pwm.set_mode(ControlMode::Manual) {
            log::error!("[{self}] Failed to enable manual fan control: {err}");
        }
        log::info!("[{self}] Controller started");
        while sleep(settings.snapshot().polling_interval, exit_rx) {
            self.tick(&settings.snapshot());
        }
        log::info!("[{self}] Controller stopped");
    }
}

impl fmt::Display for FanController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fan {}", self.pwm)
    }
}
