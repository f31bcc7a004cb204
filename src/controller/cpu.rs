//! Per core frequency controller

use std::{fmt, sync::mpsc};

use super::{Adjustment, Band, Trend, actuate, classify, half, quarter, sleep, trend};
use crate::{
    device::{CpuFreq, TempSensor},
    pwm::Pwm,
    settings::{Hysteresis, Settings, SharedSettings, Temp, celsius},
};

/// Controller runtime state, owned by its thread
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct State {
    /// Last out of band temperature
    pub previous_temperature: Temp,
    /// Consecutive intervals spent in band above target
    pub intervals_in_hysteresis: u32,
}

/// Adjustments decided for one control cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Actions {
    /// Frequency ceiling change
    pub freq: Option<Adjustment>,
    /// Fan speed change
    pub fan: Option<Adjustment>,
}

impl State {
    /// Update state from a new temperature reading, and decide what to change
    pub(crate) fn next(&mut self, temp: Temp, settings: &Settings) -> Actions {
        let step = settings.cpu_scaling_step;
        let fan_step = settings.fan_scaling_step;
        match classify(temp, settings) {
            Band::AtOrBelowTarget => Actions {
                freq: Some(Adjustment::Raise(quarter(step))),
                fan: None,
            },
            Band::AboveTarget => {
                self.intervals_in_hysteresis = self.intervals_in_hysteresis.saturating_add(1);
                if self.intervals_in_hysteresis >= settings.hysteresis_reset_threshold {
                    // Steady state, stop capping the frequency
                    self.intervals_in_hysteresis = 0;
                    Actions {
                        freq: Some(Adjustment::Reset),
                        fan: Some(Adjustment::Reset),
                    }
                } else {
                    Actions::default()
                }
            }
            Band::BelowBand => {
                self.intervals_in_hysteresis = 0;
                self.previous_temperature = temp;
                Actions {
                    freq: Some(Adjustment::Raise(half(step))),
                    fan: Some(Adjustment::Lower(half(fan_step))),
                }
            }
            Band::AboveBand => {
                self.intervals_in_hysteresis = 0;
                let (freq_change, fan_change) = match trend(
                    self.previous_temperature,
                    temp,
                    settings.hysteresis_deviation(),
                ) {
                    Trend::Steady => (step, fan_step),
                    Trend::Cooling => (half(step), half(fan_step)),
                    Trend::Warming(deviations) => {
                        let factor = match settings.hysteresis {
                            Hysteresis::Absolute(_) => deviations,
                            Hysteresis::Fraction(_) => 1,
                        };
                        (
                            step.saturating_mul(factor),
                            fan_step.saturating_mul(factor),
                        )
                    }
                };
                self.previous_temperature = temp;
                Actions {
                    freq: Some(Adjustment::Lower(freq_change)),
                    fan: Some(Adjustment::Raise(fan_change)),
                }
            }
        }
    }
}

/// Frequency (and fan) controller of a logical core
pub(crate) struct CoreController {
    /// Core temperature
    sensor: TempSensor,
    /// Core frequency ceiling
    freq: CpuFreq,
    /// Shared fan, if any
    fan: Option<Pwm>,
    /// Runtime state
    state: State,
}

impl CoreController {
    /// Build a controller with fresh state
    pub(crate) fn new(sensor: TempSensor, freq: CpuFreq, fan: Option<Pwm>) -> Self {
        Self {
            sensor,
            freq,
            fan,
            state: State::default(),
        }
    }

    /// Run a single control cycle
    pub(crate) fn tick(&mut self, settings: &Settings) {
        let Some(temp) = self.sensor.read() else {
            log::error!("[{self}] Could not read temperature");
            return;
        };
        let actions = self.state.next(temp, settings);
        log::debug!(
            "[{self}] Temperature {:.1}°C, {} intervals in hysteresis, {actions:?}",
            celsius(temp),
            self.state.intervals_in_hysteresis
        );

        // Writes are independent, a failed one does not prevent the other
        if let Some(adjustment) = actions.freq {
            actuate(&self.freq, adjustment, &settings.freq_bounds());
        }
        if let (Some(adjustment), Some(fan), Some(bounds)) =
            (actions.fan, self.fan.as_ref(), settings.fan_bounds())
        {
            actuate(fan, adjustment, &bounds);
        }
    }

    /// Control loop, until exit is requested
    pub(crate) fn run(mut self, settings: &SharedSettings, exit_rx: &mpsc::Receiver<()>) {
        log::info!("[{self}] Controller started");
        while sleep(settings.snapshot().polling_interval, exit_rx) {
            self.tick(&settings.snapshot());
        }
        log::info!("[{self}] Controller stopped");
    }
}

impl fmt::Display for CoreController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.freq.fmt(f)
    }
}
