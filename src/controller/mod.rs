//! Hysteresis based feedback control
//!
//! Temperatures are classified against a band around the target, and actuators are nudged
//! up or down by fractions of their step, always staying within their bounds.

mod cpu;
mod fan;

use std::{
    cmp::{max, min},
    fmt,
    sync::mpsc,
    time::Duration,
};

pub(crate) use cpu::CoreController;
pub(crate) use fan::FanController;

use crate::settings::{Bounds, Settings, Temp};

/// Sysfs value adjusted by a controller
pub(crate) trait Actuator: fmt::Display {
    /// Read current value, `None` if unavailable
    fn current(&self) -> Option<u32>;

    /// Write new value, `false` on failure
    fn apply(&self, value: u32) -> bool;
}

/// Change to apply to an actuator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Adjustment {
    /// Increase by amount
    Raise(u32),
    /// Decrease by amount
    Lower(u32),
    /// Set to the reset value
    Reset,
}

/// Temperature position relative to the hysteresis band
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum Band {
    /// Below the band, we are throttling too much
    BelowBand,
    /// In band, at or below target
    AtOrBelowTarget,
    /// In band, above target
    AboveTarget,
    /// Above the band, too hot
    AboveBand,
}

/// Classify temperature against the hysteresis band
pub(crate) fn classify(temp: Temp, settings: &Settings) -> Band {
    if temp < settings.hysteresis_lower_limit() {
        Band::BelowBand
    } else if temp <= settings.cpu_target_temperature {
        Band::AtOrBelowTarget
    } else if temp <= settings.hysteresis_upper_limit() {
        Band::AboveTarget
    } else {
        Band::AboveBand
    }
}

/// Temperature evolution since the previous reading
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Trend {
    /// Unchanged
    Steady,
    /// Decreased
    Cooling,
    /// Increased, by this many whole hysteresis deviations, at least one
    Warming(u32),
}

/// Compare current temperature with the previous one
pub(crate) fn trend(previous: Temp, current: Temp, deviation: Temp) -> Trend {
    if current == previous {
        Trend::Steady
    } else if current < previous {
        Trend::Cooling
    } else {
        let rise = current.abs_diff(previous);
        Trend::Warming(max(rise / deviation.max(1).unsigned_abs(), 1))
    }
}

/// A quarter of a step, rounded up
pub(crate) fn quarter(step: u32) -> u32 {
    step.div_ceil(4)
}

/// Half of a step, rounded up
pub(crate) fn half(step: u32) -> u32 {
    step.div_ceil(2)
}

/// Compute adjusted value, clamped to bounds
pub(crate) fn adjusted(current: u32, adjustment: Adjustment, bounds: &Bounds) -> u32 {
    let target = match adjustment {
        Adjustment::Raise(step) => current.saturating_add(step),
        Adjustment::Lower(step) => current.saturating_sub(step),
        Adjustment::Reset => bounds.reset,
    };
    max(min(target, bounds.ceiling), bounds.floor)
}

/// Apply adjustment to actuator, returns the value written if any
pub(crate) fn actuate<A>(actuator: &A, adjustment: Adjustment, bounds: &Bounds) -> Option<u32>
where
    A: Actuator,
{
    let current = if adjustment == Adjustment::Reset {
        None
    } else {
        let Some(current) = actuator.current() else {
            log::warn!("[{actuator}] Current value unavailable, dropping {adjustment:?}");
            return None;
        };
        Some(current)
    };
    let target = adjusted(current.unwrap_or(bounds.reset), adjustment, bounds);
    match current {
        Some(current) => log::debug!("[{actuator}] {adjustment:?}: {current} -> {target}"),
        None => log::debug!("[{actuator}] Reset to {target}"),
    }
    actuator.apply(target).then_some(target)
}

/// Interruptible sleep, returns `false` if exit was requested
pub(crate) fn sleep(dur: Duration, exit_rx: &mpsc::Receiver<()>) -> bool {
    matches!(
        exit_rx.recv_timeout(dur),
        Err(mpsc::RecvTimeoutError::Timeout)
    )
}
