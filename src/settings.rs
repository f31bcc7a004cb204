//! Throttling settings

use std::{
    cmp::{max, min},
    fmt,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

/// Temperature in milli Celsius
pub(crate) type Temp = i32;

/// CPU frequency in KHz
pub(crate) type Khz = u32;

/// Raw fan PWM duty value
pub(crate) type FanSpeed = u32;

/// Shortest accepted polling interval
const MIN_POLLING_INTERVAL: Duration = Duration::from_millis(1);

/// Convert temperature to Celsius for display
pub(crate) fn celsius(temp: Temp) -> f64 {
    f64::from(temp) / 1000.0
}

/// Width of the band around the target temperature
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Hysteresis {
    /// Fixed deviation from target
    Absolute(Temp),
    /// Deviation as a fraction of the target
    Fraction(f64),
}

impl Hysteresis {
    /// Deviation from target temperature
    #[expect(clippy::cast_possible_truncation)]
    pub(crate) fn deviation(self, target: Temp) -> Temp {
        match self {
            Self::Absolute(dev) => dev.max(0),
            Self::Fraction(frac) => {
                (f64::from(target).abs() * frac.clamp(0.0, 1.0)).round() as Temp
            }
        }
    }
}

impl fmt::Display for Hysteresis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absolute(dev) => write!(f, "±{:.1}°C", celsius(*dev)),
            Self::Fraction(frac) => write!(f, "±{:.1}%", frac * 100.0),
        }
    }
}

/// Fan control hardware found at startup
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub(crate) struct FanHardware {
    /// `hwmonN` index of the fan control node
    pub hwmon_node: usize,
    /// `pwmM` index inside the fan control node
    pub pwm_subnode: usize,
    /// Hardware minimum fan speed
    pub hw_min_speed: FanSpeed,
    /// Hardware maximum fan speed
    pub hw_max_speed: FanSpeed,
}

/// Hardware identifiers and limits found at startup
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub(crate) struct Hardware {
    /// `hwmonN` index of the core temperature node
    pub coretemp_hwmon_node: usize,
    /// Fan control, if any
    pub fan: Option<FanHardware>,
    /// Hardware minimum scaling frequency
    pub cpuinfo_min_freq: Khz,
    /// Hardware maximum scaling frequency
    pub cpuinfo_max_freq: Khz,
}

/// Range a controlled value is kept in, and the value it is reset to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Bounds {
    /// Lowest value ever written
    pub floor: u32,
    /// Highest value ever written
    pub ceiling: u32,
    /// Value written on full reset
    pub reset: u32,
}

/// Runtime settings, shared read only by all controllers
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) struct Settings {
    /// Target CPU temperature
    pub cpu_target_temperature: Temp,
    /// Band around target in which no emergency throttling happens
    pub hysteresis: Hysteresis,
    /// Consecutive intervals above target, but in band, before resetting to hardware defaults
    pub hysteresis_reset_threshold: u32,
    /// Frequency adjustment step
    pub cpu_scaling_step: Khz,
    /// Highest frequency ceiling we allow
    pub cpu_max_freq: Khz,
    /// Fan speed adjustment step
    pub fan_scaling_step: FanSpeed,
    /// Lowest fan speed we allow, hardware minimum if unset
    pub fan_min_speed: Option<FanSpeed>,
    /// Fan speed set on full reset, minimum fan speed if unset
    pub fan_rest_speed: Option<FanSpeed>,
    /// Delay between two control cycles
    pub polling_interval: Duration,
    /// Number of logical cores to manage
    pub num_cores: usize,
    /// Whether odd cores are hyperthread siblings that must be skipped
    pub cpu_ht_available: bool,
    /// Discovered hardware
    pub hardware: Hardware,
}

impl Settings {
    /// Build default settings for the given hardware
    pub(crate) fn new(hardware: Hardware) -> Self {
        Self {
            cpu_target_temperature: 55_000,
            hysteresis: Hysteresis::Absolute(6_000),
            hysteresis_reset_threshold: 100,
            cpu_scaling_step: 100_000,
            cpu_max_freq: hardware.cpuinfo_max_freq,
            fan_scaling_step: 2,
            fan_min_speed: None,
            fan_rest_speed: None,
            polling_interval: Duration::from_millis(500),
            num_cores: 1,
            cpu_ht_available: false,
            hardware,
        }
    }

    /// Deviation from target delimiting the hysteresis band
    pub(crate) fn hysteresis_deviation(&self) -> Temp {
        self.hysteresis.deviation(self.cpu_target_temperature)
    }

    /// Highest temperature of the hysteresis band
    pub(crate) fn hysteresis_upper_limit(&self) -> Temp {
        self.cpu_target_temperature
            .saturating_add(self.hysteresis_deviation())
    }

    /// Lowest temperature of the hysteresis band
    pub(crate) fn hysteresis_lower_limit(&self) -> Temp {
        self.cpu_target_temperature
            .saturating_sub(self.hysteresis_deviation())
    }

    /// Frequency ceiling bounds
    pub(crate) fn freq_bounds(&self) -> Bounds {
        let floor = self.hardware.cpuinfo_min_freq;
        let ceiling = max(self.cpu_max_freq, floor);
        Bounds {
            floor,
            ceiling,
            reset: ceiling,
        }
    }

    /// Fan speed bounds, if we have a fan
    pub(crate) fn fan_bounds(&self) -> Option<Bounds> {
        self.hardware.fan.as_ref().map(|fan| {
            let floor = min(
                self.fan_min_speed
                    .unwrap_or(fan.hw_min_speed)
                    .max(fan.hw_min_speed),
                fan.hw_max_speed,
            );
            let rest = self
                .fan_rest_speed
                .unwrap_or(floor)
                .max(floor)
                .min(fan.hw_max_speed);
            Bounds {
                floor,
                ceiling: fan.hw_max_speed,
                reset: rest,
            }
        })
    }

    /// Logical cores to run a controller for
    pub(crate) fn managed_cores(&self) -> Vec<usize> {
        (0..self.num_cores)
            .filter(|core| !(self.cpu_ht_available && core % 2 == 1))
            .collect()
    }

    /// Index of the `tempN_input` file for a logical core
    ///
    /// `temp1_input` is the whole package, cores start at 2.
    pub(crate) fn core_sensor_index(&self, core: usize) -> usize {
        let physical = if self.cpu_ht_available {
            core / 2
        } else {
            core
        };
        physical + 2
    }

    /// Clamp settings to hardware limits and sane values
    #[must_use]
    pub(crate) fn validate(mut self) -> Self {
        let hw = &self.hardware;
        self.cpu_max_freq = clamped(
            "maximum frequency",
            self.cpu_max_freq,
            hw.cpuinfo_min_freq,
            hw.cpuinfo_max_freq,
        );
        self.cpu_scaling_step = clamped("frequency step", self.cpu_scaling_step, 1, Khz::MAX);
        self.hysteresis_reset_threshold = clamped(
            "hysteresis reset threshold",
            self.hysteresis_reset_threshold,
            1,
            u32::MAX,
        );
        self.num_cores = clamped("core count", self.num_cores, 1, usize::MAX);
        if self.polling_interval < MIN_POLLING_INTERVAL {
            log::warn!(
                "Polling interval {:?} too short, using {MIN_POLLING_INTERVAL:?}",
                self.polling_interval
            );
            self.polling_interval = MIN_POLLING_INTERVAL;
        }
        self.hysteresis = match self.hysteresis {
            Hysteresis::Absolute(dev) if dev < 0 => {
                log::warn!("Negative hysteresis {dev}, using its absolute value");
                Hysteresis::Absolute(dev.saturating_abs())
            }
            Hysteresis::Fraction(frac) if !(0.0..=1.0).contains(&frac) => {
                let fixed = if frac.is_finite() {
                    frac.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                log::warn!("Hysteresis fraction {frac} out of range, using {fixed}");
                Hysteresis::Fraction(fixed)
            }
            h => h,
        };
        if let Some(fan) = &self.hardware.fan {
            let fan_min = clamped(
                "minimum fan speed",
                self.fan_min_speed.unwrap_or(fan.hw_min_speed),
                fan.hw_min_speed,
                fan.hw_max_speed,
            );
            let fan_rest = clamped(
                "rest fan speed",
                self.fan_rest_speed.unwrap_or(fan_min),
                fan_min,
                fan.hw_max_speed,
            );
            self.fan_min_speed = Some(fan_min);
            self.fan_rest_speed = Some(fan_rest);
        }
        self
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "target {:.1}°C {} (band {:.1}-{:.1}°C), frequency ceiling {}MHz step {}MHz, fan step {}, interval {:?}, reset after {} intervals",
            celsius(self.cpu_target_temperature),
            self.hysteresis,
            celsius(self.hysteresis_lower_limit()),
            celsius(self.hysteresis_upper_limit()),
            self.cpu_max_freq / 1000,
            self.cpu_scaling_step / 1000,
            self.fan_scaling_step,
            self.polling_interval,
            self.hysteresis_reset_threshold
        )
    }
}

/// Clamp a value into `[low; high]`, warning if it was changed
fn clamped<T>(name: &str, val: T, low: T, high: T) -> T
where
    T: Ord + Copy + fmt::Display,
{
    let res = max(min(val, high), low);
    if res != val {
        log::warn!("Invalid {name} {val}, using {res}");
    }
    res
}

/// Settings snapshot shared between the supervisor and controllers
///
/// Readers get an immutable snapshot, a reload swaps in a whole new one.
#[derive(Clone, Debug)]
pub(crate) struct SharedSettings(Arc<RwLock<Arc<Settings>>>);

impl SharedSettings {
    /// Share validated settings
    pub(crate) fn new(settings: Settings) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(settings))))
    }

    /// Get current settings
    pub(crate) fn snapshot(&self) -> Arc<Settings> {
        let guard = self.0.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Swap in new settings
    pub(crate) fn replace(&self, settings: Settings) {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(settings);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        thread,
    };

    use super::*;

    pub(crate) fn hardware(fan: bool) -> Hardware {
        Hardware {
            coretemp_hwmon_node: 2,
            fan: fan.then_some(FanHardware {
                hwmon_node: 4,
                pwm_subnode: 1,
                hw_min_speed: 10,
                hw_max_speed: 255,
            }),
            cpuinfo_min_freq: 800_000,
            cpuinfo_max_freq: 3_500_000,
        }
    }

    pub(crate) fn settings(fan: bool) -> Settings {
        Settings::new(hardware(fan)).validate()
    }

    #[test]
    fn absolute_limits() {
        let s = settings(false);
        assert_eq!(s.hysteresis_deviation(), 6000);
        assert_eq!(s.hysteresis_lower_limit(), 49_000);
        assert_eq!(s.hysteresis_upper_limit(), 61_000);
    }

    #[test]
    fn fraction_limits() {
        let mut s = settings(false);
        s.cpu_target_temperature = 60_000;
        s.hysteresis = Hysteresis::Fraction(0.1);
        assert_eq!(s.hysteresis_deviation(), 6000);
        assert_eq!(s.hysteresis_lower_limit(), 54_000);
        assert_eq!(s.hysteresis_upper_limit(), 66_000);
    }

    #[test]
    fn limits_surround_target() {
        for hysteresis in [
            Hysteresis::Absolute(0),
            Hysteresis::Absolute(-3000),
            Hysteresis::Absolute(10_000),
            Hysteresis::Fraction(0.0),
            Hysteresis::Fraction(0.5),
            Hysteresis::Fraction(7.0),
            Hysteresis::Fraction(f64::NAN),
        ] {
            let mut s = settings(false);
            s.hysteresis = hysteresis;
            let s = s.validate();
            assert!(s.hysteresis_lower_limit() <= s.cpu_target_temperature);
            assert!(s.cpu_target_temperature <= s.hysteresis_upper_limit());
        }
    }

    #[test]
    fn validate_clamps_frequency() {
        let mut s = settings(false);
        s.cpu_max_freq = 5_000_000;
        assert_eq!(s.validate().cpu_max_freq, 3_500_000);

        let mut s = settings(false);
        s.cpu_max_freq = 100_000;
        assert_eq!(s.validate().cpu_max_freq, 800_000);

        let mut s = settings(false);
        s.cpu_max_freq = 2_400_000;
        let s = s.validate();
        assert_eq!(s.cpu_max_freq, 2_400_000);
        assert_eq!(
            s.freq_bounds(),
            Bounds {
                floor: 800_000,
                ceiling: 2_400_000,
                reset: 2_400_000
            }
        );
    }

    #[test]
    fn validate_fixes_zero_values() {
        let mut s = settings(false);
        s.cpu_scaling_step = 0;
        s.hysteresis_reset_threshold = 0;
        s.num_cores = 0;
        s.polling_interval = Duration::ZERO;
        let s = s.validate();
        assert_eq!(s.cpu_scaling_step, 1);
        assert_eq!(s.hysteresis_reset_threshold, 1);
        assert_eq!(s.num_cores, 1);
        assert_eq!(s.polling_interval, MIN_POLLING_INTERVAL);
    }

    #[test]
    fn validate_fan_speeds() {
        let s = settings(true);
        assert_eq!(s.fan_min_speed, Some(10));
        assert_eq!(s.fan_rest_speed, Some(10));
        assert_eq!(
            s.fan_bounds(),
            Some(Bounds {
                floor: 10,
                ceiling: 255,
                reset: 10
            })
        );

        let mut s = settings(true);
        s.fan_min_speed = Some(300);
        s.fan_rest_speed = Some(5);
        let s = s.validate();
        assert_eq!(s.fan_min_speed, Some(255));
        assert_eq!(s.fan_rest_speed, Some(255));

        let mut s = settings(true);
        s.fan_min_speed = Some(2);
        s.fan_rest_speed = Some(80);
        let s = s.validate();
        assert_eq!(s.fan_min_speed, Some(10));
        assert_eq!(s.fan_rest_speed, Some(80));
    }

    #[test]
    fn no_fan_bounds() {
        assert_eq!(settings(false).fan_bounds(), None);
    }

    #[test]
    fn managed_cores() {
        let mut s = settings(false);
        s.num_cores = 4;
        assert_eq!(s.managed_cores(), vec![0, 1, 2, 3]);
        assert_eq!(s.core_sensor_index(0), 2);
        assert_eq!(s.core_sensor_index(3), 5);

        s.cpu_ht_available = true;
        assert_eq!(s.managed_cores(), vec![0, 2]);
        assert_eq!(s.core_sensor_index(0), 2);
        assert_eq!(s.core_sensor_index(2), 3);
    }

    #[test]
    fn shared_snapshot() {
        let shared = SharedSettings::new(settings(false));
        let before = shared.snapshot();
        let mut new = settings(false);
        new.cpu_target_temperature = 70_000;
        shared.replace(new);
        assert_eq!(before.cpu_target_temperature, 55_000);
        assert_eq!(shared.snapshot().cpu_target_temperature, 70_000);
    }

    #[test]
    fn shared_snapshot_concurrent_replace() {
        let mut cool = settings(false);
        cool.cpu_target_temperature = 40_000;
        cool.hysteresis = Hysteresis::Absolute(2000);
        let mut hot = settings(false);
        hot.cpu_target_temperature = 80_000;
        hot.hysteresis = Hysteresis::Fraction(0.2);
        let band = |s: &Settings| {
            (
                s.hysteresis_lower_limit(),
                s.cpu_target_temperature,
                s.hysteresis_upper_limit(),
            )
        };
        let bands = [band(&cool), band(&hot)];
        assert_ne!(bands[0], bands[1]);

        let shared = SharedSettings::new(cool.clone());
        let done = AtomicBool::new(false);
        thread::scope(|scope| {
            let readers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        let mut count = 0_usize;
                        loop {
                            let snapshot = shared.snapshot();
                            let (lower, target, upper) = band(&snapshot);
                            assert!((lower..=upper).contains(&target));
                            assert!(bands.contains(&(lower, target, upper)));
                            count += 1;
                            if done.load(Ordering::Relaxed) {
                                break count;
                            }
                        }
                    })
                })
                .collect();
            for i in 0..2000 {
                shared.replace(if i % 2 == 0 { hot.clone() } else { cool.clone() });
            }
            done.store(true, Ordering::Relaxed);
            for reader in readers {
                assert!(reader.join().unwrap() > 0);
            }
        });
        assert_eq!(band(&shared.snapshot()), bands[0]);
    }

    #[test]
    fn display() {
        let s = settings(false);
        let text = s.to_string();
        assert!(text.contains("target 55.0°C"));
        assert!(text.contains("band 49.0-61.0°C"));
        assert_eq!(Hysteresis::Fraction(0.1).to_string(), "±10.0%");
    }
}
