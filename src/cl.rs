//! Command line interface

use std::{path::PathBuf, time::Duration};

use clap::Parser;

use crate::settings::{FanSpeed, Hysteresis, Khz, Settings, Temp};

/// Highest accepted target temperature, in Celsius
const MAX_TARGET_TEMP: u8 = 120;

/// Parse temperature in Celsius
fn temperature(s: &str) -> Result<u8, String> {
    clap_num::number_range(s, 0, MAX_TARGET_TEMP)
}

/// Parse frequency in MHz
fn mhz(s: &str) -> Result<Khz, String> {
    clap_num::number_range(s, 1, 100_000)
}

/// Parse raw fan PWM value
fn fan_speed(s: &str) -> Result<FanSpeed, String> {
    clap_num::number_range(s, 0, 255)
}

/// Parse logical core count
fn core_count(s: &str) -> Result<usize, String> {
    clap_num::number_range(s, 1, 4096)
}

/// Parse interval, either with a unit (`2s`, `1m 30s`) or a bare number of milliseconds (`500`)
fn interval(s: &str) -> Result<Duration, String> {
    if let Ok(ms) = s.trim().parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    humantime::parse_duration(s).map_err(|e| format!("Invalid interval {s:?}: {e}"))
}

/// Parse hysteresis, either absolute in Celsius (`6`, `2.5`) or relative to target (`10%`)
fn hysteresis(s: &str) -> Result<Hysteresis, String> {
    let (number, percent) = match s.strip_suffix('%') {
        Some(number) => (number, true),
        None => (s, false),
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|e| format!("Invalid hysteresis {s:?}: {e}"))?;
    let value = typed_floats::PositiveFinite::<f64>::new(value)
        .map_err(|e| format!("Invalid hysteresis {s:?}: {e}"))?
        .get();
    if percent {
        if value > 100.0 {
            return Err(format!("Hysteresis {s:?} above 100%"));
        }
        Ok(Hysteresis::Fraction(value / 100.0))
    } else {
        if value > f64::from(MAX_TARGET_TEMP) {
            return Err(format!("Hysteresis {s:?} too large"));
        }
        #[expect(clippy::cast_possible_truncation)]
        let deviation = (value * 1000.0).round() as Temp;
        Ok(Hysteresis::Absolute(deviation))
    }
}

/// Settings that override the ones from the configuration file
#[derive(clap::Args, Debug)]
pub(crate) struct Overrides {
    /// Interval between two temperature checks, ie. '500ms', '2s', or milliseconds if no unit
    /// [default: 500ms].
    #[arg(short, long, value_parser = interval)]
    pub interval: Option<Duration>,

    /// Maximum frequency ceiling in MHz [default: hardware maximum].
    #[arg(short = 'f', long, value_parser = mhz)]
    pub max_freq: Option<Khz>,

    /// Frequency adjustment step in MHz [default: 100].
    #[arg(short = 's', long, value_parser = mhz)]
    pub cpu_step: Option<Khz>,

    /// Fan speed adjustment step [default: 2].
    #[arg(short = 'a', long, value_parser = fan_speed)]
    pub fan_step: Option<FanSpeed>,

    /// Target temperature in Celsius [default: 55].
    #[arg(short, long, value_parser = temperature)]
    pub temp: Option<u8>,

    /// Hysteresis around target temperature, in Celsius (ie. '6') or as a percentage of the
    /// target (ie. '10%') [default: 6].
    #[arg(short = 'r', long, value_parser = hysteresis)]
    pub hysteresis: Option<Hysteresis>,

    /// Number of consecutive intervals above target, but in hysteresis range, after which
    /// frequency and fan speed are reset [default: 100].
    #[arg(short = 'u', long)]
    pub reset_threshold: Option<u32>,

    /// Minimum fan speed [default: hardware minimum].
    #[arg(short = 'e', long, value_parser = fan_speed)]
    pub min_fan_speed: Option<FanSpeed>,

    /// Fan speed set on reset [default: minimum fan speed].
    #[arg(long, value_parser = fan_speed)]
    pub rest_fan_speed: Option<FanSpeed>,

    /// Number of logical cores to manage [default: 1].
    #[arg(short, long, value_parser = core_count)]
    pub cores: Option<usize>,

    /// Odd logical cores are hyperthread siblings, do not manage them.
    #[arg(long)]
    pub ht: bool,
}

impl Overrides {
    /// Apply overrides on top of settings
    pub(crate) fn apply(&self, settings: &mut Settings) {
        if let Some(interval) = self.interval {
            settings.polling_interval = interval;
        }
        if let Some(max_freq) = self.max_freq {
            settings.cpu_max_freq = max_freq.saturating_mul(1000);
        }
        if let Some(cpu_step) = self.cpu_step {
            settings.cpu_scaling_step = cpu_step.saturating_mul(1000);
        }
        if let Some(fan_step) = self.fan_step {
            settings.fan_scaling_step = fan_step;
        }
        if let Some(temp) = self.temp {
            settings.cpu_target_temperature = Temp::from(temp) * 1000;
        }
        if let Some(hysteresis) = self.hysteresis {
            settings.hysteresis = hysteresis;
        }
        if let Some(reset_threshold) = self.reset_threshold {
            settings.hysteresis_reset_threshold = reset_threshold;
        }
        if let Some(min_fan_speed) = self.min_fan_speed {
            settings.fan_min_speed = Some(min_fan_speed);
        }
        if let Some(rest_fan_speed) = self.rest_fan_speed {
            settings.fan_rest_speed = Some(rest_fan_speed);
        }
        if let Some(cores) = self.cores {
            settings.num_cores = cores;
        }
        if self.ht {
            settings.cpu_ht_available = true;
        }
    }
}

/// Cputhrottle command line arguments
#[derive(Parser, Debug)]
#[command(version, about)]
pub(crate) struct Args {
    /// Level of logging output (TRACE, DEBUG, INFO, WARN, ERROR).
    #[arg(short, long, default_value_t = log::Level::Info)]
    pub verbosity: log::Level,

    /// Append log output to this file instead of standard error.
    #[arg(short, long)]
    pub log: Option<PathBuf>,

    /// Configuration file to load settings from, and to reload them from on SIGHUP.
    #[arg(short = 'o', long)]
    pub config: Option<PathBuf>,

    /// Write settings to the configuration file and exit.
    #[arg(short, long, requires = "config")]
    pub write_config: bool,

    /// Write current settings to the configuration file on exit.
    #[arg(long, requires = "config")]
    pub save_on_exit: bool,

    /// Scaling governor to set on managed cores at startup (ie. 'powersave').
    #[arg(long)]
    pub governor: Option<String>,

    /// Settings overrides
    #[command(flatten)]
    pub overrides: Overrides,

    /// Generate man pages into this directory and exit.
    #[cfg(feature = "generate-extras")]
    #[arg(long, hide = true, value_name = "DIR")]
    pub generate_man_pages: Option<PathBuf>,

    /// Generate shell completion for this shell on standard output and exit.
    #[cfg(feature = "generate-extras")]
    #[arg(long, hide = true, value_name = "SHELL")]
    pub generate_shell_completions: Option<clap_complete::Shell>,

    /// Generate all shell completions into this directory and exit.
    #[cfg(feature = "generate-extras")]
    #[arg(long, hide = true, value_name = "DIR")]
    pub generate_shell_completions_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;
    use float_cmp::approx_eq;

    use super::*;
    use crate::settings::tests::settings;

    #[test]
    fn command() {
        Args::command().debug_assert();
    }

    #[test]
    fn parse_hysteresis() {
        assert_eq!(hysteresis("6"), Ok(Hysteresis::Absolute(6000)));
        assert_eq!(hysteresis("2.5"), Ok(Hysteresis::Absolute(2500)));
        assert_eq!(hysteresis("0"), Ok(Hysteresis::Absolute(0)));
        assert!(matches!(
            hysteresis("10%"),
            Ok(Hysteresis::Fraction(f)) if approx_eq!(f64, f, 0.1)
        ));
        assert!(matches!(
            hysteresis(" 100 %"),
            Ok(Hysteresis::Fraction(f)) if approx_eq!(f64, f, 1.0)
        ));

        assert!(hysteresis("").is_err());
        assert!(hysteresis("%").is_err());
        assert!(hysteresis("-3").is_err());
        assert!(hysteresis("NaN").is_err());
        assert!(hysteresis("inf").is_err());
        assert!(hysteresis("101%").is_err());
        assert!(hysteresis("500").is_err());
        assert!(hysteresis("6C").is_err());
    }

    #[test]
    fn parse_interval() {
        assert_eq!(interval("500"), Ok(Duration::from_millis(500)));
        assert_eq!(interval("0"), Ok(Duration::ZERO));
        assert_eq!(interval("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(interval("2s"), Ok(Duration::from_secs(2)));
        assert_eq!(interval("1m 30s"), Ok(Duration::from_secs(90)));

        assert!(interval("").is_err());
        assert!(interval("-5").is_err());
        assert!(interval("fast").is_err());
        assert!(interval("2 parsecs").is_err());
    }

    #[test]
    fn parse_bare_interval() {
        let args = Args::try_parse_from(["cputhrottle", "-i", "500"]).unwrap();
        let mut s = settings(true);
        s.polling_interval = Duration::from_secs(3);
        args.overrides.apply(&mut s);
        assert_eq!(s.polling_interval, Duration::from_millis(500));
    }

    #[test]
    fn parse_defaults() {
        let args = Args::try_parse_from(["cputhrottle"]).unwrap();
        assert_eq!(args.verbosity, log::Level::Info);
        assert!(args.config.is_none());
        assert!(!args.write_config);

        let mut s = settings(true);
        let before = s.clone();
        args.overrides.apply(&mut s);
        assert_eq!(s, before);
    }

    #[test]
    fn parse_overrides() {
        let args = Args::try_parse_from([
            "cputhrottle",
            "-i",
            "250ms",
            "-f",
            "2800",
            "-s",
            "50",
            "-a",
            "4",
            "-t",
            "65",
            "-r",
            "5%",
            "-u",
            "20",
            "-e",
            "40",
            "--rest-fan-speed",
            "60",
            "-c",
            "8",
            "--ht",
        ])
        .unwrap();
        let mut s = settings(true);
        args.overrides.apply(&mut s);

        assert_eq!(s.polling_interval, Duration::from_millis(250));
        assert_eq!(s.cpu_max_freq, 2_800_000);
        assert_eq!(s.cpu_scaling_step, 50_000);
        assert_eq!(s.fan_scaling_step, 4);
        assert_eq!(s.cpu_target_temperature, 65_000);
        assert!(matches!(s.hysteresis, Hysteresis::Fraction(f) if approx_eq!(f64, f, 0.05)));
        assert_eq!(s.hysteresis_reset_threshold, 20);
        assert_eq!(s.fan_min_speed, Some(40));
        assert_eq!(s.fan_rest_speed, Some(60));
        assert_eq!(s.num_cores, 8);
        assert!(s.cpu_ht_available);
    }

    #[test]
    fn parse_invalid() {
        for argv in [
            vec!["cputhrottle", "-e", "256"],
            vec!["cputhrottle", "-t", "130"],
            vec!["cputhrottle", "-c", "0"],
            vec!["cputhrottle", "-f", "0"],
            vec!["cputhrottle", "-i", "fast"],
            vec!["cputhrottle", "-w"],
            vec!["cputhrottle", "--save-on-exit"],
        ] {
            assert!(Args::try_parse_from(argv.iter().copied()).is_err(), "{argv:?}");
        }
    }
}
