//! Controller threads lifecycle

use std::{
    ffi::c_int,
    path::{Path, PathBuf},
    sync::mpsc,
    thread,
};

use anyhow::Context as _;
use itertools::Itertools as _;
use nix::sys::signal::Signal;

use crate::{
    cl::Overrides,
    config,
    controller::{CoreController, FanController},
    device::{CpuFreq, SysfsLayout, TempSensor},
    exit::ExitHook,
    pwm::Pwm,
    settings::{Hardware, Settings, SharedSettings},
};

/// Daemon lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub(crate) enum Lifecycle {
    /// Spawning controllers
    Starting,
    /// Controllers running
    Running,
    /// Stopping controllers and restoring hardware defaults
    Resetting,
    /// Done
    Exited,
}

/// Build settings from defaults, configuration file and overrides, in that order
pub(crate) fn build_settings(
    hardware: &Hardware,
    config_path: Option<&Path>,
    overrides: &Overrides,
) -> Settings {
    let mut settings = config_path
        .and_then(|path| {
            config::read(path, hardware)
                .inspect(|_| log::info!("Loaded settings from {path:?}"))
                .inspect_err(|err| {
                    log::warn!("Failed to load settings from {path:?}, using defaults: {err}");
                })
                .ok()
        })
        .unwrap_or_else(|| Settings::new(hardware.clone()));
    overrides.apply(&mut settings);
    settings.validate()
}

/// Spawns controllers, and handles signals until exit
pub(crate) struct Supervisor {
    /// Sysfs locations
    layout: SysfsLayout,
    /// Configuration file
    config_path: Option<PathBuf>,
    /// Command line overrides, reapplied on reload
    overrides: Overrides,
    /// Persist settings on exit
    save_on_exit: bool,
    /// Settings shared with controllers
    settings: SharedSettings,
    /// Current state
    lifecycle: Lifecycle,
}

impl Supervisor {
    /// Setup supervisor with initial settings
    pub(crate) fn new(
        layout: SysfsLayout,
        settings: Settings,
        config_path: Option<PathBuf>,
        overrides: Overrides,
        save_on_exit: bool,
    ) -> Self {
        Self {
            layout,
            config_path,
            overrides,
            save_on_exit,
            settings: SharedSettings::new(settings),
            lifecycle: Lifecycle::Starting,
        }
    }

    /// Switch to a new state
    fn transition(&mut self, lifecycle: Lifecycle) {
        log::debug!("{} -> {lifecycle}", self.lifecycle);
        self.lifecycle = lifecycle;
    }

    /// Reload settings from the configuration file
    ///
    /// Current settings are kept if the file can not be loaded.
    /// Core count and hyperthread changes only apply on next start.
    pub(crate) fn reload(&self) {
        let Some(path) = self.config_path.as_deref() else {
            log::warn!("No configuration file to reload settings from");
            return;
        };
        let current = self.settings.snapshot();
        let mut settings = match config::read(path, &current.hardware) {
            Ok(settings) => settings,
            Err(err) => {
                log::error!("Failed to reload settings from {path:?}, keeping current ones: {err}");
                return;
            }
        };
        self.overrides.apply(&mut settings);
        let settings = settings.validate();
        if settings.managed_cores() != current.managed_cores() {
            log::warn!("Managed cores changed, restart to apply");
        }
        log::info!("Reloaded settings: {settings}");
        self.settings.replace(settings);
    }

    /// Spawn controllers, handle signals, and restore hardware defaults once asked to exit
    pub(crate) fn run<I>(mut self, signals: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = c_int>,
    {
        let settings = self.settings.snapshot();
        log::info!("Settings: {settings}");
        let cores = settings.managed_cores();
        log::info!("Managing cores {}", cores.iter().join(", "));
        let pwm = settings
            .hardware
            .fan
            .as_ref()
            .map(|fan| Pwm::new(&self.layout, fan));
        if pwm.is_none() {
            log::info!("No fan control available, only throttling frequency");
        }

        let exit_hook = ExitHook::new(
            pwm.clone(),
            cores
                .iter()
                .map(|core| CpuFreq::new(&self.layout, *core))
                .collect(),
            settings.hardware.cpuinfo_max_freq,
        );

        let mut exit_txs = Vec::with_capacity(cores.len() + 1);
        let mut handles = Vec::with_capacity(cores.len() + 1);
        for core in &cores {
            let controller = CoreController::new(
                TempSensor::core(
                    &self.layout,
                    &settings.hardware,
                    *core,
                    settings.core_sensor_index(*core),
                ),
                CpuFreq::new(&self.layout, *core),
                pwm.clone(),
            );
            let (exit_tx, exit_rx) = mpsc::channel();
            let shared = self.settings.clone();
            let handle = thread::Builder::new()
                .name(format!("cpu{core}"))
                .spawn(move || controller.run(&shared, &exit_rx))
                .with_context(|| format!("Failed to spawn controller thread for core {core}"))?;
            exit_txs.push(exit_tx);
            handles.push(handle);
        }
        if let Some(pwm) = pwm {
            let controller =
                FanController::new(TempSensor::package(&self.layout, &settings.hardware), pwm);
            let (exit_tx, exit_rx) = mpsc::channel();
            let shared = self.settings.clone();
            let handle = thread::Builder::new()
                .name("fan".to_owned())
                .spawn(move || controller.run(&shared, &exit_rx))
                .context("Failed to spawn fan controller thread")?;
            exit_txs.push(exit_tx);
            handles.push(handle);
        }
        self.transition(Lifecycle::Running);

        for signal in signals {
            match Signal::try_from(signal) {
                Ok(Signal::SIGHUP) => {
                    log::info!("Received SIGHUP, reloading settings");
                    self.reload();
                }
                Ok(sig @ (Signal::SIGINT | Signal::SIGTERM)) => {
                    log::info!("Received {sig}, exiting");
                    break;
                }
                _ => log::warn!("Ignoring unexpected signal {signal}"),
            }
        }

        self.transition(Lifecycle::Resetting);
        drop(exit_txs);
        for handle in handles {
            if handle.join().is_err() {
                log::error!("A controller thread panicked");
            }
        }
        drop(exit_hook);

        if let Some(path) = self.config_path.as_deref().filter(|_| self.save_on_exit) {
            match config::write(path, &self.settings.snapshot()) {
                Ok(()) => log::info!("Settings saved to {path:?}"),
                Err(err) => log::error!("Failed to save settings to {path:?}: {err}"),
            }
        }
        self.transition(Lifecycle::Exited);
        Ok(())
    }
}
