//! Keep CPU temperature in a target band by throttling frequency and driving the fan

use anyhow::Context as _;
use clap::Parser as _;
use signal_hook::{
    consts::{SIGHUP, SIGINT, SIGTERM},
    iterator::Signals,
};

mod cl;
mod config;
mod controller;
mod device;
mod exit;
#[cfg(feature = "generate-extras")]
mod extras;
mod logging;
mod pwm;
mod settings;
mod supervisor;
mod sysfs;

use crate::{device::SysfsLayout, supervisor::Supervisor};

fn main() -> anyhow::Result<()> {
    // Parse cl args
    let args = cl::Args::parse();

    #[cfg(feature = "generate-extras")]
    {
        if let Some(dir) = args.generate_man_pages.as_deref() {
            return extras::generate_man_pages(dir);
        }
        if args.generate_shell_completions.is_some()
            || args.generate_shell_completions_dir.is_some()
        {
            return extras::generate_shell_completions(
                args.generate_shell_completions,
                args.generate_shell_completions_dir.as_deref(),
            );
        }
    }

    // Init logger
    logging::init(args.verbosity, args.log.as_deref())?;

    // Probe hardware
    let layout = SysfsLayout::default();
    let hardware = device::discover(&layout).context("Hardware discovery failed")?;
    let settings =
        supervisor::build_settings(&hardware, args.config.as_deref(), &args.overrides);

    if args.write_config {
        let path = args
            .config
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No configuration file path"))?;
        config::write(path, &settings)
            .with_context(|| format!("Failed to write settings to {path:?}"))?;
        log::info!("Settings written to {path:?}");
        return Ok(());
    }

    if let Some(governor) = args.governor.as_deref() {
        for core in settings.managed_cores() {
            device::CpuFreq::new(&layout, core).set_governor(governor);
        }
    }

    // Signal handling
    let mut signals =
        Signals::new([SIGINT, SIGTERM, SIGHUP]).context("Failed to setup signal handlers")?;

    Supervisor::new(
        layout,
        settings,
        args.config,
        args.overrides,
        args.save_on_exit,
    )
    .run(signals.forever())
}
