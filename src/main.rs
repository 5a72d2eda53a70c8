//! sourcemeter_daq command line entry point.
//!
//! With the `gui` feature and without `--headless`, the live window owns the
//! main thread and the acquisition runs on a worker thread with its own
//! Tokio runtime. Headless runs stay on the main thread.

use anyhow::{Context, Result};
use clap::Parser;
use sourcemeter_daq::{
    acquisition::{self, RunReport},
    adapters::{serial_adapter, InstrumentTransport, MockAdapter, SerialAdapter},
    config::Settings,
    display::{DisplaySurface, NullSurface},
};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sourcemeter_daq", version, about)]
struct Cli {
    /// Settings file (TOML). Defaults to config/sourcemeter.toml when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the simulated source-measure unit instead of the serial port
    #[arg(long)]
    mock: bool,

    /// Do not open a window; frames are rendered but not shown
    #[arg(long)]
    headless: bool,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    init_tracing(&settings.application.log_level);

    if cli.list_ports {
        for port in serial_adapter::list_ports()? {
            println!("{port}");
        }
        return Ok(());
    }

    let transport = open_transport(&settings, cli.mock)?;
    info!(resource = %transport.resource(), "Instrument link open");

    let report = if cfg!(feature = "gui") && !cli.headless {
        run_windowed(settings, transport)?
    } else {
        run_headless(&settings, transport)?
    };

    info!(
        samples = report.series.len(),
        cancelled = report.cancelled,
        "Acquisition complete"
    );
    if let Some(path) = &report.data_path {
        info!(path = %path.display(), "Results written");
    }
    Ok(())
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_transport(settings: &Settings, mock: bool) -> Result<Box<dyn InstrumentTransport>> {
    if mock {
        info!("Using the simulated source-measure unit");
        return Ok(Box::new(MockAdapter::new()));
    }

    let adapter = SerialAdapter::open_with(&settings.instrument).with_context(|| {
        format!(
            "Failed to open instrument resource '{}'",
            settings.instrument.resource
        )
    })?;
    Ok(Box::new(adapter))
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")
}

async fn acquire(
    settings: &Settings,
    transport: Box<dyn InstrumentTransport>,
    surface: Box<dyn DisplaySurface>,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let interrupt = acquisition::listen_for_interrupt(cancel.clone());
    let result = acquisition::run(settings, transport, surface, cancel.clone()).await;

    // Ends the interrupt listener
    cancel.cancel();
    let _ = interrupt.await;

    result.context("Acquisition failed")
}

fn run_headless(settings: &Settings, transport: Box<dyn InstrumentTransport>) -> Result<RunReport> {
    let runtime = build_runtime()?;
    let cancel = CancellationToken::new();
    runtime.block_on(acquire(
        settings,
        transport,
        Box::new(NullSurface::new()),
        cancel,
    ))
}

#[cfg(feature = "gui")]
fn run_windowed(settings: Settings, transport: Box<dyn InstrumentTransport>) -> Result<RunReport> {
    use sourcemeter_daq::display::window;

    let cancel = CancellationToken::new();
    let (surface, viewer) = window::window(
        "Keithley 2410 current acquisition",
        settings.plot.final_width.max(settings.plot.live_width),
        settings.plot.final_height.max(settings.plot.live_height),
        cancel.clone(),
    );

    let worker_cancel = cancel.clone();
    let worker = std::thread::Builder::new()
        .name("acquisition".to_string())
        .spawn(move || -> Result<RunReport> {
            let runtime = build_runtime()?;
            runtime.block_on(acquire(
                &settings,
                transport,
                Box::new(surface),
                worker_cancel,
            ))
        })
        .context("Failed to spawn the acquisition thread")?;

    finish_viewer(viewer.run(), &cancel);
    worker
        .join()
        .map_err(|_| anyhow::anyhow!("Acquisition thread panicked"))?
}

/// A window the user closed ends the run at the next iteration boundary. A
/// window that could not be shown does not: the run carries on headless and
/// Ctrl-C still stops it.
#[cfg(feature = "gui")]
fn finish_viewer(result: sourcemeter_daq::error::AppResult<()>, cancel: &CancellationToken) {
    match result {
        Ok(()) => cancel.cancel(),
        Err(e) => tracing::warn!(error = %e, "Live window unavailable, continuing without it"),
    }
}

#[cfg(not(feature = "gui"))]
fn run_windowed(settings: Settings, transport: Box<dyn InstrumentTransport>) -> Result<RunReport> {
    run_headless(&settings, transport)
}
