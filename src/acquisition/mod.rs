//! The voltage-toggle acquisition run.
//!
//! A run has three phases:
//!
//! 1. **Initialize**: identify and configure the source-measure unit, open
//!    the results file if output is enabled, take the seed measurement.
//! 2. **Loop**: while the last elapsed time is within the configured
//!    duration, source the toggle voltage, measure, return to 0 V, record,
//!    then render and push a live frame.
//! 3. **Teardown**: close the live view, render the final figure (save it if
//!    output is enabled), present it, and switch the output off.
//!
//! Teardown runs on every exit path once the instrument is open: normal
//! completion, cancellation and errors alike. Cancellation is only looked at
//! between iterations.

use crate::adapters::InstrumentTransport;
use crate::config::Settings;
use crate::data::ResultsWriter;
use crate::display::DisplaySurface;
use crate::error::{AppResult, DaqError};
use crate::instrument::Keithley2410;
use crate::measurement::{Sample, Series};
use crate::metadata::RunMetadata;
use crate::plot::{save_png, FigureSpec, Plotter};
use chrono::Utc;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a finished run produced.
#[derive(Debug)]
pub struct RunReport {
    pub series: Series,
    /// Loop iterations completed (the seed sample is not one)
    pub iterations: usize,
    pub cancelled: bool,
    pub instrument_idn: Option<String>,
    pub data_path: Option<PathBuf>,
    pub figure_path: Option<PathBuf>,
    pub metadata_path: Option<PathBuf>,
}

/// Run a full acquisition on an already opened transport.
///
/// Returns the loop's error, if any, after teardown has completed. If only
/// teardown steps failed, they are returned together as
/// [`DaqError::ShutdownFailed`].
pub async fn run<T, S>(
    settings: &Settings,
    transport: T,
    surface: S,
    cancel: CancellationToken,
) -> AppResult<RunReport>
where
    T: InstrumentTransport,
    S: DisplaySurface,
{
    let mut acquisition = Acquisition::new(settings, transport, surface, cancel);
    let outcome = acquisition.acquire().await;
    acquisition.teardown(outcome).await
}

/// Cancel `cancel` on Ctrl-C. The task ends when the token is cancelled by
/// anyone else.
pub fn listen_for_interrupt(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Interrupt received, stopping after the current iteration");
                    cancel.cancel();
                }
                Err(e) => warn!(error = %e, "Unable to listen for Ctrl-C"),
            },
            _ = cancel.cancelled() => {}
        }
    })
}

/// State of one run. Exposed so the two per-iteration steps can be driven
/// separately.
pub struct Acquisition<'a, T: InstrumentTransport, S: DisplaySurface> {
    settings: &'a Settings,
    smu: Keithley2410<T>,
    surface: S,
    plotter: Plotter,
    live_spec: FigureSpec,
    writer: Option<ResultsWriter>,
    series: Series,
    loop_start: Instant,
    cancel: CancellationToken,
    cancelled: bool,
    iterations: usize,
    metadata: RunMetadata,
}

impl<'a, T: InstrumentTransport, S: DisplaySurface> Acquisition<'a, T, S> {
    pub fn new(settings: &'a Settings, transport: T, surface: S, cancel: CancellationToken) -> Self {
        Self {
            settings,
            smu: Keithley2410::new(transport),
            surface,
            plotter: Plotter::from_settings(&settings.plot),
            live_spec: FigureSpec::live(&settings.plot),
            writer: None,
            series: Series::new(),
            loop_start: Instant::now(),
            cancel,
            cancelled: false,
            iterations: 0,
            metadata: RunMetadata::new(settings, Utc::now()),
        }
    }

    pub fn series(&self) -> &Series {
        &self.series
    }

    /// Initialize, seed and loop until the duration is exceeded, the run is
    /// cancelled, or a step fails.
    pub async fn acquire(&mut self) -> AppResult<()> {
        self.initialize().await?;
        self.seed().await?;

        while self.should_continue() {
            if self.cancel.is_cancelled() {
                info!("Stopped by user");
                self.cancelled = true;
                break;
            }
            self.sample_and_record().await?;
            self.render_and_present()?;
        }
        Ok(())
    }

    async fn initialize(&mut self) -> AppResult<()> {
        self.smu.initialize(&self.settings.instrument).await?;
        self.metadata.instrument_idn = self.smu.identity().map(str::to_string);

        if self.settings.output.enabled {
            let path = self.settings.output.data_path();
            self.writer = Some(ResultsWriter::create(&path)?);
        }
        Ok(())
    }

    /// Sample 0, taken at elapsed time zero. Not written to the results file.
    async fn seed(&mut self) -> AppResult<()> {
        self.loop_start = Instant::now();
        let current = self.smu.measure_current().await?;
        self.series = Series::seeded(current);
        info!(current, "Seed measurement taken");
        Ok(())
    }

    /// Keep looping while the last elapsed time is within the duration.
    /// Equality still allows one more iteration.
    pub fn should_continue(&self) -> bool {
        self.series
            .last_elapsed()
            .is_some_and(|t| t <= self.settings.acquisition.duration_secs)
    }

    /// One toggle cycle: source, settle, measure, zero, settle, record.
    pub async fn sample_and_record(&mut self) -> AppResult<Sample> {
        let acquisition = &self.settings.acquisition;

        self.smu.set_voltage(acquisition.toggle_voltage).await?;
        sleep(acquisition.settle()).await;
        let current = self.smu.measure_current().await?;

        self.smu.set_voltage(0.0).await?;
        sleep(acquisition.settle()).await;

        let sample = Sample {
            current,
            elapsed: self.loop_start.elapsed().as_secs_f64(),
        };
        self.record(sample)?;
        debug!(
            iteration = self.iterations,
            current = sample.current,
            elapsed = sample.elapsed,
            "Sample recorded"
        );
        Ok(sample)
    }

    /// Store a sample in the series, then in the results file. A sample the
    /// series rejects is never written.
    fn record(&mut self, sample: Sample) -> AppResult<()> {
        if !self.series.push(sample) {
            return Err(DaqError::OutOfOrderSample {
                last: self.series.last_elapsed().unwrap_or(0.0),
                elapsed: sample.elapsed,
            });
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.append(&sample)?;
        }
        self.iterations += 1;
        Ok(())
    }

    /// Render the whole series and hand the frame to the display.
    pub fn render_and_present(&mut self) -> AppResult<()> {
        let frame = self.plotter.render(&self.series, &self.live_spec);
        self.surface.update(&frame)
    }

    /// Finish the run. `outcome` is what [`Acquisition::acquire`] returned.
    pub async fn teardown(mut self, outcome: AppResult<()>) -> AppResult<RunReport> {
        let mut errors = Vec::new();

        if let Err(e) = self.surface.close() {
            errors.push(e);
        }

        let output = &self.settings.output;
        let title = output.figure_title();
        let figure = self.plotter.render(
            &self.series,
            &FigureSpec::final_figure(&self.settings.plot, &title),
        );

        let mut figure_path = None;
        if output.enabled {
            let path = output.figure_path();
            match save_figure(&figure, &path) {
                Ok(()) => {
                    info!(path = %path.display(), "Final figure saved");
                    figure_path = Some(path);
                }
                Err(e) => errors.push(e),
            }
        }

        if let Err(e) = self.surface.present(&title, &figure) {
            errors.push(e);
        }

        // Always attempted, whatever happened above
        match self.smu.output_off().await {
            Ok(()) => info!("Turned off power"),
            Err(e) => {
                error!(error = %e, "Failed to switch the output off");
                errors.push(e);
            }
        }

        let mut data_path = None;
        if let Some(writer) = self.writer.as_mut() {
            match writer.finish() {
                Ok(()) => data_path = Some(writer.path().to_path_buf()),
                Err(e) => errors.push(e),
            }
        }

        let mut metadata_path = None;
        if output.enabled {
            self.metadata.finished_at = Some(Utc::now());
            self.metadata.sample_count = self.series.len();
            self.metadata.cancelled = self.cancelled;
            self.metadata.error = outcome.as_ref().err().map(ToString::to_string);
            let path = output.metadata_path();
            match self.metadata.write_to(&path) {
                Ok(()) => metadata_path = Some(path),
                Err(e) => errors.push(e),
            }
        }

        info!(
            samples = self.series.len(),
            iterations = self.iterations,
            cancelled = self.cancelled,
            "Run finished"
        );

        let report = RunReport {
            series: self.series,
            iterations: self.iterations,
            cancelled: self.cancelled,
            instrument_idn: self.metadata.instrument_idn,
            data_path,
            figure_path,
            metadata_path,
        };

        match outcome {
            Err(e) => {
                for teardown_error in &errors {
                    warn!(error = %teardown_error, "Teardown step failed");
                }
                error!(error = %e, "Acquisition ended with an error");
                Err(e)
            }
            Ok(()) if errors.is_empty() => Ok(report),
            Ok(()) => Err(DaqError::ShutdownFailed(errors)),
        }
    }
}

fn save_figure(figure: &RgbImage, path: &Path) -> AppResult<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    save_png(figure, path)
}
