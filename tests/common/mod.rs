//! Shared helpers for the acquisition integration tests.

#![allow(dead_code)]

use image::RgbImage;
use sourcemeter_daq::config::Settings;
use sourcemeter_daq::display::DisplaySurface;
use sourcemeter_daq::error::AppResult;
use std::sync::{Arc, Mutex};

/// Everything a [`RecordingSurface`] was asked to show.
#[derive(Debug, Default)]
pub struct Recorded {
    pub live_frames: usize,
    pub updates_after_close: usize,
    pub closed: bool,
    /// (title, width, height) of each presented figure
    pub presented: Vec<(String, u32, u32)>,
}

/// Display surface that records calls into shared state the test keeps.
#[derive(Clone, Default)]
pub struct RecordingSurface(Arc<Mutex<Recorded>>);

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot<R>(&self, f: impl FnOnce(&Recorded) -> R) -> R {
        f(&self.0.lock().unwrap())
    }
}

impl DisplaySurface for RecordingSurface {
    fn update(&mut self, _frame: &RgbImage) -> AppResult<()> {
        let mut recorded = self.0.lock().unwrap();
        if recorded.closed {
            recorded.updates_after_close += 1;
        } else {
            recorded.live_frames += 1;
        }
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        self.0.lock().unwrap().closed = true;
        Ok(())
    }

    fn present(&mut self, title: &str, figure: &RgbImage) -> AppResult<()> {
        self.0
            .lock()
            .unwrap()
            .presented
            .push((title.to_string(), figure.width(), figure.height()));
        Ok(())
    }
}

/// Default settings without the instrument settle delays.
pub fn test_settings(duration_secs: f64) -> Settings {
    let mut settings = Settings::default();
    settings.instrument.identify_settle_secs = 0.0;
    settings.instrument.configure_settle_secs = 0.0;
    settings.acquisition.duration_secs = duration_secs;
    settings
}
