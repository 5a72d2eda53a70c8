//! Where rendered frames go.
//!
//! The acquisition loop pushes one RGB frame per iteration with
//! [`DisplaySurface::update`] and must never wait for it to be shown.
//! At teardown it calls [`DisplaySurface::close`] to end the live stream and
//! [`DisplaySurface::present`] to hand over the final figure.

#[cfg(feature = "gui")]
pub mod window;

use crate::error::AppResult;
use image::RgbImage;
use tracing::{debug, info};

/// Sink for live frames and the final figure.
pub trait DisplaySurface: Send {
    /// Replace the live frame.
    fn update(&mut self, frame: &RgbImage) -> AppResult<()>;

    /// End the live stream. Later `update` calls are ignored.
    fn close(&mut self) -> AppResult<()>;

    /// Show the final figure to the user.
    fn present(&mut self, title: &str, figure: &RgbImage) -> AppResult<()>;
}

impl<S: DisplaySurface + ?Sized> DisplaySurface for Box<S> {
    fn update(&mut self, frame: &RgbImage) -> AppResult<()> {
        (**self).update(frame)
    }

    fn close(&mut self) -> AppResult<()> {
        (**self).close()
    }

    fn present(&mut self, title: &str, figure: &RgbImage) -> AppResult<()> {
        (**self).present(title, figure)
    }
}

/// Headless surface: counts frames and logs them.
#[derive(Debug, Default)]
pub struct NullSurface {
    frames: usize,
    closed: bool,
}

impl NullSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> usize {
        self.frames
    }
}

impl DisplaySurface for NullSurface {
    fn update(&mut self, frame: &RgbImage) -> AppResult<()> {
        if !self.closed {
            self.frames += 1;
            debug!(
                frame = self.frames,
                width = frame.width(),
                height = frame.height(),
                "Live frame rendered (headless)"
            );
        }
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        self.closed = true;
        Ok(())
    }

    fn present(&mut self, title: &str, figure: &RgbImage) -> AppResult<()> {
        info!(
            title = %title.replace('\n', " "),
            width = figure.width(),
            height = figure.height(),
            "Final figure ready (headless, not displayed)"
        );
        Ok(())
    }
}
