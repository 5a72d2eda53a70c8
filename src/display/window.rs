//! Native egui/eframe window for live frames and the final figure.
//!
//! [`window`] returns two halves. The [`WindowSurface`] goes to the
//! acquisition thread and publishes frames into a `watch` channel, so only
//! the newest frame is ever kept and publishing never blocks. The [`Viewer`]
//! runs the eframe event loop on the main thread and polls the channel.
//!
//! Closing the window or pressing "Stop" cancels the run.

use super::DisplaySurface;
use crate::error::{AppResult, DaqError};
use eframe::egui;
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Clone, Default)]
enum ViewState {
    #[default]
    Waiting,
    Live(Arc<RgbImage>),
    Final {
        title: String,
        figure: Arc<RgbImage>,
    },
}

/// Acquisition-side half of the window.
pub struct WindowSurface {
    tx: watch::Sender<ViewState>,
    closed: bool,
}

/// UI-side half of the window; call [`Viewer::run`] on the main thread.
pub struct Viewer {
    rx: watch::Receiver<ViewState>,
    cancel: CancellationToken,
    title: String,
    size: [f32; 2],
}

/// Open a window surface titled `title`, sized for `width` x `height` frames.
pub fn window(
    title: &str,
    width: u32,
    height: u32,
    cancel: CancellationToken,
) -> (WindowSurface, Viewer) {
    let (tx, rx) = watch::channel(ViewState::Waiting);
    (
        WindowSurface { tx, closed: false },
        Viewer {
            rx,
            cancel,
            title: title.to_string(),
            // Room for the status panel above the image
            size: [width as f32 + 16.0, height as f32 + 90.0],
        },
    )
}

impl DisplaySurface for WindowSurface {
    fn update(&mut self, frame: &RgbImage) -> AppResult<()> {
        if self.closed {
            return Ok(());
        }
        // send_replace succeeds even after the window is gone
        self.tx.send_replace(ViewState::Live(Arc::new(frame.clone())));
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        self.closed = true;
        debug!("Live view closed");
        Ok(())
    }

    fn present(&mut self, title: &str, figure: &RgbImage) -> AppResult<()> {
        if self.tx.is_closed() {
            info!("Window already closed, final figure not shown");
            return Ok(());
        }
        self.tx.send_replace(ViewState::Final {
            title: title.to_string(),
            figure: Arc::new(figure.clone()),
        });
        Ok(())
    }
}

impl Viewer {
    /// Run the event loop until the user closes the window.
    pub fn run(self) -> AppResult<()> {
        let options = eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size(self.size)
                .with_min_inner_size([320.0, 240.0])
                .with_title(&self.title),
            ..Default::default()
        };

        let app_name = self.title.clone();
        eframe::run_native(
            &app_name,
            options,
            Box::new(|_cc| Ok(Box::new(ViewerApp::new(self)))),
        )
        .map_err(|e| DaqError::Display(e.to_string()))
    }
}

struct ViewerApp {
    rx: watch::Receiver<ViewState>,
    cancel: CancellationToken,
    texture: Option<egui::TextureHandle>,
    heading: Option<String>,
    status: String,
    finished: bool,
    sender_gone: bool,
}

impl ViewerApp {
    fn new(viewer: Viewer) -> Self {
        Self {
            rx: viewer.rx,
            cancel: viewer.cancel,
            texture: None,
            heading: None,
            status: "Waiting for the first measurement…".to_string(),
            finished: false,
            sender_gone: false,
        }
    }

    fn poll(&mut self, ctx: &egui::Context) {
        let changed = match self.rx.has_changed() {
            Ok(changed) => changed,
            // Sender dropped: take the last value once
            Err(_) => !std::mem::replace(&mut self.sender_gone, true),
        };
        if !changed {
            return;
        }

        let state = self.rx.borrow_and_update().clone();
        match state {
            ViewState::Waiting => {}
            ViewState::Live(frame) => {
                self.show(ctx, &frame);
                self.status = "Acquiring… (Stop or close the window to end the run)".to_string();
            }
            ViewState::Final { title, figure } => {
                self.show(ctx, &figure);
                self.heading = Some(title);
                self.finished = true;
                self.status = "Acquisition finished. Close the window to exit.".to_string();
            }
        }
    }

    fn show(&mut self, ctx: &egui::Context, frame: &RgbImage) {
        let size = [frame.width() as usize, frame.height() as usize];
        let image = egui::ColorImage::from_rgb(size, frame.as_raw());

        if let Some(texture) = &mut self.texture {
            texture.set(image, egui::TextureOptions::LINEAR);
        } else {
            self.texture = Some(ctx.load_texture("plot_frame", image, egui::TextureOptions::LINEAR));
        }
    }
}

impl eframe::App for ViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll(ctx);

        if ctx.input(|i| i.viewport().close_requested()) {
            self.cancel.cancel();
        }

        egui::TopBottomPanel::top("status_panel").show(ctx, |ui| {
            if let Some(heading) = &self.heading {
                for line in heading.lines() {
                    ui.heading(line.trim());
                }
            }
            ui.horizontal(|ui| {
                ui.label(&self.status);
                if !self.finished && !self.cancel.is_cancelled() && ui.button("Stop").clicked() {
                    info!("Stop requested from window");
                    self.cancel.cancel();
                    self.status = "Stopping after the current iteration…".to_string();
                }
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| match &self.texture {
            Some(texture) => {
                ui.add(egui::Image::new(texture).shrink_to_fit());
            }
            None => {
                ui.label("No frame yet.");
            }
        });

        ctx.request_repaint_after(Duration::from_millis(50));
    }
}
