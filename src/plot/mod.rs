//! Current-versus-time plots rasterized to RGB buffers.
//!
//! The same [`Plotter`] renders the live frames pushed to the display every
//! iteration and the final figure saved at teardown; only the [`FigureSpec`]
//! differs. Labels use DejaVu Sans, compiled into the binary; `plot.font_path`
//! replaces it with another TTF/OTF font.

use crate::config::PlotSettings;
use crate::error::AppResult;
use crate::measurement::Series;
use ab_glyph::{FontArc, FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::{error, warn};

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const TICK_GREY: Rgb<u8> = Rgb([90, 90, 90]);
/// Default trace colour of the final figure
pub const BLUE: Rgb<u8> = Rgb([31, 119, 180]);

const MARGIN_LEFT: u32 = 90;
const MARGIN_RIGHT: u32 = 20;
const MARGIN_TOP: u32 = 30;
const MARGIN_BOTTOM: u32 = 55;
const TITLE_LINE_HEIGHT: u32 = 20;
const MAJOR_TICK_LEN: i32 = 6;
const MINOR_TICK_LEN: i32 = 3;
/// Tick levels denser than this are skipped
const MAX_TICKS: usize = 500;
const LABEL_SCALE: f32 = 14.0;
const TITLE_SCALE: f32 = 16.0;

static BUNDLED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

/// How the time axis is ticked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickSpacing {
    /// Major and minor ticks at fixed multiples (seconds)
    Fixed { major: f64, minor: f64 },
    /// 1-2-5 spacing picked from the data range, no minor ticks
    Auto,
}

/// Everything about a figure except its data.
#[derive(Debug, Clone, PartialEq)]
pub struct FigureSpec {
    pub width: u32,
    pub height: u32,
    pub title: Option<String>,
    pub x_label: String,
    pub y_label: String,
    pub x_ticks: TickSpacing,
    pub line_color: Rgb<u8>,
}

impl FigureSpec {
    /// The frame pushed to the live display every iteration.
    pub fn live(plot: &PlotSettings) -> Self {
        Self {
            width: plot.live_width,
            height: plot.live_height,
            title: None,
            x_label: "Time [s]".to_string(),
            y_label: "I [A]".to_string(),
            x_ticks: TickSpacing::Fixed {
                major: plot.major_tick_secs,
                minor: plot.minor_tick_secs,
            },
            line_color: BLACK,
        }
    }

    /// The static figure produced at teardown.
    pub fn final_figure(plot: &PlotSettings, title: &str) -> Self {
        Self {
            width: plot.final_width,
            height: plot.final_height,
            title: Some(title.to_string()),
            x_label: "Time(s)".to_string(),
            y_label: "Current (A)".to_string(),
            x_ticks: TickSpacing::Auto,
            line_color: BLUE,
        }
    }
}

/// Rasterizes a [`Series`] according to a [`FigureSpec`].
pub struct Plotter {
    font: Option<FontArc>,
}

impl Default for Plotter {
    fn default() -> Self {
        Self::new()
    }
}

impl Plotter {
    /// A plotter using the bundled font.
    pub fn new() -> Self {
        Self {
            font: bundled_font(),
        }
    }

    pub fn with_font(font: FontArc) -> Self {
        Self { font: Some(font) }
    }

    /// Use `plot.font_path` when set and loadable, the bundled font otherwise.
    pub fn from_settings(plot: &PlotSettings) -> Self {
        let Some(path) = &plot.font_path else {
            return Self::new();
        };
        match load_font(path) {
            Ok(font) => Self::with_font(FontArc::new(font)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Plot font override unusable, keeping the bundled font");
                Self::new()
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn render(&self, series: &Series, spec: &FigureSpec) -> RgbImage {
        let mut img = RgbImage::from_pixel(spec.width, spec.height, WHITE);

        let title_lines: Vec<&str> = spec
            .title
            .as_deref()
            .map(|t| t.lines().map(str::trim).collect())
            .unwrap_or_default();
        let top = MARGIN_TOP + TITLE_LINE_HEIGHT * title_lines.len() as u32;

        let area = PlotArea {
            x0: MARGIN_LEFT as f32,
            y0: top as f32,
            x1: spec.width.saturating_sub(MARGIN_RIGHT).max(MARGIN_LEFT + 1) as f32,
            y1: spec.height.saturating_sub(MARGIN_BOTTOM).max(top + 1) as f32,
            x_range: axis_range(series.elapsed()),
            y_range: axis_range(series.currents()),
        };

        draw_hollow_rect_mut(
            &mut img,
            Rect::at(area.x0 as i32, area.y0 as i32)
                .of_size((area.x1 - area.x0) as u32 + 1, (area.y1 - area.y0) as u32 + 1),
            BLACK,
        );

        self.draw_x_ticks(&mut img, &area, spec.x_ticks);
        self.draw_y_ticks(&mut img, &area);
        draw_trace(&mut img, &area, series, spec.line_color);

        if let Some(font) = &self.font {
            for (i, line) in title_lines.iter().enumerate() {
                let (w, _) = text_size(PxScale::from(TITLE_SCALE), font, line);
                let x = (spec.width as i32 - w as i32) / 2;
                let y = 8 + (i as u32 * TITLE_LINE_HEIGHT) as i32;
                draw_text_mut(&mut img, BLACK, x, y, PxScale::from(TITLE_SCALE), font, line);
            }

            let (w, _) = text_size(PxScale::from(LABEL_SCALE), font, &spec.x_label);
            let x = ((area.x0 + area.x1) / 2.0) as i32 - w as i32 / 2;
            let y = spec.height as i32 - 22;
            draw_text_mut(&mut img, BLACK, x, y, PxScale::from(LABEL_SCALE), font, &spec.x_label);

            // No rotated text: the y label sits above the axis
            let y = (area.y0 as i32 - 18).max(0);
            draw_text_mut(&mut img, BLACK, 4, y, PxScale::from(LABEL_SCALE), font, &spec.y_label);
        }

        img
    }

    fn draw_x_ticks(&self, img: &mut RgbImage, area: &PlotArea, spacing: TickSpacing) {
        let (lo, hi) = area.x_range;
        let (major, minor) = match spacing {
            TickSpacing::Fixed { major, minor } => (major, Some(minor)),
            TickSpacing::Auto => (nice_step(hi - lo), None),
        };

        if let Some(minor) = minor {
            if let Some(ticks) = tick_positions(lo, hi, minor) {
                for t in ticks {
                    let x = area.map_x(t);
                    draw_line_segment_mut(
                        img,
                        (x, area.y1),
                        (x, area.y1 + MINOR_TICK_LEN as f32),
                        TICK_GREY,
                    );
                }
            }
        }

        let Some(ticks) = tick_positions(lo, hi, major) else {
            return;
        };
        for t in ticks {
            let x = area.map_x(t);
            draw_line_segment_mut(img, (x, area.y1), (x, area.y1 + MAJOR_TICK_LEN as f32), BLACK);
            if let Some(font) = &self.font {
                let label = format_tick(t, major);
                let (w, _) = text_size(PxScale::from(LABEL_SCALE - 2.0), font, &label);
                draw_text_mut(
                    img,
                    BLACK,
                    x as i32 - w as i32 / 2,
                    area.y1 as i32 + MAJOR_TICK_LEN + 3,
                    PxScale::from(LABEL_SCALE - 2.0),
                    font,
                    &label,
                );
            }
        }
    }

    fn draw_y_ticks(&self, img: &mut RgbImage, area: &PlotArea) {
        let (lo, hi) = area.y_range;
        let step = nice_step(hi - lo);
        let Some(ticks) = tick_positions(lo, hi, step) else {
            return;
        };
        for t in ticks {
            let y = area.map_y(t);
            draw_line_segment_mut(img, (area.x0 - MAJOR_TICK_LEN as f32, y), (area.x0, y), BLACK);
            if let Some(font) = &self.font {
                let label = format_tick(t, step);
                let scale = PxScale::from(LABEL_SCALE - 2.0);
                let (w, h) = text_size(scale, font, &label);
                draw_text_mut(
                    img,
                    BLACK,
                    area.x0 as i32 - MAJOR_TICK_LEN - 3 - w as i32,
                    y as i32 - h as i32 / 2,
                    scale,
                    font,
                    &label,
                );
            }
        }
    }
}

/// Save a rendered figure as PNG.
pub fn save_png(image: &RgbImage, path: &Path) -> AppResult<()> {
    image.save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}

fn bundled_font() -> Option<FontArc> {
    match FontArc::try_from_slice(BUNDLED_FONT) {
        Ok(font) => Some(font),
        Err(e) => {
            error!(error = %e, "Bundled plot font is corrupt, drawing without labels");
            None
        }
    }
}

fn load_font(path: &Path) -> AppResult<FontVec> {
    let bytes = std::fs::read(path)?;
    FontVec::try_from_vec(bytes).map_err(|e| {
        crate::error::DaqError::Configuration(format!(
            "'{}' is not a usable font: {e}",
            path.display()
        ))
    })
}

struct PlotArea {
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
    x_range: (f64, f64),
    y_range: (f64, f64),
}

impl PlotArea {
    fn map_x(&self, x: f64) -> f32 {
        let (lo, hi) = self.x_range;
        self.x0 + ((x - lo) / (hi - lo)) as f32 * (self.x1 - self.x0)
    }

    fn map_y(&self, y: f64) -> f32 {
        let (lo, hi) = self.y_range;
        self.y1 - ((y - lo) / (hi - lo)) as f32 * (self.y1 - self.y0)
    }
}

fn draw_trace(img: &mut RgbImage, area: &PlotArea, series: &Series, color: Rgb<u8>) {
    let points: Vec<(f32, f32)> = series
        .iter()
        .filter(|s| s.current.is_finite() && s.elapsed.is_finite())
        .map(|s| (area.map_x(s.elapsed), area.map_y(s.current)))
        .collect();

    match points.as_slice() {
        [] => {}
        [(x, y)] => draw_filled_circle_mut(img, (*x as i32, *y as i32), 2, color),
        _ => {
            for pair in points.windows(2) {
                draw_line_segment_mut(img, pair[0], pair[1], color);
            }
        }
    }
}

/// Data range padded by 5% on both sides; never empty.
pub fn axis_range(values: &[f64]) -> (f64, f64) {
    let finite = values.iter().copied().filter(|v| v.is_finite());
    let (lo, hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });

    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }

    let span = hi - lo;
    if span > 0.0 {
        let pad = span * 0.05;
        (lo - pad, hi + pad)
    } else if lo == 0.0 {
        (-1e-9, 1e-9)
    } else {
        let pad = lo.abs() * 0.05;
        (lo - pad, hi + pad)
    }
}

/// A 1-2-5 step giving roughly eight intervals over `span`.
pub fn nice_step(span: f64) -> f64 {
    if !(span > 0.0) || !span.is_finite() {
        return 1.0;
    }
    let raw = span / 8.0;
    let magnitude = 10f64.powf(raw.log10().floor());
    let fraction = raw / magnitude;
    // Tolerate rounding in log10/powf
    let fraction = fraction - 1e-9;
    let nice = if fraction <= 1.0 {
        1.0
    } else if fraction <= 2.0 {
        2.0
    } else if fraction <= 5.0 {
        5.0
    } else {
        10.0
    };
    nice * magnitude
}

/// Multiples of `step` inside `[lo, hi]`, or `None` if there would be too many.
pub fn tick_positions(lo: f64, hi: f64, step: f64) -> Option<Vec<f64>> {
    if !(step > 0.0) || !(hi >= lo) {
        return None;
    }
    let first = (lo / step).ceil() as i64;
    let last = (hi / step).floor() as i64;
    if last < first {
        return Some(Vec::new());
    }
    if (last - first) as usize + 1 > MAX_TICKS {
        return None;
    }
    Some((first..=last).map(|i| i as f64 * step).collect())
}

fn format_tick(value: f64, step: f64) -> String {
    let magnitude = value.abs().max(step.abs());
    if magnitude != 0.0 && !(1e-2..1e4).contains(&magnitude) {
        format!("{value:.1e}")
    } else if step >= 1.0 {
        format!("{value:.0}")
    } else {
        let decimals = (-(step.log10() + 1e-9).floor()).max(0.0) as usize;
        format!("{value:.decimals$}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Sample;

    fn ramp(n: usize) -> Series {
        let mut series = Series::seeded(0.0);
        for i in 1..n {
            assert!(series.push(Sample {
                current: (i as f64).sin() * 1e-6,
                elapsed: i as f64,
            }));
        }
        series
    }

    #[test]
    fn test_live_frame_dimensions() {
        let plot = PlotSettings::default();
        let img = Plotter::new().render(&ramp(50), &FigureSpec::live(&plot));
        assert_eq!(img.dimensions(), (640, 480));
    }

    #[test]
    fn test_final_figure_dimensions() {
        let plot = PlotSettings::default();
        let spec = FigureSpec::final_figure(&plot, "Test/1\n Current Variation");
        let img = Plotter::new().render(&ramp(5), &spec);
        assert_eq!(img.dimensions(), (1000, 500));
        assert_eq!(spec.title.as_deref(), Some("Test/1\n Current Variation"));
    }

    #[test]
    fn test_trace_is_drawn() {
        let plot = PlotSettings::default();
        let spec = FigureSpec::live(&plot);
        let img = Plotter::new().render(&ramp(30), &spec);
        // Some pixel inside the plot area carries the trace colour
        let inside = img.enumerate_pixels().any(|(x, y, p)| {
            x > MARGIN_LEFT + 2 && x < 620 - 2 && y > MARGIN_TOP + 2 && y < 425 - 2 && *p == BLACK
        });
        assert!(inside);
    }

    #[test]
    fn test_single_point_and_flat_series_render() {
        let plot = PlotSettings::default();
        let spec = FigureSpec::live(&plot);
        let plotter = Plotter::new();
        plotter.render(&Series::seeded(0.0), &spec);
        plotter.render(&Series::seeded(5e-6), &spec);
        plotter.render(&Series::new(), &spec);
    }

    #[test]
    fn test_axis_range_padding() {
        assert_eq!(axis_range(&[0.0, 10.0]), (-0.5, 10.5));
        assert_eq!(axis_range(&[]), (0.0, 1.0));
        assert_eq!(axis_range(&[0.0, 0.0]), (-1e-9, 1e-9));
        let (lo, hi) = axis_range(&[2.0, f64::NAN]);
        assert!(lo < 2.0 && hi > 2.0);
    }

    #[test]
    fn test_tick_positions_fixed_spacing() {
        assert_eq!(
            tick_positions(-0.5, 61.0, 20.0).unwrap(),
            vec![0.0, 20.0, 40.0, 60.0]
        );
        assert_eq!(tick_positions(-0.5, 11.0, 5.0).unwrap(), vec![0.0, 5.0, 10.0]);
        assert!(tick_positions(0.0, 1e6, 1.0).is_none());
        assert!(tick_positions(3.0, 4.0, 20.0).unwrap().is_empty());
    }

    #[test]
    fn test_nice_step() {
        assert_eq!(nice_step(80.0), 10.0);
        assert_eq!(nice_step(220.0), 50.0);
        assert_eq!(nice_step(0.0), 1.0);
        assert!((nice_step(8e-6) - 1e-6).abs() < 1e-18);
    }

    #[test]
    fn test_format_tick() {
        assert_eq!(format_tick(40.0, 20.0), "40");
        assert_eq!(format_tick(0.5, 0.1), "0.5");
        assert_eq!(format_tick(2e-6, 1e-6), "2.0e-6");
    }

    fn ink_in(img: &RgbImage, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>) -> usize {
        ys.flat_map(|y| xs.clone().map(move |x| (x, y)))
            .filter(|&(x, y)| *img.get_pixel(x, y) != WHITE)
            .count()
    }

    #[test]
    fn test_default_settings_use_bundled_font() {
        assert!(Plotter::new().has_font());
        assert!(Plotter::from_settings(&PlotSettings::default()).has_font());
    }

    #[test]
    fn test_unusable_font_override_keeps_bundled_font() {
        let missing = PlotSettings {
            font_path: Some("/nonexistent/font.ttf".into()),
            ..PlotSettings::default()
        };
        assert!(Plotter::from_settings(&missing).has_font());

        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("garbage.ttf");
        std::fs::write(&garbage, b"not a font").unwrap();
        let garbage = PlotSettings {
            font_path: Some(garbage),
            ..PlotSettings::default()
        };
        assert!(Plotter::from_settings(&garbage).has_font());
    }

    #[test]
    fn test_font_override_is_loaded() {
        let plot = PlotSettings {
            font_path: Some(Path::new(env!("CARGO_MANIFEST_DIR")).join("assets/DejaVuSans.ttf")),
            ..PlotSettings::default()
        };
        assert!(Plotter::from_settings(&plot).has_font());
    }

    #[test]
    fn test_final_figure_has_title_and_axis_labels() {
        let plot = PlotSettings::default();
        let spec = FigureSpec::final_figure(&plot, "Test/1\n Current Variation");
        let img = Plotter::from_settings(&plot).render(&ramp(20), &spec);
        let (width, height) = img.dimensions();

        // Title band: both centred lines sit above the plot frame
        let title_band = MARGIN_TOP + 2 * TITLE_LINE_HEIGHT;
        assert!(ink_in(&img, width / 4..3 * width / 4, 0..title_band - 2) > 50);
        // x label below the tick labels
        assert!(ink_in(&img, width / 4..3 * width / 4, height - 24..height) > 20);
        // y label above the left end of the frame
        assert!(ink_in(&img, 0..MARGIN_LEFT, title_band - 20..title_band - 1) > 10);

        // Without text the same bands stay white
        let bare = Plotter { font: None }.render(&ramp(20), &spec);
        assert_eq!(ink_in(&bare, width / 4..3 * width / 4, 0..title_band - 2), 0);
        assert_eq!(ink_in(&bare, width / 4..3 * width / 4, height - 24..height), 0);
    }

    #[test]
    fn test_live_frame_has_axis_and_tick_labels() {
        let plot = PlotSettings::default();
        let img = Plotter::from_settings(&plot).render(&ramp(60), &FigureSpec::live(&plot));
        let (width, height) = img.dimensions();

        // x label
        assert!(ink_in(&img, width / 4..3 * width / 4, height - 24..height) > 20);
        // y label above the frame
        assert!(ink_in(&img, 0..MARGIN_LEFT, 0..MARGIN_TOP - 1) > 10);
        // y tick labels left of the ticks
        let frame_bottom = height - MARGIN_BOTTOM;
        assert!(ink_in(&img, 0..MARGIN_LEFT - 8, MARGIN_TOP..frame_bottom) > 20);
    }

    #[test]
    fn test_save_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fig.png");
        let img = Plotter::new().render(&ramp(10), &FigureSpec::live(&PlotSettings::default()));
        save_png(&img, &path).unwrap();
        let back = image::open(&path).unwrap();
        assert_eq!(back.width(), 640);
    }
}
