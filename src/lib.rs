//! Core library for the sourcemeter_daq application.
//!
//! Drives a Keithley 2410 source-measure unit over RS-232 through a
//! voltage-toggle acquisition: source a fixed voltage, measure the current,
//! return to 0 V, and record the reading against elapsed time. Frames of the
//! growing series are rendered for a live view, and the final figure is
//! presented (and optionally saved) when the run ends.

pub mod acquisition;
pub mod adapters;
pub mod config;
pub mod data;
pub mod display;
pub mod error;
pub mod instrument;
pub mod measurement;
pub mod metadata;
pub mod plot;
