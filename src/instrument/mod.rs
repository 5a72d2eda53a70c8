//! Instrument drivers.

pub mod keithley2410;

pub use keithley2410::Keithley2410;
