//! Results file writer with clean feature flag handling.
//!
//! Layout (kept byte-compatible with earlier runs):
//!
//! ```text
//! I(A),T(s)
//! 0.000003,1.002310
//! ```
//!
//! Every line, header included, ends in a space before the newline.

use crate::error::{AppResult, DaqError};
use crate::measurement::Sample;
use std::path::Path;

/// Header written as the first line of a results file.
pub const HEADER: [&str; 2] = ["I(A)", "T(s) "];

// ============================================================================
// CSV Writer
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use std::fs::File;
    use std::path::PathBuf;

    pub struct ResultsWriter {
        path: PathBuf,
        writer: Option<csv::Writer<File>>,
        rows: usize,
    }

    impl ResultsWriter {
        /// Create the parent directory if needed, create the file and write
        /// the header line.
        pub fn create(path: &Path) -> AppResult<Self> {
            if let Some(dir) = path.parent() {
                // create_dir_all treats an existing directory as success
                std::fs::create_dir_all(dir)?;
            }

            let file = File::create(path)?;
            let mut writer = csv::WriterBuilder::new()
                .terminator(csv::Terminator::Any(b'\n'))
                .quote_style(csv::QuoteStyle::Never)
                .from_writer(file);
            writer.write_record(HEADER)?;
            writer.flush()?;

            log::info!("Results writer initialized at '{}'.", path.display());
            Ok(Self {
                path: path.to_path_buf(),
                writer: Some(writer),
                rows: 0,
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        pub fn rows(&self) -> usize {
            self.rows
        }

        /// Append one `current,elapsed` line and flush it to disk.
        pub fn append(&mut self, sample: &Sample) -> AppResult<()> {
            let writer = self.writer.as_mut().ok_or_else(|| {
                DaqError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "results writer already closed",
                ))
            })?;
            writer.write_record([
                format!("{:.6}", sample.current),
                format!("{:.6} ", sample.elapsed),
            ])?;
            writer.flush()?;
            self.rows += 1;
            Ok(())
        }

        pub fn finish(&mut self) -> AppResult<()> {
            if let Some(mut writer) = self.writer.take() {
                writer.flush()?;
                log::info!(
                    "Results writer closed after {} rows ('{}').",
                    self.rows,
                    self.path.display()
                );
            }
            Ok(())
        }
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;

    pub struct ResultsWriter;

    impl ResultsWriter {
        pub fn create(_path: &Path) -> AppResult<Self> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }

        pub fn path(&self) -> &Path {
            Path::new("")
        }

        pub fn rows(&self) -> usize {
            0
        }

        pub fn append(&mut self, _sample: &Sample) -> AppResult<()> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }

        pub fn finish(&mut self) -> AppResult<()> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::ResultsWriter;

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::ResultsWriter;
