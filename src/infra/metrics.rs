// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records one CSV row per monitoring window so learning
// curves can be plotted after (or during) a run.
//
// Output file: <save_path>/metrics.csv
//
//   iteration,epoch,train_cost,valid_cost,valid_mse
//   100,1,0.084512,0.079931,0.079931
//   200,2,0.041207,0.040388,0.040388
//
// Channels that were not recorded in a window are written as
// empty fields. The file is appended to, so a resumed run
// continues the same curve.

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

const HEADER: &str = "iteration,epoch,train_cost,valid_cost,valid_mse";

/// One row of the metrics CSV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub iteration:  usize,
    pub epoch:      usize,
    pub train_cost: Option<f64>,
    pub valid_cost: Option<f64>,
    pub valid_mse:  Option<f64>,
}

impl WindowMetrics {
    fn to_csv_row(&self) -> String {
        let field = |v: Option<f64>| v.map(|x| format!("{x:.6}")).unwrap_or_default();
        format!(
            "{},{},{},{},{}",
            self.iteration,
            self.epoch,
            field(self.train_cost),
            field(self.valid_cost),
            field(self.valid_mse),
        )
    }
}

/// Appends window metrics to a CSV file.
#[derive(Debug)]
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create a logger writing to `<dir>/metrics.csv`.
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &WindowMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;
        writeln!(f, "{}", m.to_csv_row())?;
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_with_missing_channels() {
        let m = WindowMetrics {
            iteration:  200,
            epoch:      2,
            train_cost: Some(0.5),
            valid_cost: None,
            valid_mse:  Some(0.25),
        };
        assert_eq!(m.to_csv_row(), "200,2,0.500000,,0.250000");
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let row = WindowMetrics {
            iteration:  1,
            epoch:      0,
            train_cost: Some(1.0),
            valid_cost: Some(1.0),
            valid_mse:  Some(1.0),
        };

        MetricsLogger::new(dir.path()).unwrap().log(&row).unwrap();
        // Reopening appends instead of rewriting the header
        MetricsLogger::new(dir.path()).unwrap().log(&row).unwrap();

        let text = fs::read_to_string(dir.path().join("metrics.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
    }
}
