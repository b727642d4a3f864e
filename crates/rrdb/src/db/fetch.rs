//! Fetch request and result value objects.

use crate::def::ConsolFun;
use crate::error::{Result, RrdError};

/// A range query against one consolidation function.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Consolidation function to read.
    pub consol_fun: ConsolFun,
    /// Range start (seconds since epoch).
    pub start: i64,
    /// Range end (seconds since epoch).
    pub end: i64,
    /// Preferred resolution in seconds; the planner picks the archive whose
    /// effective step is closest to it.
    pub resolution: i64,
}

impl FetchRequest {
    /// Creates a request over `[start, end]` at the finest resolution.
    pub fn new(consol_fun: ConsolFun, start: i64, end: i64) -> Self {
        Self {
            consol_fun,
            start,
            end,
            resolution: 1,
        }
    }

    /// Sets the preferred resolution.
    pub fn with_resolution(mut self, resolution: i64) -> Self {
        self.resolution = resolution;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.end < self.start {
            return Err(RrdError::InvalidRequest(format!(
                "range end {} precedes start {}",
                self.end, self.start
            )));
        }
        if self.resolution <= 0 {
            return Err(RrdError::InvalidRequest(format!(
                "resolution must be positive, got {}",
                self.resolution
            )));
        }
        Ok(())
    }
}

/// Result of a fetch: aligned timestamps plus one value column per
/// datasource, in chronological order.
#[derive(Debug, Clone)]
pub struct FetchData {
    arc_step: i64,
    timestamps: Vec<i64>,
    ds_names: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl FetchData {
    pub(crate) fn new(
        arc_step: i64,
        timestamps: Vec<i64>,
        ds_names: Vec<String>,
        values: Vec<Vec<f64>>,
    ) -> Self {
        Self {
            arc_step,
            timestamps,
            ds_names,
            values,
        }
    }

    /// Effective step of the archive the data was read from.
    pub fn arc_step(&self) -> i64 {
        self.arc_step
    }

    /// Column timestamps, aligned to the archive step.
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    /// Datasource names, in declaration order.
    pub fn ds_names(&self) -> &[String] {
        &self.ds_names
    }

    /// Values for the datasource at `index`, one per timestamp.
    pub fn values(&self, index: usize) -> &[f64] {
        &self.values[index]
    }

    /// Values for the named datasource, if present.
    pub fn values_by_name(&self, name: &str) -> Option<&[f64]> {
        self.ds_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i].as_slice())
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.timestamps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        assert!(FetchRequest::new(ConsolFun::Average, 0, 900)
            .validate()
            .is_ok());
        assert!(FetchRequest::new(ConsolFun::Average, 900, 0)
            .validate()
            .is_err());
        assert!(FetchRequest::new(ConsolFun::Average, 0, 900)
            .with_resolution(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_values_by_name() {
        let data = FetchData::new(
            300,
            vec![0, 300],
            vec!["in".to_string(), "out".to_string()],
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
        );
        assert_eq!(data.values_by_name("out").unwrap(), &[3.0, 4.0]);
        assert!(data.values_by_name("missing").is_none());
        assert_eq!(data.column_count(), 2);
        assert_eq!(data.values(0), &[1.0, 2.0]);
    }
}
