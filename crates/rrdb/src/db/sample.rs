//! Sample value object for the update path.

use crate::error::{Result, RrdError};

/// One timestamped set of raw datasource values.
///
/// Values are ordered by datasource declaration; a value left unset stays
/// unknown (NaN). Obtain a correctly sized sample from
/// [`crate::RrdDb::create_sample`].
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    time: i64,
    values: Vec<f64>,
}

impl Sample {
    /// Creates a sample at `time` (seconds) with all `ds_count` values
    /// unknown.
    pub fn new(time: i64, ds_count: usize) -> Self {
        Self {
            time,
            values: vec![f64::NAN; ds_count],
        }
    }

    /// Sample timestamp in seconds.
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Raw values in datasource declaration order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Sets the value for the datasource at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::UnknownDatasource`] if the index is out of
    /// range.
    pub fn set_value(&mut self, index: usize, value: f64) -> Result<()> {
        match self.values.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(RrdError::UnknownDatasource(format!(
                "datasource index {}",
                index
            ))),
        }
    }

    /// Replaces all values at once.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::InvalidRequest`] on an arity mismatch.
    pub fn set_values(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.values.len() {
            return Err(RrdError::InvalidRequest(format!(
                "sample carries {} values for {} datasources",
                values.len(),
                self.values.len()
            )));
        }
        self.values.copy_from_slice(values);
        Ok(())
    }
}
