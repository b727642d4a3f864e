//! Per-signal state and the primary-data-point pipeline.
//!
//! A datasource turns irregular raw samples into evenly-stepped primary
//! data points (PDPs). Each incoming sample is converted to a rate
//! according to the datasource type, filtered by the heartbeat and min/max
//! policies, and credited second-by-second into the accumulator of the
//! current step window. Whenever a sample crosses one or more window
//! boundaries the canonical PDP for the completed span is produced and
//! handed to every archive.

use crate::backend::RrdBackend;
use crate::cell::{DoubleCell, IntCell, RrdAllocator, StringCell};
use crate::db::normalize;
use crate::def::{DsDef, DsType, DS_NAME_CAPACITY, TAG_CAPACITY};
use crate::error::Result;

/// 2^32, the first counter wrap candidate.
const WRAP_32: f64 = 4_294_967_296.0;
/// 2^64, the second counter wrap candidate.
const WRAP_64: f64 = 18_446_744_073_709_551_616.0;

/// Datasource cells, in declaration order: name, type tag, heartbeat, min,
/// max, last raw value, accumulated value, unknown seconds.
pub(crate) struct Datasource {
    name: StringCell,
    ds_type: StringCell,
    heartbeat: IntCell,
    min_value: DoubleCell,
    max_value: DoubleCell,
    last_value: DoubleCell,
    accum_value: DoubleCell,
    nan_seconds: IntCell,
}

impl Datasource {
    /// Binds the datasource cells at the allocator's cursor.
    pub fn bind(alloc: &mut RrdAllocator) -> Self {
        Self {
            name: StringCell::allocate(alloc, DS_NAME_CAPACITY),
            ds_type: StringCell::allocate(alloc, TAG_CAPACITY),
            heartbeat: IntCell::allocate(alloc),
            min_value: DoubleCell::allocate(alloc),
            max_value: DoubleCell::allocate(alloc),
            last_value: DoubleCell::allocate(alloc),
            accum_value: DoubleCell::allocate(alloc),
            nan_seconds: IntCell::allocate(alloc),
        }
    }

    /// Writes the initial state for a fresh datasource.
    ///
    /// The seconds of the first window that precede the database start time
    /// are unknown, so the unknown-seconds counter starts at `start_time
    /// mod step`.
    pub fn init(
        &self,
        backend: &mut dyn RrdBackend,
        def: &DsDef,
        start_time: i64,
        step: i64,
    ) -> Result<()> {
        self.name.set(backend, &def.name)?;
        self.ds_type.set(backend, def.ds_type.as_tag())?;
        self.heartbeat.set(backend, def.heartbeat)?;
        self.min_value.set(backend, def.min_value)?;
        self.max_value.set(backend, def.max_value)?;
        self.last_value.set(backend, f64::NAN)?;
        self.accum_value.set(backend, 0.0)?;
        self.nan_seconds
            .set(backend, start_time - normalize(start_time, step))?;
        Ok(())
    }

    pub fn name(&self, backend: &mut dyn RrdBackend) -> Result<String> {
        self.name.get(backend)
    }

    pub fn ds_type(&self, backend: &mut dyn RrdBackend) -> Result<DsType> {
        DsType::from_tag(&self.ds_type.get(backend)?)
    }

    pub fn heartbeat(&self, backend: &mut dyn RrdBackend) -> Result<i64> {
        self.heartbeat.get(backend)
    }

    pub fn min_value(&self, backend: &mut dyn RrdBackend) -> Result<f64> {
        self.min_value.get(backend)
    }

    pub fn max_value(&self, backend: &mut dyn RrdBackend) -> Result<f64> {
        self.max_value.get(backend)
    }

    pub fn last_value(&self, backend: &mut dyn RrdBackend) -> Result<f64> {
        self.last_value.get(backend)
    }

    /// Folds one sample into the PDP accumulator.
    ///
    /// `old_time` is the database's last update time; the sample interval
    /// is `(old_time, new_time]`. Returns the canonical PDP value and the
    /// number of completed step windows when the sample crosses at least
    /// one window boundary, `None` otherwise.
    pub fn process(
        &self,
        backend: &mut dyn RrdBackend,
        step: i64,
        old_time: i64,
        new_time: i64,
        new_value: f64,
    ) -> Result<Option<(f64, i64)>> {
        let start_time = normalize(old_time, step);
        let end_time = start_time + step;
        let rate = self.update_rate(backend, old_time, new_time, new_value)?;

        if new_time < end_time {
            self.accumulate(backend, old_time, new_time, rate)?;
            return Ok(None);
        }

        // The sample closes the current window, and possibly more.
        let boundary_time = normalize(new_time, step);
        self.accumulate(backend, old_time, boundary_time, rate)?;
        let pdp = self.pdp_value(backend, start_time, boundary_time)?;
        let elapsed_steps = (boundary_time - end_time) / step + 1;

        // Reset and credit the remainder into the new window.
        self.accum_value.set(backend, 0.0)?;
        self.nan_seconds.set(backend, 0)?;
        self.accumulate(backend, boundary_time, new_time, rate)?;

        Ok(Some((pdp, elapsed_steps)))
    }

    /// Converts the raw sample to a rate and persists the raw value.
    ///
    /// A rate is unknown when the interval exceeds the heartbeat, when the
    /// type-specific computation has no defined value, or when the rate
    /// falls outside the configured min/max bounds.
    fn update_rate(
        &self,
        backend: &mut dyn RrdBackend,
        old_time: i64,
        new_time: i64,
        new_value: f64,
    ) -> Result<f64> {
        let dt = new_time - old_time;
        let old_value = self.last_value.get(backend)?;
        let mut rate = f64::NAN;

        if dt <= self.heartbeat.get(backend)? {
            match self.ds_type(backend)? {
                DsType::Gauge => rate = new_value,
                DsType::Absolute => {
                    if !new_value.is_nan() {
                        rate = new_value / dt as f64;
                    }
                }
                DsType::Derive => {
                    if !new_value.is_nan() && !old_value.is_nan() {
                        rate = (new_value - old_value) / dt as f64;
                    }
                }
                DsType::Counter => {
                    if !new_value.is_nan() && !old_value.is_nan() {
                        // A decrease is first read as a 32-bit wrap, then
                        // as a 64-bit wrap.
                        let mut diff = new_value - old_value;
                        if diff < 0.0 {
                            diff += WRAP_32;
                        }
                        if diff < 0.0 {
                            diff += WRAP_64 - WRAP_32;
                        }
                        if diff >= 0.0 {
                            rate = diff / dt as f64;
                        }
                    }
                }
            }

            if !rate.is_nan() {
                let min = self.min_value.get(backend)?;
                let max = self.max_value.get(backend)?;
                if !min.is_nan() && rate < min {
                    rate = f64::NAN;
                }
                if !max.is_nan() && rate > max {
                    rate = f64::NAN;
                }
            }
        }

        self.last_value.set(backend, new_value)?;
        Ok(rate)
    }

    /// Credits `rate` over the seconds in `(from, to]` into the window
    /// accumulator, or into the unknown counter when the rate is unknown.
    fn accumulate(
        &self,
        backend: &mut dyn RrdBackend,
        from: i64,
        to: i64,
        rate: f64,
    ) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let seconds = to - from;
        if rate.is_nan() {
            let nan_seconds = self.nan_seconds.get(backend)?;
            self.nan_seconds.set(backend, nan_seconds + seconds)?;
        } else {
            let accum = self.accum_value.get(backend)?;
            self.accum_value
                .set(backend, accum + rate * seconds as f64)?;
        }
        Ok(())
    }

    /// Finalizes the PDP covering `[start_time, boundary_time)`.
    fn pdp_value(
        &self,
        backend: &mut dyn RrdBackend,
        start_time: i64,
        boundary_time: i64,
    ) -> Result<f64> {
        let nan_seconds = self.nan_seconds.get(backend)?;
        let valid_seconds = boundary_time - start_time - nan_seconds;
        if nan_seconds > self.heartbeat.get(backend)? || valid_seconds == 0 {
            Ok(f64::NAN)
        } else {
            Ok(self.accum_value.get(backend)? / valid_seconds as f64)
        }
    }

    /// Copies mutable state (raw value, accumulator, unknown seconds) to a
    /// matching datasource in another database.
    pub fn copy_state_to(
        &self,
        backend: &mut dyn RrdBackend,
        other: &Datasource,
        other_backend: &mut dyn RrdBackend,
    ) -> Result<()> {
        other
            .last_value
            .set(other_backend, self.last_value.get(backend)?)?;
        other
            .accum_value
            .set(other_backend, self.accum_value.get(backend)?)?;
        other
            .nan_seconds
            .set(other_backend, self.nan_seconds.get(backend)?)?;
        Ok(())
    }

    /// Renders the datasource state for [`crate::RrdDb::dump`].
    pub fn dump(&self, backend: &mut dyn RrdBackend) -> Result<String> {
        Ok(format!(
            "== DATASOURCE ==\nDS:{}:{}:{}:{}:{}\nlastValue:{} accumValue:{} nanSeconds:{}\n",
            self.name.get(backend)?,
            self.ds_type.get(backend)?,
            self.heartbeat.get(backend)?,
            self.min_value.get(backend)?,
            self.max_value.get(backend)?,
            self.last_value.get(backend)?,
            self.accum_value.get(backend)?,
            self.nan_seconds.get(backend)?,
        ))
    }
}
