//! Round-robin archives and the consolidation engine.
//!
//! An archive keeps a fixed ring of consolidated data points per
//! datasource. Primary data points delivered by the update pipeline are
//! folded into a per-datasource accumulator; every `steps` PDPs one row is
//! emitted into the ring, subject to the unknown-fraction (xff) rule:
//! when `nan_steps / steps >= xff` the row is unknown.
//!
//! The archive's time range is derived, never persisted:
//!
//! ```text
//! end_time   = last_update_time rounded down to arcStep
//! start_time = end_time - (rows - 1) * arcStep
//! arcStep    = header step * archive steps
//! ```

use crate::backend::RrdBackend;
use crate::cell::{DoubleArrayCell, DoubleCell, IntCell, RrdAllocator, StringCell};
use crate::db::fetch::{FetchData, FetchRequest};
use crate::db::normalize;
use crate::def::{ArcDef, ConsolFun, TAG_CAPACITY};
use crate::error::{Result, RrdError};

/// Per-datasource consolidation state: the running accumulator (NaN when
/// unset) and the count of unknown PDPs in the current window.
pub(crate) struct ArcState {
    accum_value: DoubleCell,
    nan_steps: IntCell,
}

/// Fixed ring of consolidated values for one datasource.
///
/// The write pointer addresses the oldest slot; reads index from the
/// oldest value forward.
pub(crate) struct Robin {
    values: DoubleArrayCell,
    pointer: IntCell,
    rows: usize,
}

impl Robin {
    fn store(&self, backend: &mut dyn RrdBackend, value: f64) -> Result<()> {
        let pointer = self.pointer.get(backend)? as usize;
        self.values.set(backend, pointer, value)?;
        self.pointer
            .set(backend, ((pointer + 1) % self.rows) as i64)
    }

    /// Reads one value; index 0 is the oldest stored row.
    fn get(&self, backend: &mut dyn RrdBackend, index: usize) -> Result<f64> {
        let pointer = self.pointer.get(backend)? as usize;
        self.values.get(backend, (pointer + index) % self.rows)
    }

    /// All values in chronological order.
    fn values_in_order(&self, backend: &mut dyn RrdBackend) -> Result<Vec<f64>> {
        let mut values = Vec::with_capacity(self.rows);
        for i in 0..self.rows {
            values.push(self.get(backend, i)?);
        }
        Ok(values)
    }

    /// Copies the most recent `other.rows` values into `other`.
    fn copy_state_to(
        &self,
        backend: &mut dyn RrdBackend,
        other: &Robin,
        other_backend: &mut dyn RrdBackend,
    ) -> Result<()> {
        let rows_diff = self.rows as i64 - other.rows as i64;
        for i in 0..other.rows {
            let j = i as i64 + rows_diff;
            let value = if j >= 0 {
                self.get(backend, j as usize)?
            } else {
                f64::NAN
            };
            other.store(other_backend, value)?;
        }
        Ok(())
    }
}

/// Archive cells, in declaration order: consolidation tag, rows, steps,
/// xff, then per-datasource state pairs, then per-datasource robins.
pub(crate) struct Archive {
    consol_fun: StringCell,
    rows: IntCell,
    steps: IntCell,
    xff: DoubleCell,
    states: Vec<ArcState>,
    robins: Vec<Robin>,
    row_count: usize,
}

impl Archive {
    /// Binds and initializes a fresh archive.
    pub fn create(
        alloc: &mut RrdAllocator,
        backend: &mut dyn RrdBackend,
        ds_count: usize,
        def: &ArcDef,
    ) -> Result<Self> {
        Self::bind(alloc, backend, ds_count, Some(def))
    }

    /// Binds an existing archive, reading the ring length from the store.
    pub fn open(
        alloc: &mut RrdAllocator,
        backend: &mut dyn RrdBackend,
        ds_count: usize,
    ) -> Result<Self> {
        Self::bind(alloc, backend, ds_count, None)
    }

    fn bind(
        alloc: &mut RrdAllocator,
        backend: &mut dyn RrdBackend,
        ds_count: usize,
        def: Option<&ArcDef>,
    ) -> Result<Self> {
        let consol_fun = StringCell::allocate(alloc, TAG_CAPACITY);
        let rows = IntCell::allocate(alloc);
        let steps = IntCell::allocate(alloc);
        let xff = DoubleCell::allocate(alloc);

        let row_count = match def {
            Some(def) => {
                consol_fun.set(backend, def.consol_fun.as_tag())?;
                rows.set(backend, def.rows)?;
                steps.set(backend, def.steps)?;
                xff.set(backend, def.xff)?;
                def.rows as usize
            }
            None => {
                let stored = rows.get(backend)?;
                if stored <= 0 {
                    return Err(RrdError::Backend(format!(
                        "corrupt archive: ring length {}",
                        stored
                    )));
                }
                stored as usize
            }
        };

        let mut states = Vec::with_capacity(ds_count);
        for _ in 0..ds_count {
            let state = ArcState {
                accum_value: DoubleCell::allocate(alloc),
                nan_steps: IntCell::allocate(alloc),
            };
            if def.is_some() {
                state.accum_value.set(backend, f64::NAN)?;
                state.nan_steps.set(backend, 0)?;
            }
            states.push(state);
        }

        let mut robins = Vec::with_capacity(ds_count);
        for _ in 0..ds_count {
            let robin = Robin {
                values: DoubleArrayCell::allocate(alloc, row_count),
                pointer: IntCell::allocate(alloc),
                rows: row_count,
            };
            if def.is_some() {
                robin.values.fill(backend, f64::NAN)?;
                robin.pointer.set(backend, 0)?;
            }
            robins.push(robin);
        }

        Ok(Self {
            consol_fun,
            rows,
            steps,
            xff,
            states,
            robins,
            row_count,
        })
    }

    pub fn consol_fun(&self, backend: &mut dyn RrdBackend) -> Result<ConsolFun> {
        ConsolFun::from_tag(&self.consol_fun.get(backend)?)
    }

    pub fn rows(&self, backend: &mut dyn RrdBackend) -> Result<i64> {
        self.rows.get(backend)
    }

    pub fn steps(&self, backend: &mut dyn RrdBackend) -> Result<i64> {
        self.steps.get(backend)
    }

    pub fn xff(&self, backend: &mut dyn RrdBackend) -> Result<f64> {
        self.xff.get(backend)
    }

    /// Effective step of this archive in seconds.
    pub fn arc_step(&self, backend: &mut dyn RrdBackend, step: i64) -> Result<i64> {
        Ok(self.steps.get(backend)? * step)
    }

    /// Timestamp of the most recent row slot.
    pub fn end_time(
        &self,
        backend: &mut dyn RrdBackend,
        step: i64,
        last_update: i64,
    ) -> Result<i64> {
        let arc_step = self.arc_step(backend, step)?;
        Ok(normalize(last_update, arc_step))
    }

    /// Timestamp of the oldest row slot.
    pub fn start_time(
        &self,
        backend: &mut dyn RrdBackend,
        step: i64,
        last_update: i64,
    ) -> Result<i64> {
        let arc_step = self.arc_step(backend, step)?;
        let end_time = self.end_time(backend, step, last_update)?;
        Ok(end_time - (self.row_count as i64 - 1) * arc_step)
    }

    /// Folds `n_steps` PDPs of value `value` for one datasource.
    ///
    /// `last_update` is the database's last update time before the sample
    /// being processed, so the first delivered PDP closes the window ending
    /// at `normalize(last_update, step) + step`.
    pub fn archive(
        &self,
        backend: &mut dyn RrdBackend,
        ds_index: usize,
        value: f64,
        n_steps: i64,
        step: i64,
        last_update: i64,
    ) -> Result<()> {
        let cf = self.consol_fun(backend)?;
        let arc_steps = self.steps.get(backend)?;
        let arc_step = arc_steps * step;
        let xff = self.xff.get(backend)?;
        let state = &self.states[ds_index];
        let robin = &self.robins[ds_index];

        // Fold PDPs one at a time up to the first consolidation boundary.
        let mut remaining = n_steps;
        let mut update_time = normalize(last_update, step) + step;
        while remaining > 0 {
            self.accumulate(backend, state, cf, value)?;
            remaining -= 1;
            if update_time % arc_step == 0 {
                self.emit_row(backend, state, robin, cf, arc_steps, xff)?;
                break;
            }
            update_time += step;
        }

        // Whole windows made of the same PDP bypass the accumulator. Once
        // the ring has been lapped further stores are indistinguishable,
        // so the store count is capped at rows + 1.
        let full_windows = (remaining / arc_steps).min(self.row_count as i64 + 1);
        if full_windows > 0 {
            let row = if value.is_nan() {
                emitted_value(cf, arc_steps, xff, f64::NAN, arc_steps)
            } else {
                let accum = match cf {
                    ConsolFun::Average | ConsolFun::Total => value * arc_steps as f64,
                    _ => value,
                };
                emitted_value(cf, arc_steps, xff, accum, 0)
            };
            for _ in 0..full_windows {
                robin.store(backend, row)?;
            }
        }

        // Trailing partial window.
        for _ in 0..remaining % arc_steps {
            self.accumulate(backend, state, cf, value)?;
        }
        Ok(())
    }

    /// Folds one PDP into the per-datasource accumulator.
    fn accumulate(
        &self,
        backend: &mut dyn RrdBackend,
        state: &ArcState,
        cf: ConsolFun,
        value: f64,
    ) -> Result<()> {
        if value.is_nan() {
            let nan_steps = state.nan_steps.get(backend)?;
            state.nan_steps.set(backend, nan_steps + 1)?;
        } else {
            let accum = state.accum_value.get(backend)?;
            state.accum_value.set(backend, fold(cf, accum, value))?;
        }
        Ok(())
    }

    /// Emits the row for a completed consolidation window and resets the
    /// accumulator.
    fn emit_row(
        &self,
        backend: &mut dyn RrdBackend,
        state: &ArcState,
        robin: &Robin,
        cf: ConsolFun,
        arc_steps: i64,
        xff: f64,
    ) -> Result<()> {
        let accum = state.accum_value.get(backend)?;
        let nan_steps = state.nan_steps.get(backend)?;
        robin.store(backend, emitted_value(cf, arc_steps, xff, accum, nan_steps))?;
        state.accum_value.set(backend, f64::NAN)?;
        state.nan_steps.set(backend, 0)?;
        Ok(())
    }

    /// Reads the consolidated values covering the request range.
    ///
    /// The request start is aligned down to the archive step and the end
    /// up; columns outside the archive's coverage are unknown.
    pub fn fetch_data(
        &self,
        backend: &mut dyn RrdBackend,
        step: i64,
        last_update: i64,
        request: &FetchRequest,
        ds_names: Vec<String>,
    ) -> Result<FetchData> {
        let arc_step = self.arc_step(backend, step)?;
        let fetch_start = normalize(request.start, arc_step);
        let mut fetch_end = normalize(request.end, arc_step);
        if fetch_end < request.end {
            fetch_end += arc_step;
        }
        let end_time = self.end_time(backend, step, last_update)?;
        let start_time = end_time - (self.row_count as i64 - 1) * arc_step;

        let columns = ((fetch_end - fetch_start) / arc_step + 1) as usize;
        let mut timestamps = Vec::with_capacity(columns);
        let mut values = vec![Vec::with_capacity(columns); self.robins.len()];
        for column in 0..columns {
            let time = fetch_start + column as i64 * arc_step;
            timestamps.push(time);
            for (i, robin) in self.robins.iter().enumerate() {
                let value = if time >= start_time && time <= end_time {
                    robin.get(backend, ((time - start_time) / arc_step) as usize)?
                } else {
                    f64::NAN
                };
                values[i].push(value);
            }
        }
        Ok(FetchData::new(arc_step, timestamps, ds_names, values))
    }

    /// Copies consolidation state and ring contents to a matching archive
    /// in another database. `ds_map[i]` names the other database's
    /// datasource index matching this database's datasource `i`.
    pub fn copy_state_to(
        &self,
        backend: &mut dyn RrdBackend,
        other: &Archive,
        other_backend: &mut dyn RrdBackend,
        ds_map: &[Option<usize>],
    ) -> Result<()> {
        for (i, target) in ds_map.iter().enumerate() {
            let Some(j) = *target else { continue };
            let state = &self.states[i];
            let other_state = &other.states[j];
            other_state
                .accum_value
                .set(other_backend, state.accum_value.get(backend)?)?;
            other_state
                .nan_steps
                .set(other_backend, state.nan_steps.get(backend)?)?;
            self.robins[i].copy_state_to(backend, &other.robins[j], other_backend)?;
        }
        Ok(())
    }

    /// Renders the archive state for [`crate::RrdDb::dump`].
    pub fn dump(
        &self,
        backend: &mut dyn RrdBackend,
        step: i64,
        last_update: i64,
    ) -> Result<String> {
        let mut out = format!(
            "== ARCHIVE ==\nRRA:{}:{}:{}:{}\ninterval [{}, {}]\n",
            self.consol_fun.get(backend)?,
            self.xff.get(backend)?,
            self.steps.get(backend)?,
            self.rows.get(backend)?,
            self.start_time(backend, step, last_update)?,
            self.end_time(backend, step, last_update)?,
        );
        for (i, state) in self.states.iter().enumerate() {
            out.push_str(&format!(
                "accumValue:{} nanSteps:{}\nrobin:",
                state.accum_value.get(backend)?,
                state.nan_steps.get(backend)?,
            ));
            for value in self.robins[i].values_in_order(backend)? {
                out.push_str(&format!(" {}", value));
            }
            out.push('\n');
        }
        Ok(out)
    }
}

/// Applies the xff rule and finalizes the accumulator for one emitted row.
fn emitted_value(cf: ConsolFun, steps: i64, xff: f64, accum: f64, nan_steps: i64) -> f64 {
    if nan_steps as f64 / steps as f64 >= xff {
        f64::NAN
    } else if cf == ConsolFun::Average {
        accum / (steps - nan_steps) as f64
    } else {
        accum
    }
}

/// Folds a known PDP into the accumulator; NaN marks an unset accumulator.
fn fold(cf: ConsolFun, accum: f64, value: f64) -> f64 {
    if accum.is_nan() {
        return value;
    }
    match cf {
        ConsolFun::Average | ConsolFun::Total => accum + value,
        ConsolFun::Min => accum.min(value),
        ConsolFun::Max => accum.max(value),
        ConsolFun::First => accum,
        ConsolFun::Last => value,
    }
}
