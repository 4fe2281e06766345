//! Posterior draws returned by an external sampler.
//!
//! Draws are stored row-major, one row per draw and one column per named
//! unconstrained coordinate. Reporting quantities (state probabilities, curves,
//! predictive densities) are computed per draw, in parallel across draws.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DrawsError {
    #[error("failed to read draws: {0}")]
    Csv(#[from] csv::Error),
    #[error("draw file has no header row")]
    MissingHeader,
    #[error("draw file contains no draws")]
    Empty,
    #[error("row {row}: expected {expected} values, found {found}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("row {row}, column '{column}': cannot parse '{value}' as a number")]
    Parse {
        row: usize,
        column: String,
        value: String,
    },
    #[error("column '{0}' not found in draws")]
    UnknownColumn(String),
    #[error("draw matrix has {columns} columns but {names} names")]
    ShapeMismatch { columns: usize, names: usize },
    #[error("interval percentiles must satisfy 0 <= lower <= upper <= 100 (got {lower}, {upper})")]
    InvalidInterval { lower: f64, upper: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorDraws {
    names: Vec<String>,
    samples: Array2<f64>,
}

impl PosteriorDraws {
    pub fn new(names: Vec<String>, samples: Array2<f64>) -> Result<Self, DrawsError> {
        if samples.ncols() != names.len() {
            return Err(DrawsError::ShapeMismatch {
                columns: samples.ncols(),
                names: names.len(),
            });
        }
        if samples.nrows() == 0 {
            return Err(DrawsError::Empty);
        }
        Ok(Self { names, samples })
    }

    /// Reads sampler output in the Stan CSV layout: `#` comment lines, then a
    /// header of column names, then one row per draw.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, DrawsError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(reader);

        let names: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        if names.is_empty() || names.iter().all(String::is_empty) {
            return Err(DrawsError::MissingHeader);
        }

        let width = names.len();
        let mut values = Vec::new();
        let mut rows = 0usize;
        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            if record.len() != width {
                return Err(DrawsError::RaggedRow {
                    row,
                    expected: width,
                    found: record.len(),
                });
            }
            for (field, name) in record.iter().zip(&names) {
                let value = field.parse::<f64>().map_err(|_| DrawsError::Parse {
                    row,
                    column: name.clone(),
                    value: field.to_string(),
                })?;
                values.push(value);
            }
            rows += 1;
        }
        if rows == 0 {
            return Err(DrawsError::Empty);
        }
        let samples = Array2::from_shape_vec((rows, width), values)
            .map_err(|_| DrawsError::ShapeMismatch { columns: width, names: width })?;
        log::debug!("Loaded {rows} posterior draws over {width} columns");
        Ok(Self { names, samples })
    }

    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self, DrawsError> {
        let file = std::fs::File::open(path.as_ref()).map_err(csv::Error::from)?;
        Self::from_csv_reader(file)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn samples(&self) -> &Array2<f64> {
        &self.samples
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.nrows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.nrows() == 0
    }

    pub fn column(&self, name: &str) -> Result<ArrayView1<'_, f64>, DrawsError> {
        let index = self.column_index(name)?;
        Ok(self.samples.column(index))
    }

    fn column_index(&self, name: &str) -> Result<usize, DrawsError> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| DrawsError::UnknownColumn(name.to_string()))
    }

    /// Restricts the draws to `names`, in that order. Sampler diagnostics such as
    /// `lp__` or `stepsize__` are dropped this way.
    pub fn select(&self, names: &[String]) -> Result<Self, DrawsError> {
        let indices = names
            .iter()
            .map(|name| self.column_index(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            names: names.to_vec(),
            samples: self.samples.select(Axis(1), &indices),
        })
    }

    /// Applies `f` to every draw in parallel, preserving draw order.
    pub fn map_draws<T, E, F>(&self, f: F) -> Result<Vec<T>, E>
    where
        F: Fn(ArrayView1<'_, f64>) -> Result<T, E> + Sync,
        T: Send,
        E: Send,
    {
        self.samples
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| f(row))
            .collect()
    }

    /// Posterior mean of a scalar function of one draw.
    pub fn posterior_mean_of<F>(&self, f: F) -> f64
    where
        F: Fn(ArrayView1<f64>) -> f64 + Sync,
    {
        let n = self.samples.nrows();
        // collected first so the summation order does not depend on rayon's splits
        let values: Vec<f64> = self
            .samples
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| f(row))
            .collect();
        values.iter().sum::<f64>() / n as f64
    }

    /// Percentile interval of a scalar function of one draw.
    pub fn posterior_interval_of<F>(
        &self,
        f: F,
        lower_pct: f64,
        upper_pct: f64,
    ) -> Result<(f64, f64), DrawsError>
    where
        F: Fn(ArrayView1<f64>) -> f64 + Sync,
    {
        if !(0.0..=100.0).contains(&lower_pct)
            || !(0.0..=100.0).contains(&upper_pct)
            || lower_pct > upper_pct
        {
            return Err(DrawsError::InvalidInterval {
                lower: lower_pct,
                upper: upper_pct,
            });
        }
        let n = self.samples.nrows();
        let mut values: Vec<f64> = self
            .samples
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| f(row))
            .collect();
        values.sort_by(|a, b| a.total_cmp(b));

        let lower_idx = ((lower_pct / 100.0) * n as f64).floor() as usize;
        let upper_idx = ((upper_pct / 100.0) * n as f64).ceil() as usize;
        Ok((values[lower_idx.min(n - 1)], values[upper_idx.min(n - 1)]))
    }
}

/// Stacks per-draw reporting vectors into a `(draws, width)` matrix.
pub fn stack_rows(rows: Vec<Array1<f64>>, width: usize) -> Result<Array2<f64>, DrawsError> {
    let mut out = Array2::<f64>::zeros((rows.len(), width));
    for (i, row) in rows.into_iter().enumerate() {
        if row.len() != width {
            return Err(DrawsError::RaggedRow {
                row: i,
                expected: width,
                found: row.len(),
            });
        }
        out.row_mut(i).assign(&row);
    }
    Ok(out)
}

/// Column means of a per-draw matrix.
pub fn column_means(matrix: &Array2<f64>) -> Array1<f64> {
    matrix
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(matrix.ncols()))
}
