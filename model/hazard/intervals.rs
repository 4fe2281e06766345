use super::HazardError;
use itertools::Itertools;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Interval boundaries `0 = c_0 < c_1 < … < c_K`. Only `c_K` may be `+∞`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Cutpoints(Vec<f64>);

/// How far a follow-up time reaches into one interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntervalExposure {
    /// The subject was followed past the end of the interval.
    Full,
    /// Follow-up ended inside the interval, `elapsed` after its start.
    Partial { elapsed: f64 },
    /// Follow-up ended before the interval began.
    None,
}

impl Cutpoints {
    pub fn new(points: Vec<f64>) -> Result<Self, HazardError> {
        if points.len() < 2 {
            return Err(HazardError::TooFewCutpoints(points.len()));
        }
        if points[0] != 0.0 {
            return Err(HazardError::FirstCutpointNotZero(points[0]));
        }
        let last = points.len() - 1;
        for (index, &c) in points.iter().enumerate() {
            let allowed = c.is_finite() || (index == last && c == f64::INFINITY);
            if !allowed {
                return Err(HazardError::NonFiniteCutpoint { index, value: c });
            }
        }
        if let Some((index, _)) = points
            .iter()
            .tuple_windows()
            .enumerate()
            .find(|(_, (a, b))| !(a < b))
        {
            return Err(HazardError::CutpointsNotIncreasing { index: index + 1 });
        }
        Ok(Self(points))
    }

    /// Equal-width intervals of length `width` up to `end`, with the last one open.
    pub fn uniform(width: f64, end: f64) -> Result<Self, HazardError> {
        if !(width.is_finite() && width > 0.0) || !(end.is_finite() && end > 0.0) {
            return Err(HazardError::InvalidGrid);
        }
        let mut points = vec![0.0];
        let mut next = width;
        while next < end {
            points.push(next);
            next += width;
        }
        points.push(f64::INFINITY);
        Self::new(points)
    }

    #[inline]
    pub fn points(&self) -> &[f64] {
        &self.0
    }

    /// Number of intervals `K`.
    #[inline]
    pub fn intervals(&self) -> usize {
        self.0.len() - 1
    }

    #[inline]
    pub fn lower(&self, k: usize) -> f64 {
        self.0[k]
    }

    #[inline]
    pub fn upper(&self, k: usize) -> f64 {
        self.0[k + 1]
    }

    #[inline]
    pub fn last(&self) -> f64 {
        self.0[self.0.len() - 1]
    }

    /// Interval `k` with `c_k <= t < c_{k+1}`, if any.
    pub fn locate(&self, t: f64) -> Option<usize> {
        if !(t >= 0.0) || t >= self.last() {
            return None;
        }
        Some(self.0.partition_point(|&c| c <= t) - 1)
    }

    /// Like [`Self::locate`] but treats the last interval as extending to `+∞`.
    pub fn locate_open(&self, t: f64) -> Option<usize> {
        if !(t >= 0.0) {
            return None;
        }
        Some(self.locate(t).unwrap_or(self.intervals() - 1))
    }

    pub fn classify(&self, k: usize, t: f64) -> IntervalExposure {
        let (lower, upper) = (self.lower(k), self.upper(k));
        if t >= upper {
            IntervalExposure::Full
        } else if t >= lower {
            IntervalExposure::Partial { elapsed: t - lower }
        } else {
            IntervalExposure::None
        }
    }

    /// Time at risk spent in each interval by a subject followed until `t`.
    pub fn exposure_row(&self, t: f64) -> Array1<f64> {
        Array1::from_iter((0..self.intervals()).map(|k| match self.classify(k, t) {
            IntervalExposure::Full => self.upper(k) - self.lower(k),
            IntervalExposure::Partial { elapsed } => elapsed,
            IntervalExposure::None => 0.0,
        }))
    }

    /// [`Self::exposure_row`] with the last interval open-ended.
    pub(crate) fn open_exposure_row(&self, t: f64) -> Array1<f64> {
        let mut row = self.exposure_row(t);
        let last = self.intervals() - 1;
        let start = self.lower(last);
        if t >= start {
            row[last] = t - start;
        }
        row
    }
}

impl TryFrom<Vec<f64>> for Cutpoints {
    type Error = HazardError;

    fn try_from(points: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(points)
    }
}

impl From<Cutpoints> for Vec<f64> {
    fn from(cutpoints: Cutpoints) -> Self {
        cutpoints.0
    }
}
