//! Null insertion over a numeric reference axis.
//!
//! [`GapFiller`] walks the reference values once, emitting synthetic
//! positions wherever two neighbours are further apart than the threshold,
//! then realigns every dependent series to the expanded axis with `Null` in
//! the synthesized rows.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::frame::Value;
use super::GapFillError;

/// Chooses the reference value of each synthesized row.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InsertMode {
    /// `prev + threshold`: a steady cadence from the left edge of the gap.
    #[default]
    Threshold,
    /// `(prev + next) / 2`. Independent of the step, so a gap spanning
    /// several thresholds repeats the same value; use with
    /// [`Expansion::SingleShot`] or single-step gaps only.
    Midpoint,
    /// `prev + 1`: keeps step renderers from extending the last state.
    PlusOne,
}

impl InsertMode {
    pub fn value(self, prev: f64, next: f64, threshold: f64) -> f64 {
        match self {
            InsertMode::Threshold => prev + threshold,
            InsertMode::Midpoint => (prev + next) / 2.0,
            InsertMode::PlusOne => prev + 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InsertMode::Threshold => "threshold",
            InsertMode::Midpoint => "midpoint",
            InsertMode::PlusOne => "plusone",
        }
    }
}

impl fmt::Display for InsertMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsertMode {
    type Err = GapFillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "threshold" => Ok(InsertMode::Threshold),
            "midpoint" => Ok(InsertMode::Midpoint),
            "plusone" | "plus_one" | "plus-one" => Ok(InsertMode::PlusOne),
            _ => Err(GapFillError::UnknownInsertMode(s.to_string())),
        }
    }
}

/// How many synthetic rows a single gap may receive.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Expansion {
    /// One row per threshold step until the remaining gap fits.
    #[default]
    Thorough,
    /// At most one row per gap.
    SingleShot,
}

/// Synthetic rows emitted by one fill, by region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertCounts {
    pub leading: usize,
    pub interior: usize,
    pub trailing: usize,
}

impl InsertCounts {
    pub fn total(&self) -> usize {
        self.leading + self.interior + self.trailing
    }
}

/// Output of [`GapFiller::fill`]. Arrays that did not change are borrowed.
#[derive(Clone, Debug)]
pub struct FilledSeries<'a> {
    pub reference: Cow<'a, [f64]>,
    pub dependents: Vec<Cow<'a, [Value]>>,
    pub counts: InsertCounts,
}

impl FilledSeries<'_> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self.reference, Cow::Borrowed(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GapFiller {
    threshold: f64,
    insert_mode: InsertMode,
    expansion: Expansion,
    pseudo_min: Option<f64>,
    pseudo_max: Option<f64>,
}

struct ExpandedAxis {
    values: Vec<f64>,
    /// `true` where the row is one of the input samples.
    original: Vec<bool>,
    counts: InsertCounts,
}

impl ExpandedAxis {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            original: Vec::with_capacity(capacity),
            counts: InsertCounts::default(),
        }
    }

    fn push_sample(&mut self, value: f64) {
        self.values.push(value);
        self.original.push(true);
    }

    fn push_synthetic(&mut self, value: f64) {
        self.values.push(value);
        self.original.push(false);
    }
}

impl GapFiller {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            insert_mode: InsertMode::default(),
            expansion: Expansion::default(),
            pseudo_min: None,
            pseudo_max: None,
        }
    }

    pub fn insert_mode(mut self, mode: InsertMode) -> Self {
        self.insert_mode = mode;
        self
    }

    pub fn expansion(mut self, expansion: Expansion) -> Self {
        self.expansion = expansion;
        self
    }

    /// Lower bound of the visible range; rows are padded in front of the
    /// first sample down to it.
    pub fn pseudo_min(mut self, min: Option<f64>) -> Self {
        self.pseudo_min = min;
        self
    }

    /// Upper bound of the visible range.
    pub fn pseudo_max(mut self, max: Option<f64>) -> Self {
        self.pseudo_max = max;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Expand `reference` and realign each of `dependents` to it.
    ///
    /// `reference` must be non-decreasing and every dependent slice must be
    /// as long as it. When nothing is inserted every array is returned
    /// borrowed.
    pub fn fill<'a>(&self, reference: &'a [f64], dependents: &[&'a [Value]]) -> FilledSeries<'a> {
        let unchanged = || FilledSeries {
            reference: Cow::Borrowed(reference),
            dependents: dependents.iter().map(|values| Cow::Borrowed(*values)).collect(),
            counts: InsertCounts::default(),
        };

        if !self.is_usable(reference) {
            return unchanged();
        }

        let axis = self.expand(reference);
        if axis.values.len() == reference.len() {
            return unchanged();
        }

        let dependents = dependents
            .iter()
            .map(|values| Cow::Owned(realign(values, &axis.original)))
            .collect();

        FilledSeries {
            reference: Cow::Owned(axis.values),
            dependents,
            counts: axis.counts,
        }
    }

    fn is_usable(&self, reference: &[f64]) -> bool {
        self.threshold.is_finite()
            && self.threshold > 0.0
            && reference.len() >= 2
            && reference.iter().all(|v| v.is_finite())
    }

    fn expand(&self, reference: &[f64]) -> ExpandedAxis {
        let threshold = self.threshold;
        let mode = self.insert_mode;
        let mut axis = ExpandedAxis::with_capacity(reference.len());

        let first = reference[0];
        if let Some(min) = self.pseudo_min.filter(|min| min.is_finite() && *min < first) {
            // Slots sit a whole number of thresholds before the first sample.
            let steps = ((first - min) / threshold).ceil() as usize;
            for k in (1..=steps).rev() {
                let slot = first - k as f64 * threshold;
                if slot >= first {
                    break;
                }
                axis.push_synthetic(mode.value(slot - threshold, slot, threshold));
                axis.counts.leading += 1;
            }
        }

        axis.push_sample(first);
        let mut prev = first;
        for &cur in &reference[1..] {
            while cur - prev > threshold {
                axis.push_synthetic(mode.value(prev, cur, threshold));
                axis.counts.interior += 1;
                let next = prev + threshold;
                // Spacing below the float resolution of `prev` cannot advance.
                if next <= prev || self.expansion == Expansion::SingleShot {
                    break;
                }
                prev = next;
            }
            axis.push_sample(cur);
            prev = cur;
        }

        if let Some(max) = self.pseudo_max.filter(|max| max.is_finite()) {
            if max > prev + threshold {
                axis.push_synthetic(mode.value(prev, max, threshold));
                axis.counts.trailing += 1;
            }
        }

        axis
    }
}

/// Two-pointer walk: original rows consume the next pending input value,
/// synthetic rows get `Null`.
fn realign(values: &[Value], original: &[bool]) -> Vec<Value> {
    let mut pending = values.iter();
    original
        .iter()
        .map(|&is_sample| {
            if is_sample {
                pending.next().cloned().unwrap_or(Value::Null)
            } else {
                Value::Null
            }
        })
        .collect()
}

/// An interval between adjacent samples wider than the threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    /// Index of the sample on the left edge.
    pub start_index: usize,
    pub start: f64,
    pub end: f64,
    /// Rows thorough expansion inserts into this gap.
    pub missing: usize,
}

impl Gap {
    pub fn span(&self) -> f64 {
        self.end - self.start
    }
}

pub fn detect_gaps(reference: &[f64], threshold: f64) -> Vec<Gap> {
    if !(threshold.is_finite() && threshold > 0.0) {
        return Vec::new();
    }
    reference
        .windows(2)
        .enumerate()
        .filter_map(|(idx, pair)| {
            let span = pair[1] - pair[0];
            if span > threshold {
                let missing = ((span / threshold).ceil() as usize).saturating_sub(1).max(1);
                Some(Gap {
                    start_index: idx,
                    start: pair[0],
                    end: pair[1],
                    missing,
                })
            } else {
                None
            }
        })
        .collect()
}
