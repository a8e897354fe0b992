//! Decides whether a frame gets null insertion and with which threshold.

use std::collections::BTreeSet;
use std::fmt;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use super::frame::{FieldKind, Frame};

/// Why a frame was handed back untouched.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EmptyFrame,
    InsufficientSamples,
    ReferenceFieldNotFound,
    NonNumericReference,
    NoThresholdConfigured,
    /// Fields resolve to different thresholds. Per-field thresholds are not
    /// implemented, so nothing is inserted.
    AmbiguousThreshold,
    NonPositiveThreshold,
    /// Thresholds resolved but no gap exceeded them.
    NoGaps,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::EmptyFrame => "empty frame",
            SkipReason::InsufficientSamples => "fewer than two samples",
            SkipReason::ReferenceFieldNotFound => "reference field not found",
            SkipReason::NonNumericReference => "reference field is not numeric",
            SkipReason::NoThresholdConfigured => "no threshold configured",
            SkipReason::AmbiguousThreshold => "fields disagree on threshold",
            SkipReason::NonPositiveThreshold => "threshold is not positive",
            SkipReason::NoGaps => "no gap exceeds threshold",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedThreshold {
    pub threshold: f64,
    pub ref_index: usize,
    /// Reference field values as numbers, cached for the fill pass.
    pub reference: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Skip(SkipReason),
    Apply(ResolvedThreshold),
}

impl Resolution {
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Resolution::Skip(reason) => Some(*reason),
            Resolution::Apply(_) => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ThresholdResolver<'a> {
    ref_field_name: Option<&'a str>,
}

impl<'a> ThresholdResolver<'a> {
    /// With no name, the first time field is used as the reference axis.
    pub fn new(ref_field_name: Option<&'a str>) -> Self {
        Self { ref_field_name }
    }

    pub fn find_reference(&self, frame: &Frame) -> Option<usize> {
        frame.fields.iter().position(|field| match self.ref_field_name {
            Some(name) => field.name == name,
            None => field.kind == FieldKind::Time,
        })
    }

    pub fn resolve(&self, frame: &Frame) -> Resolution {
        if frame.is_empty() {
            return Resolution::Skip(SkipReason::EmptyFrame);
        }
        if frame.length < 2 {
            return Resolution::Skip(SkipReason::InsufficientSamples);
        }

        let ref_index = match self.find_reference(frame) {
            Some(idx) => idx,
            None => return Resolution::Skip(SkipReason::ReferenceFieldNotFound),
        };
        let ref_field = &frame.fields[ref_index];
        let interval = ref_field.config.interval;

        let thresholds: BTreeSet<OrderedFloat<f64>> = frame
            .fields
            .iter()
            .filter_map(|field| field.config.insert_nulls.or(interval))
            .map(OrderedFloat)
            .collect();

        let threshold = match thresholds.len() {
            0 => return Resolution::Skip(SkipReason::NoThresholdConfigured),
            1 => thresholds.iter().next().map(|t| t.into_inner()).unwrap_or(0.0),
            _ => return Resolution::Skip(SkipReason::AmbiguousThreshold),
        };
        if !(threshold.is_finite() && threshold > 0.0) {
            return Resolution::Skip(SkipReason::NonPositiveThreshold);
        }

        let reference = match ref_field.numeric_values() {
            Some(values) if values.iter().all(|v| v.is_finite()) => values,
            _ => return Resolution::Skip(SkipReason::NonNumericReference),
        };
        if reference.len() < 2 {
            return Resolution::Skip(SkipReason::InsufficientSamples);
        }

        Resolution::Apply(ResolvedThreshold {
            threshold,
            ref_index,
            reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Field, FieldConfig, Value};

    fn interval(value: f64) -> FieldConfig {
        FieldConfig {
            interval: Some(value),
            ..FieldConfig::default()
        }
    }

    fn override_of(value: f64) -> FieldConfig {
        FieldConfig {
            insert_nulls: Some(value),
            ..FieldConfig::default()
        }
    }

    fn resolve(frame: &Frame) -> Resolution {
        ThresholdResolver::default().resolve(frame)
    }

    fn frame(time_config: FieldConfig, value_config: FieldConfig) -> Frame {
        Frame::new(vec![
            Field::time("time", &[1.0, 3.0, 10.0]).with_config(time_config),
            Field::numbers("one", &[Some(4.0), Some(6.0), Some(8.0)]).with_config(value_config),
        ])
        .unwrap()
    }

    #[test]
    fn test_interval_on_reference_applies_to_all_fields() {
        let resolution = resolve(&frame(interval(1.0), FieldConfig::default()));
        match resolution {
            Resolution::Apply(resolved) => {
                assert_eq!(resolved.threshold, 1.0);
                assert_eq!(resolved.ref_index, 0);
                assert_eq!(resolved.reference, vec![1.0, 3.0, 10.0]);
            }
            other => panic!("expected threshold, got {other:?}"),
        }
    }

    #[test]
    fn test_matching_override_agrees_with_interval() {
        let resolution = resolve(&frame(interval(2.0), override_of(2.0)));
        assert!(matches!(resolution, Resolution::Apply(ref r) if r.threshold == 2.0));
    }

    #[test]
    fn test_disagreeing_thresholds_skip() {
        let resolution = resolve(&frame(interval(1.0), override_of(2.0)));
        assert_eq!(resolution.skip_reason(), Some(SkipReason::AmbiguousThreshold));
    }

    #[test]
    fn test_override_only_on_dependent_is_enough() {
        let resolution = resolve(&frame(FieldConfig::default(), override_of(3.0)));
        assert!(matches!(resolution, Resolution::Apply(ref r) if r.threshold == 3.0));
    }

    #[test]
    fn test_unconfigured_frame_skips() {
        let resolution = resolve(&frame(FieldConfig::default(), FieldConfig::default()));
        assert_eq!(resolution.skip_reason(), Some(SkipReason::NoThresholdConfigured));
    }

    #[test]
    fn test_non_positive_threshold_skips() {
        for t in [0.0, -5.0, f64::INFINITY] {
            let resolution = resolve(&frame(interval(t), FieldConfig::default()));
            assert_eq!(resolution.skip_reason(), Some(SkipReason::NonPositiveThreshold));
        }
    }

    #[test]
    fn test_reference_by_name() {
        let frame = Frame::new(vec![
            Field::numbers("x", &[Some(0.0), Some(5.0)]).with_config(interval(1.0)),
            Field::time("time", &[0.0, 1.0]),
        ])
        .unwrap();
        let by_name = ThresholdResolver::new(Some("x")).resolve(&frame);
        assert!(matches!(by_name, Resolution::Apply(ref r) if r.ref_index == 0));

        let missing = ThresholdResolver::new(Some("nope")).resolve(&frame);
        assert_eq!(missing.skip_reason(), Some(SkipReason::ReferenceFieldNotFound));
    }

    #[test]
    fn test_no_time_field_skips() {
        let frame = Frame::new(vec![Field::numbers("a", &[Some(1.0), Some(2.0)])
            .with_config(override_of(1.0))])
        .unwrap();
        let resolution = resolve(&frame);
        assert_eq!(resolution.skip_reason(), Some(SkipReason::ReferenceFieldNotFound));
    }

    #[test]
    fn test_short_frames_skip() {
        let single = Frame::new(vec![
            Field::time("time", &[1.0]).with_config(interval(1.0)),
        ])
        .unwrap();
        assert_eq!(
            resolve(&single).skip_reason(),
            Some(SkipReason::InsufficientSamples)
        );

        let empty = Frame::new(vec![Field::time("time", &[]).with_config(interval(1.0))]).unwrap();
        assert_eq!(
            resolve(&empty).skip_reason(),
            Some(SkipReason::EmptyFrame)
        );
    }

    #[test]
    fn test_null_in_reference_skips() {
        let frame = Frame::new(vec![Field::new(
            "time",
            FieldKind::Time,
            vec![Value::Number(1.0), Value::Null],
        )
        .with_config(interval(1.0))])
        .unwrap();
        assert_eq!(
            resolve(&frame).skip_reason(),
            Some(SkipReason::NonNumericReference)
        );
    }
}
