//! Gap-aware null insertion for aligned series frames.
//!
//! Frames coming back from a query are sampled irregularly. Line renderers
//! connect every pair of neighbouring points, so a sensor that stopped
//! reporting for an hour is drawn as a straight line across that hour. This
//! crate inserts explicit `Null` rows wherever the reference axis jumps by
//! more than a configured threshold, and can replace those rows with a
//! per-field fallback afterwards.

use std::borrow::Cow;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod fill;
pub mod frame;
pub mod substitute;
pub mod threshold;

pub use fill::{detect_gaps, Expansion, FilledSeries, Gap, GapFiller, InsertCounts, InsertMode};
pub use frame::{Field, FieldConfig, FieldKind, FieldState, Frame, NoValue, Value};
pub use substitute::{needs_substitution, substitute};
pub use threshold::{Resolution, ResolvedThreshold, SkipReason, ThresholdResolver};

#[derive(Error, Debug)]
pub enum GapFillError {
    #[error("field '{field}' has {actual} values, frame length is {expected}")]
    MisalignedField {
        field: String,
        expected: usize,
        actual: usize,
    },
    #[error("unknown insert mode: {0}")]
    UnknownInsertMode(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, GapFillError>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NullInsertOptions {
    /// Reference field to measure gaps on; the first time field if unset.
    pub ref_field_name: Option<String>,
    pub pseudo_min: Option<f64>,
    pub pseudo_max: Option<f64>,
    pub insert_mode: InsertMode,
    pub expansion: Expansion,
    /// Run [`substitute`] after the fill.
    pub substitute_no_value: bool,
}

impl NullInsertOptions {
    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.pseudo_min = min;
        self.pseudo_max = max;
        self
    }

    pub fn filler(&self, threshold: f64) -> GapFiller {
        GapFiller::new(threshold)
            .insert_mode(self.insert_mode)
            .expansion(self.expansion)
            .pseudo_min(self.pseudo_min)
            .pseudo_max(self.pseudo_max)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| GapFillError::Serialization(e.to_string()))
    }

    /// SHA-256 of the canonical JSON encoding, usable as a memoization key.
    pub fn fingerprint(&self) -> Result<String> {
        let json = self.to_json()?;
        Ok(sha256_hex(json.as_bytes()))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FillDiagnostics {
    pub applied: bool,
    pub skipped_reason: Option<SkipReason>,
    pub threshold: Option<f64>,
    pub input_length: usize,
    pub output_length: usize,
    pub inserted: InsertCounts,
    pub options_hash: Option<String>,
}

/// Insert `Null` rows into gaps wider than the frame's resolved threshold.
///
/// Returns `Cow::Borrowed(frame)` whenever nothing was inserted, including
/// every configuration the resolver rejects.
pub fn apply_null_insert_threshold<'a>(
    frame: &'a Frame,
    options: &NullInsertOptions,
) -> Cow<'a, Frame> {
    apply_with_diagnostics(frame, options).0
}

pub fn apply_with_diagnostics<'a>(
    frame: &'a Frame,
    options: &NullInsertOptions,
) -> (Cow<'a, Frame>, FillDiagnostics) {
    let mut diagnostics = FillDiagnostics {
        input_length: frame.length,
        output_length: frame.length,
        options_hash: options.fingerprint().ok(),
        ..FillDiagnostics::default()
    };

    let resolver = ThresholdResolver::new(options.ref_field_name.as_deref());
    let resolved = match resolver.resolve(frame) {
        Resolution::Apply(resolved) => resolved,
        Resolution::Skip(reason) => {
            tracing::debug!(frame = frame.label(), %reason, "skipping null insertion");
            diagnostics.skipped_reason = Some(reason);
            return (Cow::Borrowed(frame), diagnostics);
        }
    };
    diagnostics.threshold = Some(resolved.threshold);

    let dependents: Vec<&[Value]> = frame
        .fields
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != resolved.ref_index)
        .map(|(_, field)| field.values.as_ref())
        .collect();

    let filled = options
        .filler(resolved.threshold)
        .fill(&resolved.reference, &dependents);
    if filled.is_unchanged() {
        tracing::debug!(
            frame = frame.label(),
            threshold = resolved.threshold,
            "no gap exceeds threshold"
        );
        diagnostics.skipped_reason = Some(SkipReason::NoGaps);
        return (Cow::Borrowed(frame), diagnostics);
    }

    let length = filled.reference.len();
    let mut dependents = filled.dependents.into_iter();
    let fields = frame
        .fields
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            if idx == resolved.ref_index {
                let values: Arc<[Value]> =
                    filled.reference.iter().copied().map(Value::Number).collect();
                let mut out = field.with_values(values);
                out.state.null_threshold_applied = true;
                out
            } else {
                let values: Arc<[Value]> = dependents
                    .next()
                    .map(|values| Arc::from(values.into_owned()))
                    .unwrap_or_else(|| Arc::clone(&field.values));
                field.with_values(values)
            }
        })
        .collect();

    tracing::debug!(
        frame = frame.label(),
        threshold = resolved.threshold,
        leading = filled.counts.leading,
        interior = filled.counts.interior,
        trailing = filled.counts.trailing,
        length,
        "inserted null rows"
    );

    diagnostics.applied = true;
    diagnostics.output_length = length;
    diagnostics.inserted = filled.counts;

    let out = Frame {
        name: frame.name.clone(),
        fields,
        length,
    };
    (Cow::Owned(out), diagnostics)
}

/// Null insertion followed, if requested, by fallback substitution.
pub fn prepare_frame<'a>(frame: &'a Frame, options: &NullInsertOptions) -> Cow<'a, Frame> {
    prepare_with_diagnostics(frame, options).0
}

pub fn prepare_with_diagnostics<'a>(
    frame: &'a Frame,
    options: &NullInsertOptions,
) -> (Cow<'a, Frame>, FillDiagnostics) {
    let (filled, diagnostics) = apply_with_diagnostics(frame, options);
    if !options.substitute_no_value || !needs_substitution(&filled) {
        return (filled, diagnostics);
    }
    (Cow::Owned(substitute(&filled)), diagnostics)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
