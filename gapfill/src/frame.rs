//! Frame and field types shared by every transform in this crate.
//!
//! A [`Frame`] is a set of positionally aligned [`Field`]s: index `i` of every
//! field's value array refers to the same logical sample. Values are stored
//! behind an [`Arc`] so transforms can hand untouched fields through without
//! copying them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{GapFillError, Result};

/// A single cell. `Null` is the no-data sentinel written into synthesized rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    String(String),
    Null,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<Option<f64>> for Value {
    fn from(value: Option<f64>) -> Self {
        value.map(Value::Number).unwrap_or(Value::Null)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Time,
    #[default]
    Number,
    String,
    Other,
}

/// Configured fallback for no-data cells. Dashboards store it as free text,
/// so only some settings are usable as numbers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NoValue {
    Number(f64),
    Text(String),
}

impl NoValue {
    pub fn parse(&self) -> Option<f64> {
        let value = match self {
            NoValue::Number(v) => *v,
            NoValue::Text(text) => text.trim().parse::<f64>().ok()?,
        };
        if value.is_nan() {
            None
        } else {
            Some(value)
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldConfig {
    /// Declared sampling interval, read from the reference field only.
    pub interval: Option<f64>,
    /// Per-field gap threshold override.
    pub insert_nulls: Option<f64>,
    pub no_value: Option<NoValue>,
}

impl FieldConfig {
    /// The numeric fallback, or `None` when unset or unparseable.
    pub fn fallback(&self) -> Option<f64> {
        self.no_value.as_ref().and_then(NoValue::parse)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldState {
    /// Set on the output reference field once the null-insert pass has run.
    pub null_threshold_applied: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: FieldKind,
    pub values: Arc<[Value]>,
    #[serde(default)]
    pub config: FieldConfig,
    #[serde(default, skip_serializing_if = "is_default_state")]
    pub state: FieldState,
}

fn is_default_state(state: &FieldState) -> bool {
    *state == FieldState::default()
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            kind,
            values: values.into(),
            config: FieldConfig::default(),
            state: FieldState::default(),
        }
    }

    /// Convenience constructor for a time axis given as plain numbers.
    pub fn time(name: impl Into<String>, values: &[f64]) -> Self {
        Self::new(
            name,
            FieldKind::Time,
            values.iter().copied().map(Value::Number).collect(),
        )
    }

    pub fn numbers(name: impl Into<String>, values: &[Option<f64>]) -> Self {
        Self::new(
            name,
            FieldKind::Number,
            values.iter().copied().map(Value::from).collect(),
        )
    }

    pub fn with_config(mut self, config: FieldConfig) -> Self {
        self.config = config;
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy of this field carrying `values`; config and state are kept.
    pub fn with_values(&self, values: Arc<[Value]>) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            values,
            config: self.config.clone(),
            state: self.state.clone(),
        }
    }

    /// The values as numbers, or `None` if any cell is not a number.
    pub fn numeric_values(&self) -> Option<Vec<f64>> {
        self.values.iter().map(Value::as_f64).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub fields: Vec<Field>,
    #[serde(default)]
    pub length: usize,
}

impl Frame {
    /// Build a frame, checking every field against the first field's length.
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        let length = fields.first().map(Field::len).unwrap_or(0);
        let frame = Self {
            name: None,
            fields,
            length,
        };
        frame.validate()?;
        Ok(frame)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        for field in &self.fields {
            if field.len() != self.length {
                return Err(GapFillError::MisalignedField {
                    field: field.name.clone(),
                    expected: self.length,
                    actual: field.len(),
                });
            }
        }
        Ok(())
    }

    /// Decode one frame from JSON. A missing `length` is taken from the
    /// first field.
    pub fn from_json(text: &str) -> Result<Self> {
        let frame: Frame =
            serde_json::from_str(text).map_err(|e| GapFillError::InvalidFrame(e.to_string()))?;
        frame.normalized()
    }

    /// Decode either a single frame or an array of frames.
    pub fn many_from_json(text: &str) -> Result<Vec<Self>> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            Many(Vec<Frame>),
            One(Frame),
        }

        let decoded: OneOrMany =
            serde_json::from_str(text).map_err(|e| GapFillError::InvalidFrame(e.to_string()))?;
        match decoded {
            OneOrMany::Many(frames) => frames.into_iter().map(Frame::normalized).collect(),
            OneOrMany::One(frame) => Ok(vec![frame.normalized()?]),
        }
    }

    fn normalized(mut self) -> Result<Self> {
        if self.length == 0 {
            self.length = self.fields.first().map(Field::len).unwrap_or(0);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| GapFillError::Serialization(e.to_string()))
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}
