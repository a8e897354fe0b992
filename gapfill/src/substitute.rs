//! Replaces no-data cells with each field's configured fallback.

use std::sync::Arc;

use super::frame::{Field, Frame, Value};

/// Fields with a numeric `noValue` get every `Null` replaced by it; all other
/// fields share their value array with `frame`.
pub fn substitute(frame: &Frame) -> Frame {
    let mut rewritten = 0usize;
    let fields = frame
        .fields
        .iter()
        .map(|field| match substitute_field(field) {
            Some(replaced) => {
                rewritten += 1;
                replaced
            }
            None => field.clone(),
        })
        .collect();

    tracing::trace!(frame = frame.label(), rewritten, "substituted no-value fallbacks");

    Frame {
        name: frame.name.clone(),
        fields,
        length: frame.length,
    }
}

/// Whether [`substitute`] would change anything: some field has a numeric
/// fallback and at least one `Null` to replace.
pub fn needs_substitution(frame: &Frame) -> bool {
    frame
        .fields
        .iter()
        .any(|field| field.config.fallback().is_some() && field.values.iter().any(Value::is_null))
}

fn substitute_field(field: &Field) -> Option<Field> {
    let fallback = field.config.fallback()?;
    let values: Arc<[Value]> = field
        .values
        .iter()
        .map(|value| match value {
            Value::Null => Value::Number(fallback),
            other => other.clone(),
        })
        .collect();
    Some(field.with_values(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FieldConfig, NoValue};

    fn with_no_value(field: Field, no_value: NoValue) -> Field {
        field.with_config(FieldConfig {
            no_value: Some(no_value),
            ..FieldConfig::default()
        })
    }

    #[test]
    fn test_nulls_replaced_by_fallback() {
        let frame = Frame::new(vec![
            Field::time("time", &[1.0, 2.0, 3.0]),
            with_no_value(
                Field::numbers("a", &[Some(1.0), None, Some(3.0)]),
                NoValue::Text("0".into()),
            ),
        ])
        .unwrap();

        let out = substitute(&frame);
        assert_eq!(
            out.fields[1].values.as_ref(),
            &[Value::Number(1.0), Value::Number(0.0), Value::Number(3.0)]
        );
        // input untouched
        assert_eq!(frame.fields[1].values[1], Value::Null);
    }

    #[test]
    fn test_fields_without_fallback_are_shared() {
        let frame = Frame::new(vec![
            Field::time("time", &[1.0, 2.0]),
            Field::numbers("plain", &[None, Some(2.0)]),
            with_no_value(
                Field::numbers("text", &[None, Some(2.0)]),
                NoValue::Text("n/a".into()),
            ),
        ])
        .unwrap();

        let out = substitute(&frame);
        for (before, after) in frame.fields.iter().zip(out.fields.iter()) {
            assert!(Arc::ptr_eq(&before.values, &after.values));
        }
        assert_eq!(out.fields[1].values[0], Value::Null);
    }

    #[test]
    fn test_needs_substitution() {
        let plain = Frame::new(vec![Field::numbers("a", &[None, Some(1.0)])]).unwrap();
        assert!(!needs_substitution(&plain));

        let full = Frame::new(vec![with_no_value(
            Field::numbers("a", &[Some(2.0), Some(1.0)]),
            NoValue::Number(0.0),
        )])
        .unwrap();
        assert!(!needs_substitution(&full));

        let holed = Frame::new(vec![with_no_value(
            Field::numbers("a", &[None, Some(1.0)]),
            NoValue::Number(0.0),
        )])
        .unwrap();
        assert!(needs_substitution(&holed));
    }

    #[test]
    fn test_strings_are_left_alone() {
        let frame = Frame::new(vec![with_no_value(
            Field::new(
                "s",
                crate::frame::FieldKind::String,
                vec![Value::from("up"), Value::Null],
            ),
            NoValue::Number(-1.0),
        )])
        .unwrap();

        let out = substitute(&frame);
        assert_eq!(
            out.fields[0].values.as_ref(),
            &[Value::from("up"), Value::Number(-1.0)]
        );
    }
}
