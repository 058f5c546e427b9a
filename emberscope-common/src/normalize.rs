//! Value normalization.
//!
//! Converts raw parameter values pushed by a device into metric-ready
//! values. Every function here is total: unparseable input falls back to a
//! string or to [`Normalized::Absent`], never to an error.

use serde::{Deserialize, Serialize};

use crate::observation::FieldValue;

/// A raw parameter value as reported by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl RawValue {
    /// True for the null value.
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    /// Render the value as plain text (empty for null).
    pub fn to_text(&self) -> String {
        match self {
            RawValue::Null => String::new(),
            RawValue::Boolean(b) => b.to_string(),
            RawValue::Integer(i) => i.to_string(),
            RawValue::Real(f) => f.to_string(),
            RawValue::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

impl From<String> for RawValue {
    fn from(v: String) -> Self {
        RawValue::Text(v)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Integer(v)
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Real(v)
    }
}

impl From<bool> for RawValue {
    fn from(v: bool) -> Self {
        RawValue::Boolean(v)
    }
}

/// Result of normalizing a raw value.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Numeric(f64),
    Text(String),
    Absent,
}

impl From<Normalized> for FieldValue {
    fn from(n: Normalized) -> Self {
        match n {
            Normalized::Numeric(v) => FieldValue::Number(v),
            Normalized::Text(s) => FieldValue::Text(s),
            Normalized::Absent => FieldValue::Missing,
        }
    }
}

/// Normalize a raw value.
///
/// Text is numeric only when the whole trimmed string parses as a finite
/// float; otherwise it is kept as text. Use [`extract_numeric`] to derive a
/// number from unit-suffixed text.
pub fn normalize(raw: &RawValue) -> Normalized {
    match raw {
        RawValue::Null => Normalized::Absent,
        RawValue::Boolean(b) => Normalized::Numeric(if *b { 1.0 } else { 0.0 }),
        RawValue::Integer(i) => Normalized::Numeric(*i as f64),
        RawValue::Real(f) if f.is_finite() => Normalized::Numeric(*f),
        RawValue::Real(_) => Normalized::Absent,
        RawValue::Text(s) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Normalized::Numeric(v),
            _ => Normalized::Text(s.clone()),
        },
    }
}

/// Strictly extract a number from text.
///
/// Every character that is not a digit, `.` or `-` is removed and the
/// remainder is parsed as a float.
pub fn extract_numeric(text: &str) -> Option<f64> {
    let digits: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    digits.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Remove one trailing unit suffix, if present.
///
/// Values without the suffix are returned unchanged.
pub fn strip_unit<'a>(text: &'a str, unit: &str) -> &'a str {
    if unit.is_empty() {
        return text;
    }
    text.strip_suffix(unit).unwrap_or(text)
}

/// Map a link-state value to `1` (up), `0` (down) or absent.
pub fn link_state(raw: &RawValue) -> Normalized {
    match raw {
        RawValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "up" => Normalized::Numeric(1.0),
            "down" => Normalized::Numeric(0.0),
            _ => Normalized::Absent,
        },
        _ => Normalized::Absent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_null_is_absent() {
        assert_eq!(normalize(&RawValue::Null), Normalized::Absent);
    }

    #[test]
    fn test_normalize_numbers_unchanged() {
        assert_eq!(normalize(&RawValue::Integer(42)), Normalized::Numeric(42.0));
        assert_eq!(normalize(&RawValue::Real(3.5)), Normalized::Numeric(3.5));
        assert_eq!(normalize(&RawValue::Real(f64::NAN)), Normalized::Absent);
        assert_eq!(normalize(&RawValue::Boolean(true)), Normalized::Numeric(1.0));
    }

    #[test]
    fn test_normalize_after_unit_strip() {
        let raw = "123 rpm";
        let stripped = strip_unit(raw, " rpm");
        assert_eq!(normalize(&stripped.into()), Normalized::Numeric(123.0));
    }

    #[test]
    fn test_normalize_unit_suffixed_text() {
        assert_eq!(
            normalize(&"6A".into()),
            Normalized::Text("6A".to_string())
        );
        assert_eq!(extract_numeric("6A"), Some(6.0));
    }

    #[test]
    fn test_normalize_non_numeric_text() {
        assert_eq!(
            normalize(&"locked".into()),
            Normalized::Text("locked".to_string())
        );
        assert_eq!(extract_numeric("locked"), None);
    }

    #[test]
    fn test_strip_unit_without_suffix() {
        assert_eq!(strip_unit("3200", " rpm"), "3200");
        assert_eq!(normalize(&strip_unit("3200", " rpm").into()), Normalized::Numeric(3200.0));
        assert_eq!(strip_unit("3200 rpm", ""), "3200 rpm");
    }

    #[test]
    fn test_extract_numeric_edge_cases() {
        assert_eq!(extract_numeric("-12.5 °C"), Some(-12.5));
        assert_eq!(extract_numeric("1.2.3"), None);
        assert_eq!(extract_numeric(""), None);
    }

    #[test]
    fn test_link_state_mapping() {
        assert_eq!(link_state(&"up".into()), Normalized::Numeric(1.0));
        assert_eq!(link_state(&"down".into()), Normalized::Numeric(0.0));
        assert_eq!(link_state(&" Up ".into()), Normalized::Numeric(1.0));
        assert_eq!(link_state(&"unknown".into()), Normalized::Absent);
        assert_eq!(link_state(&RawValue::Null), Normalized::Absent);
    }

    #[test]
    fn test_normalize_is_total() {
        let samples = [
            RawValue::Null,
            RawValue::Boolean(false),
            RawValue::Integer(i64::MIN),
            RawValue::Real(f64::INFINITY),
            RawValue::Text(String::new()),
            RawValue::Text("  ".to_string()),
            RawValue::Text("--".to_string()),
            RawValue::Text("1e400".to_string()),
        ];
        for raw in &samples {
            // Must return exactly one variant without panicking.
            let _ = normalize(raw);
        }
        assert_eq!(normalize(&"1e400".into()), Normalized::Text("1e400".to_string()));
    }

    #[test]
    fn test_raw_value_to_text() {
        assert_eq!(RawValue::Integer(7).to_text(), "7");
        assert_eq!(RawValue::Null.to_text(), "");
        assert_eq!(RawValue::from("eth0").to_text(), "eth0");
    }
}
