//! Line-protocol encoding.
//!
//! `measurement,tag=value field=1,text="s" 1700000000000`

use std::fmt::Write;

use emberscope_common::{FieldValue, MetricObservation};

/// Encode an observation as one line-protocol point.
///
/// Tags are the non-empty labels in schema order. Missing fields are
/// omitted; `None` is returned when no field carries a value.
pub fn encode_observation(observation: &MetricObservation) -> Option<String> {
    let mut fields = String::new();
    for (name, value) in &observation.fields {
        let encoded = match value {
            FieldValue::Number(v) if v.is_finite() => format!("{}", v),
            FieldValue::Number(_) | FieldValue::Missing => continue,
            FieldValue::Text(s) => format!("\"{}\"", escape_string_field(s)),
        };
        if !fields.is_empty() {
            fields.push(',');
        }
        let _ = write!(fields, "{}={}", escape_key(name), encoded);
    }

    if fields.is_empty() {
        return None;
    }

    let mut line = escape_measurement(observation.group.schema().measurement);
    for (key, value) in observation.labels.iter() {
        if value.is_empty() {
            continue;
        }
        let _ = write!(line, ",{}={}", escape_key(key), escape_key(value));
    }

    let _ = write!(line, " {} {}", fields, observation.timestamp);
    Some(line)
}

fn escape_measurement(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ',' | ' ' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}

/// Escape tag keys, tag values and field keys.
fn escape_key(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ',' | '=' | ' ' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}

fn escape_string_field(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberscope_common::{MetricGroup, SOURCE_TAG};

    #[test]
    fn test_encode_fan_point() {
        let mut obs = MetricObservation::new(MetricGroup::Fans, "StudioA/fans/chassis.fan1/fan_1")
            .with_label("name", "fan_1")
            .with_label("source", SOURCE_TAG)
            .with_label("studio", "Studio A")
            .with_label("path", "chassis.fan1")
            .with_field("fan_speed", FieldValue::Number(3200.0));
        obs.timestamp = 1_700_000_000_000;

        assert_eq!(
            encode_observation(&obs).unwrap(),
            "fan_speed,name=fan_1,source=emberplus,studio=Studio\\ A,path=chassis.fan1 fan_speed=3200 1700000000000"
        );
    }

    #[test]
    fn test_missing_fields_are_omitted() {
        let mut obs = MetricObservation::new(MetricGroup::Temperatures, "StudioA/temperatures/cpu/cpu")
            .with_label("name", "cpu")
            .with_field("actual_temp", FieldValue::Number(41.5))
            .with_field("high_limit", FieldValue::Missing);
        obs.timestamp = 5;

        let line = encode_observation(&obs).unwrap();
        assert_eq!(line, "temperature,name=cpu actual_temp=41.5 5");
    }

    #[test]
    fn test_point_without_values_is_skipped() {
        let obs = MetricObservation::new(MetricGroup::Currents, "StudioA/currents/psu/psu")
            .with_field("current", FieldValue::Missing);
        assert!(encode_observation(&obs).is_none());
    }

    #[test]
    fn test_string_fields_are_quoted_and_escaped() {
        let mut obs = MetricObservation::new(MetricGroup::Timing, "StudioA/timing/ptp/ptp")
            .with_field("ptp_state", FieldValue::Text("say \"locked\"".to_string()));
        obs.timestamp = 1;

        assert_eq!(
            encode_observation(&obs).unwrap(),
            "timing ptp_state=\"say \\\"locked\\\"\" 1"
        );
    }

    #[test]
    fn test_escape_key() {
        assert_eq!(escape_key("a,b=c d"), "a\\,b\\=c\\ d");
        assert_eq!(escape_key("plain"), "plain");
    }
}
