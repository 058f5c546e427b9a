//! Mapping from observation fields to Prometheus metric names.

use emberscope_common::GroupSchema;

/// Sanitize a metric name to be Prometheus-compatible.
///
/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
/// This function:
/// - Replaces invalid characters with underscores
/// - Ensures the name starts with a letter or underscore
/// - Collapses multiple underscores into one
pub fn sanitize_metric_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);
    let mut last_was_underscore = false;
    let mut chars = name.chars().peekable();

    if let Some(&first) = chars.peek()
        && first.is_ascii_digit()
    {
        result.push('_');
        last_was_underscore = true;
    }

    for c in chars {
        let is_valid_char = c.is_ascii_alphanumeric() || c == '_' || c == ':';

        if is_valid_char {
            if c == '_' {
                if !last_was_underscore {
                    result.push(c);
                    last_was_underscore = true;
                }
            } else {
                result.push(c);
                last_was_underscore = false;
            }
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        result.push_str("unnamed");
    }

    result
}

/// Sanitize a label name to be Prometheus-compatible.
///
/// Prometheus label names must match `[a-zA-Z_][a-zA-Z0-9_]*`.
/// Labels starting with `__` are reserved for internal use.
pub fn sanitize_label_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut last_was_underscore = false;

    for (i, c) in name.chars().enumerate() {
        let valid = if i == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };

        if valid {
            result.push(c);
            last_was_underscore = c == '_';
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        return "label".to_string();
    }

    if result.starts_with("__") {
        result.insert(0, 'z');
    }

    result
}

/// Build the gauge name for a numeric field of a group.
///
/// A field already starting with the group measurement is used as is
/// (`fan_speed`, `current_numeric`); other fields are qualified with the
/// measurement (`temperature_actual_temp`, `timing_ptp_offset`).
pub fn metric_name(prefix: &str, schema: &GroupSchema, field: &str) -> String {
    let base = if field.starts_with(schema.measurement) {
        field.to_string()
    } else {
        format!("{}_{}", schema.measurement, field)
    };

    if prefix.is_empty() {
        sanitize_metric_name(&base)
    } else {
        sanitize_metric_name(&format!("{}_{}", prefix, base))
    }
}

/// Build the info-style metric name for a string field of a group.
pub fn info_metric_name(prefix: &str, schema: &GroupSchema, field: &str) -> String {
    format!("{}_info", metric_name(prefix, schema, field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberscope_common::MetricGroup;

    #[test]
    fn test_sanitize_metric_name_simple() {
        assert_eq!(sanitize_metric_name("fan_speed"), "fan_speed");
        assert_eq!(sanitize_metric_name("system_state_uptime"), "system_state_uptime");
    }

    #[test]
    fn test_sanitize_metric_name_special_chars() {
        assert_eq!(sanitize_metric_name("cpu.usage%"), "cpu_usage");
        assert_eq!(sanitize_metric_name("memory-used"), "memory_used");
        assert_eq!(sanitize_metric_name("a//b//c"), "a_b_c");
    }

    #[test]
    fn test_sanitize_metric_name_leading_number() {
        assert_eq!(sanitize_metric_name("1pps"), "_1pps");
    }

    #[test]
    fn test_sanitize_metric_name_empty() {
        assert_eq!(sanitize_metric_name(""), "unnamed");
        assert_eq!(sanitize_metric_name("///"), "unnamed");
    }

    #[test]
    fn test_sanitize_label_name() {
        assert_eq!(sanitize_label_name("site"), "site");
        assert_eq!(sanitize_label_name("rack-id"), "rack_id");
        assert_eq!(sanitize_label_name("__meta"), "z__meta");
    }

    #[test]
    fn test_metric_name_per_group() {
        let fans = MetricGroup::Fans.schema();
        assert_eq!(metric_name("", fans, "fan_speed"), "fan_speed");
        assert_eq!(metric_name("", fans, "fan_speed_raw"), "fan_speed_raw");

        let currents = MetricGroup::Currents.schema();
        assert_eq!(metric_name("", currents, "current"), "current");
        assert_eq!(metric_name("", currents, "current_numeric"), "current_numeric");

        let temps = MetricGroup::Temperatures.schema();
        assert_eq!(metric_name("", temps, "actual_temp"), "temperature_actual_temp");

        let networks = MetricGroup::Networks.schema();
        assert_eq!(metric_name("", networks, "link_state"), "network_link_state");
    }

    #[test]
    fn test_metric_name_with_prefix() {
        let fans = MetricGroup::Fans.schema();
        assert_eq!(metric_name("studio", fans, "fan_speed"), "studio_fan_speed");
        assert_eq!(
            info_metric_name("", MetricGroup::Timing.schema(), "ptp_state"),
            "timing_ptp_state_info"
        );
    }
}
