//! Per-group observation building.
//!
//! A [`BoundMetric`] is one metric definition attached to its device. Given
//! the latest raw value of each resolved sub-path it produces a complete
//! [`MetricObservation`]: labels are rebuilt from the definition and the
//! device every time, fields follow the group schema and its dual emission
//! policy.

use std::collections::BTreeMap;
use std::sync::Arc;

use emberscope_common::{
    FieldValue, GroupSchema, LINK_STATE_FIELD, LabelSet, MetricGroup, MetricObservation, Normalized,
    RawValue, SOURCE_TAG, SubPaths, extract_numeric, link_state, normalize, strip_unit,
};

use crate::client::DeviceDescriptor;
use crate::config::{MetricDefinition, SIMPLE_KEY};

/// Latest raw value per resolved sub-path key.
///
/// Keys that never resolved are absent; a value that became null is kept
/// as [`RawValue::Null`] so the sink can clear it.
pub type SubPathValues = BTreeMap<String, RawValue>;

/// A metric definition bound to its device and group.
#[derive(Debug, Clone)]
pub struct BoundMetric {
    pub device: Arc<DeviceDescriptor>,
    pub group: MetricGroup,
    pub definition: MetricDefinition,
    /// Emit `<field>_raw` text plus a derived number.
    pub dual_emission: bool,
}

impl BoundMetric {
    pub fn new(
        device: Arc<DeviceDescriptor>,
        group: MetricGroup,
        definition: MetricDefinition,
        dual_emission: bool,
    ) -> Self {
        Self {
            device,
            group,
            definition,
            dual_emission,
        }
    }

    fn schema(&self) -> &'static GroupSchema {
        self.group.schema()
    }

    /// `path` label: the path itself, or the common dotted prefix of a
    /// composite's sub-paths.
    pub fn path_label(&self) -> String {
        match &self.definition {
            MetricDefinition::Simple(m) => m.path.clone(),
            MetricDefinition::Composite(m) => {
                let paths: Vec<&str> = m.paths.values().map(String::as_str).collect();
                common_path(&paths)
            }
        }
    }

    /// Explicit location, or the last segment of the path label.
    pub fn location(&self) -> String {
        match self.definition.location() {
            Some(location) => location.to_string(),
            None => location_of(&self.path_label()).to_string(),
        }
    }

    /// Explicit name, `fan_<location>` for fans, the location otherwise.
    pub fn display_name(&self) -> String {
        match self.definition.name() {
            Some(name) => name.to_string(),
            None if self.group == MetricGroup::Fans => format!("fan_{}", self.location()),
            None => self.location(),
        }
    }

    /// Stable identity `<device>/<group>/<path>/<name>`.
    pub fn series(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.device.id,
            self.group.as_str(),
            self.path_label(),
            self.display_name()
        )
    }

    /// Build the observation for the current sub-path values.
    pub fn observe(&self, values: &SubPathValues, timestamp: i64) -> MetricObservation {
        let mut observation = MetricObservation::new(self.group, self.series());
        observation.labels = self.labels(values);
        for (name, value) in self.fields(values) {
            observation.fields.insert(name, value);
        }
        observation.timestamp = timestamp;
        observation
    }

    fn labels(&self, values: &SubPathValues) -> LabelSet {
        let mut labels = LabelSet::for_group(self.group);

        // Labels outside the group schema are ignored by the set
        labels.set("name", self.display_name());
        labels.set("description", self.definition.description().unwrap_or_default());
        labels.set("source", SOURCE_TAG);
        labels.set("provider", SOURCE_TAG);
        labels.set("server", self.device.address.as_str());
        labels.set("studio", self.device.name.as_str());
        labels.set("path", self.path_label());
        labels.set("location", self.location());

        if self.group == MetricGroup::Networks {
            for (key, raw) in values {
                if let Some(label) = self.schema().field_for_sub_path(key) {
                    labels.set(&label, raw.to_text());
                }
            }
        }

        labels
    }

    fn fields(&self, values: &SubPathValues) -> Vec<(String, FieldValue)> {
        let schema = self.schema();

        match schema.sub_paths {
            SubPaths::Simple => {
                let unit = self.definition.unit().or(schema.default_unit);
                values
                    .get(SIMPLE_KEY)
                    .map(|raw| self.emit(schema.primary_field, raw, unit))
                    .unwrap_or_default()
            }
            SubPaths::Fixed(_) if self.group == MetricGroup::Networks => values
                .get("linkState")
                .map(|raw| vec![(LINK_STATE_FIELD.to_string(), link_state(raw).into())])
                .unwrap_or_default(),
            SubPaths::Fixed(_) | SubPaths::FreeForm => values
                .iter()
                .filter_map(|(key, raw)| {
                    schema
                        .field_for_sub_path(key)
                        .map(|field| self.emit(&field, raw, None))
                })
                .flatten()
                .collect(),
        }
    }

    /// Fields for one raw value, applying the unit and dual emission policy.
    fn emit(&self, field: &str, raw: &RawValue, unit: Option<&str>) -> Vec<(String, FieldValue)> {
        let stripped = match (raw, unit) {
            (RawValue::Text(text), Some(unit)) => RawValue::Text(strip_unit(text, unit).to_string()),
            _ => raw.clone(),
        };
        let normalized = normalize(&stripped);

        if !self.dual_emission {
            return vec![(field.to_string(), normalized.into())];
        }

        let schema = self.schema();
        let raw_text = if raw.is_null() {
            FieldValue::Missing
        } else {
            FieldValue::Text(raw.to_text())
        };
        let numeric = match &normalized {
            Normalized::Numeric(v) => Some(*v),
            Normalized::Text(text) => extract_numeric(text),
            Normalized::Absent => None,
        };

        let mut fields = vec![(schema.raw_field(field), raw_text)];
        match schema.numeric_suffix {
            Some(_) => {
                fields.push((
                    schema.numeric_field(field),
                    numeric.map_or(FieldValue::Missing, FieldValue::Number),
                ));
                fields.push((field.to_string(), normalized.into()));
            }
            None => {
                let value = match numeric {
                    Some(v) => FieldValue::Number(v),
                    None => normalized.into(),
                };
                fields.push((field.to_string(), value));
            }
        }
        fields
    }
}

/// Last dot-separated segment of a path.
pub fn location_of(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

/// Longest common dotted prefix, or the first path when there is none.
pub fn common_path(paths: &[&str]) -> String {
    let Some(first) = paths.first() else {
        return String::new();
    };

    let mut common: Vec<&str> = first.split('.').collect();
    for path in &paths[1..] {
        let shared = common
            .iter()
            .zip(path.split('.'))
            .take_while(|(a, b)| **a == *b)
            .count();
        common.truncate(shared);
    }

    if common.is_empty() {
        first.to_string()
    } else {
        common.join(".")
    }
}
