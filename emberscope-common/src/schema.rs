//! Fixed per-group schemas.
//!
//! Each [`MetricGroup`] maps to exactly one [`GroupSchema`]: the sub-paths a
//! definition may declare, the label names every sink sees, and how fields
//! are named. The table is fixed at compile time so the label schema of a
//! group never varies between devices, only label values do.

use crate::observation::MetricGroup;

/// Sub-path layout of a group's metric definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubPaths {
    /// One value path per definition.
    Simple,
    /// Named sub-paths drawn from a fixed set of `(sub-path key, field name)`.
    Fixed(&'static [(&'static str, &'static str)]),
    /// Arbitrary named sub-paths, one field per sub-path.
    FreeForm,
}

/// Schema of one metric group.
#[derive(Debug)]
pub struct GroupSchema {
    pub group: MetricGroup,
    /// Measurement name (push sinks) and metric base name (pull sinks).
    pub measurement: &'static str,
    /// Help text for pull exposition.
    pub help: &'static str,
    /// Label names, in exposition order.
    pub labels: &'static [&'static str],
    pub sub_paths: SubPaths,
    /// Field carrying the value of a simple definition.
    pub primary_field: &'static str,
    /// Unit suffix stripped from simple values unless the definition overrides it.
    pub default_unit: Option<&'static str>,
    /// Suffix of the derived numeric field under dual emission.
    /// `None` means the numeric value replaces the field itself.
    pub numeric_suffix: Option<&'static str>,
    /// Whether dual emission is enabled when configuration is silent.
    pub dual_emission_default: bool,
}

const TEMPERATURE_SUB_PATHS: &[(&str, &str)] = &[
    ("actualTemperature", "actual_temp"),
    ("highLimit", "high_limit"),
];

/// Network sub-paths become labels of the same name; `linkState` also
/// feeds the `link_state` field.
pub const NETWORK_SUB_PATHS: &[(&str, &str)] = &[
    ("hostName", "hostName"),
    ("macAddress", "macAddress"),
    ("ipAddress", "ipAddress"),
    ("networkMask", "networkMask"),
    ("gateway", "gateway"),
    ("linkSpeed", "linkSpeed"),
    ("linkState", "linkState"),
    ("switchName", "switchName"),
    ("switchDescription", "switchDescription"),
    ("switchMacAddress", "switchMacAddress"),
    ("switchMgmtAddr", "switchMgmtAddr"),
    ("switchPortIntfName", "switchPortIntfName"),
    ("switchPortDescription", "switchPortDescription"),
    ("vlan", "vlan"),
];

/// Field carrying the numeric link state of a network port.
pub const LINK_STATE_FIELD: &str = "link_state";

const FANS: GroupSchema = GroupSchema {
    group: MetricGroup::Fans,
    measurement: "fan_speed",
    help: "Fan speed measurements across servers",
    labels: &["name", "description", "source", "server", "studio", "path"],
    sub_paths: SubPaths::Simple,
    primary_field: "fan_speed",
    default_unit: Some(" rpm"),
    numeric_suffix: None,
    dual_emission_default: true,
};

const TEMPERATURES: GroupSchema = GroupSchema {
    group: MetricGroup::Temperatures,
    measurement: "temperature",
    help: "Temperature sensors and their configured high limits",
    labels: &["provider", "studio", "name", "path", "location"],
    sub_paths: SubPaths::Fixed(TEMPERATURE_SUB_PATHS),
    primary_field: "actual_temp",
    default_unit: None,
    numeric_suffix: None,
    dual_emission_default: false,
};

const CURRENTS: GroupSchema = GroupSchema {
    group: MetricGroup::Currents,
    measurement: "current",
    help: "Electrical current measurements",
    labels: &["provider", "studio", "name", "path", "location"],
    sub_paths: SubPaths::Simple,
    primary_field: "current",
    default_unit: None,
    numeric_suffix: Some("_numeric"),
    dual_emission_default: true,
};

const NETWORKS: GroupSchema = GroupSchema {
    group: MetricGroup::Networks,
    measurement: "network",
    help: "Network port link state (1 = up, 0 = down)",
    labels: &[
        "path",
        "name",
        "hostName",
        "macAddress",
        "ipAddress",
        "networkMask",
        "gateway",
        "linkSpeed",
        "linkState",
        "switchName",
        "switchDescription",
        "switchMacAddress",
        "switchMgmtAddr",
        "switchPortIntfName",
        "switchPortDescription",
        "vlan",
        "source",
        "server",
        "studio",
    ],
    sub_paths: SubPaths::Fixed(NETWORK_SUB_PATHS),
    primary_field: LINK_STATE_FIELD,
    default_unit: None,
    numeric_suffix: None,
    dual_emission_default: false,
};

const TIMING: GroupSchema = GroupSchema {
    group: MetricGroup::Timing,
    measurement: "timing",
    help: "Timing and synchronisation status",
    labels: &["provider", "studio", "name", "path"],
    sub_paths: SubPaths::FreeForm,
    primary_field: "value",
    default_unit: None,
    numeric_suffix: None,
    dual_emission_default: false,
};

const SYSTEM_STATE: GroupSchema = GroupSchema {
    group: MetricGroup::SystemState,
    measurement: "system_state",
    help: "Device system state",
    labels: &["provider", "studio", "name", "path"],
    sub_paths: SubPaths::FreeForm,
    primary_field: "value",
    default_unit: None,
    numeric_suffix: None,
    dual_emission_default: false,
};

impl GroupSchema {
    /// Look up the schema of a group.
    pub fn of(group: MetricGroup) -> &'static GroupSchema {
        match group {
            MetricGroup::Fans => &FANS,
            MetricGroup::Temperatures => &TEMPERATURES,
            MetricGroup::Currents => &CURRENTS,
            MetricGroup::Networks => &NETWORKS,
            MetricGroup::Timing => &TIMING,
            MetricGroup::SystemState => &SYSTEM_STATE,
        }
    }

    /// Field name fed by a composite sub-path, or `None` if the key is not
    /// allowed for this group.
    pub fn field_for_sub_path(&self, key: &str) -> Option<String> {
        match self.sub_paths {
            SubPaths::Simple => None,
            SubPaths::Fixed(allowed) => allowed
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, field)| field.to_string()),
            SubPaths::FreeForm => {
                let field = to_snake_case(key);
                (!field.is_empty()).then_some(field)
            }
        }
    }

    /// Field holding the original string under dual emission.
    pub fn raw_field(&self, field: &str) -> String {
        format!("{}_raw", field)
    }

    /// Field holding the derived numeric value under dual emission.
    pub fn numeric_field(&self, field: &str) -> String {
        match self.numeric_suffix {
            Some(suffix) => format!("{}{}", field, suffix),
            None => field.to_string(),
        }
    }
}

/// Convert `camelCase`, `kebab-case` or dotted keys to `snake_case`.
pub fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;

    for c in key.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else if c.is_ascii_alphanumeric() {
            out.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
            prev_lower = false;
        }
    }

    while out.ends_with('_') {
        out.pop();
    }
    out
}
