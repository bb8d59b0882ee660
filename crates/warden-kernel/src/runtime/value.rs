//! Script values with provenance taint.
//!
//! Every value flowing through agent code carries the provenance of its
//! origin; combining values joins their labels (web-content dominates).
//! The capability firewall reads the deep taint of every argument to a T3
//! call; a single web-content-derived string buried in a map is enough
//! to refuse the call.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Number, Value};

use crate::audit::Provenance;

/// A script value: JSON-shaped data plus a provenance label.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptValue {
    /// The data.
    pub data: Data,
    /// Where this value came from.
    pub provenance: Provenance,
}

/// Script data shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    /// `null`
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// String.
    Str(String),
    /// List.
    List(Vec<ScriptValue>),
    /// Map with string keys.
    Map(BTreeMap<String, ScriptValue>),
}

impl ScriptValue {
    /// Null with the given provenance.
    #[must_use]
    pub const fn null(provenance: Provenance) -> Self {
        Self {
            data: Data::Null,
            provenance,
        }
    }

    /// String with the given provenance.
    #[must_use]
    pub fn str(value: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            data: Data::Str(value.into()),
            provenance,
        }
    }

    /// Bool with the given provenance.
    #[must_use]
    pub const fn bool(value: bool, provenance: Provenance) -> Self {
        Self {
            data: Data::Bool(value),
            provenance,
        }
    }

    /// Int with the given provenance.
    #[must_use]
    pub const fn int(value: i64, provenance: Provenance) -> Self {
        Self {
            data: Data::Int(value),
            provenance,
        }
    }

    /// The deep taint of this value: the join of its own label and every
    /// nested element's.
    #[must_use]
    pub fn taint(&self) -> Provenance {
        let mut taint = self.provenance;
        match &self.data {
            Data::List(items) => {
                for item in items {
                    taint = taint.join(item.taint());
                }
            }
            Data::Map(entries) => {
                for value in entries.values() {
                    taint = taint.join(value.taint());
                }
            }
            _ => {}
        }
        taint
    }

    /// Truthiness: null, false, 0, "" and empty containers are false.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match &self.data {
            Data::Null => false,
            Data::Bool(b) => *b,
            Data::Int(n) => *n != 0,
            Data::Float(f) => *f != 0.0,
            Data::Str(s) => !s.is_empty(),
            Data::List(items) => !items.is_empty(),
            Data::Map(entries) => !entries.is_empty(),
        }
    }

    /// Type name for diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self.data {
            Data::Null => "null",
            Data::Bool(_) => "bool",
            Data::Int(_) => "int",
            Data::Float(_) => "float",
            Data::Str(_) => "string",
            Data::List(_) => "list",
            Data::Map(_) => "map",
        }
    }

    /// The string payload, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.data {
            Data::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Converts to plain JSON, dropping provenance.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match &self.data {
            Data::Null => Value::Null,
            Data::Bool(b) => Value::Bool(*b),
            Data::Int(n) => Value::Number((*n).into()),
            Data::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Data::Str(s) => Value::String(s.clone()),
            Data::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Data::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Builds a script value from JSON, labeling every node with the
    /// given provenance.
    #[must_use]
    pub fn from_json(value: &Value, provenance: Provenance) -> Self {
        let data = match value {
            Value::Null => Data::Null,
            Value::Bool(b) => Data::Bool(*b),
            Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Data::Float(n.as_f64().unwrap_or(0.0)), Data::Int),
            Value::String(s) => Data::Str(s.clone()),
            Value::Array(items) => Data::List(
                items
                    .iter()
                    .map(|item| Self::from_json(item, provenance))
                    .collect(),
            ),
            Value::Object(map) => Data::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v, provenance)))
                    .collect(),
            ),
        };
        Self { data, provenance }
    }

    /// Converts a map-shaped value to a JSON object map (mediated calls
    /// that take field mappings).
    #[must_use]
    pub fn to_json_object(&self) -> Option<Map<String, Value>> {
        match self.to_json() {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Data::Str(s) => f.write_str(s),
            _ => write!(f, "{}", self.to_json()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taint_joins_deeply() {
        let mut entries = BTreeMap::new();
        entries.insert(
            "safe".into(),
            ScriptValue::str("ok", Provenance::Agent),
        );
        entries.insert(
            "poison".into(),
            ScriptValue::str("from the web", Provenance::WebContent),
        );
        let value = ScriptValue {
            data: Data::Map(entries),
            provenance: Provenance::Agent,
        };
        assert_eq!(value.taint(), Provenance::WebContent);
    }

    #[test]
    fn agent_only_values_stay_agent() {
        let value = ScriptValue {
            data: Data::List(vec![
                ScriptValue::int(1, Provenance::Agent),
                ScriptValue::str("x", Provenance::Agent),
            ]),
            provenance: Provenance::Agent,
        };
        assert_eq!(value.taint(), Provenance::Agent);
    }

    #[test]
    fn json_roundtrip_labels_every_node() {
        let json: Value = serde_json::json!({"a": [1, "two"], "b": {"c": true}});
        let value = ScriptValue::from_json(&json, Provenance::WebContent);
        assert_eq!(value.taint(), Provenance::WebContent);
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn truthiness() {
        assert!(!ScriptValue::null(Provenance::Agent).truthy());
        assert!(!ScriptValue::str("", Provenance::Agent).truthy());
        assert!(ScriptValue::str("x", Provenance::Agent).truthy());
        assert!(!ScriptValue::int(0, Provenance::Agent).truthy());
        assert!(ScriptValue::int(-1, Provenance::Agent).truthy());
    }
}
