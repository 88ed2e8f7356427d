use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Number, Value};

use crate::identity::ConnectorId;

/// A single value inside a connector's shared state.
///
/// Sets are stored as vectors but compare without regard to order.
#[derive(Debug, Clone)]
pub enum StateValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Enum(String),
    List(Vec<StateValue>),
    Set(Vec<StateValue>),
    Map(BTreeMap<String, StateValue>),
    Object(StateObject),
    Connector(ConnectorId),
}

impl StateValue {
    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StateValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Float(value) => Some(*value),
            StateValue::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::String(value) | StateValue::Enum(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[StateValue]> {
        match self {
            StateValue::List(items) | StateValue::Set(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&StateObject> {
        match self {
            StateValue::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_connector(&self) -> Option<&ConnectorId> {
        match self {
            StateValue::Connector(id) => Some(id),
            _ => None,
        }
    }

    /// Short name used in codec error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            StateValue::Null => "null",
            StateValue::Bool(_) => "boolean",
            StateValue::Int(_) => "integer",
            StateValue::Float(_) => "float",
            StateValue::String(_) => "string",
            StateValue::Enum(_) => "enum",
            StateValue::List(_) => "list",
            StateValue::Set(_) => "set",
            StateValue::Map(_) => "map",
            StateValue::Object(_) => "object",
            StateValue::Connector(_) => "connector",
        }
    }

    /// Encodes without type information. Enums become their constant name and
    /// connectors their id.
    pub fn to_json(&self) -> Value {
        match self {
            StateValue::Null => Value::Null,
            StateValue::Bool(value) => Value::Bool(*value),
            StateValue::Int(value) => Value::Number((*value).into()),
            StateValue::Float(value) => Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            StateValue::String(value) | StateValue::Enum(value) => Value::String(value.clone()),
            StateValue::List(items) | StateValue::Set(items) => {
                Value::Array(items.iter().map(StateValue::to_json).collect())
            }
            StateValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            StateValue::Object(object) => Value::Object(object.to_json()),
            StateValue::Connector(id) => Value::String(id.as_str().to_owned()),
        }
    }

    /// Best-effort decode for values whose declared type is unknown. JSON
    /// objects become maps.
    pub fn from_json_untyped(json: &Value) -> StateValue {
        match json {
            Value::Null => StateValue::Null,
            Value::Bool(value) => StateValue::Bool(*value),
            Value::Number(number) => match number.as_i64() {
                Some(value) => StateValue::Int(value),
                None => StateValue::Float(number.as_f64().unwrap_or_default()),
            },
            Value::String(value) => StateValue::String(value.clone()),
            Value::Array(items) => {
                StateValue::List(items.iter().map(StateValue::from_json_untyped).collect())
            }
            Value::Object(entries) => StateValue::Map(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), StateValue::from_json_untyped(value)))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for StateValue {
    fn eq(&self, other: &Self) -> bool {
        use StateValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (String(a), String(b)) | (Enum(a), Enum(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Set(a), Set(b)) => {
                a.len() == b.len()
                    && a.iter().all(|item| b.contains(item))
                    && b.iter().all(|item| a.contains(item))
            }
            (Map(a), Map(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            (Connector(a), Connector(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Bool(value)
    }
}

impl From<i32> for StateValue {
    fn from(value: i32) -> Self {
        StateValue::Int(value.into())
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Int(value)
    }
}

impl From<usize> for StateValue {
    fn from(value: usize) -> Self {
        StateValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        StateValue::Float(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::String(value.to_owned())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::String(value)
    }
}

impl From<StateObject> for StateValue {
    fn from(value: StateObject) -> Self {
        StateValue::Object(value)
    }
}

impl From<ConnectorId> for StateValue {
    fn from(value: ConnectorId) -> Self {
        StateValue::Connector(value)
    }
}

impl From<Vec<StateValue>> for StateValue {
    fn from(value: Vec<StateValue>) -> Self {
        StateValue::List(value)
    }
}

/// A record of named fields: a connector's shared state or a nested bean.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateObject {
    fields: BTreeMap<String, StateValue>,
}

impl StateObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&StateValue> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut StateValue> {
        self.fields.get_mut(name)
    }

    /// Sets a field and reports whether the stored value changed.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<StateValue>) -> bool {
        let value = value.into();
        let name = name.into();
        if self.fields.get(&name) == Some(&value) {
            return false;
        }
        self.fields.insert(name, value);
        true
    }

    pub fn remove(&mut self, name: &str) -> Option<StateValue> {
        self.fields.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StateValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

impl FromIterator<(String, StateValue)> for StateObject {
    fn from_iter<I: IntoIterator<Item = (String, StateValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn sets_compare_without_order() {
        let a = StateValue::Set(vec!["x".into(), "y".into()]);
        let b = StateValue::Set(vec!["y".into(), "x".into()]);
        let c = StateValue::List(vec!["x".into(), "y".into()]);
        let d = StateValue::List(vec!["y".into(), "x".into()]);
        assert_eq!(a, b);
        assert_ne!(c, d);
        assert_ne!(a, c);
    }

    #[test_timeout::timeout]
    fn set_reports_changes_only() {
        let mut object = StateObject::new();
        assert!(object.set("caption", "A"));
        assert!(!object.set("caption", "A"));
        assert!(object.set("caption", "B"));
        assert_eq!(object.get("caption").and_then(StateValue::as_str), Some("B"));
    }

    #[test_timeout::timeout]
    fn untyped_json_encoding() {
        let object = StateObject::new()
            .with("count", 3)
            .with("ratio", 0.5)
            .with("owner", ConnectorId::new("4"))
            .with("tags", vec![StateValue::from("a")]);
        assert_eq!(
            Value::Object(object.to_json()),
            json!({"count": 3, "ratio": 0.5, "owner": "4", "tags": ["a"]})
        );
        assert_eq!(
            StateValue::from_json_untyped(&json!({"n": 1, "f": 1.5})),
            StateValue::Map(BTreeMap::from([
                ("n".to_owned(), StateValue::Int(1)),
                ("f".to_owned(), StateValue::Float(1.5)),
            ]))
        );
    }
}
