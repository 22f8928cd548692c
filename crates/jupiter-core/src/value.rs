//! Policy value model
//!
//! `Value` is the tagged union policy documents use for condition
//! expectations, action parameters, and policy-scoped variables. A string
//! beginning with `$` deserializes as a variable reference and is resolved
//! against the owning policy's variable map at evaluation time.

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Map of policy-scoped variable bindings
pub type VariableMap = BTreeMap<String, Value>;

/// A value appearing in a policy document
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// String literal
    String(String),
    /// Numeric literal; integers and floats share one representation so
    /// cross-type numeric equality is a plain comparison
    Number(f64),
    /// Boolean literal
    Bool(bool),
    /// Ordered list of values
    Array(Vec<Value>),
    /// String-keyed mapping
    Object(BTreeMap<String, Value>),
    /// Explicit null
    Null,
    /// Reference to a policy-scoped variable, written `$name`
    Var(String),
}

impl Value {
    /// Resolve a variable reference against the policy's variable map.
    ///
    /// Non-reference values resolve to themselves. An unbound reference
    /// returns `None`; the matcher surfaces that as a condition error.
    pub fn resolve<'a>(&'a self, vars: &'a VariableMap) -> Option<&'a Value> {
        match self {
            Value::Var(name) => vars.get(name),
            other => Some(other),
        }
    }

    /// Numeric view of this value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String view of this value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean view of this value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Array view of this value
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Whether this value is the explicit null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Kind name used in type-mismatch diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Null => "null",
            Value::Var(_) => "variable",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
            Value::Var(name) => write!(f, "${}", name),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Object(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::String(s) => serializer.serialize_str(s),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Null => serializer.serialize_unit(),
            Value::Var(name) => serializer.serialize_str(&format!("${}", name)),
            Value::Array(items) => items.serialize(serializer),
            Value::Object(map) => map.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a policy value (scalar, array, mapping, or $variable)")
    }

    fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Number(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Number(v as f64))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Number(v))
    }

    fn visit_str<E>(self, v: &str) -> Result<Value, E> {
        if let Some(name) = v.strip_prefix('$') {
            Ok(Value::Var(name.to_string()))
        } else {
            Ok(Value::String(v.to_string()))
        }
    }

    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut entries = BTreeMap::new();
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            entries.insert(key, value);
        }
        Ok(Value::Object(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_deserialization() {
        let v: Value = serde_yaml::from_str("42").unwrap();
        assert_eq!(v, Value::Number(42.0));

        let v: Value = serde_yaml::from_str("3.5").unwrap();
        assert_eq!(v, Value::Number(3.5));

        let v: Value = serde_yaml::from_str("true").unwrap();
        assert_eq!(v, Value::Bool(true));

        let v: Value = serde_yaml::from_str("\"gpt-4\"").unwrap();
        assert_eq!(v, Value::String("gpt-4".to_string()));
    }

    #[test]
    fn test_variable_reference_deserialization() {
        let v: Value = serde_yaml::from_str("\"$blocked_models\"").unwrap();
        assert_eq!(v, Value::Var("blocked_models".to_string()));
    }

    #[test]
    fn test_array_deserialization() {
        let v: Value = serde_yaml::from_str("[1, \"two\", true]").unwrap();
        assert_eq!(
            v,
            Value::Array(vec![
                Value::Number(1.0),
                Value::String("two".to_string()),
                Value::Bool(true),
            ])
        );
    }

    #[test]
    fn test_variable_resolution() {
        let mut vars = VariableMap::new();
        vars.insert("limit".to_string(), Value::Number(100.0));

        let reference = Value::Var("limit".to_string());
        assert_eq!(reference.resolve(&vars), Some(&Value::Number(100.0)));

        let literal = Value::String("as-is".to_string());
        assert_eq!(literal.resolve(&vars), Some(&literal));

        let unbound = Value::Var("missing".to_string());
        assert_eq!(unbound.resolve(&vars), None);
    }

    #[test]
    fn test_numeric_cross_type_equality() {
        // Integers and floats share f64, so 4 == 4.0 structurally
        let a: Value = serde_yaml::from_str("4").unwrap();
        let b: Value = serde_yaml::from_str("4.0").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_display_integral_number() {
        assert_eq!(Value::Number(403.0).to_string(), "403");
        assert_eq!(Value::Number(0.85).to_string(), "0.85");
    }

    #[test]
    fn test_variable_round_trip() {
        let v = Value::Var("models".to_string());
        let yaml = serde_yaml::to_string(&v).unwrap();
        let back: Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(v, back);
    }
}
