//! Setting validation
//!
//! Local edits arrive as raw input (typically a string from a text field, or
//! a JSON number from a slider). Before anything touches the mirror the raw
//! value is coerced to the setting's declared type and range-checked.
//!
//! Descriptors live in the mirrored tree itself:
//!
//! ```text
//! <component>.config.settings.<key> = {"type": "int", "min": 0, "max": 100, "default": 50}
//! <component>.settings.<key>        = 50
//! ```

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{SettingError, ValidationError};
use crate::tree::{resolve, Path};

/// Declared type of a setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    Int,
    Float,
    Bool,
    Str,
}

impl SettingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingType::Int => "int",
            SettingType::Float => "float",
            SettingType::Bool => "bool",
            SettingType::Str => "str",
        }
    }
}

impl FromStr for SettingType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" => Ok(SettingType::Int),
            "float" => Ok(SettingType::Float),
            "bool" => Ok(SettingType::Bool),
            "str" => Ok(SettingType::Str),
            other => Err(ValidationError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for SettingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Type and optional inclusive bounds of one setting
#[derive(Debug, Clone, PartialEq)]
pub struct SettingDescriptor {
    pub kind: SettingType,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub default: Option<Value>,
}

impl SettingDescriptor {
    pub fn new(kind: SettingType) -> Self {
        Self {
            kind,
            min: None,
            max: None,
            default: None,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Parse a descriptor node
    ///
    /// Accepts either `min`/`max` fields or a `range: [min, max]` pair.
    pub fn from_value(node: &Value) -> Result<Self, ValidationError> {
        let kind = match node.get("type") {
            Some(Value::String(kind)) => kind.parse()?,
            Some(other) => {
                return Err(ValidationError::TypeMismatch {
                    expected: "type name",
                    got: other.clone(),
                })
            }
            None => return Err(ValidationError::UnknownType(String::new())),
        };

        let mut descriptor = Self::new(kind);
        if let Some(range) = node.get("range") {
            match range.as_array().map(Vec::as_slice) {
                Some([min, max]) => {
                    descriptor.min = Some(bound(min)?);
                    descriptor.max = Some(bound(max)?);
                }
                _ => {
                    return Err(ValidationError::TypeMismatch {
                        expected: "[min, max]",
                        got: range.clone(),
                    })
                }
            }
        }
        if let Some(min) = node.get("min") {
            descriptor.min = Some(bound(min)?);
        }
        if let Some(max) = node.get("max") {
            descriptor.max = Some(bound(max)?);
        }
        descriptor.default = node.get("default").cloned();
        Ok(descriptor)
    }

    /// Find the descriptor for `component.setting` inside a mirrored tree
    pub fn lookup(tree: &Value, component: &str, setting: &str) -> Result<Self, SettingError> {
        let node = resolve(tree, &descriptor_path(component, setting)).map_err(|_| {
            SettingError::UnknownSetting {
                component: component.to_string(),
                setting: setting.to_string(),
            }
        })?;
        Ok(Self::from_value(node)?)
    }

    fn check_range(&self, value: f64) -> Result<(), ValidationError> {
        if let Some(min) = self.min {
            if value < min {
                return Err(ValidationError::BelowRange { value, min });
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return Err(ValidationError::AboveRange { value, max });
            }
        }
        Ok(())
    }
}

fn bound(value: &Value) -> Result<f64, ValidationError> {
    value.as_f64().ok_or_else(|| ValidationError::TypeMismatch {
        expected: "number",
        got: value.clone(),
    })
}

/// Path of a setting's descriptor inside the mirrored tree
pub fn descriptor_path(component: &str, setting: &str) -> Path {
    Path::new([component, "config", "settings", setting])
}

/// Path of a setting's current value inside the mirrored tree
pub fn value_path(component: &str, setting: &str) -> Path {
    Path::new([component, "settings", setting])
}

/// A coerced, validated setting value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl SettingValue {
    pub fn to_json(&self) -> Value {
        match self {
            SettingValue::Int(v) => Value::from(*v),
            SettingValue::Float(v) => Value::from(*v),
            SettingValue::Bool(v) => Value::Bool(*v),
            SettingValue::Str(v) => Value::String(v.clone()),
        }
    }
}

/// Coerce and range-check `raw` against `descriptor`
///
/// Pure: never touches the tree.
pub fn validate(raw: &Value, descriptor: &SettingDescriptor) -> Result<SettingValue, ValidationError> {
    match descriptor.kind {
        SettingType::Int => {
            let value = coerce_int(raw)?;
            descriptor.check_range(value as f64)?;
            Ok(SettingValue::Int(value))
        }
        SettingType::Float => {
            let value = coerce_float(raw)?;
            descriptor.check_range(value)?;
            Ok(SettingValue::Float(value))
        }
        SettingType::Bool => Ok(SettingValue::Bool(coerce_bool(raw))),
        SettingType::Str => Ok(SettingValue::Str(coerce_str(raw))),
    }
}

fn coerce_int(raw: &Value) -> Result<i64, ValidationError> {
    match raw {
        Value::Number(n) => match n.as_i64() {
            Some(v) => Ok(v),
            None => truncate(n.as_f64().unwrap_or(f64::NAN), &n.to_string()),
        },
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(v) => Ok(v),
                // "12.7" truncates like the numeric case, "abc" is NaN
                Err(_) => truncate(s.parse::<f64>().unwrap_or(f64::NAN), s),
            }
        }
        other => Err(ValidationError::TypeMismatch {
            expected: "int",
            got: other.clone(),
        }),
    }
}

fn truncate(value: f64, text: &str) -> Result<i64, ValidationError> {
    if !value.is_finite() || value.abs() > i64::MAX as f64 {
        return Err(ValidationError::NotANumber(text.to_string()));
    }
    Ok(value.trunc() as i64)
}

fn coerce_float(raw: &Value) -> Result<f64, ValidationError> {
    let (value, text) = match raw {
        Value::Number(n) => (n.as_f64().unwrap_or(f64::NAN), n.to_string()),
        Value::String(s) => {
            let s = s.trim();
            (s.parse::<f64>().unwrap_or(f64::NAN), s.to_string())
        }
        other => {
            return Err(ValidationError::TypeMismatch {
                expected: "float",
                got: other.clone(),
            })
        }
    };
    if value.is_nan() {
        return Err(ValidationError::NotANumber(text));
    }
    Ok(value)
}

fn coerce_bool(raw: &Value) -> bool {
    match raw {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0 && !v.is_nan()),
        Value::String(s) => !matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "" | "false" | "0" | "no" | "off"
        ),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn coerce_str(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
