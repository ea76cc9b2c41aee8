//! World schema: namespaces of models and their field types
//!
//! A `Schema` maps namespace → model name → `ModelDef`. It is built once
//! (from a file, by hand, or from `#[derive(Model)]` types) and never changes
//! afterwards. Field types also own the coercion rules that turn loosely typed
//! backend JSON into `Value`s.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{Model, Value};

/// Separator between namespace and model in a model key (`world::todos`)
pub const MODEL_KEY_SEPARATOR: &str = "::";

/// Build the key identifying a model across namespaces
pub fn model_key(namespace: &str, model: &str) -> String {
    format!("{namespace}{MODEL_KEY_SEPARATOR}{model}")
}

/// Split a model key back into `(namespace, model)`
pub fn split_model_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(MODEL_KEY_SEPARATOR)
}

// ─────────────────────────────────────────────────────────────────────────────
// Field Types
// ─────────────────────────────────────────────────────────────────────────────

/// Declared type of a model field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    String,
    Bool,
    /// Signed integer
    Int,
    /// Unsigned integer (also accepts `0x` hex, as chain felts arrive that way)
    UInt,
    Float,
    /// Closed set of variant names
    Enum { variants: Vec<String> },
    /// Nested struct
    Struct { fields: Vec<FieldDef> },
    /// Homogeneous array
    Array { element: Box<FieldType> },
}

impl FieldType {
    /// Whether ordering operators make sense for this type
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Int | FieldType::UInt | FieldType::Float)
    }

    /// Whether substring containment makes sense for this type
    pub fn is_text(&self) -> bool {
        matches!(self, FieldType::String)
    }

    /// Whether values of this type can be compared for equality by filters
    pub fn is_scalar(&self) -> bool {
        !matches!(self, FieldType::Struct { .. } | FieldType::Array { .. })
    }

    /// Short name for error messages
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Bool => "bool",
            FieldType::Int => "int",
            FieldType::UInt => "uint",
            FieldType::Float => "float",
            FieldType::Enum { .. } => "enum",
            FieldType::Struct { .. } => "struct",
            FieldType::Array { .. } => "array",
        }
    }

    /// Coerce a raw JSON value into a typed `Value`
    pub fn coerce(&self, raw: &JsonValue) -> Result<Value, CoerceError> {
        match (self, raw) {
            (FieldType::String, JsonValue::String(s)) => Ok(Value::String(s.clone())),

            (FieldType::Bool, JsonValue::Bool(b)) => Ok(Value::Bool(*b)),
            (FieldType::Bool, JsonValue::String(s)) => match s.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(CoerceError::mismatch(self, raw)),
            },
            (FieldType::Bool, JsonValue::Number(n)) => match n.as_u64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(CoerceError::mismatch(self, raw)),
            },

            (FieldType::Int, JsonValue::Number(n)) => n
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| CoerceError::mismatch(self, raw)),
            (FieldType::Int, JsonValue::String(s)) => parse_signed(s)
                .map(Value::Int)
                .ok_or_else(|| CoerceError::mismatch(self, raw)),

            (FieldType::UInt, JsonValue::Number(n)) => n
                .as_u64()
                .map(Value::UInt)
                .ok_or_else(|| CoerceError::mismatch(self, raw)),
            (FieldType::UInt, JsonValue::String(s)) => parse_unsigned(s)
                .map(Value::UInt)
                .ok_or_else(|| CoerceError::mismatch(self, raw)),

            (FieldType::Float, JsonValue::Number(n)) => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| CoerceError::mismatch(self, raw)),
            (FieldType::Float, JsonValue::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::Float)
                .ok_or_else(|| CoerceError::mismatch(self, raw)),

            (FieldType::Enum { variants }, JsonValue::String(s)) => enum_variant(variants, s),
            // starknet.js encodes enums as `{"Variant": <payload>}`
            (FieldType::Enum { variants }, JsonValue::Object(obj)) if obj.len() == 1 => {
                let (variant, _) = obj.iter().next().ok_or_else(|| CoerceError::mismatch(self, raw))?;
                enum_variant(variants, variant)
            }

            (FieldType::Struct { fields }, JsonValue::Object(obj)) => {
                coerce_fields(fields, obj).map(Value::Struct)
            }

            (FieldType::Array { element }, JsonValue::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    element.coerce(item).map_err(|e| CoerceError::Nested {
                        field: format!("[{i}]"),
                        source: Box::new(e),
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),

            _ => Err(CoerceError::mismatch(self, raw)),
        }
    }
}

fn enum_variant(variants: &[String], name: &str) -> Result<Value, CoerceError> {
    if variants.iter().any(|v| v == name) {
        Ok(Value::Enum(name.to_string()))
    } else {
        Err(CoerceError::UnknownVariant {
            variant: name.to_string(),
            expected: variants.to_vec(),
        })
    }
}

fn parse_signed(s: &str) -> Option<i64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn parse_unsigned(s: &str) -> Option<u64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// Error coercing raw JSON into a declared field type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoerceError {
    #[error("expected {expected}, got `{raw}`")]
    Mismatch { expected: &'static str, raw: String },
    #[error("unknown variant `{variant}`, expected one of {expected:?}")]
    UnknownVariant {
        variant: String,
        expected: Vec<String>,
    },
    #[error("missing field `{0}`")]
    MissingField(String),
    #[error("in `{field}`: {source}")]
    Nested {
        field: String,
        source: Box<CoerceError>,
    },
}

impl CoerceError {
    fn mismatch(expected: &FieldType, raw: &JsonValue) -> Self {
        CoerceError::Mismatch {
            expected: expected.name(),
            raw: raw.to_string(),
        }
    }
}

/// Coerce every declared field of a raw object; undeclared keys are dropped
pub fn coerce_fields(
    fields: &[FieldDef],
    raw: &serde_json::Map<String, JsonValue>,
) -> Result<BTreeMap<String, Value>, CoerceError> {
    fields
        .iter()
        .map(|field| {
            let value = field.coerce(raw.get(&field.name)).map_err(|e| match e {
                CoerceError::MissingField(_) => e,
                other => CoerceError::Nested {
                    field: field.name.clone(),
                    source: Box::new(other),
                },
            })?;
            Ok((field.name.clone(), value))
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Field Definition
// ─────────────────────────────────────────────────────────────────────────────

/// Definition of a field in a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    #[serde(flatten)]
    pub field_type: FieldType,
    /// Whether this field may be absent or null
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldDef {
    /// Create a required field
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            optional: false,
            description: None,
        }
    }

    /// Create an optional field
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            optional: true,
            description: None,
        }
    }

    /// Add a description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Coerce the raw value of this field, honoring optionality
    pub fn coerce(&self, raw: Option<&JsonValue>) -> Result<Value, CoerceError> {
        match raw {
            None | Some(JsonValue::Null) if self.optional => Ok(Value::Null),
            None => Err(CoerceError::MissingField(self.name.clone())),
            Some(raw) => self.field_type.coerce(raw),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model Definition
// ─────────────────────────────────────────────────────────────────────────────

/// Shape of one model: an ordered list of fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ModelDef {
    /// Create a model from its fields
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self {
            fields,
            description: None,
        }
    }

    /// Add a single field
    pub fn add_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Get a field by name
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn duplicate_field(&self) -> Option<&str> {
        let mut seen = BTreeSet::new();
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .find(|name| !seen.insert(*name))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Schema Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur when building a schema
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("model already exists: {0}")]
    ModelAlreadyExists(String),
    #[error("duplicate field `{field}` in model {model}")]
    DuplicateField { model: String, field: String },
    #[error("invalid name: {0:?}")]
    InvalidName(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Schema
// ─────────────────────────────────────────────────────────────────────────────

/// The full addressable data space: namespace → model → definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    namespaces: BTreeMap<String, BTreeMap<String, ModelDef>>,
}

impl Schema {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a model definition
    ///
    /// Returns an error if the model already exists or declares a field twice.
    pub fn insert(
        &mut self,
        namespace: impl Into<String>,
        model: impl Into<String>,
        def: ModelDef,
    ) -> Result<(), SchemaError> {
        let namespace = namespace.into();
        let model = model.into();
        validate_name(&namespace)?;
        validate_name(&model)?;

        let key = model_key(&namespace, &model);
        if let Some(field) = def.duplicate_field() {
            return Err(SchemaError::DuplicateField {
                model: key,
                field: field.to_string(),
            });
        }

        let models = self.namespaces.entry(namespace).or_default();
        if models.contains_key(&model) {
            return Err(SchemaError::ModelAlreadyExists(key));
        }
        models.insert(model, def);
        Ok(())
    }

    /// Builder-style insert
    pub fn with_model(
        mut self,
        namespace: impl Into<String>,
        model: impl Into<String>,
        def: ModelDef,
    ) -> Result<Self, SchemaError> {
        self.insert(namespace, model, def)?;
        Ok(self)
    }

    /// Register a compile-time model type
    pub fn register<M: Model>(&mut self) -> Result<(), SchemaError> {
        self.insert(M::NAMESPACE, M::NAME, M::definition())
    }

    /// Check invariants of a schema that was deserialized rather than built
    pub fn validate(&self) -> Result<(), SchemaError> {
        for (namespace, models) in &self.namespaces {
            validate_name(namespace)?;
            for (model, def) in models {
                validate_name(model)?;
                if let Some(field) = def.duplicate_field() {
                    return Err(SchemaError::DuplicateField {
                        model: model_key(namespace, model),
                        field: field.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Look up a model definition
    pub fn model(&self, namespace: &str, model: &str) -> Option<&ModelDef> {
        self.namespaces.get(namespace)?.get(model)
    }

    /// Look up a model definition by its `namespace::model` key
    pub fn model_by_key(&self, key: &str) -> Option<&ModelDef> {
        let (namespace, model) = split_model_key(key)?;
        self.model(namespace, model)
    }

    /// Models of one namespace
    pub fn namespace(&self, namespace: &str) -> Option<&BTreeMap<String, ModelDef>> {
        self.namespaces.get(namespace)
    }

    /// Check if a namespace exists
    pub fn contains_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains_key(namespace)
    }

    /// All namespace names
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    /// Iterate over `(namespace, model, definition)`
    pub fn models(&self) -> impl Iterator<Item = (&str, &str, &ModelDef)> {
        self.namespaces.iter().flat_map(|(ns, models)| {
            models
                .iter()
                .map(move |(name, def)| (ns.as_str(), name.as_str(), def))
        })
    }

    /// Get the number of models
    pub fn len(&self) -> usize {
        self.namespaces.values().map(BTreeMap::len).sum()
    }

    /// Check if the schema has no models
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_name(name: &str) -> Result<(), SchemaError> {
    if name.is_empty() || name.contains(MODEL_KEY_SEPARATOR) {
        return Err(SchemaError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn todo_def() -> ModelDef {
        ModelDef::new(vec![
            FieldDef::required("id", FieldType::String),
            FieldDef::required("done", FieldType::Bool),
            FieldDef::required("createdAt", FieldType::UInt),
        ])
    }

    #[test]
    fn test_insert_model() {
        let schema = Schema::new().with_model("world", "todos", todo_def()).unwrap();

        let todos = schema.model("world", "todos").unwrap();
        assert_eq!(todos.fields.len(), 3);
        assert!(schema.model_by_key("world::todos").is_some());
        assert!(schema.model("world", "goals").is_none());
        assert_eq!(schema.len(), 1);
    }

    #[test]
    fn test_insert_duplicate_fails() {
        let mut schema = Schema::new();
        schema.insert("world", "todos", todo_def()).unwrap();

        let result = schema.insert("world", "todos", todo_def());
        assert_eq!(
            result,
            Err(SchemaError::ModelAlreadyExists("world::todos".to_string()))
        );
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let def = todo_def().add_field(FieldDef::required("done", FieldType::String));
        let result = Schema::new().with_model("world", "todos", def);
        assert!(matches!(result, Err(SchemaError::DuplicateField { field, .. }) if field == "done"));
    }

    #[test]
    fn test_coerce_primitives() {
        assert_eq!(FieldType::Bool.coerce(&json!("false")), Ok(Value::Bool(false)));
        assert_eq!(FieldType::Bool.coerce(&json!(1)), Ok(Value::Bool(true)));
        assert_eq!(FieldType::UInt.coerce(&json!("0x1f")), Ok(Value::UInt(31)));
        assert_eq!(FieldType::Int.coerce(&json!("-12")), Ok(Value::Int(-12)));
        assert_eq!(FieldType::Float.coerce(&json!("2.5")), Ok(Value::Float(2.5)));
        assert!(FieldType::UInt.coerce(&json!(-1)).is_err());
        assert!(FieldType::String.coerce(&json!(5)).is_err());
        assert!(FieldType::Bool.coerce(&json!("maybe")).is_err());
    }

    #[test]
    fn test_coerce_enum() {
        let direction = FieldType::Enum {
            variants: vec!["Left".to_string(), "Right".to_string()],
        };
        assert_eq!(direction.coerce(&json!("Left")), Ok(Value::Enum("Left".to_string())));
        assert_eq!(
            direction.coerce(&json!({"Right": []})),
            Ok(Value::Enum("Right".to_string()))
        );
        assert!(matches!(
            direction.coerce(&json!("Up")),
            Err(CoerceError::UnknownVariant { .. })
        ));
    }

    #[test]
    fn test_coerce_nested_struct() {
        let vec2 = FieldType::Struct {
            fields: vec![
                FieldDef::required("x", FieldType::UInt),
                FieldDef::required("y", FieldType::UInt),
            ],
        };

        let value = vec2.coerce(&json!({"x": "0x2", "y": 3, "z": 9})).unwrap();
        assert_eq!(value.get("x"), Some(&Value::UInt(2)));
        assert_eq!(value.get("z"), None);

        let err = vec2.coerce(&json!({"x": "nope", "y": 3})).unwrap_err();
        assert!(matches!(err, CoerceError::Nested { field, .. } if field == "x"));
    }

    #[test]
    fn test_optional_field() {
        let note = FieldDef::optional("note", FieldType::String);
        assert_eq!(note.coerce(None), Ok(Value::Null));
        assert_eq!(note.coerce(Some(&JsonValue::Null)), Ok(Value::Null));

        let id = FieldDef::required("id", FieldType::String);
        assert_eq!(id.coerce(None), Err(CoerceError::MissingField("id".to_string())));
    }

    #[test]
    fn test_schema_deserialize() {
        let schema = schema_from_json();
        schema.validate().unwrap();
        let todos = schema.model("world", "todos").unwrap();
        assert_eq!(todos.get_field("done").unwrap().field_type, FieldType::Bool);
    }

    fn schema_from_json() -> Schema {
        serde_json::from_value(json!({
            "world": {
                "todos": {
                    "fields": [
                        {"name": "id", "type": "string"},
                        {"name": "done", "type": "bool"}
                    ]
                }
            }
        }))
        .unwrap()
    }
}
