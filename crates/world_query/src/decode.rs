//! Result Decoder
//!
//! The backend returns loosely typed rows grouped by key: `namespace::model`
//! for structured descriptors, the entity id for identifier descriptors. The
//! decoder coerces every declared field against the schema and rebuilds the
//! shape the caller asked for. A single bad field fails the whole result.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use world_types::{split_model_key, CoerceError, Model, ModelDef, Schema, Value, ValueError};

use crate::{DecodeError, QueryDescriptor};

// ─────────────────────────────────────────────────────────────────────────────
// Raw Payload
// ─────────────────────────────────────────────────────────────────────────────

/// One row as the backend sends it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    /// `namespace::model` of the row (set for identifier queries)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub fields: Map<String, JsonValue>,
}

impl RawRow {
    pub fn new(fields: Map<String, JsonValue>) -> Self {
        Self { model: None, fields }
    }

    /// A row tagged with the model it belongs to
    pub fn for_model(model: impl Into<String>, fields: Map<String, JsonValue>) -> Self {
        Self {
            model: Some(model.into()),
            fields,
        }
    }
}

/// Rows keyed by model key or entity id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawPayload {
    rows: BTreeMap<String, Vec<RawRow>>,
}

impl RawPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rows under a key (an empty vec is an explicit empty set)
    pub fn insert(&mut self, key: impl Into<String>, rows: Vec<RawRow>) {
        self.rows.insert(key.into(), rows);
    }

    /// Append one row under a key
    pub fn push(&mut self, key: impl Into<String>, row: RawRow) {
        self.rows.entry(key.into()).or_default().push(row);
    }

    pub fn get(&self, key: &str) -> Option<&[RawRow]> {
        self.rows.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[RawRow])> {
        self.rows.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoded Result
// ─────────────────────────────────────────────────────────────────────────────

/// One decoded row: every declared field, schema-typed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }

    /// Convert into a compile-time model
    pub fn to_model<T: Model>(&self) -> Result<T, ValueError> {
        T::from_fields(&self.fields)
    }

    /// Encode back into the raw form a backend would send
    pub fn to_raw(&self) -> Map<String, JsonValue> {
        self.fields
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), JsonValue::from(v.clone())))
            .collect()
    }
}

/// Decoded result, shaped like the query that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryResult {
    /// namespace → model → records, in backend order
    Models(BTreeMap<String, BTreeMap<String, Vec<Record>>>),
    /// entity id → model key → record
    Entities(BTreeMap<String, BTreeMap<String, Record>>),
}

impl QueryResult {
    /// Check if the result holds no records
    pub fn is_empty(&self) -> bool {
        match self {
            QueryResult::Models(namespaces) => namespaces
                .values()
                .flat_map(BTreeMap::values)
                .all(Vec::is_empty),
            QueryResult::Entities(entities) => entities.is_empty(),
        }
    }

    /// Records of one model (structured results only)
    pub fn model(&self, namespace: &str, model: &str) -> Option<&[Record]> {
        match self {
            QueryResult::Models(namespaces) => namespaces
                .get(namespace)?
                .get(model)
                .map(Vec::as_slice),
            QueryResult::Entities(_) => None,
        }
    }

    /// Models of one entity (identifier results only)
    pub fn entity(&self, id: &str) -> Option<&BTreeMap<String, Record>> {
        match self {
            QueryResult::Models(_) => None,
            QueryResult::Entities(entities) => entities.get(id),
        }
    }

    /// Every record of model `T`, converted
    pub fn models<T: Model>(&self) -> Result<Vec<T>, ValueError> {
        match self {
            QueryResult::Models(_) => self
                .model(T::NAMESPACE, T::NAME)
                .unwrap_or_default()
                .iter()
                .map(Record::to_model)
                .collect(),
            QueryResult::Entities(entities) => {
                let key = world_types::model_key(T::NAMESPACE, T::NAME);
                entities
                    .values()
                    .filter_map(|models| models.get(&key))
                    .map(Record::to_model)
                    .collect()
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Decoder
// ─────────────────────────────────────────────────────────────────────────────

/// Decodes raw payloads against one schema
#[derive(Debug, Clone)]
pub struct ResultDecoder {
    schema: Arc<Schema>,
}

impl ResultDecoder {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    /// Rebuild the result shape for a descriptor from a raw payload
    pub fn decode(
        &self,
        descriptor: &QueryDescriptor,
        payload: &RawPayload,
    ) -> Result<QueryResult, DecodeError> {
        match descriptor {
            QueryDescriptor::Structured { models } => {
                let mut out: BTreeMap<String, BTreeMap<String, Vec<Record>>> = BTreeMap::new();
                for selected in models {
                    let key = selected.key();
                    let Some(rows) = payload.get(&key) else {
                        continue;
                    };
                    let Some(def) = self.schema.model(&selected.namespace, &selected.model) else {
                        continue;
                    };
                    let records = rows
                        .iter()
                        .map(|row| decode_row(&key, def, &row.fields))
                        .collect::<Result<Vec<_>, _>>()?;
                    out.entry(selected.namespace.clone())
                        .or_default()
                        .insert(selected.model.clone(), records);
                }
                Ok(QueryResult::Models(out))
            }
            QueryDescriptor::Keys { entity_ids } => {
                let mut out: BTreeMap<String, BTreeMap<String, Record>> = BTreeMap::new();
                for id in entity_ids {
                    let Some(rows) = payload.get(id) else {
                        continue;
                    };
                    for row in rows {
                        let Some((key, def)) = row
                            .model
                            .as_deref()
                            .and_then(|key| Some((key, self.schema.model_by_key(key)?)))
                        else {
                            tracing::debug!(entity_id = %id, model = ?row.model, "Dropping row of unknown model");
                            continue;
                        };
                        let record = decode_row(key, def, &row.fields)?;
                        out.entry(id.clone()).or_default().insert(key.to_string(), record);
                    }
                }
                Ok(QueryResult::Entities(out))
            }
        }
    }

    /// Decode a single row of a known model
    pub fn decode_model_row(
        &self,
        key: &str,
        raw: &Map<String, JsonValue>,
    ) -> Option<Result<Record, DecodeError>> {
        let (namespace, model) = split_model_key(key)?;
        let def = self.schema.model(namespace, model)?;
        Some(decode_row(key, def, raw))
    }
}

fn decode_row(model: &str, def: &ModelDef, raw: &Map<String, JsonValue>) -> Result<Record, DecodeError> {
    let mut fields = BTreeMap::new();
    for field in &def.fields {
        let value = field.coerce(raw.get(&field.name)).map_err(|reason| match reason {
            CoerceError::MissingField(_) => DecodeError::MissingField {
                model: model.to_string(),
                field: field.name.clone(),
            },
            reason => DecodeError::Field {
                model: model.to_string(),
                field: field.name.clone(),
                raw: raw.get(&field.name).map(JsonValue::to_string).unwrap_or_default(),
                reason,
            },
        })?;
        fields.insert(field.name.clone(), value);
    }
    Ok(Record { fields })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
