//! Query Compiler
//!
//! A `Query` is either a nested selection (namespace → model → optional
//! `where`) or a flat list of entity ids. Compilation validates the selection
//! against the schema and produces exactly one `QueryDescriptor`, which is
//! what the backend understands. Ordered maps are used throughout, so the
//! same query always compiles to the same descriptor.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use world_types::{model_key, Schema};

use crate::{compile_where, Clause, SdkError, SdkResult, WhereClause};

/// JSON key of the identifier form
pub const ENTITY_IDS_KEY: &str = "entityIds";

/// JSON key holding per-model options (`{"$": {"where": ...}}`)
pub const MODEL_OPTIONS_KEY: &str = "$";

// ─────────────────────────────────────────────────────────────────────────────
// Query
// ─────────────────────────────────────────────────────────────────────────────

/// Models selected per namespace, each with an optional filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    namespaces: BTreeMap<String, BTreeMap<String, Option<WhereClause>>>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select every entity of a model
    pub fn model(mut self, namespace: impl Into<String>, model: impl Into<String>) -> Self {
        self.namespaces
            .entry(namespace.into())
            .or_default()
            .insert(model.into(), None);
        self
    }

    /// Select the entities of a model matching a `where` clause
    pub fn model_where(
        mut self,
        namespace: impl Into<String>,
        model: impl Into<String>,
        clause: WhereClause,
    ) -> Self {
        self.namespaces
            .entry(namespace.into())
            .or_default()
            .insert(model.into(), Some(clause));
        self
    }

    /// Mention a namespace without selecting any of its models
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.entry(namespace.into()).or_default();
        self
    }

    /// Check if no model is selected
    pub fn is_empty(&self) -> bool {
        self.namespaces.values().all(BTreeMap::is_empty)
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, Option<WhereClause>>)> {
        self.namespaces.iter().map(|(ns, models)| (ns.as_str(), models))
    }
}

/// What the caller wants to read
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Nested namespace → model → filter selection
    Entities(Selection),
    /// Precomputed entity identifiers
    EntityIds(Vec<String>),
}

impl Default for Query {
    fn default() -> Self {
        Query::Entities(Selection::new())
    }
}

impl From<Selection> for Query {
    fn from(selection: Selection) -> Self {
        Query::Entities(selection)
    }
}

impl Query {
    /// Query by entity identifiers
    pub fn entity_ids<S: Into<String>>(ids: impl IntoIterator<Item = S>) -> Self {
        Query::EntityIds(ids.into_iter().map(Into::into).collect())
    }

    /// Parse the JSON query surface
    ///
    /// `{"entityIds": [..]}` is the identifier form, anything else is read as
    /// `{namespace: {model: {"$": {"where": {...}}}}}`. Mixing both is
    /// rejected.
    pub fn from_json(json: &JsonValue) -> SdkResult<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| SdkError::shape("query must be an object"))?;

        if let Some(ids) = obj.get(ENTITY_IDS_KEY) {
            if obj.len() > 1 {
                return Err(SdkError::shape(
                    "query cannot combine `entityIds` with a namespace selection",
                ));
            }
            let ids = ids
                .as_array()
                .ok_or_else(|| SdkError::shape("`entityIds` must be an array"))?
                .iter()
                .map(|id| {
                    id.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| SdkError::shape(format!("entity id must be a string, got {id}")))
                })
                .collect::<SdkResult<Vec<_>>>()?;
            return Ok(Query::EntityIds(ids));
        }

        let mut selection = Selection::new();
        for (namespace, models) in obj {
            let models = models.as_object().ok_or_else(|| {
                SdkError::shape(format!("namespace `{namespace}` must map model names to options"))
            })?;
            selection = selection.namespace(namespace.clone());
            for (model, options) in models {
                selection = match parse_model_options(namespace, model, options)? {
                    Some(clause) => selection.model_where(namespace.clone(), model.clone(), clause),
                    None => selection.model(namespace.clone(), model.clone()),
                };
            }
        }
        Ok(Query::Entities(selection))
    }
}

fn parse_model_options(namespace: &str, model: &str, options: &JsonValue) -> SdkResult<Option<WhereClause>> {
    let key = model_key(namespace, model);
    let options = options
        .as_object()
        .ok_or_else(|| SdkError::shape(format!("options of `{key}` must be an object")))?;

    if let Some(extra) = options.keys().find(|k| *k != MODEL_OPTIONS_KEY) {
        return Err(SdkError::shape(format!("unexpected key `{extra}` under `{key}`")));
    }
    let Some(dollar) = options.get(MODEL_OPTIONS_KEY) else {
        return Ok(None);
    };
    let dollar = dollar
        .as_object()
        .ok_or_else(|| SdkError::shape(format!("`$` of `{key}` must be an object")))?;
    if let Some(extra) = dollar.keys().find(|k| *k != "where") {
        return Err(SdkError::shape(format!("unexpected option `{extra}` under `{key}`")));
    }
    dollar.get("where").map(WhereClause::from_json).transpose()
}

impl TryFrom<JsonValue> for Query {
    type Error = SdkError;

    fn try_from(json: JsonValue) -> Result<Self, Self::Error> {
        Query::from_json(&json)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Query Descriptor
// ─────────────────────────────────────────────────────────────────────────────

/// One selected model and its compiled filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelQuery {
    pub namespace: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clause: Option<Clause>,
}

impl ModelQuery {
    /// The `namespace::model` key rows are returned under
    pub fn key(&self) -> String {
        model_key(&self.namespace, &self.model)
    }
}

/// Backend-addressable form of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum QueryDescriptor {
    Structured { models: Vec<ModelQuery> },
    Keys { entity_ids: Vec<String> },
}

impl QueryDescriptor {
    /// Check if the descriptor can never match anything
    pub fn is_empty(&self) -> bool {
        match self {
            QueryDescriptor::Structured { models } => models.is_empty(),
            QueryDescriptor::Keys { entity_ids } => entity_ids.is_empty(),
        }
    }

    /// Find the selected model stored under a key
    pub fn model_query(&self, key: &str) -> Option<&ModelQuery> {
        match self {
            QueryDescriptor::Structured { models } => models.iter().find(|m| m.key() == key),
            QueryDescriptor::Keys { .. } => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Query Compiler
// ─────────────────────────────────────────────────────────────────────────────

/// Compiles queries against one schema
#[derive(Debug, Clone)]
pub struct QueryCompiler {
    schema: Arc<Schema>,
}

impl QueryCompiler {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Compile a query into a descriptor
    pub fn compile(&self, query: &Query) -> SdkResult<QueryDescriptor> {
        let descriptor = match query {
            Query::EntityIds(ids) => {
                let mut seen = BTreeSet::new();
                let entity_ids = ids
                    .iter()
                    .filter(|id| seen.insert(id.as_str()))
                    .cloned()
                    .collect();
                QueryDescriptor::Keys { entity_ids }
            }
            Query::Entities(selection) => self.compile_selection(selection)?,
        };

        tracing::debug!(descriptor = ?descriptor, "Compiled query");
        Ok(descriptor)
    }

    fn compile_selection(&self, selection: &Selection) -> SdkResult<QueryDescriptor> {
        let mut models = Vec::new();
        for (namespace, selected) in selection.iter() {
            if !self.schema.contains_namespace(namespace) {
                return Err(SdkError::shape(format!("unknown namespace `{namespace}`")));
            }
            for (model, clause) in selected {
                let key = model_key(namespace, model);
                let def = self
                    .schema
                    .model(namespace, model)
                    .ok_or_else(|| SdkError::shape(format!("unknown model `{key}`")))?;
                let clause = match clause {
                    Some(clause) => compile_where(&key, def, clause)?,
                    None => None,
                };
                models.push(ModelQuery {
                    namespace: namespace.to_string(),
                    model: model.clone(),
                    clause,
                });
            }
        }
        Ok(QueryDescriptor::Structured { models })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
