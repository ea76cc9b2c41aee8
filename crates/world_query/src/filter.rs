//! Filter Predicate Compiler
//!
//! A `where` clause maps field names to operator/operand pairs. Compilation
//! checks every operator against the declared field type, coerces operands
//! with the same rules the decoder applies to backend rows, and produces a
//! backend-neutral predicate tree. Everything combines with AND.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use world_types::{FieldDef, FieldType, ModelDef, Value};

use crate::{SdkError, SdkResult};

// ─────────────────────────────────────────────────────────────────────────────
// Operator
// ─────────────────────────────────────────────────────────────────────────────

/// Comparison operator of a filter clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "$eq")]
    Eq,
    #[serde(rename = "$neq")]
    Neq,
    #[serde(rename = "$gt")]
    Gt,
    #[serde(rename = "$gte")]
    Gte,
    #[serde(rename = "$lt")]
    Lt,
    #[serde(rename = "$lte")]
    Lte,
    #[serde(rename = "$in")]
    In,
    #[serde(rename = "$nin")]
    NotIn,
    #[serde(rename = "$contains")]
    Contains,
}

impl Operator {
    pub const ALL: [Operator; 9] = [
        Operator::Eq,
        Operator::Neq,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::In,
        Operator::NotIn,
        Operator::Contains,
    ];

    /// The `$`-prefixed symbol used in queries
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Neq => "$neq",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::In => "$in",
            Operator::NotIn => "$nin",
            Operator::Contains => "$contains",
        }
    }

    /// Parse an operator symbol
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == symbol)
    }

    /// Whether the operand is a list of values
    pub fn takes_list(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    /// Check that this operator can be applied to a field of the given type
    pub fn check(&self, field_type: &FieldType) -> Result<(), String> {
        let ok = match self {
            Operator::Contains => field_type.is_text(),
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => field_type.is_numeric(),
            Operator::Eq | Operator::Neq | Operator::In | Operator::NotIn => field_type.is_scalar(),
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "operator {} is not applicable to {} fields",
                self.symbol(),
                field_type.name()
            ))
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Operator {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_symbol(s).ok_or_else(|| SdkError::shape(format!("unknown operator `{s}`")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Filter Clauses (input)
// ─────────────────────────────────────────────────────────────────────────────

/// Operators applied to one field, combined with AND
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldFilter {
    conditions: BTreeMap<Operator, JsonValue>,
}

impl FieldFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition, replacing any previous operand for the same operator
    pub fn with(mut self, operator: Operator, operand: impl Into<JsonValue>) -> Self {
        self.conditions.insert(operator, operand.into());
        self
    }

    pub fn eq(self, operand: impl Into<JsonValue>) -> Self {
        self.with(Operator::Eq, operand)
    }

    pub fn neq(self, operand: impl Into<JsonValue>) -> Self {
        self.with(Operator::Neq, operand)
    }

    pub fn gt(self, operand: impl Into<JsonValue>) -> Self {
        self.with(Operator::Gt, operand)
    }

    pub fn gte(self, operand: impl Into<JsonValue>) -> Self {
        self.with(Operator::Gte, operand)
    }

    pub fn lt(self, operand: impl Into<JsonValue>) -> Self {
        self.with(Operator::Lt, operand)
    }

    pub fn lte(self, operand: impl Into<JsonValue>) -> Self {
        self.with(Operator::Lte, operand)
    }

    pub fn is_in<T: Into<JsonValue>>(self, operands: impl IntoIterator<Item = T>) -> Self {
        let list: Vec<JsonValue> = operands.into_iter().map(Into::into).collect();
        self.with(Operator::In, list)
    }

    pub fn not_in<T: Into<JsonValue>>(self, operands: impl IntoIterator<Item = T>) -> Self {
        let list: Vec<JsonValue> = operands.into_iter().map(Into::into).collect();
        self.with(Operator::NotIn, list)
    }

    pub fn contains(self, operand: impl Into<String>) -> Self {
        self.with(Operator::Contains, operand.into())
    }

    pub fn conditions(&self) -> impl Iterator<Item = (Operator, &JsonValue)> {
        self.conditions.iter().map(|(op, v)| (*op, v))
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Parse `{"$eq": .., "$gt": ..}`
    pub fn from_json(field: &str, json: &JsonValue) -> SdkResult<Self> {
        let obj = json.as_object().ok_or_else(|| {
            SdkError::shape(format!("filter on `{field}` must be an object of operators"))
        })?;
        let mut filter = Self::new();
        for (symbol, operand) in obj {
            filter = filter.with(symbol.parse()?, operand.clone());
        }
        Ok(filter)
    }
}

/// A `where` clause: field name → conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    fields: BTreeMap<String, FieldFilter>,
}

impl WhereClause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add conditions for a field
    pub fn field(mut self, name: impl Into<String>, filter: FieldFilter) -> Self {
        self.fields.insert(name.into(), filter);
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldFilter)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse `{"done": {"$eq": false}, ...}`
    pub fn from_json(json: &JsonValue) -> SdkResult<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| SdkError::shape("`where` must be an object"))?;
        let mut clause = Self::new();
        for (field, filter) in obj {
            clause = clause.field(field.clone(), FieldFilter::from_json(field, filter)?);
        }
        Ok(clause)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Predicate Tree (output)
// ─────────────────────────────────────────────────────────────────────────────

/// One compiled comparison with a schema-typed operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub operator: Operator,
    pub operand: Value,
}

/// Backend-neutral predicate tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clause {
    Member(Predicate),
    And(Vec<Clause>),
}

impl Predicate {
    /// Evaluate against a field value (absent fields evaluate as null)
    pub fn matches(&self, value: Option<&Value>) -> bool {
        let value = value.unwrap_or(&Value::Null);
        let equals = |operand: &Value| value.compare(operand) == Some(std::cmp::Ordering::Equal);
        let ordering = value.compare(&self.operand);

        match self.operator {
            Operator::Eq => equals(&self.operand),
            Operator::Neq => !equals(&self.operand),
            Operator::Gt => ordering.is_some_and(|o| o.is_gt()),
            Operator::Gte => ordering.is_some_and(|o| o.is_ge()),
            Operator::Lt => ordering.is_some_and(|o| o.is_lt()),
            Operator::Lte => ordering.is_some_and(|o| o.is_le()),
            Operator::In => self.operand.as_array().is_some_and(|list| list.iter().any(equals)),
            Operator::NotIn => !self.operand.as_array().is_some_and(|list| list.iter().any(equals)),
            Operator::Contains => match (value, &self.operand) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle),
                _ => false,
            },
        }
    }
}

impl Clause {
    /// Evaluate against the decoded fields of one row
    pub fn matches(&self, fields: &BTreeMap<String, Value>) -> bool {
        match self {
            Clause::Member(p) => p.matches(fields.get(&p.field)),
            Clause::And(clauses) => clauses.iter().all(|c| c.matches(fields)),
        }
    }

    /// All predicates in the tree, depth first
    pub fn predicates(&self) -> Vec<&Predicate> {
        match self {
            Clause::Member(p) => vec![p],
            Clause::And(clauses) => clauses.iter().flat_map(Clause::predicates).collect(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Compilation
// ─────────────────────────────────────────────────────────────────────────────

/// Compile the conditions on one field into predicates
pub fn compile_field(field: &FieldDef, filter: &FieldFilter) -> SdkResult<Vec<Predicate>> {
    filter
        .conditions()
        .map(|(operator, operand)| {
            operator
                .check(&field.field_type)
                .map_err(|reason| SdkError::mismatch(&field.name, reason))?;

            let operand = if operator.takes_list() {
                let items = operand.as_array().ok_or_else(|| {
                    SdkError::mismatch(&field.name, format!("{operator} expects an array operand"))
                })?;
                let values = items
                    .iter()
                    .map(|item| coerce_operand(field, operator, item))
                    .collect::<SdkResult<Vec<_>>>()?;
                Value::Array(values)
            } else {
                coerce_operand(field, operator, operand)?
            };

            Ok(Predicate {
                field: field.name.clone(),
                operator,
                operand,
            })
        })
        .collect()
}

fn coerce_operand(field: &FieldDef, operator: Operator, raw: &JsonValue) -> SdkResult<Value> {
    // Optional fields can be compared against null
    if raw.is_null() && field.optional && !matches!(operator, Operator::Contains) {
        return Ok(Value::Null);
    }
    field
        .field_type
        .coerce(raw)
        .map_err(|e| SdkError::mismatch(&field.name, format!("{operator} operand: {e}")))
}

/// Compile a `where` clause against a model definition
///
/// Returns `None` when the clause has no conditions (the model is selected
/// unfiltered).
pub fn compile_where(model: &str, def: &ModelDef, clause: &WhereClause) -> SdkResult<Option<Clause>> {
    let mut members = Vec::new();
    for (name, filter) in clause.fields() {
        let field = def
            .get_field(name)
            .ok_or_else(|| SdkError::shape(format!("unknown field `{name}` in model `{model}`")))?;
        members.extend(compile_field(field, filter)?.into_iter().map(Clause::Member));
    }

    Ok(match members.len() {
        0 => None,
        1 => members.pop(),
        _ => Some(Clause::And(members)),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
