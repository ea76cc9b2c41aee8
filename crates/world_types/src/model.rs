//! Compile-time models
//!
//! `#[derive(Model)]` implements these traits for a struct so the same type
//! both contributes its definition to a `Schema` and receives decoded rows.

use std::collections::BTreeMap;

use crate::{FieldType, FromValue, ModelDef, Value, ValueError};

/// A Rust type with a schema field type
pub trait SchemaType {
    fn field_type() -> FieldType;

    /// Whether the field may be absent
    fn is_optional() -> bool {
        false
    }
}

/// A model addressable as `NAMESPACE::NAME`
pub trait Model: SchemaType + FromValue {
    const NAMESPACE: &'static str;
    const NAME: &'static str;

    /// The model's field list
    fn definition() -> ModelDef;

    /// Build an instance from decoded fields
    fn from_fields(fields: &BTreeMap<String, Value>) -> Result<Self, ValueError>;
}

macro_rules! schema_type {
    ($field_type:expr => $($ty:ty),*) => {
        $(
            impl SchemaType for $ty {
                fn field_type() -> FieldType {
                    $field_type
                }
            }
        )*
    };
}

schema_type!(FieldType::String => String);
schema_type!(FieldType::Bool => bool);
schema_type!(FieldType::Int => i8, i16, i32, i64);
schema_type!(FieldType::UInt => u8, u16, u32, u64);
schema_type!(FieldType::Float => f32, f64);

impl<T: SchemaType> SchemaType for Vec<T> {
    fn field_type() -> FieldType {
        FieldType::Array {
            element: Box::new(T::field_type()),
        }
    }
}

impl<T: SchemaType> SchemaType for Option<T> {
    fn field_type() -> FieldType {
        T::field_type()
    }

    fn is_optional() -> bool {
        true
    }
}
