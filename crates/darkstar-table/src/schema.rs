//! Table schemas.
//!
//! A schema is fixed when the table is created. There is no implicit
//! migration: a record either satisfies the schema it is written under or
//! the write is rejected.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use darkstar_types::{FieldMap, FieldType, Value};

use crate::error::SchemaError;

/// Declaration of a single field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub field_type: FieldType,
    pub required: bool,
    /// Filled in for an absent optional field on write.
    pub default: Option<Value>,
}

/// Field declarations bound to a table name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    name: String,
    primary_key_field: String,
    fields: BTreeMap<String, FieldSpec>,
}

impl Schema {
    /// Start a schema whose records are keyed by the string field
    /// `primary_key_field`.
    pub fn builder(name: impl Into<String>, primary_key_field: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name.into(), primary_key_field.into())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key_field(&self) -> &str {
        &self.primary_key_field
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Check required fields, types, and unknown fields.
    pub fn validate(&self, fields: &FieldMap) -> Result<(), SchemaError> {
        for (name, spec) in &self.fields {
            if spec.required && !fields.contains_key(name) {
                return Err(SchemaError::MissingField {
                    field: name.clone(),
                });
            }
        }
        for (name, value) in fields {
            let spec = self
                .fields
                .get(name)
                .ok_or_else(|| SchemaError::UnknownField {
                    field: name.clone(),
                })?;
            if !spec.field_type.accepts(value) {
                return Err(SchemaError::TypeMismatch {
                    field: name.clone(),
                    expected: spec.field_type.clone(),
                    actual: value.field_type(),
                });
            }
        }
        Ok(())
    }

    /// Fill absent optional fields that declare a default.
    pub fn apply_defaults(&self, fields: &mut FieldMap) {
        for (name, spec) in &self.fields {
            if let Some(default) = &spec.default {
                fields
                    .entry(name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
    }
}

/// Builder for [`Schema`].
///
/// Definition errors (duplicate fields, a default of the wrong type) are
/// collected and reported by [`build`](Self::build).
#[derive(Debug)]
pub struct SchemaBuilder {
    schema: Schema,
    error: Option<SchemaError>,
}

impl SchemaBuilder {
    fn new(name: String, primary_key_field: String) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(
            primary_key_field.clone(),
            FieldSpec {
                field_type: FieldType::String,
                required: true,
                default: None,
            },
        );
        let error = if name.is_empty() {
            Some(SchemaError::InvalidSchema("table name must not be empty".into()))
        } else if primary_key_field.is_empty() {
            Some(SchemaError::InvalidSchema("primary key field must not be empty".into()))
        } else {
            None
        };
        Self {
            schema: Schema {
                name,
                primary_key_field,
                fields,
            },
            error,
        }
    }

    /// Declare a required field.
    pub fn field(self, name: &str, field_type: FieldType) -> Self {
        self.declare(name, FieldSpec {
            field_type,
            required: true,
            default: None,
        })
    }

    /// Declare an optional (nullable) field with no default.
    pub fn optional(self, name: &str, field_type: FieldType) -> Self {
        self.declare(name, FieldSpec {
            field_type,
            required: false,
            default: None,
        })
    }

    /// Declare an optional field filled with `default` when absent.
    pub fn with_default(self, name: &str, field_type: FieldType, default: Value) -> Self {
        self.declare(name, FieldSpec {
            field_type,
            required: false,
            default: Some(default),
        })
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.schema),
        }
    }

    fn declare(mut self, name: &str, spec: FieldSpec) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Some(default) = &spec.default {
            if !spec.field_type.accepts(default) {
                self.error = Some(SchemaError::InvalidSchema(format!(
                    "default for {name} is not a {}",
                    spec.field_type
                )));
                return self;
            }
        }
        if self.schema.fields.contains_key(name) {
            self.error = Some(SchemaError::InvalidSchema(format!(
                "field {name} declared twice"
            )));
            return self;
        }
        self.schema.fields.insert(name.to_string(), spec);
        self
    }
}
