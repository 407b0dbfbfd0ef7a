//! Typed field accessors.
//!
//! Domain tables decode their records through these instead of matching on
//! [`Value`] by hand. A missing or mistyped field comes back as a
//! [`SchemaError`], which for a record that passed validation on write means
//! the stored data does not match the code reading it.

use darkstar_types::{FieldMap, FieldType, Timestamp, Value};

use crate::error::SchemaError;

/// Typed reads over a record's fields.
pub trait FieldAccess {
    /// The raw value of a required field.
    fn require(&self, name: &str) -> Result<&Value, SchemaError>;

    /// The raw value of an optional field.
    fn optional(&self, name: &str) -> Option<&Value>;

    fn require_str(&self, name: &str) -> Result<&str, SchemaError> {
        let value = self.require(name)?;
        value.as_str().ok_or_else(|| mismatch(name, FieldType::String, value))
    }

    fn require_i64(&self, name: &str) -> Result<i64, SchemaError> {
        let value = self.require(name)?;
        value.as_i64().ok_or_else(|| mismatch(name, FieldType::Integer, value))
    }

    fn require_bool(&self, name: &str) -> Result<bool, SchemaError> {
        let value = self.require(name)?;
        value.as_bool().ok_or_else(|| mismatch(name, FieldType::Boolean, value))
    }

    fn require_timestamp(&self, name: &str) -> Result<Timestamp, SchemaError> {
        let value = self.require(name)?;
        value
            .as_timestamp()
            .ok_or_else(|| mismatch(name, FieldType::Timestamp, value))
    }

    fn opt_str(&self, name: &str) -> Result<Option<&str>, SchemaError> {
        self.optional(name)
            .map(|v| v.as_str().ok_or_else(|| mismatch(name, FieldType::String, v)))
            .transpose()
    }

    fn opt_i64(&self, name: &str) -> Result<Option<i64>, SchemaError> {
        self.optional(name)
            .map(|v| v.as_i64().ok_or_else(|| mismatch(name, FieldType::Integer, v)))
            .transpose()
    }

    fn opt_timestamp(&self, name: &str) -> Result<Option<Timestamp>, SchemaError> {
        self.optional(name)
            .map(|v| {
                v.as_timestamp()
                    .ok_or_else(|| mismatch(name, FieldType::Timestamp, v))
            })
            .transpose()
    }
}

impl FieldAccess for FieldMap {
    fn require(&self, name: &str) -> Result<&Value, SchemaError> {
        self.get(name).ok_or_else(|| SchemaError::MissingField {
            field: name.to_string(),
        })
    }

    fn optional(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

fn mismatch(name: &str, expected: FieldType, found: &Value) -> SchemaError {
    SchemaError::TypeMismatch {
        field: name.to_string(),
        expected,
        actual: found.field_type(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> FieldMap {
        let mut f = FieldMap::new();
        f.insert("name".into(), Value::from("ore"));
        f.insert("qty".into(), Value::Integer(3));
        f.insert("open".into(), Value::Boolean(true));
        f.insert("at".into(), Value::Timestamp(Timestamp::from_millis(500)));
        f
    }

    #[test]
    fn required_reads() {
        let f = fields();
        assert_eq!(f.require_str("name").unwrap(), "ore");
        assert_eq!(f.require_i64("qty").unwrap(), 3);
        assert!(f.require_bool("open").unwrap());
        assert_eq!(
            f.require_timestamp("at").unwrap(),
            Timestamp::from_millis(500)
        );
    }

    #[test]
    fn missing_required_field() {
        assert_eq!(
            fields().require_i64("price"),
            Err(SchemaError::MissingField {
                field: "price".into()
            })
        );
    }

    #[test]
    fn wrong_type_is_reported() {
        let err = fields().require_i64("name").unwrap_err();
        assert_eq!(
            err,
            SchemaError::TypeMismatch {
                field: "name".into(),
                expected: FieldType::Integer,
                actual: FieldType::String,
            }
        );
    }

    #[test]
    fn optional_reads() {
        let f = fields();
        assert_eq!(f.opt_str("name").unwrap(), Some("ore"));
        assert_eq!(f.opt_i64("missing").unwrap(), None);
        assert_eq!(f.opt_timestamp("missing").unwrap(), None);
        assert!(f.opt_i64("name").is_err());
    }
}
