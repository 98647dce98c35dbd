//! Attribute schema: the declared name and type of every attribute column.

use crate::document::AttributeValue;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Declared type of an attribute column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttributeType {
    Number,
    Text,
    Timestamp,
    Enum { variants: BTreeSet<String> },
}

impl AttributeType {
    pub fn name(&self) -> &'static str {
        match self {
            AttributeType::Number => "number",
            AttributeType::Text => "text",
            AttributeType::Timestamp => "timestamp",
            AttributeType::Enum { .. } => "enum",
        }
    }

    /// Enum columns only support equality and membership.
    pub fn is_ordered(&self) -> bool {
        !matches!(self, AttributeType::Enum { .. })
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Attribute columns of a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSchema {
    fields: BTreeMap<String, AttributeType>,
}

impl AttributeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn number(self, name: impl Into<String>) -> Self {
        self.field(name, AttributeType::Number)
    }

    pub fn text(self, name: impl Into<String>) -> Self {
        self.field(name, AttributeType::Text)
    }

    pub fn timestamp(self, name: impl Into<String>) -> Self {
        self.field(name, AttributeType::Timestamp)
    }

    pub fn enumeration<I, S>(self, name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let variants = variants.into_iter().map(Into::into).collect();
        self.field(name, AttributeType::Enum { variants })
    }

    pub fn field(mut self, name: impl Into<String>, ty: AttributeType) -> Self {
        self.fields.insert(name.into(), ty);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeType> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &AttributeType)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Rejects empty names and enums without variants.
    pub fn validate(&self) -> Result<()> {
        for (name, ty) in &self.fields {
            if name.is_empty() {
                return Err(Error::InvalidConfig("attribute name must not be empty".into()));
            }
            if let AttributeType::Enum { variants } = ty {
                if variants.is_empty() {
                    return Err(Error::InvalidConfig(format!(
                        "enum field '{name}' declares no variants"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Type of `name`, or `UnknownField`.
    pub fn require(&self, name: &str) -> Result<&AttributeType> {
        self.fields
            .get(name)
            .ok_or_else(|| Error::UnknownField(name.to_string()))
    }

    /// Checks a stored value against its column type. Text is accepted for enum
    /// columns and converted to [`AttributeValue::Enum`].
    pub fn coerce(&self, name: &str, value: AttributeValue) -> Result<AttributeValue> {
        let ty = self.require(name)?;
        let value = coerce_literal(name, ty, value)?;
        if let (AttributeType::Enum { variants }, AttributeValue::Enum(v)) = (ty, &value) {
            if !variants.contains(v) {
                return Err(Error::InvalidEnumValue {
                    field: name.to_string(),
                    value: v.clone(),
                });
            }
        }
        Ok(value)
    }

    /// Validates and coerces a full attribute map.
    pub fn coerce_all(
        &self,
        attributes: BTreeMap<String, AttributeValue>,
    ) -> Result<BTreeMap<String, AttributeValue>> {
        attributes
            .into_iter()
            .map(|(name, value)| {
                let value = self.coerce(&name, value)?;
                Ok((name, value))
            })
            .collect()
    }
}

/// Type-checks a value for a column without the enum-variant check, so predicates
/// may name values that no document can hold.
pub(crate) fn coerce_literal(
    name: &str,
    ty: &AttributeType,
    value: AttributeValue,
) -> Result<AttributeValue> {
    let mismatch = |v: &AttributeValue| Error::TypeMismatch {
        field: name.to_string(),
        expected: ty.name().to_string(),
        actual: v.type_name().to_string(),
    };
    match (ty, value) {
        (AttributeType::Number, AttributeValue::Number(n)) => {
            if n.is_finite() {
                Ok(AttributeValue::Number(n))
            } else {
                Err(Error::TypeMismatch {
                    field: name.to_string(),
                    expected: "finite number".into(),
                    actual: n.to_string(),
                })
            }
        }
        (AttributeType::Text, v @ AttributeValue::Text(_)) => Ok(v),
        (AttributeType::Timestamp, v @ AttributeValue::Timestamp(_)) => Ok(v),
        (AttributeType::Enum { .. }, AttributeValue::Text(s) | AttributeValue::Enum(s)) => {
            Ok(AttributeValue::Enum(s))
        }
        (_, v) => Err(mismatch(&v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn schema() -> AttributeSchema {
        AttributeSchema::new()
            .number("price")
            .text("title")
            .timestamp("published")
            .enumeration("category", ["ai", "db", "web"])
    }

    #[test]
    fn test_coerce_accepts_declared_types() {
        let s = schema();
        assert_eq!(
            s.coerce("price", AttributeValue::Number(9.0)).unwrap(),
            AttributeValue::Number(9.0)
        );
        assert_eq!(
            s.coerce("category", AttributeValue::Text("ai".into())).unwrap(),
            AttributeValue::Enum("ai".into())
        );
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert!(s.coerce("published", AttributeValue::Timestamp(t)).is_ok());
    }

    #[test]
    fn test_coerce_rejects() {
        let s = schema();
        assert_eq!(
            s.coerce("color", AttributeValue::Text("red".into())),
            Err(Error::UnknownField("color".into()))
        );
        assert!(matches!(
            s.coerce("price", AttributeValue::Text("cheap".into())),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            s.coerce("category", AttributeValue::Text("music".into())),
            Err(Error::InvalidEnumValue { .. })
        ));
        assert!(s.coerce("price", AttributeValue::Number(f64::NAN)).is_err());
    }

    #[test]
    fn test_validate_schema() {
        assert!(schema().validate().is_ok());
        let empty_enum = AttributeSchema::new().enumeration("kind", Vec::<String>::new());
        assert!(empty_enum.validate().is_err());
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(schema()).unwrap();
        assert_eq!(json["fields"]["price"]["type"], "number");
        assert_eq!(json["fields"]["category"]["variants"][0], "ai");
    }
}
