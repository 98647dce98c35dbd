//! Typed predicate trees over attributes and metadata.
//!
//! Predicates are built with combinators, never parsed from free text:
//!
//! ```
//! use hybridsearch_core::predicate::Predicate;
//!
//! let p = Predicate::attr("price").le(50.0)
//!     .and(Predicate::attr("category").eq("ai"))
//!     .and(!Predicate::meta("format").eq("ebook"));
//! assert_eq!(p.leaf_count(), 3);
//! ```
//!
//! [`Predicate::resolve`] validates a tree against the collection schema before it
//! reaches any store. [`Predicate::matches`] is the per-document reference evaluator;
//! the stores answer the same leaves from their indexes.

use crate::config::{MAX_IN_LIST, MAX_PREDICATE_DEPTH};
use crate::document::{AttributeValue, MetadataPath, MetadataValue};
use crate::error::{Error, Result};
use crate::schema::{coerce_literal, AttributeSchema};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Comparison operator of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn is_range(&self) -> bool {
        matches!(self, CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge)
    }

    /// Applies the operator to `stored.cmp(literal)`.
    pub fn test(&self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Leaf over a schema-declared attribute column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AttributePredicate {
    Compare {
        field: String,
        cmp: CompareOp,
        value: AttributeValue,
    },
    In {
        field: String,
        values: Vec<AttributeValue>,
    },
}

/// Leaf over the metadata tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MetadataPredicate {
    /// The path resolves to any value, `null` included.
    Exists { path: MetadataPath },
    /// The document contains the given sub-document (jsonb `@>`).
    Contains { value: MetadataValue },
    Compare {
        path: MetadataPath,
        cmp: CompareOp,
        value: MetadataValue,
    },
    In {
        path: MetadataPath,
        values: Vec<MetadataValue>,
    },
}

/// Boolean combination of attribute and metadata leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Attribute(AttributePredicate),
    Metadata(MetadataPredicate),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

/// Builder for attribute leaves, see [`Predicate::attr`].
#[derive(Debug, Clone)]
pub struct AttrField(String);

/// Builder for metadata leaves, see [`Predicate::meta`].
#[derive(Debug, Clone)]
pub struct MetaField(MetadataPath);

macro_rules! compare_builders {
    ($ty:ident, $leaf:ident, $val:ty) => {
        impl $ty {
            pub fn eq(self, value: impl Into<$val>) -> Predicate {
                self.$leaf(CompareOp::Eq, value.into())
            }
            pub fn ne(self, value: impl Into<$val>) -> Predicate {
                self.$leaf(CompareOp::Ne, value.into())
            }
            pub fn lt(self, value: impl Into<$val>) -> Predicate {
                self.$leaf(CompareOp::Lt, value.into())
            }
            pub fn le(self, value: impl Into<$val>) -> Predicate {
                self.$leaf(CompareOp::Le, value.into())
            }
            pub fn gt(self, value: impl Into<$val>) -> Predicate {
                self.$leaf(CompareOp::Gt, value.into())
            }
            pub fn ge(self, value: impl Into<$val>) -> Predicate {
                self.$leaf(CompareOp::Ge, value.into())
            }
        }
    };
}

compare_builders!(AttrField, compare, AttributeValue);
compare_builders!(MetaField, compare, MetadataValue);

impl AttrField {
    fn compare(self, cmp: CompareOp, value: AttributeValue) -> Predicate {
        Predicate::Attribute(AttributePredicate::Compare {
            field: self.0,
            cmp,
            value,
        })
    }

    pub fn is_in<V, I>(self, values: I) -> Predicate
    where
        V: Into<AttributeValue>,
        I: IntoIterator<Item = V>,
    {
        Predicate::Attribute(AttributePredicate::In {
            field: self.0,
            values: values.into_iter().map(Into::into).collect(),
        })
    }
}

impl MetaField {
    fn compare(self, cmp: CompareOp, value: MetadataValue) -> Predicate {
        Predicate::Metadata(MetadataPredicate::Compare {
            path: self.0,
            cmp,
            value,
        })
    }

    pub fn is_in<V, I>(self, values: I) -> Predicate
    where
        V: Into<MetadataValue>,
        I: IntoIterator<Item = V>,
    {
        Predicate::Metadata(MetadataPredicate::In {
            path: self.0,
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn exists(self) -> Predicate {
        Predicate::Metadata(MetadataPredicate::Exists { path: self.0 })
    }
}

impl Predicate {
    /// Starts a leaf on attribute `field`.
    pub fn attr(field: impl Into<String>) -> AttrField {
        AttrField(field.into())
    }

    /// Starts a leaf on the dotted metadata `path`.
    pub fn meta(path: &str) -> MetaField {
        MetaField(MetadataPath::from_dotted(path))
    }

    /// Containment leaf: the document's metadata contains `value`, as jsonb `@>`.
    /// Inside objects, match array members with an array: `{"tags": ["sale"]}`.
    pub fn contains(value: impl Into<MetadataValue>) -> Predicate {
        Predicate::Metadata(MetadataPredicate::Contains {
            value: value.into(),
        })
    }

    /// Conjunction, flattening nested `And`s.
    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Predicate::And(mut children) => {
                children.push(other);
                Predicate::And(children)
            }
            p => Predicate::And(vec![p, other]),
        }
    }

    /// Disjunction, flattening nested `Or`s.
    pub fn or(self, other: Predicate) -> Predicate {
        match self {
            Predicate::Or(mut children) => {
                children.push(other);
                Predicate::Or(children)
            }
            p => Predicate::Or(vec![p, other]),
        }
    }

    pub fn all(children: Vec<Predicate>) -> Predicate {
        Predicate::And(children)
    }

    pub fn any(children: Vec<Predicate>) -> Predicate {
        Predicate::Or(children)
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            Predicate::Attribute(_) | Predicate::Metadata(_) => 1,
            Predicate::And(c) | Predicate::Or(c) => c.iter().map(Self::leaf_count).sum(),
            Predicate::Not(c) => c.leaf_count(),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Predicate::Attribute(_) | Predicate::Metadata(_) => 1,
            Predicate::And(c) | Predicate::Or(c) => {
                1 + c.iter().map(Self::depth).max().unwrap_or(0)
            }
            Predicate::Not(c) => 1 + c.depth(),
        }
    }

    /// `true` if any leaf reads metadata.
    pub fn has_metadata(&self) -> bool {
        match self {
            Predicate::Attribute(_) => false,
            Predicate::Metadata(_) => true,
            Predicate::And(c) | Predicate::Or(c) => c.iter().any(Self::has_metadata),
            Predicate::Not(c) => c.has_metadata(),
        }
    }

    /// Validates the tree against `schema` and returns it with literals coerced to
    /// column types. Fails on the first malformed node.
    pub fn resolve(&self, schema: &AttributeSchema) -> Result<Predicate> {
        if self.depth() > MAX_PREDICATE_DEPTH {
            return Err(Error::MalformedPredicate(format!(
                "nesting exceeds {MAX_PREDICATE_DEPTH} levels"
            )));
        }
        self.resolve_inner(schema)
    }

    fn resolve_inner(&self, schema: &AttributeSchema) -> Result<Predicate> {
        match self {
            Predicate::Attribute(leaf) => {
                Ok(Predicate::Attribute(resolve_attribute(leaf, schema)?))
            }
            Predicate::Metadata(leaf) => Ok(Predicate::Metadata(resolve_metadata(leaf)?)),
            Predicate::And(children) | Predicate::Or(children) => {
                if children.is_empty() {
                    return Err(Error::MalformedPredicate("empty boolean group".into()));
                }
                let resolved = children
                    .iter()
                    .map(|c| c.resolve_inner(schema))
                    .collect::<Result<Vec<_>>>()?;
                Ok(match self {
                    Predicate::And(_) => Predicate::And(resolved),
                    _ => Predicate::Or(resolved),
                })
            }
            Predicate::Not(child) => Ok(Predicate::Not(Box::new(child.resolve_inner(schema)?))),
        }
    }

    /// Reference evaluation against one document.
    pub fn matches(
        &self,
        attributes: &BTreeMap<String, AttributeValue>,
        metadata: &MetadataValue,
    ) -> bool {
        match self {
            Predicate::Attribute(leaf) => leaf.matches(attributes.get(leaf.field())),
            Predicate::Metadata(leaf) => leaf.matches(metadata),
            Predicate::And(c) => c.iter().all(|p| p.matches(attributes, metadata)),
            Predicate::Or(c) => c.iter().any(|p| p.matches(attributes, metadata)),
            Predicate::Not(c) => !c.matches(attributes, metadata),
        }
    }
}

impl std::ops::Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }
}

fn resolve_attribute(
    leaf: &AttributePredicate,
    schema: &AttributeSchema,
) -> Result<AttributePredicate> {
    let field = leaf.field();
    let ty = schema.require(field)?;
    match leaf {
        AttributePredicate::Compare { cmp, value, .. } => {
            if cmp.is_range() && !ty.is_ordered() {
                return Err(Error::MalformedPredicate(format!(
                    "operator {} is not defined for {} field '{field}'",
                    cmp.symbol(),
                    ty
                )));
            }
            Ok(AttributePredicate::Compare {
                field: field.to_string(),
                cmp: *cmp,
                value: coerce_literal(field, ty, value.clone())?,
            })
        }
        AttributePredicate::In { values, .. } => {
            check_in_list(values.len())?;
            let values = values
                .iter()
                .map(|v| coerce_literal(field, ty, v.clone()))
                .collect::<Result<Vec<_>>>()?;
            Ok(AttributePredicate::In {
                field: field.to_string(),
                values,
            })
        }
    }
}

fn resolve_metadata(leaf: &MetadataPredicate) -> Result<MetadataPredicate> {
    match leaf {
        MetadataPredicate::Exists { path } => path.validate(),
        MetadataPredicate::Contains { value } => {
            if !matches!(value, MetadataValue::Object(_) | MetadataValue::Array(_)) {
                return Err(Error::MalformedPredicate(format!(
                    "containment needs an object or array, got {}",
                    value.type_name()
                )));
            }
            Ok(())
        }
        MetadataPredicate::Compare { path, cmp, value } => {
            path.validate()?;
            check_metadata_literal(value)?;
            let orderable = matches!(value, MetadataValue::Number(_) | MetadataValue::Text(_));
            if cmp.is_range() && !orderable {
                return Err(Error::MalformedPredicate(format!(
                    "operator {} needs a number or text literal, got {}",
                    cmp.symbol(),
                    value.type_name()
                )));
            }
            Ok(())
        }
        MetadataPredicate::In { path, values } => {
            path.validate()?;
            check_in_list(values.len())?;
            values.iter().try_for_each(check_metadata_literal)
        }
    }?;
    Ok(leaf.clone())
}

fn check_in_list(len: usize) -> Result<()> {
    if len == 0 {
        return Err(Error::MalformedPredicate("IN list is empty".into()));
    }
    if len > MAX_IN_LIST {
        return Err(Error::MalformedPredicate(format!(
            "IN list has {len} values, limit is {MAX_IN_LIST}"
        )));
    }
    Ok(())
}

fn check_metadata_literal(value: &MetadataValue) -> Result<()> {
    match value {
        MetadataValue::Array(_) | MetadataValue::Object(_) => Err(Error::MalformedPredicate(
            "comparison literal must be a scalar; use contains for documents".into(),
        )),
        MetadataValue::Number(n) if !n.is_finite() => Err(Error::MalformedPredicate(
            "comparison literal must be finite".into(),
        )),
        _ => Ok(()),
    }
}

/// Orders two attribute values of the same type. `None` across types.
pub fn compare_attributes(a: &AttributeValue, b: &AttributeValue) -> Option<Ordering> {
    match (a, b) {
        (AttributeValue::Number(x), AttributeValue::Number(y)) => x.partial_cmp(y),
        (AttributeValue::Text(x), AttributeValue::Text(y))
        | (AttributeValue::Enum(x), AttributeValue::Enum(y)) => Some(x.cmp(y)),
        (AttributeValue::Timestamp(x), AttributeValue::Timestamp(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Orders two scalar metadata values of the same type. `None` across types.
pub fn compare_metadata(a: &MetadataValue, b: &MetadataValue) -> Option<Ordering> {
    match (a, b) {
        (MetadataValue::Number(x), MetadataValue::Number(y)) => x.partial_cmp(y),
        (MetadataValue::Text(x), MetadataValue::Text(y)) => Some(x.cmp(y)),
        (MetadataValue::Bool(x), MetadataValue::Bool(y)) => Some(x.cmp(y)),
        (MetadataValue::Null, MetadataValue::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

impl AttributePredicate {
    pub fn field(&self) -> &str {
        match self {
            AttributePredicate::Compare { field, .. } | AttributePredicate::In { field, .. } => {
                field
            }
        }
    }

    /// Evaluates against a document's stored value. Absent values never match.
    pub fn matches(&self, stored: Option<&AttributeValue>) -> bool {
        let Some(stored) = stored else {
            return false;
        };
        match self {
            AttributePredicate::Compare { cmp, value, .. } => {
                compare_attributes(stored, value).is_some_and(|o| cmp.test(o))
            }
            AttributePredicate::In { values, .. } => values
                .iter()
                .any(|v| compare_attributes(stored, v) == Some(Ordering::Equal)),
        }
    }
}

impl MetadataPredicate {
    /// Path read by the leaf; `None` for containment.
    pub fn path(&self) -> Option<&MetadataPath> {
        match self {
            MetadataPredicate::Exists { path }
            | MetadataPredicate::Compare { path, .. }
            | MetadataPredicate::In { path, .. } => Some(path),
            MetadataPredicate::Contains { .. } => None,
        }
    }

    /// Evaluates against a whole metadata document. Absent paths never match.
    pub fn matches(&self, metadata: &MetadataValue) -> bool {
        match self {
            MetadataPredicate::Exists { path } => metadata.get_path(path).is_some(),
            MetadataPredicate::Contains { value } => metadata.contains(value),
            MetadataPredicate::Compare { path, cmp, value } => metadata
                .get_path(path)
                .is_some_and(|v| compare_value(v, *cmp, value)),
            MetadataPredicate::In { path, values } => metadata
                .get_path(path)
                .is_some_and(|v| values.iter().any(|l| compare_value(v, CompareOp::Eq, l))),
        }
    }
}

/// Compares the value found at a path with a literal.
///
/// Arrays match when any element satisfies the comparison, except for `!=`, which
/// holds only when no element equals the literal.
pub fn compare_value(found: &MetadataValue, cmp: CompareOp, literal: &MetadataValue) -> bool {
    match (found, cmp) {
        (MetadataValue::Array(items), CompareOp::Ne) => {
            !items.iter().any(|v| compare_value(v, CompareOp::Eq, literal))
        }
        (MetadataValue::Array(items), _) => items.iter().any(|v| compare_value(v, cmp, literal)),
        (MetadataValue::Object(_), _) => false,
        (v, CompareOp::Ne) => compare_metadata(v, literal) != Some(Ordering::Equal),
        (v, _) => compare_metadata(v, literal).is_some_and(|o| cmp.test(o)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> AttributeSchema {
        AttributeSchema::new()
            .number("price")
            .text("title")
            .enumeration("category", ["ai", "db"])
    }

    fn attrs(price: f64, category: &str) -> BTreeMap<String, AttributeValue> {
        let mut m = BTreeMap::new();
        m.insert("price".to_string(), AttributeValue::Number(price));
        m.insert("category".to_string(), AttributeValue::Enum(category.into()));
        m
    }

    #[test]
    fn test_builders_and_flattening() {
        let p = Predicate::attr("price")
            .le(50.0)
            .and(Predicate::attr("category").eq("ai"))
            .and(Predicate::meta("stock").gt(10.0));
        match &p {
            Predicate::And(c) => assert_eq!(c.len(), 3),
            other => panic!("expected flat And, got {other:?}"),
        }
        assert_eq!(p.depth(), 2);
        assert!(p.has_metadata());
    }

    #[test]
    fn test_resolve_coerces_enum_literals() {
        let p = Predicate::attr("category").eq("ai").resolve(&schema()).unwrap();
        assert_eq!(
            p,
            Predicate::Attribute(AttributePredicate::Compare {
                field: "category".into(),
                cmp: CompareOp::Eq,
                value: AttributeValue::Enum("ai".into()),
            })
        );
        // Undeclared variants are allowed in predicates; they just match nothing
        assert!(Predicate::attr("category").eq("music").resolve(&schema()).is_ok());
    }

    #[test]
    fn test_resolve_rejections() {
        let s = schema();
        assert_eq!(
            Predicate::attr("color").eq("red").resolve(&s),
            Err(Error::UnknownField("color".into()))
        );
        assert!(matches!(
            Predicate::attr("price").eq("cheap").resolve(&s),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            Predicate::attr("category").gt("ai").resolve(&s),
            Err(Error::MalformedPredicate(_))
        ));
        assert!(matches!(Predicate::And(vec![]).resolve(&s), Err(Error::MalformedPredicate(_))));
        assert!(matches!(
            Predicate::attr("price").is_in(Vec::<f64>::new()).resolve(&s),
            Err(Error::MalformedPredicate(_))
        ));
        assert!(matches!(
            Predicate::meta("a..b").exists().resolve(&s),
            Err(Error::MalformedPredicate(_))
        ));
        assert!(matches!(
            Predicate::meta("stock").gt(true).resolve(&s),
            Err(Error::MalformedPredicate(_))
        ));
        assert!(matches!(
            Predicate::contains("x").resolve(&s),
            Err(Error::MalformedPredicate(_))
        ));
    }

    #[test]
    fn test_resolve_depth_limit() {
        let mut p = Predicate::attr("price").gt(1.0);
        for _ in 0..MAX_PREDICATE_DEPTH {
            p = !p;
        }
        assert!(matches!(p.resolve(&schema()), Err(Error::MalformedPredicate(_))));
    }

    #[test]
    fn test_matches_attributes() {
        let p = Predicate::attr("price")
            .le(50.0)
            .and(Predicate::attr("category").eq(AttributeValue::Enum("ai".into())));
        assert!(p.matches(&attrs(40.0, "ai"), &MetadataValue::Null));
        assert!(!p.matches(&attrs(60.0, "ai"), &MetadataValue::Null));
        assert!(!p.matches(&attrs(40.0, "db"), &MetadataValue::Null));
        // Missing field is false, even for !=
        let ne = Predicate::attr("title").ne("x");
        assert!(!ne.matches(&attrs(1.0, "ai"), &MetadataValue::Null));
    }

    #[test]
    fn test_matches_metadata() {
        let m = MetadataValue::from(json!({
            "stock": 3,
            "format": "ebook",
            "authors": ["Ada", "Grace"],
            "specs": {"pages": 120}
        }));
        let none = BTreeMap::new();
        assert!(Predicate::meta("stock").gt(1.0).matches(&none, &m));
        assert!(!Predicate::meta("stock").gt(1e9).matches(&none, &m));
        assert!(Predicate::meta("authors").eq("Grace").matches(&none, &m));
        assert!(!Predicate::meta("authors").ne("Grace").matches(&none, &m));
        assert!(Predicate::meta("specs.pages").le(120.0).matches(&none, &m));
        assert!(Predicate::meta("format").is_in(["pdf", "ebook"]).matches(&none, &m));
        assert!(Predicate::meta("specs").exists().matches(&none, &m));
        assert!(!Predicate::meta("missing").exists().matches(&none, &m));
        assert!(!Predicate::meta("missing").ne("x").matches(&none, &m));
        assert!(Predicate::contains(json!({"specs": {"pages": 120}})).matches(&none, &m));
        // Text vs number never compares
        assert!(!Predicate::meta("format").gt(1.0).matches(&none, &m));
    }

    #[test]
    fn test_not_and_or() {
        let m = MetadataValue::from(json!({"a": 1}));
        let none = BTreeMap::new();
        let p = Predicate::meta("a").eq(1.0).or(Predicate::meta("b").exists());
        assert!(p.matches(&none, &m));
        assert!(!(!p).matches(&none, &m));
    }

    #[test]
    fn test_serde_shape() {
        let p = Predicate::attr("price").le(50.0);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["attribute"]["op"], "compare");
        assert_eq!(json["attribute"]["cmp"], "le");
        let back: Predicate = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }
}
