//! Attribute values and the interned names used to address them.
//!
//! Every graph element carries a mapping from [`AttrName`] to [`AttrValue`].
//! Values are the geometric primitives a shape grammar computes with, plus
//! symbolic tags for non-geometric state.

use crate::geometry::Vec2;
use crate::interned_string_newtype;
use crate::util::InternString;
use derive_more::From;
use internment::Intern;

/// The name of an attribute, e.g. `length` or `pos`.
#[derive(derive_more::Debug, Clone, PartialEq, Eq, Hash, Copy)]
#[debug("{_0}")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttrName(pub InternString);
interned_string_newtype!(AttrName);

/// The type tag of a node, from the grammar's finite alphabet of shape
/// element kinds.
#[derive(derive_more::Debug, Clone, PartialEq, Eq, Hash, Copy)]
#[debug("{_0}")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TypeTag(pub InternString);
interned_string_newtype!(TypeTag);

/// The kind of an edge, e.g. `adjacent`.
#[derive(derive_more::Debug, Clone, PartialEq, Eq, Hash, Copy)]
#[debug("{_0}")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeKind(pub InternString);
interned_string_newtype!(EdgeKind);

/// A symbolic attribute value.
#[derive(derive_more::Debug, Clone, PartialEq, Eq, Hash, Copy)]
#[debug("{_0}")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Symbol(pub InternString);
interned_string_newtype!(Symbol);

/// An attribute value: a geometric primitive or a symbolic tag.
#[derive(Debug, Clone, PartialEq, From)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AttrValue {
    Scalar(f64),
    Point(Vec2),
    Polyline(Vec<Vec2>),
    Symbol(Symbol),
}

impl AttrValue {
    /// A short name for the value's variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            AttrValue::Scalar(_) => "scalar",
            AttrValue::Point(_) => "point",
            AttrValue::Polyline(_) => "polyline",
            AttrValue::Symbol(_) => "symbol",
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            AttrValue::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_point(&self) -> Option<Vec2> {
        match self {
            AttrValue::Point(p) => Some(*p),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Symbol(value.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interned_names_compare_by_content() {
        let a: AttrName = "length".into();
        let b: AttrName = String::from("length").into();
        assert_eq!(a, b);
        assert_ne!(a, "width".into());
    }

    #[test]
    fn value_conversions() {
        assert_eq!(AttrValue::from(2.0).as_scalar(), Some(2.0));
        assert_eq!(AttrValue::from(2.0).as_point(), None);
        let v: AttrValue = "solid".into();
        assert_eq!(v, AttrValue::Symbol("solid".into()));
        assert_eq!(v.kind(), "symbol");
    }
}
