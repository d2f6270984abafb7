//! The pure expression language for attribute transfer and guard predicates.
//!
//! Rules carry these expressions as data. A transfer expression computes one
//! new RHS attribute from the attributes of matched LHS elements (and from
//! RHS attributes computed earlier in the same step); a guard predicate
//! narrows which structural matches are valid. Expressions cannot reach any
//! host-graph state outside the matched context, which is what makes rule
//! application atomic and replayable.

use crate::attr::{AttrName, AttrValue};
use crate::geometry::Vec2;
use crate::graph::{EdgeId, NodeId, ShapeGraph};
use std::collections::HashMap;
use thiserror::Error;

/// A reference to an element of a rule-side graph: a node or an edge of the
/// LHS pattern (for [`AttrExpr::Matched`]) or of the RHS replacement (for
/// [`AttrExpr::Fresh`] and transfer targets).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ElemRef {
    Node(NodeId),
    Edge(EdgeId),
}

impl From<NodeId> for ElemRef {
    fn from(value: NodeId) -> Self {
        ElemRef::Node(value)
    }
}

impl From<EdgeId> for ElemRef {
    fn from(value: EdgeId) -> Self {
        ElemRef::Edge(value)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("{op} is not defined for {got} operands")]
    TypeMismatch { op: &'static str, got: &'static str },
    #[error("division by zero")]
    DivisionByZero,
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(&'static str),
    #[error("element {elem:?} has no attribute `{attr:?}`")]
    MissingAttr { elem: ElemRef, attr: AttrName },
    #[error("expression references {0:?}, which is not part of the match")]
    UnmatchedElement(ElemRef),
    #[error("expression references fresh element {0:?} outside a rewrite step")]
    FreshUnavailable(ElemRef),
}

/// A pure expression over matched attribute values.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AttrExpr {
    /// A literal value.
    Value(AttrValue),
    /// An attribute of a matched LHS element, read from its host image.
    Matched(ElemRef, AttrName),
    /// An attribute of an RHS element computed earlier in the same rewrite
    /// step (or carried on the RHS template).
    Fresh(ElemRef, AttrName),
    Neg(Box<AttrExpr>),
    Add(Box<AttrExpr>, Box<AttrExpr>),
    Sub(Box<AttrExpr>, Box<AttrExpr>),
    Mul(Box<AttrExpr>, Box<AttrExpr>),
    Div(Box<AttrExpr>, Box<AttrExpr>),
    /// Midpoint of two points.
    Midpoint(Box<AttrExpr>, Box<AttrExpr>),
    /// Linear interpolation; points or scalars, parameter last.
    Lerp(Box<AttrExpr>, Box<AttrExpr>, Box<AttrExpr>),
    /// Left-hand perpendicular of a vector.
    PerpLeft(Box<AttrExpr>),
    /// Right-hand perpendicular of a vector.
    PerpRight(Box<AttrExpr>),
    /// Unit vector; fails on the zero vector.
    Unit(Box<AttrExpr>),
    /// Euclidean norm of a vector.
    Norm(Box<AttrExpr>),
    /// Distance between two points.
    Distance(Box<AttrExpr>, Box<AttrExpr>),
    /// Unsigned angle between two vectors, in radians.
    Angle(Box<AttrExpr>, Box<AttrExpr>),
}

impl AttrExpr {
    pub fn value(v: impl Into<AttrValue>) -> Self {
        AttrExpr::Value(v.into())
    }

    pub fn matched(elem: impl Into<ElemRef>, attr: impl Into<AttrName>) -> Self {
        AttrExpr::Matched(elem.into(), attr.into())
    }

    pub fn fresh(elem: impl Into<ElemRef>, attr: impl Into<AttrName>) -> Self {
        AttrExpr::Fresh(elem.into(), attr.into())
    }

    pub fn add(a: AttrExpr, b: AttrExpr) -> Self {
        AttrExpr::Add(Box::new(a), Box::new(b))
    }

    pub fn sub(a: AttrExpr, b: AttrExpr) -> Self {
        AttrExpr::Sub(Box::new(a), Box::new(b))
    }

    pub fn mul(a: AttrExpr, b: AttrExpr) -> Self {
        AttrExpr::Mul(Box::new(a), Box::new(b))
    }

    pub fn div(a: AttrExpr, b: AttrExpr) -> Self {
        AttrExpr::Div(Box::new(a), Box::new(b))
    }

    pub fn midpoint(a: AttrExpr, b: AttrExpr) -> Self {
        AttrExpr::Midpoint(Box::new(a), Box::new(b))
    }

    pub fn lerp(a: AttrExpr, b: AttrExpr, t: AttrExpr) -> Self {
        AttrExpr::Lerp(Box::new(a), Box::new(b), Box::new(t))
    }

    /// `base` offset by `distance` along the left normal of the direction
    /// `from → to`. The classic shape-grammar "push this point outward".
    pub fn offset_by_normal(
        base: AttrExpr,
        from: AttrExpr,
        to: AttrExpr,
        distance: AttrExpr,
    ) -> Self {
        let direction = AttrExpr::sub(to, from);
        let normal = AttrExpr::Unit(Box::new(AttrExpr::PerpLeft(Box::new(direction))));
        AttrExpr::add(base, AttrExpr::mul(normal, distance))
    }

    /// Collects every `Fresh` reference in the expression. These are the
    /// intra-step dependencies that rule loading orders topologically.
    pub fn fresh_refs(&self, out: &mut Vec<(ElemRef, AttrName)>) {
        match self {
            AttrExpr::Value(_) | AttrExpr::Matched(_, _) => {}
            AttrExpr::Fresh(elem, attr) => out.push((*elem, *attr)),
            AttrExpr::Neg(a)
            | AttrExpr::PerpLeft(a)
            | AttrExpr::PerpRight(a)
            | AttrExpr::Unit(a)
            | AttrExpr::Norm(a) => a.fresh_refs(out),
            AttrExpr::Add(a, b)
            | AttrExpr::Sub(a, b)
            | AttrExpr::Mul(a, b)
            | AttrExpr::Div(a, b)
            | AttrExpr::Midpoint(a, b)
            | AttrExpr::Distance(a, b)
            | AttrExpr::Angle(a, b) => {
                a.fresh_refs(out);
                b.fresh_refs(out);
            }
            AttrExpr::Lerp(a, b, t) => {
                a.fresh_refs(out);
                b.fresh_refs(out);
                t.fresh_refs(out);
            }
        }
    }

    /// Collects every `Matched` reference in the expression.
    pub fn matched_refs(&self, out: &mut Vec<(ElemRef, AttrName)>) {
        match self {
            AttrExpr::Value(_) | AttrExpr::Fresh(_, _) => {}
            AttrExpr::Matched(elem, attr) => out.push((*elem, *attr)),
            AttrExpr::Neg(a)
            | AttrExpr::PerpLeft(a)
            | AttrExpr::PerpRight(a)
            | AttrExpr::Unit(a)
            | AttrExpr::Norm(a) => a.matched_refs(out),
            AttrExpr::Add(a, b)
            | AttrExpr::Sub(a, b)
            | AttrExpr::Mul(a, b)
            | AttrExpr::Div(a, b)
            | AttrExpr::Midpoint(a, b)
            | AttrExpr::Distance(a, b)
            | AttrExpr::Angle(a, b) => {
                a.matched_refs(out);
                b.matched_refs(out);
            }
            AttrExpr::Lerp(a, b, t) => {
                a.matched_refs(out);
                b.matched_refs(out);
                t.matched_refs(out);
            }
        }
    }

    pub(crate) fn eval(&self, scope: &EvalScope<'_>) -> Result<AttrValue, EvalError> {
        use AttrValue::{Point, Scalar};
        match self {
            AttrExpr::Value(v) => Ok(v.clone()),
            AttrExpr::Matched(elem, attr) => scope.matched_attr(*elem, *attr),
            AttrExpr::Fresh(elem, attr) => scope.fresh_attr(*elem, *attr),
            AttrExpr::Neg(a) => match a.eval(scope)? {
                Scalar(s) => Ok(Scalar(-s)),
                Point(p) => Ok(Point(-p)),
                other => Err(type_mismatch("negation", &other)),
            },
            AttrExpr::Add(a, b) => match (a.eval(scope)?, b.eval(scope)?) {
                (Scalar(a), Scalar(b)) => Ok(Scalar(a + b)),
                (Point(a), Point(b)) => Ok(Point(a + b)),
                (a, _) => Err(type_mismatch("addition", &a)),
            },
            AttrExpr::Sub(a, b) => match (a.eval(scope)?, b.eval(scope)?) {
                (Scalar(a), Scalar(b)) => Ok(Scalar(a - b)),
                (Point(a), Point(b)) => Ok(Point(a - b)),
                (a, _) => Err(type_mismatch("subtraction", &a)),
            },
            AttrExpr::Mul(a, b) => match (a.eval(scope)?, b.eval(scope)?) {
                (Scalar(a), Scalar(b)) => Ok(Scalar(a * b)),
                (Point(p), Scalar(s)) | (Scalar(s), Point(p)) => Ok(Point(p * s)),
                (a, _) => Err(type_mismatch("multiplication", &a)),
            },
            AttrExpr::Div(a, b) => {
                let denom = match b.eval(scope)? {
                    Scalar(s) => s,
                    other => return Err(type_mismatch("division", &other)),
                };
                if denom == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                match a.eval(scope)? {
                    Scalar(s) => Ok(Scalar(s / denom)),
                    Point(p) => Ok(Point(p / denom)),
                    other => Err(type_mismatch("division", &other)),
                }
            }
            AttrExpr::Midpoint(a, b) => {
                let (a, b) = (point(a.eval(scope)?)?, point(b.eval(scope)?)?);
                Ok(Point(a.midpoint(b)))
            }
            AttrExpr::Lerp(a, b, t) => {
                let t = scalar(t.eval(scope)?)?;
                match (a.eval(scope)?, b.eval(scope)?) {
                    (Scalar(a), Scalar(b)) => Ok(Scalar(a + (b - a) * t)),
                    (Point(a), Point(b)) => Ok(Point(a.lerp(b, t))),
                    (a, _) => Err(type_mismatch("lerp", &a)),
                }
            }
            AttrExpr::PerpLeft(a) => Ok(Point(point(a.eval(scope)?)?.perp_left())),
            AttrExpr::PerpRight(a) => Ok(Point(point(a.eval(scope)?)?.perp_right())),
            AttrExpr::Unit(a) => point(a.eval(scope)?)?
                .normalized()
                .map(Point)
                .ok_or(EvalError::DegenerateGeometry("cannot normalize a zero vector")),
            AttrExpr::Norm(a) => Ok(Scalar(point(a.eval(scope)?)?.norm())),
            AttrExpr::Distance(a, b) => {
                let (a, b) = (point(a.eval(scope)?)?, point(b.eval(scope)?)?);
                Ok(Scalar(a.distance(b)))
            }
            AttrExpr::Angle(a, b) => {
                let (a, b) = (point(a.eval(scope)?)?, point(b.eval(scope)?)?);
                a.angle_between(b)
                    .map(Scalar)
                    .ok_or(EvalError::DegenerateGeometry("angle with a zero vector"))
            }
        }
    }
}

fn type_mismatch(op: &'static str, got: &AttrValue) -> EvalError {
    EvalError::TypeMismatch {
        op,
        got: got.kind(),
    }
}

fn scalar(v: AttrValue) -> Result<f64, EvalError> {
    v.as_scalar().ok_or(type_mismatch("scalar context", &v))
}

fn point(v: AttrValue) -> Result<Vec2, EvalError> {
    v.as_point().ok_or(type_mismatch("point context", &v))
}

/// A boolean predicate over matched attribute values. Guards may only use
/// `Matched` references; rule loading rejects `Fresh` ones.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GuardExpr {
    Eq(AttrExpr, AttrExpr),
    Ne(AttrExpr, AttrExpr),
    Lt(AttrExpr, AttrExpr),
    Le(AttrExpr, AttrExpr),
    Gt(AttrExpr, AttrExpr),
    Ge(AttrExpr, AttrExpr),
    /// The element carries the named attribute at all.
    Has(ElemRef, AttrName),
    Not(Box<GuardExpr>),
    All(Vec<GuardExpr>),
    AnyOf(Vec<GuardExpr>),
}

impl GuardExpr {
    pub fn has(elem: impl Into<ElemRef>, attr: impl Into<AttrName>) -> Self {
        GuardExpr::Has(elem.into(), attr.into())
    }

    pub(crate) fn eval(&self, scope: &EvalScope<'_>) -> Result<bool, EvalError> {
        match self {
            GuardExpr::Eq(a, b) => Ok(a.eval(scope)? == b.eval(scope)?),
            GuardExpr::Ne(a, b) => Ok(a.eval(scope)? != b.eval(scope)?),
            GuardExpr::Lt(a, b) => Ok(scalar(a.eval(scope)?)? < scalar(b.eval(scope)?)?),
            GuardExpr::Le(a, b) => Ok(scalar(a.eval(scope)?)? <= scalar(b.eval(scope)?)?),
            GuardExpr::Gt(a, b) => Ok(scalar(a.eval(scope)?)? > scalar(b.eval(scope)?)?),
            GuardExpr::Ge(a, b) => Ok(scalar(a.eval(scope)?)? >= scalar(b.eval(scope)?)?),
            GuardExpr::Has(elem, attr) => match scope.matched_attr(*elem, *attr) {
                Ok(_) => Ok(true),
                Err(EvalError::MissingAttr { .. }) => Ok(false),
                Err(e) => Err(e),
            },
            GuardExpr::Not(inner) => Ok(!inner.eval(scope)?),
            GuardExpr::All(guards) => {
                for g in guards {
                    if !g.eval(scope)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            GuardExpr::AnyOf(guards) => {
                for g in guards {
                    if g.eval(scope)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Collects every expression contained in the guard.
    pub fn exprs<'a>(&'a self, out: &mut Vec<&'a AttrExpr>) {
        match self {
            GuardExpr::Eq(a, b)
            | GuardExpr::Ne(a, b)
            | GuardExpr::Lt(a, b)
            | GuardExpr::Le(a, b)
            | GuardExpr::Gt(a, b)
            | GuardExpr::Ge(a, b) => {
                out.push(a);
                out.push(b);
            }
            GuardExpr::Has(_, _) => {}
            GuardExpr::Not(inner) => inner.exprs(out),
            GuardExpr::All(guards) | GuardExpr::AnyOf(guards) => {
                for g in guards {
                    g.exprs(out);
                }
            }
        }
    }
}

/// Where `Matched` and `Fresh` references resolve during evaluation.
///
/// `Matched` reads go through the match mappings into `host`; `Fresh` reads
/// go through the RHS instantiation mappings into the graph under
/// construction, and are only available while a rewrite step is running.
pub(crate) struct EvalScope<'a> {
    pub host: &'a ShapeGraph,
    pub matched_nodes: &'a HashMap<NodeId, NodeId>,
    pub matched_edges: &'a HashMap<EdgeId, EdgeId>,
    pub fresh: Option<FreshScope<'a>>,
}

pub(crate) struct FreshScope<'a> {
    pub graph: &'a ShapeGraph,
    pub node_map: &'a HashMap<NodeId, NodeId>,
    pub edge_map: &'a HashMap<EdgeId, EdgeId>,
}

impl EvalScope<'_> {
    fn matched_attr(&self, elem: ElemRef, attr: AttrName) -> Result<AttrValue, EvalError> {
        let missing = || EvalError::MissingAttr { elem, attr };
        match elem {
            ElemRef::Node(pattern_node) => {
                let host_node = self
                    .matched_nodes
                    .get(&pattern_node)
                    .ok_or(EvalError::UnmatchedElement(elem))?;
                let node = self
                    .host
                    .node(*host_node)
                    .ok_or(EvalError::UnmatchedElement(elem))?;
                node.attr(&attr).cloned().ok_or_else(missing)
            }
            ElemRef::Edge(pattern_edge) => {
                let host_edge = self
                    .matched_edges
                    .get(&pattern_edge)
                    .ok_or(EvalError::UnmatchedElement(elem))?;
                let edge = self
                    .host
                    .edge(*host_edge)
                    .ok_or(EvalError::UnmatchedElement(elem))?;
                edge.attr(&attr).cloned().ok_or_else(missing)
            }
        }
    }

    fn fresh_attr(&self, elem: ElemRef, attr: AttrName) -> Result<AttrValue, EvalError> {
        let fresh = self
            .fresh
            .as_ref()
            .ok_or(EvalError::FreshUnavailable(elem))?;
        let missing = || EvalError::MissingAttr { elem, attr };
        match elem {
            ElemRef::Node(rhs_node) => {
                let new_node = fresh
                    .node_map
                    .get(&rhs_node)
                    .ok_or(EvalError::FreshUnavailable(elem))?;
                let node = fresh
                    .graph
                    .node(*new_node)
                    .ok_or(EvalError::FreshUnavailable(elem))?;
                node.attr(&attr).cloned().ok_or_else(missing)
            }
            ElemRef::Edge(rhs_edge) => {
                let new_edge = fresh
                    .edge_map
                    .get(&rhs_edge)
                    .ok_or(EvalError::FreshUnavailable(elem))?;
                let edge = fresh
                    .graph
                    .edge(*new_edge)
                    .ok_or(EvalError::FreshUnavailable(elem))?;
                edge.attr(&attr).cloned().ok_or_else(missing)
            }
        }
    }
}
