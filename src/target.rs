//! Structured target identity.
//!
//! A [`Target`] is a rule name plus a complete [`Assignment`] of the
//! dimensions that rule declares. Its [`TargetId`] is a BLAKE3 digest of both,
//! so equal requests always land on the same graph node.
//!
//! Rules do not name their inputs with string templates. Each input is a
//! [`Pattern`] that is bound against the requesting target's assignment with
//! [`Pattern::bind`].

use std::collections::BTreeMap;
use std::fmt::Display;
use std::hash::Hash;

use serde::Serialize;

use crate::core::{ArcStr, Blake3Hasher, Hash32};
use crate::dimension::{Dimension, DimensionRegistry};
use crate::error::ValidationError;

/// An ordered mapping from dimensions to concrete values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Assignment(BTreeMap<Dimension, ArcStr>);

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, dimension: Dimension, value: impl Into<ArcStr>) -> Self {
        self.insert(dimension, value);
        self
    }

    pub fn insert(&mut self, dimension: Dimension, value: impl Into<ArcStr>) -> Option<ArcStr> {
        self.0.insert(dimension, value.into())
    }

    pub fn get(&self, dimension: Dimension) -> Option<&str> {
        self.0.get(&dimension).map(AsRef::as_ref)
    }

    pub fn contains(&self, dimension: Dimension) -> bool {
        self.0.contains_key(&dimension)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Dimension, &str)> {
        self.0.iter().map(|(dim, value)| (*dim, value.as_ref()))
    }

    pub fn dimensions(&self) -> impl Iterator<Item = Dimension> + '_ {
        self.0.keys().copied()
    }

    /// Fills in every dimension of `base` that `self` does not assign.
    pub fn merged_with(mut self, base: &Assignment) -> Self {
        for (dim, value) in &base.0 {
            self.0.entry(*dim).or_insert_with(|| value.clone());
        }
        self
    }

    /// File-name friendly rendering, e.g. `clusters-10_ll-v1`.
    pub fn stem(&self) -> String {
        let mut stem = String::new();
        for (i, (dim, value)) in self.iter().enumerate() {
            if i > 0 {
                stem.push('_');
            }
            stem.push_str(dim.name());
            stem.push('-');
            stem.push_str(value);
        }
        stem
    }
}

impl Display for Assignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (dim, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{dim}={value}")?;
        }
        Ok(())
    }
}

impl FromIterator<(Dimension, ArcStr)> for Assignment {
    fn from_iter<I: IntoIterator<Item = (Dimension, ArcStr)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Content-addressed identity of a [`Target`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TargetId(Hash32);

impl Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.to_hex()[..12])
    }
}

impl Serialize for TargetId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_hex())
    }
}

/// A uniquely identified artifact request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Target {
    rule: ArcStr,
    assignment: Assignment,
}

impl Target {
    /// Creates a target for `rule`, which declares exactly `dimensions`.
    ///
    /// Every declared dimension must be assigned, nothing else may be, and
    /// every value has to satisfy its grammar.
    pub fn new(
        registry: &DimensionRegistry,
        rule: impl Into<ArcStr>,
        dimensions: &[Dimension],
        assignment: Assignment,
    ) -> Result<Self, ValidationError> {
        let rule = rule.into();

        for &dimension in dimensions {
            match assignment.get(dimension) {
                Some(value) => registry.check(dimension, value)?,
                None => {
                    return Err(ValidationError::MissingDimension {
                        rule: rule.to_string(),
                        dimension,
                    });
                }
            }
        }

        if let Some(dimension) = assignment.dimensions().find(|dim| !dimensions.contains(dim)) {
            return Err(ValidationError::UnexpectedDimension {
                rule: rule.to_string(),
                dimension,
            });
        }

        Ok(Self { rule, assignment })
    }

    pub fn rule(&self) -> &str {
        &self.rule
    }

    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    pub fn id(&self) -> TargetId {
        let mut hasher = Blake3Hasher::default();
        self.hash(&mut hasher);
        TargetId(hasher.into())
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.rule, self.assignment)
    }
}

/// How a single dimension of an upstream target gets its value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Binding {
    /// Same dimension of the requesting target.
    Inherit,
    /// A constant.
    Fixed(ArcStr),
    /// A different dimension of the requesting target.
    From(Dimension),
}

/// Declares which upstream target a rule requires, relative to the requesting
/// target's assignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    rule: ArcStr,
    bindings: BTreeMap<Dimension, Binding>,
}

impl Pattern {
    /// A pattern that inherits every dimension.
    pub fn new(rule: impl Into<ArcStr>) -> Self {
        Self {
            rule: rule.into(),
            bindings: BTreeMap::new(),
        }
    }

    pub fn fixed(mut self, dimension: Dimension, value: impl Into<ArcStr>) -> Self {
        self.bindings.insert(dimension, Binding::Fixed(value.into()));
        self
    }

    /// Binds `dimension` to the value of `source` in the requesting target.
    pub fn alias(mut self, dimension: Dimension, source: Dimension) -> Self {
        self.bindings.insert(dimension, Binding::From(source));
        self
    }

    pub fn rule(&self) -> &str {
        &self.rule
    }

    /// Computes the upstream assignment for a rule declaring `dimensions`.
    ///
    /// Dimensions of `assignment` the upstream rule does not declare are
    /// dropped; a declared dimension with no value to bind is an error.
    pub fn bind(
        &self,
        dimensions: &[Dimension],
        assignment: &Assignment,
    ) -> Result<Assignment, ValidationError> {
        dimensions
            .iter()
            .map(|&dimension| {
                let value = match self.bindings.get(&dimension) {
                    Some(Binding::Fixed(value)) => Some(value.as_ref()),
                    Some(Binding::From(source)) => assignment.get(*source),
                    Some(Binding::Inherit) | None => assignment.get(dimension),
                };

                value
                    .map(|value| (dimension, ArcStr::from(value)))
                    .ok_or_else(|| ValidationError::MissingDimension {
                        rule: self.rule.to_string(),
                        dimension,
                    })
            })
            .collect()
    }
}
