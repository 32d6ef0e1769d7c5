//! Named sweep parameters and the grammars constraining their values.
//!
//! Every [`Dimension`] has a grammar. A value has to satisfy it before any
//! [`Target`](crate::Target) can carry it, which keeps artifact names and
//! target identities well formed across the whole graph.

use std::collections::HashMap;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A named, grammar-constrained parameter of a target.
///
/// The declaration order is the canonical order of dimensions inside an
/// [`Assignment`](crate::Assignment) and inside artifact names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    /// Network simplification level.
    Simpl,
    /// Number of clusters, optionally with the `m` aggregation suffix.
    Clusters,
    /// Line expansion limit code.
    Ll,
    /// `-` separated option string passed to the solver.
    Opts,
    /// Relative cost slack allowed for near-optimal alternatives.
    Epsilon,
    Demand,
    Discount,
    /// Export volume.
    Export,
    /// Planning horizon.
    Year,
    /// Technology category the alternatives are searched over.
    Category,
    /// Objective identifier discovered by a checkpoint.
    Objective,
}

impl Dimension {
    pub const ALL: [Dimension; 11] = [
        Dimension::Simpl,
        Dimension::Clusters,
        Dimension::Ll,
        Dimension::Opts,
        Dimension::Epsilon,
        Dimension::Demand,
        Dimension::Discount,
        Dimension::Export,
        Dimension::Year,
        Dimension::Category,
        Dimension::Objective,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Dimension::Simpl => "simpl",
            Dimension::Clusters => "clusters",
            Dimension::Ll => "ll",
            Dimension::Opts => "opts",
            Dimension::Epsilon => "epsilon",
            Dimension::Demand => "demand",
            Dimension::Discount => "discount",
            Dimension::Export => "export",
            Dimension::Year => "year",
            Dimension::Category => "category",
            Dimension::Objective => "objective",
        }
    }
}

impl Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dimension {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dimension::ALL
            .into_iter()
            .find(|dim| dim.name() == s)
            .ok_or_else(|| ValidationError::UnknownDimension(s.to_string()))
    }
}

/// A compiled grammar, optionally narrowed by a numeric range.
#[derive(Debug, Clone)]
struct Grammar {
    regex: Regex,
    range: Option<RangeInclusive<u32>>,
}

impl Grammar {
    fn matches(&self, value: &str) -> bool {
        if !self.regex.is_match(value) {
            return false;
        }

        match &self.range {
            Some(range) => value.parse().is_ok_and(|n: u32| range.contains(&n)),
            None => true,
        }
    }
}

const SIGNED_DECIMALS: &str = r"^[+-]?[0-9]+(\.[0-9]+)?(_[+-]?[0-9]+(\.[0-9]+)?)*$";

static DEFAULT_GRAMMARS: LazyLock<HashMap<Dimension, Grammar>> = LazyLock::new(|| {
    let grammar = |pattern: &str| Grammar {
        regex: Regex::new(pattern).expect("built-in grammar must compile"),
        range: None,
    };

    HashMap::from([
        (Dimension::Simpl, grammar(r"^[a-zA-Z0-9]*$")),
        (Dimension::Clusters, grammar(r"^([0-9]+m?|all|min)$")),
        (Dimension::Ll, grammar(r"^[a-zA-Z]?([0-9]+(\.[0-9]+)?|opt|all)$")),
        (Dimension::Opts, grammar(r"^[-+a-zA-Z0-9.]*$")),
        (Dimension::Epsilon, grammar(SIGNED_DECIMALS)),
        (Dimension::Demand, grammar(SIGNED_DECIMALS)),
        (Dimension::Discount, grammar(SIGNED_DECIMALS)),
        (Dimension::Export, grammar(r"^[0-9]+(\.[0-9]+)?$")),
        (
            Dimension::Year,
            Grammar {
                range: Some(2020..=2100),
                ..grammar(r"^[0-9]{4}$")
            },
        ),
        (Dimension::Category, grammar(r"^[a-zA-Z0-9_+]+$")),
        (Dimension::Objective, grammar(r"^[a-zA-Z0-9_.+-]+$")),
    ])
});

/// Validates dimension values against their grammars.
///
/// The registry starts from the built-in grammars; individual grammars can be
/// replaced with [`DimensionRegistry::with_grammar`].
#[derive(Debug, Clone)]
pub struct DimensionRegistry {
    grammars: HashMap<Dimension, Grammar>,
}

impl DimensionRegistry {
    pub fn new() -> Self {
        Self {
            grammars: DEFAULT_GRAMMARS.clone(),
        }
    }

    /// Replaces the grammar of `dimension`. The pattern is anchored on both
    /// ends.
    pub fn with_grammar(
        mut self,
        dimension: Dimension,
        pattern: &str,
    ) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{pattern})$"))?;
        self.grammars.insert(dimension, Grammar { regex, range: None });
        Ok(self)
    }

    /// Returns whether `value` is legal for the dimension called `name`.
    /// Unknown dimension names are never legal.
    pub fn validate(&self, name: &str, value: &str) -> bool {
        name.parse::<Dimension>()
            .is_ok_and(|dimension| self.is_valid(dimension, value))
    }

    pub fn is_valid(&self, dimension: Dimension, value: &str) -> bool {
        self.grammars
            .get(&dimension)
            .is_some_and(|grammar| grammar.matches(value))
    }

    /// Like [`DimensionRegistry::is_valid`] but fails with a [`ValidationError`].
    pub fn check(&self, dimension: Dimension, value: &str) -> Result<(), ValidationError> {
        if self.is_valid(dimension, value) {
            Ok(())
        } else {
            Err(ValidationError::Grammar {
                dimension,
                value: value.to_string(),
            })
        }
    }
}

impl Default for DimensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepts(name: &str, values: &[&str]) {
        let registry = DimensionRegistry::new();
        for value in values {
            assert!(registry.validate(name, value), "{name} should accept '{value}'");
        }
    }

    fn rejects(name: &str, values: &[&str]) {
        let registry = DimensionRegistry::new();
        for value in values {
            assert!(!registry.validate(name, value), "{name} should reject '{value}'");
        }
    }

    #[test]
    fn test_clusters() {
        accepts("clusters", &["120", "120m", "all", "min", "5"]);
        rejects("clusters", &["120x", "m", "", "12 0", "-5", "allm"]);
    }

    #[test]
    fn test_line_limit() {
        accepts("ll", &["v1", "v1.25", "copt", "call", "all", "opt", "1.5"]);
        rejects("ll", &["vv1", "v", "v1.", "", "v-1"]);
    }

    #[test]
    fn test_opts_and_simpl() {
        accepts("opts", &["", "3h", "Co2L-3h", "Ep+1.5"]);
        rejects("opts", &["3h_Co2L", "a b", "x/y"]);
        accepts("simpl", &["", "1024", "abc"]);
        rejects("simpl", &["1-2", "a.b"]);
    }

    #[test]
    fn test_signed_decimals() {
        accepts("epsilon", &["0.05", "-1", "+2.5", "0.1_0.2", "1_-1"]);
        rejects("epsilon", &["", ".5", "0.1__0.2", "abc", "1."]);
        accepts("demand", &["1.2"]);
        accepts("discount", &["-0.07"]);
    }

    #[test]
    fn test_export() {
        accepts("export", &["0", "12.5"]);
        rejects("export", &["-1", "", "1e3"]);
    }

    #[test]
    fn test_year_range() {
        accepts("year", &["2020", "2050", "2100"]);
        rejects("year", &["2019", "2101", "20500", "205", "abcd"]);
    }

    #[test]
    fn test_category_and_objective() {
        accepts("category", &["wind", "solar+wind", "ocgt_ccgt"]);
        rejects("category", &["", "a-b"]);
        accepts("objective", &["wind-max", "H2.min", "a+b_c"]);
        rejects("objective", &["", "a b", "a/b"]);
    }

    #[test]
    fn test_unknown_dimension() {
        let registry = DimensionRegistry::new();
        assert!(!registry.validate("tolerance_typo", "1"));
        assert_eq!(
            "nope".parse::<Dimension>(),
            Err(ValidationError::UnknownDimension("nope".into()))
        );
    }

    #[test]
    fn test_check_error() {
        let registry = DimensionRegistry::new();
        assert!(registry.check(Dimension::Clusters, "120m").is_ok());
        assert_eq!(
            registry.check(Dimension::Clusters, "120x"),
            Err(ValidationError::Grammar {
                dimension: Dimension::Clusters,
                value: "120x".into(),
            })
        );
    }

    #[test]
    fn test_grammar_override() {
        let registry = DimensionRegistry::new()
            .with_grammar(Dimension::Clusters, "[0-9]+|flex")
            .unwrap();

        assert!(registry.validate("clusters", "flex"));
        assert!(!registry.validate("clusters", "120m"));
        assert!(!registry.validate("clusters", "flex5"));
    }

    #[test]
    fn test_names_roundtrip() {
        for dim in Dimension::ALL {
            assert_eq!(dim.name().parse::<Dimension>(), Ok(dim));
        }
    }
}
