//! Sweep configuration.
//!
//! The configuration is parsed once into an immutable [`Config`] and handed to
//! every component that needs it, usually behind an `Arc`.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::Deserialize;

use crate::dimension::{Dimension, DimensionRegistry};
use crate::error::{ConfigError, ValidationError};
use crate::target::Assignment;

/// A single YAML scalar, kept exactly as written. Unquoted numbers are
/// accepted (`clusters: [10, 20]`) and keep their text, so `1.0` and `1` stay
/// distinct values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Scalar(pub String);

impl Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A base field. The workflow configs in the wild write these as
/// one-element lists, so both forms are accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum BaseValue {
    One(Scalar),
    Many(Vec<Scalar>),
}

impl<'de> Deserialize<'de> for BaseValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BaseVisitor;

        impl<'de> Visitor<'de> for BaseVisitor {
            type Value = BaseValue;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a scalar or a list of scalars")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<BaseValue, E> {
                Ok(BaseValue::One(Scalar(value.to_string())))
            }

            fn visit_bool<E: de::Error>(self, value: bool) -> Result<BaseValue, E> {
                Ok(BaseValue::One(Scalar(value.to_string())))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<BaseValue, E> {
                Ok(BaseValue::One(Scalar(value.to_string())))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<BaseValue, E> {
                Ok(BaseValue::One(Scalar(value.to_string())))
            }

            // A bare float has lost its text by now; YAML's own rendering
            // at least keeps `1.0` apart from `1`.
            fn visit_f64<E: de::Error>(self, value: f64) -> Result<BaseValue, E> {
                Ok(BaseValue::One(Scalar(serde_yaml::Number::from(value).to_string())))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<BaseValue, A::Error> {
                let mut values = Vec::new();
                while let Some(value) = seq.next_element::<Scalar>()? {
                    values.push(value);
                }
                Ok(BaseValue::Many(values))
            }
        }

        deserializer.deserialize_any(BaseVisitor)
    }
}

impl BaseValue {
    fn single(&self, field: &'static str) -> Result<String, ConfigError> {
        match self {
            BaseValue::One(value) => Ok(value.to_string()),
            BaseValue::Many(values) => match values.as_slice() {
                [value] => Ok(value.to_string()),
                _ => Err(ConfigError::BaseNotFixed(field, values.len())),
            },
        }
    }
}

impl Default for BaseValue {
    fn default() -> Self {
        BaseValue::One(Scalar(String::new()))
    }
}

/// Dimensions fixed identically across every active group.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaseScenario {
    #[serde(default)]
    pub simpl: BaseValue,
    #[serde(default)]
    pub ll: BaseValue,
}

/// A scenario group: dimension name to the list of values it sweeps.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Group(pub BTreeMap<String, Vec<Scalar>>);

impl Group {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses the dimension names and renders the values as strings.
    pub fn dimensions(&self) -> Result<Vec<(Dimension, Vec<String>)>, ValidationError> {
        self.0
            .iter()
            .map(|(name, values)| {
                let dimension = name.parse::<Dimension>()?;
                let values = values.iter().map(ToString::to_string).collect();
                Ok((dimension, values))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    /// Threads each solve may use internally.
    #[serde(default = "default_threads")]
    pub threads: usize,
}

fn default_threads() -> usize {
    4
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
        }
    }
}

fn default_results() -> Utf8PathBuf {
    Utf8PathBuf::from("results")
}

/// The parsed sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scenario: BaseScenario,

    #[serde(rename = "scenario-totals", default)]
    pub scenario_totals: Group,
    #[serde(rename = "scenario-groups", default)]
    pub scenario_groups: Group,
    #[serde(rename = "scenario-hypercube", default)]
    pub scenario_hypercube: Group,

    #[serde(rename = "alternative-totals", default)]
    pub alternative_totals: Group,
    #[serde(rename = "alternative-groups", default)]
    pub alternative_groups: Group,
    #[serde(rename = "alternative-hypercube", default)]
    pub alternative_hypercube: Group,

    #[serde(default)]
    pub include_groups: bool,
    #[serde(default)]
    pub include_hypercube: bool,

    /// Root directory under which every artifact is named.
    #[serde(default = "default_results")]
    pub results_dir: Utf8PathBuf,

    #[serde(default)]
    pub resources: ResourceConfig,

    /// Per-dimension grammar overrides, as regular expressions.
    #[serde(default)]
    pub wildcard_constraints: BTreeMap<String, String>,
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.base()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_owned(), e))?;
        tracing::debug!(%path, "loaded sweep configuration");
        Self::from_yaml(&text)
    }

    /// The shared base assignment (`simpl` and `ll`).
    pub fn base(&self) -> Result<Assignment, ConfigError> {
        Ok(Assignment::new()
            .with(Dimension::Simpl, self.scenario.simpl.single("simpl")?)
            .with(Dimension::Ll, self.scenario.ll.single("ll")?))
    }

    /// Builds the dimension registry, applying `wildcard_constraints`.
    pub fn registry(&self) -> Result<DimensionRegistry, ConfigError> {
        let mut registry = DimensionRegistry::new();

        for (name, pattern) in &self.wildcard_constraints {
            let dimension = name.parse::<Dimension>()?;
            registry = registry
                .with_grammar(dimension, pattern)
                .map_err(|e| ConfigError::Constraint(name.clone(), e))?;
        }

        Ok(registry)
    }

    /// Dimensions used by any group beyond the ones every solve carries.
    pub fn extra_dimensions(&self) -> Result<Vec<Dimension>, ValidationError> {
        let mut extra = Vec::new();

        for group in [
            &self.scenario_totals,
            &self.scenario_groups,
            &self.scenario_hypercube,
            &self.alternative_totals,
            &self.alternative_groups,
            &self.alternative_hypercube,
        ] {
            for (dimension, _) in group.dimensions()? {
                if !crate::workflow::BASE_DIMENSIONS.contains(&dimension)
                    && !crate::workflow::ALTERNATIVE_DIMENSIONS.contains(&dimension)
                    && !extra.contains(&dimension)
                {
                    extra.push(dimension);
                }
            }
        }

        extra.sort();
        Ok(extra)
    }
}
