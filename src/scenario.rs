//! Expands configured scenario groups into concrete parameter assignments.

use std::fmt::Display;
use std::sync::Arc;

use crate::config::{Config, Group};
use crate::dimension::{Dimension, DimensionRegistry};
use crate::error::{SweepError, ValidationError};
use crate::target::Assignment;

/// Which half of the sweep a set of groups feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// Optimal solves, summarized by `report_base`.
    Scenario,
    /// Near-optimal alternatives, summarized by `summarize_alternatives`.
    Alternative,
}

impl Family {
    fn prefix(self) -> &'static str {
        match self {
            Family::Scenario => "scenario",
            Family::Alternative => "alternative",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Totals,
    Groups,
    Hypercube,
}

impl GroupKind {
    fn name(self) -> &'static str {
        match self {
            GroupKind::Totals => "totals",
            GroupKind::Groups => "groups",
            GroupKind::Hypercube => "hypercube",
        }
    }
}

impl Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Enumerates terminal assignments from the configuration.
///
/// Overlapping assignments produced by different groups are kept as separate
/// requests. The resolver collapses identical identities into one node, so
/// nothing is solved twice.
pub struct ScenarioSpace {
    config: Arc<Config>,
    registry: Arc<DimensionRegistry>,
    base: Assignment,
}

impl ScenarioSpace {
    pub fn new(config: Arc<Config>, registry: Arc<DimensionRegistry>) -> Result<Self, SweepError> {
        let base = config.base()?;
        Ok(Self {
            config,
            registry,
            base,
        })
    }

    /// Groups participating in `family`, in enumeration order. Totals always
    /// participate; empty groups contribute nothing.
    pub fn active_groups(&self, family: Family) -> Vec<(GroupKind, &Group)> {
        let config = &self.config;
        let (totals, groups, hypercube) = match family {
            Family::Scenario => (
                &config.scenario_totals,
                &config.scenario_groups,
                &config.scenario_hypercube,
            ),
            Family::Alternative => (
                &config.alternative_totals,
                &config.alternative_groups,
                &config.alternative_hypercube,
            ),
        };

        let mut active = vec![(GroupKind::Totals, totals)];
        if config.include_groups {
            active.push((GroupKind::Groups, groups));
        }
        if config.include_hypercube {
            active.push((GroupKind::Hypercube, hypercube));
        }

        active.retain(|(_, group)| !group.is_empty());
        active
    }

    /// Every assignment of `family`: the union over active groups of each
    /// group's cartesian product, merged with the base assignment.
    pub fn enumerate(&self, family: Family) -> Result<Vec<Assignment>, ValidationError> {
        let mut assignments = Vec::new();

        for (kind, group) in self.active_groups(family) {
            let product = self.product(group)?;
            tracing::debug!(
                family = family.prefix(),
                group = %kind,
                count = product.len(),
                "expanded scenario group"
            );
            assignments.extend(product);
        }

        Ok(assignments)
    }

    /// Number of assignments [`ScenarioSpace::enumerate`] yields.
    pub fn terminal_count(&self, family: Family) -> Result<usize, ValidationError> {
        self.active_groups(family)
            .into_iter()
            .map(|(_, group)| -> Result<usize, ValidationError> {
                Ok(group
                    .dimensions()?
                    .iter()
                    .map(|(_, values)| values.len())
                    .product::<usize>())
            })
            .sum()
    }

    fn product(&self, group: &Group) -> Result<Vec<Assignment>, ValidationError> {
        let mut dimensions = group.dimensions()?;
        dimensions.sort_by_key(|(dimension, _)| *dimension);

        for (dimension, values) in &dimensions {
            for value in values {
                self.registry.check(*dimension, value)?;
            }
        }

        Ok(cartesian(&dimensions)
            .into_iter()
            .map(|assignment| assignment.merged_with(&self.base))
            .collect())
    }
}

/// The last dimension varies fastest.
fn cartesian(dimensions: &[(Dimension, Vec<String>)]) -> Vec<Assignment> {
    dimensions
        .iter()
        .fold(vec![Assignment::new()], |acc, (dimension, values)| {
            acc.iter()
                .flat_map(|partial| {
                    values
                        .iter()
                        .map(|value| partial.clone().with(*dimension, value.as_str()))
                })
                .collect()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space(yaml: &str) -> ScenarioSpace {
        let config = Config::from_yaml(yaml).unwrap();
        let registry = config.registry().unwrap();
        ScenarioSpace::new(Arc::new(config), Arc::new(registry)).unwrap()
    }

    const TOTALS: &str = r#"
scenario:
  simpl: ''
  ll: 'v1'
scenario-totals:
  clusters: [10, 20]
  ll: ['v1']
scenario-groups:
  clusters: [30]
  opts: ['3h', '6h', '']
scenario-hypercube:
  clusters: [40, 50]
  opts: ['', '1h']
"#;

    #[test]
    fn test_totals_only() {
        let space = space(TOTALS);
        let assignments = space.enumerate(Family::Scenario).unwrap();

        assert_eq!(assignments.len(), 2);
        assert_eq!(space.terminal_count(Family::Scenario).unwrap(), 2);
        assert_eq!(assignments[0].get(Dimension::Clusters), Some("10"));
        assert_eq!(assignments[1].get(Dimension::Clusters), Some("20"));
        assert_eq!(assignments[0].get(Dimension::Simpl), Some(""));
        assert_eq!(assignments[0].get(Dimension::Ll), Some("v1"));
    }

    #[test]
    fn test_groups_toggle() {
        let space = space(&format!("{TOTALS}include_groups: true\n"));
        let assignments = space.enumerate(Family::Scenario).unwrap();

        assert_eq!(assignments.len(), 5);
        assert_eq!(space.terminal_count(Family::Scenario).unwrap(), 5);
        assert_eq!(assignments[2].get(Dimension::Opts), Some("3h"));
        assert_eq!(assignments[4].get(Dimension::Opts), Some(""));
    }

    #[test]
    fn test_all_groups() {
        let space = space(&format!("{TOTALS}include_groups: true\ninclude_hypercube: true\n"));
        assert_eq!(space.enumerate(Family::Scenario).unwrap().len(), 9);
    }

    #[test]
    fn test_overlap_is_kept() {
        let space = space(
            r#"
scenario-totals:
  clusters: [10]
scenario-hypercube:
  clusters: [10]
include_hypercube: true
"#,
        );

        let assignments = space.enumerate(Family::Scenario).unwrap();
        assert_eq!(assignments.len(), 2);
        assert_eq!(assignments[0], assignments[1]);
    }

    #[test]
    fn test_group_overrides_base() {
        let space = space("scenario:\n  ll: 'v1'\nscenario-totals:\n  ll: ['v2']\n");
        let assignments = space.enumerate(Family::Scenario).unwrap();

        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].get(Dimension::Ll), Some("v2"));
    }

    #[test]
    fn test_invalid_value() {
        let space = space("scenario-totals:\n  clusters: ['120x']\n");
        assert_eq!(
            space.enumerate(Family::Scenario),
            Err(ValidationError::Grammar {
                dimension: Dimension::Clusters,
                value: "120x".into(),
            })
        );
    }

    #[test]
    fn test_families_are_separate() {
        let space = space(
            "scenario-totals:\n  clusters: [10]\nalternative-totals:\n  clusters: [10, 20]\n  epsilon: [0.05]\n",
        );

        assert_eq!(space.enumerate(Family::Scenario).unwrap().len(), 1);
        let alternatives = space.enumerate(Family::Alternative).unwrap();
        assert_eq!(alternatives.len(), 2);
        assert_eq!(alternatives[0].get(Dimension::Epsilon), Some("0.05"));
    }
}
