//! The set of rules a sweep is resolved against.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::ArcStr;
use crate::dimension::{Dimension, DimensionRegistry};
use crate::error::ResolveError;
use crate::rule::{Budget, Layout, Rule, RuleKind};
use crate::scenario::Family;
use crate::target::{Assignment, Pattern, Target};

/// Dimensions every solve carries.
pub const BASE_DIMENSIONS: [Dimension; 4] = [
    Dimension::Simpl,
    Dimension::Clusters,
    Dimension::Ll,
    Dimension::Opts,
];

/// Dimensions only near-optimal alternatives carry.
pub const ALTERNATIVE_DIMENSIONS: [Dimension; 3] =
    [Dimension::Epsilon, Dimension::Category, Dimension::Objective];

/// Tables the report backend writes for every summarized target.
pub const SUMMARY_TABLES: [&str; 9] = [
    "investments.csv",
    "energy.csv",
    "storage_capacity.csv",
    "generation_capacity.csv",
    "line_capacity.csv",
    "line_volume.csv",
    "line_energy_balance.csv",
    "curtailment.csv",
    "fairness.csv",
];

/// Key of a base network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaseKey {
    pub simpl: ArcStr,
    pub clusters: ArcStr,
    pub ll: ArcStr,
    pub opts: ArcStr,
}

impl BaseKey {
    /// Unassigned dimensions are read as empty.
    pub fn new(assignment: &Assignment) -> Self {
        let get = |dimension| ArcStr::from(assignment.get(dimension).unwrap_or_default());
        Self {
            simpl: get(Dimension::Simpl),
            clusters: get(Dimension::Clusters),
            ll: get(Dimension::Ll),
            opts: get(Dimension::Opts),
        }
    }
}

/// Supplies the starting network of a solve.
pub trait BaseNetworkProvider: Send + Sync {
    fn locate(&self, key: &BaseKey) -> Utf8PathBuf;
}

impl<F> BaseNetworkProvider for F
where
    F: Fn(&BaseKey) -> Utf8PathBuf + Send + Sync,
{
    fn locate(&self, key: &BaseKey) -> Utf8PathBuf {
        self(key)
    }
}

/// Base networks as a clustering subworkflow lays them out on disk:
/// `<dir>/elec_s<simpl>_<clusters>_ec_l<ll>_<opts>.nc`.
#[derive(Debug, Clone)]
pub struct NetworkDir(pub Utf8PathBuf);

impl BaseNetworkProvider for NetworkDir {
    fn locate(&self, key: &BaseKey) -> Utf8PathBuf {
        self.0.join(format!(
            "elec_s{}_{}_ec_l{}_{}.nc",
            key.simpl, key.clusters, key.ll, key.opts
        ))
    }
}

pub struct Workflow {
    rules: HashMap<ArcStr, Rule>,
    terminals: HashMap<Family, ArcStr>,
    root: Utf8PathBuf,
    provider: Arc<dyn BaseNetworkProvider>,
}

impl Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .field("terminals", &self.terminals)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Workflow {
    pub fn new(root: impl Into<Utf8PathBuf>, provider: impl BaseNetworkProvider + 'static) -> Self {
        Self {
            rules: HashMap::new(),
            terminals: HashMap::new(),
            root: root.into(),
            provider: Arc::new(provider),
        }
    }

    /// Adds or replaces a rule.
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.insert(rule.name().into(), rule);
        self
    }

    /// Marks the rule whose targets a scenario family requests.
    pub fn with_terminal(mut self, family: Family, rule: &str) -> Self {
        self.terminals.insert(family, rule.into());
        self
    }

    /// The near-optimal sweep: solve every scenario, discover objectives per
    /// category, solve one alternative per objective and summarize both.
    ///
    /// `extra` dimensions (year, demand, ...) are carried by every rule past
    /// the base network.
    pub fn mga(
        root: impl Into<Utf8PathBuf>,
        provider: impl BaseNetworkProvider + 'static,
        extra: &[Dimension],
        threads: usize,
    ) -> Self {
        use Dimension::*;

        let bundle = || {
            Layout::Bundle(
                SUMMARY_TABLES
                    .iter()
                    .copied()
                    .chain(["graphs"])
                    .map(ArcStr::from)
                    .collect(),
            )
        };

        Self::new(root, provider)
            .with_rule(Rule::external("base_network", &BASE_DIMENSIONS))
            .with_rule(
                Rule::artifact("solve_base", &BASE_DIMENSIONS)
                    .with_dimensions(extra)
                    .input(Pattern::new("base_network"))
                    .budget(Budget::Estimated)
                    .threads(threads),
            )
            .with_rule(
                Rule::checkpoint("generate_objectives", &BASE_DIMENSIONS)
                    .with_dimensions(&[Category])
                    .with_dimensions(extra)
                    .input(Pattern::new("solve_base"))
                    .budget(Budget::Fixed(2000)),
            )
            .with_rule(
                Rule::artifact("solve_alternative", &BASE_DIMENSIONS)
                    .with_dimensions(&ALTERNATIVE_DIMENSIONS)
                    .with_dimensions(extra)
                    .input(Pattern::new("solve_base"))
                    .input(Pattern::new("generate_objectives"))
                    .budget(Budget::Estimated)
                    .threads(threads),
            )
            .with_rule(
                Rule::artifact("summarize_alternatives", &BASE_DIMENSIONS)
                    .with_dimensions(&[Epsilon, Category])
                    .with_dimensions(extra)
                    .each(
                        Pattern::new("generate_objectives"),
                        Objective,
                        Pattern::new("solve_alternative"),
                    )
                    .budget(Budget::Fixed(4000))
                    .layout(bundle()),
            )
            .with_rule(
                Rule::artifact("report_base", &BASE_DIMENSIONS)
                    .with_dimensions(extra)
                    .input(Pattern::new("solve_base"))
                    .budget(Budget::Fixed(4000))
                    .layout(bundle()),
            )
            .with_terminal(Family::Scenario, "report_base")
            .with_terminal(Family::Alternative, "summarize_alternatives")
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }

    pub fn terminal(&self, family: Family) -> Option<&Rule> {
        self.terminals.get(&family).and_then(|name| self.rule(name))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Builds a target of the named rule.
    pub fn target(
        &self,
        registry: &DimensionRegistry,
        rule: &str,
        assignment: Assignment,
    ) -> Result<Target, ResolveError> {
        let rule = self
            .rule(rule)
            .ok_or_else(|| ResolveError::UnknownRule(rule.to_string()))?;

        Ok(Target::new(registry, rule.name(), rule.dimensions(), assignment)?)
    }

    /// Where the artifacts of `target` live.
    pub fn artifacts(&self, target: &Target) -> Vec<Utf8PathBuf> {
        match self.rule(target.rule()) {
            Some(rule) if rule.kind() == RuleKind::External => {
                vec![self.provider.locate(&BaseKey::new(target.assignment()))]
            }
            Some(rule) => rule.output_paths(&self.root, target),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Input;

    use Dimension::*;

    fn base() -> Assignment {
        Assignment::new()
            .with(Simpl, "")
            .with(Clusters, "10")
            .with(Ll, "v1.0")
            .with(Opts, "3h")
    }

    fn workflow() -> Workflow {
        Workflow::mga("results", NetworkDir("networks".into()), &[Year], 4)
    }

    #[test]
    fn test_mga_rules() {
        let workflow = workflow();

        let solve = workflow.rule("solve_alternative").unwrap();
        assert_eq!(
            solve.dimensions(),
            &[Simpl, Clusters, Ll, Opts, Epsilon, Category, Objective, Year]
        );
        assert_eq!(solve.get_threads(), 4);
        assert_eq!(solve.get_budget(), Budget::Estimated);

        let summary = workflow.terminal(Family::Alternative).unwrap();
        assert_eq!(summary.name(), "summarize_alternatives");
        assert!(matches!(
            summary.inputs(),
            [Input::Each { dimension: Objective, .. }]
        ));

        let base = workflow.rule("base_network").unwrap();
        assert_eq!(base.kind(), RuleKind::External);
        assert!(!base.dimensions().contains(&Year));

        assert_eq!(workflow.terminal(Family::Scenario).unwrap().name(), "report_base");
    }

    #[test]
    fn test_provided_artifact() {
        let workflow = workflow();
        let target = workflow
            .target(&DimensionRegistry::new(), "base_network", base())
            .unwrap();

        assert_eq!(
            workflow.artifacts(&target),
            vec![Utf8PathBuf::from("networks/elec_s_10_ec_lv1.0_3h.nc")]
        );
    }

    #[test]
    fn test_closure_provider() {
        let workflow = Workflow::mga(
            "results",
            |key: &BaseKey| Utf8PathBuf::from(format!("base/{}.nc", key.clusters)),
            &[],
            1,
        );
        let target = workflow
            .target(&DimensionRegistry::new(), "base_network", base())
            .unwrap();

        assert_eq!(workflow.artifacts(&target), vec![Utf8PathBuf::from("base/10.nc")]);
    }

    #[test]
    fn test_report_bundle() {
        let workflow = workflow();
        let target = workflow
            .target(&DimensionRegistry::new(), "report_base", base().with(Year, "2030"))
            .unwrap();

        let artifacts = workflow.artifacts(&target);
        assert_eq!(artifacts.len(), SUMMARY_TABLES.len() + 1);
        assert_eq!(
            artifacts[0],
            Utf8PathBuf::from("results/report_base/simpl-_clusters-10_ll-v1.0_opts-3h_year-2030/investments.csv")
        );
        assert!(artifacts.last().unwrap().ends_with("graphs"));
    }

    #[test]
    fn test_unknown_rule() {
        let err = workflow()
            .target(&DimensionRegistry::new(), "plot", base())
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnknownRule(name) if name == "plot"));
    }
}
