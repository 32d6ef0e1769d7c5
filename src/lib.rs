#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod checkpoint;
mod config;
mod core;
mod dimension;
mod engine;
mod error;
mod estimate;
mod rule;
mod scenario;
mod target;
mod utils;
mod workflow;

use std::sync::Arc;

use camino::Utf8Path;

pub use crate::checkpoint::{CheckpointExecutor, DiscoveredIds};
pub use crate::config::{BaseScenario, BaseValue, Config, Group, ResourceConfig, Scalar};
pub use crate::core::Hash32;
pub use crate::dimension::{Dimension, DimensionRegistry};
pub use crate::engine::{
    Backend, Expansion, Failure, Plan, Resolver, RunReport, Runner, Task, TaskExecution, TaskState,
};
pub use crate::error::*;
pub use crate::estimate::{Resources, estimate, solver_options};
pub use crate::rule::{Budget, Input, Layout, Rule, RuleKind};
pub use crate::scenario::{Family, GroupKind, ScenarioSpace};
pub use crate::target::{Assignment, Binding, Pattern, Target, TargetId};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
pub use crate::workflow::{
    ALTERNATIVE_DIMENSIONS, BASE_DIMENSIONS, BaseKey, BaseNetworkProvider, NetworkDir,
    SUMMARY_TABLES, Workflow,
};

/// Resolves a single target against `workflow`, with no checkpoint run yet.
///
/// Branches behind checkpoints stay blocked in the returned plan.
pub fn resolve(
    workflow: Arc<Workflow>,
    registry: Arc<DimensionRegistry>,
    target: &Target,
) -> Result<Plan, ResolveError> {
    Resolver::new(workflow, registry, Arc::new(CheckpointExecutor::new())).resolve(target)
}

/// A configured sweep: the scenario space and the workflow it is resolved
/// against.
pub struct Sweep {
    config: Arc<Config>,
    registry: Arc<DimensionRegistry>,
    workflow: Arc<Workflow>,
}

impl Sweep {
    /// Uses the default MGA workflow with base networks expected under
    /// `<results_dir>/networks`.
    pub fn new(config: Config) -> Result<Self, SweepError> {
        let networks = NetworkDir(config.results_dir.join("networks"));
        Self::with_provider(config, networks)
    }

    pub fn with_provider(
        config: Config,
        provider: impl BaseNetworkProvider + 'static,
    ) -> Result<Self, SweepError> {
        let registry = config.registry()?;
        let extra = config.extra_dimensions()?;
        let workflow = Workflow::mga(
            config.results_dir.clone(),
            provider,
            &extra,
            config.resources.threads,
        );

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            workflow: Arc::new(workflow),
        })
    }

    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, SweepError> {
        Self::new(Config::load(path)?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn registry(&self) -> &DimensionRegistry {
        &self.registry
    }

    /// Terminal targets of both families: one `report_base` per scenario and
    /// one `summarize_alternatives` per alternative.
    pub fn targets(&self) -> Result<Vec<Target>, SweepError> {
        let space = ScenarioSpace::new(self.config.clone(), self.registry.clone())?;
        let mut targets = Vec::new();

        for family in [Family::Scenario, Family::Alternative] {
            let Some(rule) = self.workflow.terminal(family) else {
                continue;
            };

            for assignment in space.enumerate(family)? {
                let target = Target::new(&self.registry, rule.name(), rule.dimensions(), assignment)?;
                targets.push(target);
            }
        }

        tracing::info!(targets = targets.len(), "enumerated terminal targets");
        Ok(targets)
    }

    /// The plan as far as it is known before any checkpoint runs.
    pub fn plan(&self) -> Result<Plan, SweepError> {
        let targets = self.targets()?;
        let mut resolver = Resolver::new(
            self.workflow.clone(),
            self.registry.clone(),
            Arc::new(CheckpointExecutor::new()),
        );
        Ok(resolver.resolve_all(&targets)?)
    }

    /// Runs the whole sweep through `backend`.
    pub fn run(&self, backend: impl Backend + 'static) -> Result<RunReport, SweepError> {
        let targets = self.targets()?;
        Runner::new(self.workflow.clone(), self.registry.clone(), backend).run(&targets)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use camino::Utf8PathBuf;

    use super::*;

    const CONFIG: &str = r#"
scenario:
  simpl: ['']
  ll: ['v1.0']
scenario-totals:
  clusters: [10, 20]
  opts: ['3h']
alternative-totals:
  clusters: [10]
  opts: ['3h']
  epsilon: [0.05, 0.1]
  category: ['wind', 'solar']
"#;

    fn sweep(root: &Utf8Path) -> Sweep {
        let mut config = Config::from_yaml(CONFIG).unwrap();
        config.results_dir = root.to_owned();
        Sweep::new(config).unwrap()
    }

    #[test]
    fn test_targets() {
        let sweep = sweep(Utf8Path::new("results"));
        let targets = sweep.targets().unwrap();

        assert_eq!(targets.len(), 6);
        assert_eq!(targets.iter().filter(|t| t.rule() == "report_base").count(), 2);
        assert_eq!(
            targets
                .iter()
                .filter(|t| t.rule() == "summarize_alternatives")
                .count(),
            4
        );
    }

    #[test]
    fn test_plan_before_checkpoints() {
        let sweep = sweep(Utf8Path::new("results"));
        let plan = sweep.plan().unwrap();

        assert_eq!(plan.by_rule("solve_base").count(), 2);
        assert_eq!(plan.by_rule("generate_objectives").count(), 2);
        assert_eq!(plan.by_rule("solve_alternative").count(), 0);
        assert!(
            plan.by_rule("summarize_alternatives")
                .all(|task| task.state == TaskState::Blocked)
        );

        let base = plan.by_rule("base_network").next().unwrap();
        assert!(base.outputs[0].starts_with("results/networks"));

        let mermaid = plan.to_string();
        assert!(mermaid.starts_with("graph LR\n"));
        assert!(mermaid.contains("stroke-dasharray"));

        let json: serde_json::Value = serde_json::from_str(&plan.to_json().unwrap()).unwrap();
        assert_eq!(json.as_array().unwrap().len(), plan.len());
    }

    #[test]
    fn test_run() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let sweep = sweep(&root);

        let solved = Arc::new(Mutex::new(Vec::new()));
        let log = solved.clone();
        let report = sweep
            .run(move |task: &Task| -> anyhow::Result<()> {
                match task.kind {
                    RuleKind::Checkpoint => {
                        DiscoveredIds::write(&task.outputs[0], ["max", "min", "max"])?;
                    }
                    _ if task.target.rule() == "solve_alternative" => {
                        log.lock().unwrap().push(task.target.clone());
                    }
                    _ => {}
                }
                Ok(())
            })
            .unwrap();

        assert!(report.is_success());
        // two epsilons, two categories, two distinct objectives each
        assert_eq!(solved.lock().unwrap().len(), 8);
    }

    #[test]
    fn test_resolve_entry_point() {
        let sweep = sweep(Utf8Path::new("results"));
        let target = sweep.targets().unwrap().remove(0);

        let plan = resolve(sweep.workflow.clone(), sweep.registry.clone(), &target).unwrap();
        assert_eq!(plan.len(), 3);
    }
}
