//! Rule declarations: what a rule takes, what it produces and what it costs.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::core::ArcStr;
use crate::dimension::Dimension;
use crate::target::{Pattern, Target};

/// How a rule's tasks are carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Produces files through the backend.
    Artifact,
    /// Produces a list of identifiers that shapes the rest of the graph.
    Checkpoint,
    /// Already provided by someone else, never executed.
    External,
}

/// Memory policy of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Sized by [`crate::estimate::estimate`] from the target's assignment.
    Estimated,
    /// Constant, in megabytes.
    Fixed(u64),
}

/// A declared input of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Exactly one upstream target.
    Single(Pattern),
    /// One upstream target per identifier discovered by `checkpoint`. Each
    /// identifier is assigned to `dimension` before `pattern` is bound.
    Each {
        checkpoint: Pattern,
        dimension: Dimension,
        pattern: Pattern,
    },
}

/// Where a rule's outputs live, relative to the results directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// `<root>/<rule>/<stem>.<ext>`
    File(ArcStr),
    /// `<root>/<rule>/<stem>/<entry>` for every entry.
    Bundle(Vec<ArcStr>),
    /// Located by the base network provider.
    Provided,
}

#[derive(Debug, Clone)]
pub struct Rule {
    name: ArcStr,
    dimensions: Vec<Dimension>,
    inputs: Vec<Input>,
    kind: RuleKind,
    budget: Budget,
    threads: usize,
    layout: Layout,
}

impl Rule {
    fn new(name: impl Into<ArcStr>, dimensions: &[Dimension], kind: RuleKind) -> Self {
        Self {
            name: name.into(),
            dimensions: dimensions.to_vec(),
            inputs: Vec::new(),
            kind,
            budget: Budget::Fixed(0),
            threads: 1,
            layout: match kind {
                RuleKind::Artifact => Layout::File("nc".into()),
                RuleKind::Checkpoint => Layout::File("txt".into()),
                RuleKind::External => Layout::Provided,
            },
        }
    }

    pub fn artifact(name: impl Into<ArcStr>, dimensions: &[Dimension]) -> Self {
        Self::new(name, dimensions, RuleKind::Artifact)
    }

    pub fn checkpoint(name: impl Into<ArcStr>, dimensions: &[Dimension]) -> Self {
        Self::new(name, dimensions, RuleKind::Checkpoint)
    }

    pub fn external(name: impl Into<ArcStr>, dimensions: &[Dimension]) -> Self {
        Self::new(name, dimensions, RuleKind::External)
    }

    pub fn input(mut self, pattern: Pattern) -> Self {
        self.inputs.push(Input::Single(pattern));
        self
    }

    pub fn each(mut self, checkpoint: Pattern, dimension: Dimension, pattern: Pattern) -> Self {
        self.inputs.push(Input::Each {
            checkpoint,
            dimension,
            pattern,
        });
        self
    }

    pub fn budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Appends dimensions the rule does not declare yet.
    pub fn with_dimensions(mut self, extra: &[Dimension]) -> Self {
        for dimension in extra {
            if !self.dimensions.contains(dimension) {
                self.dimensions.push(*dimension);
            }
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn get_budget(&self) -> Budget {
        self.budget
    }

    pub fn get_threads(&self) -> usize {
        self.threads
    }

    /// Output paths of `target` under `root`. Empty for provided layouts,
    /// which only the workflow's provider can locate.
    pub fn output_paths(&self, root: &Utf8Path, target: &Target) -> Vec<Utf8PathBuf> {
        let stem = match target.assignment().stem() {
            stem if stem.is_empty() => String::from("all"),
            stem => stem,
        };

        let dir = root.join(self.name.as_ref());

        match &self.layout {
            Layout::File(ext) => vec![dir.join(format!("{stem}.{ext}"))],
            Layout::Bundle(entries) => {
                let dir = dir.join(stem);
                entries.iter().map(|entry| dir.join(entry.as_ref())).collect()
            }
            Layout::Provided => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::DimensionRegistry;
    use crate::target::Assignment;

    use Dimension::*;

    fn target(dimensions: &[Dimension], assignment: Assignment) -> Target {
        Target::new(&DimensionRegistry::new(), "solve_base", dimensions, assignment).unwrap()
    }

    #[test]
    fn test_defaults() {
        let rule = Rule::checkpoint("generate_objectives", &[Clusters]);
        assert_eq!(rule.kind(), RuleKind::Checkpoint);
        assert_eq!(rule.get_budget(), Budget::Fixed(0));
        assert_eq!(rule.get_threads(), 1);
        assert!(rule.inputs().is_empty());
    }

    #[test]
    fn test_with_dimensions_appends_once() {
        let rule = Rule::artifact("solve_base", &[Clusters, Opts]).with_dimensions(&[Year, Opts]);
        assert_eq!(rule.dimensions(), &[Clusters, Opts, Year]);
    }

    #[test]
    fn test_file_output() {
        let rule = Rule::artifact("solve_base", &[Clusters, Opts]);
        let target = target(
            &[Clusters, Opts],
            Assignment::new().with(Clusters, "10").with(Opts, "3h"),
        );

        assert_eq!(
            rule.output_paths(Utf8Path::new("results"), &target),
            vec![Utf8PathBuf::from("results/solve_base/clusters-10_opts-3h.nc")]
        );
    }

    #[test]
    fn test_bundle_output() {
        let rule = Rule::artifact("report_base", &[Clusters])
            .layout(Layout::Bundle(vec!["energy.csv".into(), "graphs".into()]));
        let target = target(&[Clusters], Assignment::new().with(Clusters, "10"));

        assert_eq!(
            rule.output_paths(Utf8Path::new("out"), &target),
            vec![
                Utf8PathBuf::from("out/report_base/clusters-10/energy.csv"),
                Utf8PathBuf::from("out/report_base/clusters-10/graphs"),
            ]
        );
    }

    #[test]
    fn test_provided_output_is_empty() {
        let rule = Rule::external("base_network", &[]);
        let target = target(&[], Assignment::new());
        assert!(rule.output_paths(Utf8Path::new("out"), &target).is_empty());
    }
}
