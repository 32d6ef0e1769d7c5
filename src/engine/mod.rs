//! Task graph construction and execution.

mod report;
mod resolver;
mod runner;

use std::fmt::Display;

use camino::Utf8PathBuf;
use serde::{Serialize, Serializer};

use crate::error::ResourceEstimationError;
use crate::estimate::Resources;
use crate::rule::RuleKind;
use crate::target::{Target, TargetId};

pub use report::{Failure, RunReport, TaskExecution};
pub use resolver::{Expansion, Resolver};
pub use runner::{Backend, Runner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting for a checkpoint before its inputs are known.
    Blocked,
    /// Inputs known, some not done yet.
    Pending,
    Ready,
    Running,
    Done,
    Failed,
    /// Downstream of a failure.
    Unreachable,
}

impl TaskState {
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            TaskState::Done | TaskState::Failed | TaskState::Unreachable
        )
    }
}

/// A materialized unit of work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: TargetId,
    pub target: Target,
    pub kind: RuleKind,
    /// Upstream targets, in rule declaration order.
    pub inputs: Vec<TargetId>,
    pub outputs: Vec<Utf8PathBuf>,
    #[serde(serialize_with = "serialize_resources")]
    pub resources: Result<Resources, ResourceEstimationError>,
    /// Checkpoints whose discovered lists this task still waits for.
    pub gates: Vec<TargetId>,
    pub state: TaskState,
}

impl Task {
    pub fn name(&self) -> String {
        self.target.to_string()
    }
}

fn serialize_resources<S: Serializer>(
    resources: &Result<Resources, ResourceEstimationError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match resources {
        Ok(resources) => resources.serialize(serializer),
        Err(e) => serializer.collect_map([("error", e.to_string())]),
    }
}

/// Tasks in a valid execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Plan {
    tasks: Vec<Task>,
}

impl Plan {
    pub(crate) fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: TargetId) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    /// Tasks of the named rule, in plan order.
    pub fn by_rule<'a>(&'a self, rule: &'a str) -> impl Iterator<Item = &'a Task> + 'a {
        self.tasks.iter().filter(move |task| task.target.rule() == rule)
    }

    /// Hand-off format for an external scheduler.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Renders the plan as a mermaid flowchart.
impl Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for task in &self.tasks {
            let name = task.name().replace('"', "\\\"");
            writeln!(f, "    {}[\"{}\"]", task.id, name)?;
            if task.state == TaskState::Blocked {
                writeln!(f, "    style {} stroke-dasharray: 5 5", task.id)?;
            }
        }

        for task in &self.tasks {
            for input in &task.inputs {
                if self.get(*input).is_some() {
                    writeln!(f, "    {} --> {}", input, task.id)?;
                }
            }
        }

        Ok(())
    }
}
