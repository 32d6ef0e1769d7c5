use std::collections::HashMap;
use std::fmt::Write;
use std::time::{Duration, Instant};

use crate::engine::{Plan, TaskState};
use crate::error::SharedError;
use crate::target::{Target, TargetId};

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// A task that failed, and why.
#[derive(Debug, Clone)]
pub struct Failure {
    pub target: Target,
    pub error: SharedError,
}

/// Outcome of a run. Failures only take their own subtree down, so a report
/// can hold finished work and failures side by side.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Every task the run knew about when it ended.
    pub plan: Plan,
    pub execution_times: HashMap<TargetId, TaskExecution>,
    pub done: Vec<TargetId>,
    pub failures: Vec<Failure>,
    /// Tasks never started because something upstream failed.
    pub unreachable: Vec<Target>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.unreachable.is_empty()
    }

    pub fn state(&self, id: TargetId) -> Option<TaskState> {
        self.plan.get(id).map(|task| task.state)
    }

    /// Renders the run as a mermaid flowchart. Executed tasks are coloured
    /// from green to red by duration, failures red, unreachable tasks grey.
    pub fn render_mermaid(&self) -> String {
        let mut f = String::new();
        let _ = writeln!(f, "graph LR");

        let times = &self.execution_times;
        let mut min_time = f64::MAX;
        let mut max_time = f64::MIN;

        for t in times.values() {
            let secs = t.duration.as_secs_f64();
            min_time = min_time.min(secs);
            max_time = max_time.max(secs);
        }

        if min_time > max_time {
            min_time = 0.0;
            max_time = 0.0;
        }

        if (max_time - min_time).abs() < f64::EPSILON {
            max_time = min_time + 1.0;
        }

        for task in self.plan.tasks() {
            let name = task.name().replace('"', "\\\"");

            let (label, color) = match (task.state, times.get(&task.id)) {
                (TaskState::Done, Some(exec)) => {
                    let t = (exec.duration.as_secs_f64() - min_time) / (max_time - min_time);
                    (format!("{:.2?}", exec.duration), gradient(t))
                }
                (TaskState::Done, None) => ("provided".to_string(), "#ADD8E6".to_string()),
                (TaskState::Failed, _) => ("failed".to_string(), "#FF6B6B".to_string()),
                (TaskState::Unreachable, _) => ("unreachable".to_string(), "#D3D3D3".to_string()),
                (state, _) => (format!("{state:?}").to_lowercase(), "#FFFFFF".to_string()),
            };

            let _ = writeln!(f, "    {}[\"{}\\n{}\"]", task.id, name, label);
            let _ = writeln!(f, "    style {} fill:{}", task.id, color);
        }

        for task in self.plan.tasks() {
            for input in &task.inputs {
                let _ = writeln!(f, "    {} --> {}", input, task.id);
            }
        }

        f
    }
}

/// Green at 0.0, yellow at 0.5, red at 1.0.
fn gradient(t: f64) -> String {
    let (r, g) = if t < 0.5 {
        ((255.0 * t * 2.0) as u8, 255)
    } else {
        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8)
    };
    format!("#{r:02X}{g:02X}00")
}
