use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use indicatif::ProgressStyle;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::checkpoint::CheckpointExecutor;
use crate::dimension::DimensionRegistry;
use crate::engine::report::{Failure, RunReport, TaskExecution};
use crate::engine::{Resolver, Task, TaskState};
use crate::error::{SharedError, SweepError};
use crate::rule::RuleKind;
use crate::target::{Target, TargetId};
use crate::utils::panic_error;
use crate::workflow::Workflow;

/// Carries out a single task, usually by handing it to a solver or a report
/// script. Checkpoint tasks must write their discovered identifiers to
/// `task.outputs[0]`, see [`crate::checkpoint::DiscoveredIds::write`].
pub trait Backend: Send + Sync {
    fn run(&self, task: &Task) -> anyhow::Result<()>;
}

impl<F> Backend for F
where
    F: Fn(&Task) -> anyhow::Result<()> + Send + Sync,
{
    fn run(&self, task: &Task) -> anyhow::Result<()> {
        self(task)
    }
}

/// (task, outcome, start, duration, executed)
type Message = (TargetId, anyhow::Result<()>, Instant, Duration, bool);

/// Resolves targets and runs the resulting graph in parallel.
pub struct Runner {
    workflow: Arc<Workflow>,
    registry: Arc<DimensionRegistry>,
    backend: Arc<dyn Backend>,
}

impl Runner {
    pub fn new(
        workflow: Arc<Workflow>,
        registry: Arc<DimensionRegistry>,
        backend: impl Backend + 'static,
    ) -> Self {
        Self {
            workflow,
            registry,
            backend: Arc::new(backend),
        }
    }

    /// Runs everything `targets` need.
    ///
    /// Every run starts a fresh checkpoint epoch. Validation and cycle errors
    /// among the requested targets abort before anything runs; any later
    /// failure only takes its own subtree down and ends up in the report.
    ///
    /// Tasks are executed on the rayon pool as soon as their inputs are done.
    /// The graph itself is only touched from the calling thread, which waits
    /// for results on a channel, expands finished checkpoints and spawns
    /// whatever became ready.
    pub fn run(&self, targets: &[Target]) -> Result<RunReport, SweepError> {
        let checkpoints = Arc::new(CheckpointExecutor::new());
        let mut resolver = Resolver::new(
            self.workflow.clone(),
            self.registry.clone(),
            checkpoints.clone(),
        );

        let plan = resolver.resolve_all(targets)?;
        let roots: Vec<TargetId> = targets.iter().map(Target::id).collect();

        let mut report = RunReport::default();
        if plan.is_empty() {
            return Ok(report);
        }

        let root_span = tracing::span!(Level::INFO, "running_tasks");
        root_span.pb_set_length(plan.len() as u64);
        root_span.pb_set_style(
            &ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
                .progress_chars("=>-"),
        );
        root_span.pb_set_message("Running tasks...");
        let _enter = root_span.enter();

        // regular task style with no progress
        let pb_style = crate::utils::get_style_task()?;

        let backend = &*self.backend;
        let checkpoints = &*checkpoints;

        rayon::in_place_scope(|s| {
            let (result_sender, result_receiver) = channel::<Message>();

            // A helper closure to spawn a task
            let spawn_task = |task: Task| {
                let sender = result_sender.clone();

                // Nothing to run for provided artifacts; tasks that cannot be
                // sized fail without running.
                let skipped = match (&task.kind, &task.resources) {
                    (RuleKind::External, _) => Some(Ok(())),
                    (_, Err(e)) => Some(Err(anyhow::Error::from(e.clone()))),
                    _ => None,
                };
                if let Some(outcome) = skipped {
                    let _ = sender.send((task.id, outcome, Instant::now(), Duration::ZERO, false));
                    return;
                }

                let pb_style = pb_style.clone();

                // Spawn on Rayon pool
                s.spawn(move |_| {
                    let span = tracing::span!(Level::INFO, "task", name = %task.target);
                    span.pb_set_style(&pb_style);
                    span.pb_set_message(&format!("Running {}", task.target));
                    let _enter = span.enter();

                    let start_time = Instant::now();

                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        execute(backend, checkpoints, &task)
                    }))
                    .unwrap_or_else(|panic| Err(panic_error(&*panic)));

                    let elapsed = start_time.elapsed();
                    let _ = sender.send((task.id, outcome, start_time, elapsed, true));
                });
            };

            let mut in_flight = 0usize;
            let mut candidates: VecDeque<TargetId> = plan.tasks().iter().map(|t| t.id).collect();
            let mut ready: VecDeque<TargetId> = VecDeque::new();

            loop {
                while let Some(id) = candidates.pop_front() {
                    if resolver.promote(id) && !ready.contains(&id) {
                        tracing::debug!(task = %id, "task ready");
                        ready.push_back(id);
                    }
                }

                // Spawn whatever became ready
                while let Some(id) = ready.pop_front() {
                    if let Some(task) = claim(&mut resolver, id) {
                        in_flight += 1;
                        spawn_task(task);
                    }
                }

                if in_flight == 0 {
                    break;
                }

                // Wait for any task to finish
                let Ok((id, outcome, start, duration, executed)) = result_receiver.recv() else {
                    break;
                };
                in_flight -= 1;
                root_span.pb_inc(1);

                if executed {
                    report
                        .execution_times
                        .insert(id, TaskExecution { start, duration });
                }

                match outcome {
                    Ok(()) => {
                        resolver.set_state(id, TaskState::Done);
                        report.done.push(id);

                        let is_checkpoint = resolver
                            .task(id)
                            .is_some_and(|task| task.kind == RuleKind::Checkpoint);

                        if is_checkpoint {
                            match resolver.expand(id) {
                                Ok(expansion) => {
                                    for (requester, e) in expansion.failed {
                                        fail(&mut resolver, &mut report, requester, SharedError::new(e));
                                    }
                                    root_span.pb_inc_length(expansion.added.len() as u64);
                                    candidates.extend(expansion.added);
                                    candidates.extend(expansion.unblocked);
                                }
                                Err(e) => {
                                    let error = SharedError::new(e);
                                    for waiting in resolver.waiting_on(id) {
                                        fail(&mut resolver, &mut report, waiting, error.clone());
                                    }
                                }
                            }
                        }

                        candidates.extend(resolver.dependents(id));
                    }
                    Err(e) => fail(&mut resolver, &mut report, id, SharedError::from(e)),
                }
            }
        });

        // Anything still open here can no longer make progress.
        for task in resolver.plan(&roots)?.tasks() {
            let Some(state) = resolver
                .task(task.id)
                .map(|task| task.state)
                .filter(|state| !state.is_settled())
            else {
                continue;
            };
            let error = anyhow::anyhow!("Task never became ready (left {state:?})");
            fail(&mut resolver, &mut report, task.id, SharedError::from(error));
        }

        report.plan = resolver.plan(&roots)?;

        if report.is_success() {
            tracing::info!(done = report.done.len(), "Run complete!");
        } else {
            tracing::warn!(
                done = report.done.len(),
                failed = report.failures.len(),
                unreachable = report.unreachable.len(),
                "Run finished with failures"
            );
        }

        Ok(report)
    }
}

/// Runs a task on the current thread. Checkpoints go through the executor so
/// each identity runs once.
fn execute(backend: &dyn Backend, checkpoints: &CheckpointExecutor, task: &Task) -> anyhow::Result<()> {
    match task.kind {
        RuleKind::Checkpoint => {
            let artifact = task
                .outputs
                .first()
                .ok_or_else(|| anyhow::anyhow!("Checkpoint '{}' has no artifact", task.target))?;

            checkpoints.ensure_executed(&task.target, artifact, || backend.run(task))?;
            Ok(())
        }
        _ => backend.run(task),
    }
}

/// Claims a ready task for execution.
fn claim(resolver: &mut Resolver, id: TargetId) -> Option<Task> {
    let mut task = resolver.task(id).filter(|t| t.state == TaskState::Ready)?.clone();
    resolver.set_state(id, TaskState::Running);
    task.state = TaskState::Running;
    Some(task)
}

/// Marks `id` failed and everything downstream of it unreachable.
fn fail(resolver: &mut Resolver, report: &mut RunReport, id: TargetId, error: SharedError) {
    let Some(task) = resolver.task(id) else {
        return;
    };

    tracing::error!(task = %task.target, "{error}");
    report.failures.push(Failure {
        target: task.target.clone(),
        error,
    });
    resolver.set_state(id, TaskState::Failed);

    let mut unreachable: Vec<(TargetId, Target)> = Vec::new();
    for downstream in resolver.descendants(id) {
        if let Some(task) = resolver.task(downstream)
            && !task.state.is_settled()
        {
            unreachable.push((downstream, task.target.clone()));
        }
    }

    for (downstream, target) in unreachable {
        resolver.set_state(downstream, TaskState::Unreachable);
        report.unreachable.push(target);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::checkpoint::DiscoveredIds;
    use crate::dimension::Dimension;
    use crate::target::Assignment;
    use crate::workflow::NetworkDir;

    use Dimension::*;

    fn base(clusters: &str) -> Assignment {
        Assignment::new()
            .with(Simpl, "")
            .with(Clusters, clusters)
            .with(Ll, "v1.0")
            .with(Opts, "")
    }

    fn setup() -> (tempfile::TempDir, Arc<Workflow>, Arc<DimensionRegistry>) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let workflow = Workflow::mga(root, NetworkDir("networks".into()), &[], 2);
        (dir, Arc::new(workflow), Arc::new(DimensionRegistry::new()))
    }

    /// Writes two objectives per category and records which rules ran.
    fn backend(log: Arc<Mutex<Vec<String>>>) -> impl Backend {
        move |task: &Task| -> anyhow::Result<()> {
            log.lock().unwrap().push(task.target.rule().to_string());
            if task.kind == RuleKind::Checkpoint {
                let category = task.target.assignment().get(Category).unwrap_or_default();
                DiscoveredIds::write(
                    &task.outputs[0],
                    [format!("{category}-max"), format!("{category}-min")],
                )?;
            }
            Ok(())
        }
    }

    fn count(log: &Mutex<Vec<String>>, rule: &str) -> usize {
        log.lock().unwrap().iter().filter(|name| *name == rule).count()
    }

    #[test]
    fn test_run_mga() {
        let (_dir, workflow, registry) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        let runner = Runner::new(workflow.clone(), registry.clone(), backend(log.clone()));

        let targets = [
            workflow
                .target(&registry, "report_base", base("10"))
                .unwrap(),
            workflow
                .target(
                    &registry,
                    "summarize_alternatives",
                    base("10").with(Epsilon, "0.05").with(Category, "wind"),
                )
                .unwrap(),
            workflow
                .target(
                    &registry,
                    "summarize_alternatives",
                    base("10").with(Epsilon, "0.1").with(Category, "wind"),
                )
                .unwrap(),
        ];

        let report = runner.run(&targets).unwrap();

        assert!(report.is_success(), "{:?}", report.failures);
        assert_eq!(count(&log, "base_network"), 0);
        assert_eq!(count(&log, "solve_base"), 1);
        assert_eq!(count(&log, "generate_objectives"), 1);
        assert_eq!(count(&log, "solve_alternative"), 4);
        assert_eq!(count(&log, "summarize_alternatives"), 2);
        assert_eq!(count(&log, "report_base"), 1);

        // base, solve, objectives, four alternatives, two summaries, report
        assert_eq!(report.plan.len(), 10);
        assert_eq!(report.done.len(), 10);
        assert!(report.plan.tasks().iter().all(|t| t.state == TaskState::Done));

        let summary = report.plan.get(targets[1].id()).unwrap();
        assert_eq!(summary.inputs.len(), 3);
        assert!(report.render_mermaid().contains(&summary.id.to_string()));
    }

    #[test]
    fn test_failure_only_takes_its_subtree() {
        let (_dir, workflow, registry) = setup();
        let runner = Runner::new(workflow.clone(), registry.clone(), |task: &Task| -> anyhow::Result<()> {
            if task.target.rule() == "solve_base"
                && task.target.assignment().get(Clusters) == Some("20")
            {
                anyhow::bail!("infeasible");
            }
            Ok(())
        });

        let ok = workflow.target(&registry, "report_base", base("10")).unwrap();
        let broken = workflow.target(&registry, "report_base", base("20")).unwrap();

        let report = runner.run(&[ok.clone(), broken.clone()]).unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].target.rule(), "solve_base");
        assert_eq!(report.unreachable, vec![broken.clone()]);
        assert_eq!(report.state(ok.id()), Some(TaskState::Done));
        assert_eq!(report.state(broken.id()), Some(TaskState::Unreachable));
    }

    #[test]
    fn test_failed_checkpoint_blocks_alternatives() {
        let (_dir, workflow, registry) = setup();
        let runner = Runner::new(workflow.clone(), registry.clone(), |task: &Task| -> anyhow::Result<()> {
            if task.kind == RuleKind::Checkpoint {
                anyhow::bail!("no objectives");
            }
            Ok(())
        });

        let summary = workflow
            .target(
                &registry,
                "summarize_alternatives",
                base("10").with(Epsilon, "0.05").with(Category, "wind"),
            )
            .unwrap();
        let report_base = workflow.target(&registry, "report_base", base("10")).unwrap();

        let report = runner.run(&[summary.clone(), report_base.clone()]).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].target.rule(), "generate_objectives");
        assert_eq!(report.state(summary.id()), Some(TaskState::Unreachable));
        assert_eq!(report.state(report_base.id()), Some(TaskState::Done));
    }

    #[test]
    fn test_cyclic_requester_only_fails_itself() {
        use crate::rule::Rule;
        use crate::target::Pattern;

        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let workflow = Workflow::new(root.as_str(), NetworkDir("n".into()))
            .with_rule(Rule::checkpoint("discover", &[Clusters]))
            .with_rule(Rule::artifact("member_ok", &[Clusters, Objective]))
            .with_rule(Rule::artifact("collect_ok", &[Clusters]).each(
                Pattern::new("discover"),
                Objective,
                Pattern::new("member_ok"),
            ))
            .with_rule(
                Rule::artifact("member_bad", &[Clusters, Objective])
                    .input(Pattern::new("collect_bad")),
            )
            .with_rule(Rule::artifact("collect_bad", &[Clusters]).each(
                Pattern::new("discover"),
                Objective,
                Pattern::new("member_bad"),
            ));
        let workflow = Arc::new(workflow);
        let registry = Arc::new(DimensionRegistry::new());

        let ran = Arc::new(Mutex::new(Vec::new()));
        let log = ran.clone();
        let runner = Runner::new(workflow.clone(), registry.clone(), move |task: &Task| -> anyhow::Result<()> {
            log.lock().unwrap().push(task.target.rule().to_string());
            if task.kind == RuleKind::Checkpoint {
                DiscoveredIds::write(&task.outputs[0], ["x"])?;
            }
            Ok(())
        });

        let clusters = || Assignment::new().with(Clusters, "10");
        let bad = workflow.target(&registry, "collect_bad", clusters()).unwrap();
        let ok = workflow.target(&registry, "collect_ok", clusters()).unwrap();
        let member = workflow
            .target(&registry, "member_ok", clusters().with(Objective, "x"))
            .unwrap();

        let report = runner.run(&[bad.clone(), ok.clone()]).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].target, bad);
        assert!(report.failures[0].error.to_string().contains("Cycle"));
        assert_eq!(report.state(bad.id()), Some(TaskState::Failed));
        assert_eq!(report.state(ok.id()), Some(TaskState::Done));
        assert_eq!(report.state(member.id()), Some(TaskState::Done));
        assert!(report.plan.tasks().iter().all(|t| t.state.is_settled()));
        assert_eq!(count(&ran, "collect_ok"), 1);
        assert_eq!(count(&ran, "member_bad"), 0);
    }

    #[test]
    fn test_estimation_error_fails_task() {
        let (_dir, workflow, registry) = setup();
        let ran = Arc::new(Mutex::new(Vec::new()));
        let runner = Runner::new(workflow.clone(), registry.clone(), backend(ran.clone()));

        let target = workflow.target(&registry, "report_base", base("all")).unwrap();
        let report = runner.run(&[target.clone()]).unwrap();

        assert_eq!(count(&ran, "solve_base"), 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.unreachable, vec![target]);
    }

    #[test]
    fn test_panicking_backend() {
        let (_dir, workflow, registry) = setup();
        let runner = Runner::new(workflow.clone(), registry.clone(), |task: &Task| -> anyhow::Result<()> {
            if task.target.rule() == "report_base" {
                panic!("boom");
            }
            Ok(())
        });

        let target = workflow.target(&registry, "report_base", base("10")).unwrap();
        let report = runner.run(&[target.clone()]).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.to_string().contains("boom"));
        assert_eq!(report.state(target.id()), Some(TaskState::Failed));
    }

    #[test]
    fn test_invalid_target_aborts() {
        let (_dir, workflow, registry) = setup();
        let ran = Arc::new(Mutex::new(Vec::new()));
        let runner = Runner::new(workflow.clone(), registry.clone(), backend(ran.clone()));

        let broken = Workflow::new("results", NetworkDir("n".into()))
            .with_rule(crate::rule::Rule::artifact("report_base", &[Clusters]));
        let target = broken
            .target(&registry, "report_base", Assignment::new().with(Clusters, "10"))
            .unwrap();

        // Same name, but the runner's workflow declares other dimensions.
        assert!(runner.run(&[target]).is_err());
        assert!(ran.lock().unwrap().is_empty());
    }
}
