use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{Graph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};

use crate::checkpoint::CheckpointExecutor;
use crate::dimension::DimensionRegistry;
use crate::engine::{Plan, Task, TaskState};
use crate::error::{CycleError, ResolveError, UnresolvedCheckpointError};
use crate::estimate::{Resources, estimate};
use crate::rule::{Budget, Input, Rule, RuleKind};
use crate::target::{Assignment, Pattern, Target, TargetId};
use crate::workflow::Workflow;

/// What [`Resolver::expand`] changed.
#[derive(Debug, Default)]
pub struct Expansion {
    /// Tasks created for the requesters that expanded cleanly.
    pub added: Vec<TargetId>,
    /// Previously blocked tasks whose inputs are now fully known.
    pub unblocked: Vec<TargetId>,
    /// Requesters whose pattern targets could not be materialized. They stay
    /// blocked; the caller decides how to fail them.
    pub failed: Vec<(TargetId, ResolveError)>,
}

/// Builds the task graph lazily.
///
/// Targets are resolved depth first and memoized by identity, so a target
/// reachable along several paths becomes a single node. Inputs that depend on
/// a checkpoint's discovered list are left out until [`Resolver::expand`] is
/// called for that checkpoint; the requesting task stays
/// [`TaskState::Blocked`] until then.
pub struct Resolver {
    workflow: Arc<Workflow>,
    registry: Arc<DimensionRegistry>,
    checkpoints: Arc<CheckpointExecutor>,
    /// Edges point from an input to the task that requires it.
    graph: Graph<Task, ()>,
    memo: HashMap<TargetId, NodeIndex>,
}

impl Resolver {
    pub fn new(
        workflow: Arc<Workflow>,
        registry: Arc<DimensionRegistry>,
        checkpoints: Arc<CheckpointExecutor>,
    ) -> Self {
        Self {
            workflow,
            registry,
            checkpoints,
            graph: Graph::new(),
            memo: HashMap::new(),
        }
    }

    /// Resolves `target` and everything it needs, as far as currently known.
    pub fn resolve(&mut self, target: &Target) -> Result<Plan, ResolveError> {
        self.resolve_all(std::slice::from_ref(target))
    }

    /// Like [`Resolver::resolve`], for many targets sharing one plan.
    pub fn resolve_all(&mut self, targets: &[Target]) -> Result<Plan, ResolveError> {
        let mut roots = Vec::with_capacity(targets.len());
        for target in targets {
            roots.push(self.visit(target.clone(), &mut Vec::new())?);
        }

        tracing::debug!(
            requested = targets.len(),
            tasks = self.graph.node_count(),
            "resolved targets"
        );

        self.plan_for(&roots)
    }

    /// Materializes the targets gated by a finished checkpoint.
    ///
    /// Every task waiting on `checkpoint` gets one input per discovered
    /// identifier, in list order. Edges added this way are checked for cycles
    /// against the whole graph. Each requester is expanded on its own, so one
    /// that fails ends up in [`Expansion::failed`] without holding the others
    /// back.
    pub fn expand(&mut self, checkpoint: TargetId) -> Result<Expansion, ResolveError> {
        let name = self
            .task(checkpoint)
            .map(Task::name)
            .unwrap_or_else(|| checkpoint.to_string());

        if !self.checkpoints.is_done(checkpoint) {
            return Err(UnresolvedCheckpointError { checkpoint: name }.into());
        }
        let ids = self.checkpoints.read(checkpoint)?;

        let first_new = self.graph.node_count();
        let mut expansion = Expansion::default();
        let mut expanded = Vec::new();

        for requester in self.requesters(checkpoint) {
            let id = self.graph[requester].id;
            match self.expand_requester(requester) {
                Ok(unblocked) => {
                    expanded.push(requester);
                    if unblocked {
                        expansion.unblocked.push(id);
                    }
                }
                Err(e) => {
                    tracing::warn!(task = %self.graph[requester].target, "{e}");
                    expansion.failed.push((id, e));
                }
            }
        }

        // New tasks left behind by a failed requester are never scheduled.
        let reversed = Reversed(&self.graph);
        let mut needed = HashSet::new();
        for &root in &expanded {
            let mut dfs = Dfs::new(reversed, root);
            while let Some(index) = dfs.next(reversed) {
                if index.index() >= first_new {
                    needed.insert(index);
                }
            }
        }

        expansion.added = (first_new..self.graph.node_count())
            .map(NodeIndex::new)
            .filter(|index| needed.contains(index))
            .map(|index| self.graph[index].id)
            .collect();

        tracing::info!(
            checkpoint = %name,
            discovered = ids.len(),
            added = expansion.added.len(),
            unblocked = expansion.unblocked.len(),
            failed = expansion.failed.len(),
            "expanded checkpoint"
        );

        Ok(expansion)
    }

    /// Moves `id` from pending to ready once every input is done. Returns
    /// whether the task is ready now.
    pub fn promote(&mut self, id: TargetId) -> bool {
        let Some(task) = self.task(id) else {
            return false;
        };
        match task.state {
            TaskState::Ready => return true,
            TaskState::Pending => {}
            _ => return false,
        }

        let inputs_done = task
            .inputs
            .iter()
            .all(|input| self.task(*input).is_some_and(|t| t.state == TaskState::Done));

        if inputs_done {
            self.set_state(id, TaskState::Ready);
        }
        inputs_done
    }

    pub fn task(&self, id: TargetId) -> Option<&Task> {
        self.memo.get(&id).map(|&index| &self.graph[index])
    }

    pub fn set_state(&mut self, id: TargetId, state: TaskState) {
        if let Some(&index) = self.memo.get(&id) {
            self.graph[index].state = state;
        }
    }

    /// Tasks that list `id` as an input.
    pub fn dependents(&self, id: TargetId) -> Vec<TargetId> {
        self.memo
            .get(&id)
            .map(|&index| {
                self.graph
                    .neighbors_directed(index, Direction::Outgoing)
                    .map(|dependent| self.graph[dependent].id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every task downstream of `id`, excluding itself.
    pub fn descendants(&self, id: TargetId) -> Vec<TargetId> {
        let Some(&start) = self.memo.get(&id) else {
            return Vec::new();
        };

        let mut dfs = Dfs::new(&self.graph, start);
        let mut found = Vec::new();
        while let Some(index) = dfs.next(&self.graph) {
            if index != start {
                found.push(self.graph[index].id);
            }
        }
        found
    }

    /// Tasks blocked on `checkpoint`.
    pub fn waiting_on(&self, checkpoint: TargetId) -> Vec<TargetId> {
        self.requesters(checkpoint)
            .into_iter()
            .map(|index| self.graph[index].id)
            .collect()
    }

    /// The tasks `roots` need, `roots` included, in topological order.
    pub fn plan(&self, roots: &[TargetId]) -> Result<Plan, ResolveError> {
        let roots: Vec<NodeIndex> = roots
            .iter()
            .filter_map(|id| self.memo.get(id).copied())
            .collect();
        self.plan_for(&roots)
    }

    fn plan_for(&self, roots: &[NodeIndex]) -> Result<Plan, ResolveError> {
        let reversed = Reversed(&self.graph);
        let mut needed = HashSet::new();
        for &root in roots {
            let mut dfs = Dfs::new(reversed, root);
            while let Some(index) = dfs.next(reversed) {
                needed.insert(index);
            }
        }

        let order = toposort(&self.graph, None).map_err(|cycle| CycleError {
            path: vec![self.graph[cycle.node_id()].name()],
        })?;

        Ok(Plan::new(
            order
                .into_iter()
                .filter(|index| needed.contains(index))
                .map(|index| self.graph[index].clone())
                .collect(),
        ))
    }

    /// Re-resolves the inputs of a gated task now that more lists are known.
    /// Nothing is wired up unless every new edge is acyclic.
    fn expand_requester(&mut self, requester: NodeIndex) -> Result<bool, ResolveError> {
        let target = self.graph[requester].target.clone();
        let (inputs, gates) = self.inputs_of(&target, &mut vec![target.clone()])?;

        let known: HashSet<NodeIndex> = self
            .graph
            .neighbors_directed(requester, Direction::Incoming)
            .collect();
        let new: Vec<NodeIndex> = inputs
            .iter()
            .copied()
            .filter(|input| !known.contains(input))
            .collect();

        for &input in &new {
            if has_path_connecting(&self.graph, requester, input, None) {
                return Err(CycleError {
                    path: vec![
                        target.to_string(),
                        self.graph[input].name(),
                        target.to_string(),
                    ],
                }
                .into());
            }
        }
        for &input in &new {
            self.graph.add_edge(input, requester, ());
        }

        let input_ids = inputs.iter().map(|&i| self.graph[i].id).collect();
        let task = &mut self.graph[requester];
        task.inputs = input_ids;
        task.gates = gates;

        let unblocked = task.gates.is_empty() && task.state == TaskState::Blocked;
        if unblocked {
            task.state = TaskState::Pending;
        }
        Ok(unblocked)
    }

    fn requesters(&self, checkpoint: TargetId) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&index| self.graph[index].gates.contains(&checkpoint))
            .collect()
    }

    fn visit(&mut self, target: Target, path: &mut Vec<Target>) -> Result<NodeIndex, ResolveError> {
        let id = target.id();
        if let Some(&index) = self.memo.get(&id) {
            return Ok(index);
        }

        if let Some(start) = path.iter().position(|t| t.id() == id) {
            let mut cycle: Vec<String> = path[start..].iter().map(ToString::to_string).collect();
            cycle.push(target.to_string());
            return Err(CycleError { path: cycle }.into());
        }

        path.push(target.clone());
        let (inputs, gates) = self.inputs_of(&target, path)?;
        path.pop();

        let workflow = Arc::clone(&self.workflow);
        let rule = self.rule(&workflow, target.rule())?;
        let task = self.materialize(rule, target, &inputs, gates);

        tracing::trace!(task = %task.target, state = ?task.state, "materialized task");

        let index = self.graph.add_node(task);
        for &input in &inputs {
            self.graph.add_edge(input, index, ());
        }
        self.memo.insert(id, index);

        Ok(index)
    }

    /// Resolves the declared inputs of `target` in declaration order, and
    /// collects the checkpoints whose lists are still unknown.
    fn inputs_of(
        &mut self,
        target: &Target,
        path: &mut Vec<Target>,
    ) -> Result<(Vec<NodeIndex>, Vec<TargetId>), ResolveError> {
        let workflow = Arc::clone(&self.workflow);
        let rule = self.rule(&workflow, target.rule())?;

        let mut inputs = Vec::new();
        let mut gates = Vec::new();

        for input in rule.inputs() {
            match input {
                Input::Single(pattern) => {
                    let upstream = self.bind(&workflow, pattern, target)?;
                    inputs.push(self.visit(upstream, path)?);
                }
                Input::Each {
                    checkpoint,
                    dimension,
                    pattern,
                } => {
                    let gate = self.bind(&workflow, checkpoint, target)?;
                    if self.rule(&workflow, gate.rule())?.kind() != RuleKind::Checkpoint {
                        return Err(ResolveError::NotCheckpoint(gate.rule().to_string()));
                    }

                    let gate_id = gate.id();
                    inputs.push(self.visit(gate, path)?);

                    match self.checkpoints.discovered(gate_id) {
                        Some(ids) => {
                            for id in ids.iter() {
                                let assignment =
                                    target.assignment().clone().with(*dimension, id.clone());
                                let upstream = self.bind_assignment(&workflow, pattern, &assignment)?;
                                inputs.push(self.visit(upstream, path)?);
                            }
                        }
                        None => gates.push(gate_id),
                    }
                }
            }
        }

        // Repeated identifiers collapse onto one input.
        let mut seen = HashSet::new();
        inputs.retain(|index| seen.insert(*index));

        Ok((inputs, gates))
    }

    fn rule<'a>(&self, workflow: &'a Workflow, name: &str) -> Result<&'a Rule, ResolveError> {
        workflow
            .rule(name)
            .ok_or_else(|| ResolveError::UnknownRule(name.to_string()))
    }

    fn bind(
        &self,
        workflow: &Workflow,
        pattern: &Pattern,
        target: &Target,
    ) -> Result<Target, ResolveError> {
        self.bind_assignment(workflow, pattern, target.assignment())
    }

    fn bind_assignment(
        &self,
        workflow: &Workflow,
        pattern: &Pattern,
        assignment: &Assignment,
    ) -> Result<Target, ResolveError> {
        let rule = self.rule(workflow, pattern.rule())?;
        let bound = pattern.bind(rule.dimensions(), assignment)?;
        Ok(Target::new(
            &self.registry,
            rule.name(),
            rule.dimensions(),
            bound,
        )?)
    }

    fn materialize(
        &self,
        rule: &Rule,
        target: Target,
        inputs: &[NodeIndex],
        gates: Vec<TargetId>,
    ) -> Task {
        let threads = rule.get_threads();
        let resources = match rule.get_budget() {
            Budget::Estimated => estimate(target.assignment()).map(|mem_mb| Resources {
                mem_mb,
                threads,
            }),
            Budget::Fixed(mem_mb) => Ok(Resources { mem_mb, threads }),
        };

        if let Err(e) = &resources {
            tracing::warn!(task = %target, "{e}");
        }

        Task {
            id: target.id(),
            outputs: self.workflow.artifacts(&target),
            kind: rule.kind(),
            inputs: inputs.iter().map(|&index| self.graph[index].id).collect(),
            resources,
            state: if gates.is_empty() {
                TaskState::Pending
            } else {
                TaskState::Blocked
            },
            gates,
            target,
        }
    }
}
