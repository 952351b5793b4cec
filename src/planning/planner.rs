//! Sampling-based planner over the product of workspace and
//! specification automaton
//!
//! Each iteration samples a configuration, extends the tree toward it,
//! re-parents neighbors through the new vertex when that lowers their
//! cost, and records plan candidates whose acceptance the automaton
//! certifies. An iteration either fully commits its insertion and
//! rewiring or discards the sample.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info};
use ordered_float::NotNan;

use crate::common::{
    Automaton, Diagnostics, LabelSet, Plan, PlannerError, PlannerResult, Point2D, WorkspaceModel,
};
use crate::ltl::SpecAutomaton;
use crate::planning::product_graph::ProductGraph;
use crate::planning::sampler::{interpolate, steer, SampleBias, Sampler};
use crate::workspace::{Bounds2D, RegionSpec, Workspace2D};

/// An edge the planner may insert: collision free and crossing at most
/// one region boundary, so a single automaton step covers it
pub(crate) fn admissible_edge<W: WorkspaceModel>(
    workspace: &W,
    from: &Point2D,
    to: &Point2D,
) -> bool {
    workspace.segment_is_free(from, to) && workspace.segment_is_simple(from, to)
}

/// Planner parameters
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub max_iter: usize,
    /// Maximum extension per step
    pub step_size: f64,
    /// Spacing of the stored edge trajectories
    pub path_resolution: f64,
    /// Leading constant of the shrinking rewiring radius
    pub connect_radius: f64,
    pub bias: SampleBias,
    pub seed: u64,
    /// Cost decrease below this does not count as progress
    pub improvement_threshold: f64,
    /// Stop after this many iterations without progress once a plan
    /// exists; None plans until the budget runs out
    pub patience: Option<usize>,
    pub time_budget: Option<Duration>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_iter: 2000,
            step_size: 1.0,
            path_resolution: 0.2,
            connect_radius: 10.0,
            bias: SampleBias::Regions { rate: 10 },
            seed: 0,
            improvement_threshold: 1e-3,
            patience: None,
            time_budget: None,
        }
    }
}

/// Mission input: formula, workspace geometry, start, and parameters
#[derive(Debug, Clone)]
pub struct Mission {
    pub formula: String,
    pub bounds: Bounds2D,
    pub footprint: f64,
    pub regions: Vec<RegionSpec>,
    pub start: Point2D,
    pub config: PlannerConfig,
}

/// A recorded way of satisfying the specification: either the tree path
/// to `goal` alone (parking there keeps accepting), or that path plus a
/// closing edge back to the ancestor `anchor`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub goal: usize,
    pub anchor: Option<usize>,
}

/// Product-space planner with asymptotically optimal rewiring
pub struct LtlRrtStar {
    pub config: PlannerConfig,
    pub workspace: Workspace2D,
    pub automaton: SpecAutomaton,
    pub graph: ProductGraph,
    pub sampler: Sampler,
    pub iterations: usize,
    pub candidates: Vec<Candidate>,
    pub(crate) best_cost_seen: f64,
    pub(crate) last_improvement: usize,
}

impl LtlRrtStar {
    pub fn new(mission: Mission) -> PlannerResult<Self> {
        let automaton = SpecAutomaton::from_formula(&mission.formula)?;
        let mut workspace =
            Workspace2D::new(mission.bounds, mission.footprint, automaton.symbols().clone())?;
        for spec in mission.regions {
            workspace.add_region(spec)?;
        }
        if !workspace.is_free(&mission.start) {
            return Err(PlannerError::UnrecoverableRepair {
                reason: "start configuration is not in free space".to_string(),
            });
        }
        let labels = workspace.contains(&mission.start);
        let state = automaton.step(automaton.initial(), labels).ok_or_else(|| {
            PlannerError::UnrecoverableRepair {
                reason: "start configuration violates the specification".to_string(),
            }
        })?;
        info!(
            "planner: automaton has {} states over {} propositions",
            automaton.len(),
            automaton.ap_count()
        );
        let graph = ProductGraph::new(mission.start, labels, state);
        let sampler = Sampler::new(mission.config.seed, mission.config.bias);
        let mut planner = Self {
            config: mission.config,
            workspace,
            automaton,
            graph,
            sampler,
            iterations: 0,
            candidates: Vec::new(),
            best_cost_seen: f64::INFINITY,
            last_improvement: 0,
        };
        // the start may already satisfy the specification in place
        planner.record_candidates(ProductGraph::ROOT);
        Ok(planner)
    }

    /// Run until the budget is exhausted or improvement stalls
    pub fn plan(&mut self) -> PlannerResult<Plan> {
        let cancel = AtomicBool::new(false);
        self.plan_cancellable(&cancel)
    }

    /// Run with a cooperative stop flag checked between iterations
    pub fn plan_cancellable(&mut self, cancel: &AtomicBool) -> PlannerResult<Plan> {
        let started = Instant::now();
        while !self.budget_exhausted(started) && !self.converged() {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            self.step_iteration();
        }
        self.best_plan().ok_or(PlannerError::Timeout {
            iterations: self.iterations,
        })
    }

    pub fn budget_exhausted(&self, started: Instant) -> bool {
        if self.iterations >= self.config.max_iter {
            return true;
        }
        match self.config.time_budget {
            Some(budget) => started.elapsed() >= budget,
            None => false,
        }
    }

    pub fn converged(&self) -> bool {
        match self.config.patience {
            Some(patience) => {
                !self.candidates.is_empty()
                    && self.iterations.saturating_sub(self.last_improvement) >= patience
            }
            None => false,
        }
    }

    /// Neighborhood radius shrinking with tree size
    fn near_radius(&self) -> f64 {
        let count = (self.graph.len() + 1) as f64;
        let radius = self.config.connect_radius * (count.ln() / count).sqrt();
        radius.min(self.config.step_size)
    }

    /// One sample-extend-rewire cycle; commits fully or not at all
    pub fn step_iteration(&mut self) {
        self.iterations += 1;
        if self.iterations % 100 == 0 {
            debug!(
                "iter {}: {} vertices, best cost {:?}",
                self.iterations,
                self.graph.len(),
                self.best_cost()
            );
        }
        let q_rand = self.sampler.sample(&self.workspace);
        let near_id = match self.graph.nearest(&q_rand, &self.automaton) {
            Some(id) => id,
            None => return,
        };
        let near_config = self.graph.vertex(near_id).config;
        let q_new = steer(&near_config, &q_rand, self.config.step_size);
        if q_new.distance(&near_config) < 1e-9 {
            return;
        }
        if !self.workspace.is_free(&q_new) {
            return;
        }
        if !admissible_edge(&self.workspace, &near_config, &q_new) {
            return;
        }
        let labels = self.workspace.contains(&q_new);
        let state = match self.automaton.step(self.graph.vertex(near_id).state, labels) {
            Some(state) => state,
            None => return,
        };

        // choose the cheapest admissible parent in the neighborhood that
        // reaches the same automaton state
        let near_ids = self.graph.near(&q_new, self.near_radius());
        let mut parent = near_id;
        let mut parent_cost = self.graph.vertex(near_id).cost + near_config.distance(&q_new);
        for &u in &near_ids {
            if u == near_id {
                continue;
            }
            let vertex = self.graph.vertex(u);
            if self.automaton.step(vertex.state, labels) != Some(state) {
                continue;
            }
            let cost = vertex.cost + vertex.config.distance(&q_new);
            if cost + 1e-12 < parent_cost
                && admissible_edge(&self.workspace, &vertex.config, &q_new)
            {
                parent = u;
                parent_cost = cost;
            }
        }
        let parent_config = self.graph.vertex(parent).config;
        let edge_cost = parent_config.distance(&q_new);
        let motion = interpolate(&parent_config, &q_new, self.config.path_resolution);
        let new_id = self
            .graph
            .add_vertex(q_new, labels, state, parent, edge_cost, motion);

        // rewire neighbors through the new vertex where that strictly
        // lowers their cost and keeps their automaton state
        let new_cost_base = self.graph.vertex(new_id).cost;
        for &u in &near_ids {
            if u == parent || u == ProductGraph::ROOT {
                continue;
            }
            let (u_config, u_labels, u_state, u_cost) = {
                let vertex = self.graph.vertex(u);
                (vertex.config, vertex.labels, vertex.state, vertex.cost)
            };
            if self.automaton.step(state, u_labels) != Some(u_state) {
                continue;
            }
            let rewired_cost = new_cost_base + q_new.distance(&u_config);
            if rewired_cost + 1e-9 >= u_cost {
                continue;
            }
            if !admissible_edge(&self.workspace, &q_new, &u_config) {
                continue;
            }
            if self.graph.is_ancestor(u, new_id) {
                continue;
            }
            let motion = interpolate(&q_new, &u_config, self.config.path_resolution);
            let vertex = self.graph.vertex_mut(u);
            vertex.parent = Some(new_id);
            vertex.edge_cost = rewired_cost - new_cost_base;
            vertex.cost = rewired_cost;
            vertex.motion = motion;
            self.graph.propagate_cost(u);
        }

        self.record_candidates(new_id);
    }

    /// Check whether the vertex certifies a plan: parking there, or a
    /// loop back to an ancestor
    fn record_candidates(&mut self, id: usize) {
        let (config, labels, state) = {
            let vertex = self.graph.vertex(id);
            (vertex.config, vertex.labels, vertex.state)
        };
        let mut found = None;
        if self.automaton.accepts_forever(state, labels) {
            found = Some(Candidate {
                goal: id,
                anchor: None,
            });
        } else if let Some(path) = self.graph.path_to_root(id) {
            // try accepting ancestors as loop anchors, closest first
            let mut anchors: Vec<(NotNan<f64>, usize)> = path
                .iter()
                .take(path.len().saturating_sub(1))
                .filter(|&&a| self.automaton.is_accepting(self.graph.vertex(a).state))
                .filter_map(|&a| {
                    let closing = config.distance(&self.graph.vertex(a).config);
                    NotNan::new(closing).ok().map(|closing| (closing, a))
                })
                .collect();
            anchors.sort_unstable();
            found = anchors
                .into_iter()
                .map(|(_, a)| Candidate {
                    goal: id,
                    anchor: Some(a),
                })
                .find(|candidate| self.candidate_cost(candidate).is_some());
        }
        if let Some(candidate) = found {
            if let Some(cost) = self.candidate_cost(&candidate) {
                self.candidates.push(candidate);
                if cost + self.config.improvement_threshold < self.best_cost_seen {
                    self.best_cost_seen = cost;
                    self.last_improvement = self.iterations;
                    info!(
                        "iter {}: plan candidate with cost {:.3} ({} candidates)",
                        self.iterations,
                        cost,
                        self.candidates.len()
                    );
                }
            }
        }
    }

    /// Cost of a candidate if it is still valid and certified
    pub fn candidate_cost(&self, candidate: &Candidate) -> Option<f64> {
        let goal = self.graph.vertex(candidate.goal);
        if !goal.valid {
            return None;
        }
        let path = self.graph.path_to_root(candidate.goal)?;
        match candidate.anchor {
            None => {
                if self.automaton.accepts_forever(goal.state, goal.labels) {
                    Some(goal.cost)
                } else {
                    None
                }
            }
            Some(a) => {
                let anchor = self.graph.vertex(a);
                if !anchor.valid {
                    return None;
                }
                let pos = path.iter().position(|&i| i == a)?;
                if !admissible_edge(&self.workspace, &goal.config, &anchor.config) {
                    return None;
                }
                let cycle: Vec<LabelSet> = path[pos + 1..]
                    .iter()
                    .map(|&i| self.graph.vertex(i).labels)
                    .chain(std::iter::once(anchor.labels))
                    .collect();
                if !self.automaton.accepts_cycle(anchor.state, &cycle) {
                    return None;
                }
                Some(goal.cost + goal.config.distance(&anchor.config))
            }
        }
    }

    pub(crate) fn best_candidate(&self) -> Option<(f64, Candidate)> {
        self.candidates
            .iter()
            .filter_map(|candidate| {
                let cost = self.candidate_cost(candidate)?;
                NotNan::new(cost).ok().map(|cost| (cost, *candidate))
            })
            .min_by_key(|(cost, _)| *cost)
            .map(|(cost, candidate)| (cost.into_inner(), candidate))
    }

    pub fn best_cost(&self) -> Option<f64> {
        self.best_candidate().map(|(cost, _)| cost)
    }

    /// Extract the lowest-cost plan found so far
    pub fn best_plan(&self) -> Option<Plan> {
        let (cost, candidate) = self.best_candidate()?;
        let path = self.graph.path_to_root(candidate.goal)?;
        let configurations = path.iter().map(|&i| self.graph.vertex(i).config).collect();
        let states = path.iter().map(|&i| self.graph.vertex(i).state).collect();
        let suffix_start = candidate
            .anchor
            .and_then(|a| path.iter().position(|&i| i == a));
        Some(Plan {
            configurations,
            states,
            cost,
            suffix_start,
        })
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let best_cost = self.best_cost();
        Diagnostics {
            iterations: self.iterations,
            vertices: self.graph.len(),
            best_cost,
            has_plan: best_cost.is_some(),
        }
    }
}
