//! Reactive repair of the planning graph after environment changes
//!
//! Environment deltas arrive over an explicit channel and are applied
//! strictly between planning iterations. A repair pass revalidates the
//! vertices and edges the changed geometry can have touched, tombstones
//! invalidated subtrees at their shallowest invalid ancestor, and keeps
//! every surviving subtree so growth resumes instead of restarting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Instant;

use log::{info, warn};

use crate::common::{
    Automaton, Plan, PlannerError, PlannerResult, Point2D, RegionId, WorkspaceModel,
};
use crate::planning::planner::{admissible_edge, Candidate, LtlRrtStar, Mission};
use crate::planning::product_graph::ProductGraph;
use crate::workspace::region::bbox_overlap;
use crate::workspace::RegionUpdate;

/// Summary of one repair pass
#[derive(Debug, Clone, PartialEq)]
pub struct RepairReport {
    pub affected: Vec<RegionId>,
    /// Vertices tombstoned together with their subtrees
    pub removed: usize,
    /// Vertices whose labels or automaton state were recomputed
    pub refreshed: usize,
    /// Whether the previously best plan was invalidated
    pub plan_dropped: bool,
}

/// Whether the edge into `config` can overlap the dirty bounding box
fn edge_touches(
    dirty: &Option<(Point2D, Point2D)>,
    from: &Point2D,
    motion: &[Point2D],
    config: &Point2D,
) -> bool {
    let (dirty_min, dirty_max) = match dirty {
        Some(bounds) => bounds,
        None => return true,
    };
    let mut min = Point2D::new(from.x.min(config.x), from.y.min(config.y));
    let mut max = Point2D::new(from.x.max(config.x), from.y.max(config.y));
    for p in motion {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    bbox_overlap(&min, &max, dirty_min, dirty_max)
}

impl LtlRrtStar {
    /// Apply an environment change and repair the graph in place.
    ///
    /// A degenerate update leaves both workspace and graph untouched and
    /// is reported as a geometry error. Losing the current best plan is
    /// not an error; destroying the root is.
    pub fn apply_update(&mut self, update: RegionUpdate) -> PlannerResult<RepairReport> {
        let best_before = self.best_candidate().map(|(_, candidate)| candidate);
        let dirty = self.workspace.update_bounds(&update);
        let affected = self.workspace.apply_update(update)?;
        let (removed, refreshed) = self.repair_graph(dirty)?;

        let retained: Vec<Candidate> = self
            .candidates
            .iter()
            .copied()
            .filter(|candidate| self.candidate_cost(candidate).is_some())
            .collect();
        let plan_dropped = match best_before {
            Some(best) => !retained.contains(&best),
            None => false,
        };
        let dropped_candidates = self.candidates.len() - retained.len();
        self.candidates = retained;
        info!(
            "repair: {:?} affected, {} vertices removed, {} refreshed, {} candidates dropped",
            affected, removed, refreshed, dropped_candidates
        );
        Ok(RepairReport {
            affected,
            removed,
            refreshed,
            plan_dropped,
        })
    }

    /// Revalidate the graph against the changed workspace, pruning at the
    /// shallowest invalid vertex of each broken subtree
    fn repair_graph(
        &mut self,
        dirty: Option<(Point2D, Point2D)>,
    ) -> PlannerResult<(usize, usize)> {
        // cover inflated-obstacle queries around the changed geometry
        let margin = self.workspace.footprint() + 1e-9;
        let dirty = dirty.map(|(min, max)| {
            (
                Point2D::new(min.x - margin, min.y - margin),
                Point2D::new(max.x + margin, max.y + margin),
            )
        });

        let root_config = self.graph.vertex(ProductGraph::ROOT).config;
        if !self.workspace.is_free(&root_config) {
            return Err(PlannerError::UnrecoverableRepair {
                reason: "start configuration is no longer in free space".to_string(),
            });
        }
        let root_labels = self.workspace.contains(&root_config);
        let root_state = self
            .automaton
            .step(self.automaton.initial(), root_labels)
            .ok_or_else(|| PlannerError::UnrecoverableRepair {
                reason: "start configuration now violates the specification".to_string(),
            })?;
        let root_changed = {
            let root = self.graph.vertex_mut(ProductGraph::ROOT);
            let changed = root.labels != root_labels || root.state != root_state;
            root.labels = root_labels;
            root.state = root_state;
            changed
        };

        let children = self.graph.children_map();
        let mut removed = 0;
        let mut refreshed = 0;
        let mut queue: Vec<(usize, bool)> = children[ProductGraph::ROOT]
            .iter()
            .map(|&child| (child, root_changed))
            .collect();
        while let Some((id, parent_changed)) = queue.pop() {
            if !self.graph.vertex(id).valid {
                continue;
            }
            let parent = match self.graph.vertex(id).parent {
                Some(parent) => parent,
                None => continue,
            };
            let parent_config = self.graph.vertex(parent).config;
            let parent_state = self.graph.vertex(parent).state;
            let config = self.graph.vertex(id).config;

            let touched = parent_changed
                || edge_touches(&dirty, &parent_config, &self.graph.vertex(id).motion, &config);
            if !touched {
                for &child in &children[id] {
                    queue.push((child, false));
                }
                continue;
            }

            let labels = self.workspace.contains(&config);
            let edge_ok = self.workspace.is_free(&config)
                && admissible_edge(&self.workspace, &parent_config, &config);
            let next_state = if edge_ok {
                self.automaton.step(parent_state, labels)
            } else {
                None
            };
            match next_state {
                None => {
                    removed += self.graph.invalidate_subtree(id);
                }
                Some(state) => {
                    let vertex = self.graph.vertex_mut(id);
                    let changed = vertex.labels != labels || vertex.state != state;
                    vertex.labels = labels;
                    vertex.state = state;
                    if changed {
                        refreshed += 1;
                    }
                    for &child in &children[id] {
                        queue.push((child, changed));
                    }
                }
            }
        }
        Ok((removed, refreshed))
    }
}

/// Sender half of the environment-change channel
#[derive(Debug, Clone)]
pub struct EventQueue {
    sender: Sender<RegionUpdate>,
}

impl EventQueue {
    /// Queue an update; returns false when the session is gone
    pub fn send(&self, update: RegionUpdate) -> bool {
        self.sender.send(update).is_ok()
    }
}

/// Planning session pairing the planner with the event-queue consumer.
/// Updates are drained and applied atomically between iterations.
pub struct PlanningSession {
    pub planner: LtlRrtStar,
    events: Receiver<RegionUpdate>,
    /// Updates rejected for degenerate geometry, kept for the caller
    pub rejected_updates: Vec<PlannerError>,
}

impl PlanningSession {
    pub fn new(mission: Mission) -> PlannerResult<(Self, EventQueue)> {
        let planner = LtlRrtStar::new(mission)?;
        let (sender, events) = channel();
        Ok((
            Self {
                planner,
                events,
                rejected_updates: Vec::new(),
            },
            EventQueue { sender },
        ))
    }

    fn drain_events(&mut self) -> PlannerResult<()> {
        while let Ok(update) = self.events.try_recv() {
            match self.planner.apply_update(update) {
                Ok(report) => {
                    if report.plan_dropped {
                        info!("session: best plan invalidated by environment change");
                    }
                }
                Err(err @ PlannerError::Geometry { .. }) => {
                    warn!("session: update rejected: {}", err);
                    self.rejected_updates.push(err);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    pub fn run(&mut self) -> PlannerResult<Plan> {
        let cancel = AtomicBool::new(false);
        self.run_cancellable(&cancel)
    }

    /// Interleave event handling with planning until the budget ends or
    /// improvement stalls; repair never interrupts an iteration
    pub fn run_cancellable(&mut self, cancel: &AtomicBool) -> PlannerResult<Plan> {
        let started = Instant::now();
        loop {
            self.drain_events()?;
            if cancel.load(Ordering::Relaxed)
                || self.planner.budget_exhausted(started)
                || self.planner.converged()
            {
                break;
            }
            self.planner.step_iteration();
        }
        self.drain_events()?;
        self.planner.best_plan().ok_or(PlannerError::Timeout {
            iterations: self.planner.iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Point2D;
    use crate::planning::planner::PlannerConfig;
    use crate::planning::sampler::SampleBias;
    use crate::workspace::{Bounds2D, RegionSpec, Shape};

    fn disc(x: f64, y: f64, r: f64) -> Shape {
        Shape::Disc {
            center: Point2D::new(x, y),
            radius: r,
        }
    }

    fn visit_mission(seed: u64, max_iter: usize) -> Mission {
        Mission {
            formula: "( <> ( a && <> b ) ) && ( [] !c )".to_string(),
            bounds: Bounds2D::new(0.0, 10.0, 0.0, 10.0),
            footprint: 0.0,
            regions: vec![
                RegionSpec::new("a", disc(2.0, 2.0, 1.0)),
                RegionSpec::new("b", disc(8.0, 8.0, 1.0)),
                RegionSpec::obstacle("c", disc(5.0, 5.0, 1.0)),
            ],
            start: Point2D::new(0.5, 0.5),
            config: PlannerConfig {
                max_iter,
                step_size: 1.0,
                connect_radius: 5.0,
                bias: SampleBias::Regions { rate: 30 },
                seed,
                ..Default::default()
            },
        }
    }

    fn obstacle_id(planner: &LtlRrtStar, label: &str) -> crate::common::RegionId {
        planner
            .workspace
            .regions()
            .iter()
            .find(|r| r.label == label)
            .unwrap()
            .id
    }

    #[test]
    fn test_repair_removes_covered_subtrees() {
        let mut planner = LtlRrtStar::new(visit_mission(11, 6000)).unwrap();
        for _ in 0..2500 {
            planner.step_iteration();
        }
        let before = planner.graph.len();
        let c = obstacle_id(&planner, "c");
        let report = planner
            .apply_update(RegionUpdate::Resize {
                id: c,
                shape: disc(5.0, 5.0, 3.0),
            })
            .unwrap();
        assert_eq!(report.affected, vec![c]);
        assert!(report.removed > 0);
        assert!(planner.graph.len() < before);

        // no surviving vertex or edge touches the enlarged obstacle
        for (i, vertex) in planner.graph.vertices.iter().enumerate() {
            if !vertex.valid {
                continue;
            }
            assert!(planner.workspace.is_free(&vertex.config));
            if let Some(parent) = vertex.parent {
                assert!(
                    planner
                        .workspace
                        .segment_is_free(&planner.graph.vertex(parent).config, &vertex.config),
                    "edge into vertex {} crosses the enlarged obstacle",
                    i
                );
            }
        }
        assert!(planner.graph.check_invariants());
    }

    #[test]
    fn test_replanning_after_obstacle_growth_avoids_it() {
        let mut planner = LtlRrtStar::new(visit_mission(13, 9000)).unwrap();
        for _ in 0..3000 {
            planner.step_iteration();
        }
        let c = obstacle_id(&planner, "c");
        planner
            .apply_update(RegionUpdate::Resize {
                id: c,
                shape: disc(5.0, 5.0, 2.5),
            })
            .unwrap();

        // either a repaired plan avoiding the obstacle, or a clean timeout
        match planner.plan() {
            Ok(plan) => {
                let c_prop = planner.workspace.symbols().lookup("c").unwrap();
                for config in &plan.configurations {
                    assert!(planner.workspace.is_free(config));
                    assert!(!planner.workspace.contains(config).contains(c_prop));
                }
                for pair in plan.configurations.windows(2) {
                    assert!(planner.workspace.segment_is_free(&pair[0], &pair[1]));
                }
            }
            Err(PlannerError::Timeout { .. }) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_update_covering_start_is_unrecoverable() {
        let mut planner = LtlRrtStar::new(visit_mission(3, 500)).unwrap();
        for _ in 0..100 {
            planner.step_iteration();
        }
        let err = planner.apply_update(RegionUpdate::Add(RegionSpec::obstacle(
            "spill",
            disc(0.5, 0.5, 1.0),
        )));
        assert!(matches!(err, Err(PlannerError::UnrecoverableRepair { .. })));
    }

    #[test]
    fn test_degenerate_update_leaves_graph_intact() {
        let mut planner = LtlRrtStar::new(visit_mission(3, 500)).unwrap();
        for _ in 0..200 {
            planner.step_iteration();
        }
        let before = planner.graph.len();
        let c = obstacle_id(&planner, "c");
        let err = planner.apply_update(RegionUpdate::Resize {
            id: c,
            shape: disc(5.0, 5.0, -2.0),
        });
        assert!(matches!(err, Err(PlannerError::Geometry { .. })));
        assert_eq!(planner.graph.len(), before);
    }

    #[test]
    fn test_relabeling_refreshes_states() {
        let mut planner = LtlRrtStar::new(visit_mission(5, 500)).unwrap();
        for _ in 0..300 {
            planner.step_iteration();
        }
        // a new labeled region over explored space changes labels only
        let report = planner
            .apply_update(RegionUpdate::Add(RegionSpec::new(
                "marker",
                disc(1.5, 1.5, 1.0),
            )))
            .unwrap();
        assert_eq!(report.removed, 0);
        assert!(report.refreshed > 0);
        assert!(planner.graph.check_invariants());
        // states replay consistently after the relabeling
        for (i, vertex) in planner.graph.vertices.iter().enumerate() {
            if !vertex.valid || i == ProductGraph::ROOT {
                continue;
            }
            let parent = vertex.parent.unwrap();
            let expected = planner
                .automaton
                .step(planner.graph.vertex(parent).state, vertex.labels);
            assert_eq!(expected, Some(vertex.state));
        }
    }

    #[test]
    fn test_session_consumes_queued_events() {
        let (mut session, queue) = PlanningSession::new(visit_mission(17, 4000)).unwrap();
        // grow the obstacle before planning starts
        assert!(queue.send(RegionUpdate::Resize {
            id: session.planner.workspace.regions()[2].id,
            shape: disc(5.0, 5.0, 2.0),
        }));
        // and feed one degenerate update that must be rejected, not fatal
        assert!(queue.send(RegionUpdate::Resize {
            id: session.planner.workspace.regions()[0].id,
            shape: disc(2.0, 2.0, -1.0),
        }));
        let result = session.run();
        assert_eq!(session.rejected_updates.len(), 1);
        if let Ok(plan) = result {
            for config in &plan.configurations {
                assert!(session.planner.workspace.is_free(config));
            }
        }
    }

    #[test]
    fn test_transient_plan_loss_is_not_an_error() {
        let mut planner = LtlRrtStar::new(visit_mission(19, 8000)).unwrap();
        // plan first, then cut the best path
        for _ in 0..3000 {
            planner.step_iteration();
        }
        if planner.best_cost().is_none() {
            // seed did not find a plan in the first phase; nothing to cut
            return;
        }
        let c = obstacle_id(&planner, "c");
        let report = planner
            .apply_update(RegionUpdate::Resize {
                id: c,
                shape: disc(5.0, 5.0, 3.5),
            })
            .unwrap();
        // repair itself succeeded whether or not the plan survived
        assert!(report.removed > 0 || !report.plan_dropped);
    }

    #[test]
    fn test_repair_keeps_root_when_labels_shift() {
        let mut planner = LtlRrtStar::new(visit_mission(23, 400)).unwrap();
        for _ in 0..200 {
            planner.step_iteration();
        }
        // non-obstacle region over the start: root survives with new labels
        let report = planner
            .apply_update(RegionUpdate::Add(RegionSpec::new(
                "base",
                disc(0.5, 0.5, 0.5),
            )))
            .unwrap();
        assert!(planner.graph.vertex(ProductGraph::ROOT).valid);
        let base = planner.workspace.symbols().lookup("base").unwrap();
        let root = planner.graph.vertex(ProductGraph::ROOT);
        assert!(root.labels.contains(base));
        // root state stays consistent with a fresh initial step
        assert_eq!(
            planner.automaton.step(planner.automaton.initial(), root.labels),
            Some(root.state)
        );
        assert_eq!(report.removed, 0);
    }
}
