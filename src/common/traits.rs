//! Capability traits at the seams between geometry, specification, and search

use crate::common::error::PlannerResult;
use crate::common::types::{LabelSet, Point2D, RegionId, StateId};
use crate::workspace::RegionUpdate;

/// Geometric model of the workspace: labeled regions over free space.
///
/// Mutation happens exclusively through `apply_update`; the planning graph
/// never touches region geometry itself.
pub trait WorkspaceModel {
    /// Labels of all regions containing the configuration
    fn contains(&self, config: &Point2D) -> LabelSet;

    /// Whether the configuration is inside the bounds and outside every
    /// obstacle, inflated by the robot footprint
    fn is_free(&self, config: &Point2D) -> bool;

    /// Whether the straight segment between the configurations is
    /// collision free
    fn segment_is_free(&self, from: &Point2D, to: &Point2D) -> bool;

    /// Whether the segment crosses at most one region boundary, so that
    /// labels change at most once along it
    fn segment_is_simple(&self, from: &Point2D, to: &Point2D) -> bool;

    /// Apply an environment change in place, returning the ids of every
    /// region whose containment predicate could have changed
    fn apply_update(&mut self, update: RegionUpdate) -> PlannerResult<Vec<RegionId>>;
}

/// Finite-state acceptance structure tracking specification progress
pub trait Automaton {
    /// State before any label has been read
    fn initial(&self) -> StateId;

    /// Deterministic transition; None means the specification is
    /// permanently violated (REJECT)
    fn step(&self, state: StateId, labels: LabelSet) -> Option<StateId>;

    /// Whether the state belongs to the accepting set
    fn is_accepting(&self, state: StateId) -> bool;
}
