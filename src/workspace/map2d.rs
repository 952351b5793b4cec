//! 2D workspace model: bounds, labeled regions, and free-space queries

use log::debug;

use crate::common::{
    LabelSet, PlannerError, PlannerResult, Point2D, RegionId, SymbolTable, WorkspaceModel,
};
use crate::workspace::region::{Region, RegionSpec, RegionUpdate};

/// Axis-aligned workspace boundary
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds2D {
    pub min: Point2D,
    pub max: Point2D,
}

impl Bounds2D {
    pub fn new(x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> Self {
        Self {
            min: Point2D::new(x_min, y_min),
            max: Point2D::new(x_max, y_max),
        }
    }

    /// Whether the point lies inside the bounds shrunk by `margin`
    pub fn contains(&self, p: &Point2D, margin: f64) -> bool {
        p.x >= self.min.x + margin
            && p.x <= self.max.x - margin
            && p.y >= self.min.y + margin
            && p.y <= self.max.y - margin
    }
}

/// Workspace with labeled regions over a rectangular boundary.
///
/// Region geometry changes only through [`WorkspaceModel::apply_update`];
/// obstacle queries inflate shapes by the robot footprint radius.
#[derive(Debug, Clone)]
pub struct Workspace2D {
    bounds: Bounds2D,
    footprint: f64,
    symbols: SymbolTable,
    regions: Vec<Region>,
    next_id: usize,
}

impl Workspace2D {
    /// Create an empty workspace. `symbols` carries the propositions the
    /// specification already interned so region labels line up with the
    /// automaton alphabet.
    pub fn new(bounds: Bounds2D, footprint: f64, symbols: SymbolTable) -> PlannerResult<Self> {
        if bounds.min.x >= bounds.max.x || bounds.min.y >= bounds.max.y {
            return Err(PlannerError::Geometry {
                region: "boundary".to_string(),
                message: "workspace bounds have no area".to_string(),
            });
        }
        if !footprint.is_finite() || footprint < 0.0 {
            return Err(PlannerError::Geometry {
                region: "boundary".to_string(),
                message: format!("invalid footprint radius {}", footprint),
            });
        }
        Ok(Self {
            bounds,
            footprint,
            symbols,
            regions: Vec::new(),
            next_id: 0,
        })
    }

    pub fn add_region(&mut self, spec: RegionSpec) -> PlannerResult<RegionId> {
        spec.shape.validate().map_err(|message| PlannerError::Geometry {
            region: spec.label.clone(),
            message,
        })?;
        let prop = self
            .symbols
            .intern(&spec.label)
            .ok_or_else(|| PlannerError::Geometry {
                region: spec.label.clone(),
                message: "label table is full".to_string(),
            })?;
        let id = RegionId(self.next_id);
        self.next_id += 1;
        self.regions.push(Region {
            id,
            label: spec.label,
            prop,
            shape: spec.shape,
            obstacle: spec.obstacle,
        });
        Ok(id)
    }

    pub fn bounds(&self) -> &Bounds2D {
        &self.bounds
    }

    pub fn footprint(&self) -> f64 {
        self.footprint
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    /// Bounding box of the geometry an update touches, including the old
    /// shape of a resized or removed region. Used to scope repair.
    pub fn update_bounds(&self, update: &RegionUpdate) -> Option<(Point2D, Point2D)> {
        match update {
            RegionUpdate::Add(spec) => Some(spec.shape.bounding_box()),
            RegionUpdate::Remove(id) => self.region(*id).map(|r| r.shape.bounding_box()),
            RegionUpdate::Resize { id, shape } => {
                let old = self.region(*id)?.shape.bounding_box();
                let new = shape.bounding_box();
                Some((
                    Point2D::new(old.0.x.min(new.0.x), old.0.y.min(new.0.y)),
                    Point2D::new(old.1.x.max(new.1.x), old.1.y.max(new.1.y)),
                ))
            }
        }
    }

    fn unknown_region(id: RegionId) -> PlannerError {
        PlannerError::Geometry {
            region: format!("#{}", id.0),
            message: "unknown region".to_string(),
        }
    }
}

impl WorkspaceModel for Workspace2D {
    fn contains(&self, config: &Point2D) -> LabelSet {
        self.regions
            .iter()
            .filter(|r| r.shape.contains(config))
            .map(|r| r.prop)
            .collect()
    }

    fn is_free(&self, config: &Point2D) -> bool {
        self.bounds.contains(config, self.footprint)
            && !self
                .regions
                .iter()
                .any(|r| r.obstacle && r.shape.contains_inflated(config, self.footprint))
    }

    fn segment_is_free(&self, from: &Point2D, to: &Point2D) -> bool {
        self.bounds.contains(from, self.footprint)
            && self.bounds.contains(to, self.footprint)
            && !self
                .regions
                .iter()
                .any(|r| r.obstacle && r.shape.intersects_segment(from, to, self.footprint))
    }

    fn segment_is_simple(&self, from: &Point2D, to: &Point2D) -> bool {
        let mut crossings = 0;
        for region in &self.regions {
            let from_in = region.shape.contains(from);
            let to_in = region.shape.contains(to);
            if from_in != to_in {
                crossings += 1;
            } else if !from_in && region.shape.intersects_segment(from, to, 0.0) {
                // enters and leaves again
                crossings += 2;
            }
        }
        crossings <= 1
    }

    fn apply_update(&mut self, update: RegionUpdate) -> PlannerResult<Vec<RegionId>> {
        match update {
            RegionUpdate::Add(spec) => {
                let label = spec.label.clone();
                let id = self.add_region(spec)?;
                debug!("workspace: added region '{}' as {:?}", label, id);
                Ok(vec![id])
            }
            RegionUpdate::Remove(id) => {
                let pos = self
                    .regions
                    .iter()
                    .position(|r| r.id == id)
                    .ok_or_else(|| Self::unknown_region(id))?;
                let removed = self.regions.remove(pos);
                debug!("workspace: removed region '{}' {:?}", removed.label, id);
                Ok(vec![id])
            }
            RegionUpdate::Resize { id, shape } => {
                let region = self
                    .regions
                    .iter_mut()
                    .find(|r| r.id == id)
                    .ok_or_else(|| Self::unknown_region(id))?;
                shape.validate().map_err(|message| PlannerError::Geometry {
                    region: region.label.clone(),
                    message,
                })?;
                region.shape = shape;
                debug!("workspace: resized region '{}' {:?}", region.label, id);
                Ok(vec![id])
            }
        }
    }
}
