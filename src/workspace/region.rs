//! Geometric primitives and labeled regions

use itertools::Itertools;
use rand::Rng;

use crate::common::{Point2D, PropId, RegionId};

const EPS: f64 = 1e-12;

/// Distance from a point to the closest point of a segment
pub(crate) fn point_segment_distance(p: &Point2D, a: &Point2D, b: &Point2D) -> f64 {
    let u = b.to_vector() - a.to_vector();
    let w = p.to_vector() - a.to_vector();
    let len_sq = u.dot(&u);
    if len_sq < EPS {
        return p.distance(a);
    }
    let t = (w.dot(&u) / len_sq).clamp(0.0, 1.0);
    let closest = Point2D::from(a.to_vector() + u * t);
    p.distance(&closest)
}

fn orientation(a: &Point2D, b: &Point2D, c: &Point2D) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(a: &Point2D, b: &Point2D, p: &Point2D) -> bool {
    p.x >= a.x.min(b.x) - EPS
        && p.x <= a.x.max(b.x) + EPS
        && p.y >= a.y.min(b.y) - EPS
        && p.y <= a.y.max(b.y) + EPS
}

pub(crate) fn segments_intersect(a: &Point2D, b: &Point2D, c: &Point2D, d: &Point2D) -> bool {
    let d1 = orientation(c, d, a);
    let d2 = orientation(c, d, b);
    let d3 = orientation(a, b, c);
    let d4 = orientation(a, b, d);
    if ((d1 > EPS && d2 < -EPS) || (d1 < -EPS && d2 > EPS))
        && ((d3 > EPS && d4 < -EPS) || (d3 < -EPS && d4 > EPS))
    {
        return true;
    }
    (d1.abs() <= EPS && on_segment(c, d, a))
        || (d2.abs() <= EPS && on_segment(c, d, b))
        || (d3.abs() <= EPS && on_segment(a, b, c))
        || (d4.abs() <= EPS && on_segment(a, b, d))
}

fn segment_segment_distance(a: &Point2D, b: &Point2D, c: &Point2D, d: &Point2D) -> f64 {
    if segments_intersect(a, b, c, d) {
        return 0.0;
    }
    point_segment_distance(a, c, d)
        .min(point_segment_distance(b, c, d))
        .min(point_segment_distance(c, a, b))
        .min(point_segment_distance(d, a, b))
}

fn polygon_contains(vertices: &[Point2D], p: &Point2D) -> bool {
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let vi = &vertices[i];
        let vj = &vertices[j];
        if (vi.y > p.y) != (vj.y > p.y) {
            let x_cross = vi.x + (p.y - vi.y) * (vj.x - vi.x) / (vj.y - vi.y);
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn polygon_area(vertices: &[Point2D]) -> f64 {
    let twice: f64 = vertices
        .iter()
        .copied()
        .circular_tuple_windows::<(Point2D, Point2D)>()
        .map(|(a, b)| a.x * b.y - b.x * a.y)
        .sum();
    twice.abs() / 2.0
}

fn polygon_self_intersects(vertices: &[Point2D]) -> bool {
    let n = vertices.len();
    for i in 0..n {
        let (a, b) = (&vertices[i], &vertices[(i + 1) % n]);
        for j in i + 1..n {
            // skip edges sharing a vertex
            if j == i + 1 || (i == 0 && j == n - 1) {
                continue;
            }
            let (c, d) = (&vertices[j], &vertices[(j + 1) % n]);
            if segments_intersect(a, b, c, d) {
                return true;
            }
        }
    }
    false
}

/// Geometric footprint of a region
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Disc { center: Point2D, radius: f64 },
    Rect { min: Point2D, max: Point2D },
    Polygon { vertices: Vec<Point2D> },
}

impl Shape {
    /// Check for degenerate geometry; the message names the defect
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Shape::Disc { radius, .. } => {
                if !radius.is_finite() || *radius <= 0.0 {
                    return Err(format!("non-positive radius {}", radius));
                }
            }
            Shape::Rect { min, max } => {
                if min.x >= max.x || min.y >= max.y {
                    return Err("rectangle has no area".to_string());
                }
            }
            Shape::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return Err(format!("polygon with {} vertices", vertices.len()));
                }
                if polygon_area(vertices) <= EPS {
                    return Err("polygon has no area".to_string());
                }
                if polygon_self_intersects(vertices) {
                    return Err("polygon boundary self-intersects".to_string());
                }
            }
        }
        Ok(())
    }

    pub fn contains(&self, p: &Point2D) -> bool {
        match self {
            Shape::Disc { center, radius } => center.distance(p) <= *radius,
            Shape::Rect { min, max } => {
                min.x <= p.x && p.x <= max.x && min.y <= p.y && p.y <= max.y
            }
            Shape::Polygon { vertices } => polygon_contains(vertices, p),
        }
    }

    /// Containment with the shape grown by `margin` (robot footprint)
    pub fn contains_inflated(&self, p: &Point2D, margin: f64) -> bool {
        match self {
            Shape::Disc { center, radius } => center.distance(p) <= radius + margin,
            Shape::Rect { min, max } => {
                let dx = (min.x - p.x).max(p.x - max.x).max(0.0);
                let dy = (min.y - p.y).max(p.y - max.y).max(0.0);
                (dx * dx + dy * dy).sqrt() <= margin
            }
            Shape::Polygon { vertices } => {
                if polygon_contains(vertices, p) {
                    return true;
                }
                vertices
                    .iter()
                    .copied()
                    .circular_tuple_windows::<(Point2D, Point2D)>()
                    .any(|(a, b)| point_segment_distance(p, &a, &b) <= margin)
            }
        }
    }

    /// Whether the segment from `a` to `b` touches the shape grown by
    /// `margin`
    pub fn intersects_segment(&self, a: &Point2D, b: &Point2D, margin: f64) -> bool {
        match self {
            Shape::Disc { center, radius } => {
                point_segment_distance(center, a, b) <= radius + margin
            }
            Shape::Rect { min, max } => {
                // slab test against the expanded box
                let low = Point2D::new(min.x - margin, min.y - margin);
                let high = Point2D::new(max.x + margin, max.y + margin);
                let mut t0: f64 = 0.0;
                let mut t1: f64 = 1.0;
                for axis in 0..2 {
                    let (start, delta, lo, hi) = if axis == 0 {
                        (a.x, b.x - a.x, low.x, high.x)
                    } else {
                        (a.y, b.y - a.y, low.y, high.y)
                    };
                    if delta.abs() < EPS {
                        if start < lo || start > hi {
                            return false;
                        }
                    } else {
                        let mut near = (lo - start) / delta;
                        let mut far = (hi - start) / delta;
                        if near > far {
                            std::mem::swap(&mut near, &mut far);
                        }
                        t0 = t0.max(near);
                        t1 = t1.min(far);
                    }
                }
                t0 <= t1
            }
            Shape::Polygon { vertices } => {
                if polygon_contains(vertices, a) || polygon_contains(vertices, b) {
                    return true;
                }
                vertices
                    .iter()
                    .copied()
                    .circular_tuple_windows::<(Point2D, Point2D)>()
                    .any(|(c, d)| segment_segment_distance(a, b, &c, &d) <= margin)
            }
        }
    }

    pub fn bounding_box(&self) -> (Point2D, Point2D) {
        match self {
            Shape::Disc { center, radius } => (
                Point2D::new(center.x - radius, center.y - radius),
                Point2D::new(center.x + radius, center.y + radius),
            ),
            Shape::Rect { min, max } => (*min, *max),
            Shape::Polygon { vertices } => {
                let mut min = Point2D::new(f64::INFINITY, f64::INFINITY);
                let mut max = Point2D::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
                for v in vertices {
                    min.x = min.x.min(v.x);
                    min.y = min.y.min(v.y);
                    max.x = max.x.max(v.x);
                    max.y = max.y.max(v.y);
                }
                (min, max)
            }
        }
    }

    pub fn area(&self) -> f64 {
        match self {
            Shape::Disc { radius, .. } => std::f64::consts::PI * radius * radius,
            Shape::Rect { min, max } => (max.x - min.x) * (max.y - min.y),
            Shape::Polygon { vertices } => polygon_area(vertices),
        }
    }

    /// Draw a point inside the shape
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Point2D {
        match self {
            Shape::Disc { center, radius } => {
                // fold a triangular radial density into a uniform disc draw
                let r1: f64 = rng.gen();
                let r2: f64 = rng.gen();
                let mut rr = r1 + r2;
                if rr > 1.0 {
                    rr = 2.0 - rr;
                }
                let rad = radius * rr;
                let theta = 2.0 * std::f64::consts::PI * rng.gen::<f64>();
                Point2D::new(center.x + rad * theta.cos(), center.y + rad * theta.sin())
            }
            Shape::Rect { min, max } => Point2D::new(
                rng.gen_range(min.x..max.x),
                rng.gen_range(min.y..max.y),
            ),
            Shape::Polygon { vertices } => {
                let (min, max) = self.bounding_box();
                for _ in 0..64 {
                    let p = Point2D::new(
                        rng.gen_range(min.x..max.x),
                        rng.gen_range(min.y..max.y),
                    );
                    if polygon_contains(vertices, &p) {
                        return p;
                    }
                }
                let n = vertices.len() as f64;
                Point2D::new(
                    vertices.iter().map(|v| v.x).sum::<f64>() / n,
                    vertices.iter().map(|v| v.y).sum::<f64>() / n,
                )
            }
        }
    }
}

pub(crate) fn bbox_overlap(
    a_min: &Point2D,
    a_max: &Point2D,
    b_min: &Point2D,
    b_max: &Point2D,
) -> bool {
    a_min.x <= b_max.x && b_min.x <= a_max.x && a_min.y <= b_max.y && b_min.y <= a_max.y
}

/// Labeled region owned by the workspace
#[derive(Debug, Clone)]
pub struct Region {
    pub id: RegionId,
    pub label: String,
    pub(crate) prop: PropId,
    pub shape: Shape,
    pub obstacle: bool,
}

/// Region definition supplied by the mission or an environment update
#[derive(Debug, Clone)]
pub struct RegionSpec {
    pub label: String,
    pub shape: Shape,
    pub obstacle: bool,
}

impl RegionSpec {
    pub fn new(label: &str, shape: Shape) -> Self {
        Self {
            label: label.to_string(),
            shape,
            obstacle: false,
        }
    }

    pub fn obstacle(label: &str, shape: Shape) -> Self {
        Self {
            label: label.to_string(),
            shape,
            obstacle: true,
        }
    }
}

/// Discrete environment-change event
#[derive(Debug, Clone)]
pub enum RegionUpdate {
    Add(RegionSpec),
    Remove(RegionId),
    Resize { id: RegionId, shape: Shape },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disc_containment() {
        let disc = Shape::Disc {
            center: Point2D::new(1.0, 1.0),
            radius: 0.5,
        };
        assert!(disc.contains(&Point2D::new(1.2, 1.0)));
        assert!(!disc.contains(&Point2D::new(2.0, 1.0)));
        assert!(disc.contains_inflated(&Point2D::new(1.7, 1.0), 0.3));
    }

    #[test]
    fn test_disc_segment_intersection() {
        let disc = Shape::Disc {
            center: Point2D::new(0.0, 1.0),
            radius: 0.5,
        };
        // passes under the disc
        assert!(!disc.intersects_segment(
            &Point2D::new(-2.0, 0.0),
            &Point2D::new(2.0, 0.0),
            0.0
        ));
        assert!(disc.intersects_segment(
            &Point2D::new(-2.0, 0.0),
            &Point2D::new(2.0, 0.0),
            0.6
        ));
        assert!(disc.intersects_segment(
            &Point2D::new(-2.0, 1.0),
            &Point2D::new(2.0, 1.0),
            0.0
        ));
    }

    #[test]
    fn test_rect_slab_segment_test() {
        let rect = Shape::Rect {
            min: Point2D::new(0.0, 0.0),
            max: Point2D::new(1.0, 1.0),
        };
        assert!(rect.intersects_segment(&Point2D::new(-1.0, 0.5), &Point2D::new(2.0, 0.5), 0.0));
        assert!(!rect.intersects_segment(&Point2D::new(-1.0, 2.0), &Point2D::new(2.0, 2.0), 0.0));
        // vertical segment crossing the top edge
        assert!(rect.intersects_segment(&Point2D::new(0.5, 0.5), &Point2D::new(0.5, 2.0), 0.0));
        // contained segment
        assert!(rect.intersects_segment(&Point2D::new(0.2, 0.2), &Point2D::new(0.8, 0.8), 0.0));
    }

    #[test]
    fn test_polygon_containment_and_crossing() {
        let triangle = Shape::Polygon {
            vertices: vec![
                Point2D::new(0.0, 0.0),
                Point2D::new(2.0, 0.0),
                Point2D::new(1.0, 2.0),
            ],
        };
        assert!(triangle.contains(&Point2D::new(1.0, 0.5)));
        assert!(!triangle.contains(&Point2D::new(2.0, 2.0)));
        assert!(triangle.intersects_segment(
            &Point2D::new(-1.0, 0.5),
            &Point2D::new(3.0, 0.5),
            0.0
        ));
        assert!(!triangle.intersects_segment(
            &Point2D::new(-1.0, 3.0),
            &Point2D::new(3.0, 3.0),
            0.0
        ));
    }

    #[test]
    fn test_degenerate_shapes_rejected() {
        assert!(Shape::Disc {
            center: Point2D::origin(),
            radius: 0.0
        }
        .validate()
        .is_err());
        assert!(Shape::Rect {
            min: Point2D::new(1.0, 0.0),
            max: Point2D::new(1.0, 2.0)
        }
        .validate()
        .is_err());
        let bowtie = Shape::Polygon {
            vertices: vec![
                Point2D::new(0.0, 0.0),
                Point2D::new(1.0, 1.0),
                Point2D::new(1.0, 0.0),
                Point2D::new(0.0, 1.0),
            ],
        };
        assert!(bowtie.validate().is_err());
        let square = Shape::Polygon {
            vertices: vec![
                Point2D::new(0.0, 0.0),
                Point2D::new(1.0, 0.0),
                Point2D::new(1.0, 1.0),
                Point2D::new(0.0, 1.0),
            ],
        };
        assert!(square.validate().is_ok());
    }

    #[test]
    fn test_disc_sample_stays_inside() {
        use rand::SeedableRng;
        let disc = Shape::Disc {
            center: Point2D::new(2.0, 3.0),
            radius: 0.7,
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let p = disc.sample(&mut rng);
            assert!(disc.contains(&p));
        }
    }

    #[test]
    fn test_bounding_boxes() {
        let disc = Shape::Disc {
            center: Point2D::new(1.0, 1.0),
            radius: 0.5,
        };
        let (min, max) = disc.bounding_box();
        assert!((min.x - 0.5).abs() < 1e-12 && (max.y - 1.5).abs() < 1e-12);
        assert!(bbox_overlap(
            &min,
            &max,
            &Point2D::new(1.4, 1.4),
            &Point2D::new(2.0, 2.0)
        ));
        assert!(!bbox_overlap(
            &min,
            &max,
            &Point2D::new(2.0, 2.0),
            &Point2D::new(3.0, 3.0)
        ));
    }
}
