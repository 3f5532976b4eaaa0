//! Collision Detection
//!
//! Continuous-space physics for movement legality and bullet-hit resolution.
//! Everything that can be hit is a [`CircleBox`]; everything that travels is a
//! [`Segment`] covering one tick of motion.

use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;

// =============================================================================
// PRIMITIVES
// =============================================================================

/// Closest point to `p` on the segment `a`-`b`.
///
/// The projection is clamped to the segment; a zero-length segment yields `a`.
pub fn closest_point_on_segment(p: Vec2, a: Vec2, b: Vec2) -> Vec2 {
    let delta = b - a;
    let length_sq = delta.length_squared();
    if length_sq == 0.0 {
        return a;
    }
    let t = ((p - a).dot(delta) / length_sq).clamp(0.0, 1.0);
    a + delta * t
}

/// Squared distance from `p` to the segment `a`-`b`.
#[inline]
pub fn point_segment_distance_sqr(p: Vec2, a: Vec2, b: Vec2) -> f64 {
    closest_point_on_segment(p, a, b).distance_squared(p)
}

/// Distance from `p` to the segment `a`-`b`.
#[inline]
pub fn point_segment_distance(p: Vec2, a: Vec2, b: Vec2) -> f64 {
    point_segment_distance_sqr(p, a, b).sqrt()
}

/// Points where the segment `start`-`end` crosses the circle boundary.
///
/// Solves `a*t^2 + 2*b*t + c = 0` along `start + t * (end - start)` and keeps
/// roots with `t` in `[0, 1]`, entry point first. A segment lying strictly
/// inside the circle crosses nothing.
pub fn segment_circle_intersections(start: Vec2, end: Vec2, center: Vec2, radius: f64) -> Vec<Vec2> {
    let d = start - end;
    let r = center - start;
    let a = d.length_squared();
    if a == 0.0 {
        return Vec::new();
    }
    let b = d.dot(r);
    let c = r.length_squared() - radius * radius;

    let discriminant = b * b - a * c;
    if discriminant < 0.0 {
        return Vec::new();
    }

    let s = discriminant.sqrt();
    let mut points = Vec::with_capacity(2);
    for t in [(-b - s) / a, (-b + s) / a] {
        if (0.0..=1.0).contains(&t) {
            points.push(Vec2::new(
                (1.0 - t) * start.x + t * end.x,
                (1.0 - t) * start.y + t * end.y,
            ));
        }
    }
    points
}

// =============================================================================
// SHAPES
// =============================================================================

/// Circular bounding region.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CircleBox {
    /// Center
    pub center: Vec2,
    /// Radius
    pub radius: f64,
}

impl CircleBox {
    /// Create a new circle.
    pub const fn new(center: Vec2, radius: f64) -> Self {
        Self { center, radius }
    }

    /// True if the segment passes strictly closer than `radius` to the center.
    #[inline]
    pub fn intersects_segment(&self, start: Vec2, end: Vec2) -> bool {
        point_segment_distance(self.center, start, end) < self.radius
    }

    /// Boundary crossings of a segment, in travel order.
    #[inline]
    pub fn intersection_points(&self, start: Vec2, end: Vec2) -> Vec<Vec2> {
        segment_circle_intersections(start, end, self.center, self.radius)
    }

    /// Strict overlap test with another circle.
    #[inline]
    pub fn intersects_circle(&self, center: Vec2, radius: f64) -> bool {
        self.center.distance(center) < self.radius + radius
    }

    /// True if this circle overlaps any of `boxes`.
    pub fn intersects_any<'a, I>(&self, boxes: I) -> bool
    where
        I: IntoIterator<Item = &'a CircleBox>,
    {
        boxes
            .into_iter()
            .any(|other| other.intersects_circle(self.center, self.radius))
    }
}

/// One tick of straight-line travel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    /// Where travel starts this tick
    pub start: Vec2,
    /// Where travel ends this tick
    pub end: Vec2,
    /// Unit travel direction
    pub direction: Vec2,
}

impl Segment {
    /// Create a new segment.
    pub const fn new(start: Vec2, end: Vec2, direction: Vec2) -> Self {
        Self { start, end, direction }
    }

    /// True if any of `boxes` is within reach of the segment.
    pub fn intersects_any<'a, I>(&self, boxes: I) -> bool
    where
        I: IntoIterator<Item = &'a CircleBox>,
    {
        boxes
            .into_iter()
            .any(|b| b.intersects_segment(self.start, self.end))
    }

    /// Boundary crossings with `target`.
    #[inline]
    pub fn intersection_points(&self, target: &CircleBox) -> Vec<Vec2> {
        target.intersection_points(self.start, self.end)
    }
}

// =============================================================================
// NEAREST HIT
// =============================================================================

/// Candidate whose boundary the segment crosses closest to its start.
///
/// Distances are compared squared. On an exact tie the candidate that came
/// first in `candidates` wins. Returns `None` when nothing is crossed.
pub fn nearest_hit<T, I>(segment: &Segment, candidates: I) -> Option<T>
where
    I: IntoIterator<Item = (CircleBox, T)>,
{
    let mut best: Option<(f64, T)> = None;
    for (shape, tag) in candidates {
        for point in segment.intersection_points(&shape) {
            let distance_sq = point.distance_squared(segment.start);
            let closer = match &best {
                Some((best_sq, _)) => distance_sq < *best_sq,
                None => true,
            };
            if closer {
                best = Some((distance_sq, tag));
                // Later points of this shape are farther along the segment.
                break;
            }
        }
    }
    best.map(|(_, tag)| tag)
}

// =============================================================================
// TESTS
// =============================================================================
