//! Cubic Bézier splines and the arc-length-parameterized paths cars follow.
//!
//! A spline is sampled through a distance → t lookup table so that advancing
//! a path by `velocity · delta` meters moves the car by that many meters of
//! arc, not of parameter. Degenerate splines (zero length, NaN controls)
//! fall back to straight interpolation between their endpoints.

use bevy::math::Vec2;

use crate::road_network::NodeId;

/// Resolution of the arc-length lookup table.
const LUT_STEPS: usize = 32;

/// Splines shorter than this are treated as degenerate.
const MIN_SPLINE_LENGTH: f32 = 1e-3;

#[derive(Debug, Clone)]
pub struct CubicSpline {
    pub p0: Vec2,
    pub p1: Vec2,
    pub p2: Vec2,
    pub p3: Vec2,
    /// `(cumulative arc length, t)` pairs, ascending.
    lut: Vec<(f32, f32)>,
    length: f32,
    degenerate: bool,
}

impl CubicSpline {
    pub fn new(p0: Vec2, p1: Vec2, p2: Vec2, p3: Vec2) -> Self {
        let mut spline = Self {
            p0,
            p1,
            p2,
            p3,
            lut: Vec::new(),
            length: 0.0,
            degenerate: false,
        };
        let finite = [p0, p1, p2, p3].iter().all(|p| p.x.is_finite() && p.y.is_finite());
        if !finite {
            spline.degenerate = true;
            spline.length = if p0.is_finite() && p3.is_finite() {
                p0.distance(p3)
            } else {
                0.0
            };
            return spline;
        }
        spline.build_lut();
        if spline.length < MIN_SPLINE_LENGTH || !spline.length.is_finite() {
            spline.degenerate = true;
            spline.length = p0.distance(p3).max(MIN_SPLINE_LENGTH);
        }
        spline
    }

    /// Spline between two oriented endpoints. `tightness` scales the
    /// tangent magnitude relative to the endpoint distance: straight lane
    /// links use a loose ~0.5, intersection corners a tighter ~0.35.
    pub fn from_endpoints(
        start: Vec2,
        start_direction: Vec2,
        end: Vec2,
        end_direction: Vec2,
        tightness: f32,
    ) -> Self {
        let reach = start.distance(end) * tightness;
        Self::new(
            start,
            start + start_direction * reach,
            end - end_direction * reach,
            end,
        )
    }

    fn build_lut(&mut self) {
        self.lut = Vec::with_capacity(LUT_STEPS + 1);
        self.lut.push((0.0, 0.0));
        let mut cumulative = 0.0_f32;
        let mut prev = self.p0;
        for i in 1..=LUT_STEPS {
            let t = i as f32 / LUT_STEPS as f32;
            let point = self.evaluate(t);
            cumulative += point.distance(prev);
            self.lut.push((cumulative, t));
            prev = point;
        }
        self.length = cumulative;
    }

    /// Total arc length in meters.
    pub fn length(&self) -> f32 {
        self.length
    }

    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    /// Evaluate at parameter `t` in `[0, 1]`.
    pub fn evaluate(&self, t: f32) -> Vec2 {
        let t = t.clamp(0.0, 1.0);
        if self.degenerate {
            return self.p0.lerp(self.p3, t);
        }
        let u = 1.0 - t;
        let uu = u * u;
        let tt = t * t;
        u * uu * self.p0 + 3.0 * uu * t * self.p1 + 3.0 * u * tt * self.p2 + t * tt * self.p3
    }

    /// First derivative at parameter `t`.
    pub fn tangent(&self, t: f32) -> Vec2 {
        let t = t.clamp(0.0, 1.0);
        if self.degenerate {
            return self.p3 - self.p0;
        }
        let u = 1.0 - t;
        3.0 * u * u * (self.p1 - self.p0)
            + 6.0 * u * t * (self.p2 - self.p1)
            + 3.0 * t * t * (self.p3 - self.p2)
    }

    /// Parameter at a given arc length, through the lookup table.
    fn t_at_length(&self, s: f32) -> f32 {
        if self.degenerate || self.length <= 0.0 {
            return (s / self.length.max(MIN_SPLINE_LENGTH)).clamp(0.0, 1.0);
        }
        let s = s.clamp(0.0, self.length);
        let idx = self
            .lut
            .partition_point(|&(d, _)| d < s)
            .clamp(1, self.lut.len() - 1);
        let (d0, t0) = self.lut[idx - 1];
        let (d1, t1) = self.lut[idx];
        let span = d1 - d0;
        let frac = if span.abs() < f32::EPSILON {
            0.0
        } else {
            (s - d0) / span
        };
        t0 + frac * (t1 - t0)
    }

    pub fn position_at_length(&self, s: f32) -> Vec2 {
        self.evaluate(self.t_at_length(s))
    }

    /// Unit travel direction at a given arc length. Falls back to the
    /// endpoint chord when the tangent degenerates.
    pub fn direction_at_length(&self, s: f32) -> Vec2 {
        let tangent = self.tangent(self.t_at_length(s));
        let fallback = (self.p3 - self.p0).normalize_or(Vec2::X);
        let dir = tangent.normalize_or(fallback);
        if dir.x.is_finite() && dir.y.is_finite() {
            dir
        } else {
            fallback
        }
    }
}

/// A spline plus the metadata a path needs without re-deriving it.
#[derive(Debug, Clone)]
pub struct SplineMeta {
    pub spline: CubicSpline,
    pub length: f32,
    pub end_point: Vec2,
    /// The road-network node this spline ends at, when it follows an edge.
    pub end_node: Option<NodeId>,
}

impl SplineMeta {
    pub fn new(spline: CubicSpline, end_node: Option<NodeId>) -> Self {
        let length = spline.length();
        let end_point = spline.p3;
        Self {
            spline,
            length,
            end_point,
            end_node,
        }
    }
}

/// An ordered sequence of splines with a running arc-length parameter.
#[derive(Debug, Clone)]
pub struct Path {
    splines: Vec<SplineMeta>,
    current: usize,
    parameter: f32,
    start_point: Vec2,
    end_point: Vec2,
    finished: bool,
}

impl Path {
    /// A path over at least one spline. Empty spline lists have no
    /// geometry to follow and yield `None`.
    pub fn from_splines(splines: Vec<SplineMeta>) -> Option<Self> {
        let first = splines.first()?;
        let start_point = first.spline.p0;
        let end_point = splines.last()?.end_point;
        Some(Self {
            splines,
            current: 0,
            parameter: 0.0,
            start_point,
            end_point,
            finished: false,
        })
    }

    pub fn start_point(&self) -> Vec2 {
        self.start_point
    }

    pub fn end_point(&self) -> Vec2 {
        self.end_point
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn current_spline(&self) -> &SplineMeta {
        &self.splines[self.current.min(self.splines.len() - 1)]
    }

    pub fn splines(&self) -> &[SplineMeta] {
        &self.splines
    }

    /// Arc length consumed on the current spline.
    pub fn parameter(&self) -> f32 {
        self.parameter
    }

    /// Position and unit direction at the running parameter.
    pub fn sample(&self) -> (Vec2, Vec2) {
        let meta = self.current_spline();
        (
            meta.spline.position_at_length(self.parameter),
            meta.spline.direction_at_length(self.parameter),
        )
    }

    /// Position and direction `distance` meters further along the path,
    /// crossing spline boundaries and clamping at the path end.
    pub fn sample_ahead(&self, distance: f32) -> (Vec2, Vec2) {
        let mut remaining = self.parameter + distance.max(0.0);
        for (index, meta) in self.splines.iter().enumerate().skip(self.current) {
            if remaining <= meta.length || index + 1 == self.splines.len() {
                return (
                    meta.spline.position_at_length(remaining),
                    meta.spline.direction_at_length(remaining),
                );
            }
            remaining -= meta.length;
        }
        let last = self.splines.last().expect("paths own at least one spline");
        (
            last.spline.position_at_length(last.length),
            last.spline.direction_at_length(last.length),
        )
    }

    /// Advance the running parameter by `distance` meters. Overflowing the
    /// current spline moves to the next; finishing the last spline sets
    /// `finished` exactly once.
    pub fn advance(&mut self, distance: f32) {
        if self.finished {
            return;
        }
        self.parameter += distance.max(0.0);
        while self.parameter >= self.splines[self.current].length {
            if self.current + 1 == self.splines.len() {
                self.parameter = self.splines[self.current].length;
                self.finished = true;
                return;
            }
            self.parameter -= self.splines[self.current].length;
            self.current += 1;
        }
    }

    /// Arc length left to the end of the path.
    pub fn remaining_length(&self) -> f32 {
        let mut remaining = self.splines[self.current].length - self.parameter;
        for meta in &self.splines[self.current + 1..] {
            remaining += meta.length;
        }
        remaining.max(0.0)
    }

    /// The node the current spline runs toward, and the distance to it.
    pub fn next_node(&self) -> Option<(NodeId, f32)> {
        let meta = self.current_spline();
        meta.end_node
            .map(|node| (node, (meta.length - self.parameter).max(0.0)))
    }

    /// Drop everything past the current spline, so the path ends at its
    /// end. Used when a car is told to despawn mid-route.
    pub fn truncate_after_current(&mut self) {
        self.splines.truncate(self.current + 1);
        self.end_point = self.splines[self.current].end_point;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight(from: Vec2, to: Vec2) -> CubicSpline {
        let dir = (to - from).normalize();
        CubicSpline::from_endpoints(from, dir, to, dir, 0.4)
    }

    #[test]
    fn test_straight_spline_length_matches_chord() {
        let spline = straight(Vec2::ZERO, Vec2::new(10.0, 0.0));
        assert!((spline.length() - 10.0).abs() < 0.05);
        let mid = spline.position_at_length(5.0);
        assert!((mid.x - 5.0).abs() < 0.1);
        assert!(mid.y.abs() < 0.01);
    }

    #[test]
    fn test_endpoints_evaluate_exactly() {
        let spline = CubicSpline::new(
            Vec2::new(1.0, 2.0),
            Vec2::new(3.0, 8.0),
            Vec2::new(6.0, -2.0),
            Vec2::new(9.0, 4.0),
        );
        assert_eq!(spline.evaluate(0.0), Vec2::new(1.0, 2.0));
        assert_eq!(spline.evaluate(1.0), Vec2::new(9.0, 4.0));
    }

    #[test]
    fn test_degenerate_spline_falls_back_to_linear() {
        let spline = CubicSpline::new(
            Vec2::new(2.0, 2.0),
            Vec2::new(f32::NAN, 0.0),
            Vec2::new(0.0, 0.0),
            Vec2::new(6.0, 2.0),
        );
        assert!(spline.is_degenerate());
        let mid = spline.position_at_length(spline.length() / 2.0);
        assert!(mid.x.is_finite() && mid.y.is_finite());
        assert!((mid - Vec2::new(4.0, 2.0)).length() < 0.5);
        // Zero-length splines degrade the same way.
        let point = CubicSpline::new(Vec2::ONE, Vec2::ONE, Vec2::ONE, Vec2::ONE);
        assert!(point.is_degenerate());
        assert!(point.direction_at_length(0.0).is_finite());
    }

    #[test]
    fn test_path_advances_across_spline_boundaries() {
        let a = SplineMeta::new(straight(Vec2::ZERO, Vec2::new(10.0, 0.0)), None);
        let b = SplineMeta::new(
            straight(Vec2::new(10.0, 0.0), Vec2::new(20.0, 0.0)),
            None,
        );
        let mut path = Path::from_splines(vec![a, b]).unwrap();
        assert_eq!(path.start_point(), Vec2::ZERO);
        assert_eq!(path.end_point(), Vec2::new(20.0, 0.0));

        path.advance(12.0);
        assert!(!path.finished());
        let (pos, dir) = path.sample();
        assert!((pos.x - 12.0).abs() < 0.3);
        assert!(dir.x > 0.99);

        path.advance(100.0);
        assert!(path.finished());
        let (pos, _) = path.sample();
        assert!((pos.x - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_finished_is_set_exactly_once_and_sticks() {
        let only = SplineMeta::new(straight(Vec2::ZERO, Vec2::new(5.0, 0.0)), None);
        let mut path = Path::from_splines(vec![only]).unwrap();
        assert!(!path.finished());
        path.advance(5.5);
        assert!(path.finished());
        path.advance(1.0);
        assert!(path.finished());
        assert!((path.sample().0.x - 5.0).abs() < 0.01);
    }

    #[test]
    fn test_sample_ahead_crosses_boundaries_and_clamps() {
        let a = SplineMeta::new(straight(Vec2::ZERO, Vec2::new(10.0, 0.0)), None);
        let b = SplineMeta::new(
            straight(Vec2::new(10.0, 0.0), Vec2::new(10.0, 10.0)),
            None,
        );
        let path = Path::from_splines(vec![a, b]).unwrap();
        let (ahead, dir) = path.sample_ahead(15.0);
        assert!((ahead - Vec2::new(10.0, 5.0)).length() < 0.5);
        assert!(dir.y > 0.8);
        // Far past the end clamps to the endpoint.
        let (end, _) = path.sample_ahead(1000.0);
        assert!((end - Vec2::new(10.0, 10.0)).length() < 0.1);
    }

    #[test]
    fn test_remaining_length_and_truncate() {
        let a = SplineMeta::new(straight(Vec2::ZERO, Vec2::new(10.0, 0.0)), None);
        let b = SplineMeta::new(
            straight(Vec2::new(10.0, 0.0), Vec2::new(20.0, 0.0)),
            None,
        );
        let mut path = Path::from_splines(vec![a, b]).unwrap();
        assert!((path.remaining_length() - 20.0).abs() < 0.2);
        path.advance(3.0);
        assert!((path.remaining_length() - 17.0).abs() < 0.2);

        path.truncate_after_current();
        assert!((path.end_point() - Vec2::new(10.0, 0.0)).length() < 0.01);
        path.advance(100.0);
        assert!(path.finished());
    }
}
