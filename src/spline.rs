// Curvature: a stereo dynamics processor with a freely drawn transfer curve
// Copyright (C) 2026 the Curvature authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The transfer curve. This maps a detected level in decibels to an output level in decibels using
//! a piecewise cubic curve through a small, fixed number of knots. The curve that's used for
//! processing glides towards the most recently edited knots so that moving a knot while audio is
//! playing never causes a discontinuity.
//!
//! This is also what the editor should use to draw the curve, see [`evaluate()`].

use atomic_float::AtomicF32;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// The number of knot slots. Only the enabled knots are part of the curve.
pub const MAX_KNOTS: usize = 9;

/// The range for the knots' input and output levels, in decibels.
pub const KNOT_LEVEL_RANGE: (f64, f64) = (-96.0, 6.0);
/// The range for the knots' tangents, in decibels per decibel.
pub const KNOT_TANGENT_RANGE: (f64, f64) = (-20.0, 20.0);

/// Once every coordinate is this close to its target the automation snaps to the target and
/// stops.
const AUTOMATION_EPSILON: f64 = 1e-9;

/// A point on the curve. `x` is the input level and `y` the output level, both in decibels. The
/// tangent is the curve's slope at this point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplinePoint {
    pub x: f64,
    pub y: f64,
    pub tangent: f64,
}

/// A knot slot as edited by the user.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Knot {
    #[serde(flatten)]
    pub point: SplinePoint,
    /// Disabled knots don't participate in the curve.
    pub enabled: bool,
}

/// All knot slots. The enabled knots must be ordered by their input level, the
/// [`AutoSpline`] enforces this when it picks up new knots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KnotSet(pub [Knot; MAX_KNOTS]);

/// Provides the knots the user has drawn. This is read once at the start of every block.
pub trait SplineSource: Send + Sync {
    /// A counter that changes whenever any knot changes. The knots are only read again after the
    /// generation changes.
    fn generation(&self) -> u32;

    /// The current knots.
    fn knots(&self) -> KnotSet;
}

/// A [`SplineSource`] backed by atomics so an editor on another thread can move knots around
/// while the audio thread is reading them. Every edit bumps the generation.
#[derive(Debug)]
pub struct SharedSpline {
    knots: [AtomicKnot; MAX_KNOTS],
    generation: AtomicU32,
}

#[derive(Debug)]
struct AtomicKnot {
    x: AtomicF32,
    y: AtomicF32,
    tangent: AtomicF32,
    enabled: AtomicBool,
}

/// The curve used for processing, together with the knots it's gliding towards.
#[derive(Debug, Clone)]
pub struct AutoSpline {
    /// The knots currently in effect. Indexed by slot, disabled slots contain stale values.
    current: [SplinePoint; MAX_KNOTS],
    /// The knots `current` is moving towards.
    target: [SplinePoint; MAX_KNOTS],
    /// The slot indices of the enabled knots in ascending order. Only the first `num_active`
    /// elements are used.
    active: [usize; MAX_KNOTS],
    num_active: usize,

    /// The one-pole coefficient used to move `current` towards `target`. Zero means jumping
    /// straight to the target.
    alpha: f64,
    /// Whether `current` and `target` still differ.
    is_automating: bool,
}

impl SplinePoint {
    pub const fn new(x: f64, y: f64, tangent: f64) -> Self {
        Self { x, y, tangent }
    }
}

impl Knot {
    pub const fn new(x: f64, y: f64, tangent: f64, enabled: bool) -> Self {
        Self {
            point: SplinePoint::new(x, y, tangent),
            enabled,
        }
    }
}

impl Default for KnotSet {
    /// The knots are spread out evenly over the identity line. The outer knots and the four knots
    /// in the middle are enabled.
    fn default() -> Self {
        let (min, max) = KNOT_LEVEL_RANGE;
        let step = (max - min) / (MAX_KNOTS - 1) as f64;

        let mut knots = [Knot::new(0.0, 0.0, 1.0, false); MAX_KNOTS];
        for (idx, knot) in knots.iter_mut().enumerate() {
            let level = min + step * idx as f64;
            *knot = Knot::new(
                level,
                level,
                1.0,
                matches!(idx, 0 | 3..=6) || idx == MAX_KNOTS - 1,
            );
        }

        Self(knots)
    }
}

impl KnotSet {
    /// A set with only the given knots enabled, in order, and all other slots disabled.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_KNOTS`] points are passed.
    pub fn from_points(points: &[SplinePoint]) -> Self {
        assert!(points.len() <= MAX_KNOTS);

        let mut set = Self::disabled();
        for (knot, point) in set.0.iter_mut().zip(points) {
            *knot = Knot {
                point: *point,
                enabled: true,
            };
        }

        set
    }

    /// A set without any enabled knots. Processing is bypassed with this set.
    pub fn disabled() -> Self {
        let mut set = Self::default();
        for knot in &mut set.0 {
            knot.enabled = false;
        }

        set
    }

    /// The number of enabled knots.
    pub fn num_enabled(&self) -> usize {
        self.0.iter().filter(|knot| knot.enabled).count()
    }
}

impl Default for SharedSpline {
    fn default() -> Self {
        Self::new(&KnotSet::default())
    }
}

impl SharedSpline {
    pub fn new(knots: &KnotSet) -> Self {
        let knots = knots.0.map(|knot| AtomicKnot {
            x: AtomicF32::new(knot.point.x as f32),
            y: AtomicF32::new(knot.point.y as f32),
            tangent: AtomicF32::new(knot.point.tangent as f32),
            enabled: AtomicBool::new(knot.enabled),
        });

        Self {
            knots,
            generation: AtomicU32::new(0),
        }
    }

    /// Move a knot. The coordinates are clamped to [`KNOT_LEVEL_RANGE`] and
    /// [`KNOT_TANGENT_RANGE`].
    ///
    /// # Panics
    ///
    /// Panics if `index >= MAX_KNOTS`.
    pub fn set_point(&self, index: usize, point: SplinePoint) {
        let knot = &self.knots[index];
        let (min, max) = KNOT_LEVEL_RANGE;
        let (min_tangent, max_tangent) = KNOT_TANGENT_RANGE;
        knot.x.store(point.x.clamp(min, max) as f32, Ordering::Relaxed);
        knot.y.store(point.y.clamp(min, max) as f32, Ordering::Relaxed);
        knot.tangent.store(
            point.tangent.clamp(min_tangent, max_tangent) as f32,
            Ordering::Relaxed,
        );

        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Enable or disable a knot.
    ///
    /// # Panics
    ///
    /// Panics if `index >= MAX_KNOTS`.
    pub fn set_enabled(&self, index: usize, enabled: bool) {
        self.knots[index].enabled.store(enabled, Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Replace all knots at once, for instance when restoring state.
    pub fn set_knots(&self, knots: &KnotSet) {
        for (index, knot) in knots.0.iter().enumerate() {
            self.set_point(index, knot.point);
            self.set_enabled(index, knot.enabled);
        }
    }
}

impl SplineSource for SharedSpline {
    fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    fn knots(&self) -> KnotSet {
        KnotSet(std::array::from_fn(|idx| {
            let knot = &self.knots[idx];
            Knot {
                point: SplinePoint {
                    x: knot.x.load(Ordering::Relaxed) as f64,
                    y: knot.y.load(Ordering::Relaxed) as f64,
                    tangent: knot.tangent.load(Ordering::Relaxed) as f64,
                },
                enabled: knot.enabled.load(Ordering::Relaxed),
            }
        }))
    }
}

/// Evaluate the curve through `points` at `input_db`. The points must be sorted by their `x`
/// coordinate. Between two points the curve is a cubic Hermite segment using the points' tangents,
/// and outside of the outer points the curve is flat. Without any points this is the identity
/// function, but that case should be treated as a bypass by the caller.
pub fn evaluate(points: &[SplinePoint], input_db: f64) -> f64 {
    evaluate_with(points.len(), |idx| points[idx], input_db)
}

#[inline]
fn evaluate_with(num_points: usize, point: impl Fn(usize) -> SplinePoint, x: f64) -> f64 {
    if num_points == 0 {
        return x;
    }

    let first = point(0);
    if x <= first.x {
        return first.y;
    }
    let last = point(num_points - 1);
    if x >= last.x {
        return last.y;
    }

    let mut left = first;
    for idx in 1..num_points {
        let right = point(idx);
        if x < right.x {
            return hermite(left, right, x);
        }
        left = right;
    }

    last.y
}

#[inline]
fn hermite(left: SplinePoint, right: SplinePoint, x: f64) -> f64 {
    let dx = right.x - left.x;
    if dx <= f64::EPSILON {
        return right.y;
    }

    let t = (x - left.x) / dx;
    let t2 = t * t;
    let t3 = t2 * t;

    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;

    h00 * left.y + h10 * dx * left.tangent + h01 * right.y + h11 * dx * right.tangent
}

impl AutoSpline {
    /// Create a curve that's already settled on `knots`.
    pub fn new(knots: &KnotSet) -> Self {
        let mut spline = Self {
            current: [SplinePoint::new(0.0, 0.0, 1.0); MAX_KNOTS],
            target: [SplinePoint::new(0.0, 0.0, 1.0); MAX_KNOTS],
            active: [0; MAX_KNOTS],
            num_active: 0,

            alpha: 0.0,
            is_automating: false,
        };
        spline.reset(knots);

        spline
    }

    /// Jump straight to `knots` without any automation.
    pub fn reset(&mut self, knots: &KnotSet) {
        self.retarget(knots);
        self.current = self.target;
        self.is_automating = false;
    }

    /// Set the smoothing coefficient. See [`util::time_constant_alpha()`][crate::util::time_constant_alpha()].
    pub fn set_smoothing_alpha(&mut self, alpha: f64) {
        curv_debug_assert!((0.0..1.0).contains(&alpha));
        self.alpha = alpha;
    }

    /// Start moving towards `knots`. Knots that were just enabled start out at their target since
    /// they have no meaningful previous position. Returns the number of enabled knots.
    ///
    /// This should only be called between blocks. Changing which knots are enabled changes the
    /// shape of the curve immediately.
    pub fn retarget(&mut self, knots: &KnotSet) -> usize {
        let was_active = {
            let mut was_active = [false; MAX_KNOTS];
            for &idx in &self.active[..self.num_active] {
                was_active[idx] = true;
            }
            was_active
        };

        self.num_active = 0;
        let mut previous_x = f64::NEG_INFINITY;
        for (idx, knot) in knots.0.iter().enumerate() {
            if !knot.enabled {
                continue;
            }

            // The curve requires the enabled knots to be sorted. Knots that were dragged past their
            // neighbor are pinned to the neighbor's position.
            let mut point = knot.point;
            if point.x < previous_x {
                point.x = previous_x;
            }
            previous_x = point.x;

            self.target[idx] = point;
            if !was_active[idx] {
                self.current[idx] = point;
            }

            self.active[self.num_active] = idx;
            self.num_active += 1;
        }

        self.is_automating = self.active[..self.num_active]
            .iter()
            .any(|&idx| self.current[idx] != self.target[idx]);

        self.num_active
    }

    /// The number of knots that are part of the curve.
    pub fn num_active(&self) -> usize {
        self.num_active
    }

    /// Whether the curve is still moving towards its target.
    pub fn is_automating(&self) -> bool {
        self.is_automating
    }

    /// The in-effect position of the `n`th enabled knot.
    pub fn active_point(&self, n: usize) -> SplinePoint {
        self.current[self.active[n]]
    }

    /// Move every enabled knot one step towards its target. Should be called once per sample.
    #[inline]
    pub fn automate(&mut self) {
        if !self.is_automating {
            return;
        }

        // This is `current += (1 - alpha) * (target - current)` written so that `alpha == 0`
        // lands exactly on the target
        let alpha = self.alpha;
        for &idx in &self.active[..self.num_active] {
            let target = self.target[idx];
            let current = &mut self.current[idx];
            current.x = target.x + alpha * (current.x - target.x);
            current.y = target.y + alpha * (current.y - target.y);
            current.tangent = target.tangent + alpha * (current.tangent - target.tangent);
        }
    }

    /// Snap to the target once the remaining distance is negligible so [`automate()`][Self::automate()]
    /// can stop doing work. Called at the end of every block.
    pub fn settle(&mut self) {
        if !self.is_automating {
            return;
        }

        let remaining = self.active[..self.num_active]
            .iter()
            .map(|&idx| {
                let (current, target) = (self.current[idx], self.target[idx]);
                (current.x - target.x)
                    .abs()
                    .max((current.y - target.y).abs())
                    .max((current.tangent - target.tangent).abs())
            })
            .fold(0.0, f64::max);
        if remaining < AUTOMATION_EPSILON {
            for &idx in &self.active[..self.num_active] {
                self.current[idx] = self.target[idx];
            }
            self.is_automating = false;
        }
    }

    /// Evaluate the in-effect curve. See [`evaluate()`].
    #[inline]
    pub fn evaluate(&self, input_db: f64) -> f64 {
        evaluate_with(self.num_active, |n| self.active_point(n), input_db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_points() -> [SplinePoint; 2] {
        [
            SplinePoint::new(-96.0, -96.0, 1.0),
            SplinePoint::new(6.0, 6.0, 1.0),
        ]
    }

    #[test]
    fn identity_curve() {
        let points = identity_points();
        for x in [-90.0, -40.0, -20.0, -3.0, 0.0, 5.5] {
            approx::assert_relative_eq!(evaluate(&points, x), x, epsilon = 1e-9);
        }
    }

    #[test]
    fn flat_extrapolation() {
        let points = identity_points();
        assert_eq!(evaluate(&points, -150.0), -96.0);
        assert_eq!(evaluate(&points, 12.0), 6.0);
    }

    #[test]
    fn passes_through_knots() {
        let points = [
            SplinePoint::new(-60.0, -60.0, 1.0),
            SplinePoint::new(-30.0, -35.0, 0.5),
            SplinePoint::new(-10.0, -24.0, 0.25),
            SplinePoint::new(0.0, -20.0, 0.0),
        ];
        for point in &points {
            approx::assert_relative_eq!(evaluate(&points, point.x), point.y, epsilon = 1e-9);
        }

        // Monotonic data with these tangents should produce a monotonic curve
        let mut previous = evaluate(&points, -60.0);
        let mut x = -60.0;
        while x < 0.0 {
            x += 0.25;
            let y = evaluate(&points, x);
            assert!(y >= previous - 1e-9);
            previous = y;
        }
    }

    #[test]
    fn no_points_is_identity() {
        assert_eq!(evaluate(&[], -12.0), -12.0);

        let spline = AutoSpline::new(&KnotSet::disabled());
        assert_eq!(spline.num_active(), 0);
        assert_eq!(spline.evaluate(-12.0), -12.0);
    }

    #[test]
    fn default_knots() {
        let knots = KnotSet::default();
        assert_eq!(knots.num_enabled(), 6);
        assert_eq!(knots.0[0].point.x, KNOT_LEVEL_RANGE.0);
        assert_eq!(knots.0[MAX_KNOTS - 1].point.x, KNOT_LEVEL_RANGE.1);

        // The default curve doesn't change the level
        let spline = AutoSpline::new(&knots);
        approx::assert_relative_eq!(spline.evaluate(-20.0), -20.0, epsilon = 1e-9);
    }

    #[test]
    fn retarget_sorts_knots() {
        let mut knots = KnotSet::from_points(&identity_points());
        knots.0[2] = Knot::new(-50.0, -40.0, 1.0, true);

        let mut spline = AutoSpline::new(&KnotSet::disabled());
        assert_eq!(spline.retarget(&knots), 3);

        // The third knot was placed before the second one, so it gets pinned to the second knot's
        // input level
        assert_eq!(spline.active_point(2).x, 6.0);
        for n in 1..spline.num_active() {
            assert!(spline.active_point(n).x >= spline.active_point(n - 1).x);
        }
    }

    #[test]
    fn automation_converges_without_jumps() {
        let start = KnotSet::from_points(&identity_points());
        let mut target = start;
        target.0[1].point.y = -6.0;

        let mut spline = AutoSpline::new(&start);
        spline.set_smoothing_alpha(0.999);
        spline.retarget(&target);
        assert!(spline.is_automating());

        let mut previous = spline.evaluate(0.0);
        approx::assert_relative_eq!(previous, 0.0, epsilon = 1e-9);
        for _ in 0..50_000 {
            spline.automate();
            let value = spline.evaluate(0.0);

            // Every step covers at most 0.1% of the remaining distance, and the knot starts out
            // 12 dB away from its target
            assert!((value - previous).abs() <= 0.001 * 12.0 + 1e-12);
            previous = value;
        }
        spline.settle();

        assert!(!spline.is_automating());
        approx::assert_relative_eq!(spline.evaluate(6.0), -6.0, epsilon = 1e-9);
    }

    #[test]
    fn zero_alpha_jumps_immediately() {
        let start = KnotSet::from_points(&identity_points());
        let mut target = start;
        target.0[0].point.y = -80.0;

        let mut spline = AutoSpline::new(&start);
        spline.set_smoothing_alpha(0.0);
        spline.retarget(&target);
        spline.automate();
        spline.settle();

        assert!(!spline.is_automating());
        assert_eq!(spline.active_point(0).y, -80.0);
    }

    #[test]
    fn newly_enabled_knots_start_at_their_target() {
        let mut knots = KnotSet::from_points(&identity_points());
        let mut spline = AutoSpline::new(&knots);
        spline.set_smoothing_alpha(0.999);

        knots.0[2] = Knot::new(6.0, 0.0, 0.0, true);
        knots.0[1].point.x = 0.0;
        knots.0[1].point.y = 0.0;
        spline.retarget(&knots);

        assert_eq!(spline.num_active(), 3);
        assert_eq!(spline.active_point(2), SplinePoint::new(6.0, 0.0, 0.0));
        // The knot that was already enabled still has to glide to its new position
        assert_eq!(spline.active_point(1), SplinePoint::new(6.0, 6.0, 1.0));
    }

    #[test]
    fn shared_spline_generation() {
        let shared = SharedSpline::default();
        let generation = shared.generation();

        shared.set_point(1, SplinePoint::new(-200.0, -30.0, 50.0));
        assert_ne!(shared.generation(), generation);

        // Out of range values are clamped
        let knot = shared.knots().0[1];
        assert_eq!(knot.point.x, KNOT_LEVEL_RANGE.0);
        assert_eq!(knot.point.y, -30.0);
        assert_eq!(knot.point.tangent, KNOT_TANGENT_RANGE.1);

        shared.set_enabled(1, true);
        assert!(shared.knots().0[1].enabled);
    }
}
