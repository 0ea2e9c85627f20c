//! Time-swept bounding-box candidate generation.
//!
//! Before paying for the exact solver, each pair of bodies is screened
//! with a conservative question: under their current linear motions, when
//! is the earliest instant their world-space bounding boxes could overlap?
//! The moving box of an affinely-moving geometry is itself the box of its
//! four affinely-moving corners, so per-axis position and velocity bounds
//! over the corners give linear envelopes whose overlap condition is four
//! linear inequalities in time.

use crate::geometry::Aabb;
use crate::math::Transform;

/// Per-axis position and velocity bounds of a moving bounding box,
/// evaluated at some reference instant.
#[derive(Clone, Copy, Debug)]
pub(crate) struct MovingAabb {
    x_min: f64,
    x_min_vel: f64,
    x_max: f64,
    x_max_vel: f64,
    y_min: f64,
    y_min_vel: f64,
    y_max: f64,
    y_max_vel: f64,
}

impl MovingAabb {
    /// Bounds of `bounds` carried by a trajectory whose transform at the
    /// reference instant is `pose` and whose derivative is `motion`.
    /// `None` for an empty geometry.
    pub fn new(bounds: &Aabb, pose: &Transform, motion: &Transform) -> Option<Self> {
        if !bounds.is_valid() {
            return None;
        }
        let mut corners = bounds.corners().into_iter();
        let first = corners.next().expect("an AABB has four corners");
        let (p, v) = (pose.apply(first), motion.apply(first));
        let mut moving = MovingAabb {
            x_min: p.x,
            x_min_vel: v.x,
            x_max: p.x,
            x_max_vel: v.x,
            y_min: p.y,
            y_min_vel: v.y,
            y_max: p.y,
            y_max_vel: v.y,
        };
        for corner in corners {
            let p = pose.apply(corner);
            let v = motion.apply(corner);
            moving.x_min = moving.x_min.min(p.x);
            moving.x_min_vel = moving.x_min_vel.min(v.x);
            moving.x_max = moving.x_max.max(p.x);
            moving.x_max_vel = moving.x_max_vel.max(v.x);
            moving.y_min = moving.y_min.min(p.y);
            moving.y_min_vel = moving.y_min_vel.min(v.y);
            moving.y_max = moving.y_max.max(p.y);
            moving.y_max_vel = moving.y_max_vel.max(v.y);
        }
        Some(moving)
    }
}

/// Shrink `[lo, hi]` to satisfy `p + t * q <= 0`. False when no `t` can.
fn restrict(lo: &mut f64, hi: &mut f64, p: f64, q: f64) -> bool {
    if q == 0.0 {
        return p <= 0.0;
    }
    let bound = -p / q;
    if q > 0.0 {
        *hi = hi.min(bound);
    } else {
        *lo = lo.max(bound);
    }
    true
}

/// Earliest offset `t >= 0` from the reference instant at which the two
/// moving boxes can overlap, or `None` if they never do.
///
/// Conservative in the right direction: the per-corner min/max bounds may
/// admit an overlap slightly before the true boxes touch, never after, so
/// no real contact is screened out.
pub(crate) fn earliest_overlap(a: &MovingAabb, b: &MovingAabb) -> Option<f64> {
    let mut lo = 0.0_f64;
    let mut hi = f64::INFINITY;
    let ok = restrict(&mut lo, &mut hi, a.x_min - b.x_max, a.x_min_vel - b.x_max_vel)
        && restrict(&mut lo, &mut hi, b.x_min - a.x_max, b.x_min_vel - a.x_max_vel)
        && restrict(&mut lo, &mut hi, a.y_min - b.y_max, a.y_min_vel - b.y_max_vel)
        && restrict(&mut lo, &mut hi, b.y_min - a.y_max, b.y_min_vel - a.y_max_vel);
    (ok && lo <= hi).then_some(lo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;

    fn unit_box() -> Aabb {
        Aabb {
            min: Vec2::new(-1.0, -1.0),
            max: Vec2::new(1.0, 1.0),
        }
    }

    fn moving(center: Vec2, vel: Vec2) -> MovingAabb {
        let mut motion = Transform::zero();
        motion.p = vel;
        MovingAabb::new(&unit_box(), &Transform::translation(center), &motion).unwrap()
    }

    #[test]
    fn overlapping_boxes_touch_immediately() {
        let a = moving(Vec2::zero(), Vec2::zero());
        let b = moving(Vec2::new(0.5, 0.0), Vec2::zero());
        assert_eq!(earliest_overlap(&a, &b), Some(0.0));
    }

    #[test]
    fn head_on_approach_gives_the_exact_touch_time() {
        let a = moving(Vec2::new(-2.0, 0.0), Vec2::new(1.0, 0.0));
        let b = moving(Vec2::new(2.0, 0.0), Vec2::new(-1.0, 0.0));
        assert_eq!(earliest_overlap(&a, &b), Some(1.0));
    }

    #[test]
    fn separating_boxes_never_overlap() {
        let a = moving(Vec2::new(-3.0, 0.0), Vec2::new(-1.0, 0.0));
        let b = moving(Vec2::new(3.0, 0.0), Vec2::new(1.0, 0.0));
        assert_eq!(earliest_overlap(&a, &b), None);
    }

    #[test]
    fn static_disjoint_boxes_never_overlap() {
        let a = moving(Vec2::zero(), Vec2::zero());
        let b = moving(Vec2::new(10.0, 0.0), Vec2::zero());
        assert_eq!(earliest_overlap(&a, &b), None);
    }

    #[test]
    fn diagonal_approach_waits_for_both_axes() {
        // meets in x at t = 1 but in y only at t = 2
        let a = moving(Vec2::new(-2.0, -4.0), Vec2::new(1.0, 1.0));
        let b = moving(Vec2::new(2.0, 0.0), Vec2::new(-1.0, 0.0));
        assert_eq!(earliest_overlap(&a, &b), Some(2.0));
    }

    #[test]
    fn missed_flyby_is_rejected() {
        // b crosses a's x-span long before a's y-span reaches it
        let a = moving(Vec2::new(0.0, -100.0), Vec2::new(0.0, 1.0));
        let b = moving(Vec2::new(-3.0, 0.0), Vec2::new(1.0, 0.0));
        // window on x: t in [1, 5]; window on y: t >= 98; empty overall
        assert_eq!(earliest_overlap(&a, &b), None);
    }

    #[test]
    fn rotation_widens_the_envelope() {
        // a spinning box's corner velocities point in all directions;
        // the envelope must include them all
        let spin = Transform {
            a: Vec2::new(0.0, 1.0),
            b: Vec2::new(-1.0, 0.0),
            p: Vec2::zero(),
        };
        let a = MovingAabb::new(&unit_box(), &Transform::identity(), &spin).unwrap();
        let b = moving(Vec2::new(4.0, 0.0), Vec2::zero());
        // the fastest corner of the envelope closes the 2-unit gap at
        // unit speed, so overlap cannot be ruled out before t = 2
        assert_eq!(earliest_overlap(&a, &b), Some(2.0));
    }

    #[test]
    fn empty_geometry_has_no_moving_bounds() {
        assert!(MovingAabb::new(
            &Aabb::empty(),
            &Transform::identity(),
            &Transform::zero()
        )
        .is_none());
    }
}
