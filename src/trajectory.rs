//! Time-parameterized affine trajectories.
//!
//! A trajectory pins down an object's world transform for *all* time, not
//! just the current instant: `transform(t) = base + (t - anchor) * motion`.
//! `motion` is the time derivative of the transform, itself written as a
//! transform. There is no integration step anywhere; moving an object means
//! replacing its trajectory, and everything downstream (contact times
//! included) is solved against the new line through time.
//!
//! The struct itself knows nothing about the clock; every operation that
//! depends on "now" takes it as a parameter. The
//! [`World`][crate::world::World] wrappers feed in the clock's time and
//! wake the bodies that ride on the trajectory.

use crate::math::{Transform, Vec2};

#[derive(Clone, Debug)]
pub struct Trajectory {
    base: Transform,
    motion: Transform,
    anchor: f64,
}

impl Trajectory {
    pub fn new(base: Transform, motion: Transform, anchor: f64) -> Self {
        Trajectory {
            base,
            motion,
            anchor,
        }
    }

    /// A trajectory that sits still at `base`.
    pub fn at_rest(base: Transform) -> Self {
        Self::new(base, Transform::zero(), 0.0)
    }

    /// The world transform at time `now`.
    pub fn transform_at(&self, now: f64) -> Transform {
        self.base.add_scaled(&self.motion, now - self.anchor)
    }

    /// A copy of the motion (the transform's time derivative).
    pub fn motion(&self) -> Transform {
        self.motion
    }

    pub fn anchor(&self) -> f64 {
        self.anchor
    }

    /// World position of the local point `v` at time `now`.
    pub fn pos_of(&self, now: f64, v: Vec2) -> Vec2 {
        self.transform_at(now).apply(v)
    }

    /// Instantaneous world velocity of the local point `v`.
    ///
    /// The motion is applied as a *point* transform: the linear columns
    /// contribute the rotational/shear part of the velocity and the
    /// translation column the linear part.
    pub fn vel_of(&self, v: Vec2) -> Vec2 {
        self.motion.apply(v)
    }

    /// Rebase so that `base` is valid at `now` and `motion` is measured
    /// about the current instant. The trajectory's semantics are unchanged.
    ///
    /// Every mutation normalizes first; otherwise repeated edits to
    /// `motion` would retroactively rewrite the past positions the old
    /// motion already produced.
    pub fn normalize(&mut self, now: f64) {
        self.base = self.transform_at(now);
        self.anchor = now;
    }

    /// Normalize, then let `f` edit the base and motion in place.
    pub fn modify(&mut self, now: f64, f: impl FnOnce(&mut Transform, &mut Transform)) {
        self.normalize(now);
        f(&mut self.base, &mut self.motion);
    }

    /// Replace the transform outright, re-anchoring at `now` without
    /// folding the old motion in; this is for setting absolute state.
    /// `motion` of `None` keeps the current motion.
    pub fn set_transform(&mut self, now: f64, base: Transform, motion: Option<Transform>) {
        self.base = base;
        self.anchor = now;
        if let Some(motion) = motion {
            self.motion = motion;
        }
    }

    pub fn set_motion(&mut self, now: f64, motion: Transform) {
        self.modify(now, |_, m| *m = motion);
    }

    /// Shift the transform by `v`.
    pub fn translate(&mut self, now: f64, v: Vec2) {
        self.modify(now, |base, _| base.p += v);
    }

    /// Place the transform's translation column at `v`.
    pub fn set_pos(&mut self, now: f64, v: Vec2) {
        self.modify(now, |base, _| base.p = v);
    }

    /// Add `v` to the translational velocity.
    pub fn impulse(&mut self, now: f64, v: Vec2) {
        self.modify(now, |_, m| m.p += v);
    }

    /// Replace the translational velocity with `v`.
    pub fn set_vel(&mut self, now: f64, v: Vec2) {
        self.modify(now, |_, m| m.p = v);
    }

    /// Choose the motion that carries the transform to exactly `target`
    /// at time `now + dt`.
    pub fn transform_to(&mut self, now: f64, target: Transform, dt: f64) {
        self.modify(now, |base, m| *m = (target - *base) * (1.0 / dt));
    }

    /// Freeze in place: zero motion.
    pub fn stop(&mut self, now: f64) {
        self.modify(now, |_, m| *m = Transform::zero());
    }
}
