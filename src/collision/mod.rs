//! Contact records, tolerances and the impulse response.
//!
//! The solver in [`vertex_edge`] produces [`Collision`] records at exact
//! instants; rule callbacks receive them and usually answer with
//! [`Collision::resolve`], which applies a normal impulse to the two
//! trajectories and thereby restarts the whole scheduling cycle.

pub(crate) mod sweep;
pub(crate) mod vertex_edge;

use crate::math::{self as m, Vec2};
use crate::world::{BodyKey, World};

/// Distance and angle slop for the exact solver.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub struct ToleranceProfile {
    /// World-space distance below which a vertex and an edge are treated
    /// as touching *now*. Defeats the microscopic negative or overshoot
    /// contact times that floating point would otherwise produce.
    pub close_collision_threshold: f64,
    /// Dimensionless slack in `[0, 1]` on the vertex-arc containment
    /// test, so near-aligned surfaces still register contact.
    pub directional_tolerance: f64,
}

impl Default for ToleranceProfile {
    fn default() -> Self {
        ToleranceProfile {
            close_collision_threshold: 1e-9,
            directional_tolerance: 1e-9,
        }
    }
}

/// A vertex-edge tangency at an exact instant.
///
/// `a` and `b` are ordered as the triggering rule's sides. The vertex
/// belongs to `a` and the edge to `b` unless `inverted` is set, in which
/// case it is the other way around and `tangent` has been flipped so that
/// the record reads the same from `a`'s point of view either way.
#[derive(Clone, Copy, Debug)]
pub struct Collision {
    /// World position of the contact point.
    pub pos: Vec2,
    /// Edge direction at the contact instant, oriented for side `a`.
    pub tangent: Vec2,
    /// World velocity of `a`'s material point at the contact.
    pub vel: Vec2,
    /// `a`'s contact-point velocity minus `b`'s.
    pub rel_vel: Vec2,
    /// The instant of tangency.
    pub time: f64,
    /// Index of the vertex in the vertex-side geometry.
    pub vertex: usize,
    /// Index of the edge in the edge-side geometry.
    pub edge: usize,
    /// Whether the vertex belongs to `b` rather than `a`.
    pub inverted: bool,
    pub a: BodyKey,
    pub b: BodyKey,
}

/// Velocity changes for the two sides of a contact, or `None` when the
/// contact cannot carry an impulse (both weights zero, or a degenerate
/// tangent).
pub(crate) fn normal_impulses(
    tangent: Vec2,
    rel_vel: Vec2,
    additional_vel: f64,
    restitution: f64,
    weight_a: f64,
    weight_b: f64,
) -> Option<(Vec2, Vec2)> {
    let w_sum = weight_a + weight_b;
    if w_sum == 0.0 || tangent.mag_sq() == 0.0 {
        return None;
    }
    let normal = m::left_normal(tangent).normalized();
    let vn = m::project(rel_vel, normal) + normal * additional_vel;
    let scale = (1.0 + restitution) / w_sum;
    Some((vn * (-scale * weight_a), vn * (scale * weight_b)))
}

impl Collision {
    /// Apply a normal impulse along the edge normal.
    ///
    /// Weights act as per-collision masses: each side's velocity change is
    /// proportional to its own weight's share, so a weight of `0` pins
    /// that side completely. `additional_vel` injects extra separation
    /// speed along the normal; a small positive value together with
    /// `restitution < 1` guarantees the objects actually part and the
    /// contact does not re-trigger.
    pub fn resolve(
        &self,
        world: &mut World,
        additional_vel: f64,
        restitution: f64,
        weight_a: f64,
        weight_b: f64,
    ) {
        let Some((dv_a, dv_b)) = normal_impulses(
            self.tangent,
            self.rel_vel,
            additional_vel,
            restitution,
            weight_a,
            weight_b,
        ) else {
            log::debug!("contact at t={} cannot carry an impulse", self.time);
            return;
        };
        if weight_a != 0.0 {
            if let Some(traj) = world.body_trajectory(self.a) {
                world.impulse(traj, dv_a);
            }
        }
        if weight_b != 0.0 {
            if let Some(traj) = world.body_trajectory(self.b) {
                world.impulse(traj, dv_b);
            }
        }
    }

    /// The contact-point velocity both sides would share after an
    /// inelastic merge with the given weights.
    pub fn weighted_vel(&self, weight_a: f64, weight_b: f64) -> Vec2 {
        self.vel - self.rel_vel * (weight_b / (weight_a + weight_b))
    }
}
