//! Exact continuous vertex-vs-edge contact solving.
//!
//! Every point of an affinely-moving geometry moves linearly in time, so
//! the offset of a moving vertex from a moving edge is affine in `t` and
//! the collinearity condition `cross(edge_dir(t), offset(t)) = 0` is a
//! quadratic. This module finds the root where the vertex crosses the edge
//! line from the free side into the solid side, then runs the acceptance
//! tests that make the crossing a physical contact: on the segment, at a
//! convex corner, through the corner's admitting arc, approaching rather
//! than separating.
//!
//! Sign convention (see the geometry module): the solid side of an edge is
//! the positive-cross side, so the free-to-solid crossing is where the
//! collinearity function goes from negative to positive. All the sign
//! tests below assume this; flipping any one of them silently breaks
//! contact directions.

use crate::geometry::{Edge, Geometry, Vertex};
use crate::math::{self as m, Transform, Vec2};
use crate::world::BodyKey;

use super::{Collision, ToleranceProfile};

/// Everything the solver needs to know about one body: its shape and its
/// world transform and derivative at the reference instant.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BodyState<'a> {
    pub geometry: &'a Geometry,
    pub pose: Transform,
    pub motion: Transform,
}

/// All admissible contacts between the ordered pair `(a, b)` from `now`
/// onward, sorted by time.
///
/// The solver runs in both orientations: vertices of `a` against edges of
/// `b`, and (flagged `inverted`) vertices of `b` against edges of `a`.
pub(crate) fn collide_pair(
    now: f64,
    a: (BodyKey, &BodyState<'_>),
    b: (BodyKey, &BodyState<'_>),
    tol: &ToleranceProfile,
) -> Vec<Collision> {
    let mut out = Vec::new();
    collect_contacts(now, a.1, b.1, tol, false, a.0, b.0, &mut out);
    collect_contacts(now, b.1, a.1, tol, true, a.0, b.0, &mut out);
    out.sort_by(|x, y| x.time.partial_cmp(&y.time).expect("NaN contact time"));
    out
}

#[allow(clippy::too_many_arguments)]
fn collect_contacts(
    now: f64,
    vertex_side: &BodyState<'_>,
    edge_side: &BodyState<'_>,
    tol: &ToleranceProfile,
    inverted: bool,
    key_a: BodyKey,
    key_b: BodyKey,
    out: &mut Vec<Collision>,
) {
    for (vertex_idx, vertex) in vertex_side.geometry.vertices().iter().enumerate() {
        for (edge_idx, edge) in edge_side.geometry.edges().iter().enumerate() {
            if let Some(mut collision) = vertex_edge_contact(
                now,
                vertex,
                vertex_side,
                edge,
                edge_side,
                tol,
                inverted,
            ) {
                collision.vertex = vertex_idx;
                collision.edge = edge_idx;
                collision.a = key_a;
                collision.b = key_b;
                out.push(collision);
            }
        }
    }
}

/// Solve one moving vertex against one moving edge.
///
/// Returns a record with placeholder indices and keys; the caller fills
/// those in.
fn vertex_edge_contact(
    now: f64,
    vertex: &Vertex,
    vertex_side: &BodyState<'_>,
    edge: &Edge,
    edge_side: &BodyState<'_>,
    tol: &ToleranceProfile,
    inverted: bool,
) -> Option<Collision> {
    // world-space state at `now`; each material point has constant velocity
    let vpos = vertex_side.pose.apply(vertex.pos);
    let vvel = vertex_side.motion.apply(vertex.pos);
    let e0 = edge_side.pose.apply(edge.p0);
    let e0v = edge_side.motion.apply(edge.p0);
    let e1 = edge_side.pose.apply(edge.p1);
    let e1v = edge_side.motion.apply(edge.p1);

    // edge direction and vertex offset, both affine in t
    let ep0 = e1 - e0;
    let ev = e1v - e0v;
    let vp0 = vpos - e0;
    let vv = vvel - e0v;

    let tau = if m::cross(ep0, vp0).abs() <= ep0.mag() * tol.close_collision_threshold {
        // already touching within tolerance: contact is now, not at some
        // microscopic root the quadratic would drift to
        0.0
    } else {
        find_crossing(ep0, ev, vp0, vv)?
    };

    // geometry at the contact instant
    let ep = ep0 + ev * tau;
    let vp = vp0 + vv * tau;
    let ep_mag_sq = ep.mag_sq();
    if ep_mag_sq == 0.0 {
        return None;
    }

    // contact must land on the segment, not the infinite line
    let s = ep.dot(vp) / ep_mag_sq;
    if !(0.0..=1.0).contains(&s) {
        return None;
    }

    // corner tangents in world space at the contact instant
    let vertex_pose = vertex_side.pose.add_scaled(&vertex_side.motion, tau);
    let t0 = vertex_pose.apply_direction(vertex.tan_in);
    let t1 = vertex_pose.apply_direction(vertex.tan_out);

    // reflex corners have no admitting arc
    if m::cross(t0, t1) <= 0.0 {
        return None;
    }

    // the edge must run through the corner's arc (opposite signs of the
    // two cross products); directional tolerance admits boundary cases
    let arc = m::cross(t0, ep) * m::cross(t1, ep);
    if arc > ep_mag_sq * t0.mag() * t1.mag() * tol.directional_tolerance {
        return None;
    }

    // ... and against the arc's bisector, not along it
    let mid = t0 * t1.mag() + t1 * t0.mag();
    if mid.dot(ep) > 0.0 {
        return None;
    }

    // approaching, not separating: the collinearity derivative at contact
    // equals cross(ep, rel_vel), and a free-to-solid crossing needs it
    // non-negative
    let edge_vel = m::lerp(e0v, e1v, s);
    let rel_vel = vvel - edge_vel;
    if m::cross(ep, rel_vel) < 0.0 {
        return None;
    }

    Some(Collision {
        pos: vpos + vvel * tau,
        tangent: if inverted { -ep } else { ep },
        vel: if inverted { edge_vel } else { vvel },
        rel_vel: if inverted { -rel_vel } else { rel_vel },
        time: now + tau,
        vertex: 0,
        edge: 0,
        inverted,
        a: BodyKey::default(),
        b: BodyKey::default(),
    })
}

/// The non-negative root of `cross(ep(τ), vp(τ)) = 0` where the cross
/// product transitions from negative to positive, if any.
fn find_crossing(ep0: Vec2, ev: Vec2, vp0: Vec2, vv: Vec2) -> Option<f64> {
    let a = m::cross(ev, vv);
    let b = m::cross(ep0, vv) + m::cross(ev, vp0);
    let c = m::cross(ep0, vp0);
    let tau = if a == 0.0 {
        // linear: only an increasing function crosses upward
        if b <= 0.0 {
            return None;
        }
        -c / b
    } else {
        let disc = b * b - 4.0 * a * c;
        if disc < 0.0 {
            return None;
        }
        // this form of the quadratic formula picks the upward crossing
        // for either parabola orientation
        2.0 * c / (-b - disc.sqrt())
    };
    (tau.is_finite() && tau >= 0.0).then_some(tau)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeometryBuilder;

    fn unit_square() -> Geometry {
        GeometryBuilder::new()
            .polygon([
                Vec2::new(-1.0, -1.0),
                Vec2::new(1.0, -1.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(-1.0, 1.0),
            ])
            .finish()
    }

    /// A long floor along y = 0 whose solid side is below.
    fn floor() -> Geometry {
        GeometryBuilder::new()
            .to(Vec2::new(10.0, 0.0))
            .to(Vec2::new(-10.0, 0.0))
            .finish()
    }

    fn linear_motion(vel: Vec2) -> Transform {
        Transform::new(Vec2::zero(), Vec2::zero(), vel)
    }

    fn state<'a>(geometry: &'a Geometry, center: Vec2, vel: Vec2) -> BodyState<'a> {
        BodyState {
            geometry,
            pose: Transform::translation(center),
            motion: linear_motion(vel),
        }
    }

    fn keys() -> (BodyKey, BodyKey) {
        (BodyKey::default(), BodyKey::default())
    }

    #[test]
    fn falling_square_hits_floor_on_both_corners() {
        let floor_geom = floor();
        let square_geom = unit_square();
        let floor_state = state(&floor_geom, Vec2::zero(), Vec2::zero());
        let square = state(&square_geom, Vec2::new(0.0, 2.0), Vec2::new(0.0, -1.0));
        let (ka, kb) = keys();
        let contacts = collide_pair(
            0.0,
            (ka, &floor_state),
            (kb, &square),
            &ToleranceProfile::default(),
        );
        assert_eq!(contacts.len(), 2);
        for c in &contacts {
            assert!((c.time - 1.0).abs() < 1e-12);
            // vertex belongs to the b side (the square)
            assert!(c.inverted);
            assert!((c.pos.y - 0.0).abs() < 1e-12);
            // a-relative-to-b velocity points up: the square closes in
            assert!((c.rel_vel - Vec2::new(0.0, 1.0)).mag() < 1e-12);
        }
    }

    #[test]
    fn resting_tangency_fires_immediately() {
        let floor_geom = floor();
        let square_geom = unit_square();
        let floor_state = state(&floor_geom, Vec2::zero(), Vec2::zero());
        // bottom edge exactly on the floor, nobody moving
        let square = state(&square_geom, Vec2::new(0.0, 1.0), Vec2::zero());
        let (ka, kb) = keys();
        let contacts = collide_pair(
            0.0,
            (ka, &floor_state),
            (kb, &square),
            &ToleranceProfile::default(),
        );
        assert_eq!(contacts.len(), 2);
        for c in &contacts {
            assert_eq!(c.time, 0.0);
        }
    }

    #[test]
    fn receding_square_never_contacts() {
        let floor_geom = floor();
        let square_geom = unit_square();
        let floor_state = state(&floor_geom, Vec2::zero(), Vec2::zero());
        let square = state(&square_geom, Vec2::new(0.0, 2.0), Vec2::new(0.0, 1.0));
        let (ka, kb) = keys();
        assert!(collide_pair(
            0.0,
            (ka, &floor_state),
            (kb, &square),
            &ToleranceProfile::default()
        )
        .is_empty());
    }

    #[test]
    fn separating_tangency_is_rejected() {
        // exactly touching but moving apart: the approach test fails
        let floor_geom = floor();
        let square_geom = unit_square();
        let floor_state = state(&floor_geom, Vec2::zero(), Vec2::zero());
        let square = state(&square_geom, Vec2::new(0.0, 1.0), Vec2::new(0.0, 0.5));
        let (ka, kb) = keys();
        assert!(collide_pair(
            0.0,
            (ka, &floor_state),
            (kb, &square),
            &ToleranceProfile::default()
        )
        .is_empty());
    }

    #[test]
    fn parallel_flyby_never_contacts() {
        let floor_geom = floor();
        let square_geom = unit_square();
        let floor_state = state(&floor_geom, Vec2::zero(), Vec2::zero());
        // gliding sideways one unit above the floor
        let square = state(&square_geom, Vec2::new(-5.0, 2.0), Vec2::new(1.0, 0.0));
        let (ka, kb) = keys();
        assert!(collide_pair(
            0.0,
            (ka, &floor_state),
            (kb, &square),
            &ToleranceProfile::default()
        )
        .is_empty());
    }

    #[test]
    fn contact_beyond_the_segment_is_rejected() {
        let floor_geom = floor();
        let square_geom = unit_square();
        let floor_state = state(&floor_geom, Vec2::zero(), Vec2::zero());
        // falls past the end of the floor
        let square = state(&square_geom, Vec2::new(15.0, 2.0), Vec2::new(0.0, -1.0));
        let (ka, kb) = keys();
        assert!(collide_pair(
            0.0,
            (ka, &floor_state),
            (kb, &square),
            &ToleranceProfile::default()
        )
        .is_empty());
    }

    #[test]
    fn reflex_corners_never_collide_by_vertex() {
        let floor_geom = floor();
        // a lone corner whose tangents wind the wrong way
        let reflex = Geometry::new(
            vec![Vertex {
                pos: Vec2::zero(),
                tan_in: Vec2::new(0.0, 1.0),
                tan_out: Vec2::new(1.0, 0.0),
            }],
            Vec::new(),
        );
        let floor_state = state(&floor_geom, Vec2::zero(), Vec2::zero());
        let falling = state(&reflex, Vec2::new(0.0, 2.0), Vec2::new(0.0, -1.0));
        let (ka, kb) = keys();
        assert!(collide_pair(
            0.0,
            (ka, &floor_state),
            (kb, &falling),
            &ToleranceProfile::default()
        )
        .is_empty());
    }

    #[test]
    fn head_on_squares_contact_in_both_orderings() {
        let geom = unit_square();
        let left = state(&geom, Vec2::new(-2.0, 0.0), Vec2::new(1.0, 0.0));
        let right = state(&geom, Vec2::new(2.0, 0.0), Vec2::new(-1.0, 0.0));
        let (ka, kb) = keys();
        let contacts = collide_pair(
            0.0,
            (ka, &left),
            (kb, &right),
            &ToleranceProfile::default(),
        );
        // two corners of each side strike the facing edge of the other
        assert_eq!(contacts.len(), 4);
        assert_eq!(contacts.iter().filter(|c| c.inverted).count(), 2);
        for c in &contacts {
            assert!((c.time - 1.0).abs() < 1e-12);
            // tangent is oriented for side a in both orderings
            assert_eq!(c.tangent.x, 0.0);
            assert!(c.tangent.y < 0.0);
            // closing speed 2 along x
            assert!((c.rel_vel - Vec2::new(2.0, 0.0)).mag() < 1e-12);
        }
    }

    #[test]
    fn deforming_edge_gives_the_quadratic_root() {
        // edge from (-1,0) to (1,0); the second endpoint moves at (1,1),
        // so the collinearity condition is genuinely quadratic.
        // a spike below rises at (0,1); the upward crossing solves
        // tau^2 - tau - 4 = 0 => tau = (1 + sqrt(17)) / 2
        let edge_geom = Geometry::new(
            Vec::new(),
            vec![Edge::new(Vec2::new(-1.0, 0.0), Vec2::new(1.0, 0.0))],
        );
        let spike_geom = Geometry::new(
            vec![Vertex {
                pos: Vec2::new(0.0, -2.0),
                tan_in: Vec2::new(-1.0, -0.2),
                tan_out: Vec2::new(1.0, -0.2),
            }],
            Vec::new(),
        );
        let edge_state = BodyState {
            geometry: &edge_geom,
            pose: Transform::identity(),
            // maps (-1,0) to velocity zero and (1,0) to velocity (1,1)
            motion: Transform::new(
                Vec2::new(0.5, 0.5),
                Vec2::zero(),
                Vec2::new(0.5, 0.5),
            ),
        };
        let spike = BodyState {
            geometry: &spike_geom,
            pose: Transform::identity(),
            motion: linear_motion(Vec2::new(0.0, 1.0)),
        };
        let (ka, kb) = keys();
        let contacts = collide_pair(
            0.0,
            (ka, &spike),
            (kb, &edge_state),
            &ToleranceProfile::default(),
        );
        assert_eq!(contacts.len(), 1);
        let c = &contacts[0];
        let expected = (1.0 + 17.0_f64.sqrt()) / 2.0;
        assert!((c.time - expected).abs() < 1e-12);
        assert!(!c.inverted);
        // the spike is the vertex side, so the record reads from its view
        assert!((c.pos - Vec2::new(0.0, -2.0 + expected)).mag() < 1e-12);
    }

    #[test]
    fn directional_tolerance_admits_near_aligned_contact() {
        // a corner whose arc only barely misses the edge direction:
        // rejected with zero tolerance, admitted with some slack
        let floor_geom = floor();
        let tilted = Geometry::new(
            vec![Vertex {
                pos: Vec2::zero(),
                // arc tilted so the floor direction falls just outside it
                tan_in: Vec2::new(0.0, -1.0),
                tan_out: Vec2::new(1.0, -0.05),
            }],
            Vec::new(),
        );
        let floor_state = state(&floor_geom, Vec2::zero(), Vec2::zero());
        let falling = state(&tilted, Vec2::new(0.0, 2.0), Vec2::new(0.0, -1.0));
        let (ka, kb) = keys();
        let strict = ToleranceProfile {
            directional_tolerance: 0.0,
            ..ToleranceProfile::default()
        };
        assert!(collide_pair(0.0, (ka, &floor_state), (kb, &falling), &strict).is_empty());
        let slack = ToleranceProfile {
            directional_tolerance: 0.05,
            ..ToleranceProfile::default()
        };
        assert_eq!(
            collide_pair(0.0, (ka, &floor_state), (kb, &falling), &slack).len(),
            1
        );
    }
}
