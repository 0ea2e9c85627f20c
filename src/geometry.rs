//! Collision geometry: oriented vertex and edge sets.
//!
//! A geometry is a bag of edges and the convex corners connecting them,
//! described in its own local space, plus a bounding box over everything.
//! Geometries are shared; any number of bodies may reference the same one
//! and move it along their own trajectories.
//!
//! Orientation convention: walking an edge from `p0` to `p1`, the solid
//! side is the one a counter-clockwise winding encloses. In cross-product
//! terms the solid side of an edge is where `cross(edge_dir, offset)` is
//! positive, and a corner is convex when `cross(tan_in, tan_out) > 0`.
//! Every sign test in the contact solver leans on this; build polygons
//! with [`GeometryBuilder::polygon`] and the winding takes care of itself.

use itertools::chain;

use crate::math::Vec2;

/// An axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb {
    /// The empty box: contains nothing, unions as a no-op.
    pub fn empty() -> Self {
        Aabb {
            min: Vec2::new(f64::INFINITY, f64::INFINITY),
            max: Vec2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// Whether the box contains at least one point.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y
    }

    pub fn extend_point(&mut self, p: Vec2) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: Vec2::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Vec2::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }

    #[inline]
    pub fn contains_point(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    #[inline]
    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    /// The four corners, counter-clockwise from `min`.
    pub fn corners(&self) -> [Vec2; 4] {
        [
            self.min,
            Vec2::new(self.max.x, self.min.y),
            self.max,
            Vec2::new(self.min.x, self.max.y),
        ]
    }
}

/// A corner of a geometry.
///
/// `tan_in` points along the incoming edge (previous point towards this
/// one), `tan_out` along the outgoing edge. A moving vertex can strike an
/// edge only through the arc between the two tangents on the convex side;
/// reflex corners never collide by vertex.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub struct Vertex {
    pub pos: Vec2,
    pub tan_in: Vec2,
    pub tan_out: Vec2,
}

/// A directed edge segment.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub struct Edge {
    pub p0: Vec2,
    pub p1: Vec2,
}

impl Edge {
    #[inline]
    pub fn new(p0: Vec2, p1: Vec2) -> Self {
        Edge { p0, p1 }
    }

    /// The edge direction, `p1 - p0`. Not normalized.
    #[inline]
    pub fn dir(&self) -> Vec2 {
        self.p1 - self.p0
    }
}

/// An immutable-by-convention set of vertices and edges with a bounding
/// box that contains all of them.
///
/// Build one with [`GeometryBuilder`], or from raw parts when the tangent
/// bookkeeping is done by hand. Edits after construction go through
/// [`World::modify_geometry`][crate::world::World::modify_geometry], which
/// recomputes the bounds and wakes every body using the geometry.
#[derive(Clone, Debug)]
pub struct Geometry {
    pub(crate) vertices: Vec<Vertex>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) bounds: Aabb,
}

impl Geometry {
    pub fn new(vertices: Vec<Vertex>, edges: Vec<Edge>) -> Self {
        let mut geom = Geometry {
            vertices,
            edges,
            bounds: Aabb::empty(),
        };
        geom.recompute_bounds();
        geom
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Mutable access for use inside a
    /// [`modify_geometry`][crate::world::World::modify_geometry] closure.
    pub fn vertices_mut(&mut self) -> &mut Vec<Vertex> {
        &mut self.vertices
    }

    pub fn edges_mut(&mut self) -> &mut Vec<Edge> {
        &mut self.edges
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Recompute the bounding box from scratch. Invariant: the bounds
    /// contain every vertex position and edge endpoint.
    pub fn recompute_bounds(&mut self) {
        let mut bounds = Aabb::empty();
        for p in chain(
            self.vertices.iter().map(|v| v.pos),
            self.edges.iter().flat_map(|e| [e.p0, e.p1]),
        ) {
            bounds.extend_point(p);
        }
        self.bounds = bounds;
    }
}

/// Builds a [`Geometry`] as one or more paths of points.
///
/// Each path contributes edges between consecutive points and a corner
/// vertex wherever two edges meet. [`close`][Self::close] joins the path
/// back to its first point, completing the corners at both ends; an
/// unclosed path (a wall, a floor) has bare edge endpoints that never
/// collide as vertices.
#[derive(Clone, Debug)]
pub struct GeometryBuilder {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    // current path; the first two points are remembered for closing
    pos0: Vec2,
    pos1: Vec2,
    prev: Vec2,
    prev_prev: Vec2,
    count: usize,
}

impl Default for GeometryBuilder {
    fn default() -> Self {
        GeometryBuilder {
            vertices: Vec::new(),
            edges: Vec::new(),
            pos0: Vec2::zero(),
            pos1: Vec2::zero(),
            prev: Vec2::zero(),
            prev_prev: Vec2::zero(),
            count: 0,
        }
    }
}

impl GeometryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point to the current path.
    pub fn to(mut self, v: Vec2) -> Self {
        match self.count {
            0 => self.pos0 = v,
            1 => {
                self.pos1 = v;
                self.edges.push(Edge::new(self.pos0, v));
            }
            _ => {
                self.edges.push(Edge::new(self.prev, v));
                self.vertices.push(Vertex {
                    pos: self.prev,
                    tan_in: self.prev - self.prev_prev,
                    tan_out: v - self.prev,
                });
            }
        }
        self.prev_prev = self.prev;
        self.prev = v;
        self.count += 1;
        self
    }

    /// Abandon the current path without closing it. Edges and corners
    /// already committed stay.
    pub fn break_path(mut self) -> Self {
        self.count = 0;
        self
    }

    /// Connect the current path back to its first point, emitting the
    /// closing edge and the corner vertices at both seam ends.
    ///
    /// A path with fewer than two points cannot be closed and is silently
    /// abandoned instead.
    pub fn close(mut self) -> Self {
        if self.count < 2 {
            return self.break_path();
        }
        self.edges.push(Edge::new(self.prev, self.pos0));
        self.vertices.push(Vertex {
            pos: self.prev,
            tan_in: self.prev - self.prev_prev,
            tan_out: self.pos0 - self.prev,
        });
        self.vertices.push(Vertex {
            pos: self.pos0,
            tan_in: self.pos0 - self.prev,
            tan_out: self.pos1 - self.pos0,
        });
        self.break_path()
    }

    /// Shorthand for `break_path`, all the points, then `close`.
    pub fn polygon(mut self, points: impl IntoIterator<Item = Vec2>) -> Self {
        self = self.break_path();
        for p in points {
            self = self.to(p);
        }
        self.close()
    }

    pub fn finish(self) -> Geometry {
        Geometry::new(self.vertices, self.edges)
    }
}
