//! A continuous-time 2D collision engine.
//!
//! There is no fixed timestep anywhere. Every object's world transform is
//! an affine function of time (a [`Trajectory`]); the engine solves for
//! the exact instants at which moving vertices meet moving edges and
//! replays those instants through a discrete-event [`clock`]. Collision
//! rules between [`world::World`] groups decide which tangencies matter
//! and what happens when they occur; rule callbacks typically mutate
//! trajectories, which invalidates and recomputes the affected schedule.

pub mod math;

pub mod clock;
pub use clock::{Clock, ClockError, EventKey};

pub mod geometry;
pub use geometry::{Aabb, Edge, Geometry, GeometryBuilder, Vertex};

pub mod trajectory;
pub use trajectory::Trajectory;

pub mod collision;
pub use collision::{Collision, ToleranceProfile};

pub mod world;
pub use world::{
    Body, BodyKey, GeometryKey, GroupKey, LoopId, RuleKey, TrajectoryKey, World,
};
