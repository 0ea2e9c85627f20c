//! The world: registries, bodies, collision rules and the recalculation
//! engine that keeps scheduled contacts consistent across mutation.
//!
//! Everything lives in slotmap registries and refers to everything else by
//! key. The keys double as the weak back-references of the subscription
//! scheme: a body subscribes itself as a dependant of its geometry, its
//! trajectory and each of its groups, and those collaborators answer any
//! mutation by queueing the body for collision recalculation. A dangling
//! key is always detectable, so nothing here needs reference counting or
//! cycle collection.
//!
//! The dataflow loop: a mutation marks dependants dirty; a preprocess on
//! the next clock cycle rebuilds each dirty body's candidate heaps from
//! its rules; the earliest candidates are solved exactly and their contact
//! events pushed on the clock; an executing contact event invokes the rule
//! callback, which typically mutates trajectories and starts the loop
//! over.

use std::collections::{BinaryHeap, HashSet};
use std::mem;
use std::rc::Rc;

use slotmap as sm;

use crate::clock::{Clock, ClockError, EventKey, Pop};
use crate::collision::sweep::{self, MovingAabb};
use crate::collision::vertex_edge::{self, BodyState};
use crate::collision::{Collision, ToleranceProfile};
use crate::geometry::Geometry;
use crate::math::{Transform, Vec2};
use crate::trajectory::Trajectory;

sm::new_key_type! {
    pub struct GeometryKey;
    pub struct TrajectoryKey;
    pub struct GroupKey;
    pub struct RuleKey;
    pub struct BodyKey;
}

/// A one-shot clock callback.
pub type EventFn = Box<dyn FnOnce(&mut World)>;
/// A collision rule callback. `Rc` so the registry stays borrow-free
/// while the callback runs and possibly mutates the registry itself.
pub type RuleFn = Rc<dyn Fn(&mut World, &Collision)>;
/// A repeating callback for [`World::schedule_loop`].
pub type LoopFn = Rc<dyn Fn(&mut World)>;

/// Identifier of a repeating schedule. Loop ids are world-local state;
/// two worlds never interfere through them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LoopId(u64);

struct GeometrySlot {
    geometry: Geometry,
    dependants: Vec<BodyKey>,
}

struct TrajectorySlot {
    trajectory: Trajectory,
    dependants: Vec<BodyKey>,
}

struct Group {
    members: Vec<BodyKey>,
    /// Rules in which this group is the `a` side.
    rules_a: Vec<RuleKey>,
    rules_b: Vec<RuleKey>,
}

struct Rule {
    group_a: GroupKey,
    group_b: GroupKey,
    tolerance: ToleranceProfile,
    callback: RuleFn,
    /// Whether the callback may mutate state that affects future
    /// collisions. Limits how many events one solve may emit.
    recalculating: bool,
    enabled: bool,
}

/// A conservative "these two could first touch at `earliest`" note,
/// waiting in a body's heap for exact solving.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Candidate {
    a: BodyKey,
    b: BodyKey,
    rule: RuleKey,
    earliest: f64,
}

/// Heap entry reverse-ordered on time so `BinaryHeap` acts as a min-heap,
/// mint order as the tie-break.
#[derive(Clone, Copy, Debug, PartialEq)]
struct CandidateEntry {
    candidate: Candidate,
    seq: u64,
}
impl Eq for CandidateEntry {}
impl PartialOrd for CandidateEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for CandidateEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .candidate
            .earliest
            .partial_cmp(&self.candidate.earliest)
            .expect("NaN candidate time")
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A collidable object: one geometry riding one trajectory, member of
/// some collision groups.
pub struct Body {
    geometry: GeometryKey,
    trajectory: TrajectoryKey,
    groups: Vec<GroupKey>,
    disabled: bool,
    /// Events this body is responsible for; all invalidated when the
    /// body recalculates or is disabled. Contact events are owned by
    /// both participants, which is what keeps the two sides' solves from
    /// double-scheduling the same tangency.
    events: Vec<EventKey>,
    last_queued_cycle: Option<u64>,
    /// Candidates under rules that may mutate the world.
    recalc_candidates: BinaryHeap<CandidateEntry>,
    /// Candidates under purely observational rules.
    other_candidates: BinaryHeap<CandidateEntry>,
    /// Conservative bound on when some other body's activity could force
    /// this body to re-solve.
    next_probable_recalc: f64,
    /// Stamp from the world-global recalculation counter; candidates
    /// minted under an older stamp than a participant's are stale.
    last_recalc: u64,
}

impl Body {
    pub fn geometry(&self) -> GeometryKey {
        self.geometry
    }

    pub fn trajectory(&self) -> TrajectoryKey {
        self.trajectory
    }

    pub fn groups(&self) -> &[GroupKey] {
        &self.groups
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }
}

/// The whole simulation: clock, registries and the recalculation engine.
pub struct World {
    clock: Clock<EventFn>,
    geometries: sm::SlotMap<GeometryKey, GeometrySlot>,
    trajectories: sm::SlotMap<TrajectoryKey, TrajectorySlot>,
    groups: sm::SlotMap<GroupKey, Group>,
    rules: sm::SlotMap<RuleKey, Rule>,
    bodies: sm::SlotMap<BodyKey, Body>,
    recalc_stamp: u64,
    candidate_seq: u64,
    live_loops: HashSet<u64>,
    next_loop_id: u64,
}

impl World {
    pub fn new() -> Self {
        Self::with_cycle_limit(crate::clock::DEFAULT_CYCLE_LIMIT)
    }

    pub fn with_cycle_limit(cycle_limit: u32) -> Self {
        World {
            clock: Clock::with_cycle_limit(cycle_limit),
            geometries: sm::SlotMap::with_key(),
            trajectories: sm::SlotMap::with_key(),
            groups: sm::SlotMap::with_key(),
            rules: sm::SlotMap::with_key(),
            bodies: sm::SlotMap::with_key(),
            recalc_stamp: 0,
            candidate_seq: 0,
            live_loops: HashSet::new(),
            next_loop_id: 0,
        }
    }

    /// The current simulation instant.
    pub fn time(&self) -> f64 {
        self.clock.time()
    }

    /// The current clock cycle.
    pub fn cycle(&self) -> u64 {
        self.clock.cycle()
    }

    //
    // clock driving
    //

    /// Advance simulation time to `target`, replaying every due event in
    /// time order, interleaved with preprocesses.
    ///
    /// Events scheduled exactly at `target` fire; the clock then settles
    /// at `target`.
    pub fn run_to(&mut self, target: f64) -> Result<(), ClockError> {
        if target < self.clock.time() {
            return Err(ClockError::InvalidTime {
                now: self.clock.time(),
                target,
            });
        }
        let mut cycles: u32 = 0;
        loop {
            cycles += 1;
            if cycles > self.clock.cycle_limit {
                log::error!(
                    "run_to({target}) exceeded {} cycles at t={}",
                    self.clock.cycle_limit,
                    self.clock.time()
                );
                return Err(ClockError::CycleLimitExceeded {
                    limit: self.clock.cycle_limit,
                });
            }
            for pre in self.clock.begin_cycle() {
                pre(self);
            }
            match self.clock.pop_next(target) {
                Pop::Idle => {
                    self.clock.finish_at(target);
                    return Ok(());
                }
                Pop::Cancelled => continue,
                Pop::Event(time, callback) => {
                    log::trace!("executing event at t={time}");
                    callback(self);
                }
            }
        }
    }

    /// Run until exactly the next pending event executes. Returns `false`
    /// if no event is pending; the clock does not move in that case.
    pub fn advance(&mut self) -> Result<bool, ClockError> {
        let mut cycles: u32 = 0;
        loop {
            cycles += 1;
            if cycles > self.clock.cycle_limit {
                return Err(ClockError::CycleLimitExceeded {
                    limit: self.clock.cycle_limit,
                });
            }
            for pre in self.clock.begin_cycle() {
                pre(self);
            }
            match self.clock.pop_next(f64::INFINITY) {
                Pop::Idle => return Ok(false),
                Pop::Cancelled => continue,
                Pop::Event(time, callback) => {
                    log::trace!("executing event at t={time}");
                    callback(self);
                    return Ok(true);
                }
            }
        }
    }

    /// Schedule a one-shot callback. Returns `None` (discarding the
    /// callback) if `time` is in the past.
    pub fn schedule(
        &mut self,
        time: f64,
        callback: impl FnOnce(&mut World) + 'static,
    ) -> Option<EventKey> {
        self.clock.schedule(time, Box::new(callback))
    }

    /// Cancel a scheduled event. Returns whether it was still pending.
    pub fn cancel(&mut self, event: EventKey) -> bool {
        self.clock.cancel(event)
    }

    /// Queue a callback to run at the start of the next cycle.
    pub fn add_preprocess(&mut self, callback: impl FnOnce(&mut World) + 'static) {
        self.clock.add_preprocess(Box::new(callback));
    }

    /// Start a repeating schedule: `callback` fires at `start`, then every
    /// `delay` after, until [`cancel_loop`][Self::cancel_loop].
    pub fn schedule_loop(
        &mut self,
        start: f64,
        delay: f64,
        callback: impl Fn(&mut World) + 'static,
    ) -> LoopId {
        let id = LoopId(self.next_loop_id);
        self.next_loop_id += 1;
        self.live_loops.insert(id.0);
        self.schedule_loop_firing(id, start, delay, Rc::new(callback));
        id
    }

    fn schedule_loop_firing(&mut self, id: LoopId, at: f64, delay: f64, callback: LoopFn) {
        let scheduled = self.clock.schedule(
            at,
            Box::new(move |world| {
                // a cancelled loop declines to perpetuate itself
                if !world.live_loops.contains(&id.0) {
                    return;
                }
                callback(world);
                world.schedule_loop_firing(id, at + delay, delay, callback);
            }),
        );
        if scheduled.is_none() {
            log::debug!("loop {id:?} scheduled in the past; retiring it");
            self.live_loops.remove(&id.0);
        }
    }

    /// Retire a repeating schedule. The in-flight firing, if any, sees the
    /// retirement and does not run or reschedule.
    pub fn cancel_loop(&mut self, id: LoopId) -> bool {
        self.live_loops.remove(&id.0)
    }

    //
    // geometry registry
    //

    pub fn add_geometry(&mut self, geometry: Geometry) -> GeometryKey {
        self.geometries.insert(GeometrySlot {
            geometry,
            dependants: Vec::new(),
        })
    }

    pub fn geometry(&self, key: GeometryKey) -> Option<&Geometry> {
        self.geometries.get(key).map(|slot| &slot.geometry)
    }

    /// Edit a geometry in place. Bounds are recomputed and every body
    /// using the geometry is queued for recalculation.
    pub fn modify_geometry(&mut self, key: GeometryKey, f: impl FnOnce(&mut Geometry)) {
        let Some(slot) = self.geometries.get_mut(key) else {
            return;
        };
        f(&mut slot.geometry);
        slot.geometry.recompute_bounds();
        for body in slot.dependants.clone() {
            self.queue_recalc(body);
        }
    }

    //
    // trajectory registry
    //

    pub fn add_trajectory(&mut self, trajectory: Trajectory) -> TrajectoryKey {
        self.trajectories.insert(TrajectorySlot {
            trajectory,
            dependants: Vec::new(),
        })
    }

    pub fn trajectory(&self, key: TrajectoryKey) -> Option<&Trajectory> {
        self.trajectories.get(key).map(|slot| &slot.trajectory)
    }

    /// The trajectory's world transform at the current instant.
    pub fn transform_of(&self, key: TrajectoryKey) -> Option<Transform> {
        let now = self.clock.time();
        self.trajectory(key).map(|traj| traj.transform_at(now))
    }

    /// World position of the local point `v` at the current instant.
    pub fn pos_of(&self, key: TrajectoryKey, v: Vec2) -> Option<Vec2> {
        let now = self.clock.time();
        self.trajectory(key).map(|traj| traj.pos_of(now, v))
    }

    /// Instantaneous world velocity of the local point `v`.
    pub fn vel_of(&self, key: TrajectoryKey, v: Vec2) -> Option<Vec2> {
        self.trajectory(key).map(|traj| traj.vel_of(v))
    }

    fn mutate_trajectory(&mut self, key: TrajectoryKey, f: impl FnOnce(&mut Trajectory, f64)) {
        let now = self.clock.time();
        let Some(slot) = self.trajectories.get_mut(key) else {
            return;
        };
        f(&mut slot.trajectory, now);
        for body in slot.dependants.clone() {
            self.queue_recalc(body);
        }
    }

    /// Normalize at the current instant, then let `f` edit base and
    /// motion. All the named mutators below go through this.
    pub fn modify_trajectory(
        &mut self,
        key: TrajectoryKey,
        f: impl FnOnce(&mut Transform, &mut Transform),
    ) {
        self.mutate_trajectory(key, |traj, now| traj.modify(now, f));
    }

    /// Replace the transform outright; see [`Trajectory::set_transform`].
    pub fn set_transform(&mut self, key: TrajectoryKey, base: Transform, motion: Option<Transform>) {
        self.mutate_trajectory(key, |traj, now| traj.set_transform(now, base, motion));
    }

    pub fn set_motion(&mut self, key: TrajectoryKey, motion: Transform) {
        self.mutate_trajectory(key, |traj, now| traj.set_motion(now, motion));
    }

    pub fn translate(&mut self, key: TrajectoryKey, v: Vec2) {
        self.mutate_trajectory(key, |traj, now| traj.translate(now, v));
    }

    pub fn set_pos(&mut self, key: TrajectoryKey, v: Vec2) {
        self.mutate_trajectory(key, |traj, now| traj.set_pos(now, v));
    }

    pub fn impulse(&mut self, key: TrajectoryKey, v: Vec2) {
        self.mutate_trajectory(key, |traj, now| traj.impulse(now, v));
    }

    pub fn set_vel(&mut self, key: TrajectoryKey, v: Vec2) {
        self.mutate_trajectory(key, |traj, now| traj.set_vel(now, v));
    }

    /// Set the motion that reaches `target` exactly `dt` from now.
    pub fn transform_to(&mut self, key: TrajectoryKey, target: Transform, dt: f64) {
        self.mutate_trajectory(key, |traj, now| traj.transform_to(now, target, dt));
    }

    pub fn stop(&mut self, key: TrajectoryKey) {
        self.mutate_trajectory(key, |traj, now| traj.stop(now));
    }

    //
    // groups and rules
    //

    pub fn add_group(&mut self) -> GroupKey {
        self.groups.insert(Group {
            members: Vec::new(),
            rules_a: Vec::new(),
            rules_b: Vec::new(),
        })
    }

    pub fn group_members(&self, key: GroupKey) -> &[BodyKey] {
        self.groups.get(key).map_or(&[], |g| &g.members)
    }

    /// Register a rule: when a member of `group_a` becomes tangent to a
    /// member of `group_b`, `callback` runs with the contact record.
    ///
    /// Set `recalculating` if the callback can mutate anything that
    /// affects future collisions (almost anything except pure
    /// observation); it constrains how far ahead the engine emits events
    /// from one solve.
    pub fn add_rule(
        &mut self,
        group_a: GroupKey,
        group_b: GroupKey,
        tolerance: ToleranceProfile,
        recalculating: bool,
        callback: impl Fn(&mut World, &Collision) + 'static,
    ) -> RuleKey {
        let key = self.rules.insert(Rule {
            group_a,
            group_b,
            tolerance,
            callback: Rc::new(callback),
            recalculating,
            enabled: true,
        });
        self.groups
            .get_mut(group_a)
            .expect("rule on a dead group")
            .rules_a
            .push(key);
        self.groups
            .get_mut(group_b)
            .expect("rule on a dead group")
            .rules_b
            .push(key);
        // b-side members are visited by the a-side recalculations
        for member in self.groups[group_a].members.clone() {
            self.queue_recalc(member);
        }
        key
    }

    /// Detach a rule from its groups and recalculate every member of
    /// both.
    pub fn disable_rule(&mut self, key: RuleKey) {
        let Some(rule) = self.rules.get_mut(key) else {
            return;
        };
        if !rule.enabled {
            return;
        }
        rule.enabled = false;
        let (group_a, group_b) = (rule.group_a, rule.group_b);
        if let Some(group) = self.groups.get_mut(group_a) {
            group.rules_a.retain(|r| *r != key);
        }
        if let Some(group) = self.groups.get_mut(group_b) {
            group.rules_b.retain(|r| *r != key);
        }
        for group in [group_a, group_b] {
            for member in self.group_members(group).to_vec() {
                self.queue_recalc(member);
            }
        }
    }

    /// Re-attach a disabled rule and recalculate the `a` side.
    pub fn enable_rule(&mut self, key: RuleKey) {
        let Some(rule) = self.rules.get_mut(key) else {
            return;
        };
        if rule.enabled {
            return;
        }
        rule.enabled = true;
        let (group_a, group_b) = (rule.group_a, rule.group_b);
        if let Some(group) = self.groups.get_mut(group_a) {
            group.rules_a.push(key);
        }
        if let Some(group) = self.groups.get_mut(group_b) {
            group.rules_b.push(key);
        }
        for member in self.group_members(group_a).to_vec() {
            self.queue_recalc(member);
        }
    }

    //
    // bodies
    //

    /// Create a body riding `trajectory` with shape `geometry`, member of
    /// the given groups. The body subscribes to all three collaborators
    /// and is queued for an initial collision recalculation.
    pub fn add_body(
        &mut self,
        geometry: GeometryKey,
        trajectory: TrajectoryKey,
        groups: impl IntoIterator<Item = GroupKey>,
    ) -> BodyKey {
        let key = self.bodies.insert(Body {
            geometry,
            trajectory,
            groups: Vec::new(),
            disabled: false,
            events: Vec::new(),
            last_queued_cycle: None,
            recalc_candidates: BinaryHeap::new(),
            other_candidates: BinaryHeap::new(),
            next_probable_recalc: f64::INFINITY,
            last_recalc: 0,
        });
        self.geometries
            .get_mut(geometry)
            .expect("body on a dead geometry")
            .dependants
            .push(key);
        self.trajectories
            .get_mut(trajectory)
            .expect("body on a dead trajectory")
            .dependants
            .push(key);
        for group in groups {
            self.subscribe_to_group(key, group);
        }
        self.queue_recalc(key);
        key
    }

    pub fn body(&self, key: BodyKey) -> Option<&Body> {
        self.bodies.get(key)
    }

    pub fn body_trajectory(&self, key: BodyKey) -> Option<TrajectoryKey> {
        self.bodies.get(key).map(|b| b.trajectory)
    }

    pub fn body_geometry(&self, key: BodyKey) -> Option<GeometryKey> {
        self.bodies.get(key).map(|b| b.geometry)
    }

    /// Add a body to a collision group and recalculate it.
    pub fn add_to_group(&mut self, body: BodyKey, group: GroupKey) {
        let Some(b) = self.bodies.get(body) else {
            return;
        };
        if b.disabled || b.groups.contains(&group) {
            return;
        }
        self.subscribe_to_group(body, group);
        self.queue_recalc(body);
    }

    fn subscribe_to_group(&mut self, body: BodyKey, group: GroupKey) {
        self.groups
            .get_mut(group)
            .expect("body in a dead group")
            .members
            .push(body);
        self.bodies[body].groups.push(group);
    }

    /// Remove a body from a collision group and recalculate it.
    pub fn remove_from_group(&mut self, body: BodyKey, group: GroupKey) {
        let Some(b) = self.bodies.get_mut(body) else {
            return;
        };
        b.groups.retain(|g| *g != group);
        if let Some(g) = self.groups.get_mut(group) {
            g.members.retain(|k| *k != body);
        }
        self.queue_recalc(body);
    }

    /// Unsubscribe a body from all collaborators and invalidate its
    /// events. A disabled body takes no further part in collision
    /// detection; its geometry and trajectory registrations live on for
    /// other users.
    pub fn disable_body(&mut self, key: BodyKey) {
        let Some(body) = self.bodies.get_mut(key) else {
            return;
        };
        if body.disabled {
            return;
        }
        body.disabled = true;
        let events = mem::take(&mut body.events);
        body.recalc_candidates.clear();
        body.other_candidates.clear();
        let geometry = body.geometry;
        let trajectory = body.trajectory;
        let groups = mem::take(&mut body.groups);
        for event in events {
            self.clock.cancel(event);
        }
        if let Some(slot) = self.geometries.get_mut(geometry) {
            slot.dependants.retain(|k| *k != key);
        }
        if let Some(slot) = self.trajectories.get_mut(trajectory) {
            slot.dependants.retain(|k| *k != key);
        }
        for group in groups {
            if let Some(g) = self.groups.get_mut(group) {
                g.members.retain(|k| *k != key);
            }
        }
        log::debug!("disabled body {key:?}");
    }

    /// Disable and drop a body. Its key goes dead; stale references to it
    /// anywhere in the engine are skipped harmlessly.
    pub fn remove_body(&mut self, key: BodyKey) {
        self.disable_body(key);
        self.bodies.remove(key);
    }

    //
    // the recalculation engine
    //

    /// Queue `key` for collision recalculation on the next cycle.
    /// Idempotent within a cycle.
    fn queue_recalc(&mut self, key: BodyKey) {
        let cycle = self.clock.cycle();
        let Some(body) = self.bodies.get_mut(key) else {
            return;
        };
        if body.disabled || body.last_queued_cycle == Some(cycle) {
            return;
        }
        body.last_queued_cycle = Some(cycle);
        log::trace!("queueing recalculation of {key:?} during cycle {cycle}");
        self.clock
            .add_preprocess(Box::new(move |world| world.recalculate_collisions(key)));
    }

    /// Throw away everything this body believed about its future contacts
    /// and rebuild it: invalidate its events, re-mint candidates from
    /// every rule over its groups, then emit from the fresh heaps.
    fn recalculate_collisions(&mut self, key: BodyKey) {
        let Some(body) = self.bodies.get(key) else {
            return;
        };
        if body.disabled {
            return;
        }
        self.recalc_stamp += 1;
        let stamp = self.recalc_stamp;
        let events = {
            let body = &mut self.bodies[key];
            body.last_recalc = stamp;
            body.recalc_candidates.clear();
            body.other_candidates.clear();
            mem::take(&mut body.events)
        };
        for event in events {
            self.clock.cancel(event);
        }

        let now = self.clock.time();
        let mut pairs: Vec<(BodyKey, BodyKey, RuleKey, bool)> = Vec::new();
        {
            let body = &self.bodies[key];
            for &group in &body.groups {
                let Some(group) = self.groups.get(group) else {
                    continue;
                };
                for &rule_key in &group.rules_a {
                    let Some(rule) = self.rules.get(rule_key) else {
                        continue;
                    };
                    let Some(opposite) = self.groups.get(rule.group_b) else {
                        continue;
                    };
                    for &other in &opposite.members {
                        if other != key {
                            pairs.push((key, other, rule_key, rule.recalculating));
                        }
                    }
                }
                for &rule_key in &group.rules_b {
                    let Some(rule) = self.rules.get(rule_key) else {
                        continue;
                    };
                    // a self-rule sits in both lists of this group; the
                    // rules_a walk above already minted its pairs, and the
                    // exact solver covers both orderings of a pair itself
                    if rule.group_a == rule.group_b {
                        continue;
                    }
                    let Some(opposite) = self.groups.get(rule.group_a) else {
                        continue;
                    };
                    for &other in &opposite.members {
                        if other != key {
                            pairs.push((other, key, rule_key, rule.recalculating));
                        }
                    }
                }
            }
        }
        let mut minted = 0_usize;
        for (a, b, rule, recalculating) in pairs {
            let Some(candidate) = self.mint_candidate(a, b, rule, now) else {
                continue;
            };
            minted += 1;
            let seq = self.candidate_seq;
            self.candidate_seq += 1;
            let body = &mut self.bodies[key];
            let heap = if recalculating {
                &mut body.recalc_candidates
            } else {
                &mut body.other_candidates
            };
            heap.push(CandidateEntry { candidate, seq });
        }
        log::trace!("recalculated {key:?}: {minted} candidates at t={now}");
        self.add_collisions(key);
    }

    fn mint_candidate(
        &self,
        a: BodyKey,
        b: BodyKey,
        rule: RuleKey,
        now: f64,
    ) -> Option<Candidate> {
        let bounds_a = self.moving_aabb(a, now)?;
        let bounds_b = self.moving_aabb(b, now)?;
        let offset = sweep::earliest_overlap(&bounds_a, &bounds_b)?;
        Some(Candidate {
            a,
            b,
            rule,
            earliest: now + offset,
        })
    }

    fn moving_aabb(&self, key: BodyKey, now: f64) -> Option<MovingAabb> {
        let body = self.bodies.get(key)?;
        if body.disabled {
            return None;
        }
        let geometry = &self.geometries.get(body.geometry)?.geometry;
        let trajectory = &self.trajectories.get(body.trajectory)?.trajectory;
        MovingAabb::new(
            &geometry.bounds(),
            &trajectory.transform_at(now),
            &trajectory.motion(),
        )
    }

    /// Emit contact events from the candidate heaps.
    ///
    /// Candidates under recalculating rules are only emitted up to the
    /// earliest event already known: once that fires, everything after it
    /// gets recomputed anyway. If a further candidate exists beyond the
    /// cutoff, a self-wake event re-enters here at its time. Candidates
    /// under observational rules cannot invalidate anything, so they are
    /// emitted in bulk up to the same cutoff (equality included).
    fn add_collisions(&mut self, key: BodyKey) {
        let now = self.clock.time();
        let (mut earliest, stamp) = {
            let Some(body) = self.bodies.get_mut(key) else {
                return;
            };
            if body.disabled {
                return;
            }
            let earliest = body.next_probable_recalc;
            body.next_probable_recalc = f64::INFINITY;
            (earliest, body.last_recalc)
        };

        loop {
            let top = match self.bodies[key].recalc_candidates.peek() {
                None => break,
                Some(entry) => entry.candidate,
            };
            if earliest < top.earliest {
                // a real event precedes anything this candidate could
                // produce; come back when the candidate can matter.
                // the popped candidates are not restored: re-entry leans
                // on recalculation rebuilding the heaps from scratch
                log::trace!("self-wake for {key:?} at t={}", top.earliest);
                if let Some(event) = self
                    .clock
                    .schedule(top.earliest, Box::new(move |world| world.add_collisions(key)))
                {
                    self.bodies[key].events.push(event);
                }
                break;
            }
            self.bodies[key].recalc_candidates.pop();
            if self.candidate_is_stale(&top, stamp) {
                log::trace!("skipping stale candidate {:?} vs {:?}", top.a, top.b);
                continue;
            }
            let contacts = self.solve_candidate(&top, now);
            let mut first = true;
            for collision in contacts {
                if collision.time < now {
                    continue;
                }
                self.emit_contact(&top, collision);
                if first {
                    earliest = earliest.min(collision.time);
                    first = false;
                }
                // advertise to both sides when they must plan to re-solve
                for side in [top.a, top.b] {
                    if let Some(body) = self.bodies.get_mut(side) {
                        body.next_probable_recalc = body.next_probable_recalc.min(collision.time);
                    }
                }
            }
        }

        loop {
            let top = match self.bodies[key].other_candidates.peek() {
                None => break,
                Some(entry) => entry.candidate,
            };
            if top.earliest > earliest {
                break;
            }
            self.bodies[key].other_candidates.pop();
            if self.candidate_is_stale(&top, stamp) {
                continue;
            }
            let contacts = self.solve_candidate(&top, now);
            for collision in contacts {
                if collision.time >= now {
                    self.emit_contact(&top, collision);
                }
            }
        }
    }

    /// A candidate is stale when either participant has recalculated
    /// since it was minted (the fresher side re-solved the pair itself),
    /// or a participant or the rule has gone away.
    fn candidate_is_stale(&self, candidate: &Candidate, stamp: u64) -> bool {
        let (Some(a), Some(b)) = (self.bodies.get(candidate.a), self.bodies.get(candidate.b))
        else {
            return true;
        };
        if a.disabled || b.disabled {
            return true;
        }
        if !self.rules.get(candidate.rule).is_some_and(|r| r.enabled) {
            return true;
        }
        a.last_recalc.max(b.last_recalc) != stamp
    }

    fn solve_candidate(&self, candidate: &Candidate, now: f64) -> Vec<Collision> {
        let Some(rule) = self.rules.get(candidate.rule) else {
            return Vec::new();
        };
        let (Some(state_a), Some(state_b)) =
            (self.body_state(candidate.a), self.body_state(candidate.b))
        else {
            return Vec::new();
        };
        vertex_edge::collide_pair(
            now,
            (candidate.a, &state_a),
            (candidate.b, &state_b),
            &rule.tolerance,
        )
    }

    fn body_state(&self, key: BodyKey) -> Option<BodyState<'_>> {
        let body = self.bodies.get(key)?;
        let geometry = &self.geometries.get(body.geometry)?.geometry;
        let trajectory = &self.trajectories.get(body.trajectory)?.trajectory;
        Some(BodyState {
            geometry,
            pose: trajectory.transform_at(self.clock.time()),
            motion: trajectory.motion(),
        })
    }

    /// Push a contact event on the clock and register it with both
    /// participants, so that either side's recalculation invalidates it.
    fn emit_contact(&mut self, candidate: &Candidate, collision: Collision) {
        let rule = candidate.rule;
        log::trace!(
            "contact between {:?} and {:?} scheduled at t={}",
            candidate.a,
            candidate.b,
            collision.time
        );
        let Some(event) = self.clock.schedule(
            collision.time,
            Box::new(move |world| world.fire_contact(rule, collision)),
        ) else {
            return;
        };
        for side in [candidate.a, candidate.b] {
            if let Some(body) = self.bodies.get_mut(side) {
                body.events.push(event);
            }
        }
    }

    fn fire_contact(&mut self, rule: RuleKey, collision: Collision) {
        let Some(rule) = self.rules.get(rule) else {
            return;
        };
        if !rule.enabled {
            return;
        }
        let callback = Rc::clone(&rule.callback);
        callback(self, &collision);
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
