//! The hybrid stepper.
//!
//! One outer step is a second-order symplectic splitting in democratic
//! heliocentric coordinates with an embedded rescue path: before the Kepler
//! drift the heliocentric state is snapshotted, the drift endpoints are used
//! to predict which pairs come within a multiple of their critical distance
//! during the step, and the flagged bodies are re-integrated from the
//! snapshot to the end of the step by the adaptive integrator, under the
//! near-field share of the pair forces. The far-field share stays with the
//! symplectic kicks, split smoothly by a changeover function so the composite
//! map remains symplectic (Chambers 1999).
//!
//! The stepper owns no particles of its own; it mutates the simulation record
//! passed to every operation.

use crate::collision;
use crate::errors::SimError;
use crate::gravity::{self, GravityKernel};
use crate::integrators::adaptive;
use crate::integrators::symplectic::Splitting;
use crate::particle::Particle;
use crate::simulation::Simulation;
use crate::transformations;
use nalgebra::Vector3;
use std::mem;

/// Which half of the force splitting the gravity oracle applies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// Outer symplectic step: far-field pair forces only.
    #[default]
    Outer,
    /// Encounter substep: near-field pair forces plus the full central pull,
    /// evaluated on the compacted encounter array.
    Sub,
}

/// Changeover weight between the outer step and the encounter substep.
///
/// The weight is 0 at and below `0.1 * dcrit` (the pair force belongs
/// entirely to the substep) and 1 at and beyond `dcrit` (entirely to the
/// outer step), rising monotonically in between. Any pure, deterministic
/// function with those limits is admissible through `Custom`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SwitchingFunction {
    /// The C2-continuous quintic used by Chambers' MERCURY.
    Polynomial,
    /// An infinitely differentiable changeover built from `exp(-1/x)` bumps.
    Smooth,
    /// A user-supplied weight with the same `(d, dcrit)` signature.
    Custom(fn(f64, f64) -> f64),
}

impl Default for SwitchingFunction {
    fn default() -> Self {
        SwitchingFunction::Polynomial
    }
}

fn bump(x: f64) -> f64 {
    if x <= 0.0 {
        0.0
    } else {
        (-1.0 / x).exp()
    }
}

impl SwitchingFunction {
    /// Evaluates the changeover weight for a pair at distance `d` with
    /// critical radius `dcrit`.
    pub fn eval(self, d: f64, dcrit: f64) -> f64 {
        match self {
            SwitchingFunction::Polynomial => {
                let y = (d - 0.1 * dcrit) / (0.9 * dcrit);
                if y < 0.0 {
                    0.0
                } else if y > 1.0 {
                    1.0
                } else {
                    ((6.0 * y - 15.0) * y + 10.0) * y * y * y
                }
            }
            SwitchingFunction::Smooth => {
                let y = (d - 0.1 * dcrit) / (0.9 * dcrit);
                if y < 0.0 {
                    0.0
                } else if y > 1.0 {
                    1.0
                } else {
                    bump(y) / (bump(y) + bump(1.0 - y))
                }
            }
            SwitchingFunction::Custom(f) => f(d, dcrit),
        }
    }
}

/// State of the hybrid stepper.
///
/// The buffers grow monotonically with the particle count; growth past the
/// high-water marks triggers the corresponding one-shot recomputation. All of
/// it is released by [`reset`].
#[derive(Clone, Debug)]
pub struct HybridIntegrator {
    /// Scale factor on the Hill-radius criterion of the critical distance.
    pub hillfac: f64,
    /// Synchronize immediately after every outer step. On by default; turn
    /// off to save one interaction evaluation per step when intermediate
    /// inertial output is not needed.
    pub safe_mode: bool,
    /// On synchronize, restore the heliocentric buffer afterwards so that
    /// continuing the integration reproduces the unsynchronized trajectory
    /// bit for bit.
    pub keep_unsynchronized: bool,
    /// One-shot: re-seed the heliocentric coordinates from the inertial array
    /// at the next step.
    pub recalculate_coordinates_this_timestep: bool,
    /// One-shot: rebuild the critical-radius table at the next step.
    pub recalculate_dcrit_this_timestep: bool,
    /// Selected changeover function; [`part1`] fills in the polynomial
    /// default when unset.
    pub switching_function: Option<SwitchingFunction>,
    pub(crate) mode: Mode,
    pub(crate) is_synchronized: bool,
    pub(crate) encounter_n: usize,
    pub(crate) encounter_indices: Vec<usize>,
    pub(crate) p_hold: Vec<Particle>,
    pub(crate) dcrit: Vec<f64>,
    pub(crate) encounter_particles: Vec<Particle>,
    pub(crate) encounter_dcrit: Vec<f64>,
    pub(crate) encounter_map: Vec<usize>,
    pub(crate) global_n_active: Option<usize>,
    pub(crate) allocated_n: usize,
    pub(crate) dcrit_allocated_n: usize,
    pub(crate) encounter_allocated_n: usize,
}

impl Default for HybridIntegrator {
    fn default() -> Self {
        Self {
            hillfac: 3.0,
            safe_mode: true,
            keep_unsynchronized: false,
            recalculate_coordinates_this_timestep: false,
            recalculate_dcrit_this_timestep: false,
            switching_function: None,
            mode: Mode::Outer,
            is_synchronized: true,
            encounter_n: 0,
            encounter_indices: Vec::new(),
            p_hold: Vec::new(),
            dcrit: Vec::new(),
            encounter_particles: Vec::new(),
            encounter_dcrit: Vec::new(),
            encounter_map: Vec::new(),
            global_n_active: None,
            allocated_n: 0,
            dcrit_allocated_n: 0,
            encounter_allocated_n: 0,
        }
    }
}

impl HybridIntegrator {
    /// Number of bodies flagged for the current or last encounter substep,
    /// central body included. 1 means no encounter.
    pub fn encounter_count(&self) -> usize {
        self.encounter_n
    }

    /// Whether the inertial array reflects a completed outer step.
    pub fn is_synchronized(&self) -> bool {
        self.is_synchronized
    }

    /// Current phase of the stepper.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The critical-radius table, one entry per body.
    pub fn dcrit(&self) -> &[f64] {
        &self.dcrit
    }
}

/// Pre-step setup. Idempotent per outer step.
///
/// Grows the buffers to the current particle count, re-seeds coordinates and
/// the critical-radius table when flagged (synchronizing first if needed),
/// forces the democratic heliocentric splitting and the hybrid gravity
/// kernel, and installs the default changeover function if none was chosen.
pub fn part1(sim: &mut Simulation) {
    if sim.particles.is_empty() {
        return;
    }
    if sim.n_variational > 0 {
        warn!("the hybrid stepper does not propagate variational equations; they are ignored");
    }
    let n = sim.particles.len();

    // The tables track the live body count while their capacity only grows;
    // new entries (growth past the current length) force a rebuild.
    if sim.hybrid.dcrit.len() < n {
        sim.hybrid.recalculate_dcrit_this_timestep = true;
    }
    if sim.hybrid.dcrit_allocated_n < n {
        sim.hybrid.dcrit_allocated_n = n;
    }
    sim.hybrid.dcrit.resize(n, 0.0);
    if sim.hybrid.allocated_n < n {
        // Rebuilt every step, so growing them needs no recomputation flag.
        sim.hybrid.allocated_n = n;
    }
    sim.hybrid.encounter_indices.resize(n, 0);
    sim.hybrid.p_hold.resize(n, Particle::default());
    if sim.wh.p_jh.len() < n {
        sim.hybrid.recalculate_coordinates_this_timestep = true;
    }
    if sim.wh.allocated_n < n {
        sim.wh.allocated_n = n;
    }
    sim.wh.p_jh.resize(n, Particle::default());

    if sim.hybrid.safe_mode || sim.hybrid.recalculate_coordinates_this_timestep {
        sim.hybrid.recalculate_coordinates_this_timestep = false;
        if !sim.hybrid.is_synchronized {
            synchronize(sim);
            warn!("recalculating heliocentric coordinates from an unsynchronized state");
        }
        transformations::inertial_to_democratic_heliocentric(&sim.particles, &mut sim.wh.p_jh);
    }

    if sim.hybrid.recalculate_dcrit_this_timestep {
        sim.hybrid.recalculate_dcrit_this_timestep = false;
        if !sim.hybrid.is_synchronized {
            synchronize(sim);
            warn!("recalculating critical radii from an unsynchronized state");
        }
        recalculate_dcrit(sim);
    }

    sim.wh.splitting = Splitting::DemocraticHeliocentric;
    if sim.gravity != GravityKernel::Newtonian && sim.gravity != GravityKernel::Hybrid {
        warn!("the hybrid stepper uses its own gravity kernel; the configured kernel is ignored");
    }
    sim.gravity = GravityKernel::Hybrid;
    sim.hybrid.mode = Mode::Outer;

    if sim.hybrid.switching_function.is_none() {
        sim.hybrid.switching_function = Some(SwitchingFunction::default());
    }
}

/// Rebuilds the critical-radius table.
///
/// Entry 0 is twice the central body's physical radius. For every other body
/// the entry is the largest of four length scales: the distance covered in
/// 0.4 steps at the mean orbital velocity, the same at the current relative
/// velocity, `hillfac` Hill radii, and twice the physical radius. The Hill
/// criterion is inert on unbound orbits (negative semimajor axis), and both
/// semimajor-axis criteria are skipped on an exactly parabolic orbit.
fn recalculate_dcrit(sim: &mut Simulation) {
    let n = sim.particles.len();
    sim.hybrid.dcrit[0] = 2.0 * sim.particles[0].radius;
    let m0 = sim.particles[0].m;
    let dt = sim.dt.abs();
    for i in 1..n {
        let r = sim.wh.p_jh[i].pos.norm();
        let dv = sim.particles[i].vel - sim.particles[0].vel;
        let v2 = dv.norm_squared();
        let gm = sim.g * (m0 + sim.particles[i].m);
        let mut dcrit: f64 = 0.0;
        let denom = 2.0 * gm - r * v2;
        if denom != 0.0 {
            // Osculating semimajor axis, negative for unbound orbits.
            let a = gm * r / denom;
            let vc = (gm / a.abs()).sqrt();
            // Criterion 1: mean orbital velocity.
            dcrit = dcrit.max(vc * 0.4 * dt);
            // Criterion 3: Hill radius.
            dcrit = dcrit.max(sim.hybrid.hillfac * a * (sim.particles[i].m / (3.0 * m0)).cbrt());
        }
        // Criterion 2: current relative velocity.
        dcrit = dcrit.max(v2.sqrt() * 0.4 * dt);
        // Criterion 4: physical radius.
        dcrit = dcrit.max(2.0 * sim.particles[i].radius);
        sim.hybrid.dcrit[i] = dcrit;
    }
}

/// Smallest squared separation of a pair during the step, reconstructed from
/// the endpoint separations and their time derivatives with a cubic Hermite
/// interpolant of `r^2(t)`.
///
/// `d_old`/`dv_old` are the relative position and velocity before the Kepler
/// drift, `d_new`/`dv_new` after it. The extremum search solves the
/// interpolant's derivative, a quadratic in the normalized time; a vanishing
/// quadratic coefficient or a negative discriminant produce non-finite roots
/// which simply fail the interior-interval test.
pub(crate) fn minimum_separation_squared(
    d_old: Vector3<f64>,
    dv_old: Vector3<f64>,
    d_new: Vector3<f64>,
    dv_new: Vector3<f64>,
    dt: f64,
) -> f64 {
    let rn = d_new.norm_squared();
    let ro = d_old.norm_squared();
    let drndt = 2.0 * d_new.dot(&dv_new);
    let drodt = 2.0 * d_old.dot(&dv_old);

    let a = 6.0 * (ro - rn) + 3.0 * dt * (drodt + drndt);
    let b = 6.0 * (rn - ro) - 2.0 * dt * (2.0 * drodt + drndt);
    let c = dt * drodt;

    let mut r2_min = rn.min(ro);
    let s = b * b - 4.0 * a * c;
    let sr = s.max(0.0).sqrt();
    for t in [(-b + sr) / (2.0 * a), (-b - sr) / (2.0 * a)] {
        if t > 0.0 && t < 1.0 {
            let h = (1.0 - t) * (1.0 - t) * (1.0 + 2.0 * t) * ro
                + t * t * (3.0 - 2.0 * t) * rn
                + t * (1.0 - t) * (1.0 - t) * dt * drodt
                - t * t * (1.0 - t) * dt * drndt;
            r2_min = r2_min.min(h.max(0.0));
        }
    }
    r2_min
}

/// Flags every body predicted to come within `1.1` times the pairwise
/// critical distance of another during the step.
///
/// Compares the pre-Kepler snapshot against the post-Kepler heliocentric
/// state. The central slot is always flagged. Test particles beyond
/// `n_active` can be flagged by passing close to an active body, but pairs of
/// test particles are not examined.
pub(crate) fn predict_encounters(sim: &mut Simulation) {
    let n = sim.particles.len();
    let n_active = sim.n_active.map_or(n, |na| na.min(n));
    let dt = sim.dt;
    let p_hn = &sim.wh.p_jh;
    let hy = &mut sim.hybrid;

    hy.encounter_n = 1;
    hy.encounter_indices[0] = 1;
    for flag in hy.encounter_indices[1..n].iter_mut() {
        *flag = 0;
    }
    for i in 0..n_active {
        for j in (i + 1)..n {
            let r2_min = minimum_separation_squared(
                hy.p_hold[i].pos - hy.p_hold[j].pos,
                hy.p_hold[i].vel - hy.p_hold[j].vel,
                p_hn[i].pos - p_hn[j].pos,
                p_hn[i].vel - p_hn[j].vel,
                dt,
            );
            if r2_min.sqrt() < 1.1 * hy.dcrit[i].max(hy.dcrit[j]) {
                if hy.encounter_indices[i] == 0 {
                    hy.encounter_indices[i] = i;
                    hy.encounter_n += 1;
                }
                if hy.encounter_indices[j] == 0 {
                    hy.encounter_indices[j] = j;
                    hy.encounter_n += 1;
                }
            }
        }
    }
}

/// Re-integrates the flagged bodies from the pre-Kepler snapshot to the end
/// of the outer step with the adaptive integrator, then folds the result back
/// into the heliocentric buffer.
///
/// While the substep runs, the compacted encounter set *is* the simulation's
/// particle array (the two vectors are swapped), so the gravity kernel and
/// the collision search transparently see the encounter view. Mergers during
/// the substep shrink the scratch array; the scratch-to-global map keeps the
/// unwind exact and bodies that merged away are removed from the global
/// arrays at the end.
pub(crate) fn encounter_step(sim: &mut Simulation, dt_outer: f64) {
    if sim.hybrid.encounter_n < 2 {
        return;
    }
    let global_n = sim.particles.len();
    let global_n_active = sim.n_active;
    sim.hybrid.global_n_active = global_n_active;

    let encounter_n = sim.hybrid.encounter_n;
    if sim.hybrid.encounter_allocated_n < encounter_n {
        let grow = encounter_n - sim.hybrid.encounter_allocated_n;
        sim.hybrid.encounter_allocated_n = encounter_n;
        sim.hybrid.encounter_particles.reserve(grow);
        sim.hybrid.encounter_dcrit.reserve(grow);
        sim.hybrid.encounter_map.reserve(grow);
    }

    // Compact: pre-Kepler heliocentric state, live attributes.
    {
        let hy = &mut sim.hybrid;
        hy.encounter_particles.clear();
        hy.encounter_dcrit.clear();
        hy.encounter_map.clear();
        let mut n_active = 0;
        for i in 0..global_n {
            if hy.encounter_indices[i] != 0 {
                let live = &sim.particles[i];
                let mut p = hy.p_hold[i];
                p.radius = live.radius;
                p.ap = live.ap;
                p.hash = live.hash;
                p.last_collision = live.last_collision;
                hy.encounter_particles.push(p);
                hy.encounter_dcrit.push(hy.dcrit[i]);
                hy.encounter_map.push(i);
                if global_n_active.map_or(true, |na| i < na) {
                    n_active += 1;
                }
            }
        }
        // The substep frame has the central body at the origin; relative
        // motion is integrated against its full pull.
        hy.encounter_particles[0].m = sim.particles[0].m;
        hy.encounter_particles[0].pos = Vector3::zeros();
        hy.encounter_particles[0].vel = Vector3::zeros();
        sim.n_active = global_n_active.map(|_| n_active);
    }

    mem::swap(&mut sim.particles, &mut sim.hybrid.encounter_particles);
    sim.hybrid.mode = Mode::Sub;

    let old_dt = sim.dt;
    let old_t = sim.t;
    let t_needed = sim.t + dt_outer;
    let sign = if dt_outer < 0.0 { -1.0 } else { 1.0 };

    sim.adaptive.reset();
    sim.adaptive.opts.max_step = dt_outer.abs();
    sim.adaptive.opts.min_step = 1e-14 * dt_outer.abs();
    sim.dt = 1e-4 * dt_outer;

    // The second guard is the stall policy: if the adaptive step collapses,
    // the substep gives up and leaves the bodies at the last completed
    // sub-time rather than spinning forever.
    while (t_needed - sim.t) * sign > 0.0 && (sim.dt / old_dt).abs() > 1e-14 {
        gravity::calculate_acceleration(sim);
        adaptive::step(sim);
        collision::search(sim);
        if (sim.t + sim.dt - t_needed) * sign > 0.0 {
            sim.dt = t_needed - sim.t;
        }
    }

    // Unwind into the global arrays.
    {
        let hy = &mut sim.hybrid;
        let scratch = &sim.particles;
        assert_eq!(
            scratch.len(),
            hy.encounter_map.len(),
            "encounter bookkeeping out of step with the scratch array"
        );
        assert!(
            hy.encounter_map.windows(2).all(|w| w[0] < w[1]),
            "encounter survivors must keep their relative order"
        );
        let outer = &mut hy.encounter_particles;
        for (k, &i) in hy.encounter_map.iter().enumerate() {
            sim.wh.p_jh[i] = scratch[k];
            let o = &mut outer[i];
            o.m = scratch[k].m;
            o.radius = scratch[k].radius;
            o.ap = scratch[k].ap;
            o.hash = scratch[k].hash;
            o.last_collision = scratch[k].last_collision;
        }
        // New total mass: surviving encounter members plus the untouched
        // rest of the system.
        let mut totalm_new = 0.0;
        for p in scratch.iter() {
            totalm_new += p.m;
        }
        for (i, o) in outer.iter().enumerate().take(global_n) {
            if hy.encounter_indices[i] == 0 {
                totalm_new += o.m;
            }
        }
        // Entry 0 carries the center of mass, which advanced only through
        // the outer com step.
        sim.wh.p_jh[0].m = totalm_new;
        sim.wh.p_jh[0].pos = hy.p_hold[0].pos;
        sim.wh.p_jh[0].vel = hy.p_hold[0].vel;
    }

    mem::swap(&mut sim.particles, &mut sim.hybrid.encounter_particles);
    sim.t = old_t;
    sim.dt = old_dt;
    sim.n_active = sim.hybrid.global_n_active;
    sim.hybrid.mode = Mode::Outer;

    // Bodies that merged away leave the global arrays here. This is the only
    // place the hybrid shrinks the system.
    if sim.hybrid.encounter_map.len() < encounter_n {
        let dead: Vec<usize> = {
            let hy = &sim.hybrid;
            (0..global_n)
                .filter(|&i| hy.encounter_indices[i] != 0 && !hy.encounter_map.contains(&i))
                .collect()
        };
        for &i in dead.iter().rev() {
            sim.particles.remove(i);
            sim.wh.p_jh.remove(i);
            if let Some(na) = sim.n_active {
                if i < na {
                    sim.n_active = Some(na - 1);
                }
            }
        }
        debug!(
            "{} bodies merged away during the encounter substep",
            dead.len()
        );
        sim.hybrid.recalculate_dcrit_this_timestep = true;
    }
}

/// Advances the system by one outer step of `sim.dt`.
///
/// Requires [`part1`] and a gravity evaluation beforehand; the convenience
/// loop [`Simulation::step`] does both.
pub fn part2(sim: &mut Simulation) -> Result<(), SimError> {
    let dt = sim.dt;
    let n = sim.particles.len();
    debug_assert!(sim.hybrid.p_hold.len() >= n, "part1 must run before part2");

    // A pending half interaction from the previous step merges with this
    // step's first half.
    if sim.hybrid.is_synchronized {
        sim.wh.interaction_step(&sim.particles, dt / 2.0);
    } else {
        sim.wh.interaction_step(&sim.particles, dt);
    }
    let m0 = sim.particles[0].m;
    sim.wh.jump_step(m0, dt / 2.0);
    sim.wh.com_step(dt);

    sim.hybrid.p_hold[..n].copy_from_slice(&sim.wh.p_jh[..n]);
    sim.wh.kepler_step(sim.g * m0, dt)?;

    predict_encounters(sim);
    encounter_step(sim, dt);

    // Collisions may have changed the central mass.
    let m0 = sim.particles[0].m;
    sim.wh.jump_step(m0, dt / 2.0);

    transformations::democratic_heliocentric_to_inertial(&mut sim.particles, &sim.wh.p_jh);

    sim.hybrid.is_synchronized = false;
    if sim.hybrid.safe_mode {
        synchronize(sim);
    }

    sim.t += dt;
    sim.dt_last_done = dt;
    Ok(())
}

/// Completes the pending interaction half-kick so the inertial array
/// represents a self-consistent instant. No-op when already synchronized.
///
/// With `keep_unsynchronized` set, the heliocentric buffer is restored
/// afterwards and the stepper stays formally unsynchronized, so subsequent
/// steps reproduce the uninterrupted trajectory bit for bit.
pub fn synchronize(sim: &mut Simulation) {
    if sim.hybrid.is_synchronized {
        return;
    }
    let n = sim.particles.len();
    let saved = if sim.hybrid.keep_unsynchronized {
        Some(sim.wh.p_jh[..n].to_vec())
    } else {
        None
    };
    sim.gravity = GravityKernel::Hybrid;
    sim.wh.splitting = Splitting::DemocraticHeliocentric;
    sim.hybrid.mode = Mode::Outer;
    gravity::calculate_acceleration(sim);
    sim.wh.interaction_step(&sim.particles, sim.dt / 2.0);

    transformations::democratic_heliocentric_to_inertial(&mut sim.particles, &sim.wh.p_jh);

    match saved {
        Some(saved) => sim.wh.p_jh[..n].copy_from_slice(&saved),
        None => sim.hybrid.is_synchronized = true,
    }
}

/// Releases the stepper's buffers and restores its default configuration.
/// The heliocentric buffer of the symplectic core is left alone; the next
/// step re-seeds whatever it needs.
pub fn reset(sim: &mut Simulation) {
    let hy = &mut sim.hybrid;
    hy.switching_function = None;
    hy.mode = Mode::Outer;
    hy.encounter_n = 0;
    hy.global_n_active = None;
    hy.hillfac = 3.0;
    hy.keep_unsynchronized = false;
    hy.recalculate_coordinates_this_timestep = false;
    hy.encounter_allocated_n = 0;
    hy.encounter_particles = Vec::new();
    hy.encounter_dcrit = Vec::new();
    hy.encounter_map = Vec::new();
    hy.allocated_n = 0;
    hy.p_hold = Vec::new();
    hy.encounter_indices = Vec::new();
    hy.dcrit_allocated_n = 0;
    hy.dcrit = Vec::new();
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[rstest]
    #[case(SwitchingFunction::Polynomial)]
    #[case(SwitchingFunction::Smooth)]
    fn switching_function_boundaries(#[case] l: SwitchingFunction) {
        for dcrit in [1e-6, 0.3, 1.0, 42.0] {
            assert_eq!(l.eval(0.0, dcrit), 0.0);
            assert_eq!(l.eval(0.1 * dcrit, dcrit), 0.0);
            assert!(l.eval(dcrit, dcrit) > 1.0 - 1e-12);
            assert_eq!(l.eval(2.0 * dcrit, dcrit), 1.0);
            let mut prev = 0.0;
            for k in 0..=150 {
                let d = dcrit * 1.5 * f64::from(k) / 150.0;
                let w = l.eval(d, dcrit);
                assert!((0.0..=1.0).contains(&w), "weight {} out of range", w);
                assert!(w >= prev, "changeover must be monotone");
                prev = w;
            }
        }
    }

    #[test]
    fn polynomial_changeover_is_flat_at_both_edges() {
        let l = SwitchingFunction::Polynomial;
        let dcrit = 1.0;
        let h = 1e-4;
        for edge in [0.1, 1.0] {
            let d1 = (l.eval(edge + h, dcrit) - l.eval(edge - h, dcrit)) / (2.0 * h);
            let d2 = (l.eval(edge + h, dcrit) - 2.0 * l.eval(edge, dcrit)
                + l.eval(edge - h, dcrit))
                / (h * h);
            assert!(d1.abs() < 1e-6, "first derivative at {}: {}", edge, d1);
            assert!(d2.abs() < 1e-2, "second derivative at {}: {}", edge, d2);
        }
    }

    fn dcrit_for(planet: Particle, dt: f64) -> f64 {
        let mut sim = Simulation::new();
        sim.add(Particle::new(1.0, Vector3::zeros(), Vector3::zeros()).with_radius(1e-9));
        sim.add(planet);
        sim.dt = dt;
        part1(&mut sim);
        sim.hybrid.dcrit[1]
    }

    #[test]
    fn dcrit_dominated_by_mean_orbital_velocity() {
        // Apoapsis of an eccentric orbit: the mean orbital velocity exceeds
        // the current one.
        let planet = Particle::new(
            1e-12,
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 0.5, 0.0),
        );
        let dt = 0.01;
        let gm: f64 = 1.0 + 1e-12;
        let a = 1.0 / (2.0 - 0.25 / gm);
        let vc = (gm / a).sqrt();
        assert_relative_eq!(dcrit_for(planet, dt), vc * 0.4 * dt, max_relative = 1e-9);
    }

    #[test]
    fn dcrit_dominated_by_current_velocity_on_unbound_orbit() {
        let planet = Particle::new(
            1e-12,
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 10.0, 0.0),
        );
        let dt = 0.01;
        assert_relative_eq!(dcrit_for(planet, dt), 10.0 * 0.4 * dt, max_relative = 1e-9);
    }

    #[test]
    fn dcrit_dominated_by_hill_radius() {
        let planet = Particle::new(
            0.01,
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        );
        let dt = 1e-6;
        let got = dcrit_for(planet, dt);
        let gm = 1.0 + 0.01;
        let a = 1.0 / (2.0 - 1.0 / gm);
        let hill = 3.0 * a * (0.01f64 / 3.0).cbrt();
        assert_relative_eq!(got, hill, max_relative = 1e-9);
    }

    #[test]
    fn dcrit_dominated_by_physical_radius() {
        let planet = Particle::new(
            1e-12,
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        )
        .with_radius(0.1);
        assert_relative_eq!(dcrit_for(planet, 1e-6), 0.2, max_relative = 1e-12);
    }

    #[test]
    fn interpolated_minimum_matches_the_analytic_one_for_linear_motion() {
        // Constant relative velocity makes r^2(t) a quadratic, which the
        // cubic Hermite form reproduces to round-off.
        let dt = 1.0;
        let d0 = Vector3::new(-3.0, 0.5, 0.0);
        let dv = Vector3::new(6.0, 0.0, 0.0);
        let d1 = d0 + dt * dv;
        let r2 = minimum_separation_squared(d0, dv, d1, dv, dt);
        let t_star = -d0.dot(&dv) / dv.norm_squared();
        let analytic = (d0 + t_star * dv).norm_squared();
        assert_relative_eq!(r2, analytic, max_relative = 1e-12);
    }

    // A crossing pair with a known minimum approach, plus a far-away star.
    fn crossing_sim(impact: f64, dcrit: f64) -> Simulation {
        let mut sim = Simulation::new();
        for _ in 0..3 {
            sim.add(Particle::default());
        }
        sim.dt = 1.0;
        let star = Particle::new(1.0, Vector3::new(0.0, 100.0, 0.0), Vector3::zeros());
        let a_old = Particle::new(1e-8, Vector3::new(-3.0, 0.0, 0.0), Vector3::new(6.0, 0.0, 0.0));
        let mut a_new = a_old;
        a_new.pos = Vector3::new(3.0, 0.0, 0.0);
        let b_old = Particle::new(
            1e-8,
            Vector3::new(3.0, impact, 0.0),
            Vector3::new(-6.0, 0.0, 0.0),
        );
        let mut b_new = b_old;
        b_new.pos = Vector3::new(-3.0, impact, 0.0);
        sim.hybrid.p_hold = vec![star, a_old, b_old];
        sim.wh.p_jh = vec![star, a_new, b_new];
        sim.hybrid.dcrit = vec![0.0, dcrit, dcrit];
        sim.hybrid.encounter_indices = vec![0; 3];
        sim
    }

    #[rstest]
    #[case(0.05, 3)] // well inside dcrit: flagged
    #[case(0.105, 3)] // tolerance band [dcrit, 1.1 dcrit): still flagged
    #[case(0.12, 1)] // beyond 1.1 dcrit: not flagged
    fn close_approach_flagging(#[case] impact: f64, #[case] expected: usize) {
        let mut sim = crossing_sim(impact, 0.1);
        predict_encounters(&mut sim);
        assert_eq!(sim.hybrid.encounter_n, expected);
        assert_eq!(sim.hybrid.encounter_indices[0], 1, "central slot always flagged");
        if expected == 3 {
            assert_eq!(sim.hybrid.encounter_indices[1], 1);
            assert_eq!(sim.hybrid.encounter_indices[2], 2);
        } else {
            assert_eq!(sim.hybrid.encounter_indices[1], 0);
            assert_eq!(sim.hybrid.encounter_indices[2], 0);
        }
    }

    #[test]
    fn reset_restores_defaults_and_releases_buffers() {
        let mut sim = crossing_sim(0.05, 0.1);
        sim.hybrid.hillfac = 7.0;
        sim.hybrid.keep_unsynchronized = true;
        sim.hybrid.switching_function = Some(SwitchingFunction::Smooth);
        predict_encounters(&mut sim);
        reset(&mut sim);
        assert_eq!(sim.hybrid.hillfac, 3.0);
        assert!(!sim.hybrid.keep_unsynchronized);
        assert!(sim.hybrid.switching_function.is_none());
        assert_eq!(sim.hybrid.encounter_n, 0);
        assert!(sim.hybrid.dcrit.is_empty());
        assert!(sim.hybrid.p_hold.is_empty());
    }
}
