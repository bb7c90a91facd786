//! The simulation record: one explicit value threaded through every
//! operation, never hidden in process-wide state.

use crate::collision::{self, CollisionPolicy};
use crate::errors::SimError;
use crate::gravity::{self, GravityKernel};
use crate::integrators::adaptive::AdaptiveIntegrator;
use crate::integrators::hybrid::{self, HybridIntegrator};
use crate::integrators::symplectic::WisdomHolman;
use crate::particle::Particle;
use std::fmt;

/// The whole state of an N-body integration.
///
/// `particles` is the inertial array visible to callers; element 0 is the
/// central body. The heliocentric image lives in `wh.p_jh` and the two are
/// mutually consistent whenever the stepper is synchronized. Time and the
/// gravitational constant are in whatever consistent unit system the caller
/// chooses; the defaults assume `G = 1`.
#[derive(Clone, Debug)]
pub struct Simulation {
    /// Gravitational constant.
    pub g: f64,
    /// Current time.
    pub t: f64,
    /// Outer step size. Mutated transiently during encounter substeps and
    /// restored afterwards.
    pub dt: f64,
    /// Size of the last completed outer step.
    pub dt_last_done: f64,
    /// The inertial particle array. During an encounter substep this
    /// temporarily holds the compacted encounter set instead.
    pub particles: Vec<Particle>,
    /// `Some(k)`: bodies `k..N` are test particles (they feel gravity but do
    /// not exert it and their mutual encounters are not tracked). `None`:
    /// every body is active.
    pub n_active: Option<usize>,
    /// Count of variational blocks appended to the particle array by the
    /// caller. No integrator in this crate propagates them; the hybrid
    /// stepper warns when this is nonzero.
    pub n_variational: usize,
    /// Selected acceleration kernel.
    pub gravity: GravityKernel,
    /// Selected collision handling.
    pub collision: CollisionPolicy,
    /// The symplectic core and its heliocentric buffer.
    pub wh: WisdomHolman,
    /// The hybrid stepper state and its configuration knobs.
    pub hybrid: HybridIntegrator,
    /// The adaptive integrator used for encounter substeps.
    pub adaptive: AdaptiveIntegrator,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    /// An empty simulation with `G = 1` and a small default timestep.
    pub fn new() -> Self {
        Self {
            g: 1.0,
            t: 0.0,
            dt: 0.001,
            dt_last_done: 0.0,
            particles: Vec::new(),
            n_active: None,
            n_variational: 0,
            gravity: GravityKernel::default(),
            collision: CollisionPolicy::default(),
            wh: WisdomHolman::default(),
            hybrid: HybridIntegrator::default(),
            adaptive: AdaptiveIntegrator::default(),
        }
    }

    /// Appends a particle. The first particle added is the central body.
    pub fn add(&mut self, p: Particle) {
        self.particles.push(p);
    }

    /// Removes a particle, keeping the order of the others.
    ///
    /// Flags the one-shot coordinate and critical-radius recomputations so
    /// the next step starts from a consistent state.
    pub fn remove(&mut self, index: usize) -> Result<Particle, SimError> {
        if index >= self.particles.len() {
            return Err(SimError::ParticleIndexOutOfBounds(
                index,
                self.particles.len(),
            ));
        }
        let p = self.particles.remove(index);
        if index < self.wh.p_jh.len() {
            self.wh.p_jh.remove(index);
        }
        if let Some(na) = self.n_active {
            if index < na {
                self.n_active = Some(na - 1);
            }
        }
        self.hybrid.recalculate_coordinates_this_timestep = true;
        self.hybrid.recalculate_dcrit_this_timestep = true;
        Ok(p)
    }

    /// Advances the system by one outer step of `dt`: setup, gravity, the
    /// symplectic splitting with its embedded encounter substep, then the
    /// collision search.
    pub fn step(&mut self) -> Result<(), SimError> {
        if self.particles.is_empty() {
            return Err(SimError::NoParticles);
        }
        if self.dt == 0.0 {
            return Err(SimError::ZeroTimestep);
        }
        hybrid::part1(self);
        gravity::calculate_acceleration(self);
        hybrid::part2(self)?;
        collision::search(self);
        Ok(())
    }

    /// Steps until `t` reaches `tmax`, shortening the final step to land on
    /// it exactly, then synchronizes. The user's `dt` is restored on return.
    ///
    /// A shortened final step reuses the critical radii computed for the full
    /// `dt`, which errs on the conservative side.
    pub fn integrate(&mut self, tmax: f64) -> Result<(), SimError> {
        if self.dt == 0.0 {
            return Err(SimError::ZeroTimestep);
        }
        let dt_user = self.dt;
        let sign = if self.dt < 0.0 { -1.0 } else { 1.0 };
        let result = loop {
            if (tmax - self.t) * sign <= 0.0 {
                break Ok(());
            }
            if (self.t + self.dt - tmax) * sign > 0.0 {
                self.dt = tmax - self.t;
                if self.dt == 0.0 || self.t + self.dt == self.t {
                    break Ok(());
                }
            }
            if let Err(e) = self.step() {
                break Err(e);
            }
        };
        self.dt = dt_user;
        result?;
        self.synchronize();
        Ok(())
    }

    /// Completes any pending half-kick so the inertial array is
    /// self-consistent. See [`hybrid::synchronize`].
    pub fn synchronize(&mut self) {
        hybrid::synchronize(self);
    }

    /// Total mechanical energy of the inertial array, kinetic plus pairwise
    /// potential. Meaningful when the stepper is synchronized.
    pub fn energy(&self) -> f64 {
        let mut e = 0.0;
        for (i, pi) in self.particles.iter().enumerate() {
            e += pi.kinetic_energy();
            for pj in &self.particles[(i + 1)..] {
                e -= self.g * pi.m * pj.m / (pi.pos - pj.pos).norm();
            }
        }
        e
    }
}

impl fmt::Display for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "simulation of {} bodies at t={} (dt={}, {})",
            self.particles.len(),
            self.t,
            self.dt,
            if self.hybrid.is_synchronized() {
                "synchronized"
            } else {
                "mid-step"
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn step_guards_against_degenerate_configurations() {
        let mut sim = Simulation::new();
        assert_eq!(sim.step(), Err(SimError::NoParticles));
        sim.add(Particle::new(1.0, Vector3::zeros(), Vector3::zeros()));
        sim.dt = 0.0;
        assert_eq!(sim.step(), Err(SimError::ZeroTimestep));
    }

    #[test]
    fn remove_checks_bounds_and_tracks_the_active_count() {
        let mut sim = Simulation::new();
        sim.add(Particle::new(1.0, Vector3::zeros(), Vector3::zeros()));
        sim.add(Particle::new(1e-3, Vector3::new(1.0, 0.0, 0.0), Vector3::zeros()));
        sim.n_active = Some(2);
        assert!(matches!(
            sim.remove(5),
            Err(SimError::ParticleIndexOutOfBounds(5, 2))
        ));
        sim.remove(1).unwrap();
        assert_eq!(sim.n_active, Some(1));
        assert!(sim.hybrid.recalculate_dcrit_this_timestep);
    }

    #[test]
    fn integrate_lands_on_the_requested_time() {
        let mut sim = Simulation::new();
        sim.add(Particle::new(1.0, Vector3::zeros(), Vector3::zeros()));
        sim.add(Particle::new(
            1e-8,
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ));
        sim.dt = 0.013;
        sim.integrate(0.5).unwrap();
        assert!((sim.t - 0.5).abs() < 1e-12, "t = {}", sim.t);
        assert_eq!(sim.dt, 0.013, "the user's dt is restored");
        assert!(sim.hybrid.is_synchronized());
    }
}
