//! Acceleration kernels.
//!
//! The hybrid kernel is the heart of the force splitting: in the outer
//! (Wisdom-Holman) phase it applies only the far-field share `L` of each
//! pairwise force (the changeover weight is 1 beyond the critical distance
//! and 0 deep inside it), and during an encounter substep it applies the
//! complementary share `1 - L` plus the full pull of the central body. The two
//! shares of a pair force sum to the unmasked Newtonian force exactly, which
//! is what keeps the composite map symplectic.
//!
//! All kernels accumulate in a fixed iteration order so that repeated runs
//! are bit-identical.

use crate::integrators::hybrid::Mode;
use crate::simulation::Simulation;
use nalgebra::Vector3;
use serde_derive::{Deserialize, Serialize};

/// Selects how [`calculate_acceleration`] fills the `acc` scratch fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GravityKernel {
    /// No gravity at all; accelerations are zeroed. Useful when the caller
    /// supplies forces some other way.
    None,
    /// Plain Newtonian gravity between every pair of bodies.
    #[default]
    Newtonian,
    /// The mode-split kernel of the hybrid stepper. Forced by the stepper's
    /// setup phase; see [`crate::integrators::hybrid::part1`].
    Hybrid,
}

/// Writes the acceleration of every particle into its `acc` field.
pub fn calculate_acceleration(sim: &mut Simulation) {
    match sim.gravity {
        GravityKernel::None => {
            for p in &mut sim.particles {
                p.acc = Vector3::zeros();
            }
        }
        GravityKernel::Newtonian => newtonian(sim),
        GravityKernel::Hybrid => match sim.hybrid.mode {
            Mode::Outer => hybrid_outer(sim),
            Mode::Sub => hybrid_sub(sim),
        },
    }
}

/// Number of bodies that exert forces: bodies past `n_active` are test
/// particles, they feel gravity but do not source it.
fn exerting(sim: &Simulation) -> usize {
    let n = sim.particles.len();
    sim.n_active.map_or(n, |na| na.min(n))
}

fn newtonian(sim: &mut Simulation) {
    let n = sim.particles.len();
    let n_exert = exerting(sim);
    let g = sim.g;
    for i in 0..n {
        let pi = sim.particles[i];
        let mut acc = Vector3::zeros();
        for j in 0..n_exert {
            if i == j {
                continue;
            }
            let pj = sim.particles[j];
            let dx = pi.pos - pj.pos;
            let d = dx.norm();
            acc -= g * pj.m / (d * d * d) * dx;
        }
        sim.particles[i].acc = acc;
    }
}

/// Far-field share of the planet-planet forces. The central body's pull is
/// entirely inside the Kepler and jump sub-steps, so body 0 takes no kick.
fn hybrid_outer(sim: &mut Simulation) {
    let n = sim.particles.len();
    let n_exert = exerting(sim);
    let g = sim.g;
    debug_assert!(sim.hybrid.dcrit.len() >= n, "dcrit table not initialized");
    sim.particles[0].acc = Vector3::zeros();
    let switch = sim.hybrid.switching_function.unwrap_or_default();
    for i in 1..n {
        let pi = sim.particles[i];
        let mut acc = Vector3::zeros();
        for j in 1..n_exert {
            if i == j {
                continue;
            }
            let pj = sim.particles[j];
            let dx = pi.pos - pj.pos;
            let d = dx.norm();
            let dcrit = sim.hybrid.dcrit[i].max(sim.hybrid.dcrit[j]);
            let l = switch.eval(d, dcrit);
            let pre = g * pj.m / (d * d * d);
            acc -= pre * l * dx;
        }
        sim.particles[i].acc = acc;
    }
}

/// Near-field share, evaluated on the compacted encounter array: the
/// `1 - L` weighted planet-planet forces plus the full pull of the central
/// body, which is pinned at the origin for the duration of the substep.
fn hybrid_sub(sim: &mut Simulation) {
    let n = sim.particles.len();
    let n_exert = exerting(sim);
    let g = sim.g;
    debug_assert!(
        sim.hybrid.encounter_dcrit.len() >= n,
        "encounter dcrit table not initialized"
    );
    sim.particles[0].acc = Vector3::zeros();
    let switch = sim.hybrid.switching_function.unwrap_or_default();
    let p0 = sim.particles[0];
    for i in 1..n {
        let pi = sim.particles[i];
        let r = pi.pos - p0.pos;
        let d0 = r.norm();
        let mut acc = -g * p0.m / (d0 * d0 * d0) * r;
        for j in 1..n_exert {
            if i == j {
                continue;
            }
            let pj = sim.particles[j];
            let dx = pi.pos - pj.pos;
            let d = dx.norm();
            let dcrit = sim.hybrid.encounter_dcrit[i].max(sim.hybrid.encounter_dcrit[j]);
            let l = switch.eval(d, dcrit);
            let pre = g * pj.m / (d * d * d);
            acc -= pre * (1.0 - l) * dx;
        }
        sim.particles[i].acc = acc;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Particle;

    fn pair_sim(separation: f64) -> Simulation {
        let mut sim = Simulation::new();
        // Massless center so the substep's star term vanishes and the pair
        // contributions can be compared in isolation.
        sim.add(Particle::new(0.0, Vector3::zeros(), Vector3::zeros()));
        sim.add(Particle::new(
            2e-5,
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::zeros(),
        ));
        sim.add(Particle::new(
            3e-5,
            Vector3::new(1.0 + separation, 0.0, 0.0),
            Vector3::zeros(),
        ));
        sim.gravity = GravityKernel::Hybrid;
        sim.hybrid.dcrit = vec![0.0, 0.1, 0.1];
        sim.hybrid.encounter_dcrit = vec![0.0, 0.1, 0.1];
        sim
    }

    fn accelerations(sim: &mut Simulation, mode: Mode) -> Vec<Vector3<f64>> {
        sim.hybrid.mode = mode;
        calculate_acceleration(sim);
        sim.particles.iter().map(|p| p.acc).collect()
    }

    #[test]
    fn outer_and_sub_shares_sum_to_newton() {
        // Separations inside, across and outside the changeover region.
        for separation in [0.005, 0.03, 0.06, 0.09, 0.5] {
            let mut sim = pair_sim(separation);
            let outer = accelerations(&mut sim, Mode::Outer);
            let sub = accelerations(&mut sim, Mode::Sub);
            for i in 1..3 {
                let j = 3 - i;
                let pi = sim.particles[i];
                let pj = sim.particles[j];
                let dx = pi.pos - pj.pos;
                let d = dx.norm();
                let full = -sim.g * pj.m / (d * d * d) * dx;
                let combined = outer[i] + sub[i];
                approx::assert_relative_eq!(combined.x, full.x, max_relative = 1e-14);
            }
        }
    }

    #[test]
    fn shares_are_exact_outside_the_changeover_region() {
        // Far apart: the outer kernel carries the whole force.
        let mut sim = pair_sim(0.5);
        let outer = accelerations(&mut sim, Mode::Outer);
        let sub = accelerations(&mut sim, Mode::Sub);
        let dx = sim.particles[1].pos - sim.particles[2].pos;
        let d = dx.norm();
        let full = -sim.g * sim.particles[2].m / (d * d * d) * dx;
        assert_eq!(outer[1], full);
        assert_eq!(sub[1], Vector3::zeros());

        // Deep inside: the substep carries the whole force.
        let mut sim = pair_sim(0.005);
        let outer = accelerations(&mut sim, Mode::Outer);
        let sub = accelerations(&mut sim, Mode::Sub);
        let dx = sim.particles[1].pos - sim.particles[2].pos;
        let d = dx.norm();
        let full = -sim.g * sim.particles[2].m / (d * d * d) * dx;
        assert_eq!(outer[1], Vector3::zeros());
        assert_eq!(sub[1], full);
    }

    #[test]
    fn test_particles_feel_but_do_not_exert() {
        let mut sim = Simulation::new();
        sim.add(Particle::new(1.0, Vector3::zeros(), Vector3::zeros()));
        sim.add(Particle::new(
            1e-3,
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::zeros(),
        ));
        sim.add(Particle::new(
            1e-3,
            Vector3::new(0.0, 2.0, 0.0),
            Vector3::zeros(),
        ));
        sim.n_active = Some(2);
        calculate_acceleration(&mut sim);
        // The test particle at index 2 is pulled by star and planet.
        assert!(sim.particles[2].acc.norm() > 0.0);
        // But the star only feels the planet at index 1.
        let dx = sim.particles[0].pos - sim.particles[1].pos;
        let d = dx.norm();
        let expected = -sim.g * sim.particles[1].m / (d * d * d) * dx;
        assert_eq!(sim.particles[0].acc, expected);
    }
}
