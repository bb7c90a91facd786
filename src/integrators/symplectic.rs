//! The symplectic core: the four sub-steps of the Wisdom-Holman mapping in
//! democratic heliocentric coordinates, and the universal-variable Kepler
//! drift they are built on (Wisdom & Holman 1991).

use crate::errors::SimError;
use crate::particle::Particle;
use serde_derive::{Deserialize, Serialize};

/// Canonical splittings of the planetary Hamiltonian.
///
/// Only the democratic heliocentric form is integrable by this core; the
/// hybrid stepper forces it during setup. The Jacobi variant is accepted in
/// configuration for completeness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Splitting {
    /// Classic nested Jacobi coordinates.
    Jacobi,
    /// Body 0 carries the center of mass, bodies `i >= 1` are heliocentric in
    /// position and barycentric in velocity.
    #[default]
    DemocraticHeliocentric,
}

/// State of the Wisdom-Holman core.
///
/// Owns the democratic heliocentric buffer `p_jh`. Its length always tracks
/// the live particle count; its capacity only ever grows, and growth past the
/// `allocated_n` high-water mark makes the hybrid stepper re-seed the
/// coordinates from the inertial array.
#[derive(Clone, Debug, Default)]
pub struct WisdomHolman {
    /// The democratic heliocentric particle array.
    pub p_jh: Vec<Particle>,
    /// Selected coordinate splitting.
    pub splitting: Splitting,
    pub(crate) allocated_n: usize,
}

impl WisdomHolman {
    /// Advances every body `i >= 1` along its osculating two-body orbit about
    /// a fixed center of gravitational parameter `gm = G * m0`.
    pub fn kepler_step(&mut self, gm: f64, dt: f64) -> Result<(), SimError> {
        debug_assert_eq!(self.splitting, Splitting::DemocraticHeliocentric);
        if gm <= 0.0 {
            return Err(SimError::NonPositiveCentralMass { gm });
        }
        for p in self.p_jh.iter_mut().skip(1) {
            let (pos, vel) = kepler_drift(p.pos, p.vel, gm, dt);
            p.pos = pos;
            p.vel = vel;
        }
        Ok(())
    }

    /// The jump step of the democratic heliocentric splitting: positions of
    /// bodies `i >= 1` drift with the total planetary momentum over `m0`.
    pub fn jump_step(&mut self, m0: f64, dt: f64) {
        debug_assert_eq!(self.splitting, Splitting::DemocraticHeliocentric);
        let mut p_tot = nalgebra::Vector3::zeros();
        for p in self.p_jh.iter().skip(1) {
            p_tot += p.m * p.vel;
        }
        let kick = dt / m0 * p_tot;
        for p in self.p_jh.iter_mut().skip(1) {
            p.pos += kick;
        }
    }

    /// The interaction kick: velocities of bodies `i >= 1` absorb the
    /// accelerations the gravity kernel left on the inertial array.
    pub fn interaction_step(&mut self, particles: &[Particle], dt: f64) {
        debug_assert_eq!(self.splitting, Splitting::DemocraticHeliocentric);
        for (h, p) in self.p_jh.iter_mut().zip(particles.iter()).skip(1) {
            h.vel += dt * p.acc;
        }
    }

    /// Drifts the center of mass carried by entry 0.
    pub fn com_step(&mut self, dt: f64) {
        debug_assert_eq!(self.splitting, Splitting::DemocraticHeliocentric);
        let v = self.p_jh[0].vel;
        self.p_jh[0].pos += dt * v;
    }
}

// Stumpff functions c2 and c3. The series kicks in near zero where the
// closed forms lose digits to cancellation.
fn stumpff(z: f64) -> (f64, f64) {
    if z > 1e-2 {
        let sz = z.sqrt();
        ((1.0 - sz.cos()) / z, (sz - sz.sin()) / (z * sz))
    } else if z < -1e-2 {
        let sz = (-z).sqrt();
        ((sz.cosh() - 1.0) / -z, (sz.sinh() - sz) / (-z * sz))
    } else {
        let c2 = 1.0 / 2.0 - z * (1.0 / 24.0 - z * (1.0 / 720.0 - z / 40_320.0));
        let c3 = 1.0 / 6.0 - z * (1.0 / 120.0 - z * (1.0 / 5_040.0 - z / 362_880.0));
        (c2, c3)
    }
}

/// Closed-form two-body propagation through the universal anomaly
/// (Vallado, Fundamentals of Astrodynamics, Algorithm 8). Handles elliptic,
/// parabolic and hyperbolic orbits with the same code path.
///
/// The Newton iteration is safeguarded by a bisection fallback, so the drift
/// always completes; a stall only costs accuracy and a warning.
pub fn kepler_drift(
    pos: nalgebra::Vector3<f64>,
    vel: nalgebra::Vector3<f64>,
    gm: f64,
    dt: f64,
) -> (nalgebra::Vector3<f64>, nalgebra::Vector3<f64>) {
    let r0 = pos.norm();
    if r0 == 0.0 || dt == 0.0 {
        return (pos, vel);
    }
    let sqrt_gm = gm.sqrt();
    let rv = pos.dot(&vel);
    let alpha = 2.0 / r0 - vel.norm_squared() / gm;

    // Initial guess for the universal anomaly chi.
    let mut chi = if alpha > 1e-12 {
        // Elliptic: linear in dt, valid across multiple revolutions.
        sqrt_gm * alpha * dt
    } else if alpha < -1e-12 {
        let a = 1.0 / alpha;
        let guess = dt.signum()
            * (-a).sqrt()
            * ((-2.0 * gm * alpha * dt)
                / (rv + dt.signum() * (-gm * a).sqrt() * (1.0 - r0 * alpha)))
                .ln();
        if guess.is_finite() {
            guess
        } else {
            sqrt_gm * dt / r0
        }
    } else {
        sqrt_gm * dt / r0
    };

    let tol = 1e-14 * chi.abs().max(1.0);
    let mut converged = false;
    for _ in 0..32 {
        let z = alpha * chi * chi;
        let (c2, c3) = stumpff(z);
        let f = rv / sqrt_gm * chi * chi * c2 + (1.0 - alpha * r0) * chi * chi * chi * c3
            + r0 * chi
            - sqrt_gm * dt;
        let fp = chi * chi * c2 + rv / sqrt_gm * chi * (1.0 - z * c3) + r0 * (1.0 - z * c2);
        let delta = f / fp;
        chi -= delta;
        if delta.abs() < tol {
            converged = true;
            break;
        }
    }
    if !converged {
        chi = kepler_bisect(chi, r0, rv, alpha, sqrt_gm, dt);
    }

    let z = alpha * chi * chi;
    let (c2, c3) = stumpff(z);
    let f = 1.0 - chi * chi * c2 / r0;
    let g = dt - chi * chi * chi * c3 / sqrt_gm;
    let new_pos = f * pos + g * vel;
    let rn = new_pos.norm();
    let fdot = sqrt_gm / (rn * r0) * chi * (z * c3 - 1.0);
    let gdot = 1.0 - chi * chi * c2 / rn;
    let new_vel = fdot * pos + gdot * vel;
    (new_pos, new_vel)
}

// F(chi) is monotonically non-decreasing (its derivative is the orbital
// radius), so once a sign change is bracketed, bisection cannot miss.
fn kepler_bisect(guess: f64, r0: f64, rv: f64, alpha: f64, sqrt_gm: f64, dt: f64) -> f64 {
    let f_of = |chi: f64| {
        let z = alpha * chi * chi;
        let (c2, c3) = stumpff(z);
        rv / sqrt_gm * chi * chi * c2 + (1.0 - alpha * r0) * chi * chi * chi * c3 + r0 * chi
            - sqrt_gm * dt
    };
    let mut width = guess.abs().max(sqrt_gm * dt.abs() / r0).max(1e-30);
    let (mut lo, mut hi);
    loop {
        lo = guess - width;
        hi = guess + width;
        if f_of(lo) <= 0.0 && f_of(hi) >= 0.0 {
            break;
        }
        width *= 2.0;
        if !width.is_finite() {
            warn!("kepler drift failed to bracket the universal anomaly");
            return guess;
        }
    }
    for _ in 0..128 {
        let mid = 0.5 * (lo + hi);
        if mid == lo || mid == hi {
            break;
        }
        if f_of(mid) > 0.0 {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    0.5 * (lo + hi)
}
