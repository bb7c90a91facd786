//! High-order integrator with adaptive step control for the encounter
//! substeps.
//!
//! The integrator advances whatever particle array the simulation currently
//! exposes, evaluating stage derivatives through the active gravity kernel.
//! Error estimation uses the difference of the two embedded solutions, with
//! an RSS criterion applied to the position and velocity blocks of each
//! particle separately; the worst particle governs the step.

use crate::gravity;
use crate::particle::Particle;
use crate::simulation::Simulation;
use nalgebra::Vector3;
use std::mem;

// Below this magnitude the error is taken as absolute rather than relative
// to the state change over the step.
const REL_ERR_THRESH: f64 = 0.1;

/// An embedded Runge-Kutta pair, described by its Butcher table.
///
/// `a_coeffs` is the lower triangle of the table, flattened row by row, of
/// length `stages * (stages - 1) / 2`. `b_coeffs` holds the `b_i` weights of
/// the higher-order solution followed by the `b*_i` weights of the embedded
/// one, `2 * stages` values in total. The `c_i` nodes are recovered as row
/// sums of `a`.
pub trait RungeKutta {
    /// Order of the higher-order solution, used by the step-size controller.
    fn order() -> u8;
    /// Number of derivative evaluations per attempted step.
    fn stages() -> usize;
    /// Flattened lower triangle of the `a_ij` coefficients.
    fn a_coeffs() -> &'static [f64];
    /// The `b_i` weights followed by the embedded `b*_i` weights.
    fn b_coeffs() -> &'static [f64];
}

/// The Dormand & Prince (1980) 5(4) pair. First-same-as-last: the final
/// stage is evaluated at the candidate state, which the caller re-derives
/// anyway before the next step.
pub struct DormandPrince54;

impl RungeKutta for DormandPrince54 {
    fn order() -> u8 {
        5
    }

    fn stages() -> usize {
        7
    }

    fn a_coeffs() -> &'static [f64] {
        &[
            1.0 / 5.0,
            3.0 / 40.0,
            9.0 / 40.0,
            44.0 / 45.0,
            -56.0 / 15.0,
            32.0 / 9.0,
            19_372.0 / 6_561.0,
            -25_360.0 / 2_187.0,
            64_448.0 / 6_561.0,
            -212.0 / 729.0,
            9_017.0 / 3_168.0,
            -355.0 / 33.0,
            46_732.0 / 5_247.0,
            49.0 / 176.0,
            -5_103.0 / 18_656.0,
            35.0 / 384.0,
            0.0,
            500.0 / 1_113.0,
            125.0 / 192.0,
            -2_187.0 / 6_784.0,
            11.0 / 84.0,
        ]
    }

    fn b_coeffs() -> &'static [f64] {
        &[
            35.0 / 384.0,
            0.0,
            500.0 / 1_113.0,
            125.0 / 192.0,
            -2_187.0 / 6_784.0,
            11.0 / 84.0,
            0.0,
            5_179.0 / 57_600.0,
            0.0,
            7_571.0 / 16_695.0,
            393.0 / 640.0,
            -92_097.0 / 339_200.0,
            187.0 / 2_100.0,
            1.0 / 40.0,
        ]
    }
}

/// Step-size bounds and tolerance of the adaptive integrator.
#[derive(Clone, Copy, Debug)]
pub struct AdaptiveOpts {
    /// Target local error per step.
    pub tolerance: f64,
    /// Smallest step magnitude; at this size a step is accepted regardless of
    /// its error estimate.
    pub min_step: f64,
    /// Largest step magnitude the controller may propose.
    pub max_step: f64,
    /// Cap on rejected attempts per step before giving up with a warning.
    pub attempts: u8,
}

impl Default for AdaptiveOpts {
    fn default() -> Self {
        Self {
            tolerance: 1e-9,
            min_step: 0.0,
            max_step: f64::INFINITY,
            attempts: 50,
        }
    }
}

/// Details of the most recent step.
#[derive(Clone, Copy, Debug, Default)]
pub struct StepDetails {
    /// Step size actually taken.
    pub step: f64,
    /// Error estimate of that step.
    pub error: f64,
    /// Attempts needed to bring the error within tolerance.
    pub attempts: u8,
}

// One stage derivative of one particle: d(pos)/dt and d(vel)/dt.
type Derivative = (Vector3<f64>, Vector3<f64>);

/// Adaptive integrator state. The coefficient slices are fixed at
/// construction; scratch buffers grow to the particle count on first use and
/// are reused afterwards.
#[derive(Clone, Debug)]
pub struct AdaptiveIntegrator {
    /// Tunable options.
    pub opts: AdaptiveOpts,
    details: StepDetails,
    order: u8,
    stages: usize,
    a_coeffs: &'static [f64],
    b_coeffs: &'static [f64],
    y0: Vec<Particle>,
    k: Vec<Vec<Derivative>>,
}

impl Default for AdaptiveIntegrator {
    fn default() -> Self {
        Self::new::<DormandPrince54>()
    }
}

impl AdaptiveIntegrator {
    /// Builds an integrator around the given embedded pair.
    pub fn new<T: RungeKutta>() -> Self {
        Self {
            opts: AdaptiveOpts::default(),
            details: StepDetails::default(),
            order: T::order(),
            stages: T::stages(),
            a_coeffs: T::a_coeffs(),
            b_coeffs: T::b_coeffs(),
            y0: Vec::new(),
            k: Vec::new(),
        }
    }

    /// Borrows the details of the latest step.
    pub fn latest_details(&self) -> &StepDetails {
        &self.details
    }

    /// Clears per-run state. Called at the start of every encounter substep.
    pub fn reset(&mut self) {
        self.details = StepDetails::default();
        self.y0.clear();
        for stage in &mut self.k {
            stage.clear();
        }
    }
}

/// Takes one adaptive step of the current `sim.dt`.
///
/// Expects the accelerations of the current state to be on the particles
/// already (they become the first stage). On return the particles and `sim.t`
/// have advanced by the accepted step, and `sim.dt` holds the proposed size
/// of the next step, preserving sign.
pub fn step(sim: &mut Simulation) {
    // The scratch buffers cannot stay borrowed while the gravity kernel runs,
    // so the integrator state is moved out for the duration of the step.
    let mut core = mem::take(&mut sim.adaptive);
    core.step_inner(sim);
    sim.adaptive = core;
}

impl AdaptiveIntegrator {
    fn step_inner(&mut self, sim: &mut Simulation) {
        let n = sim.particles.len();
        self.y0.resize(n, Particle::default());
        self.y0.copy_from_slice(&sim.particles);
        self.k.resize(self.stages, Vec::new());
        for stage in &mut self.k {
            stage.resize(n, (Vector3::zeros(), Vector3::zeros()));
        }
        for (ki, p) in self.k[0].iter_mut().zip(self.y0.iter()) {
            *ki = (p.vel, p.acc);
        }

        let sign = if sim.dt < 0.0 { -1.0 } else { 1.0 };
        self.details.attempts = 1;
        loop {
            let dt = sim.dt;
            let mut a_idx = 0;
            for s in 1..self.stages {
                for i in 0..n {
                    let mut dpos = Vector3::zeros();
                    let mut dvel = Vector3::zeros();
                    for (j, kj) in self.k.iter().enumerate().take(s) {
                        let a_sj = self.a_coeffs[a_idx + j];
                        dpos += a_sj * kj[i].0;
                        dvel += a_sj * kj[i].1;
                    }
                    sim.particles[i].pos = self.y0[i].pos + dt * dpos;
                    sim.particles[i].vel = self.y0[i].vel + dt * dvel;
                }
                a_idx += s;
                gravity::calculate_acceleration(sim);
                for i in 0..n {
                    self.k[s][i] = (sim.particles[i].vel, sim.particles[i].acc);
                }
            }

            // Candidate state and embedded error estimate.
            let mut error: f64 = 0.0;
            for i in 0..n {
                let mut dpos = Vector3::zeros();
                let mut dvel = Vector3::zeros();
                let mut err_pos = Vector3::zeros();
                let mut err_vel = Vector3::zeros();
                for (s, ks) in self.k.iter().enumerate() {
                    let b = self.b_coeffs[s];
                    let b_star = self.b_coeffs[s + self.stages];
                    dpos += b * ks[i].0;
                    dvel += b * ks[i].1;
                    err_pos += (b - b_star) * ks[i].0;
                    err_vel += (b - b_star) * ks[i].1;
                }
                sim.particles[i].pos = self.y0[i].pos + dt * dpos;
                sim.particles[i].vel = self.y0[i].vel + dt * dvel;
                error = error
                    .max(rss_step(dt * err_pos, dt * dpos))
                    .max(rss_step(dt * err_vel, dt * dvel));
            }

            if error <= self.opts.tolerance
                || dt.abs() <= self.opts.min_step
                || self.details.attempts >= self.opts.attempts
            {
                if self.details.attempts >= self.opts.attempts && error > self.opts.tolerance {
                    warn!(
                        "adaptive step accepted after {} attempts with error {:e}",
                        self.details.attempts, error
                    );
                }
                self.details.step = dt;
                self.details.error = error;
                sim.t += dt;
                if error < self.opts.tolerance {
                    let proposed =
                        0.9 * dt.abs() * (self.opts.tolerance / error).powf(1.0 / f64::from(self.order));
                    sim.dt = sign * proposed.min(self.opts.max_step);
                }
                return;
            }
            // Error too large: shrink and retry from the held state.
            self.details.attempts += 1;
            let proposed =
                0.9 * dt.abs() * (self.opts.tolerance / error).powf(1.0 / f64::from(self.order - 1));
            sim.dt = sign * proposed.max(self.opts.min_step);
            for (p, y) in sim.particles.iter_mut().zip(self.y0.iter()) {
                *p = *y;
            }
        }
    }
}

// RSS step error: the error magnitude relative to how much the state moved,
// falling back to the absolute error for near-stationary components.
fn rss_step(err: Vector3<f64>, delta: Vector3<f64>) -> f64 {
    let mag = delta.norm();
    let err = err.norm();
    if mag > REL_ERR_THRESH {
        err / mag
    } else {
        err
    }
}
