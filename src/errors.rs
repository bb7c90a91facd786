use thiserror::Error;

/// Errors raised by the integrators and the simulation record.
///
/// Configuration mismatches (unsupported variational blocks, a foreign
/// gravity kernel, desynchronized state on a recompute) are deliberately
/// *not* errors: they are recoverable, the stepper warns through `log` and
/// continues with safe defaults.
#[derive(Clone, PartialEq, Error, Debug)]
pub enum SimError {
    /// The operation needs at least a central body.
    #[error("the simulation contains no particles")]
    NoParticles,
    /// `step` and `integrate` require a non-zero timestep.
    #[error("the timestep must be non-zero")]
    ZeroTimestep,
    /// The Kepler drift is only defined about a center with positive mass.
    #[error("the central body must have positive gravitational parameter (gm = {gm})")]
    NonPositiveCentralMass {
        /// The offending `G * m0`.
        gm: f64,
    },
    /// Index past the end of the particle array.
    #[error("particle index {0} is out of bounds for a simulation of {1} particles")]
    ParticleIndexOutOfBounds(usize, usize),
}
