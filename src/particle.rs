use nalgebra::Vector3;
use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// A point mass with a physical radius.
///
/// Particles live in two parallel arrays of the [`Simulation`]: the inertial
/// array visible to callers, and the democratic heliocentric buffer owned by
/// the symplectic core. The `acc` field is scratch space written by the
/// gravity kernels before each kick; it carries no state between steps.
///
/// [`Simulation`]: crate::Simulation
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// Mass, in the same unit system as the simulation's `g`.
    pub m: f64,
    /// Position.
    pub pos: Vector3<f64>,
    /// Velocity.
    pub vel: Vector3<f64>,
    /// Acceleration scratch, written by [`gravity::calculate_acceleration`].
    ///
    /// [`gravity::calculate_acceleration`]: crate::gravity::calculate_acceleration
    #[serde(default, skip)]
    pub acc: Vector3<f64>,
    /// Physical radius, used by the collision search and the critical-radius
    /// table.
    pub radius: f64,
    /// Stable identifier, preserved through encounters and collisions.
    pub hash: u32,
    /// Opaque user tag, carried along untouched.
    pub ap: Option<u64>,
    /// Simulation time of the last collision this particle survived.
    pub last_collision: f64,
}

impl Particle {
    /// Creates a point particle with zero radius.
    pub fn new(m: f64, pos: Vector3<f64>, vel: Vector3<f64>) -> Self {
        Self {
            m,
            pos,
            vel,
            ..Default::default()
        }
    }

    /// Builder-style physical radius.
    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    /// Builder-style stable identifier.
    pub fn with_hash(mut self, hash: u32) -> Self {
        self.hash = hash;
        self
    }

    /// Kinetic energy, `m v^2 / 2`.
    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.m * self.vel.norm_squared()
    }
}

impl fmt::Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "m={:e}  pos=[{:.12}, {:.12}, {:.12}]  vel=[{:.12}, {:.12}, {:.12}]",
            self.m, self.pos.x, self.pos.y, self.pos.z, self.vel.x, self.vel.y, self.vel.z
        )
    }
}
