/*
    encke, a hybrid symplectic N-body integrator
    Copyright (C) 2026 The encke contributors

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

//! # encke
//!
//! A hybrid symplectic N-body integrator for the long-term evolution of
//! planetary systems. Most of the time the system is advanced with a cheap
//! second-order Wisdom-Holman mapping in democratic heliocentric coordinates.
//! When the stepper predicts that a pair of bodies will pass within a
//! critical distance during the upcoming step, the participants are handed to
//! a high-order adaptive integrator for the duration of that step, with the
//! pairwise force split smoothly between the two regimes by a changeover
//! function (Chambers 1999). Collisions are a normal event and may merge
//! bodies mid-step.
//!
//! ```
//! use encke::{Particle, Simulation};
//! use nalgebra::Vector3;
//!
//! let mut sim = Simulation::new();
//! sim.add(Particle::new(1.0, Vector3::zeros(), Vector3::zeros()));
//! sim.add(Particle::new(
//!     1e-3,
//!     Vector3::new(1.0, 0.0, 0.0),
//!     Vector3::new(0.0, 1.0, 0.0),
//! ));
//! sim.dt = 0.01;
//! sim.integrate(10.0).unwrap();
//! ```

#[macro_use]
extern crate log;

/// Error definitions shared across the crate.
pub mod errors;
pub use crate::errors::SimError;

/// The particle record all integrators operate on.
pub mod particle;
pub use crate::particle::Particle;

/// The simulation state record and the minimal outer loop.
pub mod simulation;
pub use crate::simulation::Simulation;

/// Conversions between inertial and democratic heliocentric coordinates.
pub mod transformations;

/// Acceleration kernels, including the mode-split hybrid oracle.
pub mod gravity;
pub use crate::gravity::GravityKernel;

/// Direct collision search and merge resolution.
pub mod collision;
pub use crate::collision::CollisionPolicy;

/// The symplectic, adaptive and hybrid integrators.
pub mod integrators;
pub use crate::integrators::hybrid::{Mode, SwitchingFunction};
