/// Second-order Wisdom-Holman mapping in democratic heliocentric
/// coordinates: the Kepler, jump, interaction and center-of-mass sub-steps.
pub mod symplectic;
pub use self::symplectic::{Splitting, WisdomHolman};

/// Embedded Runge-Kutta integrator with adaptive step control, used for the
/// close-encounter substeps.
pub mod adaptive;
pub use self::adaptive::{AdaptiveIntegrator, AdaptiveOpts, DormandPrince54, RungeKutta};

/// The hybrid stepper: encounter prediction, the changeover function, the
/// critical-distance table and the outer drift-kick-drift state machine.
pub mod hybrid;
