//! Direct collision search and merge resolution.
//!
//! A collision is an overlap of physical radii. Pairs are scanned in a fixed
//! order and merged into the lower-indexed body, which keeps its slot; the
//! higher-indexed body is removed with the order of the survivors preserved.
//! The encounter substep relies on both properties when it unwinds its
//! compacted view.

use crate::integrators::hybrid::Mode;
use crate::simulation::Simulation;
use serde_derive::{Deserialize, Serialize};

/// What the collision search does about overlapping bodies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollisionPolicy {
    /// No collision detection at all.
    #[default]
    Disabled,
    /// Overlapping bodies merge, conserving mass, momentum and volume.
    Merge,
}

/// Scans the current particle array for overlapping pairs and resolves them.
///
/// Runs on whatever view the simulation currently exposes, so during an
/// encounter substep it sees the compacted encounter set. Merge chains are
/// handled within a single pass. May shrink the particle array; it never
/// reorders survivors.
pub fn search(sim: &mut Simulation) {
    if sim.collision == CollisionPolicy::Disabled {
        return;
    }
    let mut i = 0;
    while i < sim.particles.len() {
        let mut j = i + 1;
        while j < sim.particles.len() {
            let pi = sim.particles[i];
            let pj = sim.particles[j];
            let d = (pi.pos - pj.pos).norm();
            if d < pi.radius + pj.radius {
                resolve_merge(sim, i, j);
                // The next candidate has shifted into slot j.
            } else {
                j += 1;
            }
        }
        i += 1;
    }
}

// Merge j into i (i < j): mass sum, momentum-conserving state,
// volume-conserving radius. The survivor keeps its identity.
fn resolve_merge(sim: &mut Simulation, i: usize, j: usize) {
    debug_assert!(i < j);
    let pi = sim.particles[i];
    let pj = sim.particles[j];
    let m = pi.m + pj.m;
    debug!(
        "merging body {} (hash {}) into body {} (hash {}) at t={}",
        j, pj.hash, i, pi.hash, sim.t
    );
    let survivor = &mut sim.particles[i];
    survivor.m = m;
    survivor.pos = (pi.m * pi.pos + pj.m * pj.pos) / m;
    survivor.vel = (pi.m * pi.vel + pj.m * pj.vel) / m;
    survivor.radius = (pi.radius.powi(3) + pj.radius.powi(3)).cbrt();
    survivor.last_collision = sim.t;
    sim.particles.remove(j);

    if let Some(na) = sim.n_active {
        if j < na {
            sim.n_active = Some(na - 1);
        }
    }
    match sim.hybrid.mode {
        Mode::Sub => {
            // Keep the compacted bookkeeping aligned with the scratch array;
            // the substep's unwind depends on it.
            if j < sim.hybrid.encounter_dcrit.len() {
                sim.hybrid.encounter_dcrit.remove(j);
            }
            if j < sim.hybrid.encounter_map.len() {
                sim.hybrid.encounter_map.remove(j);
            }
        }
        Mode::Outer => {
            // The heliocentric buffer is re-seeded and the critical radii
            // rebuilt on the next step; only the alignment is fixed here.
            if j < sim.wh.p_jh.len() {
                sim.wh.p_jh.remove(j);
            }
            sim.hybrid.recalculate_coordinates_this_timestep = true;
            sim.hybrid.recalculate_dcrit_this_timestep = true;
        }
    }
}
