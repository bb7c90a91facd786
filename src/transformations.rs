//! Democratic heliocentric coordinates.
//!
//! Body 0 of the heliocentric array carries the total mass and the
//! center-of-mass state. Bodies `i >= 1` carry positions relative to body 0
//! and velocities relative to the center of mass. This is the canonical
//! splitting the Wisdom-Holman core integrates in, and the only coordinate
//! system the hybrid stepper supports.

use crate::particle::Particle;

/// Fills `dh` with the democratic heliocentric image of `particles`.
///
/// Both slices must have the same length; `dh` is overwritten entirely.
pub fn inertial_to_democratic_heliocentric(particles: &[Particle], dh: &mut [Particle]) {
    debug_assert_eq!(particles.len(), dh.len());
    let mut mtot = 0.0;
    let mut com = Particle::default();
    for p in particles {
        mtot += p.m;
        com.pos += p.m * p.pos;
        com.vel += p.m * p.vel;
    }
    com.m = mtot;
    com.pos /= mtot;
    com.vel /= mtot;
    dh[0] = com;
    for (h, p) in dh.iter_mut().zip(particles.iter()).skip(1) {
        *h = *p;
        h.pos = p.pos - particles[0].pos;
        h.vel = p.vel - com.vel;
    }
}

/// Overwrites `particles` in place from its democratic heliocentric image.
///
/// The central body's mass is reconstructed as the total minus the sum of the
/// others, so a mass change written into `dh` (a merger during an encounter
/// substep) propagates to the inertial array here. Non-coordinate attributes
/// of `particles` are left untouched.
pub fn democratic_heliocentric_to_inertial(particles: &mut [Particle], dh: &[Particle]) {
    debug_assert_eq!(particles.len(), dh.len());
    let mtot = dh[0].m;
    let mut m0 = mtot;
    let mut pos0 = dh[0].pos;
    for h in dh.iter().skip(1) {
        m0 -= h.m;
        pos0 -= h.m / mtot * h.pos;
    }
    let mut vel0 = dh[0].vel;
    for h in dh.iter().skip(1) {
        vel0 -= h.m / m0 * h.vel;
    }
    particles[0].m = m0;
    particles[0].pos = pos0;
    particles[0].vel = vel0;
    for (p, h) in particles.iter_mut().zip(dh.iter()).skip(1) {
        p.m = h.m;
        p.pos = h.pos + pos0;
        p.vel = h.vel + dh[0].vel;
    }
}

#[test]
fn round_trip_recovers_inertial_state() {
    use nalgebra::Vector3;

    let particles = vec![
        Particle::new(1.0, Vector3::new(0.01, -0.02, 0.0), Vector3::new(1e-4, 0.0, 0.0)),
        Particle::new(1e-3, Vector3::new(1.0, 0.1, -0.05), Vector3::new(0.1, 1.0, 0.02)),
        Particle::new(3e-5, Vector3::new(-2.3, 0.7, 0.4), Vector3::new(-0.5, -0.3, 0.1)),
    ];
    let mut dh = vec![Particle::default(); 3];
    inertial_to_democratic_heliocentric(&particles, &mut dh);

    // Entry 0 is the center of mass.
    let mtot: f64 = particles.iter().map(|p| p.m).sum();
    assert_eq!(dh[0].m, mtot);
    let com_vel: Vector3<f64> = particles.iter().map(|p| p.m * p.vel).sum::<Vector3<f64>>() / mtot;
    approx::assert_relative_eq!(dh[0].vel, com_vel, max_relative = 1e-15);
    // Entries i >= 1 are heliocentric in position.
    approx::assert_relative_eq!(dh[1].pos, particles[1].pos - particles[0].pos);

    let mut back = particles.clone();
    democratic_heliocentric_to_inertial(&mut back, &dh);
    for (b, p) in back.iter().zip(particles.iter()) {
        approx::assert_relative_eq!(b.m, p.m, max_relative = 1e-14);
        approx::assert_relative_eq!(b.pos, p.pos, epsilon = 1e-14);
        approx::assert_relative_eq!(b.vel, p.vel, epsilon = 1e-14);
    }
}
