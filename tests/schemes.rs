//! Partition and ring invariants of the trail schemes.

use std::collections::HashSet;

use cmpe::particles::ParticleBuffers;
use cmpe::simulation::speed_bound::{SpeedBound, DECAY};
use cmpe::simulation::{Interpolation, ParticlesWithTrails, SimulationParams, TrailLayout};
use cmpe::Vec4;
use proptest::prelude::*;

fn spiral(p: &mut Vec4, out: &mut Vec4) {
    *out = Vec4::new(-p.y + 0.3, p.x, 0.1 * p.z + 0.5, 0.0);
}

proptest! {
    #[test]
    fn bundles_partition_the_particles(n in 0usize..500, t in 0usize..20, b in 0usize..12) {
        let layout = TrailLayout::new(n, t, b);
        let mut next = 0;
        for bundle in 0..layout.bundle_count() {
            let range = layout.bundle_range(bundle);
            prop_assert_eq!(range.start, next);
            prop_assert!(!range.is_empty());
            next = range.end;
        }
        prop_assert_eq!(next, n);
    }

    #[test]
    fn trail_slots_stay_inside_their_bundle(n in 1usize..300, t in 1usize..12, b in 1usize..8) {
        let layout = TrailLayout::new(n, t, b);
        let mut seen = HashSet::new();
        for bundle in 0..layout.bundle_count() {
            let range = layout.bundle_range(bundle);
            for head in layout.heads(bundle) {
                for m in 0..t {
                    let slot = head + m * b;
                    if slot < n {
                        prop_assert!(range.contains(&slot));
                        prop_assert!(seen.insert(slot), "slot {} claimed twice", slot);
                    }
                }
            }
        }
        prop_assert_eq!(seen.len(), n);
    }

    #[test]
    fn ring_advance_stays_in_bounds(n in 1usize..300, t in 1usize..12, b in 1usize..8, steps in 1usize..40) {
        let layout = TrailLayout::new(n, t, b);
        for bundle in 0..layout.bundle_count() {
            for head in layout.heads(bundle) {
                let mut leader = 0;
                for _ in 0..steps {
                    leader = layout.advance(head, leader);
                    prop_assert_eq!(leader % b, 0);
                    prop_assert!(leader < layout.span());
                    prop_assert!(head + leader < n);
                }
            }
        }
    }

    #[test]
    fn simulated_leaders_stay_valid(
        n in 1usize..200,
        t in 1usize..10,
        b in 1usize..6,
        ticks in 1usize..6,
        linear in any::<bool>(),
    ) {
        let mut buffers = ParticleBuffers::new(n, 0.01);
        let scheme = ParticlesWithTrails::new()
            .with_trail_bundle_size(b)
            .with_interpolation(if linear { Interpolation::Linear } else { Interpolation::Cubic });
        let params = SimulationParams { dt: 0.05, trail_size: t, steps_per_frame: 1, particle_scale: 1.0 };
        let layout = TrailLayout::new(n, t, b);

        for _ in 0..ticks {
            scheme.advance(buffers.arrays_mut(), &spiral, &params);
        }

        // leaders are stored bundle-local
        for bundle in 0..layout.bundle_count() {
            let range = layout.bundle_range(bundle);
            for head in layout.heads(bundle) {
                let leader = buffers.meta.data()[head].leader as usize;
                prop_assert_eq!(leader % b, 0);
                prop_assert!(head + leader < range.end);
            }
        }
        for p in buffers.position.data() {
            prop_assert!(p.is_finite());
        }
    }

    #[test]
    fn decay_never_drops_below_floor(start in 0.0f32..1e6, floor in 0.0f32..10.0, ticks in 1usize..50) {
        let bound = SpeedBound::new(start);
        let mut expected = start;
        for _ in 0..ticks {
            expected = (expected * DECAY).max(floor);
            let value = bound.decay(floor);
            prop_assert!(value >= floor);
            prop_assert!((value - expected).abs() <= expected * 1e-6);
        }
    }
}

#[test]
fn test_peak_speed_raises_bound() {
    let mut buffers = ParticleBuffers::new(64, 0.01);
    let scheme = ParticlesWithTrails::new().with_trail_bundle_size(4);
    let params = SimulationParams::default();
    let fast = |_: &mut Vec4, out: &mut Vec4| *out = Vec4::new(0.0, 50.0, 0.0, 0.0);

    scheme.advance(buffers.arrays_mut(), &fast, &params);
    assert!((scheme.speed_bound() - 50.0).abs() < 1e-4);

    let still = |_: &mut Vec4, out: &mut Vec4| *out = Vec4::ZERO;
    scheme.advance(buffers.arrays_mut(), &still, &params);
    assert!((scheme.speed_bound() - 50.0 * DECAY).abs() < 1e-4);
}
