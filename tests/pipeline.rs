//! End-to-end runs on the headless device.

use cmpe::device::{DeviceCommand, HeadlessDevice};
use cmpe::pass::PassStatus;
use cmpe::prelude::*;
use cmpe::simulation::SimulationParams;

fn constant_x(_: &mut Vec4, out: &mut Vec4) {
    *out = Vec4::new(1.0, 0.0, 0.0, 0.0);
}

#[test]
fn test_one_trail_step_by_hand() {
    // 16 particles, trails of 4, bundles of 2: two bundles, heads 0, 1, 8, 9
    let mut buffers = cmpe::ParticleBuffers::new(16, 0.05);
    let scheme = ParticlesWithTrails::new()
        .with_interpolation(Interpolation::Linear)
        .with_trail_bundle_size(2);
    let params = SimulationParams {
        dt: 0.01,
        trail_size: 4,
        steps_per_frame: 1,
        particle_scale: 1.0,
    };

    scheme.advance(buffers.arrays_mut(), &constant_x, &params);

    let meta = buffers.meta.data();
    let position = buffers.position.data();
    for head in [0, 1, 8, 9] {
        assert_eq!(meta[head].leader, 2, "head {head}");
        // K = dt, one segment
        let written = position[head + 2];
        assert!((written.x - 0.01).abs() < 1e-6, "head {head}: {written}");
        assert_eq!(written.w, 1.0);
    }
    // untouched slots stay at the origin
    assert_eq!(position[4], Vec4::W);
    assert_eq!(position[12], Vec4::W);
}

#[test]
fn test_trails_wrap_around_the_ring() {
    let mut buffers = cmpe::ParticleBuffers::new(16, 0.05);
    let scheme = ParticlesWithTrails::new()
        .with_interpolation(Interpolation::Linear)
        .with_trail_bundle_size(2);
    let params = SimulationParams {
        dt: 0.01,
        trail_size: 4,
        steps_per_frame: 1,
        particle_scale: 1.0,
    };

    let mut leaders = Vec::new();
    for _ in 0..5 {
        scheme.advance(buffers.arrays_mut(), &constant_x, &params);
        leaders.push(buffers.meta.data()[9].leader);
    }
    // span 8 keeps offsets in {0, 2, 4, 6}
    assert_eq!(leaders, vec![2, 4, 6, 0, 2]);
}

#[test]
fn test_system_uploads_what_it_simulated() {
    let mut device = HeadlessDevice::new();
    let config = SystemConfig::new()
        .with_particle_count(32)
        .with_trail_size(4)
        .with_scheme(SchemeConfig::Trails {
            map_mode: MapMode::Direct,
            integration_step: IntegrationStep::LimitDelta,
            interpolation: Interpolation::Cubic,
            trail_bundle_size: 2,
            metadata: ComputeMetadata::Tangent,
        });
    let mut system = ParticleSystem::new(config, QuadraticMap::rotation()).unwrap();
    system.set_viewport(640.0, 480.0);

    for frame in 0..10 {
        let status = system.tick(&mut device, frame as f64 / 60.0).unwrap();
        assert_eq!(status, PassStatus::Rendered);
    }
    assert_eq!(system.clock().step(), 10);

    let handle = system.buffers().position.existing_handle().unwrap();
    let expected: &[u8] = bytemuck::cast_slice(system.buffers().position.data());
    assert_eq!(device.buffer_contents(handle).unwrap(), expected);
    assert_eq!(
        device.count(|c| matches!(c, DeviceCommand::Draw { instances: 32, .. })),
        10
    );
}

#[test]
fn test_gpu_scheme_runs_with_a_custom_map() {
    let custom = MemoryResources::new().with(
        "chaotic_map.wgsl",
        "fn chaotic_map(p: vec4<f32>) -> vec4<f32> { return vec4<f32>(-p.y, p.x, 0.0, 0.0) * MapParameters[0]; }",
    );
    let shaders = ShaderRegistry::new(
        LayeredResources::new()
            .with_layer(custom)
            .with_layer(MemoryResources::builtin()),
    );

    let mut device = HeadlessDevice::new();
    let config = SystemConfig::new()
        .with_particle_count(20)
        .with_scheme(SchemeConfig::TrailsGpu {
            map_mode: MapMode::ForceField,
            integration_step: IntegrationStep::DoNotLimit,
            trail_bundle_size: 4,
        });
    let mut system = ParticleSystem::new(config, QuadraticMap::new(vec![2.0]))
        .unwrap()
        .with_shaders(shaders);

    system.tick(&mut device, 0.0).unwrap();
    system.tick(&mut device, 0.016).unwrap();
    assert_eq!(
        device.count(|c| *c == DeviceCommand::Dispatch { x: 3, y: 1, z: 1 }),
        2
    );
}

#[test]
fn test_clock_reset_reseeds_ifs() {
    let mut device = HeadlessDevice::new();
    let config = SystemConfig::new()
        .with_particle_count(40)
        .with_scheme(SchemeConfig::Ifs {
            seed_count: 10,
            color_scheme: IfsColoring::Fixed,
        });
    let mut system = ParticleSystem::new(config, |p: &mut Vec4, out: &mut Vec4| *out = *p * 0.5)
        .unwrap();

    system.tick(&mut device, 0.0).unwrap();
    system.tick(&mut device, 0.1).unwrap();
    let marker = Vec4::new(9.0, 9.0, 9.0, 1.0);
    system.buffers_mut().position.data_mut()[0] = marker;

    system.tick(&mut device, 0.2).unwrap();
    assert_eq!(system.buffers().position.data()[0], marker);

    system.clock_mut().reset();
    system.tick(&mut device, 0.3).unwrap();
    let seed = system.buffers().position.data()[0];
    assert!(seed.x < 0.01 && seed.y == 0.0, "{seed}");
}
