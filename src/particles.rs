//! Particle storage and the per-frame motion stage.
//!
//! Particles live in two GPU buffers: `unordered` in simulation order,
//! mutated by the motion kernel, and `ordered` in cell-contiguous order,
//! rebuilt every frame by the reorder stage. Both are transient derived
//! state; only the seed data originates on the host.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use rand::Rng;
use wgpu::util::DeviceExt;

use crate::config::{PipelineConfig, SceneKind};

/// GPU particle record (must match shaders).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Particle {
    pub position: [f32; 3],
    /// Oscillation speed scalar.
    pub speed: f32,
    /// Seed coordinate the motion kernel oscillates around.
    pub start: [f32; 3],
    /// Owning cell, written by the grid-build kernel each frame.
    pub cell_index: u32,
    /// Rank among the particles of the same cell, written by the reorder
    /// kernel each frame.
    pub intra_cell_index: u32,
    pub _pad: [u32; 3],
}

/// Uniform block for the motion kernel (must match shader).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct MotionParams {
    time: f32,
    particle_count: u32,
    scene: u32,
    _pad: u32,
}

fn scene_code(scene: SceneKind) -> u32 {
    match scene {
        SceneKind::Random => 0,
        SceneKind::Grid => 1,
        SceneKind::Wave => 2,
    }
}

/// Seed the initial particle set for a scene.
pub fn seed_particles(config: &PipelineConfig) -> Vec<Particle> {
    let n = config.particle_count as usize;
    let extent = config.world_max - config.world_min;
    let mut particles = Vec::with_capacity(n);

    match config.scene {
        SceneKind::Random => {
            let mut rng = rand::thread_rng();
            for _ in 0..n {
                let pos = config.world_min
                    + Vec3::new(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>()) * extent;
                particles.push(Particle {
                    position: pos.to_array(),
                    speed: rng.gen_range(1..=10) as f32,
                    start: pos.to_array(),
                    ..Default::default()
                });
            }
        }
        SceneKind::Grid | SceneKind::Wave => {
            // Smallest lattice that holds all particles.
            let side = (n as f32).cbrt().ceil().max(1.0) as usize;
            'fill: for z in 0..side {
                for y in 0..side {
                    for x in 0..side {
                        if particles.len() == n {
                            break 'fill;
                        }
                        let frac = Vec3::new(
                            (x as f32 + 0.5) / side as f32,
                            (y as f32 + 0.5) / side as f32,
                            (z as f32 + 0.5) / side as f32,
                        );
                        let pos = config.world_min + frac * extent;
                        particles.push(Particle {
                            position: pos.to_array(),
                            speed: 1.0 + (x + z) as f32 * 0.5,
                            start: pos.to_array(),
                            ..Default::default()
                        });
                    }
                }
            }
        }
    }

    particles
}

/// Owns the particle buffers and the motion compute pass.
pub struct ParticleSystem {
    pub unordered: wgpu::Buffer,
    pub ordered: wgpu::Buffer,
    count: u32,
    scene: SceneKind,
    frozen: bool,

    motion_pipeline: wgpu::ComputePipeline,
    motion_bind_group: wgpu::BindGroup,
    motion_params: wgpu::Buffer,
}

impl ParticleSystem {
    pub fn new(device: &wgpu::Device, config: &PipelineConfig) -> Self {
        let seeds = seed_particles(config);
        // Keep a non-zero binding even when the particle set is empty.
        let byte_size = (seeds.len().max(1) * std::mem::size_of::<Particle>()) as u64;

        let unordered = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Unordered Particle Buffer"),
            contents: bytemuck::cast_slice(&pad_to_one(&seeds)),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });

        let ordered = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Ordered Particle Buffer"),
            size: byte_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let motion_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Motion Params Buffer"),
            contents: bytemuck::cast_slice(&[MotionParams {
                time: 0.0,
                particle_count: config.particle_count,
                scene: scene_code(config.scene),
                _pad: 0,
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Particle Motion Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/particles.wgsl").into()),
        });

        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Particle Motion Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let motion_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Particle Motion Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: motion_params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: unordered.as_entire_binding(),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Particle Motion Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let motion_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Particle Motion Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("update_positions"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self {
            unordered,
            ordered,
            count: config.particle_count,
            scene: config.scene,
            frozen: config.freeze_particles,
            motion_pipeline,
            motion_bind_group,
            motion_params,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Advance particle positions. Static scenes and frozen runs are no-ops.
    pub fn record_motion(&self, queue: &wgpu::Queue, encoder: &mut wgpu::CommandEncoder, time: f32) {
        if self.frozen || self.scene == SceneKind::Grid || self.count == 0 {
            return;
        }
        queue.write_buffer(
            &self.motion_params,
            0,
            bytemuck::cast_slice(&[MotionParams {
                time,
                particle_count: self.count,
                scene: scene_code(self.scene),
                _pad: 0,
            }]),
        );

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Particle Motion Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.motion_pipeline);
        pass.set_bind_group(0, &self.motion_bind_group, &[]);
        pass.dispatch_workgroups(self.count.div_ceil(64), 1, 1);
    }
}

fn pad_to_one(seeds: &[Particle]) -> Vec<Particle> {
    if seeds.is_empty() {
        vec![Particle::default()]
    } else {
        seeds.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridLayout;

    #[test]
    fn particle_record_is_48_bytes() {
        // Matches the WGSL struct layout (vec3 alignment pads to 48).
        assert_eq!(std::mem::size_of::<Particle>(), 48);
    }

    #[test]
    fn seeds_stay_inside_world_bounds() {
        for scene in [SceneKind::Random, SceneKind::Grid, SceneKind::Wave] {
            let config = PipelineConfig {
                scene,
                particle_count: 125,
                ..Default::default()
            };
            let layout = GridLayout::new(&config);
            for p in seed_particles(&config) {
                let pos = Vec3::from_array(p.position);
                assert!(pos.cmpge(config.world_min).all(), "{scene:?}: {pos}");
                assert!(pos.cmple(config.world_max).all(), "{scene:?}: {pos}");
                // Every seed maps to a real cell.
                let coord = layout.cell_coord_of(pos);
                assert!(layout.cell_index(coord) < layout.cell_count());
            }
        }
    }

    #[test]
    fn lattice_scenes_emit_exact_count() {
        let config = PipelineConfig {
            scene: SceneKind::Wave,
            particle_count: 100, // not a perfect cube
            ..Default::default()
        };
        assert_eq!(seed_particles(&config).len(), 100);
    }
}
