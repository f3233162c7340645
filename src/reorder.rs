//! Scatter particles into cell-contiguous order.
//!
//! With the exclusive prefix sum of the per-cell counts as base offsets,
//! each particle claims its intra-cell rank from the per-cell cursor
//! buffer (zeroed by the grid clear pass; the counts array that fed the
//! scan stays read-only here) and lands at `offset[cell] + rank` in the
//! ordered buffer. The resulting range `[offset[c], offset[c]+count[c])`
//! holds exactly cell `c`'s particles, in unspecified internal order.

use crate::grid::GridBuffers;
use crate::particles::ParticleSystem;
use crate::scan::PrefixScan;

pub struct ReorderStage {
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    particle_count: u32,
}

impl ReorderStage {
    pub fn new(
        device: &wgpu::Device,
        buffers: &GridBuffers,
        particles: &ParticleSystem,
        scan: &dyn PrefixScan,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Particle Reorder Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/reorder.wgsl").into()),
        });

        let entry = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Particle Reorder Layout"),
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
                    entry(1, false), // unordered (rank annotation write-back)
                    entry(2, false), // ordered
                    entry(3, true),  // scan offsets
                    entry(4, false), // per-cell cursors
                ],
            });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Particle Reorder Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffers.params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: particles.unordered.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: particles.ordered.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: scan.output().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: buffers.cell_cursors.as_entire_binding(),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Particle Reorder Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Particle Reorder Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("reorder_particles"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self {
            pipeline,
            bind_group,
            particle_count: particles.count(),
        }
    }

    pub fn record(&self, encoder: &mut wgpu::CommandEncoder) {
        if self.particle_count == 0 {
            return;
        }
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Particle Reorder Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.dispatch_workgroups(self.particle_count.div_ceil(64), 1, 1);
    }
}
