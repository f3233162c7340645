//! Per-frame grid construction: counter clears and particle bucketing.

use wgpu::util::DeviceExt;

use crate::config::PipelineConfig;
use crate::grid::{GridLayout, GridSurfaceCounts};
use crate::particles::ParticleSystem;

/// GPU-resident grid state. Exclusively GPU-owned; the host only ever reads
/// `surface_counts` through the readback staging path.
pub struct GridBuffers {
    /// One uniform block shared by every grid-facing kernel.
    pub params: wgpu::Buffer,
    /// Particles per cell, rebuilt each frame.
    pub cell_counts: wgpu::Buffer,
    /// Per-cell scatter cursors for the reorder stage, zeroed each frame.
    pub cell_cursors: wgpu::Buffer,
    /// Non-empty-cell count per block.
    pub block_counts: wgpu::Buffer,
    /// Compacted surface block ids, valid up to `surface_counts.surface_blocks`.
    pub surface_block_indices: wgpu::Buffer,
    /// Compacted surface cell ids, valid up to `surface_counts.surface_cells`.
    pub surface_cell_indices: wgpu::Buffer,
    /// The [`GridSurfaceCounts`] record.
    pub surface_counts: wgpu::Buffer,
}

impl GridBuffers {
    pub fn new(device: &wgpu::Device, layout: &GridLayout, config: &PipelineConfig) -> Self {
        let cell_count = layout.cell_count() as u64;
        let block_count = layout.block_count() as u64;
        let u32_size = std::mem::size_of::<u32>() as u64;

        let storage = wgpu::BufferUsages::STORAGE;
        let make = |label: &str, elems: u64, usage: wgpu::BufferUsages| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: elems * u32_size,
                usage,
                mapped_at_creation: false,
            })
        };

        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Grid Params Buffer"),
            contents: bytemuck::cast_slice(&[layout.params(config)]),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        Self {
            params,
            cell_counts: make(
                "Cell Particle Counts",
                cell_count,
                storage | wgpu::BufferUsages::COPY_SRC,
            ),
            cell_cursors: make("Cell Reorder Cursors", cell_count, storage),
            block_counts: make("Block Non-Empty Counts", block_count, storage),
            surface_block_indices: make("Surface Block Indices", block_count, storage),
            surface_cell_indices: make("Surface Cell Indices", cell_count, storage),
            surface_counts: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Grid Surface Counts"),
                size: std::mem::size_of::<GridSurfaceCounts>() as u64,
                usage: storage | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }),
        }
    }
}

/// Records the clear and bucket dispatches.
pub struct GridBuilder {
    clear_pipeline: wgpu::ComputePipeline,
    bucket_pipeline: wgpu::ComputePipeline,
    grid_bind_group: wgpu::BindGroup,
    particle_bind_group: wgpu::BindGroup,
    cell_count: u32,
    particle_count: u32,
}

impl GridBuilder {
    pub fn new(
        device: &wgpu::Device,
        buffers: &GridBuffers,
        particles: &ParticleSystem,
        layout: &GridLayout,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Grid Build Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shaders/grid_build.wgsl").into()),
        });

        let entries: Vec<wgpu::BindGroupLayoutEntry> = (0..5)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: if binding == 0 {
                        wgpu::BufferBindingType::Uniform
                    } else {
                        wgpu::BufferBindingType::Storage { read_only: false }
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Grid Build Layout"),
                entries: &entries,
            });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Grid Build Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffers.params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffers.cell_counts.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: buffers.cell_cursors.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: buffers.block_counts.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: buffers.surface_counts.as_entire_binding(),
                },
            ],
        });

        // Bucket pass additionally mutates particles (cell_index annotation).
        let bucket_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Grid Bucket Particle Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let particle_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Grid Bucket Particle Bind Group"),
            layout: &bucket_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: particles.unordered.as_entire_binding(),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Grid Build Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout, &bucket_bind_group_layout],
            push_constant_ranges: &[],
        });

        let clear_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Grid Clear Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("clear_grid"),
            compilation_options: Default::default(),
            cache: None,
        });

        let bucket_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Grid Bucket Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("bucket_particles"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self {
            clear_pipeline,
            bucket_pipeline,
            grid_bind_group: bind_group,
            particle_bind_group,
            cell_count: layout.cell_count(),
            particle_count: particles.count(),
        }
    }

    /// Zero all per-frame counters, then bucket every particle.
    pub fn record(&self, encoder: &mut wgpu::CommandEncoder) {
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Grid Clear Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.clear_pipeline);
            self.set_groups(&mut pass);
            pass.dispatch_workgroups(self.cell_count.div_ceil(256), 1, 1);
        }
        if self.particle_count > 0 {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Grid Bucket Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.bucket_pipeline);
            self.set_groups(&mut pass);
            pass.dispatch_workgroups(self.particle_count.div_ceil(64), 1, 1);
        }
    }

    fn set_groups(&self, pass: &mut wgpu::ComputePass<'_>) {
        pass.set_bind_group(0, &self.grid_bind_group, &[]);
        pass.set_bind_group(1, &self.particle_bind_group, &[]);
    }
}
