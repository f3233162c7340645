//! Fallback dense SDF volume.
//!
//! Instead of the adaptive brick path, evaluate the particle SDF into one
//! fixed-resolution 3D texture covering the whole world, traced through a
//! single world-sized AABB. No classification, scan, or reorder; cost is
//! resolution-cubed regardless of surface area.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::config::PipelineConfig;
use crate::particles::ParticleSystem;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct VolumeParams {
    world_min: [f32; 3],
    particle_count: u32,
    world_max: [f32; 3],
    resolution: u32,
}

pub struct SimpleVolume {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    resolution: u32,
    params: wgpu::Buffer,
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
}

impl SimpleVolume {
    pub fn new(
        device: &wgpu::Device,
        config: &PipelineConfig,
        particles: &ParticleSystem,
    ) -> Self {
        let resolution = config.texture_resolution;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Simple Volume Texture"),
            size: wgpu::Extent3d {
                width: resolution,
                height: resolution,
                depth_or_array_layers: resolution,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Simple Volume Params Buffer"),
            contents: bytemuck::cast_slice(&[VolumeParams {
                world_min: config.world_min.to_array(),
                particle_count: 0,
                world_max: config.world_max.to_array(),
                resolution,
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Simple Volume Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/simple_sdf.wgsl").into()),
        });

        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Simple Volume Layout"),
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
                            ty: wgpu::BufferBindingType::Storage { read_only: true },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::StorageTexture {
                            access: wgpu::StorageTextureAccess::WriteOnly,
                            format: wgpu::TextureFormat::R32Float,
                            view_dimension: wgpu::TextureViewDimension::D3,
                        },
                        count: None,
                    },
                ],
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Simple Volume Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Simple Volume Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("fill_volume"),
            compilation_options: Default::default(),
            cache: None,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Simple Volume Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: particles.unordered.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
            ],
        });

        Self {
            texture,
            view,
            resolution,
            params,
            pipeline,
            bind_group,
        }
    }

    pub fn record_fill(
        &self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        config: &PipelineConfig,
        particle_count: u32,
    ) {
        queue.write_buffer(
            &self.params,
            0,
            bytemuck::cast_slice(&[VolumeParams {
                world_min: config.world_min.to_array(),
                particle_count,
                world_max: config.world_max.to_array(),
                resolution: self.resolution,
            }]),
        );
        let groups = self.resolution.div_ceil(4);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Simple Volume Fill Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.dispatch_workgroups(groups, groups, groups);
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }
}
