//! Ray-tracing acceleration structure over brick AABBs.
//!
//! wgpu exposes no procedural-AABB hardware structure, so this is a
//! software BVH kept in storage buffers: an implicit binary heap of
//! 2n-1 nodes whose last n entries are the brick leaves. The manager
//! owns the sizing state machine: a changed leaf count forces a
//! rebuild (realloc + full write), an unchanged count takes the cheap
//! refit path, and the top level is refit every frame either way.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

/// One BVH node (must match shaders). Leaves carry brick indices in
/// `left`; internal nodes use `left`/`right` implicitly via the heap
/// layout, so those fields are only meaningful for leaves.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct BvhNode {
    pub min: [f32; 3],
    pub left: u32,
    pub max: [f32; 3],
    pub right: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct AccelParams {
    leaf_count: u32,
    _pad: [u32; 3],
}

/// Sizes required to hold a structure over `leaf_count` leaves.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AccelSizes {
    /// Bottom-level node heap plus the single top-level node.
    pub structure_size: u64,
    /// Shared scratch: max of what the bottom and top passes need.
    pub scratch_size: u64,
}

const NODE_SIZE: u64 = std::mem::size_of::<BvhNode>() as u64;
const TLAS_SIZE: u64 = NODE_SIZE;
const TLAS_SCRATCH: u64 = 64;

/// Pure sizing for a structure over `leaf_count` leaves.
pub fn prebuild_info(leaf_count: u32) -> AccelSizes {
    let n = leaf_count.max(1) as u64;
    let nodes = 2 * n - 1;
    let internal = n - 1;
    AccelSizes {
        structure_size: nodes * NODE_SIZE + TLAS_SIZE,
        // Bottom scratch is one visitation counter per internal node.
        scratch_size: (internal * 4).max(TLAS_SCRATCH),
    }
}

pub struct AccelerationStructureManager {
    aabb_buffer: wgpu::Buffer,
    node_buffer: wgpu::Buffer,
    tlas_buffer: wgpu::Buffer,
    scratch_buffer: wgpu::Buffer,
    params: wgpu::Buffer,

    aabb_capacity: u32,
    node_capacity: u64,
    scratch_capacity: u64,
    last_aabb_count: Option<u32>,
    built: bool,

    reset_pipeline: wgpu::ComputePipeline,
    refit_pipeline: wgpu::ComputePipeline,
    tlas_pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
}

impl AccelerationStructureManager {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Acceleration Structure Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/accel_build.wgsl").into()),
        });

        let storage = |binding, read_only| wgpu::BindGroupLayoutEntry {
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
                label: Some("Acceleration Structure Layout"),
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
                    storage(1, true),  // leaf AABBs
                    storage(2, false), // node heap
                    storage(3, false), // top level
                    storage(4, false), // scratch
                ],
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Acceleration Structure Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = |label, entry_point| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        };
        let reset_pipeline = pipeline("Accel Reset Pipeline", "reset_scratch");
        let refit_pipeline = pipeline("Accel Refit Pipeline", "refit_nodes");
        let tlas_pipeline = pipeline("Accel TLAS Pipeline", "refit_top_level");

        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Accel Params Buffer"),
            contents: bytemuck::cast_slice(&[AccelParams {
                leaf_count: 0,
                _pad: [0; 3],
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let sizes = prebuild_info(1);
        let aabb_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Accel AABB Buffer"),
            size: std::mem::size_of::<crate::bricks::Aabb>() as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let node_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Accel Node Buffer"),
            size: sizes.structure_size - TLAS_SIZE,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let tlas_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Accel Top Level Buffer"),
            size: TLAS_SIZE,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let scratch_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Accel Scratch Buffer"),
            size: sizes.scratch_size,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let bind_group = Self::make_bind_group(
            device,
            &bind_group_layout,
            &params,
            &aabb_buffer,
            &node_buffer,
            &tlas_buffer,
            &scratch_buffer,
        );

        Self {
            aabb_buffer,
            node_buffer,
            tlas_buffer,
            scratch_buffer,
            params,
            aabb_capacity: 1,
            node_capacity: sizes.structure_size - TLAS_SIZE,
            scratch_capacity: sizes.scratch_size,
            last_aabb_count: None,
            built: false,
            reset_pipeline,
            refit_pipeline,
            tlas_pipeline,
            bind_group_layout,
            bind_group,
        }
    }

    fn make_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        params: &wgpu::Buffer,
        aabbs: &wgpu::Buffer,
        nodes: &wgpu::Buffer,
        tlas: &wgpu::Buffer,
        scratch: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Acceleration Structure Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: aabbs.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: nodes.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: tlas.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: scratch.as_entire_binding(),
                },
            ],
        })
    }

    /// Size the AABB buffer (and structure/scratch buffers) for `count`
    /// leaves. Capacity only grows within a run. Returns true when the
    /// AABB buffer itself was reallocated, so dependent bind groups can
    /// be rebuilt.
    pub fn allocate_aabb_buffer(&mut self, device: &wgpu::Device, count: u32) -> bool {
        // A changed leaf count invalidates the structure topology.
        if self.last_aabb_count != Some(count) {
            self.built = false;
        }

        let mut aabb_reallocated = false;
        if count > self.aabb_capacity {
            self.aabb_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Accel AABB Buffer"),
                size: count as u64 * std::mem::size_of::<crate::bricks::Aabb>() as u64,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            log::debug!("aabb buffer grows: {} -> {} leaves", self.aabb_capacity, count);
            self.aabb_capacity = count;
            aabb_reallocated = true;
        }

        let sizes = prebuild_info(count);
        let node_size = sizes.structure_size - TLAS_SIZE;
        let mut grew = aabb_reallocated;
        if node_size > self.node_capacity {
            self.node_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Accel Node Buffer"),
                size: node_size,
                usage: wgpu::BufferUsages::STORAGE,
                mapped_at_creation: false,
            });
            self.node_capacity = node_size;
            grew = true;
        }
        if sizes.scratch_size > self.scratch_capacity {
            self.scratch_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Accel Scratch Buffer"),
                size: sizes.scratch_size,
                usage: wgpu::BufferUsages::STORAGE,
                mapped_at_creation: false,
            });
            self.scratch_capacity = sizes.scratch_size;
            grew = true;
        }
        if grew {
            self.bind_group = Self::make_bind_group(
                device,
                &self.bind_group_layout,
                &self.params,
                &self.aabb_buffer,
                &self.node_buffer,
                &self.tlas_buffer,
                &self.scratch_buffer,
            );
        }
        aabb_reallocated
    }

    /// True when this frame's leaf count forces a full rebuild
    /// instead of a refit.
    pub fn requires_rebuild(&self, count: u32) -> bool {
        self.last_aabb_count != Some(count)
    }

    /// Record build or refit over `count` leaf AABBs, then refit the top
    /// level unconditionally. The AABB buffer must already hold the
    /// frame's leaves.
    pub fn record_update(
        &mut self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        count: u32,
    ) {
        // Zero leaves records nothing; the previous structure stays
        // whatever it was, matching the frame-level early-outs.
        if count == 0 {
            return;
        }
        if self.requires_rebuild(count) {
            log::debug!("accel rebuild over {count} leaves");
        }

        queue.write_buffer(
            &self.params,
            0,
            bytemuck::cast_slice(&[AccelParams {
                leaf_count: count,
                _pad: [0; 3],
            }]),
        );

        let internal = count.saturating_sub(1).max(1);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Accel Reset Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.reset_pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(internal.div_ceil(256), 1, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Accel Refit Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.refit_pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(count.div_ceil(64), 1, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Accel Top Level Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.tlas_pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(1, 1, 1);
        }

        self.last_aabb_count = Some(count);
        self.built = true;
    }

    pub fn is_structure_built(&self) -> bool {
        self.built
    }

    pub fn aabb_buffer(&self) -> &wgpu::Buffer {
        &self.aabb_buffer
    }

    pub fn node_buffer(&self) -> &wgpu::Buffer {
        &self.node_buffer
    }

    pub fn top_level_buffer(&self) -> &wgpu::Buffer {
        &self.tlas_buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_grow_monotonically() {
        let mut prev = prebuild_info(0);
        for count in 1..4096 {
            let next = prebuild_info(count);
            assert!(next.structure_size >= prev.structure_size, "count {count}");
            assert!(next.scratch_size >= prev.scratch_size, "count {count}");
            prev = next;
        }
    }

    #[test]
    fn heap_holds_two_n_minus_one_nodes() {
        for n in [1u64, 2, 7, 8, 1000] {
            let sizes = prebuild_info(n as u32);
            assert_eq!(sizes.structure_size, (2 * n - 1) * NODE_SIZE + TLAS_SIZE);
        }
    }

    #[test]
    fn scratch_covers_top_level_minimum() {
        // Tiny structures still need the fixed top-level scratch.
        assert_eq!(prebuild_info(1).scratch_size, TLAS_SCRATCH);
        assert_eq!(prebuild_info(2).scratch_size, TLAS_SCRATCH);
        // One counter per internal node once that dominates.
        assert_eq!(prebuild_info(1000).scratch_size, 999 * 4);
    }

    #[test]
    fn node_layout_matches_shader_stride() {
        assert_eq!(std::mem::size_of::<BvhNode>(), 32);
    }
}
